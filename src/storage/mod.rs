//! Persistence for the string index.
//!
//! Both backends implement [`IndexStore`]: an explicit open, merge/commit,
//! flush, close lifecycle with atomic per-file commits. The builder is the
//! only writer; readers open a separate read-only handle.

pub mod memory;
pub mod sqlite;

use serde::Serialize;
use std::collections::HashMap;

use crate::config::{IndexerConfig, StoreBackend};
use crate::error::StoreError;
use crate::fingerprint::Fingerprint;
use crate::types::{FileContribution, IndexEntry, Occurrence};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Creates the store if needed and records the configured fingerprint.
    ReadWrite,
    /// Fails with `StoreError::Missing` when there is nothing to read.
    ReadOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub algorithm: String,
    pub fingerprints: usize,
    /// Distinct (fingerprint, text) pairs.
    pub entries: usize,
    /// Texts sharing a fingerprint with another text.
    pub collisions: usize,
    pub occurrences: usize,
    pub functions: usize,
    pub files: usize,
}

pub trait IndexStore: Send {
    /// Name of the fingerprint algorithm every key in this store was made with.
    fn algorithm(&self) -> &str;

    /// The chained bucket for `fingerprint`, ordered by text. Empty when absent.
    fn get(&self, fingerprint: Fingerprint) -> StoreResult<Vec<IndexEntry>>;

    /// Add one occurrence, ignoring exact duplicates.
    fn merge(&mut self, fingerprint: Fingerprint, text: &[u8], occurrence: &Occurrence) -> StoreResult<()>;

    /// Replace everything previously recorded for the file with this
    /// contribution, atomically.
    fn commit_file(&mut self, contribution: &FileContribution) -> StoreResult<()>;

    /// Drop a file's occurrences and its content hash. Returns the number of
    /// occurrences removed.
    fn remove_file(&mut self, path: &str) -> StoreResult<usize>;

    /// Content hash of every committed file, keyed by path.
    fn indexed_files(&self) -> StoreResult<HashMap<String, u64>>;

    /// Every entry ordered by fingerprint, then text.
    fn entries(&self) -> StoreResult<Vec<IndexEntry>>;

    fn stats(&self) -> StoreResult<StoreStats>;

    fn clear(&mut self) -> StoreResult<()>;

    /// Make everything committed so far durable.
    fn flush(&mut self) -> StoreResult<()>;

    fn close(self: Box<Self>) -> StoreResult<()>;
}

/// Open the configured backend at the configured path.
pub fn open_store(config: &IndexerConfig, mode: OpenMode) -> StoreResult<Box<dyn IndexStore>> {
    let store: Box<dyn IndexStore> = match (config.backend, mode) {
        (StoreBackend::Sqlite, OpenMode::ReadWrite) => Box::new(SqliteStore::open(&config.database, config.hash)?),
        (StoreBackend::Sqlite, OpenMode::ReadOnly) => Box::new(SqliteStore::open_read_only(&config.database)?),
        (StoreBackend::Json, OpenMode::ReadWrite) => Box::new(MemoryStore::open(&config.database, config.hash)?),
        (StoreBackend::Json, OpenMode::ReadOnly) => Box::new(MemoryStore::open_read_only(&config.database)?),
    };
    Ok(store)
}

/// Fold rows sorted by (fingerprint, text) into entries.
pub(crate) fn group_rows(rows: impl IntoIterator<Item = (Fingerprint, Vec<u8>, Occurrence)>) -> Vec<IndexEntry> {
    let mut entries: Vec<IndexEntry> = Vec::new();
    for (fingerprint, text, occurrence) in rows {
        match entries.last_mut() {
            Some(last) if last.fingerprint == fingerprint && last.text == text => {
                last.occurrences.insert(occurrence);
            }
            _ => {
                let mut entry = IndexEntry::new(fingerprint, text);
                entry.occurrences.insert(occurrence);
                entries.push(entry);
            }
        }
    }
    entries
}

/// Stats over a full entry list; used where the backend has no cheaper way.
pub(crate) fn stats_from_entries(algorithm: &str, entries: &[IndexEntry], files: usize) -> StoreStats {
    let mut fingerprints = 0;
    let mut functions = std::collections::HashSet::new();
    let mut occurrences = 0;
    let mut previous = None;
    for entry in entries {
        if previous != Some(entry.fingerprint) {
            fingerprints += 1;
            previous = Some(entry.fingerprint);
        }
        occurrences += entry.occurrences.len();
        for occurrence in &entry.occurrences {
            functions.insert((occurrence.file.as_str(), occurrence.function.as_str()));
        }
    }
    StoreStats {
        algorithm: algorithm.to_string(),
        fingerprints,
        entries: entries.len(),
        collisions: entries.len() - fingerprints,
        occurrences,
        functions: functions.len(),
        files,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::HashAlgorithm;

    #[test]
    fn test_group_rows_chains_texts() {
        let rows = vec![
            (Fingerprint(1), b"a".to_vec(), Occurrence::new("x.c", "f", 1)),
            (Fingerprint(1), b"a".to_vec(), Occurrence::new("x.c", "g", 9)),
            (Fingerprint(1), b"b".to_vec(), Occurrence::new("y.c", "h", 2)),
            (Fingerprint(2), b"c".to_vec(), Occurrence::new("y.c", "h", 3)),
        ];
        let entries = group_rows(rows);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].occurrences.len(), 2);

        let stats = stats_from_entries("xxh64", &entries, 2);
        assert_eq!(stats.fingerprints, 2);
        assert_eq!(stats.collisions, 1);
        assert_eq!(stats.occurrences, 4);
        assert_eq!(stats.functions, 3);
    }

    #[test]
    fn test_open_store_read_only_requires_existing_index() {
        let dir = tempfile::tempdir().unwrap();
        for backend in [StoreBackend::Sqlite, StoreBackend::Json] {
            let config = IndexerConfig {
                database: dir.path().join(format!("missing-{:?}", backend)),
                backend,
                ..IndexerConfig::default()
            };
            assert!(matches!(
                open_store(&config, OpenMode::ReadOnly),
                Err(StoreError::Missing(_))
            ));

            let store = open_store(&config, OpenMode::ReadWrite).unwrap();
            assert_eq!(store.algorithm(), HashAlgorithm::Xxh64.name());
            store.close().unwrap();

            let reader = open_store(&config, OpenMode::ReadOnly).unwrap();
            assert_eq!(reader.stats().unwrap().occurrences, 0);
        }
    }
}
