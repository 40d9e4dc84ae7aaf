use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{stats_from_entries, IndexStore, StoreResult, StoreStats};
use crate::error::StoreError;
use crate::fingerprint::{Fingerprint, HashAlgorithm};
use crate::types::{FileContribution, IndexEntry, Occurrence};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub content_hash: u64,
    pub size: u64,
    pub indexed_at: DateTime<Utc>,
}

/// On-disk form of a [`MemoryStore`].
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    algorithm: String,
    saved_at: DateTime<Utc>,
    files: Vec<FileRecord>,
    entries: Vec<IndexEntry>,
}

/// Exclusive writer lock, released on drop.
#[derive(Debug)]
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(store: &Path) -> StoreResult<Self> {
        let path = sibling(store, ".lock");
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::AlreadyExists => StoreError::Locked(store.to_path_buf()),
                _ => StoreError::Io {
                    path: path.clone(),
                    source,
                },
            })?;
        // The pid is informational only.
        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self { path })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove lock {}: {}", self.path.display(), e);
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// In-memory index with fast per-fingerprint and per-file lookups,
/// optionally snapshotted to a JSON file on flush.
#[derive(Debug)]
pub struct MemoryStore {
    buckets: HashMap<Fingerprint, Vec<IndexEntry>>,
    files: HashMap<String, FileRecord>,
    // path -> fingerprints with at least one occurrence in that file
    file_index: HashMap<String, HashSet<Fingerprint>>,
    algorithm: String,
    snapshot: Option<PathBuf>,
    lock: Option<LockFile>,
    read_only: bool,
    dirty: bool,
}

impl MemoryStore {
    /// A store that lives only as long as the value.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            buckets: HashMap::new(),
            files: HashMap::new(),
            file_index: HashMap::new(),
            algorithm: algorithm.name().to_string(),
            snapshot: None,
            lock: None,
            read_only: false,
            dirty: false,
        }
    }

    /// Open or create a snapshot-backed store. Holds the writer lock until closed.
    pub fn open(path: impl AsRef<Path>, algorithm: HashAlgorithm) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let lock = LockFile::acquire(path)?;

        let mut store = if path.exists() {
            let store = Self::load(path)?;
            if store.algorithm != algorithm.name() {
                return Err(StoreError::AlgorithmMismatch {
                    stored: store.algorithm,
                    requested: algorithm.name().to_string(),
                });
            }
            store
        } else {
            info!("Creating index snapshot {} ({})", path.display(), algorithm.name());
            let mut store = Self::new(algorithm);
            store.dirty = true;
            store
        };

        store.snapshot = Some(path.to_path_buf());
        store.lock = Some(lock);
        Ok(store)
    }

    /// Load the last flushed snapshot without taking the writer lock.
    pub fn open_read_only(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::Missing(path.to_path_buf()));
        }
        let mut store = Self::load(path)?;
        store.read_only = true;
        Ok(store)
    }

    fn load(path: &Path) -> StoreResult<Self> {
        let file = File::open(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))?;
        let algorithm = HashAlgorithm::from_name(&snapshot.algorithm)
            .ok_or_else(|| StoreError::UnknownAlgorithm(snapshot.algorithm.clone()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            warn!(
                "Snapshot {} has version {}, expected {}",
                path.display(),
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }

        let mut store = Self::new(algorithm);
        for entry in snapshot.entries {
            for occurrence in &entry.occurrences {
                store.insert(entry.fingerprint, &entry.text, occurrence);
            }
        }
        for record in snapshot.files {
            store.files.insert(record.path.clone(), record);
        }
        debug!(
            "Loaded {} fingerprints and {} files from {}",
            store.buckets.len(),
            store.files.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn fingerprint_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty() && self.files.is_empty()
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        if self.read_only {
            Err(StoreError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn insert(&mut self, fingerprint: Fingerprint, text: &[u8], occurrence: &Occurrence) {
        let bucket = self.buckets.entry(fingerprint).or_default();
        // Buckets stay ordered by text.
        let position = match bucket.binary_search_by(|entry| entry.text.as_slice().cmp(text)) {
            Ok(position) => position,
            Err(position) => {
                bucket.insert(position, IndexEntry::new(fingerprint, text.to_vec()));
                position
            }
        };
        bucket[position].occurrences.insert(occurrence.clone());

        self.file_index
            .entry(occurrence.file.clone())
            .or_default()
            .insert(fingerprint);
        self.dirty = true;
    }

    fn remove_occurrences(&mut self, path: &str) -> usize {
        let Some(fingerprints) = self.file_index.remove(path) else {
            return 0;
        };

        let mut removed = 0;
        for fingerprint in fingerprints {
            if let Some(bucket) = self.buckets.get_mut(&fingerprint) {
                for entry in bucket.iter_mut() {
                    let before = entry.occurrences.len();
                    entry.occurrences.retain(|o| o.file != path);
                    removed += before - entry.occurrences.len();
                }
                bucket.retain(|entry| !entry.occurrences.is_empty());
                if bucket.is_empty() {
                    self.buckets.remove(&fingerprint);
                }
            }
        }
        self.dirty = true;
        removed
    }

    fn sorted_entries(&self) -> Vec<IndexEntry> {
        let mut fingerprints: Vec<&Fingerprint> = self.buckets.keys().collect();
        fingerprints.sort();
        fingerprints
            .into_iter()
            .flat_map(|fp| self.buckets[fp].iter().cloned())
            .collect()
    }

    fn write_snapshot(&self, path: &Path) -> StoreResult<()> {
        let mut files: Vec<FileRecord> = self.files.values().cloned().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            algorithm: self.algorithm.clone(),
            saved_at: Utc::now(),
            files,
            entries: self.sorted_entries(),
        };

        // Write beside the target and rename, so readers never see a torn file.
        let tmp = sibling(path, ".tmp");
        let io_err = |source| StoreError::Io {
            path: tmp.clone(),
            source,
        };
        let file = File::create(&tmp).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &snapshot)?;
        writer.flush().map_err(io_err)?;
        drop(writer);
        fs::rename(&tmp, path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

impl IndexStore for MemoryStore {
    fn algorithm(&self) -> &str {
        &self.algorithm
    }

    fn get(&self, fingerprint: Fingerprint) -> StoreResult<Vec<IndexEntry>> {
        Ok(self.buckets.get(&fingerprint).cloned().unwrap_or_default())
    }

    fn merge(&mut self, fingerprint: Fingerprint, text: &[u8], occurrence: &Occurrence) -> StoreResult<()> {
        self.ensure_writable()?;
        self.insert(fingerprint, text, occurrence);
        Ok(())
    }

    fn commit_file(&mut self, contribution: &FileContribution) -> StoreResult<()> {
        self.ensure_writable()?;
        self.remove_occurrences(&contribution.path);
        for record in &contribution.records {
            self.insert(record.fingerprint, &record.text, &record.occurrence);
        }
        self.files.insert(
            contribution.path.clone(),
            FileRecord {
                path: contribution.path.clone(),
                content_hash: contribution.content_hash,
                size: contribution.size,
                indexed_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> StoreResult<usize> {
        self.ensure_writable()?;
        self.files.remove(path);
        Ok(self.remove_occurrences(path))
    }

    fn indexed_files(&self) -> StoreResult<HashMap<String, u64>> {
        Ok(self
            .files
            .iter()
            .map(|(path, record)| (path.clone(), record.content_hash))
            .collect())
    }

    fn entries(&self) -> StoreResult<Vec<IndexEntry>> {
        Ok(self.sorted_entries())
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        Ok(stats_from_entries(&self.algorithm, &self.sorted_entries(), self.files.len()))
    }

    fn clear(&mut self) -> StoreResult<()> {
        self.ensure_writable()?;
        self.buckets.clear();
        self.files.clear();
        self.file_index.clear();
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        if self.read_only || !self.dirty {
            return Ok(());
        }
        if let Some(path) = self.snapshot.clone() {
            self.write_snapshot(&path)?;
            debug!("Saved snapshot {}", path.display());
        }
        self.dirty = false;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> StoreResult<()> {
        self.flush()?;
        self.lock.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IndexRecord;

    fn create_test_contribution(path: &str, records: &[(u64, &str, &str, u32)]) -> FileContribution {
        FileContribution {
            path: path.to_string(),
            content_hash: records.len() as u64,
            size: 10,
            records: records
                .iter()
                .map(|(fp, text, function, line)| IndexRecord {
                    fingerprint: Fingerprint(*fp),
                    text: text.as_bytes().to_vec(),
                    occurrence: Occurrence::new(path, *function, *line),
                })
                .collect(),
        }
    }

    #[test]
    fn test_memory_store_creation() {
        let store = MemoryStore::new(HashAlgorithm::Xxh64);
        assert!(store.is_empty());
        assert_eq!(store.algorithm(), "xxh64");
        assert_eq!(store.stats().unwrap().entries, 0);
    }

    #[test]
    fn test_commit_and_recommit_file() {
        let mut store = MemoryStore::new(HashAlgorithm::Xxh64);
        store
            .commit_file(&create_test_contribution("a.c", &[(7, "hello", "foo", 3), (7, "hello", "bar", 8)]))
            .unwrap();
        assert_eq!(store.get(Fingerprint(7)).unwrap()[0].occurrences.len(), 2);

        store
            .commit_file(&create_test_contribution("a.c", &[(7, "hello", "foo", 3)]))
            .unwrap();
        let bucket = store.get(Fingerprint(7)).unwrap();
        assert_eq!(bucket[0].occurrences.len(), 1);
        assert_eq!(store.indexed_files().unwrap()["a.c"], 1);
    }

    #[test]
    fn test_remove_file_drops_empty_buckets() {
        let mut store = MemoryStore::new(HashAlgorithm::Xxh64);
        store
            .commit_file(&create_test_contribution("a.c", &[(1, "x", "f", 1), (2, "y", "f", 2)]))
            .unwrap();
        store
            .commit_file(&create_test_contribution("b.c", &[(1, "x", "g", 5)]))
            .unwrap();

        assert_eq!(store.remove_file("a.c").unwrap(), 2);
        assert_eq!(store.fingerprint_count(), 1);
        assert!(store.get(Fingerprint(2)).unwrap().is_empty());
        assert_eq!(store.remove_file("a.c").unwrap(), 0);
    }

    #[test]
    fn test_collision_chain_is_ordered_by_text() {
        let mut store = MemoryStore::new(HashAlgorithm::Xxh64);
        store
            .commit_file(&create_test_contribution("a.c", &[(5, "zeta", "f", 1), (5, "alpha", "g", 2)]))
            .unwrap();

        let bucket = store.get(Fingerprint(5)).unwrap();
        let texts: Vec<_> = bucket.iter().map(|e| e.display_text()).collect();
        assert_eq!(texts, vec!["alpha", "zeta"]);
        assert_eq!(store.stats().unwrap().collisions, 1);
    }

    #[test]
    fn test_snapshot_roundtrip_and_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let mut store = MemoryStore::open(&path, HashAlgorithm::Xxh64).unwrap();
        assert!(matches!(
            MemoryStore::open(&path, HashAlgorithm::Xxh64),
            Err(StoreError::Locked(_))
        ));

        store
            .commit_file(&create_test_contribution("a.c", &[(3, "boot ok", "init", 12)]))
            .unwrap();
        store.flush().unwrap();

        let reader = MemoryStore::open_read_only(&path).unwrap();
        assert_eq!(reader.get(Fingerprint(3)).unwrap()[0].display_text(), "boot ok");
        assert_eq!(reader.indexed_files().unwrap().len(), 1);

        Box::new(store).close().unwrap();
        assert!(!sibling(&path, ".lock").exists());

        assert!(matches!(
            MemoryStore::open(&path, HashAlgorithm::Xxh3),
            Err(StoreError::AlgorithmMismatch { .. })
        ));
    }

    #[test]
    fn test_read_only_store_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        Box::new(MemoryStore::open(&path, HashAlgorithm::Xxh64).unwrap())
            .close()
            .unwrap();

        let mut reader = MemoryStore::open_read_only(&path).unwrap();
        assert!(matches!(
            reader.merge(Fingerprint(1), b"x", &Occurrence::new("a.c", "f", 1)),
            Err(StoreError::ReadOnly)
        ));
    }
}
