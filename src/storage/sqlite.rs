use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::{group_rows, IndexStore, StoreResult, StoreStats};
use crate::error::StoreError;
use crate::fingerprint::{Fingerprint, HashAlgorithm};
use crate::types::{FileContribution, IndexEntry, Occurrence};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);
const ALGORITHM_KEY: &str = "fingerprint_algorithm";
const SCHEMA_VERSION: &str = "1";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS literals (
        fingerprint INTEGER NOT NULL,
        text        BLOB    NOT NULL,
        file        TEXT    NOT NULL,
        function    TEXT    NOT NULL,
        line        INTEGER NOT NULL,
        PRIMARY KEY (fingerprint, text, file, function, line)
    ) WITHOUT ROWID;
    CREATE INDEX IF NOT EXISTS literals_by_file ON literals (file);
    CREATE TABLE IF NOT EXISTS files (
        path         TEXT PRIMARY KEY,
        content_hash INTEGER NOT NULL,
        size         INTEGER NOT NULL,
        indexed_at   TEXT    NOT NULL
    );
    CREATE TABLE IF NOT EXISTS meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

/// SQLite-backed index. WAL mode lets read-only handles query a consistent
/// snapshot while a build is committing.
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
    algorithm: String,
    read_only: bool,
}

impl SqliteStore {
    /// Open or create a writable store keyed with `algorithm`.
    pub fn open(path: impl AsRef<Path>, algorithm: HashAlgorithm) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        let journal: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Opened {} with journal_mode={}", path.display(), journal);
        Self::initialize(conn, path.to_path_buf(), algorithm)
    }

    /// A private in-memory database, mostly for tests.
    pub fn open_in_memory(algorithm: HashAlgorithm) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, PathBuf::from(":memory:"), algorithm)
    }

    pub fn open_read_only(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::Missing(path.to_path_buf()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // A database without the meta table was never initialised as an index.
        let has_meta: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'meta')",
            [],
            |row| row.get(0),
        )?;
        let stored = match has_meta {
            true => read_meta(&conn, ALGORITHM_KEY)?,
            false => None,
        };
        let stored = stored.ok_or_else(|| StoreError::Missing(path.to_path_buf()))?;
        if HashAlgorithm::from_name(&stored).is_none() {
            return Err(StoreError::UnknownAlgorithm(stored));
        }

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            algorithm: stored,
            read_only: true,
        })
    }

    fn initialize(conn: Connection, path: PathBuf, algorithm: HashAlgorithm) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;

        match read_meta(&conn, ALGORITHM_KEY)? {
            Some(stored) if stored != algorithm.name() => {
                return Err(StoreError::AlgorithmMismatch {
                    stored,
                    requested: algorithm.name().to_string(),
                });
            }
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES (?1, ?2), ('schema_version', ?3)",
                    params![ALGORITHM_KEY, algorithm.name(), SCHEMA_VERSION],
                )?;
                info!("Created index {} ({})", path.display(), algorithm.name());
            }
        }

        Ok(Self {
            conn,
            path,
            algorithm: algorithm.name().to_string(),
            read_only: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        if self.read_only {
            Err(StoreError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn count(&self, sql: &str) -> StoreResult<usize> {
        let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn read_meta(conn: &Connection, key: &str) -> StoreResult<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
        .optional()?)
}

fn occurrence_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Fingerprint, Vec<u8>, Occurrence)> {
    Ok((
        Fingerprint::from_sql(row.get(0)?),
        row.get(1)?,
        Occurrence::new(row.get::<_, String>(2)?, row.get::<_, String>(3)?, row.get(4)?),
    ))
}

impl IndexStore for SqliteStore {
    fn algorithm(&self) -> &str {
        &self.algorithm
    }

    fn get(&self, fingerprint: Fingerprint) -> StoreResult<Vec<IndexEntry>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT fingerprint, text, file, function, line FROM literals
             WHERE fingerprint = ?1 ORDER BY text, file, function, line",
        )?;
        let rows = stmt
            .query_map(params![fingerprint.to_sql()], occurrence_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(group_rows(rows))
    }

    fn merge(&mut self, fingerprint: Fingerprint, text: &[u8], occurrence: &Occurrence) -> StoreResult<()> {
        self.ensure_writable()?;
        self.conn.execute(
            "INSERT OR IGNORE INTO literals (fingerprint, text, file, function, line) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![fingerprint.to_sql(), text, occurrence.file, occurrence.function, occurrence.line],
        )?;
        Ok(())
    }

    fn commit_file(&mut self, contribution: &FileContribution) -> StoreResult<()> {
        self.ensure_writable()?;
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute("DELETE FROM literals WHERE file = ?1", params![contribution.path])?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT OR IGNORE INTO literals (fingerprint, text, file, function, line) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for record in &contribution.records {
                insert.execute(params![
                    record.fingerprint.to_sql(),
                    record.text,
                    record.occurrence.file,
                    record.occurrence.function,
                    record.occurrence.line,
                ])?;
            }
        }
        tx.execute(
            "INSERT INTO files (path, content_hash, size, indexed_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                content_hash = excluded.content_hash,
                size = excluded.size,
                indexed_at = excluded.indexed_at",
            params![
                contribution.path,
                contribution.content_hash as i64,
                contribution.size as i64,
                Utc::now()
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> StoreResult<usize> {
        self.ensure_writable()?;
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = tx.execute("DELETE FROM literals WHERE file = ?1", params![path])?;
        tx.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        tx.commit()?;
        Ok(removed)
    }

    fn indexed_files(&self) -> StoreResult<HashMap<String, u64>> {
        let mut stmt = self.conn.prepare_cached("SELECT path, content_hash FROM files")?;
        let files = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(files)
    }

    fn entries(&self) -> StoreResult<Vec<IndexEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT fingerprint, text, file, function, line FROM literals
             ORDER BY fingerprint, text, file, function, line",
        )?;
        let rows = stmt
            .query_map([], occurrence_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // SQLite orders fingerprints as signed integers.
        let mut entries = group_rows(rows);
        entries.sort_by(|a, b| (a.fingerprint, &a.text).cmp(&(b.fingerprint, &b.text)));
        Ok(entries)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let fingerprints = self.count("SELECT COUNT(DISTINCT fingerprint) FROM literals")?;
        let entries = self.count("SELECT COUNT(*) FROM (SELECT DISTINCT fingerprint, text FROM literals)")?;
        Ok(StoreStats {
            algorithm: self.algorithm.clone(),
            fingerprints,
            entries,
            collisions: entries - fingerprints,
            occurrences: self.count("SELECT COUNT(*) FROM literals")?,
            functions: self.count("SELECT COUNT(*) FROM (SELECT DISTINCT file, function FROM literals)")?,
            files: self.count("SELECT COUNT(*) FROM files")?,
        })
    }

    fn clear(&mut self) -> StoreResult<()> {
        self.ensure_writable()?;
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM literals", [])?;
        tx.execute("DELETE FROM files", [])?;
        tx.commit()?;
        info!("Cleared index {}", self.path.display());
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        if self.read_only {
            return Ok(());
        }
        // Every commit is already durable; fold the WAL back into the main file.
        self.conn
            .query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))?;
        debug!("Checkpointed {}", self.path.display());
        Ok(())
    }

    fn close(mut self: Box<Self>) -> StoreResult<()> {
        self.flush()?;
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }
}
