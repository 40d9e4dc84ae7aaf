use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

/// Top-level error taxonomy for the indexer.
///
/// `Io` and `Parse` are per-file and non-fatal during a build (they end up in
/// the summary); `Store` and `Config` abort the run.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl IndexError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The front end could not be configured for the file's language.
    Language,
    /// Parsing did not finish within the configured timeout.
    Timeout,
    /// The tree contains error or missing nodes and strict mode is on.
    Syntax,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Language => write!(f, "language"),
            Self::Timeout => write!(f, "timeout"),
            Self::Syntax => write!(f, "syntax"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("failed to parse {} ({kind}): {message}", .path.display())]
pub struct ParseError {
    pub path: PathBuf,
    pub kind: ParseErrorKind,
    pub message: String,
}

impl ParseError {
    pub fn new(path: impl Into<PathBuf>, kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed snapshot: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no index found at {}", .0.display())]
    Missing(PathBuf),

    #[error("index at {} is locked by another writer", .0.display())]
    Locked(PathBuf),

    #[error("index was built with fingerprint '{stored}', but '{requested}' was requested")]
    AlgorithmMismatch { stored: String, requested: String },

    #[error("unknown fingerprint algorithm '{0}' recorded in index")]
    UnknownAlgorithm(String),

    #[error("store is read-only")]
    ReadOnly,
}

impl From<rusqlite::Error> for IndexError {
    fn from(e: rusqlite::Error) -> Self {
        IndexError::Store(StoreError::Sqlite(e))
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        IndexError::Store(StoreError::Serialization(e))
    }
}

impl From<config::ConfigError> for IndexError {
    fn from(e: config::ConfigError) -> Self {
        IndexError::Config(e.to_string())
    }
}

impl From<globset::Error> for IndexError {
    fn from(e: globset::Error) -> Self {
        IndexError::Config(format!("bad exclude pattern: {}", e))
    }
}
