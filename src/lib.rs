pub mod cli;
pub mod cli_types;
pub mod config;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod index;
pub mod parser;
pub mod query;
pub mod scanner;
pub mod storage;
pub mod types;
pub mod ui;

// Re-export commonly used types
pub use types::*;
pub use cli::CliApp;
pub use config::{ConcatPolicy, IndexerConfig, StoreBackend};
pub use error::{IndexError, ParseError, ParseErrorKind, Result, StoreError};
pub use extract::{collect_literals, extract_scopes, ExtractOptions};
pub use fingerprint::{Fingerprint, Fingerprinter, HashAlgorithm};
pub use index::{BuildSummary, FileFailure, Indexer, ProgressEvent};
pub use parser::{SourceParser, SyntaxNode, SyntaxTree, TreeSitterParser};
pub use query::QueryEngine;
pub use scanner::SourceEnumerator;
pub use storage::{open_store, IndexStore, MemoryStore, OpenMode, SqliteStore, StoreStats};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
