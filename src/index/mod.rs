//! Build pipeline: enumerate, parse in parallel, join literals to scopes,
//! commit one file at a time through a single writer.

pub mod assign;
pub mod builder;
pub mod summary;

pub use assign::{build_records, ScopeIndex};
pub use builder::{FileOutcome, Indexer, ProgressEvent};
pub use summary::{BuildSummary, FileFailure};
