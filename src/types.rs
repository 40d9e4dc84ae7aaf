use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use crate::fingerprint::Fingerprint;

/// Function name recorded for literals that sit outside every function body.
pub const FILE_SCOPE: &str = "<file scope>";

/// A 1-based source position. Columns count bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Source range with an inclusive end: `end` is the position of the last byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        debug_assert!(start <= end, "span end {} precedes start {}", end, start);
        Self { start, end }
    }

    pub fn lines(start: u32, end: u32) -> Self {
        Self::new(Position::new(start, 1), Position::new(end, u32::MAX))
    }

    pub fn contains(&self, pos: Position) -> bool {
        self.start <= pos && pos <= self.end
    }

    pub fn line_count(&self) -> u32 {
        self.end.line - self.start.line + 1
    }
}

/// A candidate file found by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub size: u64,
}

impl SourceFile {
    /// Key under which the file's contributions are stored.
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Function,
    Method,
    Lambda,
    Anonymous,
}

/// One function definition found in a translation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionScope {
    pub name: String,
    pub qualified_name: String,
    pub kind: ScopeKind,
    pub file: String,
    pub span: Span,
}

impl FunctionScope {
    pub fn start_line(&self) -> u32 {
        self.span.start.line
    }

    pub fn end_line(&self) -> u32 {
        self.span.end.line
    }
}

/// One string literal (or one joined run of adjacent literals).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringLiteral {
    /// Decoded bytes, escape sequences resolved.
    pub value: Vec<u8>,
    pub file: String,
    pub span: Span,
    /// Document-order index of the structurally enclosing scope, as produced
    /// by the scope extractor under the same options.
    pub enclosing_scope: Option<usize>,
}

impl StringLiteral {
    pub fn line(&self) -> u32 {
        self.span.start.line
    }

    pub fn display_text(&self) -> String {
        display_bytes(&self.value)
    }
}

/// One concrete place where a string occurs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Occurrence {
    pub file: String,
    pub function: String,
    pub line: u32,
}

impl Occurrence {
    pub fn new(file: impl Into<String>, function: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            function: function.into(),
            line,
        }
    }

    pub fn is_file_scope(&self) -> bool {
        self.function == FILE_SCOPE
    }
}

impl fmt::Display for Occurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.file, self.line, self.function)
    }
}

/// A persisted bucket member: one distinct text and where it occurs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub fingerprint: Fingerprint,
    pub text: Vec<u8>,
    pub occurrences: BTreeSet<Occurrence>,
}

impl IndexEntry {
    pub fn new(fingerprint: Fingerprint, text: Vec<u8>) -> Self {
        Self {
            fingerprint,
            text,
            occurrences: BTreeSet::new(),
        }
    }

    pub fn display_text(&self) -> String {
        display_bytes(&self.text)
    }
}

/// A single (fingerprint, text, occurrence) row produced by the join step.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexRecord {
    pub fingerprint: Fingerprint,
    pub text: Vec<u8>,
    pub occurrence: Occurrence,
}

/// Everything one file contributes to the index in one run; committed atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContribution {
    pub path: String,
    pub content_hash: u64,
    pub size: u64,
    pub records: Vec<IndexRecord>,
}

/// Render literal bytes for terminals: valid UTF-8 passes through, control
/// characters and invalid bytes are escaped C-style.
pub fn display_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        for c in chunk.valid().chars() {
            match c {
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '\r' => out.push_str("\\r"),
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
                c => out.push(c),
            }
        }
        for b in chunk.invalid() {
            out.push_str(&format!("\\x{:02x}", b));
        }
    }
    out
}
