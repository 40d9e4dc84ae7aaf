//! Location join between literals and function scopes.

use crate::fingerprint::Fingerprinter;
use crate::types::{FunctionScope, IndexRecord, Occurrence, Position, StringLiteral, FILE_SCOPE};

/// Scopes of one file ordered by start, larger ranges first on ties, so a
/// reverse scan from the last candidate meets inner scopes before outer ones.
pub struct ScopeIndex<'a> {
    scopes: Vec<&'a FunctionScope>,
}

impl<'a> ScopeIndex<'a> {
    pub fn new(scopes: &'a [FunctionScope]) -> Self {
        let mut scopes: Vec<&FunctionScope> = scopes.iter().collect();
        scopes.sort_by(|a, b| {
            a.span
                .start
                .cmp(&b.span.start)
                .then_with(|| b.span.end.cmp(&a.span.end))
        });
        Self { scopes }
    }

    /// The innermost scope whose inclusive range contains `pos`.
    pub fn innermost(&self, pos: Position) -> Option<&'a FunctionScope> {
        let candidates = self.scopes.partition_point(|scope| scope.span.start <= pos);
        self.scopes[..candidates]
            .iter()
            .rev()
            .find(|scope| scope.span.contains(pos))
            .copied()
    }
}

/// Attribute each literal to its innermost scope (or to file scope) and
/// fingerprint it. The result is sorted and free of duplicate rows; every
/// input literal is represented.
pub fn build_records(
    scopes: &[FunctionScope],
    literals: &[StringLiteral],
    fingerprinter: &dyn Fingerprinter,
) -> Vec<IndexRecord> {
    let index = ScopeIndex::new(scopes);

    let mut records: Vec<IndexRecord> = literals
        .iter()
        .map(|literal| {
            let function = index
                .innermost(literal.span.start)
                .map(|scope| scope.qualified_name.as_str())
                .unwrap_or(FILE_SCOPE);
            IndexRecord {
                fingerprint: fingerprinter.fingerprint(&literal.value),
                text: literal.value.clone(),
                occurrence: Occurrence::new(literal.file.clone(), function, literal.line()),
            }
        })
        .collect();

    records.sort();
    records.dedup();
    records
}
