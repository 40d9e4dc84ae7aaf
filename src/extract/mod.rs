//! Per-file extraction over a [`SyntaxTree`](crate::parser::SyntaxTree):
//! function scopes on one side, string literals on the other.

pub mod literals;
pub mod scopes;

use crate::config::{ConcatPolicy, IndexerConfig};
use crate::parser::NodeKind;

pub use literals::collect_literals;
pub use scopes::extract_scopes;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Treat lambdas with a body as scopes of their own.
    pub include_lambdas: bool,
    pub concatenation: ConcatPolicy,
}

impl ExtractOptions {
    pub fn from_config(config: &IndexerConfig) -> Self {
        Self {
            include_lambdas: config.include_lambdas,
            concatenation: config.concatenation,
        }
    }

    pub fn with_lambdas(mut self, include_lambdas: bool) -> Self {
        self.include_lambdas = include_lambdas;
        self
    }

    pub fn with_concatenation(mut self, concatenation: ConcatPolicy) -> Self {
        self.concatenation = concatenation;
        self
    }

    /// Whether a node of this kind opens a scope under these options.
    pub(crate) fn opens_scope(&self, kind: &NodeKind) -> bool {
        match kind {
            NodeKind::Function { .. } => true,
            NodeKind::Lambda => self.include_lambdas,
            _ => false,
        }
    }
}
