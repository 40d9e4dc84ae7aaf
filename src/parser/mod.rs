//! Translation-unit parsing.
//!
//! Front ends lower their concrete syntax trees into [`SyntaxTree`], a small
//! tagged-variant tree that only keeps what the extractors need: scopes that
//! can own literals, the names that qualify them, and the literals themselves.
//! Every node carries a canonical [`Span`] (1-based, inclusive end).

pub mod literal;
pub mod treesitter;

use std::path::{Path, PathBuf};

use crate::error::ParseError;
use crate::types::Span;

pub use treesitter::{Dialect, TreeSitterParser};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    TranslationUnit,
    /// `None` for anonymous namespaces.
    Namespace { name: Option<String> },
    /// Class, struct or union with a body.
    Class { name: Option<String> },
    /// Function definition with a body. The name is as declared and may
    /// already be qualified (`Widget::draw`).
    Function { name: Option<String> },
    Lambda,
    /// A single literal token, decoded.
    StringLiteral { value: Vec<u8> },
    /// Adjacent literal tokens; children are `StringLiteral` pieces and
    /// `Other` for anything in between (e.g. format macros).
    Concatenation,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxNode {
    pub kind: NodeKind,
    pub span: Span,
    pub children: Vec<SyntaxNode>,
}

impl SyntaxNode {
    pub fn new(kind: NodeKind, span: Span) -> Self {
        Self {
            kind,
            span,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<SyntaxNode>) -> Self {
        self.children = children;
        self
    }

    pub fn span(&self) -> Span {
        self.span
    }

    /// Pre-order visit of this node and its descendants.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a SyntaxNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// One parsed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxTree {
    pub path: PathBuf,
    pub root: SyntaxNode,
    /// Syntax errors the front end recovered from (empty for clean files).
    pub diagnostics: Vec<String>,
}

impl SyntaxTree {
    /// Key used for this file in scopes, literals and the store.
    pub fn file_key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// The seam to the external C/C++ front end.
pub trait SourceParser: Send + Sync {
    fn parse(&self, path: &Path, source: &[u8]) -> Result<SyntaxTree, ParseError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;

    #[test]
    fn test_walk_is_preorder() {
        let span = Span::new(Position::new(1, 1), Position::new(1, 1));
        let tree = SyntaxNode::new(NodeKind::TranslationUnit, span).with_children(vec![
            SyntaxNode::new(NodeKind::Function { name: Some("f".into()) }, span)
                .with_children(vec![SyntaxNode::new(NodeKind::Lambda, span)]),
            SyntaxNode::new(NodeKind::Other, span),
        ]);

        let mut kinds = Vec::new();
        tree.walk(&mut |node| kinds.push(node.kind.clone()));
        assert_eq!(
            kinds,
            vec![
                NodeKind::TranslationUnit,
                NodeKind::Function { name: Some("f".into()) },
                NodeKind::Lambda,
                NodeKind::Other,
            ]
        );
    }
}
