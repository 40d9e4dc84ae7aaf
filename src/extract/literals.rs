use crate::config::ConcatPolicy;
use crate::parser::{NodeKind, SyntaxNode, SyntaxTree};
use crate::types::{Span, StringLiteral};

use super::ExtractOptions;

struct LiteralWalker<'a> {
    file: &'a str,
    options: &'a ExtractOptions,
    next_scope: usize,
    open_scopes: Vec<usize>,
    literals: Vec<StringLiteral>,
}

/// Every string literal in document order.
///
/// Under [`ConcatPolicy::Join`] each run of adjacent literal tokens becomes
/// one literal located at its first token; a non-literal piece between
/// tokens (a format macro, say) ends the run.
pub fn collect_literals(tree: &SyntaxTree, options: &ExtractOptions) -> Vec<StringLiteral> {
    let file = tree.file_key();
    let mut walker = LiteralWalker {
        file: &file,
        options,
        next_scope: 0,
        open_scopes: Vec::new(),
        literals: Vec::new(),
    };
    walker.visit(&tree.root);
    walker.literals
}

impl LiteralWalker<'_> {
    fn visit(&mut self, node: &SyntaxNode) {
        match &node.kind {
            NodeKind::StringLiteral { value } => self.emit(value.clone(), node.span),
            NodeKind::Concatenation => self.concatenation(node),
            kind if self.options.opens_scope(kind) => {
                // Same pre-order numbering as the scope extractor.
                let index = self.next_scope;
                self.next_scope += 1;
                self.open_scopes.push(index);
                for child in &node.children {
                    self.visit(child);
                }
                self.open_scopes.pop();
            }
            _ => {
                for child in &node.children {
                    self.visit(child);
                }
            }
        }
    }

    fn concatenation(&mut self, node: &SyntaxNode) {
        if self.options.concatenation == ConcatPolicy::Separate {
            for piece in &node.children {
                if let NodeKind::StringLiteral { value } = &piece.kind {
                    self.emit(value.clone(), piece.span);
                }
            }
            return;
        }

        let mut run: Option<(Vec<u8>, Span)> = None;
        for piece in &node.children {
            match &piece.kind {
                NodeKind::StringLiteral { value } => match run.as_mut() {
                    Some((joined, span)) => {
                        joined.extend_from_slice(value);
                        span.end = piece.span.end;
                    }
                    None => run = Some((value.clone(), piece.span)),
                },
                _ => {
                    if let Some((joined, span)) = run.take() {
                        self.emit(joined, span);
                    }
                }
            }
        }
        if let Some((joined, span)) = run {
            self.emit(joined, span);
        }
    }

    fn emit(&mut self, value: Vec<u8>, span: Span) {
        self.literals.push(StringLiteral {
            value,
            file: self.file.to_string(),
            span,
            enclosing_scope: self.open_scopes.last().copied(),
        });
    }
}
