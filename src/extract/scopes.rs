use crate::parser::{NodeKind, SyntaxNode, SyntaxTree};
use crate::types::{FunctionScope, ScopeKind};

use super::ExtractOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Namespace,
    Class,
    Function,
}

/// A named enclosing construct contributing to qualified names.
#[derive(Debug, Clone)]
struct Frame {
    name: String,
    kind: FrameKind,
}

struct ScopeWalker<'a> {
    file: &'a str,
    options: &'a ExtractOptions,
    frames: Vec<Frame>,
    scopes: Vec<FunctionScope>,
}

/// Every function definition (and, optionally, lambda) in document order.
///
/// The position of a scope in the returned vector is the index literal
/// collection records as `enclosing_scope`.
pub fn extract_scopes(tree: &SyntaxTree, options: &ExtractOptions) -> Vec<FunctionScope> {
    let file = tree.file_key();
    let mut walker = ScopeWalker {
        file: &file,
        options,
        frames: Vec::new(),
        scopes: Vec::new(),
    };
    walker.visit_children(&tree.root);
    walker.scopes
}

impl ScopeWalker<'_> {
    fn visit_children(&mut self, node: &SyntaxNode) {
        for child in &node.children {
            self.visit(child);
        }
    }

    fn visit(&mut self, node: &SyntaxNode) {
        match &node.kind {
            // Anonymous namespaces and classes add no name component.
            NodeKind::Namespace { name } => self.nested(node, name.as_deref(), FrameKind::Namespace),
            NodeKind::Class { name } => self.nested(node, name.as_deref(), FrameKind::Class),
            NodeKind::Function { name } => {
                let line = node.span.start.line;
                let (name, kind) = match name {
                    Some(name) => {
                        let in_class = self.frames.last().map(|f| f.kind) == Some(FrameKind::Class);
                        let kind = if in_class || name.contains("::") {
                            ScopeKind::Method
                        } else {
                            ScopeKind::Function
                        };
                        (name.clone(), kind)
                    }
                    None => (format!("<anonymous@{}:{}>", self.file, line), ScopeKind::Anonymous),
                };
                self.push_scope(node, name, kind);
            }
            NodeKind::Lambda if self.options.include_lambdas => {
                let name = format!("<lambda@{}:{}>", self.file, node.span.start.line);
                self.push_scope(node, name, ScopeKind::Lambda);
            }
            _ => self.visit_children(node),
        }
    }

    fn nested(&mut self, node: &SyntaxNode, name: Option<&str>, kind: FrameKind) {
        match name {
            Some(name) => {
                self.frames.push(Frame {
                    name: name.to_string(),
                    kind,
                });
                self.visit_children(node);
                self.frames.pop();
            }
            None => self.visit_children(node),
        }
    }

    fn push_scope(&mut self, node: &SyntaxNode, name: String, kind: ScopeKind) {
        let qualified_name = self
            .frames
            .iter()
            .map(|frame| frame.name.as_str())
            .chain(std::iter::once(name.as_str()))
            .collect::<Vec<_>>()
            .join("::");

        self.scopes.push(FunctionScope {
            name: name.clone(),
            qualified_name,
            kind,
            file: self.file.to_string(),
            span: node.span,
        });

        self.frames.push(Frame {
            name,
            kind: FrameKind::Function,
        });
        self.visit_children(node);
        self.frames.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::test_support::*;
    use crate::parser::{SourceParser, TreeSitterParser};
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn test_scopes_in_document_order() {
        let tree = tree(
            "/src/a.c",
            vec![
                function("foo", span(1, 1, 5, 1), vec![literal("hello", span(3, 10, 3, 16))]),
                function("bar", span(6, 1, 10, 1), vec![literal("hello", span(8, 10, 8, 16))]),
            ],
        );

        let scopes = extract_scopes(&tree, &ExtractOptions::default());
        assert_eq!(scopes.len(), 2);
        assert_eq!(scopes[0].name, "foo");
        assert_eq!(scopes[0].kind, ScopeKind::Function);
        assert_eq!((scopes[0].start_line(), scopes[0].end_line()), (1, 5));
        assert_eq!(scopes[1].qualified_name, "bar");
        assert_eq!(scopes[1].file, "/src/a.c");
    }

    #[test]
    fn test_anonymous_functions_get_placeholders() {
        let unnamed = SyntaxNode::new(NodeKind::Function { name: None }, span(4, 1, 6, 1));
        let tree = tree("/src/gen.c", vec![unnamed]);

        let scopes = extract_scopes(&tree, &ExtractOptions::default());
        assert_eq!(scopes[0].name, "<anonymous@/src/gen.c:4>");
        assert_eq!(scopes[0].kind, ScopeKind::Anonymous);
    }

    #[test]
    fn test_qualified_names_from_cpp_source() {
        let source = r#"namespace net {
namespace {
int helper() { return 1; }
}
class Socket {
public:
    void open() { auto cb = []() { return "cb"; }; }
};
void Socket::close() {}
}
"#;
        let tree = TreeSitterParser::new(Duration::from_secs(5), false)
            .parse(Path::new("/src/socket.cpp"), source.as_bytes())
            .unwrap();

        let scopes = extract_scopes(&tree, &ExtractOptions::default());
        let names: Vec<_> = scopes.iter().map(|s| (s.qualified_name.as_str(), s.kind)).collect();
        assert_eq!(
            names,
            vec![
                ("net::helper", ScopeKind::Function),
                ("net::Socket::open", ScopeKind::Method),
                ("net::Socket::close", ScopeKind::Method),
            ]
        );

        let with_lambdas = extract_scopes(&tree, &ExtractOptions::default().with_lambdas(true));
        assert_eq!(with_lambdas.len(), 4);
        assert_eq!(with_lambdas[2].kind, ScopeKind::Lambda);
        assert_eq!(with_lambdas[2].name, "<lambda@/src/socket.cpp:7>");
        assert_eq!(
            with_lambdas[2].qualified_name,
            "net::Socket::open::<lambda@/src/socket.cpp:7>"
        );
    }
}
