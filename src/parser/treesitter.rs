//! tree-sitter front end for C and C++.

use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;
use tree_sitter::{Language, Node, Parser, Point, Tree};

use super::literal::decode_literal;
use super::{NodeKind, SourceParser, SyntaxNode, SyntaxTree};
use crate::config::IndexerConfig;
use crate::error::{ParseError, ParseErrorKind};
use crate::types::{Position, Span};

const MAX_DIAGNOSTICS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    C,
    Cpp,
}

impl Dialect {
    /// `.c` and `.h` start with the C grammar; every other extension is C++.
    pub fn for_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("c") | Some("h") => Dialect::C,
            _ => Dialect::Cpp,
        }
    }

    /// Grammar to retry with when the first parse has errors. `.h` headers
    /// are shared between C and C++.
    pub fn fallback_for(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("h"))
            .then_some(Dialect::Cpp)
    }

    fn language(self) -> Language {
        match self {
            Dialect::C => tree_sitter_c::LANGUAGE.into(),
            Dialect::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TreeSitterParser {
    timeout: Duration,
    strict: bool,
}

impl TreeSitterParser {
    pub fn new(timeout: Duration, strict: bool) -> Self {
        Self { timeout, strict }
    }

    pub fn from_config(config: &IndexerConfig) -> Self {
        Self::new(config.parse_timeout(), config.strict_syntax)
    }

    fn parse_as(&self, dialect: Dialect, path: &Path, source: &[u8]) -> Result<Tree, ParseError> {
        let mut parser = Parser::new();
        parser
            .set_language(&dialect.language())
            .map_err(|e| ParseError::new(path, ParseErrorKind::Language, e.to_string()))?;
        parser.set_timeout_micros(u64::try_from(self.timeout.as_micros()).unwrap_or(u64::MAX));

        let started = Instant::now();
        parser.parse(source, None).ok_or_else(|| {
            ParseError::new(
                path,
                ParseErrorKind::Timeout,
                format!("no syntax tree after {:?} (limit {:?})", started.elapsed(), self.timeout),
            )
        })
    }
}

impl SourceParser for TreeSitterParser {
    fn parse(&self, path: &Path, source: &[u8]) -> Result<SyntaxTree, ParseError> {
        let mut tree = self.parse_as(Dialect::for_path(path), path, source)?;
        if tree.root_node().has_error() {
            if let Some(dialect) = Dialect::fallback_for(path) {
                let retry = self.parse_as(dialect, path, source)?;
                if !retry.root_node().has_error() {
                    debug!("{}: parsed as {:?}", path.display(), dialect);
                    tree = retry;
                }
            }
        }

        let root = tree.root_node();
        let mut diagnostics = Vec::new();
        if root.has_error() {
            collect_diagnostics(root, &mut diagnostics);
        }
        if self.strict && !diagnostics.is_empty() {
            return Err(ParseError::new(path, ParseErrorKind::Syntax, diagnostics.join("; ")));
        }

        let lowering = Lowering { source };
        let root = SyntaxNode::new(NodeKind::TranslationUnit, lowering.span(root))
            .with_children(lowering.children(root));

        Ok(SyntaxTree {
            path: path.to_path_buf(),
            root,
            diagnostics,
        })
    }
}

/// Converts a tree-sitter tree into the abstract [`SyntaxNode`] tree.
///
/// Nodes that are neither scopes, qualifiers nor literals are not kept; their
/// interesting descendants are spliced into the nearest kept ancestor.
struct Lowering<'s> {
    source: &'s [u8],
}

impl Lowering<'_> {
    fn children(&self, node: Node<'_>) -> Vec<SyntaxNode> {
        let mut out = Vec::new();
        self.lower_children_into(node, &mut out);
        out
    }

    fn lower_children_into(&self, node: Node<'_>, out: &mut Vec<SyntaxNode>) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.lower_into(child, out);
        }
    }

    fn lower_into(&self, node: Node<'_>, out: &mut Vec<SyntaxNode>) {
        match node.kind() {
            "function_definition" => {
                let kind = NodeKind::Function {
                    name: self.function_name(node),
                };
                out.push(SyntaxNode::new(kind, self.span(node)).with_children(self.children(node)));
            }
            "lambda_expression" => {
                out.push(SyntaxNode::new(NodeKind::Lambda, self.span(node)).with_children(self.children(node)));
            }
            "namespace_definition" => {
                let name = node
                    .child_by_field_name("name")
                    .map(|name| self.text(name))
                    .filter(|name| !name.is_empty());
                out.push(
                    SyntaxNode::new(NodeKind::Namespace { name }, self.span(node))
                        .with_children(self.children(node)),
                );
            }
            "class_specifier" | "struct_specifier" | "union_specifier" => {
                if node.child_by_field_name("body").is_some() {
                    let name = node.child_by_field_name("name").map(|name| self.text(name));
                    out.push(
                        SyntaxNode::new(NodeKind::Class { name }, self.span(node))
                            .with_children(self.children(node)),
                    );
                } else {
                    self.lower_children_into(node, out);
                }
            }
            "string_literal" | "raw_string_literal" => {
                out.push(self.literal(node));
            }
            "concatenated_string" => {
                let mut pieces = Vec::new();
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    match child.kind() {
                        "string_literal" | "raw_string_literal" => pieces.push(self.literal(child)),
                        _ => pieces.push(SyntaxNode::new(NodeKind::Other, self.span(child))),
                    }
                }
                out.push(SyntaxNode::new(NodeKind::Concatenation, self.span(node)).with_children(pieces));
            }
            // `extern "C"`: the linkage string never reaches a binary, the body does.
            "linkage_specification" => {
                if let Some(body) = node.child_by_field_name("body") {
                    self.lower_into(body, out);
                }
            }
            "preproc_include" | "char_literal" | "system_lib_string" | "comment" => {}
            _ => self.lower_children_into(node, out),
        }
    }

    fn literal(&self, node: Node<'_>) -> SyntaxNode {
        let value = decode_literal(&self.source[node.byte_range()]);
        SyntaxNode::new(NodeKind::StringLiteral { value }, self.span(node))
    }

    /// Follow the declarator chain (`*`, `&`, parentheses, attributes) down to
    /// the function declarator and return the declared name.
    fn function_name(&self, node: Node<'_>) -> Option<String> {
        let mut declarator = node.child_by_field_name("declarator")?;
        loop {
            if declarator.kind() == "function_declarator" {
                let target = declarator.child_by_field_name("declarator")?;
                let name = self.text(target);
                let name = name.trim_matches(|c| c == '(' || c == ')').trim().to_string();
                return (!name.is_empty()).then_some(name);
            }
            declarator = declarator
                .child_by_field_name("declarator")
                .or_else(|| declarator.named_child(0))?;
        }
    }

    fn text(&self, node: Node<'_>) -> String {
        let raw = String::from_utf8_lossy(&self.source[node.byte_range()]);
        raw.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .replace(" ::", "::")
            .replace(":: ", "::")
    }

    fn span(&self, node: Node<'_>) -> Span {
        let start = to_position(node.start_position());
        let end = inclusive_end(
            self.source,
            node.start_byte(),
            node.end_byte(),
            node.start_position(),
            node.end_position(),
        );
        Span::new(start, end.max(start))
    }
}

fn to_position(point: Point) -> Position {
    Position::new(point.row as u32 + 1, point.column as u32 + 1)
}

/// tree-sitter reports 0-based rows and columns with an exclusive end. The
/// canonical form is 1-based with the end on the node's last byte.
fn inclusive_end(source: &[u8], start_byte: usize, end_byte: usize, start: Point, end: Point) -> Position {
    if end_byte <= start_byte {
        return to_position(start);
    }
    if end.column > 0 {
        // An exclusive 0-based column equals the inclusive 1-based one.
        return Position::new(end.row as u32 + 1, end.column as u32);
    }

    // The node ends with a newline; its last byte is on the previous row.
    let last = (end_byte - 1).min(source.len().saturating_sub(1));
    let line_start = source[..last]
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|p| p + 1)
        .unwrap_or(0);
    Position::new(end.row as u32, (last - line_start + 1) as u32)
}

fn collect_diagnostics(node: Node<'_>, out: &mut Vec<String>) {
    if out.len() >= MAX_DIAGNOSTICS {
        return;
    }
    let at = to_position(node.start_position());
    if node.is_missing() {
        out.push(format!("missing `{}` at {}", node.kind(), at));
        return;
    }
    if node.is_error() {
        out.push(format!("syntax error at {}", at));
        return;
    }
    if !node.has_error() {
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_diagnostics(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str, source: &str) -> SyntaxTree {
        TreeSitterParser::new(Duration::from_secs(5), false)
            .parse(Path::new(path), source.as_bytes())
            .unwrap()
    }

    fn function_names(tree: &SyntaxTree) -> Vec<Option<String>> {
        let mut names = Vec::new();
        tree.root.walk(&mut |node| {
            if let NodeKind::Function { name } = &node.kind {
                names.push(name.clone());
            }
        });
        names
    }

    fn literal_values(tree: &SyntaxTree) -> Vec<String> {
        let mut values = Vec::new();
        tree.root.walk(&mut |node| {
            if let NodeKind::StringLiteral { value } = &node.kind {
                values.push(String::from_utf8_lossy(value).into_owned());
            }
        });
        values
    }

    fn find<'a>(node: &'a SyntaxNode, pred: &dyn Fn(&SyntaxNode) -> bool) -> Option<&'a SyntaxNode> {
        if pred(node) {
            return Some(node);
        }
        node.children.iter().find_map(|child| find(child, pred))
    }

    #[test]
    fn test_dialect_detection() {
        assert_eq!(Dialect::for_path(Path::new("a.c")), Dialect::C);
        assert_eq!(Dialect::for_path(Path::new("a.H")), Dialect::C);
        assert_eq!(Dialect::for_path(Path::new("a.cpp")), Dialect::Cpp);
        assert_eq!(Dialect::for_path(Path::new("a.hpp")), Dialect::Cpp);
    }

    #[test]
    fn test_cpp_headers_fall_back_to_cpp_grammar() {
        let strict = TreeSitterParser::new(Duration::from_secs(5), true);
        let source = "namespace util {\nclass Logger {\npublic:\n    void warn() { emit(\"careful\"); }\n};\n}\n";
        let tree = strict.parse(Path::new("logger.h"), source.as_bytes()).unwrap();
        assert!(tree.diagnostics.is_empty());
        assert_eq!(function_names(&tree), vec![Some("warn".to_string())]);
        assert_eq!(literal_values(&tree), vec!["careful"]);

        assert_eq!(Dialect::fallback_for(Path::new("a.c")), None);
        let c = strict
            .parse(Path::new("api.h"), b"static int ok(void) { return puts(\"c\"); }\n")
            .unwrap();
        assert_eq!(literal_values(&c), vec!["c"]);
    }

    #[test]
    fn test_slow_parse_times_out() {
        let source: String = (0..20_000)
            .map(|i| format!("int f{i}(void) {{ return g(\"s{i}\", {i}); }}\n"))
            .collect();
        let parser = TreeSitterParser::new(Duration::from_micros(1), false);
        let err = parser.parse(Path::new("big.c"), source.as_bytes()).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Timeout);
    }

    #[test]
    fn test_c_functions_and_spans() {
        let source = "void foo(void)\n{\n    puts(\"hello\");\n}\n\nstatic char *bar(int x)\n{\n    return \"w\\x6frld\";\n}\n";
        let tree = parse("a.c", source);

        assert_eq!(
            function_names(&tree),
            vec![Some("foo".to_string()), Some("bar".to_string())]
        );
        assert_eq!(literal_values(&tree), vec!["hello", "world"]);
        assert!(tree.diagnostics.is_empty());

        let foo = find(&tree.root, &|n| matches!(&n.kind, NodeKind::Function { name } if name.as_deref() == Some("foo"))).unwrap();
        assert_eq!(foo.span.start, Position::new(1, 1));
        assert_eq!(foo.span.end, Position::new(4, 1));

        let hello = &foo.children[0];
        assert_eq!(hello.span.start, Position::new(3, 10));
        assert_eq!(hello.span.end, Position::new(3, 16));
    }

    #[test]
    fn test_include_and_linkage_strings_are_not_literals() {
        let source = "#include \"config.h\"\nextern \"C\" {\nint init(void) { return log_msg(\"init done\"); }\n}\n";
        let tree = parse("init.cpp", source);

        assert_eq!(literal_values(&tree), vec!["init done"]);
        assert_eq!(function_names(&tree), vec![Some("init".to_string())]);
    }

    #[test]
    fn test_concatenated_strings_keep_pieces() {
        let source = "const char *banner = \"ab\" \"cd\";\nvoid p(unsigned long v) { printf(\"v=%\" PRIu64 \"\\n\", v); }\n";
        let tree = parse("c.c", source);

        let concats: Vec<&SyntaxNode> = {
            let mut found = Vec::new();
            tree.root.walk(&mut |node| {
                if node.kind == NodeKind::Concatenation {
                    found.push(node);
                }
            });
            found
        };
        assert_eq!(concats.len(), 2);
        assert_eq!(concats[0].children.len(), 2);
        assert_eq!(concats[1].children.len(), 3);
        assert_eq!(concats[1].children[1].kind, NodeKind::Other);
    }

    #[test]
    fn test_cpp_namespaces_classes_and_lambdas() {
        let source = r#"namespace net {
class Socket {
public:
    void open() { log("opening socket"); }
};
void Socket::close() {
    auto f = []() { return "in lambda"; };
    log("closing");
}
}
"#;
        let tree = parse("socket.cpp", source);

        assert_eq!(
            function_names(&tree),
            vec![Some("open".to_string()), Some("Socket::close".to_string())]
        );
        assert_eq!(literal_values(&tree), vec!["opening socket", "in lambda", "closing"]);

        let ns = &tree.root.children[0];
        assert_eq!(ns.kind, NodeKind::Namespace { name: Some("net".to_string()) });
        assert!(find(ns, &|n| n.kind == NodeKind::Class { name: Some("Socket".to_string()) }).is_some());
        assert!(find(ns, &|n| n.kind == NodeKind::Lambda).is_some());
    }

    #[test]
    fn test_pointer_and_reference_declarators() {
        let source = "const char *name(void) { return \"n\"; }\nstd::string &Registry::get() { static std::string s = \"r\"; return s; }\n";
        let tree = parse("decl.cpp", source);
        assert_eq!(
            function_names(&tree),
            vec![Some("name".to_string()), Some("Registry::get".to_string())]
        );
    }

    #[test]
    fn test_strict_mode_rejects_syntax_errors() {
        let source = "void broken( { return \"oops\"; \n";
        let strict = TreeSitterParser::new(Duration::from_secs(5), true);
        let err = strict.parse(Path::new("broken.c"), source.as_bytes()).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Syntax);
        assert!(!err.message.is_empty());

        let lenient = parse("broken.c", source);
        assert!(!lenient.diagnostics.is_empty());
    }

    #[test]
    fn test_inclusive_end_conversion() {
        let source = b"ab\ncd\n";
        // Node covering "cd" on row 1: exclusive end (1, 2).
        let end = inclusive_end(source, 3, 5, Point::new(1, 0), Point::new(1, 2));
        assert_eq!(end, Position::new(2, 2));

        // Node covering "ab\n": exclusive end at the start of row 1.
        let end = inclusive_end(source, 0, 3, Point::new(0, 0), Point::new(1, 0));
        assert_eq!(end, Position::new(1, 3));

        // Empty node collapses to its start.
        let end = inclusive_end(source, 4, 4, Point::new(1, 1), Point::new(1, 1));
        assert_eq!(end, Position::new(2, 2));
    }
}
