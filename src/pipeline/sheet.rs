use super::Warning;
use cssparser::{ParseError, Parser, ParserInput, Token};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Rule(Rule),
    AtRule(AtRule),
    Decl(Decl),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub selector: String,
    pub nodes: Vec<Node>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtRule {
    pub name: String,
    pub params: String,
    /// `None` for statements such as `@import "x.css";`.
    pub nodes: Option<Vec<Node>>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decl {
    pub prop: String,
    pub value: String,
    pub line: u32,
}

impl Rule {
    pub fn new(selector: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            selector: selector.into(),
            nodes,
            line: 0,
        }
    }

    pub fn decls(&self) -> impl Iterator<Item = &Decl> {
        self.nodes.iter().filter_map(|n| match n {
            Node::Decl(d) => Some(d),
            _ => None,
        })
    }
}

impl Decl {
    pub fn new(prop: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            prop: prop.into(),
            value: value.into(),
            line: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stylesheet {
    pub nodes: Vec<Node>,
}

impl Stylesheet {
    pub fn to_css(&self) -> String {
        let mut out = String::new();
        write_nodes(&mut out, &self.nodes, 0);
        out
    }

    /// Calls `f` on every declaration, at any depth.
    pub fn walk_decls_mut(&mut self, f: &mut dyn FnMut(&mut Decl)) {
        fn walk(nodes: &mut [Node], f: &mut dyn FnMut(&mut Decl)) {
            for node in nodes {
                match node {
                    Node::Decl(d) => f(d),
                    Node::Rule(r) => walk(&mut r.nodes, f),
                    Node::AtRule(a) => {
                        if let Some(children) = a.nodes.as_mut() {
                            walk(children, f);
                        }
                    }
                }
            }
        }
        walk(&mut self.nodes, f);
    }

    /// Calls `f` on every at-rule, at any depth.
    pub fn walk_at_rules_mut(&mut self, f: &mut dyn FnMut(&mut AtRule)) {
        fn walk(nodes: &mut [Node], f: &mut dyn FnMut(&mut AtRule)) {
            for node in nodes {
                match node {
                    Node::AtRule(a) => {
                        f(a);
                        if let Some(children) = a.nodes.as_mut() {
                            walk(children, f);
                        }
                    }
                    Node::Rule(r) => walk(&mut r.nodes, f),
                    Node::Decl(_) => {}
                }
            }
        }
        walk(&mut self.nodes, f);
    }

    /// Calls `f` on every rule, at any depth.
    pub fn walk_rules_mut(&mut self, f: &mut dyn FnMut(&mut Rule)) {
        fn walk(nodes: &mut [Node], f: &mut dyn FnMut(&mut Rule)) {
            for node in nodes {
                match node {
                    Node::Rule(r) => {
                        f(r);
                        walk(&mut r.nodes, f);
                    }
                    Node::AtRule(a) => {
                        if let Some(children) = a.nodes.as_mut() {
                            walk(children, f);
                        }
                    }
                    Node::Decl(_) => {}
                }
            }
        }
        walk(&mut self.nodes, f);
    }
}

fn write_nodes(out: &mut String, nodes: &[Node], depth: usize) {
    let indent = "  ".repeat(depth);
    for node in nodes {
        match node {
            Node::Decl(d) => {
                out.push_str(&indent);
                out.push_str(&d.prop);
                out.push_str(": ");
                out.push_str(&d.value);
                out.push_str(";\n");
            }
            Node::Rule(r) => {
                out.push_str(&indent);
                out.push_str(&r.selector);
                out.push_str(" {\n");
                write_nodes(out, &r.nodes, depth + 1);
                out.push_str(&indent);
                out.push_str("}\n");
            }
            Node::AtRule(a) => {
                out.push_str(&indent);
                out.push('@');
                out.push_str(&a.name);
                if !a.params.is_empty() {
                    out.push(' ');
                    out.push_str(&a.params);
                }
                match &a.nodes {
                    Some(children) => {
                        out.push_str(" {\n");
                        write_nodes(out, children, depth + 1);
                        out.push_str(&indent);
                        out.push_str("}\n");
                    }
                    None => out.push_str(";\n"),
                }
            }
        }
    }
}

#[derive(Default)]
struct ParseState {
    warnings: Vec<Warning>,
    error: Option<Warning>,
    len: usize,
}

enum Terminator {
    Semicolon,
    Block,
    End,
}

/// Parses style-sheet source into a [`Stylesheet`].
///
/// Recoverable oddities become warnings. A stray `}` or a block left open at
/// the end of the source is a syntax error. Comments are dropped.
pub fn parse(source: &str) -> Result<(Stylesheet, Vec<Warning>), Warning> {
    let mut input = ParserInput::new(source);
    let mut parser = Parser::new(&mut input);
    let mut state = ParseState {
        len: source.len(),
        ..ParseState::default()
    };
    let nodes = parse_nodes(&mut parser, &mut state, None);
    match state.error {
        Some(error) => Err(error),
        None => Ok((Stylesheet { nodes }, state.warnings)),
    }
}

fn skip_trivia(p: &mut Parser<'_, '_>) {
    loop {
        let before = p.state();
        let trivia = matches!(
            p.next_including_whitespace_and_comments(),
            Ok(Token::WhiteSpace(_) | Token::Comment(_))
        );
        if !trivia {
            p.reset(&before);
            return;
        }
    }
}

/// `open` is the error raised if the block `p` reads runs to the end of input.
fn parse_nodes<'i>(
    p: &mut Parser<'i, '_>,
    state: &mut ParseState,
    open: Option<Warning>,
) -> Vec<Node> {
    let mut nodes = Vec::new();
    loop {
        skip_trivia(p);
        if state.error.is_some() || p.is_exhausted() {
            break;
        }
        let mut segment = p.position();
        let location = p.current_source_location();
        let line = location.line + 1;
        let mut head = String::new();
        let mut end;
        let mut terminator = Terminator::End;
        let mut brace = None;

        loop {
            end = p.position();
            let here = p.current_source_location();
            let token = match p.next_including_whitespace_and_comments() {
                Ok(token) => token.clone(),
                Err(_) => break,
            };
            match token {
                Token::Semicolon => {
                    terminator = Terminator::Semicolon;
                    break;
                }
                Token::CurlyBracketBlock => {
                    terminator = Terminator::Block;
                    brace = Some(Warning {
                        line: here.line + 1,
                        column: here.column,
                        message: "Unclosed block".to_string(),
                    });
                    break;
                }
                Token::Comment(_) => {
                    head.push_str(p.slice(segment..end));
                    segment = p.position();
                }
                Token::CloseCurlyBracket => {
                    state.error = Some(Warning {
                        line: here.line + 1,
                        column: here.column,
                        message: "Unexpected }".to_string(),
                    });
                    return nodes;
                }
                Token::BadString(_) | Token::BadUrl(_) => state.warnings.push(Warning {
                    line: here.line + 1,
                    column: here.column,
                    message: "Unclosed string or url".to_string(),
                }),
                _ => {}
            }
        }

        head.push_str(p.slice(segment..end));
        let head = head.trim().to_string();
        match terminator {
            Terminator::Block => {
                let children = p
                    .parse_nested_block(|nested| {
                        Ok::<_, ParseError<'i, ()>>(parse_nodes(nested, state, brace))
                    })
                    .unwrap_or_default();
                if let Some(at) = head.strip_prefix('@') {
                    let (name, params) = split_at_rule(at);
                    nodes.push(Node::AtRule(AtRule {
                        name,
                        params,
                        nodes: Some(children),
                        line,
                    }));
                } else {
                    nodes.push(Node::Rule(Rule {
                        selector: head,
                        nodes: children,
                        line,
                    }));
                }
            }
            Terminator::Semicolon | Terminator::End => {
                if head.is_empty() {
                    continue;
                }
                if let Some(at) = head.strip_prefix('@') {
                    let (name, params) = split_at_rule(at);
                    nodes.push(Node::AtRule(AtRule {
                        name,
                        params,
                        nodes: None,
                        line,
                    }));
                } else if let Some((prop, value)) = head.split_once(':') {
                    nodes.push(Node::Decl(Decl {
                        prop: prop.trim().to_string(),
                        value: value.trim().to_string(),
                        line,
                    }));
                } else {
                    state.warnings.push(Warning {
                        line,
                        column: location.column,
                        message: format!("Unknown word `{head}`"),
                    });
                }
            }
        }
    }
    if state.error.is_none() && p.position().byte_index() == state.len {
        state.error = open;
    }
    nodes
}

fn split_at_rule(text: &str) -> (String, String) {
    let split = text
        .find(|c: char| c.is_whitespace() || matches!(c, '(' | '"' | '\'' | '{'))
        .unwrap_or(text.len());
    let (name, params) = text.split_at(split);
    (name.to_string(), params.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rules_declarations_and_at_rules() {
        let (sheet, warnings) = parse(concat!(
            "/* header */\n@import \"reset.css\";\n",
            ".a, .b:hover { color: red; margin: 0 auto }\n",
            "@media (min-width: 10px) {\n  .c { top: 0 }\n}\n",
        ))
        .unwrap();
        assert!(warnings.is_empty());
        assert_eq!(sheet.nodes.len(), 3);

        let Node::AtRule(import) = &sheet.nodes[0] else {
            panic!("expected @import");
        };
        assert_eq!(import.name, "import");
        assert_eq!(import.params, "\"reset.css\"");
        assert!(import.nodes.is_none());

        let Node::Rule(rule) = &sheet.nodes[1] else {
            panic!("expected rule");
        };
        assert_eq!(rule.selector, ".a, .b:hover");
        assert_eq!(rule.line, 3);
        let decls: Vec<_> = rule.decls().map(|d| (d.prop.as_str(), d.value.as_str())).collect();
        assert_eq!(decls, vec![("color", "red"), ("margin", "0 auto")]);

        let Node::AtRule(media) = &sheet.nodes[2] else {
            panic!("expected @media");
        };
        assert_eq!(media.name, "media");
        assert_eq!(media.params, "(min-width: 10px)");
        assert_eq!(media.nodes.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn stringifies_with_indentation() {
        let (sheet, _) = parse("@media print{.a{color:red}}").unwrap();
        assert_eq!(sheet.to_css(), "@media print {\n  .a {\n    color: red;\n  }\n}\n");
    }

    #[test]
    fn stray_closing_brace_is_an_error() {
        let err = parse(".a { color: red }\n}").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.message, "Unexpected }");
    }

    #[test]
    fn unclosed_block_is_an_error() {
        let err = parse(".title { color: red;\n.body { top: 0 }").unwrap_err();
        assert_eq!(err.message, "Unclosed block");
        assert_eq!(err.line, 1);

        let err = parse("@media print {\n  .a { top: 0; }\n").unwrap_err();
        assert_eq!(err.message, "Unclosed block");
        let err = parse(".a { content: \"open }").unwrap_err();
        assert_eq!(err.message, "Unclosed block");
        assert!(parse(".a { }").is_ok());
    }

    #[test]
    fn comments_are_dropped_from_selectors_and_values() {
        let (sheet, _) = parse(".a /* was .legacy */ { color: /* x */ red; }").unwrap();
        let Node::Rule(rule) = &sheet.nodes[0] else {
            panic!("expected rule");
        };
        assert_eq!(rule.selector, ".a");
        let decls: Vec<_> = rule.decls().map(|d| d.value.as_str()).collect();
        assert_eq!(decls, vec!["red"]);
    }

    #[test]
    fn words_without_colon_warn() {
        let (sheet, warnings) = parse(".a { colorred; top: 0 }").unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("colorred"));
        let Node::Rule(rule) = &sheet.nodes[0] else {
            panic!("expected rule");
        };
        assert_eq!(rule.decls().count(), 1);
    }
}
