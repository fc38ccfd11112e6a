//! Restricted template language for `replace`/`extend` transformations and
//! page names.
//!
//! Supported syntax:
//!
//! - `{{name}}`, `{{url.pathname}}`: variable lookup, unknown names render empty
//! - `{{#if x}}...{{else}}...{{/if}}` and `{{#unless x}}...{{/unless}}`
//! - `{{helper arg...}}`: helper call, arguments are paths or quoted strings
//! - `{{! comment}}`
//!
//! There are no loops, so rendering is linear in the template size. Tags that
//! do not parse (unknown block helpers, stray `{{/if}}`, unclosed blocks) are
//! kept as literal text.

use std::collections::BTreeMap;

// =============================================================================
// Values
// =============================================================================

/// A value visible to templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
    Text(String),
    Object(BTreeMap<String, TemplateValue>),
    /// Ordered key/value pairs, e.g. query parameters
    Pairs(Vec<(String, String)>),
}

impl TemplateValue {
    fn is_truthy(&self) -> bool {
        match self {
            Self::Text(s) => !s.is_empty(),
            Self::Object(_) => true,
            Self::Pairs(pairs) => !pairs.is_empty(),
        }
    }

    /// Interpolated form. Objects and pair lists have none.
    fn render(&self) -> &str {
        match self {
            Self::Text(s) => s,
            Self::Object(_) | Self::Pairs(_) => "",
        }
    }

    fn get(&self, key: &str) -> Option<&TemplateValue> {
        match self {
            Self::Object(map) => map.get(key),
            Self::Text(_) | Self::Pairs(_) => None,
        }
    }
}

impl From<String> for TemplateValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for TemplateValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Top-level variables of a render.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: BTreeMap<String, TemplateValue>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, replacing any previous binding.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<TemplateValue>) {
        self.vars.insert(name.into(), value.into());
    }

    fn lookup(&self, path: &[String]) -> Option<&TemplateValue> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.vars.get(first)?, |value, key| value.get(key))
    }
}

// =============================================================================
// AST
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Path(Vec<String>),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Arg(Arg),
    Helper { name: String, args: Vec<Arg> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Expr(Expr),
    Block {
        negate: bool,
        cond: Expr,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// A parsed template, reusable across renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    nodes: Vec<Node>,
}

// =============================================================================
// Lexer
// =============================================================================

enum Token<'a> {
    Text(&'a str),
    Tag { raw: &'a str, body: &'a str },
}

fn lex(source: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            tokens.push(Token::Text(&rest[..start]));
        }
        let tail = &rest[start..];
        let (open, close) = if tail.starts_with("{{{") { (3, "}}}") } else { (2, "}}") };

        match tail[open..].find(close) {
            Some(end) => {
                let raw_len = open + end + close.len();
                tokens.push(Token::Tag {
                    raw: &tail[..raw_len],
                    body: &tail[open..open + end],
                });
                rest = &tail[raw_len..];
            }
            None => {
                tokens.push(Token::Text(tail));
                rest = "";
            }
        }
    }

    if !rest.is_empty() {
        tokens.push(Token::Text(rest));
    }
    tokens
}

/// Split on whitespace, keeping quoted strings together.
fn split_args(body: &str) -> Option<Vec<Arg>> {
    let mut args = Vec::new();
    let mut chars = body.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' || c == '\'' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            for (_, ch) in chars.by_ref() {
                if ch == c {
                    closed = true;
                    break;
                }
                value.push(ch);
            }
            if !closed {
                return None;
            }
            args.push(Arg::Str(value));
            continue;
        }

        let mut end = body.len();
        while let Some(&(j, ch)) = chars.peek() {
            if ch.is_whitespace() {
                end = j;
                break;
            }
            chars.next();
        }
        args.push(Arg::Path(parse_path(&body[i..end])?));
    }
    Some(args)
}

fn parse_path(token: &str) -> Option<Vec<String>> {
    let path: Vec<String> = token.split('.').map(str::to_string).collect();
    let valid = path.iter().all(|part| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '$')
    });
    valid.then_some(path)
}

fn parse_expr(body: &str) -> Option<Expr> {
    let mut args = split_args(body)?;
    match args.len() {
        0 => None,
        1 => args.pop().map(Expr::Arg),
        _ => {
            let name = match args.remove(0) {
                Arg::Path(path) if path.len() == 1 => path.into_iter().next()?,
                _ => return None,
            };
            Some(Expr::Helper { name, args })
        }
    }
}

// =============================================================================
// Parser
// =============================================================================

struct Frame<'a> {
    /// `if` / `unless`; empty for the root frame
    keyword: &'a str,
    negate: bool,
    cond: Option<Expr>,
    raw_open: &'a str,
    raw_else: Option<&'a str>,
    then: Vec<Node>,
    otherwise: Vec<Node>,
}

impl<'a> Frame<'a> {
    fn root() -> Self {
        Self {
            keyword: "",
            negate: false,
            cond: None,
            raw_open: "",
            raw_else: None,
            then: Vec::new(),
            otherwise: Vec::new(),
        }
    }

    fn push(&mut self, node: Node) {
        if self.raw_else.is_some() {
            self.otherwise.push(node);
        } else {
            self.then.push(node);
        }
    }

    fn into_node(self) -> Option<Node> {
        Some(Node::Block {
            negate: self.negate,
            cond: self.cond?,
            then: self.then,
            otherwise: self.otherwise,
        })
    }

    /// Unclosed block: emit its tags as text around its children.
    fn into_literal(self) -> Vec<Node> {
        let mut nodes = vec![Node::Text(self.raw_open.to_string())];
        nodes.extend(self.then);
        if let Some(raw_else) = self.raw_else {
            nodes.push(Node::Text(raw_else.to_string()));
            nodes.extend(self.otherwise);
        }
        nodes
    }
}

fn parse_block_open(rest: &str) -> Option<(&str, bool, Expr)> {
    let rest = rest.trim_start();
    let (keyword, cond) = rest.split_once(char::is_whitespace)?;
    let negate = match keyword {
        "if" => false,
        "unless" => true,
        _ => return None,
    };
    Some((keyword, negate, parse_expr(cond.trim())?))
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut stack = vec![Frame::root()];

        for token in lex(source) {
            let (raw, body) = match token {
                Token::Text(text) => {
                    push_node(&mut stack, Node::Text(text.to_string()));
                    continue;
                }
                Token::Tag { raw, body } => (raw, body.trim()),
            };

            if let Some(rest) = body.strip_prefix('#') {
                match parse_block_open(rest) {
                    Some((keyword, negate, cond)) => stack.push(Frame {
                        keyword,
                        negate,
                        cond: Some(cond),
                        raw_open: raw,
                        ..Frame::root()
                    }),
                    None => push_node(&mut stack, Node::Text(raw.to_string())),
                }
            } else if body == "else" {
                let top = stack.len() - 1;
                if top > 0 && stack[top].raw_else.is_none() {
                    stack[top].raw_else = Some(raw);
                } else {
                    push_node(&mut stack, Node::Text(raw.to_string()));
                }
            } else if let Some(name) = body.strip_prefix('/') {
                let closes_top = stack.len() > 1
                    && stack.last().is_some_and(|frame| frame.keyword == name.trim());
                let node = if closes_top { stack.pop().and_then(Frame::into_node) } else { None };
                push_node(&mut stack, node.unwrap_or_else(|| Node::Text(raw.to_string())));
            } else if body.starts_with('!') {
                continue;
            } else {
                let node = parse_expr(body)
                    .map(Node::Expr)
                    .unwrap_or_else(|| Node::Text(raw.to_string()));
                push_node(&mut stack, node);
            }
        }

        while stack.len() > 1 {
            if let Some(frame) = stack.pop() {
                for node in frame.into_literal() {
                    push_node(&mut stack, node);
                }
            }
        }

        let nodes = stack.pop().map(|root| root.then).unwrap_or_default();
        Self { nodes }
    }

    /// Render against `scope`. Never fails.
    pub fn render(&self, scope: &Scope) -> String {
        let mut out = String::new();
        render_nodes(&self.nodes, scope, &mut out);
        out
    }
}

fn push_node(stack: &mut [Frame<'_>], node: Node) {
    if let Some(top) = stack.last_mut() {
        top.push(node);
    }
}

/// Parse and render in one step.
pub fn render(source: &str, scope: &Scope) -> String {
    Template::parse(source).render(scope)
}

// =============================================================================
// Evaluation
// =============================================================================

fn render_nodes(nodes: &[Node], scope: &Scope, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Expr(expr) => out.push_str(&eval(expr, scope)),
            Node::Block {
                negate,
                cond,
                then,
                otherwise,
            } => {
                if is_truthy(cond, scope) != *negate {
                    render_nodes(then, scope, out);
                } else {
                    render_nodes(otherwise, scope, out);
                }
            }
        }
    }
}

fn is_truthy(expr: &Expr, scope: &Scope) -> bool {
    match expr {
        Expr::Arg(Arg::Path(path)) => scope.lookup(path).is_some_and(TemplateValue::is_truthy),
        Expr::Arg(Arg::Str(s)) => !s.is_empty(),
        Expr::Helper { .. } => !eval(expr, scope).is_empty(),
    }
}

fn eval(expr: &Expr, scope: &Scope) -> String {
    match expr {
        Expr::Arg(Arg::Str(s)) => s.clone(),
        Expr::Arg(Arg::Path(path)) => scope
            .lookup(path)
            .map(|value| value.render().to_string())
            .unwrap_or_default(),
        Expr::Helper { name, args } => call_helper(name, args, scope),
    }
}

fn call_helper(name: &str, args: &[Arg], scope: &Scope) -> String {
    match name {
        "contextData" => {
            let value = match args.first() {
                Some(Arg::Path(path)) => scope.lookup(path),
                Some(Arg::Str(s)) => return s.clone(),
                None => None,
            };
            match value {
                Some(TemplateValue::Pairs(pairs)) => join_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
                Some(TemplateValue::Object(map)) => join_pairs(map.iter().map(|(k, v)| (k.as_str(), v.render()))),
                Some(TemplateValue::Text(s)) => s.clone(),
                None => String::new(),
            }
        }
        _ => {
            log::debug!("unknown template helper '{name}'");
            String::new()
        }
    }
}

fn join_pairs<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    pairs
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join(", ")
}
