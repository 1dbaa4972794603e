//! Parameter templates and the expression resolver.
//!
//! Templates are compiled once, when a definition is loaded, into a typed tree
//! ([`Template`] / [`Expr`]) and evaluated per execution against the context
//! document and the execution metadata.
//!
//! # Syntax
//!
//! - An object key ending in `.$` marks its string value as an expression; the
//!   suffix is dropped from the resolved key.
//! - `$.a.b`, `$.items[0].name` - path into the context document
//! - `$$.executionId` - path into the read-only execution metadata
//! - `States.Format('model-{}', $$.executionId)` - positional `{}` substitution;
//!   arguments may be quoted strings, numbers, booleans, `null`, paths or
//!   nested `States.Format` calls
//!
//! Every other string is a literal.

use serde_json::Value;

use crate::context::ContextDocument;
use crate::error::{ErrorKind, Failure};

/// Key suffix marking a value as an expression.
pub const EXPR_SUFFIX: &str = ".$";

/// Maximum nesting of intrinsic calls evaluated for one expression.
pub const MAX_RESOLUTION_DEPTH: usize = 10;

const FORMAT_FN: &str = "States.Format";

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// Which namespace a path starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    /// `$` - the context document.
    Context,
    /// `$$` - execution metadata.
    Execution,
}

/// A segment of a path: object key or array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Key(k) => write!(f, "{}", k),
            Segment::Index(i) => write!(f, "[{}]", i),
        }
    }
}

/// A parsed path reference, e.g. `$.train.modelArtifacts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRef {
    pub root: Root,
    pub segments: Vec<Segment>,
    /// Source text, kept for error messages.
    pub source: String,
}

/// An expression: the value side of a `key.$` entry or an intrinsic argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(PathRef),
    Format { template: String, args: Vec<Expr> },
}

/// A compiled parameter template with the same shape as its source document.
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    Value(Value),
    Expr(Expr),
    Object(Vec<(String, Template)>),
    Array(Vec<Template>),
}

impl Template {
    /// Compile a raw JSON template.
    pub fn compile(value: &Value) -> Result<Self, String> {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(String, Template)> = Vec::with_capacity(map.len());
                for (key, v) in map {
                    let (name, compiled) = match key.strip_suffix(EXPR_SUFFIX) {
                        Some(name) => {
                            let src = v.as_str().ok_or_else(|| {
                                format!("value of '{}' must be an expression string", key)
                            })?;
                            let expr = Expr::parse(src)
                                .map_err(|e| format!("in '{}': {}", key, e))?;
                            (name.to_string(), Template::Expr(expr))
                        }
                        None => (key.clone(), Template::compile(v)?),
                    };
                    if name.is_empty() {
                        return Err(format!("key '{}' has an empty name", key));
                    }
                    if entries.iter().any(|(k, _)| *k == name) {
                        return Err(format!("key '{}' is defined twice", name));
                    }
                    entries.push((name, compiled));
                }
                Ok(Template::Object(entries))
            }
            Value::Array(items) => Ok(Template::Array(
                items.iter().map(Template::compile).collect::<Result<_, _>>()?,
            )),
            other => Ok(Template::Value(other.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

impl Expr {
    /// Parse a top-level expression: a path or an intrinsic call.
    pub fn parse(src: &str) -> Result<Self, String> {
        let mut parser = Parser::new(src);
        parser.skip_ws();
        let expr = match parser.peek() {
            Some('$') => Expr::Path(parser.path()?),
            Some(_) if parser.rest().starts_with(FORMAT_FN) => parser.format()?,
            _ => {
                return Err(format!(
                    "expected a path or {} call, found '{}'",
                    FORMAT_FN, src
                ));
            }
        };
        parser.skip_ws();
        if !parser.at_end() {
            return Err(format!(
                "unexpected trailing input '{}' in '{}'",
                parser.rest(),
                src
            ));
        }
        Ok(expr)
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), String> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(format!("expected '{}', found '{}' in '{}'", want, c, self.src)),
            None => Err(format!("expected '{}', found end of input in '{}'", want, self.src)),
        }
    }

    fn path(&mut self) -> Result<PathRef, String> {
        let start = self.pos;
        self.bump(); // '$'
        let root = if self.peek() == Some('$') {
            self.bump();
            Root::Execution
        } else {
            Root::Context
        };

        let mut segments = Vec::new();
        loop {
            match self.peek() {
                Some('.') => {
                    self.bump();
                    let key_start = self.pos;
                    while matches!(self.peek(), Some(c) if !is_path_delimiter(c)) {
                        self.bump();
                    }
                    let key = &self.src[key_start..self.pos];
                    if key.is_empty() {
                        return Err(format!("empty path segment in '{}'", self.src));
                    }
                    segments.push(Segment::Key(key.to_string()));
                }
                Some('[') => {
                    self.bump();
                    let idx_start = self.pos;
                    while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                        self.bump();
                    }
                    let index = self.src[idx_start..self.pos]
                        .parse::<usize>()
                        .map_err(|_| format!("invalid array index in '{}'", self.src))?;
                    self.expect(']')?;
                    segments.push(Segment::Index(index));
                }
                _ => break,
            }
        }

        Ok(PathRef {
            root,
            segments,
            source: self.src[start..self.pos].to_string(),
        })
    }

    fn format(&mut self) -> Result<Expr, String> {
        self.pos += FORMAT_FN.len();
        self.expect('(')?;
        self.skip_ws();
        let template = match self.peek() {
            Some('\'') => self.quoted()?,
            _ => {
                return Err(format!(
                    "{} expects a quoted template as its first argument in '{}'",
                    FORMAT_FN, self.src
                ));
            }
        };

        let mut args = Vec::new();
        loop {
            self.skip_ws();
            match self.bump() {
                Some(')') => break,
                Some(',') => {
                    self.skip_ws();
                    args.push(self.argument()?);
                }
                Some(c) => {
                    return Err(format!("unexpected '{}' in '{}'", c, self.src));
                }
                None => return Err(format!("unclosed {} call in '{}'", FORMAT_FN, self.src)),
            }
        }

        let placeholders = template.matches("{}").count();
        if placeholders != args.len() {
            return Err(format!(
                "{} template '{}' has {} placeholder(s) but {} argument(s)",
                FORMAT_FN,
                template,
                placeholders,
                args.len()
            ));
        }
        Ok(Expr::Format { template, args })
    }

    fn argument(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Some('\'') => Ok(Expr::Literal(Value::String(self.quoted()?))),
            Some('$') => Ok(Expr::Path(self.path()?)),
            Some(_) if self.rest().starts_with(FORMAT_FN) => self.format(),
            Some(_) => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c != ',' && c != ')' && !c.is_whitespace())
                {
                    self.bump();
                }
                let token = &self.src[start..self.pos];
                match token {
                    "true" => Ok(Expr::Literal(Value::Bool(true))),
                    "false" => Ok(Expr::Literal(Value::Bool(false))),
                    "null" => Ok(Expr::Literal(Value::Null)),
                    _ => serde_json::from_str::<serde_json::Number>(token)
                        .map(|n| Expr::Literal(Value::Number(n)))
                        .map_err(|_| format!("invalid argument '{}' in '{}'", token, self.src)),
                }
            }
            None => Err(format!("missing argument in '{}'", self.src)),
        }
    }

    /// Single-quoted string; a backslash escapes the next character.
    fn quoted(&mut self) -> Result<String, String> {
        self.bump(); // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => break,
                },
                Some('\'') => return Ok(out),
                Some(c) => out.push(c),
                None => break,
            }
        }
        Err(format!("unterminated string in '{}'", self.src))
    }
}

fn is_path_delimiter(c: char) -> bool {
    matches!(c, '.' | '[' | ',' | ')') || c.is_whitespace()
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolves compiled templates against a context document and metadata.
///
/// Resolution never mutates either input.
pub struct Resolver<'a> {
    context: &'a Value,
    meta: &'a Value,
}

impl<'a> Resolver<'a> {
    /// `meta` is the rendered `$$` namespace (see `ExecutionMeta::to_value`).
    pub fn new(context: &'a ContextDocument, meta: &'a Value) -> Self {
        Self {
            context: context.as_value(),
            meta,
        }
    }

    /// Resolve a template into a value of identical shape.
    pub fn resolve(&self, template: &Template) -> Result<Value, Failure> {
        match template {
            Template::Value(v) => Ok(v.clone()),
            Template::Expr(expr) => self.eval(expr, 0),
            Template::Object(entries) => {
                let mut resolved = serde_json::Map::new();
                for (k, t) in entries {
                    resolved.insert(k.clone(), self.resolve(t)?);
                }
                Ok(Value::Object(resolved))
            }
            Template::Array(items) => {
                let resolved: Result<Vec<Value>, _> =
                    items.iter().map(|t| self.resolve(t)).collect();
                Ok(Value::Array(resolved?))
            }
        }
    }

    /// Evaluate one expression. `level` counts enclosing intrinsic calls.
    pub fn eval(&self, expr: &Expr, level: usize) -> Result<Value, Failure> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Path(path) => self.lookup(path).cloned(),
            Expr::Format { template, args } => {
                if level >= MAX_RESOLUTION_DEPTH {
                    return Err(Failure::new(
                        ErrorKind::ResolutionDepthExceeded,
                        format!(
                            "expression nesting exceeds {} levels",
                            MAX_RESOLUTION_DEPTH
                        ),
                    ));
                }
                let mut pieces = template.split("{}");
                let mut out = pieces.next().unwrap_or_default().to_string();
                for (arg, piece) in args.iter().zip(pieces) {
                    let value = self.eval(arg, level + 1)?;
                    out.push_str(&value_to_string(&value));
                    out.push_str(piece);
                }
                Ok(Value::String(out))
            }
        }
    }

    fn lookup(&self, path: &PathRef) -> Result<&'a Value, Failure> {
        let mut current = match path.root {
            Root::Context => self.context,
            Root::Execution => self.meta,
        };
        for segment in &path.segments {
            current = navigate_segment(current, segment).ok_or_else(|| {
                Failure::path_not_found(format!(
                    "path '{}': cannot resolve segment '{}'",
                    path.source, segment
                ))
            })?;
        }
        Ok(current)
    }
}

/// Navigate one segment of a path through a JSON value.
fn navigate_segment<'v>(value: &'v Value, segment: &Segment) -> Option<&'v Value> {
    match segment {
        Segment::Key(k) => value.as_object()?.get(k),
        Segment::Index(i) => value.as_array()?.get(*i),
    }
}

/// Convert a JSON value to its string form for `States.Format` substitution.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Objects and arrays get JSON serialized
        other => serde_json::to_string(other).unwrap_or_else(|_| "null".to_string()),
    }
}
