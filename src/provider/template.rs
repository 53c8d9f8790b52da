//! Frontend rule templates.
//!
//! # Responsibilities
//! - Compile rule templates (`Host:{{.ServiceName}}.{{.Domain}}`) once
//! - Render them per service against a fixed context
//! - Expose a closed set of helper functions to templates
//!
//! # Syntax
//! ```text
//! text        literal text, copied as-is
//! {{ expr }}  action, replaced by the value of expr
//! {{- expr }} trims whitespace before the action ({{ expr -}} after it)
//!
//! expr     := operand | helper operand*
//! operand  := .Field | "string" | `raw string` | ( expr )
//! fields   := .ServiceName .Domain .Attributes
//! helpers  := getTag key tags default
//!             lookupTag key tags default   (alias of getTag)
//!             getAttribute key tags default (prefix-scoped)
//!             hasTag name tags
//! ```
//!
//! # Design Decisions
//! - Unknown helpers and wrong helper arity are compile errors
//! - Unknown fields and argument type mismatches are render errors
//! - No user code runs: helpers are a fixed enum, not a lookup table

use std::fmt::Write as _;
use std::str::FromStr;

use thiserror::Error;

use crate::provider::tags::{get_tag, has_tag, TagAccessor};

/// Errors raised while compiling or rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unclosed action starting at byte {0}")]
    UnclosedAction(usize),

    #[error("empty action at byte {0}")]
    EmptyAction(usize),

    #[error("unterminated string literal at byte {0}")]
    UnterminatedString(usize),

    #[error("unexpected {token:?} at byte {offset}")]
    UnexpectedToken { token: String, offset: usize },

    #[error("function {0:?} not defined")]
    UnknownFunction(String),

    #[error("wrong number of args for {name}: want {want} got {got}")]
    Arity {
        name: String,
        want: usize,
        got: usize,
    },

    #[error("can't evaluate field {0:?}")]
    UnknownField(String),

    #[error("wrong type for argument {index} of {name}: expected {expected}")]
    ArgumentType {
        name: String,
        index: usize,
        expected: &'static str,
    },
}

impl TemplateError {
    /// True for errors produced while executing an already compiled template.
    pub fn is_render_error(&self) -> bool {
        matches!(
            self,
            TemplateError::UnknownField(_) | TemplateError::ArgumentType { .. }
        )
    }
}

/// Values visible to a rendering template.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub service_name: &'a str,
    pub domain: &'a str,
    pub attributes: &'a [String],
    pub accessor: &'a TagAccessor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Helper {
    GetTag,
    GetAttribute,
    HasTag,
}

impl Helper {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "getTag" | "lookupTag" => Some(Helper::GetTag),
            "getAttribute" => Some(Helper::GetAttribute),
            "hasTag" => Some(Helper::HasTag),
            _ => None,
        }
    }

    fn arity(self) -> usize {
        match self {
            Helper::GetTag | Helper::GetAttribute => 3,
            Helper::HasTag => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Field(String),
    Literal(String),
    Call {
        name: String,
        helper: Helper,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Action(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Field(String),
    Str(String),
    Ident(String),
    LParen,
    RParen,
}

#[derive(Debug)]
enum Value<'a> {
    Str(String),
    List(&'a [String]),
    Bool(bool),
}

/// A compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Compile `source`.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut nodes = Vec::new();
        let mut rest = 0;
        let mut trim_next_text = false;

        while let Some(found) = source[rest..].find("{{") {
            let open = rest + found;
            let mut body_start = open + 2;
            let trim_before = source[body_start..]
                .strip_prefix('-')
                .is_some_and(|r| r.starts_with(char::is_whitespace));
            if trim_before {
                body_start += 1;
            }

            let close = find_action_end(source, body_start).ok_or(TemplateError::UnclosedAction(open))?;
            let mut body_end = close;
            let trim_after = close > body_start + 1
                && source[..close].ends_with('-')
                && source[..close - 1].ends_with(char::is_whitespace);
            if trim_after {
                body_end -= 1;
            }

            push_text(&mut nodes, &source[rest..open], trim_next_text, trim_before);
            nodes.push(Node::Action(parse_action(&source[body_start..body_end], body_start, open)?));

            trim_next_text = trim_after;
            rest = close + 2;
        }
        push_text(&mut nodes, &source[rest..], trim_next_text, false);

        Ok(Self {
            source: source.to_string(),
            nodes,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render against `ctx`.
    pub fn render(&self, ctx: &RuleContext<'_>) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(expr) => match eval(expr, ctx)? {
                    Value::Str(s) => out.push_str(&s),
                    Value::Bool(b) => {
                        let _ = write!(out, "{}", b);
                    }
                    Value::List(items) => {
                        let _ = write!(out, "[{}]", items.join(" "));
                    }
                },
            }
        }
        Ok(out)
    }
}

impl FromStr for Template {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Template::parse(s)
    }
}

fn push_text(nodes: &mut Vec<Node>, text: &str, trim_start: bool, trim_end: bool) {
    let mut text = text;
    if trim_start {
        text = text.trim_start();
    }
    if trim_end {
        text = text.trim_end();
    }
    if !text.is_empty() {
        nodes.push(Node::Text(text.to_string()));
    }
}

/// Byte offset of the `}}` closing the action whose body starts at `from`.
fn find_action_end(source: &str, from: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut i = from;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

fn parse_action(body: &str, offset: usize, open: usize) -> Result<Expr, TemplateError> {
    let tokens = tokenize(body, offset)?;
    if tokens.is_empty() {
        return Err(TemplateError::EmptyAction(open));
    }
    let mut iter = tokens.into_iter().peekable();
    let expr = parse_command(&mut iter, false, open)?;
    Ok(expr)
}

type TokenIter = std::iter::Peekable<std::vec::IntoIter<(Token, usize)>>;

fn parse_command(tokens: &mut TokenIter, in_parens: bool, open: usize) -> Result<Expr, TemplateError> {
    let mut head: Option<(String, Helper)> = None;
    let mut operands = Vec::new();

    loop {
        let Some((token, at)) = tokens.next() else {
            if in_parens {
                return Err(TemplateError::UnexpectedToken {
                    token: "end of action".into(),
                    offset: open,
                });
            }
            break;
        };
        match token {
            Token::RParen if in_parens => break,
            Token::RParen => {
                return Err(TemplateError::UnexpectedToken {
                    token: ")".into(),
                    offset: at,
                })
            }
            Token::Ident(name) => {
                let helper = Helper::lookup(&name).ok_or_else(|| TemplateError::UnknownFunction(name.clone()))?;
                if head.is_some() || !operands.is_empty() {
                    // A helper name in argument position is a niladic call.
                    return Err(TemplateError::Arity {
                        name,
                        want: helper.arity(),
                        got: 0,
                    });
                }
                head = Some((name, helper));
            }
            Token::Field(name) => operands.push(Expr::Field(name)),
            Token::Str(s) => operands.push(Expr::Literal(s)),
            Token::LParen => operands.push(parse_command(tokens, true, open)?),
        }
    }

    match head {
        Some((name, helper)) => {
            if operands.len() != helper.arity() {
                return Err(TemplateError::Arity {
                    name,
                    want: helper.arity(),
                    got: operands.len(),
                });
            }
            Ok(Expr::Call {
                name,
                helper,
                args: operands,
            })
        }
        None => {
            let mut operands = operands.into_iter();
            match (operands.next(), operands.next()) {
                (Some(expr), None) => Ok(expr),
                (None, _) => Err(TemplateError::EmptyAction(open)),
                (Some(_), Some(extra)) => Err(TemplateError::UnexpectedToken {
                    token: format!("{:?}", extra),
                    offset: open,
                }),
            }
        }
    }
}

fn tokenize(body: &str, offset: usize) -> Result<Vec<(Token, usize)>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = body.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        let at = offset + i;
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push((Token::LParen, at));
            }
            ')' => {
                chars.next();
                tokens.push((Token::RParen, at));
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, '\\')) => value.push('\\'),
                            Some((_, '"')) => value.push('"'),
                            Some((_, other)) => {
                                return Err(TemplateError::UnexpectedToken {
                                    token: format!("\\{}", other),
                                    offset: at,
                                })
                            }
                            None => break,
                        },
                        c => value.push(c),
                    }
                }
                if !closed {
                    return Err(TemplateError::UnterminatedString(at));
                }
                tokens.push((Token::Str(value), at));
            }
            '`' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '`' {
                        closed = true;
                        break;
                    }
                    value.push(c);
                }
                if !closed {
                    return Err(TemplateError::UnterminatedString(at));
                }
                tokens.push((Token::Str(value), at));
            }
            '.' => {
                chars.next();
                let name = take_word(&mut chars);
                tokens.push((Token::Field(name), at));
            }
            c if c.is_alphabetic() || c == '_' => {
                let name = take_word(&mut chars);
                tokens.push((Token::Ident(name), at));
            }
            other => {
                return Err(TemplateError::UnexpectedToken {
                    token: other.to_string(),
                    offset: at,
                })
            }
        }
    }
    Ok(tokens)
}

fn take_word(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> String {
    let mut word = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
            chars.next();
        } else {
            break;
        }
    }
    word
}

fn eval<'a>(expr: &Expr, ctx: &RuleContext<'a>) -> Result<Value<'a>, TemplateError> {
    match expr {
        Expr::Literal(s) => Ok(Value::Str(s.clone())),
        Expr::Field(name) => match name.as_str() {
            "ServiceName" => Ok(Value::Str(ctx.service_name.to_string())),
            "Domain" => Ok(Value::Str(ctx.domain.to_string())),
            "Attributes" => Ok(Value::List(ctx.attributes)),
            other => Err(TemplateError::UnknownField(format!(".{}", other))),
        },
        Expr::Call { name, helper, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, ctx)?);
            }
            match helper {
                Helper::GetTag => {
                    let key = expect_str(&values, 0, name)?;
                    let tags = expect_list(&values, 1, name)?;
                    let default = expect_str(&values, 2, name)?;
                    Ok(Value::Str(get_tag(key, tags, default).to_string()))
                }
                Helper::GetAttribute => {
                    let key = expect_str(&values, 0, name)?;
                    let tags = expect_list(&values, 1, name)?;
                    let default = expect_str(&values, 2, name)?;
                    Ok(Value::Str(ctx.accessor.attribute(key, tags, default).to_string()))
                }
                Helper::HasTag => {
                    let tag = expect_str(&values, 0, name)?;
                    let tags = expect_list(&values, 1, name)?;
                    Ok(Value::Bool(has_tag(tag, tags)))
                }
            }
        }
    }
}

fn expect_str<'v>(values: &'v [Value<'_>], index: usize, name: &str) -> Result<&'v str, TemplateError> {
    match values.get(index) {
        Some(Value::Str(s)) => Ok(s.as_str()),
        _ => Err(TemplateError::ArgumentType {
            name: name.to_string(),
            index,
            expected: "string",
        }),
    }
}

fn expect_list<'a>(values: &[Value<'a>], index: usize, name: &str) -> Result<&'a [String], TemplateError> {
    match values.get(index) {
        Some(Value::List(items)) => Ok(*items),
        _ => Err(TemplateError::ArgumentType {
            name: name.to_string(),
            index,
            expected: "list",
        }),
    }
}

/// Outcome of resolving a service's frontend rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendRule {
    pub rule: String,
    /// Set when the service's own `frontend.rule` failed and the default was used.
    pub override_error: Option<TemplateError>,
}

/// Resolves the routing rule for each service.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    default_rule: Template,
    accessor: TagAccessor,
    domain: String,
}

impl RuleEngine {
    /// Compile the default rule. A failure here is fatal for startup.
    pub fn new(default_rule: &str, accessor: TagAccessor, domain: impl Into<String>) -> Result<Self, TemplateError> {
        Ok(Self {
            default_rule: Template::parse(default_rule)?,
            accessor,
            domain: domain.into(),
        })
    }

    pub fn accessor(&self) -> &TagAccessor {
        &self.accessor
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Render the rule for one service.
    ///
    /// A `frontend.rule` attribute is itself a template and takes precedence.
    /// If it fails, the default rule is used and the failure is returned in
    /// [`FrontendRule::override_error`]. `Err` means the default rule itself
    /// failed to render.
    pub fn frontend_rule(&self, service_name: &str, attributes: &[String]) -> Result<FrontendRule, TemplateError> {
        let ctx = RuleContext {
            service_name,
            domain: &self.domain,
            attributes,
            accessor: &self.accessor,
        };

        let override_error = match self.accessor.find("frontend.rule", attributes) {
            Some(custom) if !custom.is_empty() => {
                match Template::parse(custom).and_then(|tmpl| tmpl.render(&ctx)) {
                    Ok(rule) => {
                        return Ok(FrontendRule {
                            rule,
                            override_error: None,
                        })
                    }
                    Err(e) => Some(e),
                }
            }
            _ => None,
        };

        let rule = self.default_rule.render(&ctx)?;
        Ok(FrontendRule { rule, override_error })
    }
}
