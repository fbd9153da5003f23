//! Expression Parser
//!
//! A single composed regular expression tokenizes source text; a frame
//! stack assembles tokens into trees by operator precedence; a separate
//! pass groups indented lines into nested blocks.
//!
//! # How It Works
//!
//! 1. The tokenizer is one alternation tried in order: calls with
//!    balanced parentheses, block literals with balanced braces, commas,
//!    whitespace, strings, numbers with an optional unit suffix, operator
//!    runs, and bare tokens with dotted tails. Balanced-delimiter
//!    patterns are generated to a fixed nesting depth; the captured
//!    argument and body text re-enters the parser recursively.
//! 2. Assembly keeps a stack of open operator frames. A new operator
//!    folds every frame that binds at least as tightly (equal precedence
//!    folds left to right), then opens its own frame over the folded
//!    operand. A comma folds everything and starts a fresh expression.
//! 3. A leading operator that is a selector combinator switches the
//!    expression into selector mode: token text accumulates into one
//!    selector node instead of raising a missing-operand error.
//! 4. Sources spanning lines are grouped by indentation: the first line
//!    fixes the baseline, the first deeper line fixes the unit, and each
//!    one-step indent opens a block over the previous line's expression.
//!
//! Numbers with a leading sign directly after an operand re-tokenize as
//! an operator and an unsigned number, so `1-2` subtracts instead of
//! producing two literals.

use std::rc::Rc;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use super::ast::{Ast, AstList};
use super::operators::{self, DEFAULT_PRECEDENCE};

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("left part is missing for {operator} operator")]
    MissingLeft { operator: String },
    #[error("right part is missing for {operator} operator")]
    MissingRight { operator: String },
    #[error("unexpected token at `{fragment}`")]
    UnknownToken { fragment: String },
    #[error("unbalanced delimiter at `{fragment}`")]
    Unbalanced { fragment: String },
    #[error("line `{line}` indents deeper than one new level")]
    OverIndent { line: String },
    #[error("line `{line}` dedents below the baseline")]
    BadDedent { line: String },
    #[error("block parameters were given, but no block opens on the next line")]
    DanglingParams,
}

// ----------------------------------------------------------------------------
// Tokenizer
// ----------------------------------------------------------------------------

/// A delimiter pair balanced to a fixed nesting depth, as a non-capturing
/// pattern matching one character or one balanced group.
fn balanced(open: char, close: char, depth: usize) -> String {
    let class = format!("[^{}{}]", open, close);
    let mut nested = format!(r"\{}{}*\{}", open, class, close);
    for _ in 1..depth {
        nested = format!(r"\{}(?:{}|{})*\{}", open, class, nested, close);
    }
    format!("(?:{}|{})", class, nested)
}

/// The compiled token patterns. Built once per engine.
pub struct Scanner {
    tokenize: Regex,
    token_only: Regex,
    variable: Regex,
    line: Regex,
}

impl Scanner {
    pub fn new() -> Self {
        let round = balanced('(', ')', 4);
        let curly = balanced('{', '}', 4);
        let pattern = format!(
            concat!(
                r"(?:(?P<fn_tail>\.)\s*)?(?P<fn>[-_a-zA-Z0-9]*)\s*\((?P<fn_args>{round}*)\)",
                r"|\{{\s*(?:\|\s*(?P<block_params>[^|]*)\|\s*)?(?P<block>{curly}*)\s*\}}",
                r"|(?P<comma>\s*,\s*)",
                r"|(?P<whitespace>\s+)",
                r"|'(?P<sstring>(?:[^'\\]|\\.)*)'",
                r#"|"(?P<dstring>(?:[^"\\]|\\.)*)""#,
                r"|(?P<number>[-+]?(?:\d+\.\d*|\d*\.\d+|\d+))(?P<unit>em|px|pt|%|fr|deg)?",
                r"|(?P<operator>[-+]|[/%^~=><*!|&$]+)",
                r"|(?:(?P<token_tail>\.)\s*)?(?P<token>[^$,\s/().{{}}]+)",
            ),
            round = round,
            curly = curly,
        );
        Self {
            tokenize: Regex::new(&pattern).expect("token pattern compiles"),
            token_only: Regex::new(r"^(?:(?P<tail>\.)\s*)?(?P<text>[^$,\s/().{}]+)")
                .expect("token fallback compiles"),
            variable: Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9_.\-\[\]]*$")
                .expect("variable pattern compiles"),
            line: Regex::new(r"^([ \t]*)(.*?)\s*(?:\|([^|]*)\|\s*)?$")
                .expect("line pattern compiles"),
        }
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Call { tail: bool, name: String, args: String },
    Block { params: Option<String>, body: String },
    Comma,
    Whitespace,
    Str(String),
    Number { value: f64, signed: Option<char> },
    Operator(String),
    Ident { tail: bool, text: String },
}

fn scan(scanner: &Scanner, source: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < source.len() {
        let caps = match scanner.tokenize.captures_at(source, pos) {
            Some(caps) => caps,
            None => return Err(gap_error(&source[pos..])),
        };
        let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((pos, pos));
        if whole.0 > pos {
            return Err(gap_error(&source[pos..whole.0]));
        }
        pos = whole.1;

        if let Some(args) = caps.name("fn_args") {
            let name = caps.name("fn").map_or("", |m| m.as_str());
            if !name.is_empty() && name.chars().all(|c| c == '-' || c == '+') {
                // A bare sign before a parenthesized group is an
                // operator, not a kebab-case call name.
                tokens.push(Token::Operator(name.to_string()));
                pos = args.start() - 1;
                continue;
            }
            tokens.push(Token::Call {
                tail: caps.name("fn_tail").is_some(),
                name: name.to_string(),
                args: args.as_str().to_string(),
            });
        } else if let Some(body) = caps.name("block") {
            tokens.push(Token::Block {
                params: caps.name("block_params").map(|m| m.as_str().to_string()),
                body: body.as_str().to_string(),
            });
        } else if caps.name("comma").is_some() {
            tokens.push(Token::Comma);
        } else if caps.name("whitespace").is_some() {
            tokens.push(Token::Whitespace);
        } else if let Some(text) = caps.name("sstring").or_else(|| caps.name("dstring")) {
            tokens.push(Token::Str(text.as_str().to_string()));
        } else if let Some(number) = caps.name("number") {
            // A number running straight into identifier characters is a
            // bare token, not a literal.
            let tail_char = source[whole.1..].chars().next();
            if tail_char.map_or(false, |c| c.is_ascii_alphanumeric() || c == '.') {
                let start = number.start();
                match scanner.token_only.captures(&source[start..]) {
                    Some(fallback) => {
                        let text = &fallback["text"];
                        tokens.push(Token::Ident {
                            tail: fallback.name("tail").is_some(),
                            text: text.to_string(),
                        });
                        pos = start + fallback.get(0).map_or(0, |m| m.end());
                    }
                    None => return Err(gap_error(&source[start..])),
                }
            } else {
                let text = number.as_str();
                let value: f64 = text
                    .parse()
                    .map_err(|_| gap_error(text))?;
                tokens.push(Token::Number {
                    value,
                    signed: text.chars().next().filter(|c| *c == '-' || *c == '+'),
                });
            }
        } else if let Some(op) = caps.name("operator") {
            tokens.push(Token::Operator(op.as_str().to_string()));
        } else if let Some(text) = caps.name("token") {
            tokens.push(Token::Ident {
                tail: caps.name("token_tail").is_some(),
                text: text.as_str().to_string(),
            });
        }
    }
    Ok(split_signs(tokens))
}

fn gap_error(fragment: &str) -> ParseError {
    let fragment: String = fragment.chars().take(16).collect();
    if fragment.contains(['(', ')', '{', '}']) {
        ParseError::Unbalanced { fragment }
    } else {
        ParseError::UnknownToken { fragment }
    }
}

/// `1-2` tokenizes as a literal 1 and a signed literal -2; when a signed
/// number directly follows an operand, the sign splits back out into an
/// operator so the expression subtracts.
fn split_signs(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token {
            Token::Number { value, signed: Some(sign) } if follows_operand(&out) => {
                out.push(Token::Operator(sign.to_string()));
                out.push(Token::Number { value: value.abs(), signed: None });
            }
            other => out.push(other),
        }
    }
    out
}

fn follows_operand(tokens: &[Token]) -> bool {
    for token in tokens.iter().rev() {
        match token {
            Token::Whitespace => continue,
            Token::Number { .. }
            | Token::Str(_)
            | Token::Ident { .. }
            | Token::Call { .. }
            | Token::Block { .. } => return true,
            _ => return false,
        }
    }
    false
}

// ----------------------------------------------------------------------------
// Assembly
// ----------------------------------------------------------------------------

struct Frame {
    name: String,
    precedence: u32,
    left: Rc<Ast>,
}

struct Assembler<'s> {
    scanner: &'s Scanner,
    results: Vec<Rc<Ast>>,
    frames: Vec<Frame>,
    current: Option<Rc<Ast>>,
    selector: Option<String>,
    after_call: bool,
    last_whitespace: bool,
}

impl<'s> Assembler<'s> {
    fn new(scanner: &'s Scanner) -> Self {
        Self {
            scanner,
            results: Vec::new(),
            frames: Vec::new(),
            current: None,
            selector: None,
            after_call: false,
            last_whitespace: false,
        }
    }

    fn run(mut self, tokens: Vec<Token>) -> Result<AstList, ParseError> {
        for token in tokens {
            let whitespace = matches!(token, Token::Whitespace);
            match token {
                Token::Whitespace => {}
                Token::Comma => self.finish()?,
                Token::Number { value, .. } => self.operand(Ast::number(value))?,
                Token::Str(text) => self.operand(Ast::string(&text))?,
                Token::Operator(text) => self.operator(&text)?,
                Token::Ident { tail, text } => self.ident(tail, &text)?,
                Token::Call { tail, name, args } => self.call(tail, &name, &args)?,
                Token::Block { params, body } => self.block(params.as_deref(), &body)?,
            }
            self.last_whitespace = whitespace;
        }
        self.finish()?;
        Ok(self.results)
    }

    /// Fold open frames whose operator binds at least as tightly.
    fn reduce(&mut self, limit: u32) -> Result<(), ParseError> {
        while let Some(frame) = self.frames.pop() {
            if frame.precedence > limit {
                self.frames.push(frame);
                break;
            }
            let right = self.current.take().ok_or(ParseError::MissingRight {
                operator: frame.name.clone(),
            })?;
            self.current = Some(Ast::call(&frame.name, vec![frame.left, right]));
        }
        Ok(())
    }

    /// Close the expression in progress and push it to the results.
    fn finish(&mut self) -> Result<(), ParseError> {
        if let Some(text) = self.selector.take() {
            self.results.push(Rc::new(Ast::Selector(Rc::from(text.as_str()))));
        }
        self.reduce(u32::MAX)?;
        if let Some(expr) = self.current.take() {
            self.results.push(expr);
        }
        self.after_call = false;
        Ok(())
    }

    fn operand(&mut self, ast: Rc<Ast>) -> Result<(), ParseError> {
        if self.selector.is_some() || self.current.is_some() {
            // Juxtaposed operands sequence like a comma would.
            self.finish()?;
        }
        self.current = Some(ast);
        self.after_call = false;
        Ok(())
    }

    fn operator(&mut self, text: &str) -> Result<(), ParseError> {
        if let Some(selector) = &mut self.selector {
            selector.push(' ');
            selector.push_str(text);
            return Ok(());
        }
        if self.current.is_none() {
            if let Some(frame) = self.frames.last() {
                return Err(ParseError::MissingRight { operator: frame.name.clone() });
            }
            if operators::is_combinator(text) {
                self.selector = Some(text.to_string());
                return Ok(());
            }
            return Err(ParseError::MissingLeft { operator: text.to_string() });
        }
        let precedence = operators::precedence(text).unwrap_or(DEFAULT_PRECEDENCE);
        self.reduce(precedence)?;
        let left = self.current.take().ok_or(ParseError::MissingLeft {
            operator: text.to_string(),
        })?;
        self.frames.push(Frame { name: text.to_string(), precedence, left });
        self.after_call = false;
        Ok(())
    }

    fn ident(&mut self, tail: bool, text: &str) -> Result<(), ParseError> {
        if let Some(selector) = &mut self.selector {
            if !(tail && !self.last_whitespace) {
                selector.push(' ');
            }
            if tail {
                selector.push('.');
            }
            selector.push_str(text);
            return Ok(());
        }
        if tail {
            if let Some(current) = &self.current {
                if let Ast::Variable { path } = &**current {
                    let merged = format!("{}.{}", path, text);
                    self.current = Some(Ast::variable(&merged));
                    return Ok(());
                }
            }
        }
        if !self.scanner.variable.is_match(text) {
            self.finish()?;
            let mut selector = String::new();
            if tail {
                selector.push('.');
            }
            selector.push_str(text);
            self.selector = Some(selector);
            return Ok(());
        }
        self.operand(Ast::variable(text))
    }

    fn call(&mut self, tail: bool, name: &str, args_text: &str) -> Result<(), ParseError> {
        let mut args = parse_tokens(self.scanner, args_text)?;
        if name.is_empty() {
            // A bare parenthesized group.
            let expr = if args.len() == 1 {
                args.remove(0)
            } else {
                Ast::call(",", args)
            };
            return self.operand(expr);
        }
        if tail {
            let prefix = self.current.take().ok_or(ParseError::MissingLeft {
                operator: format!(".{}", name),
            })?;
            args.insert(0, prefix);
        } else if self.selector.is_some() || self.current.is_some() {
            self.finish()?;
        }
        self.current = Some(Ast::call(name, args));
        self.after_call = true;
        Ok(())
    }

    fn block(&mut self, params_text: Option<&str>, body_text: &str) -> Result<(), ParseError> {
        let body = parse_tokens(self.scanner, body_text)?;
        let params = match params_text {
            Some(text) => parameter_names(self.scanner, text)?,
            None => Vec::new(),
        };
        let block = Rc::new(Ast::Block { params, body });
        match self.current.take() {
            Some(expr) => {
                self.current = Some(attach_trailing(expr, block));
                self.after_call = false;
            }
            None => {
                self.current = Some(block);
            }
        }
        Ok(())
    }
}

/// Attach a block to the expression before it: calls gain it as a final
/// argument; a bare token becomes a call taking the block, with a dotted
/// prefix contributing the receiver as the first argument.
fn attach_trailing(expr: Rc<Ast>, block: Rc<Ast>) -> Rc<Ast> {
    match &*expr {
        Ast::Call { name, args } => {
            let mut args = args.clone();
            args.push(block);
            Ast::call(name, args)
        }
        Ast::Variable { path } => match path.rsplit_once('.') {
            Some((prefix, method)) => {
                Ast::call(method, vec![Ast::variable(prefix), block])
            }
            None => Ast::call(path, vec![block]),
        },
        _ => Ast::call(",", vec![expr, block]),
    }
}

fn parameter_names(scanner: &Scanner, text: &str) -> Result<Vec<Rc<str>>, ParseError> {
    let parsed = parse_tokens(scanner, text)?;
    Ok(parsed
        .iter()
        .filter_map(|ast| match &**ast {
            Ast::Variable { path } => Some(path.clone()),
            _ => None,
        })
        .collect())
}

fn parse_tokens(scanner: &Scanner, source: &str) -> Result<AstList, ParseError> {
    let tokens = scan(scanner, source)?;
    Assembler::new(scanner).run(tokens)
}

// ----------------------------------------------------------------------------
// Multiline pass
// ----------------------------------------------------------------------------

struct Level {
    opener: Rc<Ast>,
    params: Vec<Rc<str>>,
    body: Vec<Rc<Ast>>,
}

fn close_level(stack: &mut Vec<Level>, results: &mut Vec<Rc<Ast>>) {
    if let Some(level) = stack.pop() {
        let block = Rc::new(Ast::Block { params: level.params, body: level.body });
        let rebuilt = attach_trailing(level.opener, block);
        match stack.last_mut() {
            Some(parent) => parent.body.push(rebuilt),
            None => results.push(rebuilt),
        }
    }
}

fn multiline(scanner: &Scanner, source: &str) -> Result<AstList, ParseError> {
    let mut baseline: Option<String> = None;
    let mut unit: Option<String> = None;
    let mut level = 0usize;
    let mut results: Vec<Rc<Ast>> = Vec::new();
    let mut stack: Vec<Level> = Vec::new();
    let mut pending_params: Option<Vec<Rc<str>>> = None;

    for raw in source.lines() {
        let caps = match scanner.line.captures(raw) {
            Some(caps) => caps,
            None => continue,
        };
        let indent = caps.get(1).map_or("", |m| m.as_str());
        let content = caps.get(2).map_or("", |m| m.as_str());
        let params = caps.get(3).map(|m| m.as_str().to_string());
        if content.is_empty() {
            continue;
        }

        let depth = match &baseline {
            None => {
                baseline = Some(indent.to_string());
                0
            }
            Some(base) => {
                let extras = indent
                    .strip_prefix(base.as_str())
                    .ok_or_else(|| ParseError::BadDedent { line: content.to_string() })?;
                if extras.is_empty() {
                    0
                } else {
                    match &unit {
                        None => {
                            unit = Some(extras.to_string());
                            1
                        }
                        Some(unit) => {
                            if extras.len() % unit.len() != 0
                                || !extras
                                    .as_bytes()
                                    .chunks(unit.len())
                                    .all(|chunk| chunk == unit.as_bytes())
                            {
                                return Err(ParseError::OverIndent {
                                    line: content.to_string(),
                                });
                            }
                            extras.len() / unit.len()
                        }
                    }
                }
            }
        };

        let diff = depth as isize - level as isize;
        if diff > 1 {
            return Err(ParseError::OverIndent { line: content.to_string() });
        }
        if diff == 1 {
            let host = match stack.last_mut() {
                Some(parent) => parent.body.pop(),
                None => results.pop(),
            };
            let opener = host.ok_or_else(|| ParseError::OverIndent {
                line: content.to_string(),
            })?;
            stack.push(Level {
                opener,
                params: pending_params.take().unwrap_or_default(),
                body: Vec::new(),
            });
        } else {
            for _ in 0..(-diff) {
                close_level(&mut stack, &mut results);
            }
            if pending_params.is_some() {
                return Err(ParseError::DanglingParams);
            }
        }
        level = depth;

        pending_params = match params {
            Some(text) => Some(parameter_names(scanner, &text)?),
            None => None,
        };

        let mut exprs = parse_tokens(scanner, content)?;
        let expr = match exprs.len() {
            0 => continue,
            1 => exprs.remove(0),
            _ => Ast::call(",", exprs),
        };
        match stack.last_mut() {
            Some(top) => top.body.push(expr),
            None => results.push(expr),
        }
    }

    if pending_params.is_some() {
        return Err(ParseError::DanglingParams);
    }
    while !stack.is_empty() {
        close_level(&mut stack, &mut results);
    }
    Ok(results)
}

/// Parse a source string into a list of expression trees.
pub fn parse(scanner: &Scanner, source: &str) -> Result<AstList, ParseError> {
    debug!(len = source.len(), "parse");
    if source.contains('\n') {
        multiline(scanner, source)
    } else {
        parse_tokens(scanner, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(source: &str) -> Rc<Ast> {
        let scanner = Scanner::new();
        let mut parsed = parse(&scanner, source).unwrap_or_else(|e| {
            panic!("parse failed for {:?}: {}", source, e);
        });
        assert_eq!(parsed.len(), 1, "expected one expression from {:?}", source);
        parsed.remove(0)
    }

    fn err(source: &str) -> ParseError {
        let scanner = Scanner::new();
        parse(&scanner, source).unwrap_err()
    }

    #[test]
    fn literals_and_variables() {
        assert_eq!(one("42"), Ast::number(42.0));
        assert_eq!(one("'hi'"), Ast::string("hi"));
        assert_eq!(one("\"there\""), Ast::string("there"));
        assert_eq!(one("post.author.name"), Ast::variable("post.author.name"));
    }

    #[test]
    fn unit_suffix_tokenizes_with_the_number() {
        assert_eq!(
            one("16px + 4"),
            Ast::call("+", vec![Ast::number(16.0), Ast::number(4.0)])
        );
        assert_eq!(one("50%"), Ast::number(50.0));
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        assert_eq!(
            one("2 + 3 * 4"),
            Ast::call(
                "+",
                vec![
                    Ast::number(2.0),
                    Ast::call("*", vec![Ast::number(3.0), Ast::number(4.0)])
                ]
            )
        );
    }

    #[test]
    fn equal_precedence_folds_left() {
        assert_eq!(
            one("1 - 2 - 3"),
            Ast::call(
                "-",
                vec![
                    Ast::call("-", vec![Ast::number(1.0), Ast::number(2.0)]),
                    Ast::number(3.0)
                ]
            )
        );
    }

    #[test]
    fn mixed_precedence_chain() {
        assert_eq!(
            one("1 + 2 * 3 - 4"),
            Ast::call(
                "-",
                vec![
                    Ast::call(
                        "+",
                        vec![
                            Ast::number(1.0),
                            Ast::call("*", vec![Ast::number(2.0), Ast::number(3.0)])
                        ]
                    ),
                    Ast::number(4.0)
                ]
            )
        );
        assert_eq!(
            one("10 - 2 * 3"),
            Ast::call(
                "-",
                vec![
                    Ast::number(10.0),
                    Ast::call("*", vec![Ast::number(2.0), Ast::number(3.0)])
                ]
            )
        );
    }

    #[test]
    fn caret_is_looser_than_plus() {
        assert_eq!(
            one("1 ^ 2 + 3"),
            Ast::call(
                "^",
                vec![
                    Ast::number(1.0),
                    Ast::call("+", vec![Ast::number(2.0), Ast::number(3.0)])
                ]
            )
        );
    }

    #[test]
    fn unspaced_subtraction_splits_the_sign() {
        assert_eq!(one("1-2-3"), one("1 - 2 - 3"));
        assert_eq!(one("-5"), Ast::number(-5.0));
        assert_eq!(
            one("a -1"),
            Ast::call("-", vec![Ast::variable("a"), Ast::number(1.0)])
        );
    }

    #[test]
    fn assignment_is_loosest() {
        assert_eq!(
            one("a = b + 1"),
            Ast::call(
                "=",
                vec![
                    Ast::variable("a"),
                    Ast::call("+", vec![Ast::variable("b"), Ast::number(1.0)])
                ]
            )
        );
    }

    #[test]
    fn calls_and_groups() {
        assert_eq!(
            one("sum(a, b * 2)"),
            Ast::call(
                "sum",
                vec![
                    Ast::variable("a"),
                    Ast::call("*", vec![Ast::variable("b"), Ast::number(2.0)])
                ]
            )
        );
        assert_eq!(
            one("(1 + 2) * 3"),
            Ast::call(
                "*",
                vec![
                    Ast::call("+", vec![Ast::number(1.0), Ast::number(2.0)]),
                    Ast::number(3.0)
                ]
            )
        );
        assert_eq!(one("now()"), Ast::call("now", vec![]));
    }

    #[test]
    fn dotted_call_receives_the_prefix() {
        assert_eq!(
            one("list.filter(x)"),
            Ast::call("filter", vec![Ast::variable("list"), Ast::variable("x")])
        );
        assert_eq!(
            one("items.count()"),
            Ast::call("count", vec![Ast::variable("items")])
        );
    }

    #[test]
    fn trailing_block_sugar() {
        assert_eq!(
            one("each { |item| item + 1 }"),
            Ast::call(
                "each",
                vec![Ast::block(
                    vec!["item"],
                    vec![Ast::call("+", vec![Ast::variable("item"), Ast::number(1.0)])]
                )]
            )
        );
        assert_eq!(
            one("list.filter { |x| x > 1 }"),
            Ast::call(
                "filter",
                vec![
                    Ast::variable("list"),
                    Ast::block(
                        vec!["x"],
                        vec![Ast::call(">", vec![Ast::variable("x"), Ast::number(1.0)])]
                    )
                ]
            )
        );
        assert_eq!(
            one("update(a) { a * 2 }"),
            Ast::call(
                "update",
                vec![
                    Ast::variable("a"),
                    Ast::block(
                        vec![],
                        vec![Ast::call("*", vec![Ast::variable("a"), Ast::number(2.0)])]
                    )
                ]
            )
        );
    }

    #[test]
    fn comma_sequences() {
        let scanner = Scanner::new();
        let parsed = parse(&scanner, "a, b + 1").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], Ast::variable("a"));
        assert_eq!(
            parsed[1],
            Ast::call("+", vec![Ast::variable("b"), Ast::number(1.0)])
        );
    }

    #[test]
    fn selectors_accumulate_text() {
        assert_eq!(one("$ ul > li"), Rc::new(Ast::Selector(Rc::from("$ ul > li"))));
        assert_eq!(one("#header"), Rc::new(Ast::Selector(Rc::from("#header"))));
    }

    #[test]
    fn missing_operands_are_fatal() {
        assert_eq!(
            err("* 2"),
            ParseError::MissingLeft { operator: "*".to_string() }
        );
        assert_eq!(
            err("2 +"),
            ParseError::MissingRight { operator: "+".to_string() }
        );
        assert_eq!(
            err("1 + * 2"),
            ParseError::MissingRight { operator: "+".to_string() }
        );
    }

    #[test]
    fn unbalanced_delimiters_are_fatal() {
        assert!(matches!(err("f(a"), ParseError::Unbalanced { .. }));
        assert!(matches!(err("a)"), ParseError::Unbalanced { .. }));
    }

    #[test]
    fn multiline_blocks_match_inline_sugar() {
        let source = "items.each |item|\n  item + 1";
        assert_eq!(one(source), one("items.each { |item| item + 1 }"));
    }

    #[test]
    fn multiline_nests_and_dedents() {
        let source = "a.each |x|\n  b.each |y|\n    x + y\n  x";
        let inline = "a.each { |x| b.each { |y| x + y }, x }";
        assert_eq!(one(source), one(inline));
    }

    #[test]
    fn indentation_errors() {
        assert!(matches!(
            err("a\n  b\n      c"),
            ParseError::OverIndent { .. }
        ));
        assert!(matches!(err("  a\nb"), ParseError::BadDedent { .. }));
        assert_eq!(err("a |x|\nb"), ParseError::DanglingParams);
    }
}
