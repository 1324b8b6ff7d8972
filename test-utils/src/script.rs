//! Interpreter for the scripts understood by [`ScriptProvider`](crate::ScriptProvider).
//!
//! Statements end with `;`:
//!
//! | statement | effect |
//! |---|---|
//! | `module.exports = <expr>` | sets the exported value |
//! | `sleep(<ms>)` | waits on the tokio clock |
//! | `hang()` | never completes |
//! | `throw <expr>` | fails with an execution error |
//! | `crash()` | fails with an engine error |
//! | `panic()` | panics inside the runtime |
//! | `console.log(<expr>)` | appends a line to stdout |
//! | `fs.writeFile(<path>, <expr>)` | writes into the container filesystem |
//! | `mark(<expr>)` | records a label on the probe |
//!
//! Expressions: numbers, quoted strings, `true`/`false`/`null`, `env.NAME`,
//! `fs.readFile(<path>)`, parentheses and `+ - * /`. `+` concatenates when
//! either side is a string.

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;
use std::time::Duration;

use sandpit::fs::{SharedFs, resolve_path};
use sandpit::ExecutionResult;
use sandpit_shared::errors::{SandpitError, SandpitResult};
use serde_json::Value;
use tokio::time::Instant;

use crate::probe::ExecProbe;

// ============================================================================
// TOKENS
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(char),
}

fn syntax(message: impl Into<String>) -> SandpitError {
    SandpitError::Execution(format!("SyntaxError: {}", message.into()))
}

fn tokenize(src: &str) -> SandpitResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' if lookahead(&chars, '/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '0'..='9' => tokens.push(Token::Num(number(&mut chars)?)),
            '"' | '\'' => tokens.push(Token::Str(string(&mut chars)?)),
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || matches!(c, '_' | '$' | '.') {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            '+' | '-' | '*' | '/' | '(' | ')' | ',' | '=' | ';' => {
                tokens.push(Token::Punct(c));
                chars.next();
            }
            other => return Err(syntax(format!("unexpected character '{}'", other))),
        }
    }
    Ok(tokens)
}

fn lookahead(chars: &Peekable<Chars<'_>>, expected: char) -> bool {
    let mut ahead = chars.clone();
    ahead.next();
    ahead.next() == Some(expected)
}

fn number(chars: &mut Peekable<Chars<'_>>) -> SandpitResult<f64> {
    let mut raw = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() || c == '.' {
            raw.push(c);
            chars.next();
        } else {
            break;
        }
    }
    raw.parse()
        .map_err(|_| syntax(format!("invalid number '{}'", raw)))
}

fn string(chars: &mut Peekable<Chars<'_>>) -> SandpitResult<String> {
    let quote = chars.next().ok_or_else(|| syntax("expected string"))?;
    let mut out = String::new();
    loop {
        match chars.next() {
            None => return Err(syntax("unterminated string")),
            Some(c) if c == quote => return Ok(out),
            Some('\\') => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(c) => out.push(c),
                None => return Err(syntax("unterminated string")),
            },
            Some(c) => out.push(c),
        }
    }
}

// ============================================================================
// SYNTAX TREE
// ============================================================================

#[derive(Clone, Debug)]
enum Expr {
    Value(Value),
    Env(String),
    ReadFile(Box<Expr>),
    Binary(Box<Expr>, char, Box<Expr>),
}

#[derive(Clone, Debug)]
enum Stmt {
    Export(Expr),
    Sleep(Expr),
    Hang,
    Throw(Expr),
    Crash,
    Panic,
    Log(Expr),
    WriteFile(Expr, Expr),
    Mark(Expr),
}

/// A parsed script.
#[derive(Clone, Debug)]
pub struct Script {
    statements: Vec<Stmt>,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, c: char) -> SandpitResult<()> {
        match self.next() {
            Some(Token::Punct(p)) if p == c => Ok(()),
            other => Err(syntax(format!("expected '{}', found {:?}", c, other))),
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(&Token::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn args(&mut self) -> SandpitResult<Vec<Expr>> {
        self.expect('(')?;
        let mut args = Vec::new();
        if self.eat(')') {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(')') {
                return Ok(args);
            }
            self.expect(',')?;
        }
    }

    fn statement(&mut self) -> SandpitResult<Stmt> {
        let stmt = match self.next() {
            Some(Token::Ident(name)) if name == "module.exports" => {
                self.expect('=')?;
                Stmt::Export(self.expr()?)
            }
            Some(Token::Ident(name)) if name == "throw" => Stmt::Throw(self.expr()?),
            Some(Token::Ident(name)) => {
                let mut args = self.args()?;
                match (name.as_str(), args.len()) {
                    ("sleep", 1) => Stmt::Sleep(args.remove(0)),
                    ("hang", 0) => Stmt::Hang,
                    ("crash", 0) => Stmt::Crash,
                    ("panic", 0) => Stmt::Panic,
                    ("console.log", 1) => Stmt::Log(args.remove(0)),
                    ("mark", 1) => Stmt::Mark(args.remove(0)),
                    ("fs.writeFile", 2) => {
                        let contents = args.remove(1);
                        Stmt::WriteFile(args.remove(0), contents)
                    }
                    (name, n) => {
                        return Err(SandpitError::Execution(format!(
                            "ReferenceError: {}/{} is not defined",
                            name, n
                        )));
                    }
                }
            }
            other => return Err(syntax(format!("unexpected {:?}", other))),
        };
        if let Some(token) = self.peek() {
            return Err(syntax(format!("unexpected {:?} after statement", token)));
        }
        Ok(stmt)
    }

    fn expr(&mut self) -> SandpitResult<Expr> {
        let mut lhs = self.term()?;
        while let Some(Token::Punct(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(self.term()?));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> SandpitResult<Expr> {
        let mut lhs = self.factor()?;
        while let Some(Token::Punct(op @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(self.factor()?));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> SandpitResult<Expr> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Value(number_value(n))),
            Some(Token::Str(s)) => Ok(Expr::Value(Value::String(s))),
            Some(Token::Punct('-')) => {
                let operand = self.factor()?;
                Ok(Expr::Binary(
                    Box::new(Expr::Value(Value::from(0))),
                    '-',
                    Box::new(operand),
                ))
            }
            Some(Token::Punct('(')) => {
                let inner = self.expr()?;
                self.expect(')')?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Value(Value::Bool(true))),
                "false" => Ok(Expr::Value(Value::Bool(false))),
                "null" => Ok(Expr::Value(Value::Null)),
                "fs.readFile" => {
                    let mut args = self.args()?;
                    if args.len() != 1 {
                        return Err(syntax("fs.readFile takes one argument"));
                    }
                    Ok(Expr::ReadFile(Box::new(args.remove(0))))
                }
                other => match other.strip_prefix("env.") {
                    Some(var) => Ok(Expr::Env(var.to_string())),
                    None => Err(SandpitError::Execution(format!(
                        "ReferenceError: {} is not defined",
                        other
                    ))),
                },
            },
            other => Err(syntax(format!("unexpected {:?} in expression", other))),
        }
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// EVALUATION
// ============================================================================

/// What a running script can see.
pub(crate) struct Scope<'a> {
    pub(crate) fs: &'a SharedFs,
    pub(crate) working_dir: &'a str,
    pub(crate) env: &'a HashMap<String, String>,
    pub(crate) probe: &'a ExecProbe,
}

impl Script {
    pub fn parse(src: &str) -> SandpitResult<Self> {
        let tokens = tokenize(src)?;
        let statements = tokens
            .split(|t| *t == Token::Punct(';'))
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                Parser {
                    tokens: segment.to_vec(),
                    pos: 0,
                }
                .statement()
            })
            .collect::<SandpitResult<Vec<_>>>()?;
        Ok(Self { statements })
    }

    pub(crate) async fn run(&self, scope: &Scope<'_>) -> SandpitResult<ExecutionResult> {
        let started = Instant::now();
        let mut result = ExecutionResult::default();

        for stmt in &self.statements {
            match stmt {
                Stmt::Export(expr) => result.exports = eval(expr, scope)?,
                Stmt::Sleep(expr) => {
                    let ms = eval(expr, scope)?
                        .as_f64()
                        .ok_or_else(|| SandpitError::Execution("TypeError: sleep expects a number".into()))?;
                    tokio::time::sleep(Duration::from_millis(ms.max(0.0) as u64)).await;
                }
                Stmt::Hang => std::future::pending::<()>().await,
                Stmt::Throw(expr) => {
                    return Err(SandpitError::Execution(display(&eval(expr, scope)?)));
                }
                Stmt::Crash => return Err(SandpitError::Engine("runtime crashed".into())),
                Stmt::Panic => panic!("script requested a panic"),
                Stmt::Log(expr) => {
                    result.stdout.push_str(&display(&eval(expr, scope)?));
                    result.stdout.push('\n');
                }
                Stmt::WriteFile(path, contents) => {
                    let path = resolve_path(scope.working_dir, &display(&eval(path, scope)?))?;
                    scope.fs.write_file(&path, display(&eval(contents, scope)?))?;
                }
                Stmt::Mark(expr) => scope.probe.mark(display(&eval(expr, scope)?)),
            }
        }

        result.duration = started.elapsed();
        Ok(result)
    }
}

fn eval(expr: &Expr, scope: &Scope<'_>) -> SandpitResult<Value> {
    match expr {
        Expr::Value(v) => Ok(v.clone()),
        Expr::Env(var) => Ok(scope
            .env
            .get(var)
            .map(|v| Value::String(v.clone()))
            .unwrap_or(Value::Null)),
        Expr::ReadFile(path) => {
            let path = resolve_path(scope.working_dir, &display(&eval(path, scope)?))?;
            Ok(Value::String(scope.fs.read_to_string(&path)?))
        }
        Expr::Binary(lhs, op, rhs) => {
            let lhs = eval(lhs, scope)?;
            let rhs = eval(rhs, scope)?;
            match (lhs.as_f64(), rhs.as_f64(), op) {
                (Some(a), Some(b), '+') => Ok(number_value(a + b)),
                (Some(a), Some(b), '-') => Ok(number_value(a - b)),
                (Some(a), Some(b), '*') => Ok(number_value(a * b)),
                (Some(a), Some(b), '/') => Ok(number_value(a / b)),
                (_, _, '+') => Ok(Value::String(display(&lhs) + &display(&rhs))),
                _ => Err(SandpitError::Execution(format!(
                    "TypeError: cannot apply '{}' to {} and {}",
                    op, lhs, rhs
                ))),
            }
        }
    }
}
