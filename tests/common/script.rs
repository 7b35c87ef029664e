//! Tiny module-script language understood by `ScriptedEngine`.
//!
//! Statements: `import x from 'spec'`, `import 'spec'`, `export default e`,
//! `const x = e`, `a.b = e`, `delete a.b`, `throw e`, `return e`, `e`.
//! Expressions: numbers, strings, `true`/`false`/`null`/`undefined`,
//! identifiers, `globalThis`, object and array literals, `+ - * /`,
//! `=== !==`, unary `-`, calls, `.name` and `[index]` access, arrow
//! functions, `new Error(..)` (and `TypeError`, `RangeError`),
//! `Promise.resolve(..)` and `Promise.reject(..)`.

#![allow(dead_code)]

use std::sync::Arc;

/// Zero-based source position of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
    pub length: usize,
}

#[derive(Debug, Clone)]
pub struct SyntaxError {
    pub message: String,
    pub pos: Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    StrictEq,
    StrictNe,
}

#[derive(Debug)]
pub enum Stmt {
    Import {
        binding: Option<String>,
        specifier: String,
    },
    ExportDefault(Expr),
    Const(String, Expr),
    Assign {
        object: Expr,
        name: String,
        value: Expr,
        pos: Pos,
    },
    Delete {
        object: Expr,
        name: String,
    },
    Throw(Expr, Pos),
    Return(Option<Expr>),
    Expr(Expr),
}

#[derive(Debug)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Undefined,
    Null,
    Ident(String, Pos),
    GlobalThis,
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    NewError(String, Vec<Expr>),
    Call(Box<Expr>, Vec<Expr>, Pos),
    Member(Box<Expr>, String, Pos),
    Index(Box<Expr>, Box<Expr>, Pos),
    Arrow(Arc<Function>),
    PromiseResolve(Box<Expr>),
    PromiseReject(Box<Expr>),
}

#[derive(Debug)]
pub struct Function {
    pub params: Vec<String>,
    pub body: Body,
}

#[derive(Debug)]
pub enum Body {
    Expr(Expr),
    Block(Vec<Stmt>),
}

impl Stmt {
    /// Specifier of an import statement.
    pub fn import_specifier(&self) -> Option<&str> {
        match self {
            Stmt::Import { specifier, .. } => Some(specifier),
            _ => None,
        }
    }
}

// ---- lexer ----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    pos: Pos,
}

const PUNCTS: &[&str] = &[
    "===", "!==", "=>", "(", ")", "{", "}", "[", "]", ",", ";", ":", ".", "=", "+", "-", "*",
    "/",
];

fn lex(source: &str) -> Result<Vec<Token>, SyntaxError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let (mut i, mut line, mut line_start) = (0usize, 0u32, 0usize);

    while i < chars.len() {
        let c = chars[i];
        let pos = |len: usize, i: usize| Pos {
            line,
            column: (i - line_start) as u32,
            length: len,
        };

        if c == '\n' {
            i += 1;
            line += 1;
            line_start = i;
            continue;
        }

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text.parse::<f64>().map_err(|_| SyntaxError {
                message: format!("Invalid number '{text}'"),
                pos: pos(i - start, start),
            })?;
            tokens.push(Token {
                tok: Tok::Num(n),
                pos: pos(i - start, start),
            });
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            tokens.push(Token {
                tok: Tok::Ident(chars[start..i].iter().collect()),
                pos: pos(i - start, start),
            });
            continue;
        }

        if c == '\'' || c == '"' {
            let start = i;
            let mut text = String::new();
            i += 1;

            loop {
                match chars.get(i) {
                    None | Some('\n') => {
                        return Err(SyntaxError {
                            message: "Unterminated string".into(),
                            pos: pos(i - start, start),
                        });
                    }
                    Some(&q) if q == c => {
                        i += 1;
                        break;
                    }
                    Some('\\') => {
                        match chars.get(i + 1) {
                            Some('n') => text.push('\n'),
                            Some(&other) => text.push(other),
                            None => {}
                        }
                        i += 2;
                    }
                    Some(&other) => {
                        text.push(other);
                        i += 1;
                    }
                }
            }

            tokens.push(Token {
                tok: Tok::Str(text),
                pos: pos(i - start, start),
            });
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        let Some(punct) = PUNCTS.iter().find(|p| rest.starts_with(**p)) else {
            return Err(SyntaxError {
                message: format!("Unexpected character '{c}'"),
                pos: pos(1, i),
            });
        };

        tokens.push(Token {
            tok: Tok::Punct(*punct),
            pos: pos(punct.len(), i),
        });
        i += punct.len();
    }

    tokens.push(Token {
        tok: Tok::Eof,
        pos: Pos {
            line,
            column: (i - line_start) as u32,
            length: 0,
        },
    });

    Ok(tokens)
}

// ---- parser ---------------------------------------------------------------

pub fn parse_program(source: &str) -> Result<Vec<Stmt>, SyntaxError> {
    let mut parser = Parser {
        tokens: lex(source)?,
        at: 0,
    };

    let mut program = Vec::new();
    while parser.peek() != &Tok::Eof {
        program.push(parser.statement()?);
    }
    Ok(program)
}

struct Parser {
    tokens: Vec<Token>,
    at: usize,
}

type PResult<T> = Result<T, SyntaxError>;

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.at].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.at + offset).min(last)].tok
    }

    fn pos(&self) -> Pos {
        self.tokens[self.at].pos
    }

    fn next(&mut self) -> Token {
        let token = self.tokens[self.at].clone();
        if token.tok != Tok::Eof {
            self.at += 1;
        }
        token
    }

    fn error<T>(&self, message: impl Into<String>) -> PResult<T> {
        Err(SyntaxError {
            message: message.into(),
            pos: self.pos(),
        })
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Tok::Punct(q) if *q == p)
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Ident(name) if name == kw)
    }

    fn eat(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, p: &str) -> PResult<()> {
        if self.eat(p) {
            Ok(())
        } else {
            self.error(format!("Expected '{p}'"))
        }
    }

    fn ident(&mut self) -> PResult<String> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.at += 1;
                Ok(name)
            }
            _ => self.error("Expected identifier"),
        }
    }

    fn string(&mut self) -> PResult<String> {
        match self.peek().clone() {
            Tok::Str(text) => {
                self.at += 1;
                Ok(text)
            }
            _ => self.error("Expected string literal"),
        }
    }

    fn statement(&mut self) -> PResult<Stmt> {
        let stmt = self.statement_body()?;
        self.eat(";");
        Ok(stmt)
    }

    fn statement_body(&mut self) -> PResult<Stmt> {
        if self.is_keyword("import") {
            self.next();

            if let Tok::Str(_) = self.peek() {
                return Ok(Stmt::Import {
                    binding: None,
                    specifier: self.string()?,
                });
            }

            let binding = self.ident()?;
            if !self.is_keyword("from") {
                return self.error("Expected 'from'");
            }
            self.next();

            return Ok(Stmt::Import {
                binding: Some(binding),
                specifier: self.string()?,
            });
        }

        if self.is_keyword("export") {
            self.next();
            if !self.is_keyword("default") {
                return self.error("Only 'export default' is supported");
            }
            self.next();
            return Ok(Stmt::ExportDefault(self.expression()?));
        }

        if self.is_keyword("const") {
            self.next();
            let name = self.ident()?;
            self.expect("=")?;
            return Ok(Stmt::Const(name, self.expression()?));
        }

        if self.is_keyword("throw") {
            let pos = self.next().pos;
            return Ok(Stmt::Throw(self.expression()?, pos));
        }

        if self.is_keyword("return") {
            self.next();
            if self.is_punct(";") || self.is_punct("}") {
                return Ok(Stmt::Return(None));
            }
            return Ok(Stmt::Return(Some(self.expression()?)));
        }

        if self.is_keyword("delete") {
            self.next();
            return match self.expression()? {
                Expr::Member(object, name, _) => Ok(Stmt::Delete {
                    object: *object,
                    name,
                }),
                _ => self.error("Invalid delete target"),
            };
        }

        let pos = self.pos();
        let expr = self.expression()?;

        if self.eat("=") {
            return match expr {
                Expr::Member(object, name, _) => Ok(Stmt::Assign {
                    object: *object,
                    name,
                    value: self.expression()?,
                    pos,
                }),
                _ => self.error("Invalid assignment target"),
            };
        }

        Ok(Stmt::Expr(expr))
    }

    fn expression(&mut self) -> PResult<Expr> {
        self.equality()
    }

    fn equality(&mut self) -> PResult<Expr> {
        let mut left = self.additive()?;

        loop {
            let op = if self.eat("===") {
                BinOp::StrictEq
            } else if self.eat("!==") {
                BinOp::StrictNe
            } else {
                return Ok(left);
            };
            left = Expr::Binary(op, Box::new(left), Box::new(self.additive()?));
        }
    }

    fn additive(&mut self) -> PResult<Expr> {
        let mut left = self.multiplicative()?;

        loop {
            let op = if self.eat("+") {
                BinOp::Add
            } else if self.eat("-") {
                BinOp::Sub
            } else {
                return Ok(left);
            };
            left = Expr::Binary(op, Box::new(left), Box::new(self.multiplicative()?));
        }
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.unary()?;

        loop {
            let op = if self.eat("*") {
                BinOp::Mul
            } else if self.eat("/") {
                BinOp::Div
            } else {
                return Ok(left);
            };
            left = Expr::Binary(op, Box::new(left), Box::new(self.unary()?));
        }
    }

    fn unary(&mut self) -> PResult<Expr> {
        if self.eat("-") {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;

        loop {
            let pos = self.pos();

            if self.eat(".") {
                let name = self.ident()?;
                expr = Expr::Member(Box::new(expr), name, pos);
            } else if self.eat("(") {
                let args = self.arguments()?;
                expr = Expr::Call(Box::new(expr), args, pos);
            } else if self.eat("[") {
                let index = self.expression()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index), pos);
            } else {
                return Ok(expr);
            }
        }
    }

    /// Arguments after an opening parenthesis.
    fn arguments(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();

        while !self.eat(")") {
            args.push(self.expression()?);
            if !self.is_punct(")") {
                self.expect(",")?;
            }
        }

        Ok(args)
    }

    fn is_arrow_ahead(&self) -> bool {
        if matches!(self.peek(), Tok::Ident(_)) {
            return self.peek_at(1) == &Tok::Punct("=>");
        }

        if !self.is_punct("(") {
            return false;
        }

        let mut offset = 1;
        loop {
            match self.peek_at(offset) {
                Tok::Punct(")") => return self.peek_at(offset + 1) == &Tok::Punct("=>"),
                Tok::Ident(_) => {}
                _ => return false,
            }
            match self.peek_at(offset + 1) {
                Tok::Punct(",") => offset += 2,
                Tok::Punct(")") => return self.peek_at(offset + 2) == &Tok::Punct("=>"),
                _ => return false,
            }
        }
    }

    fn arrow(&mut self) -> PResult<Expr> {
        let mut params = Vec::new();

        if self.eat("(") {
            while !self.eat(")") {
                params.push(self.ident()?);
                self.eat(",");
            }
        } else {
            params.push(self.ident()?);
        }

        self.expect("=>")?;

        let body = if self.eat("{") {
            let mut stmts = Vec::new();
            while !self.eat("}") {
                if self.peek() == &Tok::Eof {
                    return self.error("Unterminated function body");
                }
                stmts.push(self.statement()?);
            }
            Body::Block(stmts)
        } else {
            Body::Expr(self.expression()?)
        };

        Ok(Expr::Arrow(Arc::new(Function { params, body })))
    }

    fn primary(&mut self) -> PResult<Expr> {
        if self.is_arrow_ahead() {
            return self.arrow();
        }

        let token = self.next();

        match token.tok {
            Tok::Num(n) => Ok(Expr::Number(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Punct("(") => {
                let expr = self.expression()?;
                self.expect(")")?;
                Ok(expr)
            }
            Tok::Punct("{") => {
                let mut fields = Vec::new();
                while !self.eat("}") {
                    let key = match self.next().tok {
                        Tok::Ident(name) | Tok::Str(name) => name,
                        _ => return self.error("Expected property name"),
                    };
                    self.expect(":")?;
                    fields.push((key, self.expression()?));
                    if !self.is_punct("}") {
                        self.expect(",")?;
                    }
                }
                Ok(Expr::Object(fields))
            }
            Tok::Punct("[") => {
                let mut items = Vec::new();
                while !self.eat("]") {
                    items.push(self.expression()?);
                    if !self.is_punct("]") {
                        self.expect(",")?;
                    }
                }
                Ok(Expr::Array(items))
            }
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "undefined" => Ok(Expr::Undefined),
                "globalThis" => Ok(Expr::GlobalThis),
                "new" => {
                    let kind = self.ident()?;
                    if !matches!(kind.as_str(), "Error" | "TypeError" | "RangeError") {
                        return self.error(format!("Cannot construct '{kind}'"));
                    }
                    self.expect("(")?;
                    Ok(Expr::NewError(kind, self.arguments()?))
                }
                "Promise" if self.is_punct(".") => {
                    self.next();
                    let method = self.ident()?;
                    self.expect("(")?;
                    let arg = self.expression()?;
                    self.expect(")")?;
                    match method.as_str() {
                        "resolve" => Ok(Expr::PromiseResolve(Box::new(arg))),
                        "reject" => Ok(Expr::PromiseReject(Box::new(arg))),
                        other => self.error(format!("Unsupported Promise.{other}")),
                    }
                }
                _ => Ok(Expr::Ident(name, token.pos)),
            },
            _ => Err(SyntaxError {
                message: "Unexpected token".into(),
                pos: token.pos,
            }),
        }
    }
}
