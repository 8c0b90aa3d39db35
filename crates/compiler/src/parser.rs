//! Parser
//!
//! Tokens to parse tree. Expressions use precedence climbing (all binary
//! operators are left-associative; the right-hand side always parses at
//! `min_prec + 1`), with postfix chains (`()`, `[]`, `.`) tried after every
//! primary and after every binary right-hand side. Statements are newline
//! terminated. Errors use panic-mode recovery: report, skip to the next
//! statement keyword or newline, resume.

use bumpalo::Bump;

use crate::ast::{
    AllowKind, ArmBody, BinaryOp, Expr, ExprKind, MatchArm, Stmt, StmtKind, UnaryOp,
};
use crate::scanner::{Scanner, Token, TokenKind};

/// Precedence levels, low to high.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
enum Precedence {
    None,
    Assignment,
    Pipe,
    Or,
    And,
    Equality,
    Comparison,
    Range,
    Addition,
    Multiplication,
    Unary,
    Call,
    Primary,
}

fn binary_precedence(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Pipe => Precedence::Pipe,
        TokenKind::Or | TokenKind::PipePipe => Precedence::Or,
        TokenKind::And | TokenKind::AmpAmp => Precedence::And,
        TokenKind::EqualEqual | TokenKind::BangEqual => Precedence::Equality,
        TokenKind::Less
        | TokenKind::LessEqual
        | TokenKind::Greater
        | TokenKind::GreaterEqual => Precedence::Comparison,
        TokenKind::DotDot => Precedence::Range,
        TokenKind::Plus | TokenKind::Minus => Precedence::Addition,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Multiplication,
        _ => Precedence::None,
    }
}

fn next_precedence(prec: Precedence) -> Precedence {
    match prec {
        Precedence::None => Precedence::Assignment,
        Precedence::Assignment => Precedence::Pipe,
        Precedence::Pipe => Precedence::Or,
        Precedence::Or => Precedence::And,
        Precedence::And => Precedence::Equality,
        Precedence::Equality => Precedence::Comparison,
        Precedence::Comparison => Precedence::Range,
        Precedence::Range => Precedence::Addition,
        Precedence::Addition => Precedence::Multiplication,
        Precedence::Multiplication => Precedence::Unary,
        Precedence::Unary => Precedence::Call,
        Precedence::Call | Precedence::Primary => Precedence::Primary,
    }
}

fn binary_op(kind: TokenKind) -> BinaryOp {
    match kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Subtract,
        TokenKind::Star => BinaryOp::Multiply,
        TokenKind::Slash => BinaryOp::Divide,
        TokenKind::Percent => BinaryOp::Modulo,
        TokenKind::EqualEqual => BinaryOp::Equal,
        TokenKind::BangEqual => BinaryOp::NotEqual,
        TokenKind::Greater => BinaryOp::Greater,
        TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
        TokenKind::Less => BinaryOp::Less,
        TokenKind::LessEqual => BinaryOp::LessEqual,
        TokenKind::And | TokenKind::AmpAmp => BinaryOp::And,
        TokenKind::Or | TokenKind::PipePipe => BinaryOp::Or,
        _ => unreachable!("not a binary operator"),
    }
}

pub struct Parser<'a> {
    scanner: Scanner<'a>,
    current: Token<'a>,
    previous: Token<'a>,
    arena: &'a Bump,
    errors: Vec<String>,
    panic_mode: bool,
}

/// Parse a whole program. On failure the error lists every diagnostic, one
/// per line, each anchored with line and column.
pub fn parse<'a>(source: &'a str, arena: &'a Bump) -> Result<&'a [Stmt<'a>], String> {
    let mut parser = Parser::new(source, arena);
    let mut stmts: Vec<Stmt<'a>> = Vec::new();

    while !parser.check(TokenKind::Eof) {
        if let Some(stmt) = parser.declaration() {
            stmts.push(stmt);
        }
    }

    if parser.errors.is_empty() {
        Ok(arena.alloc_slice_copy(&stmts))
    } else {
        Err(parser.errors.join("\n"))
    }
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, arena: &'a Bump) -> Parser<'a> {
        let placeholder = Token {
            kind: TokenKind::Eof,
            text: "",
            line: 1,
            column: 1,
        };
        let mut parser = Parser {
            scanner: Scanner::new(source),
            current: placeholder,
            previous: placeholder,
            arena,
            errors: Vec::new(),
            panic_mode: false,
        };
        parser.advance(); // prime with the first token
        parser
    }

    // ---- Token plumbing ----

    fn report(&mut self, token: &Token<'a>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let location = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.text),
        };
        self.errors.push(format!(
            "[line {}, col {}] Error{}: {}",
            token.line, token.column, location, message
        ));
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.report(&token, message);
    }

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            let token = self.scanner.scan_token();
            if token.kind != TokenKind::Error {
                self.current = token;
                break;
            }
            self.report(&token, token.text);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn skip_newlines(&mut self) {
        while self.check(TokenKind::Newline) {
            self.advance();
        }
    }

    /// Between statements, semicolons and newlines are interchangeable.
    fn skip_terminators(&mut self) {
        while self.check(TokenKind::Newline) || self.check(TokenKind::Semicolon) {
            self.advance();
        }
    }

    /// A statement ends at a newline or semicolon, at EOF, or just before
    /// a `}`.
    fn expect_terminator(&mut self) {
        if self.check(TokenKind::Newline) || self.check(TokenKind::Semicolon) {
            self.advance();
            return;
        }
        if self.check(TokenKind::Eof) || self.check(TokenKind::RightBrace) {
            return;
        }
        self.error_at_current("Expected newline or end of statement.");
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.check(TokenKind::Eof) {
            if self.previous.kind == TokenKind::Newline {
                return;
            }
            match self.current.kind {
                TokenKind::Fn
                | TokenKind::Let
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return
                | TokenKind::Allow
                | TokenKind::On
                | TokenKind::Parallel
                | TokenKind::Import
                | TokenKind::Exec
                | TokenKind::Match => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ---- Arena helpers ----

    fn expr(&self, line: u32, kind: ExprKind<'a>) -> &'a Expr<'a> {
        self.arena.alloc(Expr { line, kind })
    }

    fn exprs(&self, items: &[Expr<'a>]) -> &'a [Expr<'a>] {
        self.arena.alloc_slice_copy(items)
    }

    fn stmts(&self, items: &[Stmt<'a>]) -> &'a [Stmt<'a>] {
        self.arena.alloc_slice_copy(items)
    }

    /// Decode escape sequences into the arena. Raw strings and
    /// escape-free literals are used as-is.
    fn unescape(&self, raw: &'a str, is_raw: bool) -> &'a str {
        if is_raw || !raw.contains('\\') {
            return raw;
        }
        let mut out = String::with_capacity(raw.len());
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                Some('\'') => out.push('\''),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        }
        self.arena.alloc_str(&out)
    }

    // ---- Expressions ----

    fn expression(&mut self) -> &'a Expr<'a> {
        self.precedence(Precedence::Pipe)
    }

    fn precedence(&mut self, min_prec: Precedence) -> &'a Expr<'a> {
        let mut left = if self.matches(TokenKind::Minus) {
            let line = self.previous.line;
            let operand = self.precedence(Precedence::Unary);
            self.expr(
                line,
                ExprKind::Unary {
                    op: UnaryOp::Negate,
                    operand,
                },
            )
        } else if self.matches(TokenKind::Bang) || self.matches(TokenKind::Not) {
            let line = self.previous.line;
            let operand = self.precedence(Precedence::Unary);
            self.expr(
                line,
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand,
                },
            )
        } else {
            self.primary()
        };

        left = self.postfix(left);

        loop {
            let op_kind = self.current.kind;
            let prec = binary_precedence(op_kind);
            if prec == Precedence::None || prec < min_prec {
                break;
            }

            self.advance();
            let line = self.previous.line;

            if op_kind == TokenKind::Pipe {
                let right = self.precedence(next_precedence(prec));
                let right = self.postfix(right);
                left = self.expr(line, ExprKind::Pipe { left, right });
            } else if op_kind == TokenKind::DotDot {
                let right = self.precedence(next_precedence(prec));
                let right = self.postfix(right);
                left = self.expr(
                    line,
                    ExprKind::Range {
                        start: left,
                        end: right,
                    },
                );
            } else {
                let right = self.precedence(next_precedence(prec));
                let right = self.postfix(right);
                left = self.expr(
                    line,
                    ExprKind::Binary {
                        op: binary_op(op_kind),
                        left,
                        right,
                    },
                );
            }
        }

        left
    }

    /// Postfix chain: calls, indexing, and property access, with their
    /// assignment forms (`a[i] = v`, `a.b = v`).
    fn postfix(&mut self, mut left: &'a Expr<'a>) -> &'a Expr<'a> {
        loop {
            if self.matches(TokenKind::LeftParen) {
                let line = self.previous.line;
                let mut args: Vec<Expr<'a>> = Vec::new();
                self.skip_newlines();
                if !self.check(TokenKind::RightParen) {
                    loop {
                        self.skip_newlines();
                        args.push(*self.expression());
                        self.skip_newlines();
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.skip_newlines();
                self.consume(TokenKind::RightParen, "Expected ')' after arguments.");
                left = self.expr(
                    line,
                    ExprKind::Call {
                        callee: left,
                        args: self.exprs(&args),
                    },
                );
                continue;
            }

            if self.matches(TokenKind::LeftBracket) {
                let line = self.previous.line;
                let index = self.expression();
                self.consume(TokenKind::RightBracket, "Expected ']' after index.");
                if self.matches(TokenKind::Equal) {
                    let value = self.expression();
                    left = self.expr(
                        line,
                        ExprKind::IndexSet {
                            object: left,
                            index,
                            value,
                        },
                    );
                } else {
                    left = self.expr(
                        line,
                        ExprKind::Index {
                            object: left,
                            index,
                        },
                    );
                }
                continue;
            }

            if self.matches(TokenKind::Dot) {
                let line = self.previous.line;
                let name = self.property_name();
                if self.matches(TokenKind::Equal) {
                    let value = self.expression();
                    left = self.expr(
                        line,
                        ExprKind::PropertySet {
                            object: left,
                            name,
                            value,
                        },
                    );
                } else {
                    left = self.expr(
                        line,
                        ExprKind::Property {
                            object: left,
                            name,
                        },
                    );
                }
                continue;
            }

            break;
        }
        left
    }

    /// After `.`, keywords are acceptable property names (`result.exec`).
    fn property_name(&mut self) -> &'a str {
        let kind = self.current.kind;
        let is_name = kind == TokenKind::Identifier
            || matches!(
                kind,
                TokenKind::Allow
                    | TokenKind::And
                    | TokenKind::As
                    | TokenKind::Break
                    | TokenKind::Continue
                    | TokenKind::Else
                    | TokenKind::Exec
                    | TokenKind::Exit
                    | TokenKind::Failure
                    | TokenKind::False
                    | TokenKind::Fn
                    | TokenKind::For
                    | TokenKind::If
                    | TokenKind::Import
                    | TokenKind::In
                    | TokenKind::Let
                    | TokenKind::Match
                    | TokenKind::Nil
                    | TokenKind::Not
                    | TokenKind::On
                    | TokenKind::Or
                    | TokenKind::Parallel
                    | TokenKind::Return
                    | TokenKind::True
                    | TokenKind::While
            );
        if is_name {
            self.advance();
            self.previous.text
        } else {
            self.error_at_current("Expected property name after '.'.");
            ""
        }
    }

    fn primary(&mut self) -> &'a Expr<'a> {
        if self.matches(TokenKind::Number) {
            let line = self.previous.line;
            let value: f64 = self.previous.text.parse().unwrap_or(0.0);
            return self.expr(line, ExprKind::Number(value));
        }

        if self.matches(TokenKind::Str) {
            let line = self.previous.line;
            let text = self.previous.text;
            let inner = &text[1..text.len() - 1];
            let value = self.unescape(inner, false);
            return self.expr(line, ExprKind::Str(value));
        }

        if self.matches(TokenKind::RawStr) {
            let line = self.previous.line;
            let text = self.previous.text;
            let inner = &text[1..text.len() - 1];
            return self.expr(line, ExprKind::Str(inner));
        }

        if self.matches(TokenKind::FString) {
            return self.fstring();
        }

        if self.matches(TokenKind::True) {
            return self.expr(self.previous.line, ExprKind::Bool(true));
        }
        if self.matches(TokenKind::False) {
            return self.expr(self.previous.line, ExprKind::Bool(false));
        }
        if self.matches(TokenKind::Nil) {
            return self.expr(self.previous.line, ExprKind::Nil);
        }

        if self.matches(TokenKind::Identifier) {
            return self.expr(self.previous.line, ExprKind::Variable(self.previous.text));
        }

        if self.matches(TokenKind::LeftParen) {
            let expr = self.expression();
            self.consume(TokenKind::RightParen, "Expected ')' after expression.");
            return expr;
        }

        if self.matches(TokenKind::LeftBracket) {
            return self.list_literal();
        }

        if self.matches(TokenKind::LeftBrace) {
            return self.map_literal();
        }

        if self.matches(TokenKind::Fn) {
            let line = self.previous.line;
            self.consume(TokenKind::LeftParen, "Expected '(' after 'fn' in lambda.");
            let params = self.fn_params();
            self.skip_newlines();
            let body = self.block();
            return self.expr(line, ExprKind::Lambda { params, body });
        }

        if self.matches(TokenKind::Exec) {
            let line = self.previous.line;
            let command = self.expression();
            return self.expr(line, ExprKind::ExecSugar { command });
        }

        if self.matches(TokenKind::Match) {
            return self.match_expression();
        }

        self.error_at_current("Expected expression.");
        self.expr(self.current.line, ExprKind::Nil)
    }

    fn list_literal(&mut self) -> &'a Expr<'a> {
        let line = self.previous.line;
        let mut elements: Vec<Expr<'a>> = Vec::new();

        self.skip_newlines();
        if !self.check(TokenKind::RightBracket) {
            loop {
                self.skip_newlines();
                if self.check(TokenKind::RightBracket) {
                    break; // trailing comma
                }
                elements.push(*self.expression());
                self.skip_newlines();
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.skip_newlines();
        self.consume(TokenKind::RightBracket, "Expected ']' after list elements.");

        self.expr(line, ExprKind::List(self.exprs(&elements)))
    }

    fn map_literal(&mut self) -> &'a Expr<'a> {
        let line = self.previous.line;
        let mut keys: Vec<Expr<'a>> = Vec::new();
        let mut values: Vec<Expr<'a>> = Vec::new();

        self.skip_newlines();
        if !self.check(TokenKind::RightBrace) {
            loop {
                self.skip_newlines();
                if self.check(TokenKind::RightBrace) {
                    break; // trailing comma
                }

                // Key: string literal or bare identifier.
                if self.matches(TokenKind::Str) {
                    let text = self.previous.text;
                    let inner = &text[1..text.len() - 1];
                    let key_line = self.previous.line;
                    let value = self.unescape(inner, false);
                    keys.push(Expr {
                        line: key_line,
                        kind: ExprKind::Str(value),
                    });
                } else if self.matches(TokenKind::Identifier) {
                    keys.push(Expr {
                        line: self.previous.line,
                        kind: ExprKind::Str(self.previous.text),
                    });
                } else {
                    self.error_at_current("Expected string or identifier as map key.");
                    break;
                }

                self.consume(TokenKind::Colon, "Expected ':' after map key.");
                self.skip_newlines();
                values.push(*self.expression());
                self.skip_newlines();
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.skip_newlines();
        self.consume(TokenKind::RightBrace, "Expected '}' after map entries.");

        self.expr(
            line,
            ExprKind::MapLit {
                keys: self.exprs(&keys),
                values: self.exprs(&values),
            },
        )
    }

    fn fn_params(&mut self) -> &'a [&'a str] {
        let mut params: Vec<&'a str> = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if params.len() >= 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                    break;
                }
                self.consume(TokenKind::Identifier, "Expected parameter name.");
                params.push(self.previous.text);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after parameters.");
        self.arena.alloc_slice_copy(&params)
    }

    /// Re-parse the f-string payload: literal runs become string literals,
    /// `{…}` runs are parsed as expressions with a fresh scanner (the
    /// payload is a slice of the original source, so inner tokens borrow
    /// the same text). Non-literal parts are wrapped in `str(…)` and the
    /// pieces fold left with `+`.
    fn fstring(&mut self) -> &'a Expr<'a> {
        let token = self.previous;
        let line = token.line;
        // Strip `f`, the opening quote, and the closing quote.
        let raw = &token.text[2..token.text.len() - 1];
        let bytes = raw.as_bytes();

        let mut result: Option<&'a Expr<'a>> = None;
        let mut i = 0;

        while i < bytes.len() {
            let lit_start = i;
            while i < bytes.len() && bytes[i] != b'{' {
                if bytes[i] == b'\\' && i + 1 < bytes.len() {
                    i += 2;
                } else {
                    i += 1;
                }
            }

            if i > lit_start {
                let lit = self.unescape(&raw[lit_start..i], false);
                let part = self.expr(line, ExprKind::Str(lit));
                result = Some(match result {
                    None => part,
                    Some(prev) => self.expr(
                        line,
                        ExprKind::Binary {
                            op: BinaryOp::Add,
                            left: prev,
                            right: part,
                        },
                    ),
                });
            }

            if i >= bytes.len() {
                break;
            }

            i += 1; // skip '{'
            let expr_start = i;
            let mut depth = 1;
            while i < bytes.len() && depth > 0 {
                if bytes[i] == b'{' {
                    depth += 1;
                } else if bytes[i] == b'}' {
                    depth -= 1;
                }
                if depth > 0 {
                    i += 1;
                }
            }

            if depth != 0 {
                let t = token;
                self.report(&t, "Unterminated interpolation in f-string.");
                return result.unwrap_or_else(|| self.expr(line, ExprKind::Str("")));
            }

            let expr_text = &raw[expr_start..i];
            i += 1; // skip '}'

            if expr_text.is_empty() {
                continue;
            }

            // Parse the embedded expression with a saved-and-restored
            // scanner over the payload slice.
            let saved_scanner = self.scanner.clone();
            let saved_current = self.current;
            let saved_previous = self.previous;
            let saved_panic = self.panic_mode;

            self.scanner = Scanner::new(expr_text);
            self.advance(); // prime with the first token
            let inner = self.expression();

            self.scanner = saved_scanner;
            self.current = saved_current;
            self.previous = saved_previous;
            self.panic_mode = saved_panic;

            // Coerce with str() and append.
            let str_fn = self.expr(line, ExprKind::Variable("str"));
            let args = self.exprs(&[*inner]);
            let part = self.expr(
                line,
                ExprKind::Call {
                    callee: str_fn,
                    args,
                },
            );
            result = Some(match result {
                None => part,
                Some(prev) => self.expr(
                    line,
                    ExprKind::Binary {
                        op: BinaryOp::Add,
                        left: prev,
                        right: part,
                    },
                ),
            });
        }

        result.unwrap_or_else(|| self.expr(line, ExprKind::Str("")))
    }

    fn match_expression(&mut self) -> &'a Expr<'a> {
        let line = self.previous.line;
        let subject = self.expression();
        self.skip_newlines();
        self.consume(TokenKind::LeftBrace, "Expected '{' after match expression.");
        self.skip_newlines();

        let mut arms: Vec<MatchArm<'a>> = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            let arm_line = self.current.line;

            let pattern = if self.check(TokenKind::Identifier) && self.current.text == "_" {
                self.advance();
                None
            } else {
                Some(self.expression())
            };

            self.consume(TokenKind::Arrow, "Expected '->' after match pattern.");
            self.skip_newlines();

            let body = if self.check(TokenKind::LeftBrace) {
                ArmBody::Block(self.block())
            } else {
                ArmBody::Expr(self.expression())
            };

            arms.push(MatchArm {
                line: arm_line,
                pattern,
                body,
            });
            self.skip_newlines();
        }

        self.consume(TokenKind::RightBrace, "Expected '}' after match arms.");

        let arms = self.arena.alloc_slice_copy(&arms);
        self.expr(line, ExprKind::Match { subject, arms })
    }

    // ---- Statements ----

    fn block(&mut self) -> &'a [Stmt<'a>] {
        self.consume(TokenKind::LeftBrace, "Expected '{' to begin block.");
        self.skip_newlines();

        let mut stmts: Vec<Stmt<'a>> = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            if let Some(stmt) = self.declaration() {
                stmts.push(stmt);
            }
            self.skip_newlines();
        }

        self.consume(TokenKind::RightBrace, "Expected '}' after block.");
        self.stmts(&stmts)
    }

    fn if_statement(&mut self) -> Stmt<'a> {
        let line = self.previous.line;

        let condition = self.expression();
        self.skip_newlines();
        let then_branch = self.block();

        let mut else_branch: Option<&'a Stmt<'a>> = None;
        self.skip_newlines();
        if self.matches(TokenKind::Else) {
            self.skip_newlines();
            if self.matches(TokenKind::If) {
                let nested = self.if_statement();
                else_branch = Some(self.arena.alloc(nested));
            } else {
                let block_line = self.current.line;
                let body = self.block();
                else_branch = Some(self.arena.alloc(Stmt {
                    line: block_line,
                    kind: StmtKind::Block(body),
                }));
            }
        }

        Stmt {
            line,
            kind: StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
        }
    }

    fn statement(&mut self) -> Stmt<'a> {
        if self.matches(TokenKind::If) {
            return self.if_statement();
        }

        if self.matches(TokenKind::While) {
            let line = self.previous.line;
            let condition = self.expression();
            self.skip_newlines();
            let body = self.block();
            return Stmt {
                line,
                kind: StmtKind::While { condition, body },
            };
        }

        if self.matches(TokenKind::For) {
            let line = self.previous.line;
            self.consume(TokenKind::Identifier, "Expected variable name after 'for'.");
            let var = self.previous.text;
            self.consume(TokenKind::In, "Expected 'in' after for variable.");
            let iterable = self.expression();
            self.skip_newlines();
            let body = self.block();
            return Stmt {
                line,
                kind: StmtKind::For {
                    var,
                    iterable,
                    body,
                },
            };
        }

        if self.matches(TokenKind::Return) {
            let line = self.previous.line;
            let value = if !self.check(TokenKind::Newline)
                && !self.check(TokenKind::Eof)
                && !self.check(TokenKind::RightBrace)
            {
                Some(self.expression())
            } else {
                None
            };
            self.expect_terminator();
            return Stmt {
                line,
                kind: StmtKind::Return(value),
            };
        }

        if self.matches(TokenKind::Break) {
            let line = self.previous.line;
            self.expect_terminator();
            return Stmt {
                line,
                kind: StmtKind::Break,
            };
        }

        if self.matches(TokenKind::Continue) {
            let line = self.previous.line;
            self.expect_terminator();
            return Stmt {
                line,
                kind: StmtKind::Continue,
            };
        }

        if self.matches(TokenKind::Parallel) {
            let line = self.previous.line;
            self.consume(TokenKind::LeftBrace, "Expected '{' after 'parallel'.");
            self.skip_newlines();
            let mut tasks: Vec<Stmt<'a>> = Vec::new();
            while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
                tasks.push(self.statement());
                self.skip_newlines();
            }
            self.consume(TokenKind::RightBrace, "Expected '}' after parallel block.");
            return Stmt {
                line,
                kind: StmtKind::Parallel(self.stmts(&tasks)),
            };
        }

        if self.matches(TokenKind::On) {
            let line = self.previous.line;
            self.consume(TokenKind::Failure, "Expected 'failure' after 'on'.");
            self.skip_newlines();
            let body = self.block();
            return Stmt {
                line,
                kind: StmtKind::OnFailure(body),
            };
        }

        if self.matches(TokenKind::Exit) {
            let line = self.previous.line;
            let value = if !self.check(TokenKind::Newline)
                && !self.check(TokenKind::Eof)
                && !self.check(TokenKind::RightBrace)
            {
                Some(*self.expression())
            } else {
                None
            };
            self.expect_terminator();
            // `exit` is sugar for a call to the built-in.
            let callee = self.expr(line, ExprKind::Variable("exit"));
            let args = match value {
                Some(v) => self.exprs(&[v]),
                None => self.exprs(&[]),
            };
            let call = self.expr(line, ExprKind::Call { callee, args });
            return Stmt {
                line,
                kind: StmtKind::Expression(call),
            };
        }

        // Expression statement, possibly an assignment.
        let expr = self.expression();
        let line = expr.line;

        if let ExprKind::Variable(name) = expr.kind {
            if self.matches(TokenKind::Equal) {
                let value = self.expression();
                self.expect_terminator();
                return Stmt {
                    line,
                    kind: StmtKind::VarDecl {
                        name,
                        initializer: value,
                    },
                };
            }

            let compound = if self.matches(TokenKind::PlusEqual) {
                Some(BinaryOp::Add)
            } else if self.matches(TokenKind::MinusEqual) {
                Some(BinaryOp::Subtract)
            } else if self.matches(TokenKind::StarEqual) {
                Some(BinaryOp::Multiply)
            } else if self.matches(TokenKind::SlashEqual) {
                Some(BinaryOp::Divide)
            } else {
                None
            };

            if let Some(op) = compound {
                let value = self.expression();
                self.expect_terminator();
                return Stmt {
                    line,
                    kind: StmtKind::CompoundAssign { name, op, value },
                };
            }
        }

        self.expect_terminator();
        Stmt {
            line,
            kind: StmtKind::Expression(expr),
        }
    }

    fn declaration(&mut self) -> Option<Stmt<'a>> {
        self.skip_terminators();

        if self.check(TokenKind::Eof) {
            return None;
        }

        if self.panic_mode {
            self.synchronize();
        }

        let stmt = if self.matches(TokenKind::Fn) {
            if self.check(TokenKind::Identifier) {
                let line = self.previous.line;
                self.advance();
                let name = self.previous.text;
                self.consume(TokenKind::LeftParen, "Expected '(' after function name.");
                let params = self.fn_params();
                self.skip_newlines();
                let body = self.block();
                Stmt {
                    line,
                    kind: StmtKind::FnDecl { name, params, body },
                }
            } else {
                // A lambda used as a statement: fn(…) { … } possibly
                // immediately invoked.
                let line = self.previous.line;
                self.consume(
                    TokenKind::LeftParen,
                    "Expected '(' or function name after 'fn'.",
                );
                let params = self.fn_params();
                self.skip_newlines();
                let body = self.block();
                let lambda = self.expr(line, ExprKind::Lambda { params, body });
                let expr = self.postfix(lambda);
                self.expect_terminator();
                Stmt {
                    line,
                    kind: StmtKind::Expression(expr),
                }
            }
        } else if self.matches(TokenKind::Let) {
            let line = self.previous.line;
            self.consume(TokenKind::Identifier, "Expected variable name after 'let'.");
            let name = self.previous.text;
            self.consume(TokenKind::Equal, "Expected '=' after variable name.");
            let initializer = self.expression();
            self.expect_terminator();
            Stmt {
                line,
                kind: StmtKind::VarDecl { name, initializer },
            }
        } else if self.matches(TokenKind::Allow) {
            self.allow_declaration()?
        } else if self.matches(TokenKind::Import) {
            let line = self.previous.line;
            self.consume(TokenKind::Str, "Expected string after 'import'.");
            let text = self.previous.text;
            let path = &text[1..text.len() - 1];
            let alias = if self.matches(TokenKind::As) {
                self.consume(TokenKind::Identifier, "Expected identifier after 'as'.");
                Some(self.previous.text)
            } else {
                None
            };
            self.expect_terminator();
            Stmt {
                line,
                kind: StmtKind::Import { path, alias },
            }
        } else {
            self.statement()
        };

        if self.panic_mode {
            self.synchronize();
        }

        Some(stmt)
    }

    fn allow_declaration(&mut self) -> Option<Stmt<'a>> {
        let line = self.previous.line;

        // `exec` is a keyword; the other capability names are identifiers
        // recognized contextually after `allow`.
        let kind = if self.matches(TokenKind::Exec) {
            AllowKind::Exec
        } else if self.matches(TokenKind::Identifier) {
            match self.previous.text {
                "net" => AllowKind::Net,
                "read" => AllowKind::Read,
                "write" => AllowKind::Write,
                "env" => AllowKind::Env,
                _ => {
                    self.error_at_current(
                        "Expected permission type (exec, net, read, write, env) after 'allow'.",
                    );
                    return None;
                }
            }
        } else {
            self.error_at_current(
                "Expected permission type (exec, net, read, write, env) after 'allow'.",
            );
            return None;
        };

        self.consume(TokenKind::Str, "Expected string after permission type.");
        let text = self.previous.text;
        let target = if text.len() >= 2 {
            &text[1..text.len() - 1]
        } else {
            ""
        };
        self.expect_terminator();

        Some(Stmt {
            line,
            kind: StmtKind::Allow { kind, target },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;

    fn parse_ok<'a>(arena: &'a Bump, source: &'a str) -> &'a [Stmt<'a>] {
        parse(source, arena).expect("parse failed")
    }

    #[test]
    fn precedence_shapes_the_tree() {
        let arena = Bump::new();
        let prog = parse_ok(&arena, "x = 1 + 2 * 3\n");
        let StmtKind::VarDecl { initializer, .. } = prog[0].kind else {
            panic!("expected var decl");
        };
        let ExprKind::Binary {
            op: BinaryOp::Add,
            right,
            ..
        } = initializer.kind
        else {
            panic!("expected + at the root");
        };
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn postfix_chains_bind_tighter_than_binaries() {
        let arena = Bump::new();
        let prog = parse_ok(&arena, "r = a.b()[0].c\n");
        let StmtKind::VarDecl { initializer, .. } = prog[0].kind else {
            panic!("expected var decl");
        };
        // Outermost is the trailing .c property access.
        assert!(matches!(
            initializer.kind,
            ExprKind::Property { name: "c", .. }
        ));
    }

    #[test]
    fn pipe_and_range_build_dedicated_nodes() {
        let arena = Bump::new();
        let prog = parse_ok(&arena, "a = x | f\nb = 1..10\n");
        let StmtKind::VarDecl { initializer, .. } = prog[0].kind else {
            panic!()
        };
        assert!(matches!(initializer.kind, ExprKind::Pipe { .. }));
        let StmtKind::VarDecl { initializer, .. } = prog[1].kind else {
            panic!()
        };
        assert!(matches!(initializer.kind, ExprKind::Range { .. }));
    }

    #[test]
    fn let_and_bare_assignment_are_var_decls() {
        let arena = Bump::new();
        let prog = parse_ok(&arena, "let x = 1\ny = 2\n");
        assert!(matches!(prog[0].kind, StmtKind::VarDecl { name: "x", .. }));
        assert!(matches!(prog[1].kind, StmtKind::VarDecl { name: "y", .. }));
    }

    #[test]
    fn compound_assignment() {
        let arena = Bump::new();
        let prog = parse_ok(&arena, "x += 2\n");
        assert!(matches!(
            prog[0].kind,
            StmtKind::CompoundAssign {
                op: BinaryOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn string_escapes_are_decoded() {
        let arena = Bump::new();
        let prog = parse_ok(&arena, "s = \"a\\nb\\q\"\n");
        let StmtKind::VarDecl { initializer, .. } = prog[0].kind else {
            panic!()
        };
        let ExprKind::Str(s) = initializer.kind else {
            panic!()
        };
        assert_eq!(s, "a\nbq");
    }

    #[test]
    fn raw_strings_keep_backslashes() {
        let arena = Bump::new();
        let prog = parse_ok(&arena, "s = `a\\nb`\n");
        let StmtKind::VarDecl { initializer, .. } = prog[0].kind else {
            panic!()
        };
        let ExprKind::Str(s) = initializer.kind else {
            panic!()
        };
        assert_eq!(s, "a\\nb");
    }

    #[test]
    fn fstring_desugars_to_concat_with_str() {
        let arena = Bump::new();
        let prog = parse_ok(&arena, "s = f\"x={n + 1}!\"\n");
        let StmtKind::VarDecl { initializer, .. } = prog[0].kind else {
            panic!()
        };
        // ("x=" + str(n + 1)) + "!"
        let ExprKind::Binary {
            op: BinaryOp::Add,
            left,
            right,
        } = initializer.kind
        else {
            panic!("expected + at root");
        };
        assert!(matches!(right.kind, ExprKind::Str("!")));
        let ExprKind::Binary { left, right, .. } = left.kind else {
            panic!()
        };
        assert!(matches!(left.kind, ExprKind::Str("x=")));
        let ExprKind::Call { callee, args } = right.kind else {
            panic!("expected str() call")
        };
        assert!(matches!(callee.kind, ExprKind::Variable("str")));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn match_with_wildcard_arm() {
        let arena = Bump::new();
        let prog = parse_ok(&arena, "r = match x { 1 -> \"one\", _ -> \"other\" }\n");
        let StmtKind::VarDecl { initializer, .. } = prog[0].kind else {
            panic!()
        };
        let ExprKind::Match { arms, .. } = initializer.kind else {
            panic!()
        };
        assert_eq!(arms.len(), 2);
        assert!(arms[0].pattern.is_some());
        assert!(arms[1].pattern.is_none());
    }

    #[test]
    fn allow_and_import_forms() {
        let arena = Bump::new();
        let prog = parse_ok(&arena, "allow read \"/tmp/*\"\nimport \"lib\" as helpers\n");
        assert!(matches!(
            prog[0].kind,
            StmtKind::Allow {
                kind: AllowKind::Read,
                target: "/tmp/*"
            }
        ));
        assert!(matches!(
            prog[1].kind,
            StmtKind::Import {
                path: "lib",
                alias: Some("helpers")
            }
        ));
    }

    #[test]
    fn on_failure_and_parallel_blocks() {
        let arena = Bump::new();
        let prog = parse_ok(&arena, "on failure {\n print(error)\n}\nparallel {\n x = 1\n}\n");
        assert!(matches!(prog[0].kind, StmtKind::OnFailure(_)));
        assert!(matches!(prog[1].kind, StmtKind::Parallel(_)));
    }

    #[test]
    fn error_reports_line_and_column() {
        let arena = Bump::new();
        let err = parse("x = \n", &arena).unwrap_err();
        assert!(err.contains("[line 1"), "got: {err}");
    }

    #[test]
    fn recovery_reports_multiple_errors() {
        let arena = Bump::new();
        let err = parse("let = 1\nlet = 2\n", &arena).unwrap_err();
        assert!(err.lines().count() >= 2, "got: {err}");
    }

    #[test]
    fn keywords_allowed_as_property_names() {
        let arena = Bump::new();
        let prog = parse_ok(&arena, "x = result.exec\n");
        let StmtKind::VarDecl { initializer, .. } = prog[0].kind else {
            panic!()
        };
        assert!(matches!(
            initializer.kind,
            ExprKind::Property { name: "exec", .. }
        ));
    }
}
