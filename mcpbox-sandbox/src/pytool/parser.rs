//! Recursive-descent parser for the tool language

use std::sync::Arc;

use crate::error::SandboxError;
use crate::pytool::ast::*;
use crate::pytool::lexer::{Lexer, RawFsPart, Tok, Token};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Parse a module (sequence of statements).
pub fn parse_module(source: &str) -> Result<Vec<Stmt>, SandboxError> {
    let tokens = Lexer::tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let body = parser.parse_block_until_eof()?;
    Ok(body)
}

/// Parse a single expression (used for f-string interpolations).
pub fn parse_expression(source: &str) -> Result<Expr, SandboxError> {
    let tokens = Lexer::tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    Ok(expr)
}

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::EndOfFile)
    }

    fn line(&self) -> usize {
        self.tokens.get(self.pos).map(|t| t.line).unwrap_or(0)
    }

    fn bump(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn err(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::SyntaxError {
            line: self.line(),
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: Tok, what: &str) -> Result<(), SandboxError> {
        if *self.peek() == expected {
            self.bump();
            Ok(())
        } else {
            Err(self.err(format!("expected {what}, found {:?}", self.peek())))
        }
    }

    fn eat(&mut self, tok: Tok) -> bool {
        if *self.peek() == tok {
            self.bump();
            true
        } else {
            false
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(name) if name == kw)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), SandboxError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{kw}', found {:?}", self.peek())))
        }
    }

    fn expect_name(&mut self, what: &str) -> Result<String, SandboxError> {
        match self.bump() {
            Tok::Name(name) => Ok(name),
            other => Err(self.err(format!("expected {what}, found {other:?}"))),
        }
    }

    // === Statements ===

    fn parse_block_until_eof(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        let mut body = Vec::new();
        while *self.peek() != Tok::EndOfFile {
            body.push(self.parse_statement()?);
        }
        Ok(body)
    }

    /// Parse an indented block after a `:` header.
    fn parse_block(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        self.expect(Tok::Colon, "':'")?;
        self.expect(Tok::Newline, "newline after ':'")?;
        self.expect(Tok::Indent, "indented block")?;
        let mut body = Vec::new();
        while *self.peek() != Tok::Dedent && *self.peek() != Tok::EndOfFile {
            body.push(self.parse_statement()?);
        }
        self.expect(Tok::Dedent, "dedent")?;
        Ok(body)
    }

    fn parse_statement(&mut self) -> Result<Stmt, SandboxError> {
        let line = self.line();
        let kind = match self.peek() {
            Tok::Name(name) => match name.as_str() {
                "if" => self.parse_if()?,
                "while" => self.parse_while()?,
                "for" => self.parse_for()?,
                "def" => self.parse_function(false)?,
                "async" => {
                    self.bump();
                    self.expect_keyword("def")?;
                    self.parse_function_after_def(true)?
                }
                "return" => {
                    self.bump();
                    let value = if *self.peek() == Tok::Newline {
                        None
                    } else {
                        Some(self.parse_expr_list()?)
                    };
                    self.expect(Tok::Newline, "newline")?;
                    StmtKind::Return(value)
                }
                "break" => {
                    self.bump();
                    self.expect(Tok::Newline, "newline")?;
                    StmtKind::Break
                }
                "continue" => {
                    self.bump();
                    self.expect(Tok::Newline, "newline")?;
                    StmtKind::Continue
                }
                "pass" => {
                    self.bump();
                    self.expect(Tok::Newline, "newline")?;
                    StmtKind::Pass
                }
                "import" => {
                    self.bump();
                    let module = self.parse_dotted_name()?;
                    let alias = if self.eat_keyword("as") {
                        Some(self.expect_name("alias")?)
                    } else {
                        None
                    };
                    self.expect(Tok::Newline, "newline")?;
                    StmtKind::Import { module, alias }
                }
                "from" => {
                    return Err(self.err("'from ... import' is not supported; use 'import module'"));
                }
                "raise" => {
                    self.bump();
                    let exc = if *self.peek() == Tok::Newline {
                        None
                    } else {
                        Some(self.parse_expr()?)
                    };
                    self.expect(Tok::Newline, "newline")?;
                    StmtKind::Raise(exc)
                }
                "try" => self.parse_try()?,
                "global" | "nonlocal" | "class" | "with" | "lambda" | "yield" | "del"
                | "assert" => {
                    return Err(self.err(format!("'{name}' is not supported in tool code")));
                }
                _ => self.parse_expr_statement()?,
            },
            _ => self.parse_expr_statement()?,
        };
        Ok(Stmt { line, kind })
    }

    fn parse_dotted_name(&mut self) -> Result<String, SandboxError> {
        let mut name = self.expect_name("module name")?;
        while self.eat(Tok::Dot) {
            name.push('.');
            name.push_str(&self.expect_name("module name")?);
        }
        Ok(name)
    }

    fn parse_if(&mut self) -> Result<StmtKind, SandboxError> {
        self.expect_keyword("if")?;
        let mut branches = Vec::new();
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        branches.push((test, body));

        let mut orelse = Vec::new();
        loop {
            if self.at_keyword("elif") {
                self.bump();
                let test = self.parse_expr()?;
                let body = self.parse_block()?;
                branches.push((test, body));
            } else if self.at_keyword("else") {
                self.bump();
                orelse = self.parse_block()?;
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If { branches, orelse })
    }

    fn parse_while(&mut self) -> Result<StmtKind, SandboxError> {
        self.expect_keyword("while")?;
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(StmtKind::While { test, body })
    }

    fn parse_for(&mut self) -> Result<StmtKind, SandboxError> {
        self.expect_keyword("for")?;
        let target = self.parse_target()?;
        self.expect_keyword("in")?;
        let iter = self.parse_expr_list()?;
        let body = self.parse_block()?;
        Ok(StmtKind::For { target, iter, body })
    }

    /// A for-loop or comprehension target: name or tuple of names.
    fn parse_target(&mut self) -> Result<Expr, SandboxError> {
        let mut names = vec![Expr::Name(self.expect_name("loop variable")?)];
        while self.eat(Tok::Comma) {
            if self.at_keyword("in") {
                break;
            }
            names.push(Expr::Name(self.expect_name("loop variable")?));
        }
        Ok(if names.len() == 1 {
            names.pop().expect("one name")
        } else {
            Expr::Tuple(names)
        })
    }

    fn parse_function(&mut self, is_async: bool) -> Result<StmtKind, SandboxError> {
        self.expect_keyword("def")?;
        self.parse_function_after_def(is_async)
    }

    fn parse_function_after_def(&mut self, is_async: bool) -> Result<StmtKind, SandboxError> {
        let name = self.expect_name("function name")?;
        self.expect(Tok::LParen, "'('")?;

        let mut params = Vec::new();
        while *self.peek() != Tok::RParen {
            let param_name = self.expect_name("parameter name")?;
            let annotation = if self.eat(Tok::Colon) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            let default = if self.eat(Tok::Assign) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            params.push(Param {
                name: param_name,
                annotation,
                default,
            });
            if !self.eat(Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::RParen, "')'")?;

        // Optional return annotation, recorded nowhere
        if self.eat(Tok::Arrow) {
            let _ = self.parse_expr()?;
        }

        let body = self.parse_block()?;
        Ok(StmtKind::FunctionDef(Arc::new(FunctionDef {
            name,
            params,
            body,
            is_async,
        })))
    }

    fn parse_try(&mut self) -> Result<StmtKind, SandboxError> {
        self.expect_keyword("try")?;
        let body = self.parse_block()?;

        let mut handlers = Vec::new();
        while self.at_keyword("except") {
            self.bump();
            let (exc_type, name) = if *self.peek() == Tok::Colon {
                (None, None)
            } else {
                let exc_type = self.expect_name("exception type")?;
                let name = if self.eat_keyword("as") {
                    Some(self.expect_name("exception variable")?)
                } else {
                    None
                };
                (Some(exc_type), name)
            };
            let handler_body = self.parse_block()?;
            handlers.push(ExceptHandler {
                exc_type,
                name,
                body: handler_body,
            });
        }

        let finally = if self.at_keyword("finally") {
            self.bump();
            self.parse_block()?
        } else {
            Vec::new()
        };

        if handlers.is_empty() && finally.is_empty() {
            return Err(self.err("'try' must have an 'except' or 'finally' clause"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            finally,
        })
    }

    fn parse_expr_statement(&mut self) -> Result<StmtKind, SandboxError> {
        let first = self.parse_expr_list()?;

        // Augmented assignment
        let aug = match self.peek() {
            Tok::PlusEq => Some(BinOp::Add),
            Tok::MinusEq => Some(BinOp::Sub),
            Tok::StarEq => Some(BinOp::Mul),
            Tok::SlashEq => Some(BinOp::Div),
            _ => None,
        };
        if let Some(op) = aug {
            self.bump();
            let value = self.parse_expr_list()?;
            self.expect(Tok::Newline, "newline")?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op,
                value,
            });
        }

        // Chained assignment: a = b = value
        if *self.peek() == Tok::Assign {
            let mut targets = vec![first];
            let mut value = None;
            while self.eat(Tok::Assign) {
                let next = self.parse_expr_list()?;
                if *self.peek() == Tok::Assign {
                    targets.push(next);
                } else {
                    value = Some(next);
                }
            }
            self.expect(Tok::Newline, "newline")?;
            return Ok(StmtKind::Assign {
                targets,
                value: value.expect("assignment has a value"),
            });
        }

        self.expect(Tok::Newline, "newline")?;
        Ok(StmtKind::Expr(first))
    }

    // === Expressions ===

    /// Comma-separated expressions become a tuple (`return a, b`).
    fn parse_expr_list(&mut self) -> Result<Expr, SandboxError> {
        let first = self.parse_expr()?;
        if *self.peek() != Tok::Comma {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(Tok::Comma) {
            if matches!(self.peek(), Tok::Newline | Tok::Assign | Tok::RParen) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    pub(crate) fn parse_expr(&mut self) -> Result<Expr, SandboxError> {
        let value = self.parse_or()?;
        if self.at_keyword("if") {
            self.bump();
            let test = self.parse_or()?;
            self.expect_keyword("else")?;
            let orelse = self.parse_expr()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(value),
                orelse: Box::new(orelse),
            });
        }
        Ok(value)
    }

    fn parse_or(&mut self) -> Result<Expr, SandboxError> {
        let first = self.parse_and()?;
        if !self.at_keyword("or") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_keyword("or") {
            values.push(self.parse_and()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOpKind::Or,
            values,
        })
    }

    fn parse_and(&mut self) -> Result<Expr, SandboxError> {
        let first = self.parse_not()?;
        if !self.at_keyword("and") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_keyword("and") {
            values.push(self.parse_not()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOpKind::And,
            values,
        })
    }

    fn parse_not(&mut self) -> Result<Expr, SandboxError> {
        if self.eat_keyword("not") {
            let operand = self.parse_not()?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, SandboxError> {
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();

        loop {
            let op = match self.peek() {
                Tok::EqEq => Some(CmpOp::Eq),
                Tok::NotEq => Some(CmpOp::NotEq),
                Tok::Lt => Some(CmpOp::Lt),
                Tok::Le => Some(CmpOp::LtE),
                Tok::Gt => Some(CmpOp::Gt),
                Tok::Ge => Some(CmpOp::GtE),
                Tok::Name(name) if name == "in" => Some(CmpOp::In),
                Tok::Name(name) if name == "is" => Some(CmpOp::Is),
                Tok::Name(name) if name == "not" => {
                    // `not in`
                    self.bump();
                    self.expect_keyword("in")?;
                    ops.push(CmpOp::NotIn);
                    comparators.push(self.parse_bitor()?);
                    continue;
                }
                _ => None,
            };
            let Some(op) = op else { break };
            self.bump();
            let op = if op == CmpOp::Is && self.eat_keyword("not") {
                CmpOp::IsNot
            } else {
                op
            };
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }

        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                ops,
                comparators,
            })
        }
    }

    fn parse_bitor(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.parse_bitxor()?;
        while self.eat(Tok::Pipe) {
            let right = self.parse_bitxor()?;
            left = Expr::BinOp {
                left: Box::new(left),
                op: BinOp::BitOr,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.parse_bitand()?;
        while self.eat(Tok::Caret) {
            let right = self.parse_bitand()?;
            left = Expr::BinOp {
                left: Box::new(left),
                op: BinOp::BitXor,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.parse_arith()?;
        while self.eat(Tok::Amp) {
            let right = self.parse_arith()?;
            left = Expr::BinOp {
                left: Box::new(left),
                op: BinOp::BitAnd,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_arith(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let right = self.parse_term()?;
            left = Expr::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::DoubleSlash => BinOp::FloorDiv,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let right = self.parse_factor()?;
            left = Expr::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, SandboxError> {
        match self.peek() {
            Tok::Minus => {
                self.bump();
                let operand = self.parse_factor()?;
                Ok(Expr::UnaryOp {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                })
            }
            Tok::Plus => {
                self.bump();
                let operand = self.parse_factor()?;
                Ok(Expr::UnaryOp {
                    op: UnaryOp::Pos,
                    operand: Box::new(operand),
                })
            }
            Tok::Name(name) if name == "await" => {
                self.bump();
                let operand = self.parse_factor()?;
                Ok(Expr::Await(Box::new(operand)))
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr, SandboxError> {
        let base = self.parse_postfix()?;
        if self.eat(Tok::DoubleStar) {
            // Right-associative
            let exponent = self.parse_factor()?;
            return Ok(Expr::BinOp {
                left: Box::new(base),
                op: BinOp::Pow,
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, SandboxError> {
        let mut value = self.parse_atom()?;
        loop {
            match self.peek() {
                Tok::LParen => {
                    self.bump();
                    let (args, kwargs) = self.parse_call_args()?;
                    value = Expr::Call {
                        func: Box::new(value),
                        args,
                        kwargs,
                    };
                }
                Tok::Dot => {
                    self.bump();
                    let attr = self.expect_name("attribute name")?;
                    value = Expr::Attribute {
                        value: Box::new(value),
                        attr,
                    };
                }
                Tok::LBracket => {
                    self.bump();
                    let index = self.parse_subscript()?;
                    self.expect(Tok::RBracket, "']'")?;
                    value = Expr::Subscript {
                        value: Box::new(value),
                        index: Box::new(index),
                    };
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), SandboxError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();

        while *self.peek() != Tok::RParen {
            // keyword argument: name '=' expr (but not name '==')
            let is_kwarg = matches!(
                (self.peek(), self.tokens.get(self.pos + 1).map(|t| &t.tok)),
                (Tok::Name(_), Some(Tok::Assign))
            );
            if is_kwarg {
                let name = self.expect_name("keyword argument")?;
                self.expect(Tok::Assign, "'='")?;
                kwargs.push((name, self.parse_expr()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.err("positional argument follows keyword argument"));
                }
                args.push(self.parse_expr()?);
            }
            if !self.eat(Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::RParen, "')'")?;
        Ok((args, kwargs))
    }

    fn parse_subscript(&mut self) -> Result<Expr, SandboxError> {
        // Slice forms: [a:b], [:b], [a:], [a:b:c], [:]
        let lower = if *self.peek() == Tok::Colon {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        if !self.eat(Tok::Colon) {
            return Ok(*lower.expect("plain subscript has an index"));
        }
        let upper = if matches!(self.peek(), Tok::Colon | Tok::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        let step = if self.eat(Tok::Colon) {
            if *self.peek() == Tok::RBracket {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            }
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn parse_atom(&mut self) -> Result<Expr, SandboxError> {
        match self.bump() {
            Tok::Int(value) => Ok(Expr::Int(value)),
            Tok::Float(value) => Ok(Expr::Float(value)),
            Tok::Str(value) => {
                // Adjacent string literals concatenate
                let mut text = value;
                while matches!(self.peek(), Tok::Str(_)) {
                    if let Tok::Str(next) = self.bump() {
                        text.push_str(&next);
                    }
                }
                Ok(Expr::Str(text))
            }
            Tok::FString(raw_parts) => {
                let mut parts = Vec::with_capacity(raw_parts.len());
                for part in raw_parts {
                    match part {
                        RawFsPart::Literal(text) => parts.push(FStringPart::Literal(text)),
                        RawFsPart::Expr(source) => {
                            parts.push(FStringPart::Expr(parse_expression(&source)?))
                        }
                    }
                }
                Ok(Expr::FString(parts))
            }
            Tok::Name(name) => match name.as_str() {
                "None" => Ok(Expr::None_),
                "True" => Ok(Expr::True_),
                "False" => Ok(Expr::False_),
                _ => Ok(Expr::Name(name)),
            },
            Tok::LParen => {
                if self.eat(Tok::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_expr()?;
                if self.eat(Tok::Comma) {
                    let mut items = vec![first];
                    while *self.peek() != Tok::RParen {
                        items.push(self.parse_expr()?);
                        if !self.eat(Tok::Comma) {
                            break;
                        }
                    }
                    self.expect(Tok::RParen, "')'")?;
                    Ok(Expr::Tuple(items))
                } else {
                    self.expect(Tok::RParen, "')'")?;
                    Ok(first)
                }
            }
            Tok::LBracket => {
                if self.eat(Tok::RBracket) {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_expr()?;
                if self.at_keyword("for") {
                    let (target, iter, cond) = self.parse_comp_clause()?;
                    self.expect(Tok::RBracket, "']'")?;
                    return Ok(Expr::ListComp {
                        elt: Box::new(first),
                        target: Box::new(target),
                        iter: Box::new(iter),
                        cond,
                    });
                }
                let mut items = vec![first];
                while self.eat(Tok::Comma) {
                    if *self.peek() == Tok::RBracket {
                        break;
                    }
                    items.push(self.parse_expr()?);
                }
                self.expect(Tok::RBracket, "']'")?;
                Ok(Expr::List(items))
            }
            Tok::LBrace => {
                if self.eat(Tok::RBrace) {
                    return Ok(Expr::Dict(Vec::new()));
                }
                let first = self.parse_expr()?;
                if self.eat(Tok::Colon) {
                    let first_value = self.parse_expr()?;
                    if self.at_keyword("for") {
                        let (target, iter, cond) = self.parse_comp_clause()?;
                        self.expect(Tok::RBrace, "'}'")?;
                        return Ok(Expr::DictComp {
                            key: Box::new(first),
                            value: Box::new(first_value),
                            target: Box::new(target),
                            iter: Box::new(iter),
                            cond,
                        });
                    }
                    let mut entries = vec![(first, first_value)];
                    while self.eat(Tok::Comma) {
                        if *self.peek() == Tok::RBrace {
                            break;
                        }
                        let key = self.parse_expr()?;
                        self.expect(Tok::Colon, "':'")?;
                        entries.push((key, self.parse_expr()?));
                    }
                    self.expect(Tok::RBrace, "'}'")?;
                    Ok(Expr::Dict(entries))
                } else {
                    // Set display
                    let mut items = vec![first];
                    while self.eat(Tok::Comma) {
                        if *self.peek() == Tok::RBrace {
                            break;
                        }
                        items.push(self.parse_expr()?);
                    }
                    self.expect(Tok::RBrace, "'}'")?;
                    Ok(Expr::Set(items))
                }
            }
            other => Err(self.err(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_comp_clause(
        &mut self,
    ) -> Result<(Expr, Expr, Option<Box<Expr>>), SandboxError> {
        self.expect_keyword("for")?;
        let target = self.parse_target()?;
        self.expect_keyword("in")?;
        let iter = self.parse_or()?;
        let cond = if self.eat_keyword("if") {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        Ok((target, iter, cond))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<Stmt> {
        parse_module(source).unwrap()
    }

    #[test]
    fn parses_main_signature_with_annotations() {
        let module = parse("async def main(x: int, name: str = \"bob\") -> int:\n    return x\n");
        match &module[0].kind {
            StmtKind::FunctionDef(def) => {
                assert!(def.is_async);
                assert_eq!(def.name, "main");
                assert_eq!(def.params.len(), 2);
                assert_eq!(def.params[0].name, "x");
                assert!(def.params[0].annotation.is_some());
                assert!(def.params[1].default.is_some());
            }
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn parses_if_elif_else() {
        let module = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        match &module[0].kind {
            StmtKind::If { branches, orelse } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(orelse.len(), 1);
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn parses_chained_comparison() {
        let module = parse("r = 1 < x <= 10\n");
        match &module[0].kind {
            StmtKind::Assign { value, .. } => match value {
                Expr::Compare { ops, .. } => assert_eq!(ops.len(), 2),
                other => panic!("expected comparison, got {other:?}"),
            },
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn parses_comprehensions() {
        parse("squares = [x * x for x in range(10) if x % 2 == 0]\n");
        parse("index = {k: v for k, v in items}\n");
    }

    #[test]
    fn parses_try_except_finally() {
        let module = parse(
            "try:\n    risky()\nexcept ValueError as e:\n    handle(e)\nexcept:\n    pass\nfinally:\n    cleanup()\n",
        );
        match &module[0].kind {
            StmtKind::Try {
                handlers, finally, ..
            } => {
                assert_eq!(handlers.len(), 2);
                assert_eq!(handlers[0].exc_type.as_deref(), Some("ValueError"));
                assert_eq!(handlers[0].name.as_deref(), Some("e"));
                assert!(handlers[1].exc_type.is_none());
                assert_eq!(finally.len(), 1);
            }
            other => panic!("expected try, got {other:?}"),
        }
    }

    #[test]
    fn parses_await_call_chain() {
        let module = parse("async def main(http):\n    r = await http.get(url)\n    return r[\"body\"]\n");
        match &module[0].kind {
            StmtKind::FunctionDef(def) => {
                assert!(matches!(
                    &def.body[0].kind,
                    StmtKind::Assign { value: Expr::Await(_), .. }
                ));
            }
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn parses_kwargs() {
        let module = parse("r = f(1, 2, key=3)\n");
        match &module[0].kind {
            StmtKind::Assign { value, .. } => match value {
                Expr::Call { args, kwargs, .. } => {
                    assert_eq!(args.len(), 2);
                    assert_eq!(kwargs.len(), 1);
                    assert_eq!(kwargs[0].0, "key");
                }
                other => panic!("expected call, got {other:?}"),
            },
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn parses_slices() {
        parse("x = items[1:3]\n");
        parse("x = items[:3]\n");
        parse("x = items[::2]\n");
        parse("x = items[-1]\n");
    }

    #[test]
    fn rejects_unsupported_statements() {
        assert!(parse_module("from os import path\n").is_err());
        assert!(parse_module("class Foo:\n    pass\n").is_err());
        assert!(parse_module("with open('f') as f:\n    pass\n").is_err());
        assert!(parse_module("lambda x: x\n").is_err());
    }

    #[test]
    fn rejects_positional_after_keyword() {
        assert!(parse_module("f(a=1, 2)\n").is_err());
    }

    #[test]
    fn union_annotation_renders() {
        let module = parse("async def main(x: str | None):\n    return x\n");
        match &module[0].kind {
            StmtKind::FunctionDef(def) => {
                let annotation = def.params[0].annotation.as_ref().unwrap();
                assert_eq!(annotation_to_string(annotation), "str | None");
            }
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn optional_annotation_renders() {
        let module = parse("async def main(x: Optional[int]):\n    return x\n");
        match &module[0].kind {
            StmtKind::FunctionDef(def) => {
                let annotation = def.params[0].annotation.as_ref().unwrap();
                assert_eq!(annotation_to_string(annotation), "Optional[int]");
            }
            other => panic!("expected function, got {other:?}"),
        }
    }
}
