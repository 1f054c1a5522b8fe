//! Pratt-style expression parser plus a statement/block parser, both driven
//! by two-token lookahead over the [`Lexer`].
//!
//! Blocks are closed by `parse_indented_block` matching a `DEDENT` against
//! the indent level its opening `INDENT` recorded. A `DEDENT` that belongs
//! to an outer block is left unconsumed so the call stack unwinds and the
//! right enclosing frame gets to consume it -- one token closes as many
//! nested blocks as it needs to.

use crate::ast::{BinaryOp, Block, Expr, FunctionLiteral, Literal, Param, Stmt, UnaryOp};
use crate::lexer::{Lexer, ParseError, Token, TokenKind};

enum Infix {
    Call,
    Index,
    Property,
    Binary(BinaryOp),
}

fn infix_for(kind: &TokenKind) -> Option<(u8, Infix)> {
    match kind {
        TokenKind::Sym(s) => match s.as_str() {
            "(" => Some((14, Infix::Call)),
            "[" => Some((14, Infix::Index)),
            "." => Some((14, Infix::Property)),
            "==" => Some((6, Infix::Binary(BinaryOp::Eq))),
            "!=" => Some((6, Infix::Binary(BinaryOp::Ne))),
            "<" => Some((6, Infix::Binary(BinaryOp::Lt))),
            "<=" => Some((6, Infix::Binary(BinaryOp::Le))),
            ">" => Some((6, Infix::Binary(BinaryOp::Gt))),
            ">=" => Some((6, Infix::Binary(BinaryOp::Ge))),
            "+" => Some((8, Infix::Binary(BinaryOp::Add))),
            "-" => Some((8, Infix::Binary(BinaryOp::Sub))),
            "*" => Some((10, Infix::Binary(BinaryOp::Mul))),
            "/" => Some((10, Infix::Binary(BinaryOp::Div))),
            "%" => Some((10, Infix::Binary(BinaryOp::Mod))),
            "^" => Some((12, Infix::Binary(BinaryOp::Pow))),
            _ => None,
        },
        TokenKind::Id(s) => match s.as_str() {
            "and" => Some((2, Infix::Binary(BinaryOp::And))),
            "or" => Some((2, Infix::Binary(BinaryOp::Or))),
            _ => None,
        },
        _ => None,
    }
}

pub struct Parser {
    lexer: Lexer,
    cur: Token,
    peek: Token,
}

impl Parser {
    pub fn new(source: &str) -> Result<Parser, ParseError> {
        let mut lexer = Lexer::new(source);
        let cur = lexer.next_token()?;
        let peek = lexer.next_token()?;
        Ok(Parser { lexer, cur, peek })
    }

    pub fn parse_program(source: &str) -> Result<Block, ParseError> {
        let mut parser = Parser::new(source)?;
        parser.program()
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        let next = self.lexer.next_token()?;
        self.cur = std::mem::replace(&mut self.peek, next);
        Ok(())
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError { message: message.into(), line: self.cur.line }
    }

    fn is_id(&self, text: &str) -> bool {
        matches!(&self.cur.kind, TokenKind::Id(s) if s == text)
    }

    fn is_sym(&self, text: &str) -> bool {
        matches!(&self.cur.kind, TokenKind::Sym(s) if s == text)
    }

    fn is_separator(&self) -> bool {
        self.cur.kind == TokenKind::Nl || self.is_sym(";")
    }

    fn skip_separators(&mut self) -> Result<(), ParseError> {
        while self.is_separator() {
            self.advance()?;
        }
        Ok(())
    }

    fn expect_id(&mut self) -> Result<String, ParseError> {
        match self.cur.kind.clone() {
            TokenKind::Id(s) => {
                self.advance()?;
                Ok(s)
            }
            other => Err(self.error(format!("expected identifier, found {other}"))),
        }
    }

    fn expect_sym(&mut self, sym: &str) -> Result<(), ParseError> {
        if self.is_sym(sym) {
            self.advance()
        } else {
            Err(self.error(format!("expected '{sym}', found {}", self.cur.kind)))
        }
    }

    /// A statement must be followed by a separator (`NL` or `;`, consumed
    /// here) or by whatever token closes the enclosing block (`DEDENT`/
    /// `EOI`, left for the caller).
    fn finish_statement(&mut self) -> Result<(), ParseError> {
        if self.is_separator() {
            self.advance()
        } else {
            match &self.cur.kind {
                TokenKind::Dedent(_) | TokenKind::Eoi => Ok(()),
                other => Err(self.error(format!("expected end of statement, found {other}"))),
            }
        }
    }

    fn program(&mut self) -> Result<Block, ParseError> {
        self.skip_separators()?;
        let mut stmts = Vec::new();
        loop {
            self.skip_separators()?;
            match &self.cur.kind {
                TokenKind::Eoi => break,
                TokenKind::Dedent(level) if level.is_empty() => {
                    self.advance()?;
                }
                TokenKind::Dedent(_) => return Err(self.error("unexpected dedent")),
                TokenKind::Indent(_) => return Err(self.error("unexpected indent")),
                _ => stmts.push(self.statement()?),
            }
        }
        Ok(stmts)
    }

    /// Expects the current token to be the `INDENT` that opens this block.
    fn parse_indented_block(&mut self) -> Result<Block, ParseError> {
        let old_indent = match &self.cur.kind {
            TokenKind::Indent(old) => old.clone(),
            other => return Err(self.error(format!("expected indented block, found {other}"))),
        };
        self.advance()?;
        let mut stmts = Vec::new();
        loop {
            self.skip_separators()?;
            match &self.cur.kind {
                TokenKind::Dedent(level) if *level == old_indent => {
                    self.advance()?;
                    break;
                }
                TokenKind::Dedent(_) => break,
                TokenKind::Eoi => break,
                _ => stmts.push(self.statement()?),
            }
        }
        Ok(stmts)
    }

    /// `:` has already been consumed; expects `NL INDENT ... DEDENT`.
    fn suite(&mut self) -> Result<Block, ParseError> {
        if self.cur.kind != TokenKind::Nl {
            return Err(self.error("expected newline after ':'"));
        }
        self.advance()?;
        if !matches!(self.cur.kind, TokenKind::Indent(_)) {
            return Err(self.error("expected an indented block"));
        }
        self.parse_indented_block()
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        if self.is_id("let") {
            self.let_statement()
        } else if self.is_id("if") {
            self.if_statement()
        } else if self.is_id("while") {
            self.while_statement()
        } else if self.is_id("return") {
            self.return_statement()
        } else if matches!(&self.cur.kind, TokenKind::Id(_)) && matches!(&self.peek.kind, TokenKind::Sym(s) if s == "=")
        {
            self.set_statement()
        } else {
            let e = self.expr(0)?;
            self.finish_statement()?;
            Ok(Stmt::ExprStat(e))
        }
    }

    fn let_statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.cur.line;
        self.advance()?;
        let name = self.expect_id()?;
        if self.is_sym("(") {
            let func = self.function_tail(line)?;
            Ok(Stmt::Let { name, value: Expr::Function(func), line })
        } else {
            self.expect_sym("=")?;
            let value = self.expr(0)?;
            self.finish_statement()?;
            Ok(Stmt::Let { name, value, line })
        }
    }

    fn set_statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.cur.line;
        let name = self.expect_id()?;
        self.expect_sym("=")?;
        let value = self.expr(0)?;
        self.finish_statement()?;
        Ok(Stmt::Set { name, value, line })
    }

    fn if_statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.cur.line;
        self.advance()?;
        let cond = self.expr(0)?;
        self.expect_sym(":")?;
        let then_block = self.suite()?;
        let else_block = if self.is_id("else") {
            self.advance()?;
            if self.is_id("if") {
                Some(vec![self.if_statement()?])
            } else {
                self.expect_sym(":")?;
                Some(self.suite()?)
            }
        } else {
            None
        };
        Ok(Stmt::If { cond, then_block, else_block, line })
    }

    fn while_statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.cur.line;
        self.advance()?;
        let cond = self.expr(0)?;
        self.expect_sym(":")?;
        let body = self.suite()?;
        Ok(Stmt::While { cond, body, line })
    }

    fn return_statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.cur.line;
        self.advance()?;
        let value = self.expr(0)?;
        self.finish_statement()?;
        Ok(Stmt::Return { value, line })
    }

    fn function_tail(&mut self, line: usize) -> Result<FunctionLiteral, ParseError> {
        self.expect_sym("(")?;
        let mut params = Vec::new();
        if !self.is_sym(")") {
            loop {
                let name = self.expect_id()?;
                let type_name = if self.is_sym(":") {
                    self.advance()?;
                    Some(self.expect_id()?)
                } else {
                    None
                };
                params.push(Param { name, type_name });
                if self.is_sym(",") {
                    self.advance()?;
                    continue;
                }
                break;
            }
        }
        self.expect_sym(")")?;
        self.expect_sym(":")?;
        let body = self.suite()?;
        Ok(FunctionLiteral { params, body, line })
    }

    fn expr(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.prefix()?;
        loop {
            let (prec, op) = match infix_for(&self.cur.kind) {
                Some(x) => x,
                None => break,
            };
            if prec < min_prec {
                break;
            }
            let line = self.cur.line;
            self.advance()?;
            lhs = match op {
                Infix::Call => {
                    let args = self.call_args()?;
                    Expr::Call(Box::new(lhs), args, line)
                }
                Infix::Index => {
                    let index = self.expr(0)?;
                    self.expect_sym("]")?;
                    Expr::Index(Box::new(lhs), Box::new(index), line)
                }
                Infix::Property => {
                    let name = self.expect_id()?;
                    Expr::Property(Box::new(lhs), name, line)
                }
                Infix::Binary(bop) => {
                    // `^` recurses at precedence-1 for right-associativity;
                    // every other binary operator recurses at precedence+1.
                    let rhs_min = if bop == BinaryOp::Pow { prec.saturating_sub(1) } else { prec + 1 };
                    let rhs = self.expr(rhs_min)?;
                    Expr::Binary(bop, Box::new(lhs), Box::new(rhs), line)
                }
            };
        }
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, ParseError> {
        let line = self.cur.line;
        if self.is_sym("-") {
            self.advance()?;
            let operand = self.expr(11)?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand), line));
        }
        if self.is_sym("+") {
            self.advance()?;
            return self.expr(11);
        }
        if self.is_id("not") {
            self.advance()?;
            let operand = self.expr(5)?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand), line));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let line = self.cur.line;
        match self.cur.kind.clone() {
            TokenKind::Int(n) => {
                self.advance()?;
                Ok(Expr::Literal(Literal::Int(n), line))
            }
            TokenKind::Real(n) => {
                self.advance()?;
                Ok(Expr::Literal(Literal::Real(n), line))
            }
            TokenKind::Str(s) => {
                self.advance()?;
                Ok(Expr::Literal(Literal::Str(s), line))
            }
            TokenKind::Id(name) => match name.as_str() {
                "true" => {
                    self.advance()?;
                    Ok(Expr::Literal(Literal::Bool(true), line))
                }
                "false" => {
                    self.advance()?;
                    Ok(Expr::Literal(Literal::Bool(false), line))
                }
                "nil" => {
                    self.advance()?;
                    Ok(Expr::Literal(Literal::Nil, line))
                }
                "fun" => {
                    self.advance()?;
                    let f = self.function_tail(line)?;
                    Ok(Expr::Function(f))
                }
                _ => {
                    self.advance()?;
                    Ok(Expr::Identifier(name, line))
                }
            },
            TokenKind::Sym(s) if s == "(" => {
                self.advance()?;
                let e = self.expr(0)?;
                self.expect_sym(")")?;
                Ok(e)
            }
            TokenKind::Sym(s) if s == "[" => {
                self.advance()?;
                let mut items = Vec::new();
                if !self.is_sym("]") {
                    loop {
                        items.push(self.expr(0)?);
                        if self.is_sym(",") {
                            self.advance()?;
                            continue;
                        }
                        break;
                    }
                }
                self.expect_sym("]")?;
                Ok(Expr::List(items, line))
            }
            other => Err(self.error(format!("unexpected token {other}"))),
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if !self.is_sym(")") {
            loop {
                args.push(self.expr(0)?);
                if self.is_sym(",") {
                    self.advance()?;
                    continue;
                }
                break;
            }
        }
        self.expect_sym(")")?;
        Ok(args)
    }
}
