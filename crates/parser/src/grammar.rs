//! Recursive-descent parser over the token stream. Operator precedence,
//! low to high: comparison, additive, multiplicative, unary, primary.
//!
//! Any disallowed operator is rejected the moment it is recognized as a
//! token, before an `Expr` node is ever built for it (§3.2).

use veritas_core::error::{KernelError, KernelResult, RejectionCategory};
use veritas_core::ir::{BinOp, CmpOp, Expr, NodeKind, Param, Sign, TypeTag, UnOp, SUPPORTED_NODES};
use veritas_core::Intent;

use crate::lexer::{Lexer, Token, TokenKind};

pub fn parse_intent(source: &str) -> KernelResult<Intent> {
    let tokens = Lexer::new(source)
        .tokenize()
        .map_err(|(line, column, message)| KernelError::ParseError { line, column, message })?;
    let mut parser = Parser::new(tokens);
    parser.parse_intent()
}

/// Builds the recovery hint enumerating the whitelist by category (§4.6).
fn whitelist_hint() -> String {
    let mut by_category: Vec<(&str, Vec<&str>)> = Vec::new();
    for kind in SUPPORTED_NODES {
        let cat = kind.category();
        if let Some(entry) = by_category.iter_mut().find(|(c, _)| *c == cat) {
            entry.1.push(kind.as_str());
        } else {
            by_category.push((cat, vec![kind.as_str()]));
        }
    }
    let parts: Vec<String> = by_category
        .into_iter()
        .map(|(cat, kinds)| format!("{}: {{{}}}", cat, kinds.join(", ")))
        .collect();
    format!("supported node kinds are {}", parts.join("; "))
}

fn unsupported(kind: NodeKind) -> KernelError {
    KernelError::unsupported_constraint(kind.as_str(), whitelist_hint())
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> KernelResult<Token> {
        if self.current().kind == kind {
            Ok(self.advance())
        } else {
            let tok = self.current();
            Err(KernelError::ParseError {
                line: tok.line,
                column: tok.column,
                message: format!("expected {:?}, found {:?}", kind, tok.kind),
            })
        }
    }

    fn expect_ident(&mut self) -> KernelResult<String> {
        let tok = self.current().clone();
        match tok.kind {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(KernelError::ParseError {
                line: tok.line,
                column: tok.column,
                message: format!("expected identifier, found {:?}", other),
            }),
        }
    }

    pub fn parse_intent(&mut self) -> KernelResult<Intent> {
        self.expect(TokenKind::KwIntent)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::LBrace)?;

        let mut intent = Intent::new(name);
        intent.params = params;

        loop {
            match &self.current().kind {
                TokenKind::KwGuard => {
                    self.advance();
                    self.expect(TokenKind::LBrace)?;
                    intent.constraints = self.parse_block_expressions()?;
                    self.expect(TokenKind::RBrace)?;
                }
                TokenKind::KwSolve => {
                    // Reserved for future solver hints; parsed and discarded.
                    self.advance();
                    self.expect(TokenKind::LBrace)?;
                    self.skip_balanced_braces()?;
                    self.expect(TokenKind::RBrace)?;
                }
                TokenKind::KwVerify => {
                    self.advance();
                    self.expect(TokenKind::LBrace)?;
                    intent.post_conditions = self.parse_block_expressions()?;
                    self.expect(TokenKind::RBrace)?;
                }
                TokenKind::RBrace => break,
                other => {
                    let tok = self.current();
                    return Err(KernelError::ParseError {
                        line: tok.line,
                        column: tok.column,
                        message: format!("expected guard/solve/verify/'}}', found {:?}", other),
                    });
                }
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(intent)
    }

    fn skip_balanced_braces(&mut self) -> KernelResult<()> {
        let mut depth = 1usize;
        while depth > 0 {
            match &self.current().kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => depth -= 1,
                TokenKind::Eof => {
                    let tok = self.current();
                    return Err(KernelError::ParseError {
                        line: tok.line,
                        column: tok.column,
                        message: "unexpected end of input inside solve block".into(),
                    });
                }
                _ => {}
            }
            if depth > 0 {
                self.advance();
            }
        }
        Ok(())
    }

    fn parse_params(&mut self) -> KernelResult<Vec<Param>> {
        let mut params = Vec::new();
        if self.current().kind == TokenKind::RParen {
            return Ok(params);
        }
        loop {
            let name = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let type_tag = self.parse_type_tag()?;
            params.push(Param::new(name, type_tag));
            if self.current().kind == TokenKind::Comma {
                self.advance();
                continue;
            }
            break;
        }
        Ok(params)
    }

    fn parse_type_tag(&mut self) -> KernelResult<TypeTag> {
        let name = self.expect_ident()?;
        match name.as_str() {
            "int" => Ok(TypeTag::Int),
            "uint" => Ok(TypeTag::UInt),
            "address" => Ok(TypeTag::Address),
            "bool" => Ok(TypeTag::Bool),
            "decimal" => {
                // decimal(scale)
                if self.current().kind == TokenKind::LParen {
                    self.advance();
                    let tok = self.advance();
                    let scale = match tok.kind {
                        TokenKind::IntLiteral(v) if v >= 0 => v as u32,
                        other => {
                            return Err(KernelError::ParseError {
                                line: tok.line,
                                column: tok.column,
                                message: format!("expected non-negative integer scale, found {:?}", other),
                            })
                        }
                    };
                    self.expect(TokenKind::RParen)?;
                    Ok(TypeTag::Decimal { scale })
                } else {
                    Ok(TypeTag::Decimal { scale: 0 })
                }
            }
            other => {
                let tok = self.current();
                Err(KernelError::ParseError {
                    line: tok.line,
                    column: tok.column,
                    message: format!("unknown type tag '{other}'"),
                })
            }
        }
    }

    fn parse_block_expressions(&mut self) -> KernelResult<Vec<Expr>> {
        let mut exprs = Vec::new();
        while self.current().kind != TokenKind::RBrace {
            exprs.push(self.parse_expr()?);
            if self.current().kind == TokenKind::Semicolon {
                self.advance();
            }
        }
        Ok(exprs)
    }

    fn parse_expr(&mut self) -> KernelResult<Expr> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> KernelResult<Expr> {
        let lhs = self.parse_additive()?;
        let op = match &self.current().kind {
            TokenKind::EqEq => CmpOp::Eq,
            TokenKind::NotEq => CmpOp::Ne,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::Le => CmpOp::Le,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::Ge => CmpOp::Ge,
            TokenKind::KwAnd => return Err(unsupported(NodeKind::BoolAnd)),
            TokenKind::KwOr => return Err(unsupported(NodeKind::BoolOr)),
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_additive()?;
        if matches!(self.current().kind, TokenKind::KwAnd) {
            return Err(unsupported(NodeKind::BoolAnd));
        }
        if matches!(self.current().kind, TokenKind::KwOr) {
            return Err(unsupported(NodeKind::BoolOr));
        }
        Ok(Expr::Compare { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
    }

    fn parse_additive(&mut self) -> KernelResult<Expr> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match &self.current().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                TokenKind::Amp => return Err(unsupported(NodeKind::BitAnd)),
                TokenKind::Pipe => return Err(unsupported(NodeKind::BitOr)),
                TokenKind::Caret => return Err(unsupported(NodeKind::BitXor)),
                TokenKind::LtLt => return Err(unsupported(NodeKind::LShift)),
                TokenKind::GtGt => return Err(unsupported(NodeKind::RShift)),
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> KernelResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match &self.current().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                TokenKind::StarStar => return Err(unsupported(NodeKind::Pow)),
                TokenKind::SlashSlash => return Err(unsupported(NodeKind::FloorDiv)),
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> KernelResult<Expr> {
        match &self.current().kind {
            TokenKind::Plus => {
                self.advance();
                Ok(Expr::Unary { op: UnOp::Plus, expr: Box::new(self.parse_unary()?) })
            }
            TokenKind::Minus => {
                self.advance();
                Ok(Expr::Unary { op: UnOp::Minus, expr: Box::new(self.parse_unary()?) })
            }
            TokenKind::Tilde => Err(unsupported(NodeKind::BitNot)),
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> KernelResult<Expr> {
        let primary = self.parse_primary()?;
        match &self.current().kind {
            TokenKind::Dot => Err(unsupported(NodeKind::Attribute)),
            TokenKind::LBracket => Err(unsupported(NodeKind::Subscript)),
            TokenKind::LParen if matches!(primary, Expr::Identifier(_)) => Err(unsupported(NodeKind::Call)),
            _ => Ok(primary),
        }
    }

    fn parse_primary(&mut self) -> KernelResult<Expr> {
        let tok = self.current().clone();
        match tok.kind {
            TokenKind::IntLiteral(v) => {
                self.advance();
                Ok(Expr::IntLiteral(v))
            }
            TokenKind::DecimalLiteral(unscaled, scale) => {
                self.advance();
                Ok(Expr::DecimalLiteral { unscaled, scale })
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Identifier(name))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            other => Err(KernelError::ParseError {
                line: tok.line,
                column: tok.column,
                message: format!("unexpected token {:?} in expression", other),
            }),
        }
    }
}
