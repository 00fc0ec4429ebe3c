//! Parser for PEL
//!
//! A recursive descent parser that produces an AST from a token stream.
//! Binary expressions use precedence climbing. Parsing stops at the first
//! syntax error; the error carries the offending token's location.

use crate::ast::*;
use crate::common::{IdGenerator, NodeId, Span};
use crate::diagnostics::{CompileError, SourceFile};
use crate::lexer::{Token, TokenKind};
use crate::types::is_unit_symbol;

type Result<T> = std::result::Result<T, CompileError>;

/// Parse a token stream into an AST
pub fn parse(tokens: &[Token], file: &SourceFile) -> Result<Ast> {
    let mut parser = Parser::new(tokens, file);
    let ast = parser.parse_program()?;
    tracing::debug!(decls = ast.decls.len(), "parsed model");
    Ok(ast)
}

/// Parser state
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    id_gen: IdGenerator,
    file: &'a SourceFile,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], file: &'a SourceFile) -> Self {
        Self {
            tokens,
            pos: 0,
            id_gen: IdGenerator::new(),
            file,
        }
    }

    fn next_id(&mut self) -> NodeId {
        self.id_gen.next()
    }

    fn current(&self) -> &'a Token {
        let tokens = self.tokens;
        match tokens.get(self.pos) {
            Some(tok) => tok,
            None => &tokens[tokens.len() - 1],
        }
    }

    fn peek(&self) -> TokenKind {
        if self.tokens.is_empty() {
            return TokenKind::Eof;
        }
        self.current().kind
    }

    fn peek_n(&self, n: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + n)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek() == kind
    }

    fn at_any(&self, kinds: &[TokenKind]) -> bool {
        kinds.contains(&self.peek())
    }

    fn advance(&mut self) -> &'a Token {
        let tok = self.current();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&'a Token> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(format!("`{}`", kind)))
        }
    }

    fn span(&self) -> Span {
        if self.tokens.is_empty() {
            return Span::dummy();
        }
        self.current().span
    }

    /// Span of the most recently consumed token
    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.span)
            .unwrap_or_else(|| self.span())
    }

    fn unexpected(&self, expected: impl Into<String>) -> CompileError {
        let expected = expected.into();
        let span = self.span();
        if self.at(TokenKind::Eof) {
            CompileError::UnexpectedEof {
                expected,
                span: span.into(),
                src: self.file.to_named_source(),
            }
        } else {
            CompileError::UnexpectedToken {
                expected,
                found: format!("`{}`", self.current().text),
                span: span.into(),
                src: self.file.to_named_source(),
            }
        }
    }

    // ==================== PROGRAM ====================

    fn parse_program(&mut self) -> Result<Ast> {
        let start = self.span();
        let mut decls = Vec::new();

        let model_name = if self.eat(TokenKind::Model) {
            let name = self.parse_ident()?;
            self.expect(TokenKind::LBrace)?;
            while !self.at_any(&[TokenKind::RBrace, TokenKind::Eof]) {
                decls.push(self.parse_decl()?);
            }
            self.expect(TokenKind::RBrace)?;
            Some(name)
        } else {
            None
        };

        while !self.at(TokenKind::Eof) {
            if model_name.is_some() {
                return Err(self.unexpected("end of file after the model block"));
            }
            decls.push(self.parse_decl()?);
        }

        Ok(Ast {
            model_name,
            decls,
            span: start.merge(self.span()),
        })
    }

    // ==================== DECLARATIONS ====================

    fn parse_decl(&mut self) -> Result<Decl> {
        match self.peek() {
            TokenKind::Param => self.parse_param().map(Decl::Param),
            TokenKind::Rate | TokenKind::Var => self.parse_rate().map(Decl::Rate),
            TokenKind::Constraint => self.parse_constraint().map(Decl::Constraint),
            TokenKind::Policy => self.parse_policy().map(Decl::Policy),
            _ => Err(self.unexpected(
                "a declaration (`param`, `rate`, `var`, `constraint` or `policy`)",
            )),
        }
    }

    fn parse_param(&mut self) -> Result<ParamDecl> {
        let start = self.span();
        self.expect(TokenKind::Param)?;
        let name = self.parse_ident()?;
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type()?;

        let value = match self.peek() {
            TokenKind::Eq => {
                self.advance();
                ParamValue::Scalar(self.parse_expr()?)
            }
            TokenKind::Tilde => {
                self.advance();
                ParamValue::Distribution(self.parse_distribution()?)
            }
            _ => return Err(self.unexpected("`=` or `~`")),
        };

        let provenance = if self.at(TokenKind::LBrace) {
            Some(self.parse_meta_block()?)
        } else {
            None
        };

        Ok(ParamDecl {
            id: self.next_id(),
            name,
            ty,
            value,
            provenance,
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_distribution(&mut self) -> Result<DistributionExpr> {
        let name = self.parse_ident()?;
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        while !self.at(TokenKind::RParen) {
            let named = self.at(TokenKind::Ident)
                && self.peek_n(1).map(|t| t.kind) == Some(TokenKind::Eq);
            let arg_name = if named {
                let ident = self.parse_ident()?;
                self.advance();
                Some(ident)
            } else {
                None
            };
            let value = self.parse_expr()?;
            args.push(DistArg {
                name: arg_name,
                value,
            });
            if !self.at(TokenKind::RParen) {
                self.expect(TokenKind::Comma)?;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(DistributionExpr {
            span: name.span.merge(self.prev_span()),
            name,
            args,
        })
    }

    fn parse_rate(&mut self) -> Result<RateDecl> {
        let start = self.span();
        let keyword = if self.eat(TokenKind::Var) {
            RateKeyword::Var
        } else {
            self.expect(TokenKind::Rate)?;
            RateKeyword::Rate
        };
        let name = self.parse_ident()?;
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type()?;
        self.expect(TokenKind::Eq)?;
        let expr = self.parse_expr()?;
        Ok(RateDecl {
            id: self.next_id(),
            keyword,
            name,
            ty,
            expr,
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_constraint(&mut self) -> Result<ConstraintDecl> {
        let start = self.span();
        self.expect(TokenKind::Constraint)?;
        let name = self.parse_ident()?;
        self.expect(TokenKind::Colon)?;
        let predicate = self.parse_expr()?;
        let meta = if self.at(TokenKind::LBrace) {
            Some(self.parse_meta_block()?)
        } else {
            None
        };
        Ok(ConstraintDecl {
            id: self.next_id(),
            name,
            predicate,
            meta,
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_policy(&mut self) -> Result<PolicyDecl> {
        let start = self.span();
        self.expect(TokenKind::Policy)?;
        let name = self.parse_ident()?;
        self.expect(TokenKind::When)?;
        let trigger = self.parse_expr()?;
        self.expect(TokenKind::LBrace)?;

        let mut actions = Vec::new();
        while !self.at_any(&[TokenKind::RBrace, TokenKind::Eof]) {
            let target = self.parse_ident()?;
            self.expect(TokenKind::Eq)?;
            let value = self.parse_expr()?;
            actions.push(Assignment {
                span: target.span.merge(value.span),
                target,
                value,
            });
            while self.at_any(&[TokenKind::Semi, TokenKind::Comma]) {
                self.advance();
            }
        }
        if actions.is_empty() {
            return Err(self.unexpected("an assignment `target = expr`"));
        }
        self.expect(TokenKind::RBrace)?;

        Ok(PolicyDecl {
            id: self.next_id(),
            name,
            trigger,
            actions,
            span: start.merge(self.prev_span()),
        })
    }

    /// `{ key: value, ... }` with optional separators
    fn parse_meta_block(&mut self) -> Result<MetaBlock> {
        let start = self.span();
        self.expect(TokenKind::LBrace)?;
        let mut entries = Vec::new();
        while !self.at(TokenKind::RBrace) {
            let key = self.parse_ident()?;
            self.expect(TokenKind::Colon)?;
            let value = match self.peek() {
                TokenKind::StringLit => {
                    let text = &self.advance().text;
                    MetaValue::String(unquote(text))
                }
                TokenKind::IntLit | TokenKind::FloatLit => {
                    MetaValue::Number(self.parse_number_text()?)
                }
                TokenKind::Minus => {
                    self.advance();
                    MetaValue::Number(-self.parse_number_text()?)
                }
                TokenKind::Ident => MetaValue::Ident(self.advance().text.clone()),
                _ => return Err(self.unexpected("a string, number or identifier")),
            };
            entries.push(MetaEntry {
                span: key.span.merge(self.prev_span()),
                key,
                value,
            });
            if !self.at(TokenKind::RBrace) {
                self.expect(TokenKind::Comma)?;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(MetaBlock {
            entries,
            span: start.merge(self.prev_span()),
        })
    }

    // ==================== TYPES ====================

    fn parse_type(&mut self) -> Result<TypeExpr> {
        let mut left = self.parse_type_atom()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => TypeOp::Mul,
                TokenKind::Slash => TypeOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_type_atom()?;
            let span = left.span().merge(right.span());
            left = TypeExpr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_type_atom(&mut self) -> Result<TypeExpr> {
        if self.eat(TokenKind::LParen) {
            let ty = self.parse_type()?;
            self.expect(TokenKind::RParen)?;
            Ok(ty)
        } else if self.at(TokenKind::Ident) {
            Ok(TypeExpr::Named(self.parse_ident()?))
        } else {
            Err(self.unexpected("a type"))
        }
    }

    // ==================== EXPRESSIONS ====================

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_expr_with_precedence(0)
    }

    fn parse_expr_with_precedence(&mut self, min_prec: u8) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        while let Some((op, prec)) = self.binary_op_info() {
            if prec < min_prec {
                break;
            }

            self.advance();
            // All binary operators are left associative
            let right = self.parse_expr_with_precedence(prec + 1)?;

            let span = left.span.merge(right.span);
            left = Expr {
                id: self.next_id(),
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            };
        }

        Ok(left)
    }

    fn binary_op_info(&self) -> Option<(BinaryOp, u8)> {
        let info = match self.peek() {
            TokenKind::PipePipe => (BinaryOp::Or, 1),
            TokenKind::AmpAmp => (BinaryOp::And, 2),
            TokenKind::EqEq => (BinaryOp::Eq, 3),
            TokenKind::Ne => (BinaryOp::Ne, 3),
            TokenKind::Lt => (BinaryOp::Lt, 4),
            TokenKind::Le => (BinaryOp::Le, 4),
            TokenKind::Gt => (BinaryOp::Gt, 4),
            TokenKind::Ge => (BinaryOp::Ge, 4),
            TokenKind::Plus => (BinaryOp::Add, 5),
            TokenKind::Minus => (BinaryOp::Sub, 5),
            TokenKind::Star => (BinaryOp::Mul, 6),
            TokenKind::Slash => (BinaryOp::Div, 6),
            _ => return None,
        };
        Some(info)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_primary(),
        };
        let start = self.span();
        self.advance();
        let expr = self.parse_unary()?;
        let span = start.merge(expr.span);
        Ok(Expr {
            id: self.next_id(),
            kind: ExprKind::Unary {
                op,
                expr: Box::new(expr),
            },
            span,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let start = self.span();
        let kind = match self.peek() {
            TokenKind::IntLit | TokenKind::FloatLit => {
                ExprKind::Literal(Literal::Number(self.parse_number_literal()?))
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Literal(Literal::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Literal(Literal::Bool(false))
            }
            TokenKind::Ident => {
                let ident = self.parse_ident()?;
                if self.at(TokenKind::LParen) {
                    let args = self.parse_call_args()?;
                    ExprKind::Call {
                        callee: ident,
                        args,
                    }
                } else {
                    ExprKind::Name(ident.name)
                }
            }
            TokenKind::LParen => {
                self.advance();
                let mut inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                inner.span = start.merge(self.prev_span());
                return Ok(inner);
            }
            TokenKind::If => {
                self.advance();
                let cond = self.parse_expr()?;
                self.expect(TokenKind::Then)?;
                let then_branch = self.parse_expr()?;
                self.expect(TokenKind::Else)?;
                let else_branch = self.parse_expr()?;
                ExprKind::If {
                    cond: Box::new(cond),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                }
            }
            _ => return Err(self.unexpected("an expression")),
        };

        Ok(Expr {
            id: self.next_id(),
            kind,
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        while !self.at(TokenKind::RParen) {
            args.push(self.parse_expr()?);
            if !self.at(TokenKind::RParen) {
                self.expect(TokenKind::Comma)?;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    /// Number, optional `%`, optional unit suffix (`USD`, `mo`, `USD/mo`, `/mo`)
    fn parse_number_literal(&mut self) -> Result<NumberLit> {
        let value = self.parse_number_text()?;
        let percent = self.eat(TokenKind::Percent);

        let numerator = if self.at(TokenKind::Ident) && is_unit_symbol(&self.current().text) {
            Some(self.parse_ident()?)
        } else {
            None
        };

        let slash_unit = self.at(TokenKind::Slash)
            && self
                .peek_n(1)
                .is_some_and(|t| t.kind == TokenKind::Ident && is_unit_symbol(&t.text));
        let denominator = if slash_unit {
            self.advance();
            Some(self.parse_ident()?)
        } else {
            None
        };

        let unit = if numerator.is_some() || denominator.is_some() {
            Some(UnitSuffix {
                numerator,
                denominator,
            })
        } else {
            None
        };

        Ok(NumberLit {
            value,
            percent,
            unit,
        })
    }

    fn parse_number_text(&mut self) -> Result<f64> {
        if !self.at_any(&[TokenKind::IntLit, TokenKind::FloatLit]) {
            return Err(self.unexpected("a number"));
        }
        let tok = self.advance();
        tok.text
            .replace('_', "")
            .parse::<f64>()
            .map_err(|_| CompileError::InvalidLiteral {
                text: tok.text.clone(),
                span: tok.span.into(),
                src: self.file.to_named_source(),
            })
    }

    // ==================== HELPERS ====================

    fn parse_ident(&mut self) -> Result<Ident> {
        if self.at(TokenKind::Ident) {
            let tok = self.advance();
            Ok(Ident::new(tok.text.clone(), tok.span))
        } else {
            Err(self.unexpected("an identifier"))
        }
    }
}

fn unquote(text: &str) -> String {
    let inner = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text);
    inner.replace("\\\"", "\"").replace("\\\\", "\\")
}
