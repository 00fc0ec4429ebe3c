//! Abstract Syntax Tree for PEL
//!
//! This module defines the AST types produced by the parser. Nothing here is
//! resolved or typed yet: names are plain strings and unit suffixes are the
//! identifiers as written.

use crate::common::{NodeId, Span};
use serde::{Deserialize, Serialize};

/// Top-level AST
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ast {
    pub model_name: Option<Ident>,
    pub decls: Vec<Decl>,
    pub span: Span,
}

impl Ast {
    pub fn params(&self) -> impl Iterator<Item = &ParamDecl> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Param(p) => Some(p),
            _ => None,
        })
    }

    pub fn rates(&self) -> impl Iterator<Item = &RateDecl> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Rate(r) => Some(r),
            _ => None,
        })
    }

    pub fn constraints(&self) -> impl Iterator<Item = &ConstraintDecl> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Constraint(c) => Some(c),
            _ => None,
        })
    }

    pub fn policies(&self) -> impl Iterator<Item = &PolicyDecl> {
        self.decls.iter().filter_map(|d| match d {
            Decl::Policy(p) => Some(p),
            _ => None,
        })
    }
}

/// Identifier with its location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }
}

/// Top-level declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Decl {
    Param(ParamDecl),
    Rate(RateDecl),
    Constraint(ConstraintDecl),
    Policy(PolicyDecl),
}

impl Decl {
    pub fn name(&self) -> &Ident {
        match self {
            Decl::Param(p) => &p.name,
            Decl::Rate(r) => &r.name,
            Decl::Constraint(c) => &c.name,
            Decl::Policy(p) => &p.name,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Decl::Param(p) => p.span,
            Decl::Rate(r) => r.span,
            Decl::Constraint(c) => c.span,
            Decl::Policy(p) => p.span,
        }
    }
}

// ==================== DECLARATIONS ====================

/// `param name: Type = expr { provenance }` or `param name: Type ~ Dist(...)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDecl {
    pub id: NodeId,
    pub name: Ident,
    pub ty: TypeExpr,
    pub value: ParamValue,
    pub provenance: Option<MetaBlock>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParamValue {
    Scalar(Expr),
    Distribution(DistributionExpr),
}

/// Distribution descriptor, e.g. `Normal(mean = 10 USD, std = 1 USD)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionExpr {
    pub name: Ident,
    pub args: Vec<DistArg>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistArg {
    pub name: Option<Ident>,
    pub value: Expr,
}

/// `rate name: Type = expr` (`var` is accepted as a synonym)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateDecl {
    pub id: NodeId,
    pub keyword: RateKeyword,
    pub name: Ident,
    pub ty: TypeExpr,
    pub expr: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateKeyword {
    Rate,
    Var,
}

/// `constraint name: predicate { severity: error, message: "..." }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintDecl {
    pub id: NodeId,
    pub name: Ident,
    pub predicate: Expr,
    pub meta: Option<MetaBlock>,
    pub span: Span,
}

/// `policy name when trigger { target = expr; ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecl {
    pub id: NodeId,
    pub name: Ident,
    pub trigger: Expr,
    pub actions: Vec<Assignment>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub target: Ident,
    pub value: Expr,
    pub span: Span,
}

/// Key/value metadata block attached to parameters and constraints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaBlock {
    pub entries: Vec<MetaEntry>,
    pub span: Span,
}

impl MetaBlock {
    pub fn get(&self, key: &str) -> Option<&MetaEntry> {
        self.entries.iter().find(|e| e.key.name == key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaEntry {
    pub key: Ident,
    pub value: MetaValue,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaValue {
    String(String),
    Number(f64),
    Ident(String),
}

// ==================== TYPES ====================

/// Declared type annotation, e.g. `Currency / Duration`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypeExpr {
    Named(Ident),
    Binary {
        op: TypeOp,
        left: Box<TypeExpr>,
        right: Box<TypeExpr>,
        span: Span,
    },
}

impl TypeExpr {
    pub fn span(&self) -> Span {
        match self {
            TypeExpr::Named(ident) => ident.span,
            TypeExpr::Binary { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeOp {
    Mul,
    Div,
}

// ==================== EXPRESSIONS ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),
    Name(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Call {
        callee: Ident,
        args: Vec<Expr>,
    },
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Number(NumberLit),
    Bool(bool),
}

/// Numeric literal with optional percent sign and unit suffix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberLit {
    pub value: f64,
    pub percent: bool,
    pub unit: Option<UnitSuffix>,
}

/// `USD`, `mo`, `USD/mo` or `/mo` after a number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSuffix {
    pub numerator: Option<Ident>,
    pub denominator: Option<Ident>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}
