//! High-level Intermediate Representation (HIR)
//!
//! HIR is the typed model produced by the type checker. It contains:
//! - Resolved types and units for every expression
//! - Resolved names (entity indices instead of strings)
//! - Constant-folded parameter values and validated distributions
//! - The topological evaluation order of rates

use crate::ast::{BinaryOp, UnaryOp};
use crate::builtins::Builtin;
use crate::common::Span;
use crate::diagnostics::CompileError;
use crate::distribution::Distribution;
use crate::resolve::SymbolTable;
use crate::types::Type;
use serde::{Deserialize, Serialize};

/// Typed model
#[derive(Debug, Clone)]
pub struct TypedModel {
    pub name: String,
    pub params: Vec<TypedParam>,
    /// Rates in declaration order
    pub rates: Vec<TypedRate>,
    pub constraints: Vec<TypedConstraint>,
    pub policies: Vec<TypedPolicy>,
    /// Indices into `rates`, dependencies first
    pub rate_order: Vec<usize>,
    pub symbols: SymbolTable,
    /// Non-fatal diagnostics (missing provenance)
    pub warnings: Vec<CompileError>,
}

impl TypedModel {
    pub fn entity_name(&self, entity: EntityRef) -> &str {
        match entity {
            EntityRef::Param(i) => &self.params[i].name,
            EntityRef::Rate(i) => &self.rates[i].name,
        }
    }

    pub fn entity_type(&self, entity: EntityRef) -> Type {
        match entity {
            EntityRef::Param(i) => self.params[i].ty,
            EntityRef::Rate(i) => self.rates[i].ty,
        }
    }

    /// All entities in evaluation order: parameters, then rates topologically
    pub fn evaluation_order(&self) -> Vec<EntityRef> {
        (0..self.params.len())
            .map(EntityRef::Param)
            .chain(self.rate_order.iter().map(|&i| EntityRef::Rate(i)))
            .collect()
    }
}

/// Reference to a parameter or rate by declaration index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRef {
    Param(usize),
    Rate(usize),
}

// ==================== DECLARATIONS ====================

#[derive(Debug, Clone)]
pub struct TypedParam {
    pub name: String,
    pub ty: Type,
    pub value: ParamValue,
    pub provenance: Provenance,
    pub span: Span,
}

/// Resolved parameter value, in canonical units
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Scalar(f64),
    Distribution(Distribution),
}

/// Where a parameter value came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Provenance {
    pub const UNSPECIFIED: &'static str = "unspecified";

    pub fn unspecified() -> Self {
        Self {
            source: Self::UNSPECIFIED.to_string(),
            method: None,
            confidence: None,
        }
    }

    /// Citation string used for lineage
    pub fn citation(&self) -> String {
        match &self.method {
            Some(method) => format!("{} ({})", self.source, method),
            None => self.source.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TypedRate {
    pub name: String,
    pub ty: Type,
    pub expr: TExpr,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct TypedConstraint {
    pub name: String,
    pub predicate: TExpr,
    pub severity: Severity,
    pub message: String,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TypedPolicy {
    pub name: String,
    pub trigger: TExpr,
    pub actions: Vec<TypedAssignment>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TypedAssignment {
    pub target: EntityRef,
    pub value: TExpr,
    pub span: Span,
}

// ==================== EXPRESSIONS ====================

/// Typed expression
#[derive(Debug, Clone)]
pub struct TExpr {
    pub kind: TExprKind,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TExprKind {
    /// Number in canonical units
    Number(f64),
    Bool(bool),
    Entity(EntityRef),
    /// Current step index
    Step,
    Binary {
        op: BinaryOp,
        left: Box<TExpr>,
        right: Box<TExpr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<TExpr>,
    },
    Call {
        builtin: Builtin,
        args: Vec<TExpr>,
    },
    If {
        cond: Box<TExpr>,
        then_branch: Box<TExpr>,
        else_branch: Box<TExpr>,
    },
    /// Previous step's value of an entity, `init` at step 0
    Prev {
        entity: EntityRef,
        init: Box<TExpr>,
    },
    /// Placeholder after an error
    Error,
}

impl TExpr {
    pub fn error(span: Span) -> Self {
        Self {
            kind: TExprKind::Error,
            ty: Type::Error,
            span,
        }
    }

    /// Entities read in the current step. The entity of a `prev` read is
    /// excluded since it refers to the previous step.
    pub fn current_step_refs(&self, out: &mut Vec<EntityRef>) {
        match &self.kind {
            TExprKind::Entity(e) => out.push(*e),
            TExprKind::Number(_) | TExprKind::Bool(_) | TExprKind::Step | TExprKind::Error => {}
            TExprKind::Binary { left, right, .. } => {
                left.current_step_refs(out);
                right.current_step_refs(out);
            }
            TExprKind::Unary { expr, .. } => expr.current_step_refs(out),
            TExprKind::Call { args, .. } => {
                for arg in args {
                    arg.current_step_refs(out);
                }
            }
            TExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.current_step_refs(out);
                then_branch.current_step_refs(out);
                else_branch.current_step_refs(out);
            }
            TExprKind::Prev { init, .. } => init.current_step_refs(out),
        }
    }
}
