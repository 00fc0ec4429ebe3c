//! Intermediate representation
//!
//! The IR is an immutable DAG of typed nodes in topological order: every
//! operand id is smaller than the id of the node reading it, so a single
//! ascending pass evaluates the whole model. Entities (parameters and rates),
//! constraints and policies are tables pointing into the node list.
//!
//! The module serializes to a stable JSON document and can be read back as
//! simulation input.

pub mod lineage;
mod lower;

pub use lineage::Lineage;
pub use lower::lower;

use crate::ast::{BinaryOp, UnaryOp};
use crate::builtins::Builtin;
use crate::distribution::Distribution;
use crate::hir::{Provenance, Severity};
use crate::types::Type;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type NodeIdx = u32;

/// IR construction, loading and calibration failures
#[derive(Debug, Error)]
pub enum IrError {
    #[error("invalid IR document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed IR: {0}")]
    Invalid(String),

    #[error("`{0}` is not a parameter of this model")]
    UnknownParameter(String),

    #[error("cannot calibrate `{name}`: {message}")]
    Calibration { name: String, message: String },
}

/// Compiled model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrModule {
    pub model: String,
    /// Interned citation strings; lineage sets index into this
    pub citations: Vec<String>,
    /// Parameters then rates, in evaluation order
    pub entities: Vec<IrEntity>,
    pub constraints: Vec<IrConstraint>,
    pub policies: Vec<IrPolicy>,
    pub nodes: Vec<IrNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Param,
    Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrEntity {
    pub name: String,
    pub kind: EntityKind,
    pub ty: Type,
    /// Node holding the entity's per-step value
    pub node: NodeIdx,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrConstraint {
    pub name: String,
    pub severity: Severity,
    pub message: String,
    /// Boolean predicate node
    pub node: NodeIdx,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrPolicy {
    pub name: String,
    pub trigger: NodeIdx,
    /// `PolicyGate` nodes, one per assignment
    pub gates: Vec<NodeIdx>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrNode {
    pub id: NodeIdx,
    #[serde(flatten)]
    pub kind: NodeKind,
    pub ty: Type,
    pub operands: Vec<NodeIdx>,
    pub lineage: Lineage,
    pub origin: Origin,
}

/// Operation performed by a node. Operand layouts are fixed per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NodeKind {
    Constant { value: f64 },
    Bool { value: bool },
    /// Parameter value; operand: `[value]`
    Param { entity: usize },
    /// Rate value; operand: `[expr]`
    Rate { entity: usize },
    Binary { operator: BinaryOp },
    Unary { operator: UnaryOp },
    Call { builtin: Builtin },
    /// operands: `[cond, then, else]`
    If,
    /// Previous step's final value of `entity`; operand: `[initial]`
    Prev { entity: usize },
    /// Step index
    Step,
    /// One draw per Monte Carlo run, the mean in deterministic mode
    Sample { distribution: Distribution },
    /// operands: `[trigger, value, base]`
    PolicyGate { policy: usize, target: usize },
}

/// Declaration a node was lowered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Entity(usize),
    Constraint(usize),
    Policy(usize),
}

impl IrModule {
    /// Pretty JSON document. Identical modules give identical bytes.
    pub fn to_json(&self) -> Result<String, IrError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a document produced by [`IrModule::to_json`]
    pub fn from_json(json: &str) -> Result<Self, IrError> {
        let module: IrModule = serde_json::from_str(json)?;
        module.validate()?;
        Ok(module)
    }

    /// Structural checks on a loaded module
    pub fn validate(&self) -> Result<(), IrError> {
        let n = self.nodes.len();
        for (i, node) in self.nodes.iter().enumerate() {
            if node.id as usize != i {
                return Err(IrError::Invalid(format!("node {} stored at index {}", node.id, i)));
            }
            if let Some(op) = node.operands.iter().find(|&&op| op >= node.id) {
                return Err(IrError::Invalid(format!(
                    "node {} reads node {} which is not before it",
                    node.id, op
                )));
            }
            let expected = match node.kind {
                NodeKind::Constant { .. }
                | NodeKind::Bool { .. }
                | NodeKind::Step
                | NodeKind::Sample { .. } => Some(0),
                NodeKind::Param { .. }
                | NodeKind::Rate { .. }
                | NodeKind::Unary { .. }
                | NodeKind::Prev { .. } => Some(1),
                NodeKind::Binary { .. } => Some(2),
                NodeKind::If | NodeKind::PolicyGate { .. } => Some(3),
                NodeKind::Call { .. } => None,
            };
            if expected.is_some_and(|e| e != node.operands.len()) {
                return Err(IrError::Invalid(format!(
                    "node {} has {} operands",
                    node.id,
                    node.operands.len()
                )));
            }
            self.validate_references(node)?;
            if let Some(&c) = node.lineage.ids().iter().find(|&&c| c as usize >= self.citations.len()) {
                return Err(IrError::Invalid(format!(
                    "node {} cites unknown citation {}",
                    node.id, c
                )));
            }
        }

        let node_refs = self
            .entities
            .iter()
            .map(|e| e.node)
            .chain(self.constraints.iter().map(|c| c.node))
            .chain(self.policies.iter().flat_map(|p| std::iter::once(p.trigger).chain(p.gates.iter().copied())));
        if let Some(bad) = node_refs.into_iter().find(|&id| id as usize >= n) {
            return Err(IrError::Invalid(format!("reference to missing node {}", bad)));
        }

        for (index, decl) in self.entities.iter().enumerate() {
            let owner = match (decl.kind, &self.node(decl.node).kind) {
                (EntityKind::Param, NodeKind::Param { entity })
                | (EntityKind::Rate, NodeKind::Rate { entity }) => Some(*entity),
                _ => None,
            };
            if owner != Some(index) {
                return Err(IrError::Invalid(format!(
                    "entity `{}` does not point at its own value node",
                    decl.name
                )));
            }
        }
        for (index, decl) in self.policies.iter().enumerate() {
            for &gate in &decl.gates {
                if !matches!(self.node(gate).kind, NodeKind::PolicyGate { policy, .. } if policy == index) {
                    return Err(IrError::Invalid(format!(
                        "policy `{}` lists node {} which is not one of its gates",
                        decl.name, gate
                    )));
                }
            }
        }
        Ok(())
    }

    /// Table indices carried by a single node
    fn validate_references(&self, node: &IrNode) -> Result<(), IrError> {
        let entities = self.entities.len();
        let invalid = |what: &str, index: usize| {
            Err(IrError::Invalid(format!(
                "node {} refers to {} {}",
                node.id, what, index
            )))
        };
        match &node.kind {
            NodeKind::Param { entity }
            | NodeKind::Rate { entity }
            | NodeKind::Prev { entity } => {
                if *entity >= entities {
                    return invalid("entity", *entity);
                }
                if matches!(node.kind, NodeKind::Param { .. } | NodeKind::Rate { .. })
                    && self.entities[*entity].node != node.id
                {
                    return invalid("foreign entity", *entity);
                }
            }
            NodeKind::PolicyGate { policy, target } => {
                if *policy >= self.policies.len() {
                    return invalid("policy", *policy);
                }
                if *target >= entities {
                    return invalid("entity", *target);
                }
            }
            NodeKind::Sample { distribution } => {
                if let Err(message) = distribution.validate() {
                    return Err(IrError::Invalid(format!("node {}: {}", node.id, message)));
                }
            }
            _ => {}
        }
        match node.origin {
            Origin::Entity(e) if e >= entities => invalid("origin entity", e),
            Origin::Constraint(c) if c >= self.constraints.len() => invalid("origin constraint", c),
            Origin::Policy(p) if p >= self.policies.len() => invalid("origin policy", p),
            _ => Ok(()),
        }
    }

    pub fn entity(&self, name: &str) -> Option<(usize, &IrEntity)> {
        self.entities.iter().enumerate().find(|(_, e)| e.name == name)
    }

    pub fn node(&self, id: NodeIdx) -> &IrNode {
        &self.nodes[id as usize]
    }

    /// Citation strings of a node's lineage
    pub fn citations_of(&self, id: NodeIdx) -> Vec<&str> {
        self.node(id)
            .lineage
            .ids()
            .iter()
            .filter_map(|&c| self.citations.get(c as usize).map(String::as_str))
            .collect()
    }

    /// Copy of this module with the named parameters drawn from fitted
    /// distributions instead of their source values
    pub fn recalibrated(&self, overrides: &IndexMap<String, Distribution>) -> Result<Self, IrError> {
        let mut module = self.clone();
        for (name, dist) in overrides {
            let Some((_, entity)) = module.entity(name) else {
                return Err(IrError::UnknownParameter(name.clone()));
            };
            if entity.kind != EntityKind::Param {
                return Err(IrError::UnknownParameter(name.clone()));
            }
            let calibration_error = |message: String| IrError::Calibration {
                name: name.clone(),
                message,
            };
            dist.validate().map_err(calibration_error)?;
            let unit = entity.ty.unit();
            match unit {
                None => {
                    return Err(calibration_error(
                        "Boolean parameters cannot follow a distribution".to_string(),
                    ));
                }
                Some(u) if matches!(dist, Distribution::Beta { .. }) && !u.is_dimensionless() => {
                    return Err(calibration_error(format!(
                        "Beta samples lie in [0, 1] but `{}` is `{}`",
                        name, u
                    )));
                }
                Some(_) => {}
            }

            let value_node = module.nodes[entity.node as usize]
                .operands
                .first()
                .copied()
                .ok_or_else(|| IrError::Invalid(format!("parameter `{}` has no value", name)))?;
            let node = &mut module.nodes[value_node as usize];
            node.kind = NodeKind::Sample {
                distribution: *dist,
            };
            node.operands.clear();
            tracing::debug!(parameter = %name, distribution = %dist, "recalibrated");
        }
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_forward_operand() {
        let module = IrModule {
            model: "m".into(),
            citations: vec![],
            entities: vec![],
            constraints: vec![],
            policies: vec![],
            nodes: vec![IrNode {
                id: 0,
                kind: NodeKind::Unary {
                    operator: UnaryOp::Neg,
                },
                ty: Type::dimensionless(),
                operands: vec![0],
                lineage: Lineage::empty(),
                origin: Origin::Entity(0),
            }],
        };
        assert!(matches!(module.validate(), Err(IrError::Invalid(_))));
    }
}
