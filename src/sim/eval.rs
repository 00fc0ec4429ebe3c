//! Node evaluation
//!
//! A run evaluates every IR node once per step in ascending id order. A
//! failing operation does not abort immediately: the failure is carried as a
//! fault through the nodes that read it, and only surfaces when an entity,
//! constraint or policy actually consumes it. An `if` whose untaken branch
//! divides by zero is therefore fine.

use crate::ast::{BinaryOp, UnaryOp};
use crate::builtins::FunctionTable;
use crate::ir::{IrModule, NodeIdx, NodeKind, Origin};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a runtime failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    DivisionByZero,
    NaNPropagation,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::DivisionByZero => f.write_str("division by zero"),
            FaultKind::NaNPropagation => f.write_str("non-finite value"),
        }
    }
}

/// Where a failure started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub node: NodeIdx,
}

/// Per-module data shared by every run
#[derive(Debug)]
pub struct ExecutionPlan {
    /// Nodes reading each node
    consumers: Vec<Vec<NodeIdx>>,
    /// Whether a node belongs to a policy
    policy_node: Vec<bool>,
    /// Entity node ids, by entity index
    pub entity_nodes: Vec<NodeIdx>,
    /// Sample nodes in id order
    pub sample_nodes: Vec<NodeIdx>,
}

impl ExecutionPlan {
    pub fn new(module: &IrModule) -> Self {
        let mut consumers = vec![Vec::new(); module.nodes.len()];
        for node in &module.nodes {
            for &op in &node.operands {
                consumers[op as usize].push(node.id);
            }
        }
        let policy_node = module
            .nodes
            .iter()
            .map(|n| matches!(n.origin, Origin::Policy(_)))
            .collect();
        let sample_nodes = module
            .nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Sample { .. }))
            .map(|n| n.id)
            .collect();
        Self {
            consumers,
            policy_node,
            entity_nodes: module.entities.iter().map(|e| e.node).collect(),
            sample_nodes,
        }
    }

    /// Non-policy nodes downstream of `roots` (roots included), ascending
    pub fn downstream(&self, roots: &[NodeIdx]) -> Vec<NodeIdx> {
        let mut seen = vec![false; self.consumers.len()];
        let mut stack: Vec<NodeIdx> = roots.to_vec();
        while let Some(node) = stack.pop() {
            let i = node as usize;
            if seen[i] || self.policy_node[i] {
                continue;
            }
            seen[i] = true;
            stack.extend(self.consumers[i].iter().copied());
        }
        seen.iter()
            .enumerate()
            .filter(|(_, s)| **s)
            .map(|(i, _)| i as NodeIdx)
            .collect()
    }
}

/// Mutable evaluation state of one run
pub struct Evaluator<'m> {
    module: &'m IrModule,
    functions: &'m FunctionTable,
    /// Current step's node values
    values: Vec<f64>,
    faults: Vec<Option<Fault>>,
    /// Value held by each sample node for the whole run
    samples: Vec<f64>,
    /// Final values of the previous step, by entity
    previous: Vec<f64>,
    /// Policy overrides for the current step, by entity
    pinned: Vec<Option<f64>>,
    step: usize,
}

impl<'m> Evaluator<'m> {
    pub fn new(module: &'m IrModule, functions: &'m FunctionTable) -> Self {
        let n = module.nodes.len();
        let entities = module.entities.len();
        Self {
            module,
            functions,
            values: vec![0.0; n],
            faults: vec![None; n],
            samples: vec![0.0; n],
            previous: vec![0.0; entities],
            pinned: vec![None; entities],
            step: 0,
        }
    }

    /// Fix the value of a sample node for this run
    pub fn set_sample(&mut self, node: NodeIdx, value: f64) {
        self.samples[node as usize] = value;
    }

    /// Begin a step: clear overrides
    pub fn begin_step(&mut self, step: usize) {
        self.step = step;
        self.pinned.iter_mut().for_each(|p| *p = None);
    }

    pub fn pin(&mut self, entity: usize, value: f64) {
        self.pinned[entity] = Some(value);
    }

    pub fn value(&self, node: NodeIdx) -> f64 {
        self.values[node as usize]
    }

    pub fn fault(&self, node: NodeIdx) -> Option<Fault> {
        self.faults[node as usize]
    }

    pub fn truth(&self, node: NodeIdx) -> bool {
        self.value(node) != 0.0
    }

    /// Evaluate every node in id order
    pub fn evaluate_all(&mut self) {
        for id in 0..self.module.nodes.len() {
            self.evaluate(id as NodeIdx);
        }
    }

    /// Re-evaluate the given nodes in the given (ascending) order
    pub fn reevaluate(&mut self, nodes: &[NodeIdx]) {
        for &id in nodes {
            self.evaluate(id);
        }
    }

    /// Close the step: remember entity values for `prev`
    pub fn end_step(&mut self, entity_nodes: &[NodeIdx]) {
        for (entity, &node) in entity_nodes.iter().enumerate() {
            self.previous[entity] = self.values[node as usize];
        }
    }

    fn evaluate(&mut self, id: NodeIdx) {
        let (value, fault) = self.compute(id);
        let i = id as usize;
        self.values[i] = value;
        self.faults[i] = fault;
    }

    fn operand(&self, id: NodeIdx, k: usize) -> (f64, Option<Fault>) {
        let op = self.module.nodes[id as usize].operands[k] as usize;
        (self.values[op], self.faults[op])
    }

    fn compute(&self, id: NodeIdx) -> (f64, Option<Fault>) {
        let node = &self.module.nodes[id as usize];
        let truth = |b: bool| if b { 1.0 } else { 0.0 };
        let raw = match &node.kind {
            NodeKind::Constant { value } => return (*value, None),
            NodeKind::Bool { value } => return (truth(*value), None),
            NodeKind::Step => return (self.step as f64, None),
            NodeKind::Sample { .. } => return (self.samples[id as usize], None),
            NodeKind::Param { entity } | NodeKind::Rate { entity } => {
                if let Some(v) = self.pinned[*entity] {
                    return (v, None);
                }
                return self.operand(id, 0);
            }
            NodeKind::Prev { entity } => {
                if self.step == 0 {
                    return self.operand(id, 0);
                }
                return (self.previous[*entity], None);
            }
            NodeKind::If => {
                let (c, cf) = self.operand(id, 0);
                if cf.is_some() {
                    return (f64::NAN, cf);
                }
                return self.operand(id, if c != 0.0 { 1 } else { 2 });
            }
            NodeKind::PolicyGate { .. } => {
                let (t, tf) = self.operand(id, 0);
                if tf.is_some() {
                    return (f64::NAN, tf);
                }
                return self.operand(id, if t != 0.0 { 1 } else { 2 });
            }
            NodeKind::Unary { operator } => {
                let (v, f) = self.operand(id, 0);
                if f.is_some() {
                    return (f64::NAN, f);
                }
                match operator {
                    UnaryOp::Neg => -v,
                    UnaryOp::Not => truth(v == 0.0),
                }
            }
            NodeKind::Binary { operator } => {
                let (l, lf) = self.operand(id, 0);
                // Short circuit: a decided left side hides faults on the right
                match operator {
                    BinaryOp::And if lf.is_none() && l == 0.0 => return (0.0, None),
                    BinaryOp::Or if lf.is_none() && l != 0.0 => return (1.0, None),
                    _ => {}
                }
                let (r, rf) = self.operand(id, 1);
                if let Some(f) = lf.or(rf) {
                    return (f64::NAN, Some(f));
                }
                match operator {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => {
                        if r == 0.0 {
                            return (
                                f64::NAN,
                                Some(Fault {
                                    kind: FaultKind::DivisionByZero,
                                    node: id,
                                }),
                            );
                        }
                        l / r
                    }
                    BinaryOp::Lt => truth(l < r),
                    BinaryOp::Le => truth(l <= r),
                    BinaryOp::Gt => truth(l > r),
                    BinaryOp::Ge => truth(l >= r),
                    BinaryOp::Eq => truth(l == r),
                    BinaryOp::Ne => truth(l != r),
                    BinaryOp::And => truth(r != 0.0),
                    BinaryOp::Or => truth(r != 0.0),
                }
            }
            NodeKind::Call { builtin } => {
                let mut args = Vec::with_capacity(node.operands.len());
                for k in 0..node.operands.len() {
                    let (v, f) = self.operand(id, k);
                    if f.is_some() {
                        return (f64::NAN, f);
                    }
                    args.push(v);
                }
                self.functions.eval(*builtin, &args)
            }
        };

        if raw.is_finite() {
            (raw, None)
        } else {
            (
                raw,
                Some(Fault {
                    kind: FaultKind::NaNPropagation,
                    node: id,
                }),
            )
        }
    }
}
