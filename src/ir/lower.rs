//! HIR to IR lowering
//!
//! Entities are lowered in evaluation order and each expression post-order,
//! so operands always precede their consumers.

use super::lineage::{self, CitationTable, Lineage};
use super::{
    EntityKind, IrConstraint, IrEntity, IrError, IrModule, IrNode, IrPolicy, NodeIdx, NodeKind,
    Origin,
};
use crate::hir::{EntityRef, ParamValue, TExpr, TExprKind, TypedModel};
use crate::types::Type;
use rustc_hash::FxHashMap;

/// Lower a typed model into an IR module
pub fn lower(model: &TypedModel) -> Result<IrModule, IrError> {
    let module = Lowering::new(model).run()?;
    tracing::info!(
        model = %module.model,
        nodes = module.nodes.len(),
        citations = module.citations.len(),
        "lowered to IR"
    );
    Ok(module)
}

struct Lowering<'a> {
    model: &'a TypedModel,
    order: Vec<EntityRef>,
    entity_index: FxHashMap<EntityRef, usize>,
    entity_nodes: Vec<Option<NodeIdx>>,
    nodes: Vec<IrNode>,
    own_citation: Vec<Option<u32>>,
    citations: CitationTable,
    origin: Origin,
}

impl<'a> Lowering<'a> {
    fn new(model: &'a TypedModel) -> Self {
        let order = model.evaluation_order();
        let entity_index = order.iter().enumerate().map(|(i, e)| (*e, i)).collect();
        Self {
            model,
            entity_nodes: vec![None; order.len()],
            order,
            entity_index,
            nodes: Vec::new(),
            own_citation: Vec::new(),
            citations: CitationTable::new(),
            origin: Origin::Entity(0),
        }
    }

    fn run(mut self) -> Result<IrModule, IrError> {
        let model = self.model;
        let mut entities = Vec::with_capacity(self.order.len());
        for (index, &entity) in self.order.clone().iter().enumerate() {
            self.origin = Origin::Entity(index);
            entities.push(self.lower_entity(index, entity)?);
        }

        let mut constraints = Vec::with_capacity(model.constraints.len());
        for (i, constraint) in model.constraints.iter().enumerate() {
            self.origin = Origin::Constraint(i);
            let node = self.lower_expr(&constraint.predicate)?;
            constraints.push(IrConstraint {
                name: constraint.name.clone(),
                severity: constraint.severity,
                message: constraint.message.clone(),
                node,
            });
        }

        let mut policies = Vec::with_capacity(model.policies.len());
        for (p, policy) in model.policies.iter().enumerate() {
            self.origin = Origin::Policy(p);
            let trigger = self.lower_expr(&policy.trigger)?;
            let mut gates = Vec::with_capacity(policy.actions.len());
            for action in &policy.actions {
                let value = self.lower_expr(&action.value)?;
                let target = self.entity_idx(action.target)?;
                let base = self.entity_node(action.target)?;
                let ty = model.entity_type(action.target);
                gates.push(self.push(
                    NodeKind::PolicyGate { policy: p, target },
                    ty,
                    vec![trigger, value, base],
                ));
            }
            policies.push(IrPolicy {
                name: policy.name.clone(),
                trigger,
                gates,
            });
        }

        let entity_nodes: Vec<NodeIdx> = entities.iter().map(|e: &IrEntity| e.node).collect();
        lineage::propagate(&mut self.nodes, &self.own_citation, &entity_nodes);

        Ok(IrModule {
            model: model.name.clone(),
            citations: self.citations.into_strings(),
            entities,
            constraints,
            policies,
            nodes: self.nodes,
        })
    }

    fn lower_entity(&mut self, index: usize, entity: EntityRef) -> Result<IrEntity, IrError> {
        let model = self.model;
        let (name, ty, kind, provenance, value) = match entity {
            EntityRef::Param(i) => {
                let param = &model.params[i];
                let value = match param.value {
                    ParamValue::Scalar(value) => {
                        self.push(NodeKind::Constant { value }, param.ty, vec![])
                    }
                    ParamValue::Distribution(distribution) => {
                        self.push(NodeKind::Sample { distribution }, param.ty, vec![])
                    }
                };
                (
                    &param.name,
                    param.ty,
                    EntityKind::Param,
                    Some(param.provenance.clone()),
                    value,
                )
            }
            EntityRef::Rate(i) => {
                let rate = &model.rates[i];
                let value = self.lower_expr(&rate.expr)?;
                (&rate.name, rate.ty, EntityKind::Rate, None, value)
            }
        };

        let node_kind = match kind {
            EntityKind::Param => NodeKind::Param { entity: index },
            EntityKind::Rate => NodeKind::Rate { entity: index },
        };
        let node = self.push(node_kind, ty, vec![value]);
        if let Some(provenance) = &provenance {
            let citation = self.citations.intern(&provenance.citation());
            self.own_citation[node as usize] = Some(citation);
        }
        self.entity_nodes[index] = Some(node);

        Ok(IrEntity {
            name: name.clone(),
            kind,
            ty,
            node,
            provenance,
        })
    }

    fn lower_expr(&mut self, expr: &TExpr) -> Result<NodeIdx, IrError> {
        let (kind, operands) = match &expr.kind {
            TExprKind::Number(value) => (NodeKind::Constant { value: *value }, vec![]),
            TExprKind::Bool(value) => (NodeKind::Bool { value: *value }, vec![]),
            TExprKind::Entity(entity) => return self.entity_node(*entity),
            TExprKind::Step => (NodeKind::Step, vec![]),
            TExprKind::Binary { op, left, right } => {
                let l = self.lower_expr(left)?;
                let r = self.lower_expr(right)?;
                (NodeKind::Binary { operator: *op }, vec![l, r])
            }
            TExprKind::Unary { op, expr } => {
                let operand = self.lower_expr(expr)?;
                (NodeKind::Unary { operator: *op }, vec![operand])
            }
            TExprKind::Call { builtin, args } => {
                let operands = args
                    .iter()
                    .map(|a| self.lower_expr(a))
                    .collect::<Result<Vec<_>, _>>()?;
                (NodeKind::Call { builtin: *builtin }, operands)
            }
            TExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.lower_expr(cond)?;
                let t = self.lower_expr(then_branch)?;
                let e = self.lower_expr(else_branch)?;
                (NodeKind::If, vec![c, t, e])
            }
            TExprKind::Prev { entity, init } => {
                let init = self.lower_expr(init)?;
                let entity = self.entity_idx(*entity)?;
                (NodeKind::Prev { entity }, vec![init])
            }
            TExprKind::Error => {
                return Err(IrError::Invalid(
                    "cannot lower a model that failed type checking".into(),
                ));
            }
        };
        Ok(self.push(kind, expr.ty, operands))
    }

    fn entity_idx(&self, entity: EntityRef) -> Result<usize, IrError> {
        self.entity_index.get(&entity).copied().ok_or_else(|| {
            IrError::Invalid(format!(
                "`{}` is missing from the evaluation order",
                self.model.entity_name(entity)
            ))
        })
    }

    fn entity_node(&self, entity: EntityRef) -> Result<NodeIdx, IrError> {
        let idx = self.entity_idx(entity)?;
        self.entity_nodes[idx].ok_or_else(|| {
            IrError::Invalid(format!(
                "`{}` is read before it is defined",
                self.model.entity_name(entity)
            ))
        })
    }

    fn push(&mut self, kind: NodeKind, ty: Type, operands: Vec<NodeIdx>) -> NodeIdx {
        let id = self.nodes.len() as NodeIdx;
        self.nodes.push(IrNode {
            id,
            kind,
            ty,
            operands,
            lineage: Lineage::empty(),
            origin: self.origin,
        });
        self.own_citation.push(None);
        id
    }
}
