//! IR tests: lowering, lineage, serialization and recalibration

use indexmap::IndexMap;
use pel::compile;
use pel::distribution::Distribution;
use pel::ir::{EntityKind, IrError, IrModule, NodeKind, Origin};
use pretty_assertions::assert_eq;

const SAAS: &str = r#"
model saas {
    param price: Currency = 50 USD { source: "pricing page", method: "observed" }
    param signups: Count ~ Normal(100, 10) { source: "funnel", method: "trailing average" }
    param churn: Fraction = 3% { source: "cohorts" }
    rate revenue: Currency = customers * price
    rate customers: Count = prev(customers, 0) * (1 - churn) + signups
    constraint positive: revenue > 0 USD { severity: error }
    policy promo when churn > 5% { price = 45 USD }
}
"#;

#[test]
fn test_entities_in_evaluation_order() {
    let module = compile(SAAS).unwrap();
    let names: Vec<(&str, EntityKind)> = module
        .entities
        .iter()
        .map(|e| (e.name.as_str(), e.kind))
        .collect();
    assert_eq!(
        names,
        vec![
            ("price", EntityKind::Param),
            ("signups", EntityKind::Param),
            ("churn", EntityKind::Param),
            ("customers", EntityKind::Rate),
            ("revenue", EntityKind::Rate),
        ]
    );
}

#[test]
fn test_operands_precede_consumers() {
    let module = compile(SAAS).unwrap();
    for node in &module.nodes {
        assert!(node.operands.iter().all(|&op| op < node.id), "node {}", node.id);
    }
    module.validate().unwrap();
}

#[test]
fn test_distribution_lowers_to_sample() {
    let module = compile(SAAS).unwrap();
    let (_, signups) = module.entity("signups").unwrap();
    let value = module.node(signups.node).operands[0];
    assert!(matches!(
        module.node(value).kind,
        NodeKind::Sample {
            distribution: Distribution::Normal { mean, std }
        } if mean == 100.0 && std == 10.0
    ));
}

#[test]
fn test_policy_gates() {
    let module = compile(SAAS).unwrap();
    assert_eq!(module.policies.len(), 1);
    let policy = &module.policies[0];
    assert_eq!(policy.gates.len(), 1);
    let gate = module.node(policy.gates[0]);
    let (price_index, price) = module.entity("price").unwrap();
    assert!(matches!(gate.kind, NodeKind::PolicyGate { policy: 0, target } if target == price_index));
    assert_eq!(gate.operands[0], policy.trigger);
    assert_eq!(gate.operands[2], price.node);
}

#[test]
fn test_lineage_follows_dependencies() {
    let module = compile(SAAS).unwrap();
    let (_, revenue) = module.entity("revenue").unwrap();
    let citations = module.citations_of(revenue.node);
    assert_eq!(
        citations,
        vec![
            "pricing page (observed)",
            "funnel (trailing average)",
            "cohorts",
        ]
    );

    let (_, price) = module.entity("price").unwrap();
    assert_eq!(module.citations_of(price.node), vec!["pricing page (observed)"]);
}

#[test]
fn test_lineage_through_prev() {
    let module = compile(
        "param inflow: Count = 5 { source: \"ledger\" }
         rate stock: Count = prev(stock, 0) + inflow",
    )
    .unwrap();
    let (_, stock) = module.entity("stock").unwrap();
    assert_eq!(module.citations_of(stock.node), vec!["ledger"]);
}

#[test]
fn test_compilation_is_deterministic() {
    let a = compile(SAAS).unwrap().to_json().unwrap();
    let b = compile(SAAS).unwrap().to_json().unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_json_document_loads_back() {
    let module = compile(SAAS).unwrap();
    let json = module.to_json().unwrap();
    assert!(json.contains("\"op\": \"sample\""));
    let loaded = IrModule::from_json(&json).unwrap();
    assert_eq!(loaded, module);
}

#[test]
fn test_malformed_document_is_rejected() {
    assert!(matches!(IrModule::from_json("{\"model\": 3}"), Err(IrError::Json(_))));

    let mut module = compile(SAAS).unwrap();
    let last = module.nodes.len() as u32;
    module.constraints[0].node = last + 10;
    let json = module.to_json().unwrap();
    assert!(matches!(IrModule::from_json(&json), Err(IrError::Invalid(_))));
}

#[test]
fn test_recalibration_replaces_value() {
    let module = compile(SAAS).unwrap();
    let mut overrides = IndexMap::new();
    overrides.insert(
        "churn".to_string(),
        Distribution::Beta {
            alpha: 2.0,
            beta: 60.0,
        },
    );
    let calibrated = module.recalibrated(&overrides).unwrap();
    let (_, churn) = calibrated.entity("churn").unwrap();
    let value = calibrated.node(churn.node).operands[0];
    assert!(matches!(
        calibrated.node(value).kind,
        NodeKind::Sample {
            distribution: Distribution::Beta { .. }
        }
    ));
    calibrated.validate().unwrap();
    // The source module is untouched
    assert_ne!(calibrated, module);
}

#[test]
fn test_recalibration_errors() {
    let module = compile(SAAS).unwrap();

    let mut overrides = IndexMap::new();
    overrides.insert("revenue".to_string(), Distribution::Normal { mean: 1.0, std: 0.1 });
    assert!(matches!(
        module.recalibrated(&overrides),
        Err(IrError::UnknownParameter(name)) if name == "revenue"
    ));

    let mut overrides = IndexMap::new();
    overrides.insert("price".to_string(), Distribution::Beta { alpha: 1.0, beta: 1.0 });
    assert!(matches!(
        module.recalibrated(&overrides),
        Err(IrError::Calibration { .. })
    ));

    let mut overrides = IndexMap::new();
    overrides.insert("price".to_string(), Distribution::Normal { mean: 1.0, std: -1.0 });
    assert!(matches!(
        module.recalibrated(&overrides),
        Err(IrError::Calibration { .. })
    ));
}

// ==================== Loader bounds ====================

fn reload(module: &IrModule) -> Result<IrModule, IrError> {
    IrModule::from_json(&module.to_json().unwrap())
}

const SMALL: &str = "param p: Count = 1 { source: \"x\" }\nrate r: Count = p * 2";

#[test]
fn test_param_node_entity_out_of_range() {
    let mut module = compile(SMALL).unwrap();
    let (_, p) = module.entity("p").unwrap();
    let node = p.node as usize;
    module.nodes[node].kind = NodeKind::Param { entity: 99 };
    assert!(matches!(reload(&module), Err(IrError::Invalid(_))));
}

#[test]
fn test_rate_node_claims_another_entity() {
    let mut module = compile(SMALL).unwrap();
    let (p_index, _) = module.entity("p").unwrap();
    let (_, r) = module.entity("r").unwrap();
    let node = r.node as usize;
    module.nodes[node].kind = NodeKind::Rate { entity: p_index };
    assert!(matches!(reload(&module), Err(IrError::Invalid(_))));
}

#[test]
fn test_entity_pointing_at_wrong_node() {
    let mut module = compile(SMALL).unwrap();
    let (_, p) = module.entity("p").unwrap();
    let value = module.node(p.node).operands[0];
    module.entities[0].node = value;
    assert!(matches!(reload(&module), Err(IrError::Invalid(_))));
}

#[test]
fn test_origin_out_of_range() {
    for origin in [Origin::Entity(42), Origin::Constraint(0), Origin::Policy(3)] {
        let mut module = compile(SMALL).unwrap();
        module.nodes[0].origin = origin;
        assert!(
            matches!(reload(&module), Err(IrError::Invalid(_))),
            "{:?} accepted",
            origin
        );
    }
}

#[test]
fn test_policy_gate_bounds() {
    let mut module = compile(SAAS).unwrap();
    let gate = module.policies[0].gates[0] as usize;
    module.nodes[gate].kind = NodeKind::PolicyGate { policy: 5, target: 0 };
    assert!(matches!(reload(&module), Err(IrError::Invalid(_))));

    let mut module = compile(SAAS).unwrap();
    module.policies[0].gates = vec![module.policies[0].trigger];
    assert!(matches!(reload(&module), Err(IrError::Invalid(_))));
}

#[test]
fn test_invalid_sample_distribution() {
    let mut module = compile(SAAS).unwrap();
    let (_, signups) = module.entity("signups").unwrap();
    let value = module.node(signups.node).operands[0] as usize;
    module.nodes[value].kind = NodeKind::Sample {
        distribution: Distribution::Normal { mean: 1.0, std: -2.0 },
    };
    assert!(matches!(reload(&module), Err(IrError::Invalid(_))));
}
