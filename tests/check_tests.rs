//! Type checker tests: names, dependencies, contracts and provenance

use pel::diagnostics::{CompileError, ErrorKind};
use pel::distribution::Distribution;
use pel::hir::{EntityRef, ParamValue, Severity};
use pel::{diagnostics, typecheck};
use pretty_assertions::assert_eq;

#[test]
fn test_forward_reference_is_ordered() {
    let model = typecheck(
        "param price: Currency = 10 USD { source: \"list\" }
         rate revenue: Currency = price * units
         rate units: Count = 5",
    )
    .expect("should type check");
    assert_eq!(model.rate_order, vec![1, 0]);
    assert_eq!(
        model.evaluation_order(),
        vec![EntityRef::Param(0), EntityRef::Rate(1), EntityRef::Rate(0)]
    );
}

#[test]
fn test_cycle_is_reported_with_path() {
    let err = typecheck(
        "rate a: Count = b + 1
         rate b: Count = a * 2",
    )
    .unwrap_err();
    let errors = err.errors();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        CompileError::CircularDependency { cycle, .. } => assert_eq!(cycle, "a -> b -> a"),
        other => panic!("expected a cycle, got {:?}", other),
    }
}

#[test]
fn test_self_reference_is_a_cycle() {
    let err = typecheck("rate a: Count = a + 1").unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::CircularDependency]);
}

#[test]
fn test_prev_breaks_cycles() {
    let model = typecheck("rate stock: Count = prev(stock, 100) + 1").expect("prev is lagged");
    assert_eq!(model.rate_order, vec![0]);
}

#[test]
fn test_undefined_symbol_suggests_spelling() {
    let err = typecheck(
        "param price: Currency = 10 USD { source: \"list\" }
         rate revenue: Currency = prce * 2",
    )
    .unwrap_err();
    match &err.errors()[0] {
        CompileError::UndefinedSymbol { name, help, .. } => {
            assert_eq!(name, "prce");
            assert!(help.as_deref().unwrap_or_default().contains("price"));
        }
        other => panic!("expected UndefinedSymbol, got {:?}", other),
    }
}

#[test]
fn test_all_errors_are_collected() {
    let err = typecheck(
        "param a: Currency = 1 USD { source: \"x\" }
         param b: Duration = 1 mo { source: \"x\" }
         rate c: Currency = a + b
         rate d: Currency = missing * 2",
    )
    .unwrap_err();
    assert_eq!(
        err.kinds(),
        vec![ErrorKind::UnitMismatch, ErrorKind::UndefinedSymbol]
    );
}

#[test]
fn test_parameter_value_must_be_constant() {
    let err = typecheck(
        "param a: Count = 2 { source: \"x\" }
         param b: Count = a * 2 { source: \"x\" }",
    )
    .unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::InvalidSemanticContract]);
}

#[test]
fn test_constant_folding_of_parameter() {
    let model = typecheck("param a: Count = max(2, 3) * 4 - 1 { source: \"x\" }").unwrap();
    assert!(matches!(model.params[0].value, ParamValue::Scalar(v) if v == 11.0));
}

#[test]
fn test_constraint_must_be_boolean() {
    let err = typecheck(
        "param cash: Currency = 10 USD { source: \"x\" }
         constraint bad: cash + 1 USD",
    )
    .unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::InvalidSemanticContract]);
}

#[test]
fn test_constraint_severity_and_message() {
    let model = typecheck(
        "param cash: Currency = 10 USD { source: \"x\" }
         constraint solvent: cash >= 0 USD { severity: error, message: \"out of cash\" }
         constraint soft: cash > 100 USD",
    )
    .unwrap();
    assert_eq!(model.constraints[0].severity, Severity::Error);
    assert_eq!(model.constraints[0].message, "out of cash");
    assert_eq!(model.constraints[1].severity, Severity::Warning);
}

#[test]
fn test_policy_target_must_be_entity() {
    let err = typecheck(
        "param cash: Currency = 10 USD { source: \"x\" }
         constraint solvent: cash >= 0 USD
         policy p when cash < 5 USD { solvent = 1 }",
    )
    .unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::InvalidSemanticContract]);
}

#[test]
fn test_policy_value_unit_checked() {
    let err = typecheck(
        "param price: Currency = 10 USD { source: \"x\" }
         policy p when price > 5 USD { price = 3 mo }",
    )
    .unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::InvalidSemanticContract]);
}

#[test]
fn test_policy_trigger_undeclared_is_contract_error() {
    let err = typecheck(
        "param price: Currency = 10 USD { source: \"x\" }
         policy p when demand > 5 { price = 11 USD }",
    )
    .unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::InvalidSemanticContract]);
}

#[test]
fn test_duplicate_declaration() {
    let err = typecheck(
        "param a: Count = 1 { source: \"x\" }
         rate a: Count = 2",
    )
    .unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::InvalidSemanticContract]);
}

#[test]
fn test_builtin_name_cannot_be_declared() {
    let err = typecheck("rate step: Count = 1").unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::InvalidSemanticContract]);
}

#[test]
fn test_missing_provenance_is_a_warning() {
    let model = typecheck("param a: Count = 1").expect("warnings do not fail");
    assert_eq!(model.warnings.len(), 1);
    assert_eq!(model.warnings[0].kind(), ErrorKind::MissingProvenance);
    assert!(model.warnings[0].is_warning());
    assert_eq!(diagnostics("param a: Count = 1").len(), 1);
}

#[test]
fn test_provenance_fields() {
    let model = typecheck(
        "param cac: Currency = 120 USD { source: \"ads dashboard\", method: \"90 day average\", confidence: 0.6 }",
    )
    .unwrap();
    let provenance = &model.params[0].provenance;
    assert_eq!(provenance.source, "ads dashboard");
    assert_eq!(provenance.method.as_deref(), Some("90 day average"));
    assert_eq!(provenance.confidence, Some(0.6));
    assert_eq!(provenance.citation(), "ads dashboard (90 day average)");
}

#[test]
fn test_confidence_out_of_range() {
    let err = typecheck("param a: Count = 1 { source: \"x\", confidence: 1.5 }").unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::InvalidSemanticContract]);
}

#[test]
fn test_distribution_arguments_follow_parameter_unit() {
    let model = typecheck("param price: Currency ~ Normal(10 USD, 2 USD) { source: \"x\" }").unwrap();
    assert!(matches!(
        model.params[0].value,
        ParamValue::Distribution(Distribution::Normal { mean, std }) if mean == 10.0 && std == 2.0
    ));

    let err = typecheck("param price: Currency ~ Normal(10, 2) { source: \"x\" }").unwrap_err();
    assert!(err.kinds().iter().all(|k| *k == ErrorKind::UnitMismatch));
}

#[test]
fn test_beta_requires_dimensionless_parameter() {
    let err = typecheck("param price: Currency ~ Beta(2, 5) { source: \"x\" }").unwrap_err();
    assert!(err.kinds().contains(&ErrorKind::UnitMismatch));
}

#[test]
fn test_invalid_distribution_parameters() {
    let err = typecheck("param p: Fraction ~ Uniform(0.9, 0.1) { source: \"x\" }").unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::InvalidSemanticContract]);

    let err = typecheck("param p: Fraction ~ Gamma(1, 2) { source: \"x\" }").unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::InvalidSemanticContract]);
}

#[test]
fn test_if_branches_must_agree() {
    let err = typecheck(
        "param a: Currency = 1 USD { source: \"x\" }
         rate b: Currency = if step > 2 then a else 3 mo",
    )
    .unwrap_err();
    assert!(err.kinds().contains(&ErrorKind::UnitMismatch));
}

#[test]
fn test_builtin_unit_rules() {
    typecheck(
        "param a: Currency = 5 USD { source: \"x\" }
         param b: Currency = 7 USD { source: \"x\" }
         rate lo: Currency = min(a, b)
         rate c: Currency = clamp(a, 0 USD, b)
         rate g: Fraction = exp(0.5) * pow(2, 0.5)",
    )
    .expect("builtins keep units");

    let err = typecheck(
        "param a: Currency = 5 USD { source: \"x\" }
         rate g: Count = exp(a)",
    )
    .unwrap_err();
    assert!(err.kinds().contains(&ErrorKind::UnitMismatch));
}
