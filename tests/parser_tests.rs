//! Parser tests: declarations, expressions and syntax errors

use pel::ast::*;
use pel::diagnostics::{CompileError, ErrorKind};
use pel::parse;
use pretty_assertions::assert_eq;

fn single_rate_expr(source: &str) -> Expr {
    let ast = parse(source).expect("should parse");
    match ast.decls.into_iter().next() {
        Some(Decl::Rate(r)) => r.expr,
        other => panic!("expected a rate, got {:?}", other),
    }
}

#[test]
fn test_parse_model_block() {
    let ast = parse(
        r#"
        model saas {
            param price: Currency = 50 USD { source: "pricing page" }
            rate revenue: Currency = price * 2
        }
        "#,
    )
    .expect("should parse");
    assert_eq!(ast.model_name.map(|n| n.name), Some("saas".to_string()));
    assert_eq!(ast.decls.len(), 2);
}

#[test]
fn test_parse_bare_declarations() {
    let ast = parse("param a: Count = 1\nvar b: Count = a").expect("should parse");
    assert!(ast.model_name.is_none());
    match &ast.decls[1] {
        Decl::Rate(r) => {
            assert_eq!(r.keyword, RateKeyword::Var);
            assert_eq!(r.name.name, "b");
        }
        other => panic!("expected a var, got {:?}", other),
    }
}

#[test]
fn test_parse_declaration_after_model_block_is_rejected() {
    let err = parse("model m { param a: Count = 1 } param b: Count = 2").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
}

#[test]
fn test_parse_distribution_named_and_positional() {
    let ast = parse("param churn: Fraction ~ Beta(2, beta = 30) { source: \"cohorts\" }")
        .expect("should parse");
    let Decl::Param(p) = &ast.decls[0] else {
        panic!("expected a param");
    };
    let ParamValue::Distribution(d) = &p.value else {
        panic!("expected a distribution");
    };
    assert_eq!(d.name.name, "Beta");
    assert!(d.args[0].name.is_none());
    assert_eq!(d.args[1].name.as_ref().map(|n| n.name.as_str()), Some("beta"));
    assert!(p.provenance.is_some());
}

#[test]
fn test_parse_provenance_values() {
    let ast = parse(
        "param cac: Currency = 120 USD { source: \"ads\", method: survey, confidence: 0.7 }",
    )
    .expect("should parse");
    let Decl::Param(p) = &ast.decls[0] else {
        panic!("expected a param");
    };
    let meta = p.provenance.as_ref().expect("meta block");
    let values: Vec<&MetaValue> = meta.entries.iter().map(|e| &e.value).collect();
    assert_eq!(
        values,
        vec![
            &MetaValue::String("ads".into()),
            &MetaValue::Ident("survey".into()),
            &MetaValue::Number(0.7),
        ]
    );
}

#[test]
fn test_parse_compound_type() {
    let ast = parse("param burn: Currency / Duration = 10 USD/mo").expect("should parse");
    let Decl::Param(p) = &ast.decls[0] else {
        panic!("expected a param");
    };
    assert!(matches!(
        p.ty,
        TypeExpr::Binary {
            op: TypeOp::Div,
            ..
        }
    ));
}

#[test]
fn test_parse_precedence_and_associativity() {
    let expr = single_rate_expr("rate x: Count = 10 - 4 - 3 * 2");
    let ExprKind::Binary { op, left, right } = expr.kind else {
        panic!("expected binary");
    };
    assert_eq!(op, BinaryOp::Sub);
    assert!(matches!(
        left.kind,
        ExprKind::Binary {
            op: BinaryOp::Sub,
            ..
        }
    ));
    assert!(matches!(
        right.kind,
        ExprKind::Binary {
            op: BinaryOp::Mul,
            ..
        }
    ));
}

#[test]
fn test_parse_logical_binds_loosest() {
    let expr = single_rate_expr("rate x: Boolean = a > 1 && b < 2 || !c");
    let ExprKind::Binary { op, left, right } = expr.kind else {
        panic!("expected binary");
    };
    assert_eq!(op, BinaryOp::Or);
    assert!(matches!(
        left.kind,
        ExprKind::Binary {
            op: BinaryOp::And,
            ..
        }
    ));
    assert!(matches!(
        right.kind,
        ExprKind::Unary {
            op: UnaryOp::Not,
            ..
        }
    ));
}

#[test]
fn test_parse_rate_literal_suffix() {
    let expr = single_rate_expr("rate g: Rate = 5%/mo");
    let ExprKind::Literal(Literal::Number(n)) = expr.kind else {
        panic!("expected a literal");
    };
    assert_eq!(n.value, 5.0);
    assert!(n.percent);
    let unit = n.unit.expect("unit suffix");
    assert!(unit.numerator.is_none());
    assert_eq!(unit.denominator.map(|d| d.name), Some("mo".to_string()));
}

#[test]
fn test_parse_division_is_not_a_suffix() {
    let expr = single_rate_expr("rate r: Count = 10 / months_left");
    assert!(matches!(
        expr.kind,
        ExprKind::Binary {
            op: BinaryOp::Div,
            ..
        }
    ));
}

#[test]
fn test_parse_if_and_call() {
    let expr = single_rate_expr("rate r: Count = if step > 3 then max(a, b) else prev(r, 0)");
    let ExprKind::If {
        then_branch,
        else_branch,
        ..
    } = expr.kind
    else {
        panic!("expected if");
    };
    assert!(matches!(&then_branch.kind, ExprKind::Call { callee, args } if callee.name == "max" && args.len() == 2));
    assert!(matches!(&else_branch.kind, ExprKind::Call { callee, .. } if callee.name == "prev"));
}

#[test]
fn test_parse_policy_actions() {
    let ast = parse("policy cut when runway < 6mo { burn = burn * 0.8; hiring = 0, bonus = 0 }")
        .expect("should parse");
    let Decl::Policy(p) = &ast.decls[0] else {
        panic!("expected a policy");
    };
    let targets: Vec<&str> = p.actions.iter().map(|a| a.target.name.as_str()).collect();
    assert_eq!(targets, vec!["burn", "hiring", "bonus"]);
}

#[test]
fn test_parse_policy_requires_an_assignment() {
    let err = parse("policy p when true { }").unwrap_err();
    assert!(matches!(err, CompileError::UnexpectedToken { .. }));
}

#[test]
fn test_parse_constraint_meta() {
    let ast = parse("constraint solvent: cash >= 0 USD { severity: error, message: \"broke\" }")
        .expect("should parse");
    let Decl::Constraint(c) = &ast.decls[0] else {
        panic!("expected a constraint");
    };
    assert_eq!(c.name.name, "solvent");
    assert_eq!(c.meta.as_ref().map(|m| m.entries.len()), Some(2));
}

#[test]
fn test_parse_unexpected_eof() {
    let err = parse("rate x: Count = 1 +").unwrap_err();
    assert!(matches!(err, CompileError::UnexpectedEof { .. }));
}

#[test]
fn test_parse_unexpected_token_location() {
    let source = "param x Count = 1";
    let err = parse(source).unwrap_err();
    let CompileError::UnexpectedToken { span, found, .. } = err else {
        panic!("expected UnexpectedToken");
    };
    assert_eq!(span.offset(), source.find("Count").unwrap());
    assert!(found.contains("Count"));
}
