//! Type checker for PEL
//!
//! This module resolves names, checks units and produces HIR from the AST.
//! It handles:
//! - Unit algebra over declared types and literal suffixes
//! - Constant folding of parameter initializers and distribution arguments
//! - Rate dependency ordering and cycle detection
//! - Constraint and policy contracts
//! - Provenance records
//!
//! All detectable errors are collected in one pass. An expression that
//! failed to check gets the error type, which is compatible with everything,
//! so a single mistake does not cascade.

pub mod deps;

use crate::ast::*;
use crate::builtins::{FunctionTable, UnitRule};
use crate::common::Span;
use crate::diagnostics::{CompileError, Reporter, SourceFile, TypeErrors};
use crate::distribution::{self, Distribution};
use crate::hir::{
    EntityRef, ParamValue as HirParamValue, Provenance, Severity, TExpr, TExprKind,
    TypedAssignment, TypedConstraint, TypedModel, TypedParam, TypedPolicy, TypedRate,
};
use crate::resolve::{Symbol, SymbolKind, SymbolTable};
use crate::types::{NAMED_TYPES, Type, Unit, lookup_symbol, named_type};
use deps::DependencyGraph;

/// Type check an AST and produce the typed model
pub fn check(
    ast: &Ast,
    file: &SourceFile,
    functions: &FunctionTable,
) -> Result<TypedModel, TypeErrors> {
    let checker = TypeChecker::new(file, functions);
    checker.check_model(ast)
}

/// Where an expression appears, which decides how names resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    /// Parameter initializer or distribution argument: no entity reads
    Constant,
    /// Rate body
    Entity,
    /// Constraint predicate, policy trigger or assignment
    Contract,
}

/// Type checker state
pub struct TypeChecker<'a> {
    functions: &'a FunctionTable,
    reporter: Reporter,
    symbols: SymbolTable,
    param_types: Vec<Type>,
    rate_types: Vec<Type>,
}

impl<'a> TypeChecker<'a> {
    pub fn new(file: &SourceFile, functions: &'a FunctionTable) -> Self {
        Self {
            functions,
            reporter: Reporter::new(file.clone()),
            symbols: SymbolTable::new(functions),
            param_types: Vec::new(),
            rate_types: Vec::new(),
        }
    }

    pub fn check_model(mut self, ast: &Ast) -> Result<TypedModel, TypeErrors> {
        let name = ast
            .model_name
            .as_ref()
            .map_or_else(|| "main".to_string(), |n| n.name.clone());
        tracing::info!(model = %name, "type checking");

        // Pass 1: declare everything so bodies may refer forward
        let mut param_decls = Vec::new();
        let mut rate_decls = Vec::new();
        let mut constraint_decls = Vec::new();
        let mut policy_decls = Vec::new();

        for decl in &ast.decls {
            let (kind, index, ty) = match decl {
                Decl::Param(p) => (
                    SymbolKind::Parameter,
                    param_decls.len(),
                    Some(self.resolve_type(&p.ty)),
                ),
                Decl::Rate(r) => (
                    SymbolKind::Rate,
                    rate_decls.len(),
                    Some(self.resolve_type(&r.ty)),
                ),
                Decl::Constraint(_) => (SymbolKind::Constraint, constraint_decls.len(), None),
                Decl::Policy(_) => (SymbolKind::Policy, policy_decls.len(), None),
            };
            let ident = decl.name();
            let symbol = Symbol {
                name: ident.name.clone(),
                kind,
                ty,
                span: Some(ident.span),
                index,
            };
            if let Err(existing) = self.symbols.define(symbol) {
                self.report_duplicate(ident, &existing);
                continue;
            }
            match decl {
                Decl::Param(p) => {
                    self.param_types.push(ty.unwrap_or(Type::Error));
                    param_decls.push(p);
                }
                Decl::Rate(r) => {
                    self.rate_types.push(ty.unwrap_or(Type::Error));
                    rate_decls.push(r);
                }
                Decl::Constraint(c) => constraint_decls.push(c),
                Decl::Policy(p) => policy_decls.push(p),
            }
        }

        // Pass 2: bodies
        let mut params = Vec::with_capacity(param_decls.len());
        for (i, p) in param_decls.iter().enumerate() {
            let ty = self.param_types[i];
            params.push(self.check_param(p, ty));
        }

        let mut rates = Vec::with_capacity(rate_decls.len());
        for (i, r) in rate_decls.iter().enumerate() {
            let ty = self.rate_types[i];
            rates.push(self.check_rate(r, ty));
        }

        let rate_order = self.order_rates(&rates);

        let constraints: Vec<TypedConstraint> = constraint_decls
            .iter()
            .map(|c| self.check_constraint(c))
            .collect();

        let policies: Vec<TypedPolicy> = policy_decls
            .iter()
            .map(|p| self.check_policy(p))
            .collect();

        let symbols = self.symbols;
        let warnings = self.reporter.finish()?;

        tracing::debug!(
            params = params.len(),
            rates = rates.len(),
            constraints = constraints.len(),
            policies = policies.len(),
            warnings = warnings.len(),
            "type checking complete"
        );

        Ok(TypedModel {
            name,
            params,
            rates,
            constraints,
            policies,
            rate_order,
            symbols,
            warnings,
        })
    }

    fn report_duplicate(&mut self, ident: &Ident, existing: &Symbol) {
        if existing.kind.is_builtin() {
            self.reporter.contract(
                format!(
                    "`{}` is a {} and cannot be redeclared",
                    ident.name,
                    existing.kind.describe()
                ),
                ident.span,
                None,
            );
        } else {
            self.reporter.contract(
                format!("duplicate declaration of `{}`", ident.name),
                ident.span,
                Some(format!(
                    "`{}` is already declared as a {}",
                    ident.name,
                    existing.kind.describe()
                )),
            );
        }
    }

    // ==================== TYPES ====================

    fn resolve_type(&mut self, ty: &TypeExpr) -> Type {
        match ty {
            TypeExpr::Named(ident) => named_type(&ident.name).unwrap_or_else(|| {
                self.reporter.undefined(
                    ident.name.clone(),
                    ident.span,
                    Some(format!("known types: {}", NAMED_TYPES.join(", "))),
                );
                Type::Error
            }),
            TypeExpr::Binary {
                op,
                left,
                right,
                span,
            } => {
                let l = self.resolve_type(left);
                let r = self.resolve_type(right);
                match (l, r) {
                    (Type::Number(a), Type::Number(b)) => {
                        let unit = match op {
                            TypeOp::Mul => a.checked_mul(b),
                            TypeOp::Div => a.checked_div(b),
                        };
                        self.unit_or_overflow(unit, a, b, *span)
                    }
                    (Type::Error, _) | (_, Type::Error) => Type::Error,
                    _ => {
                        self.reporter.contract(
                            "`Boolean` cannot be combined into a unit type",
                            *span,
                            None,
                        );
                        Type::Error
                    }
                }
            }
        }
    }

    fn expect_type(&mut self, expected: Type, expr: &TExpr, what: &str) {
        if !expected.compatible(&expr.ty) {
            self.reporter.unit_mismatch(
                expected.to_string(),
                expr.ty.to_string(),
                expr.span,
                Some(format!("{} is declared as `{}`", what, expected)),
            );
        }
    }

    // ==================== DECLARATIONS ====================

    fn check_param(&mut self, decl: &ParamDecl, ty: Type) -> TypedParam {
        let what = format!("parameter `{}`", decl.name.name);
        let value = match &decl.value {
            ParamValue::Scalar(expr) => {
                let texpr = self.check_expr(expr, Context::Constant);
                self.expect_type(ty, &texpr, &what);
                HirParamValue::Scalar(self.fold_constant(&texpr, &what))
            }
            ParamValue::Distribution(dist) => self.check_distribution(dist, ty, &what),
        };
        let provenance = self.check_provenance(decl);

        TypedParam {
            name: decl.name.name.clone(),
            ty,
            value,
            provenance,
            span: decl.span,
        }
    }

    /// Fold a checked constant expression; reports non-finite results
    fn fold_constant(&mut self, expr: &TExpr, what: &str) -> f64 {
        if expr.ty.is_error() {
            return 0.0;
        }
        match fold(expr, self.functions) {
            Some(v) if v.is_finite() => v,
            _ => {
                self.reporter.contract(
                    format!("{} must be a finite constant", what),
                    expr.span,
                    None,
                );
                0.0
            }
        }
    }

    fn check_distribution(
        &mut self,
        dist: &DistributionExpr,
        ty: Type,
        what: &str,
    ) -> HirParamValue {
        let placeholder = HirParamValue::Scalar(0.0);
        let Some(family) = distribution::family(&dist.name.name) else {
            let names: Vec<&str> = distribution::FAMILIES.iter().map(|f| f.name).collect();
            self.reporter.contract(
                format!("unknown distribution `{}`", dist.name.name),
                dist.name.span,
                Some(format!("available distributions: {}", names.join(", "))),
            );
            return placeholder;
        };

        let param_unit = match ty {
            Type::Number(u) => Some(u),
            Type::Error => None,
            Type::Bool => {
                self.reporter.contract(
                    format!("{} is `Boolean` and cannot follow a distribution", what),
                    dist.span,
                    None,
                );
                return placeholder;
            }
        };

        if family.name == "Beta" {
            if let Some(u) = param_unit.filter(|u| !u.is_dimensionless()) {
                self.reporter.unit_mismatch(
                    Unit::dimensionless().to_string(),
                    u.to_string(),
                    dist.span,
                    Some("Beta samples lie in [0, 1]; declare the parameter as `Fraction`".into()),
                );
            }
        }

        // Slot arguments by position or name
        let mut slots: Vec<Option<&Expr>> = vec![None; family.params.len()];
        let mut next_positional = 0;
        let mut ok = true;
        for arg in &dist.args {
            let slot = match &arg.name {
                Some(name) => match family.params.iter().position(|p| *p == name.name) {
                    Some(i) => i,
                    None => {
                        self.reporter.contract(
                            format!("`{}` has no argument named `{}`", family.name, name.name),
                            name.span,
                            Some(format!("expected: {}", family.params.join(", "))),
                        );
                        ok = false;
                        continue;
                    }
                },
                None => {
                    let i = next_positional;
                    next_positional += 1;
                    i
                }
            };
            match slots.get_mut(slot) {
                Some(entry) if entry.is_none() => *entry = Some(&arg.value),
                Some(_) => {
                    self.reporter.contract(
                        format!("argument `{}` given twice", family.params[slot]),
                        arg.value.span,
                        None,
                    );
                    ok = false;
                }
                None => {
                    self.reporter.contract(
                        format!(
                            "`{}` takes {} arguments ({})",
                            family.name,
                            family.params.len(),
                            family.params.join(", ")
                        ),
                        arg.value.span,
                        None,
                    );
                    ok = false;
                }
            }
        }

        let mut values = Vec::with_capacity(slots.len());
        for (i, slot) in slots.iter().enumerate() {
            let arg_name = family.params[i];
            let Some(expr) = slot else {
                self.reporter.contract(
                    format!("missing argument `{}` for `{}`", arg_name, family.name),
                    dist.span,
                    None,
                );
                ok = false;
                continue;
            };
            let texpr = self.check_expr(expr, Context::Constant);
            let expected = if family.unit_args {
                param_unit.map_or(Type::Error, Type::Number)
            } else {
                Type::dimensionless()
            };
            if !expected.compatible(&texpr.ty) {
                let help = if family.unit_args {
                    format!("`{}` is in the unit of {}", arg_name, what)
                } else {
                    format!("`{}` of `{}` is dimensionless", arg_name, family.name)
                };
                self.reporter.unit_mismatch(
                    expected.to_string(),
                    texpr.ty.to_string(),
                    texpr.span,
                    Some(help),
                );
                ok = false;
            }
            if texpr.ty.is_error() {
                ok = false;
            }
            values.push(self.fold_constant(&texpr, &format!("argument `{}`", arg_name)));
        }

        if !ok {
            return placeholder;
        }
        match Distribution::from_args(family.name, &values) {
            Ok(d) => HirParamValue::Distribution(d),
            Err(message) => {
                self.reporter.contract(message, dist.span, None);
                placeholder
            }
        }
    }

    fn check_provenance(&mut self, decl: &ParamDecl) -> Provenance {
        let Some(meta) = &decl.provenance else {
            let src = self.reporter.named_source();
            self.reporter.warning(CompileError::MissingProvenance {
                name: decl.name.name.clone(),
                span: decl.name.span.into(),
                src,
            });
            return Provenance::unspecified();
        };

        let mut provenance = Provenance::unspecified();
        for entry in &meta.entries {
            match (entry.key.name.as_str(), &entry.value) {
                ("source", MetaValue::String(s) | MetaValue::Ident(s)) => {
                    provenance.source = s.clone();
                }
                ("method" | "rationale", MetaValue::String(s) | MetaValue::Ident(s)) => {
                    provenance.method = Some(s.clone());
                }
                ("confidence", MetaValue::Number(c)) => {
                    if (0.0..=1.0).contains(c) {
                        provenance.confidence = Some(*c);
                    } else {
                        self.reporter.contract(
                            format!("confidence must be within [0, 1], got {}", c),
                            entry.span,
                            None,
                        );
                    }
                }
                ("confidence", _) => {
                    self.reporter
                        .contract("confidence must be a number", entry.span, None);
                }
                ("source" | "method" | "rationale", _) => {
                    self.reporter.contract(
                        format!("`{}` must be a string", entry.key.name),
                        entry.span,
                        None,
                    );
                }
                (other, _) => {
                    self.reporter.contract(
                        format!("unknown provenance key `{}`", other),
                        entry.key.span,
                        Some("expected `source`, `method`, `rationale` or `confidence`".into()),
                    );
                }
            }
        }
        provenance
    }

    fn check_rate(&mut self, decl: &RateDecl, ty: Type) -> TypedRate {
        let expr = self.check_expr(&decl.expr, Context::Entity);
        self.expect_type(ty, &expr, &format!("rate `{}`", decl.name.name));
        TypedRate {
            name: decl.name.name.clone(),
            ty,
            expr,
            span: decl.span,
        }
    }

    fn order_rates(&mut self, rates: &[TypedRate]) -> Vec<usize> {
        let mut graph = DependencyGraph::new(rates.len());
        for (i, rate) in rates.iter().enumerate() {
            let mut refs = Vec::new();
            rate.expr.current_step_refs(&mut refs);
            for r in refs {
                if let EntityRef::Rate(j) = r {
                    graph.add_dependency(i, j);
                }
            }
        }

        match graph.topo_order() {
            Ok(order) => order,
            Err(cycles) => {
                for cycle in cycles {
                    let path: Vec<&str> = cycle.iter().map(|&i| rates[i].name.as_str()).collect();
                    self.reporter.cycle(path.join(" -> "), rates[cycle[0]].span);
                }
                (0..rates.len()).collect()
            }
        }
    }

    fn check_constraint(&mut self, decl: &ConstraintDecl) -> TypedConstraint {
        let predicate = self.check_expr(&decl.predicate, Context::Contract);
        if !predicate.ty.is_bool() && !predicate.ty.is_error() {
            self.reporter.contract(
                format!(
                    "constraint `{}` must be a Boolean predicate, found `{}`",
                    decl.name.name, predicate.ty
                ),
                predicate.span,
                Some("compare the quantity against a bound, e.g. `runway >= 6mo`".into()),
            );
        }

        let mut severity = Severity::Warning;
        let mut message = format!("constraint {} violated", decl.name.name);
        for entry in decl.meta.iter().flat_map(|m| &m.entries) {
            match (entry.key.name.as_str(), &entry.value) {
                ("severity", MetaValue::Ident(s) | MetaValue::String(s)) => match s.as_str() {
                    "warning" => severity = Severity::Warning,
                    "error" => severity = Severity::Error,
                    other => self.reporter.contract(
                        format!("unknown severity `{}`", other),
                        entry.span,
                        Some("expected `warning` or `error`".into()),
                    ),
                },
                ("message", MetaValue::String(s)) => message = s.clone(),
                ("severity" | "message", _) => self.reporter.contract(
                    format!("invalid value for `{}`", entry.key.name),
                    entry.span,
                    None,
                ),
                (other, _) => self.reporter.contract(
                    format!("unknown constraint key `{}`", other),
                    entry.key.span,
                    Some("expected `severity` or `message`".into()),
                ),
            }
        }

        TypedConstraint {
            name: decl.name.name.clone(),
            predicate,
            severity,
            message,
            span: decl.span,
        }
    }

    fn check_policy(&mut self, decl: &PolicyDecl) -> TypedPolicy {
        let trigger = self.check_expr(&decl.trigger, Context::Contract);
        if !trigger.ty.is_bool() && !trigger.ty.is_error() {
            self.reporter.contract(
                format!(
                    "trigger of policy `{}` must be Boolean, found `{}`",
                    decl.name.name, trigger.ty
                ),
                trigger.span,
                None,
            );
        }

        let mut actions: Vec<TypedAssignment> = Vec::new();
        for action in &decl.actions {
            let value = self.check_expr(&action.value, Context::Contract);
            let target = match self.symbols.lookup(&action.target.name) {
                Some(s) if s.kind.is_entity() => Some(entity_ref(s)),
                Some(s) => {
                    let kind = s.kind.describe();
                    self.reporter.contract(
                        format!(
                            "policy `{}` can only assign parameters or rates; `{}` is a {}",
                            decl.name.name, action.target.name, kind
                        ),
                        action.target.span,
                        None,
                    );
                    None
                }
                None => {
                    self.reporter.contract(
                        format!(
                            "policy `{}` assigns undeclared symbol `{}`",
                            decl.name.name, action.target.name
                        ),
                        action.target.span,
                        None,
                    );
                    None
                }
            };
            let Some(target) = target else { continue };

            if actions.iter().any(|a| a.target == target) {
                self.reporter.contract(
                    format!(
                        "policy `{}` assigns `{}` more than once",
                        decl.name.name, action.target.name
                    ),
                    action.span,
                    None,
                );
                continue;
            }

            let target_ty = self.entity_type(target);
            if !target_ty.compatible(&value.ty) {
                self.reporter.contract(
                    format!(
                        "policy `{}` assigns a `{}` value to `{}` of type `{}`",
                        decl.name.name, value.ty, action.target.name, target_ty
                    ),
                    value.span,
                    None,
                );
            }
            actions.push(TypedAssignment {
                target,
                value,
                span: action.span,
            });
        }

        TypedPolicy {
            name: decl.name.name.clone(),
            trigger,
            actions,
            span: decl.span,
        }
    }

    fn entity_type(&self, entity: EntityRef) -> Type {
        match entity {
            EntityRef::Param(i) => self.param_types[i],
            EntityRef::Rate(i) => self.rate_types[i],
        }
    }

    // ==================== EXPRESSIONS ====================

    fn check_expr(&mut self, expr: &Expr, ctx: Context) -> TExpr {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Literal(Literal::Bool(b)) => TExpr {
                kind: TExprKind::Bool(*b),
                ty: Type::Bool,
                span,
            },
            ExprKind::Literal(Literal::Number(lit)) => self.check_number(lit, span),
            ExprKind::Name(name) => self.resolve_name(name, span, ctx),
            ExprKind::Binary { op, left, right } => {
                let left = self.check_expr(left, ctx);
                let right = self.check_expr(right, ctx);
                let ty = self.binary_type(*op, &left, &right);
                TExpr {
                    kind: TExprKind::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    ty,
                    span,
                }
            }
            ExprKind::Unary { op, expr: inner } => {
                let inner = self.check_expr(inner, ctx);
                let ty = match (op, inner.ty) {
                    (_, Type::Error) => Type::Error,
                    (UnaryOp::Neg, Type::Number(u)) => Type::Number(u),
                    (UnaryOp::Not, Type::Bool) => Type::Bool,
                    (UnaryOp::Neg, found) => {
                        self.mismatch("a numeric quantity", found, inner.span, None)
                    }
                    (UnaryOp::Not, found) => self.mismatch("Boolean", found, inner.span, None),
                };
                TExpr {
                    kind: TExprKind::Unary {
                        op: *op,
                        expr: Box::new(inner),
                    },
                    ty,
                    span,
                }
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.check_expr(cond, ctx);
                let then_branch = self.check_expr(then_branch, ctx);
                let else_branch = self.check_expr(else_branch, ctx);
                if !cond.ty.is_bool() && !cond.ty.is_error() {
                    self.mismatch("Boolean", cond.ty, cond.span, None);
                }
                let ty = if !then_branch.ty.compatible(&else_branch.ty) {
                    self.mismatch(
                        &then_branch.ty.to_string(),
                        else_branch.ty,
                        else_branch.span,
                        Some("both branches of `if` must have the same unit".into()),
                    )
                } else if then_branch.ty.is_error() {
                    else_branch.ty
                } else {
                    then_branch.ty
                };
                TExpr {
                    kind: TExprKind::If {
                        cond: Box::new(cond),
                        then_branch: Box::new(then_branch),
                        else_branch: Box::new(else_branch),
                    },
                    ty,
                    span,
                }
            }
            ExprKind::Call { callee, args } if callee.name == "prev" => {
                self.check_prev(args, span, ctx)
            }
            ExprKind::Call { callee, args } => self.check_call(callee, args, span, ctx),
        }
    }

    /// Result of unit arithmetic, reporting exponents that left the representable range
    fn unit_or_overflow(&mut self, unit: Option<Unit>, a: Unit, b: Unit, span: Span) -> Type {
        match unit {
            Some(unit) => Type::Number(unit),
            None => {
                self.reporter.unit_mismatch(
                    "a unit with exponents in -128..=127",
                    format!("a combination of `{}` and `{}`", a, b),
                    span,
                    Some("unit exponent out of range".to_string()),
                );
                Type::Error
            }
        }
    }

    fn mismatch(&mut self, expected: &str, found: Type, span: Span, help: Option<String>) -> Type {
        self.reporter
            .unit_mismatch(expected, found.to_string(), span, help);
        Type::Error
    }

    fn check_number(&mut self, lit: &NumberLit, span: Span) -> TExpr {
        let mut value = lit.value;
        if lit.percent {
            value /= 100.0;
        }
        let mut unit = Unit::dimensionless();
        let mut ty_ok = true;
        if let Some(suffix) = &lit.unit {
            for (ident, numerator) in [(&suffix.numerator, true), (&suffix.denominator, false)] {
                let Some(ident) = ident else { continue };
                match lookup_symbol(&ident.name) {
                    Some(sym) => {
                        let combined = if numerator {
                            value *= sym.scale;
                            unit.checked_mul(sym.unit)
                        } else {
                            value /= sym.scale;
                            unit.checked_div(sym.unit)
                        };
                        match combined {
                            Some(u) => unit = u,
                            None => {
                                self.unit_or_overflow(None, unit, sym.unit, span);
                                ty_ok = false;
                            }
                        }
                    }
                    None => {
                        self.reporter.undefined(ident.name.clone(), ident.span, None);
                        ty_ok = false;
                    }
                }
            }
        }
        TExpr {
            kind: TExprKind::Number(value),
            ty: if ty_ok { Type::Number(unit) } else { Type::Error },
            span,
        }
    }

    fn resolve_name(&mut self, name: &str, span: Span, ctx: Context) -> TExpr {
        let symbol = self.symbols.lookup(name).cloned();
        match symbol {
            Some(s) if s.kind.is_entity() => {
                if ctx == Context::Constant {
                    self.reporter.contract(
                        format!(
                            "parameter values must be constant, but `{}` is a {}",
                            name,
                            s.kind.describe()
                        ),
                        span,
                        Some("derive dependent quantities with `rate`".into()),
                    );
                    return TExpr::error(span);
                }
                let entity = entity_ref(&s);
                TExpr {
                    kind: TExprKind::Entity(entity),
                    ty: self.entity_type(entity),
                    span,
                }
            }
            Some(s) if s.kind == SymbolKind::BuiltinVariable => {
                if ctx == Context::Constant {
                    self.reporter.contract(
                        format!("parameter values must be constant, but `{}` varies by step", name),
                        span,
                        None,
                    );
                    return TExpr::error(span);
                }
                TExpr {
                    kind: TExprKind::Step,
                    ty: Type::dimensionless(),
                    span,
                }
            }
            Some(s) => {
                self.reporter.contract(
                    format!("`{}` is a {} and has no value", name, s.kind.describe()),
                    span,
                    None,
                );
                TExpr::error(span)
            }
            None if ctx == Context::Contract => {
                self.reporter.contract(
                    format!("reference to undeclared symbol `{}`", name),
                    span,
                    self.suggestion(name),
                );
                TExpr::error(span)
            }
            None => {
                let help = self.suggestion(name);
                self.reporter.undefined(name, span, help);
                TExpr::error(span)
            }
        }
    }

    fn suggestion(&self, name: &str) -> Option<String> {
        self.symbols
            .suggest(name)
            .map(|s| format!("did you mean `{}`?", s))
    }

    fn binary_type(&mut self, op: BinaryOp, left: &TExpr, right: &TExpr) -> Type {
        if left.ty.is_error() || right.ty.is_error() {
            return Type::Error;
        }
        let sym = op.symbol();
        match op {
            BinaryOp::Add | BinaryOp::Sub => match (left.ty, right.ty) {
                (Type::Number(a), Type::Number(b)) if a == b => Type::Number(a),
                (Type::Number(a), found) => self.mismatch(
                    &a.to_string(),
                    found,
                    right.span,
                    Some(format!("`{}` requires operands of the same unit", sym)),
                ),
                (found, _) => self.mismatch("a numeric quantity", found, left.span, None),
            },
            BinaryOp::Mul | BinaryOp::Div => match (left.ty, right.ty) {
                (Type::Number(a), Type::Number(b)) => {
                    let unit = if op == BinaryOp::Mul {
                        a.checked_mul(b)
                    } else {
                        a.checked_div(b)
                    };
                    self.unit_or_overflow(unit, a, b, left.span.merge(right.span))
                }
                (Type::Number(_), found) => {
                    self.mismatch("a numeric quantity", found, right.span, None)
                }
                (found, _) => self.mismatch("a numeric quantity", found, left.span, None),
            },
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                match (left.ty, right.ty) {
                    (Type::Number(a), Type::Number(b)) if a == b => Type::Bool,
                    (Type::Number(a), found) => self.mismatch(
                        &a.to_string(),
                        found,
                        right.span,
                        Some(format!("`{}` compares quantities of the same unit", sym)),
                    ),
                    (found, _) => self.mismatch("a numeric quantity", found, left.span, None),
                }
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                if left.ty == right.ty {
                    Type::Bool
                } else {
                    self.mismatch(
                        &left.ty.to_string(),
                        right.ty,
                        right.span,
                        Some(format!("`{}` compares values of the same type", sym)),
                    )
                }
            }
            BinaryOp::And | BinaryOp::Or => match (left.ty, right.ty) {
                (Type::Bool, Type::Bool) => Type::Bool,
                (Type::Bool, found) => self.mismatch("Boolean", found, right.span, None),
                (found, _) => self.mismatch("Boolean", found, left.span, None),
            },
        }
    }

    fn check_prev(&mut self, args: &[Expr], span: Span, ctx: Context) -> TExpr {
        if ctx == Context::Constant {
            self.reporter.contract(
                "`prev` reads simulation state and cannot appear in a parameter value",
                span,
                None,
            );
            return TExpr::error(span);
        }
        let [target, init] = args else {
            self.reporter.contract(
                format!(
                    "`prev` takes 2 arguments (entity, initial value), got {}",
                    args.len()
                ),
                span,
                None,
            );
            return TExpr::error(span);
        };

        let init = self.check_expr(init, ctx);

        let entity = match &target.kind {
            ExprKind::Name(name) => match self.symbols.lookup(name).cloned() {
                Some(s) if s.kind.is_entity() => Some(entity_ref(&s)),
                Some(s) => {
                    self.reporter.contract(
                        format!(
                            "first argument of `prev` must be a parameter or rate; `{}` is a {}",
                            name,
                            s.kind.describe()
                        ),
                        target.span,
                        None,
                    );
                    None
                }
                None => {
                    self.resolve_name(name, target.span, ctx);
                    None
                }
            },
            _ => {
                self.reporter.contract(
                    "first argument of `prev` must name a parameter or rate",
                    target.span,
                    None,
                );
                None
            }
        };
        let Some(entity) = entity else {
            return TExpr::error(span);
        };

        let ty = self.entity_type(entity);
        if !ty.compatible(&init.ty) {
            let name = self.symbols_name(target);
            self.reporter.unit_mismatch(
                ty.to_string(),
                init.ty.to_string(),
                init.span,
                Some(format!(
                    "the initial value of `prev({}, ..)` must have the unit of `{}`",
                    name, name
                )),
            );
        }

        TExpr {
            kind: TExprKind::Prev {
                entity,
                init: Box::new(init),
            },
            ty,
            span,
        }
    }

    fn symbols_name(&self, expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Name(n) => n.clone(),
            _ => String::from("_"),
        }
    }

    fn check_call(&mut self, callee: &Ident, args: &[Expr], span: Span, ctx: Context) -> TExpr {
        let targs: Vec<TExpr> = args.iter().map(|a| self.check_expr(a, ctx)).collect();

        let Some(sig) = self.functions.get(&callee.name).copied() else {
            match self.symbols.lookup(&callee.name) {
                Some(s) => {
                    let message = format!(
                        "`{}` is a {}, not a function",
                        callee.name,
                        s.kind.describe()
                    );
                    self.reporter.contract(message, callee.span, None);
                }
                None => {
                    let available: Vec<&str> = self.functions.names().collect();
                    let help = Some(format!("available functions: prev, {}", available.join(", ")));
                    if ctx == Context::Contract {
                        self.reporter.contract(
                            format!("call to undeclared function `{}`", callee.name),
                            callee.span,
                            help,
                        );
                    } else {
                        self.reporter.undefined(callee.name.clone(), callee.span, help);
                    }
                }
            }
            return TExpr::error(span);
        };

        if targs.len() != sig.arity {
            self.reporter.contract(
                format!(
                    "`{}` takes {} argument(s), got {}",
                    callee.name,
                    sig.arity,
                    targs.len()
                ),
                span,
                Some(sig.doc.to_string()),
            );
            return TExpr::error(span);
        }

        let ty = if targs.iter().any(|a| a.ty.is_error()) {
            Type::Error
        } else {
            self.call_type(sig.rule, &callee.name, &targs)
        };

        TExpr {
            kind: TExprKind::Call {
                builtin: sig.builtin,
                args: targs,
            },
            ty,
            span,
        }
    }

    fn call_type(&mut self, rule: UnitRule, name: &str, args: &[TExpr]) -> Type {
        match rule {
            UnitRule::Uniform => {
                let Type::Number(first) = args[0].ty else {
                    return self.mismatch("a numeric quantity", args[0].ty, args[0].span, None);
                };
                for arg in &args[1..] {
                    if arg.ty != Type::Number(first) {
                        return self.mismatch(
                            &first.to_string(),
                            arg.ty,
                            arg.span,
                            Some(format!("arguments of `{}` must share one unit", name)),
                        );
                    }
                }
                Type::Number(first)
            }
            UnitRule::Dimensionless => {
                for arg in args {
                    if arg.ty != Type::dimensionless() {
                        return self.mismatch(
                            "Dimensionless",
                            arg.ty,
                            arg.span,
                            Some(format!("`{}` is defined on dimensionless values", name)),
                        );
                    }
                }
                Type::dimensionless()
            }
            UnitRule::Power => {
                let (base, exponent) = (&args[0], &args[1]);
                let Type::Number(base_unit) = base.ty else {
                    return self.mismatch("a numeric quantity", base.ty, base.span, None);
                };
                if exponent.ty != Type::dimensionless() {
                    return self.mismatch("Dimensionless", exponent.ty, exponent.span, None);
                }
                if base_unit.is_dimensionless() {
                    return Type::dimensionless();
                }
                let folded = fold(exponent, self.functions);
                match folded.and_then(|n| FunctionTable::power_unit(base_unit, n)) {
                    Some(unit) => Type::Number(unit),
                    None if folded.is_some_and(|n| n.fract() == 0.0) => {
                        self.reporter.unit_mismatch(
                            "a unit with exponents in -128..=127",
                            format!("`{}` raised to {}", base_unit, folded.unwrap_or_default()),
                            exponent.span,
                            Some("unit exponent out of range".to_string()),
                        );
                        Type::Error
                    }
                    None => {
                        self.reporter.contract(
                            format!(
                                "`pow` of a `{}` value needs a constant integer exponent",
                                base_unit
                            ),
                            exponent.span,
                            None,
                        );
                        Type::Error
                    }
                }
            }
        }
    }
}

fn entity_ref(symbol: &Symbol) -> EntityRef {
    match symbol.kind {
        SymbolKind::Parameter => EntityRef::Param(symbol.index),
        _ => EntityRef::Rate(symbol.index),
    }
}

/// Evaluate an expression that reads no simulation state
pub fn fold(expr: &TExpr, functions: &FunctionTable) -> Option<f64> {
    let truth = |b: bool| if b { 1.0 } else { 0.0 };
    match &expr.kind {
        TExprKind::Number(v) => Some(*v),
        TExprKind::Bool(b) => Some(truth(*b)),
        TExprKind::Entity(_) | TExprKind::Step | TExprKind::Prev { .. } | TExprKind::Error => {
            None
        }
        TExprKind::Binary { op, left, right } => {
            let l = fold(left, functions)?;
            let r = fold(right, functions)?;
            Some(match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => l / r,
                BinaryOp::Lt => truth(l < r),
                BinaryOp::Le => truth(l <= r),
                BinaryOp::Gt => truth(l > r),
                BinaryOp::Ge => truth(l >= r),
                BinaryOp::Eq => truth(l == r),
                BinaryOp::Ne => truth(l != r),
                BinaryOp::And => truth(l != 0.0 && r != 0.0),
                BinaryOp::Or => truth(l != 0.0 || r != 0.0),
            })
        }
        TExprKind::Unary { op, expr } => {
            let v = fold(expr, functions)?;
            Some(match op {
                UnaryOp::Neg => -v,
                UnaryOp::Not => truth(v == 0.0),
            })
        }
        TExprKind::Call { builtin, args } => {
            let values = args
                .iter()
                .map(|a| fold(a, functions))
                .collect::<Option<Vec<f64>>>()?;
            Some(functions.eval(*builtin, &values))
        }
        TExprKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            if fold(cond, functions)? != 0.0 {
                fold(then_branch, functions)
            } else {
                fold(else_branch, functions)
            }
        }
    }
}
