//! Simulation engine tests: stepping, policies, faults, Monte Carlo
//! orchestration and failure handling

use pel::builtins::FunctionTable;
use pel::distribution::Distribution;
use pel::hir::Severity;
use pel::sim::{
    CancellationToken, EvaluationError, FailurePolicy, Mode, RunConfig, SimulationError,
    simulate, simulate_with_cancel,
};
use pel::{IrModule, PelError, compile, run};
use pretty_assertions::assert_eq;

fn module(source: &str) -> IrModule {
    compile(source).expect("should compile")
}

fn deterministic(source: &str, horizon: usize) -> pel::ResultsDocument {
    run(source, &RunConfig::deterministic(horizon)).expect("should simulate")
}

// ==================== Stepping ====================

#[test]
fn test_step_variable() {
    let results = deterministic("rate t: Count = step * 2", 4);
    assert_eq!(results.series("t"), Some(&[0.0, 2.0, 4.0, 6.0][..]));
    assert_eq!(results.runs_executed, 1);
    assert_eq!(results.mode, Mode::Deterministic);
}

#[test]
fn test_prev_accumulates() {
    let results = deterministic(
        "param inflow: Count = 10 { source: \"x\" }
         rate stock: Count = prev(stock, 100) + inflow",
        3,
    );
    assert_eq!(results.series("stock"), Some(&[110.0, 120.0, 130.0][..]));
}

#[test]
fn test_prev_of_later_rate() {
    let results = deterministic(
        "rate a: Count = prev(b, 0) + 1
         rate b: Count = a * 2",
        3,
    );
    assert_eq!(results.series("a"), Some(&[1.0, 3.0, 7.0][..]));
    assert_eq!(results.series("b"), Some(&[2.0, 6.0, 14.0][..]));
}

#[test]
fn test_deterministic_mode_uses_distribution_mean() {
    let results = deterministic(
        "param p: Count ~ Triangular(1, 2, 6) { source: \"x\" }
         param q: Fraction ~ Beta(1, 3) { source: \"x\" }",
        1,
    );
    assert_eq!(results.series("p"), Some(&[3.0][..]));
    assert_eq!(results.series("q"), Some(&[0.25][..]));
}

#[test]
fn test_builtins_evaluate() {
    let results = deterministic(
        "rate a: Count = clamp(step - 1, 0, 1) + floor(2.7) + abs(-1) + pow(2, 3)",
        3,
    );
    assert_eq!(results.series("a"), Some(&[11.0, 11.0, 12.0][..]));
}

// ==================== Constraints and policies ====================

#[test]
fn test_constraint_violation_per_step() {
    let results = deterministic(
        "param runway: Duration = 4mo { source: \"x\" }
         constraint long_runway: runway >= 6mo { severity: error, message: \"runway too short\" }",
        5,
    );
    let violations: Vec<_> = results.violations_of("long_runway").collect();
    assert_eq!(violations.len(), 5);
    assert!(violations.iter().all(|v| v.severity == Severity::Error));
    assert_eq!(violations[0].message, "runway too short");
    assert_eq!(results.runs_failed, 1);
    assert_eq!(results.runs_aborted, 0);
    let summary = &results.violation_summary["long_runway"];
    assert_eq!(summary.count, 5);
    assert_eq!(summary.first_step, Some(0));
}

#[test]
fn test_warning_violation_does_not_fail_run() {
    let results = deterministic(
        "param cash: Currency = 10 USD { source: \"x\" }
         constraint rich: cash > 100 USD",
        2,
    );
    assert_eq!(results.constraint_violations.len(), 2);
    assert_eq!(results.runs_failed, 0);
}

#[test]
fn test_policy_overrides_and_propagates() {
    let results = deterministic(
        "param price: Currency = 10 USD { source: \"x\" }
         rate units: Count = 2 + step
         rate revenue: Currency = price * units
         policy discount when step >= 2 { price = 5 USD }",
        4,
    );
    assert_eq!(results.series("price"), Some(&[10.0, 10.0, 5.0, 5.0][..]));
    assert_eq!(results.series("revenue"), Some(&[20.0, 30.0, 20.0, 25.0][..]));
    let steps: Vec<usize> = results.policy_activations.iter().map(|a| a.step).collect();
    assert_eq!(steps, vec![2, 3]);
    assert_eq!(results.policy_activations[0].targets, vec!["price".to_string()]);
}

#[test]
fn test_policy_trigger_sees_pre_policy_state() {
    // Both policies trigger on the original value of `x`
    let results = deterministic(
        "param x: Count = 1 { source: \"s\" }
         policy first when x == 1 { x = 2 }
         policy second when x == 1 { x = 3 }",
        1,
    );
    assert_eq!(results.policy_activations.len(), 2);
    assert_eq!(results.series("x"), Some(&[3.0][..]));
}

#[test]
fn test_policy_pins_reset_each_step() {
    let results = deterministic(
        "param x: Count = 1 { source: \"s\" }
         policy once when step == 1 { x = 9 }",
        3,
    );
    assert_eq!(results.series("x"), Some(&[1.0, 9.0, 1.0][..]));
}

#[test]
fn test_policy_feeds_prev() {
    let results = deterministic(
        "rate level: Count = prev(level, 0) + 1
         policy reset when level > 2 { level = 0 }",
        5,
    );
    assert_eq!(results.series("level"), Some(&[1.0, 2.0, 0.0, 1.0, 2.0][..]));
}

// ==================== Runtime faults ====================

#[test]
fn test_division_by_zero_names_entity() {
    let err = run(
        "param zero: Count = 0 { source: \"x\" }
         rate ratio: Count = 10 / (zero + step - 2)",
        &RunConfig::deterministic(5),
    )
    .unwrap_err();
    match err {
        PelError::Simulation(SimulationError::Evaluation(EvaluationError::DivisionByZero {
            entity,
            step,
            run,
            ..
        })) => {
            assert_eq!(entity, "ratio");
            assert_eq!(step, 2);
            assert_eq!(run, 0);
        }
        other => panic!("expected division by zero, got {:?}", other),
    }
}

#[test]
fn test_untaken_branch_fault_is_ignored() {
    let results = deterministic(
        "param d: Count = 0 { source: \"x\" }
         rate safe: Count = if d == 0 then 0 else 1 / d",
        2,
    );
    assert_eq!(results.series("safe"), Some(&[0.0, 0.0][..]));
}

#[test]
fn test_short_circuit_hides_fault() {
    let results = deterministic(
        "param d: Count = 0 { source: \"x\" }
         constraint ok: d == 0 || 1 / d > 1",
        2,
    );
    assert!(results.constraint_violations.is_empty());
}

#[test]
fn test_fault_in_constraint_is_reported_against_constraint() {
    let err = run(
        "param d: Count = 0 { source: \"x\" }
         constraint bad: 1 / d > 1",
        &RunConfig::deterministic(2),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        PelError::Simulation(SimulationError::Evaluation(EvaluationError::DivisionByZero { entity, .. })) if entity == "bad"
    ));
}

#[test]
fn test_non_finite_value() {
    let err = run(
        "rate big: Count = exp(1000)",
        &RunConfig::deterministic(1),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        PelError::Simulation(SimulationError::Evaluation(EvaluationError::NaNPropagation { .. }))
    ));
}

// ==================== Monte Carlo ====================

const UNCERTAIN: &str = "
    param demand: Count ~ Normal(100, 15) { source: \"survey\" }
    param price: Currency ~ Uniform(8 USD, 12 USD) { source: \"quotes\" }
    rate revenue: Currency = demand * price
";

#[test]
fn test_monte_carlo_is_reproducible() {
    let m = module(UNCERTAIN);
    let functions = FunctionTable::standard();
    let config = RunConfig::monte_carlo(50, 3, 42);
    let a = simulate(&m, &config, &functions).unwrap();
    let b = simulate(&m, &config, &functions).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.seed, 42);
    assert_eq!(a.runs_executed, 50);
}

#[test]
fn test_monte_carlo_independent_of_thread_count() {
    let m = module(UNCERTAIN);
    let functions = FunctionTable::standard();
    let mut one = RunConfig::monte_carlo(40, 2, 7);
    one.threads = 1;
    let mut four = one.clone();
    four.threads = 4;
    assert_eq!(
        simulate(&m, &one, &functions).unwrap(),
        simulate(&m, &four, &functions).unwrap()
    );
}

#[test]
fn test_different_seeds_differ() {
    let m = module(UNCERTAIN);
    let functions = FunctionTable::standard();
    let a = simulate(&m, &RunConfig::monte_carlo(10, 1, 1), &functions).unwrap();
    let b = simulate(&m, &RunConfig::monte_carlo(10, 1, 2), &functions).unwrap();
    assert_ne!(a.per_entity_value_series, b.per_entity_value_series);
}

#[test]
fn test_samples_fixed_within_a_run() {
    let m = module(UNCERTAIN);
    let mut config = RunConfig::monte_carlo(5, 4, 3);
    config.keep_runs = true;
    let results = simulate(&m, &config, &FunctionTable::standard()).unwrap();
    let runs = results.runs.expect("kept runs");
    assert_eq!(runs.len(), 5);
    for run in &runs {
        let demand = &run.series["demand"];
        assert!(demand.iter().all(|v| *v == demand[0]));
    }
}

#[test]
fn test_percentiles_are_ordered() {
    let m = module(UNCERTAIN);
    let results = simulate(
        &m,
        &RunConfig::monte_carlo(200, 1, 11),
        &FunctionTable::standard(),
    )
    .unwrap();
    let p = &results.percentiles.as_ref().expect("monte carlo percentiles")["revenue"];
    assert!(p.p5[0] <= p.p25[0]);
    assert!(p.p25[0] <= p.p50[0]);
    assert!(p.p50[0] <= p.p75[0]);
    assert!(p.p75[0] <= p.p95[0]);
}

#[test]
fn test_missing_seed_is_recorded() {
    let m = module(UNCERTAIN);
    let mut config = RunConfig::monte_carlo(3, 1, 0);
    config.seed = None;
    let first = simulate(&m, &config, &FunctionTable::standard()).unwrap();
    config.seed = Some(first.seed);
    let replay = simulate(&m, &config, &FunctionTable::standard()).unwrap();
    assert_eq!(first.per_entity_value_series, replay.per_entity_value_series);
}

#[test]
fn test_calibration_override() {
    let m = module(
        "param churn: Fraction = 50% { source: \"guess\" }
         rate kept: Fraction = 1 - churn",
    );
    let mut config = RunConfig::deterministic(1);
    config.calibration.insert(
        "churn".to_string(),
        Distribution::Beta {
            alpha: 1.0,
            beta: 9.0,
        },
    );
    let results = simulate(&m, &config, &FunctionTable::standard()).unwrap();
    let kept = results.series("kept").unwrap()[0];
    assert!((kept - 0.9).abs() < 1e-12);
}

// ==================== Failure handling ====================

/// Aborts in runs whose sampled `x` is negative
const SOMETIMES_FAILS: &str = "
    param x: Count ~ Uniform(-1, 1) { source: \"x\" }
    rate y: Count = if x < 0 then 1 / (x - x) else x
";

#[test]
fn test_fail_fast_returns_error() {
    let m = module(SOMETIMES_FAILS);
    let config = RunConfig::monte_carlo(64, 2, 5);
    let err = simulate(&m, &config, &FunctionTable::standard()).unwrap_err();
    assert!(matches!(
        err,
        SimulationError::Evaluation(EvaluationError::DivisionByZero { .. })
    ));
}

#[test]
fn test_tolerate_reports_partial_completion() {
    let m = module(SOMETIMES_FAILS);
    let mut config = RunConfig::monte_carlo(64, 2, 5);
    config.failure_policy = FailurePolicy::Tolerate;
    let results = simulate(&m, &config, &FunctionTable::standard()).unwrap();
    assert_eq!(results.runs_executed, 64);
    assert!(results.runs_aborted > 0);
    assert!(results.runs_aborted < 64);
    assert_eq!(results.runs_failed, results.runs_aborted);
    assert_eq!(results.errors.len(), results.runs_aborted);
    // Errors are listed in run order
    let runs: Vec<usize> = results.errors.iter().map(EvaluationError::run).collect();
    let mut sorted = runs.clone();
    sorted.sort_unstable();
    assert_eq!(runs, sorted);
    // Means cover successful runs only, where y == x >= 0
    assert!(results.series("y").unwrap()[0] >= 0.0);
}

#[test]
fn test_cancelled_before_start() {
    let m = module(UNCERTAIN);
    let token = CancellationToken::new();
    token.cancel();
    let err = simulate_with_cancel(
        &m,
        &RunConfig::monte_carlo(10, 5, 1),
        &FunctionTable::standard(),
        &token,
    )
    .unwrap_err();
    assert!(matches!(err, SimulationError::Cancelled));
}

#[test]
fn test_fail_fast_error_independent_of_thread_count() {
    let m = module(SOMETIMES_FAILS);
    let functions = FunctionTable::standard();

    let mut tolerant = RunConfig::monte_carlo(64, 2, 5);
    tolerant.failure_policy = FailurePolicy::Tolerate;
    let lowest = simulate(&m, &tolerant, &functions).unwrap().errors[0].clone();

    for threads in [1, 2, 4, 8] {
        let mut config = RunConfig::monte_carlo(64, 2, 5);
        config.threads = threads;
        match simulate(&m, &config, &functions) {
            Err(SimulationError::Evaluation(error)) => {
                assert_eq!(error, lowest, "threads = {}", threads)
            }
            other => panic!("expected an evaluation error, got {:?}", other),
        }
    }
}

#[test]
fn test_cancel_stops_runs_in_flight() {
    let m = module("rate a: Count = prev(a, 0) + step");
    let mut config = RunConfig::monte_carlo(2, 5_000_000, 1);
    config.threads = 2;
    let token = CancellationToken::new();
    let functions = FunctionTable::standard();

    let result = std::thread::scope(|scope| {
        let canceller = token.clone();
        scope.spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            canceller.cancel();
        });
        simulate_with_cancel(&m, &config, &functions, &token)
    });
    assert!(matches!(result, Err(SimulationError::Cancelled)));
}

#[test]
fn test_malformed_module_is_rejected_before_running() {
    let mut m = module("param p: Count = 1 { source: \"x\" }\nrate r: Count = p * 2");
    let (_, p) = m.entity("p").unwrap();
    let node = p.node as usize;
    m.nodes[node].kind = pel::ir::NodeKind::Param { entity: 99 };
    assert!(matches!(
        simulate(&m, &RunConfig::deterministic(2), &FunctionTable::standard()),
        Err(SimulationError::Ir(_))
    ));
}

#[test]
fn test_timeout_aborts_run() {
    let m = module("rate a: Count = step");
    let mut config = RunConfig::deterministic(1_000_000);
    config.timeout_ms = Some(1);
    let err = simulate(&m, &config, &FunctionTable::standard()).unwrap_err();
    assert!(matches!(
        err,
        SimulationError::Evaluation(EvaluationError::Timeout { limit_ms: 1, .. })
    ));
}

#[test]
fn test_invalid_config_is_rejected() {
    let m = module("rate a: Count = step");
    let config = RunConfig::deterministic(0);
    assert!(matches!(
        simulate(&m, &config, &FunctionTable::standard()),
        Err(SimulationError::Config(_))
    ));
}

#[test]
fn test_results_document_serializes() {
    let results = deterministic("rate a: Count = step", 2);
    let json = results.to_json().unwrap();
    assert!(json.contains("\"per_entity_value_series\""));
    assert!(json.contains("\"mode\": \"deterministic\""));
    assert!(!json.contains("\"percentiles\""));
}

mod determinism {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_same_seed_same_document(seed in any::<u64>(), runs in 1usize..20) {
            let m = module(UNCERTAIN);
            let functions = FunctionTable::standard();
            let config = RunConfig::monte_carlo(runs, 2, seed);
            let a = simulate(&m, &config, &functions).unwrap();
            let b = simulate(&m, &config, &functions).unwrap();
            prop_assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
        }
    }
}
