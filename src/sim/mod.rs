//! Simulation engine
//!
//! Executes an [`IrModule`] over a horizon of discrete steps, either once
//! with every distribution collapsed to its mean or as many independently
//! seeded Monte Carlo runs spread over a worker pool. Each step evaluates the
//! node list in id order, applies triggered policies, re-evaluates what they
//! changed and checks constraints.
//!
//! Identical module, configuration and seed give an identical
//! [`ResultsDocument`] whatever the thread count.

pub mod config;
mod engine;
pub mod eval;
pub mod results;

pub use config::{ConfigError, FailurePolicy, Mode, RunConfig};
pub use engine::run_seed;
pub use results::{
    ConstraintViolation, Percentiles, PolicyActivation, ResultsDocument, RunOutcome, RunSeries,
    ViolationSummary,
};

use crate::builtins::FunctionTable;
use crate::ir::{IrError, IrModule, NodeIdx};
use engine::{RunContext, RunStatus};
use eval::ExecutionPlan;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::info;

/// Runtime failure that aborts a run
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationError {
    #[error("division by zero in `{entity}` (node {node}) at step {step} of run {run}")]
    DivisionByZero {
        node: NodeIdx,
        entity: String,
        step: usize,
        run: usize,
    },

    #[error("non-finite value in `{entity}` (node {node}) at step {step} of run {run}")]
    NaNPropagation {
        node: NodeIdx,
        entity: String,
        step: usize,
        run: usize,
    },

    #[error("run {run} exceeded {limit_ms} ms at step {step}")]
    Timeout { step: usize, run: usize, limit_ms: u64 },
}

impl EvaluationError {
    pub fn run(&self) -> usize {
        match self {
            EvaluationError::DivisionByZero { run, .. }
            | EvaluationError::NaNPropagation { run, .. }
            | EvaluationError::Timeout { run, .. } => *run,
        }
    }

    pub fn step(&self) -> usize {
        match self {
            EvaluationError::DivisionByZero { step, .. }
            | EvaluationError::NaNPropagation { step, .. }
            | EvaluationError::Timeout { step, .. } => *step,
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum SimulationError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(code(sim::ir))]
    Ir(#[from] IrError),

    #[error(transparent)]
    #[diagnostic(code(sim::evaluation))]
    Evaluation(#[from] EvaluationError),

    #[error("simulation cancelled")]
    #[diagnostic(code(sim::cancelled))]
    Cancelled,

    #[error("failed to start the worker pool")]
    #[diagnostic(code(sim::pool))]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Cooperative cancellation, checked between steps
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Run a compiled model
pub fn simulate(
    module: &IrModule,
    config: &RunConfig,
    functions: &FunctionTable,
) -> Result<ResultsDocument, SimulationError> {
    simulate_with_cancel(module, config, functions, &CancellationToken::new())
}

/// Run a compiled model, stopping early when `cancel` is raised
pub fn simulate_with_cancel(
    module: &IrModule,
    config: &RunConfig,
    functions: &FunctionTable,
    cancel: &CancellationToken,
) -> Result<ResultsDocument, SimulationError> {
    config.validate()?;
    module.validate()?;
    let calibrated;
    let module = if config.calibration.is_empty() {
        module
    } else {
        calibrated = module.recalibrated(&config.calibration)?;
        &calibrated
    };

    let seed = config.seed.unwrap_or_else(rand::random);
    let plan = ExecutionPlan::new(module);
    info!(
        model = %module.model,
        mode = ?config.mode,
        runs = config.effective_runs(),
        horizon = config.horizon,
        seed,
        "simulation started"
    );

    let context = RunContext::new(module, functions, &plan, config, cancel);
    let records = context.execute(seed)?;

    if cancel.is_cancelled() {
        return Err(SimulationError::Cancelled);
    }
    let fail_fast = config.mode == Mode::Deterministic
        || config.failure_policy == FailurePolicy::FailFast;
    if fail_fast {
        let first = records.iter().find_map(|r| match &r.status {
            RunStatus::Aborted(error) => Some(error.clone()),
            _ => None,
        });
        if let Some(error) = first {
            return Err(error.into());
        }
    }

    let document = results::aggregate(module, config, seed, records);
    info!(
        executed = document.runs_executed,
        failed = document.runs_failed,
        violations = document.constraint_violations.len(),
        "simulation finished"
    );
    Ok(document)
}
