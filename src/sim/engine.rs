//! Run loop and Monte Carlo orchestration

use super::config::{FailurePolicy, Mode, RunConfig};
use super::eval::{Evaluator, ExecutionPlan, Fault, FaultKind};
use super::results::{ConstraintViolation, PolicyActivation};
use super::{CancellationToken, EvaluationError};
use crate::builtins::FunctionTable;
use crate::hir::Severity;
use crate::ir::{IrModule, NodeIdx, NodeKind, Origin};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RunStatus {
    Completed,
    Aborted(EvaluationError),
    /// Stopped between steps by cancellation, or under fail-fast because a
    /// lower-index run aborted
    Stopped,
    /// Never started
    Skipped,
}

#[derive(Debug, Clone)]
pub(crate) struct RunRecord {
    pub run: usize,
    pub seed: u64,
    /// Per entity, per step
    pub series: Vec<Vec<f64>>,
    pub violations: Vec<ConstraintViolation>,
    pub activations: Vec<PolicyActivation>,
    pub status: RunStatus,
}

impl RunRecord {
    fn new(run: usize, seed: u64, entities: usize) -> Self {
        Self {
            run,
            seed,
            series: vec![Vec::new(); entities],
            violations: Vec::new(),
            activations: Vec::new(),
            status: RunStatus::Skipped,
        }
    }

    pub fn has_error_violation(&self) -> bool {
        self.violations.iter().any(|v| v.severity == Severity::Error)
    }
}

/// Seed of run `run` derived from the master seed
pub fn run_seed(master: u64, run: usize) -> u64 {
    let mut z = master.wrapping_add((run as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Everything shared by the runs of one invocation
pub(crate) struct RunContext<'a> {
    pub module: &'a IrModule,
    pub functions: &'a FunctionTable,
    pub plan: &'a ExecutionPlan,
    pub config: &'a RunConfig,
    pub cancel: &'a CancellationToken,
    /// Lowest index of an aborted run under fail-fast, `usize::MAX` while
    /// none has aborted. Only runs above it are skipped or stopped, so the
    /// lowest aborting run always reaches its error whatever the scheduling.
    pub first_abort: AtomicUsize,
}

impl<'a> RunContext<'a> {
    pub fn new(
        module: &'a IrModule,
        functions: &'a FunctionTable,
        plan: &'a ExecutionPlan,
        config: &'a RunConfig,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            module,
            functions,
            plan,
            config,
            cancel,
            first_abort: AtomicUsize::new(usize::MAX),
        }
    }

    fn halted(&self, run: usize) -> bool {
        self.cancel.is_cancelled() || run > self.first_abort.load(Ordering::Relaxed)
    }

    /// Execute every run of the invocation, results in run index order
    pub fn execute(&self, master_seed: u64) -> Result<Vec<RunRecord>, rayon::ThreadPoolBuildError> {
        match self.config.mode {
            Mode::Deterministic => Ok(vec![self.launch(0, master_seed)]),
            Mode::MonteCarlo => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(self.config.thread_count())
                    .build()?;
                let runs = self.config.effective_runs();
                Ok(pool.install(|| {
                    (0..runs)
                        .into_par_iter()
                        .map(|run| self.launch(run, run_seed(master_seed, run)))
                        .collect()
                }))
            }
        }
    }

    fn launch(&self, run: usize, seed: u64) -> RunRecord {
        if self.halted(run) {
            return RunRecord::new(run, seed, self.module.entities.len());
        }
        let record = self.run(run, seed);
        if let RunStatus::Aborted(error) = &record.status {
            warn!(run, error = %error, "run aborted");
            if self.config.failure_policy == FailurePolicy::FailFast {
                self.first_abort.fetch_min(run, Ordering::Relaxed);
            }
        }
        record
    }

    fn run(&self, run: usize, seed: u64) -> RunRecord {
        let module = self.module;
        let plan = self.plan;
        let mut record = RunRecord::new(run, seed, module.entities.len());
        let mut eval = Evaluator::new(module, self.functions);
        let started = Instant::now();
        let limit = self.config.timeout_ms.map(Duration::from_millis);

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        for &node in &plan.sample_nodes {
            if let NodeKind::Sample { distribution } = &module.node(node).kind {
                let value = match self.config.mode {
                    Mode::Deterministic => distribution.mean(),
                    Mode::MonteCarlo => distribution.sample(&mut rng),
                };
                eval.set_sample(node, value);
            }
        }

        for step in 0..self.config.horizon {
            if self.halted(run) {
                record.status = RunStatus::Stopped;
                return record;
            }
            if let Some(limit) = limit {
                if started.elapsed() > limit {
                    record.status = RunStatus::Aborted(EvaluationError::Timeout {
                        run,
                        step,
                        limit_ms: limit.as_millis() as u64,
                    });
                    return record;
                }
            }
            if let Err(error) = self.step(&mut eval, &mut record, step) {
                record.status = RunStatus::Aborted(error);
                return record;
            }
        }

        debug!(
            run,
            violations = record.violations.len(),
            activations = record.activations.len(),
            "run completed"
        );
        record.status = RunStatus::Completed;
        record
    }

    fn step(
        &self,
        eval: &mut Evaluator<'_>,
        record: &mut RunRecord,
        step: usize,
    ) -> Result<(), EvaluationError> {
        let module = self.module;
        let run = record.run;
        eval.begin_step(step);
        eval.evaluate_all();
        self.check_entities(eval, run, step)?;

        // Triggers see the pre-policy state; a later policy overrides an
        // earlier one on the same entity
        let mut overrides: Vec<Option<f64>> = vec![None; module.entities.len()];
        for policy in &module.policies {
            self.consume(eval, policy.trigger, run, step)?;
            if !eval.truth(policy.trigger) {
                continue;
            }
            let mut targets = Vec::with_capacity(policy.gates.len());
            for &gate in &policy.gates {
                self.consume(eval, gate, run, step)?;
                if let NodeKind::PolicyGate { target, .. } = module.node(gate).kind {
                    overrides[target] = Some(eval.value(gate));
                    targets.push(module.entities[target].name.clone());
                }
            }
            record.activations.push(PolicyActivation {
                run,
                step,
                policy: policy.name.clone(),
                targets,
            });
        }

        let roots: Vec<NodeIdx> = overrides
            .iter()
            .enumerate()
            .filter_map(|(entity, value)| {
                value.map(|v| {
                    eval.pin(entity, v);
                    self.plan.entity_nodes[entity]
                })
            })
            .collect();
        if !roots.is_empty() {
            eval.reevaluate(&self.plan.downstream(&roots));
            self.check_entities(eval, run, step)?;
        }

        for constraint in &module.constraints {
            self.consume(eval, constraint.node, run, step)?;
            if !eval.truth(constraint.node) {
                record.violations.push(ConstraintViolation {
                    run,
                    step,
                    constraint: constraint.name.clone(),
                    severity: constraint.severity,
                    message: constraint.message.clone(),
                });
            }
        }

        for (entity, &node) in self.plan.entity_nodes.iter().enumerate() {
            record.series[entity].push(eval.value(node));
        }
        eval.end_step(&self.plan.entity_nodes);
        Ok(())
    }

    fn check_entities(&self, eval: &Evaluator<'_>, run: usize, step: usize) -> Result<(), EvaluationError> {
        for &node in &self.plan.entity_nodes {
            self.consume(eval, node, run, step)?;
        }
        Ok(())
    }

    /// Surface a fault carried by a consumed node
    fn consume(&self, eval: &Evaluator<'_>, node: NodeIdx, run: usize, step: usize) -> Result<(), EvaluationError> {
        match eval.fault(node) {
            None => Ok(()),
            Some(fault) => Err(self.fault_error(fault, run, step)),
        }
    }

    fn fault_error(&self, fault: Fault, run: usize, step: usize) -> EvaluationError {
        let module = self.module;
        let entity = match module.node(fault.node).origin {
            Origin::Entity(e) => module.entities[e].name.clone(),
            Origin::Constraint(c) => module.constraints[c].name.clone(),
            Origin::Policy(p) => module.policies[p].name.clone(),
        };
        let node = fault.node;
        match fault.kind {
            FaultKind::DivisionByZero => EvaluationError::DivisionByZero {
                node,
                entity,
                step,
                run,
            },
            FaultKind::NaNPropagation => EvaluationError::NaNPropagation {
                node,
                entity,
                step,
                run,
            },
        }
    }
}
