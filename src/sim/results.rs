//! Results document
//!
//! Everything a simulation invocation reports, aggregated over runs in run
//! index order so identical inputs give an identical document.

use super::EvaluationError;
use super::config::{Mode, RunConfig};
use super::engine::{RunRecord, RunStatus};
use crate::hir::Severity;
use crate::ir::IrModule;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub run: usize,
    pub step: usize,
    pub constraint: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyActivation {
    pub run: usize,
    pub step: usize,
    pub policy: String,
    /// Entities overridden by the policy this step
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationSummary {
    pub severity: Severity,
    pub count: usize,
    pub runs_affected: usize,
    pub first_step: Option<usize>,
}

/// Per-step percentiles over successful runs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Percentiles {
    pub p5: Vec<f64>,
    pub p25: Vec<f64>,
    pub p50: Vec<f64>,
    pub p75: Vec<f64>,
    pub p95: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Aborted,
}

/// One run's series, kept when `keep_runs` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSeries {
    pub run: usize,
    pub seed: u64,
    pub outcome: RunOutcome,
    pub series: IndexMap<String, Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsDocument {
    pub model: String,
    pub mode: Mode,
    pub seed: u64,
    pub horizon: usize,
    pub runs_requested: usize,
    pub runs_executed: usize,
    /// Aborted runs plus runs with an error-severity violation
    pub runs_failed: usize,
    pub runs_aborted: usize,
    /// Deterministic values, or the mean over successful Monte Carlo runs
    pub per_entity_value_series: IndexMap<String, Vec<f64>>,
    pub constraint_violations: Vec<ConstraintViolation>,
    pub violation_summary: IndexMap<String, ViolationSummary>,
    pub policy_activations: Vec<PolicyActivation>,
    pub errors: Vec<EvaluationError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentiles: Option<IndexMap<String, Percentiles>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs: Option<Vec<RunSeries>>,
}

impl ResultsDocument {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn series(&self, entity: &str) -> Option<&[f64]> {
        self.per_entity_value_series.get(entity).map(Vec::as_slice)
    }

    pub fn violations_of(&self, constraint: &str) -> impl Iterator<Item = &ConstraintViolation> {
        self.constraint_violations
            .iter()
            .filter(move |v| v.constraint == constraint)
    }
}

pub(crate) fn aggregate(
    module: &IrModule,
    config: &RunConfig,
    seed: u64,
    records: Vec<RunRecord>,
) -> ResultsDocument {
    let executed: Vec<&RunRecord> = records
        .iter()
        .filter(|r| matches!(r.status, RunStatus::Completed | RunStatus::Aborted(_)))
        .collect();
    let successful: Vec<&RunRecord> = executed
        .iter()
        .copied()
        .filter(|r| matches!(r.status, RunStatus::Completed))
        .collect();

    let errors: Vec<EvaluationError> = executed
        .iter()
        .filter_map(|r| match &r.status {
            RunStatus::Aborted(e) => Some(e.clone()),
            _ => None,
        })
        .collect();
    let runs_failed = executed
        .iter()
        .filter(|r| matches!(r.status, RunStatus::Aborted(_)) || r.has_error_violation())
        .count();

    let names: Vec<&str> = module.entities.iter().map(|e| e.name.as_str()).collect();
    let per_entity_value_series = names
        .iter()
        .enumerate()
        .map(|(e, name)| (name.to_string(), mean_series(&successful, e)))
        .collect();

    let percentiles = match config.mode {
        Mode::Deterministic => None,
        Mode::MonteCarlo => Some(
            names
                .iter()
                .enumerate()
                .map(|(e, name)| (name.to_string(), percentiles(&successful, e)))
                .collect(),
        ),
    };

    let constraint_violations: Vec<ConstraintViolation> = executed
        .iter()
        .flat_map(|r| r.violations.iter().cloned())
        .collect();

    let violation_summary = module
        .constraints
        .iter()
        .map(|c| {
            let matching: Vec<&ConstraintViolation> = constraint_violations
                .iter()
                .filter(|v| v.constraint == c.name)
                .collect();
            let mut runs: Vec<usize> = matching.iter().map(|v| v.run).collect();
            runs.dedup();
            let summary = ViolationSummary {
                severity: c.severity,
                count: matching.len(),
                runs_affected: runs.len(),
                first_step: matching.iter().map(|v| v.step).min(),
            };
            (c.name.clone(), summary)
        })
        .collect();

    let policy_activations = executed
        .iter()
        .flat_map(|r| r.activations.iter().cloned())
        .collect();

    let runs = config.keep_runs.then(|| {
        executed
            .iter()
            .map(|r| RunSeries {
                run: r.run,
                seed: r.seed,
                outcome: if matches!(r.status, RunStatus::Completed) {
                    RunOutcome::Completed
                } else {
                    RunOutcome::Aborted
                },
                series: names
                    .iter()
                    .zip(&r.series)
                    .map(|(n, s)| (n.to_string(), s.clone()))
                    .collect(),
            })
            .collect()
    });

    ResultsDocument {
        model: module.model.clone(),
        mode: config.mode,
        seed,
        horizon: config.horizon,
        runs_requested: config.effective_runs(),
        runs_executed: executed.len(),
        runs_failed,
        runs_aborted: errors.len(),
        per_entity_value_series,
        constraint_violations,
        violation_summary,
        policy_activations,
        errors,
        percentiles,
        runs,
    }
}

fn mean_series(runs: &[&RunRecord], entity: usize) -> Vec<f64> {
    let Some(first) = runs.first() else {
        return Vec::new();
    };
    let steps = first.series[entity].len();
    let n = runs.len() as f64;
    (0..steps)
        .map(|t| runs.iter().map(|r| r.series[entity][t]).sum::<f64>() / n)
        .collect()
}

fn percentiles(runs: &[&RunRecord], entity: usize) -> Percentiles {
    let Some(first) = runs.first() else {
        return Percentiles::default();
    };
    let steps = first.series[entity].len();
    let mut out = Percentiles::default();
    for t in 0..steps {
        let mut values: Vec<f64> = runs.iter().map(|r| r.series[entity][t]).collect();
        values.sort_by(f64::total_cmp);
        out.p5.push(percentile(&values, 5.0));
        out.p25.push(percentile(&values, 25.0));
        out.p50.push(percentile(&values, 50.0));
        out.p75.push(percentile(&values, 75.0));
        out.p95.push(percentile(&values, 95.0));
    }
    out
}

/// Linear interpolation between closest ranks of sorted values
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 25.0), 2.0);
        assert!((percentile(&values, 95.0) - 4.8).abs() < 1e-12);
        assert_eq!(percentile(&[7.0], 5.0), 7.0);
    }
}
