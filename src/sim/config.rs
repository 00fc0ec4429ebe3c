//! Run configuration
//!
//! Loaded from TOML with defaults for every field, then overridden by CLI
//! flags and validated before a simulation starts.

use crate::distribution::Distribution;
use indexmap::IndexMap;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// One pass with every distribution at its mean
    #[default]
    Deterministic,
    /// Independent sampled runs
    MonteCarlo,
}

/// What an aborted Monte Carlo run does to the invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Report partial completion
    Tolerate,
    /// The first aborted run fails the invocation
    #[default]
    FailFast,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read {}", path.display())]
    #[diagnostic(code(config::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid run configuration file")]
    #[diagnostic(code(config::parse))]
    Parse(#[from] toml::de::Error),

    #[error("invalid run configuration: {0}")]
    #[diagnostic(code(config::invalid))]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub mode: Mode,
    /// Monte Carlo run count; deterministic mode always executes one run
    pub runs: usize,
    /// Number of steps
    pub horizon: usize,
    /// Master seed; drawn and recorded when absent
    pub seed: Option<u64>,
    /// Per-run wall clock limit
    pub timeout_ms: Option<u64>,
    pub failure_policy: FailurePolicy,
    /// Worker threads; 0 uses the available parallelism
    pub threads: usize,
    /// Include every run's series in the results document
    pub keep_runs: bool,
    /// Fitted distributions replacing parameter values
    pub calibration: IndexMap<String, Distribution>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Deterministic,
            runs: 1,
            horizon: 12,
            seed: None,
            timeout_ms: None,
            failure_policy: FailurePolicy::FailFast,
            threads: 0,
            keep_runs: false,
            calibration: IndexMap::new(),
        }
    }
}

impl RunConfig {
    pub fn deterministic(horizon: usize) -> Self {
        Self {
            horizon,
            ..Self::default()
        }
    }

    pub fn monte_carlo(runs: usize, horizon: usize, seed: u64) -> Self {
        Self {
            mode: Mode::MonteCarlo,
            runs,
            horizon,
            seed: Some(seed),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runs == 0 {
            return Err(ConfigError::Invalid("`runs` must be at least 1".into()));
        }
        if self.horizon == 0 {
            return Err(ConfigError::Invalid("`horizon` must be at least 1".into()));
        }
        if self.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("`timeout_ms` must be positive".into()));
        }
        for (name, dist) in &self.calibration {
            dist.validate()
                .map_err(|e| ConfigError::Invalid(format!("calibration of `{}`: {}", name, e)))?;
        }
        Ok(())
    }

    /// Runs actually executed for this mode
    pub fn effective_runs(&self) -> usize {
        match self.mode {
            Mode::Deterministic => 1,
            Mode::MonteCarlo => self.runs,
        }
    }

    pub fn thread_count(&self) -> usize {
        if self.threads > 0 {
            self.threads
        } else {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        }
    }
}
