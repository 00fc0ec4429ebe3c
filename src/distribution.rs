//! Probability distribution descriptors
//!
//! A distribution-valued parameter is resolved to its mean in deterministic
//! mode and to a single sample per Monte Carlo run. All parameters are in the
//! canonical unit of the parameter's dimension.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// Distribution with fitted parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Distribution {
    Normal { mean: f64, std: f64 },
    LogNormal { mu: f64, sigma: f64 },
    Uniform { low: f64, high: f64 },
    Triangular { low: f64, mode: f64, high: f64 },
    Beta { alpha: f64, beta: f64 },
}

/// Shape of a distribution family: its name and argument names in positional
/// order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Family {
    pub name: &'static str,
    pub params: &'static [&'static str],
    /// Whether arguments carry the parameter's unit (false: dimensionless)
    pub unit_args: bool,
}

pub const FAMILIES: &[Family] = &[
    Family {
        name: "Normal",
        params: &["mean", "std"],
        unit_args: true,
    },
    Family {
        name: "LogNormal",
        params: &["mu", "sigma"],
        unit_args: false,
    },
    Family {
        name: "Uniform",
        params: &["low", "high"],
        unit_args: true,
    },
    Family {
        name: "Triangular",
        params: &["low", "mode", "high"],
        unit_args: true,
    },
    Family {
        name: "Beta",
        params: &["alpha", "beta"],
        unit_args: false,
    },
];

pub fn family(name: &str) -> Option<&'static Family> {
    FAMILIES.iter().find(|f| f.name == name)
}

impl Distribution {
    /// Build from a family name and arguments in positional order, then
    /// validate the parameters
    pub fn from_args(name: &str, args: &[f64]) -> Result<Self, String> {
        let fam = family(name).ok_or_else(|| format!("unknown distribution `{}`", name))?;
        if args.len() != fam.params.len() {
            return Err(format!(
                "`{}` takes {} arguments ({}), got {}",
                fam.name,
                fam.params.len(),
                fam.params.join(", "),
                args.len()
            ));
        }
        let dist = match fam.name {
            "Normal" => Distribution::Normal {
                mean: args[0],
                std: args[1],
            },
            "LogNormal" => Distribution::LogNormal {
                mu: args[0],
                sigma: args[1],
            },
            "Uniform" => Distribution::Uniform {
                low: args[0],
                high: args[1],
            },
            "Triangular" => Distribution::Triangular {
                low: args[0],
                mode: args[1],
                high: args[2],
            },
            _ => Distribution::Beta {
                alpha: args[0],
                beta: args[1],
            },
        };
        dist.validate()?;
        Ok(dist)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Distribution::Normal { .. } => "Normal",
            Distribution::LogNormal { .. } => "LogNormal",
            Distribution::Uniform { .. } => "Uniform",
            Distribution::Triangular { .. } => "Triangular",
            Distribution::Beta { .. } => "Beta",
        }
    }

    /// Family this descriptor belongs to
    pub fn family(&self) -> &'static Family {
        match self {
            Distribution::Normal { .. } => &FAMILIES[0],
            Distribution::LogNormal { .. } => &FAMILIES[1],
            Distribution::Uniform { .. } => &FAMILIES[2],
            Distribution::Triangular { .. } => &FAMILIES[3],
            Distribution::Beta { .. } => &FAMILIES[4],
        }
    }

    /// Check parameter ranges
    pub fn validate(&self) -> Result<(), String> {
        let all_finite = match *self {
            Distribution::Normal { mean, std } => mean.is_finite() && std.is_finite(),
            Distribution::LogNormal { mu, sigma } => mu.is_finite() && sigma.is_finite(),
            Distribution::Uniform { low, high } => low.is_finite() && high.is_finite(),
            Distribution::Triangular { low, mode, high } => {
                low.is_finite() && mode.is_finite() && high.is_finite()
            }
            Distribution::Beta { alpha, beta } => alpha.is_finite() && beta.is_finite(),
        };
        if !all_finite {
            return Err(format!("`{}` parameters must be finite", self.name()));
        }

        match *self {
            Distribution::Normal { std, .. } if std < 0.0 => {
                Err(format!("Normal std must be >= 0, got {}", std))
            }
            Distribution::LogNormal { sigma, .. } if sigma < 0.0 => {
                Err(format!("LogNormal sigma must be >= 0, got {}", sigma))
            }
            Distribution::Uniform { low, high } if low > high => Err(format!(
                "Uniform requires low <= high, got low = {}, high = {}",
                low, high
            )),
            Distribution::Triangular { low, mode, high } if !(low <= mode && mode <= high) => {
                Err(format!(
                    "Triangular requires low <= mode <= high, got {}, {}, {}",
                    low, mode, high
                ))
            }
            Distribution::Beta { alpha, beta } if alpha <= 0.0 || beta <= 0.0 => Err(format!(
                "Beta requires alpha > 0 and beta > 0, got alpha = {}, beta = {}",
                alpha, beta
            )),
            _ => Ok(()),
        }
    }

    /// Point estimate used in deterministic mode
    pub fn mean(&self) -> f64 {
        match *self {
            Distribution::Normal { mean, .. } => mean,
            Distribution::LogNormal { mu, sigma } => (mu + sigma * sigma / 2.0).exp(),
            Distribution::Uniform { low, high } => (low + high) / 2.0,
            Distribution::Triangular { low, mode, high } => (low + mode + high) / 3.0,
            Distribution::Beta { alpha, beta } => alpha / (alpha + beta),
        }
    }

    /// Draw one sample
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            Distribution::Normal { mean, std } => mean + std * standard_normal(rng),
            Distribution::LogNormal { mu, sigma } => (mu + sigma * standard_normal(rng)).exp(),
            Distribution::Uniform { low, high } => low + (high - low) * unit(rng),
            Distribution::Triangular { low, mode, high } => {
                let width = high - low;
                if width <= 0.0 {
                    return low;
                }
                // Inverse CDF
                let u = unit(rng);
                let split = (mode - low) / width;
                if u < split {
                    low + (u * width * (mode - low)).sqrt()
                } else {
                    high - ((1.0 - u) * width * (high - mode)).sqrt()
                }
            }
            Distribution::Beta { alpha, beta } => {
                let x = gamma(rng, alpha);
                let y = gamma(rng, beta);
                if x + y == 0.0 {
                    alpha / (alpha + beta)
                } else {
                    x / (x + y)
                }
            }
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Distribution::Normal { mean, std } => write!(f, "Normal({}, {})", mean, std),
            Distribution::LogNormal { mu, sigma } => write!(f, "LogNormal({}, {})", mu, sigma),
            Distribution::Uniform { low, high } => write!(f, "Uniform({}, {})", low, high),
            Distribution::Triangular { low, mode, high } => {
                write!(f, "Triangular({}, {}, {})", low, mode, high)
            }
            Distribution::Beta { alpha, beta } => write!(f, "Beta({}, {})", alpha, beta),
        }
    }
}

/// Uniform in [0, 1)
fn unit<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.gen_range(0.0..1.0)
}

/// N(0, 1) via Box-Muller
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1 = unit(rng);
    let u2 = unit(rng);
    // Avoid ln(0)
    let u1 = if u1 == 0.0 { f64::MIN_POSITIVE } else { u1 };
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Gamma(shape, 1) by Marsaglia and Tsang
fn gamma<R: Rng + ?Sized>(rng: &mut R, shape: f64) -> f64 {
    if shape < 1.0 {
        // Boost: Gamma(a) = Gamma(a + 1) * U^(1/a)
        let u = unit(rng).max(f64::MIN_POSITIVE);
        return gamma(rng, shape + 1.0) * u.powf(1.0 / shape);
    }
    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let x = standard_normal(rng);
        let v = 1.0 + c * x;
        if v <= 0.0 {
            continue;
        }
        let v = v * v * v;
        let u = unit(rng).max(f64::MIN_POSITIVE);
        if u.ln() < 0.5 * x * x + d - d * v + d * v.ln() {
            return d * v;
        }
    }
}
