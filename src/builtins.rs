//! Builtin functions
//!
//! The [`FunctionTable`] is handed to the checker (for arity and unit rules)
//! and to the evaluator (for the numeric implementation). `prev` is not in
//! the table: it reads simulation state and is handled by the checker itself.

use crate::types::Unit;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Builtin function identifier, stored in IR call nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Builtin {
    Min,
    Max,
    Abs,
    Clamp,
    Floor,
    Ceil,
    Round,
    Exp,
    Ln,
    Pow,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Abs => "abs",
            Builtin::Clamp => "clamp",
            Builtin::Floor => "floor",
            Builtin::Ceil => "ceil",
            Builtin::Round => "round",
            Builtin::Exp => "exp",
            Builtin::Ln => "ln",
            Builtin::Pow => "pow",
        }
    }
}

/// How a builtin's result unit follows from its arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitRule {
    /// All arguments share one unit, which the result keeps
    Uniform,
    /// Arguments and result are dimensionless
    Dimensionless,
    /// `pow(base, n)`: base unit raised to a constant integer `n`;
    /// any real exponent for a dimensionless base
    Power,
}

#[derive(Debug, Clone, Copy)]
pub struct FunctionSig {
    pub builtin: Builtin,
    pub arity: usize,
    pub rule: UnitRule,
    pub doc: &'static str,
}

/// Registry of builtin functions, keyed by source name
#[derive(Debug, Clone)]
pub struct FunctionTable {
    functions: IndexMap<&'static str, FunctionSig>,
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl FunctionTable {
    /// Empty table
    pub fn empty() -> Self {
        Self {
            functions: IndexMap::new(),
        }
    }

    /// The standard builtin set
    pub fn standard() -> Self {
        use Builtin::*;
        use UnitRule::*;

        let mut table = Self::empty();
        let sigs = [
            (Min, 2, Uniform, "smaller of two values"),
            (Max, 2, Uniform, "larger of two values"),
            (Abs, 1, Uniform, "absolute value"),
            (Clamp, 3, Uniform, "clamp(x, low, high)"),
            (Floor, 1, Uniform, "round down"),
            (Ceil, 1, Uniform, "round up"),
            (Round, 1, Uniform, "round to nearest"),
            (Exp, 1, Dimensionless, "e raised to x"),
            (Ln, 1, Dimensionless, "natural logarithm"),
            (Pow, 2, Power, "pow(base, exponent)"),
        ];
        for (builtin, arity, rule, doc) in sigs {
            table.register(FunctionSig {
                builtin,
                arity,
                rule,
                doc,
            });
        }
        table
    }

    pub fn register(&mut self, sig: FunctionSig) {
        self.functions.insert(sig.builtin.name(), sig);
    }

    pub fn get(&self, name: &str) -> Option<&FunctionSig> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionSig> {
        self.functions.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.functions.keys().copied()
    }

    /// Result unit for `pow` with a known constant exponent. `None` for a
    /// non-integer exponent on a unit-carrying base, or when the resulting
    /// exponents do not fit the unit representation.
    pub fn power_unit(base: Unit, exponent: f64) -> Option<Unit> {
        if base.is_dimensionless() {
            return Some(Unit::dimensionless());
        }
        if exponent.fract() != 0.0 || exponent < f64::from(i8::MIN) || exponent > f64::from(i8::MAX) {
            return None;
        }
        base.checked_powi(exponent as i8)
    }

    /// Numeric implementation. Arguments are already arity-checked.
    pub fn eval(&self, builtin: Builtin, args: &[f64]) -> f64 {
        let arg = |i: usize| args.get(i).copied().unwrap_or(f64::NAN);
        match builtin {
            Builtin::Min => arg(0).min(arg(1)),
            Builtin::Max => arg(0).max(arg(1)),
            Builtin::Abs => arg(0).abs(),
            Builtin::Clamp => {
                let (x, lo, hi) = (arg(0), arg(1), arg(2));
                if lo > hi { f64::NAN } else { x.max(lo).min(hi) }
            }
            Builtin::Floor => arg(0).floor(),
            Builtin::Ceil => arg(0).ceil(),
            Builtin::Round => arg(0).round(),
            Builtin::Exp => arg(0).exp(),
            Builtin::Ln => arg(0).ln(),
            Builtin::Pow => arg(0).powf(arg(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table() {
        let table = FunctionTable::standard();
        assert_eq!(table.get("clamp").map(|s| s.arity), Some(3));
        assert!(!table.contains("prev"));
        assert_eq!(table.eval(Builtin::Clamp, &[5.0, 0.0, 2.0]), 2.0);
        assert!(table.eval(Builtin::Ln, &[-1.0]).is_nan());
    }

    #[test]
    fn test_power_unit() {
        let sq = FunctionTable::power_unit(Unit::currency(), 2.0);
        assert_eq!(sq, Unit::currency().checked_powi(2));
        assert_eq!(FunctionTable::power_unit(Unit::currency(), 0.5), None);
        assert_eq!(FunctionTable::power_unit(Unit::currency(), 300.0), None);
        let squared = Unit::currency().checked_powi(2).unwrap();
        assert_eq!(FunctionTable::power_unit(squared, 100.0), None);
        assert_eq!(
            FunctionTable::power_unit(Unit::dimensionless(), 0.5),
            Some(Unit::dimensionless())
        );
    }
}
