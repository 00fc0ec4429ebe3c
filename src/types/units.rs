//! Units of measure with compile-time dimensional analysis
//!
//! A unit is a vector of integer exponents over the base dimensions. Values
//! are always stored in the canonical unit of each dimension (one currency
//! unit, one month), so literal suffixes carry a scale factor into that
//! canonical form.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Base dimensions of the economic unit algebra
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseDimension {
    Currency,
    Time,
}

impl BaseDimension {
    pub const COUNT: usize = 2;

    pub fn all() -> &'static [BaseDimension] {
        &[BaseDimension::Currency, BaseDimension::Time]
    }

    pub fn index(self) -> usize {
        match self {
            BaseDimension::Currency => 0,
            BaseDimension::Time => 1,
        }
    }

    /// Name used when formatting units in diagnostics
    pub fn display_name(self) -> &'static str {
        match self {
            BaseDimension::Currency => "Currency",
            BaseDimension::Time => "Duration",
        }
    }
}

/// Exponent vector over [`BaseDimension`]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Unit {
    exponents: [i8; BaseDimension::COUNT],
}

impl Unit {
    pub const fn dimensionless() -> Self {
        Self {
            exponents: [0; BaseDimension::COUNT],
        }
    }

    pub fn base(dim: BaseDimension) -> Self {
        let mut exponents = [0; BaseDimension::COUNT];
        exponents[dim.index()] = 1;
        Self { exponents }
    }

    pub fn currency() -> Self {
        Self::base(BaseDimension::Currency)
    }

    pub fn time() -> Self {
        Self::base(BaseDimension::Time)
    }

    /// Fraction per unit of time, e.g. `5%/mo`
    pub fn rate() -> Self {
        let mut exponents = [0; BaseDimension::COUNT];
        exponents[BaseDimension::Time.index()] = -1;
        Self { exponents }
    }

    pub fn exponent(&self, dim: BaseDimension) -> i8 {
        self.exponents[dim.index()]
    }

    pub fn is_dimensionless(&self) -> bool {
        self.exponents.iter().all(|&e| e == 0)
    }

    /// Product of two units: exponents add. `None` when an exponent leaves
    /// the `i8` range.
    ///
    /// A dimensionless operand leaves the other operand's unit unchanged.
    pub fn checked_mul(self, other: Unit) -> Option<Unit> {
        if self.is_dimensionless() {
            return Some(other);
        }
        if other.is_dimensionless() {
            return Some(self);
        }
        self.zip_exponents(other, i8::checked_add)
    }

    /// Quotient of two units: exponents subtract
    pub fn checked_div(self, other: Unit) -> Option<Unit> {
        self.checked_mul(other.checked_recip()?)
    }

    pub fn checked_recip(self) -> Option<Unit> {
        self.map_exponents(i8::checked_neg)
    }

    pub fn checked_powi(self, n: i8) -> Option<Unit> {
        self.map_exponents(|e| e.checked_mul(n))
    }

    fn map_exponents(self, f: impl Fn(i8) -> Option<i8>) -> Option<Unit> {
        let mut exponents = self.exponents;
        for e in exponents.iter_mut() {
            *e = f(*e)?;
        }
        Some(Unit { exponents })
    }

    fn zip_exponents(self, other: Unit, f: impl Fn(i8, i8) -> Option<i8>) -> Option<Unit> {
        let mut exponents = self.exponents;
        for (e, o) in exponents.iter_mut().zip(other.exponents) {
            *e = f(*e, o)?;
        }
        Some(Unit { exponents })
    }

    /// Format the unit for diagnostics
    pub fn format(&self) -> String {
        if self.is_dimensionless() {
            return "Dimensionless".to_string();
        }
        if *self == Unit::rate() {
            return "Rate".to_string();
        }

        let part = |positive: bool| -> Vec<String> {
            BaseDimension::all()
                .iter()
                .filter_map(|&dim| {
                    let e = self.exponent(dim);
                    if e == 0 || (e > 0) != positive {
                        return None;
                    }
                    match e.unsigned_abs() {
                        1 => Some(dim.display_name().to_string()),
                        n => Some(format!("{}^{}", dim.display_name(), n)),
                    }
                })
                .collect()
        };

        let num = part(true);
        let den = part(false);
        let num = if num.is_empty() {
            "1".to_string()
        } else {
            num.join("*")
        };
        if den.is_empty() {
            num
        } else {
            format!("{}/{}", num, den.join("*"))
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unit({})", self.format())
    }
}

/// A unit symbol usable as a literal suffix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitSymbol {
    pub unit: Unit,
    /// Multiplier into the canonical unit (months for time)
    pub scale: f64,
}

const DAYS_PER_MONTH: f64 = 365.0 / 12.0;

/// Look up a literal suffix such as `USD` or `mo`
pub fn lookup_symbol(symbol: &str) -> Option<UnitSymbol> {
    let currency = |scale| UnitSymbol {
        unit: Unit::currency(),
        scale,
    };
    let time = |scale| UnitSymbol {
        unit: Unit::time(),
        scale,
    };
    match symbol {
        "USD" | "EUR" | "GBP" | "JPY" | "CHF" | "CAD" | "AUD" => Some(currency(1.0)),
        "d" | "day" | "days" => Some(time(1.0 / DAYS_PER_MONTH)),
        "wk" | "week" | "weeks" => Some(time(7.0 / DAYS_PER_MONTH)),
        "mo" | "month" | "months" => Some(time(1.0)),
        "qtr" | "quarter" | "quarters" => Some(time(3.0)),
        "yr" | "year" | "years" => Some(time(12.0)),
        _ => None,
    }
}

pub fn is_unit_symbol(symbol: &str) -> bool {
    lookup_symbol(symbol).is_some()
}
