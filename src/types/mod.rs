//! Type system for PEL
//!
//! - Core types (numeric quantities, booleans, the recovery error type)
//! - Units of measure with dimensional analysis

pub mod core;
pub mod units;

pub use self::core::*;
pub use units::{BaseDimension, Unit, UnitSymbol, is_unit_symbol, lookup_symbol};
