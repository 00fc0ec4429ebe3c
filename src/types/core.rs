//! Core type definitions

use super::units::Unit;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of a PEL expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// Numeric quantity with a unit
    Number(Unit),
    Bool,
    /// Error type (for error recovery)
    Error,
}

impl Type {
    pub fn dimensionless() -> Self {
        Type::Number(Unit::dimensionless())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Type::Bool)
    }

    pub fn unit(&self) -> Option<Unit> {
        match self {
            Type::Number(u) => Some(*u),
            _ => None,
        }
    }

    /// Check if two types are compatible for addition, comparison, or
    /// assignment. The error type is compatible with everything.
    pub fn compatible(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Error, _) | (_, Type::Error) => true,
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Number(u) => write!(f, "{}", u),
            Type::Bool => f.write_str("Boolean"),
            Type::Error => f.write_str("{error}"),
        }
    }
}

/// Named types available in annotations
pub fn named_type(name: &str) -> Option<Type> {
    match name {
        "Currency" => Some(Type::Number(Unit::currency())),
        "Duration" => Some(Type::Number(Unit::time())),
        "Rate" => Some(Type::Number(Unit::rate())),
        // Declared dimensionless scalars
        "Fraction" | "Count" => Some(Type::dimensionless()),
        "Boolean" => Some(Type::Bool),
        _ => None,
    }
}

pub const NAMED_TYPES: &[&str] = &["Currency", "Duration", "Rate", "Fraction", "Count", "Boolean"];
