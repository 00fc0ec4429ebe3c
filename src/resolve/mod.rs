//! Name resolution
//!
//! PEL models have a single flat namespace: declarations, builtin functions
//! and the `step` variable. The checker fills the table while it resolves.

pub mod symbols;

pub use symbols::{Symbol, SymbolKind, SymbolTable};
