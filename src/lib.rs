//! PEL compiler and simulation engine
//!
//! PEL describes economic models as typed parameters, time-varying rates,
//! constraints and policies. Every quantity carries a unit of measure over
//! currency and time, checked at compile time. Parameters may be uncertain
//! and follow a distribution, and a model can be run deterministically or
//! as a Monte Carlo ensemble.
//!
//! # Architecture
//!
//! ```text
//! Source → Lexer → Parser → AST → Type Checker → HIR → IR → Simulation
//! ```
//!
//! # Example
//!
//! ```text
//! model saas {
//!     param price: Currency = 50 USD { source: "pricing page", method: "observed" }
//!     param churn: Fraction ~ Beta(alpha = 2, beta = 30) { source: "cohorts" }
//!     rate customers: Count = prev(customers, 1000) * (1 - churn)
//!     var revenue: Currency = customers * price
//!     constraint solvent: revenue > 0 USD
//!     policy discount when churn > 10% { price = 40 USD }
//! }
//! ```

pub mod ast;
pub mod builtins;
pub mod check;
pub mod common;
pub mod diagnostics;
pub mod distribution;
pub mod hir;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod resolve;
pub mod sim;
pub mod types;

pub use ast::Ast;
pub use builtins::FunctionTable;
pub use diagnostics::{CompileError, FrontendError, Reporter, SourceFile, TypeErrors};
pub use hir::TypedModel;
pub use ir::{IrError, IrModule};
pub use sim::{
    CancellationToken, EvaluationError, ResultsDocument, RunConfig, SimulationError, simulate,
    simulate_with_cancel,
};
pub use types::Type;

use miette::Diagnostic;
use thiserror::Error;

/// Compiler version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Failure anywhere between source text and results
#[derive(Debug, Error, Diagnostic)]
pub enum PelError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Frontend(#[from] FrontendError),

    #[error(transparent)]
    #[diagnostic(code(pel::ir))]
    Ir(#[from] IrError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Simulation(#[from] SimulationError),
}

/// Parse source code to AST
pub fn parse(source: &str) -> Result<Ast, CompileError> {
    parse_file(&SourceFile::anonymous(source))
}

pub fn parse_file(file: &SourceFile) -> Result<Ast, CompileError> {
    let tokens = lexer::lex_file(file)?;
    parser::parse(&tokens, file)
}

/// Type-check source code with the standard function table
pub fn typecheck(source: &str) -> Result<TypedModel, FrontendError> {
    typecheck_file(&SourceFile::anonymous(source), &FunctionTable::standard())
}

pub fn typecheck_file(
    file: &SourceFile,
    functions: &FunctionTable,
) -> Result<TypedModel, FrontendError> {
    let ast = parse_file(file)?;
    Ok(check::check(&ast, file, functions)?)
}

/// Compile source code to IR
pub fn compile(source: &str) -> Result<IrModule, PelError> {
    compile_file(&SourceFile::anonymous(source), &FunctionTable::standard())
}

pub fn compile_file(file: &SourceFile, functions: &FunctionTable) -> Result<IrModule, PelError> {
    let model = typecheck_file(file, functions)?;
    Ok(ir::lower(&model)?)
}

/// Compile and simulate source code in one call
pub fn run(source: &str, config: &RunConfig) -> Result<ResultsDocument, PelError> {
    let functions = FunctionTable::standard();
    let module = compile_file(&SourceFile::anonymous(source), &functions)?;
    Ok(simulate(&module, config, &functions)?)
}

/// Every diagnostic the front end reports for `source`, warnings included
pub fn diagnostics(source: &str) -> Vec<CompileError> {
    match typecheck(source) {
        Ok(model) => model.warnings,
        Err(e) => e.errors(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_compile_and_run() {
        let results = run(
            "param a: Currency = 10 USD { source: \"test\" }\nrate b: Currency = a * 2",
            &RunConfig::deterministic(3),
        )
        .unwrap();
        assert_eq!(results.series("b"), Some(&[20.0, 20.0, 20.0][..]));
    }
}
