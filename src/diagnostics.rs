//! Diagnostic reporting with source locations
//!
//! Every compile-time problem is a [`CompileError`] carrying the offending
//! span and the named source, so miette can render it with context. The
//! type checker collects all of its errors into one [`TypeErrors`] report.

use crate::common::Span;
use miette::{Diagnostic, NamedSource, SourceSpan};
use std::sync::Arc;
use thiserror::Error;

/// Source file for error reporting
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub content: Arc<str>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: Arc::from(content.into()),
        }
    }

    /// Source with a placeholder name, for inline models and tests
    pub fn anonymous(content: impl Into<String>) -> Self {
        Self::new("<source>", content)
    }

    pub fn to_named_source(&self) -> NamedSource<String> {
        NamedSource::new(self.name.clone(), self.content.to_string())
    }
}

/// Convert our Span to miette's SourceSpan
impl From<Span> for SourceSpan {
    fn from(span: Span) -> Self {
        SourceSpan::new(span.start.into(), span.len())
    }
}

/// Broad classification of a compile diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Syntax,
    UnitMismatch,
    UndefinedSymbol,
    CircularDependency,
    InvalidSemanticContract,
    MissingProvenance,
}

/// Compiler diagnostic
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CompileError {
    // === Syntax Errors ===
    #[error("Invalid token `{text}`")]
    #[diagnostic(code(syntax::invalid_token))]
    InvalidToken {
        text: String,
        #[label("not recognized")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("Unexpected token: expected {expected}, found {found}")]
    #[diagnostic(code(syntax::unexpected_token))]
    UnexpectedToken {
        expected: String,
        found: String,
        #[label("unexpected token here")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("Unexpected end of file: expected {expected}")]
    #[diagnostic(code(syntax::unexpected_eof))]
    UnexpectedEof {
        expected: String,
        #[label("expected more tokens")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("Invalid literal `{text}`")]
    #[diagnostic(code(syntax::invalid_literal))]
    InvalidLiteral {
        text: String,
        #[label("cannot be read as a number")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    // === Type Errors ===
    #[error("Unit mismatch: expected `{expected}`, found `{found}`")]
    #[diagnostic(code(typecheck::unit_mismatch))]
    UnitMismatch {
        expected: String,
        found: String,
        #[label("expected `{expected}`")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
        #[help]
        help: Option<String>,
    },

    #[error("Undefined symbol `{name}`")]
    #[diagnostic(code(typecheck::undefined_symbol))]
    UndefinedSymbol {
        name: String,
        #[label("not declared in this model")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
        #[help]
        help: Option<String>,
    },

    #[error("Circular dependency: {cycle}")]
    #[diagnostic(
        code(typecheck::circular_dependency),
        help("break the cycle, or read the previous step with `prev(name, initial)`")
    )]
    CircularDependency {
        cycle: String,
        #[label("part of this cycle")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("{message}")]
    #[diagnostic(code(typecheck::invalid_contract))]
    InvalidSemanticContract {
        message: String,
        #[label("here")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
        #[help]
        help: Option<String>,
    },

    // === Warnings ===
    #[error("Parameter `{name}` has no provenance")]
    #[diagnostic(
        code(contract::missing_provenance),
        severity(Warning),
        help("add a `{{ source: \"...\", method: \"...\", confidence: 0.8 }}` block")
    )]
    MissingProvenance {
        name: String,
        #[label("declared without source, method or confidence")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },
}

impl CompileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::InvalidToken { .. }
            | CompileError::UnexpectedToken { .. }
            | CompileError::UnexpectedEof { .. }
            | CompileError::InvalidLiteral { .. } => ErrorKind::Syntax,
            CompileError::UnitMismatch { .. } => ErrorKind::UnitMismatch,
            CompileError::UndefinedSymbol { .. } => ErrorKind::UndefinedSymbol,
            CompileError::CircularDependency { .. } => ErrorKind::CircularDependency,
            CompileError::InvalidSemanticContract { .. } => ErrorKind::InvalidSemanticContract,
            CompileError::MissingProvenance { .. } => ErrorKind::MissingProvenance,
        }
    }

    /// Source location of the primary label
    pub fn span(&self) -> Span {
        let span = match self {
            CompileError::InvalidToken { span, .. }
            | CompileError::UnexpectedToken { span, .. }
            | CompileError::UnexpectedEof { span, .. }
            | CompileError::InvalidLiteral { span, .. }
            | CompileError::UnitMismatch { span, .. }
            | CompileError::UndefinedSymbol { span, .. }
            | CompileError::CircularDependency { span, .. }
            | CompileError::InvalidSemanticContract { span, .. }
            | CompileError::MissingProvenance { span, .. } => span,
        };
        Span::new(span.offset(), span.offset() + span.len())
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, CompileError::MissingProvenance { .. })
    }
}

/// All type errors found in one checking pass
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("type checking failed with {} error(s)", .errors.len())]
#[diagnostic(code(typecheck::failed))]
pub struct TypeErrors {
    #[related]
    pub errors: Vec<CompileError>,
}

impl TypeErrors {
    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.errors.iter().map(CompileError::kind).collect()
    }

    pub fn contains(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind() == kind)
    }
}

/// Failure of the compiler front end: either a syntax error or the collected
/// type errors
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum FrontendError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(CompileError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Type(TypeErrors),
}

impl FrontendError {
    /// Every individual diagnostic, in report order
    pub fn errors(&self) -> Vec<CompileError> {
        match self {
            FrontendError::Syntax(e) => vec![e.clone()],
            FrontendError::Type(errs) => errs.errors.clone(),
        }
    }

    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.errors().iter().map(CompileError::kind).collect()
    }
}

impl From<CompileError> for FrontendError {
    fn from(e: CompileError) -> Self {
        FrontendError::Syntax(e)
    }
}

impl From<TypeErrors> for FrontendError {
    fn from(e: TypeErrors) -> Self {
        FrontendError::Type(e)
    }
}

/// Error reporter that collects diagnostics
pub struct Reporter {
    source: SourceFile,
    named: NamedSource<String>,
    errors: Vec<CompileError>,
    warnings: Vec<CompileError>,
}

impl Reporter {
    pub fn new(source: SourceFile) -> Self {
        let named = source.to_named_source();
        Self {
            source,
            named,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn error(&mut self, error: CompileError) {
        self.errors.push(error);
    }

    pub fn warning(&mut self, warning: CompileError) {
        self.warnings.push(warning);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Create NamedSource for this file
    pub fn named_source(&self) -> NamedSource<String> {
        self.named.clone()
    }

    /// Get the source file
    pub fn source(&self) -> &SourceFile {
        &self.source
    }

    // Constructors for the checker's error kinds

    pub fn unit_mismatch(
        &mut self,
        expected: impl Into<String>,
        found: impl Into<String>,
        span: Span,
        help: Option<String>,
    ) {
        let src = self.named_source();
        self.error(CompileError::UnitMismatch {
            expected: expected.into(),
            found: found.into(),
            span: span.into(),
            src,
            help,
        });
    }

    pub fn undefined(&mut self, name: impl Into<String>, span: Span, help: Option<String>) {
        let src = self.named_source();
        self.error(CompileError::UndefinedSymbol {
            name: name.into(),
            span: span.into(),
            src,
            help,
        });
    }

    pub fn cycle(&mut self, cycle: impl Into<String>, span: Span) {
        let src = self.named_source();
        self.error(CompileError::CircularDependency {
            cycle: cycle.into(),
            span: span.into(),
            src,
        });
    }

    pub fn contract(&mut self, message: impl Into<String>, span: Span, help: Option<String>) {
        let src = self.named_source();
        self.error(CompileError::InvalidSemanticContract {
            message: message.into(),
            span: span.into(),
            src,
            help,
        });
    }

    /// Print all diagnostics
    pub fn emit_all(&self) {
        for warning in &self.warnings {
            eprintln!("{:?}", miette::Report::new(warning.clone()));
        }
        for error in &self.errors {
            eprintln!("{:?}", miette::Report::new(error.clone()));
        }
    }

    /// Errors (if any) as a single report, warnings returned alongside
    pub fn finish(self) -> Result<Vec<CompileError>, TypeErrors> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(TypeErrors {
                errors: self.errors,
            })
        }
    }

    /// Get errors by reference
    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    pub fn warnings(&self) -> &[CompileError] {
        &self.warnings
    }
}
