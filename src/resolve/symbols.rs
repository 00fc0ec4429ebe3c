//! Symbol table implementation

use crate::builtins::FunctionTable;
use crate::common::Span;
use crate::types::Type;
use indexmap::IndexMap;
use serde::Serialize;

/// Kind of definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// `param` declaration
    Parameter,
    /// `rate` or `var` declaration
    Rate,
    /// Named constraint
    Constraint,
    /// Named policy
    Policy,
    /// Builtin function (including `prev`)
    BuiltinFunction,
    /// Builtin variable (`step`)
    BuiltinVariable,
}

impl SymbolKind {
    pub fn describe(self) -> &'static str {
        match self {
            SymbolKind::Parameter => "parameter",
            SymbolKind::Rate => "rate",
            SymbolKind::Constraint => "constraint",
            SymbolKind::Policy => "policy",
            SymbolKind::BuiltinFunction => "builtin function",
            SymbolKind::BuiltinVariable => "builtin variable",
        }
    }

    /// Parameters and rates carry a per-step value
    pub fn is_entity(self) -> bool {
        matches!(self, SymbolKind::Parameter | SymbolKind::Rate)
    }

    pub fn is_builtin(self) -> bool {
        matches!(
            self,
            SymbolKind::BuiltinFunction | SymbolKind::BuiltinVariable
        )
    }
}

/// Symbol information
#[derive(Debug, Clone, Serialize)]
pub struct Symbol {
    /// Name as written
    pub name: String,
    pub kind: SymbolKind,
    /// Declared type, for entities and builtin variables
    pub ty: Option<Type>,
    /// Declaration site; `None` for builtins
    pub span: Option<Span>,
    /// Index within its kind, in declaration order
    pub index: usize,
}

impl Symbol {
    /// Type as shown to editor consumers
    pub fn type_display(&self) -> String {
        match (self.kind, self.ty) {
            (_, Some(ty)) => ty.to_string(),
            (SymbolKind::Constraint, None) | (SymbolKind::Policy, None) => "Boolean".to_string(),
            (SymbolKind::BuiltinFunction, None) => "function".to_string(),
            _ => "-".to_string(),
        }
    }
}

/// Flat, model-wide symbol table. Declaration order is preserved.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolTable {
    symbols: IndexMap<String, Symbol>,
}

impl SymbolTable {
    /// Table holding only the builtins
    pub fn new(functions: &FunctionTable) -> Self {
        let mut table = Self {
            symbols: IndexMap::new(),
        };
        table.register_builtins(functions);
        table
    }

    fn register_builtins(&mut self, functions: &FunctionTable) {
        self.symbols.insert(
            "step".to_string(),
            Symbol {
                name: "step".to_string(),
                kind: SymbolKind::BuiltinVariable,
                ty: Some(Type::dimensionless()),
                span: None,
                index: 0,
            },
        );
        let names = std::iter::once("prev").chain(functions.names());
        for (index, name) in names.enumerate() {
            self.symbols.insert(
                name.to_string(),
                Symbol {
                    name: name.to_string(),
                    kind: SymbolKind::BuiltinFunction,
                    ty: None,
                    span: None,
                    index,
                },
            );
        }
    }

    /// Define a model symbol. On a name clash the existing symbol is
    /// returned and the table is unchanged.
    pub fn define(&mut self, symbol: Symbol) -> Result<(), Symbol> {
        if let Some(existing) = self.symbols.get(&symbol.name) {
            return Err(existing.clone());
        }
        self.symbols.insert(symbol.name.clone(), symbol);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    /// Symbols declared by the model, in declaration order
    pub fn declared(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values().filter(|s| !s.kind.is_builtin())
    }

    /// Nearest declared entity name, for "did you mean" hints
    pub fn suggest(&self, name: &str) -> Option<&str> {
        self.symbols
            .values()
            .filter(|s| s.kind.is_entity() || s.kind == SymbolKind::BuiltinVariable)
            .map(|s| (edit_distance(name, &s.name), s.name.as_str()))
            .filter(|(d, candidate)| *d <= 2 && *d < candidate.len())
            .min_by_key(|(d, _)| *d)
            .map(|(_, n)| n)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut prev = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            let next = (row[j + 1] + 1).min(row[j] + 1).min(prev + cost);
            prev = row[j + 1];
            row[j + 1] = next;
        }
    }
    row[b.len()]
}
