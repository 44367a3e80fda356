//! Persistent symbol table
//!
//! Every declaration a fragment introduces is appended here and stays
//! visible to later fragments. The table is append-only apart from two
//! operations:
//!
//! - [`SymbolTable::truncate`]: retract everything a failed fragment added
//! - [`SymbolTable::remove_transient`]: drop placeholder and host-function
//!   declarations once a fragment has been substituted
//!
//! Struct tags live in their own namespace, as in C.

use crate::memory::StructDefs;
use crate::parser::ast::{SourceLocation, StructDef, Type};
use rustc_hash::FxHashMap;
use std::fmt;

/// Stable identity of a declaration, unique for the session's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(u32);

/// Function type: return type, parameter types, and whether `...` follows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub return_type: Type,
    pub params: Vec<Type>,
    pub variadic: bool,
}

impl Signature {
    pub fn new(return_type: Type, params: Vec<Type>) -> Self {
        Signature {
            return_type,
            params,
            variadic: false,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.return_type)?;
        if self.params.is_empty() && !self.variadic {
            write!(f, "void")?;
        }
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        if self.variadic {
            write!(f, ", ...")?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclKind {
    Variable { ty: Type },
    /// `defined` is false for a prototype
    Function { signature: Signature, defined: bool },
    Struct(StructDef),
    /// Stand-in for a name that is resolved at run time
    Placeholder,
    /// Host-provided function made visible for a single fragment
    HostFunction { signature: Signature },
}

impl DeclKind {
    /// Placeholders and host functions never outlive their fragment
    pub fn is_transient(&self) -> bool {
        matches!(self, DeclKind::Placeholder | DeclKind::HostFunction { .. })
    }

    pub fn describe(&self) -> &'static str {
        match self {
            DeclKind::Variable { .. } => "variable",
            DeclKind::Function { .. } => "function",
            DeclKind::Struct(_) => "struct",
            DeclKind::Placeholder => "runtime-resolved name",
            DeclKind::HostFunction { .. } => "host function",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub id: DeclId,
    pub name: String,
    pub kind: DeclKind,
    /// Fragment that introduced the declaration
    pub fragment: usize,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    decls: Vec<Declaration>,
    ordinary: FxHashMap<String, usize>,
    tags: FxHashMap<String, usize>,
    next_id: u32,
}

/// Two tables are equal when they hold the same declarations in the same
/// order; the id counter is not part of the observable state.
impl PartialEq for SymbolTable {
    fn eq(&self, other: &Self) -> bool {
        self.decls == other.decls
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a declaration. A later declaration of the same name shadows
    /// the earlier one for lookups.
    pub fn declare(
        &mut self,
        name: &str,
        kind: DeclKind,
        fragment: usize,
        location: SourceLocation,
    ) -> DeclId {
        let id = DeclId(self.next_id);
        self.next_id += 1;
        let index = self.decls.len();
        match kind {
            DeclKind::Struct(_) => self.tags.insert(name.to_string(), index),
            _ => self.ordinary.insert(name.to_string(), index),
        };
        self.decls.push(Declaration {
            id,
            name: name.to_string(),
            kind,
            fragment,
            location,
        });
        id
    }

    /// Look up a variable, function or placeholder by name
    pub fn lookup(&self, name: &str) -> Option<&Declaration> {
        self.ordinary.get(name).map(|&index| &self.decls[index])
    }

    pub fn lookup_struct(&self, tag: &str) -> Option<&StructDef> {
        self.tags
            .get(tag)
            .and_then(|&index| match &self.decls[index].kind {
                DeclKind::Struct(def) => Some(def),
                _ => None,
            })
    }

    pub fn get(&self, id: DeclId) -> Option<&Declaration> {
        self.decls.iter().rev().find(|decl| decl.id == id)
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Declaration> {
        self.decls.iter()
    }

    /// Declarations at positions `from..to`, clamped to the current length
    pub fn range(&self, from: usize, to: usize) -> &[Declaration] {
        let to = to.min(self.decls.len());
        let from = from.min(to);
        &self.decls[from..to]
    }

    /// Retract every declaration at position `len` or later
    pub fn truncate(&mut self, len: usize) {
        if len < self.decls.len() {
            self.decls.truncate(len);
            self.rebuild_index();
        }
    }

    pub fn transient_ids(&self) -> Vec<DeclId> {
        self.decls
            .iter()
            .filter(|decl| decl.kind.is_transient())
            .map(|decl| decl.id)
            .collect()
    }

    /// Remove placeholder and host-function declarations, returning how
    /// many were removed
    pub fn remove_transient(&mut self) -> usize {
        let before = self.decls.len();
        self.decls.retain(|decl| !decl.kind.is_transient());
        let removed = before - self.decls.len();
        if removed > 0 {
            self.rebuild_index();
        }
        removed
    }

    fn rebuild_index(&mut self) {
        self.ordinary.clear();
        self.tags.clear();
        for (index, decl) in self.decls.iter().enumerate() {
            match decl.kind {
                DeclKind::Struct(_) => self.tags.insert(decl.name.clone(), index),
                _ => self.ordinary.insert(decl.name.clone(), index),
            };
        }
    }
}

impl StructDefs for SymbolTable {
    fn struct_def(&self, name: &str) -> Option<&StructDef> {
        self.lookup_struct(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(ty: Type) -> DeclKind {
        DeclKind::Variable { ty }
    }

    #[test]
    fn test_shadowing_and_truncate() {
        let mut table = SymbolTable::new();
        let loc = SourceLocation::default();
        table.declare("f", var(Type::int()), 0, loc);
        let marker = table.len();
        table.declare(
            "f",
            DeclKind::Function {
                signature: Signature::new(Type::int(), vec![]),
                defined: true,
            },
            1,
            loc,
        );
        assert!(matches!(table.lookup("f").unwrap().kind, DeclKind::Function { .. }));

        table.truncate(marker);
        assert!(matches!(table.lookup("f").unwrap().kind, DeclKind::Variable { .. }));
    }

    #[test]
    fn test_struct_namespace_is_separate() {
        let mut table = SymbolTable::new();
        let loc = SourceLocation::default();
        table.declare(
            "P",
            DeclKind::Struct(StructDef {
                name: "P".into(),
                fields: vec![],
            }),
            0,
            loc,
        );
        table.declare("P", var(Type::int()), 0, loc);
        assert!(table.lookup_struct("P").is_some());
        assert!(matches!(table.lookup("P").unwrap().kind, DeclKind::Variable { .. }));
    }

    #[test]
    fn test_remove_transient() {
        let mut table = SymbolTable::new();
        let loc = SourceLocation::default();
        table.declare("x", var(Type::int()), 0, loc);
        let snapshot = table.clone();
        table.declare("magic", DeclKind::Placeholder, 1, loc);
        assert_eq!(table.transient_ids().len(), 1);
        assert_eq!(table.remove_transient(), 1);
        assert!(table.lookup("magic").is_none());
        assert_eq!(table, snapshot);
    }
}
