//! Incremental compile session
//!
//! [`IncrementalCompiler`] feeds one fragment's source text at a time to a
//! [`FrontEnd`] that parses and type-checks it against the persistent
//! [`Session`]. Around every parse it records two markers into the
//! declaration list, `first_decl` and `last_decl`, so that the caller can
//! enumerate what the fragment introduced or retract it after a failure.
//!
//! Name-resolution failures inside statement bodies are reported to a
//! [`LookupHook`], which may create a declaration on the spot. This is how
//! names that only exist at run time get into the typed tree.

use super::symbols::{DeclId, Declaration, SymbolTable};
use super::Session;
use crate::parser::ast::SourceLocation;
use crate::sema::tast::{Function, Item};
use crate::sema::{Diagnostic, Severity};
use std::fmt;
use tracing::debug;

/// Why a name lookup failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupFailure {
    /// Nothing with that name is declared
    NotFound,
    /// The name resolved, but not to something callable
    NotAFunction,
}

/// Where a failed lookup happened
#[derive(Debug, Clone)]
pub struct LookupSite<'a> {
    pub function: &'a str,
    pub fragment: usize,
    pub location: SourceLocation,
}

/// Extension point consulted when a called name cannot be resolved
pub trait LookupHook {
    /// Return the id of a declaration the hook added to `symbols` to satisfy
    /// the lookup, or `None` to let the failure stand.
    fn on_failed_lookup(
        &mut self,
        name: &str,
        failure: LookupFailure,
        site: &LookupSite<'_>,
        symbols: &mut SymbolTable,
    ) -> Option<DeclId>;
}

/// Hook that never resolves anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLookupHook;

impl LookupHook for NoLookupHook {
    fn on_failed_lookup(
        &mut self,
        _name: &str,
        _failure: LookupFailure,
        _site: &LookupSite<'_>,
        _symbols: &mut SymbolTable,
    ) -> Option<DeclId> {
        None
    }
}

/// What a front end produced for one fragment
#[derive(Debug, Default)]
pub struct FrontEndOutput {
    pub items: Vec<Item>,
    pub diagnostics: Vec<Diagnostic>,
}

impl FrontEndOutput {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
}

/// Parser plus semantic analysis for one fragment
pub trait FrontEnd {
    /// Parse and check `source`, registering declarations in `session`.
    fn parse(
        &mut self,
        source: &str,
        fragment: usize,
        session: &mut Session,
        hook: &mut dyn LookupHook,
    ) -> FrontEndOutput;
}

/// A successfully compiled fragment
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub fragment: usize,
    pub items: Vec<Item>,
    /// Declaration-list position before the fragment was parsed
    pub first_decl: usize,
    /// Declaration-list position after the fragment was parsed
    pub last_decl: usize,
    pub warnings: Vec<Diagnostic>,
}

impl CompiledUnit {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.items.iter().find_map(|item| match item {
            Item::Function(f) if f.name == name => Some(f),
            _ => None,
        })
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.items.iter_mut().find_map(|item| match item {
            Item::Function(f) if f.name == name => Some(f),
            _ => None,
        })
    }
}

/// A fragment that failed to compile
#[derive(Debug, Clone)]
pub struct CompileFailure {
    pub fragment: usize,
    pub diagnostics: Vec<Diagnostic>,
    pub first_decl: usize,
    pub last_decl: usize,
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errors: Vec<String> = self
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .map(|d| d.to_string())
            .collect();
        write!(f, "{}", errors.join("\n"))
    }
}

impl std::error::Error for CompileFailure {}

pub struct IncrementalCompiler {
    session: Session,
    front_end: Box<dyn FrontEnd>,
    first_decl: usize,
    last_decl: usize,
}

impl IncrementalCompiler {
    pub fn new(front_end: Box<dyn FrontEnd>) -> Self {
        IncrementalCompiler {
            session: Session::new(),
            front_end,
            first_decl: 0,
            last_decl: 0,
        }
    }

    /// Compile one fragment. On failure the declarations it added are still
    /// in the session; the caller decides whether to retract them.
    pub fn parse(
        &mut self,
        source: &str,
        hook: &mut dyn LookupHook,
    ) -> Result<CompiledUnit, CompileFailure> {
        let fragment = self.session.begin_fragment(source);
        self.first_decl = self.session.symbols().len();

        let output = self
            .front_end
            .parse(source, fragment, &mut self.session, hook);

        self.last_decl = self.session.symbols().len();
        debug!(
            fragment,
            first_decl = self.first_decl,
            last_decl = self.last_decl,
            diagnostics = output.diagnostics.len(),
            "parsed fragment"
        );

        if output.has_errors() {
            return Err(CompileFailure {
                fragment,
                diagnostics: output.diagnostics,
                first_decl: self.first_decl,
                last_decl: self.last_decl,
            });
        }

        Ok(CompiledUnit {
            fragment,
            items: output.items,
            first_decl: self.first_decl,
            last_decl: self.last_decl,
            warnings: output.diagnostics,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Declarations introduced by the most recent parse that are still present
    pub fn last_declarations(&self) -> &[Declaration] {
        self.session
            .symbols()
            .range(self.first_decl, self.last_decl)
    }

    /// Placeholder and host declarations not yet removed
    pub fn pending_placeholders(&self) -> Vec<DeclId> {
        self.session.symbols().transient_ids()
    }
}
