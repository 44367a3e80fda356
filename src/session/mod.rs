//! Persistent compilation state shared by every fragment
//!
//! A [`Session`] lives as long as the interpreter and owns:
//!
//! - the [`SymbolTable`] of everything declared so far
//! - an append-only buffer of all submitted fragment text
//! - the accumulated global declaration text of successful fragments
//! - the set of files already pulled in by `#include`
//! - declaration contexts referenced by runtime-evaluation requests
//!
//! [`Checkpoint`] and [`Session::rollback`] let a failed fragment be retracted
//! so the session looks exactly as it did before the fragment was submitted.
//! [`compile::IncrementalCompiler`] drives the front end against the session.

pub mod compile;
pub mod symbols;

use crate::parser::ast::Span;
use std::path::{Path, PathBuf};

pub use compile::{
    CompileFailure, CompiledUnit, FrontEnd, FrontEndOutput, IncrementalCompiler, LookupFailure,
    LookupHook, LookupSite, NoLookupHook,
};
pub use symbols::{DeclId, DeclKind, Declaration, Signature, SymbolTable};

/// Handle to a [`DeclContext`] registered with the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextToken(u32);

/// Where a runtime-evaluated expression appeared: the enclosing statement
/// function and the fragment it was compiled from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclContext {
    pub function: String,
    pub fragment: usize,
}

/// Session state captured before a fragment is compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    decls: usize,
    global_text: usize,
    included: usize,
    contexts: usize,
}

impl Checkpoint {
    /// Number of declarations that existed when the checkpoint was taken
    pub fn decl_count(&self) -> usize {
        self.decls
    }
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    symbols: SymbolTable,
    source: String,
    fragments: Vec<Span>,
    global_text: String,
    included: Vec<PathBuf>,
    contexts: Vec<DeclContext>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    /// Record the text of a new fragment and return its number
    pub fn begin_fragment(&mut self, text: &str) -> usize {
        let start = self.source.len();
        self.source.push_str(text);
        if !text.ends_with('\n') {
            self.source.push('\n');
        }
        self.fragments.push(Span::new(start, start + text.len()));
        self.fragments.len() - 1
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn fragment_source(&self, fragment: usize) -> Option<&str> {
        self.fragments.get(fragment).map(|span| span.slice(&self.source))
    }

    /// Every fragment submitted so far, in order
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Global declarations of every successfully executed fragment
    pub fn global_text(&self) -> &str {
        &self.global_text
    }

    pub fn append_global_text(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.global_text.push_str(text);
        if !text.ends_with('\n') {
            self.global_text.push('\n');
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            decls: self.symbols.len(),
            global_text: self.global_text.len(),
            included: self.included.len(),
            contexts: self.contexts.len(),
        }
    }

    /// Retract declarations, global text, includes and contexts added since
    /// `checkpoint`. The fragment source buffer is never rolled back.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.symbols.truncate(checkpoint.decls);
        self.global_text.truncate(checkpoint.global_text);
        self.included.truncate(checkpoint.included);
        self.contexts.truncate(checkpoint.contexts);
    }

    pub fn is_included(&self, path: &Path) -> bool {
        self.included.iter().any(|p| p == path)
    }

    pub fn record_include(&mut self, path: PathBuf) {
        if !self.is_included(&path) {
            self.included.push(path);
        }
    }

    pub fn included_files(&self) -> &[PathBuf] {
        &self.included
    }

    pub fn intern_context(&mut self, context: DeclContext) -> ContextToken {
        if let Some(index) = self.contexts.iter().position(|c| *c == context) {
            return ContextToken(index as u32);
        }
        self.contexts.push(context);
        ContextToken((self.contexts.len() - 1) as u32)
    }

    pub fn context(&self, token: ContextToken) -> Option<&DeclContext> {
        self.contexts.get(token.0 as usize)
    }
}
