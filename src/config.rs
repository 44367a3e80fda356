//! Interpreter configuration
//!
//! [`InterpreterConfig`] is a plain struct with defaults from
//! [`crate::constants`]. Nothing here is read from the environment.

use crate::constants::{
    ENTRY_PREFIX, GLOBAL_SEGMENT_BASE, GLOBAL_SEGMENT_CAPACITY, MAX_CALL_DEPTH, STACK_SEGMENT_BASE,
    STACK_SEGMENT_CAPACITY,
};
use crate::memory::value::Address;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterConfig {
    pub global_base: Address,
    pub global_capacity: usize,
    pub stack_base: Address,
    pub stack_capacity: usize,
    pub max_call_depth: usize,
    /// Prefix of synthesized entry-point names
    pub entry_prefix: String,
    /// Print the value of a fragment's unterminated final expression
    pub implicit_print: bool,
    /// Searched for `#include "..."` after the including file's directory
    pub include_dirs: Vec<PathBuf>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            global_base: GLOBAL_SEGMENT_BASE,
            global_capacity: GLOBAL_SEGMENT_CAPACITY,
            stack_base: STACK_SEGMENT_BASE,
            stack_capacity: STACK_SEGMENT_CAPACITY,
            max_call_depth: MAX_CALL_DEPTH,
            entry_prefix: ENTRY_PREFIX.to_string(),
            implicit_print: true,
            include_dirs: Vec::new(),
        }
    }
}

impl InterpreterConfig {
    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    pub fn with_implicit_print(mut self, enabled: bool) -> Self {
        self.implicit_print = enabled;
        self
    }
}
