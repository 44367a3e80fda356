//! Errors reported by the interpreter to its caller
//!
//! Each variant corresponds to the pipeline stage that failed. Only
//! [`InterpreterError::Runtime`] leaves the fragment's declarations in the
//! session; every other failure retracts them.

use crate::bridge::{InvokeError, LinkError};
use crate::codegen::CodegenError;
use crate::deferred::SubstitutionError;
use crate::session::CompileFailure;
use crate::vm::RuntimeError;
use crate::wrapper::WrapError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum InterpreterError {
    /// The fragment could not be classified
    #[error("input rejected: {0}")]
    InputRejected(#[from] WrapError),

    #[error("compilation failed: {0}")]
    Compile(#[from] CompileFailure),

    #[error(transparent)]
    Substitution(#[from] SubstitutionError),

    #[error("code generation failed: {0}")]
    Codegen(#[from] CodegenError),

    #[error("link failed: {0}")]
    Link(#[from] LinkError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("entry point '{0}' not found")]
    EntryPointNotFound(String),
}

impl InterpreterError {
    /// Whether the fragment's declarations were kept in the session
    pub fn keeps_declarations(&self) -> bool {
        matches!(self, InterpreterError::Runtime(_))
    }
}

impl From<InvokeError> for InterpreterError {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::EntryPointNotFound(name) => InterpreterError::EntryPointNotFound(name),
            InvokeError::Runtime(err) => InterpreterError::Runtime(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::SourceLocation;

    #[test]
    fn test_only_runtime_errors_keep_declarations() {
        let trap = InterpreterError::from(InvokeError::Runtime(RuntimeError::NullDereference {
            location: SourceLocation::new(3, 1),
        }));
        assert!(trap.keeps_declarations());
        assert_eq!(
            trap.to_string(),
            "runtime error: Null pointer dereference at line 3"
        );

        let missing = InterpreterError::from(InvokeError::EntryPointNotFound("go".into()));
        assert!(!missing.keeps_declarations());
        assert_eq!(missing.to_string(), "entry point 'go' not found");
    }
}
