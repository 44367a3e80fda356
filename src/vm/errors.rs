//! Runtime error types for the virtual machine
//!
//! [`RuntimeError`] covers every fault generated code can hit while it runs
//! (as opposed to compile, substitution or link errors). A fault aborts the
//! entry point that raised it; the session itself is unaffected.

use crate::memory::value::Address;
use crate::memory::MemoryError;
use crate::parser::ast::SourceLocation;
use std::fmt;

/// Runtime errors that can occur during execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Read of memory that was never written
    UninitializedRead {
        address: Address,
        location: SourceLocation,
    },

    /// Null pointer dereference
    NullDereference { location: SourceLocation },

    /// Access outside every mapped segment
    OutOfBounds {
        address: Address,
        size: usize,
        location: SourceLocation,
    },

    /// Integer overflow in arithmetic operation
    IntegerOverflow {
        operation: String,
        location: SourceLocation,
    },

    /// Division by zero or modulo by zero
    DivisionError {
        operation: String,
        location: SourceLocation,
    },

    /// Call of a function no loaded module defines
    UndefinedFunction {
        name: String,
        location: SourceLocation,
    },

    /// Function argument count mismatch
    ArgumentCountMismatch {
        function: String,
        expected: usize,
        got: usize,
        location: SourceLocation,
    },

    /// Too many nested calls
    CallDepthExceeded {
        limit: usize,
        location: SourceLocation,
    },

    /// A segment ran out of space
    OutOfMemory {
        segment: &'static str,
        requested: usize,
        limit: usize,
    },

    /// Value of the wrong kind for an operation
    TypeError {
        expected: String,
        got: String,
        location: SourceLocation,
    },

    /// Invalid printf format string
    InvalidPrintfFormat {
        message: String,
        location: SourceLocation,
    },

    /// Host function reported a failure
    HostFunction {
        name: String,
        message: String,
        location: SourceLocation,
    },

    /// Invalid string (unterminated, unmapped)
    InvalidString {
        message: String,
        location: SourceLocation,
    },

    /// No stack frame available
    NoStackFrame { location: SourceLocation },
}

impl RuntimeError {
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            RuntimeError::UninitializedRead { location, .. } => Some(location),
            RuntimeError::NullDereference { location } => Some(location),
            RuntimeError::OutOfBounds { location, .. } => Some(location),
            RuntimeError::IntegerOverflow { location, .. } => Some(location),
            RuntimeError::DivisionError { location, .. } => Some(location),
            RuntimeError::UndefinedFunction { location, .. } => Some(location),
            RuntimeError::ArgumentCountMismatch { location, .. } => Some(location),
            RuntimeError::CallDepthExceeded { location, .. } => Some(location),
            RuntimeError::TypeError { location, .. } => Some(location),
            RuntimeError::InvalidPrintfFormat { location, .. } => Some(location),
            RuntimeError::HostFunction { location, .. } => Some(location),
            RuntimeError::InvalidString { location, .. } => Some(location),
            RuntimeError::NoStackFrame { location } => Some(location),
            RuntimeError::OutOfMemory { .. } => None,
        }
    }

    /// Attach `location` to a fault raised by the memory layer
    pub fn from_memory(err: MemoryError, location: SourceLocation) -> Self {
        match err {
            MemoryError::NullDereference => RuntimeError::NullDereference { location },
            MemoryError::OutOfBounds { address, size } => RuntimeError::OutOfBounds {
                address,
                size,
                location,
            },
            MemoryError::Uninitialized { address } => {
                RuntimeError::UninitializedRead { address, location }
            }
            MemoryError::OutOfMemory {
                segment,
                requested,
                capacity,
            } => RuntimeError::OutOfMemory {
                segment,
                requested,
                limit: capacity,
            },
            MemoryError::Unrepresentable { value, ty } => RuntimeError::TypeError {
                expected: format!("{:?}", ty),
                got: format!("{:?}", value),
                location,
            },
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::UninitializedRead { address, location } => {
                write!(
                    f,
                    "Read from uninitialized memory at 0x{:x} at line {}",
                    address, location.line
                )
            }
            RuntimeError::NullDereference { location } => {
                write!(f, "Null pointer dereference at line {}", location.line)
            }
            RuntimeError::OutOfBounds {
                address,
                size,
                location,
            } => {
                write!(
                    f,
                    "Out-of-bounds access of {} byte{} at 0x{:x} at line {}",
                    size,
                    if *size == 1 { "" } else { "s" },
                    address,
                    location.line
                )
            }
            RuntimeError::IntegerOverflow {
                operation,
                location,
            } => {
                write!(
                    f,
                    "Integer overflow in operation: {} at line {}",
                    operation, location.line
                )
            }
            RuntimeError::DivisionError {
                operation,
                location,
            } => {
                write!(f, "{} at line {}", operation, location.line)
            }
            RuntimeError::UndefinedFunction { name, location } => {
                write!(f, "Undefined function '{}' at line {}", name, location.line)
            }
            RuntimeError::ArgumentCountMismatch {
                function,
                expected,
                got,
                location,
            } => {
                write!(
                    f,
                    "Function '{}' expects {} argument{}, got {} at line {}",
                    function,
                    expected,
                    if *expected == 1 { "" } else { "s" },
                    got,
                    location.line
                )
            }
            RuntimeError::CallDepthExceeded { limit, location } => {
                write!(
                    f,
                    "Call depth limit of {} exceeded at line {}",
                    limit, location.line
                )
            }
            RuntimeError::OutOfMemory {
                segment,
                requested,
                limit,
            } => {
                write!(
                    f,
                    "Out of {} memory: requested {} bytes, limit is {}",
                    segment, requested, limit
                )
            }
            RuntimeError::TypeError {
                expected,
                got,
                location,
            } => {
                write!(
                    f,
                    "Type error at line {}: expected {}, got {}",
                    location.line, expected, got
                )
            }
            RuntimeError::InvalidPrintfFormat { message, location } => {
                write!(
                    f,
                    "Invalid printf format at line {}: {}",
                    location.line, message
                )
            }
            RuntimeError::HostFunction {
                name,
                message,
                location,
            } => {
                write!(
                    f,
                    "Host function '{}' failed at line {}: {}",
                    name, location.line, message
                )
            }
            RuntimeError::InvalidString { message, location } => {
                write!(f, "Invalid string at line {}: {}", location.line, message)
            }
            RuntimeError::NoStackFrame { location } => {
                write!(f, "No stack frame available at line {}", location.line)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_errors_keep_location() {
        let location = SourceLocation::new(3, 7);
        let err = RuntimeError::from_memory(MemoryError::NullDereference, location);
        assert_eq!(err, RuntimeError::NullDereference { location });
        assert_eq!(err.location(), Some(&location));
        assert_eq!(err.to_string(), "Null pointer dereference at line 3");

        let err = RuntimeError::from_memory(
            MemoryError::OutOfMemory {
                segment: "stack",
                requested: 64,
                capacity: 32,
            },
            location,
        );
        assert_eq!(err.location(), None);
    }

    #[test]
    fn test_argument_count_message() {
        let err = RuntimeError::ArgumentCountMismatch {
            function: "add".into(),
            expected: 1,
            got: 2,
            location: SourceLocation::new(9, 1),
        };
        assert_eq!(
            err.to_string(),
            "Function 'add' expects 1 argument, got 2 at line 9"
        );
    }
}
