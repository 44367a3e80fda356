//! Deferred-symbol substitution
//!
//! Names that exist only on the run-time side of the session (results of
//! earlier fragments the front end cannot see, host-provided functions) are
//! handled in two steps:
//!
//! 1. While a statement body is checked, [`DeferredLookup`] answers failed
//!    call lookups with a placeholder declaration, which makes the enclosing
//!    expression *artificially dependent*.
//! 2. After the fragment compiled, [`substitute`] replaces every topmost
//!    artificially dependent expression with a runtime evaluation request:
//!    the expression's text with captured variables replaced by `@N`
//!    markers, the captured variables themselves, this interpreter's id and
//!    a token for the declaration context.
//!
//! Placeholders are removed from the session once substitution is done,
//! whether it succeeded or not.

mod hook;
mod render;
mod substitute;

pub use hook::{DeferredLookup, DynamicScope, LookupMode};
pub use substitute::{substitute, Rewritten, SubstitutionReport};

use crate::memory::value::Address;
use crate::parser::ast::{SourceLocation, Type};
use crate::session::ContextToken;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_INTERPRETER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one interpreter instance, embedded in every deferred call it
/// generates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterpreterId(pub u64);

impl InterpreterId {
    pub fn next() -> Self {
        InterpreterId(NEXT_INTERPRETER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InterpreterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A runtime evaluation request issued by generated code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredRequest {
    pub interpreter: InterpreterId,
    /// Expression text with `@N` standing for `addresses[N]`
    pub text: String,
    pub addresses: Vec<Address>,
    pub context: ContextToken,
}

impl DeferredRequest {
    /// Substitute each `@N` marker with the address it stands for, as a
    /// fixed-width hexadecimal literal.
    pub fn resolved_text(&self) -> Result<String, SubstitutionError> {
        let mut out = String::with_capacity(self.text.len() + self.addresses.len() * 18);
        let mut chars = self.text.char_indices().peekable();
        let mut in_literal: Option<char> = None;

        while let Some((_, ch)) = chars.next() {
            if let Some(quote) = in_literal {
                out.push(ch);
                if ch == '\\' {
                    if let Some((_, escaped)) = chars.next() {
                        out.push(escaped);
                    }
                } else if ch == quote {
                    in_literal = None;
                }
                continue;
            }
            match ch {
                '"' | '\'' => {
                    in_literal = Some(ch);
                    out.push(ch);
                }
                '@' => {
                    let mut digits = String::new();
                    while let Some(&(_, d)) = chars.peek() {
                        if !d.is_ascii_digit() {
                            break;
                        }
                        digits.push(d);
                        chars.next();
                    }
                    let address = digits
                        .parse::<usize>()
                        .ok()
                        .and_then(|index| self.addresses.get(index))
                        .ok_or_else(|| SubstitutionError::MissingCapture {
                            marker: format!("@{}", digits),
                        })?;
                    out.push_str(&format!("{:#018x}", address));
                }
                _ => out.push(ch),
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubstitutionError {
    #[error("cannot capture '{name}' of type '{ty}' at line {}: only scalars, structs and one-dimensional arrays can be passed to a runtime evaluation", .location.line)]
    UnsupportedCapture {
        name: String,
        ty: Type,
        location: SourceLocation,
    },

    #[error("runtime evaluation nested inside another at line {}", .location.line)]
    Nested { location: SourceLocation },

    #[error("runtime evaluation text refers to {marker}, which has no captured address")]
    MissingCapture { marker: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str, addresses: Vec<Address>) -> DeferredRequest {
        DeferredRequest {
            interpreter: InterpreterId(1),
            text: text.to_string(),
            addresses,
            context: crate::session::Session::new().intern_context(crate::session::DeclContext {
                function: "f".into(),
                fragment: 0,
            }),
        }
    }

    #[test]
    fn test_interpreter_ids_are_unique() {
        assert_ne!(InterpreterId::next(), InterpreterId::next());
    }

    #[test]
    fn test_resolved_text_substitutes_addresses() {
        let req = request("magic((*(int *)@0), @1)", vec![0x10000, 0x4000_0008]);
        assert_eq!(
            req.resolved_text().unwrap(),
            "magic((*(int *)0x0000000000010000), 0x0000000040000008)"
        );
    }

    #[test]
    fn test_resolved_text_skips_literals() {
        let req = request("log(\"a@0\", '@', @0)", vec![0x20]);
        assert_eq!(
            req.resolved_text().unwrap(),
            "log(\"a@0\", '@', 0x0000000000000020)"
        );
    }

    #[test]
    fn test_missing_capture() {
        let req = request("@3", vec![]);
        assert!(matches!(
            req.resolved_text(),
            Err(SubstitutionError::MissingCapture { .. })
        ));
    }
}
