//! C source code parser
//!
//! This module transforms C source text into an Abstract Syntax Tree (AST):
//! - [`lexer`]: Tokenization (source text → tokens)
//! - [`parse`]: Parser state, helpers and entry points (tokens → AST)
//! - `declarations`, `statements`, `expressions`: grammar split by category
//! - [`ast`]: AST node definitions
//!
//! # Supported C Subset
//!
//! - Types: `int`, `long`, `char`, `void`, structs, pointers, arrays
//! - Declarations: globals with several declarators, aggregate initializers,
//!   function prototypes and definitions
//! - Statements: control flow (`if`, `while`, `do`, `for`), blocks, jumps
//! - Expressions: arithmetic, logical, bitwise, ternary, casts, `sizeof`,
//!   function calls, assignment as an expression
//! - `#include "file"` is recognised; every other directive is skipped
//! - No typedefs, unions, enums, `switch`, `goto` or function pointers
//!
//! # Parser Implementation
//!
//! Hand-written recursive descent parser with precedence climbing for binary operators.
//! No external parser generator dependencies.

pub mod ast;
mod declarations;
mod expressions;
pub mod lexer;
pub mod parse;
mod statements;

pub use parse::{ParseError, Parser};
