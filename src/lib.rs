//! # Introduction
//!
//! incc compiles and runs C one fragment at a time. Declarations made by a
//! fragment stay visible to every later fragment; statements run once.
//! A fragment that ends in an expression without `;` prints its value.
//!
//! ## Execution pipeline
//!
//! ```text
//! Fragment → Wrapper → Front end → Substitution → Codegen → Loader → Output
//! ```
//!
//! 1. [`wrapper`]: splits a fragment into file-scope declarations and the
//!    statements of a synthesized entry function.
//! 2. [`parser`] and [`sema`]: the C front end, producing typed items.
//! 3. [`session`]: the incremental compile session holding the accumulated
//!    declarations plus checkpoint and rollback.
//! 4. [`deferred`]: names unknown at compile time become runtime
//!    evaluation requests instead of errors.
//! 5. [`codegen`] and [`bridge`]: lowering to a loadable module, linking
//!    globals against earlier modules and invoking entry points.
//! 6. [`vm`]: the bundled loader, executing modules over the virtual
//!    [`memory`] model.
//! 7. [`interpreter`]: the [`Interpreter`] orchestrating all of the above.
//!
//! ## Supported C subset
//!
//! Types: `int`, `long`, `char`, `void`, structs, pointers, fixed-size arrays.
//! Control flow: `if/else`, `while`, `for`, `do-while`, `break`, `continue`,
//! `return`.
//! Built-ins: `printf`, `sizeof`.

pub mod bridge;
pub mod codegen;
pub mod config;
pub mod constants;
pub mod deferred;
pub mod interpreter;
pub mod logging;
pub mod memory;
pub mod parser;
pub mod sema;
pub mod session;
pub mod vm;
pub mod wrapper;

pub use config::InterpreterConfig;
pub use interpreter::{Interpreter, InterpreterBuilder, InterpreterError, Outcome};
