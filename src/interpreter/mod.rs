//! Incremental C interpreter
//!
//! This module provides the user-facing orchestration:
//! - [`Interpreter`]: owns the session, the execution bridge and the loader
//! - [`errors`]: the error taxonomy reported to callers
//! - [`printer`]: implicit printing of a fragment's final expression
//!
//! # Execution Model
//!
//! Each call to [`Interpreter::evaluate_line`] runs one fragment through the
//! pipeline: wrap, compile, substitute deferred symbols, generate, load and
//! execute. Declarations persist across fragments; statements run once.
//! Names the compiler cannot resolve are looked up again when the statement
//! runs, through the interpreter's [`DynamicScope`].

pub mod errors;
mod pipeline;
pub mod printer;

pub use errors::InterpreterError;
pub use pipeline::Phase;
pub use printer::{DefaultPrinter, PrintFlags, PrintRequest, ValuePrinter};

use crate::bridge::{CodeGenerator, Loader, ModuleId};
use crate::codegen::IrGenerator;
use crate::config::InterpreterConfig;
use crate::deferred::{DynamicScope, InterpreterId};
use crate::memory::value::{Address, Value};
use crate::memory::MemType;
use crate::parser::ast::Type;
use crate::sema::CFrontEnd;
use crate::session::{DeclKind, FrontEnd, Session};
use crate::vm::Machine;
use pipeline::Pipeline;
use std::path::Path;
use tracing::info;

/// A runtime evaluation that failed while a fragment ran. The expression
/// evaluated to zero (a null pointer where one was expected) and execution
/// continued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredFailure {
    /// Expression text with `@N` address markers
    pub expression: String,
    pub message: String,
}

/// Result of one successfully processed fragment
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    /// Value of the final expression or called function
    pub value: Option<Value>,
    /// Static type of the value, when known at compile time
    pub value_type: Option<Type>,
    /// Flags handed to the printer
    pub flags: Option<PrintFlags>,
    /// Text the printer produced
    pub rendered: Option<String>,
    pub printed: bool,
    /// Names declared by the fragment, in declaration order
    pub declarations: Vec<String>,
    pub module: Option<ModuleId>,
    /// Expressions deferred to run time
    pub deferred_calls: usize,
    pub deferred_failures: Vec<DeferredFailure>,
}

/// An incremental C interpreter.
///
/// ```
/// use incc::{Interpreter, InterpreterConfig};
///
/// let mut interp = Interpreter::new(InterpreterConfig::default());
/// interp.evaluate_line("int x = 5;").unwrap();
/// interp.evaluate_line("x = x + 1;").unwrap();
/// interp.evaluate_line("x").unwrap();
/// assert_eq!(interp.take_output(), "6\n");
/// ```
pub struct Interpreter {
    pipeline: Pipeline,
    loader: Box<dyn Loader>,
}

impl Interpreter {
    pub fn new(config: InterpreterConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: InterpreterConfig) -> InterpreterBuilder {
        InterpreterBuilder {
            config,
            front_end: None,
            generator: None,
            loader: None,
            printer: None,
            scope: None,
        }
    }

    pub fn id(&self) -> InterpreterId {
        self.pipeline.id()
    }

    pub fn phase(&self) -> Phase {
        self.pipeline.phase()
    }

    pub fn config(&self) -> &InterpreterConfig {
        self.pipeline.config()
    }

    /// Process one fragment of input: any mix of declarations, definitions
    /// and statements. A final expression without `;` is printed.
    pub fn evaluate_line(&mut self, text: &str) -> Result<Outcome, InterpreterError> {
        self.pipeline.evaluate(text, self.loader.as_mut())
    }

    /// Include the file at `path` once into the session
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<Outcome, InterpreterError> {
        self.load_file_and_call(path, None)
    }

    /// Include the file at `path`, then run `call` (for example `main()`)
    /// if given. Including a file a second time only runs `call`.
    pub fn load_file_and_call(
        &mut self,
        path: impl AsRef<Path>,
        call: Option<&str>,
    ) -> Result<Outcome, InterpreterError> {
        let path = path.as_ref();
        info!(path = %path.display(), call, "loading file");
        let mut fragment = format!("#include \"{}\"\n", path.display());
        if let Some(call) = call {
            fragment.push_str(call.trim_end_matches(';'));
            fragment.push_str(";\n");
        }
        self.evaluate_line(&fragment)
    }

    /// Call the previously defined function `name` with `args`, a C argument
    /// list such as `"1, 2"`, and return its value.
    pub fn execute_named_function(
        &mut self,
        name: &str,
        args: &str,
    ) -> Result<Outcome, InterpreterError> {
        self.pipeline.call_function(name, args, self.loader.as_mut())
    }

    pub fn session(&self) -> &Session {
        self.pipeline.session()
    }

    pub fn loader(&self) -> &dyn Loader {
        self.loader.as_ref()
    }

    /// Output written since the last [`Interpreter::take_output`]
    pub fn output(&self) -> &str {
        self.loader.output()
    }

    pub fn take_output(&mut self) -> String {
        self.loader.take_output()
    }

    /// Address of the global `name`, as seen by every module
    pub fn global_address(&self, name: &str) -> Option<Address> {
        self.pipeline
            .modules()
            .iter()
            .find_map(|&module| self.loader.global_address(module, name))
    }

    /// Current value of the global variable `name`
    pub fn read_global(&self, name: &str) -> Option<Value> {
        let symbols = self.session().symbols();
        let ty = match &symbols.lookup(name)?.kind {
            DeclKind::Variable { ty } => ty,
            _ => return None,
        };
        let mem = MemType::of(ty, symbols)?;
        let address = self.global_address(name)?;
        self.loader.read(address, mem).ok()
    }
}

/// Builder for an [`Interpreter`] with replaced collaborators
pub struct InterpreterBuilder {
    config: InterpreterConfig,
    front_end: Option<Box<dyn FrontEnd>>,
    generator: Option<Box<dyn CodeGenerator>>,
    loader: Option<Box<dyn Loader>>,
    printer: Option<Box<dyn ValuePrinter>>,
    scope: Option<Box<dyn DynamicScope>>,
}

impl InterpreterBuilder {
    pub fn front_end(mut self, front_end: Box<dyn FrontEnd>) -> Self {
        self.front_end = Some(front_end);
        self
    }

    pub fn code_generator(mut self, generator: Box<dyn CodeGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn loader(mut self, loader: Box<dyn Loader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn printer(mut self, printer: Box<dyn ValuePrinter>) -> Self {
        self.printer = Some(printer);
        self
    }

    /// Names resolved at run time that no fragment declared
    pub fn dynamic_scope(mut self, scope: Box<dyn DynamicScope>) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn build(self) -> Interpreter {
        let config = self.config;
        let front_end = self.front_end.unwrap_or_else(|| {
            Box::new(
                CFrontEnd::new(config.entry_prefix.clone())
                    .with_include_dirs(config.include_dirs.clone()),
            )
        });
        let generator = self
            .generator
            .unwrap_or_else(|| Box::new(IrGenerator::new()));
        let loader = self
            .loader
            .unwrap_or_else(|| Box::new(Machine::new(&config)));
        let printer = self.printer.unwrap_or_else(|| Box::new(DefaultPrinter));
        let pipeline = Pipeline::new(config, front_end, generator, printer, self.scope);
        Interpreter { pipeline, loader }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_building_leaves_the_global_subscriber_alone() {
        let mut interp = Interpreter::new(InterpreterConfig::default());
        interp.evaluate_line("int a = 2;\na * 3").unwrap();
        assert_eq!(interp.take_output(), "6\n");
        assert!(!tracing::dispatcher::has_been_set());
    }
}
