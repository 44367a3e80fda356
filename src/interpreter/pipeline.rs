//! The fragment pipeline
//!
//! One fragment goes through wrapping, compilation, deferred-symbol
//! substitution, code generation, loading and execution. A failure before
//! execution rolls the session back to the checkpoint taken before
//! compilation; a runtime trap keeps the fragment's declarations.
//!
//! The pipeline is also the [`EvalHost`] of the code it runs: a runtime
//! evaluation request compiles its expression into a throwaway entry point,
//! runs it on the suspended loader and retracts it again.

use super::errors::InterpreterError;
use super::printer::{PrintFlags, PrintRequest, ValuePrinter};
use super::{DeferredFailure, Outcome};
use crate::bridge::{CodeGenerator, EvalHost, ExecutionBridge, Loader, ModuleId};
use crate::config::InterpreterConfig;
use crate::constants::CALL_PREFIX;
use crate::deferred::{
    substitute, DeferredLookup, DeferredRequest, DynamicScope, InterpreterId, LookupMode,
};
use crate::memory::value::Value;
use crate::parser::ast::Type;
use crate::session::{Checkpoint, DeclContext, DeclKind, FrontEnd, IncrementalCompiler, Session};
use crate::sema::tast::{ExprType, Function, Stmt};
use crate::wrapper::{wrap, WrappedUnit};
use tracing::{debug, warn};

/// Stage the pipeline is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Wrapping,
    Compiling,
    Substituting,
    Generating,
    Executing,
}

/// A fragment that compiled and loaded
struct Built {
    module: ModuleId,
    checkpoint: Checkpoint,
    /// Type of the final expression, when it was turned into the return value
    tail: Option<ExprType>,
    deferred: usize,
}

pub(crate) struct Pipeline {
    config: InterpreterConfig,
    id: InterpreterId,
    compiler: IncrementalCompiler,
    bridge: ExecutionBridge,
    printer: Box<dyn ValuePrinter>,
    scope: Option<Box<dyn DynamicScope>>,
    phase: Phase,
    next_entry: usize,
    reentry_depth: usize,
    deferred_failures: Vec<DeferredFailure>,
}

impl Pipeline {
    pub(crate) fn new(
        config: InterpreterConfig,
        front_end: Box<dyn FrontEnd>,
        generator: Box<dyn CodeGenerator>,
        printer: Box<dyn ValuePrinter>,
        scope: Option<Box<dyn DynamicScope>>,
    ) -> Self {
        Pipeline {
            config,
            id: InterpreterId::next(),
            compiler: IncrementalCompiler::new(front_end),
            bridge: ExecutionBridge::new(generator),
            printer,
            scope,
            phase: Phase::Idle,
            next_entry: 0,
            reentry_depth: 0,
            deferred_failures: Vec::new(),
        }
    }

    pub(crate) fn id(&self) -> InterpreterId {
        self.id
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn session(&self) -> &Session {
        self.compiler.session()
    }

    pub(crate) fn modules(&self) -> &[ModuleId] {
        self.bridge.modules()
    }

    pub(crate) fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = ?self.phase, to = ?phase, depth = self.reentry_depth, "pipeline phase");
        self.phase = phase;
    }

    fn entry_name(&mut self, prefix: &str) -> String {
        let name = format!("{}{}", prefix, self.next_entry);
        self.next_entry += 1;
        name
    }

    /// Run one fragment of user input.
    pub(crate) fn evaluate(
        &mut self,
        text: &str,
        loader: &mut dyn Loader,
    ) -> Result<Outcome, InterpreterError> {
        self.deferred_failures.clear();
        let result = self.evaluate_fragment(text, loader);
        self.enter(Phase::Idle);
        match result {
            Ok(mut outcome) => {
                outcome.deferred_failures = std::mem::take(&mut self.deferred_failures);
                Ok(outcome)
            }
            Err(err) => {
                warn!(error = %err, "fragment failed");
                Err(err)
            }
        }
    }

    fn evaluate_fragment(
        &mut self,
        text: &str,
        loader: &mut dyn Loader,
    ) -> Result<Outcome, InterpreterError> {
        self.enter(Phase::Wrapping);
        let prefix = self.config.entry_prefix.clone();
        let entry = self.entry_name(&prefix);
        let wrapped = wrap(text, &entry)?;
        if wrapped.is_empty() {
            debug!("empty fragment");
            return Ok(Outcome::default());
        }

        let print = self.config.implicit_print && wrapped.print_candidate.is_some();
        let built = self
            .build(&wrapped.source(), &entry, None, print, loader)
            .map_err(|err| relocate(err, &wrapped))?;

        let declarations = self
            .compiler
            .session()
            .symbols()
            .iter()
            .skip(built.checkpoint.decl_count())
            .filter(|decl| decl.name != entry)
            .map(|decl| decl.name.clone())
            .collect();
        self.compiler
            .session_mut()
            .append_global_text(&wrapped.global_text);

        let mut outcome = Outcome {
            declarations,
            module: Some(built.module),
            deferred_calls: built.deferred,
            ..Outcome::default()
        };
        if !wrapped.has_entry() {
            return Ok(outcome);
        }

        self.enter(Phase::Executing);
        let value = ExecutionBridge::invoke(&entry, loader, self)?;

        if let Some(tail) = built.tail {
            // A deferred tail that failed to evaluate has no value to show
            let failed = tail.known().is_none() && !self.deferred_failures.is_empty();
            if !failed && !matches!(value, Value::Void | Value::Uninitialized) {
                let ty = tail.known().cloned();
                let flags = match &ty {
                    Some(ty) => PrintFlags::for_type(ty),
                    None => PrintFlags::for_value(&value),
                };
                let mut rendered = String::new();
                self.printer.print_value(
                    &mut rendered,
                    &PrintRequest {
                        value: &value,
                        ty: ty.as_ref(),
                        flags,
                        expr: wrapped.print_candidate.as_deref().unwrap_or_default(),
                        structs: self.compiler.session().symbols(),
                    },
                );
                loader.write_output(&rendered);
                outcome.printed = true;
                outcome.flags = Some(flags);
                outcome.rendered = Some(rendered);
                outcome.value_type = ty;
            }
        }
        if !matches!(value, Value::Void) {
            outcome.value = Some(value);
        }
        Ok(outcome)
    }

    /// Compile `source`, generate its module and load it. On failure the
    /// session is rolled back to where it was before `source`.
    ///
    /// `context` selects runtime lookup: unknown names go to the dynamic
    /// scope instead of becoming placeholders.
    fn build(
        &mut self,
        source: &str,
        entry: &str,
        context: Option<DeclContext>,
        return_tail: bool,
        loader: &mut dyn Loader,
    ) -> Result<Built, InterpreterError> {
        let checkpoint = self.compiler.session().checkpoint();
        let result = self.build_at(source, entry, context, return_tail, checkpoint, loader);
        if result.is_err() {
            self.compiler.session_mut().rollback(checkpoint);
        }
        result
    }

    fn build_at(
        &mut self,
        source: &str,
        entry: &str,
        context: Option<DeclContext>,
        return_tail: bool,
        checkpoint: Checkpoint,
        loader: &mut dyn Loader,
    ) -> Result<Built, InterpreterError> {
        self.enter(Phase::Compiling);
        let (parsed, host_functions) = match context {
            None => {
                let mut hook = DeferredLookup::new(LookupMode::Compile);
                (self.compiler.parse(source, &mut hook), Vec::new())
            }
            Some(context) => {
                let scope: Option<&mut dyn DynamicScope> = match self.scope.as_mut() {
                    Some(scope) => Some(scope.as_mut()),
                    None => None,
                };
                let mut hook = DeferredLookup::new(LookupMode::Runtime { scope, context });
                let parsed = self.compiler.parse(source, &mut hook);
                (parsed, hook.take_host_functions())
            }
        };
        let mut unit = parsed?;

        self.enter(Phase::Substituting);
        let report = substitute(&mut unit, self.id, self.compiler.session_mut())?;

        let tail = if return_tail {
            unit.function_mut(entry).and_then(return_final_expression)
        } else {
            None
        };

        self.enter(Phase::Generating);
        let mut module = self.bridge.codegen(&unit, self.compiler.session())?;
        self.bridge.splice_globals(&mut module, &*loader);
        let id = self.bridge.load(module, loader)?;
        for function in host_functions {
            loader.bind_host_function(function);
        }

        Ok(Built {
            module: id,
            checkpoint,
            tail,
            deferred: report.replaced,
        })
    }

    /// Compile and run one runtime evaluation request
    fn evaluate_request(
        &mut self,
        loader: &mut dyn Loader,
        request: &DeferredRequest,
    ) -> Result<Value, String> {
        if request.interpreter != self.id {
            return Err(format!(
                "request from interpreter {} reached interpreter {}",
                request.interpreter, self.id
            ));
        }
        let context = self
            .compiler
            .session()
            .context(request.context)
            .cloned()
            .ok_or_else(|| "unknown declaration context".to_string())?;
        let text = request.resolved_text().map_err(|err| err.to_string())?;
        debug!(function = %context.function, %text, "runtime evaluation");

        let prefix = self.config.entry_prefix.clone();
        let entry = self.entry_name(&prefix);
        let source = format!("void {}(void) {{\n{};\n}}\n", entry, text);
        let built = self
            .build(&source, &entry, Some(context), true, loader)
            .map_err(|err| err.to_string())?;

        self.enter(Phase::Executing);
        let result = ExecutionBridge::invoke(&entry, loader, self);
        self.compiler.session_mut().rollback(built.checkpoint);
        result.map_err(|err| err.to_string())
    }

    /// Call the previously defined function `name` with the argument list
    /// `args`, written as C source.
    pub(crate) fn call_function(
        &mut self,
        name: &str,
        args: &str,
        loader: &mut dyn Loader,
    ) -> Result<Outcome, InterpreterError> {
        let return_type = match self.session().symbols().lookup(name).map(|decl| &decl.kind) {
            Some(DeclKind::Function { signature, .. }) => signature.return_type.clone(),
            _ => return Err(InterpreterError::EntryPointNotFound(name.to_string())),
        };
        let wrapper = self.entry_name(CALL_PREFIX);
        let call = format!("{}({})", name, args);
        let definition = if return_type.is_void() {
            format!("void {}(void) {{ {}; }}", wrapper, call)
        } else {
            format!(
                "{} {{ return {}; }}",
                return_type.declare(&format!("{}(void)", wrapper)),
                call
            )
        };

        let mut outcome = self.evaluate(&definition, loader)?;
        self.enter(Phase::Executing);
        let result = ExecutionBridge::invoke(&wrapper, loader, self);
        self.enter(Phase::Idle);
        let value = result?;
        outcome.deferred_failures = std::mem::take(&mut self.deferred_failures);
        outcome.declarations.retain(|decl| *decl != wrapper);
        outcome.value = Some(value);
        outcome.value_type = Some(return_type).filter(|ty: &Type| !ty.is_void());
        Ok(outcome)
    }
}

impl EvalHost for Pipeline {
    fn runtime_evaluate(
        &mut self,
        loader: &mut dyn Loader,
        request: DeferredRequest,
    ) -> Result<Value, String> {
        let phase = self.phase;
        self.reentry_depth += 1;
        let result = self.evaluate_request(loader, &request);
        self.reentry_depth -= 1;
        self.phase = phase;

        result.map_err(|message| {
            warn!(expression = %request.text, %message, "runtime evaluation failed");
            self.deferred_failures.push(DeferredFailure {
                expression: request.text.clone(),
                message: message.clone(),
            });
            message
        })
    }
}

/// Report compile diagnostics at the fragment lines they came from
fn relocate(err: InterpreterError, wrapped: &WrappedUnit) -> InterpreterError {
    match err {
        InterpreterError::Compile(mut failure) => {
            for diagnostic in &mut failure.diagnostics {
                if let Some(line) = wrapped.fragment_line(diagnostic.location.line) {
                    diagnostic.location.line = line;
                }
            }
            InterpreterError::Compile(failure)
        }
        other => other,
    }
}

/// Turn a trailing expression statement of `function` into its return
/// value. Returns the expression's type.
fn return_final_expression(function: &mut Function) -> Option<ExprType> {
    let Some(Stmt::Expr(expr)) = function.body.last() else {
        return None;
    };
    let ty = expr.ty.clone();
    let location = expr.location;
    if let Some(Stmt::Expr(expr)) = function.body.pop() {
        function.body.push(Stmt::Return {
            value: Some(expr),
            location,
        });
    }
    function.return_type = ty.clone();
    Some(ty)
}
