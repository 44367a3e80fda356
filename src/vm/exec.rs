//! Statement execution and calls
//!
//! `break`, `continue` and `return` travel up through [`Flow`] so each loop
//! can react without inspecting shared state.

use super::eval::{convert, truth};
use super::{Ctx, Machine, RuntimeError};
use crate::codegen::ir::{Function, Stmt};
use crate::memory::value::{Address, Value};
use crate::memory::MemType;
use crate::parser::ast::SourceLocation;
use std::rc::Rc;
use tracing::trace;

/// How a statement ended
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

impl Machine {
    /// Call the published function `name` with already evaluated arguments.
    /// The callee's frame is popped whether or not it faulted.
    pub(crate) fn call_function(
        &mut self,
        name: &str,
        args: Vec<Value>,
        location: SourceLocation,
        ctx: &mut Ctx<'_>,
    ) -> Result<Value, RuntimeError> {
        let (module, function) = self
            .functions
            .get(name)
            .map(|(module, function)| (*module, Rc::clone(function)))
            .ok_or_else(|| RuntimeError::UndefinedFunction {
                name: name.to_string(),
                location,
            })?;

        if args.len() != function.params.len() {
            return Err(RuntimeError::ArgumentCountMismatch {
                function: name.to_string(),
                expected: function.params.len(),
                got: args.len(),
                location,
            });
        }
        if self.memory.stack().depth() >= self.max_call_depth {
            return Err(RuntimeError::CallDepthExceeded {
                limit: self.max_call_depth,
                location,
            });
        }

        let locals = self
            .memory
            .stack_mut()
            .push_frame(name, module.0, &function.local_sizes())
            .map_err(|err| RuntimeError::from_memory(err, location))?
            .locals
            .clone();
        trace!(function = name, depth = self.memory.stack().depth(), "call");

        let caller = ctx.module;
        ctx.module = module;
        let result = self.run_function(&function, &locals, args, ctx);
        ctx.module = caller;
        self.memory.stack_mut().pop_frame();
        result
    }

    fn run_function(
        &mut self,
        function: &Function,
        locals: &[Address],
        args: Vec<Value>,
        ctx: &mut Ctx<'_>,
    ) -> Result<Value, RuntimeError> {
        for ((address, mem), arg) in locals.iter().zip(&function.params).zip(args) {
            let value = convert(arg, *mem, function.location)?;
            self.write_at(*address, *mem, &value, function.location)?;
        }

        let value = match self.exec_block(&function.body, ctx)? {
            Flow::Return(value) => value,
            _ => Value::Void,
        };
        match function.returns {
            Some(mem) if !matches!(value, Value::Void) => convert(value, mem, function.location),
            _ => Ok(value),
        }
    }

    pub(crate) fn exec_block(&mut self, stmts: &[Stmt], ctx: &mut Ctx<'_>) -> Result<Flow, RuntimeError> {
        for stmt in stmts {
            let flow = self.exec_stmt(stmt, ctx)?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, ctx: &mut Ctx<'_>) -> Result<Flow, RuntimeError> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, ctx)?;
                Ok(Flow::Normal)
            }
            Stmt::InitLocal {
                local,
                size,
                stores,
            } => {
                let location = stores
                    .first()
                    .map(|store| store.value.location)
                    .unwrap_or_default();
                let address = self
                    .memory
                    .stack()
                    .current_frame()
                    .and_then(|frame| frame.local(*local))
                    .ok_or(RuntimeError::NoStackFrame { location })?;
                self.write_at(
                    address,
                    MemType::Bytes(*size),
                    &Value::Bytes(vec![0; *size]),
                    location,
                )?;
                self.apply_stores(address, stores, ctx)?;
                Ok(Flow::Normal)
            }
            Stmt::Block(body) => self.exec_block(body, ctx),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let value = self.eval(cond, ctx)?;
                if truth(&value, cond.location)? {
                    self.exec_block(then_branch, ctx)
                } else {
                    self.exec_block(else_branch, ctx)
                }
            }
            Stmt::While { cond, body } => {
                loop {
                    let value = self.eval(cond, ctx)?;
                    if !truth(&value, cond.location)? {
                        break;
                    }
                    match self.exec_block(body, ctx)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile { body, cond } => {
                loop {
                    match self.exec_block(body, ctx)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    let value = self.eval(cond, ctx)?;
                    if !truth(&value, cond.location)? {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                if let Flow::Return(value) = self.exec_block(init, ctx)? {
                    return Ok(Flow::Return(value));
                }
                loop {
                    if let Some(cond) = cond {
                        let value = self.eval(cond, ctx)?;
                        if !truth(&value, cond.location)? {
                            break;
                        }
                    }
                    match self.exec_block(body, ctx)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(step) = step {
                        self.eval(step, ctx)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return(None) => Ok(Flow::Return(Value::Void)),
            Stmt::Return(Some(expr)) => Ok(Flow::Return(self.eval(expr, ctx)?)),
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bridge::{EvalHost, Loader};
    use crate::codegen::ir::{
        ArithOp, CmpOp, Expr, ExprKind, Function, LocalSlot, Module, Place, Stmt,
    };
    use crate::config::InterpreterConfig;
    use crate::deferred::DeferredRequest;
    use crate::memory::value::Value;
    use crate::memory::MemType;
    use crate::parser::ast::SourceLocation;
    use crate::vm::{Machine, RuntimeError};
    use std::rc::Rc;

    struct NoHost;

    impl EvalHost for NoHost {
        fn runtime_evaluate(&mut self, _: &mut dyn Loader, _: DeferredRequest) -> Result<Value, String> {
            Err("no host".into())
        }
    }

    fn at(line: usize) -> SourceLocation {
        SourceLocation::new(line, 1)
    }

    fn int(n: i32) -> Expr {
        Expr::new(ExprKind::Const(Value::Int(n)), at(1))
    }

    fn local(index: usize) -> Expr {
        Expr::new(ExprKind::Load(Place::Local(index), MemType::Int), at(1))
    }

    fn store(index: usize, value: Expr) -> Expr {
        Expr::new(
            ExprKind::Store {
                place: Place::Local(index),
                mem: MemType::Int,
                value: Box::new(value),
            },
            at(1),
        )
    }

    fn add(lhs: Expr, rhs: Expr) -> Expr {
        Expr::new(
            ExprKind::Arith {
                op: ArithOp::Add,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                width: MemType::Int,
            },
            at(1),
        )
    }

    fn function(name: &str, params: usize, locals: usize, body: Vec<Stmt>) -> Rc<Function> {
        Rc::new(Function {
            name: name.to_string(),
            params: vec![MemType::Int; params],
            locals: (0..locals)
                .map(|i| LocalSlot {
                    name: format!("v{}", i),
                    size: 4,
                })
                .collect(),
            returns: Some(MemType::Int),
            body,
            location: at(1),
        })
    }

    fn run(machine: &mut Machine, functions: Vec<Rc<Function>>, entry: &str) -> Result<Value, RuntimeError> {
        let mut module = Module::new(format!("m{}", machine.module_count()), 0);
        module.functions = functions;
        machine.load(module).unwrap();
        let entry = machine.find_entry_point(entry).unwrap();
        machine.invoke(&entry, &mut NoHost)
    }

    #[test]
    fn test_for_loop_with_break() {
        // int s = 0; for (int i = 0; ; i = i + 1) { if (i == 5) break; s = s + i; } return s;
        let body = vec![
            Stmt::Expr(store(0, int(0))),
            Stmt::For {
                init: vec![Stmt::Expr(store(1, int(0)))],
                cond: None,
                step: Some(store(1, add(local(1), int(1)))),
                body: vec![
                    Stmt::If {
                        cond: Expr::new(
                            ExprKind::Compare {
                                op: CmpOp::Eq,
                                lhs: Box::new(local(1)),
                                rhs: Box::new(int(5)),
                            },
                            at(2),
                        ),
                        then_branch: vec![Stmt::Break],
                        else_branch: Vec::new(),
                    },
                    Stmt::Expr(store(0, add(local(0), local(1)))),
                ],
            },
            Stmt::Return(Some(local(0))),
        ];
        let mut machine = Machine::new(&InterpreterConfig::default());
        assert_eq!(
            run(&mut machine, vec![function("sum", 0, 2, body)], "sum"),
            Ok(Value::Int(10))
        );
    }

    #[test]
    fn test_recursion_hits_depth_limit() {
        let call = Expr::new(
            ExprKind::Call {
                name: "forever".into(),
                args: Vec::new(),
            },
            at(3),
        );
        let config = InterpreterConfig {
            max_call_depth: 8,
            ..InterpreterConfig::default()
        };
        let mut machine = Machine::new(&config);
        let result = run(
            &mut machine,
            vec![function("forever", 0, 0, vec![Stmt::Return(Some(call))])],
            "forever",
        );
        assert_eq!(
            result,
            Err(RuntimeError::CallDepthExceeded {
                limit: 8,
                location: at(3)
            })
        );
        assert!(machine.memory().stack().is_empty());
    }

    #[test]
    fn test_arguments_and_uninitialized_locals() {
        let twice = function("twice", 1, 1, vec![Stmt::Return(Some(add(local(0), local(0))))]);
        let call = Expr::new(
            ExprKind::Call {
                name: "twice".into(),
                args: vec![int(21)],
            },
            at(1),
        );
        let main = function("go", 0, 0, vec![Stmt::Return(Some(call))]);
        let mut machine = Machine::new(&InterpreterConfig::default());
        assert_eq!(run(&mut machine, vec![twice, main], "go"), Ok(Value::Int(42)));

        let bad = function("bad", 0, 1, vec![Stmt::Return(Some(local(0)))]);
        assert!(matches!(
            run(&mut machine, vec![bad], "bad"),
            Err(RuntimeError::UninitializedRead { .. })
        ));
    }

    #[test]
    fn test_undefined_function() {
        let call = Expr::new(
            ExprKind::Call {
                name: "nowhere".into(),
                args: Vec::new(),
            },
            at(7),
        );
        let mut machine = Machine::new(&InterpreterConfig::default());
        let result = run(
            &mut machine,
            vec![function("go", 0, 0, vec![Stmt::Expr(call)])],
            "go",
        );
        assert_eq!(
            result.map_err(|e| e.to_string()),
            Err("Undefined function 'nowhere' at line 7".to_string())
        );
    }
}
