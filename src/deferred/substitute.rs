use super::render::CaptureRenderer;
use super::{InterpreterId, SubstitutionError};
use crate::sema::tast::{
    Expr, ExprKind, Function, Initializer, Item, RuntimeEvalCall, Stmt, ValueCategory,
};
use crate::session::{CompiledUnit, ContextToken, DeclContext, Session};
use tracing::{debug, trace};

/// Result of rewriting one node
#[derive(Debug, Clone, PartialEq)]
pub enum Rewritten<T> {
    /// Nothing below the node needed substitution
    Unchanged,
    /// An equivalent node with every deferred expression replaced
    Replaced(T),
}

impl<T: Clone> Rewritten<T> {
    fn is_replaced(&self) -> bool {
        matches!(self, Rewritten::Replaced(_))
    }

    /// The rewritten node, or a clone of `original`
    fn or_clone(self, original: &T) -> T {
        match self {
            Rewritten::Unchanged => original.clone(),
            Rewritten::Replaced(node) => node,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionReport {
    /// Number of expressions turned into runtime evaluations
    pub replaced: usize,
    /// Placeholder declarations removed from the session afterwards
    pub placeholders_removed: usize,
}

/// Replace every topmost artificially dependent expression in the statement
/// bodies of `unit` with a runtime evaluation request. Placeholders are
/// removed from `session` before returning, on success and on failure.
pub fn substitute(
    unit: &mut CompiledUnit,
    interpreter: InterpreterId,
    session: &mut Session,
) -> Result<SubstitutionReport, SubstitutionError> {
    let result = substitute_items(&mut unit.items, unit.fragment, interpreter, session);
    let removed = session.symbols_mut().remove_transient();
    let mut report = result?;
    report.placeholders_removed = removed;
    debug!(
        fragment = unit.fragment,
        replaced = report.replaced,
        removed,
        "substituted deferred expressions"
    );
    Ok(report)
}

fn substitute_items(
    items: &mut [Item],
    fragment: usize,
    interpreter: InterpreterId,
    session: &mut Session,
) -> Result<SubstitutionReport, SubstitutionError> {
    let mut report = SubstitutionReport::default();
    for item in items.iter_mut() {
        let Item::Function(function) = item else {
            continue;
        };
        if !function.is_statement_body {
            continue;
        }
        let context = session.intern_context(DeclContext {
            function: function.name.clone(),
            fragment,
        });
        let mut rewriter = Rewriter {
            interpreter,
            context,
            replaced: 0,
        };
        if let Rewritten::Replaced(body) = rewriter.block(&function.body)? {
            function.body = body;
        }
        report.replaced += rewriter.replaced;
        trace_function(function, rewriter.replaced);
    }
    Ok(report)
}

fn trace_function(function: &Function, replaced: usize) {
    if replaced > 0 {
        trace!(function = %function.name, replaced, "rewrote statement body");
    }
}

struct Rewriter {
    interpreter: InterpreterId,
    context: ContextToken,
    replaced: usize,
}

impl Rewriter {
    fn block(&mut self, stmts: &[Stmt]) -> Result<Rewritten<Vec<Stmt>>, SubstitutionError> {
        let rewritten = stmts
            .iter()
            .map(|stmt| self.stmt(stmt))
            .collect::<Result<Vec<_>, _>>()?;
        if !rewritten.iter().any(Rewritten::is_replaced) {
            return Ok(Rewritten::Unchanged);
        }
        Ok(Rewritten::Replaced(
            rewritten
                .into_iter()
                .zip(stmts)
                .map(|(new, old)| new.or_clone(old))
                .collect(),
        ))
    }

    fn optional_block(
        &mut self,
        stmts: &Option<Vec<Stmt>>,
    ) -> Result<Rewritten<Option<Vec<Stmt>>>, SubstitutionError> {
        match stmts {
            Some(stmts) => Ok(match self.block(stmts)? {
                Rewritten::Replaced(stmts) => Rewritten::Replaced(Some(stmts)),
                Rewritten::Unchanged => Rewritten::Unchanged,
            }),
            None => Ok(Rewritten::Unchanged),
        }
    }

    fn optional_expr(&mut self, expr: &Option<Expr>) -> Result<Rewritten<Option<Expr>>, SubstitutionError> {
        match expr {
            Some(expr) => Ok(match self.expr(expr)? {
                Rewritten::Replaced(expr) => Rewritten::Replaced(Some(expr)),
                Rewritten::Unchanged => Rewritten::Unchanged,
            }),
            None => Ok(Rewritten::Unchanged),
        }
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<Rewritten<Stmt>, SubstitutionError> {
        let rewritten = match stmt {
            Stmt::Expr(expr) => match self.expr(expr)? {
                Rewritten::Replaced(expr) => Stmt::Expr(expr),
                Rewritten::Unchanged => return Ok(Rewritten::Unchanged),
            },
            Stmt::Local { id, init, location } => match init {
                Some(init) => match self.initializer(init)? {
                    Rewritten::Replaced(init) => Stmt::Local {
                        id: *id,
                        init: Some(init),
                        location: *location,
                    },
                    Rewritten::Unchanged => return Ok(Rewritten::Unchanged),
                },
                None => return Ok(Rewritten::Unchanged),
            },
            Stmt::Block(body) => match self.block(body)? {
                Rewritten::Replaced(body) => Stmt::Block(body),
                Rewritten::Unchanged => return Ok(Rewritten::Unchanged),
            },
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                location,
            } => {
                let new_cond = self.expr(cond)?;
                let new_then = self.block(then_branch)?;
                let new_else = self.optional_block(else_branch)?;
                if !(new_cond.is_replaced() || new_then.is_replaced() || new_else.is_replaced()) {
                    return Ok(Rewritten::Unchanged);
                }
                Stmt::If {
                    cond: new_cond.or_clone(cond),
                    then_branch: new_then.or_clone(then_branch),
                    else_branch: new_else.or_clone(else_branch),
                    location: *location,
                }
            }
            Stmt::While {
                cond,
                body,
                location,
            } => {
                let new_cond = self.expr(cond)?;
                let new_body = self.block(body)?;
                if !(new_cond.is_replaced() || new_body.is_replaced()) {
                    return Ok(Rewritten::Unchanged);
                }
                Stmt::While {
                    cond: new_cond.or_clone(cond),
                    body: new_body.or_clone(body),
                    location: *location,
                }
            }
            Stmt::DoWhile {
                body,
                cond,
                location,
            } => {
                let new_body = self.block(body)?;
                let new_cond = self.expr(cond)?;
                if !(new_cond.is_replaced() || new_body.is_replaced()) {
                    return Ok(Rewritten::Unchanged);
                }
                Stmt::DoWhile {
                    body: new_body.or_clone(body),
                    cond: new_cond.or_clone(cond),
                    location: *location,
                }
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                location,
            } => {
                let new_init = match init {
                    Some(init) => match self.stmt(init)? {
                        Rewritten::Replaced(init) => Rewritten::Replaced(Some(Box::new(init))),
                        Rewritten::Unchanged => Rewritten::Unchanged,
                    },
                    None => Rewritten::Unchanged,
                };
                let new_cond = self.optional_expr(cond)?;
                let new_step = self.optional_expr(step)?;
                let new_body = self.block(body)?;
                if !(new_init.is_replaced()
                    || new_cond.is_replaced()
                    || new_step.is_replaced()
                    || new_body.is_replaced())
                {
                    return Ok(Rewritten::Unchanged);
                }
                Stmt::For {
                    init: new_init.or_clone(init),
                    cond: new_cond.or_clone(cond),
                    step: new_step.or_clone(step),
                    body: new_body.or_clone(body),
                    location: *location,
                }
            }
            Stmt::Return { value, location } => match self.optional_expr(value)? {
                Rewritten::Replaced(value) => Stmt::Return {
                    value,
                    location: *location,
                },
                Rewritten::Unchanged => return Ok(Rewritten::Unchanged),
            },
            Stmt::Break(_) | Stmt::Continue(_) => return Ok(Rewritten::Unchanged),
        };
        Ok(Rewritten::Replaced(rewritten))
    }

    fn initializer(&mut self, init: &Initializer) -> Result<Rewritten<Initializer>, SubstitutionError> {
        match init {
            Initializer::Expr(expr) => Ok(match self.expr(expr)? {
                Rewritten::Replaced(expr) => Rewritten::Replaced(Initializer::Expr(expr)),
                Rewritten::Unchanged => Rewritten::Unchanged,
            }),
            Initializer::List(items, location) => {
                let rewritten = items
                    .iter()
                    .map(|item| self.initializer(item))
                    .collect::<Result<Vec<_>, _>>()?;
                if !rewritten.iter().any(Rewritten::is_replaced) {
                    return Ok(Rewritten::Unchanged);
                }
                let items = rewritten
                    .into_iter()
                    .zip(items)
                    .map(|(new, old)| new.or_clone(old))
                    .collect();
                Ok(Rewritten::Replaced(Initializer::List(items, *location)))
            }
        }
    }

    /// Replace `expr` if it is artificially dependent, otherwise look for
    /// dependent sub-expressions below it.
    fn expr(&mut self, expr: &Expr) -> Result<Rewritten<Expr>, SubstitutionError> {
        if expr.is_artificially_dependent() {
            return self.runtime_eval(expr).map(Rewritten::Replaced);
        }

        let kind = match &expr.kind {
            ExprKind::IntConst(_)
            | ExprKind::CharConst(_)
            | ExprKind::Str(_)
            | ExprKind::Null
            | ExprKind::Global(_)
            | ExprKind::Local { .. }
            | ExprKind::RuntimeEval(_) => return Ok(Rewritten::Unchanged),
            ExprKind::Unary { op, operand } => match self.expr(operand)? {
                Rewritten::Replaced(operand) => ExprKind::Unary {
                    op: *op,
                    operand: Box::new(operand),
                },
                Rewritten::Unchanged => return Ok(Rewritten::Unchanged),
            },
            ExprKind::Binary { op, lhs, rhs } => match self.pair(lhs, rhs)? {
                Some((lhs, rhs)) => ExprKind::Binary { op: *op, lhs, rhs },
                None => return Ok(Rewritten::Unchanged),
            },
            ExprKind::Assign { lhs, rhs } => match self.pair(lhs, rhs)? {
                Some((lhs, rhs)) => ExprKind::Assign { lhs, rhs },
                None => return Ok(Rewritten::Unchanged),
            },
            ExprKind::CompoundAssign { op, lhs, rhs } => match self.pair(lhs, rhs)? {
                Some((lhs, rhs)) => ExprKind::CompoundAssign { op: *op, lhs, rhs },
                None => return Ok(Rewritten::Unchanged),
            },
            ExprKind::Index { base, index } => match self.pair(base, index)? {
                Some((base, index)) => ExprKind::Index { base, index },
                None => return Ok(Rewritten::Unchanged),
            },
            ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                let new_cond = self.expr(cond)?;
                let new_then = self.expr(then_expr)?;
                let new_else = self.expr(else_expr)?;
                if !(new_cond.is_replaced() || new_then.is_replaced() || new_else.is_replaced()) {
                    return Ok(Rewritten::Unchanged);
                }
                ExprKind::Ternary {
                    cond: Box::new(new_cond.or_clone(cond)),
                    then_expr: Box::new(new_then.or_clone(then_expr)),
                    else_expr: Box::new(new_else.or_clone(else_expr)),
                }
            }
            ExprKind::Call {
                callee,
                args,
                target,
            } => {
                let rewritten = args
                    .iter()
                    .map(|arg| self.expr(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                if !rewritten.iter().any(Rewritten::is_replaced) {
                    return Ok(Rewritten::Unchanged);
                }
                ExprKind::Call {
                    callee: callee.clone(),
                    args: rewritten
                        .into_iter()
                        .zip(args)
                        .map(|(new, old)| new.or_clone(old))
                        .collect(),
                    target: *target,
                }
            }
            ExprKind::Member { base, field, arrow } => match self.expr(base)? {
                Rewritten::Replaced(base) => ExprKind::Member {
                    base: Box::new(base),
                    field: field.clone(),
                    arrow: *arrow,
                },
                Rewritten::Unchanged => return Ok(Rewritten::Unchanged),
            },
            ExprKind::Cast { to, expr: inner } => match self.expr(inner)? {
                Rewritten::Replaced(inner) => ExprKind::Cast {
                    to: to.clone(),
                    expr: Box::new(inner),
                },
                Rewritten::Unchanged => return Ok(Rewritten::Unchanged),
            },
        };

        Ok(Rewritten::Replaced(Expr {
            kind,
            ty: expr.ty.clone(),
            category: expr.category,
            location: expr.location,
        }))
    }

    #[allow(clippy::type_complexity)]
    fn pair(
        &mut self,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<Option<(Box<Expr>, Box<Expr>)>, SubstitutionError> {
        let new_lhs = self.expr(lhs)?;
        let new_rhs = self.expr(rhs)?;
        if !(new_lhs.is_replaced() || new_rhs.is_replaced()) {
            return Ok(None);
        }
        Ok(Some((
            Box::new(new_lhs.or_clone(lhs)),
            Box::new(new_rhs.or_clone(rhs)),
        )))
    }

    fn runtime_eval(&mut self, expr: &Expr) -> Result<Expr, SubstitutionError> {
        let (text, captures) = CaptureRenderer::default().render(expr)?;
        trace!(%text, captures = captures.len(), "deferring expression");
        self.replaced += 1;
        let mut replacement = Expr::dependent(
            ExprKind::RuntimeEval(RuntimeEvalCall {
                interpreter: self.interpreter,
                text,
                captures,
                context: self.context,
            }),
            expr.location,
        );
        replacement.category = ValueCategory::RValue;
        Ok(replacement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::{DeferredLookup, LookupMode};
    use crate::sema::CFrontEnd;
    use crate::session::IncrementalCompiler;

    const PREFIX: &str = "__incc_stmt_";

    fn compile(compiler: &mut IncrementalCompiler, source: &str) -> CompiledUnit {
        let mut hook = DeferredLookup::new(LookupMode::Compile);
        compiler.parse(source, &mut hook).unwrap()
    }

    fn runtime_evals(stmts: &[Stmt]) -> Vec<RuntimeEvalCall> {
        let mut found = Vec::new();
        for stmt in stmts {
            if let Stmt::Expr(expr) = stmt {
                collect(expr, &mut found);
            }
        }
        found
    }

    fn collect(expr: &Expr, found: &mut Vec<RuntimeEvalCall>) {
        match &expr.kind {
            ExprKind::RuntimeEval(call) => found.push(call.clone()),
            ExprKind::Assign { lhs, rhs } | ExprKind::Binary { lhs, rhs, .. } => {
                collect(lhs, found);
                collect(rhs, found);
            }
            ExprKind::Cast { expr, .. } => collect(expr, found),
            ExprKind::Call { args, .. } => args.iter().for_each(|a| collect(a, found)),
            _ => {}
        }
    }

    #[test]
    fn test_topmost_dependent_expression_is_replaced() {
        let mut compiler = IncrementalCompiler::new(Box::new(CFrontEnd::new(PREFIX)));
        compile(&mut compiler, "int x;");
        let mut unit = compile(
            &mut compiler,
            "void __incc_stmt_1(void) { int y; y = 2; x = (int)magic(y) + 1; other(x) + x; }",
        );
        assert!(!compiler.pending_placeholders().is_empty());

        let id = InterpreterId(9);
        let report = substitute(&mut unit, id, compiler.session_mut()).unwrap();
        assert_eq!(report.replaced, 2);
        assert_eq!(report.placeholders_removed, 2);
        assert!(compiler.pending_placeholders().is_empty());
        assert!(compiler.session().symbols().lookup("magic").is_none());

        let function = unit.function("__incc_stmt_1").unwrap();
        let calls = runtime_evals(&function.body);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].text, "magic((*(int *)@0))");
        assert_eq!(calls[0].captures.len(), 1);
        assert_eq!(calls[0].interpreter, id);
        assert_eq!(calls[1].text, "(other((*(int *)@0)) + (*(int *)@0))");

        let context = compiler.session().context(calls[0].context).unwrap();
        assert_eq!(context.function, "__incc_stmt_1");
        assert_eq!(context.fragment, unit.fragment);
    }

    #[test]
    fn test_unchanged_functions_are_left_alone() {
        let mut compiler = IncrementalCompiler::new(Box::new(CFrontEnd::new(PREFIX)));
        let mut unit = compile(
            &mut compiler,
            "int sq(int v) { return v * v; }\nvoid __incc_stmt_0(void) { sq(2); }",
        );
        let before = unit.items.clone();
        let report = substitute(&mut unit, InterpreterId(1), compiler.session_mut()).unwrap();
        assert_eq!(report, SubstitutionReport::default());
        assert_eq!(unit.items, before);
    }

    #[test]
    fn test_placeholders_removed_on_failure() {
        let mut compiler = IncrementalCompiler::new(Box::new(CFrontEnd::new(PREFIX)));
        let mut unit = compile(
            &mut compiler,
            "void __incc_stmt_0(void) { int m[2][2]; magic(m[0][0]); }",
        );
        let result = substitute(&mut unit, InterpreterId(1), compiler.session_mut());
        assert!(matches!(
            result,
            Err(SubstitutionError::UnsupportedCapture { .. })
        ));
        assert!(compiler.pending_placeholders().is_empty());
    }
}
