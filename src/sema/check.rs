//! Declaration and statement checking
//!
//! The [`Checker`] walks top-level nodes in order, registering each
//! declaration in the session's symbol table as soon as it is checked so that
//! later items (and later fragments) can see it. Function bodies are checked
//! with a [`FunctionScope`] that numbers locals and resolves block scoping.
//!
//! Errors are recorded as diagnostics; a failed statement is dropped and
//! checking continues with the next one so one fragment reports every
//! problem at once.

use super::tast::{ExprType, Function, GlobalVar, Initializer, Item, LocalId, LocalVar, Stmt};
use super::Diagnostic;
use crate::memory::sizeof_type;
use crate::parser::ast::{AstNode, BaseType, Field, Param, SourceLocation, StructDef, Type};
use crate::parser::Parser;
use crate::session::{DeclKind, FrontEndOutput, LookupHook, Session, Signature};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Marker for an error that has already been recorded as a diagnostic
#[derive(Debug, Clone, Copy)]
pub(crate) struct Reported;

pub(crate) type Check<T> = Result<T, Reported>;

/// Per-function checking state
pub(crate) struct FunctionScope {
    pub(crate) name: String,
    pub(crate) return_type: Type,
    pub(crate) is_statement_body: bool,
    pub(crate) locals: Vec<LocalVar>,
    scopes: Vec<FxHashMap<String, LocalId>>,
    pub(crate) loop_depth: usize,
}

impl FunctionScope {
    fn new(name: &str, return_type: Type, is_statement_body: bool) -> Self {
        FunctionScope {
            name: name.to_string(),
            return_type,
            is_statement_body,
            locals: Vec::new(),
            scopes: vec![FxHashMap::default()],
            loop_depth: 0,
        }
    }
}

pub(crate) struct Checker<'a> {
    pub(crate) session: &'a mut Session,
    pub(crate) hook: &'a mut dyn LookupHook,
    pub(crate) fragment: usize,
    statement_prefix: &'a str,
    include_dirs: &'a [PathBuf],
    /// Directories of the files currently being included, innermost last
    include_stack: Vec<PathBuf>,
    /// Included file and the `#include` it came from, innermost last
    include_sites: Vec<(PathBuf, SourceLocation)>,
    pub(crate) diagnostics: Vec<Diagnostic>,
    items: Vec<Item>,
    pub(crate) function: Option<FunctionScope>,
}

impl<'a> Checker<'a> {
    pub(crate) fn new(
        session: &'a mut Session,
        hook: &'a mut dyn LookupHook,
        fragment: usize,
        statement_prefix: &'a str,
        include_dirs: &'a [PathBuf],
    ) -> Self {
        Checker {
            session,
            hook,
            fragment,
            statement_prefix,
            include_dirs,
            include_stack: Vec::new(),
            include_sites: Vec::new(),
            diagnostics: Vec::new(),
            items: Vec::new(),
            function: None,
        }
    }

    pub(crate) fn finish(self) -> FrontEndOutput {
        FrontEndOutput {
            items: self.items,
            diagnostics: self.diagnostics,
        }
    }

    pub(crate) fn error(&mut self, message: impl Into<String>, location: SourceLocation) -> Reported {
        let (message, location) = self.attribute(message.into(), location);
        let diagnostic = Diagnostic::error(message, location);
        trace!(%diagnostic, "semantic error");
        self.diagnostics.push(diagnostic);
        Reported
    }

    pub(crate) fn warning(&mut self, message: impl Into<String>, location: SourceLocation) {
        let (message, location) = self.attribute(message.into(), location);
        self.diagnostics.push(Diagnostic::warning(message, location));
    }

    /// Problems inside an included file are reported at the fragment's
    /// `#include`, naming the file and the position within it.
    fn attribute(&self, message: String, location: SourceLocation) -> (String, SourceLocation) {
        match (self.include_sites.first(), self.include_sites.last()) {
            (Some((_, site)), Some((file, _))) => (
                format!("in '{}' at {}: {}", file.display(), location, message),
                *site,
            ),
            _ => (message, location),
        }
    }

    // ===== Top level =====

    pub(crate) fn check_top_level(&mut self, node: &AstNode) {
        // Errors are already recorded as diagnostics
        let _ = match node {
            AstNode::Include {
                path,
                system,
                location,
            } => {
                self.check_include(path, *system, *location);
                Ok(())
            }
            AstNode::StructDef {
                name,
                fields,
                location,
            } => self.check_struct(name, fields, *location),
            AstNode::FunctionDef {
                name,
                params,
                body,
                return_type,
                location,
            } => self.check_function(name, params, return_type, body.as_deref(), *location),
            AstNode::VarDecl {
                name,
                var_type,
                init,
                location,
            } => self.check_global(name, var_type, init.as_deref(), *location),
            other => Err(self.error("expected a declaration at file scope", *other.location())),
        };
    }

    fn check_include(&mut self, path: &str, system: bool, location: SourceLocation) {
        if system {
            debug!(path, "ignoring system include");
            return;
        }
        let Some(resolved) = self.resolve_include(path) else {
            self.error(format!("'{}' file not found", path), location);
            return;
        };
        if self.session.is_included(&resolved) {
            debug!(path = %resolved.display(), "skipping file that was already included");
            return;
        }
        let source = match std::fs::read_to_string(&resolved) {
            Ok(source) => source,
            Err(err) => {
                self.error(format!("cannot read '{}': {}", resolved.display(), err), location);
                return;
            }
        };
        self.session.record_include(resolved.clone());

        let program = match Parser::new(&source).and_then(|mut parser| parser.parse_program()) {
            Ok(program) => program,
            Err(err) => {
                self.error(format!("in '{}': {}", resolved.display(), err), location);
                return;
            }
        };

        debug!(path = %resolved.display(), items = program.nodes.len(), "including file");
        self.include_stack
            .push(resolved.parent().map(Path::to_path_buf).unwrap_or_default());
        self.include_sites.push((resolved, location));
        for node in &program.nodes {
            self.check_top_level(node);
        }
        self.include_sites.pop();
        self.include_stack.pop();
    }

    fn resolve_include(&self, path: &str) -> Option<PathBuf> {
        let candidate = Path::new(path);
        let found = if candidate.is_absolute() {
            candidate.is_file().then(|| candidate.to_path_buf())
        } else {
            self.include_stack
                .last()
                .into_iter()
                .chain(self.include_dirs.iter())
                .map(|dir| dir.join(candidate))
                .find(|full| full.is_file())
                .or_else(|| candidate.is_file().then(|| candidate.to_path_buf()))
        };
        found.map(|full| std::fs::canonicalize(&full).unwrap_or(full))
    }

    fn check_struct(&mut self, name: &str, fields: &[Field], location: SourceLocation) -> Check<()> {
        if self.session.symbols().lookup_struct(name).is_some() {
            return Err(self.error(format!("redefinition of 'struct {}'", name), location));
        }

        let mut seen: Vec<&str> = Vec::new();
        for field in fields {
            if seen.contains(&field.name.as_str()) {
                return Err(self.error(
                    format!("duplicate member '{}' in 'struct {}'", field.name, name),
                    location,
                ));
            }
            seen.push(&field.name);
            if field.field_type.struct_name() == Some(name) && field.field_type.pointer_depth == 0 {
                return Err(self.error(
                    format!("field '{}' has incomplete type 'struct {}'", field.name, name),
                    location,
                ));
            }
            if field.field_type.is_void() || sizeof_type(&field.field_type, self.session.symbols()).is_none() {
                return Err(self.error(
                    format!("field '{}' has incomplete type '{}'", field.name, field.field_type),
                    location,
                ));
            }
        }

        self.session.symbols_mut().declare(
            name,
            DeclKind::Struct(StructDef {
                name: name.to_string(),
                fields: fields.to_vec(),
            }),
            self.fragment,
            location,
        );
        Ok(())
    }

    fn check_function(
        &mut self,
        name: &str,
        params: &[Param],
        return_type: &Type,
        body: Option<&[AstNode]>,
        location: SourceLocation,
    ) -> Check<()> {
        if self.function.is_some() {
            return Err(self.error("function definition is not allowed here", location));
        }
        if return_type.is_array() {
            return Err(self.error(format!("function '{}' cannot return an array", name), location));
        }
        if !return_type.is_void() && sizeof_type(return_type, self.session.symbols()).is_none() {
            return Err(self.error(
                format!("function '{}' has incomplete return type '{}'", name, return_type),
                location,
            ));
        }

        let mut param_types = Vec::with_capacity(params.len());
        for (i, param) in params.iter().enumerate() {
            if params[..i].iter().any(|p| p.name == param.name) {
                return Err(self.error(format!("redefinition of parameter '{}'", param.name), location));
            }
            let ty = self.adjust_parameter_type(&param.param_type, &param.name, location)?;
            param_types.push(ty);
        }

        let signature = Signature::new(return_type.clone(), param_types.clone());
        let existing = self.session.symbols().lookup(name).map(|d| d.kind.clone());
        match existing {
            Some(DeclKind::Function {
                signature: previous,
                defined,
            }) => {
                if previous != signature {
                    return Err(self.error(
                        format!("conflicting types for '{}': previously declared as '{}'", name, previous),
                        location,
                    ));
                }
                if body.is_none() {
                    self.warning(format!("redundant redeclaration of '{}'", name), location);
                    return Ok(());
                }
                if defined {
                    return Err(self.error(format!("redefinition of function '{}'", name), location));
                }
            }
            Some(other) => {
                return Err(self.error(
                    format!("'{}' redeclared as a different kind of symbol (previously a {})", name, other.describe()),
                    location,
                ));
            }
            None => {}
        }

        self.session.symbols_mut().declare(
            name,
            DeclKind::Function {
                signature,
                defined: body.is_some(),
            },
            self.fragment,
            location,
        );

        let Some(body) = body else {
            return Ok(());
        };

        let is_statement_body = name.starts_with(self.statement_prefix);
        self.function = Some(FunctionScope::new(name, return_type.clone(), is_statement_body));
        for (param, ty) in params.iter().zip(param_types) {
            // Names were checked for duplicates above
            let _ = self.declare_local(&param.name, ty, location);
        }
        let stmts = self.check_statements(body);

        if let Some(scope) = self.function.take() {
            trace!(function = name, locals = scope.locals.len(), "checked function body");
            self.items.push(Item::Function(Function {
                name: name.to_string(),
                return_type: ExprType::Known(return_type.clone()),
                params: params.len(),
                locals: scope.locals,
                body: stmts,
                location,
                is_statement_body,
            }));
        }
        Ok(())
    }

    /// Array parameters decay to pointers; `void` and unknown structs are rejected.
    fn adjust_parameter_type(&mut self, ty: &Type, name: &str, location: SourceLocation) -> Check<Type> {
        let adjusted = match ty.array_dims.len() {
            0 => ty.clone(),
            1 => ty.decay(),
            _ => {
                return Err(self.error(
                    format!("multi-dimensional array parameter '{}' is not supported", name),
                    location,
                ))
            }
        };
        if adjusted.is_void() || sizeof_type(&adjusted, self.session.symbols()).is_none() {
            return Err(self.error(
                format!("parameter '{}' has incomplete type '{}'", name, adjusted),
                location,
            ));
        }
        Ok(adjusted)
    }

    fn check_global(
        &mut self,
        name: &str,
        var_type: &Type,
        init: Option<&AstNode>,
        location: SourceLocation,
    ) -> Check<()> {
        if let Some(previous) = self.session.symbols().lookup(name) {
            let kind = previous.kind.describe();
            return Err(self.error(
                format!("redefinition of '{}' (previously declared as a {})", name, kind),
                location,
            ));
        }

        let mut ty = var_type.clone();
        self.check_object_type(&mut ty, name, init, location)?;
        let init = match init {
            Some(node) => Some(self.check_initializer(&ty, node)?),
            None => None,
        };

        self.session.symbols_mut().declare(
            name,
            DeclKind::Variable { ty: ty.clone() },
            self.fragment,
            location,
        );
        self.items.push(Item::Global(GlobalVar {
            name: name.to_string(),
            ty,
            init,
            location,
        }));
        Ok(())
    }

    /// Validate the type of a variable and complete `int a[] = {...}`.
    fn check_object_type(
        &mut self,
        ty: &mut Type,
        name: &str,
        init: Option<&AstNode>,
        location: SourceLocation,
    ) -> Check<()> {
        if ty.base == BaseType::Void && ty.pointer_depth == 0 {
            return Err(self.error(format!("variable '{}' has incomplete type '{}'", name, ty), location));
        }
        if ty.array_dims.first() == Some(&None) {
            match init {
                Some(AstNode::InitList { items, .. }) if !items.is_empty() => {
                    ty.array_dims[0] = Some(items.len());
                }
                _ => {
                    return Err(self.error(
                        format!("definition of array '{}' needs an explicit size or an initializer", name),
                        location,
                    ));
                }
            }
        }
        if sizeof_type(ty, self.session.symbols()).is_none() {
            return Err(self.error(
                format!("variable '{}' has incomplete type '{}'", name, ty),
                location,
            ));
        }
        Ok(())
    }

    /// Check an initializer against the type it initializes.
    pub(crate) fn check_initializer(&mut self, ty: &Type, node: &AstNode) -> Check<Initializer> {
        let AstNode::InitList { items, location } = node else {
            if ty.is_array() {
                return Err(self.error(
                    format!("array of type '{}' must be initialized with a brace-enclosed list", ty),
                    *node.location(),
                ));
            }
            let value = self.check_expr(node)?;
            self.check_assignable(ty, &value, "initializing", *node.location())?;
            return Ok(Initializer::Expr(value));
        };
        let location = *location;

        if ty.is_array() {
            let element = ty.element();
            if let Some(Some(len)) = ty.array_dims.first() {
                if items.len() > *len {
                    return Err(self.error("excess elements in array initializer", location));
                }
            }
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(self.check_initializer(&element, item)?);
            }
            return Ok(Initializer::List(out, location));
        }

        if ty.is_struct() {
            let fields = ty
                .struct_name()
                .and_then(|tag| self.session.symbols().lookup_struct(tag))
                .map(|def| def.fields.clone())
                .unwrap_or_default();
            if items.len() > fields.len() {
                return Err(self.error("excess elements in struct initializer", location));
            }
            let mut out = Vec::with_capacity(items.len());
            for (field, item) in fields.iter().zip(items) {
                let mut field_type = field.field_type.clone();
                field_type.is_const |= ty.is_const;
                out.push(self.check_initializer(&field_type, item)?);
            }
            return Ok(Initializer::List(out, location));
        }

        match items.as_slice() {
            [single] => self.check_initializer(ty, single),
            [] => Err(self.error("scalar initializer cannot be empty", location)),
            _ => Err(self.error("excess elements in scalar initializer", location)),
        }
    }

    // ===== Statements =====

    fn check_statements(&mut self, nodes: &[AstNode]) -> Vec<Stmt> {
        let mut stmts = Vec::with_capacity(nodes.len());
        for node in nodes {
            if let Ok(stmt) = self.check_statement(node) {
                stmts.push(stmt);
            }
        }
        stmts
    }

    fn check_block(&mut self, nodes: &[AstNode]) -> Vec<Stmt> {
        self.push_scope();
        let stmts = self.check_statements(nodes);
        self.pop_scope();
        stmts
    }

    fn check_loop_body(&mut self, nodes: &[AstNode]) -> Vec<Stmt> {
        if let Some(scope) = self.function.as_mut() {
            scope.loop_depth += 1;
        }
        let body = self.check_block(nodes);
        if let Some(scope) = self.function.as_mut() {
            scope.loop_depth -= 1;
        }
        body
    }

    fn check_statement(&mut self, node: &AstNode) -> Check<Stmt> {
        match node {
            AstNode::VarDecl {
                name,
                var_type,
                init,
                location,
            } => self.check_local(name, var_type, init.as_deref(), *location),
            AstNode::ExpressionStatement { expr, .. } => Ok(Stmt::Expr(self.check_expr(expr)?)),
            AstNode::Return { expr, location } => self.check_return(expr.as_deref(), *location),
            AstNode::If {
                condition,
                then_branch,
                else_branch,
                location,
            } => {
                let cond = self.check_condition(condition);
                let then_branch = self.check_block(then_branch);
                let else_branch = else_branch.as_ref().map(|b| self.check_block(b));
                Ok(Stmt::If {
                    cond: cond?,
                    then_branch,
                    else_branch,
                    location: *location,
                })
            }
            AstNode::While {
                condition,
                body,
                location,
            } => {
                let cond = self.check_condition(condition);
                let body = self.check_loop_body(body);
                Ok(Stmt::While {
                    cond: cond?,
                    body,
                    location: *location,
                })
            }
            AstNode::DoWhile {
                body,
                condition,
                location,
            } => {
                let body = self.check_loop_body(body);
                let cond = self.check_condition(condition)?;
                Ok(Stmt::DoWhile {
                    body,
                    cond,
                    location: *location,
                })
            }
            AstNode::For {
                init,
                condition,
                increment,
                body,
                location,
            } => {
                self.push_scope();
                let init = match init.as_deref() {
                    Some(decl @ AstNode::VarDecl { .. }) => self.check_statement(decl).map(|s| Some(Box::new(s))),
                    Some(expr) => self.check_expr(expr).map(|e| Some(Box::new(Stmt::Expr(e)))),
                    None => Ok(None),
                };
                let cond = match condition.as_deref() {
                    Some(c) => self.check_condition(c).map(Some),
                    None => Ok(None),
                };
                let step = match increment.as_deref() {
                    Some(s) => self.check_expr(s).map(Some),
                    None => Ok(None),
                };
                let body = self.check_loop_body(body);
                self.pop_scope();
                Ok(Stmt::For {
                    init: init?,
                    cond: cond?,
                    step: step?,
                    body,
                    location: *location,
                })
            }
            AstNode::Break { location } => {
                if self.function.as_ref().map_or(0, |f| f.loop_depth) == 0 {
                    return Err(self.error("'break' statement not in loop", *location));
                }
                Ok(Stmt::Break(*location))
            }
            AstNode::Continue { location } => {
                if self.function.as_ref().map_or(0, |f| f.loop_depth) == 0 {
                    return Err(self.error("'continue' statement not in loop", *location));
                }
                Ok(Stmt::Continue(*location))
            }
            AstNode::Block { statements, .. } => Ok(Stmt::Block(self.check_block(statements))),
            AstNode::FunctionDef { location, .. } => {
                Err(self.error("function definition is not allowed here", *location))
            }
            AstNode::StructDef { location, .. } => {
                Err(self.error("struct definition is not allowed inside a function", *location))
            }
            AstNode::Include { location, .. } => {
                Err(self.error("#include is not allowed inside a function", *location))
            }
            expr => Ok(Stmt::Expr(self.check_expr(expr)?)),
        }
    }

    fn check_local(
        &mut self,
        name: &str,
        var_type: &Type,
        init: Option<&AstNode>,
        location: SourceLocation,
    ) -> Check<Stmt> {
        let mut ty = var_type.clone();
        self.check_object_type(&mut ty, name, init, location)?;
        let init = match init {
            Some(node) => Some(self.check_initializer(&ty, node)?),
            None => None,
        };
        let id = self.declare_local(name, ty, location)?;
        Ok(Stmt::Local { id, init, location })
    }

    fn check_return(&mut self, expr: Option<&AstNode>, location: SourceLocation) -> Check<Stmt> {
        let (function, return_type) = match self.function.as_ref() {
            Some(scope) => (scope.name.clone(), scope.return_type.clone()),
            None => return Err(self.error("'return' outside of a function", location)),
        };
        match expr {
            None => {
                if !return_type.is_void() {
                    return Err(self.error(
                        format!("non-void function '{}' should return a value", function),
                        location,
                    ));
                }
                Ok(Stmt::Return { value: None, location })
            }
            Some(node) => {
                let value = self.check_expr(node)?;
                if return_type.is_void() {
                    return Err(self.error(
                        format!("void function '{}' should not return a value", function),
                        location,
                    ));
                }
                self.check_assignable(&return_type, &value, "returning", location)?;
                Ok(Stmt::Return {
                    value: Some(value),
                    location,
                })
            }
        }
    }

    fn check_condition(&mut self, node: &AstNode) -> Check<super::tast::Expr> {
        let cond = self.check_expr(node)?;
        if let Some(ty) = self.value_type(&cond)? {
            if !ty.is_scalar() {
                return Err(self.error(
                    format!("statement requires expression of scalar type ('{}' invalid)", ty),
                    cond.location,
                ));
            }
        }
        Ok(cond)
    }

    // ===== Locals =====

    fn push_scope(&mut self) {
        if let Some(scope) = self.function.as_mut() {
            scope.scopes.push(FxHashMap::default());
        }
    }

    fn pop_scope(&mut self) {
        if let Some(scope) = self.function.as_mut() {
            scope.scopes.pop();
        }
    }

    pub(crate) fn lookup_local(&self, name: &str) -> Option<(LocalId, &Type)> {
        let scope = self.function.as_ref()?;
        scope
            .scopes
            .iter()
            .rev()
            .find_map(|s| s.get(name))
            .map(|&id| (id, &scope.locals[id].ty))
    }

    fn declare_local(&mut self, name: &str, ty: Type, location: SourceLocation) -> Check<LocalId> {
        let Some(scope) = self.function.as_mut() else {
            return Err(self.error("local declaration outside of a function", location));
        };
        let redefined = scope
            .scopes
            .last()
            .is_some_and(|innermost| innermost.contains_key(name));
        if redefined {
            return Err(self.error(format!("redefinition of '{}'", name), location));
        }
        let id = scope.locals.len();
        scope.locals.push(LocalVar {
            name: name.to_string(),
            ty,
        });
        if let Some(innermost) = scope.scopes.last_mut() {
            innermost.insert(name.to_string(), id);
        }
        Ok(id)
    }
}
