//! Lowering from the typed tree to module IR

use super::ir::{
    ArithOp, CmpOp, Expr as IrExpr, ExprKind as IrKind, Function as IrFunction, GlobalSlot,
    InitStore, LocalSlot, Module, Place, Stmt as IrStmt,
};
use super::CodegenError;
use crate::memory::value::Value;
use crate::memory::{field_offset, sizeof_type, MemType};
use crate::parser::ast::{BinOp, SourceLocation, Type, UnOp};
use crate::sema::tast::{
    Builtin, CallTarget, Expr, ExprKind, ExprType, Function, GlobalVar, Initializer, Item,
    Stmt,
};
use crate::session::{DeclKind, Session};
use std::rc::Rc;

type Lowered<T> = Result<T, CodegenError>;

pub(crate) struct Lowerer<'a> {
    session: &'a Session,
    module: Module,
    /// Local types of the function being lowered
    locals: Vec<Type>,
}

impl<'a> Lowerer<'a> {
    pub(crate) fn new(session: &'a Session, name: String, fragment: usize) -> Self {
        Lowerer {
            session,
            module: Module::new(name, fragment),
            locals: Vec::new(),
        }
    }

    pub(crate) fn lower_items(mut self, items: &[Item]) -> Lowered<Module> {
        // Globals first, so functions of the same fragment find them defined
        for item in items {
            if let Item::Global(global) = item {
                self.define_global(global)?;
            }
        }
        for item in items {
            if let Item::Function(function) = item {
                let lowered = self.lower_function(function)?;
                self.module.functions.push(Rc::new(lowered));
            }
        }
        Ok(self.module)
    }

    // ===== Layout =====

    fn size_of(&self, ty: &Type, location: SourceLocation) -> Lowered<usize> {
        sizeof_type(ty, self.session.symbols()).ok_or_else(|| CodegenError::IncompleteType {
            ty: ty.clone(),
            location,
        })
    }

    fn mem_of(&self, ty: &Type, location: SourceLocation) -> Lowered<MemType> {
        MemType::of(ty, self.session.symbols()).ok_or_else(|| CodegenError::IncompleteType {
            ty: ty.clone(),
            location,
        })
    }

    fn pointee_size(&self, pointer: &Type, location: SourceLocation) -> Lowered<usize> {
        let pointee = pointer.decay().pointee();
        if pointee.is_void() {
            // Arithmetic on void * moves by bytes
            return Ok(1);
        }
        self.size_of(&pointee, location)
    }

    // ===== Globals =====

    fn define_global(&mut self, global: &GlobalVar) -> Lowered<()> {
        let size = self.size_of(&global.ty, global.location)?;
        let mut init = Vec::new();
        if let Some(initializer) = &global.init {
            self.init_stores(&global.ty, initializer, 0, &mut init)?;
        }
        let slot = GlobalSlot {
            name: global.name.clone(),
            ty: global.ty.clone(),
            size,
            defined: true,
            binding: None,
            init,
            location: global.location,
        };
        match self.module.global_index(&global.name) {
            Some(index) => self.module.globals[index] = slot,
            None => self.module.globals.push(slot),
        }
        Ok(())
    }

    /// Slot for `name`, adding an external slot on first reference
    fn global_slot(&mut self, name: &str, location: SourceLocation) -> Lowered<usize> {
        if let Some(index) = self.module.global_index(name) {
            return Ok(index);
        }
        let ty = match self.session.symbols().lookup(name).map(|d| &d.kind) {
            Some(DeclKind::Variable { ty }) => ty.clone(),
            _ => {
                return Err(CodegenError::UnknownGlobal {
                    name: name.to_string(),
                    location,
                })
            }
        };
        let size = self.size_of(&ty, location)?;
        self.module.globals.push(GlobalSlot {
            name: name.to_string(),
            ty,
            size,
            defined: false,
            binding: None,
            init: Vec::new(),
            location,
        });
        Ok(self.module.globals.len() - 1)
    }

    fn string(&mut self, text: &str) -> usize {
        match self.module.strings.iter().position(|s| s == text) {
            Some(index) => index,
            None => {
                self.module.strings.push(text.to_string());
                self.module.strings.len() - 1
            }
        }
    }

    /// Flatten an initializer into stores relative to the object's address
    fn init_stores(
        &mut self,
        ty: &Type,
        init: &Initializer,
        offset: usize,
        out: &mut Vec<InitStore>,
    ) -> Lowered<()> {
        match init {
            Initializer::Expr(expr) => {
                let mem = self.mem_of(ty, expr.location)?;
                let value = self.value_as(expr, mem)?;
                out.push(InitStore { offset, mem, value });
            }
            Initializer::List(items, location) if ty.is_array() => {
                let element = ty.element();
                let stride = self.size_of(&element, *location)?;
                for (index, item) in items.iter().enumerate() {
                    self.init_stores(&element, item, offset + index * stride, out)?;
                }
            }
            Initializer::List(items, location) => {
                let def = ty
                    .struct_name()
                    .and_then(|tag| self.session.symbols().lookup_struct(tag))
                    .ok_or_else(|| CodegenError::IncompleteType {
                        ty: ty.clone(),
                        location: *location,
                    })?
                    .clone();
                for (field, item) in def.fields.iter().zip(items) {
                    let (field_at, _) = field_offset(&def, &field.name, self.session.symbols())
                        .ok_or_else(|| CodegenError::IncompleteType {
                            ty: field.field_type.clone(),
                            location: *location,
                        })?;
                    self.init_stores(&field.field_type, item, offset + field_at, out)?;
                }
            }
        }
        Ok(())
    }

    // ===== Functions =====

    fn lower_function(&mut self, function: &Function) -> Lowered<IrFunction> {
        self.locals = function.locals.iter().map(|l| l.ty.clone()).collect();

        let mut locals = Vec::with_capacity(function.locals.len());
        for local in &function.locals {
            locals.push(LocalSlot {
                name: local.name.clone(),
                size: self.size_of(&local.ty, function.location)?,
            });
        }
        let params = function.locals[..function.params]
            .iter()
            .map(|p| self.mem_of(&p.ty, function.location))
            .collect::<Lowered<Vec<_>>>()?;
        let returns = match &function.return_type {
            ExprType::Known(ty) if ty.is_void() => None,
            ExprType::Known(ty) => Some(self.mem_of(ty, function.location)?),
            ExprType::Dependent => None,
        };
        let body = self.block(&function.body, returns)?;

        Ok(IrFunction {
            name: function.name.clone(),
            params,
            locals,
            returns,
            body,
            location: function.location,
        })
    }

    fn block(&mut self, stmts: &[Stmt], returns: Option<MemType>) -> Lowered<Vec<IrStmt>> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            if let Some(lowered) = self.stmt(stmt, returns)? {
                out.push(lowered);
            }
        }
        Ok(out)
    }

    fn stmt(&mut self, stmt: &Stmt, returns: Option<MemType>) -> Lowered<Option<IrStmt>> {
        let lowered = match stmt {
            Stmt::Expr(expr) => IrStmt::Expr(self.value(expr)?),
            Stmt::Local { init: None, .. } => return Ok(None),
            Stmt::Local {
                id,
                init: Some(Initializer::Expr(expr)),
                location,
            } => {
                let ty = self.local_type(*id, *location)?;
                let mem = self.mem_of(&ty, *location)?;
                IrStmt::Expr(IrExpr::new(
                    IrKind::Store {
                        place: Place::Local(*id),
                        mem,
                        value: Box::new(self.value_as(expr, mem)?),
                    },
                    *location,
                ))
            }
            Stmt::Local {
                id,
                init: Some(list),
                location,
            } => {
                let ty = self.local_type(*id, *location)?;
                let size = self.size_of(&ty, *location)?;
                let mut stores = Vec::new();
                self.init_stores(&ty, list, 0, &mut stores)?;
                IrStmt::InitLocal {
                    local: *id,
                    size,
                    stores,
                }
            }
            Stmt::Block(body) => IrStmt::Block(self.block(body, returns)?),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => IrStmt::If {
                cond: self.value(cond)?,
                then_branch: self.block(then_branch, returns)?,
                else_branch: match else_branch {
                    Some(stmts) => self.block(stmts, returns)?,
                    None => Vec::new(),
                },
            },
            Stmt::While { cond, body, .. } => IrStmt::While {
                cond: self.value(cond)?,
                body: self.block(body, returns)?,
            },
            Stmt::DoWhile { body, cond, .. } => IrStmt::DoWhile {
                body: self.block(body, returns)?,
                cond: self.value(cond)?,
            },
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                let init = match init {
                    Some(init) => self.stmt(init, returns)?.into_iter().collect(),
                    None => Vec::new(),
                };
                IrStmt::For {
                    init,
                    cond: cond.as_ref().map(|c| self.value(c)).transpose()?,
                    step: step.as_ref().map(|s| self.value(s)).transpose()?,
                    body: self.block(body, returns)?,
                }
            }
            Stmt::Return { value: None, .. } => IrStmt::Return(None),
            Stmt::Return {
                value: Some(value),
                ..
            } => IrStmt::Return(Some(self.return_value(value, returns)?)),
            Stmt::Break(_) => IrStmt::Break,
            Stmt::Continue(_) => IrStmt::Continue,
        };
        Ok(Some(lowered))
    }

    fn return_value(&mut self, value: &Expr, returns: Option<MemType>) -> Lowered<IrExpr> {
        match (value.known_type(), returns) {
            // A statement body returning an array hands back its contents
            (Some(ty), Some(mem @ MemType::Bytes(_))) if ty.is_array() => {
                let place = self.place(value)?;
                Ok(IrExpr::new(IrKind::Load(place, mem), value.location))
            }
            (_, Some(mem)) => self.value_as(value, mem),
            (_, None) => self.value(value),
        }
    }

    fn local_type(&self, id: usize, location: SourceLocation) -> Lowered<Type> {
        self.locals
            .get(id)
            .cloned()
            .ok_or(CodegenError::UnknownLocal { id, location })
    }

    // ===== Expressions =====

    /// Address of an lvalue expression
    fn place(&mut self, expr: &Expr) -> Lowered<Place> {
        let location = expr.location;
        match &expr.kind {
            ExprKind::Global(name) => Ok(Place::Global(self.global_slot(name, location)?)),
            ExprKind::Local { id, .. } => Ok(Place::Local(*id)),
            ExprKind::Unary {
                op: UnOp::Deref,
                operand,
            } => Ok(Place::Addr(Box::new(self.value(operand)?))),
            ExprKind::Index { base, index } => {
                let base_ty = self.known(base)?;
                let (pointer, element) = if base_ty.is_array() {
                    let address = IrExpr::new(IrKind::AddrOf(self.place(base)?), location);
                    (address, base_ty.element())
                } else {
                    (self.value(base)?, base_ty.pointee())
                };
                let scale = self.size_of(&element, location)?;
                let offset = self.value_as(index, MemType::Long)?;
                Ok(Place::Addr(Box::new(IrExpr::new(
                    IrKind::PtrAdd {
                        ptr: Box::new(pointer),
                        offset: Box::new(offset),
                        scale,
                    },
                    location,
                ))))
            }
            ExprKind::Member { base, field, arrow } => {
                let base_ty = self.known(base)?;
                let (address, struct_ty) = if *arrow {
                    (self.value(base)?, base_ty.decay().pointee())
                } else {
                    (IrExpr::new(IrKind::AddrOf(self.place(base)?), location), base_ty)
                };
                let offset = struct_ty
                    .struct_name()
                    .and_then(|tag| self.session.symbols().lookup_struct(tag))
                    .and_then(|def| field_offset(def, field, self.session.symbols()))
                    .map(|(offset, _)| offset)
                    .ok_or_else(|| CodegenError::UnknownField {
                        ty: struct_ty.clone(),
                        field: field.clone(),
                        location,
                    })?;
                Ok(Place::Addr(Box::new(IrExpr::new(
                    IrKind::PtrAdd {
                        ptr: Box::new(address),
                        offset: Box::new(constant(Value::Long(offset as i64), location)),
                        scale: 1,
                    },
                    location,
                ))))
            }
            _ => Err(CodegenError::NotAnLvalue { location }),
        }
    }

    fn known(&self, expr: &Expr) -> Lowered<Type> {
        expr.known_type()
            .cloned()
            .ok_or(CodegenError::Unresolved { location: expr.location })
    }

    /// `expr` converted to `mem`, unless it already has that layout
    fn value_as(&mut self, expr: &Expr, mem: MemType) -> Lowered<IrExpr> {
        let value = self.value(expr)?;
        let current = match expr.known_type() {
            Some(ty) => MemType::of(&ty.decay(), self.session.symbols()),
            None => None,
        };
        if current == Some(mem) || matches!(mem, MemType::Bytes(_)) {
            return Ok(value);
        }
        Ok(IrExpr::new(IrKind::Convert(Box::new(value), mem), expr.location))
    }

    /// Rvalue of `expr`: arrays decay to their address, structs load as bytes
    fn value(&mut self, expr: &Expr) -> Lowered<IrExpr> {
        let location = expr.location;
        let kind = match &expr.kind {
            ExprKind::IntConst(n) => {
                let mem = self.mem_of(&self.known(expr)?, location)?;
                IrKind::Const(Value::from_i64(*n, mem))
            }
            ExprKind::CharConst(c) => {
                let mem = self.mem_of(&self.known(expr)?, location)?;
                IrKind::Const(Value::from_i64(*c as i64, mem))
            }
            ExprKind::Str(text) => IrKind::Str(self.string(text)),
            ExprKind::Null => IrKind::Const(Value::Null),
            ExprKind::Global(_)
            | ExprKind::Local { .. }
            | ExprKind::Index { .. }
            | ExprKind::Member { .. }
            | ExprKind::Unary {
                op: UnOp::Deref, ..
            } => return self.load(expr),
            ExprKind::Unary { op, operand } => return self.unary(*op, operand, expr),
            ExprKind::Binary { op, lhs, rhs } => return self.binary(*op, lhs, rhs, expr),
            ExprKind::Assign { lhs, rhs } => {
                let ty = self.known(lhs)?;
                let mem = self.mem_of(&ty, location)?;
                IrKind::Store {
                    place: self.place(lhs)?,
                    mem,
                    value: Box::new(self.value_as(rhs, mem)?),
                }
            }
            ExprKind::CompoundAssign { op, lhs, rhs } => {
                let ty = self.known(lhs)?;
                let mem = self.mem_of(&ty, location)?;
                let scale = if ty.is_pointer() {
                    Some(self.pointee_size(&ty, location)?)
                } else {
                    None
                };
                IrKind::Update {
                    place: self.place(lhs)?,
                    mem,
                    op: arith_op(*op, location)?,
                    rhs: Box::new(self.value(rhs)?),
                    scale,
                    post: false,
                }
            }
            ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                let result = expr
                    .known_type()
                    .filter(|ty| ty.is_scalar())
                    .map(|ty| self.mem_of(ty, location))
                    .transpose()?;
                let (then_value, else_value) = match result {
                    Some(mem) => (self.value_as(then_expr, mem)?, self.value_as(else_expr, mem)?),
                    None => (self.value(then_expr)?, self.value(else_expr)?),
                };
                IrKind::Ternary {
                    cond: Box::new(self.value(cond)?),
                    then_expr: Box::new(then_value),
                    else_expr: Box::new(else_value),
                }
            }
            ExprKind::Call {
                callee,
                args,
                target,
            } => {
                let args = args
                    .iter()
                    .map(|arg| self.value(arg))
                    .collect::<Lowered<Vec<_>>>()?;
                match target {
                    CallTarget::Function => IrKind::Call {
                        name: callee.clone(),
                        args,
                    },
                    CallTarget::Builtin(Builtin::Printf) => IrKind::Printf { args },
                    CallTarget::Host => {
                        let call = IrExpr::new(
                            IrKind::HostCall {
                                name: callee.clone(),
                                args,
                            },
                            location,
                        );
                        return match expr.known_type() {
                            Some(ty) if !ty.is_void() => {
                                let mem = self.mem_of(ty, location)?;
                                Ok(IrExpr::new(IrKind::Convert(Box::new(call), mem), location))
                            }
                            _ => Ok(call),
                        };
                    }
                    CallTarget::Placeholder => {
                        return Err(CodegenError::UnresolvedCall {
                            name: callee.clone(),
                            location,
                        })
                    }
                }
            }
            ExprKind::Cast { to, expr: inner } => {
                if to.is_void() {
                    return self.value(inner);
                }
                let mem = self.mem_of(to, location)?;
                return Ok(IrExpr::new(
                    IrKind::Convert(Box::new(self.value(inner)?), mem),
                    location,
                ));
            }
            ExprKind::RuntimeEval(call) => {
                let captures = call
                    .captures
                    .iter()
                    .map(|capture| {
                        let place = self.place(capture)?;
                        Ok(IrExpr::new(IrKind::AddrOf(place), capture.location))
                    })
                    .collect::<Lowered<Vec<_>>>()?;
                IrKind::RuntimeEval {
                    interpreter: call.interpreter,
                    text: call.text.clone(),
                    captures,
                    context: call.context,
                }
            }
        };
        Ok(IrExpr::new(kind, location))
    }

    fn load(&mut self, expr: &Expr) -> Lowered<IrExpr> {
        let ty = self.known(expr)?;
        let place = self.place(expr)?;
        let kind = if ty.is_array() {
            IrKind::AddrOf(place)
        } else {
            IrKind::Load(place, self.mem_of(&ty, expr.location)?)
        };
        Ok(IrExpr::new(kind, expr.location))
    }

    fn unary(&mut self, op: UnOp, operand: &Expr, expr: &Expr) -> Lowered<IrExpr> {
        let location = expr.location;
        let kind = match op {
            UnOp::Neg | UnOp::BitNot => {
                let width = self.mem_of(&self.known(expr)?, location)?;
                let value = Box::new(self.value_as(operand, width)?);
                if op == UnOp::Neg {
                    IrKind::Neg(value, width)
                } else {
                    IrKind::BitNot(value, width)
                }
            }
            UnOp::Not => IrKind::Not(Box::new(self.value(operand)?)),
            UnOp::AddrOf => IrKind::AddrOf(self.place(operand)?),
            UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec => {
                let ty = self.known(operand)?;
                let mem = self.mem_of(&ty, location)?;
                let scale = if ty.is_pointer() {
                    Some(self.pointee_size(&ty, location)?)
                } else {
                    None
                };
                IrKind::Update {
                    place: self.place(operand)?,
                    mem,
                    op: if matches!(op, UnOp::PreInc | UnOp::PostInc) {
                        ArithOp::Add
                    } else {
                        ArithOp::Sub
                    },
                    rhs: Box::new(constant(Value::Int(1), location)),
                    scale,
                    post: matches!(op, UnOp::PostInc | UnOp::PostDec),
                }
            }
            UnOp::Deref => return self.load(expr),
        };
        Ok(IrExpr::new(kind, location))
    }

    fn binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, expr: &Expr) -> Lowered<IrExpr> {
        let location = expr.location;
        if matches!(op, BinOp::And | BinOp::Or) {
            let kind = IrKind::Logical {
                and: op == BinOp::And,
                lhs: Box::new(self.value(lhs)?),
                rhs: Box::new(self.value(rhs)?),
            };
            return Ok(IrExpr::new(kind, location));
        }
        if op.is_comparison() {
            let kind = IrKind::Compare {
                op: cmp_op(op, location)?,
                lhs: Box::new(self.value(lhs)?),
                rhs: Box::new(self.value(rhs)?),
            };
            return Ok(IrExpr::new(kind, location));
        }

        let lt = self.known(lhs)?.decay();
        let rt = self.known(rhs)?.decay();
        let kind = match op {
            BinOp::Add | BinOp::Sub if lt.is_pointer() && rt.is_pointer() => IrKind::PtrDiff {
                lhs: Box::new(self.value(lhs)?),
                rhs: Box::new(self.value(rhs)?),
                scale: self.pointee_size(&lt, location)?,
            },
            BinOp::Add | BinOp::Sub if lt.is_pointer() || rt.is_pointer() => {
                let (pointer, pointer_ty, offset) = if lt.is_pointer() {
                    (lhs, &lt, rhs)
                } else {
                    (rhs, &rt, lhs)
                };
                let mut offset = self.value_as(offset, MemType::Long)?;
                if op == BinOp::Sub {
                    offset = IrExpr::new(IrKind::Neg(Box::new(offset), MemType::Long), location);
                }
                IrKind::PtrAdd {
                    ptr: Box::new(self.value(pointer)?),
                    offset: Box::new(offset),
                    scale: self.pointee_size(pointer_ty, location)?,
                }
            }
            _ => {
                let width = self.mem_of(&self.known(expr)?, location)?;
                IrKind::Arith {
                    op: arith_op(op, location)?,
                    lhs: Box::new(self.value_as(lhs, width)?),
                    rhs: Box::new(self.value_as(rhs, width)?),
                    width,
                }
            }
        };
        Ok(IrExpr::new(kind, location))
    }
}

fn constant(value: Value, location: SourceLocation) -> IrExpr {
    IrExpr::new(IrKind::Const(value), location)
}

fn arith_op(op: BinOp, location: SourceLocation) -> Lowered<ArithOp> {
    Ok(match op.arithmetic() {
        BinOp::Add => ArithOp::Add,
        BinOp::Sub => ArithOp::Sub,
        BinOp::Mul => ArithOp::Mul,
        BinOp::Div => ArithOp::Div,
        BinOp::Mod => ArithOp::Mod,
        BinOp::BitAnd => ArithOp::BitAnd,
        BinOp::BitOr => ArithOp::BitOr,
        BinOp::BitXor => ArithOp::BitXor,
        BinOp::BitShl => ArithOp::Shl,
        BinOp::BitShr => ArithOp::Shr,
        other => {
            return Err(CodegenError::Unsupported {
                message: format!("'{}' is not an arithmetic operator", other.symbol()),
                location,
            })
        }
    })
}

fn cmp_op(op: BinOp, location: SourceLocation) -> Lowered<CmpOp> {
    Ok(match op {
        BinOp::Eq => CmpOp::Eq,
        BinOp::Ne => CmpOp::Ne,
        BinOp::Lt => CmpOp::Lt,
        BinOp::Le => CmpOp::Le,
        BinOp::Gt => CmpOp::Gt,
        BinOp::Ge => CmpOp::Ge,
        other => {
            return Err(CodegenError::Unsupported {
                message: format!("'{}' is not a comparison", other.symbol()),
                location,
            })
        }
    })
}
