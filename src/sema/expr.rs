//! Expression typing
//!
//! Typing rules:
//! - integer operands promote to `int`, or `long` if either side is `long`
//! - `ptr + int`, `ptr - int` keep the pointer type; `ptr - ptr` is `long`
//! - comparisons and logical operators yield `int`
//! - one-dimensional arrays decay to pointers when used as values
//!
//! Any operand of dependent type makes the enclosing operator dependent.
//! Casts and calls to known functions have a known result type and stop the
//! propagation.

use super::check::{Check, Checker};
use super::tast::{Builtin, CallTarget, Expr, ExprKind, ValueCategory};
use crate::memory::sizeof_type;
use crate::parser::ast::{AstNode, BaseType, BinOp, SourceLocation, Type, UnOp};
use crate::session::{DeclId, DeclKind, LookupFailure, LookupSite, Signature};

fn promoted(ty: &Type) -> Type {
    if ty.base == BaseType::Long {
        Type::long()
    } else {
        Type::int()
    }
}

fn usual_arithmetic(a: &Type, b: &Type) -> Type {
    if a.base == BaseType::Long || b.base == BaseType::Long {
        Type::long()
    } else {
        Type::int()
    }
}

/// Pointers are compatible when they point to the same type, ignoring the
/// pointee's `const`, or when either is `void *`.
fn pointers_compatible(a: &Type, b: &Type) -> bool {
    a.is_void_pointer() || b.is_void_pointer() || a.unqualified() == b.unqualified()
}

impl<'a> Checker<'a> {
    pub(crate) fn check_expr(&mut self, node: &AstNode) -> Check<Expr> {
        use ValueCategory::RValue;
        match node {
            AstNode::IntLiteral(n, loc) => Ok(Expr::new(ExprKind::IntConst(*n as i64), Type::int(), RValue, *loc)),
            AstNode::LongLiteral(n, loc) => Ok(Expr::new(ExprKind::IntConst(*n), Type::long(), RValue, *loc)),
            AstNode::CharLiteral(c, loc) => Ok(Expr::new(ExprKind::CharConst(*c), Type::char(), RValue, *loc)),
            AstNode::StringLiteral(s, loc) => Ok(Expr::new(
                ExprKind::Str(s.clone()),
                Type::char().with_pointer(),
                RValue,
                *loc,
            )),
            AstNode::Null { location } => Ok(Expr::new(
                ExprKind::Null,
                Type::void().with_pointer(),
                RValue,
                *location,
            )),
            AstNode::Variable(name, loc) => self.check_variable(name, *loc),
            AstNode::Assignment { lhs, rhs, location } => self.check_assignment(lhs, rhs, *location),
            AstNode::CompoundAssignment { lhs, op, rhs, location } => {
                self.check_compound_assignment(op.arithmetic(), lhs, rhs, *location)
            }
            AstNode::BinaryOp { op, left, right, location } => self.check_binary(*op, left, right, *location),
            AstNode::UnaryOp { op, operand, location } => self.check_unary(*op, operand, *location),
            AstNode::TernaryOp {
                condition,
                true_expr,
                false_expr,
                location,
            } => self.check_ternary(condition, true_expr, false_expr, *location),
            AstNode::FunctionCall { name, args, location } => self.check_call(name, args, *location),
            AstNode::ArrayAccess { array, index, location } => self.check_index(array, index, *location),
            AstNode::MemberAccess { object, member, location } => {
                self.check_member(object, member, false, *location)
            }
            AstNode::PointerMemberAccess { object, member, location } => {
                self.check_member(object, member, true, *location)
            }
            AstNode::Cast {
                target_type,
                expr,
                location,
            } => self.check_cast(target_type, expr, *location),
            AstNode::SizeofType { target_type, location } => {
                if target_type.base == BaseType::Void && target_type.pointer_depth == 0 {
                    return Err(self.error("invalid application of 'sizeof' to type 'void'", *location));
                }
                match sizeof_type(target_type, self.session.symbols()) {
                    Some(size) => Ok(self.size_constant(size, *location)),
                    None => Err(self.error(
                        format!("invalid application of 'sizeof' to incomplete type '{}'", target_type),
                        *location,
                    )),
                }
            }
            AstNode::SizeofExpr { expr, location } => {
                let operand = self.check_expr(expr)?;
                let Some(ty) = operand.known_type().cloned() else {
                    return Err(self.error(
                        "cannot take the size of an expression resolved at run time",
                        *location,
                    ));
                };
                match sizeof_type(&ty, self.session.symbols()) {
                    Some(size) if !ty.is_void() => Ok(self.size_constant(size, *location)),
                    _ => Err(self.error(
                        format!("invalid application of 'sizeof' to type '{}'", ty),
                        *location,
                    )),
                }
            }
            AstNode::InitList { location, .. } => {
                Err(self.error("initializer list is not an expression", *location))
            }
            other => Err(self.error("expected expression", *other.location())),
        }
    }

    fn size_constant(&self, size: usize, location: SourceLocation) -> Expr {
        Expr::new(
            ExprKind::IntConst(size as i64),
            Type::long(),
            ValueCategory::RValue,
            location,
        )
    }

    /// Type of `expr` as a value (after array decay), or `None` if dependent
    pub(crate) fn value_type(&mut self, expr: &Expr) -> Check<Option<Type>> {
        match expr.known_type() {
            None => Ok(None),
            Some(ty) if ty.array_dims.len() > 1 => Err(self.error(
                format!("multi-dimensional array of type '{}' cannot be used as a value", ty),
                expr.location,
            )),
            Some(ty) => Ok(Some(ty.decay())),
        }
    }

    /// Check that `value` may initialize or be assigned to an object of `target` type.
    pub(crate) fn check_assignable(
        &mut self,
        target: &Type,
        value: &Expr,
        context: &str,
        location: SourceLocation,
    ) -> Check<()> {
        let Some(source) = self.value_type(value)? else {
            return Ok(());
        };

        if target.is_integer() && source.is_integer() {
            return Ok(());
        }
        if target.is_pointer() {
            if value.is_null_constant() && !source.is_pointer() {
                return Ok(());
            }
            if source.is_pointer() && pointers_compatible(target, &source) {
                if source.is_const && !target.is_const && !source.is_void_pointer() {
                    self.warning(
                        format!("{} '{}' to '{}' discards const qualifier", context, source, target),
                        location,
                    );
                }
                return Ok(());
            }
        }
        if target.is_struct() && source.unqualified() == target.unqualified() {
            return Ok(());
        }

        Err(self.error(
            format!("incompatible types when {} '{}' to '{}'", context, source, target),
            location,
        ))
    }

    fn check_modifiable(&mut self, target: &Expr) -> Check<Type> {
        let Some(ty) = target.known_type().cloned() else {
            return Ok(Type::void());
        };
        if !target.is_lvalue() {
            return Err(self.error("expression is not assignable", target.location));
        }
        if ty.is_array() {
            return Err(self.error(
                format!("array type '{}' is not assignable", ty),
                target.location,
            ));
        }
        if ty.is_const && !ty.is_pointer() {
            return Err(self.error(
                format!("cannot assign to an object of const-qualified type '{}'", ty),
                target.location,
            ));
        }
        Ok(ty)
    }

    fn check_variable(&mut self, name: &str, location: SourceLocation) -> Check<Expr> {
        if let Some((id, ty)) = self.lookup_local(name) {
            let ty = ty.clone();
            return Ok(Expr::new(
                ExprKind::Local {
                    id,
                    name: name.to_string(),
                },
                ty,
                ValueCategory::LValue,
                location,
            ));
        }
        match self.session.symbols().lookup(name).map(|d| d.kind.clone()) {
            Some(DeclKind::Variable { ty }) => Ok(Expr::new(
                ExprKind::Global(name.to_string()),
                ty,
                ValueCategory::LValue,
                location,
            )),
            Some(DeclKind::Function { .. }) | Some(DeclKind::HostFunction { .. }) => Err(self.error(
                format!("function '{}' cannot be used as a value", name),
                location,
            )),
            _ => Err(self.error(format!("use of undeclared identifier '{}'", name), location)),
        }
    }

    fn check_assignment(&mut self, lhs: &AstNode, rhs: &AstNode, location: SourceLocation) -> Check<Expr> {
        let lhs = self.check_expr(lhs);
        let rhs = self.check_expr(rhs);
        let (lhs, rhs) = (lhs?, rhs?);
        if lhs.ty.is_dependent() || rhs.ty.is_dependent() {
            return Ok(Expr::dependent(
                ExprKind::Assign {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                location,
            ));
        }
        let target = self.check_modifiable(&lhs)?;
        self.check_assignable(&target, &rhs, "assigning", location)?;
        Ok(Expr::new(
            ExprKind::Assign {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            target,
            ValueCategory::RValue,
            location,
        ))
    }

    fn check_compound_assignment(
        &mut self,
        op: BinOp,
        lhs: &AstNode,
        rhs: &AstNode,
        location: SourceLocation,
    ) -> Check<Expr> {
        let lhs = self.check_expr(lhs);
        let rhs = self.check_expr(rhs);
        let (lhs, rhs) = (lhs?, rhs?);
        if lhs.ty.is_dependent() || rhs.ty.is_dependent() {
            return Ok(Expr::dependent(
                ExprKind::CompoundAssign {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                location,
            ));
        }
        let target = self.check_modifiable(&lhs)?;
        let source = self.value_type(&rhs)?.unwrap_or_else(Type::int);
        let valid = if target.is_pointer() {
            matches!(op, BinOp::Add | BinOp::Sub) && source.is_integer() && !target.is_void_pointer()
        } else {
            target.is_integer() && source.is_integer()
        };
        if !valid {
            return Err(self.error(
                format!(
                    "invalid operands to '{}=' ('{}' and '{}')",
                    op.symbol(),
                    target,
                    source
                ),
                location,
            ));
        }
        Ok(Expr::new(
            ExprKind::CompoundAssign {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            target,
            ValueCategory::RValue,
            location,
        ))
    }

    fn check_binary(&mut self, op: BinOp, left: &AstNode, right: &AstNode, location: SourceLocation) -> Check<Expr> {
        let lhs = self.check_expr(left);
        let rhs = self.check_expr(right);
        let (lhs, rhs) = (lhs?, rhs?);
        let lt = self.value_type(&lhs)?;
        let rt = self.value_type(&rhs)?;
        let kind = |lhs: Expr, rhs: Expr| ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        };
        let (Some(lt), Some(rt)) = (lt, rt) else {
            return Ok(Expr::dependent(kind(lhs, rhs), location));
        };

        let invalid = |this: &mut Self| {
            Err(this.error(
                format!("invalid operands to binary expression ('{}' {} '{}')", lt, op.symbol(), rt),
                location,
            ))
        };

        let result = match op {
            BinOp::Add | BinOp::Sub => {
                if lt.is_integer() && rt.is_integer() {
                    usual_arithmetic(&lt, &rt)
                } else if lt.is_pointer() && rt.is_integer() {
                    self.check_pointer_arithmetic(&lt, location)?;
                    lt.clone()
                } else if op == BinOp::Add && lt.is_integer() && rt.is_pointer() {
                    self.check_pointer_arithmetic(&rt, location)?;
                    rt.clone()
                } else if op == BinOp::Sub && lt.is_pointer() && rt.is_pointer() {
                    if lt.unqualified() != rt.unqualified() {
                        return invalid(self);
                    }
                    self.check_pointer_arithmetic(&lt, location)?;
                    Type::long()
                } else {
                    return invalid(self);
                }
            }
            BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                if !(lt.is_integer() && rt.is_integer()) {
                    return invalid(self);
                }
                usual_arithmetic(&lt, &rt)
            }
            BinOp::BitShl | BinOp::BitShr => {
                if !(lt.is_integer() && rt.is_integer()) {
                    return invalid(self);
                }
                promoted(&lt)
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let ok = (lt.is_integer() && rt.is_integer())
                    || (lt.is_pointer() && rt.is_pointer() && pointers_compatible(&lt, &rt))
                    || (lt.is_pointer() && rhs.is_null_constant())
                    || (rt.is_pointer() && lhs.is_null_constant());
                if !ok {
                    return invalid(self);
                }
                Type::int()
            }
            BinOp::And | BinOp::Or => {
                if !(lt.is_scalar() && rt.is_scalar()) {
                    return invalid(self);
                }
                Type::int()
            }
            _ => return invalid(self),
        };

        Ok(Expr::new(kind(lhs, rhs), result, ValueCategory::RValue, location))
    }

    fn check_pointer_arithmetic(&mut self, pointer: &Type, location: SourceLocation) -> Check<()> {
        let pointee = pointer.pointee();
        if pointer.is_void_pointer() || sizeof_type(&pointee, self.session.symbols()).is_none() {
            return Err(self.error(
                format!("arithmetic on a pointer to incomplete type '{}'", pointee),
                location,
            ));
        }
        Ok(())
    }

    fn check_unary(&mut self, op: UnOp, operand: &AstNode, location: SourceLocation) -> Check<Expr> {
        let operand = self.check_expr(operand)?;
        if operand.ty.is_dependent() {
            return Ok(Expr::dependent(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                location,
            ));
        }

        let (ty, category) = match op {
            UnOp::Neg | UnOp::BitNot => {
                let vt = self.value_type(&operand)?.unwrap_or_else(Type::void);
                if !vt.is_integer() {
                    return Err(self.error(
                        format!("invalid argument type '{}' to unary expression", vt),
                        location,
                    ));
                }
                (promoted(&vt), ValueCategory::RValue)
            }
            UnOp::Not => {
                let vt = self.value_type(&operand)?.unwrap_or_else(Type::void);
                if !vt.is_scalar() {
                    return Err(self.error(
                        format!("invalid argument type '{}' to unary expression", vt),
                        location,
                    ));
                }
                (Type::int(), ValueCategory::RValue)
            }
            UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec => {
                let ty = self.check_modifiable(&operand)?;
                if !ty.is_scalar() {
                    return Err(self.error(
                        format!("cannot increment value of type '{}'", ty),
                        location,
                    ));
                }
                if ty.is_pointer() {
                    self.check_pointer_arithmetic(&ty, location)?;
                }
                (ty, ValueCategory::RValue)
            }
            UnOp::Deref => {
                let vt = self.value_type(&operand)?.unwrap_or_else(Type::void);
                if !vt.is_pointer() || vt.is_void_pointer() {
                    return Err(self.error(
                        format!("indirection requires pointer operand ('{}' invalid)", vt),
                        location,
                    ));
                }
                (vt.pointee(), ValueCategory::LValue)
            }
            UnOp::AddrOf => {
                if !operand.is_lvalue() {
                    return Err(self.error("cannot take the address of an rvalue", location));
                }
                let ty = operand.known_type().cloned().unwrap_or_else(Type::void);
                if ty.is_array() {
                    return Err(self.error(
                        format!("taking the address of an array of type '{}' is not supported", ty),
                        location,
                    ));
                }
                (ty.address_of(), ValueCategory::RValue)
            }
        };

        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            ty,
            category,
            location,
        ))
    }

    fn check_ternary(
        &mut self,
        condition: &AstNode,
        true_expr: &AstNode,
        false_expr: &AstNode,
        location: SourceLocation,
    ) -> Check<Expr> {
        let cond = self.check_expr(condition);
        let then_expr = self.check_expr(true_expr);
        let else_expr = self.check_expr(false_expr);
        let (cond, then_expr, else_expr) = (cond?, then_expr?, else_expr?);
        let dependent = cond.ty.is_dependent() || then_expr.ty.is_dependent() || else_expr.ty.is_dependent();

        let result = if dependent {
            None
        } else {
            let ct = self.value_type(&cond)?.unwrap_or_else(Type::void);
            if !ct.is_scalar() {
                return Err(self.error(
                    format!("used type '{}' where a scalar is required", ct),
                    cond.location,
                ));
            }
            let tt = self.value_type(&then_expr)?.unwrap_or_else(Type::void);
            let et = self.value_type(&else_expr)?.unwrap_or_else(Type::void);
            let ty = if tt.is_integer() && et.is_integer() {
                usual_arithmetic(&tt, &et)
            } else if tt.is_pointer() && (et.is_pointer() || else_expr.is_null_constant()) {
                if et.is_pointer() && !pointers_compatible(&tt, &et) {
                    return Err(self.error(
                        format!("pointer type mismatch ('{}' and '{}')", tt, et),
                        location,
                    ));
                }
                if tt.is_void_pointer() && et.is_pointer() {
                    et
                } else {
                    tt
                }
            } else if et.is_pointer() && then_expr.is_null_constant() {
                et
            } else if tt.unqualified() == et.unqualified() {
                tt
            } else {
                return Err(self.error(
                    format!("incompatible operand types ('{}' and '{}')", tt, et),
                    location,
                ));
            };
            Some(ty)
        };

        let kind = ExprKind::Ternary {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        };
        Ok(match result {
            Some(ty) => Expr::new(kind, ty, ValueCategory::RValue, location),
            None => Expr::dependent(kind, location),
        })
    }

    fn check_index(&mut self, array: &AstNode, index: &AstNode, location: SourceLocation) -> Check<Expr> {
        let base = self.check_expr(array);
        let index = self.check_expr(index);
        let (base, index) = (base?, index?);
        let kind = |base: Expr, index: Expr| ExprKind::Index {
            base: Box::new(base),
            index: Box::new(index),
        };
        if base.ty.is_dependent() || index.ty.is_dependent() {
            return Ok(Expr::dependent(kind(base, index), location));
        }

        let it = self.value_type(&index)?.unwrap_or_else(Type::void);
        if !it.is_integer() {
            return Err(self.error("array subscript is not an integer", index.location));
        }
        let bt = base.known_type().cloned().unwrap_or_else(Type::void);
        let element = if bt.is_array() {
            bt.element()
        } else if bt.is_pointer() && !bt.is_void_pointer() {
            bt.pointee()
        } else {
            return Err(self.error(
                format!("subscripted value of type '{}' is not an array or pointer", bt),
                location,
            ));
        };
        Ok(Expr::new(kind(base, index), element, ValueCategory::LValue, location))
    }

    fn check_member(
        &mut self,
        object: &AstNode,
        member: &str,
        arrow: bool,
        location: SourceLocation,
    ) -> Check<Expr> {
        let base = self.check_expr(object)?;
        let kind = |base: Expr| ExprKind::Member {
            base: Box::new(base),
            field: member.to_string(),
            arrow,
        };
        if base.ty.is_dependent() {
            return Ok(Expr::dependent(kind(base), location));
        }

        let bt = base.known_type().cloned().unwrap_or_else(Type::void);
        let tag = if arrow {
            let pointer = bt.decay();
            match pointer.struct_name() {
                Some(tag) if pointer.is_pointer() && pointer.pointer_depth == 1 => tag.to_string(),
                _ => {
                    return Err(self.error(
                        format!("member reference type '{}' is not a pointer to a struct", bt),
                        location,
                    ))
                }
            }
        } else {
            match bt.struct_name() {
                Some(tag) if bt.is_struct() => tag.to_string(),
                _ => {
                    return Err(self.error(
                        format!("member reference base type '{}' is not a structure", bt),
                        location,
                    ))
                }
            }
        };
        if !arrow && !base.is_lvalue() {
            return Err(self.error("member access on a struct rvalue is not supported", location));
        }

        let Some(def) = self.session.symbols().lookup_struct(&tag).cloned() else {
            return Err(self.error(format!("incomplete definition of type 'struct {}'", tag), location));
        };
        let Some(field) = def.fields.iter().find(|f| f.name == member) else {
            return Err(self.error(
                format!("no member named '{}' in 'struct {}'", member, tag),
                location,
            ));
        };
        let mut ty = field.field_type.clone();
        ty.is_const |= bt.is_const;
        Ok(Expr::new(kind(base), ty, ValueCategory::LValue, location))
    }

    fn check_cast(&mut self, to: &Type, expr: &AstNode, location: SourceLocation) -> Check<Expr> {
        let operand = self.check_expr(expr)?;
        if !to.is_void() && !to.is_scalar() {
            return Err(self.error(format!("cannot cast to non-scalar type '{}'", to), location));
        }
        if !to.is_void() && !operand.ty.is_dependent() {
            let from = self.value_type(&operand)?.unwrap_or_else(Type::void);
            if !from.is_scalar() {
                return Err(self.error(
                    format!("operand of type '{}' cannot be cast to '{}'", from, to),
                    location,
                ));
            }
        }
        Ok(Expr::new(
            ExprKind::Cast {
                to: to.clone(),
                expr: Box::new(operand),
            },
            to.clone(),
            ValueCategory::RValue,
            location,
        ))
    }

    // ===== Calls =====

    fn check_call(&mut self, name: &str, args: &[AstNode], location: SourceLocation) -> Check<Expr> {
        let checked: Vec<Check<Expr>> = args.iter().map(|arg| self.check_expr(arg)).collect();
        let args = checked.into_iter().collect::<Check<Vec<Expr>>>()?;

        if let Some((_, ty)) = self.lookup_local(name) {
            let ty = ty.clone();
            return self.not_a_function(name, &ty, location);
        }

        let declared = self.session.symbols().lookup(name).map(|d| d.kind.clone());
        match declared {
            Some(DeclKind::Function { defined: false, .. }) if name == "printf" => {
                self.check_printf(args, location)
            }
            Some(DeclKind::Function { signature, .. }) => {
                self.typed_call(name, &signature, args, CallTarget::Function, location)
            }
            Some(DeclKind::HostFunction { signature }) => {
                self.typed_call(name, &signature, args, CallTarget::Host, location)
            }
            Some(DeclKind::Placeholder) => Ok(self.placeholder_call(name, args, location)),
            Some(DeclKind::Variable { ty }) => self.not_a_function(name, &ty, location),
            _ if name == "printf" => self.check_printf(args, location),
            _ => {
                match self.offer_to_hook(name, LookupFailure::NotFound, location) {
                    Some(id) => self.call_resolved_by_hook(name, id, args, location),
                    None => Err(self.error(
                        format!("call to undeclared function '{}'", name),
                        location,
                    )),
                }
            }
        }
    }

    fn not_a_function(&mut self, name: &str, ty: &Type, location: SourceLocation) -> Check<Expr> {
        Err(self.error(
            format!("called object '{}' of type '{}' is not a function", name, ty),
            location,
        ))
    }

    fn call_resolved_by_hook(
        &mut self,
        name: &str,
        id: DeclId,
        args: Vec<Expr>,
        location: SourceLocation,
    ) -> Check<Expr> {
        match self.session.symbols().get(id).map(|d| d.kind.clone()) {
            Some(DeclKind::Placeholder) => Ok(self.placeholder_call(name, args, location)),
            Some(DeclKind::HostFunction { signature }) => {
                self.typed_call(name, &signature, args, CallTarget::Host, location)
            }
            _ => Err(self.error(format!("call to undeclared function '{}'", name), location)),
        }
    }

    /// Let the lookup hook resolve `name`. Only statement bodies consult it.
    fn offer_to_hook(&mut self, name: &str, failure: LookupFailure, location: SourceLocation) -> Option<DeclId> {
        let scope = self.function.as_ref()?;
        if !scope.is_statement_body {
            return None;
        }
        let site = LookupSite {
            function: &scope.name,
            fragment: self.fragment,
            location,
        };
        self.hook
            .on_failed_lookup(name, failure, &site, self.session.symbols_mut())
    }

    fn placeholder_call(&self, name: &str, args: Vec<Expr>, location: SourceLocation) -> Expr {
        Expr::dependent(
            ExprKind::Call {
                callee: name.to_string(),
                args,
                target: CallTarget::Placeholder,
            },
            location,
        )
    }

    fn typed_call(
        &mut self,
        name: &str,
        signature: &Signature,
        args: Vec<Expr>,
        target: CallTarget,
        location: SourceLocation,
    ) -> Check<Expr> {
        let arity_ok = if signature.variadic {
            args.len() >= signature.params.len()
        } else {
            args.len() == signature.params.len()
        };
        if !arity_ok {
            return Err(self.error(
                format!(
                    "function '{}' expects {} argument(s), got {}",
                    name,
                    signature.params.len(),
                    args.len()
                ),
                location,
            ));
        }
        for (param, arg) in signature.params.iter().zip(&args) {
            self.check_assignable(param, arg, "passing", arg.location)?;
        }
        for arg in args.iter().skip(signature.params.len()) {
            self.check_variadic_argument(arg)?;
        }
        Ok(Expr::new(
            ExprKind::Call {
                callee: name.to_string(),
                args,
                target,
            },
            signature.return_type.clone(),
            ValueCategory::RValue,
            location,
        ))
    }

    fn check_printf(&mut self, args: Vec<Expr>, location: SourceLocation) -> Check<Expr> {
        let Some(format) = args.first() else {
            return Err(self.error("printf requires a format string", location));
        };
        if let Some(ty) = self.value_type(format)? {
            if !(ty.is_pointer() && ty.pointer_depth == 1 && ty.base == BaseType::Char) {
                return Err(self.error(
                    format!("printf format must be a 'char *', not '{}'", ty),
                    format.location,
                ));
            }
        }
        for arg in &args[1..] {
            self.check_variadic_argument(arg)?;
        }
        Ok(Expr::new(
            ExprKind::Call {
                callee: "printf".to_string(),
                args,
                target: CallTarget::Builtin(Builtin::Printf),
            },
            Type::int(),
            ValueCategory::RValue,
            location,
        ))
    }

    fn check_variadic_argument(&mut self, arg: &Expr) -> Check<()> {
        if let Some(ty) = self.value_type(arg)? {
            if !ty.is_scalar() {
                return Err(self.error(
                    format!("cannot pass a value of type '{}' through '...'", ty),
                    arg.location,
                ));
            }
        }
        Ok(())
    }
}
