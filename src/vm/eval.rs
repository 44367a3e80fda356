//! Expression evaluation
//!
//! Adds `impl Machine` methods that evaluate IR expressions to [`Value`]s.
//! Arithmetic is checked: a result that does not fit the operation's width
//! is an [`RuntimeError::IntegerOverflow`], never a silent wrap.

use super::{Ctx, Machine, RuntimeError};
use crate::codegen::ir::{ArithOp, CmpOp, Expr, ExprKind, InitStore, Place};
use crate::deferred::DeferredRequest;
use crate::memory::value::{Address, Value};
use crate::memory::{pointer_add, pointer_diff, MemType, StructTable};
use crate::parser::ast::SourceLocation;
use tracing::debug;

impl Machine {
    pub(crate) fn eval(&mut self, expr: &Expr, ctx: &mut Ctx<'_>) -> Result<Value, RuntimeError> {
        let location = expr.location;
        match &expr.kind {
            ExprKind::Const(value) => Ok(value.clone()),
            ExprKind::Str(index) => Ok(Value::Pointer(self.string_address(ctx, *index, location)?)),
            ExprKind::Load(place, mem) => {
                let address = self.address_of(place, ctx, location)?;
                self.read_at(address, *mem, location)
            }
            ExprKind::AddrOf(place) => Ok(Value::Pointer(self.address_of(place, ctx, location)?)),
            ExprKind::Neg(operand, width) => {
                let value = self.eval_integer(operand, ctx)?;
                negate(value, *width, location)
            }
            ExprKind::BitNot(operand, width) => {
                let value = self.eval_integer(operand, ctx)?;
                Ok(Value::from_i64(!value, *width))
            }
            ExprKind::Not(operand) => {
                let value = self.eval(operand, ctx)?;
                Ok(bool_value(!truth(&value, location)?))
            }
            ExprKind::Arith {
                op,
                lhs,
                rhs,
                width,
            } => {
                let a = self.eval_integer(lhs, ctx)?;
                let b = self.eval_integer(rhs, ctx)?;
                arith(*op, a, b, *width, location)
            }
            ExprKind::Compare { op, lhs, rhs } => {
                let a = self.eval_integer(lhs, ctx)?;
                let b = self.eval_integer(rhs, ctx)?;
                Ok(bool_value(compare(*op, a, b)))
            }
            ExprKind::Logical { and, lhs, rhs } => {
                let left = truth(&self.eval(lhs, ctx)?, location)?;
                if left != *and {
                    return Ok(bool_value(left));
                }
                let right = truth(&self.eval(rhs, ctx)?, location)?;
                Ok(bool_value(right))
            }
            ExprKind::PtrAdd { ptr, offset, scale } => {
                let base = self.eval(ptr, ctx)?;
                let base = pointer_of(&base, location)?;
                let offset = self.eval_integer(offset, ctx)?;
                Ok(Value::from_i64(
                    pointer_add(base, offset, *scale) as i64,
                    MemType::Ptr,
                ))
            }
            ExprKind::PtrDiff { lhs, rhs, scale } => {
                let a = self.eval(lhs, ctx)?;
                let b = self.eval(rhs, ctx)?;
                Ok(Value::Long(pointer_diff(
                    pointer_of(&a, location)?,
                    pointer_of(&b, location)?,
                    *scale,
                )))
            }
            ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                let cond = self.eval(cond, ctx)?;
                if truth(&cond, location)? {
                    self.eval(then_expr, ctx)
                } else {
                    self.eval(else_expr, ctx)
                }
            }
            ExprKind::Convert(inner, mem) => {
                let value = self.eval(inner, ctx)?;
                convert(value, *mem, location)
            }
            ExprKind::Store { place, mem, value } => {
                let address = self.address_of(place, ctx, location)?;
                let value = self.eval(value, ctx)?;
                let stored = convert(value, *mem, location)?;
                self.write_at(address, *mem, &stored, location)?;
                Ok(stored)
            }
            ExprKind::Update {
                place,
                mem,
                op,
                rhs,
                scale,
                post,
            } => {
                let address = self.address_of(place, ctx, location)?;
                let old = self.read_at(address, *mem, location)?;
                let rhs = self.eval(rhs, ctx)?;
                let amount = integer_of(&rhs, location)?;
                let new = match scale {
                    Some(scale) => {
                        let amount = if *op == ArithOp::Sub { -amount } else { amount };
                        let moved = pointer_add(pointer_of(&old, location)?, amount, *scale);
                        Value::from_i64(moved as i64, MemType::Ptr)
                    }
                    None => {
                        let width = if *mem == MemType::Long || matches!(rhs, Value::Long(_)) {
                            MemType::Long
                        } else {
                            MemType::Int
                        };
                        let result = arith(*op, integer_of(&old, location)?, amount, width, location)?;
                        convert(result, *mem, location)?
                    }
                };
                self.write_at(address, *mem, &new, location)?;
                Ok(if *post { old } else { new })
            }
            ExprKind::Call { name, args } => {
                let args = self.eval_args(args, ctx)?;
                self.call_function(name, args, location, ctx)
            }
            ExprKind::HostCall { name, args } => {
                let args = self.eval_args(args, ctx)?;
                self.call_host(name, args, location)
            }
            ExprKind::Printf { args } => {
                let args = self.eval_args(args, ctx)?;
                self.builtin_printf(&args, location)
            }
            ExprKind::RuntimeEval {
                interpreter,
                text,
                captures,
                context,
            } => {
                let mut addresses = Vec::with_capacity(captures.len());
                for capture in captures {
                    let address = self.eval(capture, ctx)?;
                    addresses.push(pointer_of(&address, capture.location)?);
                }
                let request = DeferredRequest {
                    interpreter: *interpreter,
                    text: text.clone(),
                    addresses,
                    context: *context,
                };
                match ctx.host.runtime_evaluate(self, request) {
                    Ok(value) => Ok(value),
                    Err(message) => {
                        debug!(line = location.line, %message, "runtime evaluation failed");
                        // Converts to zero or null wherever the result is consumed
                        Ok(Value::Int(0))
                    }
                }
            }
        }
    }

    fn eval_args(&mut self, args: &[Expr], ctx: &mut Ctx<'_>) -> Result<Vec<Value>, RuntimeError> {
        args.iter().map(|arg| self.eval(arg, ctx)).collect()
    }

    fn eval_integer(&mut self, expr: &Expr, ctx: &mut Ctx<'_>) -> Result<i64, RuntimeError> {
        let value = self.eval(expr, ctx)?;
        integer_of(&value, expr.location)
    }

    pub(crate) fn address_of(
        &mut self,
        place: &Place,
        ctx: &mut Ctx<'_>,
        location: SourceLocation,
    ) -> Result<Address, RuntimeError> {
        match place {
            Place::Global(index) => self.global_slot(ctx, *index, location),
            Place::Local(index) => self
                .memory
                .stack()
                .current_frame()
                .and_then(|frame| frame.local(*index))
                .ok_or(RuntimeError::NoStackFrame { location }),
            Place::Addr(expr) => {
                let value = self.eval(expr, ctx)?;
                pointer_of(&value, location)
            }
        }
    }

    pub(crate) fn read_at(
        &self,
        address: Address,
        mem: MemType,
        location: SourceLocation,
    ) -> Result<Value, RuntimeError> {
        self.memory
            .read(address, mem)
            .map_err(|err| RuntimeError::from_memory(err, location))
    }

    pub(crate) fn write_at(
        &mut self,
        address: Address,
        mem: MemType,
        value: &Value,
        location: SourceLocation,
    ) -> Result<(), RuntimeError> {
        self.memory
            .write(address, mem, value)
            .map_err(|err| RuntimeError::from_memory(err, location))
    }

    /// Evaluate `stores` and write each at its offset from `base`
    pub(crate) fn apply_stores(
        &mut self,
        base: Address,
        stores: &[InitStore],
        ctx: &mut Ctx<'_>,
    ) -> Result<(), RuntimeError> {
        for store in stores {
            let value = self.eval(&store.value, ctx)?;
            let value = convert(value, store.mem, store.value.location)?;
            self.write_at(
                base + store.offset as Address,
                store.mem,
                &value,
                store.value.location,
            )?;
        }
        Ok(())
    }

    fn call_host(
        &mut self,
        name: &str,
        args: Vec<Value>,
        location: SourceLocation,
    ) -> Result<Value, RuntimeError> {
        let function = self
            .host_functions
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UndefinedFunction {
                name: name.to_string(),
                location,
            })?;
        let params = &function.signature.params;
        if args.len() != params.len() && !function.signature.variadic {
            return Err(RuntimeError::ArgumentCountMismatch {
                function: name.to_string(),
                expected: params.len(),
                got: args.len(),
                location,
            });
        }
        let layouts = StructTable::default();
        let mut converted = Vec::with_capacity(args.len());
        for (index, arg) in args.into_iter().enumerate() {
            let mem = params.get(index).and_then(|ty| MemType::of(ty, &layouts));
            converted.push(match mem {
                Some(mem) if mem.is_scalar() => convert(arg, mem, location)?,
                _ => arg,
            });
        }
        function
            .call(&converted)
            .map_err(|message| RuntimeError::HostFunction {
                name: name.to_string(),
                message,
                location,
            })
    }
}

pub(crate) fn bool_value(b: bool) -> Value {
    Value::Int(if b { 1 } else { 0 })
}

pub(crate) fn truth(value: &Value, location: SourceLocation) -> Result<bool, RuntimeError> {
    value.is_truthy().ok_or_else(|| RuntimeError::TypeError {
        expected: "scalar".to_string(),
        got: format!("{:?}", value),
        location,
    })
}

fn integer_of(value: &Value, location: SourceLocation) -> Result<i64, RuntimeError> {
    value.as_i64().ok_or_else(|| RuntimeError::TypeError {
        expected: "integer".to_string(),
        got: format!("{:?}", value),
        location,
    })
}

fn pointer_of(value: &Value, location: SourceLocation) -> Result<Address, RuntimeError> {
    let address = match value {
        Value::Pointer(_) | Value::Null => value.as_pointer(),
        other => other.as_i64().map(|n| n as Address),
    };
    address.ok_or_else(|| RuntimeError::TypeError {
        expected: "pointer".to_string(),
        got: format!("{:?}", value),
        location,
    })
}

/// Convert to `mem`; a failed runtime evaluation stays a failed value
pub(crate) fn convert(value: Value, mem: MemType, location: SourceLocation) -> Result<Value, RuntimeError> {
    if !value.is_initialized() {
        return Ok(value);
    }
    value.convert(mem).ok_or_else(|| RuntimeError::TypeError {
        expected: format!("{:?}", mem),
        got: format!("{:?}", value),
        location,
    })
}

fn negate(value: i64, width: MemType, location: SourceLocation) -> Result<Value, RuntimeError> {
    let overflow = || RuntimeError::IntegerOverflow {
        operation: format!("-({})", value),
        location,
    };
    match width {
        MemType::Long => value.checked_neg().map(Value::Long).ok_or_else(overflow),
        _ => (value as i32)
            .checked_neg()
            .map(|n| Value::from_i64(n as i64, width))
            .ok_or_else(overflow),
    }
}

fn compare(op: CmpOp, a: i64, b: i64) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

/// Integer arithmetic in `width`: 64-bit for `Long`, 32-bit otherwise
pub(crate) fn arith(
    op: ArithOp,
    a: i64,
    b: i64,
    width: MemType,
    location: SourceLocation,
) -> Result<Value, RuntimeError> {
    if matches!(op, ArithOp::Div | ArithOp::Mod) && b == 0 {
        return Err(RuntimeError::DivisionError {
            operation: if op == ArithOp::Div {
                "Division by zero".to_string()
            } else {
                "Modulo by zero".to_string()
            },
            location,
        });
    }
    let overflow = || RuntimeError::IntegerOverflow {
        operation: format!("{} {} {}", a, op.symbol(), b),
        location,
    };
    if width == MemType::Long {
        let result = match op {
            ArithOp::Add => a.checked_add(b),
            ArithOp::Sub => a.checked_sub(b),
            ArithOp::Mul => a.checked_mul(b),
            ArithOp::Div => a.checked_div(b),
            ArithOp::Mod => a.checked_rem(b),
            ArithOp::BitAnd => Some(a & b),
            ArithOp::BitOr => Some(a | b),
            ArithOp::BitXor => Some(a ^ b),
            ArithOp::Shl => u32::try_from(b).ok().and_then(|s| a.checked_shl(s)),
            ArithOp::Shr => u32::try_from(b).ok().and_then(|s| a.checked_shr(s)),
        };
        return result.map(Value::Long).ok_or_else(overflow);
    }

    let (a, b) = (a as i32, b as i32);
    let result = match op {
        ArithOp::Add => a.checked_add(b),
        ArithOp::Sub => a.checked_sub(b),
        ArithOp::Mul => a.checked_mul(b),
        ArithOp::Div => a.checked_div(b),
        ArithOp::Mod => a.checked_rem(b),
        ArithOp::BitAnd => Some(a & b),
        ArithOp::BitOr => Some(a | b),
        ArithOp::BitXor => Some(a ^ b),
        ArithOp::Shl => u32::try_from(b).ok().and_then(|s| a.checked_shl(s)),
        ArithOp::Shr => u32::try_from(b).ok().and_then(|s| a.checked_shr(s)),
    };
    result
        .map(|n| Value::from_i64(n as i64, width))
        .ok_or_else(overflow)
}
