//! Printer from typed expressions back to C text
//!
//! Every variable leaf is replaced by an `@N` marker dereferenced through a
//! pointer of the variable's type, and the variable is appended to the
//! capture list. A variable used twice is captured once.

use super::SubstitutionError;
use crate::parser::ast::{BaseType, Type, UnOp};
use crate::sema::tast::{Expr, ExprKind};
use crate::wrapper::render::{char_literal, string_literal};

#[derive(Default)]
pub(crate) struct CaptureRenderer {
    text: String,
    captures: Vec<Expr>,
}

impl CaptureRenderer {
    pub(crate) fn render(mut self, expr: &Expr) -> Result<(String, Vec<Expr>), SubstitutionError> {
        self.write(expr)?;
        Ok((self.text, self.captures))
    }

    fn capture(&mut self, expr: &Expr, name: &str) -> Result<(), SubstitutionError> {
        if let Some(ty) = expr.known_type().filter(|ty| ty.array_dims.len() > 1) {
            return Err(SubstitutionError::UnsupportedCapture {
                name: name.to_string(),
                ty: ty.clone(),
                location: expr.location,
            });
        }
        let index = match self.captures.iter().position(|c| c.kind == expr.kind) {
            Some(index) => index,
            None => {
                self.captures.push(expr.clone());
                self.captures.len() - 1
            }
        };
        let ty = expr.known_type().cloned().unwrap_or_else(Type::void);
        match ty.array_dims.len() {
            0 if !ty.is_void() => {
                self.text.push_str(&format!("(*({} *)@{})", ty, index));
                Ok(())
            }
            1 => {
                self.text.push_str(&format!("(({})@{})", ty.decay(), index));
                Ok(())
            }
            _ => Err(SubstitutionError::UnsupportedCapture {
                name: name.to_string(),
                ty,
                location: expr.location,
            }),
        }
    }

    fn write(&mut self, expr: &Expr) -> Result<(), SubstitutionError> {
        match &expr.kind {
            ExprKind::IntConst(n) => {
                self.text.push_str(&n.to_string());
                if expr.known_type().is_some_and(|t| t.base == BaseType::Long) {
                    self.text.push('L');
                }
            }
            ExprKind::CharConst(c) => self.text.push_str(&char_literal(*c)),
            ExprKind::Str(s) => self.text.push_str(&string_literal(s)),
            ExprKind::Null => self.text.push_str("NULL"),
            ExprKind::Global(name) => self.capture(expr, name)?,
            ExprKind::Local { name, .. } => self.capture(expr, name)?,
            ExprKind::Unary { op, operand } => {
                self.text.push('(');
                match op {
                    UnOp::PostInc | UnOp::PostDec => {
                        self.write(operand)?;
                        self.text.push_str(if *op == UnOp::PostInc { "++" } else { "--" });
                    }
                    _ => {
                        self.text.push_str(match op {
                            UnOp::Neg => "-",
                            UnOp::Not => "!",
                            UnOp::BitNot => "~",
                            UnOp::PreInc => "++",
                            UnOp::PreDec => "--",
                            UnOp::Deref => "*",
                            _ => "&",
                        });
                        self.write(operand)?;
                    }
                }
                self.text.push(')');
            }
            ExprKind::Binary { op, lhs, rhs } => self.write_binary(lhs, op.symbol(), rhs)?,
            ExprKind::Assign { lhs, rhs } => self.write_binary(lhs, "=", rhs)?,
            ExprKind::CompoundAssign { op, lhs, rhs } => {
                self.write_binary(lhs, &format!("{}=", op.symbol()), rhs)?
            }
            ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                self.text.push('(');
                self.write(cond)?;
                self.text.push_str(" ? ");
                self.write(then_expr)?;
                self.text.push_str(" : ");
                self.write(else_expr)?;
                self.text.push(')');
            }
            ExprKind::Call { callee, args, .. } => {
                self.text.push_str(callee);
                self.text.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.text.push_str(", ");
                    }
                    self.write(arg)?;
                }
                self.text.push(')');
            }
            ExprKind::Index { base, index } => {
                self.write(base)?;
                self.text.push('[');
                self.write(index)?;
                self.text.push(']');
            }
            ExprKind::Member { base, field, arrow } => {
                self.write(base)?;
                self.text.push_str(if *arrow { "->" } else { "." });
                self.text.push_str(field);
            }
            ExprKind::Cast { to, expr: inner } => {
                self.text.push_str(&format!("(({})", to));
                self.write(inner)?;
                self.text.push(')');
            }
            ExprKind::RuntimeEval(_) => {
                return Err(SubstitutionError::Nested {
                    location: expr.location,
                })
            }
        }
        Ok(())
    }

    fn write_binary(&mut self, lhs: &Expr, op: &str, rhs: &Expr) -> Result<(), SubstitutionError> {
        self.text.push('(');
        self.write(lhs)?;
        self.text.push(' ');
        self.text.push_str(op);
        self.text.push(' ');
        self.write(rhs)?;
        self.text.push(')');
        Ok(())
    }
}
