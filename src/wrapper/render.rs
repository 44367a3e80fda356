//! C source printer for parsed expressions
//!
//! Used when a declaration has to be re-emitted piecewise (one declarator or
//! one array element at a time). Every compound sub-expression is
//! parenthesized, so the output never depends on operator precedence.

use crate::parser::ast::{AstNode, BinOp, UnOp};

pub(crate) fn expression(node: &AstNode) -> String {
    let mut out = String::new();
    write_expr(&mut out, node);
    out
}

/// Whether `node` can be evaluated without reading any variable, calling
/// any function or trapping. Arithmetic only counts when its operands fold
/// to an `int` without overflow or division by zero.
pub(crate) fn is_constant(node: &AstNode) -> bool {
    match node {
        AstNode::IntLiteral(..)
        | AstNode::LongLiteral(..)
        | AstNode::CharLiteral(..)
        | AstNode::StringLiteral(..)
        | AstNode::Null { .. }
        | AstNode::SizeofType { .. } => true,
        AstNode::UnaryOp { op: UnOp::Neg, .. } => fold(node).is_some(),
        AstNode::UnaryOp { op, operand, .. } => {
            matches!(op, UnOp::Not | UnOp::BitNot) && is_constant(operand)
        }
        AstNode::BinaryOp { op, .. } if can_trap(*op) => fold(node).is_some(),
        AstNode::BinaryOp { left, right, .. } => is_constant(left) && is_constant(right),
        AstNode::Cast { expr, .. } => is_constant(expr),
        AstNode::TernaryOp {
            condition,
            true_expr,
            false_expr,
            ..
        } => is_constant(condition) && is_constant(true_expr) && is_constant(false_expr),
        AstNode::InitList { items, .. } => items.iter().all(is_constant),
        _ => false,
    }
}

fn can_trap(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::BitShl | BinOp::BitShr
    )
}

/// Evaluate an `int` expression over literals, or `None` if it reads
/// anything else or would trap at run time.
fn fold(node: &AstNode) -> Option<i32> {
    match node {
        AstNode::IntLiteral(n, _) => Some(*n),
        AstNode::CharLiteral(c, _) => Some(*c as i32),
        AstNode::UnaryOp { op, operand, .. } => {
            let v = fold(operand)?;
            match op {
                UnOp::Neg => v.checked_neg(),
                UnOp::Not => Some((v == 0) as i32),
                UnOp::BitNot => Some(!v),
                _ => None,
            }
        }
        AstNode::BinaryOp {
            op, left, right, ..
        } => {
            let (a, b) = (fold(left)?, fold(right)?);
            match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => a.checked_div(b),
                BinOp::Mod => a.checked_rem(b),
                BinOp::BitShl => u32::try_from(b).ok().and_then(|b| a.checked_shl(b)),
                BinOp::BitShr => u32::try_from(b).ok().and_then(|b| a.checked_shr(b)),
                BinOp::Eq => Some((a == b) as i32),
                BinOp::Ne => Some((a != b) as i32),
                BinOp::Lt => Some((a < b) as i32),
                BinOp::Le => Some((a <= b) as i32),
                BinOp::Gt => Some((a > b) as i32),
                BinOp::Ge => Some((a >= b) as i32),
                BinOp::And => Some((a != 0 && b != 0) as i32),
                BinOp::Or => Some((a != 0 || b != 0) as i32),
                BinOp::BitAnd => Some(a & b),
                BinOp::BitOr => Some(a | b),
                BinOp::BitXor => Some(a ^ b),
                _ => None,
            }
        }
        _ => None,
    }
}

fn write_expr(out: &mut String, node: &AstNode) {
    match node {
        AstNode::IntLiteral(n, _) => out.push_str(&n.to_string()),
        AstNode::LongLiteral(n, _) => {
            out.push_str(&n.to_string());
            out.push('L');
        }
        AstNode::CharLiteral(c, _) => out.push_str(&char_literal(*c)),
        AstNode::StringLiteral(s, _) => out.push_str(&string_literal(s)),
        AstNode::Null { .. } => out.push_str("NULL"),
        AstNode::Variable(name, _) => out.push_str(name),
        AstNode::Assignment { lhs, rhs, .. } => write_binary(out, lhs, "=", rhs),
        AstNode::CompoundAssignment { lhs, op, rhs, .. } => write_binary(out, lhs, op.symbol(), rhs),
        AstNode::BinaryOp { op, left, right, .. } => write_binary(out, left, op.symbol(), right),
        AstNode::UnaryOp { op, operand, .. } => {
            out.push('(');
            match op {
                UnOp::PostInc | UnOp::PostDec => {
                    write_expr(out, operand);
                    out.push_str(if *op == UnOp::PostInc { "++" } else { "--" });
                }
                _ => {
                    out.push_str(match op {
                        UnOp::Neg => "-",
                        UnOp::Not => "!",
                        UnOp::BitNot => "~",
                        UnOp::PreInc => "++",
                        UnOp::PreDec => "--",
                        UnOp::Deref => "*",
                        _ => "&",
                    });
                    write_expr(out, operand);
                }
            }
            out.push(')');
        }
        AstNode::TernaryOp {
            condition,
            true_expr,
            false_expr,
            ..
        } => {
            out.push('(');
            write_expr(out, condition);
            out.push_str(" ? ");
            write_expr(out, true_expr);
            out.push_str(" : ");
            write_expr(out, false_expr);
            out.push(')');
        }
        AstNode::FunctionCall { name, args, .. } => {
            out.push_str(name);
            out.push('(');
            write_list(out, args);
            out.push(')');
        }
        AstNode::ArrayAccess { array, index, .. } => {
            write_expr(out, array);
            out.push('[');
            write_expr(out, index);
            out.push(']');
        }
        AstNode::MemberAccess { object, member, .. } => {
            write_expr(out, object);
            out.push('.');
            out.push_str(member);
        }
        AstNode::PointerMemberAccess { object, member, .. } => {
            write_expr(out, object);
            out.push_str("->");
            out.push_str(member);
        }
        AstNode::Cast { target_type, expr, .. } => {
            out.push_str(&format!("(({})", target_type));
            write_expr(out, expr);
            out.push(')');
        }
        AstNode::SizeofType { target_type, .. } => out.push_str(&format!("sizeof({})", target_type)),
        AstNode::SizeofExpr { expr, .. } => {
            out.push_str("sizeof(");
            write_expr(out, expr);
            out.push(')');
        }
        AstNode::InitList { items, .. } => {
            out.push('{');
            write_list(out, items);
            out.push('}');
        }
        // Statements never appear in expression position
        _ => {}
    }
}

fn write_binary(out: &mut String, lhs: &AstNode, op: &str, rhs: &AstNode) {
    out.push('(');
    write_expr(out, lhs);
    out.push(' ');
    out.push_str(op);
    out.push(' ');
    write_expr(out, rhs);
    out.push(')');
}

fn write_list(out: &mut String, items: &[AstNode]) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_expr(out, item);
    }
}

pub(crate) fn char_literal(c: i8) -> String {
    match c as u8 {
        b'\n' => "'\\n'".to_string(),
        b'\t' => "'\\t'".to_string(),
        b'\r' => "'\\r'".to_string(),
        b'\\' => "'\\\\'".to_string(),
        b'\'' => "'\\''".to_string(),
        0 => "'\\0'".to_string(),
        byte @ 0x20..=0x7e => format!("'{}'", byte as char),
        byte => format!("'\\x{:02x}'", byte),
    }
}

pub(crate) fn string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn parse_expr(text: &str) -> AstNode {
        let source = format!("void f(void) {{ {}; }}", text);
        let program = Parser::new(&source).unwrap().parse_program().unwrap();
        match &program.nodes[0] {
            AstNode::FunctionDef { body: Some(body), .. } => match &body[0] {
                AstNode::ExpressionStatement { expr, .. } => (**expr).clone(),
                other => panic!("unexpected statement {:?}", other),
            },
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_render_parenthesizes_compound_expressions() {
        assert_eq!(expression(&parse_expr("a + b * c")), "(a + (b * c))");
        assert_eq!(expression(&parse_expr("*p++")), "(*(p++))");
        assert_eq!(expression(&parse_expr("s->x[i].y")), "s->x[i].y");
        assert_eq!(expression(&parse_expr("(long)f(1, 'a')")), "((long)f(1, 'a'))");
    }

    #[test]
    fn test_render_escapes_literals() {
        assert_eq!(expression(&parse_expr("\"a\\n\\\"b\\\"\"")), "\"a\\n\\\"b\\\"\"");
        assert_eq!(expression(&parse_expr("'\\''")), "'\\''");
        assert_eq!(expression(&parse_expr("'\\x01'")), "'\\x01'");
    }

    #[test]
    fn test_constant_detection() {
        assert!(is_constant(&parse_expr("-(3 + 4) * 2")));
        assert!(is_constant(&parse_expr("(char)65")));
        assert!(is_constant(&parse_expr("sizeof(int) == 4")));
        assert!(!is_constant(&parse_expr("1 / 0")));
        assert!(!is_constant(&parse_expr("7 % (2 - 2)")));
        assert!(!is_constant(&parse_expr("2147483647 + 1")));
        assert!(!is_constant(&parse_expr("1 << 40")));
        assert!(!is_constant(&parse_expr("(char)(1 / 0)")));
        assert!(!is_constant(&parse_expr("x + 1")));
        assert!(!is_constant(&parse_expr("f()")));
    }
}
