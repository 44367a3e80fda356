//! Implicit result printing
//!
//! When a fragment ends in an expression without `;`, its value is handed to
//! a [`ValuePrinter`] together with [`PrintFlags`] describing the
//! expression's static type. The [`DefaultPrinter`] writes the value as C
//! would spell it, followed by a newline.

use crate::memory::value::Value;
use crate::memory::{field_offset, sizeof_type, MemType, StructDefs};
use crate::parser::ast::Type;
use crate::wrapper::render::char_literal;
use bitflags::bitflags;

bitflags! {
    /// Properties of the printed expression's static type
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PrintFlags: u8 {
        const POINTER = 1 << 0;
        const CONST = 1 << 1;
        /// Object of a class with virtual dispatch; never set for C
        const POLYMORPHIC = 1 << 2;
    }
}

impl PrintFlags {
    pub fn for_type(ty: &Type) -> Self {
        let mut flags = PrintFlags::empty();
        if ty.is_pointer() {
            flags |= PrintFlags::POINTER;
        }
        if ty.is_const {
            flags |= PrintFlags::CONST;
        }
        flags
    }

    /// Flags for a value whose static type was only known at run time
    pub fn for_value(value: &Value) -> Self {
        if value.is_pointer() {
            PrintFlags::POINTER
        } else {
            PrintFlags::empty()
        }
    }
}

/// Everything a printer gets to see about the printed expression
pub struct PrintRequest<'a> {
    pub value: &'a Value,
    /// Static type, `None` when the expression was evaluated at run time
    pub ty: Option<&'a Type>,
    pub flags: PrintFlags,
    /// Source text of the expression
    pub expr: &'a str,
    pub structs: &'a dyn StructDefs,
}

pub trait ValuePrinter {
    /// Append the printed form of `request` to `out`
    fn print_value(&mut self, out: &mut String, request: &PrintRequest<'_>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPrinter;

impl ValuePrinter for DefaultPrinter {
    fn print_value(&mut self, out: &mut String, request: &PrintRequest<'_>) {
        out.push_str(&render_value(request.value, request.ty, request.structs));
        out.push('\n');
    }
}

/// Render `value` of type `ty` the way it would be written in C source
pub fn render_value(value: &Value, ty: Option<&Type>, structs: &dyn StructDefs) -> String {
    match (value, ty) {
        (Value::Bytes(bytes), Some(ty)) if ty.is_array() => {
            let element = ty.element();
            let rendered = decode_elements(bytes, &element, structs);
            aggregate(rendered)
        }
        (Value::Bytes(bytes), Some(ty)) if ty.is_struct() => {
            let def = ty.struct_name().and_then(|tag| structs.struct_def(tag));
            let Some(def) = def else {
                return render_bytes(bytes);
            };
            let mut fields = Vec::with_capacity(def.fields.len());
            for field in &def.fields {
                let decoded = field_offset(def, &field.name, structs).and_then(|(offset, fty)| {
                    let size = sizeof_type(&fty, structs)?;
                    let mem = MemType::of(&fty, structs)?;
                    let chunk = bytes.get(offset..offset + size)?;
                    Some(render_value(&Value::from_bytes(chunk, mem), Some(&fty), structs))
                });
                fields.push(format!(
                    ".{} = {}",
                    field.name,
                    decoded.unwrap_or_else(|| "?".to_string())
                ));
            }
            aggregate(fields)
        }
        (Value::Bytes(bytes), _) => render_bytes(bytes),
        (Value::Char(c), _) => char_literal(*c),
        (Value::Int(n), _) => n.to_string(),
        (Value::Long(n), _) => n.to_string(),
        (Value::Pointer(address), _) => format!("{:#x}", address),
        (Value::Null, _) => "0x0".to_string(),
        (Value::Void, _) | (Value::Uninitialized, _) => String::new(),
    }
}

fn decode_elements(bytes: &[u8], element: &Type, structs: &dyn StructDefs) -> Vec<String> {
    let (Some(size), Some(mem)) = (sizeof_type(element, structs), MemType::of(element, structs)) else {
        return vec![render_bytes(bytes)];
    };
    if size == 0 {
        return Vec::new();
    }
    bytes
        .chunks_exact(size)
        .map(|chunk| render_value(&Value::from_bytes(chunk, mem), Some(element), structs))
        .collect()
}

fn aggregate(items: Vec<String>) -> String {
    if items.is_empty() {
        "{}".to_string()
    } else {
        format!("{{ {} }}", items.join(", "))
    }
}

fn render_bytes(bytes: &[u8]) -> String {
    aggregate(bytes.iter().map(|b| format!("{:#04x}", b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::StructTable;
    use crate::parser::ast::{BaseType, Field, StructDef};

    fn point() -> StructTable {
        let mut structs = StructTable::default();
        structs.insert(
            "P".to_string(),
            StructDef {
                name: "P".to_string(),
                fields: vec![
                    Field {
                        name: "x".to_string(),
                        field_type: Type::int(),
                    },
                    Field {
                        name: "y".to_string(),
                        field_type: Type::char(),
                    },
                ],
            },
        );
        structs
    }

    #[test]
    fn test_scalars() {
        let structs = StructTable::default();
        assert_eq!(render_value(&Value::Int(-6), Some(&Type::int()), &structs), "-6");
        assert_eq!(render_value(&Value::Long(1 << 33), None, &structs), "8589934592");
        assert_eq!(render_value(&Value::Char(b'a' as i8), None, &structs), "'a'");
        assert_eq!(render_value(&Value::Pointer(0x10010), None, &structs), "0x10010");
        assert_eq!(render_value(&Value::Null, None, &structs), "0x0");
    }

    #[test]
    fn test_aggregates() {
        let structs = point();
        let mut bytes = 7i32.to_le_bytes().to_vec();
        bytes.push(b'z');
        let p = Type::new(BaseType::Struct("P".into()));
        assert_eq!(
            render_value(&Value::Bytes(bytes), Some(&p), &structs),
            "{ .x = 7, .y = 'z' }"
        );

        let mut bytes = Vec::new();
        for n in [1i32, 2, 3] {
            bytes.extend_from_slice(&n.to_le_bytes());
        }
        let array = Type::int().with_array(Some(3));
        assert_eq!(
            render_value(&Value::Bytes(bytes), Some(&array), &structs),
            "{ 1, 2, 3 }"
        );
    }

    #[test]
    fn test_flags() {
        assert_eq!(PrintFlags::for_type(&Type::int()), PrintFlags::empty());
        assert_eq!(
            PrintFlags::for_type(&Type::char().with_const().with_pointer()),
            PrintFlags::POINTER | PrintFlags::CONST
        );
        assert_eq!(PrintFlags::for_value(&Value::Null), PrintFlags::POINTER);
        assert!(!PrintFlags::for_type(&Type::long()).contains(PrintFlags::POLYMORPHIC));
    }

    #[test]
    fn test_default_printer_appends_newline() {
        let structs = StructTable::default();
        let mut out = String::new();
        DefaultPrinter.print_value(
            &mut out,
            &PrintRequest {
                value: &Value::Int(6),
                ty: Some(&Type::int()),
                flags: PrintFlags::empty(),
                expr: "x",
                structs: &structs,
            },
        );
        assert_eq!(out, "6\n");
    }
}
