//! Memory model for the virtual machine
//!
//! This module provides the core memory abstractions:
//! - [`value`]: Runtime value representation (Int, Long, Char, Pointer, Bytes)
//! - [`segment`]: Bump-allocated, byte-addressed storage ranges
//! - [`stack`]: Call stack with frames and local slots
//! - [`Memory`]: The global segment plus the stack, addressed uniformly
//!
//! # Type Sizes
//!
//! Sizes are fixed and platform-independent:
//! - `char`: 1 byte
//! - `int`: 4 bytes
//! - `long`: 8 bytes
//! - `pointer`: 8 bytes (regardless of pointee type)
//! - `struct`: sum of field sizes (no padding or alignment)
//!
//! Scalars are stored little-endian. Address 0 is never mapped, so a null
//! dereference always traps.
//!
//! # Pointer Arithmetic
//!
//! Pointer arithmetic is scaled by pointee size:
//! ```text
//! ptr + n  →  ptr + (n * sizeof(*ptr))
//! ```

pub mod segment;
pub mod stack;
pub mod value;

use crate::parser::ast::{BaseType, StructDef, Type};
use rustc_hash::FxHashMap;
use segment::Segment;
use stack::Stack;
use std::collections::HashMap;
use std::hash::BuildHasher;
use thiserror::Error;
use value::{Address, Value};

/// Errors raised by memory accesses
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("null pointer dereference")]
    NullDereference,

    #[error("invalid access of {size} bytes at address {address:#x}")]
    OutOfBounds { address: Address, size: usize },

    #[error("read of uninitialized memory at address {address:#x}")]
    Uninitialized { address: Address },

    #[error("{segment} segment exhausted: requested {requested} bytes of {capacity}")]
    OutOfMemory {
        segment: &'static str,
        requested: usize,
        capacity: usize,
    },

    #[error("value {value:?} cannot be stored as {ty:?}")]
    Unrepresentable { value: Value, ty: MemType },
}

/// Struct definitions visible to size and layout computations
pub trait StructDefs {
    fn struct_def(&self, name: &str) -> Option<&StructDef>;
}

impl<S: BuildHasher> StructDefs for HashMap<String, StructDef, S> {
    fn struct_def(&self, name: &str) -> Option<&StructDef> {
        self.get(name)
    }
}

/// How a value of some type is laid out in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemType {
    Char,
    Int,
    Long,
    Ptr,
    /// Structs and arrays, copied as raw bytes
    Bytes(usize),
}

impl MemType {
    /// Classify a type. `None` for `void` and incomplete types.
    pub fn of(t: &Type, structs: &dyn StructDefs) -> Option<MemType> {
        if !t.array_dims.is_empty() || t.is_struct() {
            return sizeof_type(t, structs).map(MemType::Bytes);
        }
        if t.pointer_depth > 0 {
            return Some(MemType::Ptr);
        }
        match t.base {
            BaseType::Char => Some(MemType::Char),
            BaseType::Int => Some(MemType::Int),
            BaseType::Long => Some(MemType::Long),
            BaseType::Void | BaseType::Struct(_) => None,
        }
    }

    pub fn size(self) -> usize {
        match self {
            MemType::Char => 1,
            MemType::Int => 4,
            MemType::Long | MemType::Ptr => 8,
            MemType::Bytes(n) => n,
        }
    }

    pub fn is_scalar(self) -> bool {
        !matches!(self, MemType::Bytes(_))
    }
}

/// Calculate the size of a type in bytes
///
/// Returns `None` for unknown structs and unsized array dimensions.
pub fn sizeof_type(t: &Type, structs: &dyn StructDefs) -> Option<usize> {
    let element_size = if t.pointer_depth > 0 {
        8
    } else {
        match &t.base {
            BaseType::Int => 4,
            BaseType::Long => 8,
            BaseType::Char => 1,
            BaseType::Void => 0, // sizeof(void) is technically undefined, but we use 0
            BaseType::Struct(name) => {
                let def = structs.struct_def(name)?;
                // Sum of all field sizes (no padding)
                let mut total = 0;
                for field in &def.fields {
                    total += sizeof_type(&field.field_type, structs)?;
                }
                total
            }
        }
    };

    // For arrays, multiply by dimensions
    t.array_dims
        .iter()
        .try_fold(element_size, |size, dim| dim.map(|n| size * n))
}

/// Byte offset and type of `field` within struct `def`
pub fn field_offset(
    def: &StructDef,
    field: &str,
    structs: &dyn StructDefs,
) -> Option<(usize, Type)> {
    let mut offset = 0;
    for f in &def.fields {
        if f.name == field {
            return Some((offset, f.field_type.clone()));
        }
        offset += sizeof_type(&f.field_type, structs)?;
    }
    None
}

/// Perform pointer arithmetic: addr + offset (scaled by pointee size)
pub fn pointer_add(addr: Address, offset: i64, pointee_size: usize) -> Address {
    let byte_offset = offset.wrapping_mul(pointee_size as i64);
    (addr as i64).wrapping_add(byte_offset) as Address
}

/// Calculate the difference between two pointers (in elements, not bytes)
pub fn pointer_diff(addr1: Address, addr2: Address, pointee_size: usize) -> i64 {
    let size = pointee_size.max(1) as i64;
    (addr1 as i64).wrapping_sub(addr2 as i64) / size
}

/// The machine's address space: one global segment and one stack
#[derive(Debug, Clone)]
pub struct Memory {
    globals: Segment,
    stack: Stack,
}

impl Memory {
    pub fn new(
        global_base: Address,
        global_capacity: usize,
        stack_base: Address,
        stack_capacity: usize,
    ) -> Self {
        Memory {
            globals: Segment::new("global", global_base, global_capacity),
            stack: Stack::new(stack_base, stack_capacity),
        }
    }

    /// Allocate zero-initialized static storage; never released
    pub fn allocate_global(&mut self, size: usize) -> Result<Address, MemoryError> {
        self.globals.allocate(size, true)
    }

    pub fn is_global(&self, address: Address, size: usize) -> bool {
        self.globals.contains(address, size)
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }

    fn segment_for(&self, address: Address, size: usize) -> Result<&Segment, MemoryError> {
        if address == 0 {
            return Err(MemoryError::NullDereference);
        }
        if self.globals.contains(address, size) {
            Ok(&self.globals)
        } else if self.stack.segment().contains(address, size) {
            Ok(self.stack.segment())
        } else {
            Err(MemoryError::OutOfBounds { address, size })
        }
    }

    /// Read a value of layout `ty` at `address`
    pub fn read(&self, address: Address, ty: MemType) -> Result<Value, MemoryError> {
        let size = ty.size();
        let segment = self.segment_for(address, size)?;
        if ty.is_scalar() && !segment.is_initialized(address, size) {
            return Err(MemoryError::Uninitialized { address });
        }
        let bytes = segment.read_bytes(address, size)?;
        Ok(Value::from_bytes(bytes, ty))
    }

    /// Write `value` converted to layout `ty` at `address`
    pub fn write(&mut self, address: Address, ty: MemType, value: &Value) -> Result<(), MemoryError> {
        let bytes = value.to_bytes(ty).ok_or_else(|| MemoryError::Unrepresentable {
            value: value.clone(),
            ty,
        })?;
        if address == 0 {
            return Err(MemoryError::NullDereference);
        }
        if self.globals.contains(address, bytes.len()) {
            self.globals.write_bytes(address, &bytes)
        } else {
            self.stack.segment_mut().write_bytes(address, &bytes)
        }
    }

    /// Read a NUL-terminated string starting at `address`
    pub fn read_c_string(&self, address: Address) -> Result<String, MemoryError> {
        let mut out = Vec::new();
        let mut cursor = address;
        loop {
            let segment = self.segment_for(cursor, 1)?;
            let byte = segment.read_bytes(cursor, 1)?[0];
            if byte == 0 {
                break;
            }
            out.push(byte);
            cursor += 1;
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

/// Struct table keyed by name, for callers without a symbol table
pub type StructTable = FxHashMap<String, StructDef>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::Field;

    fn point_structs() -> StructTable {
        let mut structs = StructTable::default();
        structs.insert(
            "P".to_string(),
            StructDef {
                name: "P".to_string(),
                fields: vec![
                    Field {
                        name: "tag".to_string(),
                        field_type: Type::char(),
                    },
                    Field {
                        name: "x".to_string(),
                        field_type: Type::int(),
                    },
                    Field {
                        name: "next".to_string(),
                        field_type: Type::new(BaseType::Struct("P".into())).with_pointer(),
                    },
                ],
            },
        );
        structs
    }

    #[test]
    fn test_sizes() {
        let structs = point_structs();
        let p = Type::new(BaseType::Struct("P".into()));
        assert_eq!(sizeof_type(&Type::long(), &structs), Some(8));
        assert_eq!(sizeof_type(&p, &structs), Some(13));
        assert_eq!(sizeof_type(&p.clone().with_array(Some(2)), &structs), Some(26));
        assert_eq!(sizeof_type(&Type::int().with_array(None), &structs), None);
        assert_eq!(
            sizeof_type(&Type::new(BaseType::Struct("Q".into())), &structs),
            None
        );
    }

    #[test]
    fn test_field_offsets() {
        let structs = point_structs();
        let def = structs.struct_def("P").unwrap();
        assert_eq!(field_offset(def, "x", &structs).map(|f| f.0), Some(1));
        assert_eq!(field_offset(def, "next", &structs).map(|f| f.0), Some(5));
        assert!(field_offset(def, "y", &structs).is_none());
    }

    #[test]
    fn test_pointer_math() {
        assert_eq!(pointer_add(0x100, 3, 4), 0x10c);
        assert_eq!(pointer_add(0x100, -1, 8), 0xf8);
        assert_eq!(pointer_diff(0x10c, 0x100, 4), 3);
    }

    #[test]
    fn test_memory_read_write() {
        let mut memory = Memory::new(0x1_0000, 256, 0x4000_0000, 256);
        let global = memory.allocate_global(4).unwrap();
        assert_eq!(memory.read(global, MemType::Int), Ok(Value::Int(0)));
        memory.write(global, MemType::Int, &Value::Char(7)).unwrap();
        assert_eq!(memory.read(global, MemType::Int), Ok(Value::Int(7)));
        assert_eq!(memory.read(0, MemType::Int), Err(MemoryError::NullDereference));
        assert!(matches!(
            memory.read(0x9999_0000, MemType::Int),
            Err(MemoryError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_uninitialized_stack_read() {
        let mut memory = Memory::new(0x1_0000, 256, 0x4000_0000, 256);
        let slot = memory.stack_mut().push_frame("f", 0, &[4]).unwrap().locals[0];
        assert_eq!(
            memory.read(slot, MemType::Int),
            Err(MemoryError::Uninitialized { address: slot })
        );
    }
}
