//! Runtime value representation
//!
//! This module defines the [`Value`] enum, which represents every value the
//! virtual machine moves between memory, expressions and the host. Values
//! are tagged; their byte layout lives in memory and is described by a
//! [`MemType`].
//!
//! # Value Types
//!
//! - [`Value::Int`]: 32-bit signed integer
//! - [`Value::Long`]: 64-bit signed integer
//! - [`Value::Char`]: 8-bit signed character
//! - [`Value::Pointer`]: 64-bit memory address
//! - [`Value::Null`]: Null pointer (address 0)
//! - [`Value::Bytes`]: Raw contents of a struct or array
//! - [`Value::Void`]: Result of a `void` call
//! - [`Value::Uninitialized`]: Marker for a value that was never produced
//!
//! # Conversions
//!
//! [`Value::convert`] implements C's integer and pointer conversions: values
//! are truncated or sign-extended to the target width.

use super::MemType;

/// Runtime values in the interpreter
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    Int(i32),
    Long(i64),
    Char(i8),
    Pointer(Address),
    Null,
    Bytes(Vec<u8>),
    Void,
    #[default]
    Uninitialized, // Special marker for a missing value
}

/// Memory address type (64-bit)
pub type Address = u64;

impl Value {
    /// Check if this value is initialized
    pub fn is_initialized(&self) -> bool {
        !matches!(self, Value::Uninitialized)
    }

    /// Get the integer value, returns None if not an Int
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Get any integer or pointer value widened to 64 bits
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n as i64),
            Value::Long(n) => Some(*n),
            Value::Char(c) => Some(*c as i64),
            Value::Pointer(addr) => Some(*addr as i64),
            Value::Null => Some(0),
            _ => None,
        }
    }

    /// Get the pointer value, returns None if not a Pointer or Null
    pub fn as_pointer(&self) -> Option<Address> {
        match self {
            Value::Pointer(addr) => Some(*addr),
            Value::Null => Some(0),
            _ => None,
        }
    }

    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::Pointer(0))
    }

    /// Check if this value is a pointer (including null)
    pub fn is_pointer(&self) -> bool {
        matches!(self, Value::Pointer(_) | Value::Null)
    }

    /// Truth value in a condition; `None` for non-scalars
    pub fn is_truthy(&self) -> Option<bool> {
        self.as_i64().map(|n| n != 0)
    }

    /// Convert to the representation of `target`, as an assignment or cast
    /// would. Returns `None` when the value cannot be represented there.
    pub fn convert(&self, target: MemType) -> Option<Value> {
        match target {
            MemType::Bytes(size) => match self {
                Value::Bytes(bytes) if bytes.len() == size => Some(self.clone()),
                _ => None,
            },
            scalar => {
                let raw = self.as_i64()?;
                Some(Value::from_i64(raw, scalar))
            }
        }
    }

    /// Build a scalar of kind `target` from a 64-bit integer, truncating.
    pub fn from_i64(raw: i64, target: MemType) -> Value {
        match target {
            MemType::Char => Value::Char(raw as i8),
            MemType::Int => Value::Int(raw as i32),
            MemType::Long => Value::Long(raw),
            MemType::Ptr if raw == 0 => Value::Null,
            MemType::Ptr => Value::Pointer(raw as Address),
            MemType::Bytes(_) => Value::Uninitialized,
        }
    }

    /// Encode this value as little-endian bytes of `ty`.
    pub fn to_bytes(&self, ty: MemType) -> Option<Vec<u8>> {
        match self.convert(ty)? {
            Value::Char(c) => Some(vec![c as u8]),
            Value::Int(n) => Some(n.to_le_bytes().to_vec()),
            Value::Long(n) => Some(n.to_le_bytes().to_vec()),
            Value::Pointer(addr) => Some(addr.to_le_bytes().to_vec()),
            Value::Null => Some(0u64.to_le_bytes().to_vec()),
            Value::Bytes(bytes) => Some(bytes),
            Value::Void | Value::Uninitialized => None,
        }
    }

    /// Decode little-endian bytes of `ty`. `bytes` must be exactly
    /// `ty.size()` long.
    pub fn from_bytes(bytes: &[u8], ty: MemType) -> Value {
        match ty {
            MemType::Char => Value::Char(bytes[0] as i8),
            MemType::Int => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&bytes[..4]);
                Value::Int(i32::from_le_bytes(buf))
            }
            MemType::Long => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes[..8]);
                Value::Long(i64::from_le_bytes(buf))
            }
            MemType::Ptr => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes[..8]);
                match u64::from_le_bytes(buf) {
                    0 => Value::Null,
                    addr => Value::Pointer(addr),
                }
            }
            MemType::Bytes(_) => Value::Bytes(bytes.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_conversions_truncate() {
        assert_eq!(Value::Int(300).convert(MemType::Char), Some(Value::Char(44)));
        assert_eq!(Value::Long(1 << 40).convert(MemType::Int), Some(Value::Int(0)));
        assert_eq!(Value::Char(-1).convert(MemType::Long), Some(Value::Long(-1)));
        assert_eq!(Value::Int(0).convert(MemType::Ptr), Some(Value::Null));
        assert_eq!(Value::Void.convert(MemType::Int), None);
    }

    #[test]
    fn test_little_endian_layout() {
        let bytes = Value::Int(0x0102_0304).to_bytes(MemType::Int).unwrap();
        assert_eq!(bytes, vec![4, 3, 2, 1]);
        assert_eq!(Value::from_bytes(&bytes, MemType::Int), Value::Int(0x0102_0304));
        let ptr = Value::Pointer(0x4000_0010).to_bytes(MemType::Ptr).unwrap();
        assert_eq!(Value::from_bytes(&ptr, MemType::Ptr), Value::Pointer(0x4000_0010));
    }

    #[test]
    fn test_truthiness() {
        assert_eq!(Value::Null.is_truthy(), Some(false));
        assert_eq!(Value::Char(1).is_truthy(), Some(true));
        assert_eq!(Value::Bytes(vec![1]).is_truthy(), None);
    }
}
