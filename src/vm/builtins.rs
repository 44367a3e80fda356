//! Built-in library functions
//!
//! Only `printf` is built in. Its output is appended to the machine's output
//! buffer instead of being written to the process's stdout.

use super::{Machine, RuntimeError};
use crate::memory::value::{Address, Value};
use crate::memory::MemoryError;
use crate::parser::ast::SourceLocation;

impl Machine {
    pub(crate) fn builtin_printf(
        &mut self,
        args: &[Value],
        location: SourceLocation,
    ) -> Result<Value, RuntimeError> {
        let (format, rest) = args
            .split_first()
            .ok_or_else(|| RuntimeError::InvalidPrintfFormat {
                message: "printf requires a format string".to_string(),
                location,
            })?;
        let format = match format.as_pointer() {
            Some(address) => self.read_string(address, location)?,
            None => {
                return Err(RuntimeError::InvalidPrintfFormat {
                    message: format!("format must be a string, got {:?}", format),
                    location,
                })
            }
        };

        let text = self.format_printf(&format, rest, location)?;
        self.output.push_str(&text);
        Ok(Value::Int(text.len() as i32))
    }

    fn read_string(&self, address: Address, location: SourceLocation) -> Result<String, RuntimeError> {
        self.memory.read_c_string(address).map_err(|err| match err {
            MemoryError::NullDereference => RuntimeError::NullDereference { location },
            other => RuntimeError::InvalidString {
                message: other.to_string(),
                location,
            },
        })
    }

    /// Format a printf-style string.
    ///
    /// Supports `%d %i %u %x %c %s %p %%`, with an `l` length modifier on
    /// the integer conversions.
    fn format_printf(
        &self,
        format: &str,
        args: &[Value],
        location: SourceLocation,
    ) -> Result<String, RuntimeError> {
        let mut output = String::new();
        let mut chars = format.chars().peekable();
        let mut arg_index = 0;

        while let Some(ch) = chars.next() {
            if ch != '%' {
                output.push(ch);
                continue;
            }
            let long = chars.next_if_eq(&'l').is_some();
            let Some(spec) = chars.next() else {
                return Err(RuntimeError::InvalidPrintfFormat {
                    message: "Incomplete format specifier at end of string".to_string(),
                    location,
                });
            };
            if spec == '%' {
                output.push('%');
                continue;
            }

            let arg = args.get(arg_index).ok_or_else(|| RuntimeError::InvalidPrintfFormat {
                message: "Not enough arguments for format string".to_string(),
                location,
            })?;
            arg_index += 1;
            let mismatch = |expected: &str| RuntimeError::InvalidPrintfFormat {
                message: format!(
                    "%{}{} expects {}, got {:?}",
                    if long { "l" } else { "" },
                    spec,
                    expected,
                    arg
                ),
                location,
            };

            match spec {
                'd' | 'i' => match arg {
                    Value::Int(_) | Value::Char(_) | Value::Long(_) => {
                        output.push_str(&integer(arg, long).to_string())
                    }
                    _ => return Err(mismatch("int")),
                },
                'u' => match arg {
                    Value::Int(_) | Value::Char(_) | Value::Long(_) => {
                        output.push_str(&unsigned(arg, long).to_string())
                    }
                    _ => return Err(mismatch("int")),
                },
                'x' => match arg {
                    Value::Int(_) | Value::Char(_) | Value::Long(_) => {
                        output.push_str(&format!("{:x}", unsigned(arg, long)))
                    }
                    _ => return Err(mismatch("int")),
                },
                'c' => match arg {
                    Value::Char(c) => output.push(*c as u8 as char),
                    Value::Int(n) => output.push((*n as u8) as char),
                    _ => return Err(mismatch("char or int")),
                },
                's' => match arg {
                    Value::Pointer(address) => output.push_str(&self.read_string(*address, location)?),
                    Value::Null => return Err(RuntimeError::NullDereference { location }),
                    _ => return Err(mismatch("pointer")),
                },
                'p' => match arg {
                    Value::Pointer(address) => output.push_str(&format!("0x{:x}", address)),
                    Value::Null => output.push_str("(nil)"),
                    _ => return Err(mismatch("pointer")),
                },
                other => {
                    return Err(RuntimeError::InvalidPrintfFormat {
                        message: format!("Unsupported format specifier %{}", other),
                        location,
                    })
                }
            }
        }
        Ok(output)
    }
}

/// Signed value of an integer argument; without `l` it is read as an `int`
fn integer(value: &Value, long: bool) -> i64 {
    let raw = value.as_i64().unwrap_or(0);
    if long {
        raw
    } else {
        raw as i32 as i64
    }
}

fn unsigned(value: &Value, long: bool) -> u64 {
    let raw = value.as_i64().unwrap_or(0);
    if long {
        raw as u64
    } else {
        raw as u32 as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Loader;
    use crate::config::InterpreterConfig;
    use crate::memory::MemType;

    fn machine_with_string(text: &str) -> (Machine, Address) {
        let mut machine = Machine::new(&InterpreterConfig::default());
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        let address = machine.memory.allocate_global(bytes.len()).unwrap();
        machine
            .memory
            .write(address, MemType::Bytes(bytes.len()), &Value::Bytes(bytes))
            .unwrap();
        (machine, address)
    }

    fn loc() -> SourceLocation {
        SourceLocation::new(2, 1)
    }

    #[test]
    fn test_printf_conversions() {
        let (mut machine, format) = machine_with_string("%d %i %ld %u %x %c %% %s|");
        let args = vec![
            Value::Pointer(format),
            Value::Int(-3),
            Value::Char(7),
            Value::Long(1 << 40),
            Value::Int(-1),
            Value::Int(255),
            Value::Char(b'z' as i8),
            Value::Pointer(format),
        ];
        let written = machine.builtin_printf(&args, loc()).unwrap();
        let expected = "-3 7 1099511627776 4294967295 ff z % %d %i %ld %u %x %c %% %s||";
        assert_eq!(machine.output(), expected);
        assert_eq!(written, Value::Int(expected.len() as i32));
    }

    #[test]
    fn test_printf_errors() {
        let (mut machine, format) = machine_with_string("%d %d");
        let err = machine
            .builtin_printf(&[Value::Pointer(format), Value::Int(1)], loc())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid printf format at line 2: Not enough arguments for format string"
        );

        let (mut machine, format) = machine_with_string("%s");
        assert_eq!(
            machine.builtin_printf(&[Value::Pointer(format), Value::Null], loc()),
            Err(RuntimeError::NullDereference { location: loc() })
        );

        let (mut machine, format) = machine_with_string("%q");
        assert!(matches!(
            machine.builtin_printf(&[Value::Pointer(format), Value::Int(1)], loc()),
            Err(RuntimeError::InvalidPrintfFormat { .. })
        ));
        assert_eq!(machine.take_output(), "");
    }

    #[test]
    fn test_printf_pointer() {
        let (mut machine, format) = machine_with_string("%p %p");
        machine
            .builtin_printf(
                &[Value::Pointer(format), Value::Pointer(0x10010), Value::Null],
                loc(),
            )
            .unwrap();
        assert_eq!(machine.take_output(), "0x10010 (nil)");
        assert_eq!(machine.output(), "");
    }
}
