//! Execution bridge
//!
//! Connects a compiled fragment to the executable side of the session. The
//! code generator and the loader are collaborators behind the
//! [`CodeGenerator`] and [`Loader`] traits; the bundled implementations are
//! [`crate::codegen::IrGenerator`] and [`crate::vm::Machine`].
//!
//! Every fragment becomes its own module. Modules accumulate in the loader,
//! so functions defined by earlier fragments stay callable. A module that
//! refers to a global defined by an earlier module gets that global's
//! address spliced onto its own slot before it is loaded, which keeps every
//! global at one address for the life of the process.

use crate::codegen::ir::Module;
use crate::codegen::CodegenError;
use crate::deferred::DeferredRequest;
use crate::memory::value::{Address, Value};
use crate::memory::{MemType, MemoryError};
use crate::session::{CompiledUnit, Session, Signature};
use crate::vm::RuntimeError;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, trace};

/// Handle to a module inside a loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub usize);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module {}", self.0)
    }
}

/// A callable entry point published by a loaded module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub module: ModuleId,
    pub name: String,
}

pub type HostCallback = Rc<dyn Fn(&[Value]) -> Result<Value, String>>;

/// A function implemented in Rust and callable from interpreted code
#[derive(Clone)]
pub struct HostFunction {
    pub name: String,
    pub signature: Signature,
    callback: HostCallback,
}

impl HostFunction {
    pub fn new(name: impl Into<String>, signature: Signature, callback: HostCallback) -> Self {
        HostFunction {
            name: name.into(),
            signature,
            callback,
        }
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, String> {
        (self.callback)(args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Back end: lowers one fragment's typed items to a loadable module
pub trait CodeGenerator {
    fn generate(&mut self, unit: &CompiledUnit, session: &Session) -> Result<Module, CodegenError>;
}

/// Receiver of runtime evaluation requests issued by running code
pub trait EvalHost {
    /// Compile and run `request` while the code that issued it is suspended
    /// in `loader`. An `Err` becomes the failed value of the request.
    fn runtime_evaluate(
        &mut self,
        loader: &mut dyn Loader,
        request: DeferredRequest,
    ) -> Result<Value, String>;
}

/// Executable-module loader
pub trait Loader {
    /// Link `module` against everything loaded before it, allocate its
    /// remaining globals and run their initializers.
    fn load(&mut self, module: Module) -> Result<ModuleId, LinkError>;

    fn find_entry_point(&self, name: &str) -> Option<EntryPoint>;

    /// Call a zero-argument entry point
    fn invoke(&mut self, entry: &EntryPoint, host: &mut dyn EvalHost) -> Result<Value, RuntimeError>;

    /// Unpublish a one-shot entry point
    fn release(&mut self, entry: &EntryPoint);

    /// Address backing `name` in `module`, if the module has a slot for it
    fn global_address(&self, module: ModuleId, name: &str) -> Option<Address>;

    /// Point `module`'s slot for `name` at `address`. Spliced slots arrive
    /// with their binding already set; the bridge calls this after `load`
    /// only for slots the loader did not place at their binding.
    fn bind_global_address(
        &mut self,
        module: ModuleId,
        name: &str,
        address: Address,
    ) -> Result<(), LinkError>;

    fn bind_host_function(&mut self, function: HostFunction);

    fn read(&self, address: Address, ty: MemType) -> Result<Value, MemoryError>;

    /// Append `text` to the output stream
    fn write_output(&mut self, text: &str);

    /// Text written since the last call
    fn take_output(&mut self) -> String;

    /// Text written and not yet taken
    fn output(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("unresolved external symbol '{name}' in {module}")]
    UnresolvedGlobal { name: String, module: String },

    #[error("function '{name}' is already defined by a loaded module")]
    DuplicateFunction { name: String },

    #[error("initializer of global '{name}' failed: {source}")]
    Initializer {
        name: String,
        #[source]
        source: RuntimeError,
    },

    #[error("cannot allocate global '{name}': {source}")]
    OutOfMemory {
        name: String,
        #[source]
        source: MemoryError,
    },

    #[error("{0} is not loaded")]
    UnknownModule(ModuleId),

    #[error("{module} has no slot for global '{name}'")]
    UnknownGlobal { module: ModuleId, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    #[error("entry point '{0}' not found")]
    EntryPointNotFound(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Code generation, global splicing, loading and invocation for a sequence
/// of fragments
pub struct ExecutionBridge {
    generator: Box<dyn CodeGenerator>,
    /// Loaded modules, oldest first
    modules: Vec<ModuleId>,
}

impl ExecutionBridge {
    pub fn new(generator: Box<dyn CodeGenerator>) -> Self {
        ExecutionBridge {
            generator,
            modules: Vec::new(),
        }
    }

    /// Generate a module for exactly the items of `unit`.
    pub fn codegen(&mut self, unit: &CompiledUnit, session: &Session) -> Result<Module, CodegenError> {
        let module = self.generator.generate(unit, session)?;
        debug!(
            module = %module.name,
            globals = module.globals.len(),
            functions = module.functions.len(),
            "generated module"
        );
        Ok(module)
    }

    /// Bind every global of `module` that a previously loaded module already
    /// has a slot for to that slot's address, taken from the oldest such
    /// module. Returns the number of slots bound.
    pub fn splice_globals(&self, module: &mut Module, loader: &dyn Loader) -> usize {
        let mut spliced = 0;
        for slot in module.globals.iter_mut().filter(|slot| slot.binding.is_none()) {
            let prior = self
                .modules
                .iter()
                .find_map(|&id| loader.global_address(id, &slot.name));
            if let Some(address) = prior {
                trace!(name = %slot.name, address = format_args!("{:#x}", address), "spliced global");
                slot.binding = Some(address);
                spliced += 1;
            }
        }
        spliced
    }

    /// Hand `module` to the loader, then rebind any spliced global the
    /// loader gave storage of its own.
    pub fn load(&mut self, module: Module, loader: &mut dyn Loader) -> Result<ModuleId, LinkError> {
        let name = module.name.clone();
        let spliced: Vec<(String, Address)> = module
            .globals
            .iter()
            .filter_map(|slot| Some((slot.name.clone(), slot.binding?)))
            .collect();
        let id = loader.load(module)?;
        for (global, address) in spliced {
            if loader.global_address(id, &global) != Some(address) {
                trace!(name = %global, address = format_args!("{:#x}", address), "rebinding global after load");
                loader.bind_global_address(id, &global, address)?;
            }
        }
        debug!(module = %name, %id, "loaded module");
        self.modules.push(id);
        Ok(id)
    }

    /// Run the entry point `name` once and release it afterwards, whether
    /// or not it trapped.
    pub fn invoke(
        name: &str,
        loader: &mut dyn Loader,
        host: &mut dyn EvalHost,
    ) -> Result<Value, InvokeError> {
        let entry = loader
            .find_entry_point(name)
            .ok_or_else(|| InvokeError::EntryPointNotFound(name.to_string()))?;
        let result = loader.invoke(&entry, host);
        loader.release(&entry);
        debug!(entry = name, ok = result.is_ok(), "invoked entry point");
        Ok(result?)
    }

    /// Modules loaded through this bridge, oldest first
    pub fn modules(&self) -> &[ModuleId] {
        &self.modules
    }

    pub fn last_module(&self) -> Option<ModuleId> {
        self.modules.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::ir::GlobalSlot;
    use crate::parser::ast::{SourceLocation, Type};
    use rustc_hash::FxHashMap;

    /// Loader that only tracks global addresses
    #[derive(Default)]
    struct AddressBook {
        modules: Vec<FxHashMap<String, Address>>,
        next: Address,
        /// Give every slot fresh storage, even a spliced one
        ignore_bindings: bool,
    }

    impl Loader for AddressBook {
        fn load(&mut self, module: Module) -> Result<ModuleId, LinkError> {
            let mut slots = FxHashMap::default();
            for slot in module.globals {
                let address = match slot.binding.filter(|_| !self.ignore_bindings) {
                    Some(address) => address,
                    None => {
                        self.next += 0x10;
                        self.next
                    }
                };
                slots.insert(slot.name, address);
            }
            self.modules.push(slots);
            Ok(ModuleId(self.modules.len() - 1))
        }

        fn find_entry_point(&self, _name: &str) -> Option<EntryPoint> {
            None
        }

        fn invoke(&mut self, _entry: &EntryPoint, _host: &mut dyn EvalHost) -> Result<Value, RuntimeError> {
            Ok(Value::Void)
        }

        fn release(&mut self, _entry: &EntryPoint) {}

        fn global_address(&self, module: ModuleId, name: &str) -> Option<Address> {
            self.modules.get(module.0)?.get(name).copied()
        }

        fn bind_global_address(&mut self, module: ModuleId, name: &str, address: Address) -> Result<(), LinkError> {
            self.modules
                .get_mut(module.0)
                .ok_or(LinkError::UnknownModule(module))?
                .insert(name.to_string(), address);
            Ok(())
        }

        fn bind_host_function(&mut self, _function: HostFunction) {}

        fn read(&self, _address: Address, _ty: MemType) -> Result<Value, MemoryError> {
            Err(MemoryError::NullDereference)
        }

        fn write_output(&mut self, _text: &str) {}

        fn take_output(&mut self) -> String {
            String::new()
        }

        fn output(&self) -> &str {
            ""
        }
    }

    struct NoGenerator;

    impl CodeGenerator for NoGenerator {
        fn generate(&mut self, _unit: &CompiledUnit, _session: &Session) -> Result<Module, CodegenError> {
            Ok(Module::new("empty", 0))
        }
    }

    fn module(name: &str, globals: &[(&str, bool)]) -> Module {
        let mut module = Module::new(name, 0);
        for (global, defined) in globals {
            module.globals.push(GlobalSlot {
                name: global.to_string(),
                ty: Type::int(),
                size: 4,
                defined: *defined,
                binding: None,
                init: Vec::new(),
                location: SourceLocation::default(),
            });
        }
        module
    }

    #[test]
    fn test_splice_reuses_oldest_address() {
        let mut loader = AddressBook::default();
        let mut bridge = ExecutionBridge::new(Box::new(NoGenerator));

        let first = bridge.load(module("m0", &[("x", true)]), &mut loader).unwrap();
        let x = loader.global_address(first, "x").unwrap();

        let mut second = module("m1", &[("x", false), ("y", true)]);
        assert_eq!(bridge.splice_globals(&mut second, &loader), 1);
        let second = bridge.load(second, &mut loader).unwrap();
        assert_eq!(loader.global_address(second, "x"), Some(x));
        assert_ne!(loader.global_address(second, "y"), Some(x));

        let mut third = module("m2", &[("y", false), ("x", false)]);
        assert_eq!(bridge.splice_globals(&mut third, &loader), 2);
        let third = bridge.load(third, &mut loader).unwrap();
        assert_eq!(loader.global_address(third, "x"), Some(x));
        assert_eq!(
            loader.global_address(third, "y"),
            loader.global_address(second, "y")
        );
        assert_eq!(bridge.modules(), &[first, second, third]);
    }

    #[test]
    fn test_load_rebinds_slots_the_loader_moved() {
        let mut loader = AddressBook {
            ignore_bindings: true,
            ..AddressBook::default()
        };
        let mut bridge = ExecutionBridge::new(Box::new(NoGenerator));

        let first = bridge.load(module("m0", &[("x", true)]), &mut loader).unwrap();
        let x = loader.global_address(first, "x").unwrap();

        let mut second = module("m1", &[("x", false), ("y", true)]);
        assert_eq!(bridge.splice_globals(&mut second, &loader), 1);
        let second = bridge.load(second, &mut loader).unwrap();
        assert_eq!(loader.global_address(second, "x"), Some(x));
        assert_ne!(loader.global_address(second, "y"), Some(x));
    }

    #[test]
    fn test_missing_entry_point() {
        let mut loader = AddressBook::default();

        struct NoHost;
        impl EvalHost for NoHost {
            fn runtime_evaluate(&mut self, _: &mut dyn Loader, _: DeferredRequest) -> Result<Value, String> {
                Err("no host".into())
            }
        }

        assert_eq!(
            ExecutionBridge::invoke("nope", &mut loader, &mut NoHost),
            Err(InvokeError::EntryPointNotFound("nope".into()))
        );
    }

    #[test]
    fn test_host_function_calls_closure() {
        let double = HostFunction::new(
            "double",
            Signature::new(Type::int(), vec![Type::int()]),
            Rc::new(|args: &[Value]| match args {
                [Value::Int(n)] => Ok(Value::Int(n * 2)),
                _ => Err("expected one int".to_string()),
            }),
        );
        assert_eq!(double.call(&[Value::Int(21)]), Ok(Value::Int(42)));
        assert!(double.call(&[]).is_err());
        assert!(format!("{:?}", double).contains("double"));
    }
}
