//! Virtual machine: the bundled loader
//!
//! [`Machine`] owns the process memory and every loaded module. Modules are
//! executed by walking their IR directly:
//! - [`eval`]: expressions, including arithmetic and runtime evaluation
//!   requests
//! - [`exec`]: statements, function calls and control flow
//! - [`builtins`]: `printf`
//!
//! Functions of all loaded modules share one symbol space. A module only
//! reaches globals through its own slot table, which is how spliced globals
//! of different modules end up at the same address.

mod builtins;
pub mod errors;
mod eval;
mod exec;

pub use errors::RuntimeError;

use crate::bridge::{EntryPoint, EvalHost, HostFunction, LinkError, Loader, ModuleId};
use crate::codegen::ir::{Function, Module};
use crate::config::InterpreterConfig;
use crate::deferred::DeferredRequest;
use crate::memory::value::{Address, Value};
use crate::memory::{MemType, Memory, MemoryError};
use crate::parser::ast::SourceLocation;
use rustc_hash::FxHashMap;
use std::rc::Rc;
use tracing::{debug, trace};

/// A module after loading: its slot addresses and string literals
#[derive(Debug)]
struct LoadedModule {
    name: String,
    globals: Vec<(String, Address)>,
    strings: Vec<Address>,
}

/// Execution context of one running entry point
pub(crate) struct Ctx<'h> {
    pub(crate) module: ModuleId,
    pub(crate) host: &'h mut dyn EvalHost,
}

/// Host used while global initializers run; they cannot issue requests
struct DetachedHost;

impl EvalHost for DetachedHost {
    fn runtime_evaluate(
        &mut self,
        _loader: &mut dyn Loader,
        request: DeferredRequest,
    ) -> Result<Value, String> {
        Err(format!(
            "runtime evaluation of '{}' is not available while globals are initialized",
            request.text
        ))
    }
}

pub struct Machine {
    memory: Memory,
    modules: Vec<LoadedModule>,
    /// Published functions and the module that defines each
    functions: FxHashMap<String, (ModuleId, Rc<Function>)>,
    host_functions: FxHashMap<String, HostFunction>,
    /// Output buffer for printf
    output: String,
    max_call_depth: usize,
}

impl Machine {
    pub fn new(config: &InterpreterConfig) -> Self {
        Machine {
            memory: Memory::new(
                config.global_base,
                config.global_capacity,
                config.stack_base,
                config.stack_capacity,
            ),
            modules: Vec::new(),
            functions: FxHashMap::default(),
            host_functions: FxHashMap::default(),
            output: String::new(),
            max_call_depth: config.max_call_depth,
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn is_published(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    fn module(&self, id: ModuleId, location: SourceLocation) -> Result<&LoadedModule, RuntimeError> {
        self.modules.get(id.0).ok_or_else(|| RuntimeError::TypeError {
            expected: "loaded module".to_string(),
            got: id.to_string(),
            location,
        })
    }

    /// Address of global slot `index` of the running module
    pub(crate) fn global_slot(
        &self,
        ctx: &Ctx<'_>,
        index: usize,
        location: SourceLocation,
    ) -> Result<Address, RuntimeError> {
        self.module(ctx.module, location)?
            .globals
            .get(index)
            .map(|(_, address)| *address)
            .ok_or_else(|| RuntimeError::TypeError {
                expected: format!("global slot {}", index),
                got: "missing slot".to_string(),
                location,
            })
    }

    pub(crate) fn string_address(
        &self,
        ctx: &Ctx<'_>,
        index: usize,
        location: SourceLocation,
    ) -> Result<Address, RuntimeError> {
        self.module(ctx.module, location)?
            .strings
            .get(index)
            .copied()
            .ok_or_else(|| RuntimeError::InvalidString {
                message: format!("string literal {} is not loaded", index),
                location,
            })
    }

    fn allocate_slots(&mut self, module: &Module) -> Result<Vec<(String, Address)>, LinkError> {
        let mut globals = Vec::with_capacity(module.globals.len());
        for slot in &module.globals {
            let address = match (slot.binding, slot.defined) {
                (Some(address), _) => address,
                (None, true) => self.memory.allocate_global(slot.size).map_err(|source| {
                    LinkError::OutOfMemory {
                        name: slot.name.clone(),
                        source,
                    }
                })?,
                (None, false) => {
                    return Err(LinkError::UnresolvedGlobal {
                        name: slot.name.clone(),
                        module: module.name.clone(),
                    })
                }
            };
            trace!(name = %slot.name, address = format_args!("{:#x}", address), "global slot");
            globals.push((slot.name.clone(), address));
        }
        Ok(globals)
    }

    fn place_strings(&mut self, module: &Module) -> Result<Vec<Address>, LinkError> {
        let mut strings = Vec::with_capacity(module.strings.len());
        for text in &module.strings {
            let mut bytes = text.as_bytes().to_vec();
            bytes.push(0);
            let out_of_memory = |source| LinkError::OutOfMemory {
                name: format!("string literal \"{}\"", text.escape_default()),
                source,
            };
            let address = self
                .memory
                .allocate_global(bytes.len())
                .map_err(out_of_memory)?;
            self.memory
                .write(address, MemType::Bytes(bytes.len()), &Value::Bytes(bytes))
                .map_err(out_of_memory)?;
            strings.push(address);
        }
        Ok(strings)
    }

    fn run_initializers(&mut self, id: ModuleId, module: &Module) -> Result<(), LinkError> {
        let mut host = DetachedHost;
        let mut ctx = Ctx {
            module: id,
            host: &mut host,
        };
        for (index, slot) in module.globals.iter().enumerate() {
            if !slot.defined || slot.init.is_empty() {
                continue;
            }
            let result = self
                .global_slot(&ctx, index, slot.location)
                .and_then(|base| self.apply_stores(base, &slot.init, &mut ctx));
            if let Err(source) = result {
                return Err(LinkError::Initializer {
                    name: slot.name.clone(),
                    source,
                });
            }
        }
        Ok(())
    }
}

impl Loader for Machine {
    fn load(&mut self, module: Module) -> Result<ModuleId, LinkError> {
        if let Some(function) = module
            .functions
            .iter()
            .find(|f| self.functions.contains_key(&f.name))
        {
            return Err(LinkError::DuplicateFunction {
                name: function.name.clone(),
            });
        }

        let globals = self.allocate_slots(&module)?;
        let strings = self.place_strings(&module)?;
        let id = ModuleId(self.modules.len());
        self.modules.push(LoadedModule {
            name: module.name.clone(),
            globals,
            strings,
        });
        for function in &module.functions {
            self.functions
                .insert(function.name.clone(), (id, Rc::clone(function)));
        }

        if let Err(err) = self.run_initializers(id, &module) {
            for function in &module.functions {
                self.functions.remove(&function.name);
            }
            self.modules.pop();
            return Err(err);
        }
        debug!(module = %module.name, %id, functions = module.functions.len(), "module loaded");
        Ok(id)
    }

    fn find_entry_point(&self, name: &str) -> Option<EntryPoint> {
        self.functions.get(name).map(|(module, _)| EntryPoint {
            module: *module,
            name: name.to_string(),
        })
    }

    fn invoke(&mut self, entry: &EntryPoint, host: &mut dyn EvalHost) -> Result<Value, RuntimeError> {
        let depth = self.memory.stack().depth();
        let mut ctx = Ctx {
            module: entry.module,
            host,
        };
        let location = self
            .functions
            .get(&entry.name)
            .map(|(_, f)| f.location)
            .unwrap_or_default();
        let result = self.call_function(&entry.name, Vec::new(), location, &mut ctx);
        while self.memory.stack().depth() > depth {
            self.memory.stack_mut().pop_frame();
        }
        result
    }

    fn release(&mut self, entry: &EntryPoint) {
        let owned = matches!(self.functions.get(&entry.name), Some((module, _)) if *module == entry.module);
        if owned {
            self.functions.remove(&entry.name);
            trace!(entry = %entry.name, "released entry point");
        }
    }

    fn global_address(&self, module: ModuleId, name: &str) -> Option<Address> {
        self.modules
            .get(module.0)?
            .globals
            .iter()
            .find(|(slot, _)| slot == name)
            .map(|(_, address)| *address)
    }

    fn bind_global_address(
        &mut self,
        module: ModuleId,
        name: &str,
        address: Address,
    ) -> Result<(), LinkError> {
        let loaded = self
            .modules
            .get_mut(module.0)
            .ok_or(LinkError::UnknownModule(module))?;
        let slot = loaded
            .globals
            .iter_mut()
            .find(|(slot, _)| slot == name)
            .ok_or_else(|| LinkError::UnknownGlobal {
                module,
                name: name.to_string(),
            })?;
        trace!(module = %loaded.name, name, address = format_args!("{:#x}", address), "rebound global");
        slot.1 = address;
        Ok(())
    }

    fn bind_host_function(&mut self, function: HostFunction) {
        trace!(name = %function.name, "bound host function");
        self.host_functions.insert(function.name.clone(), function);
    }

    fn read(&self, address: Address, ty: MemType) -> Result<Value, MemoryError> {
        self.memory.read(address, ty)
    }

    fn write_output(&mut self, text: &str) {
        self.output.push_str(text);
    }

    fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    fn output(&self) -> &str {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::ir::{Expr, ExprKind, GlobalSlot, InitStore, Place, Stmt};
    use crate::parser::ast::Type;

    struct NoHost;

    impl EvalHost for NoHost {
        fn runtime_evaluate(&mut self, _: &mut dyn Loader, _: DeferredRequest) -> Result<Value, String> {
            Err("no host".into())
        }
    }

    fn loc() -> SourceLocation {
        SourceLocation::new(1, 1)
    }

    fn int_global(name: &str, defined: bool, init: Option<i32>) -> GlobalSlot {
        GlobalSlot {
            name: name.to_string(),
            ty: Type::int(),
            size: 4,
            defined,
            binding: None,
            init: init
                .map(|n| {
                    vec![InitStore {
                        offset: 0,
                        mem: MemType::Int,
                        value: Expr::new(ExprKind::Const(Value::Int(n)), loc()),
                    }]
                })
                .unwrap_or_default(),
            location: loc(),
        }
    }

    fn entry(name: &str, body: Vec<Stmt>, returns: Option<MemType>) -> Rc<Function> {
        Rc::new(Function {
            name: name.to_string(),
            params: Vec::new(),
            locals: Vec::new(),
            returns,
            body,
            location: loc(),
        })
    }

    #[test]
    fn test_load_allocates_and_initializes_globals() {
        let mut machine = Machine::new(&InterpreterConfig::default());
        let mut module = Module::new("m0", 0);
        module.globals.push(int_global("x", true, Some(7)));
        module.globals.push(int_global("y", true, None));
        let id = machine.load(module).unwrap();

        let x = machine.global_address(id, "x").unwrap();
        let y = machine.global_address(id, "y").unwrap();
        assert_ne!(x, y);
        assert!(machine.memory().is_global(x, 4));
        assert_eq!(machine.read(x, MemType::Int), Ok(Value::Int(7)));
        assert_eq!(machine.read(y, MemType::Int), Ok(Value::Int(0)));
    }

    #[test]
    fn test_unbound_external_is_a_link_error() {
        let mut machine = Machine::new(&InterpreterConfig::default());
        let mut module = Module::new("m0", 0);
        module.globals.push(int_global("missing", false, None));
        assert_eq!(
            machine.load(module),
            Err(LinkError::UnresolvedGlobal {
                name: "missing".into(),
                module: "m0".into()
            })
        );
        assert_eq!(machine.module_count(), 0);
    }

    #[test]
    fn test_entry_point_is_one_shot() {
        let mut machine = Machine::new(&InterpreterConfig::default());
        let mut module = Module::new("m0", 0);
        module.globals.push(int_global("x", true, Some(1)));
        let add = Expr::new(
            ExprKind::Store {
                place: Place::Global(0),
                mem: MemType::Int,
                value: Box::new(Expr::new(ExprKind::Const(Value::Int(41)), loc())),
            },
            loc(),
        );
        module.functions.push(entry(
            "run",
            vec![Stmt::Return(Some(add))],
            Some(MemType::Int),
        ));
        let id = machine.load(module).unwrap();

        let run = machine.find_entry_point("run").unwrap();
        assert_eq!(run.module, id);
        assert_eq!(machine.invoke(&run, &mut NoHost), Ok(Value::Int(41)));
        machine.release(&run);
        assert!(machine.find_entry_point("run").is_none());
        assert!(machine.memory().stack().is_empty());
    }

    #[test]
    fn test_duplicate_function_rejected() {
        let mut machine = Machine::new(&InterpreterConfig::default());
        let mut first = Module::new("m0", 0);
        first.functions.push(entry("f", Vec::new(), None));
        machine.load(first).unwrap();

        let mut second = Module::new("m1", 1);
        second.globals.push(int_global("z", true, None));
        second.functions.push(entry("f", Vec::new(), None));
        assert_eq!(
            machine.load(second),
            Err(LinkError::DuplicateFunction { name: "f".into() })
        );
        assert_eq!(machine.module_count(), 1);
    }

    #[test]
    fn test_failed_initializer_unpublishes_module() {
        let mut machine = Machine::new(&InterpreterConfig::default());
        let mut module = Module::new("m0", 0);
        let mut bad = int_global("bad", true, None);
        bad.init.push(InitStore {
            offset: 0,
            mem: MemType::Int,
            value: Expr::new(
                ExprKind::Load(
                    Place::Addr(Box::new(Expr::new(ExprKind::Const(Value::Null), loc()))),
                    MemType::Int,
                ),
                loc(),
            ),
        });
        module.globals.push(bad);
        module.functions.push(entry("g", Vec::new(), None));
        assert!(matches!(
            machine.load(module),
            Err(LinkError::Initializer { ref name, source: RuntimeError::NullDereference { .. } }) if name == "bad"
        ));
        assert!(!machine.is_published("g"));
        assert_eq!(machine.module_count(), 0);
    }
}
