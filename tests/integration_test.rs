// Integration tests for the incremental interpreter

use incc::bridge::{EntryPoint, EvalHost, HostFunction, LinkError, Loader, ModuleId};
use incc::codegen::Module;
use incc::deferred::{DeferredRequest, DynamicScope};
use incc::interpreter::{PrintFlags, PrintRequest, ValuePrinter};
use incc::memory::value::{Address, Value};
use incc::memory::{MemType, MemoryError};
use incc::parser::ast::Type;
use incc::session::{DeclContext, Signature};
use incc::vm::{Machine, RuntimeError};
use incc::{Interpreter, InterpreterConfig, InterpreterError};
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::rc::Rc;

fn interpreter() -> Interpreter {
    incc::logging::init_tracing();
    Interpreter::new(InterpreterConfig::default())
}

/// Host scope providing `int magic(int)`, which adds 21 to its argument
struct Magic {
    calls: Rc<RefCell<Vec<i64>>>,
}

impl DynamicScope for Magic {
    fn resolve(&mut self, name: &str, _context: &DeclContext) -> Option<HostFunction> {
        if name != "magic" {
            return None;
        }
        let calls = Rc::clone(&self.calls);
        Some(HostFunction::new(
            "magic",
            Signature::new(Type::int(), vec![Type::int()]),
            Rc::new(move |args: &[Value]| -> Result<Value, String> {
                let n = args.first().and_then(Value::as_i64).ok_or("magic takes an int")?;
                calls.borrow_mut().push(n);
                Ok(Value::Int(n as i32 + 21))
            }),
        ))
    }
}

/// Loader decorator that records every runtime evaluation request
struct Recording {
    inner: Machine,
    requests: Rc<RefCell<Vec<DeferredRequest>>>,
}

struct RecordingHost<'a> {
    host: &'a mut dyn EvalHost,
    requests: Rc<RefCell<Vec<DeferredRequest>>>,
}

impl EvalHost for RecordingHost<'_> {
    fn runtime_evaluate(
        &mut self,
        loader: &mut dyn Loader,
        request: DeferredRequest,
    ) -> Result<Value, String> {
        self.requests.borrow_mut().push(request.clone());
        self.host.runtime_evaluate(loader, request)
    }
}

impl Loader for Recording {
    fn load(&mut self, module: Module) -> Result<ModuleId, LinkError> {
        self.inner.load(module)
    }

    fn find_entry_point(&self, name: &str) -> Option<EntryPoint> {
        self.inner.find_entry_point(name)
    }

    fn invoke(&mut self, entry: &EntryPoint, host: &mut dyn EvalHost) -> Result<Value, RuntimeError> {
        let mut host = RecordingHost {
            host,
            requests: Rc::clone(&self.requests),
        };
        self.inner.invoke(entry, &mut host)
    }

    fn release(&mut self, entry: &EntryPoint) {
        self.inner.release(entry)
    }

    fn global_address(&self, module: ModuleId, name: &str) -> Option<Address> {
        self.inner.global_address(module, name)
    }

    fn bind_global_address(
        &mut self,
        module: ModuleId,
        name: &str,
        address: Address,
    ) -> Result<(), LinkError> {
        self.inner.bind_global_address(module, name, address)
    }

    fn bind_host_function(&mut self, function: HostFunction) {
        self.inner.bind_host_function(function)
    }

    fn read(&self, address: Address, ty: MemType) -> Result<Value, MemoryError> {
        self.inner.read(address, ty)
    }

    fn write_output(&mut self, text: &str) {
        self.inner.write_output(text)
    }

    fn take_output(&mut self) -> String {
        self.inner.take_output()
    }

    fn output(&self) -> &str {
        self.inner.output()
    }
}

/// Printer that keeps what it was asked to print
#[derive(Clone, Default)]
struct RecordingPrinter {
    seen: Rc<RefCell<Vec<(String, PrintFlags, Value)>>>,
}

impl ValuePrinter for RecordingPrinter {
    fn print_value(&mut self, out: &mut String, request: &PrintRequest<'_>) {
        self.seen
            .borrow_mut()
            .push((request.expr.to_string(), request.flags, request.value.clone()));
        out.push_str("<printed>\n");
    }
}

#[test]
fn test_declaration_then_statement_then_print() {
    let mut interp = interpreter();

    let declared = interp.evaluate_line("int x = 5;").unwrap();
    assert_eq!(declared.declarations, vec!["x".to_string()]);
    assert!(!declared.printed);
    assert_eq!(declared.value, None);
    let first = declared.module.unwrap();

    let stepped = interp.evaluate_line("x = x + 1;").unwrap();
    assert!(stepped.declarations.is_empty());
    let second = stepped.module.unwrap();
    assert_ne!(first, second);
    let address = interp.loader().global_address(first, "x");
    assert!(address.is_some());
    assert_eq!(interp.loader().global_address(second, "x"), address);
    assert_eq!(interp.read_global("x"), Some(Value::Int(6)));

    let printed = interp.evaluate_line("x").unwrap();
    assert!(printed.printed);
    assert_eq!(printed.flags, Some(PrintFlags::empty()));
    assert_eq!(printed.value, Some(Value::Int(6)));
    assert_eq!(printed.value_type, Some(Type::int()));
    assert_eq!(interp.take_output(), "6\n");
}

#[test]
fn test_unknown_name_is_resolved_at_run_time() {
    let requests = Rc::new(RefCell::new(Vec::new()));
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut interp = Interpreter::builder(InterpreterConfig::default())
        .loader(Box::new(Recording {
            inner: Machine::new(&InterpreterConfig::default()),
            requests: Rc::clone(&requests),
        }))
        .dynamic_scope(Box::new(Magic {
            calls: Rc::clone(&calls),
        }))
        .build();

    interp.evaluate_line("int y = 20;").unwrap();
    let outcome = interp.evaluate_line("magic(y)").unwrap();

    assert_eq!(outcome.deferred_calls, 1);
    assert!(outcome.deferred_failures.is_empty());
    assert_eq!(outcome.value, Some(Value::Int(41)));
    assert_eq!(outcome.value_type, None);
    assert_eq!(interp.take_output(), "41\n");
    assert_eq!(*calls.borrow(), vec![20]);

    let requests = requests.borrow();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].interpreter, interp.id());
    assert_eq!(requests[0].addresses, vec![interp.global_address("y").unwrap()]);
    assert!(requests[0].text.starts_with("magic("));
    assert!(interp.session().symbols().transient_ids().is_empty());
    assert!(interp.session().symbols().lookup("magic").is_none());
}

#[test]
fn test_failed_runtime_evaluation_is_reported() {
    let mut interp = interpreter();
    interp.evaluate_line("int v = 1;").unwrap();

    let outcome = interp.evaluate_line("nowhere(v);").unwrap();
    assert_eq!(outcome.deferred_calls, 1);
    assert_eq!(outcome.deferred_failures.len(), 1);
    assert!(outcome.deferred_failures[0].expression.starts_with("nowhere("));
    assert!(interp.session().symbols().transient_ids().is_empty());

    // The next fragment starts with a clean slate
    let next = interp.evaluate_line("v = 2;").unwrap();
    assert!(next.deferred_failures.is_empty());
    assert_eq!(interp.read_global("v"), Some(Value::Int(2)));
}

#[test]
fn test_failed_runtime_evaluation_yields_zero() {
    let mut interp = interpreter();
    interp.evaluate_line("int r = 0;\nint *pp;").unwrap();

    let outcome = interp.evaluate_line("r = (int)nowhere(1) + 1;").unwrap();
    assert_eq!(outcome.deferred_failures.len(), 1);
    assert_eq!(interp.read_global("r"), Some(Value::Int(1)));

    let outcome = interp
        .evaluate_line("if (nowhere(2)) { r = 5; } else { r = 7; }")
        .unwrap();
    assert_eq!(outcome.deferred_failures.len(), 1);
    assert_eq!(interp.read_global("r"), Some(Value::Int(7)));

    let outcome = interp
        .evaluate_line("while (nowhere(3)) { r = 100; }")
        .unwrap();
    assert_eq!(outcome.deferred_failures.len(), 1);
    assert_eq!(interp.read_global("r"), Some(Value::Int(7)));

    let outcome = interp
        .evaluate_line("{ int t = nowhere(4); r = t + 10; }")
        .unwrap();
    assert_eq!(outcome.deferred_failures.len(), 1);
    assert_eq!(interp.read_global("r"), Some(Value::Int(10)));

    let outcome = interp.evaluate_line("pp = (int *)nowhere(5);").unwrap();
    assert_eq!(outcome.deferred_failures.len(), 1);
    assert_eq!(interp.read_global("pp"), Some(Value::Null));
}

#[test]
fn test_failed_deferred_tail_is_not_printed() {
    let mut interp = interpreter();
    let outcome = interp.evaluate_line("nowhere(1)").unwrap();
    assert_eq!(outcome.deferred_failures.len(), 1);
    assert!(!outcome.printed);
    assert_eq!(interp.output(), "");
}

#[test]
fn test_unresolved_name_fails_without_nesting() {
    let requests = Rc::new(RefCell::new(Vec::new()));
    let mut interp = Interpreter::builder(InterpreterConfig::default())
        .loader(Box::new(Recording {
            inner: Machine::new(&InterpreterConfig::default()),
            requests: Rc::clone(&requests),
        }))
        .dynamic_scope(Box::new(Magic {
            calls: Rc::new(RefCell::new(Vec::new())),
        }))
        .build();

    let outcome = interp.evaluate_line("magic(nowhere(1));").unwrap();
    assert_eq!(outcome.deferred_failures.len(), 1);
    assert!(outcome.deferred_failures[0].message.contains("nowhere"));
    // The runtime compile reports the name instead of deferring it again
    assert_eq!(requests.borrow().len(), 1);
    assert!(interp.session().symbols().lookup("nowhere").is_none());
}

#[test]
fn test_compile_error_rolls_back() {
    let mut interp = interpreter();
    interp.evaluate_line("int kept = 1;").unwrap();
    let symbols = interp.session().symbols().clone();
    let global_text = interp.session().global_text().to_string();

    let err = interp
        .evaluate_line("int fresh = 2;\nint broken(void) { return missing; }")
        .unwrap_err();
    assert!(matches!(err, InterpreterError::Compile(_)));
    assert!(!err.keeps_declarations());
    assert_eq!(interp.session().symbols(), &symbols);
    assert_eq!(interp.session().global_text(), global_text);
    assert!(interp.session().symbols().lookup("fresh").is_none());

    // The name is free again
    interp.evaluate_line("int fresh = 3;").unwrap();
    assert_eq!(interp.read_global("fresh"), Some(Value::Int(3)));
}

#[test]
fn test_compile_errors_report_fragment_lines() {
    let mut interp = interpreter();
    let err = interp
        .evaluate_line("unknown_call(1);\nint q = nope;")
        .unwrap_err();
    let InterpreterError::Compile(failure) = &err else {
        panic!("expected a compile error, got {:?}", err);
    };
    let lines: Vec<usize> = failure
        .diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(|d| d.location.line)
        .collect();
    assert_eq!(lines, vec![2]);
    assert!(err.to_string().contains("at line 2,"), "{}", err);
    assert!(interp.session().symbols().lookup("q").is_none());
}

#[test]
fn test_rejected_input() {
    let mut interp = interpreter();
    let before = interp.session().symbols().len();
    let err = interp.evaluate_line("int = ;").unwrap_err();
    assert!(matches!(err, InterpreterError::InputRejected(_)));
    assert_eq!(interp.session().symbols().len(), before);
}

#[test]
fn test_empty_fragment_is_a_no_op() {
    let mut interp = interpreter();
    interp.evaluate_line("int a = 1;").unwrap();
    let decls = interp.session().symbols().len();
    let fragments = interp.session().fragment_count();

    for text in ["", "   \n\t", "// nothing here\n"] {
        let outcome = interp.evaluate_line(text).unwrap();
        assert_eq!(outcome.module, None);
        assert!(!outcome.printed);
    }
    assert_eq!(interp.session().symbols().len(), decls);
    assert_eq!(interp.session().fragment_count(), fragments);
    assert_eq!(interp.output(), "");
}

#[test]
fn test_runtime_trap_keeps_declarations() {
    let mut interp = interpreter();
    interp.evaluate_line("int *p = 0;").unwrap();

    let err = interp.evaluate_line("int survivor = 4;\n*p = 3;").unwrap_err();
    assert!(matches!(
        err,
        InterpreterError::Runtime(RuntimeError::NullDereference { .. })
    ));
    assert!(err.keeps_declarations());
    assert!(interp.session().symbols().lookup("survivor").is_some());
    assert_eq!(interp.read_global("survivor"), Some(Value::Int(4)));

    let err = interp.evaluate_line("int zero = 0;\n10 / zero").unwrap_err();
    assert!(matches!(
        err,
        InterpreterError::Runtime(RuntimeError::DivisionError { .. })
    ));
}

#[test]
fn test_trapping_initializer_keeps_the_variable() {
    let mut interp = interpreter();
    let err = interp.evaluate_line("int z = 1 / 0;").unwrap_err();
    assert!(matches!(
        err,
        InterpreterError::Runtime(RuntimeError::DivisionError { .. })
    ));
    assert!(err.keeps_declarations());
    assert!(interp.session().symbols().lookup("z").is_some());
    assert_eq!(interp.read_global("z"), Some(Value::Int(0)));

    interp.evaluate_line("z = 4;").unwrap();
    assert_eq!(interp.read_global("z"), Some(Value::Int(4)));
}

#[test]
fn test_functions_persist_across_fragments() {
    let mut interp = interpreter();
    interp
        .evaluate_line("int fact(int n) {\n  if (n <= 1) return 1;\n  return n * fact(n - 1);\n}")
        .unwrap();
    interp.evaluate_line("fact(5)").unwrap();
    assert_eq!(interp.take_output(), "120\n");

    let outcome = interp.execute_named_function("fact", "6").unwrap();
    assert_eq!(outcome.value, Some(Value::Int(720)));
    assert_eq!(outcome.value_type, Some(Type::int()));
    assert!(outcome.declarations.is_empty());
    assert_eq!(interp.take_output(), "");

    let err = interp.execute_named_function("nope", "").unwrap_err();
    assert!(matches!(err, InterpreterError::EntryPointNotFound(name) if name == "nope"));
}

#[test]
fn test_statements_and_printf() {
    let mut interp = interpreter();
    interp.evaluate_line("int total = 0;\nint i;").unwrap();
    interp
        .evaluate_line("for (i = 1; i <= 4; i++) { total += i; }\nprintf(\"total=%d\\n\", total);")
        .unwrap();
    assert_eq!(interp.take_output(), "total=10\n");
}

#[test]
fn test_aggregates_print_as_initializers() {
    let mut interp = interpreter();
    interp.evaluate_line("int arr[3] = {1, 2, 3};").unwrap();
    interp.evaluate_line("arr").unwrap();
    assert_eq!(interp.take_output(), "{ 1, 2, 3 }\n");

    interp
        .evaluate_line("struct P { int x; char y; };\nstruct P p = {7, 'z'};")
        .unwrap();
    interp.evaluate_line("p").unwrap();
    assert_eq!(interp.take_output(), "{ .x = 7, .y = 'z' }\n");
}

#[test]
fn test_printer_receives_flags() {
    let printer = RecordingPrinter::default();
    let mut interp = Interpreter::builder(InterpreterConfig::default())
        .printer(Box::new(printer.clone()))
        .build();

    interp.evaluate_line("int n = 3;").unwrap();
    interp.evaluate_line("&n").unwrap();
    interp.evaluate_line("n + 1").unwrap();
    interp.evaluate_line("n;").unwrap();

    let seen = printer.seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, "&n");
    assert_eq!(seen[0].1, PrintFlags::POINTER);
    assert_eq!(Some(seen[0].2.clone()), interp.global_address("n").map(Value::Pointer));
    assert_eq!(seen[1].1, PrintFlags::empty());
    assert_eq!(seen[1].2, Value::Int(4));
    assert_eq!(interp.output(), "<printed>\n<printed>\n");
}

#[test]
fn test_implicit_print_can_be_disabled() {
    let mut interp = Interpreter::new(InterpreterConfig::default().with_implicit_print(false));
    interp.evaluate_line("int q = 2;").unwrap();
    let outcome = interp.evaluate_line("q").unwrap();
    assert!(!outcome.printed);
    assert_eq!(interp.output(), "");
}

#[test]
fn test_load_file_includes_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counter.c");
    std::fs::write(
        &path,
        "int count = 0;\nint main(void) {\n  count = count + 1;\n  printf(\"run %d\\n\", count);\n  return 0;\n}\n",
    )
    .unwrap();

    let mut interp = interpreter();
    let loaded = interp.load_file(&path).unwrap();
    assert!(loaded.declarations.contains(&"count".to_string()));
    assert!(loaded.declarations.contains(&"main".to_string()));
    assert_eq!(interp.session().included_files().len(), 1);

    interp.load_file_and_call(&path, Some("main()")).unwrap();
    interp.load_file_and_call(&path, Some("main();")).unwrap();
    assert_eq!(interp.take_output(), "run 1\nrun 2\n");
    assert_eq!(interp.session().included_files().len(), 1);
    assert_eq!(interp.read_global("count"), Some(Value::Int(2)));
}

#[test]
fn test_missing_file_is_a_compile_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut interp = interpreter();
    let err = interp.load_file(dir.path().join("absent.c")).unwrap_err();
    assert!(matches!(err, InterpreterError::Compile(_)));
    assert!(err.to_string().contains("file not found"));
    assert!(interp.session().included_files().is_empty());
}
