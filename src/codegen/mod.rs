//! Code generator
//!
//! Lowers the typed items of one fragment into an [`ir::Module`]. Generation
//! is incremental: only the items the fragment introduced are lowered.
//! Globals defined by earlier fragments appear in the module as external
//! slots (`defined == false`) that the execution bridge binds to their
//! existing addresses.

pub mod ir;
mod lower;

pub use ir::Module;

use crate::bridge::CodeGenerator;
use crate::parser::ast::{SourceLocation, Type};
use crate::session::{CompiledUnit, Session};
use lower::Lowerer;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    #[error("type '{ty}' has no storage layout at line {}", .location.line)]
    IncompleteType { ty: Type, location: SourceLocation },

    #[error("'{name}' is not a global variable at line {}", .location.line)]
    UnknownGlobal { name: String, location: SourceLocation },

    #[error("local #{id} does not exist at line {}", .location.line)]
    UnknownLocal { id: usize, location: SourceLocation },

    #[error("type '{ty}' has no member '{field}' at line {}", .location.line)]
    UnknownField {
        ty: Type,
        field: String,
        location: SourceLocation,
    },

    #[error("expression at line {} does not designate an object", .location.line)]
    NotAnLvalue { location: SourceLocation },

    #[error("expression at line {} still has an unresolved type", .location.line)]
    Unresolved { location: SourceLocation },

    #[error("call to unresolved function '{name}' at line {}", .location.line)]
    UnresolvedCall { name: String, location: SourceLocation },

    #[error("unsupported construct at line {}: {message}", .location.line)]
    Unsupported {
        message: String,
        location: SourceLocation,
    },
}

/// The bundled back end, producing modules for [`crate::vm::Machine`]
#[derive(Debug, Default)]
pub struct IrGenerator {
    generated: usize,
}

impl IrGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodeGenerator for IrGenerator {
    fn generate(&mut self, unit: &CompiledUnit, session: &Session) -> Result<Module, CodegenError> {
        let name = format!("fragment_{}.{}", unit.fragment, self.generated);
        self.generated += 1;
        Lowerer::new(session, name, unit.fragment).lower_items(&unit.items)
    }
}

#[cfg(test)]
mod tests {
    use super::ir::{ExprKind, Stmt};
    use super::*;
    use crate::memory::MemType;
    use crate::sema::CFrontEnd;
    use crate::session::{IncrementalCompiler, NoLookupHook};

    fn compile(compiler: &mut IncrementalCompiler, source: &str) -> CompiledUnit {
        compiler.parse(source, &mut NoLookupHook).unwrap()
    }

    #[test]
    fn test_earlier_globals_become_external_slots() {
        let mut compiler = IncrementalCompiler::new(Box::new(CFrontEnd::new("__incc_stmt_")));
        let mut generator = IrGenerator::new();

        let first = compile(&mut compiler, "int x = 5;\nlong table[4];");
        let module = generator.generate(&first, compiler.session()).unwrap();
        assert_eq!(module.globals.len(), 2);
        assert!(module.globals.iter().all(|g| g.defined));
        assert_eq!(module.global("table").map(|g| g.size), Some(32));
        assert_eq!(module.global("x").map(|g| g.init.len()), Some(1));

        let second = compile(&mut compiler, "void __incc_stmt_1(void) { x = x + 1; }");
        let module = generator.generate(&second, compiler.session()).unwrap();
        let x = module.global("x").unwrap();
        assert!(!x.defined);
        assert!(x.binding.is_none());
        assert_eq!(module.functions.len(), 1);
        assert_ne!(module.name, "fragment_0.0");
    }

    #[test]
    fn test_struct_initializer_offsets() {
        let mut compiler = IncrementalCompiler::new(Box::new(CFrontEnd::new("__incc_stmt_")));
        let unit = compile(
            &mut compiler,
            "struct P { char tag; int x; long y; };\nstruct P p = {'a', 2, 3};",
        );
        let module = IrGenerator::new().generate(&unit, compiler.session()).unwrap();
        let p = module.global("p").unwrap();
        let layout: Vec<(usize, MemType)> = p.init.iter().map(|s| (s.offset, s.mem)).collect();
        assert_eq!(
            layout,
            vec![(0, MemType::Char), (1, MemType::Int), (5, MemType::Long)]
        );
    }

    #[test]
    fn test_strings_are_pooled() {
        let mut compiler = IncrementalCompiler::new(Box::new(CFrontEnd::new("__incc_stmt_")));
        let unit = compile(
            &mut compiler,
            "void __incc_stmt_0(void) { printf(\"hi\\n\"); printf(\"hi\\n\"); printf(\"%d\", 1); }",
        );
        let module = IrGenerator::new().generate(&unit, compiler.session()).unwrap();
        assert_eq!(module.strings, vec!["hi\n".to_string(), "%d".to_string()]);
        let body = &module.function("__incc_stmt_0").unwrap().body;
        assert!(matches!(
            &body[0],
            Stmt::Expr(e) if matches!(e.kind, ExprKind::Printf { .. })
        ));
    }

    #[test]
    fn test_pointer_arithmetic_is_scaled() {
        let mut compiler = IncrementalCompiler::new(Box::new(CFrontEnd::new("__incc_stmt_")));
        let unit = compile(
            &mut compiler,
            "long *step(long *p) { return p + 2; }",
        );
        let module = IrGenerator::new().generate(&unit, compiler.session()).unwrap();
        let step = module.function("step").unwrap();
        assert_eq!(step.params, vec![MemType::Ptr]);
        assert_eq!(step.returns, Some(MemType::Ptr));
        match &step.body[0] {
            Stmt::Return(Some(e)) => {
                assert!(matches!(e.kind, ExprKind::PtrAdd { scale: 8, .. }))
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }
}
