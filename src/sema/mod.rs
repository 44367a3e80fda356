//! Semantic analysis for the C subset
//!
//! [`CFrontEnd`] is the [`FrontEnd`] used by the interpreter: it parses a
//! fragment with the recursive-descent [`Parser`], then checks
//! every top-level item against the session's symbol table, producing the
//! typed tree in [`tast`].
//!
//! Name-resolution failures inside statement functions (those whose name
//! starts with the configured statement prefix) are offered to the lookup
//! hook; everywhere else they are ordinary errors.

mod check;
mod diagnostic;
mod expr;
pub mod tast;

pub use diagnostic::{Diagnostic, Severity};

use crate::parser::Parser;
use crate::session::{FrontEnd, FrontEndOutput, LookupHook, Session};
use check::Checker;
use std::path::PathBuf;
use tracing::debug;

/// Parser and checker for the supported C subset
#[derive(Debug, Clone)]
pub struct CFrontEnd {
    statement_prefix: String,
    include_dirs: Vec<PathBuf>,
}

impl CFrontEnd {
    pub fn new(statement_prefix: impl Into<String>) -> Self {
        CFrontEnd {
            statement_prefix: statement_prefix.into(),
            include_dirs: Vec::new(),
        }
    }

    /// Directories searched for `#include "..."` after the including file's own
    pub fn with_include_dirs(mut self, include_dirs: Vec<PathBuf>) -> Self {
        self.include_dirs = include_dirs;
        self
    }
}

impl FrontEnd for CFrontEnd {
    fn parse(
        &mut self,
        source: &str,
        fragment: usize,
        session: &mut Session,
        hook: &mut dyn LookupHook,
    ) -> FrontEndOutput {
        let program = match Parser::new(source).and_then(|mut parser| parser.parse_program()) {
            Ok(program) => program,
            Err(err) => {
                debug!(fragment, %err, "fragment failed to parse");
                return FrontEndOutput {
                    items: Vec::new(),
                    diagnostics: vec![Diagnostic::error(err.message, err.location)],
                };
            }
        };

        let mut checker = Checker::new(
            session,
            hook,
            fragment,
            &self.statement_prefix,
            &self.include_dirs,
        );
        for node in &program.nodes {
            checker.check_top_level(node);
        }
        checker.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::tast::{CallTarget, ExprKind, Item, Stmt};
    use super::*;
    use crate::parser::ast::Type;
    use crate::session::{
        DeclId, DeclKind, LookupFailure, LookupSite, NoLookupHook, SymbolTable,
    };
    use pretty_assertions::assert_eq;

    const PREFIX: &str = "__incc_stmt_";

    fn check(session: &mut Session, source: &str) -> FrontEndOutput {
        let fragment = session.begin_fragment(source);
        CFrontEnd::new(PREFIX).parse(source, fragment, session, &mut NoLookupHook)
    }

    fn errors(output: &FrontEndOutput) -> Vec<String> {
        output
            .diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| d.message.clone())
            .collect()
    }

    /// Resolves every failed lookup to a placeholder and records the calls
    #[derive(Default)]
    struct PlaceholderHook {
        seen: Vec<(String, LookupFailure)>,
    }

    impl LookupHook for PlaceholderHook {
        fn on_failed_lookup(
            &mut self,
            name: &str,
            failure: LookupFailure,
            site: &LookupSite<'_>,
            symbols: &mut SymbolTable,
        ) -> Option<DeclId> {
            self.seen.push((name.to_string(), failure));
            if failure != LookupFailure::NotFound {
                return None;
            }
            Some(symbols.declare(name, DeclKind::Placeholder, site.fragment, site.location))
        }
    }

    #[test]
    fn test_declarations_persist_across_fragments() {
        let mut session = Session::new();
        let first = check(&mut session, "int x = 3;\nint twice(int v) { return v * 2; }\n");
        assert!(errors(&first).is_empty(), "{:?}", first.diagnostics);

        let second = check(
            &mut session,
            "void __incc_stmt_1(void) { x = twice(x); }\n",
        );
        assert!(errors(&second).is_empty(), "{:?}", second.diagnostics);
        assert!(matches!(
            session.symbols().lookup("x").map(|d| &d.kind),
            Some(DeclKind::Variable { ty }) if *ty == Type::int()
        ));
    }

    #[test]
    fn test_redefinition_is_an_error() {
        let mut session = Session::new();
        check(&mut session, "int x;\nint f(void) { return 1; }\n");
        let output = check(&mut session, "long x;\n");
        assert_eq!(
            errors(&output),
            vec!["redefinition of 'x' (previously declared as a variable)".to_string()]
        );
        let output = check(&mut session, "int f(void) { return 2; }\n");
        assert_eq!(errors(&output), vec!["redefinition of function 'f'".to_string()]);
    }

    #[test]
    fn test_prototype_then_definition() {
        let mut session = Session::new();
        let output = check(&mut session, "int f(int a);\nint f(int a);\nint f(int b) { return b; }\n");
        assert!(errors(&output).is_empty(), "{:?}", output.diagnostics);
        assert_eq!(output.diagnostics.len(), 1);
        assert_eq!(output.diagnostics[0].severity, Severity::Warning);

        let output = check(&mut session, "long f(int a);\n");
        assert_eq!(errors(&output).len(), 1);
        assert!(errors(&output)[0].starts_with("conflicting types for 'f'"));
    }

    #[test]
    fn test_unknown_call_outside_statement_body_ignores_hook() {
        let mut session = Session::new();
        let source = "int g(void) { return magic(); }\n";
        let fragment = session.begin_fragment(source);
        let mut hook = PlaceholderHook::default();
        let output = CFrontEnd::new(PREFIX).parse(source, fragment, &mut session, &mut hook);
        assert_eq!(errors(&output), vec!["call to undeclared function 'magic'".to_string()]);
        assert!(hook.seen.is_empty());
    }

    #[test]
    fn test_hook_resolves_placeholder_in_statement_body() {
        let mut session = Session::new();
        let source = "void __incc_stmt_0(void) { int y = (int)magic(1) + 2; magic(3) + 4; }\n";
        let fragment = session.begin_fragment(source);
        let mut hook = PlaceholderHook::default();
        let output = CFrontEnd::new(PREFIX).parse(source, fragment, &mut session, &mut hook);
        assert!(errors(&output).is_empty(), "{:?}", output.diagnostics);
        assert_eq!(hook.seen.len(), 1);

        let Item::Function(function) = &output.items[0] else {
            panic!("expected a function");
        };
        assert!(function.is_statement_body);
        // `(int)magic(1) + 2` is known; `magic(3) + 4` stays dependent
        match &function.body[0] {
            Stmt::Local { init: Some(super::tast::Initializer::Expr(e)), .. } => {
                assert_eq!(e.known_type(), Some(&Type::int()));
            }
            other => panic!("unexpected statement {:?}", other),
        }
        match &function.body[1] {
            Stmt::Expr(e) => {
                assert!(e.is_artificially_dependent());
                let ExprKind::Binary { lhs, .. } = &e.kind else {
                    panic!("expected a binary expression");
                };
                assert!(matches!(
                    lhs.kind,
                    ExprKind::Call { target: CallTarget::Placeholder, .. }
                ));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_calling_a_variable_is_an_error() {
        let mut session = Session::new();
        check(&mut session, "int v;\n");
        let source = "void __incc_stmt_1(void) { v(); }\n";
        let fragment = session.begin_fragment(source);
        let mut hook = PlaceholderHook::default();
        let output = CFrontEnd::new(PREFIX).parse(source, fragment, &mut session, &mut hook);
        assert!(hook.seen.is_empty());
        let errors = errors(&output);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("'v'") && errors[0].ends_with("is not a function"));
        assert!(session.symbols().transient_ids().is_empty());
        assert!(matches!(
            session.symbols().lookup("v").map(|d| &d.kind),
            Some(DeclKind::Variable { .. })
        ));
    }

    #[test]
    fn test_type_errors() {
        let mut session = Session::new();
        let output = check(
            &mut session,
            "struct P { int x; };\nvoid __incc_stmt_0(void) { struct P p; int *q; q = 5; p + 1; p.y = 2; }\n",
        );
        let errs = errors(&output);
        assert_eq!(errs.len(), 3, "{:?}", errs);
        assert!(errs[0].starts_with("incompatible types when assigning"));
        assert!(errs[1].starts_with("invalid operands to binary expression"));
        assert_eq!(errs[2], "no member named 'y' in 'struct P'");
    }

    #[test]
    fn test_const_discard_warns() {
        let mut session = Session::new();
        let output = check(&mut session, "const char *s = \"hi\";\nchar *t = s;\n");
        assert!(errors(&output).is_empty());
        assert_eq!(output.diagnostics.len(), 1);
        assert!(output.diagnostics[0].message.contains("discards const"));
    }

    #[test]
    fn test_unsized_array_takes_initializer_length() {
        let mut session = Session::new();
        let output = check(&mut session, "int a[] = {1, 2, 3};\nint b[];\n");
        assert_eq!(errors(&output).len(), 1);
        match &output.items[0] {
            Item::Global(global) => assert_eq!(global.ty, Type::int().with_array(Some(3))),
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_sizeof_is_long_constant() {
        let mut session = Session::new();
        let output = check(
            &mut session,
            "struct P { int x; long y; char z[3]; };\nlong n = sizeof(struct P);\n",
        );
        assert!(errors(&output).is_empty(), "{:?}", output.diagnostics);
        match &output.items[0] {
            Item::Global(global) => match &global.init {
                Some(super::tast::Initializer::Expr(e)) => {
                    assert_eq!(e.kind, ExprKind::IntConst(15));
                    assert_eq!(e.known_type(), Some(&Type::long()));
                }
                other => panic!("unexpected initializer {:?}", other),
            },
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_break_outside_loop() {
        let mut session = Session::new();
        let output = check(&mut session, "void f(void) { break; while (1) { break; } }\n");
        assert_eq!(errors(&output), vec!["'break' statement not in loop".to_string()]);
    }

    #[test]
    fn test_block_scoping() {
        let mut session = Session::new();
        let output = check(
            &mut session,
            "int f(void) { int x = 1; { int x = 2; x = x + 1; } for (int i = 0; i < 3; i++) { x += i; } return x; }\n",
        );
        assert!(errors(&output).is_empty(), "{:?}", output.diagnostics);
        let Item::Function(function) = &output.items[0] else {
            panic!("expected a function");
        };
        assert_eq!(function.locals.len(), 3);

        let output = check(&mut session, "int g(void) { int y; int y; return 0; }\n");
        assert_eq!(errors(&output), vec!["redefinition of 'y'".to_string()]);
    }

    #[test]
    fn test_include_once() {
        let dir = tempfile::tempdir().unwrap();
        let header = dir.path().join("defs.h");
        std::fs::write(&header, "int shared = 7;\nint bump(int v) { return v + 1; }\n").unwrap();

        let mut session = Session::new();
        let mut front_end = CFrontEnd::new(PREFIX).with_include_dirs(vec![dir.path().to_path_buf()]);
        for _ in 0..2 {
            let source = "#include \"defs.h\"\n";
            let fragment = session.begin_fragment(source);
            let output = front_end.parse(source, fragment, &mut session, &mut NoLookupHook);
            assert!(errors(&output).is_empty(), "{:?}", output.diagnostics);
        }
        assert_eq!(session.included_files().len(), 1);
        assert!(session.symbols().lookup("bump").is_some());

        let source = "#include \"missing.h\"\n";
        let fragment = session.begin_fragment(source);
        let output = front_end.parse(source, fragment, &mut session, &mut NoLookupHook);
        assert_eq!(errors(&output), vec!["'missing.h' file not found".to_string()]);
    }

    #[test]
    fn test_errors_in_included_file_point_at_the_include() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.h"), "int ok = 1;\n\nint broken(void) { return nope; }\n").unwrap();

        let mut session = Session::new();
        let mut front_end = CFrontEnd::new(PREFIX).with_include_dirs(vec![dir.path().to_path_buf()]);
        let source = "int before;\n#include \"bad.h\"\n";
        let fragment = session.begin_fragment(source);
        let output = front_end.parse(source, fragment, &mut session, &mut NoLookupHook);

        let diagnostic = output.diagnostics.iter().find(|d| d.is_error()).unwrap();
        assert_eq!(diagnostic.location.line, 2);
        assert!(diagnostic.message.contains("bad.h"));
        assert!(diagnostic.message.contains("line 3"));
        assert!(diagnostic.message.ends_with("'nope'"), "{}", diagnostic.message);
    }
}
