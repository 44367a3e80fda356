//! Source wrapper and statement classifier
//!
//! A fragment typed at the prompt mixes file-scope items (functions, structs,
//! includes, variables) with statements that have to run. [`wrap`] parses the
//! whole fragment once inside a throwaway function body, only to learn where
//! each item starts and ends, and then sorts the items:
//!
//! | Item | Goes to |
//! |------|---------|
//! | function, prototype, struct, `#include` | global text, verbatim |
//! | declaration without initializer | global text |
//! | declaration with a trap-free constant scalar, `const` or struct initializer | global text |
//! | declaration with any other scalar initializer | bare declaration to global text, `name = init;` to the statements |
//! | array declaration with `{...}` | bare declaration to global text, one `a[i] = v;` per element to the statements |
//! | anything else | statements, verbatim |
//!
//! If the fragment ends without a `;`, its final expression (or the name
//! declared by its final declaration) becomes the print candidate.
//! [`WrappedUnit::fragment_line`] maps lines of the generated source back to
//! the fragment for diagnostics.
//!
//! Global variables live for the whole session, so initializers kept in the
//! global text are evaluated when the fragment's module is loaded, before
//! any of its statements run.

pub(crate) mod render;

use crate::constants::CLASSIFY_FUNCTION;
use crate::parser::ast::{AstNode, FragmentItem, Type};
use crate::parser::{ParseError, Parser};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WrapError {
    /// The fragment is not a valid sequence of items
    #[error("{0}")]
    Rejected(ParseError),
}

/// A fragment rewritten as file-scope text plus an entry function
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WrappedUnit {
    /// Declarations promoted to file scope, in source order
    pub global_text: String,
    /// Statements of the entry function, in source order
    pub statements: Vec<String>,
    /// Final expression of a fragment that ended without `;`
    pub print_candidate: Option<String>,
    /// Name of the synthesized entry function
    pub entry: String,
    /// Fragment line of each line of `global_text`
    global_lines: Vec<usize>,
    /// Fragment line where each statement starts
    statement_lines: Vec<usize>,
    tail_line: usize,
    /// Fragment line of the item being classified
    item_line: usize,
}

impl WrappedUnit {
    /// Nothing to declare and nothing to run
    pub fn is_empty(&self) -> bool {
        self.global_text.trim().is_empty() && !self.has_entry()
    }

    pub fn has_entry(&self) -> bool {
        !self.statements.is_empty() || self.print_candidate.is_some()
    }

    /// The translation unit handed to the front end
    pub fn source(&self) -> String {
        let mut source = self.global_text.clone();
        if self.has_entry() {
            source.push_str(&format!("void {}(void) {{\n", self.entry));
            for statement in &self.statements {
                source.push_str(statement);
                source.push('\n');
            }
            if let Some(tail) = &self.print_candidate {
                source.push_str(tail);
                source.push_str(";\n");
            }
            source.push_str("}\n");
        }
        source
    }

    /// Map a line of [`WrappedUnit::source`] back to the fragment line it
    /// came from. Lines of the synthesized entry function have none.
    pub fn fragment_line(&self, line: usize) -> Option<usize> {
        let index = line.checked_sub(1)?;
        if let Some(&line) = self.global_lines.get(index) {
            return Some(line);
        }
        if !self.has_entry() {
            return None;
        }
        // Skip the entry function's header
        let mut index = index.checked_sub(self.global_lines.len() + 1)?;
        let tail = self.print_candidate.iter().map(|tail| (tail, self.tail_line));
        for (text, first) in self.statements.iter().zip(self.statement_lines.iter().copied()).chain(tail) {
            let lines = text.lines().count().max(1);
            if index < lines {
                return Some(first + index);
            }
            index -= lines;
        }
        None
    }

    fn push_global(&mut self, text: &str) {
        self.global_text.push_str(text);
        if !text.ends_with('\n') {
            self.global_text.push('\n');
        }
        let first = self.item_line;
        self.global_lines
            .extend((0..text.lines().count().max(1)).map(|k| first + k));
    }

    fn push_statement(&mut self, text: String) {
        self.statements.push(text);
        self.statement_lines.push(self.item_line);
    }
}

/// Classify `fragment` and wrap its statements in a function named `entry`.
pub fn wrap(fragment: &str, entry: &str) -> Result<WrappedUnit, WrapError> {
    let mut unit = WrappedUnit {
        entry: entry.to_string(),
        ..WrappedUnit::default()
    };

    let wrapped = format!("void {}(void) {{\n{}\n}}\n", CLASSIFY_FUNCTION, fragment);
    let items = Parser::new(&wrapped)
        .and_then(|mut parser| parser.parse_wrapped_fragment())
        .map_err(|mut err| {
            // Report lines relative to the fragment, not the wrapper
            err.location.line = err.location.line.saturating_sub(1).max(1);
            WrapError::Rejected(err)
        })?;

    let count = items.len();
    for (index, item) in items.iter().enumerate() {
        let slice = item.span.slice(&wrapped);
        let start = item.span.start + (slice.len() - slice.trim_start().len());
        // The wrapper's header takes the first line
        unit.item_line = wrapped[..start].matches('\n').count().max(1);
        let open_tail = index + 1 == count && !item.terminated;
        classify(&mut unit, item, slice.trim(), open_tail);
    }

    debug!(
        items = count,
        statements = unit.statements.len(),
        print = unit.print_candidate.is_some(),
        "classified fragment"
    );
    Ok(unit)
}

fn classify(unit: &mut WrappedUnit, item: &FragmentItem, text: &str, open_tail: bool) {
    match item.nodes.as_slice() {
        [AstNode::Include { path, system, .. }] => {
            let directive = if *system {
                format!("#include <{}>", path)
            } else {
                format!("#include \"{}\"", path)
            };
            unit.push_global(&directive);
        }
        [AstNode::FunctionDef { .. }] | [AstNode::StructDef { .. }] => unit.push_global(text),
        [AstNode::ExpressionStatement { .. }] if open_tail => {
            trace!(expr = text, "print candidate");
            unit.print_candidate = Some(text.to_string());
            unit.tail_line = unit.item_line;
        }
        nodes if !nodes.is_empty() && nodes.iter().all(|n| matches!(n, AstNode::VarDecl { .. })) => {
            classify_declaration(unit, nodes, text, item.terminated);
            if open_tail {
                if let Some(AstNode::VarDecl { name, .. }) = nodes.last() {
                    unit.print_candidate = Some(name.clone());
                    unit.tail_line = unit.item_line;
                }
            }
        }
        _ => {
            let statement = if item.terminated {
                text.to_string()
            } else {
                format!("{};", text)
            };
            unit.push_statement(statement);
        }
    }
}

/// Initializers that stay attached to the declaration in the global text
fn stays_global(ty: &Type, init: &AstNode) -> bool {
    match init {
        AstNode::InitList { .. } => !ty.is_array() || ty.is_const,
        _ => ty.is_const || render::is_constant(init),
    }
}

fn classify_declaration(unit: &mut WrappedUnit, nodes: &[AstNode], text: &str, terminated: bool) {
    let verbatim = nodes.iter().all(|node| match node {
        AstNode::VarDecl {
            var_type,
            init: Some(init),
            ..
        } => stays_global(var_type, init),
        _ => true,
    });
    if verbatim {
        if terminated {
            unit.push_global(text);
        } else {
            unit.push_global(&format!("{};", text));
        }
        return;
    }

    for node in nodes {
        let AstNode::VarDecl {
            name,
            var_type,
            init,
            ..
        } = node
        else {
            continue;
        };
        let mut ty = var_type.clone();
        match init.as_deref() {
            None => unit.push_global(&format!("{};", ty.declare(name))),
            Some(init) if stays_global(&ty, init) => {
                unit.push_global(&format!("{} = {};", ty.declare(name), render::expression(init)));
            }
            Some(AstNode::InitList { items, .. }) => {
                if ty.array_dims.first() == Some(&None) && !items.is_empty() {
                    ty.array_dims[0] = Some(items.len());
                }
                let mut assignments = Vec::new();
                if element_assignments(name, &ty, items, &mut assignments) {
                    unit.push_global(&format!("{};", ty.declare(name)));
                    for assignment in assignments {
                        unit.push_statement(assignment);
                    }
                } else {
                    let init = render::expression(&AstNode::InitList {
                        items: items.clone(),
                        location: *node.location(),
                    });
                    unit.push_global(&format!("{} = {};", var_type.declare(name), init));
                }
            }
            Some(init) => {
                unit.push_global(&format!("{};", ty.declare(name)));
                unit.push_statement(format!("{} = {};", name, render::expression(init)));
            }
        }
    }
}

/// One `target[i] = value;` per scalar element, recursing into nested lists.
/// Returns false when an element is a struct, which is initialized as a whole.
fn element_assignments(target: &str, ty: &Type, items: &[AstNode], out: &mut Vec<String>) -> bool {
    let element = ty.element();
    for (index, item) in items.iter().enumerate() {
        let place = format!("{}[{}]", target, index);
        match item {
            AstNode::InitList { items: inner, .. } if element.is_array() => {
                if !element_assignments(&place, &element, inner, out) {
                    return false;
                }
            }
            AstNode::InitList { items: inner, .. } if !element.is_struct() => match inner.as_slice() {
                [single] => out.push(format!("{} = {};", place, render::expression(single))),
                _ => return false,
            },
            AstNode::InitList { .. } => return false,
            value => {
                if element.is_array() || element.is_struct() {
                    return false;
                }
                out.push(format!("{} = {};", place, render::expression(value)));
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ENTRY: &str = "__incc_stmt_0";

    #[test]
    fn test_empty_fragment() {
        let unit = wrap("", ENTRY).unwrap();
        assert!(unit.is_empty());
        let unit = wrap("   \n // only a comment\n", ENTRY).unwrap();
        assert!(unit.is_empty());
        assert_eq!(unit.source(), "");
    }

    #[test]
    fn test_constant_declaration_stays_global() {
        let unit = wrap("int x = 5;", ENTRY).unwrap();
        assert_eq!(unit.global_text, "int x = 5;\n");
        assert!(unit.statements.is_empty());
        assert_eq!(unit.print_candidate, None);
        assert!(!unit.has_entry());
    }

    #[test]
    fn test_statement_and_print_candidate() {
        let unit = wrap("x = x + 1;", ENTRY).unwrap();
        assert_eq!(unit.global_text, "");
        assert_eq!(unit.statements, vec!["x = x + 1;".to_string()]);

        let unit = wrap("x", ENTRY).unwrap();
        assert_eq!(unit.print_candidate.as_deref(), Some("x"));
        assert_eq!(unit.source(), "void __incc_stmt_0(void) {\nx;\n}\n");
    }

    #[test]
    fn test_runtime_initializer_becomes_assignment() {
        let unit = wrap("int y = x * 2, z;", ENTRY).unwrap();
        assert_eq!(unit.global_text, "int y;\nint z;\n");
        assert_eq!(unit.statements, vec!["y = (x * 2);".to_string()]);
    }

    #[test]
    fn test_source_lines_map_back_to_the_fragment() {
        let unit = wrap("int a = 1;\nfoo(a);\n\nint q = a * 2;\nq", ENTRY).unwrap();
        assert_eq!(
            unit.source(),
            "int a = 1;\nint q;\nvoid __incc_stmt_0(void) {\nfoo(a);\nq = (a * 2);\nq;\n}\n"
        );
        let mapped: Vec<_> = (1..=8).map(|line| unit.fragment_line(line)).collect();
        assert_eq!(
            mapped,
            vec![Some(1), Some(4), None, Some(2), Some(4), Some(5), None, None]
        );
    }

    #[test]
    fn test_trapping_initializer_runs_as_statement() {
        let unit = wrap("int z = 1 / 0;", ENTRY).unwrap();
        assert_eq!(unit.global_text, "int z;\n");
        assert_eq!(unit.statements, vec!["z = (1 / 0);".to_string()]);

        let unit = wrap("int w = 6 / 3;", ENTRY).unwrap();
        assert_eq!(unit.global_text, "int w = 6 / 3;\n");
        assert!(unit.statements.is_empty());
    }

    #[test]
    fn test_array_aggregate_is_split() {
        let unit = wrap("int m[2][2] = {{1, 2}, {3, 4}};", ENTRY).unwrap();
        assert_eq!(unit.global_text, "int m[2][2];\n");
        assert_eq!(
            unit.statements,
            vec![
                "m[0][0] = 1;".to_string(),
                "m[0][1] = 2;".to_string(),
                "m[1][0] = 3;".to_string(),
                "m[1][1] = 4;".to_string(),
            ]
        );

        let unit = wrap("int a[] = {7, 8, 9};", ENTRY).unwrap();
        assert_eq!(unit.global_text, "int a[3];\n");
        assert_eq!(unit.statements.len(), 3);
    }

    #[test]
    fn test_struct_aggregates_stay_global() {
        let unit = wrap("struct P { int x; int y; };\nstruct P p = {1, 2};", ENTRY).unwrap();
        assert_eq!(unit.global_text, "struct P { int x; int y; };\nstruct P p = {1, 2};\n");

        let unit = wrap("struct P ps[2] = {{1, 2}, {3, 4}};", ENTRY).unwrap();
        assert_eq!(unit.global_text, "struct P ps[2] = {{1, 2}, {3, 4}};\n");
        assert!(unit.statements.is_empty());
    }

    #[test]
    fn test_functions_and_includes_go_global() {
        let unit = wrap(
            "#include \"defs.h\"\nint sq(int v) { return v * v; }\nsq(3)",
            ENTRY,
        )
        .unwrap();
        assert_eq!(
            unit.global_text,
            "#include \"defs.h\"\nint sq(int v) { return v * v; }\n"
        );
        assert_eq!(unit.print_candidate.as_deref(), Some("sq(3)"));
    }

    #[test]
    fn test_unterminated_declaration_echoes_name() {
        let unit = wrap("int k = 3", ENTRY).unwrap();
        assert_eq!(unit.global_text, "int k = 3;\n");
        assert_eq!(unit.print_candidate.as_deref(), Some("k"));
    }

    #[test]
    fn test_control_flow_is_a_statement() {
        let unit = wrap("for (i = 0; i < 3; i++) { total += i; }", ENTRY).unwrap();
        assert_eq!(unit.statements.len(), 1);
        assert!(unit.statements[0].starts_with("for"));
    }

    #[test]
    fn test_parse_error_rejects_fragment() {
        let err = wrap("int = ;", ENTRY).unwrap_err();
        let WrapError::Rejected(parse) = err;
        assert_eq!(parse.location.line, 1);

        assert!(wrap("x = 1 y = 2;", ENTRY).is_err());
        assert!(wrap("x; } void g(void) {", ENTRY).is_err());
    }
}
