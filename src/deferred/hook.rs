use crate::bridge::HostFunction;
use crate::session::{DeclContext, DeclId, DeclKind, LookupFailure, LookupHook, LookupSite, SymbolTable};
use tracing::trace;

/// Host-side names that can be resolved while a deferred expression runs
pub trait DynamicScope {
    /// Return a host function for `name`, or `None` if it is unknown here too.
    fn resolve(&mut self, name: &str, context: &DeclContext) -> Option<HostFunction>;
}

/// How [`DeferredLookup`] answers a failed lookup
pub enum LookupMode<'a> {
    /// Compiling a fragment: unknown names become placeholders and the
    /// expressions using them are deferred to run time
    Compile,
    /// Compiling the text of a deferred expression at run time: unknown names
    /// are offered to the dynamic scope, if any
    Runtime {
        scope: Option<&'a mut dyn DynamicScope>,
        context: DeclContext,
    },
}

/// The lookup-fallback hook installed while a fragment is compiled
pub struct DeferredLookup<'a> {
    mode: LookupMode<'a>,
    placeholders: Vec<DeclId>,
    host_functions: Vec<HostFunction>,
}

impl<'a> DeferredLookup<'a> {
    pub fn new(mode: LookupMode<'a>) -> Self {
        DeferredLookup {
            mode,
            placeholders: Vec::new(),
            host_functions: Vec::new(),
        }
    }

    /// Placeholder declarations created so far
    pub fn placeholders(&self) -> &[DeclId] {
        &self.placeholders
    }

    /// Host functions the dynamic scope supplied; they have to be bound in
    /// the loader before the fragment runs
    pub fn take_host_functions(&mut self) -> Vec<HostFunction> {
        std::mem::take(&mut self.host_functions)
    }
}

impl LookupHook for DeferredLookup<'_> {
    fn on_failed_lookup(
        &mut self,
        name: &str,
        failure: LookupFailure,
        site: &LookupSite<'_>,
        symbols: &mut SymbolTable,
    ) -> Option<DeclId> {
        if failure != LookupFailure::NotFound {
            trace!(name, ?failure, "declining to resolve lookup");
            return None;
        }

        match &mut self.mode {
            LookupMode::Compile => {
                let id = symbols.declare(name, DeclKind::Placeholder, site.fragment, site.location);
                trace!(name, function = site.function, "created placeholder declaration");
                self.placeholders.push(id);
                Some(id)
            }
            LookupMode::Runtime { scope, context } => {
                let function = scope.as_deref_mut()?.resolve(name, context)?;
                let id = symbols.declare(
                    name,
                    DeclKind::HostFunction {
                        signature: function.signature.clone(),
                    },
                    site.fragment,
                    site.location,
                );
                trace!(name, signature = %function.signature, "declared host function");
                self.host_functions.push(function);
                Some(id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::value::Value;
    use crate::parser::ast::{SourceLocation, Type};
    use crate::session::Signature;
    use std::rc::Rc;

    struct Answer;

    impl DynamicScope for Answer {
        fn resolve(&mut self, name: &str, _context: &DeclContext) -> Option<HostFunction> {
            (name == "answer").then(|| {
                HostFunction::new(
                    "answer",
                    Signature::new(Type::int(), vec![]),
                    Rc::new(|_: &[Value]| Ok(Value::Int(42))),
                )
            })
        }
    }

    fn site() -> LookupSite<'static> {
        LookupSite {
            function: "__incc_stmt_0",
            fragment: 0,
            location: SourceLocation::new(1, 1),
        }
    }

    #[test]
    fn test_compile_mode_creates_placeholders() {
        let mut symbols = SymbolTable::new();
        let mut hook = DeferredLookup::new(LookupMode::Compile);
        let id = hook.on_failed_lookup("magic", LookupFailure::NotFound, &site(), &mut symbols);
        assert!(id.is_some());
        assert_eq!(hook.placeholders().len(), 1);
        assert_eq!(symbols.lookup("magic").map(|d| &d.kind), Some(&DeclKind::Placeholder));

        let declined = hook.on_failed_lookup("v", LookupFailure::NotAFunction, &site(), &mut symbols);
        assert!(declined.is_none());
        assert_eq!(symbols.len(), 1);
    }

    #[test]
    fn test_runtime_mode_consults_dynamic_scope() {
        let mut symbols = SymbolTable::new();
        let mut scope = Answer;
        let mut hook = DeferredLookup::new(LookupMode::Runtime {
            scope: Some(&mut scope),
            context: DeclContext {
                function: "__incc_stmt_0".into(),
                fragment: 0,
            },
        });
        assert!(hook
            .on_failed_lookup("answer", LookupFailure::NotFound, &site(), &mut symbols)
            .is_some());
        assert!(hook
            .on_failed_lookup("unknown", LookupFailure::NotFound, &site(), &mut symbols)
            .is_none());
        assert!(hook.placeholders().is_empty());
        assert_eq!(hook.take_host_functions().len(), 1);
        assert!(matches!(
            symbols.lookup("answer").map(|d| &d.kind),
            Some(DeclKind::HostFunction { .. })
        ));
    }
}
