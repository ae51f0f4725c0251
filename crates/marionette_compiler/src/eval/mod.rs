//! Evaluation state for one compilation.
//!
//! The [`Evaluator`] owns everything a compilation mutates: the declaration
//! registry, the scope arena, resources in add order, pending overrides,
//! collectors and recorded relationships. Code is evaluated against the
//! tree it was parsed into, so every entry point takes the owning
//! [`Ast`] next to the node id.

mod definitions;
mod expressions;
mod finish;
mod resources;

use crate::catalog::EdgeKind;
use crate::collector::Collector;
use crate::config::CompilerConfig;
use crate::functions::FunctionRegistry;
use crate::loader::{ExportStore, ModuleLoader, TemplateRenderer};
use crate::registry::Registry;
use crate::resource::{Override, Resource, ResourceId};
use crate::scope::{ScopeArena, ScopeId};
use crate::types::ResourceRef;
use indexmap::{IndexMap, IndexSet};
use marionette_core::{CompileError, Diagnostic, ErrorKind};
use marionette_syntax::{Ast, ExprId};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

/// One side of a relationship
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Endpoint {
    /// Resources named by reference
    Resources(Vec<ResourceRef>),
    /// Whatever a collector matched, by collector index
    Collector(usize),
}

/// An ordering recorded by a chain operator or function
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Relationship {
    pub(crate) source: Endpoint,
    pub(crate) target: Endpoint,
    pub(crate) kind: EdgeKind,
    pub(crate) location: Diagnostic,
}

/// A lambda and the scope it closes over
#[derive(Debug, Clone)]
pub(crate) struct Closure {
    pub(crate) ast: Arc<Ast>,
    pub(crate) lambda: ExprId,
    pub(crate) scope: ScopeId,
}

/// Mutable state of one compilation
pub(crate) struct Evaluator<'a> {
    pub(crate) config: &'a CompilerConfig,
    pub(crate) loader: &'a dyn ModuleLoader,
    pub(crate) renderer: &'a dyn TemplateRenderer,
    pub(crate) store: &'a dyn ExportStore,
    pub(crate) host: String,
    pub(crate) registry: Registry,
    pub(crate) scopes: ScopeArena,
    pub(crate) resources: Vec<Resource>,
    pub(crate) index: IndexMap<ResourceRef, ResourceId>,
    pub(crate) queue: VecDeque<ResourceId>,
    pub(crate) collectors: Vec<Collector>,
    pub(crate) overrides: IndexMap<ResourceRef, Vec<Override>>,
    pub(crate) relationships: Vec<Relationship>,
    pub(crate) containments: Vec<(ResourceId, ResourceId)>,
    pub(crate) classes: IndexSet<String>,
    pub(crate) messages: Vec<String>,
    pub(crate) warnings: Vec<Diagnostic>,
    pub(crate) node_scope: Option<ScopeId>,
    functions: FunctionRegistry,
    scope_of: IndexMap<ResourceId, ScopeId>,
    loaded: IndexSet<PathBuf>,
    render: Vec<String>,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(
        config: &'a CompilerConfig,
        loader: &'a dyn ModuleLoader,
        renderer: &'a dyn TemplateRenderer,
        store: &'a dyn ExportStore,
        host: &str,
    ) -> Self {
        Self {
            config,
            loader,
            renderer,
            store,
            host: host.to_string(),
            registry: Registry::new(),
            scopes: ScopeArena::new(),
            resources: Vec::new(),
            index: IndexMap::new(),
            queue: VecDeque::new(),
            collectors: Vec::new(),
            overrides: IndexMap::new(),
            relationships: Vec::new(),
            containments: Vec::new(),
            classes: IndexSet::new(),
            messages: Vec::new(),
            warnings: Vec::new(),
            node_scope: None,
            functions: FunctionRegistry::new(),
            scope_of: IndexMap::new(),
            loaded: IndexSet::new(),
            render: Vec::new(),
        }
    }

    /// Resource by id
    pub(crate) fn resource(&self, id: ResourceId) -> &Resource {
        &self.resources[id.index()]
    }

    pub(crate) fn resource_mut(&mut self, id: ResourceId) -> &mut Resource {
        &mut self.resources[id.index()]
    }

    /// Resource by key
    pub(crate) fn find_resource(&self, reference: &ResourceRef) -> Option<ResourceId> {
        self.index.get(reference).copied()
    }

    /// Namespace relative names are resolved from
    pub(crate) fn namespace(&self, scope: ScopeId) -> String {
        self.scopes.get(scope).namespace.clone()
    }

    /// Scope a class, define or node body ran in
    pub(crate) fn scope_of(&self, id: ResourceId) -> Option<ScopeId> {
        self.scope_of.get(&id).copied()
    }

    /// Whether `function` names a declared or builtin function
    pub(crate) fn has_function(&self, namespace: &str, function: &str) -> bool {
        self.registry.find_function(namespace, function).is_some() || self.functions.get(function).is_some()
    }

    pub(crate) fn warn(&mut self, diagnostic: Diagnostic) {
        tracing::warn!(%diagnostic, "compile warning");
        self.warnings.push(diagnostic);
    }

    /// Record output of a log function
    pub(crate) fn message(&mut self, level: &str, text: String) {
        self.messages.push(format!("{}: {}", level, text));
    }
}

/// Evaluation error at `id`
pub(crate) fn evaluation(ast: &Ast, id: ExprId, message: impl Into<String>) -> CompileError {
    CompileError::Evaluation(ast.diagnostic(id, message))
}

/// Error of `kind` positioned like `location`
pub(crate) fn at(location: &Diagnostic, kind: ErrorKind, message: impl Into<String>) -> CompileError {
    let mut diagnostic = location.clone();
    diagnostic.message = message.into();
    CompileError::new(kind, diagnostic)
}

/// Resource references named by a value: references, `Type[title]`
/// strings and arrays of either
pub(crate) fn references(value: &crate::value::Value) -> Vec<ResourceRef> {
    use crate::value::Value;
    match value {
        Value::Reference(r) => vec![r.clone()],
        Value::String(s) => ResourceRef::parse(s).into_iter().collect(),
        Value::Array(items) => items.iter().flat_map(references).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{FileSystemLoader, MemoryExportStore, NoTemplates};
    use crate::resource::{Origin, ResourceKind};
    use crate::value::Value;
    use marionette_core::{CompileResult, SourceFile};

    /// Load `source` as the main manifest, evaluate the main class and hand
    /// the outcome to `check`
    fn with_main<T>(source: &str, check: impl FnOnce(CompileResult<()>, &mut Evaluator<'_>) -> T) -> T {
        let config = CompilerConfig::default();
        let loader = FileSystemLoader::default();
        let store = MemoryExportStore::new();
        let mut evaluator = Evaluator::new(&config, &loader, &NoTemplates, &store, "test.example.com");
        let result = evaluator
            .load_source(Arc::new(SourceFile::inline(source)), None, true)
            .and_then(|()| {
                let top = evaluator.scopes.top();
                let main = evaluator.add_resource(Resource::new(
                    ResourceRef::class(""),
                    ResourceKind::Class,
                    Origin::main(),
                    top,
                ))?;
                evaluator.scopes.get_mut(top).resource = Some(main);
                evaluator.evaluate_resource(main)
            });
        check(result, &mut evaluator)
    }

    fn top_variable(evaluator: &Evaluator<'_>, name: &str) -> Option<Value> {
        evaluator.scopes.lookup(evaluator.scopes.top(), name).cloned()
    }

    #[test]
    fn test_assignment_binds_in_top_scope() {
        with_main("$a = 2 + 2", |result, evaluator| {
            result.unwrap();
            assert_eq!(top_variable(evaluator, "a"), Some(Value::Integer(4)));
        });
    }

    #[test]
    fn test_reassignment_fails() {
        with_main("$a = 1\n$a = 2", |result, _| {
            let error = result.unwrap_err();
            assert!(error.message().contains("Cannot reassign variable"));
        });
    }

    #[test]
    fn test_match_captures_are_scoped() {
        with_main("if 'abc' =~ /a(b)c/ { $x = $1 }\n$y = $1", |result, evaluator| {
            result.unwrap();
            assert_eq!(top_variable(evaluator, "x"), Some(Value::from("b")));
            assert_eq!(top_variable(evaluator, "y"), Some(Value::Undef));
            assert_eq!(evaluator.scopes.ephemeral_level(evaluator.scopes.top()), 0);
        });
    }

    #[test]
    fn test_selector_and_case() {
        let source = "$v = 'b' ? { 'a' => 1, /b/ => 2, default => 3 }\n\
                      case 'web01' { /^db/: { $role = 'db' } /^web/, 'www': { $role = 'web' } default: { $role = 'none' } }";
        with_main(source, |result, evaluator| {
            result.unwrap();
            assert_eq!(top_variable(evaluator, "v"), Some(Value::Integer(2)));
            assert_eq!(top_variable(evaluator, "role"), Some(Value::from("web")));
        });
    }

    #[test]
    fn test_selector_without_match() {
        with_main("$v = 'z' ? { 'a' => 1 }", |result, _| {
            let error = result.unwrap_err();
            assert_eq!(error.kind(), ErrorKind::Evaluation);
        });
    }

    #[test]
    fn test_division_by_zero() {
        with_main("$q = 1 / 0", |result, _| {
            assert_eq!(result.unwrap_err().message(), "Division by 0");
        });
    }

    #[test]
    fn test_shifts() {
        with_main("$a = 1 >> 70\n$b = -8 >> 70\n$c = 1 << -2\n$d = 4 << -1\n$e = 3 << 2", |result, evaluator| {
            result.unwrap();
            assert_eq!(top_variable(evaluator, "a"), Some(Value::Integer(0)));
            assert_eq!(top_variable(evaluator, "b"), Some(Value::Integer(-1)));
            assert_eq!(top_variable(evaluator, "c"), Some(Value::Integer(0)));
            assert_eq!(top_variable(evaluator, "d"), Some(Value::Integer(2)));
            assert_eq!(top_variable(evaluator, "e"), Some(Value::Integer(12)));
        });
        with_main("$f = 1 << 64", |result, _| {
            assert_eq!(result.unwrap_err().message(), "Integer overflow");
        });
        with_main("$g = 3 << 62", |result, _| {
            assert_eq!(result.unwrap_err().message(), "Integer overflow");
        });
    }

    #[test]
    fn test_missing_qualified_variable_warns() {
        with_main("$z = $missing::x", |result, evaluator| {
            result.unwrap();
            assert_eq!(top_variable(evaluator, "z"), Some(Value::Undef));
            assert_eq!(evaluator.warnings.len(), 1);
            assert!(evaluator.warnings[0].message.contains("could not be found"));
        });
    }

    #[test]
    fn test_resources_evaluate_once() {
        with_main("define counter() { notify { \"n-${title}\": } }\ncounter { 'x': }", |result, evaluator| {
            result.unwrap();
            assert!(evaluator.evaluate_queue().unwrap());
            let count = evaluator.resources.len();
            let id = evaluator
                .find_resource(&ResourceRef::new("counter", "x"))
                .unwrap();
            evaluator.evaluate_resource(id).unwrap();
            evaluator.evaluate_resource(id).unwrap();
            assert_eq!(evaluator.resources.len(), count);
            assert!(!evaluator.evaluate_queue().unwrap());
        });
    }

    #[test]
    fn test_class_scope_is_recorded() {
        with_main("class web { $port = 8080 }\ninclude web", |result, evaluator| {
            result.unwrap();
            let scope = evaluator.scopes.class_scope("web").unwrap();
            assert_eq!(evaluator.scopes.lookup(scope, "port"), Some(&Value::Integer(8080)));
            assert!(evaluator.classes.contains("web"));
        });
    }

    #[test]
    fn test_references() {
        let value = Value::Array(vec![
            Value::Reference(ResourceRef::new("file", "/a")),
            Value::from("Package[nginx]"),
            Value::Integer(3),
        ]);
        assert_eq!(
            references(&value),
            vec![ResourceRef::new("file", "/a"), ResourceRef::new("package", "nginx")]
        );
    }
}
