//! Compiler from manifests and node facts to a catalog.

use crate::catalog::Catalog;
use crate::config::CompilerConfig;
use crate::eval::Evaluator;
use crate::loader::{ExportStore, FileSystemLoader, MemoryExportStore, ModuleLoader, NoTemplates, TemplateRenderer};
use crate::node::Node;
use crate::resource::{Origin, Resource, ResourceKind};
use crate::types::ResourceRef;
use crate::value::Value;
use indexmap::IndexMap;
use marionette_core::{CompileError, CompileResult, Diagnostic, SourceFile, name};
use std::path::PathBuf;
use std::sync::Arc;

/// Output from compiling a catalog
#[derive(Debug, Clone)]
pub struct CompilerOutput {
    /// The compiled catalog
    pub catalog: Catalog,
    /// Compilation warnings
    pub warnings: Vec<Diagnostic>,
}

/// Where the main manifest comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Manifest text
    Inline(String),
    /// Path of the site manifest
    Manifest(PathBuf),
}

/// A class to evaluate after the node, with optional parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassRequest {
    /// Class name
    pub name: String,
    /// Class parameters
    pub parameters: IndexMap<String, Value>,
}

impl ClassRequest {
    /// Request a class without parameters
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: IndexMap::new(),
        }
    }

    /// Add a parameter
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }
}

/// Catalog compiler and its collaborators
pub struct Compiler {
    config: CompilerConfig,
    loader: Box<dyn ModuleLoader>,
    renderer: Box<dyn TemplateRenderer>,
    store: Box<dyn ExportStore>,
}

impl Compiler {
    /// Create a compiler reading modules from the configured directories
    #[must_use]
    pub fn new(config: CompilerConfig) -> Self {
        let loader = FileSystemLoader::new(config.module_path.clone(), config.manifest_dir.clone());
        Self {
            config,
            loader: Box::new(loader),
            renderer: Box::new(NoTemplates),
            store: Box::new(MemoryExportStore::new()),
        }
    }

    /// Replace the module loader
    #[must_use]
    pub fn with_loader(mut self, loader: impl ModuleLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    /// Replace the template renderer
    #[must_use]
    pub fn with_renderer(mut self, renderer: impl TemplateRenderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    /// Replace the exported resource store
    #[must_use]
    pub fn with_export_store(mut self, store: impl ExportStore + 'static) -> Self {
        self.store = Box::new(store);
        self
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile the catalog for `node`
    ///
    /// # Errors
    ///
    /// Returns the first lex, syntax, resolution, evaluation or graph error;
    /// no partial catalog is produced
    #[tracing::instrument(skip_all, fields(node = %node.name))]
    pub fn compile(
        &self,
        node: &Node,
        classes: &[ClassRequest],
        source: &Source,
    ) -> CompileResult<CompilerOutput> {
        let mut evaluator = Evaluator::new(
            &self.config,
            self.loader.as_ref(),
            self.renderer.as_ref(),
            self.store.as_ref(),
            &node.name,
        );
        match source {
            Source::Inline(text) => {
                evaluator.load_source(Arc::new(SourceFile::inline(text.clone())), None, true)?;
            }
            Source::Manifest(path) => evaluator.load_file(path, None, true)?,
        }

        let environment = node
            .environment
            .clone()
            .unwrap_or_else(|| self.config.environment.clone());
        bind_node(&mut evaluator, node, &environment);

        let top = evaluator.scopes.top();
        evaluator.add_resource(Resource::new(
            ResourceRef::new("stage", "main"),
            ResourceKind::Builtin,
            Origin::main(),
            top,
        ))?;
        let main = evaluator.add_resource(Resource::new(
            ResourceRef::class(""),
            ResourceKind::Class,
            Origin::main(),
            top,
        ))?;
        evaluator.scopes.get_mut(top).resource = Some(main);
        evaluator.evaluate_resource(main)?;
        tracing::debug!("evaluated main class");

        evaluate_node(&mut evaluator, node)?;

        let requested = classes
            .iter()
            .cloned()
            .chain(node.classes.iter().map(ClassRequest::new));
        for request in requested {
            if evaluator.classes.contains(&name::canonical(&request.name)) {
                continue;
            }
            let parameters = (!request.parameters.is_empty()).then_some(request.parameters);
            let scope = evaluator.node_scope.unwrap_or(top);
            let location = Diagnostic::unpositioned("");
            evaluator.declare_class(&request.name, "", parameters, scope, &location)?;
        }

        let mut passes = 0;
        loop {
            passes += 1;
            if passes > self.config.max_evaluation_passes {
                return Err(CompileError::Evaluation(Diagnostic::unpositioned(format!(
                    "Somehow looped more than {} times while evaluating host catalog",
                    self.config.max_evaluation_passes
                ))));
            }
            let collected = evaluator.evaluate_collectors()?;
            let evaluated = evaluator.evaluate_queue()?;
            if !collected && !evaluated {
                break;
            }
        }
        tracing::debug!(passes, resources = evaluator.resources.len(), "reached fixed point");

        fail_on_unrealized(&evaluator)?;
        evaluator.finish()?;
        let catalog = evaluator.assemble(&environment)?;
        tracing::info!(
            resources = catalog.resource_count(),
            warnings = evaluator.warnings.len(),
            "compiled catalog"
        );
        Ok(CompilerOutput {
            catalog,
            warnings: evaluator.warnings,
        })
    }
}

/// Compile with the default configuration and collaborators
///
/// # Errors
///
/// Returns the first compilation error
pub fn compile(node: &Node, classes: &[ClassRequest], source: &Source) -> CompileResult<CompilerOutput> {
    Compiler::new(CompilerConfig::default()).compile(node, classes, source)
}

/// Facts, classifier parameters, `$facts` and `$environment` as top-scope
/// variables; a name bound twice keeps its first value with a warning
fn bind_node(evaluator: &mut Evaluator<'_>, node: &Node, environment: &str) {
    let top = evaluator.scopes.top();
    let facts: IndexMap<String, Value> = node
        .facts
        .iter()
        .map(|(name, value)| (name.clone(), Value::from_json(value)))
        .collect();
    let parameters = node
        .parameters
        .iter()
        .map(|(name, value)| (name.clone(), Value::from_json(value)));
    let bindings = facts
        .clone()
        .into_iter()
        .chain(parameters)
        .chain([
            ("facts".to_string(), Value::Hash(facts)),
            ("environment".to_string(), Value::from(environment)),
        ]);
    for (variable, value) in bindings {
        if let Err(e) = evaluator.scopes.set(top, &variable, value) {
            evaluator.warn(Diagnostic::unpositioned(format!(
                "Could not bind node variable '{}': {}",
                variable, e
            )));
        }
    }
}

/// Evaluate the node declaration matching `node`, if any are declared
fn evaluate_node(evaluator: &mut Evaluator<'_>, node: &Node) -> CompileResult<()> {
    if !evaluator.registry.has_nodes() {
        return Ok(());
    }
    let names = node.names();
    let Some(key) = evaluator.registry.find_node(&names).map(|d| d.name.clone()) else {
        return Err(CompileError::Resolution(Diagnostic::unpositioned(format!(
            "Could not find default node or by name with '{}'",
            names.join(", ")
        ))));
    };
    let top = evaluator.scopes.top();
    let reference = ResourceRef::new("node", key);
    let id = match evaluator.find_resource(&reference) {
        Some(existing) => existing,
        None => evaluator.add_resource(Resource::new(reference, ResourceKind::Node, Origin::main(), top))?,
    };
    evaluator.evaluate_resource(id)
}

/// Title collectors from `realize` that never found their resources
fn fail_on_unrealized(evaluator: &Evaluator<'_>) -> CompileResult<()> {
    let mut location = None;
    let mut missing = Vec::new();
    for collector in evaluator.collectors.iter().filter(|c| c.active) {
        for title in collector.unmatched_titles(&evaluator.resources) {
            location.get_or_insert_with(|| collector.location.clone());
            missing.push(ResourceRef::new(&collector.type_name, title).to_string());
        }
    }
    match location {
        None => Ok(()),
        Some(mut diagnostic) => {
            diagnostic.message = format!("Failed to realize virtual resources {}", missing.join(", "));
            Err(CompileError::Graph(diagnostic))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EdgeKind;
    use crate::collector::StoredResource;
    use marionette_core::ErrorKind;
    use serde_json::json;

    fn compile_for(host: &str, manifest: &str) -> CompileResult<CompilerOutput> {
        compile(&Node::new(host), &[], &Source::Inline(manifest.to_string()))
    }

    fn catalog(manifest: &str) -> Catalog {
        compile_for("first.example.com", manifest).unwrap().catalog
    }

    fn reference(type_name: &str, title: &str) -> ResourceRef {
        ResourceRef::new(type_name, title)
    }

    fn param(catalog: &Catalog, type_name: &str, title: &str, name: &str) -> Option<Value> {
        catalog
            .resource(&reference(type_name, title))
            .and_then(|r| r.parameters.get(name).cloned())
    }

    #[test]
    fn test_empty_manifest() {
        let catalog = catalog("");
        assert!(catalog.resource(&reference("stage", "main")).is_some());
        assert!(catalog.resource(&ResourceRef::class("main")).is_some());
        assert!(catalog.has_edge(
            &reference("stage", "main"),
            &ResourceRef::class("main"),
            EdgeKind::Contains
        ));
    }

    #[test]
    fn test_assignment() {
        let catalog = catalog("$a = 2 + 2\nnotify { 'sum': message => $a }");
        assert_eq!(param(&catalog, "notify", "sum", "message"), Some(Value::Integer(4)));
    }

    #[test]
    fn test_interpolated_expressions() {
        let catalog = catalog(
            "$x = 'a'\n$h = { 'k' => 'v' }\n$l = ['b', 'c']\n\
             notify { 'out': message => \"${1 + 2}|${x}|${h['k']}|${l.join('-')}\" }",
        );
        assert_eq!(param(&catalog, "notify", "out", "message"), Some(Value::from("3|a|v|b-c")));
    }

    #[test]
    fn test_repeated_class_is_one_class() {
        let catalog = catalog("class foo {}\nclass foo {}\ninclude foo");
        let classes = catalog
            .resources
            .iter()
            .filter(|r| r.type_name == "class" && r.title == "foo")
            .count();
        assert_eq!(classes, 1);
        assert_eq!(catalog.classes, vec!["foo"]);
    }

    #[test]
    fn test_append_override() {
        let catalog = catalog("file { 'x': mode => [0] }\nFile['x'] { mode +> 1 }");
        assert_eq!(
            param(&catalog, "file", "x", "mode"),
            Some(Value::Array(vec![Value::Integer(0), Value::Integer(1)]))
        );

        let catalog = self::catalog("notify { 'x': }\nNotify['x'] { message +> 'm' }");
        assert_eq!(param(&catalog, "notify", "x", "message"), Some(Value::from("m")));
    }

    #[test]
    fn test_open_collector_without_matches() {
        let catalog = catalog("File <| tag == 'x' |>");
        assert!(catalog.resources.iter().all(|r| r.type_name != "file"));
    }

    #[test]
    fn test_realize_missing_fails() {
        let error = compile_for("host", "realize(File['missing'])").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Graph);
        assert!(error.message().contains("missing"));
    }

    #[test]
    fn test_virtual_resources() {
        let catalog = catalog("@file { 'v': }\n@file { 'w': }\nrealize(File['v'])");
        assert!(catalog.resource(&reference("file", "v")).is_some());
        assert!(catalog.resource(&reference("file", "w")).is_none());
    }

    #[test]
    fn test_collector_overrides() {
        let catalog = catalog("@user { 'alice': tag => 'admins' }\nUser <| tag == 'admins' |> { shell => '/bin/zsh' }");
        assert_eq!(
            param(&catalog, "user", "alice", "shell"),
            Some(Value::from("/bin/zsh"))
        );
    }

    #[test]
    fn test_node_selection() {
        let manifest = "node 'other' { notify { 'other': } }\nnode default { notify { 'fallback': } }";
        let catalog = catalog(manifest);
        assert!(catalog.resource(&reference("notify", "other")).is_none());
        assert!(catalog.resource(&reference("notify", "fallback")).is_some());
        assert!(catalog.resource(&reference("node", "default")).is_some());

        let error = compile_for("first", "node 'other' {}").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Resolution);
        assert!(error.message().contains("Could not find default node"));
    }

    #[test]
    fn test_node_matches_short_name() {
        let catalog = catalog("node 'first' { notify { 'hit': } }");
        assert!(catalog.resource(&reference("notify", "hit")).is_some());
    }

    #[test]
    fn test_metaparameter_propagation() {
        let manifest = "define wrapper() { file { '/c': } }\n\
                        class a { wrapper { 'b': } }\n\
                        class { 'a': noop => true }";
        let catalog = catalog(manifest);
        assert_eq!(param(&catalog, "wrapper", "b", "noop"), Some(Value::Boolean(true)));
        assert_eq!(param(&catalog, "file", "/c", "noop"), Some(Value::Boolean(true)));
    }

    #[test]
    fn test_nearer_metaparameter_wins() {
        let manifest = "define wrapper() { file { '/c': } }\n\
                        class a { wrapper { 'b': noop => false } }\n\
                        class { 'a': noop => true }";
        let catalog = catalog(manifest);
        assert_eq!(param(&catalog, "file", "/c", "noop"), Some(Value::Boolean(false)));
    }

    #[test]
    fn test_override_requires_subclass() {
        let denied = "class base { file { '/x': mode => '0644' } }\n\
                      class other { File['/x'] { mode => '0600' } }\n\
                      include base\ninclude other";
        let error = compile_for("host", denied).unwrap_err();
        assert!(error.message().contains("Only subclasses can override parameters"));

        let allowed = "class base { file { '/x': mode => '0644' } }\n\
                       class child inherits base { File['/x'] { mode => '0600' } }\n\
                       include child";
        let catalog = catalog(allowed);
        assert_eq!(param(&catalog, "file", "/x", "mode"), Some(Value::from("0600")));
        assert!(catalog.classes.contains(&"base".to_string()));
    }

    #[test]
    fn test_unknown_override_target() {
        let error = compile_for("host", "File['/nowhere'] { mode => '0600' }").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Graph);
        assert!(error.message().contains("File[/nowhere]"));
    }

    #[test]
    fn test_duplicate_resource() {
        let error = compile_for("host", "file { 'x': }\nfile { 'x': }").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Graph);
        assert!(error.message().starts_with("Duplicate definition: File[x] is already defined"));

        let catalog = catalog("exec { 'make': }\nexec { 'make': }");
        assert_eq!(catalog.resources.iter().filter(|r| r.type_name == "exec").count(), 2);
    }

    #[test]
    fn test_chain_and_metaparameter_edges() {
        let manifest = "file { 'a': } -> file { 'b': }\n\
                        service { 'web': subscribe => File['b'] }\n\
                        package { 'pkg': before => Service['web'] }";
        let catalog = catalog(manifest);
        let (a, b) = (reference("file", "a"), reference("file", "b"));
        let web = reference("service", "web");
        assert!(catalog.has_edge(&a, &b, EdgeKind::Before));
        assert!(catalog.has_edge(&b, &web, EdgeKind::Notify));
        assert!(catalog.has_edge(&reference("package", "pkg"), &web, EdgeKind::Before));
        assert!(catalog.has_edge(&ResourceRef::class("main"), &a, EdgeKind::Contains));
    }

    #[test]
    fn test_missing_relationship_target() {
        let error = compile_for("host", "file { 'y': require => File['x'] }").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Graph);
        assert_eq!(
            error.message(),
            "Could not find resource 'File[x]' for relationship from 'File[y]'"
        );
    }

    #[test]
    fn test_stages() {
        let manifest = "stage { 'setup': }\nclass early {}\nclass { 'early': stage => 'setup' }";
        let catalog = catalog(manifest);
        assert!(catalog.has_edge(
            &reference("stage", "setup"),
            &ResourceRef::class("early"),
            EdgeKind::Contains
        ));

        let error = compile_for("host", "class early {}\nclass { 'early': stage => 'nope' }").unwrap_err();
        assert!(error.message().contains("Could not find stage nope specified by Class[Early]"));

        let error = compile_for("host", "file { '/x': stage => 'setup' }").unwrap_err();
        assert!(error.message().starts_with("Only classes can set 'stage'"));
    }

    #[test]
    fn test_define_parameters() {
        let manifest = "define vhost(String $root, $port = 80) { notify { \"${title}:${root}:${port}\": } }\n\
                        vhost { 'web': root => '/srv' }";
        let catalog = catalog(manifest);
        assert!(catalog.resource(&reference("notify", "web:/srv:80")).is_some());
        assert_eq!(param(&catalog, "vhost", "web", "port"), Some(Value::Integer(80)));

        let error = compile_for("host", "define vhost($root) {}\nvhost { 'web': }").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Resolution);
        assert!(error.message().contains("expects a value for parameter 'root'"));

        let error = compile_for("host", "define vhost(String $root) {}\nvhost { 'web': root => 1 }").unwrap_err();
        assert!(error.message().contains("expects a String value, got Integer"));

        let error = compile_for("host", "file { '/x': colour => 'red' }").unwrap_err();
        assert_eq!(error.message(), "Invalid parameter 'colour' on File[/x]");
    }

    #[test]
    fn test_resource_defaults() {
        let catalog = catalog("File { mode => '0644' }\nfile { '/a': }\nfile { '/b': mode => '0600' }");
        assert_eq!(param(&catalog, "file", "/a", "mode"), Some(Value::from("0644")));
        assert_eq!(param(&catalog, "file", "/b", "mode"), Some(Value::from("0600")));
    }

    #[test]
    fn test_facts_and_requested_classes() {
        let node = Node::new("db01")
            .with_fact("osfamily", json!("Debian"))
            .with_class("base");
        let manifest = "class base { notify { \"os ${osfamily} ${facts['osfamily']}\": } }\n\
                        class extra($level) { notify { \"level ${level}\": } }";
        let requests = [ClassRequest::new("extra").with_parameter("level", Value::Integer(3))];
        let output = compile(&node, &requests, &Source::Inline(manifest.to_string())).unwrap();
        let catalog = output.catalog;
        assert!(catalog.resource(&reference("notify", "os Debian Debian")).is_some());
        assert!(catalog.resource(&reference("notify", "level 3")).is_some());
        assert_eq!(catalog.classes, vec!["extra", "base"]);
    }

    #[test]
    fn test_unknown_class() {
        let error = compile_for("host", "include nosuch").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Resolution);
        assert_eq!(error.message(), "Could not find class nosuch for host");
    }

    #[test]
    fn test_qualified_lookup_warning() {
        let output = compile_for("host", "class later { $v = 1 }\n$x = $later::v\ninclude later").unwrap();
        assert_eq!(output.warnings.len(), 1);
        assert!(output.warnings[0].message.contains("class later has not been evaluated"));

        let output = compile_for("host", "include early\nclass early { $v = 1 }\nnotify { \"v${early::v}\": }").unwrap();
        assert!(output.warnings.is_empty());
        assert!(output.catalog.resource(&reference("notify", "v1")).is_some());
    }

    #[test]
    fn test_strict_variables() {
        let compiler = Compiler::new(CompilerConfig::new().with_strict_variables(true));
        let error = compiler
            .compile(&Node::new("host"), &[], &Source::Inline("notify { $nope: }".to_string()))
            .unwrap_err();
        assert_eq!(error.message(), "Unknown variable: '$nope'");
    }

    #[test]
    fn test_log_functions_record_messages() {
        let catalog = catalog("notice('hello', 'world')\nwarning('careful')");
        assert_eq!(catalog.messages, vec!["notice: hello world", "warning: careful"]);
    }

    #[test]
    fn test_fail() {
        let error = compile_for("host", "fail('stop here')").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Evaluation);
        assert_eq!(error.message(), "stop here");
    }

    #[test]
    fn test_exported_resources() {
        let mut store = MemoryExportStore::new();
        store.insert(StoredResource {
            host: "web01".to_string(),
            type_name: "host".to_string(),
            title: "web01.example.com".to_string(),
            parameters: [("ip".to_string(), Value::from("10.0.0.5"))].into_iter().collect(),
            tags: ["web".to_string()].into_iter().collect(),
        });
        let compiler = Compiler::new(CompilerConfig::default()).with_export_store(store);
        let manifest = "@@host { 'db01.example.com': ip => '10.0.0.9' }\nHost <<| tag == 'web' |>>";
        let catalog = compiler
            .compile(&Node::new("db01"), &[], &Source::Inline(manifest.to_string()))
            .unwrap()
            .catalog;
        assert!(catalog.resource(&reference("host", "web01.example.com")).is_some());
        assert!(catalog.resource(&reference("host", "db01.example.com")).is_none());
        assert_eq!(catalog.exported.len(), 1);
        assert_eq!(catalog.exported[0].title, "db01.example.com");
    }

    #[test]
    fn test_iteration_and_templates() {
        let manifest = "$doubled = [1, 2].map |$v| { $v * 2 }\n\
                        $names = ['a', 'b'].filter |$n| { $n != 'a' }\n\
                        $text = inline_epp('<%= $who %>!', { 'who' => 'hi' })\n\
                        notify { 'out': message => [$doubled, $names, $text] }";
        let catalog = catalog(manifest);
        let expected = Value::Array(vec![
            Value::Array(vec![Value::Integer(2), Value::Integer(4)]),
            Value::Array(vec![Value::from("b")]),
            Value::from("hi!"),
        ]);
        assert_eq!(param(&catalog, "notify", "out", "message"), Some(expected));
    }

    #[test]
    fn test_create_resources() {
        let manifest = "create_resources('file', { '/a' => { 'mode' => '0600' }, '/b' => {} }, { 'owner' => 'root' })";
        let catalog = catalog(manifest);
        assert_eq!(param(&catalog, "file", "/a", "mode"), Some(Value::from("0600")));
        assert_eq!(param(&catalog, "file", "/b", "owner"), Some(Value::from("root")));
    }

    #[test]
    fn test_pass_limit() {
        let compiler = Compiler::new(CompilerConfig::new().with_max_evaluation_passes(1));
        let manifest = "define inner() {}\ndefine outer() { inner { $title: } }\n@outer { 'x': }\nrealize(Outer['x'])";
        let error = compiler
            .compile(&Node::new("host"), &[], &Source::Inline(manifest.to_string()))
            .unwrap_err();
        assert_eq!(
            error.message(),
            "Somehow looped more than 1 times while evaluating host catalog"
        );
    }
}
