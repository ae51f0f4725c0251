//! Declaring classes, evaluating class/define/node bodies and loading
//! source files.

use super::{Evaluator, at};
use crate::loader::{ResolveContext, ResolveKind};
use crate::registry::{Declaration, DeclarationKind};
use crate::resource::{Param, Resource, ResourceId, ResourceKind};
use crate::scope::{ScopeId, ScopeKind};
use crate::types::ResourceRef;
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use marionette_core::{CompileError, CompileResult, Diagnostic, ErrorKind, SourceFile, name};
use std::path::Path;
use std::sync::Arc;

impl Evaluator<'_> {
    /// Declare and evaluate a class
    ///
    /// `params` is `Some` for resource-like declarations, which may not
    /// repeat; `include`-like declarations of an existing class are no-ops.
    pub(crate) fn declare_class(
        &mut self,
        class: &str,
        namespace: &str,
        params: Option<IndexMap<String, Value>>,
        scope: ScopeId,
        location: &Diagnostic,
    ) -> CompileResult<ResourceId> {
        let Some(found) = self.resolve_declaration(namespace, class, DeclarationKind::Hostclass)? else {
            return Err(at(
                location,
                ErrorKind::Resolution,
                format!("Could not find class {} for {}", name::canonical(class), self.host),
            ));
        };
        let reference = ResourceRef::class(&found);
        if let Some(existing) = self.find_resource(&reference) {
            if params.is_some() {
                return Err(at(
                    location,
                    ErrorKind::Graph,
                    format!("Duplicate declaration: {} is already declared; cannot redeclare", reference),
                ));
            }
            return Ok(existing);
        }

        let origin = self.scopes.get(scope).origin.clone();
        let mut resource = Resource::new(reference, ResourceKind::Class, origin.clone(), scope)
            .with_location(location.clone());
        for (attribute, value) in params.unwrap_or_default() {
            self.validate_attribute(&resource, &attribute, location)?;
            if attribute == "tag" {
                for tag in value.into_array() {
                    resource
                        .tag(&tag.to_string())
                        .map_err(|e| at(location, ErrorKind::Evaluation, e.to_string()))?;
                }
            } else {
                resource.set(Param::new(attribute, value, origin.clone()));
            }
        }
        let id = self.add_resource(resource)?;
        self.evaluate_resource(id)?;
        Ok(id)
    }

    /// Canonical name of the declaration `wanted` refers to from
    /// `namespace`, autoloading from the module path when it is unknown
    pub(crate) fn resolve_declaration(
        &mut self,
        namespace: &str,
        wanted: &str,
        kind: DeclarationKind,
    ) -> CompileResult<Option<String>> {
        if let Some(found) = self.registry.find(namespace, wanted, kind) {
            return Ok(Some(found.name.clone()));
        }
        let relative = name::canonical(wanted);
        let direct: Vec<String> = if name::is_rooted(wanted) {
            vec![relative]
        } else {
            name::search_chain(namespace)
                .iter()
                .map(|ns| name::qualify(ns, &relative))
                .collect()
        };
        let mut candidates = IndexSet::new();
        for candidate in direct {
            let mut current = candidate.as_str();
            while !current.is_empty() {
                candidates.insert(current.to_string());
                current = name::namespace(current);
            }
        }

        for candidate in candidates {
            let files = self
                .loader
                .resolve(&candidate, &ResolveContext::new(ResolveKind::Class));
            let module = candidate.split(name::SEPARATOR).next().map(str::to_string);
            for file in files {
                self.load_file(&file, module.as_deref(), false)?;
            }
            if let Some(found) = self.registry.find(namespace, wanted, kind) {
                return Ok(Some(found.name.clone()));
            }
        }
        Ok(None)
    }

    /// Evaluate the body of a class, define or node resource once
    pub(crate) fn evaluate_resource(&mut self, id: ResourceId) -> CompileResult<()> {
        if self.resource(id).evaluated {
            return Ok(());
        }
        self.resource_mut(id).evaluated = true;
        let resource = self.resource(id).clone();
        let (kind, declared_as) = match resource.kind {
            ResourceKind::Builtin => return Ok(()),
            ResourceKind::Class => (DeclarationKind::Hostclass, resource.title().to_string()),
            ResourceKind::Define => (DeclarationKind::Define, resource.type_name().to_string()),
            ResourceKind::Node => (DeclarationKind::Node, resource.title().to_string()),
        };
        let location = resource
            .location
            .clone()
            .unwrap_or_else(|| Diagnostic::unpositioned(""));
        if self.registry.get(kind, &declared_as).is_none() && kind == DeclarationKind::Define {
            self.resolve_declaration("", &declared_as, kind)?;
        }
        let Some(declaration) = self.registry.get(kind, &declared_as).cloned() else {
            return Err(at(
                &location,
                ErrorKind::Resolution,
                format!("Could not find {} {}", kind, declared_as),
            ));
        };
        if self.registry.has_inheritance_cycle(kind, &declaration.name) {
            return Err(at(
                &location,
                ErrorKind::Resolution,
                format!("Inheritance cycle detected for {}", resource.reference),
            ));
        }
        tracing::debug!(resource = %resource.reference, "evaluating");

        let top = self.scopes.top();
        let main = kind == DeclarationKind::Hostclass && declaration.name.is_empty();
        let scope = if main {
            top
        } else {
            let parent = self.parent_scope(&declaration, &resource, &location)?;
            let (scope_kind, namespace) = match kind {
                DeclarationKind::Hostclass => (ScopeKind::Class, declaration.name.clone()),
                DeclarationKind::Define => (ScopeKind::Define, declaration.name.clone()),
                DeclarationKind::Node => (ScopeKind::Node, String::new()),
            };
            self.scopes
                .create(parent, scope_kind, namespace, declaration.origin(), Some(id))
        };
        self.scope_of.insert(id, scope);
        if kind != DeclarationKind::Define {
            self.scopes
                .bind_class(&declaration.name, kind, scope)
                .map_err(|e| at(&location, ErrorKind::Resolution, e.to_string()))?;
        }
        if kind == DeclarationKind::Node {
            self.node_scope = Some(scope);
        }
        if kind == DeclarationKind::Hostclass && !main {
            self.classes.insert(declaration.name.clone());
        }

        if kind == DeclarationKind::Define {
            for (attribute, value) in self.scopes.defaults_for(resource.scope, resource.type_name()) {
                if !self.resource(id).has(&attribute) {
                    self.resource_mut(id)
                        .set(Param::new(attribute, value, resource.origin.clone()));
                }
            }
        }

        if !main {
            self.bind_parameters(id, &declaration, scope, &location)?;
        }
        for fragment in &declaration.code {
            self.evaluate(&fragment.ast, fragment.body, scope)?;
        }
        Ok(())
    }

    /// Bind `$title`, `$name` and every declared parameter in `scope`
    fn bind_parameters(
        &mut self,
        id: ResourceId,
        declaration: &Declaration,
        scope: ScopeId,
        location: &Diagnostic,
    ) -> CompileResult<()> {
        let bind_failed = |e: crate::scope::ScopeError| at(location, ErrorKind::Evaluation, e.to_string());
        let title = Value::from(self.resource(id).title());
        self.scopes.set(scope, "title", title.clone()).map_err(bind_failed)?;
        if !declaration.params.iter().any(|p| p.name == "name") {
            let name = self.resource(id).get("name").cloned().unwrap_or(title);
            self.scopes.set(scope, "name", name).map_err(bind_failed)?;
        }

        let owner = self.resource(id).reference.to_string();
        let origin = declaration.origin();
        for param in &declaration.params {
            let value = match self.resource(id).get(&param.name).cloned() {
                Some(value) => value,
                None => match param.default {
                    Some(default) => {
                        let value = self.evaluate(&declaration.ast, default, scope)?;
                        self.resource_mut(id)
                            .set(Param::new(param.name.clone(), value.clone(), origin.clone()));
                        value
                    }
                    None => {
                        return Err(at(
                            location,
                            ErrorKind::Resolution,
                            format!("{}: expects a value for parameter '{}'", owner, param.name),
                        ));
                    }
                },
            };
            self.check_type(&declaration.ast, scope, param, &value, &owner)?;
            self.scopes
                .set(scope, &param.name, value)
                .map_err(bind_failed)?;
        }
        Ok(())
    }

    /// Scope a new class, define or node scope hangs off
    ///
    /// Classes with a parent live under the parent's scope, nodes under
    /// their parent node's; everything else under the node scope, or the
    /// top scope before a node is evaluated.
    fn parent_scope(
        &mut self,
        declaration: &Declaration,
        resource: &Resource,
        location: &Diagnostic,
    ) -> CompileResult<ScopeId> {
        let fallback = self.node_scope.unwrap_or_else(|| self.scopes.top());
        let Some(parent) = &declaration.parent else {
            return Ok(fallback);
        };
        match declaration.kind {
            DeclarationKind::Hostclass => {
                let namespace = name::namespace(&declaration.name);
                let parent =
                    self.declare_class(parent, namespace, None, resource.scope, location)?;
                Ok(self.scope_of(parent).unwrap_or(fallback))
            }
            DeclarationKind::Node => {
                if self.registry.get(DeclarationKind::Node, parent).is_none() {
                    return Err(at(
                        location,
                        ErrorKind::Resolution,
                        format!("Could not find node {} to inherit from", parent),
                    ));
                }
                let reference = ResourceRef::new("node", parent.clone());
                let parent = match self.find_resource(&reference) {
                    Some(existing) => existing,
                    None => {
                        let node = Resource::new(reference, ResourceKind::Node, resource.origin.clone(), resource.scope)
                            .with_location(location.clone());
                        self.add_resource(node)?
                    }
                };
                self.evaluate_resource(parent)?;
                Ok(self.scope_of(parent).unwrap_or(fallback))
            }
            DeclarationKind::Define => Ok(fallback),
        }
    }

    /// Read, parse and register a file once
    pub(crate) fn load_file(&mut self, path: &Path, module: Option<&str>, main: bool) -> CompileResult<()> {
        if !self.loaded.insert(path.to_path_buf()) {
            return Ok(());
        }
        let text = self.loader.read(path).map_err(|e| {
            CompileError::Resolution(Diagnostic::unpositioned(format!(
                "Could not read {}: {}",
                path.display(),
                e
            )))
        })?;
        tracing::debug!(path = %path.display(), "loading manifest");
        self.load_source(Arc::new(SourceFile::new(path, text)), module, main)
    }

    /// Parse and register source text, following its imports
    pub(crate) fn load_source(
        &mut self,
        source: Arc<SourceFile>,
        module: Option<&str>,
        main: bool,
    ) -> CompileResult<()> {
        let ast = Arc::new(marionette_syntax::parse(Arc::clone(&source))?);
        for warning in ast.warnings() {
            self.warn(warning.clone());
        }
        let imports = self.registry.register(&ast, module, main)?;
        let directory = source.path().and_then(Path::parent).map(Path::to_path_buf);
        for import in imports {
            let context = ResolveContext::new(ResolveKind::Import).with_directory(directory.clone());
            let files = self.loader.resolve(&import, &context);
            if files.is_empty() {
                let mut diagnostic = Diagnostic::unpositioned(format!("No file(s) found for import of '{}'", import));
                diagnostic.file = source.name();
                return Err(CompileError::Resolution(diagnostic));
            }
            for file in files {
                self.load_file(&file, module, false)?;
            }
        }
        Ok(())
    }
}
