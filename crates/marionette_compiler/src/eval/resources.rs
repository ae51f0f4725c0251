//! Resource declarations, defaults, overrides and collection.

use super::{Evaluator, at, evaluation, references};
use crate::builtin::{builtin_type, is_isomorphic, is_metaparam};
use crate::collector::{Collector, CollectorMode, Predicate};
use crate::registry::{DeclarationKind, located};
use crate::resource::{Origin, Override, Param, Resource, ResourceId, ResourceKind};
use crate::scope::ScopeId;
use crate::types::ResourceRef;
use crate::value::Value;
use indexmap::IndexMap;
use marionette_core::{CompileError, CompileResult, Diagnostic, ErrorKind, name};
use marionette_syntax::{
    AttributeOp, AttributeOpKind, Ast, ExprId, NodeKind, QueryOp, ResourceBody, ResourceForm,
};
use std::sync::Arc;

impl Evaluator<'_> {
    /// `type { title: attr => value; ... }`; evaluates to the declared
    /// references
    pub(crate) fn resource_expression(
        &mut self,
        ast: &Arc<Ast>,
        id: ExprId,
        scope: ScopeId,
        form: ResourceForm,
        type_name: &str,
        bodies: &[ResourceBody],
    ) -> CompileResult<Value> {
        let origin = self.scopes.get(scope).origin.clone();
        let mut shared = Vec::new();
        let mut groups = Vec::new();
        for body in bodies {
            let params = self.attribute_params(ast, scope, &body.ops, &origin, false)?;
            if matches!(ast.kind(body.title), NodeKind::Default) {
                shared = params;
                continue;
            }
            let titles = self.evaluate(ast, body.title, scope)?;
            groups.push((titles, params));
        }

        let mut declared = Vec::new();
        for (titles, params) in groups {
            let mut merged: Vec<Param> = shared.clone();
            for param in params {
                match merged.iter_mut().find(|p| p.name == param.name) {
                    Some(existing) => *existing = param,
                    None => merged.push(param),
                }
            }
            for title in titles.into_array() {
                if title.is_undef() {
                    return Err(evaluation(ast, id, "Missing title. The title expression resulted in undef"));
                }
                declared.push((title.to_string(), merged.clone()));
            }
        }

        let refs = self.instantiate(ast, id, scope, form, type_name, declared)?;
        Ok(match refs.as_slice() {
            [single] => Value::Reference(single.clone()),
            _ => Value::Array(refs.into_iter().map(Value::Reference).collect()),
        })
    }

    /// Create resources of `type_name`, one per `(title, params)`
    pub(crate) fn instantiate(
        &mut self,
        ast: &Arc<Ast>,
        id: ExprId,
        scope: ScopeId,
        form: ResourceForm,
        type_name: &str,
        declared: Vec<(String, Vec<Param>)>,
    ) -> CompileResult<Vec<ResourceRef>> {
        let location = ast.diagnostic(id, "");
        let namespace = self.namespace(scope);
        let mut refs = Vec::with_capacity(declared.len());

        if name::canonical(type_name) == "class" {
            if form != ResourceForm::Regular {
                return Err(evaluation(ast, id, "Classes cannot be virtual or exported"));
            }
            for (title, params) in declared {
                let params: IndexMap<String, Value> =
                    params.into_iter().map(|p| (p.name, p.value)).collect();
                let class = self.declare_class(&title, &namespace, Some(params), scope, &location)?;
                refs.push(self.resource(class).reference.clone());
            }
            return Ok(refs);
        }

        let (canonical, kind) = self.resolve_type(&namespace, type_name, &location)?;
        let origin = self.scopes.get(scope).origin.clone();
        for (title, params) in declared {
            let mut resource = Resource::new(ResourceRef::new(&canonical, title), kind, origin.clone(), scope)
                .with_location(location.clone());
            resource.is_virtual = form != ResourceForm::Regular;
            resource.exported = form == ResourceForm::Exported;
            for param in params {
                self.validate_attribute(&resource, &param.name, &location)?;
                if param.name == "tag" {
                    for tag in param.value.into_array() {
                        resource
                            .tag(&tag.to_string())
                            .map_err(|e| at(&location, ErrorKind::Evaluation, e.to_string()))?;
                    }
                } else {
                    resource.set(param);
                }
            }
            refs.push(resource.reference.clone());
            self.add_resource(resource)?;
        }
        Ok(refs)
    }

    /// Canonical name and kind of a non-class resource type
    fn resolve_type(
        &mut self,
        namespace: &str,
        type_name: &str,
        location: &Diagnostic,
    ) -> CompileResult<(String, ResourceKind)> {
        let canonical = name::canonical(type_name);
        if builtin_type(&canonical).is_some() {
            return Ok((canonical, ResourceKind::Builtin));
        }
        match self.resolve_declaration(namespace, type_name, DeclarationKind::Define)? {
            Some(found) => Ok((found, ResourceKind::Define)),
            None => Err(at(
                location,
                ErrorKind::Resolution,
                format!("Resource type not found: {}", name::capitalize(&canonical)),
            )),
        }
    }

    /// Evaluate attribute operations into parameters
    fn attribute_params(
        &mut self,
        ast: &Arc<Ast>,
        scope: ScopeId,
        ops: &[AttributeOp],
        origin: &Origin,
        allow_append: bool,
    ) -> CompileResult<Vec<Param>> {
        let mut params = Vec::with_capacity(ops.len());
        for op in ops {
            if op.op == AttributeOpKind::Append && !allow_append {
                return Err(CompileError::Evaluation(ast.source().diagnostic(
                    op.span,
                    format!(
                        "Illegal +> operation on attribute {}. This operator can not be used in a Resource Expression",
                        op.name
                    ),
                )));
            }
            let value = self.evaluate(ast, op.value, scope)?;
            let param = Param::new(op.name.clone(), value, origin.clone());
            params.push(if op.op == AttributeOpKind::Append {
                param.appending()
            } else {
                param
            });
        }
        Ok(params)
    }

    fn accepts_attribute(&self, resource: &Resource, attribute: &str) -> bool {
        if is_metaparam(attribute) || attribute == "name" || attribute == "title" {
            return true;
        }
        let declared = |kind, declaration: &str| {
            self.registry
                .get(kind, declaration)
                .is_some_and(|d| d.params.iter().any(|p| p.name == attribute))
        };
        match resource.kind {
            ResourceKind::Builtin => {
                builtin_type(resource.type_name()).is_some_and(|t| t.accepts(attribute))
            }
            ResourceKind::Define => declared(DeclarationKind::Define, resource.type_name()),
            ResourceKind::Class => declared(DeclarationKind::Hostclass, resource.title()),
            ResourceKind::Node => true,
        }
    }

    /// Check that `attribute` may be set on `resource`
    pub(crate) fn validate_attribute(
        &self,
        resource: &Resource,
        attribute: &str,
        location: &Diagnostic,
    ) -> CompileResult<()> {
        if attribute == "stage" && resource.kind != ResourceKind::Class {
            return Err(at(
                location,
                ErrorKind::Evaluation,
                format!(
                    "Only classes can set 'stage'; normal resources like {} cannot change run stage",
                    resource.reference
                ),
            ));
        }
        if self.accepts_attribute(resource, attribute) {
            Ok(())
        } else {
            Err(at(
                location,
                ErrorKind::Resolution,
                format!("Invalid parameter '{}' on {}", attribute, resource.reference),
            ))
        }
    }

    /// Register a resource with the compilation
    ///
    /// Classes, defines and nodes are queued for evaluation.
    pub(crate) fn add_resource(&mut self, mut resource: Resource) -> CompileResult<ResourceId> {
        let reference = resource.reference.clone();
        if let Some(existing) = self.find_resource(&reference) {
            if is_isomorphic(&reference.type_name) {
                let previous = located(self.resource(existing).location.as_ref());
                let message = format!(
                    "Duplicate definition: {} is already defined{}; cannot redefine",
                    reference, previous
                );
                let location = resource
                    .location
                    .clone()
                    .unwrap_or_else(|| Diagnostic::unpositioned(""));
                return Err(at(&location, ErrorKind::Graph, message));
            }
        }
        resource.container = self.scopes.resource(resource.scope);
        let id = ResourceId::from_index(self.resources.len());
        self.index.entry(reference.clone()).or_insert(id);
        if resource.kind != ResourceKind::Builtin {
            self.queue.push_back(id);
        }
        tracing::debug!(resource = %reference, virtual_ = resource.is_virtual, "added resource");
        self.resources.push(resource);
        Ok(id)
    }

    /// `Type { attr => value }`
    pub(crate) fn resource_defaults(
        &mut self,
        ast: &Arc<Ast>,
        scope: ScopeId,
        type_name: &str,
        ops: &[AttributeOp],
    ) -> CompileResult<()> {
        let origin = self.scopes.get(scope).origin.clone();
        for param in self.attribute_params(ast, scope, ops, &origin, false)? {
            let span = ops
                .iter()
                .find(|op| op.name == param.name)
                .map(|op| op.span)
                .unwrap_or_default();
            self.scopes
                .set_default(scope, type_name, &param.name, param.value)
                .map_err(|e| CompileError::Evaluation(ast.source().diagnostic(span, e.to_string())))?;
        }
        Ok(())
    }

    /// `Type['title'] { attr => value, attr +> value }`
    pub(crate) fn resource_override(
        &mut self,
        ast: &Arc<Ast>,
        id: ExprId,
        scope: ScopeId,
        target: ExprId,
        ops: &[AttributeOp],
    ) -> CompileResult<()> {
        let target = self.evaluate(ast, target, scope)?;
        let refs = references(&target);
        if refs.is_empty() {
            return Err(evaluation(
                ast,
                id,
                format!("Cannot override a {} value; expected a resource reference", target.type_name()),
            ));
        }
        let origin = self.scopes.get(scope).origin.clone();
        let params = self.attribute_params(ast, scope, ops, &origin, true)?;
        for reference in refs {
            self.apply_override(Override {
                target: reference,
                params: params.clone(),
                origin: origin.clone(),
                from_collector: false,
                location: ast.diagnostic(id, ""),
            })?;
        }
        Ok(())
    }

    /// Merge now if the target exists, otherwise hold until finishing
    pub(crate) fn apply_override(&mut self, overriding: Override) -> CompileResult<()> {
        match self.find_resource(&overriding.target) {
            Some(target) => self.merge_override(target, &overriding),
            None => {
                self.overrides
                    .entry(overriding.target.clone())
                    .or_default()
                    .push(overriding);
                Ok(())
            }
        }
    }

    /// Merge an override into a resource, checking permission and
    /// attribute names
    pub(crate) fn merge_override(&mut self, id: ResourceId, overriding: &Override) -> CompileResult<()> {
        let resource = self.resource(id);
        if !overriding.from_collector && !self.registry.is_descendant(&overriding.origin, &resource.origin) {
            return Err(at(
                &overriding.location,
                ErrorKind::Evaluation,
                format!(
                    "Only subclasses can override parameters: {} cannot override {} declared in {}",
                    overriding.origin, resource.reference, resource.origin
                ),
            ));
        }
        for param in &overriding.params {
            self.validate_attribute(resource, &param.name, &overriding.location)?;
        }
        self.resource_mut(id)
            .merge(overriding)
            .map_err(|e| at(&overriding.location, ErrorKind::Evaluation, e.to_string()))
    }

    /// `Type <| query |> { overrides }`; returns the collector index
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn collect(
        &mut self,
        ast: &Arc<Ast>,
        id: ExprId,
        scope: ScopeId,
        type_name: &str,
        exported: bool,
        query: Option<ExprId>,
        ops: &[AttributeOp],
    ) -> CompileResult<usize> {
        let predicate = match query {
            Some(query) => Some(self.predicate(ast, query, scope)?),
            None => None,
        };
        let origin = self.scopes.get(scope).origin.clone();
        let overrides = self.attribute_params(ast, scope, ops, &origin, true)?;
        let mode = if exported {
            CollectorMode::Exported
        } else {
            CollectorMode::Virtual
        };
        let collector = Collector::new(name::canonical(type_name), mode, scope, origin, ast.diagnostic(id, ""))
            .with_predicate(predicate)
            .with_overrides(overrides);
        self.collectors.push(collector);
        Ok(self.collectors.len() - 1)
    }

    fn predicate(&mut self, ast: &Arc<Ast>, id: ExprId, scope: ScopeId) -> CompileResult<Predicate> {
        let NodeKind::Query { op, left, right } = ast.kind(id) else {
            return Err(evaluation(ast, id, "Expected a collector query"));
        };
        match op {
            QueryOp::And => Ok(Predicate::And(
                Box::new(self.predicate(ast, *left, scope)?),
                Box::new(self.predicate(ast, *right, scope)?),
            )),
            QueryOp::Or => Ok(Predicate::Or(
                Box::new(self.predicate(ast, *left, scope)?),
                Box::new(self.predicate(ast, *right, scope)?),
            )),
            QueryOp::Eq | QueryOp::Ne => {
                let attribute = match ast.kind(*left) {
                    NodeKind::Name(attribute) => attribute.clone(),
                    _ => self.evaluate(ast, *left, scope)?.to_string(),
                };
                let value = self.evaluate(ast, *right, scope)?;
                Ok(if *op == QueryOp::Eq {
                    Predicate::Equal(attribute, value)
                } else {
                    Predicate::NotEqual(attribute, value)
                })
            }
        }
    }

    /// Collector for specific references, as created by `realize`
    pub(crate) fn realize(&mut self, refs: Vec<ResourceRef>, scope: ScopeId, location: Diagnostic) {
        let mut by_type: IndexMap<String, indexmap::IndexSet<String>> = IndexMap::new();
        for reference in refs {
            by_type
                .entry(reference.type_name)
                .or_default()
                .insert(reference.title);
        }
        let origin = self.scopes.get(scope).origin.clone();
        for (type_name, titles) in by_type {
            let collector = Collector::new(type_name, CollectorMode::Virtual, scope, origin.clone(), location.clone())
                .with_titles(titles);
            self.collectors.push(collector);
        }
    }

    /// Run every active collector once; true if anything new matched
    pub(crate) fn evaluate_collectors(&mut self) -> CompileResult<bool> {
        let mut progress = false;
        for index in 0..self.collectors.len() {
            if !self.collectors[index].active {
                continue;
            }
            if self.collectors[index].mode == CollectorMode::Exported && !self.collectors[index].store_queried {
                self.collectors[index].store_queried = true;
                self.import_exported(index)?;
            }
            let matches: Vec<ResourceId> = (0..self.resources.len())
                .map(ResourceId::from_index)
                .filter(|&id| self.collectors[index].accepts(id, self.resource(id)))
                .collect();
            for id in matches {
                progress = true;
                let collector = &mut self.collectors[index];
                collector.matched.insert(id);
                let mode = collector.mode;
                let overriding = (!collector.overrides.is_empty()).then(|| Override {
                    target: self.resources[id.index()].reference.clone(),
                    params: collector.overrides.clone(),
                    origin: collector.origin.clone(),
                    from_collector: true,
                    location: collector.location.clone(),
                });
                let resource = self.resource_mut(id);
                resource.is_virtual = false;
                if mode == CollectorMode::Exported {
                    resource.exported = false;
                }
                tracing::debug!(resource = %resource.reference, "collected");
                if let Some(overriding) = overriding {
                    self.merge_override(id, &overriding)?;
                }
            }
            if self.collectors[index].is_complete(&self.resources) {
                self.collectors[index].active = false;
            }
        }
        Ok(progress)
    }

    /// Materialize what the export store holds for an exported collector
    fn import_exported(&mut self, index: usize) -> CompileResult<()> {
        let collector = &self.collectors[index];
        let stored = self
            .store
            .find(&collector.type_name, collector.predicate.as_ref(), &self.host);
        let (scope, origin, location) = (
            collector.scope,
            collector.origin.clone(),
            collector.location.clone(),
        );
        for item in stored {
            let reference = ResourceRef::new(&item.type_name, item.title);
            if let Some(existing) = self.find_resource(&reference) {
                if self.resource(existing).exported {
                    continue;
                }
                return Err(at(
                    &location,
                    ErrorKind::Graph,
                    format!("Exported resource {} from {} conflicts with a local resource", reference, item.host),
                ));
            }
            let kind = if builtin_type(&reference.type_name).is_some() {
                ResourceKind::Builtin
            } else {
                ResourceKind::Define
            };
            let mut resource = Resource::new(reference, kind, origin.clone(), scope).with_location(location.clone());
            resource.is_virtual = true;
            resource.exported = true;
            for (name, value) in item.parameters {
                resource.set(Param::new(name, value, origin.clone()));
            }
            for tag in &item.tags {
                resource
                    .tag(tag)
                    .map_err(|e| at(&location, ErrorKind::Evaluation, e.to_string()))?;
            }
            self.add_resource(resource)?;
        }
        Ok(())
    }

    /// Evaluate queued classes, defines and nodes in FIFO order, including
    /// any queued along the way; virtual ones wait for a later pass
    pub(crate) fn evaluate_queue(&mut self) -> CompileResult<bool> {
        let mut progress = false;
        let mut deferred = Vec::new();
        while let Some(id) = self.queue.pop_front() {
            let resource = self.resource(id);
            if resource.evaluated {
                continue;
            }
            if resource.is_virtual {
                deferred.push(id);
                continue;
            }
            self.evaluate_resource(id)?;
            progress = true;
        }
        self.queue.extend(deferred);
        Ok(progress)
    }
}
