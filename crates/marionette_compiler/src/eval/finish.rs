//! Finishing resources and assembling the catalog.

use super::{Endpoint, Evaluator, at, references};
use crate::builtin::INHERITED_METAPARAMS;
use crate::catalog::{Catalog, CatalogError, CatalogResource, Edge, EdgeKind};
use crate::resource::{Param, Resource, ResourceId, ResourceKind};
use crate::types::ResourceRef;
use crate::value::Value;
use indexmap::IndexMap;
use marionette_core::{CompileError, CompileResult, Diagnostic, ErrorKind};

/// Relationship metaparameters: name, whether the edge runs into the
/// declaring resource, and the edge kind
const RELATIONSHIP_EDGES: &[(&str, bool, EdgeKind)] = &[
    ("before", false, EdgeKind::Before),
    ("notify", false, EdgeKind::Notify),
    ("require", true, EdgeKind::Before),
    ("subscribe", true, EdgeKind::Notify),
];

impl Evaluator<'_> {
    /// Finish every resource in add order
    ///
    /// # Errors
    ///
    /// Returns a graph error if an override names a resource that was never
    /// declared
    pub(crate) fn finish(&mut self) -> CompileResult<()> {
        for index in 0..self.resources.len() {
            self.finish_resource(ResourceId::from_index(index))?;
        }
        let Some(first) = self.overrides.values().flatten().next() else {
            return Ok(());
        };
        let missing: Vec<String> = self.overrides.keys().map(ToString::to_string).collect();
        Err(at(
            &first.location,
            ErrorKind::Graph,
            format!("Could not find resource(s) {} for overriding", missing.join(", ")),
        ))
    }

    /// Apply pending overrides and scope defaults, then inherit
    /// metaparameters and tags from the container
    fn finish_resource(&mut self, id: ResourceId) -> CompileResult<()> {
        if self.resource(id).finished {
            return Ok(());
        }
        let reference = self.resource(id).reference.clone();
        if self.find_resource(&reference) == Some(id) {
            if let Some(pending) = self.overrides.shift_remove(&reference) {
                for overriding in &pending {
                    self.merge_override(id, overriding)?;
                }
            }
        }

        let resource = self.resource(id);
        let location = resource
            .location
            .clone()
            .unwrap_or_else(|| Diagnostic::unpositioned(""));
        let origin = resource.origin.clone();
        let defaults = self.scopes.defaults_for(resource.scope, resource.type_name());
        for (attribute, value) in defaults {
            if self.resource(id).has(&attribute) {
                continue;
            }
            self.validate_attribute(self.resource(id), &attribute, &location)?;
            let resource = self.resource_mut(id);
            if attribute == "tag" {
                for tag in value.into_array() {
                    resource
                        .tag(&tag.to_string())
                        .map_err(|e| at(&location, ErrorKind::Evaluation, e.to_string()))?;
                }
            } else {
                resource.set(Param::new(attribute, value, origin.clone()));
            }
        }

        if let Some(container) = self.resource(id).container {
            self.finish_resource(container)?;
            let parent = self.resource(container);
            let inherited: Vec<Param> = INHERITED_METAPARAMS
                .iter()
                .filter_map(|metaparam| parent.param(metaparam).cloned())
                .collect();
            let tags = parent.tags.clone();
            let resource = self.resource_mut(id);
            for param in inherited {
                if !resource.has(&param.name) {
                    resource.set(param);
                }
            }
            resource.tags.extend(tags);
        }
        self.resource_mut(id).finished = true;
        Ok(())
    }

    /// Build the catalog from finished resources
    pub(crate) fn assemble(&self, environment: &str) -> CompileResult<Catalog> {
        let mut catalog = Catalog::new(self.host.clone(), environment);
        let mut positions: IndexMap<ResourceId, usize> = IndexMap::new();
        for (index, resource) in self.resources.iter().enumerate() {
            let entry = catalog_resource(resource);
            if resource.exported {
                catalog.exported.push(entry.clone());
            }
            if resource.is_virtual {
                continue;
            }
            catalog.tags.extend(entry.tags.iter().cloned());
            let position = catalog
                .add_resource(entry)
                .map_err(|e| catalog_error(resource.location.as_ref(), e))?;
            positions.insert(ResourceId::from_index(index), position);
        }

        for (&id, &position) in &positions {
            let resource = self.resource(id);
            if resource.type_name() == "stage" {
                continue;
            }
            let source = match resource.kind {
                ResourceKind::Class | ResourceKind::Node => Some(self.stage_of(id, &catalog)?),
                _ => resource.container.and_then(|c| positions.get(&c).copied()),
            };
            if let Some(source) = source {
                add_edge(&mut catalog, source, position, EdgeKind::Contains, resource)?;
            }
        }
        for (container, contained) in &self.containments {
            if let (Some(&source), Some(&target)) = (positions.get(container), positions.get(contained)) {
                add_edge(&mut catalog, source, target, EdgeKind::Contains, self.resource(*contained))?;
            }
        }

        for (&id, &position) in &positions {
            let resource = self.resource(id);
            for &(metaparam, inbound, kind) in RELATIONSHIP_EDGES {
                let Some(value) = resource.get(metaparam) else {
                    continue;
                };
                for reference in references(value) {
                    let Some(other) = catalog.position(&reference) else {
                        return Err(missing_relationship(resource.location.as_ref(), &reference, &resource.reference));
                    };
                    let (source, target) = if inbound { (other, position) } else { (position, other) };
                    add_edge(&mut catalog, source, target, kind, resource)?;
                }
            }
        }

        for relationship in &self.relationships {
            let sources = self.endpoint_positions(&relationship.source, &positions);
            let targets = self.endpoint_positions(&relationship.target, &positions);
            for (source_ref, source) in &sources {
                for (target_ref, target) in &targets {
                    let (source, target) = match (source, target) {
                        (Some(source), Some(target)) => (*source, *target),
                        (None, _) => {
                            return Err(missing_relationship(Some(&relationship.location), source_ref, target_ref));
                        }
                        (_, None) => {
                            return Err(missing_relationship(Some(&relationship.location), target_ref, source_ref));
                        }
                    };
                    catalog
                        .add_edge(Edge {
                            source,
                            target,
                            kind: relationship.kind,
                        })
                        .map_err(|e| catalog_error(Some(&relationship.location), e))?;
                }
            }
        }

        catalog.classes = self.classes.iter().cloned().collect();
        catalog.messages = self.messages.clone();
        catalog
            .validate()
            .map_err(|e| CompileError::Graph(Diagnostic::unpositioned(e.to_string())))?;
        tracing::debug!(
            resources = catalog.resource_count(),
            edges = catalog.edge_count(),
            "assembled catalog"
        );
        Ok(catalog)
    }

    /// Position of the stage a class or node runs in: its own `stage`, the
    /// nearest container's, or `Stage[main]`
    fn stage_of(&self, id: ResourceId, catalog: &Catalog) -> CompileResult<usize> {
        let mut current = Some(id);
        while let Some(candidate) = current {
            let resource = self.resource(candidate);
            if resource.kind == ResourceKind::Class {
                if let Some(stage) = resource.get("stage") {
                    let title = match stage {
                        Value::Reference(reference) => reference.title.clone(),
                        other => other.to_string(),
                    };
                    return catalog.position(&ResourceRef::new("stage", title.clone())).ok_or_else(|| {
                        let location = self.resource(id).location.clone().unwrap_or_else(|| Diagnostic::unpositioned(""));
                        at(
                            &location,
                            ErrorKind::Resolution,
                            format!("Could not find stage {} specified by {}", title, self.resource(id).reference),
                        )
                    });
                }
            }
            current = resource.container;
        }
        catalog
            .position(&ResourceRef::new("stage", "main"))
            .ok_or_else(|| CompileError::Graph(Diagnostic::unpositioned("Could not find stage main")))
    }

    /// References an endpoint names, each with its catalog position
    fn endpoint_positions(
        &self,
        endpoint: &Endpoint,
        positions: &IndexMap<ResourceId, usize>,
    ) -> Vec<(ResourceRef, Option<usize>)> {
        match endpoint {
            Endpoint::Resources(refs) => refs
                .iter()
                .map(|reference| {
                    let position = self
                        .find_resource(reference)
                        .and_then(|id| positions.get(&id).copied())
                        .or_else(|| {
                            let main = reference.is_class() && reference.title == "main";
                            main.then(|| self.find_resource(&ResourceRef::class("")))
                                .flatten()
                                .and_then(|id| positions.get(&id).copied())
                        });
                    (reference.clone(), position)
                })
                .collect(),
            Endpoint::Collector(index) => self.collectors[*index]
                .matched
                .iter()
                .filter_map(|id| {
                    positions
                        .get(id)
                        .map(|&position| (self.resource(*id).reference.clone(), Some(position)))
                })
                .collect(),
        }
    }
}

fn catalog_resource(resource: &Resource) -> CatalogResource {
    let title = if resource.reference.is_class() && resource.title().is_empty() {
        "main".to_string()
    } else {
        resource.title().to_string()
    };
    let location = resource.location.as_ref().filter(|l| l.has_position());
    CatalogResource {
        type_name: resource.type_name().to_string(),
        title,
        tags: resource.tags.clone(),
        parameters: resource
            .params()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect(),
        exported: resource.exported,
        file: location.and_then(|l| l.file.clone()),
        line: location.map(|l| l.line),
    }
}

fn add_edge(
    catalog: &mut Catalog,
    source: usize,
    target: usize,
    kind: EdgeKind,
    resource: &Resource,
) -> CompileResult<()> {
    catalog
        .add_edge(Edge { source, target, kind })
        .map_err(|e| catalog_error(resource.location.as_ref(), e))
}

fn catalog_error(location: Option<&Diagnostic>, error: CatalogError) -> CompileError {
    let location = location.cloned().unwrap_or_else(|| Diagnostic::unpositioned(""));
    at(&location, ErrorKind::Graph, error.to_string())
}

fn missing_relationship(location: Option<&Diagnostic>, missing: &ResourceRef, from: &ResourceRef) -> CompileError {
    let location = location.cloned().unwrap_or_else(|| Diagnostic::unpositioned(""));
    at(
        &location,
        ErrorKind::Graph,
        format!("Could not find resource '{}' for relationship from '{}'", missing, from),
    )
}
