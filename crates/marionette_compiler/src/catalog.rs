//! The compiled resource graph.
//!
//! Vertices are resources in the order they were added; edges are index
//! pairs into that list. Containment edges run from a container to what it
//! contains, relationship edges from the resource applied first.

use crate::builtin::is_isomorphic;
use crate::types::ResourceRef;
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::fmt;

/// Errors building a catalog
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// Two resources with one key
    #[error("Duplicate resource {0} in catalog")]
    Duplicate(String),

    /// Edge endpoint out of range
    #[error("Edge endpoint {0} is not a resource in the catalog")]
    MissingEndpoint(usize),
}

/// Kind of a catalog edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Container to contained
    Contains,
    /// Source applied before target
    Before,
    /// Source applied before target, target refreshed on change
    Notify,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contains => write!(f, "contains"),
            Self::Before => write!(f, "before"),
            Self::Notify => write!(f, "notify"),
        }
    }
}

/// An edge between two resources by index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    /// Source index
    pub source: usize,
    /// Target index
    pub target: usize,
    /// Kind
    pub kind: EdgeKind,
}

/// A finished resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogResource {
    /// Canonical type name
    #[serde(rename = "type")]
    pub type_name: String,
    /// Title
    pub title: String,
    /// Tags
    pub tags: IndexSet<String>,
    /// Parameters in the order they were set
    pub parameters: IndexMap<String, Value>,
    /// Declared with `@@`
    pub exported: bool,
    /// Declaring file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Declaring line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl CatalogResource {
    /// Key of this resource
    #[must_use]
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(&self.type_name, self.title.clone())
    }
}

/// Compiled catalog for one host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Catalog {
    /// Host name
    pub name: String,
    /// Compile time as a unix timestamp
    pub version: i64,
    /// Environment
    pub environment: String,
    /// Resources in add order
    pub resources: Vec<CatalogResource>,
    /// Edges
    pub edges: Vec<Edge>,
    /// Evaluated classes in evaluation order
    pub classes: Vec<String>,
    /// Union of all resource tags
    pub tags: IndexSet<String>,
    /// Exported resources not collected locally
    pub exported: Vec<CatalogResource>,
    /// Output of the log functions
    pub messages: Vec<String>,
    #[serde(skip)]
    index: IndexMap<ResourceRef, usize>,
}

impl Catalog {
    /// Create an empty catalog stamped with the current time
    #[must_use]
    pub fn new(name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: chrono::Utc::now().timestamp(),
            environment: environment.into(),
            resources: Vec::new(),
            edges: Vec::new(),
            classes: Vec::new(),
            tags: IndexSet::new(),
            exported: Vec::new(),
            messages: Vec::new(),
            index: IndexMap::new(),
        }
    }

    /// Add a resource, returning its index
    ///
    /// Types that are not isomorphic (`exec`) may repeat a key; lookups
    /// find the first.
    ///
    /// # Errors
    ///
    /// Returns error if a resource of an isomorphic type with the same key
    /// exists
    pub fn add_resource(&mut self, resource: CatalogResource) -> Result<usize, CatalogError> {
        let key = resource.reference();
        if self.index.contains_key(&key) && is_isomorphic(&key.type_name) {
            return Err(CatalogError::Duplicate(key.to_string()));
        }
        let position = self.resources.len();
        self.tags.extend(resource.tags.iter().cloned());
        self.index.entry(key).or_insert(position);
        self.resources.push(resource);
        Ok(position)
    }

    /// Add an edge; repeated edges are kept once
    ///
    /// # Errors
    ///
    /// Returns error if an endpoint is not a resource
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), CatalogError> {
        for endpoint in [edge.source, edge.target] {
            if endpoint >= self.resources.len() {
                return Err(CatalogError::MissingEndpoint(endpoint));
            }
        }
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
        Ok(())
    }

    /// Index of a resource
    #[must_use]
    pub fn position(&self, reference: &ResourceRef) -> Option<usize> {
        self.index.get(reference).copied()
    }

    /// Resource by key
    #[must_use]
    pub fn resource(&self, reference: &ResourceRef) -> Option<&CatalogResource> {
        self.position(reference).map(|i| &self.resources[i])
    }

    /// Targets of edges leaving `index`
    #[must_use]
    pub fn dependents(&self, index: usize) -> Vec<usize> {
        self.edges
            .iter()
            .filter(|e| e.source == index)
            .map(|e| e.target)
            .collect()
    }

    /// Sources of edges entering `index`
    #[must_use]
    pub fn dependencies(&self, index: usize) -> Vec<usize> {
        self.edges
            .iter()
            .filter(|e| e.target == index)
            .map(|e| e.source)
            .collect()
    }

    /// Whether an edge of `kind` runs between two resources
    #[must_use]
    pub fn has_edge(&self, source: &ResourceRef, target: &ResourceRef, kind: EdgeKind) -> bool {
        match (self.position(source), self.position(target)) {
            (Some(source), Some(target)) => self.edges.contains(&Edge {
                source,
                target,
                kind,
            }),
            _ => false,
        }
    }

    /// Number of resources
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Number of edges
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Whether the catalog holds no resources
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Check that every edge endpoint exists
    ///
    /// # Errors
    ///
    /// Returns error naming the first dangling endpoint
    pub fn validate(&self) -> Result<(), CatalogError> {
        for edge in &self.edges {
            for endpoint in [edge.source, edge.target] {
                if endpoint >= self.resources.len() {
                    return Err(CatalogError::MissingEndpoint(endpoint));
                }
            }
        }
        Ok(())
    }
}
