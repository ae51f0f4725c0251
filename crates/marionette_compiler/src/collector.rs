//! Collectors realize virtual and exported resources.

use crate::resource::{Origin, Param, Resource, ResourceId};
use crate::scope::ScopeId;
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use marionette_core::Diagnostic;
use serde::Serialize;

/// Anything a collector predicate can inspect
pub trait Attributes {
    /// Title
    fn title(&self) -> &str;
    /// Whether the tag is present
    fn has_tag(&self, tag: &str) -> bool;
    /// Parameter value
    fn attribute(&self, name: &str) -> Option<&Value>;
}

impl Attributes for Resource {
    fn title(&self) -> &str {
        Resource::title(self)
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.tagged(tag)
    }

    fn attribute(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// A resource stored by another host's compilation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredResource {
    /// Host that exported it
    pub host: String,
    /// Canonical type name
    pub type_name: String,
    /// Title
    pub title: String,
    /// Parameters
    pub parameters: IndexMap<String, Value>,
    /// Tags
    pub tags: IndexSet<String>,
}

impl Attributes for StoredResource {
    fn title(&self) -> &str {
        &self.title
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(&tag.to_lowercase())
    }

    fn attribute(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }
}

/// Evaluated collector query
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `attr == value`
    Equal(String, Value),
    /// `attr != value`
    NotEqual(String, Value),
    /// Both
    And(Box<Predicate>, Box<Predicate>),
    /// Either
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    /// Whether `subject` satisfies the query
    ///
    /// `title` compares the title, `tag` tests tag membership, any other
    /// name compares the parameter; array parameters match by membership.
    #[must_use]
    pub fn matches<A: Attributes + ?Sized>(&self, subject: &A) -> bool {
        match self {
            Self::Equal(attribute, value) => equal(subject, attribute, value),
            Self::NotEqual(attribute, value) => !equal(subject, attribute, value),
            Self::And(a, b) => a.matches(subject) && b.matches(subject),
            Self::Or(a, b) => a.matches(subject) || b.matches(subject),
        }
    }
}

fn equal<A: Attributes + ?Sized>(subject: &A, attribute: &str, value: &Value) -> bool {
    match attribute {
        "title" => Value::from(subject.title()).equals(value),
        "tag" => subject.has_tag(&value.to_string()),
        _ => match subject.attribute(attribute) {
            Some(Value::Array(items)) => items.iter().any(|item| item.equals(value)),
            Some(current) => current.equals(value),
            None => false,
        },
    }
}

/// Which resources a collector looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectorMode {
    /// `<| |>` and `realize`: local resources
    Virtual,
    /// `<<| |>>`: exported resources, local and stored
    Exported,
}

/// A pending query over resources of one type
#[derive(Debug, Clone)]
pub struct Collector {
    /// Canonical type name
    pub type_name: String,
    /// Virtual or exported
    pub mode: CollectorMode,
    /// Query; `None` matches everything
    pub predicate: Option<Predicate>,
    /// Titles for `realize`
    pub titles: Option<IndexSet<String>>,
    /// Parameters applied to every match
    pub overrides: Vec<Param>,
    /// Declaring scope
    pub scope: ScopeId,
    /// Declaring context
    pub origin: Origin,
    /// Where the collector was written
    pub location: Diagnostic,
    /// Resources already collected
    pub matched: IndexSet<ResourceId>,
    /// Still part of the evaluation loop
    pub active: bool,
    /// Export store already consulted
    pub store_queried: bool,
}

impl Collector {
    /// Create an open collector
    #[must_use]
    pub fn new(
        type_name: impl Into<String>,
        mode: CollectorMode,
        scope: ScopeId,
        origin: Origin,
        location: Diagnostic,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            mode,
            predicate: None,
            titles: None,
            overrides: Vec::new(),
            scope,
            origin,
            location,
            matched: IndexSet::new(),
            active: true,
            store_queried: false,
        }
    }

    /// Restrict to a query
    #[must_use]
    pub fn with_predicate(mut self, predicate: Option<Predicate>) -> Self {
        self.predicate = predicate;
        self
    }

    /// Restrict to enumerated titles
    #[must_use]
    pub fn with_titles(mut self, titles: IndexSet<String>) -> Self {
        self.titles = Some(titles);
        self
    }

    /// Apply parameters to every match
    #[must_use]
    pub fn with_overrides(mut self, overrides: Vec<Param>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Whether `resource` is a new match
    #[must_use]
    pub fn accepts(&self, id: ResourceId, resource: &Resource) -> bool {
        if resource.type_name() != self.type_name || self.matched.contains(&id) {
            return false;
        }
        let mode_ok = match self.mode {
            CollectorMode::Virtual => !resource.exported || !resource.is_virtual,
            CollectorMode::Exported => resource.exported,
        };
        let title_ok = self
            .titles
            .as_ref()
            .is_none_or(|titles| titles.contains(resource.title()));
        mode_ok
            && title_ok
            && self
                .predicate
                .as_ref()
                .is_none_or(|predicate| predicate.matches(resource))
    }

    /// Enumerated titles not matched yet
    #[must_use]
    pub fn unmatched_titles(&self, resources: &[Resource]) -> Vec<String> {
        let Some(titles) = &self.titles else {
            return Vec::new();
        };
        titles
            .iter()
            .filter(|title| {
                !self
                    .matched
                    .iter()
                    .any(|id| resources.get(id.index()).is_some_and(|r| r.title() == *title))
            })
            .cloned()
            .collect()
    }

    /// Whether an enumerated collector has found every title
    #[must_use]
    pub fn is_complete(&self, resources: &[Resource]) -> bool {
        self.titles.is_some() && self.unmatched_titles(resources).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;
    use crate::types::ResourceRef;

    fn resource(title: &str, is_virtual: bool) -> Resource {
        let mut r = Resource::new(
            ResourceRef::new("file", title),
            ResourceKind::Builtin,
            Origin::main(),
            ScopeId::from_index(0),
        );
        r.is_virtual = is_virtual;
        r
    }

    fn collector() -> Collector {
        Collector::new(
            "file",
            CollectorMode::Virtual,
            ScopeId::from_index(0),
            Origin::main(),
            Diagnostic::unpositioned("collector"),
        )
    }

    #[test]
    fn test_predicate_terms() {
        let mut r = resource("/a", true);
        r.set(Param::new("owner", Value::from("root"), Origin::main()));
        r.set(Param::new(
            "groups",
            Value::from(vec![Value::from("wheel"), Value::from("adm")]),
            Origin::main(),
        ));
        r.tag("web").unwrap();

        assert!(Predicate::Equal("title".into(), Value::from("/a")).matches(&r));
        assert!(Predicate::Equal("tag".into(), Value::from("web")).matches(&r));
        assert!(Predicate::Equal("groups".into(), Value::from("adm")).matches(&r));
        assert!(Predicate::NotEqual("owner".into(), Value::from("nobody")).matches(&r));
        assert!(!Predicate::Equal("missing".into(), Value::from("x")).matches(&r));

        let both = Predicate::And(
            Box::new(Predicate::Equal("owner".into(), Value::from("ROOT"))),
            Box::new(Predicate::Equal("tag".into(), Value::from("db"))),
        );
        assert!(!both.matches(&r));
        let either = Predicate::Or(
            Box::new(Predicate::Equal("tag".into(), Value::from("db"))),
            Box::new(Predicate::Equal("owner".into(), Value::from("root"))),
        );
        assert!(either.matches(&r));
    }

    #[test]
    fn test_accepts_skips_matched_and_other_types() {
        let mut c = collector();
        let r = resource("/a", true);
        let id = ResourceId::from_index(0);
        assert!(c.accepts(id, &r));
        c.matched.insert(id);
        assert!(!c.accepts(id, &r));

        let pkg = Resource::new(
            ResourceRef::new("package", "vim"),
            ResourceKind::Builtin,
            Origin::main(),
            ScopeId::from_index(0),
        );
        assert!(!collector().accepts(id, &pkg));
    }

    #[test]
    fn test_exported_mode() {
        let c = Collector::new(
            "file",
            CollectorMode::Exported,
            ScopeId::from_index(0),
            Origin::main(),
            Diagnostic::unpositioned("collector"),
        );
        let mut r = resource("/a", true);
        assert!(!c.accepts(ResourceId::from_index(0), &r));
        r.exported = true;
        assert!(c.accepts(ResourceId::from_index(0), &r));
        assert!(!collector().accepts(ResourceId::from_index(0), &r));
    }

    #[test]
    fn test_title_restriction_and_completion() {
        let resources = vec![resource("/a", true), resource("/b", true)];
        let mut c = collector().with_titles(["/a".to_string(), "/missing".to_string()].into());
        assert!(c.accepts(ResourceId::from_index(0), &resources[0]));
        assert!(!c.accepts(ResourceId::from_index(1), &resources[1]));
        c.matched.insert(ResourceId::from_index(0));
        assert_eq!(c.unmatched_titles(&resources), vec!["/missing".to_string()]);
        assert!(!c.is_complete(&resources));
        assert!(!collector().is_complete(&resources));
    }

    #[test]
    fn test_stored_resources_match() {
        let stored = StoredResource {
            host: "db01".into(),
            type_name: "host".into(),
            title: "db01".into(),
            parameters: [("ip".to_string(), Value::from("10.0.0.2"))].into_iter().collect(),
            tags: ["db".to_string()].into_iter().collect(),
        };
        assert!(Predicate::Equal("tag".into(), Value::from("DB")).matches(&stored));
        assert!(Predicate::Equal("ip".into(), Value::from("10.0.0.2")).matches(&stored));
    }
}
