//! Resources, their parameters and overrides.

use crate::registry::DeclarationKind;
use crate::scope::ScopeId;
use crate::types::ResourceRef;
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use marionette_core::{Diagnostic, define_id, name};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

define_id!(
    /// Index of a resource in add order
    ResourceId
);

static TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[[:alnum:]_][[:alnum:]_:.-]*$").expect("tag pattern must compile"));

/// Whether `tag` is a legal tag
#[must_use]
pub fn is_valid_tag(tag: &str) -> bool {
    TAG.is_match(tag)
}

/// The declaration whose code produced a value or a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin {
    /// Declaration kind
    pub kind: DeclarationKind,
    /// Canonical declaration name; empty for the main class
    pub name: String,
}

impl Origin {
    /// Create an origin
    #[must_use]
    pub fn new(kind: DeclarationKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// The main class
    #[must_use]
    pub fn main() -> Self {
        Self::new(DeclarationKind::Hostclass, "")
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeclarationKind::Hostclass => write!(f, "{}", ResourceRef::class(&self.name)),
            DeclarationKind::Define => write!(f, "define {}", self.name),
            DeclarationKind::Node => write!(f, "Node[{}]", self.name),
        }
    }
}

/// How a resource is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Builtin type, nothing to evaluate
    Builtin,
    /// Class instance
    Class,
    /// Defined type instance
    Define,
    /// Node instance
    Node,
}

/// A parameter value and the context that set it
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Attribute name
    pub name: String,
    /// Value
    pub value: Value,
    /// Setting context
    pub origin: Origin,
    /// `+>` rather than `=>`
    pub append: bool,
}

impl Param {
    /// A plain `=>` parameter
    #[must_use]
    pub fn new(name: impl Into<String>, value: Value, origin: Origin) -> Self {
        Self {
            name: name.into(),
            value,
            origin,
            append: false,
        }
    }

    /// Mark as `+>`
    #[must_use]
    pub fn appending(mut self) -> Self {
        self.append = true;
        self
    }
}

/// Errors raised while changing a resource
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// Tag with illegal characters
    #[error("Invalid tag '{0}'")]
    InvalidTag(String),
}

/// One concrete configuration item
#[derive(Debug, Clone)]
pub struct Resource {
    /// Type and title
    pub reference: ResourceRef,
    /// How the resource is evaluated
    pub kind: ResourceKind,
    /// Declaration that declared it
    pub origin: Origin,
    /// Scope it was declared in
    pub scope: ScopeId,
    /// Resource whose evaluation declared it
    pub container: Option<ResourceId>,
    /// Tags, lower-case
    pub tags: IndexSet<String>,
    /// Declared with `@` (or `@@`) and not yet realized
    pub is_virtual: bool,
    /// Declared with `@@`
    pub exported: bool,
    /// Body evaluated (or nothing to evaluate)
    pub evaluated: bool,
    /// Overrides, defaults and inherited metaparameters applied
    pub finished: bool,
    /// Where it was declared
    pub location: Option<Diagnostic>,
    params: IndexMap<String, Param>,
}

impl Resource {
    /// Create a resource carrying its automatic tags
    #[must_use]
    pub fn new(reference: ResourceRef, kind: ResourceKind, origin: Origin, scope: ScopeId) -> Self {
        let mut resource = Self {
            reference,
            kind,
            origin,
            scope,
            container: None,
            tags: IndexSet::new(),
            is_virtual: false,
            exported: false,
            evaluated: kind == ResourceKind::Builtin,
            finished: false,
            location: None,
            params: IndexMap::new(),
        };
        resource.add_automatic_tags();
        resource
    }

    /// Set the declaration location
    #[must_use]
    pub fn with_location(mut self, location: Diagnostic) -> Self {
        self.location = Some(location);
        self
    }

    /// Canonical type name
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.reference.type_name
    }

    /// Title
    #[must_use]
    pub fn title(&self) -> &str {
        &self.reference.title
    }

    /// Parameter value
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name).map(|p| &p.value)
    }

    /// Whether a parameter is set
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Parameter with its origin
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.get(name)
    }

    /// Set a parameter; `undef` unsets it
    pub fn set(&mut self, param: Param) {
        if param.value.is_undef() {
            self.params.shift_remove(&param.name);
        } else {
            self.params.insert(param.name.clone(), param);
        }
    }

    /// Parameters in the order they were first set
    pub fn params(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.params.iter().map(|(k, p)| (k.as_str(), &p.value))
    }

    /// Add a tag
    ///
    /// # Errors
    ///
    /// Returns error if the tag is not a legal tag
    pub fn tag(&mut self, tag: &str) -> Result<(), ResourceError> {
        let tag = tag.to_lowercase();
        if !is_valid_tag(&tag) {
            return Err(ResourceError::InvalidTag(tag));
        }
        self.tags.insert(tag);
        Ok(())
    }

    /// Whether the resource carries `tag`
    #[must_use]
    pub fn tagged(&self, tag: &str) -> bool {
        self.tags.contains(&tag.to_lowercase())
    }

    /// Apply an override: scalar replacement, `+>` appending with one level
    /// of flattening, `tag` folded into the tag set
    ///
    /// Permission is checked by the caller.
    ///
    /// # Errors
    ///
    /// Returns error if an overriding tag is illegal
    pub fn merge(&mut self, overriding: &Override) -> Result<(), ResourceError> {
        for param in &overriding.params {
            if param.name == "tag" {
                for tag in param.value.clone().into_array() {
                    self.tag(&tag.to_string())?;
                }
                continue;
            }
            let value = match self.get(&param.name) {
                Some(current) if param.append => {
                    let mut items = current.clone().into_array();
                    items.extend(param.value.clone().into_array());
                    Value::Array(items)
                }
                _ => param.value.clone(),
            };
            self.set(Param::new(param.name.clone(), value, param.origin.clone()));
        }
        Ok(())
    }

    fn add_automatic_tags(&mut self) {
        let mut candidates = vec![self.reference.type_name.clone()];
        let title = self.reference.title.to_lowercase();
        if is_valid_tag(&title) {
            candidates.push(title);
        }
        for candidate in candidates {
            if candidate.is_empty() {
                continue;
            }
            if name::is_qualified(&candidate) {
                for segment in candidate.split(name::SEPARATOR) {
                    if is_valid_tag(segment) {
                        self.tags.insert(segment.to_string());
                    }
                }
            }
            if is_valid_tag(&candidate) {
                self.tags.insert(candidate);
            }
        }
    }
}

/// Parameters to merge into an existing resource
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    /// Target resource
    pub target: ResourceRef,
    /// Replaced or appended parameters
    pub params: Vec<Param>,
    /// Context that wrote the override
    pub origin: Origin,
    /// Produced by a collector, which may override any resource it collects
    pub from_collector: bool,
    /// Where the override was written
    pub location: Diagnostic,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(title: &str) -> Resource {
        Resource::new(
            ResourceRef::new("file", title),
            ResourceKind::Builtin,
            Origin::main(),
            ScopeId::from_index(0),
        )
    }

    fn override_of(target: ResourceRef, params: Vec<Param>) -> Override {
        Override {
            target,
            params,
            origin: Origin::main(),
            from_collector: false,
            location: Diagnostic::unpositioned("test"),
        }
    }

    #[test]
    fn test_automatic_tags() {
        let r = Resource::new(
            ResourceRef::new("apache::vhost", "www"),
            ResourceKind::Define,
            Origin::main(),
            ScopeId::from_index(0),
        );
        for tag in ["apache::vhost", "apache", "vhost", "www"] {
            assert!(r.tagged(tag), "missing {}", tag);
        }
        let f = file("/tmp/x");
        assert!(f.tagged("file"));
        assert!(!f.tagged("/tmp/x"));
    }

    #[test]
    fn test_invalid_tags_rejected() {
        let mut r = file("x");
        assert!(r.tag("Web").is_ok());
        assert!(r.tagged("web"));
        for bad in ["*", "-a", "a b", ""] {
            assert!(r.tag(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_merge_replaces_and_appends() {
        let mut r = file("x");
        r.set(Param::new("mode", Value::from(vec![Value::Integer(0)]), Origin::main()));
        r.set(Param::new("owner", Value::from("root"), Origin::main()));
        let ov = override_of(
            r.reference.clone(),
            vec![
                Param::new("mode", Value::Integer(1), Origin::main()).appending(),
                Param::new("owner", Value::from("web"), Origin::main()),
            ],
        );
        r.merge(&ov).unwrap();
        assert_eq!(
            r.get("mode"),
            Some(&Value::from(vec![Value::Integer(0), Value::Integer(1)]))
        );
        assert_eq!(r.get("owner"), Some(&Value::from("web")));
    }

    #[test]
    fn test_append_to_missing_parameter_keeps_value() {
        let mut r = file("x");
        let ov = override_of(
            r.reference.clone(),
            vec![Param::new("content", Value::from("m"), Origin::main()).appending()],
        );
        r.merge(&ov).unwrap();
        assert_eq!(r.get("content"), Some(&Value::from("m")));
    }

    #[test]
    fn test_append_flattens_one_level() {
        let mut r = file("x");
        r.set(Param::new("require", Value::from("other"), Origin::main()));
        let ov = override_of(
            r.reference.clone(),
            vec![
                Param::new(
                    "require",
                    Value::from(vec![Value::from("testing"), Value::from(vec![Value::from("deep")])]),
                    Origin::main(),
                )
                .appending(),
            ],
        );
        r.merge(&ov).unwrap();
        assert_eq!(
            r.get("require"),
            Some(&Value::from(vec![
                Value::from("other"),
                Value::from("testing"),
                Value::from(vec![Value::from("deep")]),
            ]))
        );
    }

    #[test]
    fn test_tag_override_folds_into_tags() {
        let mut r = file("x");
        let ov = override_of(
            r.reference.clone(),
            vec![Param::new("tag", Value::from(vec![Value::from("a"), Value::from("b")]), Origin::main())],
        );
        r.merge(&ov).unwrap();
        assert!(r.tagged("a") && r.tagged("b"));
        assert!(!r.has("tag"));
    }

    #[test]
    fn test_undef_unsets() {
        let mut r = file("x");
        r.set(Param::new("mode", Value::from("0644"), Origin::main()));
        r.set(Param::new("mode", Value::Undef, Origin::main()));
        assert!(!r.has("mode"));
    }
}
