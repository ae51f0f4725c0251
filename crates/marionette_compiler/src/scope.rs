//! Variable scopes.
//!
//! Scopes live in an arena for the whole compilation. A scope is created
//! for every class, define and node activation and for every lambda call;
//! class scopes are additionally registered by class name so qualified
//! variables (`$apache::port`) can be read after the class was evaluated.
//!
//! Regex captures (`$0`..`$9`) are bound in ephemeral generations stacked on
//! a scope. A new generation shadows the ones below it; generations are
//! dropped back to a recorded level when the construct that matched ends.

use crate::registry::DeclarationKind;
use crate::resource::{Origin, ResourceId};
use crate::value::Value;
use indexmap::IndexMap;
use marionette_core::{define_id, name};

define_id!(
    /// Index of a scope in a [`ScopeArena`]
    ScopeId
);

/// What created a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// The top scope, also the scope of the main class
    Top,
    /// A node body
    Node,
    /// A class body
    Class,
    /// A defined resource body
    Define,
    /// A lambda, function or template body
    Local,
}

/// Errors raised by scope operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    /// Plain assignment to a name already bound in the same scope
    #[error("Cannot reassign variable {0}")]
    Reassign(String),

    /// Assignment to `$0`..`$9`
    #[error("Cannot assign to a numeric match result variable '${0}'")]
    Numeric(String),

    /// Assignment to `$a::b`
    #[error("Cannot assign to variables in other namespaces: ${0}")]
    Qualified(String),

    /// `+=` / `-=` on a variable bound in the same scope
    #[error("Cannot {operation}, variable {name} is defined in this scope")]
    Local {
        /// `append` or `remove`
        operation: &'static str,
        /// Variable name
        name: String,
    },

    /// `+=` / `-=` on a variable that is not visible
    #[error("Cannot {operation}, variable {name} is not defined")]
    Undefined {
        /// `append` or `remove`
        operation: &'static str,
        /// Variable name
        name: String,
    },

    /// Appending a non-hash to a hash
    #[error("Trying to append to a hash with something which is not a hash is unsupported")]
    HashAppend,

    /// Appending to a value that cannot grow
    #[error("Appending to variables of type {0} is unsupported")]
    Append(&'static str),

    /// Removing from a value that has no elements
    #[error("Removing from variables of type {0} is unsupported")]
    Remove(&'static str),

    /// A resource default set twice in one scope
    #[error("Default already defined for {type_name} {{ {attribute} }}; cannot redefine")]
    DefaultRedefined {
        /// Type name as referenced
        type_name: String,
        /// Attribute name
        attribute: String,
    },

    /// A class and a node bound under the same name
    #[error("Cannot have classes, nodes, or definitions with the same name")]
    NameCollision(String),
}

/// One activation's variables
#[derive(Debug, Clone)]
pub struct Scope {
    /// Enclosing scope; `None` only for the top scope
    pub parent: Option<ScopeId>,
    /// What created the scope
    pub kind: ScopeKind,
    /// Namespace used for relative name resolution
    pub namespace: String,
    /// Declaration whose code runs in this scope
    pub origin: Origin,
    /// Resource being evaluated, if any
    pub resource: Option<ResourceId>,
    variables: IndexMap<String, Value>,
    ephemeral: Vec<IndexMap<String, Value>>,
    defaults: IndexMap<String, IndexMap<String, Value>>,
}

impl Scope {
    fn new(
        parent: Option<ScopeId>,
        kind: ScopeKind,
        namespace: String,
        origin: Origin,
        resource: Option<ResourceId>,
    ) -> Self {
        Self {
            parent,
            kind,
            namespace,
            origin,
            resource,
            variables: IndexMap::new(),
            ephemeral: Vec::new(),
            defaults: IndexMap::new(),
        }
    }

    /// Variable bound in this scope only, ephemeral generations first
    #[must_use]
    pub fn local(&self, name: &str) -> Option<&Value> {
        self.ephemeral
            .iter()
            .rev()
            .find_map(|generation| generation.get(name))
            .or_else(|| self.variables.get(name))
    }

    /// Variables bound by assignment, in binding order
    #[must_use]
    pub fn variables(&self) -> &IndexMap<String, Value> {
        &self.variables
    }
}

/// All scopes of one compilation
#[derive(Debug, Clone)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
    class_scopes: IndexMap<String, (DeclarationKind, ScopeId)>,
}

impl ScopeArena {
    /// Create an arena holding only the top scope
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new(
                None,
                ScopeKind::Top,
                String::new(),
                Origin::main(),
                None,
            )],
            class_scopes: IndexMap::new(),
        }
    }

    /// The top scope
    #[must_use]
    pub fn top(&self) -> ScopeId {
        ScopeId::from_index(0)
    }

    /// Create a child scope
    pub fn create(
        &mut self,
        parent: ScopeId,
        kind: ScopeKind,
        namespace: impl Into<String>,
        origin: Origin,
        resource: Option<ResourceId>,
    ) -> ScopeId {
        let id = ScopeId::from_index(self.scopes.len());
        self.scopes.push(Scope::new(
            Some(parent),
            kind,
            namespace.into(),
            origin,
            resource,
        ));
        id
    }

    /// Scope by id
    ///
    /// # Panics
    ///
    /// Panics if `id` was not created by this arena
    #[must_use]
    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    /// Mutable scope by id
    ///
    /// # Panics
    ///
    /// Panics if `id` was not created by this arena
    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    /// `id` followed by each enclosing scope up to the top
    pub fn chain(&self, id: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        std::iter::successors(Some(id), |current| self.get(*current).parent)
    }

    /// Unqualified lookup through the scope chain
    #[must_use]
    pub fn lookup(&self, id: ScopeId, name: &str) -> Option<&Value> {
        self.chain(id).find_map(|scope| self.get(scope).local(name))
    }

    /// Nearest enclosing resource being evaluated
    #[must_use]
    pub fn resource(&self, id: ScopeId) -> Option<ResourceId> {
        self.chain(id).find_map(|scope| self.get(scope).resource)
    }

    /// Bind `name` in `id`
    ///
    /// # Errors
    ///
    /// Returns error for numeric and qualified names, and for names already
    /// bound in this scope
    pub fn set(&mut self, id: ScopeId, name: &str, value: Value) -> Result<(), ScopeError> {
        if is_numeric(name) {
            return Err(ScopeError::Numeric(name.to_string()));
        }
        if name::is_qualified(name) || name::is_rooted(name) {
            return Err(ScopeError::Qualified(name.to_string()));
        }
        let scope = self.get_mut(id);
        if scope.variables.contains_key(name) {
            return Err(ScopeError::Reassign(name.to_string()));
        }
        scope.variables.insert(name.to_string(), value);
        Ok(())
    }

    /// `$name += value`: bind the visible value extended by `value`
    ///
    /// Strings concatenate, arrays concatenate, hashes merge.
    ///
    /// # Errors
    ///
    /// Returns error if the variable is local or not visible, or the values
    /// cannot be appended
    pub fn append(&mut self, id: ScopeId, name: &str, value: Value) -> Result<Value, ScopeError> {
        let current = self.visible_outer(id, name, "append")?;
        let merged = append_values(current, value)?;
        self.set(id, name, merged.clone())?;
        Ok(merged)
    }

    /// `$name -= value`: bind the visible value without the given elements
    ///
    /// # Errors
    ///
    /// Returns error if the variable is local or not visible, or the value
    /// has no elements to remove
    pub fn remove(&mut self, id: ScopeId, name: &str, value: Value) -> Result<Value, ScopeError> {
        let current = self.visible_outer(id, name, "remove")?;
        let reduced = match current {
            Value::Array(items) => {
                let removed = value.into_array();
                Value::Array(
                    items
                        .into_iter()
                        .filter(|item| !removed.iter().any(|r| r.equals(item)))
                        .collect(),
                )
            }
            Value::Hash(mut map) => {
                let keys = match value {
                    Value::Hash(other) => other.keys().cloned().collect(),
                    other => other.into_array().iter().map(Value::to_key).collect::<Vec<_>>(),
                };
                for key in keys {
                    map.shift_remove(&key);
                }
                Value::Hash(map)
            }
            other => return Err(ScopeError::Remove(other.type_name())),
        };
        self.set(id, name, reduced.clone())?;
        Ok(reduced)
    }

    fn visible_outer(
        &self,
        id: ScopeId,
        name: &str,
        operation: &'static str,
    ) -> Result<Value, ScopeError> {
        if self.get(id).variables.contains_key(name) {
            return Err(ScopeError::Local {
                operation,
                name: name.to_string(),
            });
        }
        self.lookup(id, name)
            .cloned()
            .ok_or_else(|| ScopeError::Undefined {
                operation,
                name: name.to_string(),
            })
    }

    /// Push a generation of match variables onto `id`
    ///
    /// Returns the level to pop back to.
    pub fn push_ephemeral(&mut self, id: ScopeId, bindings: IndexMap<String, Value>) -> usize {
        let scope = self.get_mut(id);
        let level = scope.ephemeral.len();
        scope.ephemeral.push(bindings);
        level
    }

    /// Current number of ephemeral generations on `id`
    #[must_use]
    pub fn ephemeral_level(&self, id: ScopeId) -> usize {
        self.get(id).ephemeral.len()
    }

    /// Drop ephemeral generations above `level`
    pub fn pop_ephemeral(&mut self, id: ScopeId, level: usize) {
        self.get_mut(id).ephemeral.truncate(level);
    }

    /// Record a resource default in `id`
    ///
    /// # Errors
    ///
    /// Returns error if the attribute already has a default in this scope
    pub fn set_default(
        &mut self,
        id: ScopeId,
        type_name: &str,
        attribute: &str,
        value: Value,
    ) -> Result<(), ScopeError> {
        let defaults = self
            .get_mut(id)
            .defaults
            .entry(name::canonical(type_name))
            .or_default();
        if defaults.contains_key(attribute) {
            return Err(ScopeError::DefaultRedefined {
                type_name: name::capitalize(type_name),
                attribute: attribute.to_string(),
            });
        }
        defaults.insert(attribute.to_string(), value);
        Ok(())
    }

    /// Defaults for `type_name` visible from `id`; nearer scopes win
    #[must_use]
    pub fn defaults_for(&self, id: ScopeId, type_name: &str) -> IndexMap<String, Value> {
        let type_name = name::canonical(type_name);
        let mut merged = IndexMap::new();
        for scope in self.chain(id) {
            if let Some(defaults) = self.get(scope).defaults.get(&type_name) {
                for (attribute, value) in defaults {
                    merged
                        .entry(attribute.clone())
                        .or_insert_with(|| value.clone());
                }
            }
        }
        merged
    }

    /// Register the persistent scope of an evaluated class or node
    ///
    /// # Errors
    ///
    /// Returns error if a declaration of another kind already bound the name
    pub fn bind_class(
        &mut self,
        name: &str,
        kind: DeclarationKind,
        id: ScopeId,
    ) -> Result<(), ScopeError> {
        match self.class_scopes.get(name) {
            Some((existing, _)) if *existing != kind => {
                Err(ScopeError::NameCollision(name.to_string()))
            }
            Some(_) => Ok(()),
            None => {
                self.class_scopes.insert(name.to_string(), (kind, id));
                Ok(())
            }
        }
    }

    /// Scope of an evaluated class
    #[must_use]
    pub fn class_scope(&self, name: &str) -> Option<ScopeId> {
        match self.class_scopes.get(name) {
            Some((DeclarationKind::Hostclass, id)) => Some(*id),
            _ => None,
        }
    }

    /// Every variable visible from `id`, outer bindings first
    #[must_use]
    pub fn visible_variables(&self, id: ScopeId) -> IndexMap<String, Value> {
        let chain: Vec<ScopeId> = self.chain(id).collect();
        let mut visible = IndexMap::new();
        for scope in chain.into_iter().rev() {
            let scope = self.get(scope);
            for (name, value) in &scope.variables {
                visible.insert(name.clone(), value.clone());
            }
            for generation in &scope.ephemeral {
                for (name, value) in generation {
                    visible.insert(name.clone(), value.clone());
                }
            }
        }
        visible
    }

    /// Number of scopes
    #[must_use]
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Always false: the top scope exists from creation
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

impl Default for ScopeArena {
    fn default() -> Self {
        Self::new()
    }
}

fn is_numeric(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_digit())
}

fn append_values(current: Value, value: Value) -> Result<Value, ScopeError> {
    match (current, value) {
        (Value::String(mut s), Value::String(tail)) => {
            s.push_str(&tail);
            Ok(Value::String(s))
        }
        (Value::Array(mut items), value) => {
            items.extend(value.into_array());
            Ok(Value::Array(items))
        }
        (Value::Hash(map), Value::Hash(other)) => Ok(Value::Hash(merge_hashes(map, other))),
        (Value::Hash(_), _) => Err(ScopeError::HashAppend),
        (other, _) => Err(ScopeError::Append(other.type_name())),
    }
}

/// Recursive hash merge; values from `other` win except nested hashes,
/// which merge
pub(crate) fn merge_hashes(
    mut map: IndexMap<String, Value>,
    other: IndexMap<String, Value>,
) -> IndexMap<String, Value> {
    for (key, value) in other {
        let merged = match (map.shift_remove(&key), value) {
            (Some(Value::Hash(inner)), Value::Hash(update)) => {
                Value::Hash(merge_hashes(inner, update))
            }
            (_, value) => value,
        };
        map.insert(key, merged);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(arena: &mut ScopeArena, parent: ScopeId) -> ScopeId {
        arena.create(parent, ScopeKind::Local, "", Origin::main(), None)
    }

    #[test]
    fn test_lookup_walks_parents() {
        let mut arena = ScopeArena::new();
        let top = arena.top();
        arena.set(top, "a", Value::Integer(1)).unwrap();
        let inner = child(&mut arena, top);
        assert_eq!(arena.lookup(inner, "a"), Some(&Value::Integer(1)));
        assert_eq!(arena.lookup(inner, "missing"), None);
    }

    #[test]
    fn test_set_rules() {
        let mut arena = ScopeArena::new();
        let top = arena.top();
        arena.set(top, "a", Value::Integer(1)).unwrap();
        assert_eq!(
            arena.set(top, "a", Value::Integer(2)),
            Err(ScopeError::Reassign("a".to_string()))
        );
        assert!(matches!(arena.set(top, "1", Value::Undef), Err(ScopeError::Numeric(_))));
        assert!(matches!(
            arena.set(top, "x::y", Value::Undef),
            Err(ScopeError::Qualified(_))
        ));
        let inner = child(&mut arena, top);
        assert!(arena.set(inner, "a", Value::Integer(3)).is_ok());
        assert_eq!(
            arena.set(top, "a", Value::Integer(4)).unwrap_err().to_string(),
            "Cannot reassign variable a"
        );
    }

    #[test]
    fn test_append_rules() {
        let mut arena = ScopeArena::new();
        let top = arena.top();
        arena.set(top, "s", Value::from("ab")).unwrap();
        arena
            .set(top, "l", Value::from(vec![Value::Integer(1)]))
            .unwrap();
        let mut h = IndexMap::new();
        h.insert("a".to_string(), Value::Integer(1));
        arena.set(top, "h", Value::Hash(h)).unwrap();

        let inner = child(&mut arena, top);
        assert_eq!(arena.append(inner, "s", Value::from("c")).unwrap(), Value::from("abc"));
        assert_eq!(
            arena.append(inner, "l", Value::Integer(2)).unwrap(),
            Value::from(vec![Value::Integer(1), Value::Integer(2)])
        );
        assert_eq!(
            arena.append(inner, "h", Value::Integer(2)),
            Err(ScopeError::HashAppend)
        );
        assert!(matches!(
            arena.append(top, "s", Value::from("x")),
            Err(ScopeError::Local { .. })
        ));
        assert!(matches!(
            arena.append(inner, "nope", Value::from("x")),
            Err(ScopeError::Undefined { .. })
        ));
    }

    #[test]
    fn test_hash_append_merges_recursively() {
        let mut arena = ScopeArena::new();
        let top = arena.top();
        let mut nested = IndexMap::new();
        nested.insert("x".to_string(), Value::Integer(1));
        let mut h = IndexMap::new();
        h.insert("n".to_string(), Value::Hash(nested));
        arena.set(top, "h", Value::Hash(h)).unwrap();

        let mut update_nested = IndexMap::new();
        update_nested.insert("y".to_string(), Value::Integer(2));
        let mut update = IndexMap::new();
        update.insert("n".to_string(), Value::Hash(update_nested));

        let inner = child(&mut arena, top);
        let Value::Hash(merged) = arena.append(inner, "h", Value::Hash(update)).unwrap() else {
            panic!("expected hash");
        };
        let Value::Hash(n) = &merged["n"] else {
            panic!("expected nested hash");
        };
        assert_eq!(n.len(), 2);
    }

    #[test]
    fn test_remove() {
        let mut arena = ScopeArena::new();
        let top = arena.top();
        arena
            .set(top, "l", Value::from(vec![Value::Integer(1), Value::Integer(2)]))
            .unwrap();
        let inner = child(&mut arena, top);
        assert_eq!(
            arena.remove(inner, "l", Value::Integer(1)).unwrap(),
            Value::from(vec![Value::Integer(2)])
        );
    }

    #[test]
    fn test_ephemeral_generations_shadow() {
        let mut arena = ScopeArena::new();
        let top = arena.top();
        let mut first = IndexMap::new();
        first.insert("1".to_string(), Value::from("a"));
        let level = arena.push_ephemeral(top, first);
        let mut second = IndexMap::new();
        second.insert("1".to_string(), Value::from("b"));
        arena.push_ephemeral(top, second);
        assert_eq!(arena.lookup(top, "1"), Some(&Value::from("b")));
        arena.pop_ephemeral(top, level + 1);
        assert_eq!(arena.lookup(top, "1"), Some(&Value::from("a")));
        arena.pop_ephemeral(top, level);
        assert_eq!(arena.lookup(top, "1"), None);
    }

    #[test]
    fn test_defaults_nearest_wins() {
        let mut arena = ScopeArena::new();
        let top = arena.top();
        arena.set_default(top, "File", "mode", Value::from("0644")).unwrap();
        arena.set_default(top, "file", "owner", Value::from("root")).unwrap();
        let inner = child(&mut arena, top);
        arena.set_default(inner, "File", "mode", Value::from("0600")).unwrap();
        let defaults = arena.defaults_for(inner, "file");
        assert_eq!(defaults["mode"], Value::from("0600"));
        assert_eq!(defaults["owner"], Value::from("root"));
        assert!(matches!(
            arena.set_default(top, "File", "mode", Value::Undef),
            Err(ScopeError::DefaultRedefined { .. })
        ));
    }

    #[test]
    fn test_class_binding_collision() {
        let mut arena = ScopeArena::new();
        let top = arena.top();
        arena.bind_class("web", DeclarationKind::Node, top).unwrap();
        assert!(matches!(
            arena.bind_class("web", DeclarationKind::Hostclass, top),
            Err(ScopeError::NameCollision(_))
        ));
        assert_eq!(arena.class_scope("web"), None);
    }
}
