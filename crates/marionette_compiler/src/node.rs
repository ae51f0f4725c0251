//! The host a catalog is compiled for.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Host identity, facts and classification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    /// Certificate name of the host
    pub name: String,
    /// Facts reported by the host
    pub facts: IndexMap<String, serde_json::Value>,
    /// Top-scope variables from an external classifier
    pub parameters: IndexMap<String, serde_json::Value>,
    /// Classes from an external classifier
    pub classes: Vec<String>,
    /// Environment override
    pub environment: Option<String>,
}

impl Node {
    /// Node with no facts
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a fact
    #[must_use]
    pub fn with_fact(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.facts.insert(name.into(), value);
        self
    }

    /// Add a parameter
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    /// Add a class
    #[must_use]
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    /// Names tried when matching node declarations: the full name, then
    /// each shorter dotted prefix
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let full = self.name.to_lowercase();
        let mut names = vec![full.clone()];
        let mut current = full.as_str();
        while let Some(dot) = current.rfind('.') {
            current = &current[..dot];
            names.push(current.to_string());
        }
        names
    }
}
