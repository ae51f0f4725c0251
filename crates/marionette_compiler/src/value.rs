//! Runtime values produced by evaluating expressions.

use crate::types::{DataType, ResourceRef};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use std::fmt;

/// A language value
///
/// Hash keys are stored in their string form.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// `undef`, also the result of looking up an unknown variable
    #[default]
    Undef,
    /// `default` in selectors and case expressions
    Default,
    /// Boolean
    Boolean(bool),
    /// 64-bit integer
    Integer(i64),
    /// Float
    Float(f64),
    /// String
    String(String),
    /// Regular expression source without slashes
    Regex(String),
    /// A data or resource type
    Type(DataType),
    /// Reference to a resource, `File['/tmp/x']`
    Reference(ResourceRef),
    /// Ordered list
    Array(Vec<Value>),
    /// Ordered map
    Hash(IndexMap<String, Value>),
}

impl Value {
    /// Convert a JSON document (facts, node parameters)
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Undef,
            serde_json::Value::Bool(b) => Self::Boolean(*b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Undef),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => {
                Self::Array(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Hash(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Name of the value's type for diagnostics
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undef => "Undef",
            Self::Default => "Default",
            Self::Boolean(_) => "Boolean",
            Self::Integer(_) => "Integer",
            Self::Float(_) => "Float",
            Self::String(_) => "String",
            Self::Regex(_) => "Regexp",
            Self::Type(_) => "Type",
            Self::Reference(_) => "Resource",
            Self::Array(_) => "Array",
            Self::Hash(_) => "Hash",
        }
    }

    /// Truthiness: only `undef` and `false` are false
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Undef | Self::Boolean(false))
    }

    /// Whether the value is `undef`
    #[must_use]
    pub fn is_undef(&self) -> bool {
        matches!(self, Self::Undef)
    }

    /// String contents, if this is a string
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value; numeric strings are converted
    #[must_use]
    pub fn to_number(&self) -> Option<Value> {
        match self {
            Self::Integer(_) | Self::Float(_) => Some(self.clone()),
            Self::String(s) => parse_number(s.trim()),
            _ => None,
        }
    }

    /// The value as a list: arrays as-is, `undef` as empty, scalars wrapped
    #[must_use]
    pub fn into_array(self) -> Vec<Value> {
        match self {
            Self::Array(items) => items,
            Self::Undef => Vec::new(),
            other => vec![other],
        }
    }

    /// Form used as a hash key
    #[must_use]
    pub fn to_key(&self) -> String {
        self.to_string()
    }

    /// Language equality: strings compare case-insensitively, integers
    /// and floats compare numerically
    #[must_use]
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a.to_lowercase() == b.to_lowercase(),
            (Self::Integer(a), Self::Float(b)) | (Self::Float(b), Self::Integer(a)) => {
                (*a as f64) == *b
            }
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
            }
            (Self::Hash(a), Self::Hash(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| v.equals(w)))
            }
            _ => self == other,
        }
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "'{}'", s),
            Self::Undef => write!(f, "undef"),
            other => write!(f, "{}", other),
        }
    }
}

/// Parse a decimal, hex or float literal
fn parse_number(text: &str) -> Option<Value> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok().map(Value::Integer);
    }
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Value::Float)
}

/// Interpolation form
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undef => Ok(()),
            Self::Default => write!(f, "default"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{:.1}", x),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => write!(f, "{}", s),
            Self::Regex(r) => write!(f, "/{}/", r),
            Self::Type(t) => write!(f, "{}", t),
            Self::Reference(r) => write!(f, "{}", r),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_nested(f)?;
                }
                write!(f, "]")
            }
            Self::Hash(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}' => ", k)?;
                    v.fmt_nested(f)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Undef => serializer.serialize_none(),
            Self::Default => serializer.serialize_str("default"),
            Self::Boolean(b) => serializer.serialize_bool(*b),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::String(s) => serializer.serialize_str(s),
            Self::Regex(_) | Self::Type(_) | Self::Reference(_) => serializer.collect_str(self),
            Self::Array(items) => serializer.collect_seq(items),
            Self::Hash(map) => serializer.collect_map(map),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<ResourceRef> for Value {
    fn from(reference: ResourceRef) -> Self {
        Self::Reference(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undef.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::from("").is_truthy());
        assert!(Value::Integer(0).is_truthy());
    }

    #[test]
    fn test_equality_rules() {
        assert!(Value::from("Apache").equals(&Value::from("apache")));
        assert!(Value::Integer(2).equals(&Value::Float(2.0)));
        assert!(!Value::Integer(2).equals(&Value::from("2")));
        assert!(Value::from(vec![Value::from("A")]).equals(&Value::from(vec![Value::from("a")])));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Undef.to_string(), "");
        assert_eq!(Value::Float(2000.0).to_string(), "2000.0");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
        let list = Value::from(vec![Value::from("a"), Value::Integer(1)]);
        assert_eq!(list.to_string(), "['a', 1]");
        let mut map = IndexMap::new();
        map.insert("k".to_string(), Value::from("v"));
        assert_eq!(Value::Hash(map).to_string(), "{'k' => 'v'}");
    }

    #[test]
    fn test_from_json() {
        let value = Value::from_json(&json!({"os": {"family": "Debian"}, "cpus": 4, "load": 0.5}));
        let Value::Hash(map) = value else {
            panic!("expected hash");
        };
        assert_eq!(map["cpus"], Value::Integer(4));
        assert_eq!(map["load"], Value::Float(0.5));
        assert!(matches!(map["os"], Value::Hash(_)));
    }

    #[test]
    fn test_to_number() {
        assert_eq!(Value::from("42").to_number(), Some(Value::Integer(42)));
        assert_eq!(Value::from("0x10").to_number(), Some(Value::Integer(16)));
        assert_eq!(Value::from("1.5").to_number(), Some(Value::Float(1.5)));
        assert_eq!(Value::from("abc").to_number(), None);
    }

    #[test]
    fn test_serialize() {
        let list = Value::from(vec![Value::Undef, Value::from("x"), Value::Integer(3)]);
        assert_eq!(serde_json::to_string(&list).unwrap(), "[null,\"x\",3]");
        let reference = Value::Reference(ResourceRef::new("file", "/tmp/x"));
        assert_eq!(serde_json::to_string(&reference).unwrap(), "\"File[/tmp/x]\"");
    }

    #[test]
    fn test_into_array() {
        assert!(Value::Undef.into_array().is_empty());
        assert_eq!(Value::Integer(1).into_array(), vec![Value::Integer(1)]);
    }
}
