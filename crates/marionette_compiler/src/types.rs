//! Data types used as parameter constraints, and resource references.

use crate::value::Value;
use marionette_core::name;
use serde::{Serialize, Serializer};
use std::fmt;

/// A type usable as a parameter constraint
#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    /// Anything
    Any,
    /// Only `undef`
    Undef,
    /// `true` / `false`
    Boolean,
    /// Integers
    Integer,
    /// Floats
    Float,
    /// Integers and floats
    Numeric,
    /// Strings
    String,
    /// Regular expressions
    Regexp,
    /// Any non-collection value other than `undef`
    Scalar,
    /// Arrays whose elements match the element type
    Array(Box<DataType>),
    /// Hashes with matching keys and values
    Hash(Box<DataType>, Box<DataType>),
    /// `undef` or the inner type
    Optional(Box<DataType>),
    /// Any of the listed types
    Variant(Vec<DataType>),
    /// One of the listed strings
    Enum(Vec<String>),
    /// Strings matching one of the listed patterns
    Pattern(Vec<String>),
    /// A resource type by canonical name; empty for any resource
    Resource(String),
}

/// Errors parameterizing a type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    /// Wrong number or kind of type parameters
    #[error("{type_name}[] expects {expected}")]
    Arguments {
        /// Parameterized type
        type_name: String,
        /// What was expected
        expected: &'static str,
    },

    /// Type cannot be parameterized
    #[error("{0} does not accept type parameters")]
    NotParameterized(String),
}

impl DataType {
    /// Look up a built-in data type by its capitalized name
    #[must_use]
    pub fn named(name: &str) -> Option<Self> {
        let data_type = match name {
            "Any" => Self::Any,
            "Undef" => Self::Undef,
            "Boolean" => Self::Boolean,
            "Integer" => Self::Integer,
            "Float" => Self::Float,
            "Numeric" => Self::Numeric,
            "String" => Self::String,
            "Regexp" => Self::Regexp,
            "Scalar" => Self::Scalar,
            "Array" => Self::Array(Box::new(Self::Any)),
            "Hash" => Self::Hash(Box::new(Self::Any), Box::new(Self::Any)),
            "Optional" => Self::Optional(Box::new(Self::Any)),
            "Variant" => Self::Variant(Vec::new()),
            "Enum" => Self::Enum(Vec::new()),
            "Pattern" => Self::Pattern(Vec::new()),
            "Resource" => Self::Resource(String::new()),
            _ => return None,
        };
        Some(data_type)
    }

    /// Apply `Type[args]`
    ///
    /// Size and range arguments of scalar types are accepted and not enforced.
    ///
    /// # Errors
    ///
    /// Returns error if the arguments do not fit the type
    pub fn parameterize(&self, args: &[Value]) -> Result<Self, TypeError> {
        let arguments = |expected| TypeError::Arguments {
            type_name: self.base_name().to_string(),
            expected,
        };
        let types = || -> Result<Vec<DataType>, TypeError> {
            args.iter()
                .map(|arg| match arg {
                    Value::Type(t) => Ok(t.clone()),
                    _ => Err(arguments("type arguments")),
                })
                .collect()
        };
        match self {
            Self::Array(_) => match types()?.as_slice() {
                [element] => Ok(Self::Array(Box::new(element.clone()))),
                _ => Err(arguments("one element type")),
            },
            Self::Hash(_, _) => match types()?.as_slice() {
                [key, value] => Ok(Self::Hash(Box::new(key.clone()), Box::new(value.clone()))),
                _ => Err(arguments("a key type and a value type")),
            },
            Self::Optional(_) => match args {
                [Value::Type(inner)] => Ok(Self::Optional(Box::new(inner.clone()))),
                [Value::String(s)] => Ok(Self::Optional(Box::new(Self::Enum(vec![s.clone()])))),
                _ => Err(arguments("one type")),
            },
            Self::Variant(_) => Ok(Self::Variant(types()?)),
            Self::Enum(_) => args
                .iter()
                .map(|arg| arg.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(Self::Enum)
                .ok_or_else(|| arguments("string values")),
            Self::Pattern(_) => args
                .iter()
                .map(|arg| match arg {
                    Value::Regex(r) | Value::String(r) => Some(r.clone()),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(Self::Pattern)
                .ok_or_else(|| arguments("regular expressions")),
            Self::Integer | Self::Float | Self::Numeric | Self::String => {
                if args.iter().all(|a| a.to_number().is_some() || matches!(a, Value::Default)) {
                    Ok(self.clone())
                } else {
                    Err(arguments("numeric bounds"))
                }
            }
            other => Err(TypeError::NotParameterized(other.to_string())),
        }
    }

    /// Whether `value` is an instance of this type
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Undef => value.is_undef(),
            Self::Boolean => matches!(value, Value::Boolean(_)),
            Self::Integer => matches!(value, Value::Integer(_)),
            Self::Float => matches!(value, Value::Float(_)),
            Self::Numeric => matches!(value, Value::Integer(_) | Value::Float(_)),
            Self::String => matches!(value, Value::String(_)),
            Self::Regexp => matches!(value, Value::Regex(_)),
            Self::Scalar => matches!(
                value,
                Value::String(_)
                    | Value::Integer(_)
                    | Value::Float(_)
                    | Value::Boolean(_)
                    | Value::Regex(_)
            ),
            Self::Array(element) => match value {
                Value::Array(items) => items.iter().all(|item| element.matches(item)),
                _ => false,
            },
            Self::Hash(key, element) => match value {
                Value::Hash(map) => map.iter().all(|(k, v)| {
                    key.matches(&Value::String(k.clone())) && element.matches(v)
                }),
                _ => false,
            },
            Self::Optional(inner) => value.is_undef() || inner.matches(value),
            Self::Variant(types) => types.iter().any(|t| t.matches(value)),
            Self::Enum(options) => value
                .as_str()
                .is_some_and(|s| options.iter().any(|o| o == s)),
            Self::Pattern(patterns) => value.as_str().is_some_and(|s| {
                patterns
                    .iter()
                    .any(|p| regex::Regex::new(p).is_ok_and(|re| re.is_match(s)))
            }),
            Self::Resource(type_name) => match value {
                Value::Reference(r) => type_name.is_empty() || &r.type_name == type_name,
                _ => false,
            },
        }
    }

    fn base_name(&self) -> &'static str {
        match self {
            Self::Any => "Any",
            Self::Undef => "Undef",
            Self::Boolean => "Boolean",
            Self::Integer => "Integer",
            Self::Float => "Float",
            Self::Numeric => "Numeric",
            Self::String => "String",
            Self::Regexp => "Regexp",
            Self::Scalar => "Scalar",
            Self::Array(_) => "Array",
            Self::Hash(_, _) => "Hash",
            Self::Optional(_) => "Optional",
            Self::Variant(_) => "Variant",
            Self::Enum(_) => "Enum",
            Self::Pattern(_) => "Pattern",
            Self::Resource(_) => "Resource",
        }
    }
}

fn join<T: fmt::Display>(items: &[T], f: impl Fn(&T) -> String) -> String {
    items.iter().map(f).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Array(element) if **element != Self::Any => write!(f, "Array[{}]", element),
            Self::Hash(key, value) if **key != Self::Any || **value != Self::Any => {
                write!(f, "Hash[{}, {}]", key, value)
            }
            Self::Optional(inner) if **inner != Self::Any => write!(f, "Optional[{}]", inner),
            Self::Variant(types) if !types.is_empty() => {
                write!(f, "Variant[{}]", join(types, ToString::to_string))
            }
            Self::Enum(options) if !options.is_empty() => {
                write!(f, "Enum[{}]", join(options, |o| format!("'{}'", o)))
            }
            Self::Pattern(patterns) if !patterns.is_empty() => {
                write!(f, "Pattern[{}]", join(patterns, |p| format!("/{}/", p)))
            }
            Self::Resource(type_name) if !type_name.is_empty() => {
                write!(f, "{}", name::capitalize(type_name))
            }
            other => write!(f, "{}", other.base_name()),
        }
    }
}

/// Identity of a resource: canonical type name and title
///
/// Class titles are canonical class names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    /// Canonical type name (`file`, `class`, `apache::vhost`)
    pub type_name: String,
    /// Title
    pub title: String,
}

impl ResourceRef {
    /// Create a reference, canonicalizing the type and class titles
    #[must_use]
    pub fn new(type_name: &str, title: impl Into<String>) -> Self {
        let type_name = name::canonical(type_name);
        let title = title.into();
        let title = if type_name == "class" {
            name::canonical(&title)
        } else {
            title
        };
        Self { type_name, title }
    }

    /// Reference to a class
    #[must_use]
    pub fn class(name: &str) -> Self {
        Self::new("class", name)
    }

    /// Whether this refers to a class
    #[must_use]
    pub fn is_class(&self) -> bool {
        self.type_name == "class"
    }

    /// Parse the `Type[title]` form
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let open = text.find('[')?;
        let inner = text.strip_suffix(']')?.get(open + 1..)?;
        let type_name = &text[..open];
        if type_name.is_empty() || !type_name.starts_with(|c: char| c.is_ascii_uppercase()) {
            return None;
        }
        let title = inner.trim_matches(|c| c == '\'' || c == '"');
        Some(Self::new(type_name, title))
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_class() {
            let title = if self.title.is_empty() { "main" } else { &self.title };
            write!(f, "Class[{}]", name::capitalize(title))
        } else {
            write!(f, "{}[{}]", name::capitalize(&self.type_name), self.title)
        }
    }
}

impl Serialize for ResourceRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<Value> {
        items.iter().map(|s| Value::from(*s)).collect()
    }

    #[test]
    fn test_named_types() {
        assert_eq!(DataType::named("String"), Some(DataType::String));
        assert_eq!(DataType::named("File"), None);
    }

    #[test]
    fn test_optional_and_variant() {
        let optional = DataType::named("Optional")
            .unwrap()
            .parameterize(&[Value::Type(DataType::String)])
            .unwrap();
        assert!(optional.matches(&Value::Undef));
        assert!(optional.matches(&Value::from("x")));
        assert!(!optional.matches(&Value::Integer(1)));
        assert_eq!(optional.to_string(), "Optional[String]");

        let variant = DataType::Variant(vec![DataType::Integer, DataType::Boolean]);
        assert!(variant.matches(&Value::Boolean(true)));
        assert!(!variant.matches(&Value::from("x")));
    }

    #[test]
    fn test_enum_and_pattern() {
        let e = DataType::Enum(Vec::new())
            .parameterize(&strings(&["present", "absent"]))
            .unwrap();
        assert!(e.matches(&Value::from("absent")));
        assert!(!e.matches(&Value::from("latest")));
        assert_eq!(e.to_string(), "Enum['present', 'absent']");

        let p = DataType::Pattern(Vec::new())
            .parameterize(&[Value::Regex("^/".to_string())])
            .unwrap();
        assert!(p.matches(&Value::from("/etc")));
        assert!(!p.matches(&Value::from("etc")));
    }

    #[test]
    fn test_collection_types() {
        let array = DataType::named("Array")
            .unwrap()
            .parameterize(&[Value::Type(DataType::Integer)])
            .unwrap();
        assert!(array.matches(&Value::from(vec![Value::Integer(1)])));
        assert!(!array.matches(&Value::from(vec![Value::from("1")])));

        let err = DataType::named("Hash")
            .unwrap()
            .parameterize(&[Value::Type(DataType::String)])
            .unwrap_err();
        assert!(err.to_string().starts_with("Hash[]"));
    }

    #[test]
    fn test_reference_display() {
        assert_eq!(ResourceRef::new("File", "/tmp/x").to_string(), "File[/tmp/x]");
        assert_eq!(ResourceRef::class("Foo::Bar").to_string(), "Class[Foo::Bar]");
        assert_eq!(ResourceRef::class("").to_string(), "Class[Main]");
        assert_eq!(
            ResourceRef::new("apache::vhost", "a").to_string(),
            "Apache::Vhost[a]"
        );
    }

    #[test]
    fn test_reference_parse() {
        assert_eq!(
            ResourceRef::parse("File['/tmp/x']"),
            Some(ResourceRef::new("file", "/tmp/x"))
        );
        assert_eq!(ResourceRef::parse("Class[Foo]"), Some(ResourceRef::class("foo")));
        assert_eq!(ResourceRef::parse("file"), None);
        assert_eq!(ResourceRef::parse("file[x]"), None);
    }
}
