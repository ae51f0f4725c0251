//! Namespace-qualified names.
//!
//! Class, define and type names are case-insensitive and separated by `::`.
//! A leading `::` roots a name at the top namespace.

/// Namespace separator
pub const SEPARATOR: &str = "::";

/// Canonical form of a declaration or type name: lower-case, unrooted
#[must_use]
pub fn canonical(name: &str) -> String {
    name.strip_prefix(SEPARATOR).unwrap_or(name).to_lowercase()
}

/// Whether the name is explicitly rooted (`::foo`)
#[must_use]
pub fn is_rooted(name: &str) -> bool {
    name.starts_with(SEPARATOR)
}

/// Whether the name contains a namespace separator after the root
#[must_use]
pub fn is_qualified(name: &str) -> bool {
    name.strip_prefix(SEPARATOR).unwrap_or(name).contains(SEPARATOR)
}

/// Namespace part of a qualified name (`a::b::c` -> `a::b`, `c` -> ``)
#[must_use]
pub fn namespace(name: &str) -> &str {
    let name = name.strip_prefix(SEPARATOR).unwrap_or(name);
    name.rfind(SEPARATOR).map_or("", |i| &name[..i])
}

/// Last segment of a qualified name
#[must_use]
pub fn basename(name: &str) -> &str {
    name.rfind(SEPARATOR)
        .map_or(name, |i| &name[i + SEPARATOR.len()..])
}

/// Join a namespace and a relative name
#[must_use]
pub fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        canonical(name)
    } else {
        format!("{}{}{}", canonical(namespace), SEPARATOR, canonical(name))
    }
}

/// Search order for a relative name referenced from `namespace`:
/// the namespace itself, each enclosing namespace, then the root.
#[must_use]
pub fn search_chain(namespace: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = canonical(namespace);
    while !current.is_empty() {
        chain.push(current.clone());
        current = self::namespace(&current).to_string();
    }
    chain.push(String::new());
    chain
}

/// Capitalize every segment, as type names appear in references
/// (`foo::bar` -> `Foo::Bar`)
#[must_use]
pub fn capitalize(name: &str) -> String {
    canonical(name)
        .split(SEPARATOR)
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical() {
        assert_eq!(canonical("::Foo::Bar"), "foo::bar");
        assert_eq!(canonical("apache"), "apache");
    }

    #[test]
    fn test_namespace_and_basename() {
        assert_eq!(namespace("a::b::c"), "a::b");
        assert_eq!(namespace("c"), "");
        assert_eq!(basename("a::b::c"), "c");
        assert_eq!(basename("c"), "c");
    }

    #[test]
    fn test_search_chain() {
        assert_eq!(search_chain("a::b"), vec!["a::b", "a", ""]);
        assert_eq!(search_chain(""), vec![""]);
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("foo::bar"), "Foo::Bar");
        assert_eq!(capitalize("File"), "File");
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("", "Foo"), "foo");
        assert_eq!(qualify("a", "b"), "a::b");
        assert!(is_qualified("a::b"));
        assert!(!is_qualified("::b"));
        assert!(is_rooted("::b"));
    }
}
