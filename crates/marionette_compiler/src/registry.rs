//! Declaration registry.
//!
//! Classes, defined types, nodes and functions parsed from every loaded file
//! are stored here under canonical names. Relative names are resolved
//! through the caller's namespace chain; a repeated class definition merges
//! into the first one.

use crate::resource::Origin;
use indexmap::IndexMap;
use marionette_core::{CompileError, CompileResult, Diagnostic, name};
use marionette_syntax::{Ast, ExprId, HostMatcher, NodeKind, Parameter};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The closed set of declaration kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclarationKind {
    /// `class`
    Hostclass,
    /// `define`
    Define,
    /// `node`
    Node,
}

impl fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hostclass => write!(f, "hostclass"),
            Self::Define => write!(f, "definition"),
            Self::Node => write!(f, "node"),
        }
    }
}

/// A block of code and the tree it belongs to
#[derive(Debug, Clone)]
pub struct CodeFragment {
    /// Owning tree
    pub ast: Arc<Ast>,
    /// Block node
    pub body: ExprId,
}

/// How a node declaration matches host names
#[derive(Debug, Clone)]
pub enum NodeMatcher {
    /// Exact, case-insensitive host name
    Name(String),
    /// Regular expression
    Regex(Regex),
    /// `node default`
    Default,
}

impl NodeMatcher {
    /// Whether `host` matches
    #[must_use]
    pub fn matches(&self, host: &str) -> bool {
        match self {
            Self::Name(name) => name.eq_ignore_ascii_case(host),
            Self::Regex(re) => re.is_match(host),
            Self::Default => host == "default",
        }
    }
}

/// A parsed class, define or node
#[derive(Debug, Clone)]
pub struct Declaration {
    /// Kind
    pub kind: DeclarationKind,
    /// Canonical name; regex nodes use `/pattern/`
    pub name: String,
    /// Canonical parent name
    pub parent: Option<String>,
    /// Declared parameters, evaluated in `ast`
    pub params: Vec<Parameter>,
    /// Tree holding the parameter expressions
    pub ast: Arc<Ast>,
    /// Body blocks, in definition order
    pub code: Vec<CodeFragment>,
    /// Documentation collected from comments
    pub doc: Option<String>,
    /// Declaring module, if loaded from one
    pub module: Option<String>,
    /// Host matcher for nodes
    pub matcher: Option<NodeMatcher>,
    /// Where it was defined
    pub location: Option<Diagnostic>,
}

impl Declaration {
    /// Origin for resources and values produced by this declaration
    #[must_use]
    pub fn origin(&self) -> Origin {
        Origin::new(self.kind, self.name.clone())
    }
}

/// A function written in the language
#[derive(Debug, Clone)]
pub struct FunctionDeclaration {
    /// Canonical name
    pub name: String,
    /// Parameters
    pub params: Vec<Parameter>,
    /// Tree holding the parameters and body
    pub ast: Arc<Ast>,
    /// Body block
    pub body: ExprId,
    /// Documentation
    pub doc: Option<String>,
}

/// Errors adding declarations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Two class definitions name different parents
    #[error(
        "Cannot merge classes with different parent classes ({name} => {parent} vs. {other_name} => {other_parent})"
    )]
    ParentMismatch {
        /// First class
        name: String,
        /// First parent
        parent: String,
        /// Second class
        other_name: String,
        /// Second parent
        other_parent: String,
    },

    /// A define, node or function defined twice
    #[error("{what} {name} is already defined{location}; cannot redefine")]
    Redefined {
        /// `Definition`, `Node` or `Function`
        what: &'static str,
        /// Name
        name: String,
        /// ` at file:line` of the first definition
        location: String,
    },

    /// Unparseable node regex
    #[error("Invalid node matcher /{pattern}/: {reason}")]
    BadMatcher {
        /// Pattern source
        pattern: String,
        /// Regex error
        reason: String,
    },
}

/// Namespace-aware store of declarations
#[derive(Debug, Clone, Default)]
pub struct Registry {
    hostclasses: IndexMap<String, Declaration>,
    definitions: IndexMap<String, Declaration>,
    nodes: IndexMap<String, Declaration>,
    functions: IndexMap<String, FunctionDeclaration>,
}

impl Registry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: DeclarationKind) -> &IndexMap<String, Declaration> {
        match kind {
            DeclarationKind::Hostclass => &self.hostclasses,
            DeclarationKind::Define => &self.definitions,
            DeclarationKind::Node => &self.nodes,
        }
    }

    /// Add a declaration; classes merge into an existing class
    ///
    /// # Errors
    ///
    /// Returns error on conflicting parents, or a repeated define or node
    pub fn add(&mut self, declaration: Declaration) -> Result<(), RegistryError> {
        match declaration.kind {
            DeclarationKind::Hostclass => {
                match self.hostclasses.get_mut(&declaration.name) {
                    Some(existing) => merge_class(existing, declaration)?,
                    None => {
                        self.hostclasses
                            .insert(declaration.name.clone(), declaration);
                    }
                }
                Ok(())
            }
            DeclarationKind::Define | DeclarationKind::Node => {
                let what = if declaration.kind == DeclarationKind::Define {
                    "Definition"
                } else {
                    "Node"
                };
                let table = if declaration.kind == DeclarationKind::Define {
                    &mut self.definitions
                } else {
                    &mut self.nodes
                };
                if let Some(existing) = table.get(&declaration.name) {
                    return Err(RegistryError::Redefined {
                        what,
                        name: declaration.name,
                        location: located(existing.location.as_ref()),
                    });
                }
                table.insert(declaration.name.clone(), declaration);
                Ok(())
            }
        }
    }

    /// Add a function
    ///
    /// # Errors
    ///
    /// Returns error if the function is already defined
    pub fn add_function(&mut self, function: FunctionDeclaration) -> Result<(), RegistryError> {
        if self.functions.contains_key(&function.name) {
            return Err(RegistryError::Redefined {
                what: "Function",
                name: function.name,
                location: String::new(),
            });
        }
        self.functions.insert(function.name.clone(), function);
        Ok(())
    }

    /// Declaration by exact canonical name
    #[must_use]
    pub fn get(&self, kind: DeclarationKind, name: &str) -> Option<&Declaration> {
        self.table(kind).get(name)
    }

    /// Resolve `name` from `namespace`: rooted names exactly, otherwise the
    /// namespace itself, each enclosing namespace, then the root
    #[must_use]
    pub fn find(&self, namespace: &str, name: &str, kind: DeclarationKind) -> Option<&Declaration> {
        let table = self.table(kind);
        if name::is_rooted(name) {
            return table.get(&name::canonical(name));
        }
        let relative = name::canonical(name);
        name::search_chain(namespace)
            .iter()
            .map(|ns| {
                if ns.is_empty() {
                    relative.clone()
                } else {
                    format!("{}{}{}", ns, name::SEPARATOR, relative)
                }
            })
            .find_map(|candidate| table.get(&candidate))
    }

    /// Function written in the language, resolved like classes
    #[must_use]
    pub fn find_function(&self, namespace: &str, name: &str) -> Option<&FunctionDeclaration> {
        let relative = name::canonical(name);
        name::search_chain(namespace)
            .iter()
            .map(|ns| {
                if ns.is_empty() {
                    relative.clone()
                } else {
                    format!("{}{}{}", ns, name::SEPARATOR, relative)
                }
            })
            .find_map(|candidate| self.functions.get(&candidate))
    }

    /// Node for a host: literal names first (in the given order), then
    /// regex nodes in declaration order, then `default`
    #[must_use]
    pub fn find_node(&self, names: &[String]) -> Option<&Declaration> {
        let literal = names.iter().find_map(|host| {
            self.nodes.values().find(|node| {
                matches!(&node.matcher, Some(NodeMatcher::Name(n)) if n.eq_ignore_ascii_case(host))
            })
        });
        literal
            .or_else(|| {
                self.nodes.values().find(|node| {
                    matches!(&node.matcher, Some(NodeMatcher::Regex(re)) if names.iter().any(|h| re.is_match(h)))
                })
            })
            .or_else(|| self.nodes.get("default"))
    }

    /// Whether any node declarations exist
    #[must_use]
    pub fn has_nodes(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// Whether `child` is `ancestor` or inherits from it
    #[must_use]
    pub fn is_descendant(&self, child: &Origin, ancestor: &Origin) -> bool {
        if child == ancestor {
            return true;
        }
        if child.kind != ancestor.kind {
            return false;
        }
        let table = self.table(child.kind);
        let mut current = child.name.clone();
        for _ in 0..table.len() {
            let Some(parent) = table.get(&current).and_then(|d| d.parent.clone()) else {
                return false;
            };
            if parent == ancestor.name {
                return true;
            }
            current = parent;
        }
        false
    }

    /// Whether a class's parent chain loops back on itself
    #[must_use]
    pub fn has_inheritance_cycle(&self, kind: DeclarationKind, name: &str) -> bool {
        let table = self.table(kind);
        let mut seen = vec![name.to_string()];
        let mut current = name.to_string();
        while let Some(parent) = table.get(&current).and_then(|d| d.parent.clone()) {
            if seen.contains(&parent) {
                return true;
            }
            seen.push(parent.clone());
            current = parent;
        }
        false
    }

    /// Number of classes, defines, nodes and functions
    #[must_use]
    pub fn len(&self) -> usize {
        self.hostclasses.len() + self.definitions.len() + self.nodes.len() + self.functions.len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register every definition in `ast`, including classes and defines
    /// nested in class bodies; returns the files named by `import`
    ///
    /// When `main` is set the file's top-level code is added to the main class.
    ///
    /// # Errors
    ///
    /// Returns error if a definition conflicts with a registered one
    pub fn register(
        &mut self,
        ast: &Arc<Ast>,
        module: Option<&str>,
        main: bool,
    ) -> CompileResult<Vec<String>> {
        let mut imports = Vec::new();
        let statements = ast.statements().to_vec();
        self.register_statements(ast, &statements, "", module, &mut imports)?;
        if main {
            let declaration = Declaration {
                kind: DeclarationKind::Hostclass,
                name: String::new(),
                parent: None,
                params: Vec::new(),
                ast: Arc::clone(ast),
                code: vec![CodeFragment {
                    ast: Arc::clone(ast),
                    body: ast.root(),
                }],
                doc: None,
                module: module.map(str::to_string),
                matcher: None,
                location: None,
            };
            self.add(declaration)
                .map_err(|e| CompileError::Resolution(ast.diagnostic(ast.root(), e.to_string())))?;
        }
        tracing::debug!(
            file = ?ast.source().name(),
            declarations = self.len(),
            "registered declarations"
        );
        Ok(imports)
    }

    fn register_statements(
        &mut self,
        ast: &Arc<Ast>,
        statements: &[ExprId],
        namespace: &str,
        module: Option<&str>,
        imports: &mut Vec<String>,
    ) -> CompileResult<()> {
        for &id in statements {
            let fail = |e: RegistryError| CompileError::Resolution(ast.diagnostic(id, e.to_string()));
            match ast.kind(id) {
                NodeKind::Class(definition) => {
                    let qualified = name::qualify(namespace, &definition.name);
                    let declaration = Declaration {
                        kind: DeclarationKind::Hostclass,
                        name: qualified.clone(),
                        parent: definition.parent.as_deref().map(name::canonical),
                        params: definition.params.clone(),
                        ast: Arc::clone(ast),
                        code: vec![CodeFragment {
                            ast: Arc::clone(ast),
                            body: definition.body,
                        }],
                        doc: definition.doc.clone(),
                        module: module.map(str::to_string),
                        matcher: None,
                        location: Some(ast.diagnostic(id, "")),
                    };
                    self.add(declaration).map_err(fail)?;
                    if let NodeKind::Block(body) = ast.kind(definition.body) {
                        let body = body.clone();
                        self.register_statements(ast, &body, &qualified, module, imports)?;
                    }
                }
                NodeKind::Define(definition) => {
                    let declaration = Declaration {
                        kind: DeclarationKind::Define,
                        name: name::qualify(namespace, &definition.name),
                        parent: None,
                        params: definition.params.clone(),
                        ast: Arc::clone(ast),
                        code: vec![CodeFragment {
                            ast: Arc::clone(ast),
                            body: definition.body,
                        }],
                        doc: definition.doc.clone(),
                        module: module.map(str::to_string),
                        matcher: None,
                        location: Some(ast.diagnostic(id, "")),
                    };
                    self.add(declaration).map_err(fail)?;
                }
                NodeKind::Function(definition) => {
                    self.add_function(FunctionDeclaration {
                        name: name::canonical(&definition.name),
                        params: definition.params.clone(),
                        ast: Arc::clone(ast),
                        body: definition.body,
                        doc: definition.doc.clone(),
                    })
                    .map_err(fail)?;
                }
                NodeKind::NodeDefinition {
                    matchers,
                    parent,
                    body,
                    doc,
                } => {
                    let parent = parent.as_ref().map(node_key);
                    for matcher in matchers {
                        let declaration = Declaration {
                            kind: DeclarationKind::Node,
                            name: node_key(matcher),
                            parent: parent.clone(),
                            params: Vec::new(),
                            ast: Arc::clone(ast),
                            code: vec![CodeFragment {
                                ast: Arc::clone(ast),
                                body: *body,
                            }],
                            doc: doc.clone(),
                            module: module.map(str::to_string),
                            matcher: Some(node_matcher(matcher).map_err(fail)?),
                            location: Some(ast.diagnostic(id, "")),
                        };
                        self.add(declaration).map_err(fail)?;
                    }
                }
                NodeKind::Import(files) => imports.extend(files.iter().cloned()),
                _ => {}
            }
        }
        Ok(())
    }
}

fn merge_class(existing: &mut Declaration, other: Declaration) -> Result<(), RegistryError> {
    if let (Some(parent), Some(other_parent)) = (&existing.parent, &other.parent) {
        if parent != other_parent {
            return Err(RegistryError::ParentMismatch {
                name: existing.name.clone(),
                parent: parent.clone(),
                other_name: other.name,
                other_parent: other_parent.clone(),
            });
        }
    }
    if existing.parent.is_none() {
        existing.parent = other.parent;
    }
    if let Some(doc) = other.doc {
        existing.doc.get_or_insert_with(String::new).push_str(&doc);
    }
    if existing.params.is_empty() && !other.params.is_empty() {
        existing.params = other.params;
        existing.ast = other.ast;
    }
    existing.code.extend(other.code);
    Ok(())
}

pub(crate) fn located(location: Option<&Diagnostic>) -> String {
    match location {
        Some(d) if d.has_position() => match &d.file {
            Some(file) => format!(" at {}:{}", file, d.line),
            None => format!(" at line {}", d.line),
        },
        _ => String::new(),
    }
}

fn node_key(matcher: &HostMatcher) -> String {
    match matcher {
        HostMatcher::Name(name) => name.to_lowercase(),
        HostMatcher::Regex(pattern) => format!("/{}/", pattern),
        HostMatcher::Default => "default".to_string(),
    }
}

fn node_matcher(matcher: &HostMatcher) -> Result<NodeMatcher, RegistryError> {
    Ok(match matcher {
        HostMatcher::Name(name) => NodeMatcher::Name(name.to_lowercase()),
        HostMatcher::Regex(pattern) => {
            NodeMatcher::Regex(Regex::new(pattern).map_err(|e| RegistryError::BadMatcher {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?)
        }
        HostMatcher::Default => NodeMatcher::Default,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_core::SourceFile;

    fn registry(text: &str) -> CompileResult<Registry> {
        let ast = Arc::new(marionette_syntax::parse(Arc::new(SourceFile::inline(text)))?);
        let mut registry = Registry::new();
        registry.register(&ast, None, true)?;
        Ok(registry)
    }

    #[test]
    fn test_namespace_search() {
        let r = registry("class a::b {} class b {} class a::b::c {}").unwrap();
        assert_eq!(
            r.find("a", "b", DeclarationKind::Hostclass).unwrap().name,
            "a::b"
        );
        assert_eq!(
            r.find("a", "::b", DeclarationKind::Hostclass).unwrap().name,
            "b"
        );
        assert_eq!(
            r.find("a::b", "c", DeclarationKind::Hostclass).unwrap().name,
            "a::b::c"
        );
        assert_eq!(r.find("", "B", DeclarationKind::Hostclass).unwrap().name, "b");
        assert!(r.find("", "c", DeclarationKind::Hostclass).is_none());
    }

    #[test]
    fn test_class_merge() {
        let r = registry("# first\nclass foo { $a = 1 }\n# second\nclass foo { $b = 2 }").unwrap();
        let foo = r.get(DeclarationKind::Hostclass, "foo").unwrap();
        assert_eq!(foo.code.len(), 2);
        assert!(foo.doc.as_deref().unwrap_or("").contains("first"));
    }

    #[test]
    fn test_class_merge_parent_conflict() {
        let err = registry("class p {} class q {} class a inherits p {} class a inherits q {}")
            .unwrap_err();
        assert_eq!(
            err.message(),
            "Cannot merge classes with different parent classes (a => p vs. a => q)"
        );
        assert!(registry("class p {} class a inherits p {} class a {}").is_ok());
    }

    #[test]
    fn test_duplicate_define_and_node() {
        let err = registry("define d {}\ndefine d {}").unwrap_err();
        assert!(err.message().starts_with("Definition d is already defined at line 1"));
        let err = registry("node 'a' {} node 'A' {}").unwrap_err();
        assert!(err.message().starts_with("Node a is already defined"));
    }

    #[test]
    fn test_nested_definitions_are_qualified() {
        let r = registry("class outer { class inner {} define thing {} }").unwrap();
        assert!(r.get(DeclarationKind::Hostclass, "outer::inner").is_some());
        assert!(r.get(DeclarationKind::Define, "outer::thing").is_some());
    }

    #[test]
    fn test_node_lookup_order() {
        let r = registry("node /^web/ {} node 'web01' {} node default {}").unwrap();
        let names = vec!["web01".to_string()];
        assert_eq!(r.find_node(&names).unwrap().name, "web01");
        let names = vec!["web02".to_string()];
        assert_eq!(r.find_node(&names).unwrap().name, "/^web/");
        let names = vec!["db".to_string()];
        assert_eq!(r.find_node(&names).unwrap().name, "default");
    }

    #[test]
    fn test_descendants() {
        let r = registry("class base {} class mid inherits base {} class leaf inherits mid {}")
            .unwrap();
        let origin = |n: &str| Origin::new(DeclarationKind::Hostclass, n);
        assert!(r.is_descendant(&origin("leaf"), &origin("base")));
        assert!(r.is_descendant(&origin("mid"), &origin("mid")));
        assert!(!r.is_descendant(&origin("base"), &origin("leaf")));
    }

    #[test]
    fn test_inheritance_cycle_detected() {
        let r = registry("class a inherits b {} class b inherits a {}").unwrap();
        assert!(r.has_inheritance_cycle(DeclarationKind::Hostclass, "a"));
        assert!(!r.has_inheritance_cycle(DeclarationKind::Hostclass, ""));
    }

    #[test]
    fn test_functions_separate_namespace() {
        let r = registry("function foo::bar($x) { $x } class bar {}").unwrap();
        assert!(r.find_function("foo", "bar").is_some());
        assert!(r.find_function("", "bar").is_none());
        assert!(r.find("", "bar", DeclarationKind::Hostclass).is_some());
    }
}
