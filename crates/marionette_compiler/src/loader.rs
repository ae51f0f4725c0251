//! Collaborators the compiler calls out to.
//!
//! Locating manifests and templates, rendering templates and storing
//! exported resources all happen outside the compiler. Each concern is a
//! trait with a small default implementation so a compile can run end to
//! end without further wiring.

use crate::collector::{Predicate, StoredResource};
use crate::value::Value;
use indexmap::IndexMap;
use marionette_core::name;
use regex::Regex;
use std::path::{Path, PathBuf};

/// What a name is being resolved for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolveKind {
    /// `import 'pattern'`
    Import,
    /// Autoloading a class or defined type
    Class,
    /// `template('module/file')` and `epp(...)`
    Template,
}

/// Context of a resolution request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveContext {
    /// What is being resolved
    pub kind: ResolveKind,
    /// Directory of the file that asked, for relative imports
    pub directory: Option<PathBuf>,
}

impl ResolveContext {
    /// Context without a requesting file
    #[must_use]
    pub fn new(kind: ResolveKind) -> Self {
        Self {
            kind,
            directory: None,
        }
    }

    /// Resolve relative to `directory`
    #[must_use]
    pub fn with_directory(mut self, directory: Option<PathBuf>) -> Self {
        self.directory = directory;
        self
    }
}

/// Finds and reads source files
pub trait ModuleLoader: Send + Sync {
    /// Candidate files for `name`; empty when nothing matches
    fn resolve(&self, name: &str, context: &ResolveContext) -> Vec<PathBuf>;

    /// File contents
    ///
    /// # Errors
    ///
    /// Returns a description of the failure
    fn read(&self, path: &Path) -> Result<String, String>;
}

/// Loader over a module path and a manifest directory
///
/// Classes map to `<module>/manifests/<path>.pp`, with the bare module
/// name mapping to `init.pp`; templates map to `<module>/templates/<file>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSystemLoader {
    module_path: Vec<PathBuf>,
    manifest_dir: Option<PathBuf>,
}

impl FileSystemLoader {
    /// Create a loader
    #[must_use]
    pub fn new(module_path: Vec<PathBuf>, manifest_dir: Option<PathBuf>) -> Self {
        Self {
            module_path,
            manifest_dir,
        }
    }

    fn class_files(&self, class_name: &str) -> Vec<PathBuf> {
        let class_name = name::canonical(class_name);
        let mut segments = class_name.split(name::SEPARATOR);
        let Some(module) = segments.next().filter(|m| !m.is_empty()) else {
            return Vec::new();
        };
        let rest: Vec<&str> = segments.collect();
        let relative = if rest.is_empty() {
            PathBuf::from("init.pp")
        } else {
            let mut path: PathBuf = rest.iter().collect();
            path.set_extension("pp");
            path
        };
        self.module_path
            .iter()
            .map(|dir| dir.join(module).join("manifests").join(&relative))
            .filter(|path| path.is_file())
            .take(1)
            .collect()
    }

    fn template_files(&self, template: &str) -> Vec<PathBuf> {
        let path = Path::new(template);
        if path.is_absolute() {
            return if path.is_file() {
                vec![path.to_path_buf()]
            } else {
                Vec::new()
            };
        }
        let mut components = path.components();
        let Some(module) = components.next() else {
            return Vec::new();
        };
        let file = components.as_path();
        self.module_path
            .iter()
            .map(|dir| dir.join(module).join("templates").join(file))
            .filter(|candidate| candidate.is_file())
            .take(1)
            .collect()
    }

    fn import_files(&self, pattern: &str, directory: Option<&Path>) -> Vec<PathBuf> {
        let mut pattern = PathBuf::from(pattern);
        if pattern.extension().is_none() {
            pattern.set_extension("pp");
        }
        let pattern = if pattern.is_absolute() {
            pattern
        } else {
            match directory.or(self.manifest_dir.as_deref()) {
                Some(dir) => dir.join(pattern),
                None => pattern,
            }
        };
        let Some(file_name) = pattern.file_name().and_then(|f| f.to_str()) else {
            return Vec::new();
        };
        if !file_name.contains('*') {
            return if pattern.is_file() {
                vec![pattern]
            } else {
                Vec::new()
            };
        }
        let Some(matcher) = glob_regex(file_name) else {
            return Vec::new();
        };
        let parent = pattern.parent().unwrap_or(Path::new("."));
        let Ok(entries) = std::fs::read_dir(parent) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|f| f.to_str())
                        .is_some_and(|f| matcher.is_match(f))
            })
            .collect();
        files.sort();
        files
    }
}

fn glob_regex(pattern: &str) -> Option<Regex> {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    Regex::new(&format!("^{}$", escaped.join(".*"))).ok()
}

impl ModuleLoader for FileSystemLoader {
    fn resolve(&self, name: &str, context: &ResolveContext) -> Vec<PathBuf> {
        let found = match context.kind {
            ResolveKind::Class => self.class_files(name),
            ResolveKind::Template => self.template_files(name),
            ResolveKind::Import => self.import_files(name, context.directory.as_deref()),
        };
        tracing::debug!(name, kind = ?context.kind, found = found.len(), "resolved");
        found
    }

    fn read(&self, path: &Path) -> Result<String, String> {
        std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))
    }
}

/// Renders template text with the caller's variables
pub trait TemplateRenderer: Send + Sync {
    /// Rendered text
    ///
    /// # Errors
    ///
    /// Returns a description of the failure
    fn render(&self, template: &str, bindings: &IndexMap<String, Value>) -> Result<String, String>;
}

/// Renderer used when no template engine is configured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoTemplates;

impl TemplateRenderer for NoTemplates {
    fn render(&self, _template: &str, _bindings: &IndexMap<String, Value>) -> Result<String, String> {
        Err("no template renderer is configured; use epp() or inline_epp()".to_string())
    }
}

/// Resources exported by earlier compilations
pub trait ExportStore: Send + Sync {
    /// Stored resources of `type_name` matching `query`, excluding those
    /// exported by `host`
    fn find(&self, type_name: &str, query: Option<&Predicate>, host: &str) -> Vec<StoredResource>;
}

/// In-memory export store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryExportStore {
    resources: Vec<StoredResource>,
}

impl MemoryExportStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a resource
    pub fn insert(&mut self, resource: StoredResource) {
        self.resources.push(resource);
    }

    /// Number of stored resources
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl ExportStore for MemoryExportStore {
    fn find(&self, type_name: &str, query: Option<&Predicate>, host: &str) -> Vec<StoredResource> {
        let type_name = name::canonical(type_name);
        self.resources
            .iter()
            .filter(|r| r.type_name == type_name && !r.host.eq_ignore_ascii_case(host))
            .filter(|r| query.is_none_or(|q| q.matches(*r)))
            .cloned()
            .collect()
    }
}
