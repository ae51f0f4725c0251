//! MARIONETTE Catalog Compiler
//!
//! Evaluates parsed manifests for one node and produces a catalog: the
//! resources the node should have, their parameters and tags, and the
//! containment and ordering edges between them.
//!
//! Compilation runs in phases. The main manifest is parsed and its
//! declarations registered; node facts are bound as top-scope variables;
//! the main class, the matching node declaration and any requested classes
//! are evaluated; collectors and queued defined resources are evaluated
//! until neither makes progress; finally every resource is finished
//! (overrides, defaults, inherited metaparameters) and the graph assembled.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builtin;
pub mod catalog;
pub mod collector;
pub mod compiler;
pub mod config;
pub mod loader;
pub mod node;
pub mod registry;
pub mod resource;
pub mod scope;
pub mod types;
pub mod value;

mod eval;
mod functions;

// Re-exports
pub use catalog::{Catalog, CatalogError, CatalogResource, Edge, EdgeKind};
pub use collector::StoredResource;
pub use compiler::{ClassRequest, Compiler, CompilerOutput, Source, compile};
pub use config::{CompilerConfig, ConfigError};
pub use functions::versioncmp;
pub use loader::{
    ExportStore, FileSystemLoader, MemoryExportStore, ModuleLoader, NoTemplates, ResolveContext,
    ResolveKind, TemplateRenderer,
};
pub use node::Node;
pub use types::ResourceRef;
pub use value::Value;
