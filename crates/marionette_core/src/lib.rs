//! MARIONETTE Core Types
//!
//! Source text, spans, diagnostics and the error taxonomy shared by the
//! lexer, parser and catalog compiler. This crate performs no I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;
pub mod name;
pub mod source;

// Re-exports
pub use error::{CompileError, CompileResult, Diagnostic, ErrorKind};
pub use source::{Locator, Position, SourceFile, Span};
