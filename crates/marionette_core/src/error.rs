//! Diagnostics and the compile error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compile result type
pub type CompileResult<T> = Result<T, CompileError>;

/// A positioned message
///
/// A `line` of zero means the position is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Source file, if the text came from one
    pub file: Option<String>,
    /// Line (1-based)
    pub line: usize,
    /// Column (1-based)
    pub column: usize,
    /// Human readable message
    pub message: String,
}

impl Diagnostic {
    /// A diagnostic with no source position
    #[must_use]
    pub fn unpositioned(message: impl Into<String>) -> Self {
        Self {
            file: None,
            line: 0,
            column: 0,
            message: message.into(),
        }
    }

    /// Whether the diagnostic points into a source
    #[must_use]
    pub fn has_position(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        match (&self.file, self.has_position()) {
            (Some(file), true) => write!(f, " at {}:{}:{}", file, self.line, self.column),
            (Some(file), false) => write!(f, " in {}", file),
            (None, true) => write!(f, " at line {}:{}", self.line, self.column),
            (None, false) => Ok(()),
        }
    }
}

/// Which stage of the pipeline raised an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Lexical analysis
    Lex,
    /// Parsing
    Syntax,
    /// Name resolution
    Resolution,
    /// Evaluation
    Evaluation,
    /// Finishing and graph assembly
    Graph,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lex => write!(f, "lex"),
            Self::Syntax => write!(f, "syntax"),
            Self::Resolution => write!(f, "resolution"),
            Self::Evaluation => write!(f, "evaluation"),
            Self::Graph => write!(f, "graph"),
        }
    }
}

/// Fatal compile errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// Unterminated construct, malformed number, illegal identifier
    #[error("{0}")]
    Lex(Diagnostic),

    /// Grammar violation or reserved word use
    #[error("{0}")]
    Syntax(Diagnostic),

    /// Unknown class, define, node, stage, attribute or missing parameter
    #[error("{0}")]
    Resolution(Diagnostic),

    /// Failure while evaluating expressions
    #[error("{0}")]
    Evaluation(Diagnostic),

    /// Conflicts found while finishing resources or assembling the catalog
    #[error("{0}")]
    Graph(Diagnostic),
}

impl CompileError {
    /// Build an error of the given kind
    #[must_use]
    pub fn new(kind: ErrorKind, diagnostic: Diagnostic) -> Self {
        match kind {
            ErrorKind::Lex => Self::Lex(diagnostic),
            ErrorKind::Syntax => Self::Syntax(diagnostic),
            ErrorKind::Resolution => Self::Resolution(diagnostic),
            ErrorKind::Evaluation => Self::Evaluation(diagnostic),
            ErrorKind::Graph => Self::Graph(diagnostic),
        }
    }

    /// The stage that raised this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Lex(_) => ErrorKind::Lex,
            Self::Syntax(_) => ErrorKind::Syntax,
            Self::Resolution(_) => ErrorKind::Resolution,
            Self::Evaluation(_) => ErrorKind::Evaluation,
            Self::Graph(_) => ErrorKind::Graph,
        }
    }

    /// The positioned message
    #[must_use]
    pub fn diagnostic(&self) -> &Diagnostic {
        match self {
            Self::Lex(d)
            | Self::Syntax(d)
            | Self::Resolution(d)
            | Self::Evaluation(d)
            | Self::Graph(d) => d,
        }
    }

    /// The bare message without position
    #[must_use]
    pub fn message(&self) -> &str {
        &self.diagnostic().message
    }

    /// Attach a position to an error that has none yet
    #[must_use]
    pub fn or_position(self, fallback: impl FnOnce() -> Diagnostic) -> Self {
        if self.diagnostic().has_position() {
            return self;
        }
        let kind = self.kind();
        let message = self.diagnostic().message.clone();
        let mut diagnostic = fallback();
        diagnostic.message = message;
        Self::new(kind, diagnostic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(line: usize, column: usize, message: &str) -> Diagnostic {
        Diagnostic {
            file: Some("site.pp".to_string()),
            line,
            column,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_error_display() {
        let err = CompileError::Syntax(at(3, 7, "Syntax error at '}'"));
        assert_eq!(format!("{}", err), "Syntax error at '}' at site.pp:3:7");

        let err = CompileError::Graph(Diagnostic::unpositioned("Duplicate declaration"));
        assert_eq!(format!("{}", err), "Duplicate declaration");
    }

    #[test]
    fn test_error_kind_roundtrip() {
        for kind in [
            ErrorKind::Lex,
            ErrorKind::Syntax,
            ErrorKind::Resolution,
            ErrorKind::Evaluation,
            ErrorKind::Graph,
        ] {
            let err = CompileError::new(kind, Diagnostic::unpositioned("x"));
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn test_or_position_keeps_existing() {
        let err = CompileError::Evaluation(at(1, 1, "a"));
        let err = err.or_position(|| at(9, 9, "b"));
        assert_eq!(err.diagnostic().line, 1);

        let err = CompileError::Evaluation(Diagnostic::unpositioned("a"));
        let err = err.or_position(|| at(9, 9, "b"));
        assert_eq!(err.diagnostic().line, 9);
        assert_eq!(err.message(), "a");
    }

    #[test]
    fn test_diagnostic_serializes() {
        let json = serde_json::to_string(&at(2, 4, "m")).unwrap();
        assert!(json.contains("\"line\":2"));
    }
}
