//! Source text, byte spans and line/column location.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A half-open byte range into a source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset of the first character
    pub offset: usize,
    /// Length in bytes
    pub length: usize,
}

impl Span {
    /// Create a new span
    #[must_use]
    pub const fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// Span covering `start..end`
    #[must_use]
    pub fn between(start: usize, end: usize) -> Self {
        Self {
            offset: start,
            length: end.saturating_sub(start),
        }
    }

    /// Offset one past the last byte
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + self.length
    }

    /// Smallest span covering both spans
    #[must_use]
    pub fn join(self, other: Span) -> Span {
        let start = self.offset.min(other.offset);
        let end = self.end().max(other.end());
        Span::between(start, end)
    }

    /// Whether the span is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// A 1-based line and column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Line number (1-based)
    pub line: usize,
    /// Column number in characters (1-based)
    pub column: usize,
}

/// Maps byte offsets to lines and columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    line_starts: Vec<usize>,
}

impl Locator {
    /// Index the line breaks of `text`
    #[must_use]
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    /// Line (1-based) containing `offset`
    #[must_use]
    pub fn line_for_offset(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(index) => index + 1,
            Err(index) => index,
        }
    }

    /// Byte offset at which `line` (1-based) starts
    #[must_use]
    pub fn line_start(&self, line: usize) -> usize {
        self.line_starts
            .get(line.saturating_sub(1))
            .copied()
            .unwrap_or(0)
    }

    /// Line and character column for `offset` in `text`
    #[must_use]
    pub fn position(&self, text: &str, offset: usize) -> Position {
        let line = self.line_for_offset(offset);
        let start = self.line_start(line);
        let end = offset.min(text.len());
        let column = text
            .get(start..end)
            .map_or(end.saturating_sub(start), |s| s.chars().count())
            + 1;
        Position { line, column }
    }
}

/// A named source text shared by every stage of the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    path: Option<PathBuf>,
    text: String,
    locator: Locator,
}

impl SourceFile {
    /// Create a source file read from `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            path: Some(path.into()),
            locator: Locator::new(&text),
            text,
        }
    }

    /// Create a source without a backing file
    #[must_use]
    pub fn inline(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            path: None,
            locator: Locator::new(&text),
            text,
        }
    }

    /// Path of the file, if any
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Display name used in diagnostics
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.path.as_ref().map(|p| p.display().to_string())
    }

    /// Full text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The line/offset index
    #[must_use]
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Text covered by `span`, clamped to the source
    #[must_use]
    pub fn slice(&self, span: Span) -> &str {
        let start = span.offset.min(self.text.len());
        let end = span.end().min(self.text.len());
        self.text.get(start..end).unwrap_or("")
    }

    /// Line/column of a byte offset
    #[must_use]
    pub fn position(&self, offset: usize) -> Position {
        self.locator.position(&self.text, offset)
    }

    /// Build a diagnostic positioned at the start of `span`
    #[must_use]
    pub fn diagnostic(&self, span: Span, message: impl Into<String>) -> crate::Diagnostic {
        let pos = self.position(span.offset);
        crate::Diagnostic {
            file: self.name(),
            line: pos.line,
            column: pos.column,
            message: message.into(),
        }
    }
}
