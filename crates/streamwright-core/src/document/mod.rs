//! Text documents as seen by the edit pipeline
//!
//! - `Position`/`Range`/`TextEdit`: line/character addressing, matching the engine's wire shape
//! - `DocumentHost`: the editor-side surface (open, apply an edit batch, save)
//! - `TextBuffer`: in-memory text with batch edit application
//! - `WorkspaceDocuments`: a host backed by files under a workspace root

mod buffer;
mod workspace;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::edits::DEFAULT_EOL;
use crate::error::DocumentError;

pub use buffer::TextBuffer;
pub use workspace::WorkspaceDocuments;

static LINE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r\n|\r|\n").unwrap());

/// Zero-based line and character (in chars) within a document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

impl Position {
    pub fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

/// Span between two positions, end exclusive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    #[serde(rename = "startPosition", alias = "start")]
    pub start: Position,
    #[serde(rename = "endPosition", alias = "end")]
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Range covering whole lines `start_line..=end_line`, ending at `end_character`
    pub fn lines(start_line: usize, end_line: usize, end_character: usize) -> Self {
        Self::new(
            Position::new(start_line, 0),
            Position::new(end_line, end_character),
        )
    }

    /// Empty range at a position
    pub fn at(position: Position) -> Self {
        Self::new(position, position)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Replace the text in `range` with `new_text`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

impl TextEdit {
    pub fn replace(range: Range, new_text: impl Into<String>) -> Self {
        Self {
            range,
            new_text: new_text.into(),
        }
    }

    pub fn insert(position: Position, new_text: impl Into<String>) -> Self {
        Self::replace(Range::at(position), new_text)
    }

    pub fn delete(range: Range) -> Self {
        Self::replace(range, String::new())
    }
}

/// Split text into lines on `\r\n`, `\r` or `\n`
///
/// Always returns at least one line; a trailing terminator yields a trailing empty line.
pub fn split_lines(text: &str) -> Vec<String> {
    LINE_BREAK.split(text).map(str::to_string).collect()
}

/// First line terminator in the text, or `\n` when there is none
pub fn detect_eol(text: &str) -> &'static str {
    match LINE_BREAK.find(text).map(|m| m.as_str()) {
        Some("\r\n") => "\r\n",
        Some("\r") => "\r",
        _ => DEFAULT_EOL,
    }
}

/// Byte spans `(content_start, content_end)` of each line, terminators excluded
pub(crate) fn line_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for m in LINE_BREAK.find_iter(text) {
        spans.push((start, m.start()));
        start = m.end();
    }
    spans.push((start, text.len()));
    spans
}

/// Editor-side document operations
///
/// Paths are whatever the engine sent; hosts resolve them as they see fit.
#[async_trait]
pub trait DocumentHost: Send + Sync {
    /// Open the document and return its current text
    async fn open(&self, path: &Path) -> Result<String, DocumentError>;

    /// Current text of an open document
    async fn text(&self, path: &Path) -> Result<String, DocumentError>;

    /// Apply one batch of edits as a single transaction
    ///
    /// Ranges refer to the text before the batch; edits must not overlap.
    async fn apply_edits(&self, path: &Path, edits: Vec<TextEdit>) -> Result<(), DocumentError>;

    /// Persist the document
    async fn save(&self, path: &Path) -> Result<(), DocumentError>;

    /// Identity of the document behind `path`
    ///
    /// Two spellings of one document must map to the same value; writer
    /// leases are keyed by it.
    fn canonical(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}
