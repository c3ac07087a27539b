//! In-memory text with batch edit application

use super::{line_spans, Position, TextEdit};
use crate::error::DocumentError;

/// Document text plus a version counter bumped on every applied batch
#[derive(Debug, Clone, Default)]
pub struct TextBuffer {
    text: String,
    version: u64,
}

impl TextBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            version: 0,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn line_count(&self) -> usize {
        line_spans(&self.text).len()
    }

    /// Position just past the last character
    pub fn end_position(&self) -> Position {
        let spans = line_spans(&self.text);
        let last = spans.len() - 1;
        let (start, end) = spans[last];
        Position::new(last, self.text[start..end].chars().count())
    }

    /// Byte offset of a position
    ///
    /// Characters past the end of a line clamp to the line end; lines past the
    /// end of the document are an error.
    pub fn offset_at(&self, position: Position) -> Result<usize, DocumentError> {
        let spans = line_spans(&self.text);
        let (start, end) = *spans.get(position.line).ok_or(DocumentError::OutOfRange {
            line: position.line,
            character: position.character,
        })?;
        let line = &self.text[start..end];
        let offset = line
            .char_indices()
            .nth(position.character)
            .map(|(i, _)| start + i)
            .unwrap_or(end);
        Ok(offset)
    }

    /// Apply a batch of non-overlapping edits addressed against the current text
    pub fn apply(&mut self, edits: &[TextEdit]) -> Result<(), DocumentError> {
        let mut resolved = Vec::with_capacity(edits.len());
        for edit in edits {
            let start = self.offset_at(edit.range.start)?;
            let end = self.offset_at(edit.range.end)?;
            if end < start {
                return Err(DocumentError::OutOfRange {
                    line: edit.range.end.line,
                    character: edit.range.end.character,
                });
            }
            resolved.push((start, end, edit.new_text.as_str()));
        }

        // Stable sort keeps insertions at the same offset in batch order
        resolved.sort_by_key(|(start, end, _)| (*start, *end));
        for pair in resolved.windows(2) {
            if pair[0].1 > pair[1].0 {
                return Err(DocumentError::OverlappingEdits);
            }
        }

        for (start, end, new_text) in resolved.into_iter().rev() {
            self.text.replace_range(start..end, new_text);
        }
        self.version += 1;
        Ok(())
    }

    /// Replace the whole text as one batch
    pub fn replace_all(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.version += 1;
    }
}
