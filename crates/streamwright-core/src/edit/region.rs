//! Edit region resolution and write-cursor tracking
//!
//! A declared range selects a half-open span of original lines. Incoming lines
//! overwrite that span one by one; once it is used up, further lines are
//! inserted after the last written line. Whatever is left of the span at End
//! is deleted in one edit.

use crate::document::{detect_eol, split_lines, Position, Range, TextEdit};

/// Half-open span `[start, end)` of original line indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditRegion {
    pub start: usize,
    pub end: usize,
}

impl EditRegion {
    /// Resolve a declared range against a document with `line_count` lines
    ///
    /// An end at character 0 of a later line stops before that line; any other
    /// end includes its line. Both bounds clamp to the document.
    pub fn resolve(range: &Range, line_count: usize) -> Self {
        let start = range.start.line.min(line_count);
        let end = if range.end.character == 0 && range.end.line > range.start.line {
            range.end.line
        } else {
            range.end.line + 1
        };
        Self {
            start,
            end: end.clamp(start, line_count),
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Plans one single-line edit per incoming line, in document order
#[derive(Debug)]
pub struct RegionCursor {
    region: EditRegion,
    eol: &'static str,
    original_lens: Vec<usize>,
    doc_lines: usize,
    written: usize,
    last_written_len: usize,
    shrunk: bool,
}

impl RegionCursor {
    pub fn new(text: &str, range: &Range) -> Self {
        let original_lens: Vec<usize> = split_lines(text)
            .iter()
            .map(|line| line.chars().count())
            .collect();
        let doc_lines = original_lens.len();
        Self {
            region: EditRegion::resolve(range, doc_lines),
            eol: detect_eol(text),
            original_lens,
            doc_lines,
            written: 0,
            last_written_len: 0,
            shrunk: false,
        }
    }

    pub fn region(&self) -> EditRegion {
        self.region
    }

    /// Line index the next incoming line will occupy
    pub fn cursor(&self) -> usize {
        self.region.start + self.written
    }

    /// Lines written so far
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn eol(&self) -> &'static str {
        self.eol
    }

    /// Edit placing `line` at the cursor
    pub fn plan_line(&mut self, line: &str) -> TextEdit {
        let target = self.cursor();
        let edit = if self.written < self.region.len() {
            TextEdit::replace(
                Range::lines(target, target, self.original_lens[target]),
                line,
            )
        } else if target < self.doc_lines {
            self.doc_lines += 1;
            TextEdit::insert(Position::new(target, 0), format!("{}{}", line, self.eol))
        } else {
            let prev_len = self.preceding_len(target);
            self.doc_lines += 1;
            TextEdit::insert(
                Position::new(target - 1, prev_len),
                format!("{}{}", self.eol, line),
            )
        };
        self.written += 1;
        self.last_written_len = line.chars().count();
        edit
    }

    /// Edit deleting original lines that were never overwritten
    ///
    /// Returns `None` when nothing is left or the shrink was already planned.
    pub fn plan_shrink(&mut self) -> Option<TextEdit> {
        let from = self.cursor();
        let to = self.region.end;
        if self.shrunk || from >= to {
            return None;
        }
        self.shrunk = true;

        let last_len = self.original_lens[to - 1];
        let edit = if to < self.doc_lines {
            TextEdit::delete(Range::new(Position::new(from, 0), Position::new(to, 0)))
        } else if from > 0 {
            // Region runs to the end of the document: take the terminator before it
            let prev_len = self.preceding_len(from);
            TextEdit::delete(Range::new(
                Position::new(from - 1, prev_len),
                Position::new(to - 1, last_len),
            ))
        } else {
            TextEdit::delete(Range::new(Position::new(0, 0), Position::new(to - 1, last_len)))
        };
        self.doc_lines = (self.doc_lines - (to - from)).max(1);
        Some(edit)
    }

    /// Char length of the line just before `line`
    fn preceding_len(&self, line: usize) -> usize {
        if self.written > 0 {
            self.last_written_len
        } else {
            self.original_lens[line - 1]
        }
    }
}
