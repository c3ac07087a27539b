//! Line accumulator for streamed edit fragments
//!
//! Fragments arrive in arbitrary sizes and do not respect line boundaries.
//! The accumulator yields each complete line exactly once, in arrival order.
//! `\n`, `\r\n` and a lone `\r` all terminate a line; a `\r` at the very end
//! of the buffer is held back until the next fragment shows whether a `\n`
//! follows it.

use crate::constants::edits::ACCUMULATOR_COMPACT_BYTES;

#[derive(Debug, Default)]
pub struct LineAccumulator {
    buffer: String,
    /// Start of the first line not yet yielded
    line_start: usize,
    /// How far the terminator search got; bytes before this hold no terminator
    scan_pos: usize,
    exhausted: bool,
}

impl LineAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment
    pub fn add_delta(&mut self, fragment: &str) {
        if self.exhausted {
            tracing::debug!("Dropping fragment after flush ({} bytes)", fragment.len());
            return;
        }
        self.buffer.push_str(fragment);
    }

    /// Next complete line, without its terminator
    pub fn next_line(&mut self) -> Option<String> {
        if self.exhausted {
            return None;
        }

        let bytes = self.buffer.as_bytes();
        let mut i = self.scan_pos.max(self.line_start);
        while i < bytes.len() {
            match bytes[i] {
                b'\n' => return Some(self.take_line(i, 1)),
                b'\r' => {
                    if i + 1 >= bytes.len() {
                        // Might be the first half of \r\n
                        self.scan_pos = i;
                        return None;
                    }
                    let width = if bytes[i + 1] == b'\n' { 2 } else { 1 };
                    return Some(self.take_line(i, width));
                }
                _ => i += 1,
            }
        }
        self.scan_pos = i;
        None
    }

    /// The final partial line, if any
    ///
    /// Call once at End after draining `next_line`. Afterwards the accumulator
    /// yields nothing.
    pub fn flush_remainder(&mut self) -> Option<String> {
        if self.exhausted {
            return None;
        }
        self.exhausted = true;

        let mut rest = &self.buffer[self.line_start..];
        if let Some(stripped) = rest.strip_suffix('\r') {
            rest = stripped;
        } else if rest.is_empty() {
            return None;
        }
        let line = rest.to_string();
        self.buffer.clear();
        self.line_start = 0;
        self.scan_pos = 0;
        Some(line)
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Bytes received but not yet yielded
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.line_start
    }

    fn take_line(&mut self, terminator_at: usize, width: usize) -> String {
        let line = self.buffer[self.line_start..terminator_at].to_string();
        self.line_start = terminator_at + width;
        self.scan_pos = self.line_start;
        if self.line_start >= ACCUMULATOR_COMPACT_BYTES {
            self.buffer.drain(..self.line_start);
            self.line_start = 0;
            self.scan_pos = 0;
        }
        line
    }
}
