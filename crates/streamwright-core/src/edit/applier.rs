//! Incremental edit application
//!
//! `StreamProcessor` turns resolved lines into single-line document edits,
//! each applied as its own transaction and echoed to the exchange's sink.
//! In apply-directly mode lines are buffered and committed once at End as a
//! line diff against the target range.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use similar::{capture_diff_slices, Algorithm, DiffTag};
use tracing::{debug, warn};

use super::region::{EditRegion, RegionCursor};
use crate::document::{detect_eol, split_lines, DocumentHost, Position, Range, TextBuffer, TextEdit};
use crate::error::{DocumentError, EditError};
use crate::model::CodeEdit;
use crate::stream::ResponseSink;
use crate::types::EditRequestId;

enum ApplyMode {
    Incremental,
    Direct { lines: Vec<String> },
}

pub struct StreamProcessor {
    request_id: EditRequestId,
    path: PathBuf,
    host: Arc<dyn DocumentHost>,
    sink: Option<Arc<dyn ResponseSink>>,
    snapshot: String,
    range: Range,
    cursor: RegionCursor,
    mode: ApplyMode,
    applied: usize,
    finished: bool,
}

impl StreamProcessor {
    /// Open the document and snapshot it
    pub async fn start(
        request_id: EditRequestId,
        path: PathBuf,
        range: Range,
        apply_directly: bool,
        host: Arc<dyn DocumentHost>,
        sink: Option<Arc<dyn ResponseSink>>,
    ) -> Result<Self, EditError> {
        let snapshot = host.open(&path).await?;
        let cursor = RegionCursor::new(&snapshot, &range);
        debug!(
            "Edit {} started on {:?}, region {:?}",
            request_id,
            path,
            cursor.region()
        );
        Ok(Self {
            request_id,
            path,
            host,
            sink,
            snapshot,
            range,
            cursor,
            mode: if apply_directly {
                ApplyMode::Direct { lines: Vec::new() }
            } else {
                ApplyMode::Incremental
            },
            applied: 0,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn region(&self) -> EditRegion {
        self.cursor.region()
    }

    /// Edits applied so far
    pub fn applied_edits(&self) -> usize {
        self.applied
    }

    /// Place one complete line
    pub async fn process_line(&mut self, line: String) -> Result<(), EditError> {
        if self.finished {
            debug!("Edit {} already finished, dropping line", self.request_id);
            return Ok(());
        }
        match &mut self.mode {
            ApplyMode::Direct { lines } => {
                lines.push(line);
                Ok(())
            }
            ApplyMode::Incremental => {
                let edit = self.cursor.plan_line(&line);
                self.apply(vec![edit]).await
            }
        }
    }

    /// Delete what is left of the region, or commit buffered lines
    pub async fn finish(&mut self) -> Result<(), EditError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        match std::mem::replace(&mut self.mode, ApplyMode::Incremental) {
            ApplyMode::Incremental => {
                if let Some(edit) = self.cursor.plan_shrink() {
                    self.apply(vec![edit]).await?;
                }
            }
            ApplyMode::Direct { lines } => {
                let content = lines.join(self.cursor.eol());
                let edits =
                    apply_whole_content(self.host.as_ref(), &self.path, &self.range, &content)
                        .await?;
                self.applied += edits.len();
                self.echo(edits);
            }
        }
        debug!(
            "Edit {} finished with {} edits on {:?}",
            self.request_id, self.applied, self.path
        );
        Ok(())
    }

    /// Put the document back to its content at Start, in one edit
    pub async fn restore(&mut self) -> Result<(), EditError> {
        let current = self.host.text(&self.path).await?;
        if current == self.snapshot {
            return Ok(());
        }
        let end = TextBuffer::new(current).end_position();
        let edit = TextEdit::replace(
            Range::new(Position::new(0, 0), end),
            self.snapshot.clone(),
        );
        self.host.apply_edits(&self.path, vec![edit]).await?;
        self.finished = true;
        warn!("Edit {} restored {:?} to its starting content", self.request_id, self.path);
        Ok(())
    }

    async fn apply(&mut self, edits: Vec<TextEdit>) -> Result<(), EditError> {
        self.host.apply_edits(&self.path, edits.clone()).await?;
        self.applied += edits.len();
        self.echo(edits);
        Ok(())
    }

    fn echo(&self, edits: Vec<TextEdit>) {
        if edits.is_empty() {
            return;
        }
        if let Some(sink) = &self.sink {
            sink.code_edit(CodeEdit {
                path: self.path.clone(),
                edits,
            });
        }
    }
}

/// Replace the lines selected by `range` with `content` as one batch
///
/// The batch is a line diff between the current region and the new content.
/// If the host refuses the hunks, the whole region is replaced in one edit.
/// Returns the edits that were applied.
pub async fn apply_whole_content(
    host: &dyn DocumentHost,
    path: &Path,
    range: &Range,
    content: &str,
) -> Result<Vec<TextEdit>, EditError> {
    let text = host.open(path).await?;
    let lines = split_lines(&text);
    let eol = detect_eol(&text);
    let region = EditRegion::resolve(range, lines.len());
    let new_lines = content_lines(content);

    let hunks = diff_hunks(&lines, region, &new_lines, eol);
    if hunks.is_empty() {
        debug!("Content for {:?} unchanged, nothing to apply", path);
        return Ok(hunks);
    }

    match host.apply_edits(path, hunks.clone()).await {
        Ok(()) => Ok(hunks),
        Err(e @ (DocumentError::OverlappingEdits | DocumentError::OutOfRange { .. })) => {
            warn!("Diff hunks rejected for {:?} ({}), replacing whole range", path, e);
            let Some(edit) = replace_lines(&lines, region.start, region.end, &new_lines, eol)
            else {
                return Ok(Vec::new());
            };
            host.apply_edits(path, vec![edit.clone()]).await?;
            Ok(vec![edit])
        }
        Err(e) => Err(e.into()),
    }
}

/// Lines of new content; a trailing terminator does not add an empty line
fn content_lines(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    let mut lines = split_lines(content);
    if content.ends_with('\n') || content.ends_with('\r') {
        lines.pop();
    }
    lines
}

fn diff_hunks(
    lines: &[String],
    region: EditRegion,
    new_lines: &[String],
    eol: &str,
) -> Vec<TextEdit> {
    let old = &lines[region.start..region.end];
    capture_diff_slices(Algorithm::Myers, old, new_lines)
        .iter()
        .map(|op| op.as_tag_tuple())
        .filter(|(tag, _, _)| *tag != DiffTag::Equal)
        .filter_map(|(_, old_range, new_range)| {
            replace_lines(
                lines,
                region.start + old_range.start,
                region.start + old_range.end,
                &new_lines[new_range],
                eol,
            )
        })
        .collect()
}

/// One edit replacing original lines `[from, to)` with `new_lines`
fn replace_lines(
    lines: &[String],
    from: usize,
    to: usize,
    new_lines: &[String],
    eol: &str,
) -> Option<TextEdit> {
    let len = |line: usize| lines[line].chars().count();
    let doc_lines = lines.len();
    let joined = new_lines.join(eol);

    match (from < to, new_lines.is_empty()) {
        (false, true) => None,
        (true, false) => Some(TextEdit::replace(Range::lines(from, to - 1, len(to - 1)), joined)),
        (false, false) => Some(if from < doc_lines {
            TextEdit::insert(Position::new(from, 0), format!("{}{}", joined, eol))
        } else {
            TextEdit::insert(
                Position::new(from - 1, len(from - 1)),
                format!("{}{}", eol, joined),
            )
        }),
        (true, true) => Some(if to < doc_lines {
            TextEdit::delete(Range::new(Position::new(from, 0), Position::new(to, 0)))
        } else if from > 0 {
            TextEdit::delete(Range::new(
                Position::new(from - 1, len(from - 1)),
                Position::new(to - 1, len(to - 1)),
            ))
        } else {
            TextEdit::delete(Range::lines(0, to - 1, len(to - 1)))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::WorkspaceDocuments;
    use crate::stream::{create_sink_channel, SinkUpdate};
    use crate::types::StreamKey;
    use tempfile::TempDir;

    fn workspace(content: &str) -> (TempDir, Arc<WorkspaceDocuments>, PathBuf) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file.rs");
        std::fs::write(&path, content).unwrap();
        let docs = Arc::new(WorkspaceDocuments::new(temp.path()));
        (temp, docs, path)
    }

    #[tokio::test]
    async fn test_incremental_lines_and_shrink() {
        let (_temp, docs, path) = workspace("L0\nL1\nL2\nL3\nL4");
        let (sink, mut rx) = create_sink_channel(StreamKey::new("s", "e"));
        let mut processor = StreamProcessor::start(
            "r1".into(),
            path.clone(),
            Range::lines(1, 3, 0),
            false,
            docs.clone(),
            Some(sink),
        )
        .await
        .unwrap();

        processor.process_line("X".to_string()).await.unwrap();
        assert_eq!(docs.text(&path).await.unwrap(), "L0\nX\nL2\nL3\nL4");
        processor.finish().await.unwrap();
        assert_eq!(docs.text(&path).await.unwrap(), "L0\nX\nL3\nL4");
        assert_eq!(processor.applied_edits(), 2);

        let mut echoed = 0;
        while let Ok(message) = rx.try_recv() {
            assert!(matches!(message.update, SinkUpdate::CodeEdit(_)));
            echoed += 1;
        }
        assert_eq!(echoed, 2);
    }

    #[tokio::test]
    async fn test_finish_twice_applies_once() {
        let (_temp, docs, path) = workspace("a\nb\nc");
        let mut processor = StreamProcessor::start(
            "r1".into(),
            path.clone(),
            Range::lines(0, 2, 1),
            false,
            docs.clone(),
            None,
        )
        .await
        .unwrap();
        processor.process_line("z".to_string()).await.unwrap();
        processor.finish().await.unwrap();
        processor.finish().await.unwrap();
        processor.process_line("late".to_string()).await.unwrap();
        assert_eq!(docs.text(&path).await.unwrap(), "z");
    }

    #[tokio::test]
    async fn test_direct_mode_buffers_until_finish() {
        let (_temp, docs, path) = workspace("fn a() {\n    1\n}\n");
        let mut processor = StreamProcessor::start(
            "r1".into(),
            path.clone(),
            Range::lines(0, 2, 1),
            true,
            docs.clone(),
            None,
        )
        .await
        .unwrap();
        for line in ["fn a() {", "    2", "}"] {
            processor.process_line(line.to_string()).await.unwrap();
        }
        assert_eq!(docs.text(&path).await.unwrap(), "fn a() {\n    1\n}\n");

        processor.finish().await.unwrap();
        assert_eq!(docs.text(&path).await.unwrap(), "fn a() {\n    2\n}\n");
        assert_eq!(processor.applied_edits(), 1);
    }

    #[tokio::test]
    async fn test_restore_puts_back_snapshot() {
        let (_temp, docs, path) = workspace("keep\nme");
        let mut processor = StreamProcessor::start(
            "r1".into(),
            path.clone(),
            Range::lines(0, 1, 2),
            false,
            docs.clone(),
            None,
        )
        .await
        .unwrap();
        processor.process_line("gone".to_string()).await.unwrap();
        processor.process_line("also gone".to_string()).await.unwrap();
        processor.process_line("extra".to_string()).await.unwrap();

        processor.restore().await.unwrap();
        assert_eq!(docs.text(&path).await.unwrap(), "keep\nme");
    }

    #[tokio::test]
    async fn test_start_on_missing_document() {
        let temp = TempDir::new().unwrap();
        let docs = Arc::new(WorkspaceDocuments::new(temp.path()));
        let result = StreamProcessor::start(
            "r1".into(),
            PathBuf::from("missing.rs"),
            Range::default(),
            false,
            docs,
            None,
        )
        .await;
        assert!(matches!(
            result,
            Err(EditError::Document(DocumentError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_whole_content_diff_touches_only_changed_lines() {
        let (_temp, docs, path) = workspace("a\nb\nc\nd\ne\n");
        let edits = apply_whole_content(
            docs.as_ref(),
            &path,
            &Range::lines(0, 4, 1),
            "a\nB\nc\nd\ne\nf\n",
        )
        .await
        .unwrap();

        assert_eq!(docs.text(&path).await.unwrap(), "a\nB\nc\nd\ne\nf\n");
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0], TextEdit::replace(Range::lines(1, 1, 1), "B"));
    }

    #[tokio::test]
    async fn test_whole_content_deletes_tail_of_document() {
        let (_temp, docs, path) = workspace("a\nb\nc");
        apply_whole_content(docs.as_ref(), &path, &Range::lines(0, 2, 1), "a")
            .await
            .unwrap();
        assert_eq!(docs.text(&path).await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_whole_content_unchanged_is_empty_batch() {
        let (_temp, docs, path) = workspace("same\ntext");
        let edits = apply_whole_content(
            docs.as_ref(),
            &path,
            &Range::lines(0, 1, 4),
            "same\ntext",
        )
        .await
        .unwrap();
        assert!(edits.is_empty());
    }

    #[test]
    fn test_content_lines_ignores_trailing_terminator() {
        assert_eq!(content_lines("a\nb\n"), vec!["a", "b"]);
        assert_eq!(content_lines("a\r\nb"), vec!["a", "b"]);
        assert!(content_lines("").is_empty());
    }
}
