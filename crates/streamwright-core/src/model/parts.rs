//! Response content parts and the payloads that feed them

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::document::{Range, TextEdit};
use crate::types::{ExchangeId, SessionId};

/// Markdown with the rendering flags that decide whether two chunks may merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkdownText {
    pub value: String,
    #[serde(default)]
    pub is_trusted: bool,
    #[serde(default)]
    pub support_html: bool,
    #[serde(default)]
    pub support_theme_icons: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_uri: Option<String>,
}

impl MarkdownText {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    /// Chunks merge only when every formatting flag agrees
    pub fn can_merge(&self, other: &MarkdownText) -> bool {
        self.base_uri == other.base_uri
            && self.is_trusted == other.is_trusted
            && self.support_html == other.support_html
            && self.support_theme_icons == other.support_theme_icons
    }

    /// Append another chunk's text, keeping this chunk's flags
    pub fn append(&mut self, other: &MarkdownText) {
        self.value.push_str(&other.value);
    }
}

/// File (optionally a range or named symbol in it) the response used or mentions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentReference {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ContentReference {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            range: None,
            name: None,
        }
    }

    pub fn named(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            range: None,
            name: Some(name.into()),
        }
    }

    /// Symbol name if known, otherwise the file name
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => basename(&self.path),
        }
    }
}

/// Similar public code found for part of a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeCitation {
    pub value: String,
    pub license: String,
    pub snippet: String,
}

/// One plan step as reported on the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub index: usize,
    pub is_last: bool,
    pub title: String,
    pub description: String,
    pub session_id: SessionId,
}

/// Review state of an edits-info decoration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EditsState {
    Loading,
    InReview,
    MarkedComplete,
    Cancelled,
}

/// Summary decoration for a set of edited files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditsInfo {
    pub state: EditsState,
    pub is_stale: bool,
    pub files: Vec<PathBuf>,
    pub description: String,
    pub session_id: SessionId,
    pub exchange_id: ExchangeId,
}

/// One batch of edits applied to a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeEdit {
    pub path: PathBuf,
    pub edits: Vec<TextEdit>,
}

/// Transient status line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub content: String,
}

/// Long-running item whose content is replaced once it resolves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPart {
    pub id: u64,
    pub content: String,
    #[serde(default)]
    pub resolved: bool,
}

/// Cumulative edits for one file; each inner list is one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEditGroup {
    pub path: PathBuf,
    pub edits: Vec<Vec<TextEdit>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied: Option<usize>,
}

impl TextEditGroup {
    pub fn edit_count(&self) -> usize {
        self.edits.iter().map(Vec::len).sum()
    }
}

/// Warning shown inline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub content: String,
}

/// Ordered content of a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ResponsePart {
    Markdown(MarkdownText),
    InlineReference(ContentReference),
    ProgressMessage(ProgressMessage),
    Task(TaskPart),
    TextEditGroup(TextEditGroup),
    PlanStep(PlanStep),
    EditsInfo(EditsInfo),
    Warning(Warning),
}

impl ResponsePart {
    pub fn markdown(value: impl Into<String>) -> Self {
        ResponsePart::Markdown(MarkdownText::new(value))
    }

    pub fn progress(content: impl Into<String>) -> Self {
        ResponsePart::ProgressMessage(ProgressMessage {
            content: content.into(),
        })
    }

    pub fn warning(content: impl Into<String>) -> Self {
        ResponsePart::Warning(Warning {
            content: content.into(),
        })
    }
}

/// Agent that produced a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// User feedback on a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Up,
    Down,
}

/// Final result reported by the agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Content must be dropped once the response completes
    #[serde(default)]
    pub response_is_redacted: bool,
}

/// Suggested next prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Followup {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

pub(crate) fn basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
