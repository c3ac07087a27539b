//! Engine event wire format
//!
//! One JSON object per line. Control events (`keep_alive`, session started,
//! `done`) carry no payload the router needs; everything else is a UI event
//! addressed to a (session, exchange) pair:
//!
//! ```json
//! {"request_id":"s1","exchange_id":"e1","event":{"ChatEvent":{"delta":"Hi","answer_up_until_now":""}}}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::Range;
use crate::types::{EditRequestId, ExchangeId, SessionId, StreamKey};

/// Top-level event from the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentEvent {
    KeepAlive {
        keep_alive: String,
    },
    SessionStarted {
        session_id: SessionId,
        started: bool,
    },
    Done {
        done: serde_json::Value,
    },
    Ui(UiEvent),
}

/// Parse one line of the event stream
pub fn parse_event(line: &str) -> Result<AgentEvent, serde_json::Error> {
    serde_json::from_str(line)
}

/// Event addressed to an exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiEvent {
    /// Session id (the engine calls it request_id)
    pub request_id: SessionId,
    #[serde(default)]
    pub exchange_id: ExchangeId,
    pub event: UiEventKind,
}

impl UiEvent {
    pub fn key(&self) -> StreamKey {
        StreamKey {
            session_id: self.request_id.clone(),
            exchange_id: self.exchange_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UiEventKind {
    ChatEvent(ChatMessageEvent),
    ExchangeEvent(ExchangeEvent),
    PlanEvent(PlanEvent),
    FrameworkEvent(FrameworkEvent),
    SymbolEventSubStep(SymbolEventSubStep),
    SymbolEvent(serde_json::Value),
    ToolEvent(serde_json::Value),
    CodebaseEvent(serde_json::Value),
    #[serde(rename = "SymbolLoctationUpdate", alias = "SymbolLocationUpdate")]
    SymbolLocationUpdate(serde_json::Value),
    RequestEvent(serde_json::Value),
    EditRequestFinished(String),
}

impl UiEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            UiEventKind::ChatEvent(_) => "ChatEvent",
            UiEventKind::ExchangeEvent(_) => "ExchangeEvent",
            UiEventKind::PlanEvent(_) => "PlanEvent",
            UiEventKind::FrameworkEvent(_) => "FrameworkEvent",
            UiEventKind::SymbolEventSubStep(_) => "SymbolEventSubStep",
            UiEventKind::SymbolEvent(_) => "SymbolEvent",
            UiEventKind::ToolEvent(_) => "ToolEvent",
            UiEventKind::CodebaseEvent(_) => "CodebaseEvent",
            UiEventKind::SymbolLocationUpdate(_) => "SymbolLocationUpdate",
            UiEventKind::RequestEvent(_) => "RequestEvent",
            UiEventKind::EditRequestFinished(_) => "EditRequestFinished",
        }
    }
}

/// Streaming chat text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageEvent {
    #[serde(default)]
    pub answer_up_until_now: String,
    #[serde(default)]
    pub delta: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExchangeEvent {
    FinishedExchange(FinishedExchange),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinishedExchange {
    #[serde(default)]
    pub exchange_id: Option<ExchangeId>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanEvent {
    PlanStepTitleAdded(PlanStepTitle),
    PlanStepCompleteAdded(PlanStepComplete),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStepTitle {
    pub index: usize,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStepComplete {
    pub index: usize,
    pub title: String,
    pub description: String,
}

/// Progress reported by the engine's own machinery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameworkEvent {
    RepoMapGenerationStart(String),
    RepoMapGenerationFinished(String),
    LongContextSearchStart(String),
    LongContextSearchFinished(String),
    InitialSearchSymbols(InitialSearchSymbols),
    OpenFile(OpenFile),
    CodeIterationFinished(String),
    ReferenceFound(FoundReference),
    RelevantReference(RelevantReference),
    GroupedReferences(BTreeMap<String, Vec<RelevantReference>>),
    SearchIteration(serde_json::Value),
    AgenticTopLevelThinking(String),
    AgenticSymbolLevelThinking(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialSearchSymbols {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub symbols: Vec<InitialSearchSymbol>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialSearchSymbol {
    pub fs_file_path: String,
    pub symbol_name: String,
    #[serde(default)]
    pub is_new: bool,
    #[serde(default)]
    pub thinking: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenFile {
    pub fs_file_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundReference {
    #[serde(default)]
    pub request_id: String,
    pub fs_file_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevantReference {
    pub fs_file_path: String,
    pub symbol_name: String,
    #[serde(default)]
    pub reason: String,
}

/// Step of work on one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolEventSubStep {
    pub symbol_identifier: SymbolIdentifier,
    pub event: SymbolSubStep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolIdentifier {
    pub symbol_name: String,
    #[serde(default)]
    pub fs_file_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SymbolSubStep {
    Probe(serde_json::Value),
    GoToDefinition(GoToDefinition),
    Edit(SymbolEditEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoToDefinition {
    pub fs_file_path: String,
    pub range: Range,
    #[serde(default)]
    pub thinking: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SymbolEditEvent {
    RangeSelectionForEdit(FileRange),
    InsertCode(FileRange),
    EditCode(EditedCode),
    CodeCorrectionTool(CodeCorrectionTool),
    EditCodeStreaming(EditedCodeStreamingRequest),
    ThinkingForEdit(ThinkingForEdit),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRange {
    pub fs_file_path: String,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditedCode {
    pub fs_file_path: String,
    pub range: Range,
    pub new_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeCorrectionTool {
    pub fs_file_path: String,
    pub range: Range,
    pub tool_use: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingForEdit {
    #[serde(default)]
    pub thinking: String,
    #[serde(default)]
    pub delta: Option<String>,
}

/// One Start/Delta/End message of a streamed edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditedCodeStreamingRequest {
    pub edit_request_id: EditRequestId,
    #[serde(default)]
    pub session_id: SessionId,
    #[serde(default)]
    pub exchange_id: ExchangeId,
    pub fs_file_path: String,
    pub range: Range,
    pub event: EditStreamEvent,
    #[serde(default)]
    pub updated_code: Option<String>,
    #[serde(default)]
    pub apply_directly: bool,
}

impl EditedCodeStreamingRequest {
    pub fn key(&self) -> StreamKey {
        StreamKey {
            session_id: self.session_id.clone(),
            exchange_id: self.exchange_id.clone(),
        }
    }
}

/// `"Start"`, `"End"` or `{"Delta": "..."}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EditStreamEvent {
    Start,
    Delta(String),
    End,
}

/// Complete new content for a range, applied in one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyEditsRequest {
    pub fs_file_path: String,
    pub edited_content: String,
    pub selected_range: Range,
    #[serde(default)]
    pub apply_directly: bool,
}
