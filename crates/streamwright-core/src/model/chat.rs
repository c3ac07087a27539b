//! Chat session model: ordered exchanges, plan, title and snapshots

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::parts::{
    AgentInfo, CodeCitation, CodeEdit, ContentReference, Followup, PlanStep, ResponsePart,
    ResponseResult, Vote,
};
use super::plan::PlanModel;
use super::response::{Response, ResponseModel};
use crate::constants::model::{
    CHANGE_CHANNEL_CAPACITY, DEFAULT_TITLE, SNAPSHOT_VERSION, TITLE_MAX_CHARS,
};
use crate::types::{ExchangeId, SessionId};

/// Progress reported for a response, dispatched by kind
#[derive(Debug, Clone)]
pub enum ChatProgress {
    Content(ResponsePart),
    Reference(ContentReference),
    AgentDetection(AgentInfo),
    CodeCitation(CodeCitation),
    CodeEdit(CodeEdit),
    PlanStep(PlanStep),
}

/// Session-level change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatChange {
    AddRequest { exchange_id: ExchangeId },
    AddResponse { exchange_id: ExchangeId },
    SetAgent { exchange_id: ExchangeId, agent_id: String },
    CodeEdit { exchange_id: ExchangeId },
    StartPlan,
    PlanCleared,
    ResponseChanged { exchange_id: ExchangeId },
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Exchange {
    pub id: ExchangeId,
    pub request: Option<ChatRequest>,
    pub response: Arc<ResponseModel>,
}

struct ChatState {
    exchanges: Vec<Exchange>,
    plan: Option<Arc<PlanModel>>,
    custom_title: Option<String>,
    last_message_date: DateTime<Utc>,
}

pub struct ChatModel {
    session_id: SessionId,
    created_at: DateTime<Utc>,
    state: RwLock<ChatState>,
    changes: broadcast::Sender<ChatChange>,
}

impl ChatModel {
    pub fn new(session_id: SessionId) -> Self {
        let now = Utc::now();
        Self::with_state(session_id, now, now, None, Vec::new())
    }

    fn with_state(
        session_id: SessionId,
        created_at: DateTime<Utc>,
        last_message_date: DateTime<Utc>,
        custom_title: Option<String>,
        exchanges: Vec<Exchange>,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            session_id,
            created_at,
            state: RwLock::new(ChatState {
                exchanges,
                plan: None,
                custom_title,
                last_message_date,
            }),
            changes,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatChange> {
        self.changes.subscribe()
    }

    /// Record a user message and open its response
    pub fn add_request(&self, message: impl Into<String>) -> (ExchangeId, Arc<ResponseModel>) {
        let id = ExchangeId::generate();
        let timestamp = Utc::now();
        let response = Arc::new(ResponseModel::new(self.session_id.clone(), id.clone()));
        {
            let mut state = self.state.write();
            state.exchanges.push(Exchange {
                id: id.clone(),
                request: Some(ChatRequest {
                    message: message.into(),
                    timestamp,
                }),
                response: Arc::clone(&response),
            });
            state.last_message_date = timestamp;
        }
        self.notify(ChatChange::AddRequest {
            exchange_id: id.clone(),
        });
        (id, response)
    }

    /// Open a response the agent started on its own
    ///
    /// Returns the existing response when the exchange is already known.
    pub fn init_response(&self, exchange_id: ExchangeId) -> Arc<ResponseModel> {
        let mut state = self.state.write();
        if let Some(existing) = state.exchanges.iter().find(|e| e.id == exchange_id) {
            return Arc::clone(&existing.response);
        }
        let response = Arc::new(ResponseModel::new(
            self.session_id.clone(),
            exchange_id.clone(),
        ));
        state.exchanges.push(Exchange {
            id: exchange_id.clone(),
            request: None,
            response: Arc::clone(&response),
        });
        drop(state);
        self.notify(ChatChange::AddResponse { exchange_id });
        response
    }

    pub fn response(&self, exchange_id: &ExchangeId) -> Option<Arc<ResponseModel>> {
        self.state
            .read()
            .exchanges
            .iter()
            .find(|e| &e.id == exchange_id)
            .map(|e| Arc::clone(&e.response))
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.state.read().exchanges.clone()
    }

    pub fn plan(&self) -> Option<Arc<PlanModel>> {
        self.state.read().plan.clone()
    }

    /// Dispatch one progress item to the exchange's response
    pub fn accept_response_progress(
        &self,
        exchange_id: &ExchangeId,
        progress: ChatProgress,
        quiet: bool,
    ) -> bool {
        let Some(response) = self.response(exchange_id) else {
            warn!(
                "Progress for unknown exchange {} in session {}",
                exchange_id, self.session_id
            );
            return false;
        };

        let accepted = match progress {
            ChatProgress::Content(part) => response.update_content(part, quiet),
            ChatProgress::Reference(reference) => {
                response.apply_reference(reference);
                true
            }
            ChatProgress::AgentDetection(agent) => {
                let agent_id = agent.id.clone();
                response.set_agent(agent);
                self.notify(ChatChange::SetAgent {
                    exchange_id: exchange_id.clone(),
                    agent_id,
                });
                true
            }
            ChatProgress::CodeCitation(citation) => {
                response.apply_code_citation(citation);
                true
            }
            ChatProgress::CodeEdit(edit) => {
                let applied = response.apply_code_edit(edit);
                if applied {
                    self.notify(ChatChange::CodeEdit {
                        exchange_id: exchange_id.clone(),
                    });
                }
                applied
            }
            ChatProgress::PlanStep(step) => {
                self.apply_plan_step(&step);
                response.update_content(ResponsePart::PlanStep(step), quiet)
            }
        };

        if accepted && !quiet {
            self.notify(ChatChange::ResponseChanged {
                exchange_id: exchange_id.clone(),
            });
        }
        accepted
    }

    fn apply_plan_step(&self, step: &PlanStep) {
        let (plan, started) = {
            let mut state = self.state.write();
            match &state.plan {
                Some(plan) => (Arc::clone(plan), false),
                None => {
                    let plan = Arc::new(PlanModel::new(self.session_id.clone()));
                    state.plan = Some(Arc::clone(&plan));
                    (plan, true)
                }
            }
        };
        plan.update_step(step);
        if started {
            debug!("Plan started for session {}", self.session_id);
            self.notify(ChatChange::StartPlan);
        }
    }

    /// Complete a response; a finished edit pass clears the plan
    pub fn complete_response(&self, exchange_id: &ExchangeId) {
        let Some(response) = self.response(exchange_id) else {
            return;
        };
        response.complete();
        if response.has_edit_groups() && self.state.write().plan.take().is_some() {
            self.notify(ChatChange::PlanCleared);
        }
        self.notify(ChatChange::ResponseChanged {
            exchange_id: exchange_id.clone(),
        });
    }

    pub fn cancel_response(&self, exchange_id: &ExchangeId) {
        let Some(response) = self.response(exchange_id) else {
            return;
        };
        response.cancel();
        self.notify(ChatChange::ResponseChanged {
            exchange_id: exchange_id.clone(),
        });
    }

    /// Whether the latest exchange is still being answered
    pub fn request_in_progress(&self) -> bool {
        self.state
            .read()
            .exchanges
            .last()
            .map(|e| !e.response.is_complete())
            .unwrap_or(false)
    }

    pub fn title(&self) -> String {
        let state = self.state.read();
        if let Some(title) = state.custom_title.as_ref().filter(|t| !t.is_empty()) {
            return title.clone();
        }
        let message = state
            .exchanges
            .iter()
            .find_map(|e| e.request.as_ref())
            .map(|r| r.message.as_str())
            .unwrap_or(DEFAULT_TITLE);
        default_title(message)
    }

    pub fn custom_title(&self) -> Option<String> {
        self.state.read().custom_title.clone()
    }

    pub fn set_custom_title(&self, title: impl Into<String>) {
        self.state.write().custom_title = Some(title.into());
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read();
        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            session_id: self.session_id.clone(),
            creation_date: self.created_at,
            last_message_date: state.last_message_date,
            custom_title: state.custom_title.clone(),
            requests: state.exchanges.iter().map(ExchangeSnapshot::capture).collect(),
        }
    }

    /// Rebuild a session; restored responses are complete
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let session_id = snapshot.session_id;
        let exchanges = snapshot
            .requests
            .into_iter()
            .map(|request| request.restore(&session_id))
            .collect();
        Self::with_state(
            session_id,
            snapshot.creation_date,
            snapshot.last_message_date,
            snapshot.custom_title,
            exchanges,
        )
    }

    fn notify(&self, change: ChatChange) {
        let _ = self.changes.send(change);
    }
}

fn default_title(message: &str) -> String {
    message
        .split('\n')
        .next()
        .unwrap_or_default()
        .chars()
        .take(TITLE_MAX_CHARS)
        .collect()
}

/// One exchange as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeSnapshot {
    pub exchange_id: ExchangeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub response: Vec<ResponsePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResponseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentInfo>,
    #[serde(default)]
    pub followups: Vec<Followup>,
    #[serde(default)]
    pub is_canceled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote: Option<Vote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_down_reason: Option<String>,
    #[serde(default)]
    pub content_references: Vec<ContentReference>,
    #[serde(default)]
    pub code_citations: Vec<CodeCitation>,
}

impl ExchangeSnapshot {
    fn capture(exchange: &Exchange) -> Self {
        let response = &exchange.response;
        Self {
            exchange_id: exchange.id.clone(),
            message: exchange.request.as_ref().map(|r| r.message.clone()),
            response: response.response().parts().to_vec(),
            result: response.result(),
            agent: response.agent(),
            followups: response.followups(),
            is_canceled: response.is_canceled(),
            vote: response.vote(),
            vote_down_reason: response.vote_down_reason(),
            content_references: response.content_references(),
            code_citations: response.code_citations(),
        }
    }

    fn restore(self, session_id: &SessionId) -> Exchange {
        let response = ResponseModel::with_response(
            session_id.clone(),
            self.exchange_id.clone(),
            Response::new(self.response),
        );
        for reference in self.content_references {
            response.apply_reference(reference);
        }
        for citation in self.code_citations {
            response.apply_code_citation(citation);
        }
        if let Some(agent) = self.agent {
            response.set_agent(agent);
        }
        if let Some(result) = self.result {
            response.set_result(result);
        }
        response.set_followups(self.followups);
        if let Some(vote) = self.vote {
            response.set_vote(vote);
        }
        response.set_vote_down_reason(self.vote_down_reason);
        if self.is_canceled {
            response.cancel();
        } else {
            response.complete();
        }

        Exchange {
            id: self.exchange_id,
            request: self.message.map(|message| ChatRequest {
                message,
                timestamp: Utc::now(),
            }),
            response: Arc::new(response),
        }
    }
}

/// Persisted session; older shapes are normalised on load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSessionSnapshot", rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub version: u32,
    pub session_id: SessionId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub creation_date: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_message_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_title: Option<String>,
    pub requests: Vec<ExchangeSnapshot>,
}

/// Any stored snapshot version
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSessionSnapshot {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    session_id: Option<SessionId>,
    #[serde(default)]
    creation_date: Option<i64>,
    #[serde(default)]
    last_message_date: Option<i64>,
    #[serde(default)]
    computed_title: Option<String>,
    #[serde(default)]
    custom_title: Option<String>,
    #[serde(default)]
    requests: Vec<ExchangeSnapshot>,
}

impl From<RawSessionSnapshot> for SessionSnapshot {
    fn from(raw: RawSessionSnapshot) -> Self {
        let year_ago = || Utc::now() - chrono::Duration::days(365);
        let from_millis = |ms: Option<i64>| {
            ms.filter(|ms| *ms > 0)
                .and_then(DateTime::from_timestamp_millis)
        };

        let session_id = raw
            .session_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| SessionId::new(uuid::Uuid::new_v4().to_string()));
        let creation_date = from_millis(raw.creation_date).unwrap_or_else(year_ago);

        let (last_message_date, custom_title) = match raw.version {
            None => (creation_date, None),
            Some(2) => (
                from_millis(raw.last_message_date).unwrap_or_else(year_ago),
                raw.computed_title,
            ),
            Some(_) => (
                from_millis(raw.last_message_date).unwrap_or_else(year_ago),
                raw.custom_title,
            ),
        };

        Self {
            version: SNAPSHOT_VERSION,
            session_id,
            creation_date,
            last_message_date,
            custom_title,
            requests: raw.requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Position, TextEdit};
    use std::path::PathBuf;

    fn step(index: usize, description: &str) -> PlanStep {
        PlanStep {
            index,
            is_last: false,
            title: format!("Step {}", index),
            description: description.to_string(),
            session_id: "s".into(),
        }
    }

    #[test]
    fn test_title_from_first_request() {
        let chat = ChatModel::new("s".into());
        assert_eq!(chat.title(), "Session");

        let long = format!("{}\nsecond line", "x".repeat(80));
        chat.add_request(long);
        chat.add_request("ignored");
        assert_eq!(chat.title(), "x".repeat(50));

        chat.set_custom_title("Refactor parser");
        assert_eq!(chat.title(), "Refactor parser");
    }

    #[test]
    fn test_request_in_progress() {
        let chat = ChatModel::new("s".into());
        assert!(!chat.request_in_progress());
        let (id, _) = chat.add_request("hi");
        assert!(chat.request_in_progress());
        chat.complete_response(&id);
        assert!(!chat.request_in_progress());
    }

    #[test]
    fn test_progress_dispatch_fires_events() {
        let chat = ChatModel::new("s".into());
        let mut rx = chat.subscribe();
        let response = chat.init_response("e1".into());
        assert_eq!(
            rx.try_recv().unwrap(),
            ChatChange::AddResponse {
                exchange_id: "e1".into()
            }
        );

        let id = ExchangeId::from("e1");
        chat.accept_response_progress(
            &id,
            ChatProgress::AgentDetection(AgentInfo {
                id: "editor".to_string(),
                name: "Editor".to_string(),
                command: None,
            }),
            false,
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ChatChange::SetAgent {
                exchange_id: id.clone(),
                agent_id: "editor".to_string()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ChatChange::ResponseChanged {
                exchange_id: id.clone()
            }
        );

        chat.accept_response_progress(
            &id,
            ChatProgress::CodeEdit(CodeEdit {
                path: PathBuf::from("/a.rs"),
                edits: vec![TextEdit::insert(Position::new(0, 0), "x")],
            }),
            false,
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ChatChange::CodeEdit {
                exchange_id: id.clone()
            }
        );
        assert!(response.has_edit_groups());
        assert_eq!(response.agent().unwrap().name, "Editor");
    }

    #[test]
    fn test_plan_created_lazily_and_cleared_after_edits() {
        let chat = ChatModel::new("s".into());
        let (id, _) = chat.add_request("plan it");
        assert!(chat.plan().is_none());

        chat.accept_response_progress(&id, ChatProgress::PlanStep(step(0, "")), false);
        chat.accept_response_progress(&id, ChatProgress::PlanStep(step(0, "do it")), false);
        let plan = chat.plan().unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.completed_steps(), 1);

        chat.accept_response_progress(
            &id,
            ChatProgress::CodeEdit(CodeEdit {
                path: PathBuf::from("/a.rs"),
                edits: vec![TextEdit::insert(Position::new(0, 0), "x")],
            }),
            false,
        );
        chat.complete_response(&id);
        assert!(chat.plan().is_none());
    }

    #[test]
    fn test_progress_for_unknown_exchange_refused() {
        let chat = ChatModel::new("s".into());
        assert!(!chat.accept_response_progress(
            &"nope".into(),
            ChatProgress::Content(ResponsePart::markdown("x")),
            false
        ));
    }

    #[test]
    fn test_snapshot_restores_session() {
        let chat = ChatModel::new("s1".into());
        let (id, response) = chat.add_request("Add a test");
        response.update_content(ResponsePart::markdown("Done."), false);
        response.set_vote(Vote::Up);
        chat.complete_response(&id);
        chat.set_custom_title("Tests");

        let json = serde_json::to_string(&chat.snapshot()).unwrap();
        let snapshot: SessionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot.version, 3);
        assert_eq!(snapshot.custom_title.as_deref(), Some("Tests"));

        let restored = ChatModel::from_snapshot(snapshot);
        assert_eq!(restored.session_id().as_str(), "s1");
        let response = restored.response(&id).unwrap();
        assert_eq!(response.repr(), "Done.");
        assert_eq!(response.vote(), Some(Vote::Up));
        assert!(response.is_complete());
        assert!(!restored.request_in_progress());
    }

    #[test]
    fn test_old_snapshot_shapes_normalised() {
        let v1 = r#"{"sessionId":"old","creationDate":1700000000000,"requests":[]}"#;
        let snapshot: SessionSnapshot = serde_json::from_str(v1).unwrap();
        assert_eq!(snapshot.version, 3);
        assert_eq!(snapshot.last_message_date, snapshot.creation_date);
        assert!(snapshot.custom_title.is_none());

        let v2 = r#"{"version":2,"sessionId":"old","creationDate":1700000000000,
            "lastMessageDate":1700000500000,"computedTitle":"Fix build","requests":[]}"#;
        let snapshot: SessionSnapshot = serde_json::from_str(v2).unwrap();
        assert_eq!(snapshot.custom_title.as_deref(), Some("Fix build"));
        assert_eq!(snapshot.last_message_date.timestamp_millis(), 1700000500000);

        let bare = r#"{"requests":[]}"#;
        let snapshot: SessionSnapshot = serde_json::from_str(bare).unwrap();
        assert!(!snapshot.session_id.is_empty());
        assert!(snapshot.creation_date < Utc::now());
    }
}
