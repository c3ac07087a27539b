//! Response content and the per-exchange response model
//!
//! `Response` is the ordered part list with its text representations.
//! `ResponseModel` wraps it with the exchange's auxiliary state (references,
//! citations, agent, result, votes) and broadcasts a change notification for
//! every visible mutation.

use std::collections::BTreeSet;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::parts::{
    AgentInfo, CodeCitation, CodeEdit, ContentReference, Followup, MarkdownText, ResponsePart,
    ResponseResult, TextEditGroup, Vote,
};
use crate::constants::model::{CHANGE_CHANNEL_CAPACITY, EDITS_SUMMARY};
use crate::types::{ExchangeId, SessionId};

/// Summary line for a set of code citations
pub fn code_citations_message(citations: &[CodeCitation]) -> String {
    if citations.is_empty() {
        return String::new();
    }
    let licenses: BTreeSet<&str> = citations.iter().map(|c| c.license.as_str()).collect();
    if licenses.len() == 1 {
        "Similar code found with 1 license type".to_string()
    } else {
        format!("Similar code found with {} license types", licenses.len())
    }
}

/// Ordered response parts plus derived text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    parts: Vec<ResponsePart>,
    #[serde(default)]
    citations: Vec<CodeCitation>,
    #[serde(skip)]
    repr: String,
    #[serde(skip)]
    markdown: String,
}

impl Response {
    pub fn new(parts: Vec<ResponsePart>) -> Self {
        let mut response = Self {
            parts,
            ..Default::default()
        };
        response.update_repr();
        response
    }

    pub fn parts(&self) -> &[ResponsePart] {
        &self.parts
    }

    /// Plain-text rendering used for copy and accessibility
    pub fn repr(&self) -> &str {
        &self.repr
    }

    /// Markdown and inline references only
    pub fn markdown(&self) -> &str {
        &self.markdown
    }

    pub fn citations(&self) -> &[CodeCitation] {
        &self.citations
    }

    pub fn clear(&mut self) {
        self.parts.clear();
        self.update_repr();
    }

    /// Add a part, coalescing markdown and merging edit groups by file
    pub fn update_content(&mut self, part: ResponsePart) {
        match part {
            ResponsePart::Markdown(markdown) => self.append_markdown(markdown),
            ResponsePart::TextEditGroup(group) => {
                self.merge_edit_group(group);
                self.update_repr();
            }
            other => {
                self.parts.push(other);
                self.update_repr();
            }
        }
    }

    /// Markdown deltas extend the text representations in place
    fn append_markdown(&mut self, markdown: MarkdownText) {
        // The citation summary trails the repr, so appending would misplace text
        let in_place = self.citations.is_empty();
        match self.parts.last_mut() {
            Some(ResponsePart::Markdown(last)) if last.can_merge(&markdown) => {
                let had_text = !last.value.is_empty();
                last.append(&markdown);
                if in_place && had_text {
                    self.repr.push_str(&markdown.value);
                    self.markdown.push_str(&markdown.value);
                    return;
                }
            }
            _ => {
                let value = markdown.value.clone();
                self.parts.push(ResponsePart::Markdown(markdown));
                if in_place {
                    Self::push_segment(&mut self.repr, &value);
                    Self::push_segment(&mut self.markdown, &value);
                    return;
                }
            }
        }
        self.update_repr();
    }

    fn push_segment(text: &mut String, segment: &str) {
        if segment.is_empty() {
            return;
        }
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(segment);
    }

    /// Record one applied batch under its file's edit group
    pub fn add_code_edit(&mut self, edit: CodeEdit) {
        if edit.edits.is_empty() {
            return;
        }
        self.merge_edit_group(TextEditGroup {
            path: edit.path,
            edits: vec![edit.edits],
            applied: None,
        });
        self.update_repr();
    }

    /// Replace a task's content once it resolves
    pub fn resolve_task(&mut self, task_id: u64, content: impl Into<String>) -> bool {
        let found = self.parts.iter_mut().find_map(|part| match part {
            ResponsePart::Task(task) if task.id == task_id => Some(task),
            _ => None,
        });
        let Some(task) = found else {
            return false;
        };
        task.content = content.into();
        task.resolved = true;
        self.update_repr();
        true
    }

    pub fn add_citation(&mut self, citation: CodeCitation) {
        self.citations.push(citation);
        self.update_repr();
    }

    pub fn edit_group_mut(&mut self, path: &Path) -> Option<&mut TextEditGroup> {
        self.parts.iter_mut().find_map(|part| match part {
            ResponsePart::TextEditGroup(group) if group.path == path => Some(group),
            _ => None,
        })
    }

    pub fn has_edit_groups(&self) -> bool {
        self.parts
            .iter()
            .any(|part| matches!(part, ResponsePart::TextEditGroup(_)))
    }

    fn merge_edit_group(&mut self, group: TextEditGroup) {
        if group.edits.iter().all(Vec::is_empty) {
            return;
        }
        match self.edit_group_mut(&group.path) {
            Some(existing) => existing.edits.extend(group.edits),
            None => self.parts.push(ResponsePart::TextEditGroup(group)),
        }
    }

    /// Rebuild the text representations; call after deserializing
    pub fn update_repr(&mut self) {
        let repr: Vec<String> = self
            .parts
            .iter()
            .map(|part| match part {
                ResponsePart::Markdown(markdown) => markdown.value.clone(),
                ResponsePart::InlineReference(reference) => reference.display_name(),
                ResponsePart::TextEditGroup(_) => EDITS_SUMMARY.to_string(),
                ResponsePart::PlanStep(step) => step.description.clone(),
                ResponsePart::Task(task) => task.content.clone(),
                ResponsePart::Warning(warning) => warning.content.clone(),
                ResponsePart::ProgressMessage(_) | ResponsePart::EditsInfo(_) => String::new(),
            })
            .filter(|s| !s.is_empty())
            .collect();
        self.repr = repr.join("\n\n");
        if !self.citations.is_empty() {
            self.repr.push_str("\n\n");
            self.repr.push_str(&code_citations_message(&self.citations));
        }

        let markdown: Vec<String> = self
            .parts
            .iter()
            .filter_map(|part| match part {
                ResponsePart::Markdown(markdown) => Some(markdown.value.clone()),
                ResponsePart::InlineReference(reference) => Some(reference.display_name()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect();
        self.markdown = markdown.join("\n\n");
    }
}

/// What changed on a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseChange {
    Content,
    Reference,
    Citation,
    Agent,
    Result,
    Followups,
    Vote,
    EditApplied,
    Completed,
    Canceled,
}

#[derive(Debug, Default)]
struct ResponseState {
    response: Response,
    content_references: Vec<ContentReference>,
    code_citations: Vec<CodeCitation>,
    agent: Option<AgentInfo>,
    result: Option<ResponseResult>,
    followups: Vec<Followup>,
    vote: Option<Vote>,
    vote_down_reason: Option<String>,
    is_complete: bool,
    is_canceled: bool,
}

/// Response side of one exchange
pub struct ResponseModel {
    session_id: SessionId,
    exchange_id: ExchangeId,
    state: RwLock<ResponseState>,
    changes: broadcast::Sender<ResponseChange>,
}

impl ResponseModel {
    pub fn new(session_id: SessionId, exchange_id: ExchangeId) -> Self {
        Self::with_response(session_id, exchange_id, Response::default())
    }

    pub fn with_response(session_id: SessionId, exchange_id: ExchangeId, response: Response) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            session_id,
            exchange_id,
            state: RwLock::new(ResponseState {
                response,
                ..Default::default()
            }),
            changes,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn exchange_id(&self) -> &ExchangeId {
        &self.exchange_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResponseChange> {
        self.changes.subscribe()
    }

    /// Snapshot of the current content
    pub fn response(&self) -> Response {
        self.state.read().response.clone()
    }

    pub fn repr(&self) -> String {
        self.state.read().response.repr().to_string()
    }

    pub fn markdown(&self) -> String {
        self.state.read().response.markdown().to_string()
    }

    pub fn content_references(&self) -> Vec<ContentReference> {
        self.state.read().content_references.clone()
    }

    pub fn code_citations(&self) -> Vec<CodeCitation> {
        self.state.read().code_citations.clone()
    }

    pub fn agent(&self) -> Option<AgentInfo> {
        self.state.read().agent.clone()
    }

    pub fn result(&self) -> Option<ResponseResult> {
        self.state.read().result.clone()
    }

    pub fn followups(&self) -> Vec<Followup> {
        self.state.read().followups.clone()
    }

    pub fn vote(&self) -> Option<Vote> {
        self.state.read().vote
    }

    pub fn vote_down_reason(&self) -> Option<String> {
        self.state.read().vote_down_reason.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.state.read().is_complete
    }

    pub fn is_canceled(&self) -> bool {
        self.state.read().is_canceled
    }

    /// Append or merge a content part
    ///
    /// Returns false, changing nothing, once the response is complete.
    pub fn update_content(&self, part: ResponsePart, quiet: bool) -> bool {
        {
            let mut state = self.state.write();
            if state.is_complete {
                warn!(
                    "Ignoring content for completed response {}-{}",
                    self.session_id, self.exchange_id
                );
                return false;
            }
            state.response.update_content(part);
        }
        if !quiet {
            self.notify(ResponseChange::Content);
        }
        true
    }

    /// Record an applied edit batch under its file's edit group
    pub fn apply_code_edit(&self, edit: CodeEdit) -> bool {
        {
            let mut state = self.state.write();
            if state.is_complete {
                warn!(
                    "Ignoring code edit for completed response {}-{}",
                    self.session_id, self.exchange_id
                );
                return false;
            }
            state.response.add_code_edit(edit);
        }
        self.notify(ResponseChange::Content);
        true
    }

    pub fn resolve_task(&self, task_id: u64, content: impl Into<String>) -> bool {
        let resolved = self.state.write().response.resolve_task(task_id, content);
        if resolved {
            self.notify(ResponseChange::Content);
        }
        resolved
    }

    pub fn apply_reference(&self, reference: ContentReference) {
        self.state.write().content_references.push(reference);
        self.notify(ResponseChange::Reference);
    }

    pub fn apply_code_citation(&self, citation: CodeCitation) {
        {
            let mut state = self.state.write();
            state.code_citations.push(citation.clone());
            state.response.add_citation(citation);
        }
        self.notify(ResponseChange::Citation);
    }

    pub fn set_agent(&self, agent: AgentInfo) {
        self.state.write().agent = Some(agent);
        self.notify(ResponseChange::Agent);
    }

    pub fn set_result(&self, result: ResponseResult) {
        self.state.write().result = Some(result);
        self.notify(ResponseChange::Result);
    }

    pub fn set_followups(&self, followups: Vec<Followup>) {
        self.state.write().followups = followups;
        self.notify(ResponseChange::Followups);
    }

    pub fn set_vote(&self, vote: Vote) {
        self.state.write().vote = Some(vote);
        self.notify(ResponseChange::Vote);
    }

    pub fn set_vote_down_reason(&self, reason: Option<String>) {
        self.state.write().vote_down_reason = reason;
        self.notify(ResponseChange::Vote);
    }

    /// Record how many edits of a file's group were applied
    pub fn set_edit_applied(&self, path: &Path, count: usize) -> bool {
        let updated = match self.state.write().response.edit_group_mut(path) {
            Some(group) => {
                group.applied = Some(count);
                true
            }
            None => false,
        };
        if updated {
            self.notify(ResponseChange::EditApplied);
        }
        updated
    }

    /// Mark complete; a redacted result drops the content
    pub fn complete(&self) {
        {
            let mut state = self.state.write();
            if state.is_complete {
                return;
            }
            let redacted = state
                .result
                .as_ref()
                .map(|r| r.response_is_redacted)
                .unwrap_or(false);
            if redacted {
                state.response.clear();
            }
            state.is_complete = true;
        }
        debug!("Response {}-{} complete", self.session_id, self.exchange_id);
        self.notify(ResponseChange::Completed);
    }

    pub fn cancel(&self) {
        {
            let mut state = self.state.write();
            if state.is_complete {
                return;
            }
            state.is_complete = true;
            state.is_canceled = true;
        }
        debug!("Response {}-{} canceled", self.session_id, self.exchange_id);
        self.notify(ResponseChange::Canceled);
    }

    pub fn has_edit_groups(&self) -> bool {
        self.state.read().response.has_edit_groups()
    }

    fn notify(&self, change: ResponseChange) {
        // No subscribers is fine
        let _ = self.changes.send(change);
    }
}
