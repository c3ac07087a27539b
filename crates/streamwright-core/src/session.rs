//! Chat session management
//!
//! Each session owns a `ChatModel` and a cancellation token scoped to it.
//! Opening an exchange creates its response in the model and registers an
//! `ExchangeSink` that mirrors every sink update into that response.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::PipelineError;
use crate::model::{ChatModel, ChatProgress, ResponsePart, SessionSnapshot};
use crate::stream::{CloseReason, ResponseSink, ResponseStreamRegistry, SinkMessage, SinkUpdate};
use crate::types::{ExchangeId, SessionId, StreamKey};

/// State for a single chat session
pub struct Session {
    pub id: SessionId,
    pub model: Arc<ChatModel>,
    cancel: CancellationToken,
}

impl Session {
    fn new(id: SessionId, model: ChatModel) -> Self {
        debug!("Creating session {}", id);
        Self {
            id,
            model: Arc::new(model),
            cancel: CancellationToken::new(),
        }
    }

    /// Token cancelled when the session goes away
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        debug!("Cancelling session {}", self.id);
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Sink that records updates in the session's chat model and forwards them
pub struct ExchangeSink {
    key: StreamKey,
    model: Arc<ChatModel>,
    tx: mpsc::UnboundedSender<SinkMessage>,
    closed: AtomicBool,
}

impl ExchangeSink {
    pub fn new(key: StreamKey, model: Arc<ChatModel>, tx: mpsc::UnboundedSender<SinkMessage>) -> Self {
        Self {
            key,
            model,
            tx,
            closed: AtomicBool::new(false),
        }
    }

    fn record(&self, update: &SinkUpdate) {
        let progress = match update {
            SinkUpdate::Markdown(text) => ChatProgress::Content(ResponsePart::markdown(text.as_str())),
            SinkUpdate::Reference(reference) => ChatProgress::Reference(reference.clone()),
            SinkUpdate::Progress(message) => {
                ChatProgress::Content(ResponsePart::progress(message.as_str()))
            }
            SinkUpdate::Step(step) => ChatProgress::PlanStep(step.clone()),
            SinkUpdate::EditsInfo(info) => ChatProgress::Content(ResponsePart::EditsInfo(info.clone())),
            SinkUpdate::CodeEdit(edit) => ChatProgress::CodeEdit(edit.clone()),
            SinkUpdate::Warning(message) => {
                ChatProgress::Content(ResponsePart::warning(message.as_str()))
            }
            SinkUpdate::Closed(_) => return,
        };
        self.model
            .accept_response_progress(&self.key.exchange_id, progress, false);
    }

    fn forward(&self, update: SinkUpdate) {
        let message = SinkMessage {
            key: self.key.clone(),
            update,
        };
        if let Err(e) = self.tx.send(message) {
            debug!("No listener for {}: {}", self.key, e);
        }
    }
}

impl ResponseSink for ExchangeSink {
    fn key(&self) -> &StreamKey {
        &self.key
    }

    fn send(&self, update: SinkUpdate) {
        if self.is_closed() {
            debug!("Dropping {} update for closed exchange {}", update.kind(), self.key);
            return;
        }
        self.record(&update);
        self.forward(update);
    }

    fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match reason {
            CloseReason::Finished => self.model.complete_response(&self.key.exchange_id),
            CloseReason::Canceled => self.model.cancel_response(&self.key.exchange_id),
        }
        self.forward(SinkUpdate::Closed(reason));
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Manager for all chat sessions
pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<Session>>,
    registry: Arc<ResponseStreamRegistry>,
}

impl SessionManager {
    pub fn new(registry: Arc<ResponseStreamRegistry>) -> Self {
        Self {
            sessions: DashMap::new(),
            registry,
        }
    }

    /// Create a session, generating an id when none is given
    pub fn create_session(&self, id: Option<SessionId>) -> Arc<Session> {
        let id = id.unwrap_or_else(|| SessionId::new(uuid::Uuid::new_v4().to_string()));
        let session = Arc::new(Session::new(id.clone(), ChatModel::new(id.clone())));

        info!("Created new session: {}", id);
        self.sessions.insert(id, Arc::clone(&session));
        session
    }

    /// Resume a session from a snapshot
    pub fn restore_session(&self, snapshot: SessionSnapshot) -> Arc<Session> {
        let model = ChatModel::from_snapshot(snapshot);
        let id = model.session_id().clone();
        let session = Arc::new(Session::new(id.clone(), model));

        info!("Restored session: {}", id);
        self.sessions.insert(id, Arc::clone(&session));
        session
    }

    pub fn get_session(&self, id: &SessionId) -> Result<Arc<Session>, PipelineError> {
        self.sessions
            .get(id)
            .map(|s| Arc::clone(&s))
            .ok_or_else(|| PipelineError::SessionNotFound(id.clone()))
    }

    pub fn has_session(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Remove a session, cancelling it and closing its open exchanges
    ///
    /// Edit requests are owned by the pipeline; `ResponsePipeline::remove_session`
    /// abandons them before calling this.
    pub fn remove_session(&self, id: &SessionId) -> Option<Arc<Session>> {
        info!("Removing session: {}", id);
        let (_, session) = self.sessions.remove(id)?;
        session.cancel();
        for key in self.registry.keys_for_session(id) {
            if let Some(sink) = self.registry.release(&key) {
                sink.close(CloseReason::Canceled);
            }
        }
        Some(session)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Open a new exchange with a generated id
    pub fn new_exchange(
        &self,
        session_id: &SessionId,
    ) -> Result<(ExchangeId, mpsc::UnboundedReceiver<SinkMessage>), PipelineError> {
        let exchange_id = ExchangeId::generate();
        let rx = self.open_exchange(session_id, exchange_id.clone())?;
        Ok((exchange_id, rx))
    }

    /// Open an exchange the agent announced, registering its sink
    pub fn open_exchange(
        &self,
        session_id: &SessionId,
        exchange_id: ExchangeId,
    ) -> Result<mpsc::UnboundedReceiver<SinkMessage>, PipelineError> {
        let session = self.get_session(session_id)?;
        session.model.init_response(exchange_id.clone());

        let key = StreamKey::new(session_id.clone(), exchange_id);
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(ExchangeSink::new(key.clone(), Arc::clone(&session.model), tx));
        if let Some(previous) = self.registry.register(key.clone(), sink)? {
            // Resumed: the old writer is superseded
            debug!("Superseded sink for {}", previous.key());
        }
        debug!("Opened exchange {}", key);
        Ok(rx)
    }

    pub fn snapshot(&self, session_id: &SessionId) -> Result<SessionSnapshot, PipelineError> {
        let session = self.get_session(session_id)?;
        Ok(session.model.snapshot())
    }

    /// Serialize a session snapshot to JSON
    pub fn export_session(&self, session_id: &SessionId) -> Result<String, PipelineError> {
        let snapshot = self.snapshot(session_id)?;
        serde_json::to_string(&snapshot).map_err(|e| {
            error!("Failed to serialize session {}: {}", session_id, e);
            PipelineError::Serialization(e)
        })
    }

    pub fn import_session(&self, json: &str) -> Result<Arc<Session>, PipelineError> {
        let snapshot: SessionSnapshot = serde_json::from_str(json)?;
        Ok(self.restore_session(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CodeEdit, Vote};
    use crate::document::{Position, TextEdit};
    use std::path::PathBuf;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(ResponseStreamRegistry::default()))
    }

    #[test]
    fn test_session_lookup() {
        let manager = manager();
        let session = manager.create_session(None);
        let id = session.id.clone();

        assert!(manager.has_session(&id));
        assert!(manager.get_session(&id).is_ok());

        let fake = SessionId::from("nonexistent");
        assert!(!manager.has_session(&fake));
        assert!(matches!(
            manager.get_session(&fake),
            Err(PipelineError::SessionNotFound(_))
        ));
        assert_eq!(manager.session_count(), 1);
    }

    #[test]
    fn test_exchange_sink_records_into_model() {
        let manager = manager();
        let session = manager.create_session(Some("s1".into()));
        let (exchange_id, mut rx) = manager.new_exchange(&session.id).unwrap();
        let key = StreamKey::new("s1", exchange_id.clone());
        let sink = manager.registry.lookup(&key).unwrap();

        sink.markdown("Hello, ");
        sink.markdown("world");
        sink.code_edit(CodeEdit {
            path: PathBuf::from("/a.rs"),
            edits: vec![TextEdit::insert(Position::new(0, 0), "x")],
        });
        sink.close(CloseReason::Finished);

        let response = session.model.response(&exchange_id).unwrap();
        assert_eq!(response.repr(), "Hello, world\n\nMade changes.");
        assert!(response.is_complete());

        let mut kinds = Vec::new();
        while let Ok(message) = rx.try_recv() {
            assert_eq!(message.key, key);
            kinds.push(message.update.kind());
        }
        assert_eq!(kinds, vec!["markdown", "markdown", "code_edit", "closed"]);
    }

    #[test]
    fn test_canceled_close_cancels_response() {
        let manager = manager();
        let session = manager.create_session(Some("s1".into()));
        let (exchange_id, _rx) = manager.new_exchange(&session.id).unwrap();
        let sink = manager
            .registry
            .lookup(&StreamKey::new("s1", exchange_id.clone()))
            .unwrap();
        sink.close(CloseReason::Canceled);
        assert!(session.model.response(&exchange_id).unwrap().is_canceled());
    }

    #[test]
    fn test_new_exchange_requires_session() {
        let manager = manager();
        assert!(manager.new_exchange(&"ghost".into()).is_err());
    }

    #[test]
    fn test_remove_session_closes_exchanges() {
        let manager = manager();
        let session = manager.create_session(Some("s1".into()));
        let (exchange_id, _rx) = manager.new_exchange(&session.id).unwrap();

        let removed = manager.remove_session(&session.id).unwrap();
        assert!(removed.is_cancelled());
        assert!(manager.registry.is_empty());
        assert!(session.model.response(&exchange_id).unwrap().is_canceled());
        assert!(manager.remove_session(&session.id).is_none());
    }

    #[test]
    fn test_export_and_import() {
        let manager = manager();
        let session = manager.create_session(Some("s1".into()));
        let (id, response) = session.model.add_request("Explain this");
        response.update_content(ResponsePart::markdown("It parses."), false);
        response.set_vote(Vote::Down);
        session.model.complete_response(&id);

        let json = manager.export_session(&session.id).unwrap();
        manager.remove_session(&session.id);

        let restored = manager.import_session(&json).unwrap();
        assert_eq!(restored.id.as_str(), "s1");
        assert_eq!(restored.model.title(), "Explain this");
        let response = restored.model.response(&id).unwrap();
        assert_eq!(response.repr(), "It parses.");
        assert_eq!(response.vote(), Some(Vote::Down));
    }
}
