//! Response pipeline
//!
//! Wires the registry, the edit coordinator, the router and the session
//! manager together behind one control surface. Hosts either push events
//! one at a time or hand over the whole event stream.

use std::path::PathBuf;
use std::sync::Arc;

use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::document::DocumentHost;
use crate::edit::{EditCoordinator, EditOutcome};
use crate::error::PipelineError;
use crate::events::{AgentEvent, ApplyEditsRequest, EditStreamEvent, EditedCodeStreamingRequest};
use crate::router::{EventRouter, RouteStats, Routing};
use crate::session::SessionManager;
use crate::stream::{CloseReason, ResponseSink, ResponseStreamRegistry};
use crate::types::{EditRequestId, SessionId, StreamKey};

pub struct ResponsePipeline {
    config: PipelineConfig,
    registry: Arc<ResponseStreamRegistry>,
    edits: Arc<EditCoordinator>,
    router: EventRouter,
    sessions: SessionManager,
    shutdown: CancellationToken,
}

impl ResponsePipeline {
    pub fn new(host: Arc<dyn DocumentHost>, config: PipelineConfig) -> Self {
        let registry = Arc::new(ResponseStreamRegistry::new(config.registry.policy));
        let edits = Arc::new(EditCoordinator::new(host, config.edits.clone()));
        let router = EventRouter::new(
            Arc::clone(&registry),
            Arc::clone(&edits),
            config.router.clone(),
        );
        let sessions = SessionManager::new(Arc::clone(&registry));
        info!(
            "Response pipeline ready (registration policy {:?})",
            config.registry.policy
        );
        Self {
            config,
            registry,
            edits,
            router,
            sessions,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ResponseStreamRegistry> {
        &self.registry
    }

    pub fn edits(&self) -> &Arc<EditCoordinator> {
        &self.edits
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Token cancelled by `shutdown`; parent of every exchange scope
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Register the sink for an exchange
    pub fn register_sink(
        &self,
        key: StreamKey,
        sink: Arc<dyn ResponseSink>,
    ) -> Result<(), PipelineError> {
        if let Some(previous) = self.registry.register(key, sink)? {
            debug!("Superseded sink for {}", previous.key());
        }
        Ok(())
    }

    pub async fn route_event(&self, event: &AgentEvent) -> Routing {
        self.router.route_event(event, &self.shutdown).await
    }

    /// Consume a line-delimited event stream until it ends or the pipeline shuts down
    pub async fn consume<S>(&self, lines: S) -> RouteStats
    where
        S: Stream<Item = String> + Unpin,
    {
        self.router.consume(lines, &self.shutdown).await
    }

    /// Start a streamed edit request
    pub async fn begin_edit_request(&self, request: &EditedCodeStreamingRequest) -> EditOutcome {
        let start = EditedCodeStreamingRequest {
            event: EditStreamEvent::Start,
            ..request.clone()
        };
        self.router.dispatch_edit_stream(&start, &self.shutdown).await
    }

    pub async fn feed_edit_delta(&self, id: &EditRequestId, fragment: &str) -> EditOutcome {
        self.edits.feed(id, fragment).await
    }

    pub async fn end_edit_request(&self, id: &EditRequestId) -> EditOutcome {
        self.edits.end(id).await
    }

    /// Handle one Start/Delta/End message of a streamed edit
    pub async fn provide_edit_streamed(&self, request: &EditedCodeStreamingRequest) -> EditOutcome {
        self.router.dispatch_edit_stream(request, &self.shutdown).await
    }

    /// Apply complete new content for a range
    ///
    /// Applied edits are echoed to the exchange's sink when `key` has one.
    pub async fn provide_edit(
        &self,
        request: &ApplyEditsRequest,
        key: Option<&StreamKey>,
    ) -> EditOutcome {
        let sink = key.and_then(|key| self.registry.lookup(key));
        self.edits
            .apply_direct(
                &PathBuf::from(&request.fs_file_path),
                &request.selected_range,
                &request.edited_content,
                sink,
            )
            .await
    }

    /// Cancel one exchange
    pub async fn cancel_exchange(&self, key: &StreamKey) -> bool {
        self.router.cancel_exchange(key).await
    }

    /// Close an exchange from the host side
    ///
    /// Releases the sink before closing it; returns whether an open sink was found.
    pub async fn close_exchange(&self, key: &StreamKey, reason: CloseReason) -> bool {
        match reason {
            CloseReason::Finished => self.router.finish_exchange(key) == Routing::Delivered,
            CloseReason::Canceled => self.router.cancel_exchange(key).await,
        }
    }

    /// Remove a session: cancel its exchanges, abandon its edits, drop its model
    pub async fn remove_session(&self, session_id: &SessionId) -> bool {
        let cancelled = self.router.cancel_session(session_id).await;
        debug!("Cancelled {} exchanges of session {}", cancelled, session_id);
        self.sessions.remove_session(session_id).is_some()
    }

    /// Stop consuming and cancel every exchange in flight
    pub fn shutdown(&self) {
        info!("Shutting down response pipeline");
        self.shutdown.cancel();
    }
}
