//! Event router
//!
//! Consumes the engine's event stream and turns each event into sink
//! updates or edit operations. Events for one exchange are handled in the
//! order they arrive; a missing sink drops the event with a log line.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::edit::{EditCoordinator, EditOutcome, EditStart};
use crate::events::{
    parse_event, AgentEvent, ChatMessageEvent, EditStreamEvent, EditedCodeStreamingRequest,
    ExchangeEvent, FrameworkEvent, PlanEvent, SymbolEditEvent, SymbolEventSubStep, SymbolSubStep,
    UiEvent, UiEventKind,
};
use crate::model::{ContentReference, EditsInfo, EditsState, PlanStep};
use crate::stream::{CloseReason, ResponseSink, ResponseStreamRegistry};
use crate::types::{SessionId, StreamKey};

/// What happened to one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Reached a sink or the edit machinery
    Delivered,
    /// Control or informational event with nothing to deliver
    Ignored,
    /// No sink for the exchange, or the exchange was cancelled
    Dropped,
}

/// Counters for one `consume` run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteStats {
    pub delivered: usize,
    pub ignored: usize,
    pub dropped: usize,
    pub malformed: usize,
    pub cancelled: bool,
}

impl RouteStats {
    fn record(&mut self, routing: Routing) {
        match routing {
            Routing::Delivered => self.delivered += 1,
            Routing::Ignored => self.ignored += 1,
            Routing::Dropped => self.dropped += 1,
        }
    }
}

pub struct EventRouter {
    registry: Arc<ResponseStreamRegistry>,
    edits: Arc<EditCoordinator>,
    config: RouterConfig,
    /// Cancellation scope of every exchange seen so far
    exchanges: DashMap<StreamKey, CancellationToken>,
}

impl EventRouter {
    pub fn new(
        registry: Arc<ResponseStreamRegistry>,
        edits: Arc<EditCoordinator>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            edits,
            config,
            exchanges: DashMap::new(),
        }
    }

    /// Token scoping one exchange, created as a child of `parent`
    pub fn exchange_token(&self, key: &StreamKey, parent: &CancellationToken) -> CancellationToken {
        self.exchanges
            .entry(key.clone())
            .or_insert_with(|| parent.child_token())
            .clone()
    }

    /// Cancel an exchange: stop its edits, close its sink as canceled
    ///
    /// The exchange's scope is forgotten afterwards, so a sink registered
    /// again under the same key starts from a fresh token.
    pub async fn cancel_exchange(&self, key: &StreamKey) -> bool {
        let token = self.exchanges.get(key).map(|t| t.clone());
        if let Some(token) = &token {
            token.cancel();
        }
        let abandoned = self.edits.abandon_exchange(key).await;
        if let Some(token) = &token {
            self.exchanges.remove_if(key, |_, current| current.is_cancelled());
        }
        let sink = self.registry.release(key);
        if let Some(sink) = &sink {
            sink.close(CloseReason::Canceled);
        }
        let cancelled = token.is_some() || sink.is_some() || abandoned > 0;
        if cancelled {
            info!(
                "Cancelled exchange {} ({} edit requests abandoned)",
                key, abandoned
            );
        }
        cancelled
    }

    /// Cancel every exchange of a session and abandon its edit requests
    pub async fn cancel_session(&self, session_id: &SessionId) -> usize {
        let keys: BTreeSet<StreamKey> = self
            .exchanges
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| &key.session_id == session_id)
            .chain(self.registry.keys_for_session(session_id))
            .collect();
        let mut cancelled = 0;
        for key in &keys {
            if self.cancel_exchange(key).await {
                cancelled += 1;
            }
        }
        // Requests started outside any routed exchange
        self.edits.abandon_session(session_id).await;
        cancelled
    }

    /// Number of exchanges with a live cancellation scope
    pub fn tracked_exchanges(&self) -> usize {
        self.exchanges.len()
    }

    /// Route one event
    pub async fn route_event(&self, event: &AgentEvent, cancel: &CancellationToken) -> Routing {
        let ui = match event {
            AgentEvent::KeepAlive { .. } => return Routing::Ignored,
            AgentEvent::SessionStarted { session_id, .. } => {
                debug!("Engine session started: {}", session_id);
                return Routing::Ignored;
            }
            AgentEvent::Done { .. } => return Routing::Ignored,
            AgentEvent::Ui(ui) => ui,
        };

        let key = ui.key();
        let finished = matches!(
            &ui.event,
            UiEventKind::ExchangeEvent(ExchangeEvent::FinishedExchange(_))
        );
        let token = self.exchange_token(&key, cancel);
        // Finishing always runs so the exchange's scope is cleaned up
        if token.is_cancelled() && !finished {
            debug!("Dropping {} for cancelled exchange {}", ui.event.name(), key);
            return Routing::Dropped;
        }

        match &ui.event {
            UiEventKind::ChatEvent(chat) => self.route_chat(&key, chat),
            UiEventKind::ExchangeEvent(ExchangeEvent::FinishedExchange(_)) => {
                self.finish_exchange(&key)
            }
            UiEventKind::PlanEvent(plan) => self.route_plan(&key, plan),
            UiEventKind::FrameworkEvent(framework) => self.route_framework(&key, framework),
            UiEventKind::SymbolEventSubStep(sub_step) => {
                self.route_symbol_sub_step(ui, sub_step, &token).await
            }
            UiEventKind::SymbolEvent(_)
            | UiEventKind::ToolEvent(_)
            | UiEventKind::CodebaseEvent(_)
            | UiEventKind::SymbolLocationUpdate(_)
            | UiEventKind::RequestEvent(_) => {
                debug!("Passing over {} for {}", ui.event.name(), key);
                Routing::Ignored
            }
            UiEventKind::EditRequestFinished(id) => {
                debug!("Engine finished edit request {} for {}", id, key);
                Routing::Ignored
            }
        }
    }

    fn sink(&self, key: &StreamKey, what: &str) -> Option<Arc<dyn ResponseSink>> {
        let sink = self.registry.lookup(key);
        if sink.is_none() {
            warn!("No response stream for {} ({})", key, what);
        }
        sink
    }

    fn route_chat(&self, key: &StreamKey, chat: &ChatMessageEvent) -> Routing {
        let Some(sink) = self.sink(key, "ChatEvent") else {
            return Routing::Dropped;
        };
        if chat.answer_up_until_now.is_empty() && self.config.edits_placeholder {
            sink.edits_info(EditsInfo {
                state: EditsState::Loading,
                is_stale: false,
                files: Vec::new(),
                description: self.config.placeholder_description.clone(),
                session_id: key.session_id.clone(),
                exchange_id: key.exchange_id.clone(),
            });
        }
        if let Some(delta) = &chat.delta {
            sink.markdown(delta);
        }
        Routing::Delivered
    }

    /// Close the exchange's sink as finished and forget its scope
    pub fn finish_exchange(&self, key: &StreamKey) -> Routing {
        self.exchanges.remove(key);
        match self.registry.release(key) {
            Some(sink) => {
                sink.close(CloseReason::Finished);
                Routing::Delivered
            }
            None => {
                debug!("Finished exchange {} had no response stream", key);
                Routing::Dropped
            }
        }
    }

    fn route_plan(&self, key: &StreamKey, plan: &PlanEvent) -> Routing {
        let Some(sink) = self.sink(key, "PlanEvent") else {
            return Routing::Dropped;
        };
        let step = match plan {
            PlanEvent::PlanStepTitleAdded(added) => PlanStep {
                index: added.index,
                is_last: false,
                title: added.title.clone(),
                description: String::new(),
                session_id: key.session_id.clone(),
            },
            PlanEvent::PlanStepCompleteAdded(complete) => PlanStep {
                index: complete.index,
                is_last: false,
                title: complete.title.clone(),
                description: complete.description.clone(),
                session_id: key.session_id.clone(),
            },
        };
        sink.step(step);
        Routing::Delivered
    }

    fn route_framework(&self, key: &StreamKey, event: &FrameworkEvent) -> Routing {
        let delivery = match event {
            FrameworkEvent::OpenFile(open) => {
                Some(Delivery::Reference(ContentReference::file(&open.fs_file_path)))
            }
            FrameworkEvent::ReferenceFound(found) => {
                Some(Delivery::Reference(ContentReference::file(&found.fs_file_path)))
            }
            FrameworkEvent::RelevantReference(relevant) => Some(Delivery::Reference(
                ContentReference::named(&relevant.fs_file_path, relevant.symbol_name.as_str()),
            )),
            FrameworkEvent::RepoMapGenerationStart(_) => {
                Some(Delivery::Progress("Generating repository map"))
            }
            FrameworkEvent::RepoMapGenerationFinished(_) => {
                Some(Delivery::Progress("Repository map ready"))
            }
            FrameworkEvent::LongContextSearchStart(_) => {
                Some(Delivery::Progress("Searching long context"))
            }
            FrameworkEvent::LongContextSearchFinished(_) => {
                Some(Delivery::Progress("Long context search finished"))
            }
            FrameworkEvent::GroupedReferences(groups) => {
                debug!("{} reference groups for {}", groups.len(), key);
                None
            }
            FrameworkEvent::InitialSearchSymbols(symbols) => {
                debug!("{} initial search symbols for {}", symbols.symbols.len(), key);
                None
            }
            FrameworkEvent::AgenticTopLevelThinking(thinking) => {
                debug!("Top-level thinking for {}: {}", key, thinking);
                None
            }
            FrameworkEvent::CodeIterationFinished(_)
            | FrameworkEvent::SearchIteration(_)
            | FrameworkEvent::AgenticSymbolLevelThinking(_) => None,
        };

        let Some(delivery) = delivery else {
            return Routing::Ignored;
        };
        let Some(sink) = self.sink(key, "FrameworkEvent") else {
            return Routing::Dropped;
        };
        match delivery {
            Delivery::Reference(reference) => sink.reference(reference),
            Delivery::Progress(message) => sink.progress(message),
        }
        Routing::Delivered
    }

    async fn route_symbol_sub_step(
        &self,
        ui: &UiEvent,
        sub_step: &SymbolEventSubStep,
        token: &CancellationToken,
    ) -> Routing {
        let key = ui.key();
        let edit = match &sub_step.event {
            SymbolSubStep::Edit(edit) => edit,
            SymbolSubStep::GoToDefinition(definition) => {
                debug!(
                    "{} goes to definition in {}",
                    sub_step.symbol_identifier.symbol_name, definition.fs_file_path
                );
                return Routing::Ignored;
            }
            SymbolSubStep::Probe(_) => return Routing::Ignored,
        };

        match edit {
            SymbolEditEvent::EditCodeStreaming(request) => {
                let mut request = request.clone();
                if request.session_id.is_empty() {
                    request.session_id = key.session_id.clone();
                }
                if request.exchange_id.is_empty() {
                    request.exchange_id = key.exchange_id.clone();
                }
                let outcome = self.dispatch_edit_stream(&request, token).await;
                if outcome.success {
                    Routing::Delivered
                } else {
                    Routing::Dropped
                }
            }
            SymbolEditEvent::EditCode(edited) => {
                let sink = self.sink(&key, "EditCode");
                let outcome = self
                    .edits
                    .apply_direct(
                        &PathBuf::from(&edited.fs_file_path),
                        &edited.range,
                        &edited.new_code,
                        sink,
                    )
                    .await;
                if outcome.success {
                    Routing::Delivered
                } else {
                    Routing::Dropped
                }
            }
            SymbolEditEvent::RangeSelectionForEdit(_)
            | SymbolEditEvent::InsertCode(_)
            | SymbolEditEvent::CodeCorrectionTool(_)
            | SymbolEditEvent::ThinkingForEdit(_) => Routing::Ignored,
        }
    }

    /// Hand one Start/Delta/End message to the edit coordinator
    ///
    /// Start needs a registered sink unless the request applies directly.
    pub async fn dispatch_edit_stream(
        &self,
        request: &EditedCodeStreamingRequest,
        cancel: &CancellationToken,
    ) -> EditOutcome {
        match &request.event {
            EditStreamEvent::Start => {
                let key = request.key();
                let sink = self.registry.lookup(&key);
                if sink.is_none() && !request.apply_directly {
                    warn!(
                        "Edit request {} has no response stream for {}",
                        request.edit_request_id, key
                    );
                    return EditOutcome::rejected();
                }
                let token = self.exchange_token(&key, cancel);
                self.edits
                    .begin(EditStart {
                        request_id: request.edit_request_id.clone(),
                        key,
                        path: PathBuf::from(&request.fs_file_path),
                        range: request.range,
                        apply_directly: request.apply_directly,
                        sink,
                        cancel: token.child_token(),
                    })
                    .await
            }
            EditStreamEvent::Delta(fragment) => {
                self.edits.feed(&request.edit_request_id, fragment).await
            }
            EditStreamEvent::End => self.edits.end(&request.edit_request_id).await,
        }
    }

    /// Consume a line-delimited event stream until it ends or `cancel` fires
    ///
    /// Malformed lines are skipped. On cancellation every exchange seen in
    /// this run is cancelled.
    pub async fn consume<S>(&self, mut lines: S, cancel: &CancellationToken) -> RouteStats
    where
        S: Stream<Item = String> + Unpin,
    {
        let mut stats = RouteStats::default();
        let mut seen: HashSet<StreamKey> = HashSet::new();

        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    stats.cancelled = true;
                    break;
                }
                line = lines.next() => match line {
                    Some(line) => line,
                    None => break,
                },
            };

            if line.trim().is_empty() {
                continue;
            }
            let event = match parse_event(&line) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Skipping malformed event: {}", e);
                    stats.malformed += 1;
                    continue;
                }
            };
            if let AgentEvent::Ui(ui) = &event {
                seen.insert(ui.key());
            }
            let routing = self.route_event(&event, cancel).await;
            stats.record(routing);
        }

        if stats.cancelled {
            for key in &seen {
                self.cancel_exchange(key).await;
            }
        }
        info!(
            "Event stream ended: {} delivered, {} ignored, {} dropped, {} malformed",
            stats.delivered, stats.ignored, stats.dropped, stats.malformed
        );
        stats
    }
}

enum Delivery {
    Reference(ContentReference),
    Progress(&'static str),
}
