//! Edit request lifecycle
//!
//! Each streamed edit request is a small state machine keyed by its id:
//! Start opens the document and takes its writer lease, Deltas feed the line
//! accumulator, End drains it, shrinks the region and saves. A request that
//! fails or is cancelled is aborted and its lease released. Lines of one
//! request are applied strictly in order behind the request's own lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::accumulator::LineAccumulator;
use super::applier::{apply_whole_content, StreamProcessor};
use crate::config::EditConfig;
use crate::constants::edits::DIRECT_LEASE_PREFIX;
use crate::document::{DocumentHost, Range};
use crate::error::EditError;
use crate::model::CodeEdit;
use crate::stream::ResponseSink;
use crate::types::{EditRequestId, SessionId, StreamKey};

/// Acknowledgement returned to whoever issued the edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOutcome {
    pub fs_file_path: String,
    pub success: bool,
}

impl EditOutcome {
    pub fn success(path: &Path) -> Self {
        Self {
            fs_file_path: path.display().to_string(),
            success: true,
        }
    }

    pub fn failure(path: &Path) -> Self {
        Self {
            fs_file_path: path.display().to_string(),
            success: false,
        }
    }

    /// Failure with no file attached
    pub fn rejected() -> Self {
        Self {
            fs_file_path: String::new(),
            success: false,
        }
    }
}

/// Lifecycle phase of one edit request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Streaming,
    Ended,
    Aborted,
}

/// Everything needed to open an edit request
pub struct EditStart {
    pub request_id: EditRequestId,
    pub key: StreamKey,
    pub path: PathBuf,
    pub range: Range,
    pub apply_directly: bool,
    pub sink: Option<Arc<dyn ResponseSink>>,
    pub cancel: CancellationToken,
}

struct EditRequest {
    accumulator: LineAccumulator,
    processor: StreamProcessor,
    phase: RequestPhase,
}

struct RequestSlot {
    key: StreamKey,
    path: PathBuf,
    /// Document identity the writer lease is held on
    document: PathBuf,
    cancel: CancellationToken,
    state: Mutex<EditRequest>,
}

pub struct EditCoordinator {
    host: Arc<dyn DocumentHost>,
    config: EditConfig,
    requests: DashMap<EditRequestId, Arc<RequestSlot>>,
    leases: DashMap<PathBuf, EditRequestId>,
}

impl EditCoordinator {
    pub fn new(host: Arc<dyn DocumentHost>, config: EditConfig) -> Self {
        Self {
            host,
            config,
            requests: DashMap::new(),
            leases: DashMap::new(),
        }
    }

    pub fn host(&self) -> &Arc<dyn DocumentHost> {
        &self.host
    }

    /// Open a streamed edit request
    pub async fn begin(&self, start: EditStart) -> EditOutcome {
        let path = start.path.clone();
        match self.try_begin(start).await {
            Ok(()) => EditOutcome::success(&path),
            Err(e) => {
                warn!("Edit request rejected: {}", e);
                EditOutcome::failure(&path)
            }
        }
    }

    async fn try_begin(&self, start: EditStart) -> Result<(), EditError> {
        let id = start.request_id.clone();
        if self.requests.contains_key(&id) {
            return Err(EditError::DuplicateRequest(id));
        }
        let document = self.host.canonical(&start.path);
        self.acquire_lease(&document, &id)?;

        let processor = match StreamProcessor::start(
            id.clone(),
            start.path.clone(),
            start.range,
            start.apply_directly,
            Arc::clone(&self.host),
            start.sink,
        )
        .await
        {
            Ok(processor) => processor,
            Err(e) => {
                self.release_lease(&document, &id);
                return Err(e);
            }
        };

        let slot = Arc::new(RequestSlot {
            key: start.key,
            path: start.path,
            document,
            cancel: start.cancel,
            state: Mutex::new(EditRequest {
                accumulator: LineAccumulator::new(),
                processor,
                phase: RequestPhase::Streaming,
            }),
        });
        match self.requests.entry(id.clone()) {
            Entry::Occupied(_) => {
                self.release_lease(&slot.document, &id);
                Err(EditError::DuplicateRequest(id))
            }
            Entry::Vacant(vacant) => {
                info!("Edit request {} started on {:?}", id, slot.path);
                vacant.insert(slot);
                Ok(())
            }
        }
    }

    /// Feed a fragment and apply every line it completes
    pub async fn feed(&self, id: &EditRequestId, fragment: &str) -> EditOutcome {
        let Some(slot) = self.slot(id) else {
            debug!("Dropping delta for unknown edit request {}", id);
            return EditOutcome::rejected();
        };

        let mut request = slot.state.lock().await;
        if request.phase != RequestPhase::Streaming {
            debug!("Dropping delta for {} in phase {:?}", id, request.phase);
            return EditOutcome::failure(&slot.path);
        }

        request.accumulator.add_delta(fragment);
        while let Some(line) = request.accumulator.next_line() {
            if let Err(e) = self.apply_line(&slot, &mut request, id, line).await {
                self.abort(&slot, &mut request, id, e).await;
                return EditOutcome::failure(&slot.path);
            }
        }
        EditOutcome::success(&slot.path)
    }

    /// Finish the request: drain, flush, shrink, save
    ///
    /// A second End for the same id finds nothing and changes nothing.
    pub async fn end(&self, id: &EditRequestId) -> EditOutcome {
        let Some((_, slot)) = self.requests.remove(id) else {
            debug!("Dropping end for unknown edit request {}", id);
            return EditOutcome::rejected();
        };

        let mut request = slot.state.lock().await;
        if request.phase != RequestPhase::Streaming {
            return EditOutcome::failure(&slot.path);
        }

        match self.complete(&slot, &mut request, id).await {
            Ok(()) => {
                request.phase = RequestPhase::Ended;
                self.release_lease(&slot.document, id);
                info!(
                    "Edit request {} ended with {} edits",
                    id,
                    request.processor.applied_edits()
                );
                EditOutcome::success(&slot.path)
            }
            Err(e) => {
                self.abort(&slot, &mut request, id, e).await;
                EditOutcome::failure(&slot.path)
            }
        }
    }

    async fn complete(
        &self,
        slot: &RequestSlot,
        request: &mut EditRequest,
        id: &EditRequestId,
    ) -> Result<(), EditError> {
        while let Some(line) = request.accumulator.next_line() {
            self.apply_line(slot, request, id, line).await?;
        }
        if let Some(line) = request.accumulator.flush_remainder() {
            self.apply_line(slot, request, id, line).await?;
        }
        if slot.cancel.is_cancelled() {
            return Err(EditError::Cancelled(id.clone()));
        }
        request.processor.finish().await?;
        if self.config.save_on_end {
            self.host.save(&slot.path).await?;
        }
        Ok(())
    }

    async fn apply_line(
        &self,
        slot: &RequestSlot,
        request: &mut EditRequest,
        id: &EditRequestId,
        line: String,
    ) -> Result<(), EditError> {
        if slot.cancel.is_cancelled() {
            return Err(EditError::Cancelled(id.clone()));
        }
        request.processor.process_line(line).await
    }

    async fn abort(
        &self,
        slot: &Arc<RequestSlot>,
        request: &mut EditRequest,
        id: &EditRequestId,
        reason: EditError,
    ) {
        request.phase = RequestPhase::Aborted;
        match &reason {
            EditError::Cancelled(_) => info!("Edit request {} cancelled", id),
            _ => {
                error!("Edit request {} failed: {}", id, reason);
                if self.config.restore_on_failure {
                    if let Err(e) = request.processor.restore().await {
                        error!("Failed to restore {:?}: {}", slot.path, e);
                    }
                }
            }
        }
        // The id may already belong to a newer request
        self.requests
            .remove_if(id, |_, current| Arc::ptr_eq(current, slot));
        self.release_lease(&slot.document, id);
    }

    /// Abandon one request without saving; applied edits stay
    pub async fn abandon(&self, id: &EditRequestId) -> bool {
        let Some((_, slot)) = self.requests.remove(id) else {
            return false;
        };
        slot.cancel.cancel();
        let mut request = slot.state.lock().await;
        request.phase = RequestPhase::Aborted;
        self.release_lease(&slot.document, id);
        info!("Edit request {} abandoned", id);
        true
    }

    /// Abandon every open request of an exchange
    pub async fn abandon_exchange(&self, key: &StreamKey) -> usize {
        self.abandon_matching(|slot| &slot.key == key).await
    }

    /// Abandon every open request of a session
    pub async fn abandon_session(&self, session_id: &SessionId) -> usize {
        self.abandon_matching(|slot| &slot.key.session_id == session_id)
            .await
    }

    async fn abandon_matching(&self, selected: impl Fn(&RequestSlot) -> bool) -> usize {
        let ids: Vec<EditRequestId> = self
            .requests
            .iter()
            .filter(|entry| selected(entry.value().as_ref()))
            .map(|entry| entry.key().clone())
            .collect();
        let mut abandoned = 0;
        for id in ids {
            if self.abandon(&id).await {
                abandoned += 1;
            }
        }
        abandoned
    }

    /// Apply complete new content for a range in one batch
    pub async fn apply_direct(
        &self,
        path: &Path,
        range: &Range,
        content: &str,
        sink: Option<Arc<dyn ResponseSink>>,
    ) -> EditOutcome {
        let lease_id = EditRequestId::new(format!(
            "{}{}",
            DIRECT_LEASE_PREFIX,
            uuid::Uuid::new_v4()
        ));
        let document = self.host.canonical(path);
        if let Err(e) = self.acquire_lease(&document, &lease_id) {
            warn!("Direct edit rejected: {}", e);
            return EditOutcome::failure(path);
        }

        let result = apply_whole_content(self.host.as_ref(), path, range, content).await;
        let outcome = match result {
            Ok(edits) => {
                if !edits.is_empty() {
                    if let Some(sink) = sink {
                        sink.code_edit(CodeEdit {
                            path: path.to_path_buf(),
                            edits,
                        });
                    }
                }
                match self.save_if_configured(path).await {
                    Ok(()) => EditOutcome::success(path),
                    Err(e) => {
                        error!("Failed to save {:?}: {}", path, e);
                        EditOutcome::failure(path)
                    }
                }
            }
            Err(e) => {
                error!("Direct edit on {:?} failed: {}", path, e);
                EditOutcome::failure(path)
            }
        };
        self.release_lease(&document, &lease_id);
        outcome
    }

    async fn save_if_configured(&self, path: &Path) -> Result<(), EditError> {
        if self.config.save_on_end {
            self.host.save(path).await?;
        }
        Ok(())
    }

    /// Phase of an open request; closed requests are forgotten
    pub async fn phase(&self, id: &EditRequestId) -> Option<RequestPhase> {
        let slot = self.slot(id)?;
        let request = slot.state.lock().await;
        Some(request.phase)
    }

    pub fn active_requests(&self) -> usize {
        self.requests.len()
    }

    /// Request currently holding the document's writer lease
    pub fn lease_holder(&self, path: &Path) -> Option<EditRequestId> {
        self.leases
            .get(&self.host.canonical(path))
            .map(|holder| holder.clone())
    }

    fn slot(&self, id: &EditRequestId) -> Option<Arc<RequestSlot>> {
        self.requests.get(id).map(|slot| Arc::clone(&slot))
    }

    fn acquire_lease(&self, document: &Path, id: &EditRequestId) -> Result<(), EditError> {
        match self.leases.entry(document.to_path_buf()) {
            Entry::Occupied(occupied) => Err(EditError::DocumentLeased {
                path: document.to_path_buf(),
                holder: occupied.get().clone(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(id.clone());
                Ok(())
            }
        }
    }

    fn release_lease(&self, document: &Path, id: &EditRequestId) {
        self.leases.remove_if(document, |_, holder| holder == id);
    }
}
