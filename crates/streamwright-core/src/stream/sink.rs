//! Write side of an open exchange
//!
//! A `ResponseSink` receives everything the router produces for one
//! exchange. `ChannelSink` forwards updates over an unbounded channel so a
//! host can render them elsewhere.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::model::{CodeEdit, ContentReference, EditsInfo, PlanStep};
use crate::types::StreamKey;

/// How an exchange ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Finished,
    Canceled,
}

/// One update pushed to a sink
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SinkUpdate {
    Markdown(String),
    Reference(ContentReference),
    Progress(String),
    Step(PlanStep),
    EditsInfo(EditsInfo),
    CodeEdit(CodeEdit),
    Warning(String),
    Closed(CloseReason),
}

impl SinkUpdate {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            SinkUpdate::Markdown(_) => "markdown",
            SinkUpdate::Reference(_) => "reference",
            SinkUpdate::Progress(_) => "progress",
            SinkUpdate::Step(_) => "step",
            SinkUpdate::EditsInfo(_) => "edits_info",
            SinkUpdate::CodeEdit(_) => "code_edit",
            SinkUpdate::Warning(_) => "warning",
            SinkUpdate::Closed(_) => "closed",
        }
    }
}

/// Output handle for one open exchange
pub trait ResponseSink: Send + Sync {
    /// Exchange this sink belongs to
    fn key(&self) -> &StreamKey;

    /// Deliver an update; updates after close are dropped
    fn send(&self, update: SinkUpdate);

    /// Mark the exchange finished or canceled; later calls are no-ops
    fn close(&self, reason: CloseReason);

    fn is_closed(&self) -> bool;

    fn markdown(&self, text: &str) {
        self.send(SinkUpdate::Markdown(text.to_string()));
    }

    fn reference(&self, reference: ContentReference) {
        self.send(SinkUpdate::Reference(reference));
    }

    fn progress(&self, message: &str) {
        self.send(SinkUpdate::Progress(message.to_string()));
    }

    fn step(&self, step: PlanStep) {
        self.send(SinkUpdate::Step(step));
    }

    fn edits_info(&self, info: EditsInfo) {
        self.send(SinkUpdate::EditsInfo(info));
    }

    fn code_edit(&self, edit: CodeEdit) {
        self.send(SinkUpdate::CodeEdit(edit));
    }

    fn warning(&self, message: &str) {
        self.send(SinkUpdate::Warning(message.to_string()));
    }
}

/// Update tagged with the exchange it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkMessage {
    pub key: StreamKey,
    pub update: SinkUpdate,
}

/// Sink that forwards every update over a channel
pub struct ChannelSink {
    key: StreamKey,
    tx: mpsc::UnboundedSender<SinkMessage>,
    closed: AtomicBool,
}

impl ChannelSink {
    pub fn new(key: StreamKey, tx: mpsc::UnboundedSender<SinkMessage>) -> Self {
        Self {
            key,
            tx,
            closed: AtomicBool::new(false),
        }
    }

    fn forward(&self, update: SinkUpdate) {
        let message = SinkMessage {
            key: self.key.clone(),
            update,
        };
        if let Err(e) = self.tx.send(message) {
            error!("Failed to forward sink update for {}: {}", self.key, e);
        }
    }
}

impl ResponseSink for ChannelSink {
    fn key(&self) -> &StreamKey {
        &self.key
    }

    fn send(&self, update: SinkUpdate) {
        if self.is_closed() {
            debug!("Dropping {} update for closed sink {}", update.kind(), self.key);
            return;
        }
        self.forward(update);
    }

    fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.forward(SinkUpdate::Closed(reason));
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Create a channel-backed sink
///
/// Returns (sink, receiver):
/// - sink: register it for the exchange
/// - receiver: every update the exchange produces, in order
pub fn create_sink_channel(
    key: StreamKey,
) -> (Arc<ChannelSink>, mpsc::UnboundedReceiver<SinkMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelSink::new(key, tx)), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_updates_forwarded_in_order() {
        let (sink, mut rx) = create_sink_channel(StreamKey::new("s", "e"));
        sink.markdown("a");
        sink.progress("b");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.key, StreamKey::new("s", "e"));
        assert_eq!(first.update, SinkUpdate::Markdown("a".to_string()));
        assert_eq!(rx.try_recv().unwrap().update, SinkUpdate::Progress("b".to_string()));
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let (sink, mut rx) = create_sink_channel(StreamKey::new("s", "e"));
        sink.close(CloseReason::Finished);
        sink.close(CloseReason::Canceled);
        sink.markdown("late");

        assert_eq!(
            rx.try_recv().unwrap().update,
            SinkUpdate::Closed(CloseReason::Finished)
        );
        assert!(rx.try_recv().is_err());
        assert!(sink.is_closed());
    }

    #[test]
    fn test_dropped_receiver_does_not_panic() {
        let (sink, rx) = create_sink_channel(StreamKey::new("s", "e"));
        drop(rx);
        sink.markdown("nobody listening");
    }

    #[test]
    fn test_update_wire_shape() {
        let json = serde_json::to_value(SinkUpdate::Markdown("hi".to_string())).unwrap();
        assert_eq!(json["type"], "markdown");
        assert_eq!(json["payload"], "hi");
    }
}
