//! Streamwright Core - response routing and streamed edits for agent sessions
//!
//! This crate turns an agent engine's event stream into editor-side effects:
//! - Routing events to the response stream of their (session, exchange)
//! - Applying streamed code edits line by line as they arrive
//! - Chat and response models with progressive-render diffing
//! - Session snapshots for resuming conversations

pub mod config;
pub mod constants;
pub mod document;
pub mod edit;
pub mod error;
pub mod events;
pub mod model;
pub mod paths;
pub mod pipeline;
mod pipeline_tests;
pub mod router;
pub mod session;
pub mod stream;
pub mod types;

// Re-exports for convenience
pub use config::PipelineConfig;
pub use document::{DocumentHost, Position, Range, TextEdit, WorkspaceDocuments};
pub use edit::{EditCoordinator, EditOutcome};
pub use error::{DocumentError, EditError, PipelineError, RegistryError};
pub use events::{parse_event, AgentEvent};
pub use model::{ChatModel, ResponseModel};
pub use pipeline::ResponsePipeline;
pub use router::{EventRouter, RouteStats, Routing};
pub use session::SessionManager;
pub use stream::{create_sink_channel, ResponseSink, ResponseStreamRegistry, SinkMessage, SinkUpdate};
pub use types::{EditRequestId, ExchangeId, SessionId, StreamKey};
