//! Error types for each pipeline layer

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{EditRequestId, SessionId, StreamKey};

/// Errors raised by a document host
#[derive(Debug, Error)]
pub enum DocumentError {
    /// File could not be found or opened
    #[error("document not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Operation on a document that was never opened
    #[error("document not open: {}", .0.display())]
    NotOpen(PathBuf),

    /// Edit position past the end of the document
    #[error("position out of range: line {line}, character {character}")]
    OutOfRange { line: usize, character: usize },

    /// Two edits in one batch touch the same text
    #[error("overlapping edits in batch")]
    OverlappingEdits,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while applying a streamed or whole-content edit
#[derive(Debug, Error)]
pub enum EditError {
    /// Start received for an id that is already active
    #[error("edit request already active: {0}")]
    DuplicateRequest(EditRequestId),

    /// Another request holds the writer lease on the document
    #[error("document {} is being edited by request {holder}", .path.display())]
    DocumentLeased { path: PathBuf, holder: EditRequestId },

    /// Delta or End for an id with no active request
    #[error("unknown edit request: {0}")]
    UnknownRequest(EditRequestId),

    /// Exchange was cancelled while lines were being applied
    #[error("edit request cancelled: {0}")]
    Cancelled(EditRequestId),

    /// Document host error
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Errors raised by the response stream registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A sink is already registered and the policy rejects replacement
    #[error("response stream already registered: {0}")]
    AlreadyRegistered(StreamKey),
}

/// Errors surfaced by the pipeline control surface
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Exchange not found in its session
    #[error("exchange not found: {0}")]
    ExchangeNotFound(StreamKey),

    /// Registry error
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Edit error
    #[error(transparent)]
    Edit(#[from] EditError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Internal(err.to_string())
    }
}
