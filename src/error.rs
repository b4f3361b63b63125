//! Error types for the subscription multiplexer.

use thiserror::Error;

/// Errors returned by the controller's public operations.
///
/// Stream-level failures never surface here; they travel through the
/// session buffer as a [`StreamError`] instead.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("Multiplexer has no active session")]
    NotStarted,

    #[error("Multiplexer already has an active session: {0}")]
    AlreadyStarted(u64),

    #[error("Session {0} is already being drained")]
    AlreadyDraining(u64),

    #[error("Session buffer is already attached to a reader")]
    ReaderAttached,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Failure of a single remote stream.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Errors on subscription: {0:?}")]
    ResponseErrors(Vec<String>),

    #[error("Empty data received on subscription")]
    EmptyResponse,

    #[error("No stream establisher for change kind {0}")]
    UnsupportedKind(String),
}

/// Failure reported by the persistence collaborator for one event.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("Merge failed: {0}")]
pub struct MergeError(pub String);

impl MergeError {
    pub fn new(message: impl Into<String>) -> Self {
        MergeError(message.into())
    }
}

/// Result type for multiplexer operations.
pub type Result<T> = std::result::Result<T, MuxError>;
