//! Application-wide error types.
//!
//! [`AppError`] covers bootstrap and channel failures. [`TutorError`] is the
//! domain taxonomy surfaced by the tutoring core: chat callers see it as a
//! terminal `error` event, HTTP callers as a status code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("comms error: {0}")]
    Comms(String),

    #[error(transparent)]
    Tutor(#[from] TutorError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TutorError {
    /// Input rejected before any side effect (e.g. blank message or topic).
    #[error("invalid input: {0}")]
    Validation(String),

    /// Conversation already holds the maximum number of turns.
    #[error("conversation limit reached ({max} turns)")]
    QuotaExceeded { max: usize },

    /// Provider call failed or returned unusable output.
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The requesting client went away before the answer was complete.
    #[error("generation cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(String),
}

impl TutorError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    /// Short machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            TutorError::Validation(_) => "validation",
            TutorError::QuotaExceeded { .. } => "quota_exceeded",
            TutorError::Generation(_) => "generation_failed",
            TutorError::NotFound { .. } => "not_found",
            TutorError::Cancelled => "cancelled",
            TutorError::Store(_) => "internal",
        }
    }
}
