//! Error taxonomy for the trainer core.

use crate::limiter::RejectReason;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for core operations
pub type TrainerResult<T> = Result<T, TrainerError>;

/// Errors surfaced by the trainer core.
///
/// `Validation` is fatal only to the edit that produced it. `Permission` and
/// `Internal` signal a broken caller contract and halt the task that hit them.
/// `Safety` is expected and never retried.
#[derive(Error, Debug)]
pub enum TrainerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("permission error: {0}")]
    Permission(String),

    #[error("safety rejection: {0}")]
    Safety(RejectReason),

    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("session protocol error: {0}")]
    SessionProtocol(#[from] SessionProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TrainerError {
    /// Errors that must stop the responsible task instead of being logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TrainerError::Permission(_) | TrainerError::Internal(_))
    }
}

/// Join/host flow failures reported to the session UI.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionProtocolError {
    #[error("invalid_session_id")]
    InvalidSessionId,

    #[error("no_server_response")]
    NoServerResponse,

    #[error("trainer_already_present")]
    TrainerAlreadyPresent,

    #[error("session_full")]
    SessionFull,
}

impl From<toml::de::Error> for TrainerError {
    fn from(err: toml::de::Error) -> Self {
        TrainerError::Validation(err.to_string())
    }
}

impl From<toml::ser::Error> for TrainerError {
    fn from(err: toml::ser::Error) -> Self {
        TrainerError::Internal(err.to_string())
    }
}
