//! Errors raised by the network adapters and their mapping onto the core's failure types.

use thiserror::Error;
use vrtrainer_core::{DeviceError, SessionFailure, TrainerError};

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("device credentials missing")]
    MissingCredentials,

    #[error("not connected to a session")]
    NotConnected,
}

/// Rejection code carried in an error body: `{"error": "..."}`, `{"detail": "..."}`
/// or the raw text.
pub fn rejection_code(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "detail", "code"] {
            if let Some(code) = value.get(key).and_then(|v| v.as_str()) {
                return code.to_string();
            }
        }
    }
    body.trim().to_string()
}

impl From<RemoteError> for SessionFailure {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Status { status: 404, .. } => SessionFailure::InvalidSessionId,
            RemoteError::Status {
                status: 403 | 409,
                body,
            } => SessionFailure::Rejected(rejection_code(&body)),
            _ => SessionFailure::NoResponse,
        }
    }
}

impl From<RemoteError> for DeviceError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::MissingCredentials => DeviceError::NotConfigured,
            RemoteError::Status { status, body } if (400..500).contains(&status) => {
                DeviceError::Refused(format!("{}: {}", status, body.trim()))
            }
            other => DeviceError::Transport(other.to_string()),
        }
    }
}

impl From<RemoteError> for TrainerError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::InvalidUrl(url) => TrainerError::Validation(format!("invalid server URL: {}", url)),
            other => TrainerError::TransientIo(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16, body: &str) -> RemoteError {
        RemoteError::Status {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn http_status_maps_to_session_failures() {
        assert_eq!(SessionFailure::from(status(404, "")), SessionFailure::InvalidSessionId);
        assert_eq!(
            SessionFailure::from(status(409, r#"{"error":"trainer_already_present"}"#)),
            SessionFailure::Rejected("trainer_already_present".into())
        );
        assert_eq!(
            SessionFailure::from(status(403, "session_full\n")),
            SessionFailure::Rejected("session_full".into())
        );
        assert_eq!(SessionFailure::from(status(502, "bad gateway")), SessionFailure::NoResponse);
        assert_eq!(SessionFailure::from(RemoteError::NotConnected), SessionFailure::NoResponse);
    }

    #[test]
    fn device_errors() {
        assert_eq!(DeviceError::from(RemoteError::MissingCredentials), DeviceError::NotConfigured);
        assert!(matches!(DeviceError::from(status(401, "nope")), DeviceError::Refused(_)));
        assert!(matches!(DeviceError::from(status(503, "")), DeviceError::Transport(_)));
    }

    #[test]
    fn detail_key_is_read() {
        assert_eq!(rejection_code(r#"{"detail":"session_full"}"#), "session_full");
        assert_eq!(rejection_code("  plain  "), "plain");
    }
}
