//! Error types for speech transcription

use thiserror::Error;
use vrtrainer_core::TrainerError;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

impl From<VoiceError> for TrainerError {
    fn from(err: VoiceError) -> Self {
        match err {
            VoiceError::Config(msg) => TrainerError::Validation(msg),
            other => TrainerError::TransientIo(other.to_string()),
        }
    }
}
