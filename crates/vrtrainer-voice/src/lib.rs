//! # vrtrainer-voice
//!
//! Speech capture side of the trainer: an [`SttBackend`] turns microphone
//! utterances into text and the [`TranscriptWorker`] hands it to the signal fuser
//! as speech from the local participant.

pub mod error;
pub mod stt;
pub mod worker;

pub use error::{VoiceError, VoiceResult};
pub use stt::{create_best_stt, pcm_to_wav, wav_to_utterance, HttpStt, PlaceholderStt, SttBackend, Utterance};
pub use worker::TranscriptWorker;
