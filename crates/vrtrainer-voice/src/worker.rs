//! Transcript worker: utterances in, speech signals out.

use crate::stt::{SttBackend, Utterance};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vrtrainer_core::{ParticipantId, Role, SpeechEvent, SpeechProducer};

/// Transcribes the local microphone and feeds the text to the fuser as speech
/// from the local participant.
pub struct TranscriptWorker {
    backend: Arc<dyn SttBackend>,
    speech: SpeechProducer,
    local: ParticipantId,
    role: Role,
}

impl TranscriptWorker {
    pub fn new(backend: Arc<dyn SttBackend>, speech: SpeechProducer, local: ParticipantId, role: Role) -> Self {
        Self {
            backend,
            speech,
            local,
            role,
        }
    }

    /// Transcribe one utterance and push it. Returns whether anything was pushed.
    pub async fn handle(&self, utterance: &Utterance) -> bool {
        let text = match self.backend.transcribe(utterance).await {
            Ok(text) => text,
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "Transcription failed");
                return false;
            }
        };
        let text = text.trim();
        if text.is_empty() {
            debug!(duration_ms = utterance.duration.as_millis() as u64, "Nothing recognized");
            return false;
        }
        info!(target: "vrtrainer::voice", role = %self.role, text, "🎙️ Heard");
        self.speech.push(
            self.local.clone(),
            SpeechEvent {
                text: text.to_string(),
                speaker_role: self.role,
            },
        );
        true
    }

    /// Consume utterances until the capture side closes the channel. The task
    /// returns how many utterances produced speech.
    pub fn spawn(self, mut utterances: mpsc::Receiver<Utterance>) -> JoinHandle<u64> {
        tokio::spawn(async move {
            let mut pushed = 0;
            while let Some(utterance) = utterances.recv().await {
                if self.handle(&utterance).await {
                    pushed += 1;
                }
            }
            info!(pushed, "Transcript worker stopped");
            pushed
        })
    }
}
