//! **Speech-to-Text (STT)**: turn captured utterances into text.
//!
//! Implement [`SttBackend`] for a local recognizer or a remote transcription API.
//! [`create_best_stt`] picks the best backend the environment allows.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info};

/// One stretch of speech as captured by the microphone: 16-bit range mono f32 PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub captured_at: DateTime<Utc>,
    pub duration: Duration,
}

impl Utterance {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let duration = if sample_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64)
        };
        Self {
            samples,
            sample_rate,
            captured_at: Utc::now(),
            duration,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Backend converting an [`Utterance`] to text.
#[async_trait]
pub trait SttBackend: Send + Sync {
    /// Transcribe one utterance; an empty string means nothing was recognized.
    async fn transcribe(&self, utterance: &Utterance) -> VoiceResult<String>;

    fn name(&self) -> &str;
}

/// Encode f32 PCM (mono) to 16-bit WAV bytes for API upload.
pub fn pcm_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut buf = Vec::with_capacity(44 + data_len as usize);
    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    // fmt subchunk: PCM, mono, 16-bit
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    buf.extend_from_slice(&2u16.to_le_bytes());
    buf.extend_from_slice(&16u16.to_le_bytes());
    // data subchunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        let i = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        buf.extend_from_slice(&i.to_le_bytes());
    }
    buf
}

/// Decode a 16-bit PCM WAV file into a mono [`Utterance`]. Multi-channel input is
/// downmixed by averaging; chunks other than `fmt ` and `data` are skipped.
pub fn wav_to_utterance(bytes: &[u8]) -> VoiceResult<Utterance> {
    let bad = |what: &str| VoiceError::Stt(format!("invalid wav: {}", what));
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(bad("missing RIFF/WAVE header"));
    }
    let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
    let u32_at = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

    let mut format: Option<(u16, u32, u16)> = None;
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let len = u32_at(pos + 4) as usize;
        let body = pos + 8;
        let end = body.saturating_add(len).min(bytes.len());
        match id {
            b"fmt " => {
                if end - body < 16 {
                    return Err(bad("short fmt chunk"));
                }
                let (tag, channels, rate, bits) = (u16_at(body), u16_at(body + 2), u32_at(body + 4), u16_at(body + 14));
                if tag != 1 || bits != 16 || channels == 0 {
                    return Err(bad("only 16-bit PCM is supported"));
                }
                format = Some((channels, rate, bits));
            }
            b"data" => {
                let (channels, rate, _) = format.ok_or_else(|| bad("data before fmt"))?;
                let frame = channels as usize * 2;
                let samples = bytes[body..end]
                    .chunks_exact(frame)
                    .map(|f| {
                        let sum: f32 = f
                            .chunks_exact(2)
                            .map(|s| i16::from_le_bytes([s[0], s[1]]) as f32 / 32767.0)
                            .sum();
                        sum / channels as f32
                    })
                    .collect();
                return Ok(Utterance::new(samples, rate));
            }
            _ => {}
        }
        // Chunks are word aligned.
        pos = body.saturating_add(len + (len & 1));
    }
    Err(bad("no data chunk"))
}

/// Placeholder STT: replays scripted transcriptions, then a fixed response (empty by
/// default). Use for running the trainer without a recognizer.
#[derive(Debug, Default)]
pub struct PlaceholderStt {
    /// Returned once the script is exhausted.
    pub response: Option<String>,
    script: Mutex<VecDeque<String>>,
}

impl PlaceholderStt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: impl Into<String>) -> Self {
        Self {
            response: Some(s.into()),
            ..Self::default()
        }
    }

    /// Queue `text` as the result of the next transcription.
    pub fn script(&self, text: impl Into<String>) {
        self.script.lock().push_back(text.into());
    }
}

#[async_trait]
impl SttBackend for PlaceholderStt {
    async fn transcribe(&self, utterance: &Utterance) -> VoiceResult<String> {
        if let Some(text) = self.script.lock().pop_front() {
            return Ok(text);
        }
        debug!(samples = utterance.samples.len(), "Placeholder STT");
        Ok(self.response.clone().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "placeholder"
    }
}

/// OpenAI-compatible transcription API (`POST {base}/audio/transcriptions`).
/// Reads `STT_API_URL` (default https://api.openai.com/v1), `STT_API_KEY` and
/// `STT_MODEL` (default whisper-1).
#[derive(Debug, Clone)]
pub struct HttpStt {
    /// Base URL without trailing slash.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    client: reqwest::Client,
}

impl HttpStt {
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("STT_API_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("STT_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| VoiceError::Config("STT requires STT_API_KEY".to_string()))?;
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        Self::new(base_url, api_key, model)
    }

    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into().trim().to_string(),
            model: model.into(),
            client,
        })
    }
}

#[async_trait]
impl SttBackend for HttpStt {
    async fn transcribe(&self, utterance: &Utterance) -> VoiceResult<String> {
        if utterance.is_empty() {
            return Ok(String::new());
        }
        let wav = pcm_to_wav(&utterance.samples, utterance.sample_rate);
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        let res = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Stt(format!("STT API error {}: {}", status, body)));
        }
        let json: serde_json::Value = res.json().await?;
        Ok(json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string())
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Best available STT backend: [`HttpStt`] when `STT_API_KEY` is set, otherwise
/// [`PlaceholderStt`].
pub fn create_best_stt() -> Box<dyn SttBackend> {
    match HttpStt::from_env() {
        Ok(http) => {
            info!(base_url = %http.base_url, model = %http.model, "Using HTTP transcription");
            Box::new(http)
        }
        Err(e) => {
            info!(reason = %e, "No transcription backend configured, speech capture disabled");
            Box::new(PlaceholderStt::new())
        }
    }
}
