//! Raw signals entering the fuser and the fused events leaving it.

use crate::feed::LogEntry;
use crate::features::FeatureKind;
use crate::session::PeerUpdate;
use crate::types::{ParticipantId, Role, Timestamp};
use serde::{Deserialize, Serialize};

/// Origin stream of a signal. Ordering is guaranteed per stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Speech,
    Telemetry,
    Session,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechEvent {
    pub text: String,
    pub speaker_role: Role,
}

/// Avatar parameter value as reported by the telemetry collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Float(f32),
}

impl ParamValue {
    /// Floats count as true once they pass the midpoint.
    pub fn as_bool(&self) -> bool {
        match *self {
            ParamValue::Bool(b) => b,
            ParamValue::Float(f) => f > 0.5,
        }
    }

    pub fn as_float(&self) -> f32 {
        match *self {
            ParamValue::Bool(true) => 1.0,
            ParamValue::Bool(false) => 0.0,
            ParamValue::Float(f) => f,
        }
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<f32> for ParamValue {
    fn from(f: f32) -> Self {
        ParamValue::Float(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub parameter: String,
    pub value: ParamValue,
}

/// Explicit instruction issued from the trainer's UI or relayed over the session.
///
/// `target = None` addresses every pet in the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub feature: FeatureKind,
    pub name: String,
    #[serde(default)]
    pub target: Option<ParticipantId>,
    #[serde(default)]
    pub argument: Option<String>,
}

impl Command {
    pub fn new(feature: FeatureKind, name: impl Into<String>) -> Self {
        Self {
            feature,
            name: name.into(),
            target: None,
            argument: None,
        }
    }

    pub fn to(mut self, target: ParticipantId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.argument = Some(argument.into());
        self
    }
}

/// Message exchanged through the session server.
///
/// The trainer forwards its own speech, avatar telemetry and commands so that each
/// pet's client evaluates features locally, next to its telemetry and its device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    Peer(PeerUpdate),
    Command(Command),
    Speech(SpeechEvent),
    Telemetry(TelemetryEvent),
    Log(LogEntry),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Speech(SpeechEvent),
    Telemetry(TelemetryEvent),
    Session(SessionEvent),
}

impl Signal {
    pub fn stream(&self) -> StreamKind {
        match self {
            Signal::Speech(_) => StreamKind::Speech,
            Signal::Telemetry(_) => StreamKind::Telemetry,
            Signal::Session(_) => StreamKind::Session,
        }
    }
}

/// A timestamped signal tagged with the participant that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
    pub origin: ParticipantId,
    pub at: Timestamp,
    pub payload: Signal,
}

impl SignalEvent {
    pub fn stream(&self) -> StreamKind {
        self.payload.stream()
    }
}

/// Event as delivered by the fuser.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedEvent {
    pub event: SignalEvent,
    /// Older than the delivery watermark by more than the jitter tolerance.
    pub stale: bool,
    /// Delivery order, starting at zero.
    pub sequence: u64,
}

impl FusedEvent {
    /// Wrap a signal for direct evaluation, bypassing the fuser.
    pub fn fresh(event: SignalEvent) -> Self {
        Self {
            event,
            stale: false,
            sequence: 0,
        }
    }

    pub fn origin(&self) -> &ParticipantId {
        &self.event.origin
    }

    pub fn at(&self) -> Timestamp {
        self.event.at
    }
}
