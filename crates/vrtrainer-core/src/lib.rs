//! vrtrainer-core: trainer/pet interaction core.
//!
//! Fuses speech, avatar telemetry and session messages, evaluates the interaction
//! features of each pet, enforces safety limits and drives the feedback device.
//! Network collaborators are reached only through the `SessionServer` and
//! `FeedbackDevice` traits.

mod action;
mod broadcast;
mod config;
mod dispatch;
mod error;
pub mod features;
mod feed;
mod fuser;
mod limiter;
mod pipeline;
mod profile;
mod retry;
mod session;
mod signal;
pub mod text;
mod transcript;
mod types;

// Errors
pub use error::{SessionProtocolError, TrainerError, TrainerResult};

// Data model
pub use action::{falling_scale, rising_scale, ApprovedAction, DeviceCommand, ProposedAction};
pub use profile::{
    Bounds, Difficulties, Difficulty, DurationCap, Profile, ProfileStore, WordGameMode, COOLDOWN_LIMIT_SECS,
    DEFAULT_PROFILE_NAME, DELAY_LIMIT_SECS, DURATION_LIMIT_SECS, STRENGTH_LIMIT,
};
pub use signal::{
    Command, FusedEvent, ParamValue, SessionEvent, Signal, SignalEvent, SpeechEvent, StreamKind, TelemetryEvent,
};
pub use transcript::{TranscriptChunk, TranscriptLog};
pub use types::{Clock, ManualClock, MonotonicClock, ParticipantId, Role, SessionId, Timestamp, SERVER_PARTICIPANT};

// Components
pub use features::{FeatureEngine, FeatureKind};
pub use fuser::{FuserConfig, FuserStats, SessionProducer, SignalFuser, SpeechProducer, TelemetryProducer};
pub use limiter::{Admission, FeatureKey, FeatureState, RejectReason, SafetyLimiter};
pub use session::{
    ConnectionStatus, Inbound, InboundMessage, JoinResult, ParticipantEntry, ParticipantInfo, PeerChange,
    PeerEffect, PeerUpdate, SessionConfig, SessionContext, SessionCoordinator, SessionFailure, SessionRow,
    SessionServer, SessionState,
};
pub use dispatch::{ActionDispatcher, DeviceError, DispatchResult, FeedbackDevice, NullDevice};
pub use broadcast::Broadcaster;
pub use pipeline::{spawn_inbound_pump, Pipeline};

// Ambient
pub use config::{DeviceConfig, DeviceMode, TrainerConfig};
pub use feed::{FeatureStats, Link, LogEntry, Stat, UiEvent, UiFeed};
pub use retry::{RetryConfig, RetryPolicy};
