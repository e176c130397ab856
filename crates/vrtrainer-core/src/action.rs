//! Proposed and approved feedback actions.

use crate::features::FeatureKind;
use crate::profile::Difficulty;
use crate::types::{ParticipantId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation sent to the feedback device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCommand {
    Shock,
    Vibrate,
    Beep,
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceCommand::Shock => "shock",
            DeviceCommand::Vibrate => "vibrate",
            DeviceCommand::Beep => "beep",
        })
    }
}

/// Candidate action produced by a feature, not yet checked by the limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedAction {
    pub feature: FeatureKind,
    /// Pet that receives the command.
    pub target: ParticipantId,
    /// Participant whose signal caused the trigger.
    pub origin: ParticipantId,
    pub command: DeviceCommand,
    pub intensity: f32,
    pub duration_secs: f32,
    pub reason: String,
    /// Limits of the target's profile at evaluation time.
    pub difficulty: Difficulty,
    pub at: Timestamp,
}

impl ProposedAction {
    /// Fixed-strength action: maximum strength, minimum duration.
    pub fn single(
        feature: FeatureKind,
        target: ParticipantId,
        origin: ParticipantId,
        command: DeviceCommand,
        difficulty: &Difficulty,
        reason: impl Into<String>,
        at: Timestamp,
    ) -> Self {
        Self {
            feature,
            target,
            origin,
            command,
            intensity: difficulty.strength.max,
            duration_secs: difficulty.duration.min,
            reason: reason.into(),
            difficulty: *difficulty,
            at,
        }
    }

    /// Action whose strength and duration scale with `scale` in `[0, 1]`.
    #[allow(clippy::too_many_arguments)]
    pub fn scaled(
        feature: FeatureKind,
        target: ParticipantId,
        origin: ParticipantId,
        command: DeviceCommand,
        difficulty: &Difficulty,
        scale: f32,
        reason: impl Into<String>,
        at: Timestamp,
    ) -> Self {
        Self {
            feature,
            target,
            origin,
            command,
            intensity: difficulty.strength.lerp(scale),
            duration_secs: difficulty.duration.lerp(scale),
            reason: reason.into(),
            difficulty: *difficulty,
            at,
        }
    }
}

/// Scale for values that trigger above `threshold`, saturating at `max`.
pub fn rising_scale(value: f32, threshold: f32, max: f32) -> f32 {
    if max <= threshold {
        return 1.0;
    }
    ((value - threshold) / (max - threshold)).clamp(0.0, 1.0)
}

/// Scale for values that trigger at or below `threshold`, saturating at `min`.
pub fn falling_scale(value: f32, threshold: f32, min: f32) -> f32 {
    if threshold <= min {
        return 1.0;
    }
    ((threshold - value) / (threshold - min)).clamp(0.0, 1.0)
}

/// Action that passed the limiter; intensity and duration are clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovedAction {
    pub feature: FeatureKind,
    pub target: ParticipantId,
    pub origin: ParticipantId,
    pub command: DeviceCommand,
    pub intensity: f32,
    pub duration_secs: f32,
    pub reason: String,
    pub approved_at: Timestamp,
}
