//! Safety limiter: the single authority on per-(participant, feature) timing state.
//!
//! Every admission check and the state update that follows it run under the
//! DashMap entry lock for that key, so two racing proposals for the same key can
//! never both observe an expired cooldown.

use crate::action::{ApprovedAction, ProposedAction};
use crate::features::FeatureKind;
use crate::types::{ParticipantId, Timestamp};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    CooldownActive,
    DurationCapExceeded,
    IntensityOutOfRange,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::CooldownActive => "cooldown_active",
            RejectReason::DurationCapExceeded => "duration_cap_exceeded",
            RejectReason::IntensityOutOfRange => "intensity_out_of_range",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureKey {
    pub participant: ParticipantId,
    pub feature: FeatureKind,
}

impl FeatureKey {
    pub fn new(participant: ParticipantId, feature: FeatureKind) -> Self {
        Self {
            participant,
            feature,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeatureState {
    pub last_trigger: Option<Timestamp>,
    pub cooldown_expiry: Timestamp,
    /// Output seconds approved inside the current cap window.
    pub accumulated_secs: f32,
    pub window_start: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Approved(ApprovedAction),
    Rejected {
        action: ProposedAction,
        reason: RejectReason,
    },
}

impl Admission {
    pub fn is_approved(&self) -> bool {
        matches!(self, Admission::Approved(_))
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Admission::Approved(_) => None,
            Admission::Rejected { reason, .. } => Some(*reason),
        }
    }
}

#[derive(Debug, Default)]
pub struct SafetyLimiter {
    states: DashMap<FeatureKey, FeatureState>,
}

impl SafetyLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `proposed` against its key's state at `now` and record it if approved.
    pub fn admit(&self, proposed: ProposedAction, now: Timestamp) -> Admission {
        let key = FeatureKey::new(proposed.target.clone(), proposed.feature);
        let mut state = self.states.entry(key).or_default();

        if now < state.cooldown_expiry {
            debug!(
                participant = %proposed.target.short(),
                feature = %proposed.feature,
                "Cooldown active"
            );
            return Admission::Rejected {
                action: proposed,
                reason: RejectReason::CooldownActive,
            };
        }

        if !proposed.intensity.is_finite() || !proposed.duration_secs.is_finite() {
            return Admission::Rejected {
                action: proposed,
                reason: RejectReason::IntensityOutOfRange,
            };
        }

        let limits = proposed.difficulty;
        let intensity = limits.strength.clamp(proposed.intensity);
        let duration_secs = limits.duration.clamp(proposed.duration_secs);

        if let Some(cap) = limits.duration_cap {
            let window = Duration::try_from_secs_f32(cap.window_secs).unwrap_or_default();
            let (window_start, accumulated) = if now.saturating_sub(state.window_start) >= window {
                (now, 0.0)
            } else {
                (state.window_start, state.accumulated_secs)
            };
            if accumulated + duration_secs > cap.max_total_secs {
                return Admission::Rejected {
                    action: proposed,
                    reason: RejectReason::DurationCapExceeded,
                };
            }
            state.window_start = window_start;
            state.accumulated_secs = accumulated + duration_secs;
        }

        state.last_trigger = Some(now);
        state.cooldown_expiry =
            now + Duration::try_from_secs_f32(limits.cooldown_secs).unwrap_or_default();

        Admission::Approved(ApprovedAction {
            feature: proposed.feature,
            target: proposed.target,
            origin: proposed.origin,
            command: proposed.command,
            intensity,
            duration_secs,
            reason: proposed.reason,
            approved_at: now,
        })
    }

    /// Read-only copy of one key's state.
    pub fn snapshot(&self, key: &FeatureKey) -> Option<FeatureState> {
        self.states.get(key).map(|s| *s)
    }

    /// Drop every state owned by `participant` (left or kicked).
    pub fn clear_participant(&self, participant: &ParticipantId) {
        self.states.retain(|k, _| &k.participant != participant);
    }

    pub fn clear_feature(&self, participant: &ParticipantId, feature: FeatureKind) {
        self.states
            .remove(&FeatureKey::new(participant.clone(), feature));
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
