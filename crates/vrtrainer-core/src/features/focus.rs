use super::{Cx, FeatureKind, Input};
use crate::action::{falling_scale, DeviceCommand, ProposedAction};
use crate::text::contains_phrase;
use crate::types::{Role, Timestamp};
use std::time::Duration;

const FILL_PER_SEC: f32 = 0.2;
const DRAIN_PER_SEC: f32 = 0.02;
const THRESHOLD: f32 = 0.2;
const NAME_PENALTY: f32 = 0.15;

/// Eye-contact parameters and their value when never reported.
const CONTACTS: [(&str, bool); 5] = [
    ("Trainer/EyeLeft", true),
    ("Trainer/EyeFarLeft", false),
    ("Trainer/EyeRight", true),
    ("Trainer/EyeFarRight", false),
    ("Trainer/ProximityHead", false),
];

/// Focus meter: fills while the trainer holds the pet's attention and drains
/// otherwise. Dropping to the threshold proposes a shock that grows as the meter
/// empties, repeated once per cooldown while the meter stays low.
#[derive(Debug)]
pub struct FocusFeature {
    meter: f32,
    last_tick: Option<Timestamp>,
    last_proposed: Option<Timestamp>,
}

impl Default for FocusFeature {
    fn default() -> Self {
        Self {
            meter: 1.0,
            last_tick: None,
            last_proposed: None,
        }
    }
}

impl FocusFeature {
    pub fn meter(&self) -> f32 {
        self.meter
    }

    pub(crate) fn evaluate(&mut self, input: Input<'_>, cx: &Cx<'_>) -> Vec<ProposedAction> {
        if let Input::Speech {
            speaker: Role::Trainer,
            normalized,
            ..
        } = input
        {
            if cx.profile.names.iter().any(|n| contains_phrase(normalized, n)) {
                self.meter = (self.meter - NAME_PENALTY).max(0.0);
            }
        }
        Vec::new()
    }

    pub(crate) fn poll(&mut self, cx: &Cx<'_>) -> Vec<ProposedAction> {
        let engaged = CONTACTS.iter().any(|(name, default)| cx.flag(name, *default));
        if let Some(last) = self.last_tick {
            let dt = cx.at.saturating_sub(last).as_secs_f32();
            let rate = if engaged { FILL_PER_SEC } else { -DRAIN_PER_SEC };
            let delta = rate * dt;
            self.meter = (self.meter + delta).clamp(0.0, 1.0);
        }
        self.last_tick = Some(cx.at);

        if self.meter > THRESHOLD {
            self.last_proposed = None;
            return Vec::new();
        }
        let cooldown = Duration::try_from_secs_f32(cx.difficulty(FeatureKind::Focus).cooldown_secs).unwrap_or_default();
        if self.last_proposed.is_some_and(|last| cx.at < last + cooldown) {
            return Vec::new();
        }
        self.last_proposed = Some(cx.at);
        let scale = falling_scale(self.meter, THRESHOLD, 0.0);
        vec![cx.scaled(FeatureKind::Focus, DeviceCommand::Shock, scale, "focus_low")]
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
