use super::{Cx, FeatureKind, Input};
use crate::action::{falling_scale, DeviceCommand, ProposedAction};
use crate::text::contains_phrase;
use crate::types::{Role, Timestamp};
use std::time::Duration;
use tracing::info;

pub const PROXIMITY_PARAM: &str = "Trainer/Proximity";
const THRESHOLD: f32 = 0.4;
const HEEL_TARGET: f32 = 1.0;
const SUMMON_PHRASES: [&str; 2] = ["come here", "heel"];
const SUMMON_COMMANDS: [&str; 3] = ["summon", "heel", "come_here"];

/// Keeps the pet close to its trainer. Distance below the threshold proposes a
/// scaled shock; a summon must be answered by reaching the trainer before the
/// delay runs out.
#[derive(Debug, Default)]
pub struct ProximityFeature {
    summon_deadline: Option<Timestamp>,
}

impl ProximityFeature {
    pub fn is_armed(&self) -> bool {
        self.summon_deadline.is_some()
    }

    pub(crate) fn evaluate(&mut self, input: Input<'_>, cx: &Cx<'_>) -> Vec<ProposedAction> {
        match input {
            Input::Speech {
                speaker: Role::Trainer,
                normalized,
                ..
            } => {
                if SUMMON_PHRASES.iter().any(|p| contains_phrase(normalized, p)) && cx.name_mentioned() {
                    self.arm(cx);
                }
                Vec::new()
            }
            Input::Command(cmd) => {
                if SUMMON_COMMANDS.contains(&cmd.name.as_str()) {
                    self.arm(cx);
                }
                Vec::new()
            }
            Input::Telemetry { parameter, value, .. } if parameter == PROXIMITY_PARAM => {
                let proximity = value.as_float();
                if self.summon_deadline.is_some() && proximity >= HEEL_TARGET {
                    self.summon_deadline = None;
                    info!(pet = %cx.target.short(), proximity, "Summon answered");
                }
                if proximity <= THRESHOLD {
                    let scale = falling_scale(proximity, THRESHOLD, 0.0);
                    return vec![cx.scaled(FeatureKind::Proximity, DeviceCommand::Shock, scale, "too_far")];
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn arm(&mut self, cx: &Cx<'_>) {
        let delay = cx.difficulty(FeatureKind::Proximity).delay_secs;
        self.summon_deadline = Some(cx.at + Duration::try_from_secs_f32(delay).unwrap_or_default());
        info!(pet = %cx.target.short(), delay, "Summon started");
    }

    pub(crate) fn poll(&mut self, cx: &Cx<'_>) -> Vec<ProposedAction> {
        match self.summon_deadline {
            Some(deadline) if cx.at >= deadline => {
                self.summon_deadline = None;
                vec![cx.single(FeatureKind::Proximity, DeviceCommand::Shock, "didnt_heel")]
            }
            _ => Vec::new(),
        }
    }

    pub fn cancel(&mut self) {
        self.summon_deadline = None;
    }
}
