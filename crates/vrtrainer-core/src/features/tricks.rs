use super::{Cx, FeatureKind, Input};
use crate::action::{DeviceCommand, ProposedAction};
use crate::text::contains_phrase;
use crate::types::{Role, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trick {
    Paw,
    Sit,
    LayDown,
    Beg,
    PlayDead,
    RollOver,
    Present,
}

impl Trick {
    pub const ALL: [Trick; 7] = [
        Trick::Paw,
        Trick::Sit,
        Trick::LayDown,
        Trick::Beg,
        Trick::PlayDead,
        Trick::RollOver,
        Trick::Present,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Trick::Paw => "paw",
            Trick::Sit => "sit",
            Trick::LayDown => "lay_down",
            Trick::Beg => "beg",
            Trick::PlayDead => "play_dead",
            Trick::RollOver => "roll_over",
            Trick::Present => "present",
        }
    }

    pub fn from_name(name: &str) -> Option<Trick> {
        let name = name.trim().to_ascii_lowercase().replace(' ', "_");
        Trick::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Spoken forms, including the usual mis-transcriptions.
    fn phrases(&self) -> &'static [&'static str] {
        match self {
            Trick::Paw => &["paw", "poor", "pour", "pore"],
            Trick::Sit => &["sit"],
            Trick::LayDown => &["lay down", "laydown", "lie down", "layed down"],
            Trick::Beg => &["beg"],
            Trick::PlayDead => &["play dead", "playdead", "played dead"],
            Trick::RollOver => &["rollover", "roll over"],
            Trick::Present => &["present"],
        }
    }

    fn spoken_in(normalized: &str) -> Option<Trick> {
        Trick::ALL
            .into_iter()
            .find(|t| t.phrases().iter().any(|p| contains_phrase(normalized, p)))
    }

    /// Pose check over the avatar's floor-contact flags.
    fn completed(&self, cx: &Cx<'_>) -> bool {
        let f = |name: &str| cx.flag(name, false);
        let hands_min = f("Trainer/HandFloorLeftMin") || f("Trainer/HandFloorRightMin");
        let hands_max = f("Trainer/HandFloorLeftMax") && f("Trainer/HandFloorRightMax");
        let feet_max = f("Trainer/FootFloorLeftMax") && f("Trainer/FootFloorRightMax");
        let feet_min = f("Trainer/FootFloorLeftMin") || f("Trainer/FootFloorRightMin");
        let hips_max = f("Trainer/HipsFloorMax");
        let head_max = f("Trainer/HeadFloorMax");
        let head_min = f("Trainer/HeadFloorMin");
        match self {
            Trick::Paw => {
                let one_hand_up = !f("Trainer/HandFloorLeftMin") || !f("Trainer/HandFloorRightMin");
                one_hand_up && feet_max && hips_max && !head_min
            }
            Trick::Sit => hands_max && feet_max && hips_max && !head_min,
            Trick::LayDown => hands_max && feet_max && hips_max && head_max,
            Trick::Beg => !hands_min && feet_max && hips_max && !head_min,
            Trick::PlayDead | Trick::RollOver => !hands_min && !feet_min && hips_max && head_max,
            Trick::Present => hands_max && feet_max && !f("Trainer/HipsFloorMin") && head_max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveTrick {
    pub trick: Trick,
    pub deadline: Timestamp,
}

/// Trainer-requested poses. Starting a trick vibrates as a cue; holding the pose
/// before the delay runs out earns a reward vibration, otherwise a shock.
#[derive(Debug, Default)]
pub struct TricksFeature {
    active: Option<ActiveTrick>,
}

impl TricksFeature {
    pub fn active(&self) -> Option<ActiveTrick> {
        self.active
    }

    pub(crate) fn evaluate(&mut self, input: Input<'_>, cx: &Cx<'_>) -> Vec<ProposedAction> {
        match input {
            Input::Command(cmd) => match Trick::from_name(&cmd.name) {
                Some(trick) => self.start(trick, cx),
                None => {
                    info!(trick = %cmd.name, "Unknown trick requested");
                    Vec::new()
                }
            },
            Input::Speech {
                speaker: Role::Trainer,
                normalized,
                ..
            } => match Trick::spoken_in(normalized) {
                Some(trick) if cx.name_mentioned() => self.start(trick, cx),
                _ => Vec::new(),
            },
            Input::Telemetry { .. } => match self.active {
                Some(active) if active.trick.completed(cx) => {
                    self.active = None;
                    info!(pet = %cx.target.short(), trick = active.trick.as_str(), "Trick completed");
                    vec![cx.single(FeatureKind::Tricks, DeviceCommand::Vibrate, "task_complete")]
                }
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    fn start(&mut self, trick: Trick, cx: &Cx<'_>) -> Vec<ProposedAction> {
        if self.active.is_some() {
            return Vec::new();
        }
        let delay = cx.difficulty(FeatureKind::Tricks).delay_secs;
        self.active = Some(ActiveTrick {
            trick,
            deadline: cx.at + Duration::try_from_secs_f32(delay).unwrap_or_default(),
        });
        info!(pet = %cx.target.short(), trick = trick.as_str(), delay, "Trick started");
        vec![cx.single(FeatureKind::Tricks, DeviceCommand::Vibrate, "task_start")]
    }

    pub(crate) fn poll(&mut self, cx: &Cx<'_>) -> Vec<ProposedAction> {
        match self.active {
            Some(active) if cx.at >= active.deadline => {
                self.active = None;
                vec![cx.single(FeatureKind::Tricks, DeviceCommand::Shock, active.trick.as_str())]
            }
            _ => Vec::new(),
        }
    }

    pub fn cancel(&mut self) {
        self.active = None;
    }
}
