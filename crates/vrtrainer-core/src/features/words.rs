use super::{Cx, FeatureKind, Input};
use crate::action::{DeviceCommand, ProposedAction};
use crate::text::contains_substring;
use crate::types::{Role, Timestamp};
use std::collections::VecDeque;
use std::time::Duration;

const ESCALATION_WINDOW: Duration = Duration::from_secs(60);
/// Offenses needed inside the window to reach full strength.
const ESCALATION_STEPS: usize = 3;

fn first_match<'a>(normalized: &str, words: &'a [String]) -> Option<&'a str> {
    words
        .iter()
        .map(String::as_str)
        .find(|w| contains_substring(normalized, w))
}

/// Trainer speech containing one of the pet profile's scolding words.
#[derive(Debug, Default)]
pub struct ScoldingFeature;

impl ScoldingFeature {
    pub(crate) fn evaluate(&mut self, input: Input<'_>, cx: &Cx<'_>) -> Vec<ProposedAction> {
        match input {
            Input::Speech {
                speaker: Role::Trainer,
                normalized,
                ..
            } if first_match(normalized, &cx.profile.scolding_words).is_some() => {
                vec![cx.single(FeatureKind::Scolding, DeviceCommand::Shock, "scold")]
            }
            _ => Vec::new(),
        }
    }
}

/// Pet speech containing a forbidden word. Repeat offenses inside the window
/// climb from minimum to maximum strength.
#[derive(Debug, Default)]
pub struct ForbiddenFeature {
    offenses: VecDeque<Timestamp>,
}

impl ForbiddenFeature {
    pub fn recent_offenses(&self) -> usize {
        self.offenses.len()
    }

    pub(crate) fn evaluate(&mut self, input: Input<'_>, cx: &Cx<'_>) -> Vec<ProposedAction> {
        let Input::Speech {
            speaker: Role::Pet,
            normalized,
            ..
        } = input
        else {
            return Vec::new();
        };
        let Some(word) = first_match(normalized, &cx.profile.forbidden_words) else {
            return Vec::new();
        };

        while let Some(&first) = self.offenses.front() {
            if cx.at.saturating_sub(first) >= ESCALATION_WINDOW {
                self.offenses.pop_front();
            } else {
                break;
            }
        }
        self.offenses.push_back(cx.at);

        let repeats = self.offenses.len() - 1;
        let step = (repeats as f32 / (ESCALATION_STEPS - 1) as f32).min(1.0);
        let mut action = cx.single(FeatureKind::ForbiddenWords, DeviceCommand::Shock, word);
        action.intensity = action.difficulty.strength.lerp(step);
        vec![action]
    }

    pub fn reset(&mut self) {
        self.offenses.clear();
    }
}
