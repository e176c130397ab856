use super::{Cx, FeatureKind, Input};
use crate::action::{rising_scale, DeviceCommand, ProposedAction};
use std::collections::HashSet;

const PULL_THRESHOLD: f32 = 0.5;
const PULL_TARGETS: [&str; 3] = ["LeftEar", "RightEar", "Tail"];

const DEPTH_THRESHOLD: f32 = 0.9;
const DEPTH_TARGETS: [&str; 3] = [
    "OGB/Orf/Pussy/PenOthers",
    "OGB/Orf/Ass/PenOthers",
    "OGB/Orf/Mouth/PenOthers",
];

/// Threshold watcher over avatar parameters that fires once per crossing.
///
/// A target is "high" while its level is at or above the threshold; it proposes a
/// shock scaled by how far past the threshold it went, and re-arms only after
/// dropping back below.
#[derive(Debug)]
pub struct EdgeFeature {
    kind: FeatureKind,
    threshold: f32,
    targets: &'static [&'static str],
    high: HashSet<&'static str>,
}

impl EdgeFeature {
    /// Ear and tail stretch, counted only while the bone is grabbed.
    pub fn pull() -> Self {
        Self {
            kind: FeatureKind::Pull,
            threshold: PULL_THRESHOLD,
            targets: &PULL_TARGETS,
            high: HashSet::new(),
        }
    }

    pub fn depth() -> Self {
        Self {
            kind: FeatureKind::Depth,
            threshold: DEPTH_THRESHOLD,
            targets: &DEPTH_TARGETS,
            high: HashSet::new(),
        }
    }

    /// Target base name affected by `parameter`, if any.
    fn target_of(&self, parameter: &str) -> Option<&'static str> {
        self.targets.iter().copied().find(|base| match self.kind {
            FeatureKind::Pull => parameter
                .strip_prefix(base)
                .is_some_and(|rest| rest == "_Stretch" || rest == "_IsGrabbed"),
            _ => parameter == *base,
        })
    }

    fn level(&self, base: &str, cx: &Cx<'_>) -> Option<f32> {
        match self.kind {
            FeatureKind::Pull => {
                if !cx.flag(&format!("{}_IsGrabbed", base), false) {
                    return None;
                }
                Some(cx.level(&format!("{}_Stretch", base), 0.0))
            }
            _ => Some(cx.level(base, 0.0)),
        }
    }

    pub(crate) fn evaluate(&mut self, input: Input<'_>, cx: &Cx<'_>) -> Vec<ProposedAction> {
        let Input::Telemetry { parameter, .. } = input else {
            return Vec::new();
        };
        let Some(base) = self.target_of(parameter) else {
            return Vec::new();
        };
        match self.level(base, cx) {
            Some(level) if level >= self.threshold => {
                if !self.high.insert(base) {
                    return Vec::new();
                }
                let scale = rising_scale(level, self.threshold, 1.0);
                vec![cx.scaled(self.kind, DeviceCommand::Shock, scale, base)]
            }
            _ => {
                self.high.remove(base);
                Vec::new()
            }
        }
    }

    pub fn is_high(&self, base: &str) -> bool {
        self.high.contains(base)
    }

    pub fn reset(&mut self) {
        self.high.clear();
    }
}
