//! Feature engine: the closed set of interaction rules and the router that feeds
//! fused events into them.
//!
//! Each pet's features are evaluated on that pet's own client, next to its avatar
//! telemetry and its feedback device. Trainer speech, telemetry and commands reach
//! it either from local collaborators or forwarded over the session.

mod edge;
mod focus;
mod proximity;
mod remote;
mod tricks;
mod word_game;
mod words;

pub use edge::EdgeFeature;
pub use focus::FocusFeature;
pub use proximity::ProximityFeature;
pub use remote::RemoteFeature;
pub use tricks::{Trick, TricksFeature};
pub use word_game::WordGameFeature;
pub use words::{ForbiddenFeature, ScoldingFeature};

use crate::action::{DeviceCommand, ProposedAction};
use crate::error::{TrainerError, TrainerResult};
use crate::profile::{Difficulty, Profile};
use crate::session::SessionContext;
use crate::signal::{Command, FusedEvent, ParamValue, SessionEvent, Signal, SpeechEvent, TelemetryEvent};
use crate::text::{contains_phrase, normalize_text};
use crate::transcript::TranscriptLog;
use crate::types::{ParticipantId, Role, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Focus,
    Proximity,
    Tricks,
    Scolding,
    ForbiddenWords,
    WordGame,
    Pull,
    Depth,
    Remote,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 9] = [
        FeatureKind::Focus,
        FeatureKind::Proximity,
        FeatureKind::Tricks,
        FeatureKind::Scolding,
        FeatureKind::ForbiddenWords,
        FeatureKind::WordGame,
        FeatureKind::Pull,
        FeatureKind::Depth,
        FeatureKind::Remote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::Focus => "focus",
            FeatureKind::Proximity => "proximity",
            FeatureKind::Tricks => "tricks",
            FeatureKind::Scolding => "scolding",
            FeatureKind::ForbiddenWords => "forbidden_words",
            FeatureKind::WordGame => "word_game",
            FeatureKind::Pull => "pull",
            FeatureKind::Depth => "depth",
            FeatureKind::Remote => "remote",
        }
    }

    /// Which role may originate each kind of signal for this feature. The target is
    /// always a pet.
    pub const fn affinity(self) -> Affinity {
        use Role::{Pet, Trainer};
        let (speech, telemetry, command) = match self {
            FeatureKind::Focus => (Some(Trainer), Some(Pet), None),
            FeatureKind::Proximity => (Some(Trainer), Some(Pet), Some(Trainer)),
            FeatureKind::Tricks => (Some(Trainer), Some(Pet), Some(Trainer)),
            FeatureKind::Scolding => (Some(Trainer), None, None),
            FeatureKind::ForbiddenWords => (Some(Pet), None, None),
            FeatureKind::WordGame => (Some(Pet), None, Some(Trainer)),
            FeatureKind::Pull => (None, Some(Pet), None),
            FeatureKind::Depth => (None, Some(Pet), None),
            FeatureKind::Remote => (None, Some(Trainer), Some(Trainer)),
        };
        Affinity {
            speech,
            telemetry,
            command,
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureKind {
    type Err = TrainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        FeatureKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| TrainerError::Validation(format!("unknown feature: {}", s)))
    }
}

/// Allowed origin role per signal kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Affinity {
    pub speech: Option<Role>,
    pub telemetry: Option<Role>,
    pub command: Option<Role>,
}

/// One signal as seen by a feature.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Input<'a> {
    Speech {
        speaker: Role,
        raw: &'a str,
        normalized: &'a str,
    },
    Telemetry {
        parameter: &'a str,
        value: ParamValue,
        previous: Option<ParamValue>,
    },
    Command(&'a Command),
}

/// Everything a feature may read while evaluating one pet.
pub(crate) struct Cx<'a> {
    pub target: &'a ParticipantId,
    pub origin: &'a ParticipantId,
    pub profile: &'a Profile,
    pub at: Timestamp,
    pub params: &'a HashMap<String, ParamValue>,
    pub transcript: &'a TranscriptLog,
}

impl Cx<'_> {
    pub fn difficulty(&self, kind: FeatureKind) -> &Difficulty {
        self.profile.difficulty(kind)
    }

    pub fn single(&self, kind: FeatureKind, command: DeviceCommand, reason: impl Into<String>) -> ProposedAction {
        ProposedAction::single(
            kind,
            self.target.clone(),
            self.origin.clone(),
            command,
            self.difficulty(kind),
            reason,
            self.at,
        )
    }

    pub fn scaled(
        &self,
        kind: FeatureKind,
        command: DeviceCommand,
        scale: f32,
        reason: impl Into<String>,
    ) -> ProposedAction {
        ProposedAction::scaled(
            kind,
            self.target.clone(),
            self.origin.clone(),
            command,
            self.difficulty(kind),
            scale,
            reason,
            self.at,
        )
    }

    /// Current value of a boolean avatar parameter.
    pub fn flag(&self, name: &str, default: bool) -> bool {
        self.params.get(name).map(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn level(&self, name: &str, default: f32) -> f32 {
        self.params.get(name).map(|v| v.as_float()).unwrap_or(default)
    }

    /// True when one of the pet's names was said in the trainer's last few utterances.
    pub fn name_mentioned(&self) -> bool {
        if self.profile.names.is_empty() {
            return false;
        }
        self.transcript
            .recent_from(Role::Trainer, NAME_LOOKBACK)
            .iter()
            .map(|c| normalize_text(&c.text))
            .any(|text| self.profile.names.iter().any(|n| contains_phrase(&text, n)))
    }
}

/// Trainer utterances searched for the pet's name.
const NAME_LOOKBACK: usize = 3;

/// A feature instance with its private state, one per pet.
#[derive(Debug)]
pub enum Feature {
    Focus(FocusFeature),
    Proximity(ProximityFeature),
    Tricks(TricksFeature),
    Scolding(ScoldingFeature),
    ForbiddenWords(ForbiddenFeature),
    WordGame(WordGameFeature),
    Pull(EdgeFeature),
    Depth(EdgeFeature),
    Remote(RemoteFeature),
}

impl Feature {
    pub fn new(kind: FeatureKind) -> Self {
        match kind {
            FeatureKind::Focus => Feature::Focus(FocusFeature::default()),
            FeatureKind::Proximity => Feature::Proximity(ProximityFeature::default()),
            FeatureKind::Tricks => Feature::Tricks(TricksFeature::default()),
            FeatureKind::Scolding => Feature::Scolding(ScoldingFeature),
            FeatureKind::ForbiddenWords => Feature::ForbiddenWords(ForbiddenFeature::default()),
            FeatureKind::WordGame => Feature::WordGame(WordGameFeature::default()),
            FeatureKind::Pull => Feature::Pull(EdgeFeature::pull()),
            FeatureKind::Depth => Feature::Depth(EdgeFeature::depth()),
            FeatureKind::Remote => Feature::Remote(RemoteFeature),
        }
    }

    pub fn kind(&self) -> FeatureKind {
        match self {
            Feature::Focus(_) => FeatureKind::Focus,
            Feature::Proximity(_) => FeatureKind::Proximity,
            Feature::Tricks(_) => FeatureKind::Tricks,
            Feature::Scolding(_) => FeatureKind::Scolding,
            Feature::ForbiddenWords(_) => FeatureKind::ForbiddenWords,
            Feature::WordGame(_) => FeatureKind::WordGame,
            Feature::Pull(_) => FeatureKind::Pull,
            Feature::Depth(_) => FeatureKind::Depth,
            Feature::Remote(_) => FeatureKind::Remote,
        }
    }

    pub(crate) fn evaluate(&mut self, input: Input<'_>, cx: &Cx<'_>) -> Vec<ProposedAction> {
        match self {
            Feature::Focus(f) => f.evaluate(input, cx),
            Feature::Proximity(f) => f.evaluate(input, cx),
            Feature::Tricks(f) => f.evaluate(input, cx),
            Feature::Scolding(f) => f.evaluate(input, cx),
            Feature::ForbiddenWords(f) => f.evaluate(input, cx),
            Feature::WordGame(f) => f.evaluate(input, cx),
            Feature::Pull(f) | Feature::Depth(f) => f.evaluate(input, cx),
            Feature::Remote(f) => f.evaluate(input, cx),
        }
    }

    /// Fire expired timers and time-driven state.
    pub(crate) fn poll(&mut self, cx: &Cx<'_>) -> Vec<ProposedAction> {
        match self {
            Feature::Focus(f) => f.poll(cx),
            Feature::Proximity(f) => f.poll(cx),
            Feature::Tricks(f) => f.poll(cx),
            Feature::WordGame(f) => f.poll(cx),
            Feature::Scolding(_)
            | Feature::ForbiddenWords(_)
            | Feature::Pull(_)
            | Feature::Depth(_)
            | Feature::Remote(_) => Vec::new(),
        }
    }

    /// Drop pending timers and per-feature history.
    pub fn cancel(&mut self) {
        match self {
            Feature::Focus(f) => f.reset(),
            Feature::Proximity(f) => f.cancel(),
            Feature::Tricks(f) => f.cancel(),
            Feature::ForbiddenWords(f) => f.reset(),
            Feature::WordGame(f) => f.cancel(),
            Feature::Pull(f) | Feature::Depth(f) => f.reset(),
            Feature::Scolding(_) | Feature::Remote(_) => {}
        }
    }

    /// Whether a deadline is armed.
    pub fn has_pending(&self) -> bool {
        match self {
            Feature::Proximity(f) => f.is_armed(),
            Feature::Tricks(f) => f.active().is_some(),
            Feature::WordGame(f) => f.expected().is_some(),
            _ => false,
        }
    }
}

#[derive(Debug)]
struct PetState {
    features: Vec<Feature>,
    params: HashMap<String, ParamValue>,
}

impl PetState {
    fn new() -> Self {
        Self {
            features: FeatureKind::ALL.into_iter().map(Feature::new).collect(),
            params: HashMap::new(),
        }
    }

    fn feature_mut(&mut self, kind: FeatureKind) -> Option<&mut Feature> {
        self.features.iter_mut().find(|f| f.kind() == kind)
    }
}

/// Routes fused events to the features of the pets evaluated on this client.
#[derive(Debug, Default)]
pub struct FeatureEngine {
    pets: HashMap<ParticipantId, PetState>,
    transcript: TranscriptLog,
}

impl FeatureEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &TranscriptLog {
        &self.transcript
    }

    /// Evaluate one fused event.
    ///
    /// Returns `Permission` when a command comes from a role the feature does not
    /// accept or addresses a non-pet; callers treat that as fatal.
    pub fn evaluate(&mut self, fused: &FusedEvent, ctx: &SessionContext) -> TrainerResult<Vec<ProposedAction>> {
        let origin = fused.origin();
        match &fused.event.payload {
            Signal::Speech(speech) | Signal::Session(SessionEvent::Speech(speech)) => {
                Ok(self.on_speech(origin, speech, fused.at(), ctx))
            }
            Signal::Telemetry(t) | Signal::Session(SessionEvent::Telemetry(t)) => {
                if fused.stale {
                    debug!(parameter = %t.parameter, "Ignoring stale telemetry");
                    return Ok(Vec::new());
                }
                Ok(self.on_telemetry(origin, t, fused.at(), ctx))
            }
            Signal::Session(SessionEvent::Command(cmd)) => self.on_command(origin, cmd, fused.at(), ctx),
            Signal::Session(SessionEvent::Peer(_)) | Signal::Session(SessionEvent::Log(_)) => Ok(Vec::new()),
        }
    }

    fn on_speech(
        &mut self,
        origin: &ParticipantId,
        speech: &SpeechEvent,
        at: Timestamp,
        ctx: &SessionContext,
    ) -> Vec<ProposedAction> {
        let targets: Vec<ParticipantId> = match speech.speaker_role {
            // Trainer speech is either captured on this client or forwarded by the trainer.
            Role::Trainer => {
                if origin != &ctx.local && ctx.role_of(origin) != Some(Role::Trainer) {
                    warn!(origin = %origin.short(), "Dropping trainer speech from a non-trainer peer");
                    return Vec::new();
                }
                ctx.evaluated_pets().collect()
            }
            Role::Pet => ctx
                .evaluated_pets()
                .filter(|p| p == origin)
                .collect(),
        };

        self.transcript.push(speech.speaker_role, speech.text.clone(), at);
        let normalized = normalize_text(&speech.text);
        if normalized.is_empty() {
            return Vec::new();
        }
        let input = Input::Speech {
            speaker: speech.speaker_role,
            raw: &speech.text,
            normalized: &normalized,
        };

        let mut out = Vec::new();
        for target in targets {
            out.extend(self.run(&target, origin, at, ctx, input, |a| a.speech == Some(speech.speaker_role)));
        }
        out
    }

    fn on_telemetry(
        &mut self,
        origin: &ParticipantId,
        t: &TelemetryEvent,
        at: Timestamp,
        ctx: &SessionContext,
    ) -> Vec<ProposedAction> {
        let Some(origin_role) = ctx.role_of(origin) else {
            debug!(origin = %origin.short(), "Telemetry from unknown participant");
            return Vec::new();
        };
        let targets: Vec<ParticipantId> = match origin_role {
            Role::Pet => ctx.evaluated_pets().filter(|p| p == origin).collect(),
            Role::Trainer => ctx.evaluated_pets().collect(),
        };

        let mut out = Vec::new();
        for target in targets {
            let state = self.pets.entry(target.clone()).or_insert_with(PetState::new);
            let previous = state.params.insert(t.parameter.clone(), t.value);
            let input = Input::Telemetry {
                parameter: &t.parameter,
                value: t.value,
                previous,
            };
            out.extend(self.run(&target, origin, at, ctx, input, |a| a.telemetry == Some(origin_role)));
        }
        out
    }

    fn on_command(
        &mut self,
        origin: &ParticipantId,
        cmd: &Command,
        at: Timestamp,
        ctx: &SessionContext,
    ) -> TrainerResult<Vec<ProposedAction>> {
        let origin_role = ctx
            .role_of(origin)
            .ok_or_else(|| TrainerError::Permission(format!("command from unknown participant {}", origin)))?;
        if cmd.feature.affinity().command != Some(origin_role) {
            return Err(TrainerError::Permission(format!(
                "{} may not issue {} commands",
                origin_role, cmd.feature
            )));
        }

        let targets: Vec<ParticipantId> = match &cmd.target {
            Some(target) => match ctx.role_of(target) {
                Some(Role::Pet) => ctx.evaluated_pets().filter(|p| p == target).collect(),
                Some(Role::Trainer) => {
                    return Err(TrainerError::Permission(format!(
                        "{} command addressed to the trainer",
                        cmd.feature
                    )))
                }
                None => {
                    debug!(target = %target.short(), "Command for a participant no longer in session");
                    Vec::new()
                }
            },
            None => ctx.evaluated_pets().collect(),
        };

        let mut out = Vec::new();
        for target in targets {
            out.extend(self.run(&target, origin, at, ctx, Input::Command(cmd), |_| true));
        }
        Ok(out)
    }

    fn run(
        &mut self,
        target: &ParticipantId,
        origin: &ParticipantId,
        at: Timestamp,
        ctx: &SessionContext,
        input: Input<'_>,
        accepts: impl Fn(&Affinity) -> bool,
    ) -> Vec<ProposedAction> {
        let Some(profile) = ctx.profile_of(target) else {
            debug!(pet = %target.short(), "No profile assigned, skipping");
            return Vec::new();
        };
        let command_feature = match input {
            Input::Command(cmd) => Some(cmd.feature),
            _ => None,
        };
        let state = self.pets.entry(target.clone()).or_insert_with(PetState::new);
        let cx = Cx {
            target,
            origin,
            profile,
            at,
            params: &state.params,
            transcript: &self.transcript,
        };
        let mut out = Vec::new();
        for feature in state.features.iter_mut() {
            let kind = feature.kind();
            if !profile.is_enabled(kind) || !accepts(&kind.affinity()) {
                continue;
            }
            if command_feature.is_some_and(|k| k != kind) {
                continue;
            }
            out.extend(feature.evaluate(input, &cx));
        }
        out
    }

    /// Fire expired deadlines and advance time-driven state for every evaluated pet.
    pub fn poll_deadlines(&mut self, now: Timestamp, ctx: &SessionContext) -> Vec<ProposedAction> {
        let mut out = Vec::new();
        let pets: Vec<ParticipantId> = ctx.evaluated_pets().collect();
        // A pet that is no longer evaluated (trainer gone, session left) starts over.
        let before = self.pets.len();
        self.pets.retain(|id, _| pets.contains(id));
        if self.pets.len() < before {
            debug!(dropped = before - self.pets.len(), "Feature state reset");
        }
        for pet in pets {
            let Some(profile) = ctx.profile_of(&pet) else {
                continue;
            };
            let state = self.pets.entry(pet.clone()).or_insert_with(PetState::new);
            // Deadlines fire on behalf of the pet itself.
            let cx = Cx {
                target: &pet,
                origin: &pet,
                profile,
                at: now,
                params: &state.params,
                transcript: &self.transcript,
            };
            for feature in state.features.iter_mut() {
                if profile.is_enabled(feature.kind()) {
                    out.extend(feature.poll(&cx));
                }
            }
        }
        out
    }

    /// Forget every timer and cached parameter of `participant`.
    pub fn cancel_participant(&mut self, participant: &ParticipantId) {
        if self.pets.remove(participant).is_some() {
            debug!(participant = %participant.short(), "Feature state cancelled");
        }
    }

    pub fn cancel_feature(&mut self, participant: &ParticipantId, kind: FeatureKind) {
        if let Some(feature) = self.pets.get_mut(participant).and_then(|s| s.feature_mut(kind)) {
            feature.cancel();
        }
    }

    /// Cancel timers of features the participant's current profile no longer enables.
    pub fn sync_profile(&mut self, participant: &ParticipantId, profile: &Profile) {
        if let Some(state) = self.pets.get_mut(participant) {
            for feature in state.features.iter_mut() {
                if !profile.is_enabled(feature.kind()) {
                    feature.cancel();
                }
            }
        }
    }

    pub fn cancel_all(&mut self) {
        self.pets.clear();
        self.transcript.clear();
    }

    /// Whether `participant` has an armed deadline for `kind`.
    pub fn has_pending(&self, participant: &ParticipantId, kind: FeatureKind) -> bool {
        self.pets
            .get(participant)
            .and_then(|s| s.features.iter().find(|f| f.kind() == kind))
            .is_some_and(Feature::has_pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_names_round_trip() {
        for kind in FeatureKind::ALL {
            assert_eq!(kind.as_str().parse::<FeatureKind>().unwrap(), kind);
        }
        assert_eq!("Forbidden Words".parse::<FeatureKind>().unwrap(), FeatureKind::ForbiddenWords);
        assert!("fetch".parse::<FeatureKind>().is_err());
    }

    #[test]
    fn only_trainer_issues_commands() {
        for kind in FeatureKind::ALL {
            assert_ne!(kind.affinity().command, Some(Role::Pet), "{}", kind);
        }
        assert_eq!(FeatureKind::Scolding.affinity().speech, Some(Role::Trainer));
        assert_eq!(FeatureKind::ForbiddenWords.affinity().speech, Some(Role::Pet));
    }
}
