//! Trainer-owned profiles: feature toggles, difficulty settings and word lists.
//!
//! Everything here is validated at edit time. The feature engine never re-checks a
//! profile, it trusts that whatever reached it went through [`Profile::validate`].

use crate::error::{TrainerError, TrainerResult};
use crate::features::FeatureKind;
use crate::text::normalize_text;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Device limits: strength is a percentage, duration is whole device seconds.
pub const STRENGTH_LIMIT: f32 = 100.0;
pub const DURATION_LIMIT_SECS: f32 = 15.0;
pub const DELAY_LIMIT_SECS: f32 = 600.0;
pub const COOLDOWN_LIMIT_SECS: f32 = 3600.0;

pub const DEFAULT_PROFILE_NAME: &str = "Default";

/// Inclusive numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f32,
    pub max: f32,
}

impl Bounds {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f32) -> f32 {
        value.max(self.min).min(self.max)
    }

    /// Linear interpolation, `scale` clamped to `[0, 1]`.
    pub fn lerp(&self, scale: f32) -> f32 {
        let s = if scale.is_finite() { scale.clamp(0.0, 1.0) } else { 0.0 };
        self.min + (self.max - self.min) * s
    }

    fn validate(&self, what: &str, limit: f32) -> TrainerResult<()> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(TrainerError::Validation(format!("{} must be finite", what)));
        }
        if self.min < 0.0 || self.max > limit {
            return Err(TrainerError::Validation(format!(
                "{} must lie within 0..={}, got {}..={}",
                what, limit, self.min, self.max
            )));
        }
        if self.min > self.max {
            return Err(TrainerError::Validation(format!(
                "{} min {} exceeds max {}",
                what, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Upper bound on accumulated output duration inside a rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationCap {
    pub max_total_secs: f32,
    pub window_secs: f32,
}

/// Timing and intensity limits for one feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Difficulty {
    /// Grace period for timed features (summon, tricks, word prompt).
    pub delay_secs: f32,
    pub cooldown_secs: f32,
    pub duration: Bounds,
    pub strength: Bounds,
    pub duration_cap: Option<DurationCap>,
}

impl Default for Difficulty {
    fn default() -> Self {
        Self {
            delay_secs: 4.0,
            cooldown_secs: 2.0,
            duration: Bounds::new(0.2, 1.0),
            strength: Bounds::new(10.0, 50.0),
            duration_cap: None,
        }
    }
}

impl Difficulty {
    pub fn validate(&self, feature: FeatureKind) -> TrainerResult<()> {
        let scalar = |name: &str, v: f32, limit: f32| -> TrainerResult<()> {
            if !v.is_finite() || v < 0.0 || v > limit {
                return Err(TrainerError::Validation(format!(
                    "{}: {} must lie within 0..={}, got {}",
                    feature, name, limit, v
                )));
            }
            Ok(())
        };
        scalar("delay", self.delay_secs, DELAY_LIMIT_SECS)?;
        scalar("cooldown", self.cooldown_secs, COOLDOWN_LIMIT_SECS)?;
        self.duration
            .validate(&format!("{}: duration", feature), DURATION_LIMIT_SECS)?;
        self.strength
            .validate(&format!("{}: strength", feature), STRENGTH_LIMIT)?;
        if let Some(cap) = self.duration_cap {
            let ok = cap.max_total_secs.is_finite()
                && cap.window_secs.is_finite()
                && cap.max_total_secs > 0.0
                && cap.window_secs > 0.0;
            if !ok {
                return Err(TrainerError::Validation(format!(
                    "{}: duration cap needs positive finite total and window",
                    feature
                )));
            }
        }
        Ok(())
    }
}

/// One difficulty block per feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Difficulties {
    pub focus: Difficulty,
    pub proximity: Difficulty,
    pub tricks: Difficulty,
    pub scolding: Difficulty,
    pub forbidden_words: Difficulty,
    pub word_game: Difficulty,
    pub pull: Difficulty,
    pub depth: Difficulty,
    pub remote: Difficulty,
}

impl Default for Difficulties {
    fn default() -> Self {
        let base = Difficulty::default();
        Self {
            focus: base,
            proximity: base,
            tricks: Difficulty {
                delay_secs: 10.0,
                ..base
            },
            scolding: base,
            forbidden_words: base,
            word_game: base,
            pull: base,
            depth: base,
            remote: base,
        }
    }
}

impl Difficulties {
    pub fn get(&self, feature: FeatureKind) -> &Difficulty {
        match feature {
            FeatureKind::Focus => &self.focus,
            FeatureKind::Proximity => &self.proximity,
            FeatureKind::Tricks => &self.tricks,
            FeatureKind::Scolding => &self.scolding,
            FeatureKind::ForbiddenWords => &self.forbidden_words,
            FeatureKind::WordGame => &self.word_game,
            FeatureKind::Pull => &self.pull,
            FeatureKind::Depth => &self.depth,
            FeatureKind::Remote => &self.remote,
        }
    }

    pub fn get_mut(&mut self, feature: FeatureKind) -> &mut Difficulty {
        match feature {
            FeatureKind::Focus => &mut self.focus,
            FeatureKind::Proximity => &mut self.proximity,
            FeatureKind::Tricks => &mut self.tricks,
            FeatureKind::Scolding => &mut self.scolding,
            FeatureKind::ForbiddenWords => &mut self.forbidden_words,
            FeatureKind::WordGame => &mut self.word_game,
            FeatureKind::Pull => &mut self.pull,
            FeatureKind::Depth => &mut self.depth,
            FeatureKind::Remote => &mut self.remote,
        }
    }
}

/// Word Game flavour. `Prompt` waits for a trainer-announced word, the rest are
/// standing rules the pet must not break.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordGameMode {
    #[default]
    Prompt,
    Pronouns,
    LetterE,
    Contractions,
    SwearWords,
    Negativity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub enabled: BTreeSet<FeatureKind>,
    #[serde(default)]
    pub difficulty: Difficulties,
    /// Names the pet answers to.
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub scolding_words: Vec<String>,
    #[serde(default)]
    pub forbidden_words: Vec<String>,
    #[serde(default)]
    pub word_game_mode: WordGameMode,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: BTreeSet::new(),
            difficulty: Difficulties::default(),
            names: Vec::new(),
            scolding_words: Vec::new(),
            forbidden_words: Vec::new(),
            word_game_mode: WordGameMode::default(),
        }
    }

    pub fn with_feature(mut self, feature: FeatureKind) -> Self {
        self.enabled.insert(feature);
        self
    }

    pub fn is_enabled(&self, feature: FeatureKind) -> bool {
        self.enabled.contains(&feature)
    }

    pub fn difficulty(&self, feature: FeatureKind) -> &Difficulty {
        self.difficulty.get(feature)
    }

    /// Check every field and return a copy with word lists normalized.
    pub fn validate(&self) -> TrainerResult<Profile> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(TrainerError::Validation("profile name is empty".into()));
        }
        for feature in FeatureKind::ALL {
            self.difficulty.get(feature).validate(feature)?;
        }
        Ok(Profile {
            name: name.to_string(),
            enabled: self.enabled.clone(),
            difficulty: self.difficulty.clone(),
            names: validate_words("names", &self.names)?,
            scolding_words: validate_words("scolding words", &self.scolding_words)?,
            forbidden_words: validate_words("forbidden words", &self.forbidden_words)?,
            word_game_mode: self.word_game_mode,
        })
    }
}

fn validate_words(list: &str, words: &[String]) -> TrainerResult<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(words.len());
    for raw in words {
        let w = normalize_text(raw);
        if w.is_empty() {
            return Err(TrainerError::Validation(format!(
                "{}: entry {:?} has no letters or digits",
                list, raw
            )));
        }
        if out.contains(&w) {
            return Err(TrainerError::Validation(format!(
                "{}: duplicate entry {:?}",
                list, raw
            )));
        }
        out.push(w);
    }
    Ok(out)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    active: Option<String>,
    #[serde(default)]
    profiles: Vec<Profile>,
}

/// Named profiles plus the active selection. Readers get `Arc` snapshots so an edit
/// never mutates a profile already handed to a session.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    profiles: BTreeMap<String, Arc<Profile>>,
    active: Option<String>,
}

impl Default for ProfileStore {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            DEFAULT_PROFILE_NAME.to_string(),
            Arc::new(Profile::new(DEFAULT_PROFILE_NAME)),
        );
        Self {
            profiles,
            active: Some(DEFAULT_PROFILE_NAME.to_string()),
        }
    }
}

impl ProfileStore {
    pub fn empty() -> Self {
        Self {
            profiles: BTreeMap::new(),
            active: None,
        }
    }

    /// Insert or replace by name. The stored copy is the validated one.
    pub fn upsert(&mut self, profile: Profile) -> TrainerResult<Arc<Profile>> {
        let validated = Arc::new(profile.validate()?);
        debug!(profile = %validated.name, "Profile saved");
        self.profiles
            .insert(validated.name.clone(), Arc::clone(&validated));
        if self.active.is_none() {
            self.active = Some(validated.name.clone());
        }
        Ok(validated)
    }

    pub fn rename(&mut self, old: &str, new: &str) -> TrainerResult<Arc<Profile>> {
        let new = new.trim();
        if new.is_empty() {
            return Err(TrainerError::Validation("profile name is empty".into()));
        }
        if old != new && self.profiles.contains_key(new) {
            return Err(TrainerError::Validation(format!(
                "profile {:?} already exists",
                new
            )));
        }
        let current = self
            .profiles
            .remove(old)
            .ok_or_else(|| TrainerError::Validation(format!("no profile named {:?}", old)))?;
        let mut renamed = (*current).clone();
        renamed.name = new.to_string();
        let renamed = Arc::new(renamed);
        self.profiles.insert(new.to_string(), Arc::clone(&renamed));
        if self.active.as_deref() == Some(old) {
            self.active = Some(new.to_string());
        }
        Ok(renamed)
    }

    pub fn delete(&mut self, name: &str) -> TrainerResult<()> {
        if self.profiles.remove(name).is_none() {
            return Err(TrainerError::Validation(format!("no profile named {:?}", name)));
        }
        if self.active.as_deref() == Some(name) {
            self.active = self.profiles.keys().next().cloned();
        }
        Ok(())
    }

    pub fn list(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Profile>> {
        self.profiles.get(name).cloned()
    }

    pub fn set_active(&mut self, name: &str) -> TrainerResult<()> {
        if !self.profiles.contains_key(name) {
            return Err(TrainerError::Validation(format!("no profile named {:?}", name)));
        }
        self.active = Some(name.to_string());
        Ok(())
    }

    pub fn active(&self) -> Option<Arc<Profile>> {
        self.active.as_deref().and_then(|n| self.get(n))
    }

    /// Load from TOML. A missing file yields the default store.
    pub fn load_from_path(path: impl AsRef<Path>) -> TrainerResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No profile file, starting with defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let file: ProfileFile = toml::from_str(&content)?;
        let mut store = Self::empty();
        for profile in file.profiles {
            store.upsert(profile)?;
        }
        if let Some(active) = file.active {
            store.set_active(&active)?;
        }
        if store.profiles.is_empty() {
            return Ok(Self::default());
        }
        info!(path = %path.display(), count = store.profiles.len(), "Profiles loaded");
        Ok(store)
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> TrainerResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = ProfileFile {
            active: self.active.clone(),
            profiles: self.profiles.values().map(|p| (**p).clone()).collect(),
        };
        let content = toml::to_string_pretty(&file)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
