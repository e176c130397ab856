use super::{Cx, FeatureKind, Input};
use crate::action::{DeviceCommand, ProposedAction};
use crate::profile::WordGameMode;
use crate::text::{contains_phrase, normalize_text, tokenize};
use crate::types::{Role, Timestamp};
use std::time::Duration;
use tracing::info;

const PRONOUNS: [&str; 8] = ["i", "i'm", "i've", "i'll", "me", "my", "mine", "myself"];

const SWEAR_WORDS: [&str; 22] = [
    "ass", "asshole", "bastard", "bitch", "bullshit", "crap", "cunt", "damn", "dick",
    "dickhead", "douche", "douchebag", "fuck", "fucker", "fucking", "hell",
    "motherfucker", "piss", "prick", "shit", "shitty", "slut",
];

const NEGATIVE_WORDS: [&str; 32] = [
    "no", "not", "never", "none", "nothing", "nowhere", "nobody", "noone", "cannot",
    "cant", "dont", "wont", "shouldnt", "wouldnt", "couldnt", "isnt", "arent", "wasnt",
    "werent", "hasnt", "havent", "hadnt", "doesnt", "didnt", "aint", "stop", "bad",
    "worse", "worst", "hate", "awful", "terrible",
];

/// True when `raw` speech breaks the rule of `mode`. `Prompt` has no standing rule.
pub fn breaks_rule(mode: WordGameMode, raw: &str) -> bool {
    match mode {
        WordGameMode::Prompt => false,
        WordGameMode::Pronouns => tokenize(raw).iter().any(|t| PRONOUNS.contains(&t.as_str())),
        WordGameMode::LetterE => raw.chars().any(|c| c.eq_ignore_ascii_case(&'e')),
        WordGameMode::Contractions => raw.contains(['\'', '\u{2019}']),
        WordGameMode::SwearWords => tokenize(raw).iter().any(|t| {
            let collapsed = t.replace('\'', "");
            SWEAR_WORDS.contains(&t.as_str()) || SWEAR_WORDS.contains(&collapsed.as_str())
        }),
        WordGameMode::Negativity => tokenize(raw)
            .iter()
            .any(|t| NEGATIVE_WORDS.contains(&t.replace('\'', "").as_str())),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub word: String,
    pub deadline: Timestamp,
}

/// Speech games. In `Prompt` mode the trainer announces a word the pet must say
/// before the delay expires; the other modes punish speech that breaks a rule.
#[derive(Debug, Default)]
pub struct WordGameFeature {
    expected: Option<Prompt>,
}

impl WordGameFeature {
    pub fn expected(&self) -> Option<&Prompt> {
        self.expected.as_ref()
    }

    pub(crate) fn evaluate(&mut self, input: Input<'_>, cx: &Cx<'_>) -> Vec<ProposedAction> {
        let mode = cx.profile.word_game_mode;
        match input {
            Input::Command(cmd) if cmd.name == "prompt" && mode == WordGameMode::Prompt => {
                let word = cmd.argument.as_deref().map(normalize_text).unwrap_or_default();
                if word.is_empty() {
                    info!("Word prompt without a word ignored");
                    return Vec::new();
                }
                let delay = cx.difficulty(FeatureKind::WordGame).delay_secs;
                info!(pet = %cx.target.short(), word = %word, delay, "Word prompt started");
                self.expected = Some(Prompt {
                    word,
                    deadline: cx.at + Duration::try_from_secs_f32(delay).unwrap_or_default(),
                });
                Vec::new()
            }
            Input::Speech {
                speaker: Role::Pet,
                raw,
                normalized,
            } => match mode {
                WordGameMode::Prompt => match self.expected.take() {
                    Some(prompt) if contains_phrase(normalized, &prompt.word) => {
                        info!(pet = %cx.target.short(), word = %prompt.word, "Word prompt answered");
                        Vec::new()
                    }
                    Some(_) => vec![cx.single(FeatureKind::WordGame, DeviceCommand::Shock, "word_mismatch")],
                    None => Vec::new(),
                },
                rule if breaks_rule(rule, raw) => {
                    vec![cx.single(FeatureKind::WordGame, DeviceCommand::Shock, mode_reason(rule))]
                }
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    pub(crate) fn poll(&mut self, cx: &Cx<'_>) -> Vec<ProposedAction> {
        if self.expected.as_ref().is_some_and(|p| cx.at >= p.deadline) {
            self.expected = None;
            return vec![cx.single(FeatureKind::WordGame, DeviceCommand::Shock, "word_timeout")];
        }
        Vec::new()
    }

    pub fn cancel(&mut self) {
        self.expected = None;
    }
}

fn mode_reason(mode: WordGameMode) -> &'static str {
    match mode {
        WordGameMode::Prompt => "word_mismatch",
        WordGameMode::Pronouns => "pronouns",
        WordGameMode::LetterE => "letter_e",
        WordGameMode::Contractions => "contractions",
        WordGameMode::SwearWords => "swear_words",
        WordGameMode::Negativity => "negativity",
    }
}
