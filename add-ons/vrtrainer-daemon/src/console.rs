//! Command line flags and the line-oriented console read from stdin.

use std::str::FromStr;
use vrtrainer_core::{Command, FeatureKind, ParamValue, ParticipantId, Role, SessionId};

/// Startup flags. Anything not given falls back to the loaded config.
#[derive(Debug, Default, PartialEq)]
pub struct Args {
    pub host: bool,
    pub join: Option<SessionId>,
    pub role: Option<Role>,
    pub profile: Option<String>,
    pub config: Option<String>,
}

pub const USAGE: &str = "usage: vrtrainer-daemon [--host | --join <session>] [--role trainer|pet] [--profile <name>] [--config <path>]";

impl Args {
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut out = Args::default();
        let mut it = args.into_iter();
        while let Some(flag) = it.next() {
            let mut value = |name: &str| it.next().ok_or_else(|| format!("{} needs a value", name));
            match flag.as_str() {
                "--host" => out.host = true,
                "--join" => out.join = Some(SessionId::new(value("--join")?)),
                "--role" => out.role = Some(Role::from_str(&value("--role")?)?),
                "--profile" => out.profile = Some(value("--profile")?),
                "--config" => out.config = Some(value("--config")?),
                "-h" | "--help" => return Err(USAGE.to_string()),
                other => return Err(format!("unknown argument {}\n{}", other, USAGE)),
            }
        }
        if out.host && out.join.is_some() {
            return Err("--host and --join are exclusive".to_string());
        }
        Ok(out)
    }
}

/// One console line.
#[derive(Debug, Clone, PartialEq)]
pub enum Console {
    /// Speech from the local participant, as if transcribed.
    Say(String),
    /// Avatar parameter update for the local participant.
    Param { name: String, value: ParamValue },
    /// Trainer command for a pet's feature.
    Cmd(Command),
    Assign { pet: ParticipantId, profile: String },
    Kick(ParticipantId),
    /// Transcribe a recorded WAV file.
    Hear(String),
    Table,
    Stats,
    Leave,
    Quit,
    Help,
}

pub const HELP: &str = "\
say <text>                          speak as the local participant
param <name> <value>                set an avatar parameter (number or true/false)
cmd <feature> <name> <pet> [arg]    send a trainer command
assign <pet> <profile>              assign a profile to a pet
kick <pet>                          remove a pet from the session
hear <file.wav>                     transcribe a recording
table | stats | leave | quit";

impl FromStr for Console {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let words: Vec<&str> = rest.split_whitespace().collect();
        match verb.to_ascii_lowercase().as_str() {
            "say" if !rest.is_empty() => Ok(Console::Say(rest.to_string())),
            "param" if words.len() == 2 => Ok(Console::Param {
                name: words[0].to_string(),
                value: parse_value(words[1])?,
            }),
            "cmd" if words.len() >= 3 => {
                let feature = FeatureKind::from_str(words[0]).map_err(|e| e.to_string())?;
                let mut command = Command::new(feature, words[1]).to(ParticipantId::new(words[2]));
                if words.len() > 3 {
                    command = command.with_argument(words[3..].join(" "));
                }
                Ok(Console::Cmd(command))
            }
            "assign" if words.len() == 2 => Ok(Console::Assign {
                pet: ParticipantId::new(words[0]),
                profile: words[1].to_string(),
            }),
            "kick" if words.len() == 1 => Ok(Console::Kick(ParticipantId::new(words[0]))),
            "hear" if !rest.is_empty() => Ok(Console::Hear(rest.to_string())),
            "table" => Ok(Console::Table),
            "stats" => Ok(Console::Stats),
            "leave" => Ok(Console::Leave),
            "quit" | "exit" => Ok(Console::Quit),
            "help" | "?" => Ok(Console::Help),
            "" => Err(String::new()),
            _ => Err(format!("unrecognized: {} (try help)", line)),
        }
    }
}

fn parse_value(raw: &str) -> Result<ParamValue, String> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "on" => Ok(ParamValue::from(true)),
        "false" | "off" => Ok(ParamValue::from(false)),
        _ => raw
            .parse::<f32>()
            .map(ParamValue::from)
            .map_err(|_| format!("not a number or bool: {}", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Result<Args, String> {
        Args::parse(raw.iter().map(|s| s.to_string()))
    }

    #[test]
    fn flags() {
        let a = args(&["--join", "s-1", "--role", "follower", "--profile", "strict"]).unwrap();
        assert_eq!(a.join, Some(SessionId::new("s-1")));
        assert_eq!(a.role, Some(Role::Pet));
        assert_eq!(a.profile.as_deref(), Some("strict"));
        assert!(!a.host);

        assert!(args(&["--host", "--join", "s-1"]).is_err());
        assert!(args(&["--join"]).is_err());
        assert!(args(&["--role", "cat"]).is_err());
        assert!(args(&["--bogus"]).is_err());
        assert_eq!(args(&[]).unwrap(), Args::default());
    }

    #[test]
    fn console_lines() {
        assert_eq!("say  Good boy ".parse::<Console>().unwrap(), Console::Say("Good boy".into()));
        assert_eq!(
            "param Grabbed on".parse::<Console>().unwrap(),
            Console::Param {
                name: "Grabbed".into(),
                value: ParamValue::from(true)
            }
        );
        assert_eq!(
            "param Stretch 0.75".parse::<Console>().unwrap(),
            Console::Param {
                name: "Stretch".into(),
                value: ParamValue::from(0.75)
            }
        );
        assert!("param Stretch high".parse::<Console>().is_err());
        assert_eq!("kick p-1".parse::<Console>().unwrap(), Console::Kick(ParticipantId::new("p-1")));
        assert_eq!("QUIT".parse::<Console>().unwrap(), Console::Quit);
        assert!("say".parse::<Console>().is_err());
        assert!("dance".parse::<Console>().is_err());
    }

    #[test]
    fn trainer_command_line() {
        let Console::Cmd(cmd) = "cmd word_game prompt p-1 sit down".parse::<Console>().unwrap() else {
            panic!("expected a command");
        };
        assert_eq!(cmd.feature, FeatureKind::WordGame);
        assert_eq!(cmd.name, "prompt");
        assert_eq!(cmd.target, Some(ParticipantId::new("p-1")));
        assert_eq!(cmd.argument.as_deref(), Some("sit down"));

        assert!("cmd nonsense x p-1".parse::<Console>().is_err());
        assert!("cmd tricks start".parse::<Console>().is_err());
    }
}
