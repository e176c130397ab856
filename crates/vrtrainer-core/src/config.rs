//! Runtime configuration: defaults, then an optional TOML file, then `VRTRAINER__*`
//! environment variables.

use crate::fuser::FuserConfig;
use crate::retry::RetryConfig;
use crate::session::SessionConfig;
use crate::types::Role;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How the local feedback device is driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceMode {
    /// Vendor web API with account credentials.
    Web,
    /// Local USB hub. Requires an external driver implementing `FeedbackDevice`.
    Serial,
    #[default]
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub mode: DeviceMode,
    pub username: String,
    pub api_key: String,
    pub share_code: String,
    /// Name shown in the vendor's activity log.
    pub device_name: String,
    /// Overrides the vendor endpoint; mostly for testing.
    pub endpoint: Option<String>,
}

impl DeviceConfig {
    /// Credentials present for web mode.
    pub fn has_credentials(&self) -> bool {
        !self.username.trim().is_empty() && !self.api_key.trim().is_empty() && !self.share_code.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub role: Role,
    pub username: String,
    /// Base URL of the session server.
    pub server_url: String,
    pub profiles_path: PathBuf,
    /// Interval at which feature deadlines are polled.
    pub tick_ms: u64,
    pub fuser: FuserConfig,
    pub dispatch: RetryConfig,
    pub broadcast: RetryConfig,
    pub session: SessionConfig,
    pub device: DeviceConfig,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            role: Role::Pet,
            username: "anonymous".to_string(),
            server_url: "http://127.0.0.1:8090".to_string(),
            profiles_path: PathBuf::from("./data/profiles.toml"),
            tick_ms: 100,
            fuser: FuserConfig::default(),
            dispatch: RetryConfig::default(),
            broadcast: RetryConfig::default(),
            session: SessionConfig::default(),
            device: DeviceConfig::default(),
        }
    }
}

impl TrainerConfig {
    /// Load config from file and environment. Precedence: env > `VRTRAINER_CONFIG`
    /// path (default `config/vrtrainer`) > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path = std::env::var("VRTRAINER_CONFIG").unwrap_or_else(|_| "config/vrtrainer".to_string());
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        let built = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("VRTRAINER").separator("__"))
            .build()?;

        built.try_deserialize()
    }
}

impl std::str::FromStr for DeviceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "web" => Ok(DeviceMode::Web),
            "serial" => Ok(DeviceMode::Serial),
            "none" | "" => Ok(DeviceMode::None),
            other => Err(format!("unknown device mode: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = TrainerConfig::load_from("/nonexistent/vrtrainer-config").unwrap();
        assert_eq!(cfg.tick_ms, 100);
        assert_eq!(cfg.dispatch.attempts, 3);
        assert_eq!(cfg.session.max_pets, 8);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vrtrainer.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "role = \"trainer\"\nusername = \"alice\"\n\n[fuser]\njitter_ms = 5\n\n[device]\nmode = \"web\"\nusername = \"a\"\napi_key = \"k\"\nshare_code = \"c\""
        )
        .unwrap();

        let cfg = TrainerConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.role, Role::Trainer);
        assert_eq!(cfg.username, "alice");
        assert_eq!(cfg.fuser.jitter_ms, 5);
        assert_eq!(cfg.fuser.telemetry_depth, 64);
        assert_eq!(cfg.device.mode, DeviceMode::Web);
        assert!(cfg.device.has_credentials());
    }
}
