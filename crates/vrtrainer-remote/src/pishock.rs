//! PiShock web API device.

use crate::error::{RemoteError, RemoteResult};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};
use vrtrainer_core::{DeviceCommand, DeviceConfig, DeviceError, FeedbackDevice};

pub const PISHOCK_ENDPOINT: &str = "https://do.pishock.com/api/apioperate";
const SUCCESS: &str = "Operation Succeeded.";
const DEFAULT_NAME: &str = "vrtrainer";
const MAX_DURATION_SECS: u32 = 15;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
struct Operate<'a> {
    username: &'a str,
    apikey: &'a str,
    code: &'a str,
    name: &'a str,
    op: u8,
    duration: u32,
    intensity: u32,
}

fn op_code(command: DeviceCommand) -> u8 {
    match command {
        DeviceCommand::Shock => 0,
        DeviceCommand::Vibrate => 1,
        DeviceCommand::Beep => 2,
    }
}

/// The API takes whole seconds in `1..=15`.
fn whole_seconds(duration_secs: f32) -> u32 {
    if !duration_secs.is_finite() {
        return 1;
    }
    (duration_secs.ceil() as u32).clamp(1, MAX_DURATION_SECS)
}

fn percent(intensity: f32) -> u32 {
    if !intensity.is_finite() {
        return 0;
    }
    intensity.round().clamp(0.0, 100.0) as u32
}

/// Shocker reached through the vendor's web API with account credentials and a
/// share code.
pub struct PiShockWebDevice {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    api_key: String,
    share_code: String,
    name: String,
}

impl PiShockWebDevice {
    pub fn from_config(config: &DeviceConfig) -> RemoteResult<Self> {
        if !config.has_credentials() {
            return Err(RemoteError::MissingCredentials);
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let name = match config.device_name.trim() {
            "" => DEFAULT_NAME.to_string(),
            n => n.to_string(),
        };
        Ok(Self {
            client,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| PISHOCK_ENDPOINT.to_string()),
            username: config.username.trim().to_string(),
            api_key: config.api_key.trim().to_string(),
            share_code: config.share_code.trim().to_string(),
            name,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, command: DeviceCommand, intensity: f32, duration_secs: f32) -> Operate<'_> {
        Operate {
            username: &self.username,
            apikey: &self.api_key,
            code: &self.share_code,
            name: &self.name,
            op: op_code(command),
            duration: whole_seconds(duration_secs),
            intensity: percent(intensity),
        }
    }

    async fn operate(&self, body: &Operate<'_>) -> RemoteResult<String> {
        let resp = self.client.post(&self.endpoint).json(body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl FeedbackDevice for PiShockWebDevice {
    async fn apply(&self, command: DeviceCommand, intensity: f32, duration_secs: f32) -> Result<(), DeviceError> {
        let body = self.request(command, intensity, duration_secs);
        debug!(op = body.op, intensity = body.intensity, duration = body.duration, "PiShock request");
        let reply = self.operate(&body).await?;
        if reply.trim() == SUCCESS {
            info!(%command, intensity = body.intensity, duration = body.duration, "PiShock operation succeeded");
            Ok(())
        } else {
            Err(DeviceError::Refused(reply.trim().to_string()))
        }
    }

    fn name(&self) -> &str {
        "pishock-web"
    }
}
