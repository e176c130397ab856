//! vrtrainer-remote: network adapters for the trainer core.
//!
//! - [`HttpSessionServer`]: REST + WebSocket client of the hosted session service.
//! - [`PiShockWebDevice`]: shocker driven through the vendor web API.

mod error;
mod pishock;
mod session;

pub use error::{rejection_code, RemoteError, RemoteResult};
pub use pishock::{PiShockWebDevice, PISHOCK_ENDPOINT};
pub use session::{socket_url, Envelope, HttpSessionServer, TargetScope, DEFAULT_RECONNECT_DELAY};

use std::sync::Arc;
use tracing::{info, warn};
use vrtrainer_core::{DeviceConfig, DeviceMode, FeedbackDevice, NullDevice};

/// Device for the configured mode. Falls back to [`NullDevice`] when web mode lacks
/// credentials or the mode needs a driver this crate does not ship.
pub fn device_from_config(config: &DeviceConfig) -> Arc<dyn FeedbackDevice> {
    match config.mode {
        DeviceMode::Web => match PiShockWebDevice::from_config(config) {
            Ok(device) => {
                info!(endpoint = device.endpoint(), "PiShock web device configured");
                Arc::new(device)
            }
            Err(e) => {
                warn!(error = %e, "PiShock web device unavailable, commands will be discarded");
                Arc::new(NullDevice)
            }
        },
        DeviceMode::Serial => {
            warn!("Serial devices need an external driver, commands will be discarded");
            Arc::new(NullDevice)
        }
        DeviceMode::None => Arc::new(NullDevice),
    }
}
