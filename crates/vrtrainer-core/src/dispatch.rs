//! Action dispatcher: drives the local feedback device and logs every delivery to
//! the session.

use crate::action::{ApprovedAction, DeviceCommand};
use crate::broadcast::Broadcaster;
use crate::feed::{Link, LogEntry, Stat, UiEvent, UiFeed};
use crate::retry::RetryPolicy;
use crate::session::{ConnectionStatus, SessionContext};
use crate::signal::SessionEvent;
use crate::types::ParticipantId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device transport error: {0}")]
    Transport(String),

    #[error("device refused the operation: {0}")]
    Refused(String),

    #[error("device not configured")]
    NotConfigured,
}

/// Physical feedback device attached to this client.
#[async_trait]
pub trait FeedbackDevice: Send + Sync {
    async fn apply(&self, command: DeviceCommand, intensity: f32, duration_secs: f32) -> Result<(), DeviceError>;

    fn name(&self) -> &str;
}

/// Device that accepts everything and does nothing. Used when no device is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDevice;

#[async_trait]
impl FeedbackDevice for NullDevice {
    async fn apply(&self, command: DeviceCommand, intensity: f32, duration_secs: f32) -> Result<(), DeviceError> {
        debug!(%command, intensity, duration_secs, "Null device: command discarded");
        Ok(())
    }

    fn name(&self) -> &str {
        "none"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    Delivered { attempts: u32 },
    DeviceUnreachable { attempts: u32, last_error: DeviceError },
}

impl DispatchResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchResult::Delivered { .. })
    }
}

pub struct ActionDispatcher {
    device: Arc<dyn FeedbackDevice>,
    policy: RetryPolicy,
    broadcaster: Arc<Broadcaster>,
    feed: Arc<UiFeed>,
    in_flight: Mutex<HashMap<ParticipantId, Vec<AbortHandle>>>,
}

impl ActionDispatcher {
    pub fn new(
        device: Arc<dyn FeedbackDevice>,
        policy: RetryPolicy,
        broadcaster: Arc<Broadcaster>,
        feed: Arc<UiFeed>,
    ) -> Self {
        Self {
            device,
            policy,
            broadcaster,
            feed,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver `action` to the device, retrying with backoff.
    ///
    /// The action was already admitted: exhausting the retries reports the device as
    /// unreachable but never hands the action back to the limiter.
    pub async fn dispatch(&self, action: &ApprovedAction, ctx: &SessionContext) -> DispatchResult {
        let attempts = self.policy.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .device
                .apply(action.command, action.intensity, action.duration_secs)
                .await
            {
                Ok(()) => return self.delivered(action, attempt, ctx),
                Err(e) if attempt < attempts => {
                    debug!(
                        device = self.device.name(),
                        attempt,
                        error = %e,
                        "Device command failed, retrying"
                    );
                    tokio::time::sleep(self.policy.backoff(attempt)).await;
                }
                Err(e) => return self.unreachable(action, attempt, e, ctx),
            }
        }
    }

    fn delivered(&self, action: &ApprovedAction, attempts: u32, ctx: &SessionContext) -> DispatchResult {
        info!(
            participant = %action.target.short(),
            feature = %action.feature,
            command = %action.command,
            intensity = action.intensity,
            duration = action.duration_secs,
            reason = %action.reason,
            "⚡ Action delivered"
        );
        self.feed.record(action.feature, Stat::Delivered);
        let message = format!(
            "{} {:.0}% for {:.1}s ({})",
            action.command, action.intensity, action.duration_secs, action.reason
        );
        self.share(LogEntry::now(action.target.clone(), Some(action.feature), message), ctx);
        DispatchResult::Delivered { attempts }
    }

    fn unreachable(
        &self,
        action: &ApprovedAction,
        attempts: u32,
        error: DeviceError,
        ctx: &SessionContext,
    ) -> DispatchResult {
        warn!(
            participant = %action.target.short(),
            feature = %action.feature,
            attempts,
            error = %error,
            "Device unreachable"
        );
        self.feed.record(action.feature, Stat::Unreachable);
        self.feed.emit(UiEvent::DeviceUnreachable {
            participant: action.target.clone(),
            feature: action.feature,
            attempts,
            error: error.to_string(),
        });
        self.feed.emit(UiEvent::Connection {
            link: Link::Device,
            status: ConnectionStatus::Disconnected,
        });
        let message = format!("{} failed: device_unreachable", action.command);
        self.share(LogEntry::now(action.target.clone(), Some(action.feature), message), ctx);
        DispatchResult::DeviceUnreachable {
            attempts,
            last_error: error,
        }
    }

    /// Record locally and send to every other participant of an active session.
    fn share(&self, entry: LogEntry, ctx: &SessionContext) {
        self.feed.log(entry.clone());
        if ctx.is_active() {
            self.broadcaster
                .broadcast(ctx.remote_participants(), &SessionEvent::Log(entry));
        }
    }

    /// Dispatch on a separate task so retries never stall the caller.
    pub fn spawn(self: &Arc<Self>, action: ApprovedAction, ctx: Arc<SessionContext>) -> JoinHandle<DispatchResult> {
        let target = action.target.clone();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.dispatch(&action, &ctx).await });
        let mut in_flight = self.in_flight.lock();
        let handles = in_flight.entry(target).or_default();
        handles.retain(|h| !h.is_finished());
        handles.push(handle.abort_handle());
        handle
    }

    /// Abort pending deliveries for `participant`.
    pub fn cancel_participant(&self, participant: &ParticipantId) {
        if let Some(handles) = self.in_flight.lock().remove(participant) {
            for h in handles {
                h.abort();
            }
        }
    }

    pub fn cancel_all(&self) {
        for (_, handles) in self.in_flight.lock().drain() {
            for h in handles {
                h.abort();
            }
        }
    }

    pub fn in_flight(&self, participant: &ParticipantId) -> usize {
        self.in_flight
            .lock()
            .get(participant)
            .map_or(0, |hs| hs.iter().filter(|h| !h.is_finished()).count())
    }
}
