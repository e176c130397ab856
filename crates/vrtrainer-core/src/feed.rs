//! Read-only event feed for the UI layer.
//!
//! The core only ever publishes; a slow or absent UI never blocks it.

use crate::error::SessionProtocolError;
use crate::features::FeatureKind;
use crate::limiter::RejectReason;
use crate::session::{ConnectionStatus, SessionRow, SessionState};
use crate::types::{ParticipantId, Role};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::broadcast;

const LOG_CAPACITY: usize = 50;

/// Session log line shared with every participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub participant: ParticipantId,
    #[serde(default)]
    pub feature: Option<FeatureKind>,
    pub message: String,
}

impl LogEntry {
    pub fn now(participant: ParticipantId, feature: Option<FeatureKind>, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            participant,
            feature,
            message: message.into(),
        }
    }
}

/// What a connection status refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    SessionServer,
    Device,
    Participant(ParticipantId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeatureStats {
    pub proposed: u64,
    pub approved: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub unreachable: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    Proposed,
    Approved,
    Rejected,
    Delivered,
    Unreachable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    SessionState(SessionState),
    SessionTable(Vec<SessionRow>),
    Log(LogEntry),
    Transcript {
        speaker: Role,
        text: String,
    },
    Rejected {
        participant: ParticipantId,
        feature: FeatureKind,
        reason: RejectReason,
    },
    DeviceUnreachable {
        participant: ParticipantId,
        feature: FeatureKind,
        attempts: u32,
        error: String,
    },
    Connection {
        link: Link,
        status: ConnectionStatus,
    },
    /// The session server did not answer `create_session` in time.
    HostingTimedOut,
    JoinFailed(SessionProtocolError),
    Stats(BTreeMap<FeatureKind, FeatureStats>),
}

#[derive(Debug)]
pub struct UiFeed {
    tx: broadcast::Sender<UiEvent>,
    log: Mutex<VecDeque<LogEntry>>,
    stats: Mutex<BTreeMap<FeatureKind, FeatureStats>>,
}

impl Default for UiFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

impl UiFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            log: Mutex::new(VecDeque::with_capacity(LOG_CAPACITY)),
            stats: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    /// Publish without waiting; having no subscriber is fine.
    pub fn emit(&self, event: UiEvent) {
        let _ = self.tx.send(event);
    }

    /// Append to the bounded event log and publish it.
    pub fn log(&self, entry: LogEntry) {
        {
            let mut log = self.log.lock();
            if log.len() == LOG_CAPACITY {
                log.pop_front();
            }
            log.push_back(entry.clone());
        }
        self.emit(UiEvent::Log(entry));
    }

    pub fn recent_logs(&self) -> Vec<LogEntry> {
        self.log.lock().iter().cloned().collect()
    }

    pub fn record(&self, feature: FeatureKind, stat: Stat) {
        let mut stats = self.stats.lock();
        let s = stats.entry(feature).or_default();
        match stat {
            Stat::Proposed => s.proposed += 1,
            Stat::Approved => s.approved += 1,
            Stat::Rejected => s.rejected += 1,
            Stat::Delivered => s.delivered += 1,
            Stat::Unreachable => s.unreachable += 1,
        }
    }

    pub fn stats(&self) -> BTreeMap<FeatureKind, FeatureStats> {
        self.stats.lock().clone()
    }

    pub fn publish_stats(&self) {
        let stats = self.stats();
        self.emit(UiEvent::Stats(stats));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_ring_is_bounded() {
        let feed = UiFeed::default();
        for i in 0..60 {
            feed.log(LogEntry::now("pet".into(), None, format!("line {}", i)));
        }
        let logs = feed.recent_logs();
        assert_eq!(logs.len(), LOG_CAPACITY);
        assert_eq!(logs[0].message, "line 10");
    }

    #[tokio::test]
    async fn subscribers_see_events() {
        let feed = UiFeed::default();
        let mut rx = feed.subscribe();
        feed.emit(UiEvent::HostingTimedOut);
        assert_eq!(rx.recv().await.unwrap(), UiEvent::HostingTimedOut);
    }

    #[test]
    fn stats_accumulate() {
        let feed = UiFeed::default();
        feed.record(FeatureKind::Scolding, Stat::Proposed);
        feed.record(FeatureKind::Scolding, Stat::Rejected);
        let s = feed.stats()[&FeatureKind::Scolding];
        assert_eq!((s.proposed, s.rejected, s.approved), (1, 1, 0));
    }
}
