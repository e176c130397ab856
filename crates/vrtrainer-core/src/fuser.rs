//! Signal fuser: merges the speech, telemetry and session streams into one
//! time-ordered sequence of [`FusedEvent`]s.

use crate::session::SessionContext;
use crate::signal::{Command, FusedEvent, ParamValue, SessionEvent, Signal, SignalEvent, SpeechEvent, StreamKind, TelemetryEvent};
use crate::types::{Clock, ParticipantId, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuserConfig {
    /// Timestamps closer than this are treated as simultaneous.
    pub jitter_ms: u64,
    /// Unconsumed telemetry events kept per participant.
    pub telemetry_depth: usize,
}

impl Default for FuserConfig {
    fn default() -> Self {
        Self {
            jitter_ms: 50,
            telemetry_depth: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FuserStats {
    pub queued_speech: usize,
    pub queued_telemetry: usize,
    pub queued_session: usize,
    pub delivered: u64,
    pub dropped_telemetry: u64,
    pub stale: u64,
}

#[derive(Debug)]
struct Queued {
    event: SignalEvent,
    arrival: u64,
}

#[derive(Debug, Default)]
struct Queues {
    speech: VecDeque<Queued>,
    telemetry: VecDeque<Queued>,
    session: VecDeque<Queued>,
    telemetry_per_participant: HashMap<ParticipantId, usize>,
    arrivals: u64,
    producers: usize,
    watermark: Option<Timestamp>,
    delivered: u64,
    dropped: u64,
    stale: u64,
}

impl Queues {
    fn queue_mut(&mut self, stream: StreamKind) -> &mut VecDeque<Queued> {
        match stream {
            StreamKind::Speech => &mut self.speech,
            StreamKind::Telemetry => &mut self.telemetry,
            StreamKind::Session => &mut self.session,
        }
    }

    fn is_empty(&self) -> bool {
        self.speech.is_empty() && self.telemetry.is_empty() && self.session.is_empty()
    }

    fn insert(&mut self, event: SignalEvent, depth: usize) {
        let arrival = self.arrivals;
        self.arrivals += 1;
        let stream = event.stream();
        let origin = event.origin.clone();

        // Sorted by timestamp; equal timestamps keep arrival order.
        let queue = self.queue_mut(stream);
        let pos = queue
            .iter()
            .rposition(|q| q.event.at <= event.at)
            .map_or(0, |i| i + 1);
        queue.insert(pos, Queued { event, arrival });

        if stream != StreamKind::Telemetry {
            return;
        }
        let count = self.telemetry_per_participant.entry(origin.clone()).or_insert(0);
        *count += 1;
        if *count <= depth {
            return;
        }
        *count -= 1;
        if let Some(oldest) = self.telemetry.iter().position(|q| q.event.origin == origin) {
            self.telemetry.remove(oldest);
            self.dropped += 1;
            debug!(participant = %origin.short(), "Telemetry backlog full, dropped oldest event");
        }
    }

    fn pop(&mut self, jitter: Duration) -> Option<FusedEvent> {
        let heads = [
            self.speech.front(),
            self.telemetry.front(),
            self.session.front(),
        ];
        let earliest = heads.iter().flatten().map(|q| q.event.at).min()?;
        let horizon = earliest + jitter;
        let stream = heads
            .into_iter()
            .zip([StreamKind::Speech, StreamKind::Telemetry, StreamKind::Session])
            .filter_map(|(head, stream)| head.map(|q| (q, stream)))
            .filter(|(q, _)| q.event.at <= horizon)
            .min_by_key(|(q, _)| q.arrival)
            .map(|(_, stream)| stream)?;

        let queued = self.queue_mut(stream).pop_front()?;
        let event = queued.event;
        if stream == StreamKind::Telemetry {
            if let Some(count) = self.telemetry_per_participant.get_mut(&event.origin) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.telemetry_per_participant.remove(&event.origin);
                }
            }
        }

        let stale = self.watermark.is_some_and(|w| event.at + jitter < w);
        if stale {
            self.stale += 1;
        } else {
            self.watermark = Some(self.watermark.map_or(event.at, |w| w.max(event.at)));
        }
        let sequence = self.delivered;
        self.delivered += 1;
        Some(FusedEvent {
            event,
            stale,
            sequence,
        })
    }
}

struct Shared {
    queues: Mutex<Queues>,
    notify: Notify,
    config: FuserConfig,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn push(&self, event: SignalEvent) {
        trace!(stream = ?event.stream(), origin = %event.origin.short(), "Signal queued");
        self.queues.lock().insert(event, self.config.telemetry_depth.max(1));
        self.notify.notify_one();
    }
}

/// Consumer side of the fuser. Producers are obtained from it and may be cloned
/// freely; `next` returns `None` once every producer is gone and the queues are empty.
pub struct SignalFuser {
    shared: Arc<Shared>,
}

impl SignalFuser {
    pub fn new(config: FuserConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                queues: Mutex::new(Queues::default()),
                notify: Notify::new(),
                config,
                clock,
            }),
        }
    }

    fn handle(&self) -> ProducerHandle {
        ProducerHandle::new(Arc::clone(&self.shared))
    }

    pub fn speech_producer(&self) -> SpeechProducer {
        SpeechProducer(self.handle())
    }

    pub fn telemetry_producer(&self) -> TelemetryProducer {
        TelemetryProducer(self.handle())
    }

    pub fn session_producer(&self) -> SessionProducer {
        SessionProducer(self.handle())
    }

    pub fn config(&self) -> FuserConfig {
        self.shared.config
    }

    /// Next event if one is queued.
    pub fn try_next(&mut self) -> Option<FusedEvent> {
        let jitter = Duration::from_millis(self.shared.config.jitter_ms);
        self.shared.queues.lock().pop(jitter)
    }

    pub async fn next(&mut self) -> Option<FusedEvent> {
        loop {
            if let Some(event) = self.try_next() {
                return Some(event);
            }
            {
                let queues = self.shared.queues.lock();
                if queues.producers == 0 && queues.is_empty() {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    pub fn stats(&self) -> FuserStats {
        let q = self.shared.queues.lock();
        FuserStats {
            queued_speech: q.speech.len(),
            queued_telemetry: q.telemetry.len(),
            queued_session: q.session.len(),
            delivered: q.delivered,
            dropped_telemetry: q.dropped,
            stale: q.stale,
        }
    }
}

struct ProducerHandle {
    shared: Arc<Shared>,
}

impl ProducerHandle {
    fn new(shared: Arc<Shared>) -> Self {
        shared.queues.lock().producers += 1;
        Self { shared }
    }

    fn now(&self) -> Timestamp {
        self.shared.clock.now()
    }
}

impl Clone for ProducerHandle {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.shared))
    }
}

impl Drop for ProducerHandle {
    fn drop(&mut self) {
        self.shared.queues.lock().producers -= 1;
        self.shared.notify.notify_one();
    }
}

/// Transcribed speech from the local speech collaborator.
#[derive(Clone)]
pub struct SpeechProducer(ProducerHandle);

impl SpeechProducer {
    pub fn push(&self, origin: ParticipantId, speech: SpeechEvent) {
        let at = self.0.now();
        self.push_at(origin, speech, at);
    }

    pub fn push_at(&self, origin: ParticipantId, speech: SpeechEvent, at: Timestamp) {
        self.0.shared.push(SignalEvent {
            origin,
            at,
            payload: Signal::Speech(speech),
        });
    }
}

/// Avatar parameter changes.
#[derive(Clone)]
pub struct TelemetryProducer(ProducerHandle);

impl TelemetryProducer {
    pub fn push(&self, participant: ParticipantId, parameter: impl Into<String>, value: impl Into<ParamValue>) {
        let at = self.0.now();
        self.push_at(participant, parameter, value, at);
    }

    pub fn push_at(
        &self,
        participant: ParticipantId,
        parameter: impl Into<String>,
        value: impl Into<ParamValue>,
        at: Timestamp,
    ) {
        self.0.shared.push(SignalEvent {
            origin: participant,
            at,
            payload: Signal::Telemetry(TelemetryEvent {
                parameter: parameter.into(),
                value: value.into(),
            }),
        });
    }
}

/// Messages from the session server, and local UI commands.
#[derive(Clone)]
pub struct SessionProducer(ProducerHandle);

impl SessionProducer {
    pub fn push(&self, from: ParticipantId, event: SessionEvent) {
        let at = self.0.now();
        self.push_at(from, event, at);
    }

    pub fn push_at(&self, from: ParticipantId, event: SessionEvent, at: Timestamp) {
        self.0.shared.push(SignalEvent {
            origin: from,
            at,
            payload: Signal::Session(event),
        });
    }

    /// Push a command issued on this client.
    pub fn command(&self, ctx: &SessionContext, command: Command) {
        self.push(ctx.local.clone(), SessionEvent::Command(command));
    }
}
