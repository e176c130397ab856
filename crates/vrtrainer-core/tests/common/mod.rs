#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vrtrainer_core::{
    ActionDispatcher, Broadcaster, DeviceCommand, DeviceError, FeatureKind, FeedbackDevice, InboundMessage,
    JoinResult, ManualClock, ParticipantId, ParticipantInfo, Profile, RetryPolicy, Role, SessionConfig,
    SessionCoordinator, SessionEvent, SessionFailure, SessionId, SessionServer, UiFeed,
};

pub fn info(id: &str, role: Role) -> ParticipantInfo {
    ParticipantInfo {
        id: id.into(),
        role,
        username: format!("{}-user", id),
    }
}

/// In-memory session server with scripted answers.
#[derive(Default)]
pub struct FakeServer {
    pub create: Mutex<Option<Result<SessionId, SessionFailure>>>,
    pub join: Mutex<VecDeque<Result<JoinResult, SessionFailure>>>,
    pub hang: AtomicBool,
    pub sent: Mutex<Vec<(ParticipantId, SessionEvent)>>,
    pub failing: Mutex<HashSet<ParticipantId>>,
    pub kicked: Mutex<Vec<ParticipantId>>,
    pub left: Mutex<Vec<ParticipantId>>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer_create(&self, id: &str) {
        *self.create.lock() = Some(Ok(SessionId::new(id)));
    }

    pub fn answer_join(&self, result: Result<JoinResult, SessionFailure>) {
        self.join.lock().push_back(result);
    }

    pub fn sent_to(&self, to: &str) -> Vec<SessionEvent> {
        self.sent
            .lock()
            .iter()
            .filter(|(p, _)| p.as_str() == to)
            .map(|(_, e)| e.clone())
            .collect()
    }

    async fn maybe_hang(&self) {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl SessionServer for FakeServer {
    async fn create_session(&self, _host: &ParticipantInfo) -> Result<SessionId, SessionFailure> {
        self.maybe_hang().await;
        self.create.lock().clone().unwrap_or(Err(SessionFailure::NoResponse))
    }

    async fn join_session(&self, _id: &SessionId, _who: &ParticipantInfo) -> Result<JoinResult, SessionFailure> {
        self.maybe_hang().await;
        self.join
            .lock()
            .pop_front()
            .unwrap_or(Err(SessionFailure::InvalidSessionId))
    }

    async fn leave_session(&self, _id: &SessionId, participant: &ParticipantId) -> Result<(), SessionFailure> {
        self.left.lock().push(participant.clone());
        Ok(())
    }

    async fn kick(&self, _id: &SessionId, participant: &ParticipantId) -> Result<(), SessionFailure> {
        self.kicked.lock().push(participant.clone());
        Ok(())
    }

    async fn send(&self, to: &ParticipantId, event: &SessionEvent) -> Result<(), SessionFailure> {
        if self.failing.lock().contains(to) {
            return Err(SessionFailure::NoResponse);
        }
        self.sent.lock().push((to.clone(), event.clone()));
        Ok(())
    }

    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        None
    }
}

/// Device that fails a set number of times, then reports every call on a channel.
pub struct ScriptedDevice {
    failures_left: AtomicU32,
    pub calls: AtomicU32,
    tx: mpsc::UnboundedSender<(DeviceCommand, f32, f32)>,
}

impl ScriptedDevice {
    pub fn new(failures: u32) -> (Arc<Self>, mpsc::UnboundedReceiver<(DeviceCommand, f32, f32)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let device = Arc::new(Self {
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            tx,
        });
        (device, rx)
    }
}

#[async_trait]
impl FeedbackDevice for ScriptedDevice {
    async fn apply(&self, command: DeviceCommand, intensity: f32, duration_secs: f32) -> Result<(), DeviceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(DeviceError::Transport("connection refused".into()));
        }
        let _ = self.tx.send((command, intensity, duration_secs));
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub struct Harness {
    pub server: Arc<FakeServer>,
    pub feed: Arc<UiFeed>,
    pub broadcaster: Arc<Broadcaster>,
    pub coordinator: Arc<SessionCoordinator>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(local: ParticipantInfo) -> Self {
        Self::with_config(local, SessionConfig::default())
    }

    pub fn with_config(local: ParticipantInfo, config: SessionConfig) -> Self {
        let server = FakeServer::new();
        let feed = Arc::new(UiFeed::default());
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        };
        let broadcaster = Arc::new(Broadcaster::new(server.clone(), policy, feed.clone()));
        let coordinator = Arc::new(SessionCoordinator::new(
            local,
            server.clone(),
            broadcaster.clone(),
            feed.clone(),
            config,
        ));
        Self {
            server,
            feed,
            broadcaster,
            coordinator,
            clock: Arc::new(ManualClock::default()),
        }
    }

    pub fn dispatcher(&self, device: Arc<dyn FeedbackDevice>) -> Arc<ActionDispatcher> {
        Arc::new(ActionDispatcher::new(
            device,
            RetryPolicy::default(),
            self.broadcaster.clone(),
            self.feed.clone(),
        ))
    }
}

/// Profile enabling `features`, with the pet answering to "rex".
pub fn profile_with(features: &[FeatureKind]) -> Profile {
    let mut p = Profile::new("Training");
    for f in features {
        p = p.with_feature(*f);
    }
    p.names = vec!["rex".into()];
    p.scolding_words = vec!["bad".into()];
    p.forbidden_words = vec!["no".into()];
    p
}

pub fn join_result(session: &str, participants: Vec<ParticipantInfo>, profile: Option<Profile>) -> JoinResult {
    JoinResult {
        session_id: SessionId::new(session),
        participants,
        version: 1,
        profile,
    }
}

/// Let spawned tasks make progress on a current-thread runtime.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
