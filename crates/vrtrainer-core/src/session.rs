//! Session coordinator: hosting/joining lifecycle, the participant table, and
//! versioned peer updates.
//!
//! The coordinator owns an immutable [`SessionContext`] snapshot that it swaps on
//! every change; the pipeline reads it per event without holding any lock.

use crate::broadcast::Broadcaster;
use crate::error::{SessionProtocolError, TrainerError, TrainerResult};
use crate::feed::{Link, UiEvent, UiFeed};
use crate::profile::Profile;
use crate::signal::{SessionEvent, StreamKind};
use crate::types::{ParticipantId, Role, SessionId};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Hosting,
    Joining,
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Degraded,
    Reconnecting,
    Disconnected,
}

/// Identity a participant announces to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: ParticipantId,
    pub role: Role,
    pub username: String,
}

/// One row of the participant table.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantEntry {
    pub id: ParticipantId,
    pub role: Role,
    pub username: String,
    pub status: ConnectionStatus,
    /// Snapshot taken at assignment; later profile edits do not leak in.
    pub profile: Option<Arc<Profile>>,
    pub speech_events: u64,
    pub telemetry_events: u64,
}

impl ParticipantEntry {
    pub fn new(info: ParticipantInfo) -> Self {
        Self {
            id: info.id,
            role: info.role,
            username: info.username,
            status: ConnectionStatus::Connected,
            profile: None,
            speech_events: 0,
            telemetry_events: 0,
        }
    }

    pub fn with_profile(mut self, profile: Arc<Profile>) -> Self {
        self.profile = Some(profile);
        self
    }
}

/// Membership or assignment change pushed to participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum PeerChange {
    Joined { participant: ParticipantInfo },
    Left { participant: ParticipantId },
    Kicked { participant: ParticipantId },
    Disconnected { participant: ParticipantId },
    Status { participant: ParticipantId, status: ConnectionStatus },
    ProfileAssigned { participant: ParticipantId, profile: Profile },
    ProfileCleared { participant: ParticipantId },
    Closed,
}

/// Versioned peer change. Versions are monotonic per sender; a receiver ignores
/// anything at or below the last version it applied from that sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerUpdate {
    pub version: u64,
    #[serde(flatten)]
    pub change: PeerChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinResult {
    pub session_id: SessionId,
    pub participants: Vec<ParticipantInfo>,
    /// Server sequence at join; later server updates start above it.
    #[serde(default)]
    pub version: u64,
    /// Assignment stored by the server for the joining pet, if any.
    #[serde(default)]
    pub profile: Option<Profile>,
}

/// Failure reported by the session server collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    #[error("no_response")]
    NoResponse,

    #[error("invalid_session_id")]
    InvalidSessionId,

    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<SessionFailure> for SessionProtocolError {
    fn from(f: SessionFailure) -> Self {
        match f {
            SessionFailure::NoResponse => SessionProtocolError::NoServerResponse,
            SessionFailure::InvalidSessionId => SessionProtocolError::InvalidSessionId,
            SessionFailure::Rejected(reason) => match reason.as_str() {
                "trainer_already_present" => SessionProtocolError::TrainerAlreadyPresent,
                "session_full" => SessionProtocolError::SessionFull,
                _ => SessionProtocolError::InvalidSessionId,
            },
        }
    }
}

/// Message pushed by the server, tagged with its sender.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub from: ParticipantId,
    pub event: SessionEvent,
}

/// Remote session server collaborator.
#[async_trait]
pub trait SessionServer: Send + Sync {
    async fn create_session(&self, host: &ParticipantInfo) -> Result<SessionId, SessionFailure>;

    async fn join_session(&self, id: &SessionId, who: &ParticipantInfo) -> Result<JoinResult, SessionFailure>;

    async fn leave_session(&self, id: &SessionId, participant: &ParticipantId) -> Result<(), SessionFailure>;

    async fn kick(&self, id: &SessionId, participant: &ParticipantId) -> Result<(), SessionFailure>;

    /// Deliver one event to one participant.
    async fn send(&self, to: &ParticipantId, event: &SessionEvent) -> Result<(), SessionFailure>;

    /// Push channel of inbound messages. Yields the receiver once.
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_pets: usize,
    pub hosting_timeout_ms: u64,
    pub join_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_pets: 8,
            hosting_timeout_ms: 5_000,
            join_timeout_ms: 5_000,
        }
    }
}

/// Read-only view of the session handed to the feature engine and dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub local: ParticipantId,
    pub local_role: Role,
    pub state: SessionState,
    pub session_id: Option<SessionId>,
    pub participants: BTreeMap<ParticipantId, ParticipantEntry>,
}

impl SessionContext {
    /// Context with only the local participant, as used outside a session.
    pub fn solo(local: ParticipantInfo, profile: Option<Arc<Profile>>) -> Self {
        let id = local.id.clone();
        let role = local.role;
        let mut entry = ParticipantEntry::new(local);
        if role == Role::Pet {
            entry.profile = profile;
        }
        let mut participants = BTreeMap::new();
        participants.insert(id.clone(), entry);
        Self {
            local: id,
            local_role: role,
            state: SessionState::Idle,
            session_id: None,
            participants,
        }
    }

    pub fn with_participant(mut self, entry: ParticipantEntry) -> Self {
        self.participants.insert(entry.id.clone(), entry);
        self
    }

    pub fn role_of(&self, id: &ParticipantId) -> Option<Role> {
        self.participants.get(id).map(|p| p.role)
    }

    pub fn profile_of(&self, id: &ParticipantId) -> Option<&Arc<Profile>> {
        self.participants.get(id).and_then(|p| p.profile.as_ref())
    }

    pub fn trainer(&self) -> Option<&ParticipantEntry> {
        self.participants.values().find(|p| p.role == Role::Trainer)
    }

    pub fn pets(&self) -> impl Iterator<Item = &ParticipantEntry> {
        self.participants.values().filter(|p| p.role == Role::Pet)
    }

    /// Pets whose features run on this client: the local participant when it is a
    /// pet and a trainer is present. Nothing is evaluated without a trainer.
    pub fn evaluated_pets(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        let trained = self.trainer().is_some();
        self.participants
            .values()
            .filter(move |p| trained && p.role == Role::Pet && p.id == self.local)
            .map(|p| p.id.clone())
    }

    /// Everyone except the local participant.
    pub fn remote_participants(&self) -> impl Iterator<Item = &ParticipantId> {
        self.participants.keys().filter(move |id| **id != self.local)
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}

/// Session table row for the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRow {
    pub participant: ParticipantId,
    pub username: String,
    pub role: Role,
    pub status: ConnectionStatus,
    pub profile: Option<String>,
    pub is_local: bool,
    pub speech_events: u64,
    pub telemetry_events: u64,
}

/// What applying a peer update changed, so the caller can cancel scoped work.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEffect {
    Unchanged,
    Duplicate,
    Added(ParticipantId),
    Removed(ParticipantId),
    ProfileChanged(ParticipantId),
    Closed,
}

/// Outcome of routing one inbound session event.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Hand the event to the feature engine.
    Evaluate,
    Peer(PeerEffect),
    Logged,
    Dropped,
}

struct Inner {
    ctx: Arc<SessionContext>,
    applied: HashMap<ParticipantId, u64>,
    own_version: u64,
    username: String,
    local_profile: Option<Arc<Profile>>,
}

impl Inner {
    fn local_info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.ctx.local.clone(),
            role: self.ctx.local_role,
            username: self.username.clone(),
        }
    }

    /// Drop back to a context holding only the local participant.
    fn reset(&mut self, state: SessionState) {
        let mut ctx = SessionContext::solo(self.local_info(), self.local_profile.clone());
        ctx.state = state;
        self.ctx = Arc::new(ctx);
        self.applied.clear();
    }
}

pub struct SessionCoordinator {
    server: Arc<dyn SessionServer>,
    broadcaster: Arc<Broadcaster>,
    feed: Arc<UiFeed>,
    config: SessionConfig,
    inner: Mutex<Inner>,
    /// Bumped on every close so the pipeline can drop per-session work.
    closed: watch::Sender<u64>,
}

impl SessionCoordinator {
    pub fn new(
        local: ParticipantInfo,
        server: Arc<dyn SessionServer>,
        broadcaster: Arc<Broadcaster>,
        feed: Arc<UiFeed>,
        config: SessionConfig,
    ) -> Self {
        let username = local.username.clone();
        Self {
            server,
            broadcaster,
            feed,
            config,
            inner: Mutex::new(Inner {
                ctx: Arc::new(SessionContext::solo(local, None)),
                applied: HashMap::new(),
                own_version: 0,
                username,
                local_profile: None,
            }),
            closed: watch::channel(0).0,
        }
    }

    /// Receiver that changes every time the session closes, whether by `leave`, a
    /// kick, the trainer going away or the server closing it.
    pub fn closures(&self) -> watch::Receiver<u64> {
        self.closed.subscribe()
    }

    pub fn context(&self) -> Arc<SessionContext> {
        Arc::clone(&self.inner.lock().ctx)
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().ctx.state
    }

    pub fn local(&self) -> ParticipantId {
        self.inner.lock().ctx.local.clone()
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn table(&self) -> Vec<SessionRow> {
        let ctx = self.context();
        ctx.participants
            .values()
            .map(|p| SessionRow {
                participant: p.id.clone(),
                username: p.username.clone(),
                role: p.role,
                status: p.status,
                profile: p.profile.as_ref().map(|pr| pr.name.clone()),
                is_local: p.id == ctx.local,
                speech_events: p.speech_events,
                telemetry_events: p.telemetry_events,
            })
            .collect()
    }

    fn publish(&self, state_changed: bool) {
        if state_changed {
            self.feed.emit(UiEvent::SessionState(self.state()));
        }
        self.feed.emit(UiEvent::SessionTable(self.table()));
    }

    fn set_state(&self, state: SessionState) {
        {
            let mut inner = self.inner.lock();
            Arc::make_mut(&mut inner.ctx).state = state;
        }
        self.publish(true);
    }

    /// Profile the local pet uses outside a session and when the server holds none.
    pub fn set_local_profile(&self, profile: Option<Arc<Profile>>) {
        {
            let mut inner = self.inner.lock();
            inner.local_profile = profile.clone();
            let local = inner.ctx.local.clone();
            let idle = !inner.ctx.is_active();
            let ctx = Arc::make_mut(&mut inner.ctx);
            if let Some(entry) = ctx.participants.get_mut(&local) {
                if entry.role == Role::Pet && (idle || entry.profile.is_none()) {
                    entry.profile = profile;
                }
            }
        }
        self.publish(false);
    }

    /// Ask the server for a new session with the local trainer as host.
    ///
    /// A missing response keeps the coordinator in `Hosting` so the caller can retry.
    #[instrument(skip(self))]
    pub async fn start_hosting(&self) -> TrainerResult<SessionId> {
        let info = {
            let inner = self.inner.lock();
            if inner.ctx.local_role != Role::Trainer {
                return Err(TrainerError::Permission("only a trainer can host a session".into()));
            }
            match inner.ctx.state {
                SessionState::Idle | SessionState::Hosting | SessionState::Closed => {}
                other => {
                    return Err(TrainerError::Validation(format!(
                        "cannot start hosting while {:?}",
                        other
                    )))
                }
            }
            inner.local_info()
        };
        self.set_state(SessionState::Hosting);

        let timeout = Duration::from_millis(self.config.hosting_timeout_ms);
        match tokio::time::timeout(timeout, self.server.create_session(&info)).await {
            Ok(Ok(session_id)) => {
                {
                    let mut inner = self.inner.lock();
                    inner.reset(SessionState::Active);
                    inner.own_version = 0;
                    Arc::make_mut(&mut inner.ctx).session_id = Some(session_id.clone());
                }
                info!(session = %session_id, "🎓 Hosting session");
                self.feed.emit(UiEvent::Connection {
                    link: Link::SessionServer,
                    status: ConnectionStatus::Connected,
                });
                self.publish(true);
                Ok(session_id)
            }
            Ok(Err(SessionFailure::NoResponse)) | Err(_) => {
                warn!("Session server did not answer the hosting request");
                self.feed.emit(UiEvent::HostingTimedOut);
                Err(SessionProtocolError::NoServerResponse.into())
            }
            Ok(Err(other)) => {
                let code = SessionProtocolError::from(other);
                warn!(error = %code, "Hosting rejected");
                self.set_state(SessionState::Idle);
                Err(code.into())
            }
        }
    }

    /// Join an existing session. Every failure returns the coordinator to `Idle`.
    #[instrument(skip(self), fields(session = %session_id))]
    pub async fn join(&self, session_id: SessionId, role: Role) -> TrainerResult<()> {
        let info = {
            let mut inner = self.inner.lock();
            match inner.ctx.state {
                SessionState::Idle | SessionState::Closed => {}
                other => {
                    return Err(TrainerError::Validation(format!("cannot join while {:?}", other)))
                }
            }
            Arc::make_mut(&mut inner.ctx).local_role = role;
            inner.reset(SessionState::Joining);
            inner.local_info()
        };
        self.publish(true);

        let timeout = Duration::from_millis(self.config.join_timeout_ms);
        let result = match tokio::time::timeout(timeout, self.server.join_session(&session_id, &info)).await {
            Ok(Ok(result)) => result,
            Ok(Err(failure)) => return Err(self.fail_join(failure.into())),
            Err(_) => return Err(self.fail_join(SessionProtocolError::NoServerResponse)),
        };

        let other_trainer = result
            .participants
            .iter()
            .any(|p| p.role == Role::Trainer && p.id != info.id);
        if role == Role::Trainer && other_trainer {
            if let Err(e) = self.server.leave_session(&result.session_id, &info.id).await {
                debug!(error = %e, "Leave after rejected trainer join failed");
            }
            return Err(self.fail_join(SessionProtocolError::TrainerAlreadyPresent));
        }

        let assigned = match result.profile.as_ref().map(Profile::validate) {
            Some(Ok(p)) => Some(Arc::new(p)),
            Some(Err(e)) => {
                warn!(error = %e, "Ignoring invalid profile from server");
                None
            }
            None => None,
        };
        {
            let mut inner = self.inner.lock();
            inner.reset(SessionState::Active);
            inner.applied.insert(ParticipantId::server(), result.version);
            let fallback = inner.local_profile.clone();
            let ctx = Arc::make_mut(&mut inner.ctx);
            ctx.session_id = Some(result.session_id.clone());
            for p in result.participants {
                if p.id != ctx.local {
                    ctx.participants.insert(p.id.clone(), ParticipantEntry::new(p));
                }
            }
            if role == Role::Pet {
                if let Some(local) = ctx.participants.get_mut(&info.id) {
                    local.profile = assigned.or(fallback);
                }
            }
        }
        info!(session = %result.session_id, role = %role, "🤝 Joined session");
        self.feed.emit(UiEvent::Connection {
            link: Link::SessionServer,
            status: ConnectionStatus::Connected,
        });
        self.publish(true);
        Ok(())
    }

    fn fail_join(&self, code: SessionProtocolError) -> TrainerError {
        warn!(error = %code, "Join failed");
        {
            let mut inner = self.inner.lock();
            inner.reset(SessionState::Idle);
        }
        self.feed.emit(UiEvent::JoinFailed(code));
        self.publish(true);
        code.into()
    }

    /// Leave the session. The server is told on a best-effort basis.
    #[instrument(skip(self))]
    pub async fn leave(&self) -> TrainerResult<()> {
        let (session_id, local) = {
            let inner = self.inner.lock();
            (inner.ctx.session_id.clone(), inner.ctx.local.clone())
        };
        if let Some(id) = session_id {
            if let Err(e) = self.server.leave_session(&id, &local).await {
                warn!(error = %e, "Leave request failed, closing locally");
            }
        }
        self.close();
        Ok(())
    }

    fn close(&self) {
        self.broadcaster.cancel_all();
        {
            let mut inner = self.inner.lock();
            inner.reset(SessionState::Closed);
        }
        self.closed.send_modify(|n| *n += 1);
        info!("Session closed");
        self.publish(true);
    }

    /// Remove a participant from the session. Trainer only.
    #[instrument(skip(self), fields(participant = %participant.short()))]
    pub async fn kick(&self, participant: &ParticipantId) -> TrainerResult<PeerEffect> {
        let session_id = {
            let inner = self.inner.lock();
            if inner.ctx.local_role != Role::Trainer {
                return Err(TrainerError::Permission("only the trainer can kick".into()));
            }
            if participant == &inner.ctx.local || !inner.ctx.participants.contains_key(participant) {
                return Err(TrainerError::Validation(format!(
                    "{} is not a kickable participant",
                    participant
                )));
            }
            inner.ctx.session_id.clone()
        };
        if let Some(id) = session_id {
            self.server
                .kick(&id, participant)
                .await
                .map_err(|e| TrainerError::SessionProtocol(e.into()))?;
        }
        Ok(self.remove_participant(participant))
    }

    fn remove_participant(&self, participant: &ParticipantId) -> PeerEffect {
        let (is_local, lost_trainer) = {
            let inner = self.inner.lock();
            let ctx = &inner.ctx;
            if !ctx.participants.contains_key(participant) {
                return PeerEffect::Unchanged;
            }
            let lost_trainer = ctx.local_role == Role::Pet && ctx.role_of(participant) == Some(Role::Trainer);
            (participant == &ctx.local, lost_trainer)
        };
        if is_local || lost_trainer {
            self.close();
            return PeerEffect::Closed;
        }
        self.broadcaster.cancel(participant);
        {
            let mut inner = self.inner.lock();
            Arc::make_mut(&mut inner.ctx).participants.remove(participant);
        }
        info!(participant = %participant.short(), "Participant removed");
        self.publish(false);
        PeerEffect::Removed(participant.clone())
    }

    /// Route an inbound session event: membership goes through the version check,
    /// logs go to the feed, and speech, telemetry and commands are handed to the
    /// engine only when they come from this client or the trainer.
    pub fn handle_inbound(&self, from: &ParticipantId, event: &SessionEvent) -> TrainerResult<Inbound> {
        match event {
            SessionEvent::Peer(update) => Ok(Inbound::Peer(self.apply_peer(from, update)?)),
            SessionEvent::Log(entry) => {
                self.feed.log(entry.clone());
                Ok(Inbound::Logged)
            }
            SessionEvent::Command(_) | SessionEvent::Speech(_) | SessionEvent::Telemetry(_) => {
                let ctx = self.context();
                if from == &ctx.local || ctx.role_of(from) == Some(Role::Trainer) {
                    Ok(Inbound::Evaluate)
                } else {
                    warn!(from = %from.short(), "Dropping trainer-only message from a non-trainer");
                    Ok(Inbound::Dropped)
                }
            }
        }
    }

    /// Apply a peer update idempotently. Membership changes are accepted from the
    /// server, profile assignments from the trainer.
    pub fn apply_peer(&self, from: &ParticipantId, update: &PeerUpdate) -> TrainerResult<PeerEffect> {
        {
            let mut inner = self.inner.lock();
            let last = inner.applied.get(from).copied().unwrap_or(0);
            if update.version <= last {
                debug!(from = %from.short(), version = update.version, last, "Duplicate peer update");
                return Ok(PeerEffect::Duplicate);
            }
            let from_trainer = inner.ctx.role_of(from) == Some(Role::Trainer);
            let allowed = match update.change {
                PeerChange::ProfileAssigned { .. } | PeerChange::ProfileCleared { .. } => {
                    from_trainer || from.is_server()
                }
                _ => from.is_server(),
            };
            if !allowed {
                warn!(from = %from.short(), "Peer update from unauthorized sender dropped");
                return Ok(PeerEffect::Unchanged);
            }
            inner.applied.insert(from.clone(), update.version);
        }

        match &update.change {
            PeerChange::Joined { participant } => self.admit_participant(participant.clone()),
            PeerChange::Left { participant }
            | PeerChange::Kicked { participant }
            | PeerChange::Disconnected { participant } => Ok(self.remove_participant(participant)),
            PeerChange::Status { participant, status } => {
                {
                    let mut inner = self.inner.lock();
                    let ctx = Arc::make_mut(&mut inner.ctx);
                    if let Some(entry) = ctx.participants.get_mut(participant) {
                        entry.status = *status;
                    }
                }
                self.publish(false);
                Ok(PeerEffect::Unchanged)
            }
            PeerChange::ProfileAssigned { participant, profile } => {
                let validated = profile.validate()?;
                Ok(self.set_assignment(participant, Some(Arc::new(validated))))
            }
            PeerChange::ProfileCleared { participant } => Ok(self.set_assignment(participant, None)),
            PeerChange::Closed => {
                self.close();
                Ok(PeerEffect::Closed)
            }
        }
    }

    fn admit_participant(&self, info: ParticipantInfo) -> TrainerResult<PeerEffect> {
        let rejection: Result<(), Option<SessionProtocolError>> = {
            let mut inner = self.inner.lock();
            let ctx = &inner.ctx;
            if ctx.participants.contains_key(&info.id) {
                Err(None)
            } else if info.role == Role::Trainer && ctx.trainer().is_some() {
                Err(Some(SessionProtocolError::TrainerAlreadyPresent))
            } else if info.role == Role::Pet
                && ctx.local_role == Role::Trainer
                && ctx.pets().count() >= self.config.max_pets
            {
                Err(Some(SessionProtocolError::SessionFull))
            } else {
                Arc::make_mut(&mut inner.ctx)
                    .participants
                    .insert(info.id.clone(), ParticipantEntry::new(info.clone()));
                Ok(())
            }
        };

        match rejection {
            Ok(()) => {
                info!(participant = %info.id.short(), role = %info.role, username = %info.username, "Participant joined");
                self.publish(false);
                Ok(PeerEffect::Added(info.id))
            }
            // Already present: nothing to do.
            Err(None) => Ok(PeerEffect::Unchanged),
            Err(Some(code)) => {
                warn!(participant = %info.id.short(), error = %code, "Join rejected");
                self.evict(&info.id);
                Err(code.into())
            }
        }
    }

    /// Have the server drop a participant this host refused. Runs detached.
    fn evict(&self, participant: &ParticipantId) {
        let (session_id, hosting) = {
            let inner = self.inner.lock();
            (inner.ctx.session_id.clone(), inner.ctx.local_role == Role::Trainer)
        };
        let Some(session_id) = session_id.filter(|_| hosting) else {
            return;
        };
        let server = Arc::clone(&self.server);
        let participant = participant.clone();
        tokio::spawn(async move {
            if let Err(e) = server.kick(&session_id, &participant).await {
                warn!(participant = %participant.short(), error = %e, "Evicting rejected participant failed");
            }
        });
    }

    fn set_assignment(&self, participant: &ParticipantId, profile: Option<Arc<Profile>>) -> PeerEffect {
        {
            let mut inner = self.inner.lock();
            let ctx = Arc::make_mut(&mut inner.ctx);
            match ctx.participants.get_mut(participant) {
                Some(entry) if entry.role == Role::Pet => entry.profile = profile,
                _ => return PeerEffect::Unchanged,
            }
        }
        self.publish(false);
        PeerEffect::ProfileChanged(participant.clone())
    }

    /// Assign a profile snapshot to a pet and rebroadcast it to every participant.
    #[instrument(skip(self, profile), fields(pet = %pet.short(), profile = %profile.name))]
    pub fn assign_profile(&self, pet: &ParticipantId, profile: Arc<Profile>) -> TrainerResult<PeerEffect> {
        self.require_trainer("assign profiles")?;
        {
            let ctx = self.context();
            if !ctx.is_active() {
                return Err(TrainerError::Validation("no active session".into()));
            }
            if ctx.role_of(pet) != Some(Role::Pet) {
                return Err(TrainerError::Validation(format!("{} is not a pet in this session", pet)));
            }
        }
        let effect = self.set_assignment(pet, Some(Arc::clone(&profile)));
        self.rebroadcast(PeerChange::ProfileAssigned {
            participant: pet.clone(),
            profile: (*profile).clone(),
        });
        info!("Profile assigned");
        Ok(effect)
    }

    fn require_trainer(&self, what: &str) -> TrainerResult<()> {
        if self.inner.lock().ctx.local_role != Role::Trainer {
            return Err(TrainerError::Permission(format!("only the trainer can {}", what)));
        }
        Ok(())
    }

    fn rebroadcast(&self, change: PeerChange) {
        let (update, recipients) = {
            let mut inner = self.inner.lock();
            inner.own_version += 1;
            let update = PeerUpdate {
                version: inner.own_version,
                change,
            };
            let recipients: Vec<ParticipantId> = inner.ctx.remote_participants().cloned().collect();
            (update, recipients)
        };
        self.broadcaster.broadcast(&recipients, &SessionEvent::Peer(update));
    }

    /// Point assignments of a renamed profile at its new snapshot.
    pub fn rename_profile_assignments(&self, old_name: &str, renamed: Arc<Profile>) -> Vec<ParticipantId> {
        self.reassign(old_name, Some(renamed))
    }

    /// Clear assignments of a deleted profile.
    pub fn remove_profile_assignments(&self, name: &str) -> Vec<ParticipantId> {
        self.reassign(name, None)
    }

    /// Push an edited profile to every pet that uses it.
    pub fn notify_profile_updated(&self, updated: Arc<Profile>) -> Vec<ParticipantId> {
        let name = updated.name.clone();
        self.reassign(&name, Some(updated))
    }

    fn reassign(&self, name: &str, profile: Option<Arc<Profile>>) -> Vec<ParticipantId> {
        let affected: Vec<ParticipantId> = self
            .context()
            .pets()
            .filter(|p| p.profile.as_ref().is_some_and(|pr| pr.name == name))
            .map(|p| p.id.clone())
            .collect();
        let hosting = self.require_trainer("reassign").is_ok() && self.context().is_active();
        for pet in &affected {
            self.set_assignment(pet, profile.clone());
            if hosting {
                let change = match &profile {
                    Some(p) => PeerChange::ProfileAssigned {
                        participant: pet.clone(),
                        profile: (**p).clone(),
                    },
                    None => PeerChange::ProfileCleared {
                        participant: pet.clone(),
                    },
                };
                self.rebroadcast(change);
            }
        }
        affected
    }

    /// Forward a trainer-originated event to the pets it concerns.
    pub fn forward(&self, event: SessionEvent, target: Option<&ParticipantId>) {
        let ctx = self.context();
        if !ctx.is_active() || ctx.local_role != Role::Trainer {
            return;
        }
        let recipients: Vec<ParticipantId> = ctx
            .pets()
            .map(|p| p.id.clone())
            .filter(|id| target.map_or(true, |t| t == id))
            .collect();
        self.broadcaster.broadcast(&recipients, &event);
    }

    /// Send a log line to every other participant.
    pub fn broadcast_log(&self, event: SessionEvent) {
        let ctx = self.context();
        if !ctx.is_active() {
            return;
        }
        let recipients: Vec<ParticipantId> = ctx.remote_participants().cloned().collect();
        self.broadcaster.broadcast(&recipients, &event);
    }

    /// Bump liveness counters for a participant's signal streams.
    pub fn note_activity(&self, participant: &ParticipantId, stream: StreamKind) {
        let mut inner = self.inner.lock();
        if !inner.ctx.participants.contains_key(participant) {
            return;
        }
        let ctx = Arc::make_mut(&mut inner.ctx);
        if let Some(entry) = ctx.participants.get_mut(participant) {
            match stream {
                StreamKind::Speech => entry.speech_events += 1,
                StreamKind::Telemetry => entry.telemetry_events += 1,
                StreamKind::Session => {}
            }
        }
    }
}
