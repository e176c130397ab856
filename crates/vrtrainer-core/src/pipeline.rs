//! Consumer loop: fuser -> session routing -> feature engine -> limiter -> dispatch.

use crate::action::ProposedAction;
use crate::dispatch::ActionDispatcher;
use crate::error::TrainerResult;
use crate::features::FeatureEngine;
use crate::feed::{Stat, UiEvent, UiFeed};
use crate::fuser::{SessionProducer, SignalFuser};
use crate::limiter::{Admission, SafetyLimiter};
use crate::session::{Inbound, InboundMessage, PeerEffect, SessionContext, SessionCoordinator};
use crate::signal::{FusedEvent, SessionEvent, Signal};
use crate::types::{Clock, Role};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub struct Pipeline {
    fuser: SignalFuser,
    engine: FeatureEngine,
    limiter: Arc<SafetyLimiter>,
    coordinator: Arc<SessionCoordinator>,
    dispatcher: Arc<ActionDispatcher>,
    feed: Arc<UiFeed>,
    clock: Arc<dyn Clock>,
    tick: Duration,
    closed: watch::Receiver<u64>,
}

impl Pipeline {
    pub fn new(
        fuser: SignalFuser,
        limiter: Arc<SafetyLimiter>,
        coordinator: Arc<SessionCoordinator>,
        dispatcher: Arc<ActionDispatcher>,
        feed: Arc<UiFeed>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let closed = coordinator.closures();
        Self {
            fuser,
            engine: FeatureEngine::new(),
            limiter,
            coordinator,
            dispatcher,
            feed,
            clock,
            tick: Duration::from_millis(100),
            closed,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    pub fn engine(&self) -> &FeatureEngine {
        &self.engine
    }

    /// Run until every producer is dropped or a fatal error occurs.
    pub async fn run(mut self) -> TrainerResult<()> {
        info!(tick_ms = self.tick.as_millis() as u64, "🚀 Pipeline started");
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                next = self.fuser.next() => match next {
                    Some(fused) => self.step(fused)?,
                    None => break,
                },
                _ = ticker.tick() => self.poll()?,
                Ok(()) = self.closed.changed() => self.apply_effect(PeerEffect::Closed),
            }
        }
        info!("Pipeline stopped: all producers closed");
        Ok(())
    }

    /// Process one fused event.
    pub fn step(&mut self, fused: FusedEvent) -> TrainerResult<()> {
        self.observe_close();
        let origin = fused.origin().clone();
        self.coordinator.note_activity(&origin, fused.event.stream());

        match &fused.event.payload {
            Signal::Session(event) => match self.coordinator.handle_inbound(&origin, event) {
                Ok(Inbound::Evaluate) => {}
                Ok(Inbound::Peer(effect)) => {
                    self.apply_effect(effect);
                    return Ok(());
                }
                Ok(Inbound::Logged) | Ok(Inbound::Dropped) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(from = %origin.short(), error = %e, "Session message rejected");
                    return Ok(());
                }
            },
            Signal::Speech(speech) => {
                self.feed.emit(UiEvent::Transcript {
                    speaker: speech.speaker_role,
                    text: speech.text.clone(),
                });
            }
            Signal::Telemetry(_) => {}
        }

        let ctx = self.coordinator.context();
        if origin == ctx.local && ctx.local_role == Role::Trainer {
            self.forward(&fused);
        }

        let proposals = match self.engine.evaluate(&fused, &ctx) {
            Ok(proposals) => proposals,
            Err(e) if e.is_fatal() => {
                error!(origin = %origin.short(), error = %e, "Feature evaluation failed");
                return Err(e);
            }
            Err(e) => {
                warn!(origin = %origin.short(), error = %e, "Feature evaluation skipped");
                return Ok(());
            }
        };
        self.admit_all(proposals, &ctx);
        Ok(())
    }

    /// Fire expired feature deadlines.
    pub fn poll(&mut self) -> TrainerResult<()> {
        self.observe_close();
        let ctx = self.coordinator.context();
        let proposals = self.engine.poll_deadlines(self.clock.now(), &ctx);
        self.admit_all(proposals, &ctx);
        Ok(())
    }

    /// Send the local trainer's own signals to the pets that evaluate them.
    fn forward(&self, fused: &FusedEvent) {
        match &fused.event.payload {
            Signal::Speech(s) => self.coordinator.forward(SessionEvent::Speech(s.clone()), None),
            Signal::Telemetry(t) => self.coordinator.forward(SessionEvent::Telemetry(t.clone()), None),
            Signal::Session(SessionEvent::Command(cmd)) => self
                .coordinator
                .forward(SessionEvent::Command(cmd.clone()), cmd.target.as_ref()),
            Signal::Session(_) => {}
        }
    }

    fn admit_all(&self, proposals: Vec<ProposedAction>, ctx: &Arc<SessionContext>) {
        if proposals.is_empty() {
            return;
        }
        let now = self.clock.now();
        for proposed in proposals {
            self.feed.record(proposed.feature, Stat::Proposed);
            match self.limiter.admit(proposed, now) {
                Admission::Approved(action) => {
                    self.feed.record(action.feature, Stat::Approved);
                    debug!(
                        participant = %action.target.short(),
                        feature = %action.feature,
                        intensity = action.intensity,
                        "Action approved"
                    );
                    self.dispatcher.spawn(action, Arc::clone(ctx));
                }
                Admission::Rejected { action, reason } => {
                    self.feed.record(action.feature, Stat::Rejected);
                    debug!(
                        participant = %action.target.short(),
                        feature = %action.feature,
                        reason = %reason,
                        "Action rejected"
                    );
                    self.feed.emit(UiEvent::Rejected {
                        participant: action.target,
                        feature: action.feature,
                        reason,
                    });
                }
            }
        }
        self.feed.publish_stats();
    }

    /// Cancel everything left over from a session the coordinator has closed.
    fn observe_close(&mut self) {
        if self.closed.has_changed().unwrap_or(false) {
            let closures = *self.closed.borrow_and_update();
            debug!(closures, "Session closed, cancelling pending work");
            self.apply_effect(PeerEffect::Closed);
        }
    }

    fn apply_effect(&mut self, effect: PeerEffect) {
        match effect {
            PeerEffect::Removed(participant) => {
                self.engine.cancel_participant(&participant);
                self.limiter.clear_participant(&participant);
                self.dispatcher.cancel_participant(&participant);
            }
            PeerEffect::ProfileChanged(participant) => {
                let ctx = self.coordinator.context();
                match ctx.profile_of(&participant) {
                    Some(profile) => self.engine.sync_profile(&participant, profile),
                    None => self.engine.cancel_participant(&participant),
                }
            }
            PeerEffect::Closed => {
                self.engine.cancel_all();
                self.dispatcher.cancel_all();
            }
            PeerEffect::Added(_) | PeerEffect::Unchanged | PeerEffect::Duplicate => {}
        }
    }
}

/// Feed messages pushed by the session server into the fuser's session stream.
pub fn spawn_inbound_pump(
    mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
    producer: SessionProducer,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = inbound.recv().await {
            producer.push(msg.from, msg.event);
        }
        debug!("Session inbound stream ended");
    })
}
