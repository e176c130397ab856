//! Per-participant outbound queues to the session server.
//!
//! Each recipient gets its own task and its own retry loop, so a slow or
//! unreachable participant never delays delivery to the others.

use crate::feed::{Link, UiEvent, UiFeed};
use crate::retry::RetryPolicy;
use crate::session::{ConnectionStatus, SessionServer};
use crate::signal::SessionEvent;
use crate::types::ParticipantId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct Outbox {
    tx: mpsc::UnboundedSender<SessionEvent>,
    task: JoinHandle<()>,
}

pub struct Broadcaster {
    server: Arc<dyn SessionServer>,
    policy: RetryPolicy,
    feed: Arc<UiFeed>,
    outboxes: Mutex<HashMap<ParticipantId, Outbox>>,
}

impl Broadcaster {
    pub fn new(server: Arc<dyn SessionServer>, policy: RetryPolicy, feed: Arc<UiFeed>) -> Self {
        Self {
            server,
            policy,
            feed,
            outboxes: Mutex::new(HashMap::new()),
        }
    }

    /// Queue `event` for `to`. Must be called from within a tokio runtime.
    pub fn send_to(&self, to: &ParticipantId, event: SessionEvent) {
        let mut outboxes = self.outboxes.lock();
        let event = match outboxes.get(to) {
            Some(outbox) => match outbox.tx.send(event) {
                Ok(()) => return,
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(event);
        let task = tokio::spawn(run_outbox(
            Arc::clone(&self.server),
            to.clone(),
            self.policy,
            Arc::clone(&self.feed),
            rx,
        ));
        outboxes.insert(to.clone(), Outbox { tx, task });
    }

    pub fn broadcast<'a>(&self, recipients: impl IntoIterator<Item = &'a ParticipantId>, event: &SessionEvent) {
        for to in recipients {
            self.send_to(to, event.clone());
        }
    }

    /// Abort pending deliveries to one participant.
    pub fn cancel(&self, participant: &ParticipantId) {
        if let Some(outbox) = self.outboxes.lock().remove(participant) {
            outbox.task.abort();
            debug!(participant = %participant.short(), "Outbox cancelled");
        }
    }

    pub fn cancel_all(&self) {
        for (_, outbox) in self.outboxes.lock().drain() {
            outbox.task.abort();
        }
    }

    pub fn pending_recipients(&self) -> usize {
        self.outboxes.lock().len()
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

async fn run_outbox(
    server: Arc<dyn SessionServer>,
    to: ParticipantId,
    policy: RetryPolicy,
    feed: Arc<UiFeed>,
    mut rx: mpsc::UnboundedReceiver<SessionEvent>,
) {
    while let Some(event) = rx.recv().await {
        let attempts = policy.attempts();
        for attempt in 1..=attempts {
            match server.send(&to, &event).await {
                Ok(()) => break,
                Err(e) if attempt < attempts => {
                    debug!(participant = %to.short(), attempt, error = %e, "Session send failed, retrying");
                    tokio::time::sleep(policy.backoff(attempt)).await;
                }
                Err(e) => {
                    warn!(participant = %to.short(), attempts, error = %e, "Session send gave up");
                    feed.emit(UiEvent::Connection {
                        link: Link::Participant(to.clone()),
                        status: ConnectionStatus::Degraded,
                    });
                }
            }
        }
    }
}
