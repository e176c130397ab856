//! Session server client: REST calls for the session lifecycle and a WebSocket for
//! pushed and relayed messages.

use crate::error::{RemoteError, RemoteResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};
use vrtrainer_core::{
    InboundMessage, JoinResult, ParticipantId, ParticipantInfo, Role, SessionEvent, SessionFailure, SessionId,
    SessionServer,
};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(6);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetScope {
    PerClient,
    Broadcast,
}

/// Frame exchanged over the session WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from_client: ParticipantId,
    pub target_scope: TargetScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_client: Option<ParticipantId>,
    pub event: SessionEvent,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn to_client(from: ParticipantId, to: ParticipantId, event: SessionEvent) -> Self {
        Self {
            from_client: from,
            target_scope: TargetScope::PerClient,
            target_client: Some(to),
            event,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Announce<'a> {
    client_uuid: &'a ParticipantId,
    role: Role,
    username: &'a str,
}

impl<'a> From<&'a ParticipantInfo> for Announce<'a> {
    fn from(info: &'a ParticipantInfo) -> Self {
        Self {
            client_uuid: &info.id,
            role: info.role,
            username: &info.username,
        }
    }
}

#[derive(Debug, Serialize)]
struct ClientRef<'a> {
    client_uuid: &'a ParticipantId,
}

#[derive(Debug, Deserialize)]
struct Created {
    session_id: SessionId,
}

/// WebSocket URL for `session` derived from the HTTP base URL.
pub fn socket_url(base_url: &str, session: &SessionId, client: &ParticipantId) -> RemoteResult<String> {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        return Err(RemoteError::InvalidUrl(base_url.to_string()));
    };
    Ok(format!(
        "{}/sessions/{}/ws?client_uuid={}",
        ws_base,
        session.as_str(),
        client.as_str()
    ))
}

/// Live WebSocket for one session. Dropping it stops the socket task.
struct Link {
    session_id: SessionId,
    outbound: mpsc::UnboundedSender<Envelope>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// [`SessionServer`] backed by the hosted session service.
pub struct HttpSessionServer {
    base_url: String,
    client: reqwest::Client,
    local: ParticipantId,
    reconnect_delay: Duration,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
    link: Mutex<Option<Link>>,
}

impl HttpSessionServer {
    pub fn new(base_url: &str, local: ParticipantId) -> RemoteResult<Self> {
        let parsed = reqwest::Url::parse(base_url).map_err(|_| RemoteError::InvalidUrl(base_url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RemoteError::InvalidUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            local,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            link: Mutex::new(None),
        })
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the session socket is currently up.
    pub fn is_connected(&self) -> bool {
        self.link
            .lock()
            .as_ref()
            .is_some_and(|l| l.connected.load(Ordering::SeqCst))
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.link.lock().as_ref().map(|l| l.session_id.clone())
    }

    /// Probe `GET /health`.
    pub async fn health(&self) -> RemoteResult<()> {
        let resp = self.client.get(format!("{}/health", self.base_url)).send().await?;
        check_status(resp).await.map(|_| ())
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RemoteResult<reqwest::Response> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        check_status(resp).await
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(&self, path: &str, body: &B) -> RemoteResult<R> {
        Ok(self.post(path, body).await?.json::<R>().await?)
    }

    fn open_link(&self, session_id: &SessionId) -> RemoteResult<()> {
        let url = socket_url(&self.base_url, session_id, &self.local)?;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_socket(
            url,
            outbound_rx,
            self.inbound_tx.clone(),
            Arc::clone(&connected),
            self.reconnect_delay,
        ));
        *self.link.lock() = Some(Link {
            session_id: session_id.clone(),
            outbound,
            connected,
            task,
        });
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response) -> RemoteResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl SessionServer for HttpSessionServer {
    #[instrument(skip(self, host), fields(host = %host.id.short()))]
    async fn create_session(&self, host: &ParticipantInfo) -> Result<SessionId, SessionFailure> {
        let created: Created = self.post_json("/sessions", &Announce::from(host)).await?;
        info!(session = %created.session_id, "Session created");
        self.open_link(&created.session_id)?;
        Ok(created.session_id)
    }

    #[instrument(skip(self, who), fields(session = %id))]
    async fn join_session(&self, id: &SessionId, who: &ParticipantInfo) -> Result<JoinResult, SessionFailure> {
        let code = id.as_str().trim();
        if code.is_empty() {
            return Err(SessionFailure::InvalidSessionId);
        }
        let result: JoinResult = self
            .post_json(&format!("/sessions/{}/join", code), &Announce::from(who))
            .await?;
        info!(participants = result.participants.len(), "Joined session");
        self.open_link(&result.session_id)?;
        Ok(result)
    }

    async fn leave_session(&self, id: &SessionId, participant: &ParticipantId) -> Result<(), SessionFailure> {
        let link = self.link.lock().take();
        drop(link);
        self.post(
            &format!("/sessions/{}/leave", id.as_str()),
            &ClientRef {
                client_uuid: participant,
            },
        )
        .await?;
        Ok(())
    }

    async fn kick(&self, id: &SessionId, participant: &ParticipantId) -> Result<(), SessionFailure> {
        self.post(
            &format!("/sessions/{}/kick", id.as_str()),
            &ClientRef {
                client_uuid: participant,
            },
        )
        .await?;
        Ok(())
    }

    async fn send(&self, to: &ParticipantId, event: &SessionEvent) -> Result<(), SessionFailure> {
        let link = self.link.lock();
        let link = link.as_ref().ok_or(SessionFailure::NoResponse)?;
        if !link.connected.load(Ordering::SeqCst) {
            return Err(SessionFailure::NoResponse);
        }
        link.outbound
            .send(Envelope::to_client(self.local.clone(), to.clone(), event.clone()))
            .map_err(|_| SessionFailure::NoResponse)
    }

    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.inbound_rx.lock().take()
    }
}

enum SocketEnd {
    ServerClosed,
    OwnerGone,
}

/// Keep the session socket up until the owning [`Link`] goes away, reconnecting
/// after `reconnect_delay` whenever it drops.
async fn run_socket(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    connected: Arc<AtomicBool>,
    reconnect_delay: Duration,
) {
    loop {
        match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                connected.store(true, Ordering::SeqCst);
                info!(url = %url, "Session socket connected");
                let end = pump(socket, &mut outbound, &inbound).await;
                connected.store(false, Ordering::SeqCst);
                match end {
                    Ok(SocketEnd::OwnerGone) => return,
                    Ok(SocketEnd::ServerClosed) => info!("Session socket closed by server"),
                    Err(e) => warn!(error = %e, "Session socket failed"),
                }
            }
            Err(e) => warn!(url = %url, error = %e, "Session socket connect failed"),
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn pump(
    socket: Socket,
    outbound: &mut mpsc::UnboundedReceiver<Envelope>,
    inbound: &mpsc::UnboundedSender<InboundMessage>,
) -> RemoteResult<SocketEnd> {
    let (mut sink, mut source) = socket.split();
    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(envelope) = next else {
                    let _ = sink.close().await;
                    return Ok(SocketEnd::OwnerGone);
                };
                sink.send(Message::Text(serde_json::to_string(&envelope)?)).await?;
            }
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => deliver(&text, inbound),
                Some(Ok(Message::Close(_))) | None => return Ok(SocketEnd::ServerClosed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}

fn deliver(text: &str, inbound: &mpsc::UnboundedSender<InboundMessage>) {
    match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => {
            let message = InboundMessage {
                from: envelope.from_client,
                event: envelope.event,
            };
            if inbound.send(message).is_err() {
                debug!("No subscriber for session messages");
            }
        }
        Err(e) => debug!(error = %e, "Ignoring malformed session frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrtrainer_core::{Command, FeatureKind, PeerChange, PeerUpdate};

    #[test]
    fn socket_url_swaps_scheme() {
        let session = SessionId::new("s-abc123");
        let me = ParticipantId::new("c1");
        assert_eq!(
            socket_url("https://vrtrainer.online/", &session, &me).unwrap(),
            "wss://vrtrainer.online/sessions/s-abc123/ws?client_uuid=c1"
        );
        assert_eq!(
            socket_url("http://127.0.0.1:8090", &session, &me).unwrap(),
            "ws://127.0.0.1:8090/sessions/s-abc123/ws?client_uuid=c1"
        );
        assert!(socket_url("ftp://x", &session, &me).is_err());
    }

    #[test]
    fn envelope_wire_shape() {
        let env = Envelope::to_client(
            "trainer".into(),
            "pet".into(),
            SessionEvent::Command(Command::new(FeatureKind::Remote, "shock")),
        );
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["from_client"], "trainer");
        assert_eq!(json["target_scope"], "per_client");
        assert_eq!(json["target_client"], "pet");
        assert_eq!(json["event"]["type"], "command");
    }

    #[test]
    fn server_push_parses() {
        let raw = r#"{
            "from_client": "server",
            "target_scope": "broadcast",
            "event": {"type": "peer", "payload": {"version": 4, "change": "closed"}},
            "timestamp": "2026-01-01T00:00:00Z"
        }"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert!(env.from_client.is_server());
        assert_eq!(env.target_client, None);
        assert_eq!(
            env.event,
            SessionEvent::Peer(PeerUpdate {
                version: 4,
                change: PeerChange::Closed,
            })
        );
    }

    #[test]
    fn rejects_non_http_base() {
        assert!(HttpSessionServer::new("not a url", "c1".into()).is_err());
        assert!(HttpSessionServer::new("ws://host", "c1".into()).is_err());
    }

    #[tokio::test]
    async fn send_without_session_is_no_response() {
        let server = HttpSessionServer::new("http://127.0.0.1:9", "c1".into()).unwrap();
        let event = SessionEvent::Command(Command::new(FeatureKind::Remote, "beep"));
        assert_eq!(server.send(&"pet".into(), &event).await, Err(SessionFailure::NoResponse));
        assert!(server.subscribe().is_some());
        assert!(server.subscribe().is_none());
    }
}
