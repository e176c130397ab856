//! VR trainer daemon
//!
//! Runs one trainer or pet client without a UI: joins or hosts a session, drives the
//! signal pipeline and the feedback device, and takes console commands on stdin.

mod console;

use console::{Args, Console, HELP};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vrtrainer_core::{
    spawn_inbound_pump, ActionDispatcher, Broadcaster, MonotonicClock, ParticipantId, ParticipantInfo, Pipeline,
    ProfileStore, Role, SafetyLimiter, SessionCoordinator, SessionProducer, SessionServer, SessionState,
    SignalFuser, SpeechEvent, SpeechProducer, TelemetryProducer, TrainerConfig, UiEvent, UiFeed,
};
use vrtrainer_remote::{device_from_config, HttpSessionServer};
use vrtrainer_voice::{create_best_stt, wav_to_utterance, TranscriptWorker, Utterance};

type DaemonResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[vrtrainer-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{}", msg);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args).await {
        error!(error = %e, "Daemon stopped");
        std::process::exit(1);
    }
}

/// Handles the console talks to.
struct Client {
    local: ParticipantInfo,
    coordinator: Arc<SessionCoordinator>,
    profiles: ProfileStore,
    feed: Arc<UiFeed>,
    speech: SpeechProducer,
    telemetry: TelemetryProducer,
    session: SessionProducer,
    utterances: mpsc::Sender<Utterance>,
}

async fn run(args: Args) -> DaemonResult<()> {
    let mut config = match &args.config {
        Some(path) => TrainerConfig::load_from(path)?,
        None => TrainerConfig::load()?,
    };
    if let Some(role) = args.role {
        config.role = role;
    }

    let mut profiles = ProfileStore::load_from_path(&config.profiles_path)?;
    if let Some(name) = &args.profile {
        profiles.set_active(name)?;
    }

    let local = ParticipantInfo {
        id: ParticipantId::generate(),
        role: config.role,
        username: config.username.clone(),
    };
    let server = Arc::new(HttpSessionServer::new(&config.server_url, local.id.clone())?);
    if let Err(e) = server.health().await {
        warn!(server = %config.server_url, error = %e, "Session server not reachable yet");
    }

    let feed = Arc::new(UiFeed::default());
    let feed_logger = spawn_feed_logger(&feed);
    let broadcaster = Arc::new(Broadcaster::new(server.clone(), config.broadcast.into(), feed.clone()));
    let coordinator = Arc::new(SessionCoordinator::new(
        local.clone(),
        server.clone(),
        broadcaster.clone(),
        feed.clone(),
        config.session,
    ));
    if local.role == Role::Pet {
        coordinator.set_local_profile(profiles.active());
    }

    let device = device_from_config(&config.device);
    let dispatcher = Arc::new(ActionDispatcher::new(
        device,
        config.dispatch.into(),
        broadcaster.clone(),
        feed.clone(),
    ));

    let clock = Arc::new(MonotonicClock::new());
    let fuser = SignalFuser::new(config.fuser, clock.clone());
    let speech = fuser.speech_producer();
    let telemetry = fuser.telemetry_producer();
    let session = fuser.session_producer();

    let inbound = server.subscribe().map(|rx| spawn_inbound_pump(rx, session.clone()));

    let (utterances, utterance_rx) = mpsc::channel(16);
    let transcriber = TranscriptWorker::new(Arc::from(create_best_stt()), speech.clone(), local.id.clone(), local.role)
        .spawn(utterance_rx);

    let pipeline = Pipeline::new(
        fuser,
        Arc::new(SafetyLimiter::new()),
        coordinator.clone(),
        dispatcher.clone(),
        feed.clone(),
        clock,
    )
    .with_tick(Duration::from_millis(config.tick_ms));
    let mut pipeline_task = tokio::spawn(pipeline.run());

    info!(
        participant = %local.id,
        role = %local.role,
        username = %local.username,
        server = %config.server_url,
        "VR trainer daemon started"
    );

    if args.host {
        match coordinator.start_hosting().await {
            Ok(id) => info!(session = %id, "Hosting session"),
            Err(e) => warn!(error = %e, "Could not host a session"),
        }
    } else if let Some(id) = args.join {
        match coordinator.join(id.clone(), local.role).await {
            Ok(()) => info!(session = %id, "Joined session"),
            Err(e) => warn!(session = %id, error = %e, "Could not join session"),
        }
    }

    let client = Client {
        local,
        coordinator: coordinator.clone(),
        profiles,
        feed: feed.clone(),
        speech,
        telemetry,
        session,
        utterances,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut outcome = Ok(());
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.parse::<Console>() {
                    Ok(Console::Quit) => break,
                    Ok(cmd) => client.execute(cmd).await,
                    Err(msg) if msg.is_empty() => {}
                    Err(msg) => warn!("{}", msg),
                },
                Ok(None) => {
                    info!("Console closed; running until interrupted");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "Console read failed");
                    stdin_open = false;
                }
            },
            res = &mut pipeline_task => {
                outcome = match res {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(e.into()),
                };
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    if matches!(coordinator.state(), SessionState::Active | SessionState::Hosting) {
        if let Err(e) = coordinator.leave().await {
            warn!(error = %e, "Leave on shutdown failed");
        }
    }
    dispatcher.cancel_all();
    broadcaster.cancel_all();
    drop(client);
    pipeline_task.abort();
    transcriber.abort();
    if let Some(task) = inbound {
        task.abort();
    }
    feed_logger.abort();
    info!("VR trainer daemon stopped");
    outcome
}

impl Client {
    async fn execute(&self, cmd: Console) {
        match cmd {
            Console::Say(text) => self.speech.push(
                self.local.id.clone(),
                SpeechEvent {
                    text,
                    speaker_role: self.local.role,
                },
            ),
            Console::Param { name, value } => self.telemetry.push(self.local.id.clone(), name, value),
            Console::Cmd(command) => {
                if self.local.role != Role::Trainer {
                    warn!("Only the trainer can send commands");
                    return;
                }
                if command.feature.affinity().command != Some(Role::Trainer) {
                    warn!(feature = %command.feature, "Feature takes no trainer commands");
                    return;
                }
                self.session.command(&self.coordinator.context(), command);
            }
            Console::Assign { pet, profile } => match self.profiles.get(&profile) {
                Some(p) => match self.coordinator.assign_profile(&pet, p) {
                    Ok(effect) => info!(pet = %pet, profile = %profile, ?effect, "Profile assigned"),
                    Err(e) => warn!(pet = %pet, error = %e, "Assign failed"),
                },
                None => warn!(profile = %profile, known = ?self.profiles.list(), "Unknown profile"),
            },
            Console::Kick(pet) => match self.coordinator.kick(&pet).await {
                Ok(effect) => info!(pet = %pet, ?effect, "Kicked"),
                Err(e) => warn!(pet = %pet, error = %e, "Kick failed"),
            },
            Console::Hear(path) => {
                let utterance = match tokio::fs::read(&path).await {
                    Ok(bytes) => wav_to_utterance(&bytes),
                    Err(e) => {
                        warn!(path = %path, error = %e, "Cannot read recording");
                        return;
                    }
                };
                match utterance {
                    Ok(u) => {
                        if self.utterances.send(u).await.is_err() {
                            warn!("Transcript worker is gone");
                        }
                    }
                    Err(e) => warn!(path = %path, error = %e, "Cannot decode recording"),
                }
            }
            Console::Table => {
                for row in self.coordinator.table() {
                    info!(
                        participant = %row.participant,
                        username = %row.username,
                        role = %row.role,
                        status = ?row.status,
                        profile = row.profile.as_deref().unwrap_or("-"),
                        local = row.is_local,
                        speech = row.speech_events,
                        telemetry = row.telemetry_events,
                        "participant"
                    );
                }
            }
            Console::Stats => {
                for (feature, stats) in self.feed.stats() {
                    info!(%feature, ?stats, "feature stats");
                }
            }
            Console::Leave => {
                if let Err(e) = self.coordinator.leave().await {
                    warn!(error = %e, "Leave failed");
                }
            }
            Console::Help => info!("\n{}", HELP),
            Console::Quit => {}
        }
    }
}

/// Mirror UI feed events into the log.
fn spawn_feed_logger(feed: &UiFeed) -> JoinHandle<()> {
    let mut rx = feed.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_ui_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "UI feed lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_ui_event(event: &UiEvent) {
    match event {
        UiEvent::SessionState(state) => info!(?state, "Session state"),
        UiEvent::SessionTable(rows) => info!(participants = rows.len(), "Session table updated"),
        UiEvent::Log(entry) => match entry.feature {
            Some(feature) => info!(participant = %entry.participant, %feature, "{}", entry.message),
            None => info!(participant = %entry.participant, "{}", entry.message),
        },
        UiEvent::Transcript { speaker, text } => info!(%speaker, text = %text, "Transcript"),
        UiEvent::Rejected {
            participant,
            feature,
            reason,
        } => info!(%participant, %feature, %reason, "Action rejected"),
        UiEvent::DeviceUnreachable {
            participant,
            feature,
            attempts,
            error,
        } => warn!(%participant, %feature, attempts, error = %error, "Device unreachable"),
        UiEvent::Connection { link, status } => info!(?link, ?status, "Connection"),
        UiEvent::HostingTimedOut => warn!("Session server did not answer the hosting request"),
        UiEvent::JoinFailed(e) => warn!(error = %e, "Join failed"),
        UiEvent::Stats(_) => {}
    }
}
