mod common;

use common::{info, join_result, profile_with, settle, Harness, ScriptedDevice};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vrtrainer_core::{
    Command, DeviceCommand, FeatureKind, FusedEvent, FuserConfig, ParticipantId, PeerChange, PeerUpdate,
    Pipeline, Profile, RejectReason, Role, SafetyLimiter, SessionEvent, SessionId, SessionState, Signal,
    SignalEvent, SignalFuser, SpeechEvent, TelemetryEvent, TrainerError, UiEvent,
};

type DeviceCalls = mpsc::UnboundedReceiver<(DeviceCommand, f32, f32)>;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn fused(origin: &str, at: Duration, payload: Signal) -> FusedEvent {
    FusedEvent::fresh(SignalEvent {
        origin: origin.into(),
        at,
        payload,
    })
}

fn trainer_says(text: &str) -> Signal {
    Signal::Session(SessionEvent::Speech(SpeechEvent {
        text: text.into(),
        speaker_role: Role::Trainer,
    }))
}

fn build(h: &Harness, failures: u32) -> (Pipeline, DeviceCalls, Arc<SafetyLimiter>) {
    let (device, calls) = ScriptedDevice::new(failures);
    let limiter = Arc::new(SafetyLimiter::new());
    let fuser = SignalFuser::new(FuserConfig::default(), h.clock.clone());
    let pipeline = Pipeline::new(
        fuser,
        limiter.clone(),
        h.coordinator.clone(),
        h.dispatcher(device),
        h.feed.clone(),
        h.clock.clone(),
    );
    (pipeline, calls, limiter)
}

async fn pet_in_session(profile: Profile) -> Harness {
    let h = Harness::new(info("pet", Role::Pet));
    h.server.answer_join(Ok(join_result(
        "S1",
        vec![info("trainer", Role::Trainer), info("pet", Role::Pet)],
        Some(profile),
    )));
    h.coordinator.join(SessionId::new("S1"), Role::Pet).await.unwrap();
    h
}

#[tokio::test]
async fn scolding_word_cooldown_scenario() {
    let mut profile = profile_with(&[FeatureKind::Scolding]);
    profile.difficulty.get_mut(FeatureKind::Scolding).cooldown_secs = 10.0;
    let h = pet_in_session(profile).await;
    let (mut pipeline, mut calls, _limiter) = build(&h, 0);
    let mut ui = h.feed.subscribe();

    h.clock.set(secs(0));
    pipeline.step(fused("trainer", secs(0), trainer_says("Bad dog"))).unwrap();
    let (command, intensity, _) = calls.recv().await.unwrap();
    assert_eq!(command, DeviceCommand::Shock);
    assert!(intensity <= 50.0);

    h.clock.set(secs(5));
    pipeline.step(fused("trainer", secs(5), trainer_says("bad"))).unwrap();

    h.clock.set(secs(11));
    pipeline.step(fused("trainer", secs(11), trainer_says("that was bad"))).unwrap();
    let (command, intensity, _) = calls.recv().await.unwrap();
    assert_eq!(command, DeviceCommand::Shock);
    assert!(intensity <= 50.0);

    let stats = h.feed.stats()[&FeatureKind::Scolding];
    assert_eq!((stats.proposed, stats.approved, stats.rejected), (3, 2, 1));

    let mut rejections = Vec::new();
    while let Ok(ev) = ui.try_recv() {
        if let UiEvent::Rejected { feature, reason, .. } = ev {
            rejections.push((feature, reason));
        }
    }
    assert_eq!(rejections, vec![(FeatureKind::Scolding, RejectReason::CooldownActive)]);
}

#[tokio::test]
async fn speech_from_another_pet_cannot_scold() {
    let h = Harness::new(info("pet", Role::Pet));
    h.server.answer_join(Ok(join_result(
        "S1",
        vec![info("trainer", Role::Trainer), info("pet2", Role::Pet)],
        Some(profile_with(&[FeatureKind::Scolding])),
    )));
    h.coordinator.join(SessionId::new("S1"), Role::Pet).await.unwrap();
    let (mut pipeline, _calls, limiter) = build(&h, 0);

    pipeline.step(fused("pet2", secs(0), trainer_says("bad"))).unwrap();

    assert!(limiter.is_empty());
    assert!(h.feed.stats().is_empty());
}

#[tokio::test]
async fn disallowed_command_halts_pipeline() {
    let h = pet_in_session(profile_with(&[FeatureKind::Focus])).await;
    let (mut pipeline, _calls, _limiter) = build(&h, 0);

    let focus_cmd = Signal::Session(SessionEvent::Command(Command::new(FeatureKind::Focus, "start")));
    let err = pipeline.step(fused("trainer", secs(0), focus_cmd)).unwrap_err();
    assert!(matches!(err, TrainerError::Permission(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn trick_times_out_into_shock() {
    let h = pet_in_session(profile_with(&[FeatureKind::Tricks])).await;
    let (mut pipeline, mut calls, _limiter) = build(&h, 0);

    let sit = Signal::Session(SessionEvent::Command(Command::new(FeatureKind::Tricks, "sit").to("pet".into())));
    pipeline.step(fused("trainer", secs(0), sit)).unwrap();
    assert_eq!(calls.recv().await.unwrap().0, DeviceCommand::Vibrate);
    assert!(pipeline.engine().has_pending(&"pet".into(), FeatureKind::Tricks));

    h.clock.set(secs(5));
    pipeline.poll().unwrap();
    assert!(pipeline.engine().has_pending(&"pet".into(), FeatureKind::Tricks));

    h.clock.set(secs(11));
    pipeline.poll().unwrap();
    assert_eq!(calls.recv().await.unwrap().0, DeviceCommand::Shock);
    assert!(!pipeline.engine().has_pending(&"pet".into(), FeatureKind::Tricks));
}

#[tokio::test]
async fn completed_trick_earns_reward() {
    let h = pet_in_session(profile_with(&[FeatureKind::Tricks])).await;
    let (mut pipeline, mut calls, _limiter) = build(&h, 0);

    pipeline
        .step(fused("trainer", secs(0), trainer_says("Rex, sit!")))
        .unwrap();
    assert_eq!(calls.recv().await.unwrap().0, DeviceCommand::Vibrate);

    h.clock.set(secs(3));
    for param in [
        "Trainer/HandFloorLeftMax",
        "Trainer/HandFloorRightMax",
        "Trainer/FootFloorLeftMax",
        "Trainer/FootFloorRightMax",
        "Trainer/HipsFloorMax",
    ] {
        let t = Signal::Telemetry(TelemetryEvent {
            parameter: param.into(),
            value: true.into(),
        });
        pipeline.step(fused("pet", secs(3), t)).unwrap();
    }
    assert_eq!(calls.recv().await.unwrap().0, DeviceCommand::Vibrate);
    assert!(!pipeline.engine().has_pending(&"pet".into(), FeatureKind::Tricks));
}

#[tokio::test]
async fn removed_pet_is_cancelled_and_trainer_stays_active() {
    let h = Harness::new(info("trainer", Role::Trainer));
    h.server.answer_create("S1");
    h.coordinator.start_hosting().await.unwrap();
    let (mut pipeline, _calls, _limiter) = build(&h, 0);
    let server = ParticipantId::server();

    let join = Signal::Session(SessionEvent::Peer(PeerUpdate {
        version: 1,
        change: PeerChange::Joined {
            participant: info("pet1", Role::Pet),
        },
    }));
    pipeline.step(fused(server.as_str(), secs(0), join)).unwrap();
    assert_eq!(h.coordinator.context().pets().count(), 1);

    let gone = Signal::Session(SessionEvent::Peer(PeerUpdate {
        version: 2,
        change: PeerChange::Disconnected {
            participant: "pet1".into(),
        },
    }));
    pipeline.step(fused(server.as_str(), secs(1), gone)).unwrap();

    let ctx = h.coordinator.context();
    assert_eq!(ctx.state, SessionState::Active);
    assert_eq!(ctx.pets().count(), 0);
    assert!(ctx.trainer().is_some());
}

#[tokio::test]
async fn trainer_forwards_local_signals_to_pets() {
    let h = Harness::new(info("trainer", Role::Trainer));
    h.server.answer_create("S1");
    h.coordinator.start_hosting().await.unwrap();
    h.coordinator
        .apply_peer(
            &ParticipantId::server(),
            &PeerUpdate {
                version: 1,
                change: PeerChange::Joined {
                    participant: info("pet1", Role::Pet),
                },
            },
        )
        .unwrap();
    let (mut pipeline, _calls, limiter) = build(&h, 0);

    let speech = Signal::Speech(SpeechEvent {
        text: "rex heel".into(),
        speaker_role: Role::Trainer,
    });
    pipeline.step(fused("trainer", secs(0), speech)).unwrap();
    let shock = Signal::Session(SessionEvent::Command(Command::new(FeatureKind::Remote, "shock").to("pet1".into())));
    pipeline.step(fused("trainer", secs(1), shock)).unwrap();
    settle().await;

    let sent = h.server.sent_to("pet1");
    assert_eq!(sent.len(), 2);
    assert!(matches!(&sent[0], SessionEvent::Speech(s) if s.text == "rex heel"));
    assert!(matches!(&sent[1], SessionEvent::Command(c) if c.name == "shock"));
    // Nothing is evaluated on the trainer's own client.
    assert!(limiter.is_empty());
}

#[tokio::test]
async fn run_drains_producers_and_stops() {
    let h = pet_in_session(profile_with(&[FeatureKind::Remote])).await;
    let (device, mut calls) = ScriptedDevice::new(0);
    let fuser = SignalFuser::new(FuserConfig::default(), h.clock.clone());
    let session_tx = fuser.session_producer();
    let pipeline = Pipeline::new(
        fuser,
        Arc::new(SafetyLimiter::new()),
        h.coordinator.clone(),
        h.dispatcher(device),
        h.feed.clone(),
        h.clock.clone(),
    )
    .with_tick(Duration::from_millis(10));
    let task = tokio::spawn(pipeline.run());

    session_tx.push("trainer".into(), SessionEvent::Command(Command::new(FeatureKind::Remote, "vibrate")));
    assert_eq!(calls.recv().await.unwrap().0, DeviceCommand::Vibrate);

    drop(session_tx);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn leaving_cancels_an_armed_word_prompt() {
    let mut profile = profile_with(&[FeatureKind::WordGame]);
    profile.difficulty.get_mut(FeatureKind::WordGame).delay_secs = 5.0;
    let h = pet_in_session(profile).await;
    let (mut pipeline, mut calls, _limiter) = build(&h, 0);

    let prompt = Signal::Session(SessionEvent::Command(
        Command::new(FeatureKind::WordGame, "prompt")
            .to("pet".into())
            .with_argument("sit"),
    ));
    pipeline.step(fused("trainer", secs(0), prompt)).unwrap();
    assert!(pipeline.engine().has_pending(&"pet".into(), FeatureKind::WordGame));

    h.coordinator.leave().await.unwrap();
    assert_eq!(h.coordinator.state(), SessionState::Closed);

    h.clock.set(secs(10));
    pipeline.poll().unwrap();
    settle().await;
    assert!(calls.try_recv().is_err());
    assert!(!pipeline.engine().has_pending(&"pet".into(), FeatureKind::WordGame));
}

#[tokio::test]
async fn trainer_leaving_resets_the_pet() {
    let mut profile = profile_with(&[FeatureKind::Tricks]);
    profile.difficulty.get_mut(FeatureKind::Tricks).delay_secs = 5.0;
    let h = pet_in_session(profile).await;
    let (mut pipeline, mut calls, _limiter) = build(&h, 0);

    let sit = Signal::Session(SessionEvent::Command(Command::new(FeatureKind::Tricks, "sit").to("pet".into())));
    pipeline.step(fused("trainer", secs(0), sit)).unwrap();
    assert_eq!(calls.recv().await.unwrap().0, DeviceCommand::Vibrate);

    let gone = Signal::Session(SessionEvent::Peer(PeerUpdate {
        version: 2,
        change: PeerChange::Left {
            participant: "trainer".into(),
        },
    }));
    pipeline.step(fused(ParticipantId::server().as_str(), secs(1), gone)).unwrap();
    assert_eq!(h.coordinator.state(), SessionState::Closed);

    h.clock.set(secs(30));
    pipeline.poll().unwrap();
    settle().await;
    assert!(calls.try_recv().is_err());
}

#[tokio::test]
async fn pet_without_a_session_is_never_triggered() {
    let h = Harness::new(info("pet", Role::Pet));
    h.coordinator
        .set_local_profile(Some(Arc::new(profile_with(&[FeatureKind::Focus, FeatureKind::Remote]))));
    let (mut pipeline, mut calls, limiter) = build(&h, 0);
    assert_eq!(h.coordinator.state(), SessionState::Idle);

    let no_contact = Signal::Telemetry(TelemetryEvent {
        parameter: "Trainer/ProximityHead".into(),
        value: false.into(),
    });
    pipeline.step(fused("pet", secs(0), no_contact)).unwrap();
    h.clock.set(secs(100));
    pipeline.poll().unwrap();
    settle().await;

    assert!(calls.try_recv().is_err());
    assert!(limiter.is_empty());
}
