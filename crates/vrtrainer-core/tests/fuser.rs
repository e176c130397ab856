use std::sync::Arc;
use std::time::Duration;
use vrtrainer_core::{
    Command, FeatureKind, FuserConfig, ManualClock, ParticipantId, Role, SessionEvent, SignalFuser, SpeechEvent,
    StreamKind,
};

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn fuser(jitter_ms: u64) -> SignalFuser {
    SignalFuser::new(
        FuserConfig {
            jitter_ms,
            telemetry_depth: 32,
        },
        Arc::new(ManualClock::default()),
    )
}

fn speech(text: &str) -> SpeechEvent {
    SpeechEvent {
        text: text.into(),
        speaker_role: Role::Trainer,
    }
}

#[tokio::test]
async fn out_of_order_timestamps_come_out_non_decreasing() {
    let jitter = 20;
    let mut f = fuser(jitter);
    let speech_tx = f.speech_producer();
    let telemetry_tx = f.telemetry_producer();
    let session_tx = f.session_producer();

    telemetry_tx.push_at("pet".into(), "Tail_Stretch", 0.1f32, ms(1_000));
    speech_tx.push_at("trainer".into(), speech("sit"), ms(3_000));
    session_tx.push_at(
        "trainer".into(),
        SessionEvent::Command(Command::new(FeatureKind::Remote, "beep")),
        ms(2_000),
    );
    telemetry_tx.push_at("pet".into(), "Tail_Stretch", 0.3f32, ms(3_000));
    telemetry_tx.push_at("pet".into(), "Tail_Stretch", 0.2f32, ms(2_000));
    drop((speech_tx, telemetry_tx, session_tx));

    let mut delivered = Vec::new();
    while let Some(ev) = f.next().await {
        assert!(!ev.stale);
        delivered.push(ev.at());
    }
    assert_eq!(delivered.len(), 5);
    for pair in delivered.windows(2) {
        assert!(pair[1] + ms(jitter) >= pair[0], "{:?}", delivered);
    }
}

#[tokio::test]
async fn per_stream_order_is_strict() {
    let mut f = fuser(0);
    let t = f.telemetry_producer();
    for at in [5u64, 1, 4, 2, 3] {
        t.push_at("pet".into(), "OGB/Orf/Mouth/PenOthers", at as f32 / 10.0, ms(at));
    }
    drop(t);
    let mut seen = Vec::new();
    while let Some(ev) = f.next().await {
        assert_eq!(ev.event.stream(), StreamKind::Telemetry);
        seen.push(ev.at().as_millis() as u64);
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn speech_and_session_are_never_dropped() {
    let mut f = SignalFuser::new(
        FuserConfig {
            jitter_ms: 0,
            telemetry_depth: 1,
        },
        Arc::new(ManualClock::default()),
    );
    let s = f.speech_producer();
    let c = f.session_producer();
    for i in 0..100u64 {
        s.push_at("trainer".into(), speech("good"), ms(i));
        c.push_at(
            ParticipantId::server(),
            SessionEvent::Command(Command::new(FeatureKind::Remote, "beep")),
            ms(i),
        );
    }
    drop((s, c));
    let mut count = 0;
    while f.next().await.is_some() {
        count += 1;
    }
    assert_eq!(count, 200);
    assert_eq!(f.stats().dropped_telemetry, 0);
}

#[tokio::test]
async fn producers_use_the_clock_when_no_timestamp_given() {
    let clock = Arc::new(ManualClock::new(ms(700)));
    let mut f = SignalFuser::new(FuserConfig::default(), clock.clone());
    let t = f.telemetry_producer();
    t.push("pet".into(), "LeftEar_IsGrabbed", true);
    clock.advance(ms(50));
    t.push("pet".into(), "LeftEar_Stretch", 0.7f32);
    drop(t);

    assert_eq!(f.next().await.unwrap().at(), ms(700));
    assert_eq!(f.next().await.unwrap().at(), ms(750));
    assert!(f.next().await.is_none());
}
