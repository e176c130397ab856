mod common;

use common::{info, join_result, settle, Harness, ScriptedDevice};
use std::sync::atomic::Ordering;
use std::time::Duration;
use vrtrainer_core::{
    Admission, ApprovedAction, DeviceCommand, DeviceError, Difficulty, DispatchResult, FeatureKey, FeatureKind,
    ProposedAction, RejectReason, Role, SafetyLimiter, SessionEvent, SessionId, UiEvent,
};

fn remote_shock(cooldown_secs: f32) -> ProposedAction {
    let d = Difficulty {
        cooldown_secs,
        ..Difficulty::default()
    };
    ProposedAction::single(
        FeatureKind::Remote,
        "pet".into(),
        "trainer".into(),
        DeviceCommand::Shock,
        &d,
        "shock",
        Duration::ZERO,
    )
}

fn approve(limiter: &SafetyLimiter, proposed: ProposedAction, at: Duration) -> ApprovedAction {
    match limiter.admit(proposed, at) {
        Admission::Approved(a) => a,
        other => panic!("expected approval, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn device_failing_three_times_is_unreachable_and_cooldown_stays() {
    let h = Harness::new(info("pet", Role::Pet));
    let (device, _calls) = ScriptedDevice::new(3);
    let dispatcher = h.dispatcher(device.clone());
    let limiter = SafetyLimiter::new();
    let approved = approve(&limiter, remote_shock(10.0), Duration::ZERO);
    let mut ui = h.feed.subscribe();

    let started = tokio::time::Instant::now();
    let result = dispatcher.dispatch(&approved, &h.coordinator.context()).await;

    assert_eq!(
        result,
        DispatchResult::DeviceUnreachable {
            attempts: 3,
            last_error: DeviceError::Transport("connection refused".into()),
        }
    );
    assert_eq!(device.calls.load(Ordering::SeqCst), 3);
    // 200ms + 400ms of backoff between the three attempts.
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(600) && waited < Duration::from_millis(700), "{:?}", waited);

    // The failed delivery never returns the slot to the limiter.
    assert_eq!(
        limiter.admit(remote_shock(10.0), Duration::from_secs(1)).reason(),
        Some(RejectReason::CooldownActive)
    );
    let state = limiter
        .snapshot(&FeatureKey::new("pet".into(), FeatureKind::Remote))
        .unwrap();
    assert_eq!(state.last_trigger, Some(Duration::ZERO));
    assert_eq!(state.cooldown_expiry, Duration::from_secs(10));

    let mut surfaced = false;
    while let Ok(ev) = ui.try_recv() {
        if let UiEvent::DeviceUnreachable { feature, attempts, .. } = ev {
            surfaced |= feature == FeatureKind::Remote && attempts == 3;
        }
    }
    assert!(surfaced);
    assert_eq!(h.feed.stats()[&FeatureKind::Remote].unreachable, 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried_and_logged_to_session() {
    let h = Harness::new(info("pet", Role::Pet));
    h.server.answer_join(Ok(join_result(
        "S1",
        vec![info("trainer", Role::Trainer), info("pet", Role::Pet)],
        None,
    )));
    h.coordinator.join(SessionId::new("S1"), Role::Pet).await.unwrap();

    let (device, mut calls) = ScriptedDevice::new(1);
    let dispatcher = h.dispatcher(device.clone());
    let limiter = SafetyLimiter::new();
    let approved = approve(&limiter, remote_shock(2.0), Duration::ZERO);

    let result = dispatcher.dispatch(&approved, &h.coordinator.context()).await;
    assert_eq!(result, DispatchResult::Delivered { attempts: 2 });
    assert_eq!(calls.recv().await, Some((DeviceCommand::Shock, 50.0, 0.2)));

    settle().await;
    let to_trainer = h.server.sent_to("trainer");
    assert_eq!(to_trainer.len(), 1);
    match &to_trainer[0] {
        SessionEvent::Log(entry) => {
            assert_eq!(entry.feature, Some(FeatureKind::Remote));
            assert_eq!(entry.participant.as_str(), "pet");
        }
        other => panic!("unexpected session event {:?}", other),
    }
    assert_eq!(h.feed.recent_logs().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelling_participant_aborts_pending_retries() {
    let h = Harness::new(info("pet", Role::Pet));
    let (device, _calls) = ScriptedDevice::new(100);
    let dispatcher = h.dispatcher(device.clone());
    let limiter = SafetyLimiter::new();
    let approved = approve(&limiter, remote_shock(2.0), Duration::ZERO);

    let handle = dispatcher.spawn(approved, h.coordinator.context());
    settle().await;
    assert_eq!(device.calls.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.in_flight(&"pet".into()), 1);

    dispatcher.cancel_participant(&"pet".into());
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(handle.await.unwrap_err().is_cancelled());
    assert_eq!(device.calls.load(Ordering::SeqCst), 1);
}
