use std::sync::Arc;
use std::time::Duration;
use vrtrainer_core::{
    Admission, Bounds, DeviceCommand, Difficulty, DurationCap, FeatureKey, FeatureKind, ProposedAction,
    RejectReason, SafetyLimiter,
};

fn secs(s: f32) -> Duration {
    Duration::from_secs_f32(s)
}

fn proposal(feature: FeatureKind, target: &str, intensity: f32, duration: f32, difficulty: Difficulty) -> ProposedAction {
    let mut p = ProposedAction::single(
        feature,
        target.into(),
        "trainer".into(),
        DeviceCommand::Shock,
        &difficulty,
        "test",
        Duration::ZERO,
    );
    p.intensity = intensity;
    p.duration_secs = duration;
    p
}

fn cooldown(secs: f32) -> Difficulty {
    Difficulty {
        cooldown_secs: secs,
        ..Difficulty::default()
    }
}

#[test]
fn at_most_one_approval_per_cooldown_window() {
    let limiter = SafetyLimiter::new();
    let d = cooldown(10.0);
    let mut approved = Vec::new();
    for tenth in 0..250u32 {
        let now = Duration::from_millis(tenth as u64 * 100);
        if limiter
            .admit(proposal(FeatureKind::Scolding, "pet", 30.0, 0.5, d), now)
            .is_approved()
        {
            approved.push(now);
        }
    }
    assert_eq!(
        approved,
        vec![Duration::ZERO, Duration::from_secs(10), Duration::from_secs(20)]
    );
}

#[test]
fn cooldown_is_per_participant_and_feature() {
    let limiter = SafetyLimiter::new();
    let d = cooldown(10.0);
    let now = secs(1.0);
    assert!(limiter.admit(proposal(FeatureKind::Scolding, "pet1", 30.0, 0.5, d), now).is_approved());
    assert!(limiter.admit(proposal(FeatureKind::Scolding, "pet2", 30.0, 0.5, d), now).is_approved());
    assert!(limiter.admit(proposal(FeatureKind::Remote, "pet1", 30.0, 0.5, d), now).is_approved());
    assert_eq!(
        limiter
            .admit(proposal(FeatureKind::Scolding, "pet1", 30.0, 0.5, d), now)
            .reason(),
        Some(RejectReason::CooldownActive)
    );
}

#[test]
fn intensity_above_max_is_clamped_not_rejected() {
    let limiter = SafetyLimiter::new();
    let d = Difficulty {
        strength: Bounds::new(10.0, 50.0),
        duration: Bounds::new(0.5, 2.0),
        ..Difficulty::default()
    };
    match limiter.admit(proposal(FeatureKind::Remote, "pet", 80.0, 9.0, d), Duration::ZERO) {
        Admission::Approved(a) => {
            assert_eq!(a.intensity, 50.0);
            assert_eq!(a.duration_secs, 2.0);
        }
        other => panic!("expected approval, got {:?}", other),
    }
    match limiter.admit(proposal(FeatureKind::Pull, "pet", 1.0, 0.0, d), Duration::ZERO) {
        Admission::Approved(a) => {
            assert_eq!(a.intensity, 10.0);
            assert_eq!(a.duration_secs, 0.5);
        }
        other => panic!("expected approval, got {:?}", other),
    }
}

#[test]
fn non_finite_values_are_out_of_range() {
    let limiter = SafetyLimiter::new();
    let rejected = limiter.admit(
        proposal(FeatureKind::Remote, "pet", f32::NAN, 1.0, Difficulty::default()),
        Duration::ZERO,
    );
    assert_eq!(rejected.reason(), Some(RejectReason::IntensityOutOfRange));
    // A rejected proposal consumes nothing.
    let key = FeatureKey::new("pet".into(), FeatureKind::Remote);
    assert!(limiter.snapshot(&key).unwrap().last_trigger.is_none());
}

#[test]
fn duration_cap_bounds_window_total() {
    let limiter = SafetyLimiter::new();
    let d = Difficulty {
        cooldown_secs: 0.0,
        duration: Bounds::new(1.0, 1.0),
        duration_cap: Some(DurationCap {
            max_total_secs: 2.0,
            window_secs: 60.0,
        }),
        ..Difficulty::default()
    };
    let admit = |at: f32| {
        limiter
            .admit(proposal(FeatureKind::Tricks, "pet", 20.0, 1.0, d), secs(at))
            .reason()
    };
    assert_eq!(admit(0.0), None);
    assert_eq!(admit(1.0), None);
    assert_eq!(admit(2.0), Some(RejectReason::DurationCapExceeded));
    // New window.
    assert_eq!(admit(61.0), None);
}

#[test]
fn clear_participant_only_touches_that_participant() {
    let limiter = SafetyLimiter::new();
    let d = cooldown(30.0);
    limiter.admit(proposal(FeatureKind::Scolding, "pet1", 20.0, 0.5, d), Duration::ZERO);
    limiter.admit(proposal(FeatureKind::Scolding, "pet2", 20.0, 0.5, d), Duration::ZERO);

    limiter.clear_participant(&"pet1".into());

    assert_eq!(limiter.len(), 1);
    assert!(limiter
        .snapshot(&FeatureKey::new("pet2".into(), FeatureKind::Scolding))
        .is_some());
}

#[test]
fn concurrent_proposals_for_one_key_approve_once() {
    let limiter = Arc::new(SafetyLimiter::new());
    let d = cooldown(60.0);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            std::thread::spawn(move || {
                (0..50)
                    .filter(|_| {
                        limiter
                            .admit(proposal(FeatureKind::Remote, "pet", 40.0, 0.5, d), secs(5.0))
                            .is_approved()
                    })
                    .count()
            })
        })
        .collect();
    let approved: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(approved, 1);
}

#[test]
fn clearing_a_feature_keeps_other_cooldowns() {
    let limiter = SafetyLimiter::new();
    let d = cooldown(60.0);
    assert!(limiter.admit(proposal(FeatureKind::Scolding, "pet", 30.0, 0.5, d), secs(0.0)).is_approved());
    assert!(limiter.admit(proposal(FeatureKind::Remote, "pet", 30.0, 0.5, d), secs(0.0)).is_approved());

    limiter.clear_feature(&"pet".into(), FeatureKind::Scolding);

    assert!(limiter.admit(proposal(FeatureKind::Scolding, "pet", 30.0, 0.5, d), secs(1.0)).is_approved());
    assert_eq!(
        limiter
            .admit(proposal(FeatureKind::Remote, "pet", 30.0, 0.5, d), secs(1.0))
            .reason(),
        Some(RejectReason::CooldownActive)
    );
}
