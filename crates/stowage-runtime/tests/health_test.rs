use std::time::Duration;

use stowage_core::StowageConfig;
use stowage_runtime::health::{HealthState, HealthTracker, Transition};

const START: Duration = Duration::from_secs(40);

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[test]
fn starts_in_starting_state() {
    let tracker = HealthTracker::new(START, 3);
    assert_eq!(tracker.state(), HealthState::Starting);
    assert_eq!(tracker.failing_streak(), 0);
}

#[test]
fn success_in_start_period_becomes_healthy() {
    let mut tracker = HealthTracker::new(START, 3);
    let t = tracker.record(true, secs(5));
    assert_eq!(
        t,
        Some(Transition {
            from: HealthState::Starting,
            to: HealthState::Healthy
        })
    );
    assert_eq!(tracker.state(), HealthState::Healthy);
}

#[test]
fn failures_in_start_period_do_not_count() {
    let mut tracker = HealthTracker::new(START, 3);
    for s in [5, 10, 20, 30, 39] {
        assert_eq!(tracker.record(false, secs(s)), None);
    }
    assert_eq!(tracker.state(), HealthState::Starting);
    assert_eq!(tracker.failing_streak(), 0);
}

#[test]
fn exactly_retries_failures_after_start_period_turn_unhealthy() {
    let mut tracker = HealthTracker::new(START, 3);
    assert_eq!(tracker.record(false, secs(40)), None);
    assert_eq!(tracker.record(false, secs(70)), None);
    assert_eq!(tracker.failing_streak(), 2);
    assert_eq!(tracker.state(), HealthState::Starting);

    let t = tracker.record(false, secs(100));
    assert_eq!(
        t,
        Some(Transition {
            from: HealthState::Starting,
            to: HealthState::Unhealthy
        })
    );
    assert_eq!(tracker.failing_streak(), 3);
}

#[test]
fn healthy_turns_unhealthy_after_retries_failures_even_in_start_period() {
    let mut tracker = HealthTracker::new(START, 2);
    tracker.record(true, secs(1));
    assert_eq!(tracker.record(false, secs(2)), None);
    assert_eq!(tracker.state(), HealthState::Healthy);
    let t = tracker.record(false, secs(3)).unwrap();
    assert_eq!(t.from, HealthState::Healthy);
    assert_eq!(t.to, HealthState::Unhealthy);
}

#[test]
fn success_resets_failing_streak() {
    let mut tracker = HealthTracker::new(Duration::ZERO, 3);
    tracker.record(false, secs(1));
    tracker.record(false, secs(2));
    assert_eq!(tracker.failing_streak(), 2);

    tracker.record(true, secs(3));
    assert_eq!(tracker.failing_streak(), 0);
    tracker.record(false, secs(4));
    tracker.record(false, secs(5));
    assert_eq!(tracker.state(), HealthState::Healthy);
}

#[test]
fn unhealthy_is_sticky_until_reset() {
    let mut tracker = HealthTracker::new(Duration::ZERO, 1);
    tracker.record(false, secs(1));
    assert_eq!(tracker.state(), HealthState::Unhealthy);

    assert_eq!(tracker.record(true, secs(2)), None);
    assert_eq!(tracker.state(), HealthState::Unhealthy);

    tracker.reset();
    assert_eq!(tracker.state(), HealthState::Starting);
    assert_eq!(tracker.failing_streak(), 0);
    assert!(tracker.record(true, secs(3)).is_some());
}

#[test]
fn zero_retries_is_treated_as_one() {
    let mut tracker = HealthTracker::new(Duration::ZERO, 0);
    tracker.record(false, secs(1));
    assert_eq!(tracker.state(), HealthState::Unhealthy);
}

#[test]
fn tracker_from_declared_probe() {
    let config = StowageConfig::default();
    let mut tracker = HealthTracker::from_probe(&config.health_probe());
    for s in [40, 70] {
        tracker.record(false, secs(s));
    }
    assert_eq!(tracker.state(), HealthState::Starting);
    tracker.record(false, secs(100));
    assert_eq!(tracker.state(), HealthState::Unhealthy);
}

#[test]
fn state_display() {
    assert_eq!(HealthState::Starting.to_string(), "starting");
    assert_eq!(HealthState::Healthy.to_string(), "healthy");
    assert_eq!(HealthState::Unhealthy.to_string(), "unhealthy");
}
