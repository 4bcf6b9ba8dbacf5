//! Health state machine, evaluated the way a container supervisor evaluates
//! a `HEALTHCHECK`.

use std::fmt;
use std::time::Duration;

use stowage_core::HealthProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// No successful probe yet
    Starting,
    Healthy,
    /// `retries` consecutive failures outside the start period. Terminal
    /// until [`HealthTracker::reset`].
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => f.write_str("starting"),
            Self::Healthy => f.write_str("healthy"),
            Self::Unhealthy => f.write_str("unhealthy"),
        }
    }
}

/// A state change caused by one probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: HealthState,
    pub to: HealthState,
}

#[derive(Debug, Clone)]
pub struct HealthTracker {
    start_period: Duration,
    retries: u32,
    state: HealthState,
    failing_streak: u32,
}

impl HealthTracker {
    pub fn new(start_period: Duration, retries: u32) -> Self {
        Self {
            start_period,
            retries: retries.max(1),
            state: HealthState::Starting,
            failing_streak: 0,
        }
    }

    pub fn from_probe(probe: &HealthProbe) -> Self {
        Self::new(probe.start_period, probe.retries)
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn failing_streak(&self) -> u32 {
        self.failing_streak
    }

    /// Record one probe result, `elapsed` after the container started.
    pub fn record(&mut self, success: bool, elapsed: Duration) -> Option<Transition> {
        let from = self.state;
        match (from, success) {
            (HealthState::Unhealthy, _) => return None,
            (_, true) => {
                self.failing_streak = 0;
                self.state = HealthState::Healthy;
            }
            // Failures inside the start period do not count.
            (HealthState::Starting, false) if elapsed < self.start_period => {}
            (_, false) => {
                self.failing_streak += 1;
                if self.failing_streak >= self.retries {
                    self.state = HealthState::Unhealthy;
                }
            }
        }

        (self.state != from).then_some(Transition {
            from,
            to: self.state,
        })
    }

    /// Start a new health cycle, as after a supervisor restart.
    pub fn reset(&mut self) {
        self.state = HealthState::Starting;
        self.failing_streak = 0;
    }
}
