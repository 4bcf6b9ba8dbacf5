use std::time::Duration;

use stowage_core::HealthProbe;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::health::{HealthState, HealthTracker};
use crate::probe::{Probe, ProbeError};

/// Runs a [`Probe`] every interval and feeds a [`HealthTracker`].
///
/// The first probe runs one interval after start. The loop ends when the
/// service turns unhealthy or every state receiver is dropped.
pub struct HealthMonitor<P> {
    probe: P,
    tracker: HealthTracker,
    interval: Duration,
    timeout: Duration,
}

impl<P: Probe> HealthMonitor<P> {
    pub fn new(probe: P, declaration: &HealthProbe) -> Self {
        Self {
            probe,
            tracker: HealthTracker::from_probe(declaration),
            interval: declaration.interval,
            timeout: declaration.timeout,
        }
    }

    pub async fn run(mut self, state: watch::Sender<HealthState>) -> HealthState {
        let started = Instant::now();
        let mut ticker = tokio::time::interval_at(started + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if state.is_closed() {
                return self.tracker.state();
            }

            let result = match tokio::time::timeout(self.timeout, self.probe.check()).await {
                Ok(result) => result,
                Err(_) => Err(ProbeError::Timeout(self.timeout)),
            };
            if let Err(e) = &result {
                tracing::debug!(error = %e, streak = self.tracker.failing_streak() + 1, "probe failed");
            }

            if let Some(t) = self.tracker.record(result.is_ok(), started.elapsed()) {
                match t.to {
                    HealthState::Unhealthy => tracing::error!(
                        from = %t.from,
                        failures = self.tracker.failing_streak(),
                        "service is unhealthy"
                    ),
                    HealthState::Healthy => tracing::info!(from = %t.from, "service is healthy"),
                    HealthState::Starting => {}
                }
                state.send_replace(t.to);
            }

            if self.tracker.state() == HealthState::Unhealthy {
                return HealthState::Unhealthy;
            }
        }
    }
}

impl<P: Probe + 'static> HealthMonitor<P> {
    /// Run on a background task; the receiver observes every transition.
    pub fn spawn(self) -> (watch::Receiver<HealthState>, JoinHandle<HealthState>) {
        let (tx, rx) = watch::channel(HealthState::Starting);
        let handle = tokio::spawn(async move { self.run(tx).await });
        (rx, handle)
    }
}
