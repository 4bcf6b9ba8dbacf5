use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use stowage_core::{HealthProbe, ProbeTool};
use stowage_runtime::health::HealthState;
use stowage_runtime::monitor::HealthMonitor;
use stowage_runtime::probe::{HttpProbe, Probe, ProbeError};
use tokio::sync::watch;

fn declaration(url: &str, interval: Duration, start_period: Duration, retries: u32) -> HealthProbe {
    HealthProbe {
        url: url.to_owned(),
        interval,
        timeout: Duration::from_secs(1),
        start_period,
        retries,
        tool: ProbeTool::Python,
    }
}

/// Answers from a script, then repeats the last answer.
struct ScriptedProbe {
    answers: Mutex<VecDeque<bool>>,
    last: AtomicBool,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProbe {
    fn new(answers: &[bool], calls: Arc<AtomicUsize>) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            last: AtomicBool::new(false),
            calls,
        }
    }
}

impl Probe for ScriptedProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.answers.lock().unwrap().pop_front();
        let ok = match next {
            Some(ok) => {
                self.last.store(ok, Ordering::SeqCst);
                ok
            }
            None => self.last.load(Ordering::SeqCst),
        };
        if ok {
            Ok(())
        } else {
            Err(ProbeError::Status {
                url: "scripted".to_owned(),
                status: 503,
            })
        }
    }
}

/// Never answers.
struct HangingProbe;

impl Probe for HangingProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

// ── Paused-clock monitor tests ──

#[tokio::test(start_paused = true)]
async fn failing_service_turns_unhealthy_after_start_period_and_retries() {
    let calls = Arc::new(AtomicUsize::new(0));
    let probe = ScriptedProbe::new(&[false], calls.clone());
    let monitor = HealthMonitor::new(
        probe,
        &declaration("scripted", Duration::from_secs(10), Duration::from_secs(30), 3),
    );

    let started = tokio::time::Instant::now();
    let (tx, _rx) = watch::channel(HealthState::Starting);
    let end = monitor.run(tx).await;

    assert_eq!(end, HealthState::Unhealthy);
    // Probes at 10s and 20s fall in the start period; 30s, 40s, 50s count.
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(started.elapsed(), Duration::from_secs(50));
}

#[tokio::test(start_paused = true)]
async fn recovering_service_reports_healthy_then_unhealthy() {
    let calls = Arc::new(AtomicUsize::new(0));
    let probe = ScriptedProbe::new(&[false, true, true, false, false], calls.clone());
    let monitor = HealthMonitor::new(
        probe,
        &declaration("scripted", Duration::from_secs(5), Duration::from_secs(30), 2),
    );

    let (mut rx, handle) = monitor.spawn();
    rx.wait_for(|s| *s == HealthState::Healthy).await.unwrap();
    let end = handle.await.unwrap();

    assert_eq!(end, HealthState::Unhealthy);
    assert_eq!(*rx.borrow(), HealthState::Unhealthy);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[tokio::test(start_paused = true)]
async fn hanging_probe_counts_as_failure() {
    let monitor = HealthMonitor::new(
        HangingProbe,
        &declaration("hang", Duration::from_secs(2), Duration::ZERO, 2),
    );
    let (tx, _rx) = watch::channel(HealthState::Starting);
    assert_eq!(monitor.run(tx).await, HealthState::Unhealthy);
}

#[tokio::test(start_paused = true)]
async fn monitor_stops_when_receivers_are_dropped() {
    let calls = Arc::new(AtomicUsize::new(0));
    let probe = ScriptedProbe::new(&[true], calls.clone());
    let monitor = HealthMonitor::new(
        probe,
        &declaration("scripted", Duration::from_secs(1), Duration::ZERO, 3),
    );

    let (mut rx, handle) = monitor.spawn();
    rx.wait_for(|s| *s == HealthState::Healthy).await.unwrap();
    drop(rx);

    assert_eq!(handle.await.unwrap(), HealthState::Healthy);
}

// ── Mock HTTP endpoint ──

async fn health(State(healthy): State<Arc<AtomicBool>>) -> StatusCode {
    if healthy.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Serves `GET /health`, flipped through the returned flag.
async fn mock_service(initially_healthy: bool) -> (SocketAddr, Arc<AtomicBool>) {
    let healthy = Arc::new(AtomicBool::new(initially_healthy));
    let app = Router::new()
        .route("/health", get(health))
        .route("/created", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(healthy.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, healthy)
}

#[tokio::test]
async fn http_probe_accepts_2xx() {
    let (addr, _) = mock_service(true).await;

    let probe = HttpProbe::new(&format!("http://{addr}/health"), Duration::from_secs(2)).unwrap();
    probe.check().await.unwrap();

    let probe = HttpProbe::new(&format!("http://{addr}/created"), Duration::from_secs(2)).unwrap();
    probe.check().await.unwrap();
}

#[tokio::test]
async fn http_probe_rejects_503() {
    let (addr, _) = mock_service(false).await;
    let probe = HttpProbe::new(&format!("http://{addr}/health"), Duration::from_secs(2)).unwrap();

    let err = probe.check().await.unwrap_err();
    assert!(matches!(err, ProbeError::Status { status: 503, .. }));
}

#[tokio::test]
async fn http_probe_rejects_404_and_refused_connection() {
    let (addr, _) = mock_service(true).await;
    let probe = HttpProbe::new(&format!("http://{addr}/missing"), Duration::from_secs(2)).unwrap();
    assert!(matches!(
        probe.check().await.unwrap_err(),
        ProbeError::Status { status: 404, .. }
    ));

    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = closed.local_addr().unwrap().port();
    drop(closed);
    let probe = HttpProbe::new(&format!("http://127.0.0.1:{port}/health"), Duration::from_secs(2)).unwrap();
    assert!(matches!(
        probe.check().await.unwrap_err(),
        ProbeError::Request { .. }
    ));
}

#[tokio::test]
async fn monitor_follows_flipping_endpoint() {
    let (addr, healthy) = mock_service(true).await;
    let url = format!("http://{addr}/health");
    let probe = HttpProbe::new(&url, Duration::from_secs(1)).unwrap();
    let monitor = HealthMonitor::new(
        probe,
        &declaration(&url, Duration::from_millis(50), Duration::ZERO, 2),
    );

    let (mut rx, handle) = monitor.spawn();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| *s == HealthState::Healthy),
    )
    .await
    .unwrap()
    .unwrap();

    healthy.store(false, Ordering::SeqCst);
    let end = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(end, HealthState::Unhealthy);
}
