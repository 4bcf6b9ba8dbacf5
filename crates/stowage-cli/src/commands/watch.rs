use std::path::PathBuf;

use stowage_core::StowageConfig;
use stowage_runtime::{HealthMonitor, HealthState, HttpProbe, ShutdownSignal};

/// Probe a running service with the image's healthcheck parameters.
pub async fn watch(url: Option<String>) -> anyhow::Result<()> {
    let config = StowageConfig::load(&PathBuf::from("."))?;
    config.validate()?;

    let mut declared = config.health_probe();
    if let Some(url) = url {
        declared.url = url;
    }
    let probe = HttpProbe::new(&declared.url, declared.timeout)?;

    let mut signals = ShutdownSignal::new()?;
    println!(
        "Watching {} every {:?} (start period {:?}, {} retries)",
        declared.url, declared.interval, declared.start_period, declared.retries
    );
    let (mut state, handle) = HealthMonitor::new(probe, &declared).spawn();

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", *state.borrow_and_update());
            }
            signal = signals.recv() => {
                signal?;
                handle.abort();
                return Ok(());
            }
        }
    }

    if handle.await? == HealthState::Unhealthy {
        anyhow::bail!("{} is unhealthy", declared.url);
    }
    Ok(())
}
