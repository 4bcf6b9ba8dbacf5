use std::path::PathBuf;

use stowage_core::StowageConfig;
use stowage_runtime::{Bootstrap, StartupError};

/// Start and supervise the server. Returns the process exit code.
pub async fn run(prefix: Option<PathBuf>) -> anyhow::Result<i32> {
    let workdir = std::env::current_dir()?;
    let config = StowageConfig::load(&workdir)?;
    config.validate()?;

    let mut bootstrap = Bootstrap::from_config(&config, &workdir);
    if let Some(prefix) = prefix {
        bootstrap = bootstrap.with_prefix(prefix, &config.runtime.server);
    }

    match bootstrap.run().await {
        Ok(code) => Ok(code),
        Err(StartupError::Stopped { code }) => {
            tracing::info!(code, "stopped before the service was ready");
            Ok(code)
        }
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            eprintln!("Error: {e}");
            Ok(e.exit_code())
        }
    }
}
