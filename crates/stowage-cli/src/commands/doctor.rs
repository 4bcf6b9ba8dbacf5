use std::path::Path;

use stowage_core::{CONFIG_FILE, DependencyManifest, StowageConfig};
use stowage_docker::{CheckResult, DockerClient};

pub async fn doctor() -> anyhow::Result<()> {
    let project_dir = Path::new(".");
    let client = DockerClient::new();
    let mut report = client.doctor().await;

    let config = StowageConfig::load(project_dir);
    report.config_file = match (&config, project_dir.join(CONFIG_FILE).exists()) {
        (Err(e), _) => CheckResult::fail(&e.to_string()),
        (Ok(_), true) => CheckResult::ok("Found"),
        (Ok(_), false) => CheckResult::fail("Not found (run `stowage init`)"),
    };

    report.manifest = match &config {
        Ok(config) => match DependencyManifest::load(project_dir, &config.build.manifest)
            .and_then(|m| m.resolve())
        {
            Ok(resolved) => CheckResult::ok(&format!("{} package(s) resolvable", resolved.len())),
            Err(e) => CheckResult::fail(&e.to_string()),
        },
        Err(_) => CheckResult::fail("skipped: stowage.toml invalid"),
    };

    println!();
    println!("{report}");

    if !report.all_passed() {
        anyhow::bail!("some checks failed; see above for details");
    }

    Ok(())
}
