use std::path::PathBuf;

use stowage::build::{BuildPlan, DockerfileGenerator};
use stowage::{DependencyManifest, ResolverStrategy, StowageConfig};

fn manifest() -> DependencyManifest {
    DependencyManifest::parse(
        PathBuf::from("requirements.txt"),
        "fastapi==0.115.0\nuvicorn[standard]==0.30.6\n",
    )
    .unwrap()
}

#[test]
fn core_and_build_reexports_render_a_dockerfile() {
    let config = StowageConfig::default();
    let (plan, resolved) = BuildPlan::assemble(&config, &manifest()).unwrap();

    assert_eq!(resolved.len(), 2);
    let dockerfile = DockerfileGenerator::new(&plan).render();
    assert!(dockerfile.contains("AS builder"));
    assert!(dockerfile.contains("USER app"));
}

#[test]
fn strategies_share_the_same_manifest_digest() {
    let mut config = StowageConfig::default();
    let (fast, _) = BuildPlan::assemble(&config, &manifest()).unwrap();

    config.build.strategy = ResolverStrategy::Standard;
    let (standard, _) = BuildPlan::assemble(&config, &manifest()).unwrap();

    assert_eq!(fast.manifest_digest, standard.manifest_digest);
    assert_ne!(fast, standard);
}

#[test]
fn docker_module_is_reexported() {
    let check = stowage::docker::CheckResult::ok("Found");
    assert_eq!(check.icon(), "OK");
}

#[cfg(feature = "runtime")]
#[test]
fn runtime_module_follows_declared_probe() {
    use std::time::Duration;
    use stowage::runtime::{HealthState, HealthTracker};

    let config = StowageConfig::default();
    let mut tracker = HealthTracker::from_probe(&config.health_probe());
    tracker.record(true, Duration::from_secs(1));
    assert_eq!(tracker.state(), HealthState::Healthy);
}
