mod build;
mod check;
mod doctor;
mod eject;
mod init;
mod layers;
mod run;
mod status;
mod verify;
mod watch;

use std::path::Path;

use stowage_build::eject::EjectedDockerfile;
use stowage_build::{BuildPlan, DockerfileGenerator};
use stowage_core::{DependencyManifest, ResolvedSet, StowageConfig};
use stowage_docker::ExpectedImage;

pub use build::build;
pub use check::{check, plan, render};
pub use doctor::doctor;
pub use eject::eject;
pub use init::init_project;
pub use layers::layers;
pub use run::run;
pub use status::status;
pub use verify::verify;
pub use watch::watch;

/// Config, manifest, and the validated plan for a project directory.
pub(crate) struct Project {
    pub config: StowageConfig,
    pub manifest: DependencyManifest,
    pub plan: BuildPlan,
    pub resolved: ResolvedSet,
}

impl Project {
    pub fn load(project_dir: &Path) -> anyhow::Result<Self> {
        let config = StowageConfig::load(project_dir)?;
        let manifest = DependencyManifest::load(project_dir, &config.build.manifest)?;
        let (plan, resolved) = BuildPlan::assemble(&config, &manifest)?;
        Ok(Self {
            config,
            manifest,
            plan,
            resolved,
        })
    }

    /// The ejected Dockerfile if there is one, else the rendered plan.
    pub fn dockerfile(&self, project_dir: &Path) -> anyhow::Result<String> {
        let rendered = DockerfileGenerator::new(&self.plan).render();
        let Some(ejected) = EjectedDockerfile::load(project_dir)? else {
            return Ok(rendered);
        };
        println!("Using ejected Dockerfile from {}", ejected.path.display());
        if ejected.is_stale(&rendered) {
            tracing::warn!(path = %ejected.path.display(), "stowage.toml changed since eject");
            eprintln!(
                "Warning: stowage.toml changed since {} was ejected; the ejected file does not follow it",
                ejected.path.display()
            );
        }
        Ok(ejected.content)
    }
}

pub(crate) fn image_tag(config: &StowageConfig, project_dir: &Path, tag: Option<String>) -> String {
    tag.unwrap_or_else(|| format!("{}:latest", config.service_name(project_dir)))
}

pub(crate) fn expected_image(config: &StowageConfig) -> ExpectedImage {
    ExpectedImage {
        probe: config.health_probe(),
        port: config.runtime.port,
        identity: config.identity(),
        toolchain_binaries: stowage_build::validate::TOOLCHAIN_BINARIES
            .iter()
            .map(|b| (*b).to_owned())
            .collect(),
    }
}
