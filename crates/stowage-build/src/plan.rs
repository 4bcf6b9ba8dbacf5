//! Typed model of the multi-stage image build.
//!
//! Every instruction carries the role it plays in the pipeline, so ordering
//! and containment rules can be checked on the plan itself instead of being
//! implied by line order in a Dockerfile.

use stowage_core::{
    DependencyManifest, HealthProbe, ManifestError, ResolvedSet, ResolverStrategy,
    RuntimeIdentity, StowageConfig,
};

use crate::stages;
use crate::validate::{self, Violation};

pub const BUILDER_STAGE: &str = "builder";
pub const RUNTIME_STAGE: &str = "runtime";

/// Why a step copies files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyRole {
    /// The dependency manifest, copied alone
    Manifest,
    /// Installer binary from a published image
    Tool,
    /// The environment artifact from the builder stage
    Artifact,
    /// Application source tree
    Source,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyStep {
    /// Stage or image to copy from; None copies from the build context
    pub from: Option<String>,
    pub sources: Vec<String>,
    pub dest: String,
    pub chown: Option<String>,
    pub role: CopyRole,
}

/// What a `RUN` step does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPurpose {
    SystemPackages { packages: Vec<String> },
    CreateEnvironment { prefix: String },
    InstallDependencies { manifest: String, prefix: String },
    CreateIdentity { identity: RuntimeIdentity },
    TransferOwnership { owner: String, paths: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStep {
    pub purpose: RunPurpose,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthcheckStep {
    pub probe: HealthProbe,
    /// Probe argv, run as `HEALTHCHECK CMD [...]`
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Env { key: String, value: String },
    Workdir(String),
    Run(RunStep),
    Copy(CopyStep),
    User(String),
    Expose(u16),
    Healthcheck(HealthcheckStep),
    Cmd(Vec<String>),
}

impl Instruction {
    /// Whether the instruction adds a filesystem layer to the image.
    pub fn creates_layer(&self) -> bool {
        matches!(self, Self::Run(_) | Self::Copy(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub base: String,
    pub instructions: Vec<Instruction>,
}

impl Stage {
    pub fn new(name: &str, base: &str) -> Self {
        Self {
            name: name.to_owned(),
            base: base.to_owned(),
            instructions: Vec::new(),
        }
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn copies(&self) -> impl Iterator<Item = (usize, &CopyStep)> {
        self.instructions
            .iter()
            .enumerate()
            .filter_map(|(i, ins)| match ins {
                Instruction::Copy(copy) => Some((i, copy)),
                _ => None,
            })
    }

    pub fn runs(&self) -> impl Iterator<Item = (usize, &RunStep)> {
        self.instructions
            .iter()
            .enumerate()
            .filter_map(|(i, ins)| match ins {
                Instruction::Run(run) => Some((i, run)),
                _ => None,
            })
    }
}

/// The full two-stage build, ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub strategy: ResolverStrategy,
    /// SHA-256 of the dependency manifest the plan installs
    pub manifest_digest: String,
    pub stages: Vec<Stage>,
}

impl BuildPlan {
    /// Validate the configuration, prove the manifest satisfiable, assemble
    /// both stages, and check every pipeline invariant.
    ///
    /// Any failure aborts before a Dockerfile exists, so no image is built
    /// from a plan that breaks an invariant.
    pub fn assemble(
        config: &StowageConfig,
        manifest: &DependencyManifest,
    ) -> Result<(Self, ResolvedSet), PlanError> {
        config.validate()?;
        let resolved = manifest.resolve()?;

        let plan = Self {
            strategy: config.build.strategy,
            manifest_digest: manifest.digest().to_owned(),
            stages: vec![
                stages::builder_stage(config, manifest),
                stages::runtime_stage(config),
            ],
        };

        let violations = validate::validate(&plan);
        if !violations.is_empty() {
            return Err(PlanError::Violations(violations));
        }

        tracing::debug!(
            strategy = %plan.strategy,
            packages = resolved.len(),
            layers = plan.layer_count(),
            "assembled build plan"
        );
        Ok((plan, resolved))
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Number of filesystem layers across all stages.
    pub fn layer_count(&self) -> usize {
        self.stages
            .iter()
            .flat_map(|s| &s.instructions)
            .filter(|i| i.creates_layer())
            .count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Config(#[from] stowage_core::Error),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("build plan breaks {} pipeline invariant(s):\n{}", .0.len(), format_violations(.0))]
    Violations(Vec<Violation>),
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}
