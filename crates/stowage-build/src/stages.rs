//! Stage assemblers: the builder stage produces the environment artifact,
//! the runtime stage imports it, drops privileges, and publishes the health
//! contract.

use stowage_core::{DependencyManifest, ProbeTool, RuntimeIdentity, StowageConfig};

use crate::plan::{
    BUILDER_STAGE, CopyRole, CopyStep, HealthcheckStep, Instruction, RUNTIME_STAGE, RunPurpose,
    RunStep, Stage,
};
use crate::resolver;

/// Work directory of the builder stage.
pub const BUILD_WORKDIR: &str = "/build";

pub fn builder_stage(config: &StowageConfig, manifest: &DependencyManifest) -> Stage {
    let build = &config.build;
    let mut stage = Stage::new(BUILDER_STAGE, &build.builder_image);

    for (key, value) in resolver::installer_env(build.strategy) {
        stage.push(Instruction::Env {
            key: key.to_owned(),
            value: value.to_owned(),
        });
    }

    if let Some(step) = system_packages(&build.build_packages) {
        stage.push(Instruction::Run(step));
    }
    if let Some(tool) = resolver::tool_copy(build.strategy, &build.uv_version) {
        stage.push(Instruction::Copy(tool));
    }
    stage.push(Instruction::Run(resolver::create_environment(
        build.strategy,
        &build.env_dir,
    )));

    stage.push(Instruction::Workdir(BUILD_WORKDIR.to_owned()));
    let manifest_file = manifest
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "requirements.txt".to_owned());
    stage.push(Instruction::Copy(CopyStep {
        from: None,
        sources: vec![context_path(manifest.path())],
        dest: "./".to_owned(),
        chown: None,
        role: CopyRole::Manifest,
    }));
    stage.push(Instruction::Run(resolver::install_dependencies(
        build.strategy,
        &manifest_file,
        &build.env_dir,
    )));

    stage
}

pub fn runtime_stage(config: &StowageConfig) -> Stage {
    let build = &config.build;
    let identity = config.identity();
    let owner = identity.owner();
    let mut stage = Stage::new(RUNTIME_STAGE, &build.runtime_image);

    let mut env = vec![
        (
            "PATH".to_owned(),
            format!("{}:$PATH", config.env_bin_dir()),
        ),
        ("VIRTUAL_ENV".to_owned(), build.env_dir.clone()),
        ("PYTHONDONTWRITEBYTECODE".to_owned(), "1".to_owned()),
        ("PYTHONUNBUFFERED".to_owned(), "1".to_owned()),
    ];
    env.extend(build.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    for (key, value) in env {
        stage.push(Instruction::Env { key, value });
    }

    if let Some(step) = system_packages(&build.runtime_packages) {
        stage.push(Instruction::Run(step));
    }
    stage.push(Instruction::Run(create_identity(&identity)));
    stage.push(Instruction::Workdir(build.app_dir.clone()));

    stage.push(Instruction::Copy(CopyStep {
        from: Some(BUILDER_STAGE.to_owned()),
        sources: vec![build.env_dir.clone()],
        dest: build.env_dir.clone(),
        chown: Some(owner.clone()),
        role: CopyRole::Artifact,
    }));
    stage.push(Instruction::Run(transfer_ownership(
        &owner,
        &[build.app_dir.clone()],
        &[build.app_dir.clone(), build.env_dir.clone()],
    )));

    // include=None overlays the whole context; include=Some copies each
    // path to the same place under the app directory.
    let overlays: Vec<(String, String)> = match &build.include {
        None => vec![(".".to_owned(), "./".to_owned())],
        Some(paths) => paths.iter().map(|p| (p.clone(), format!("./{p}"))).collect(),
    };
    for (source, dest) in overlays {
        stage.push(Instruction::Copy(CopyStep {
            from: None,
            sources: vec![source],
            dest,
            chown: Some(owner.clone()),
            role: CopyRole::Source,
        }));
    }

    stage.push(Instruction::User(identity.name.clone()));
    stage.push(Instruction::Expose(config.runtime.port));
    stage.push(Instruction::Healthcheck(healthcheck(config)));
    stage.push(Instruction::Cmd(config.server_argv()));

    stage
}

fn system_packages(packages: &[String]) -> Option<RunStep> {
    if packages.is_empty() {
        return None;
    }
    Some(RunStep {
        purpose: RunPurpose::SystemPackages {
            packages: packages.to_vec(),
        },
        command: format!(
            "apt-get update && apt-get install -y --no-install-recommends {} \
             && rm -rf /var/lib/apt/lists/*",
            packages.join(" ")
        ),
    })
}

fn create_identity(identity: &RuntimeIdentity) -> RunStep {
    RunStep {
        purpose: RunPurpose::CreateIdentity {
            identity: identity.clone(),
        },
        command: format!(
            "groupadd --system --gid {uid} {name} \
             && useradd --system --uid {uid} --gid {name} --home-dir {home} \
             --create-home --shell {shell} {name}",
            uid = identity.uid,
            name = identity.name,
            home = identity.home,
            shell = identity.shell,
        ),
    }
}

/// `chown -R` guarded by `test -d` on every directory the identity must
/// own, so a missing directory fails the build instead of being skipped.
fn transfer_ownership(owner: &str, paths: &[String], required: &[String]) -> RunStep {
    let guards = required
        .iter()
        .map(|p| format!("test -d {p}"))
        .collect::<Vec<_>>()
        .join(" && ");
    RunStep {
        purpose: RunPurpose::TransferOwnership {
            owner: owner.to_owned(),
            paths: required.to_vec(),
        },
        command: format!("{guards} && chown -R {owner} {}", paths.join(" ")),
    }
}

fn healthcheck(config: &StowageConfig) -> HealthcheckStep {
    let probe = config.health_probe();
    let timeout = probe.timeout.as_secs();
    let command = match probe.tool {
        ProbeTool::Python => vec![
            format!("{}/python", config.env_bin_dir()),
            "-c".to_owned(),
            format!(
                "import sys, urllib.request; \
                 r = urllib.request.urlopen('{url}', timeout={timeout}); \
                 sys.exit(0 if 200 <= r.status < 300 else 1)",
                url = probe.url
            ),
        ],
        ProbeTool::Curl => vec![
            "curl".to_owned(),
            "--fail".to_owned(),
            "--silent".to_owned(),
            "--show-error".to_owned(),
            "--max-time".to_owned(),
            timeout.to_string(),
            probe.url.clone(),
        ],
    };
    HealthcheckStep { probe, command }
}

/// Manifest location as written in a `COPY` source (always `/`-separated).
fn context_path(path: &std::path::Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
