//! Pipeline invariants checked on a [`BuildPlan`] before anything is
//! rendered or built.

use std::collections::BTreeSet;

use url::Url;

use crate::plan::{
    BUILDER_STAGE, BuildPlan, CopyRole, Instruction, RUNTIME_STAGE, RunPurpose, Stage,
};

/// Packages that belong to a compiler toolchain and must never reach the
/// runtime stage. Any `*-dev` header package is rejected as well.
pub const TOOLCHAIN_PACKAGES: &[&str] = &[
    "build-essential",
    "gcc",
    "g++",
    "cc",
    "clang",
    "make",
    "cmake",
    "pkg-config",
    "cargo",
    "rustc",
];

/// Binaries whose presence in a runtime image means the toolchain leaked.
pub const TOOLCHAIN_BINARIES: &[&str] = &["gcc", "g++", "cc", "c++", "clang", "make", "ld"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("stage '{0}' is missing")]
    MissingStage(&'static str),

    #[error("stage '{stage}' installs dependencies before copying the manifest")]
    ManifestNotCopied { stage: String },

    #[error("stage '{stage}' copies the manifest together with other files; copy it on its own")]
    ManifestNotIsolated { stage: String },

    #[error("stage '{stage}' copies application source before installing dependencies")]
    SourceBeforeInstall { stage: String },

    #[error("builder stage must emit exactly one environment artifact, found {found}")]
    ArtifactCount { found: usize },

    #[error("runtime stage imports {copied} but the builder stage produces {produced}")]
    ArtifactMismatch { copied: String, produced: String },

    #[error("runtime stage copies {source_path} from the builder stage; only the environment artifact may cross stages")]
    UnexpectedBuilderCopy { source_path: String },

    #[error("runtime stage overlays application source before importing the environment artifact")]
    SourceBeforeArtifact,

    #[error("runtime stage installs toolchain package '{package}'")]
    ToolchainInRuntime { package: String },

    #[error("ownership transfer targets {path}, which does not exist at that point")]
    MissingOwnershipTarget { path: String },

    #[error("{path} is never handed to the runtime identity")]
    OwnershipNotTransferred { path: String },

    #[error("runtime stage runs a command after the source overlay as {user}")]
    PrivilegedStep { user: String },

    #[error("service would start as privileged user '{user}'")]
    PrivilegedProcess { user: String },

    #[error("runtime stage has no {0} instruction")]
    MissingInstruction(&'static str),

    #[error("service binary {program} is outside the environment artifact {prefix}")]
    EntrypointOutsideArtifact { program: String, prefix: String },

    #[error("port mismatch: EXPOSE {expose:?}, health probe {probe:?}, server --port {bind:?}")]
    PortMismatch {
        expose: Option<u16>,
        probe: Option<u16>,
        bind: Option<u16>,
    },
}

/// Check every invariant and return all violations found.
pub fn validate(plan: &BuildPlan) -> Vec<Violation> {
    let mut violations = Vec::new();

    let Some(builder) = plan.stage(BUILDER_STAGE) else {
        violations.push(Violation::MissingStage(BUILDER_STAGE));
        return violations;
    };
    let Some(runtime) = plan.stage(RUNTIME_STAGE) else {
        violations.push(Violation::MissingStage(RUNTIME_STAGE));
        return violations;
    };

    check_install_layering(builder, &mut violations);
    check_install_layering(runtime, &mut violations);

    let produced = artifact_prefixes(builder);
    if produced.len() != 1 {
        violations.push(Violation::ArtifactCount {
            found: produced.len(),
        });
    }
    check_artifact_import(runtime, produced.first().map(String::as_str), &mut violations);
    check_toolchain(builder, runtime, &mut violations);
    check_privileges(runtime, produced.first().map(String::as_str), &mut violations);
    check_ports(runtime, &mut violations);

    violations
}

/// Manifest copied alone, before the install step; no source before it.
fn check_install_layering(stage: &Stage, violations: &mut Vec<Violation>) {
    let Some((install_at, _)) = stage
        .runs()
        .find(|(_, r)| matches!(r.purpose, RunPurpose::InstallDependencies { .. }))
    else {
        return;
    };

    let mut manifest_seen = false;
    for (_, copy) in stage.copies().take_while(|(i, _)| *i < install_at) {
        match copy.role {
            CopyRole::Manifest => {
                manifest_seen = true;
                if copy.sources.len() != 1 || is_whole_context(&copy.sources[0]) {
                    violations.push(Violation::ManifestNotIsolated {
                        stage: stage.name.clone(),
                    });
                }
            }
            CopyRole::Source => violations.push(Violation::SourceBeforeInstall {
                stage: stage.name.clone(),
            }),
            CopyRole::Tool | CopyRole::Artifact => {}
        }
    }
    if !manifest_seen {
        violations.push(Violation::ManifestNotCopied {
            stage: stage.name.clone(),
        });
    }
}

fn is_whole_context(source: &str) -> bool {
    matches!(source.trim_end_matches('/'), "." | "" | "./")
}

fn artifact_prefixes(builder: &Stage) -> Vec<String> {
    builder
        .runs()
        .filter_map(|(_, r)| match &r.purpose {
            RunPurpose::CreateEnvironment { prefix } => Some(prefix.clone()),
            _ => None,
        })
        .collect()
}

fn check_artifact_import(runtime: &Stage, produced: Option<&str>, violations: &mut Vec<Violation>) {
    let mut artifact_at = None;
    for (i, copy) in runtime.copies() {
        match (copy.role, copy.from.as_deref()) {
            (CopyRole::Artifact, Some(BUILDER_STAGE)) => {
                if let Some(produced) = produced {
                    let copied = copy.sources.first().map(String::as_str).unwrap_or("");
                    if trim(copied) != trim(produced) || trim(&copy.dest) != trim(produced) {
                        violations.push(Violation::ArtifactMismatch {
                            copied: copied.to_owned(),
                            produced: produced.to_owned(),
                        });
                    }
                }
                artifact_at.get_or_insert(i);
            }
            (_, Some(BUILDER_STAGE)) => {
                for source in &copy.sources {
                    violations.push(Violation::UnexpectedBuilderCopy {
                        source_path: source.clone(),
                    });
                }
            }
            (CopyRole::Source, _) => {
                if artifact_at.is_none() {
                    violations.push(Violation::SourceBeforeArtifact);
                }
            }
            _ => {}
        }
    }
    if artifact_at.is_none() {
        violations.push(Violation::ArtifactCount { found: 0 });
    }
}

fn check_toolchain(builder: &Stage, runtime: &Stage, violations: &mut Vec<Violation>) {
    let build_only: BTreeSet<&str> = builder
        .runs()
        .flat_map(|(_, r)| match &r.purpose {
            RunPurpose::SystemPackages { packages } => packages.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        })
        .collect();

    for (_, run) in runtime.runs() {
        if let RunPurpose::SystemPackages { packages } = &run.purpose {
            for package in packages {
                if is_toolchain_package(package) || build_only.contains(package.as_str()) {
                    violations.push(Violation::ToolchainInRuntime {
                        package: package.clone(),
                    });
                }
            }
        }
    }
}

/// Compiler, build tool, or header package.
pub fn is_toolchain_package(package: &str) -> bool {
    let name = package.split(['=', ':']).next().unwrap_or(package);
    TOOLCHAIN_PACKAGES.contains(&name) || name.ends_with("-dev")
}

/// Ownership, identity switch, and entrypoint checks for the runtime stage.
fn check_privileges(runtime: &Stage, prefix: Option<&str>, violations: &mut Vec<Violation>) {
    let mut existing: BTreeSet<String> = BTreeSet::new();
    let mut owned: BTreeSet<String> = BTreeSet::new();
    let mut workdir = "/".to_owned();
    let mut user = "root".to_owned();
    let mut identity_name: Option<String> = None;
    let mut source_overlaid = false;
    let mut cmd: Option<&Vec<String>> = None;
    let mut user_at_cmd = None;

    for ins in &runtime.instructions {
        match ins {
            Instruction::Workdir(dir) => {
                workdir = resolve(&workdir, dir);
                existing.insert(workdir.clone());
            }
            Instruction::Copy(copy) => {
                let dest = resolve(&workdir, &copy.dest);
                existing.insert(dest.clone());
                if copy.chown.is_some() && copy.role == CopyRole::Artifact {
                    owned.insert(dest);
                }
                if copy.role == CopyRole::Source {
                    source_overlaid = true;
                }
            }
            Instruction::Run(run) => {
                if source_overlaid && is_privileged(&user) {
                    violations.push(Violation::PrivilegedStep { user: user.clone() });
                }
                match &run.purpose {
                    RunPurpose::CreateIdentity { identity } => {
                        existing.insert(trim(&identity.home).to_owned());
                        identity_name = Some(identity.name.clone());
                    }
                    RunPurpose::CreateEnvironment { prefix } => {
                        existing.insert(trim(prefix).to_owned());
                    }
                    RunPurpose::TransferOwnership { paths, .. } => {
                        for path in paths {
                            let path = resolve(&workdir, path);
                            if !path_exists(&existing, &path) {
                                violations.push(Violation::MissingOwnershipTarget {
                                    path: path.clone(),
                                });
                            }
                            owned.insert(path);
                        }
                    }
                    RunPurpose::SystemPackages { .. }
                    | RunPurpose::InstallDependencies { .. } => {}
                }
            }
            Instruction::User(u) => user = u.clone(),
            Instruction::Cmd(argv) => {
                cmd = Some(argv);
                user_at_cmd = Some(user.clone());
            }
            Instruction::Env { .. }
            | Instruction::Expose(_)
            | Instruction::Healthcheck(_) => {}
        }
    }

    if identity_name.is_some() {
        let app_dir = runtime
            .instructions
            .iter()
            .rev()
            .find_map(|i| match i {
                Instruction::Workdir(dir) => Some(trim(dir).to_owned()),
                _ => None,
            });
        for path in app_dir.iter().map(String::as_str).chain(prefix.map(trim)) {
            if !owned.contains(path) {
                violations.push(Violation::OwnershipNotTransferred {
                    path: path.to_owned(),
                });
            }
        }
    }

    match (cmd, user_at_cmd) {
        (Some(argv), Some(user)) => {
            if is_privileged(&user) {
                violations.push(Violation::PrivilegedProcess { user });
            }
            if let (Some(program), Some(prefix)) = (argv.first(), prefix) {
                let bin = format!("{}/bin/", trim(prefix));
                if !program.starts_with(&bin) {
                    violations.push(Violation::EntrypointOutsideArtifact {
                        program: program.clone(),
                        prefix: prefix.to_owned(),
                    });
                }
            }
        }
        _ => violations.push(Violation::MissingInstruction("CMD")),
    }
}

fn is_privileged(user: &str) -> bool {
    let name = user.split(':').next().unwrap_or(user);
    name == "root" || name == "0"
}

fn check_ports(runtime: &Stage, violations: &mut Vec<Violation>) {
    let mut expose = None;
    let mut probe = None;
    let mut bind = None;
    let mut has_healthcheck = false;

    for ins in &runtime.instructions {
        match ins {
            Instruction::Expose(port) => expose = Some(*port),
            Instruction::Healthcheck(hc) => {
                has_healthcheck = true;
                probe = url_port(&hc.probe.url);
            }
            Instruction::Cmd(argv) => {
                bind = argv
                    .iter()
                    .position(|a| a == "--port")
                    .and_then(|i| argv.get(i + 1))
                    // arch-lint: allow(no-silent-result-drop) reason="a non-numeric --port is reported as a port mismatch"
                    .and_then(|p| p.parse().ok());
            }
            _ => {}
        }
    }

    if !has_healthcheck {
        violations.push(Violation::MissingInstruction("HEALTHCHECK"));
    }
    if expose.is_none() || expose != probe || expose != bind {
        violations.push(Violation::PortMismatch {
            expose,
            probe,
            bind,
        });
    }
}

/// Port a client connects to for `url`, the scheme default when none is
/// given (`http://host/health` is port 80).
pub fn url_port(url: &str) -> Option<u16> {
    match Url::parse(url) {
        Ok(parsed) => parsed.port_or_known_default(),
        Err(e) => {
            tracing::debug!(url, error = %e, "unparseable health URL");
            None
        }
    }
}

fn trim(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

/// Resolve `path` against `workdir` the way Dockerfile instructions do.
fn resolve(workdir: &str, path: &str) -> String {
    if path.starts_with('/') {
        return trim(path).to_owned();
    }
    let mut parts: Vec<&str> = workdir.split('/').filter(|p| !p.is_empty()).collect();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

/// A path exists if it was created, or a descendant of it was.
fn path_exists(existing: &BTreeSet<String>, path: &str) -> bool {
    let prefix = format!("{}/", trim(path));
    existing
        .iter()
        .any(|p| p == trim(path) || p.starts_with(&prefix))
}
