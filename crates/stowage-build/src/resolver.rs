//! Install commands for each [`ResolverStrategy`].
//!
//! Both strategies read the same manifest file, install into the same
//! prefix, and resolve against the same indexes. The fast strategy passes
//! `--index-strategy unsafe-best-match` because pip considers every
//! configured index when picking a version, while uv stops at the first
//! index that has the package. It also seeds pip into the environment and
//! compiles bytecode at install time, as `python -m venv` and `pip` do.

use stowage_core::ResolverStrategy;

use crate::plan::{CopyRole, CopyStep, RunPurpose, RunStep};

/// Published image the fast strategy copies its installer from.
pub const UV_IMAGE: &str = "ghcr.io/astral-sh/uv";

/// Environment variables the builder stage sets for the installer.
pub fn installer_env(strategy: ResolverStrategy) -> Vec<(&'static str, &'static str)> {
    let mut env = vec![
        ("PIP_NO_CACHE_DIR", "1"),
        ("PIP_DISABLE_PIP_VERSION_CHECK", "1"),
        ("PYTHONDONTWRITEBYTECODE", "1"),
        ("PYTHONUNBUFFERED", "1"),
    ];
    if strategy == ResolverStrategy::Fast {
        env.push(("UV_COMPILE_BYTECODE", "1"));
        env.push(("UV_PYTHON_DOWNLOADS", "never"));
    }
    env
}

/// Copies the installer binary into the builder stage, if the strategy
/// needs one.
pub fn tool_copy(strategy: ResolverStrategy, uv_version: &str) -> Option<CopyStep> {
    match strategy {
        ResolverStrategy::Fast => Some(CopyStep {
            from: Some(format!("{UV_IMAGE}:{uv_version}")),
            sources: vec!["/uv".to_owned(), "/uvx".to_owned()],
            dest: "/bin/".to_owned(),
            chown: None,
            role: CopyRole::Tool,
        }),
        ResolverStrategy::Standard => None,
    }
}

/// Creates the isolated environment prefix.
pub fn create_environment(strategy: ResolverStrategy, prefix: &str) -> RunStep {
    let command = match strategy {
        ResolverStrategy::Fast => format!("uv venv --seed --python python3 {prefix}"),
        ResolverStrategy::Standard => format!("python3 -m venv {prefix}"),
    };
    RunStep {
        purpose: RunPurpose::CreateEnvironment {
            prefix: prefix.to_owned(),
        },
        command,
    }
}

/// Installs every manifest requirement into the prefix.
///
/// `manifest` is the manifest's file name inside the builder's work
/// directory.
pub fn install_dependencies(strategy: ResolverStrategy, manifest: &str, prefix: &str) -> RunStep {
    let command = match strategy {
        ResolverStrategy::Fast => format!(
            "uv pip install --python {prefix}/bin/python --no-cache \
             --index-strategy unsafe-best-match -r {manifest}"
        ),
        ResolverStrategy::Standard => {
            format!("{prefix}/bin/pip install --no-cache-dir -r {manifest}")
        }
    };
    RunStep {
        purpose: RunPurpose::InstallDependencies {
            manifest: manifest.to_owned(),
            prefix: prefix.to_owned(),
        },
        command,
    }
}
