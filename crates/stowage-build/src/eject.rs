//! Hand-maintained Dockerfiles.
//!
//! `stowage eject` freezes the rendering of the current plan in
//! `.stowage/Dockerfile`. Builds then use that file as is, so the plan
//! validation no longer covers it. Two guards remain: the file must still
//! declare the builder and runtime stages, and its first line records the
//! digest of the rendering it started from, which tells when `stowage.toml`
//! has moved on since.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::plan::{BUILDER_STAGE, RUNTIME_STAGE};

const EJECT_DIR: &str = ".stowage";
const ORIGIN_MARKER: &str = "# stowage: ejected from sha256:";

/// Path of the ejected Dockerfile inside a project.
pub fn ejected_dockerfile_path(project_dir: &Path) -> PathBuf {
    project_dir.join(EJECT_DIR).join("Dockerfile")
}

/// An ejected Dockerfile as found on disk.
#[derive(Debug, Clone)]
pub struct EjectedDockerfile {
    pub path: PathBuf,
    pub content: String,
    /// Digest of the rendering it was ejected from; `None` once the marker
    /// line has been edited away.
    origin: Option<String>,
}

impl EjectedDockerfile {
    /// The project's ejected Dockerfile, or `None` if it has not ejected.
    pub fn load(project_dir: &Path) -> Result<Option<Self>, EjectError> {
        let path = ejected_dockerfile_path(project_dir);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).map_err(|e| EjectError::Read {
            path: path.clone(),
            source: e,
        })?;

        for stage in [BUILDER_STAGE, RUNTIME_STAGE] {
            if !declares_stage(&content, stage) {
                return Err(EjectError::MissingStage { path, stage });
            }
        }

        let origin = content
            .lines()
            .next()
            .and_then(|line| line.strip_prefix(ORIGIN_MARKER))
            .map(|digest| digest.trim().to_owned());
        Ok(Some(Self {
            path,
            content,
            origin,
        }))
    }

    /// Whether `rendered`, the Dockerfile the current config produces,
    /// differs from the one this file was ejected from.
    pub fn is_stale(&self, rendered: &str) -> bool {
        self.origin.as_deref().is_some_and(|origin| origin != digest(rendered))
    }
}

/// Writes `rendered` to `.stowage/Dockerfile` behind an origin marker.
/// An existing ejected file is never overwritten.
pub fn eject(project_dir: &Path, rendered: &str) -> Result<PathBuf, EjectError> {
    let path = ejected_dockerfile_path(project_dir);
    if path.exists() {
        return Err(EjectError::AlreadyEjected(path));
    }
    let dir = project_dir.join(EJECT_DIR);
    std::fs::create_dir_all(&dir).map_err(|e| EjectError::CreateDir {
        path: dir,
        source: e,
    })?;

    let content = format!("{ORIGIN_MARKER}{}\n{rendered}", digest(rendered));
    std::fs::write(&path, content).map_err(|e| EjectError::Write {
        path: path.clone(),
        source: e,
    })?;
    tracing::info!(path = %path.display(), "ejected Dockerfile");
    Ok(path)
}

fn digest(rendered: &str) -> String {
    hex::encode(Sha256::digest(rendered.as_bytes()))
}

/// A `FROM [--flags] <image> AS <stage>` line, in any keyword case.
fn declares_stage(content: &str, stage: &str) -> bool {
    content.lines().any(|line| {
        let words: Vec<&str> = line.split_whitespace().collect();
        matches!(
            words.as_slice(),
            [from, image @ .., alias, name] if from.eq_ignore_ascii_case("FROM")
                && !image.is_empty()
                && alias.eq_ignore_ascii_case("AS")
                && *name == stage
        )
    })
}

#[derive(Debug, thiserror::Error)]
pub enum EjectError {
    #[error("failed to create {path}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Dockerfile already ejected at {0}; edit it directly or delete it to re-eject")]
    AlreadyEjected(PathBuf),
    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read ejected Dockerfile at {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("ejected Dockerfile {path} has no `{stage}` stage")]
    MissingStage { path: PathBuf, stage: &'static str },
}
