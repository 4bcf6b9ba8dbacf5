use std::path::{Component, Path, PathBuf};
use std::process::Command;

/// Directory the build context is assembled in.
pub const BUNDLE_DIR: &str = ".stowage-bundle";

/// Top-level entries never copied into a build context, even when git
/// tracks them. Local environments and secrets stay on the host.
pub const ALWAYS_EXCLUDED: &[&str] = &[BUNDLE_DIR, ".stowage", ".git", ".venv", ".env"];

/// The Dockerfile and ignore file are excluded from the context itself, so
/// `COPY .` in the runtime stage only sees application files.
const BUNDLE_DOCKERIGNORE: &str = "Dockerfile\n.dockerignore\n";

/// Root entries the bundle writes itself; project files of the same name
/// never reach the context.
const GENERATED: &[&str] = &["Dockerfile", ".dockerignore"];

/// Assembles the build context in `.stowage-bundle/`.
///
/// Files come from `git ls-files`, so `.gitignore` is respected. The
/// rendered Dockerfile is written next to them. The dependency manifest
/// must be part of the context: it is copied on its own before any source.
pub fn create_bundle(
    project_dir: &Path,
    dockerfile_content: &str,
    manifest: &Path,
) -> Result<PathBuf, BundleError> {
    let bundle_dir = project_dir.join(BUNDLE_DIR);

    if bundle_dir.exists() {
        std::fs::remove_dir_all(&bundle_dir).map_err(|e| BundleError::Cleanup {
            path: bundle_dir.clone(),
            source: e,
        })?;
    }
    std::fs::create_dir_all(&bundle_dir).map_err(|e| BundleError::Create {
        path: bundle_dir.clone(),
        source: e,
    })?;

    let manifest = normalize(manifest);
    let mut copied = 0usize;
    let mut has_manifest = false;

    for relative_path in context_files(project_dir)? {
        let src = project_dir.join(&relative_path);
        let dst = bundle_dir.join(&relative_path);
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BundleError::Create {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::copy(&src, &dst).map_err(|e| BundleError::CopyFile {
            path: src,
            source: e,
        })?;

        has_manifest |= relative_path == manifest;
        copied += 1;
    }

    if !has_manifest {
        return Err(BundleError::ManifestNotInContext(manifest));
    }

    write(&bundle_dir.join("Dockerfile"), dockerfile_content)?;
    write(&bundle_dir.join(".dockerignore"), BUNDLE_DOCKERIGNORE)?;

    tracing::info!(files = copied, dir = %bundle_dir.display(), "bundled build context");
    Ok(bundle_dir)
}

/// Files of the build context, relative to `project_dir`: everything
/// `git ls-files` reports that still exists, minus [`ALWAYS_EXCLUDED`] and
/// the generated root files. [`create_bundle`] copies exactly this list.
pub fn context_files(project_dir: &Path) -> Result<Vec<PathBuf>, BundleError> {
    Ok(git_ls_files(project_dir)?
        .into_iter()
        .filter(|rel| !is_excluded(rel))
        // Deleted but still tracked
        .filter(|rel| project_dir.join(rel).is_file())
        .collect())
}

fn is_excluded(relative_path: &Path) -> bool {
    let mut components = relative_path.components();
    let Some(first) = components.next() else {
        return true;
    };
    let first = first.as_os_str();
    if ALWAYS_EXCLUDED.iter().any(|ex| first == *ex) {
        return true;
    }
    components.next().is_none() && GENERATED.iter().any(|g| first == *g)
}

/// `./requirements.txt` and `requirements.txt` name the same context file.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn write(path: &Path, content: &str) -> Result<(), BundleError> {
    std::fs::write(path, content).map_err(|e| BundleError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Tracked files plus untracked files that are not ignored.
fn git_ls_files(project_dir: &Path) -> Result<Vec<PathBuf>, BundleError> {
    let stdout = git(project_dir, &["ls-files", "--cached", "--others", "--exclude-standard"])?;
    Ok(stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Whether the working tree has uncommitted changes.
pub fn is_dirty(project_dir: &Path) -> Result<bool, BundleError> {
    let stdout = git(project_dir, &["status", "--porcelain"])?;
    Ok(!stdout.trim().is_empty())
}

fn git(project_dir: &Path, args: &[&str]) -> Result<String, BundleError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(project_dir)
        .output()
        .map_err(|e| BundleError::GitCommand {
            detail: format!("failed to execute git {}", args.join(" ")),
            source: e,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BundleError::GitFailed {
            detail: format!("git {} exited with {}: {}", args[0], output.status, stderr.trim()),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("failed to clean up bundle directory {path}")]
    Cleanup {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create directory {path}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to copy file {path}")]
    CopyFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("dependency manifest {0} is not tracked by git, or is ignored; it must be part of the build context")]
    ManifestNotInContext(PathBuf),
    #[error("git command failed: {detail}")]
    GitCommand {
        detail: String,
        source: std::io::Error,
    },
    #[error("git failed: {detail}")]
    GitFailed { detail: String },
}
