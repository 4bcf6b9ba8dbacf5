//! Dependency manifest parsing and satisfiability checks.
//!
//! The manifest uses the pip requirements format. Everything a build needs
//! to install dependencies must live in this one file: it is copied into the
//! builder stage on its own, ahead of the application source, so nested
//! manifests (`-r`, `-c`) and editable installs (`-e`) are rejected.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::version::{self, Constraint};

/// One requirement line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Normalized package name
    pub name: String,
    pub extras: BTreeSet<String>,
    pub constraints: Vec<Constraint>,
    /// Environment marker after `;`, verbatim
    pub marker: Option<String>,
    /// Direct reference after `@`
    pub url: Option<String>,
    /// 1-based line number in the manifest
    pub line: usize,
}

/// A parsed dependency manifest.
#[derive(Debug, Clone)]
pub struct DependencyManifest {
    path: PathBuf,
    requirements: Vec<Requirement>,
    options: Vec<String>,
    digest: String,
}

/// Deduplicated, satisfiable requirement set produced by
/// [`DependencyManifest::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSet {
    pub packages: BTreeMap<String, ResolvedPackage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub name: String,
    pub extras: BTreeSet<String>,
    pub constraints: Vec<Constraint>,
    pub markers: Vec<String>,
    pub url: Option<String>,
}

impl ResolvedSet {
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedPackage> {
        self.packages.get(&normalize_name(name))
    }
}

impl DependencyManifest {
    /// Read and parse `relative` inside `project_dir`.
    pub fn load(project_dir: &Path, relative: &Path) -> Result<Self, ManifestError> {
        let path = project_dir.join(relative);
        if !path.is_file() {
            return Err(ManifestError::Missing { path });
        }
        let content = std::fs::read_to_string(&path).map_err(|e| ManifestError::Read {
            path: path.clone(),
            source: e,
        })?;
        let manifest = Self::parse(relative.to_path_buf(), &content)?;
        tracing::debug!(
            path = %path.display(),
            requirements = manifest.requirements.len(),
            digest = %manifest.digest,
            "parsed dependency manifest"
        );
        Ok(manifest)
    }

    /// Parse manifest text. `path` is used for error messages and as the
    /// manifest's location in the build context.
    pub fn parse(path: PathBuf, content: &str) -> Result<Self, ManifestError> {
        let digest = hex::encode(Sha256::digest(content.as_bytes()));
        let mut requirements = Vec::new();
        let mut options = Vec::new();

        for (line_no, logical) in logical_lines(content) {
            let text = strip_comment(&logical).trim();
            if text.is_empty() {
                continue;
            }
            if text.starts_with('-') {
                check_option(&path, line_no, text)?;
                options.push(text.to_owned());
                continue;
            }
            requirements.push(parse_requirement(&path, line_no, text)?);
        }

        Ok(Self {
            path,
            requirements,
            options,
            digest,
        })
    }

    /// Location relative to the project directory (and the build context).
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Installer options (`--index-url`, `--find-links`, ...), verbatim.
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// SHA-256 of the manifest bytes, hex encoded. Any change to it
    /// invalidates every dependency install layer.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Merge requirements per package and prove each package's constraints
    /// admit at least one version.
    ///
    /// Unconditional requirements are checked together; each environment
    /// marker group is checked together with the unconditional ones, since
    /// both apply whenever the marker holds.
    pub fn resolve(&self) -> Result<ResolvedSet, ManifestError> {
        let mut grouped: BTreeMap<&str, Vec<&Requirement>> = BTreeMap::new();
        for req in &self.requirements {
            grouped.entry(req.name.as_str()).or_default().push(req);
        }

        let mut set = ResolvedSet::default();
        for (name, reqs) in grouped {
            let unconditional: Vec<&Requirement> =
                reqs.iter().copied().filter(|r| r.marker.is_none()).collect();
            let markers: BTreeSet<&str> = reqs.iter().filter_map(|r| r.marker.as_deref()).collect();

            check_group(name, &unconditional)?;
            for marker in &markers {
                let group: Vec<&Requirement> = reqs
                    .iter()
                    .copied()
                    .filter(|r| r.marker.as_deref().is_none_or(|m| m == *marker))
                    .collect();
                check_group(name, &group)?;
            }

            let url = direct_url(name, &reqs)?;
            set.packages.insert(
                name.to_owned(),
                ResolvedPackage {
                    name: name.to_owned(),
                    extras: reqs.iter().flat_map(|r| r.extras.iter().cloned()).collect(),
                    constraints: reqs
                        .iter()
                        .flat_map(|r| r.constraints.iter().cloned())
                        .collect(),
                    markers: markers.iter().map(|m| (*m).to_owned()).collect(),
                    url,
                },
            );
        }

        tracing::debug!(packages = set.len(), "manifest constraints are satisfiable");
        Ok(set)
    }
}

fn check_group(name: &str, reqs: &[&Requirement]) -> Result<(), ManifestError> {
    let constraints: Vec<Constraint> = reqs
        .iter()
        .flat_map(|r| r.constraints.iter().cloned())
        .collect();
    version::check_satisfiable(&constraints).map_err(|reason| ManifestError::Unsatisfiable {
        package: name.to_owned(),
        constraints: constraints
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(","),
        reason,
    })
}

fn direct_url(name: &str, reqs: &[&Requirement]) -> Result<Option<String>, ManifestError> {
    let urls: BTreeSet<&str> = reqs.iter().filter_map(|r| r.url.as_deref()).collect();
    let mut iter = urls.into_iter();
    match (iter.next(), iter.next()) {
        (first, None) => Ok(first.map(str::to_owned)),
        (Some(a), Some(b)) => Err(ManifestError::Unsatisfiable {
            package: name.to_owned(),
            constraints: format!("@ {a}, @ {b}"),
            reason: "conflicting direct references".to_owned(),
        }),
        (None, Some(_)) => Ok(None),
    }
}

/// Join `\`-continued lines, keeping the first physical line number.
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    for (idx, raw) in content.lines().enumerate() {
        let (continued, text) = match raw.trim_end().strip_suffix('\\') {
            Some(head) => (true, head),
            None => (false, raw),
        };
        let entry = pending.get_or_insert_with(|| (idx + 1, String::new()));
        if !entry.1.is_empty() {
            entry.1.push(' ');
        }
        entry.1.push_str(text.trim());
        if !continued {
            out.extend(pending.take());
        }
    }
    out.extend(pending);
    out
}

/// `#` starts a comment at line start or after whitespace; a `#` inside a
/// URL fragment is kept.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return &line[..i];
        }
    }
    line
}

fn check_option(path: &Path, line: usize, text: &str) -> Result<(), ManifestError> {
    let flag = text
        .split(|c: char| c.is_whitespace() || c == '=')
        .next()
        .unwrap_or(text);
    match flag {
        "-r" | "--requirement" | "-c" | "--constraint" => Err(ManifestError::NestedManifest {
            path: path.to_path_buf(),
            line,
            directive: flag.to_owned(),
        }),
        "-e" | "--editable" => Err(ManifestError::Editable {
            path: path.to_path_buf(),
            line,
        }),
        _ => Ok(()),
    }
}

fn parse_requirement(path: &Path, line: usize, text: &str) -> Result<Requirement, ManifestError> {
    let parse_err = |reason: String| ManifestError::Parse {
        path: path.to_path_buf(),
        line,
        reason,
    };

    // Per-requirement options such as --hash are installer concerns.
    let text = match text.find(" --") {
        Some(idx) => text[..idx].trim(),
        None => text,
    };

    let (body, marker) = match text.split_once(';') {
        Some((body, marker)) => (body.trim(), Some(marker.trim().to_owned())),
        None => (text, None),
    };
    if marker.as_deref() == Some("") {
        return Err(parse_err("empty environment marker".to_owned()));
    }

    let name_len = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(body.len());
    let raw_name = &body[..name_len];
    if raw_name.is_empty()
        || !raw_name.starts_with(|c: char| c.is_ascii_alphanumeric())
        || !raw_name.ends_with(|c: char| c.is_ascii_alphanumeric())
    {
        return Err(parse_err(format!(
            "expected a package name at the start of {body:?}"
        )));
    }
    let mut rest = body[name_len..].trim_start();

    let mut extras = BTreeSet::new();
    if let Some(after_bracket) = rest.strip_prefix('[') {
        let (inner, after) = after_bracket
            .split_once(']')
            .ok_or_else(|| parse_err("unclosed extras bracket".to_owned()))?;
        for extra in inner.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            extras.insert(normalize_name(extra));
        }
        rest = after.trim_start();
    }

    let mut url = None;
    let mut constraints = Vec::new();
    if let Some(reference) = rest.strip_prefix('@') {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(parse_err("empty direct reference".to_owned()));
        }
        url = Some(reference.to_owned());
    } else {
        let spec = rest
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(rest)
            .trim();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let constraint: Constraint = part
                .parse()
                .map_err(|e: version::ConstraintError| parse_err(e.to_string()))?;
            constraints.push(constraint);
        }
    }

    Ok(Requirement {
        name: normalize_name(raw_name),
        extras,
        constraints,
        marker,
        url,
        line,
    })
}

/// Lowercase, with runs of `-`, `_`, `.` collapsed to a single `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            in_separator = true;
            continue;
        }
        if in_separator && !out.is_empty() {
            out.push('-');
        }
        in_separator = false;
        out.push(c.to_ascii_lowercase());
    }
    out
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("dependency manifest not found at {path}")]
    Missing { path: PathBuf },

    #[error("failed to read dependency manifest {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}:{line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error(
        "{path}:{line}: `{directive}` pulls in another file; list every dependency in the manifest itself"
    )]
    NestedManifest {
        path: PathBuf,
        line: usize,
        directive: String,
    },

    #[error("{path}:{line}: editable installs need the source tree and cannot be installed before it")]
    Editable { path: PathBuf, line: usize },

    #[error("unsatisfiable constraints for '{package}' ({constraints}): {reason}")]
    Unsatisfiable {
        package: String,
        constraints: String,
        reason: String,
    },
}
