//! Layer cache model.
//!
//! Each instruction gets a key chained from its parent's key, its rendered
//! text, and the digest of whatever it copies in. A builder cache reuses a
//! layer exactly when its key is unchanged, so comparing keys between two
//! build contexts shows which layers a rebuild would redo.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::bundle::{self, BundleError};
use crate::dockerfile::render_instruction;
use crate::plan::{BuildPlan, Instruction};

/// Content digests of every file in a build context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSnapshot {
    /// `/`-separated relative path -> SHA-256 of the file content
    files: BTreeMap<String, String>,
}

impl ContextSnapshot {
    /// Hash the files a build of `project_dir` would send to Docker, as
    /// listed by [`bundle::context_files`].
    pub fn capture(project_dir: &Path) -> Result<Self, LayerError> {
        let mut files = BTreeMap::new();
        for rel in bundle::context_files(project_dir).map_err(|e| LayerError::Context { source: e })? {
            let path = project_dir.join(&rel);
            let content = std::fs::read(&path).map_err(|e| LayerError::Read { path, source: e })?;
            files.insert(slash_path(&rel), hex::encode(Sha256::digest(&content)));
        }

        tracing::debug!(dir = %project_dir.display(), files = files.len(), "captured build context");
        Ok(Self { files })
    }

    /// Snapshot from in-memory `(path, content)` pairs.
    pub fn from_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: AsRef<[u8]>,
    {
        Self {
            files: files
                .into_iter()
                .map(|(path, content)| (path.into(), hex::encode(Sha256::digest(content.as_ref()))))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Digest of a `COPY` source: one file, a directory, or `.` for the
    /// whole context. `None` if nothing in the context matches.
    pub fn digest_of(&self, source: &str) -> Option<String> {
        let source = source.trim_start_matches("./").trim_end_matches('/');
        let whole = source.is_empty() || source == ".";
        let prefix = format!("{source}/");

        let mut hasher = Sha256::new();
        let mut matched = false;
        for (path, digest) in &self.files {
            if whole || path == source || path.starts_with(&prefix) {
                hasher.update(path.as_bytes());
                hasher.update([0]);
                hasher.update(digest.as_bytes());
                hasher.update([b'\n']);
                matched = true;
            }
        }
        matched.then(|| hex::encode(hasher.finalize()))
    }
}

fn slash_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Cache key of one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerKey {
    pub stage: String,
    /// Position of the instruction within its stage
    pub index: usize,
    /// Rendered Dockerfile line
    pub instruction: String,
    /// Hex SHA-256 chained from the parent key
    pub key: String,
    /// Whether the instruction adds a filesystem layer
    pub filesystem: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerCache {
    layers: Vec<LayerKey>,
}

impl LayerCache {
    pub fn compute(plan: &BuildPlan, context: &ContextSnapshot) -> Result<Self, LayerError> {
        let mut layers = Vec::new();
        let mut stage_keys: BTreeMap<&str, String> = BTreeMap::new();

        for stage in &plan.stages {
            let mut parent = match stage_keys.get(stage.base.as_str()) {
                Some(key) => key.clone(),
                None => chain("", &format!("FROM {}", stage.base), ""),
            };

            for (index, instruction) in stage.instructions.iter().enumerate() {
                let text = render_instruction(instruction);
                let input = match instruction {
                    Instruction::Copy(copy) => match &copy.from {
                        None => {
                            let mut digests = Vec::with_capacity(copy.sources.len());
                            for source in &copy.sources {
                                let digest = context.digest_of(source).ok_or_else(|| {
                                    LayerError::MissingSource {
                                        stage: stage.name.clone(),
                                        path: source.clone(),
                                    }
                                })?;
                                digests.push(digest);
                            }
                            digests.join(",")
                        }
                        Some(from) => stage_keys
                            .get(from.as_str())
                            .cloned()
                            .unwrap_or_else(|| from.clone()),
                    },
                    _ => String::new(),
                };

                let key = chain(&parent, &text, &input);
                tracing::debug!(stage = %stage.name, index, key = %key, "{text}");
                layers.push(LayerKey {
                    stage: stage.name.clone(),
                    index,
                    instruction: text,
                    key: key.clone(),
                    filesystem: instruction.creates_layer(),
                });
                parent = key;
            }
            stage_keys.insert(stage.name.as_str(), parent);
        }

        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[LayerKey] {
        &self.layers
    }

    pub fn get(&self, stage: &str, index: usize) -> Option<&LayerKey> {
        self.layers
            .iter()
            .find(|l| l.stage == stage && l.index == index)
    }

    /// Layers of `other` that this cache could not serve.
    pub fn changed<'a>(&self, other: &'a LayerCache) -> Vec<&'a LayerKey> {
        other
            .layers
            .iter()
            .filter(|l| self.get(&l.stage, l.index).is_none_or(|mine| mine.key != l.key))
            .collect()
    }

    /// Filesystem layers of `other` that this cache could not serve.
    pub fn changed_filesystem<'a>(&self, other: &'a LayerCache) -> Vec<&'a LayerKey> {
        self.changed(other)
            .into_iter()
            .filter(|l| l.filesystem)
            .collect()
    }
}

fn chain(parent: &str, instruction: &str, input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent.as_bytes());
    hasher.update([b'\n']);
    hasher.update(instruction.as_bytes());
    hasher.update([b'\n']);
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("stage '{stage}' copies {path}, which is not in the build context")]
    MissingSource { stage: String, path: String },

    #[error("failed to list build context")]
    Context { source: BundleError },

    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}
