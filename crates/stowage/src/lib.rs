//! Build minimal, non-root container images for Python web services.
//!
//! This is the unified facade crate that re-exports all stowage sub-crates.
//! Use feature flags to control which components are included.
//!
//! # Feature flags
//!
//! | Feature | Default | Crate | Description |
//! |---------|---------|-------|-------------|
//! | `core` | yes | [`stowage-core`](https://crates.io/crates/stowage-core) | Configuration, manifest, and version constraints |
//! | `build` | yes | [`stowage-build`](https://crates.io/crates/stowage-build) | Build plan, layer cache model, and Dockerfile generation |
//! | `docker` | yes | [`stowage-docker`](https://crates.io/crates/stowage-docker) | Docker build, inspection, and image verification |
//! | `runtime` | no | [`stowage-runtime`](https://crates.io/crates/stowage-runtime) | Health state machine, probe, and process bootstrap |
//!
//! # Quick start
//!
//! ```toml
//! [dependencies]
//! stowage = "0.1"
//! ```
//!
//! ```rust,no_run
//! use std::path::Path;
//! use stowage::{DependencyManifest, StowageConfig};
//! use stowage::build::{BuildPlan, DockerfileGenerator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StowageConfig::load(Path::new("."))?;
//! let manifest = DependencyManifest::load(Path::new("."), &config.build.manifest)?;
//! let (plan, _resolved) = BuildPlan::assemble(&config, &manifest)?;
//! let dockerfile = DockerfileGenerator::new(&plan).render();
//! # Ok(())
//! # }
//! ```

// Core types flattened into root namespace for convenience.
#[cfg(feature = "core")]
pub use stowage_core::*;

/// Build plan, pipeline validation, layer cache keys, Dockerfile rendering,
/// source bundling, and eject.
///
/// See [`stowage-build`](https://crates.io/crates/stowage-build) for details.
#[cfg(feature = "build")]
pub mod build {
    pub use stowage_build::*;
}

/// Docker CLI operations.
#[cfg(feature = "docker")]
pub mod docker {
    pub use stowage_docker::*;
}

/// Health tracking and the server bootstrap.
///
/// **Requires** the `runtime` feature flag (not enabled by default).
#[cfg(feature = "runtime")]
pub mod runtime {
    pub use stowage_runtime::*;
}
