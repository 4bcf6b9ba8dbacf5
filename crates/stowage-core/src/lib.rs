//! Core types and configuration for stowage.
//!
//! This crate defines the `stowage.toml` schema ([`StowageConfig`]),
//! dependency manifest parsing and satisfiability checks
//! ([`DependencyManifest`]), and shared error types.

pub mod config;
pub mod error;
pub mod manifest;
pub mod version;

pub use config::{
    BuildConfig, CONFIG_FILE, HealthConfig, HealthProbe, ProbeTool, ProjectConfig, ResolverStrategy,
    RuntimeConfig, RuntimeIdentity, StowageConfig,
};
pub use error::{Error, Result};
pub use manifest::{
    DependencyManifest, ManifestError, Requirement, ResolvedPackage, ResolvedSet, normalize_name,
};
pub use version::{Constraint, ConstraintError, Operator, Version, VersionError};
