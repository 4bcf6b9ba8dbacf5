//! Build plan, layer cache model, and Dockerfile generation for stowage.
//!
//! # Build pipeline
//!
//! ```text
//! stowage build
//!   1. Config      ── stowage.toml → StowageConfig::validate()
//!   2. Resolve     ── DependencyManifest::resolve() (unsatisfiable = abort)
//!   3. Plan        ── BuildPlan::assemble() → builder + runtime stages
//!   4. Validate    ── validate::validate() (any violation = abort)
//!   5. Dockerfile  ── DockerfileGenerator::render() (or .stowage/Dockerfile)
//!   6. Bundle      ── git ls-files → .stowage-bundle/
//!   7. Build       ── docker build to a staging tag, verify, then tag
//! ```
//!
//! # Layer order
//!
//! The builder stage copies only the manifest before installing, so its
//! install layer is keyed on the manifest digest alone. The runtime stage
//! imports the environment artifact before overlaying the source tree, and
//! nothing after the overlay writes to the filesystem. A source edit
//! therefore invalidates exactly one filesystem layer (see [`layers`]).
//!
//! # Runtime content
//!
//! The source overlay varies with `[build] include`:
//! - **Omitted**: `COPY . ./` of the whole bundle
//! - **Specified**: one `COPY` per listed path

pub mod bundle;
pub mod dockerfile;
pub mod eject;
pub mod layers;
pub mod plan;
pub mod resolver;
pub mod stages;
pub mod validate;

pub use dockerfile::DockerfileGenerator;
pub use layers::{ContextSnapshot, LayerCache, LayerError, LayerKey};
pub use plan::{BuildPlan, Instruction, PlanError, Stage};
pub use validate::Violation;
