//! Run-time side of a stowage image: the health state machine a supervisor
//! applies to the declared probe, an HTTP probe and monitor loop to evaluate
//! it locally, and the bootstrap that starts the server process.

pub mod bootstrap;
pub mod health;
pub mod monitor;
pub mod probe;

pub use bootstrap::{Bootstrap, RunningService, ShutdownSignal, StartupError};
pub use health::{HealthState, HealthTracker, Transition};
pub use monitor::HealthMonitor;
pub use probe::{HttpProbe, Probe, ProbeError};
