pub mod client;
pub mod docker;
pub mod executor;

pub use client::{
    BuildError, CheckResult, ContainerHealth, DockerClient, DoctorReport, ExpectedImage,
    ImageConfig, ImageHealthcheck, InspectError, VerifyError, VerifyReport,
};
pub use docker::DockerError;
pub use executor::{DockerExecutor, RealExecutor};
