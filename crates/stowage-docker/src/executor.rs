use std::process::Stdio;

use crate::docker::DockerError;

/// Abstraction over docker CLI execution for testability.
///
/// Production code uses [`RealExecutor`], tests use mockall-generated mocks.
#[allow(async_fn_in_trait)]
pub trait DockerExecutor: Send + Sync {
    /// Run a docker command and capture stdout.
    async fn exec(&self, args: &[String]) -> Result<String, DockerError>;

    /// Run a docker command with output streamed to the terminal.
    async fn exec_streaming(&self, args: &[String]) -> Result<(), DockerError>;
}

/// Runs the `docker` binary found on `PATH`.
pub struct RealExecutor;

impl DockerExecutor for RealExecutor {
    async fn exec(&self, args: &[String]) -> Result<String, DockerError> {
        tracing::debug!(?args, "docker");
        let output = tokio::process::Command::new("docker")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DockerError::NotFound { source: e })?;

        if output.status.success() {
            String::from_utf8(output.stdout).map_err(|e| DockerError::InvalidUtf8 { source: e })
        } else {
            Err(DockerError::CommandFailed {
                args: args.to_vec(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    async fn exec_streaming(&self, args: &[String]) -> Result<(), DockerError> {
        tracing::debug!(?args, "docker (streaming)");
        let status = tokio::process::Command::new("docker")
            .args(args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| DockerError::NotFound { source: e })?;

        if status.success() {
            Ok(())
        } else {
            Err(DockerError::CommandFailed {
                args: args.to_vec(),
                stderr: format!("exit code: {status}"),
            })
        }
    }
}
