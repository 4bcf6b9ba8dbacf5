//! Process bootstrap: preflight checks, server spawn, bind wait, and signal
//! forwarding.

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use stowage_core::StowageConfig;
use tokio::process::{Child, Command};
use tokio::time::Instant;

const BIND_POLL: Duration = Duration::from_millis(100);

/// Exit code of a process killed by SIGKILL.
const KILLED_EXIT_CODE: i32 = 128 + 9;

/// Everything needed to start the service process.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    /// Server argv; `argv[0]` lives under `prefix/bin`
    pub argv: Vec<String>,
    /// Environment artifact root
    pub prefix: PathBuf,
    pub host: String,
    pub port: u16,
    /// How long the server may take to accept connections
    pub start_period: Duration,
    /// How long the server may take to exit after SIGTERM
    pub shutdown_grace: Duration,
    /// `.env` file passed to the server, if present
    pub env_file: PathBuf,
    pub require_env_file: bool,
}

impl Bootstrap {
    pub fn from_config(config: &StowageConfig, workdir: &Path) -> Self {
        Self {
            argv: config.server_argv(),
            prefix: PathBuf::from(&config.build.env_dir),
            host: config.runtime.host.clone(),
            port: config.runtime.port,
            start_period: Duration::from_secs(config.health.start_period_secs),
            shutdown_grace: config.runtime.shutdown_grace(),
            env_file: workdir.join(".env"),
            require_env_file: config.runtime.require_env_file,
        }
    }

    /// Use a local prefix instead of the image one (e.g. `.venv`).
    pub fn with_prefix(mut self, prefix: PathBuf, server: &str) -> Self {
        if let Some(program) = self.argv.first_mut() {
            *program = prefix.join("bin").join(server).to_string_lossy().into_owned();
        }
        self.prefix = prefix;
        self
    }

    fn addr(&self) -> String {
        socket_addr(&self.host, self.port)
    }

    /// Address a local client connects to for a wildcard bind.
    fn connect_addr(&self) -> String {
        let host = match self.host.trim_matches(['[', ']']) {
            "0.0.0.0" => "127.0.0.1",
            "::" => "::1",
            other => other,
        };
        socket_addr(host, self.port)
    }

    /// Every condition that would make the server fail at startup.
    pub fn preflight(&self) -> Result<(), StartupError> {
        if !self.prefix.is_dir() {
            return Err(StartupError::MissingPrefix(self.prefix.clone()));
        }
        let program = self
            .argv
            .first()
            .map(PathBuf::from)
            .ok_or(StartupError::EmptyCommand)?;
        if !program.is_file() {
            return Err(StartupError::MissingServer(program));
        }
        if self.require_env_file && !self.env_file.is_file() {
            return Err(StartupError::MissingEnvFile(self.env_file.clone()));
        }

        // Probe-bind and release; the server binds for real right after.
        TcpListener::bind(self.addr()).map_err(|e| StartupError::PortInUse {
            addr: self.addr(),
            source: e,
        })?;
        Ok(())
    }

    /// Variables from `.env`, or none if the file is absent.
    pub fn load_env(&self) -> Result<Vec<(String, String)>, StartupError> {
        if !self.env_file.is_file() {
            return Ok(Vec::new());
        }
        let iter = dotenvy::from_path_iter(&self.env_file).map_err(|e| StartupError::EnvFile {
            path: self.env_file.clone(),
            source: e,
        })?;
        iter.map(|item| {
            item.map_err(|e| StartupError::EnvFile {
                path: self.env_file.clone(),
                source: e,
            })
        })
        .collect()
    }

    /// Start the server and wait for it to accept connections.
    ///
    /// SIGTERM/SIGINT are caught from before the spawn on: a signal during
    /// the bind wait stops the server and yields [`StartupError::Stopped`].
    pub async fn start(&self) -> Result<RunningService, StartupError> {
        self.preflight()?;
        let env = self.load_env()?;
        tracing::debug!(vars = env.len(), file = %self.env_file.display(), "loaded environment");

        let mut signals = ShutdownSignal::new().map_err(|e| StartupError::Signal { source: e })?;
        let (program, args) = self.argv.split_first().ok_or(StartupError::EmptyCommand)?;
        let mut child = Command::new(program)
            .args(args)
            .envs(env)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StartupError::Spawn {
                program: program.clone(),
                source: e,
            })?;
        tracing::info!(pid = child.id(), addr = %self.addr(), "started {program}");

        let deadline = Instant::now() + self.start_period;
        loop {
            if let Some(status) = child.try_wait().map_err(|e| StartupError::Wait { source: e })? {
                return Err(StartupError::EarlyExit {
                    code: exit_code(status),
                });
            }
            if tokio::net::TcpStream::connect(self.connect_addr()).await.is_ok() {
                tracing::info!(addr = %self.addr(), "service is accepting connections");
                return Ok(RunningService {
                    child,
                    signals,
                    shutdown_grace: self.shutdown_grace,
                });
            }
            if Instant::now() >= deadline {
                terminate(&mut child, self.shutdown_grace).await?;
                return Err(StartupError::BindTimeout {
                    addr: self.addr(),
                    waited: self.start_period,
                });
            }
            tokio::select! {
                _ = tokio::time::sleep(BIND_POLL) => {}
                signal = signals.recv() => {
                    signal.map_err(|e| StartupError::Signal { source: e })?;
                    let code = terminate(&mut child, self.shutdown_grace).await?;
                    return Err(StartupError::Stopped { code });
                }
            }
        }
    }

    /// Start the server and supervise it until it exits or the bootstrap
    /// receives SIGTERM/SIGINT. Returns the exit code to propagate.
    pub async fn run(&self) -> Result<i32, StartupError> {
        let service = self.start().await?;
        service.supervise().await
    }
}

/// A started server process.
#[derive(Debug)]
pub struct RunningService {
    child: Child,
    signals: ShutdownSignal,
    shutdown_grace: Duration,
}

impl RunningService {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the server to exit; on SIGTERM/SIGINT, forward SIGTERM and
    /// give it `shutdown_grace` to drain before killing it.
    pub async fn supervise(mut self) -> Result<i32, StartupError> {
        let exited = tokio::select! {
            status = self.child.wait() => Some(status),
            signal = self.signals.recv() => {
                signal.map_err(|e| StartupError::Signal { source: e })?;
                None
            }
        };

        let Some(status) = exited else {
            return self.shutdown().await;
        };
        let code = exit_code(status.map_err(|e| StartupError::Wait { source: e })?);
        if code == 0 {
            tracing::info!("service exited");
        } else {
            tracing::error!(code, "service exited with failure");
        }
        Ok(code)
    }

    /// Forward SIGTERM and wait up to the grace period.
    pub async fn shutdown(mut self) -> Result<i32, StartupError> {
        terminate(&mut self.child, self.shutdown_grace).await
    }
}

fn socket_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// SIGTERM, then SIGKILL if the child outlives `grace`.
async fn terminate(child: &mut Child, grace: Duration) -> Result<i32, StartupError> {
    forward_sigterm(child)?;
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => {
            let code = exit_code(status.map_err(|e| StartupError::Wait { source: e })?);
            tracing::info!(code, "service stopped");
            Ok(code)
        }
        Err(_) => {
            tracing::warn!(grace = ?grace, "service did not stop in time, killing");
            child
                .kill()
                .await
                .map_err(|e| StartupError::Wait { source: e })?;
            Ok(KILLED_EXIT_CODE)
        }
    }
}

#[cfg(unix)]
fn forward_sigterm(child: &mut Child) -> Result<(), StartupError> {
    let Some(pid) = child.id() else {
        // Already reaped
        return Ok(());
    };
    let pid = libc::pid_t::try_from(pid).map_err(|_| StartupError::Signal {
        source: std::io::Error::other(format!("pid {pid} out of range")),
    })?;
    // SAFETY: kill(2) has no memory-safety preconditions; pid is our own child.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: exited between id() and kill()
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(StartupError::Signal { source: err });
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn forward_sigterm(child: &mut Child) -> Result<(), StartupError> {
    child
        .start_kill()
        .map_err(|e| StartupError::Signal { source: e })
}

/// Exit code to propagate; death by signal maps to `128 + signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// SIGTERM/SIGINT listener.
///
/// Handlers are installed by [`ShutdownSignal::new`], so a signal delivered
/// between construction and the first [`recv`](Self::recv) is not lost.
#[derive(Debug)]
pub struct ShutdownSignal {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    pub fn new() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            Ok(Self {
                terminate: signal(SignalKind::terminate())?,
                interrupt: signal(SignalKind::interrupt())?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Resolves on the next SIGINT or SIGTERM.
    pub async fn recv(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.interrupt.recv() => tracing::info!("received SIGINT, shutting down"),
                _ = self.terminate.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
            Ok(())
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            tracing::info!("received Ctrl+C, shutting down");
            Ok(())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("environment prefix {0} not found; run the dependency install first")]
    MissingPrefix(PathBuf),

    #[error("server binary {0} not found in the environment prefix")]
    MissingServer(PathBuf),

    #[error("server command is empty")]
    EmptyCommand,

    #[error(".env file not found at {0}; copy .env.example and fill it in")]
    MissingEnvFile(PathBuf),

    #[error("failed to read {path}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },

    #[error("port {addr} is already in use")]
    PortInUse {
        addr: String,
        source: std::io::Error,
    },

    #[error("failed to start {program}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("server exited during startup with code {code}")]
    EarlyExit { code: i32 },

    #[error("server did not accept connections on {addr} within {waited:?}")]
    BindTimeout { addr: String, waited: Duration },

    #[error("stopped by signal during startup; server exited with code {code}")]
    Stopped { code: i32 },

    #[error("failed to wait for the server process")]
    Wait { source: std::io::Error },

    #[error("signal handling failed")]
    Signal { source: std::io::Error },
}

impl StartupError {
    /// Process exit code for this outcome. Only a requested stop can be 0.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Stopped { code } => *code,
            Self::EarlyExit { code } if *code != 0 => *code,
            _ => 1,
        }
    }
}
