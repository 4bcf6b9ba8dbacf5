use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// File name of the project configuration, looked up in the project root.
pub const CONFIG_FILE: &str = "stowage.toml";

/// stowage.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StowageConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Image name (defaults to the project directory name)
    pub name: Option<String>,
}

/// Dependency installer used by the builder stage.
///
/// Both strategies install the same manifest into the same prefix; they
/// differ only in installer speed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverStrategy {
    /// `uv pip install`, copied from the uv distroless image
    #[default]
    Fast,
    /// `pip install` from the interpreter's own environment
    Standard,
}

impl std::fmt::Display for ResolverStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => f.write_str("fast"),
            Self::Standard => f.write_str("standard"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Dependency installer
    #[serde(default)]
    pub strategy: ResolverStrategy,
    /// Builder stage base image (toolchain + headers)
    #[serde(default = "default_builder_image")]
    pub builder_image: String,
    /// Runtime stage base image
    #[serde(default = "default_runtime_image")]
    pub runtime_image: String,
    /// Dependency manifest, relative to the project directory
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
    /// System packages installed only in the builder stage
    #[serde(default = "default_build_packages")]
    pub build_packages: Vec<String>,
    /// Shared libraries installed in the runtime stage
    #[serde(default)]
    pub runtime_packages: Vec<String>,
    /// Environment artifact prefix
    #[serde(default = "default_env_dir")]
    pub env_dir: String,
    /// Application directory in the runtime image
    #[serde(default = "default_app_dir")]
    pub app_dir: String,
    /// uv release used by the fast strategy
    #[serde(default = "default_uv_version")]
    pub uv_version: String,
    /// Source paths overlaid onto the runtime image.
    /// When None, the whole build context is copied (COPY . .).
    #[serde(default)]
    pub include: Option<Vec<String>>,
    /// Static environment variables baked into the runtime image.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Unprivileged user the service runs as
    #[serde(default = "default_user")]
    pub user: String,
    /// uid (and gid) of the runtime user
    #[serde(default = "default_uid")]
    pub uid: u32,
    /// Home directory of the runtime user
    #[serde(default = "default_home")]
    pub home: String,
    /// Login shell of the runtime user
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Server executable inside the environment prefix
    #[serde(default = "default_server")]
    pub server: String,
    /// ASGI application reference passed to the server
    #[serde(default = "default_app")]
    pub app: String,
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,
    /// Port the application listens on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Server worker processes
    #[serde(default = "default_workers")]
    pub workers: u32,
    /// Seconds the bootstrap waits for the server after forwarding SIGTERM
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Refuse to start when `.env` is missing
    #[serde(default)]
    pub require_env_file: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// HTTP path probed on the service port
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_start_period_secs")]
    pub start_period_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Program the image's HEALTHCHECK runs
    #[serde(default)]
    pub probe: ProbeTool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeTool {
    /// The prefix interpreter with stdlib `urllib`
    #[default]
    Python,
    /// `curl --fail`; needs `curl` in `runtime_packages`
    Curl,
}

/// Non-privileged identity that owns the application at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeIdentity {
    pub name: String,
    pub uid: u32,
    pub home: String,
    pub shell: String,
}

impl RuntimeIdentity {
    /// `user:group` pair for `chown` and `COPY --chown`.
    pub fn owner(&self) -> String {
        format!("{name}:{name}", name = self.name)
    }
}

/// Liveness probe declared on the image and evaluated by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbe {
    pub url: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub start_period: Duration,
    pub retries: u32,
    pub tool: ProbeTool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            strategy: ResolverStrategy::default(),
            builder_image: default_builder_image(),
            runtime_image: default_runtime_image(),
            manifest: default_manifest(),
            build_packages: default_build_packages(),
            runtime_packages: Vec::new(),
            env_dir: default_env_dir(),
            app_dir: default_app_dir(),
            uv_version: default_uv_version(),
            include: None,
            env: BTreeMap::new(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            uid: default_uid(),
            home: default_home(),
            shell: default_shell(),
            server: default_server(),
            app: default_app(),
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            require_env_file: false,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            start_period_secs: default_start_period_secs(),
            retries: default_retries(),
            probe: ProbeTool::default(),
        }
    }
}

impl StowageConfig {
    /// Load from stowage.toml in the given directory, or return defaults if not found.
    pub fn load(project_dir: &Path) -> crate::Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);
        if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.clone(),
                    source: e,
                })?;
            let config: Self = toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path.clone(),
                source: e,
            })?;
            tracing::debug!(path = %config_path.display(), "loaded stowage config");
            Ok(config)
        } else {
            tracing::debug!(dir = %project_dir.display(), "no stowage.toml, using defaults");
            Ok(Self::default())
        }
    }

    /// Reject values the pipeline cannot render into a working image.
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.runtime.port == 0 {
            return Err(Error::invalid("runtime.port", "must be non-zero"));
        }
        if self.runtime.workers == 0 {
            return Err(Error::invalid("runtime.workers", "must be at least 1"));
        }
        if self.runtime.user.is_empty() || self.runtime.user == "root" {
            return Err(Error::invalid(
                "runtime.user",
                format!("{:?} is not an unprivileged user", self.runtime.user),
            ));
        }
        if self.runtime.uid == 0 {
            return Err(Error::invalid("runtime.uid", "uid 0 is root"));
        }
        if self.health.retries == 0 {
            return Err(Error::invalid("health.retries", "must be at least 1"));
        }
        if self.health.interval_secs == 0 {
            return Err(Error::invalid("health.interval_secs", "must be non-zero"));
        }
        if self.health.timeout_secs == 0 {
            return Err(Error::invalid("health.timeout_secs", "must be non-zero"));
        }
        if !self.health.path.starts_with('/') {
            return Err(Error::invalid(
                "health.path",
                format!("{:?} must start with '/'", self.health.path),
            ));
        }
        for (field, dir) in [
            ("build.env_dir", &self.build.env_dir),
            ("build.app_dir", &self.build.app_dir),
            ("runtime.home", &self.runtime.home),
        ] {
            if !dir.starts_with('/') {
                return Err(Error::invalid(field, format!("{dir:?} must be absolute")));
            }
        }
        if self.build.app_dir == self.build.env_dir {
            return Err(Error::invalid(
                "build.app_dir",
                "must differ from build.env_dir",
            ));
        }
        if self.build.manifest.is_absolute() {
            return Err(Error::invalid(
                "build.manifest",
                "must be relative to the project directory",
            ));
        }
        if let Some(include) = &self.build.include {
            if include.is_empty() {
                return Err(Error::invalid(
                    "build.include",
                    "must list at least one path; omit it to copy the whole context",
                ));
            }
            for path in include {
                validate_include_path(path)?;
            }
        }
        Ok(())
    }

    /// Image name: `[project].name`, or the project directory name.
    pub fn service_name(&self, project_dir: &Path) -> String {
        if let Some(name) = &self.project.name {
            return name.clone();
        }
        project_dir
            .canonicalize()
            // arch-lint: allow(no-silent-result-drop) reason="an unresolvable directory falls back to the generic service name"
            .ok()
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "service".to_owned())
    }

    pub fn identity(&self) -> RuntimeIdentity {
        RuntimeIdentity {
            name: self.runtime.user.clone(),
            uid: self.runtime.uid,
            home: self.runtime.home.clone(),
            shell: self.runtime.shell.clone(),
        }
    }

    pub fn health_probe(&self) -> HealthProbe {
        HealthProbe {
            url: format!(
                "http://127.0.0.1:{port}{path}",
                port = self.runtime.port,
                path = self.health.path
            ),
            interval: Duration::from_secs(self.health.interval_secs),
            timeout: Duration::from_secs(self.health.timeout_secs),
            start_period: Duration::from_secs(self.health.start_period_secs),
            retries: self.health.retries,
            tool: self.health.probe,
        }
    }

    /// Directory holding the prefix executables.
    pub fn env_bin_dir(&self) -> String {
        format!("{}/bin", self.build.env_dir.trim_end_matches('/'))
    }

    /// argv that starts the web server; the image `CMD` and `stowage run`
    /// both use it.
    pub fn server_argv(&self) -> Vec<String> {
        vec![
            format!("{}/{}", self.env_bin_dir(), self.runtime.server),
            self.runtime.app.clone(),
            "--host".to_owned(),
            self.runtime.host.clone(),
            "--port".to_owned(),
            self.runtime.port.to_string(),
            "--workers".to_owned(),
            self.runtime.workers.to_string(),
        ]
    }
}

impl RuntimeConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn validate_include_path(path: &str) -> crate::Result<()> {
    let p = Path::new(path);
    if p.is_absolute() {
        return Err(crate::Error::InvalidIncludePath {
            path: path.to_owned(),
            reason: "must be relative to the build context",
        });
    }
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(crate::Error::InvalidIncludePath {
            path: path.to_owned(),
            reason: "must not leave the build context",
        });
    }
    Ok(())
}

fn default_builder_image() -> String {
    "python:3.12-slim-bookworm".to_owned()
}

fn default_runtime_image() -> String {
    "python:3.12-slim-bookworm".to_owned()
}

fn default_manifest() -> PathBuf {
    PathBuf::from("requirements.txt")
}

fn default_build_packages() -> Vec<String> {
    vec!["build-essential".to_owned()]
}

fn default_env_dir() -> String {
    "/opt/venv".to_owned()
}

fn default_app_dir() -> String {
    "/app".to_owned()
}

fn default_uv_version() -> String {
    "0.5.11".to_owned()
}

fn default_user() -> String {
    "app".to_owned()
}

fn default_uid() -> u32 {
    10001
}

fn default_home() -> String {
    "/home/app".to_owned()
}

fn default_shell() -> String {
    "/usr/sbin/nologin".to_owned()
}

fn default_server() -> String {
    "uvicorn".to_owned()
}

fn default_app() -> String {
    "main:app".to_owned()
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

fn default_port() -> u16 {
    8000
}

fn default_workers() -> u32 {
    2
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_health_path() -> String {
    "/health".to_owned()
}

fn default_interval_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_start_period_secs() -> u64 {
    40
}

fn default_retries() -> u32 {
    3
}
