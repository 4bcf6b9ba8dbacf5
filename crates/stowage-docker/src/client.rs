use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use stowage_core::{HealthProbe, RuntimeIdentity};

use crate::docker::DockerError;
use crate::executor::{DockerExecutor, RealExecutor};

/// Docker operations client, parameterized over the executor for testability.
pub struct DockerClient<E: DockerExecutor = RealExecutor> {
    executor: E,
}

impl DockerClient<RealExecutor> {
    pub fn new() -> Self {
        Self {
            executor: RealExecutor,
        }
    }
}

impl Default for DockerClient<RealExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: DockerExecutor> DockerClient<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }

    // ── Build ──

    /// `docker build` of a bundled context. The tag is only applied when
    /// every stage succeeds, so a failed compile leaves no image behind.
    pub async fn build(&self, context_dir: &Path, tag: &str) -> Result<(), BuildError> {
        let context = context_dir
            .to_str()
            .ok_or_else(|| BuildError::InvalidPath(context_dir.to_path_buf()))?;
        let dockerfile = context_dir.join("Dockerfile");
        let dockerfile = dockerfile
            .to_str()
            .ok_or_else(|| BuildError::InvalidPath(context_dir.to_path_buf()))?;

        tracing::info!(tag, context, "docker build");
        self.executor
            .exec_streaming(&args(["build", "--tag", tag, "--file", dockerfile, context]))
            .await
            .map_err(|e| BuildError::Build { source: e })
    }

    /// Build under [`staging_tag`] and point `tag` at the image only once it
    /// passes verification. The staging tag is always removed, which also
    /// deletes a rejected image; `tag` keeps whatever it pointed to before.
    pub async fn build_verified(
        &self,
        context_dir: &Path,
        tag: &str,
        expected: &ExpectedImage,
    ) -> Result<VerifyReport, BuildError> {
        let staging = staging_tag(tag);
        self.build(context_dir, &staging).await?;

        let verified = self.verify_image(&staging, expected).await;
        let tagged = if matches!(&verified, Ok(report) if report.all_passed()) {
            self.tag_image(&staging, tag).await
        } else {
            tracing::warn!(tag, "image not verified, leaving tag unchanged");
            Ok(())
        };
        self.remove_image(&staging).await;

        tagged?;
        verified.map_err(|e| BuildError::Verify { source: e })
    }

    /// `docker tag source target`.
    pub async fn tag_image(&self, source: &str, target: &str) -> Result<(), BuildError> {
        tracing::info!(source, target, "docker tag");
        self.executor
            .exec(&args(["tag", source, target]))
            .await
            .map(drop)
            .map_err(|e| BuildError::Tag {
                tag: target.to_owned(),
                source: e,
            })
    }

    /// Untag `tag`, deleting the image when no other tag refers to it.
    async fn remove_image(&self, tag: &str) {
        if let Err(e) = self.executor.exec(&args(["image", "rm", tag])).await {
            tracing::warn!(tag, error = %e, "failed to remove staging image");
        }
    }

    // ── Inspect ──

    pub async fn inspect_image(&self, tag: &str) -> Result<ImageConfig, InspectError> {
        let out = self
            .executor
            .exec(&args(["image", "inspect", "--format", "{{json .Config}}", tag]))
            .await
            .map_err(|e| InspectError::Inspect { source: e })?;
        serde_json::from_str(out.trim()).map_err(|e| InspectError::Parse { source: e })
    }

    /// Health status of a running container, or `None` if its image
    /// declares no healthcheck.
    pub async fn container_health(
        &self,
        container: &str,
    ) -> Result<Option<ContainerHealth>, InspectError> {
        let out = self
            .executor
            .exec(&args(["inspect", "--format", "{{json .State.Health}}", container]))
            .await
            .map_err(|e| InspectError::Inspect { source: e })?;
        let out = out.trim();
        if out.is_empty() || out == "null" {
            return Ok(None);
        }
        serde_json::from_str(out)
            .map(Some)
            .map_err(|e| InspectError::Parse { source: e })
    }

    // ── Verify ──

    /// Check a built image against the contract it was rendered from.
    ///
    /// Inspection failure is an error. Each individual check records its
    /// own outcome so the whole report can be shown at once.
    pub async fn verify_image(
        &self,
        tag: &str,
        expected: &ExpectedImage,
    ) -> Result<VerifyReport, VerifyError> {
        let config = self.inspect_image(tag).await?;
        let mut report = VerifyReport {
            healthcheck: check_healthcheck(config.healthcheck.as_ref(), &expected.probe),
            port: check_port(&config, expected.port),
            user: check_user(config.user.as_deref(), &expected.identity),
            ..Default::default()
        };

        let script = format!(
            "for b in {}; do command -v \"$b\" || true; done",
            expected.toolchain_binaries.join(" ")
        );
        report.toolchain = match self
            .executor
            .exec(&args(["run", "--rm", "--entrypoint", "sh", tag, "-c", &script]))
            .await
        {
            Ok(out) => {
                let found: Vec<&str> = out.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
                if found.is_empty() {
                    CheckResult::ok("no compiler or build tool in image")
                } else {
                    CheckResult::fail(&format!("found {}", found.join(", ")))
                }
            }
            Err(e) => CheckResult::fail(&format!("probe failed: {e}")),
        };

        report.uid = match self
            .executor
            .exec(&args(["run", "--rm", "--entrypoint", "id", tag, "-u"]))
            .await
        {
            Ok(out) if out.trim() == "0" => CheckResult::fail("process runs as uid 0"),
            Ok(out) => CheckResult::ok(&format!("uid {}", out.trim())),
            Err(e) => CheckResult::fail(&format!("probe failed: {e}")),
        };

        tracing::debug!(tag, passed = report.all_passed(), "verified image");
        Ok(report)
    }

    // ── Doctor ──

    /// Run all diagnostic checks without early return.
    pub async fn doctor(&self) -> DoctorReport {
        let mut report = DoctorReport::default();

        // 1. docker CLI
        match self.executor.exec(&args(["--version"])).await {
            Ok(v) => {
                // "Docker version 27.3.1, build ce12230"
                let version = v
                    .trim()
                    .strip_prefix("Docker version ")
                    .and_then(|rest| rest.split(',').next())
                    .unwrap_or(v.trim());
                report.docker = CheckResult::ok(version);
            }
            Err(e) => {
                report.docker = CheckResult::fail(&e.to_string());
                report.daemon = CheckResult::fail("skipped: docker CLI missing");
                report.buildx = CheckResult::fail("skipped: docker CLI missing");
                return report;
            }
        }

        // 2. Daemon reachable
        match self
            .executor
            .exec(&args(["info", "--format", "{{.ServerVersion}}"]))
            .await
        {
            Ok(v) if !v.trim().is_empty() => report.daemon = CheckResult::ok(v.trim()),
            _ => report.daemon = CheckResult::fail("daemon not reachable"),
        }

        // 3. BuildKit frontend
        match self.executor.exec(&args(["buildx", "version"])).await {
            Ok(v) => {
                // "github.com/docker/buildx v0.17.1 257815a"
                let version = v.split_whitespace().nth(1).unwrap_or(v.trim());
                report.buildx = CheckResult::ok(version);
            }
            Err(_) => report.buildx = CheckResult::fail("buildx not installed"),
        }

        report
    }
}

fn check_healthcheck(actual: Option<&ImageHealthcheck>, expected: &HealthProbe) -> CheckResult {
    let Some(hc) = actual else {
        return CheckResult::fail("image declares no HEALTHCHECK");
    };
    if hc.test.first().map(String::as_str) != Some("CMD") {
        return CheckResult::fail(&format!("unexpected probe form {:?}", hc.test));
    }
    if !hc.test.iter().any(|a| a.contains(&expected.url)) {
        return CheckResult::fail(&format!("probe does not target {}", expected.url));
    }

    let mismatches: Vec<String> = [
        ("interval", hc.interval(), expected.interval),
        ("timeout", hc.timeout(), expected.timeout),
        ("start-period", hc.start_period(), expected.start_period),
    ]
    .into_iter()
    .filter(|(_, got, want)| got != want)
    .map(|(name, got, want)| format!("{name} {}s != {}s", got.as_secs(), want.as_secs()))
    .chain(
        (hc.retries != expected.retries)
            .then(|| format!("retries {} != {}", hc.retries, expected.retries)),
    )
    .collect();

    if mismatches.is_empty() {
        CheckResult::ok(&format!(
            "{} every {}s, timeout {}s, start {}s, retries {}",
            expected.url,
            expected.interval.as_secs(),
            expected.timeout.as_secs(),
            expected.start_period.as_secs(),
            expected.retries
        ))
    } else {
        CheckResult::fail(&mismatches.join("; "))
    }
}

fn check_port(config: &ImageConfig, port: u16) -> CheckResult {
    let key = format!("{port}/tcp");
    if config.exposed_ports.contains_key(&key) {
        CheckResult::ok(&key)
    } else {
        let exposed: Vec<&str> = config.exposed_ports.keys().map(String::as_str).collect();
        CheckResult::fail(&format!("{key} not exposed (exposed: {exposed:?})"))
    }
}

fn check_user(user: Option<&str>, identity: &RuntimeIdentity) -> CheckResult {
    match user.map(str::trim).filter(|u| !u.is_empty()) {
        None => CheckResult::fail("no USER set, process would run as root"),
        Some(u) => {
            let name = u.split(':').next().unwrap_or(u);
            if name == identity.name || name == identity.uid.to_string() {
                CheckResult::ok(u)
            } else {
                CheckResult::fail(&format!("USER is {u}, expected {}", identity.name))
            }
        }
    }
}

/// Tag an image holds between `docker build` and a passed verification.
pub fn staging_tag(tag: &str) -> String {
    format!("{tag}-unverified")
}

// ── Helper ──

fn args<const N: usize>(a: [&str; N]) -> Vec<String> {
    a.iter().map(|s| (*s).to_owned()).collect()
}

// ── Image and container types ──

/// Subset of `docker image inspect` `.Config` stowage checks.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageConfig {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub exposed_ports: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub healthcheck: Option<ImageHealthcheck>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub env: Vec<String>,
}

/// Durations are nanoseconds, as Docker reports them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageHealthcheck {
    #[serde(default)]
    pub test: Vec<String>,
    #[serde(default)]
    pub interval: u64,
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub start_period: u64,
    #[serde(default)]
    pub retries: u32,
}

impl ImageHealthcheck {
    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_nanos(self.timeout)
    }

    pub fn start_period(&self) -> Duration {
        Duration::from_nanos(self.start_period)
    }
}

/// `.State.Health` of a running container.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerHealth {
    /// `starting`, `healthy`, or `unhealthy`
    pub status: String,
    #[serde(default)]
    pub failing_streak: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub log: Vec<HealthLogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthLogEntry {
    #[serde(default)]
    pub exit_code: i64,
    #[serde(default)]
    pub output: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// What a built image must show.
#[derive(Debug, Clone)]
pub struct ExpectedImage {
    pub probe: HealthProbe,
    pub port: u16,
    pub identity: RuntimeIdentity,
    /// Binaries that must not resolve on the image `PATH`
    pub toolchain_binaries: Vec<String>,
}

// ── Reports ──

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub healthcheck: CheckResult,
    pub port: CheckResult,
    pub user: CheckResult,
    pub toolchain: CheckResult,
    pub uid: CheckResult,
}

impl VerifyReport {
    pub fn all_passed(&self) -> bool {
        self.checks().iter().all(|(_, c)| c.passed)
    }

    pub fn checks(&self) -> [(&'static str, &CheckResult); 5] {
        [
            ("Healthcheck", &self.healthcheck),
            ("Exposed port", &self.port),
            ("User", &self.user),
            ("Toolchain", &self.toolchain),
            ("Process uid", &self.uid),
        ]
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, check) in self.checks() {
            writeln!(f, "  [{}] {name:<14} {}", check.icon(), check.detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DoctorReport {
    pub docker: CheckResult,
    pub daemon: CheckResult,
    pub buildx: CheckResult,
    pub config_file: CheckResult,
    pub manifest: CheckResult,
}

impl DoctorReport {
    pub fn all_passed(&self) -> bool {
        self.docker.passed
            && self.daemon.passed
            && self.buildx.passed
            && self.config_file.passed
            && self.manifest.passed
    }
}

impl fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "stowage doctor")?;
        writeln!(f, "{}", "-".repeat(40))?;
        let rows = [
            ("Docker CLI", &self.docker),
            ("Docker daemon", &self.daemon),
            ("Buildx", &self.buildx),
            ("stowage.toml", &self.config_file),
            ("Manifest", &self.manifest),
        ];
        for (name, check) in rows {
            writeln!(f, "  [{}] {name:<14} {}", check.icon(), check.detail)?;
        }
        writeln!(f, "{}", "-".repeat(40))?;
        if self.all_passed() {
            write!(f, "All checks passed")
        } else {
            write!(f, "Some checks failed")
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    pub fn ok(detail: &str) -> Self {
        Self {
            passed: true,
            detail: detail.to_owned(),
        }
    }

    pub fn fail(detail: &str) -> Self {
        Self {
            passed: false,
            detail: detail.to_owned(),
        }
    }

    pub fn icon(&self) -> &'static str {
        if self.passed { "OK" } else { "NG" }
    }
}

// ── Error types ──

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("build context path is not valid UTF-8: {0}")]
    InvalidPath(std::path::PathBuf),

    #[error("docker build failed")]
    Build { source: DockerError },

    #[error("failed to tag image as {tag}")]
    Tag { tag: String, source: DockerError },

    #[error(transparent)]
    Verify { source: VerifyError },
}

#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("docker inspect failed")]
    Inspect { source: DockerError },

    #[error("unexpected docker inspect output")]
    Parse { source: serde_json::Error },
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("cannot verify image")]
    Inspect(#[from] InspectError),
}
