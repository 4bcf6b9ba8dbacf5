use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

const REQUIREMENTS: &str = "fastapi==0.115.0\nuvicorn[standard]>=0.30,<1.0\n";

fn stowage() -> assert_cmd::Command {
    cargo_bin_cmd!("stowage")
}

fn python_project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("requirements.txt"), REQUIREMENTS).unwrap();
    std::fs::write(tmp.path().join("main.py"), "app = None\n").unwrap();
    tmp
}

fn git(dir: &Path, args: &[&str]) {
    std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
}

fn commit_all(dir: &Path) {
    git(dir, &["init"]);
    git(dir, &["config", "user.email", "t@t.com"]);
    git(dir, &["config", "user.name", "T"]);
    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "init"]);
}

// ── Help / Version ──

#[test]
fn shows_help() {
    stowage()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("non-root container images"));
}

#[test]
fn shows_version() {
    stowage()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("stowage"));
}

// ── Init Command ──

#[test]
fn init_creates_config_and_dockerignore() {
    let tmp = python_project();

    stowage()
        .current_dir(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created stowage.toml"))
        .stdout(predicate::str::contains("Created .dockerignore"));

    let dockerignore = std::fs::read_to_string(tmp.path().join(".dockerignore")).unwrap();
    assert!(dockerignore.contains(".venv"));
    assert!(dockerignore.contains(".env"));
}

#[test]
fn init_output_is_a_loadable_config() {
    let tmp = python_project();
    stowage().current_dir(tmp.path()).arg("init").assert().success();

    stowage()
        .current_dir(tmp.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Plan OK"));
}

#[test]
fn init_skips_existing_files() {
    let tmp = python_project();
    std::fs::write(tmp.path().join("stowage.toml"), "[project]\nname = \"keep\"\n").unwrap();

    stowage()
        .current_dir(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stderr(predicate::str::contains("stowage.toml already exists"));

    let content = std::fs::read_to_string(tmp.path().join("stowage.toml")).unwrap();
    assert_eq!(content, "[project]\nname = \"keep\"\n");
}

#[test]
fn init_requires_requirements_txt() {
    let tmp = TempDir::new().unwrap();

    stowage()
        .current_dir(tmp.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("requirements.txt not found"));
}

// ── Check / Render / Plan ──

#[test]
fn check_reports_resolved_packages() {
    let tmp = python_project();

    stowage()
        .current_dir(tmp.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 package(s) resolved"))
        .stdout(predicate::str::contains("fast resolver"));
}

#[test]
fn check_fails_on_unsatisfiable_constraints() {
    let tmp = python_project();
    std::fs::write(
        tmp.path().join("requirements.txt"),
        "requests>=2.0\nrequests<1.0\n",
    )
    .unwrap();

    stowage()
        .current_dir(tmp.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsatisfiable"))
        .stderr(predicate::str::contains("requests"));
}

#[test]
fn check_fails_without_manifest() {
    let tmp = TempDir::new().unwrap();

    stowage()
        .current_dir(tmp.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("dependency manifest not found"));
}

#[test]
fn check_rejects_root_user() {
    let tmp = python_project();
    std::fs::write(tmp.path().join("stowage.toml"), "[runtime]\nuser = \"root\"\n").unwrap();

    stowage()
        .current_dir(tmp.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("runtime.user"));
}

#[test]
fn render_prints_two_stage_dockerfile() {
    let tmp = python_project();

    stowage()
        .current_dir(tmp.path())
        .arg("render")
        .assert()
        .success()
        .stdout(predicate::str::contains("AS builder"))
        .stdout(predicate::str::contains("AS runtime"))
        .stdout(predicate::str::contains("USER app"))
        .stdout(predicate::str::contains("HEALTHCHECK"))
        .stdout(predicate::str::contains("EXPOSE 8000"));
}

#[test]
fn render_follows_standard_strategy() {
    let tmp = python_project();
    std::fs::write(tmp.path().join("stowage.toml"), "[build]\nstrategy = \"standard\"\n").unwrap();

    stowage()
        .current_dir(tmp.path())
        .arg("render")
        .assert()
        .success()
        .stdout(predicate::str::contains("pip install"))
        .stdout(predicate::str::contains("uv pip install").not());
}

#[test]
fn plan_lists_both_stages() {
    let tmp = python_project();

    stowage()
        .current_dir(tmp.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("[builder] FROM"))
        .stdout(predicate::str::contains("[runtime] FROM"));
}

// ── Layers Command ──

fn layer_rows(dir: &Path) -> Vec<serde_json::Value> {
    let output = stowage()
        .current_dir(dir)
        .args(["layers", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn layers_json_changes_only_source_copy_on_source_edit() {
    let tmp = python_project();
    git(tmp.path(), &["init"]);
    let before = layer_rows(tmp.path());

    std::fs::write(tmp.path().join("main.py"), "app = 'changed'\n").unwrap();
    let after = layer_rows(tmp.path());

    assert_eq!(before.len(), after.len());
    let changed_fs: Vec<&serde_json::Value> = before
        .iter()
        .zip(&after)
        .filter(|(b, a)| b["key"] != a["key"] && a["filesystem"] == true)
        .map(|(_, a)| a)
        .collect();
    assert_eq!(changed_fs.len(), 1);
    assert_eq!(changed_fs[0]["stage"], "runtime");
    assert!(
        changed_fs[0]["instruction"]
            .as_str()
            .unwrap()
            .starts_with("COPY --chown=app:app . ")
    );
}

#[test]
fn layers_table_prints_context_size() {
    let tmp = python_project();
    git(tmp.path(), &["init"]);

    stowage()
        .current_dir(tmp.path())
        .arg("layers")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 file(s) in build context"));
}

#[test]
fn layers_ignores_files_git_ignores() {
    let tmp = python_project();
    git(tmp.path(), &["init"]);
    let before = layer_rows(tmp.path());

    std::fs::write(tmp.path().join(".gitignore"), "*.log\n").unwrap();
    git(tmp.path(), &["add", ".gitignore"]);
    let with_gitignore = layer_rows(tmp.path());
    std::fs::write(tmp.path().join("debug.log"), "noise\n").unwrap();
    let after = layer_rows(tmp.path());

    assert_ne!(before, with_gitignore);
    assert_eq!(with_gitignore, after);
}

// ── Eject Command ──

#[test]
fn eject_creates_dockerfile_in_stowage_dir() {
    let tmp = python_project();

    stowage()
        .current_dir(tmp.path())
        .arg("eject")
        .assert()
        .success()
        .stdout(predicate::str::contains("Ejected"));

    let dockerfile = std::fs::read_to_string(tmp.path().join(".stowage/Dockerfile")).unwrap();
    assert!(dockerfile.contains("AS runtime"));
}

#[test]
fn eject_fails_on_second_run() {
    let tmp = python_project();

    stowage().current_dir(tmp.path()).arg("eject").assert().success();
    stowage()
        .current_dir(tmp.path())
        .arg("eject")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already ejected"));
}

// ── Build Command ──

#[test]
fn build_fails_on_non_git_directory() {
    let tmp = python_project();

    stowage()
        .current_dir(tmp.path())
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("git"));
}

#[test]
fn build_dirty_repo_blocked_without_flag() {
    let tmp = python_project();
    let dir = tmp.path();
    commit_all(dir);

    // Make dirty
    std::fs::write(dir.join("main.py"), "app = 'dirty'\n").unwrap();

    stowage()
        .current_dir(dir)
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("uncommitted changes"));
}

#[test]
fn build_aborts_on_unsatisfiable_manifest_before_docker() {
    let tmp = python_project();
    std::fs::write(
        tmp.path().join("requirements.txt"),
        "pydantic>=2\npydantic<2\n",
    )
    .unwrap();

    stowage()
        .current_dir(tmp.path())
        .args(["build", "--allow-dirty"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsatisfiable"))
        .stdout(predicate::str::contains("Building").not());
    assert!(!tmp.path().join(".stowage-bundle").exists());
}

// ── Run Command ──

#[test]
fn run_fails_without_environment_prefix() {
    let tmp = python_project();

    stowage()
        .current_dir(tmp.path())
        .args(["run", "--prefix", ".venv-missing"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("environment prefix"));
}

#[cfg(unix)]
#[test]
fn run_propagates_early_exit_code() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = python_project();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    std::fs::write(
        tmp.path().join("stowage.toml"),
        format!("[runtime]\nhost = \"127.0.0.1\"\nport = {port}\n"),
    )
    .unwrap();
    let bin = tmp.path().join(".venv/bin");
    std::fs::create_dir_all(&bin).unwrap();
    std::fs::write(bin.join("uvicorn"), "#!/bin/sh\nexit 4\n").unwrap();
    std::fs::set_permissions(bin.join("uvicorn"), std::fs::Permissions::from_mode(0o755))
        .unwrap();

    stowage()
        .current_dir(tmp.path())
        .args(["run", "--prefix"])
        .arg(tmp.path().join(".venv"))
        .assert()
        .code(4)
        .stderr(predicate::str::contains("exited during startup"));
}

#[cfg(unix)]
#[test]
fn run_stops_server_on_sigterm_during_startup() {
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};

    let tmp = python_project();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    std::fs::write(
        tmp.path().join("stowage.toml"),
        format!("[runtime]\nhost = \"127.0.0.1\"\nport = {port}\n\n[health]\nstart_period_secs = 30\n"),
    )
    .unwrap();
    let bin = tmp.path().join(".venv/bin");
    std::fs::create_dir_all(&bin).unwrap();
    // Never binds; records its pid so the test can check it is gone.
    std::fs::write(
        bin.join("uvicorn"),
        "#!/bin/sh\necho $$ > server.pid\nexec sleep 30\n",
    )
    .unwrap();
    std::fs::set_permissions(bin.join("uvicorn"), std::fs::Permissions::from_mode(0o755))
        .unwrap();

    let mut cli = std::process::Command::new(env!("CARGO_BIN_EXE_stowage"))
        .current_dir(tmp.path())
        .args(["run", "--prefix"])
        .arg(tmp.path().join(".venv"))
        .stderr(std::process::Stdio::null())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let server_pid = loop {
        let pid = std::fs::read_to_string(tmp.path().join("server.pid")).unwrap_or_default();
        if let Ok(pid) = pid.trim().parse::<u32>() {
            break pid;
        }
        assert!(Instant::now() < deadline, "server never started");
        std::thread::sleep(Duration::from_millis(50));
    };

    let kill = |args: &str| {
        std::process::Command::new("sh")
            .args(["-c", &format!("kill {args}")])
            .status()
            .unwrap()
    };
    assert!(kill(&format!("-TERM {}", cli.id())).success());

    let status = loop {
        if let Some(status) = cli.try_wait().unwrap() {
            break status;
        }
        assert!(Instant::now() < deadline + Duration::from_secs(5), "stowage run did not stop");
        std::thread::sleep(Duration::from_millis(50));
    };
    assert_eq!(status.code(), Some(128 + 15));
    assert!(!kill(&format!("-0 {server_pid} 2>/dev/null")).success());
}

// ── Watch Command ──

#[test]
fn watch_exits_non_zero_when_service_is_down() {
    let tmp = python_project();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    std::fs::write(
        tmp.path().join("stowage.toml"),
        "[health]\ninterval_secs = 1\ntimeout_secs = 1\nstart_period_secs = 0\nretries = 1\n",
    )
    .unwrap();

    stowage()
        .current_dir(tmp.path())
        .args(["watch", "--url", &format!("http://127.0.0.1:{port}/health")])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .failure()
        .stdout(predicate::str::contains("unhealthy"))
        .stderr(predicate::str::contains("is unhealthy"));
}

#[cfg(unix)]
#[test]
fn watch_exits_cleanly_on_sigterm() {
    use std::io::{BufRead, BufReader};

    let tmp = python_project();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    std::fs::write(
        tmp.path().join("stowage.toml"),
        "[health]\ninterval_secs = 1\ntimeout_secs = 1\nstart_period_secs = 60\nretries = 3\n",
    )
    .unwrap();

    let mut watch = std::process::Command::new(env!("CARGO_BIN_EXE_stowage"))
        .current_dir(tmp.path())
        .args(["watch", "--url", &format!("http://127.0.0.1:{port}/health")])
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .spawn()
        .unwrap();

    // The banner is printed once the signal handlers are in place.
    let mut lines = BufReader::new(watch.stdout.take().unwrap()).lines();
    assert!(lines.next().unwrap().unwrap().starts_with("Watching"));
    // Let a few loop iterations pass before signalling.
    std::thread::sleep(std::time::Duration::from_millis(1500));

    let killed = std::process::Command::new("sh")
        .args(["-c", &format!("kill -TERM {}", watch.id())])
        .status()
        .unwrap();
    assert!(killed.success());
    assert_eq!(watch.wait().unwrap().code(), Some(0));
}
