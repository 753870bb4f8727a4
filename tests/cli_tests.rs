//! End-to-end tests for the install-ci binary
//!
//! A fake `npm` shell script stands in for the package manager. It logs every
//! invocation to `calls.log`, keeps the registry setting in a `registry` file
//! and only installs tokens listed in `available`. With a `hang` file present,
//! installs touch `installing` and then sleep.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const DEFAULT_REGISTRY: &str =
    "https://svsartifactory.swinfra.net/artifactory/api/npm/saas-npm-dev-local";
const PUBLIC: &str = "https://registry.npmjs.org/";

const FAKE_NPM: &str = r#"#!/bin/sh
DIR="$(dirname "$0")"
echo "$*" >> "$DIR/calls.log"
case "$1 $2" in
  "config get")
    if [ -f "$DIR/registry" ]; then cat "$DIR/registry"; else echo undefined; fi ;;
  "config set")
    printf '%s\n' "$4" > "$DIR/registry" ;;
  "config delete")
    rm -f "$DIR/registry" ;;
  install*)
    if [ -f "$DIR/hang" ]; then touch "$DIR/installing"; sleep 30; fi
    if grep -qxF "$2" "$DIR/available" 2>/dev/null; then
      echo "npm WARN deprecated $2" >&2
      exit 0
    fi
    echo "npm ERR! 404 Not Found - $2" >&2
    if [ -f "$DIR/exit_code" ]; then exit "$(cat "$DIR/exit_code")"; fi
    exit 1 ;;
esac
"#;

struct FakeNpm {
    dir: TempDir,
}

impl FakeNpm {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let program = dir.path().join("npm");
        fs::write(&program, FAKE_NPM).expect("write fake npm");
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).expect("chmod");
        fs::write(dir.path().join("registry"), format!("{PUBLIC}\n")).expect("registry");
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn program(&self) -> PathBuf {
        self.path().join("npm")
    }

    fn available(&self, tokens: &[&str]) {
        let mut content = tokens.join("\n");
        content.push('\n');
        fs::write(self.path().join("available"), content).expect("available");
    }

    fn exit_code(&self, code: i32) {
        fs::write(self.path().join("exit_code"), code.to_string()).expect("exit_code");
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.path().join("calls.log"))
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn registry(&self) -> Option<String> {
        fs::read_to_string(self.path().join("registry"))
            .ok()
            .map(|r| r.trim().to_string())
    }

    /// install-ci wired to this fake, with a clean CI environment
    fn command(&self) -> Command {
        Command::from_std(self.std_command())
    }

    fn std_command(&self) -> StdCommand {
        let mut cmd = StdCommand::new(assert_cmd::cargo::cargo_bin("install-ci"));
        cmd.arg("--npm")
            .arg(self.program())
            .current_dir(self.path())
            .env_remove("RE_BUILD_TYPE")
            .env_remove("VERSION")
            .env_remove("INSTALL_CI_REGISTRY")
            .env_remove("INSTALL_CI_NPM")
            .env_remove("INSTALL_CI_BUILD_PROPS")
            .env_remove("INSTALL_CI_CONFIG")
            .env_remove("RUST_LOG");
        cmd
    }
}

#[test]
fn test_feature_package_installed_from_snapshot_registry() {
    let npm = FakeNpm::new();
    npm.available(&["@ux-aspects/ux-aspects@1.8.8-new-feature-SNAPSHOT"]);

    npm.command()
        .env("VERSION", "3.1.4-new-feature-SNAPSHOT")
        .arg("@ux-aspects/ux-aspects@1.8.8-SNAPSHOT")
        .assert()
        .success();

    assert_eq!(
        npm.calls(),
        vec![
            "config get registry".to_string(),
            format!("config set registry {DEFAULT_REGISTRY}"),
            "install @ux-aspects/ux-aspects@1.8.8-new-feature-SNAPSHOT".to_string(),
            format!("config set registry {PUBLIC}"),
        ]
    );
    assert_eq!(npm.registry().as_deref(), Some(PUBLIC));
}

#[test]
fn test_fallback_when_feature_package_missing() {
    let npm = FakeNpm::new();
    npm.available(&["@ux-aspects/ux-aspects@1.8.8-SNAPSHOT"]);

    npm.command()
        .env("RE_BUILD_TYPE", "continuous")
        .env("VERSION", "3.1.4-new-feature-SNAPSHOT")
        .arg("@ux-aspects/ux-aspects@1.8.8-SNAPSHOT")
        .assert()
        .success();

    let installs: Vec<String> = npm
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("install "))
        .collect();
    assert_eq!(
        installs,
        vec![
            "install @ux-aspects/ux-aspects@1.8.8-new-feature-SNAPSHOT",
            "install @ux-aspects/ux-aspects@1.8.8-SNAPSHOT",
        ]
    );
}

#[test]
fn test_unrecoverable_failure_exits_with_npm_code_and_restores_registry() {
    let npm = FakeNpm::new();
    npm.exit_code(42);

    npm.command()
        .env("VERSION", "3.1.4-new-feature-SNAPSHOT")
        .args(["a@1.0.0-SNAPSHOT", "b@1.0.0-SNAPSHOT"])
        .assert()
        .code(42)
        .stderr(predicate::str::contains("a@1.0.0-SNAPSHOT"));

    let calls = npm.calls();
    assert!(!calls.iter().any(|c| c.contains("b@1.0.0")));
    assert_eq!(calls.last().map(String::as_str), Some(&*format!("config set registry {PUBLIC}")));
    assert_eq!(npm.registry().as_deref(), Some(PUBLIC));
}

#[test]
fn test_keep_going_installs_remaining_packages() {
    let npm = FakeNpm::new();
    npm.available(&["b@1.0.0-SNAPSHOT"]);

    npm.command()
        .env("VERSION", "3.1.4-new-feature-SNAPSHOT")
        .args(["--keep-going", "a@1.0.0-SNAPSHOT", "b@1.0.0-SNAPSHOT"])
        .assert()
        .code(1);

    assert!(npm.calls().contains(&"install b@1.0.0-SNAPSHOT".to_string()));
    assert_eq!(npm.registry().as_deref(), Some(PUBLIC));
}

#[test]
fn test_npm_warnings_reach_ci_log_on_success() {
    let npm = FakeNpm::new();
    npm.available(&["a@1.0.0"]);

    npm.command()
        .arg("a@1.0.0")
        .assert()
        .success()
        .stderr(predicate::str::contains("npm WARN deprecated a@1.0.0"));
}

#[test]
fn test_release_build_does_nothing() {
    let npm = FakeNpm::new();

    npm.command()
        .env("RE_BUILD_TYPE", "release")
        .env("VERSION", "3.1.4-new-feature-SNAPSHOT")
        .arg("a@1.0.0-SNAPSHOT")
        .assert()
        .success();

    assert!(npm.calls().is_empty());
}

#[test]
fn test_unset_registry_is_deleted_afterwards() {
    let npm = FakeNpm::new();
    fs::remove_file(npm.path().join("registry")).unwrap();
    npm.available(&["a@1.0.0"]);

    npm.command().arg("a@1.0.0").assert().success();

    assert_eq!(npm.calls().last().map(String::as_str), Some("config delete registry"));
    assert_eq!(npm.registry(), None);
}

#[test]
fn test_dry_run_only_reads_registry() {
    let npm = FakeNpm::new();

    npm.command()
        .env("VERSION", "3.1.4-new-feature-SNAPSHOT")
        .args(["--dry-run", "a@1.0.0-SNAPSHOT"])
        .assert()
        .success()
        .stderr(predicate::str::contains("[dry-run]"));

    assert_eq!(npm.calls(), vec!["config get registry"]);
}

#[test]
fn test_coordinates_use_build_props() {
    let npm = FakeNpm::new();
    fs::write(
        npm.path().join("official-build.props"),
        "com.example.ux:ux-aspects=1.8.8-SNAPSHOT\n",
    )
    .unwrap();
    npm.available(&["@ux-aspects/ux-aspects@1.8.8-SNAPSHOT"]);

    npm.command()
        .arg("com.example.ux:ux-aspects:@ux-aspects/ux-aspects")
        .assert()
        .success();

    assert!(npm
        .calls()
        .contains(&"install @ux-aspects/ux-aspects@1.8.8-SNAPSHOT".to_string()));
}

#[test]
fn test_unknown_coordinate_fails_before_touching_registry() {
    let npm = FakeNpm::new();

    npm.command()
        .arg("com.example:missing:missing")
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing"));

    assert!(npm.calls().is_empty());
}

#[test]
fn test_invalid_registry_is_usage_error() {
    let npm = FakeNpm::new();

    npm.command()
        .args(["--registry", "ftp://example.test", "a@1.0.0"])
        .assert()
        .code(2);

    assert!(npm.calls().is_empty());
}

/// Poll `condition` every 50ms until it holds or `timeout` passes.
fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

#[test]
fn test_sigterm_during_install_restores_registry() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let npm = FakeNpm::new();
    fs::write(npm.path().join("hang"), "").unwrap();

    let mut child = npm
        .std_command()
        .env("VERSION", "3.1.4-new-feature-SNAPSHOT")
        .args(["a@1.0.0-SNAPSHOT", "b@1.0.0-SNAPSHOT"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn install-ci");

    let installing = npm.path().join("installing");
    assert!(
        wait_until(Duration::from_secs(10), || installing.exists()),
        "install never started"
    );
    assert_eq!(npm.registry().as_deref(), Some(DEFAULT_REGISTRY));

    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();

    let mut status = None;
    let exited = wait_until(Duration::from_secs(15), || {
        status = child.try_wait().unwrap();
        status.is_some()
    });
    if !exited {
        let _ = child.kill();
        panic!("install-ci did not exit after SIGTERM");
    }

    assert_eq!(status.and_then(|s| s.code()), Some(143));
    assert_eq!(npm.registry().as_deref(), Some(PUBLIC));

    let calls = npm.calls();
    assert_eq!(
        calls.last().map(String::as_str),
        Some(&*format!("config set registry {PUBLIC}"))
    );
    // Neither the fallback nor the next package started after the signal
    assert_eq!(calls.iter().filter(|c| c.starts_with("install ")).count(), 1);
}
