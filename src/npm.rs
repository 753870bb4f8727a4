//! Package manager access.
//!
//! `PackageManager` is the seam between the install loop and the external
//! package manager. `NpmCli` is the production implementation and is the only
//! place that spawns npm. It follows the same execution rules as every other
//! child process here:
//!
//! - npm runs in its own process group via `.in_new_process_group()`
//! - its PID is registered with `ChildRegistry::global()` while it runs
//! - a non-zero exit becomes `InstallCiError::Install` (for installs) or
//!   `InstallCiError::Registry` (for config changes)

use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{InstallCiError, Result};
use crate::packages::PackageToken;
use crate::process_guard::{ChildRegistry, CommandProcessGroup, RestoreHook};

/// Operations the install loop needs from a package manager.
pub trait PackageManager {
    /// Current registry, `None` when nothing is configured.
    fn registry(&mut self) -> Result<Option<String>>;

    fn set_registry(&mut self, url: &str) -> Result<()>;

    /// Remove the registry setting so the package manager default applies.
    fn delete_registry(&mut self) -> Result<()>;

    fn install(&mut self, token: &PackageToken) -> Result<()>;

    /// A self-contained action that puts `prior` back, runnable from a signal
    /// handler thread while `self` is busy. `None` if unsupported.
    fn restore_hook(&self, _prior: Option<String>) -> Option<RestoreHook> {
        None
    }
}

/// Captured result of one npm invocation.
#[derive(Debug, Clone)]
struct NpmOutput {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
    success: bool,
}

/// `PackageManager` backed by the npm command line.
#[derive(Debug, Clone)]
pub struct NpmCli {
    program: String,
    install_args: Vec<String>,
    dry_run: bool,
}

impl NpmCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            install_args: Vec::new(),
            dry_run: false,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            program: settings.npm.clone(),
            install_args: settings.install_args.clone(),
            dry_run: settings.dry_run,
        }
    }

    /// Extra arguments appended to every `npm install`.
    pub fn with_install_args(mut self, args: Vec<String>) -> Self {
        self.install_args = args;
        self
    }

    /// Log mutating commands instead of running them. Reads still execute so
    /// the preview shows the real prior registry.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run npm and wait for it. `capture` is off for installs so npm's
    /// progress and warnings go straight to the CI log; config commands are
    /// captured so their output can be parsed or reported.
    fn run(&self, args: &[&str], capture: bool) -> Result<NpmOutput> {
        info!("Running: {} {}", self.program, args.join(" "));

        let stdio = || if capture { Stdio::piped() } else { Stdio::inherit() };
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(stdio())
            .stderr(stdio())
            .in_new_process_group();

        let spawned = ChildRegistry::lock_global()
            .spawn_tracked(&mut cmd)
            .map_err(|source| InstallCiError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let Some(child) = spawned else {
            return Err(InstallCiError::Interrupted {
                program: self.program.clone(),
            });
        };
        let pid = child.id();

        let waited = child.wait_with_output();
        ChildRegistry::lock_global().unregister(pid);

        let output = waited?;
        let result = NpmOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            success: output.status.success(),
        };

        debug!(
            "{} exited with {:?}",
            self.program,
            result.exit_code
        );
        Ok(result)
    }

    /// Run a registry-changing config command.
    fn run_config(&self, args: &[&str]) -> Result<()> {
        if self.dry_run {
            info!("[dry-run] would run: {} {}", self.program, args.join(" "));
            return Ok(());
        }

        let output = self.run(args, true)?;
        if output.success {
            Ok(())
        } else {
            Err(InstallCiError::registry(format!(
                "`{} {}` failed (exit code {}): {}",
                self.program,
                args.join(" "),
                output.exit_code.unwrap_or(-1),
                output.stderr.trim()
            )))
        }
    }
}

impl Default for NpmCli {
    fn default() -> Self {
        Self::new("npm")
    }
}

/// npm prints `undefined` (older releases) or nothing for an unset key.
fn parse_registry_value(stdout: &str) -> Option<String> {
    let value = stdout.trim();
    if value.is_empty() || value == "undefined" || value == "null" {
        None
    } else {
        Some(value.to_string())
    }
}

impl PackageManager for NpmCli {
    fn registry(&mut self) -> Result<Option<String>> {
        let output = self.run(&["config", "get", "registry"], true)?;
        if !output.success {
            return Err(InstallCiError::registry(format!(
                "Failed to read registry (exit code {}): {}",
                output.exit_code.unwrap_or(-1),
                output.stderr.trim()
            )));
        }
        Ok(parse_registry_value(&output.stdout))
    }

    fn set_registry(&mut self, url: &str) -> Result<()> {
        self.run_config(&["config", "set", "registry", url])
    }

    fn delete_registry(&mut self) -> Result<()> {
        self.run_config(&["config", "delete", "registry"])
    }

    fn install(&mut self, token: &PackageToken) -> Result<()> {
        let mut args = vec!["install", token.as_str()];
        args.extend(self.install_args.iter().map(String::as_str));

        if self.dry_run {
            info!("[dry-run] would run: {} {}", self.program, args.join(" "));
            return Ok(());
        }

        let output = self.run(&args, false)?;
        if output.success {
            info!("Installed {}", token);
            Ok(())
        } else {
            Err(InstallCiError::install(token.as_str(), output.exit_code))
        }
    }

    fn restore_hook(&self, prior: Option<String>) -> Option<RestoreHook> {
        if self.dry_run {
            return None;
        }
        let program = self.program.clone();
        Some(Box::new(move || {
            let mut cmd = Command::new(&program);
            match &prior {
                Some(url) => cmd.args(["config", "set", "registry", url.as_str()]),
                None => cmd.args(["config", "delete", "registry"]),
            };
            match cmd.stdin(Stdio::null()).stdout(Stdio::null()).status() {
                Ok(status) if status.success() => {}
                Ok(status) => warn!("Registry restore exited with {}", status),
                Err(e) => warn!("Registry restore could not run {}: {}", program, e),
            }
        }))
    }
}
