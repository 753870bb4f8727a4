//! Install orchestration
//!
//! Runs the snapshot install for one CI build:
//!
//! 1. Skip everything unless the build is a continuous build (or unclassified).
//! 2. Point npm at the snapshot registry for the whole loop.
//! 3. For each package, in order, try the feature-build version first and
//!    fall back to the requested version exactly once.
//! 4. Put the previous registry back, whatever happened.

use std::fmt;

use tracing::{error, info, warn};

use crate::config::{FailurePolicy, Settings};
use crate::context::{BuildContext, BuildType};
use crate::error::{InstallCiError, Result};
use crate::npm::PackageManager;
use crate::packages::PackageToken;
use crate::registry::SnapshotRegistry;
use crate::resolver::resolve_feature_token;

/// How one requested package ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOutcome {
    /// The feature-build version was installed
    Feature {
        requested: PackageToken,
        installed: PackageToken,
    },
    /// The feature-build version was unavailable; the requested one was installed
    Fallback {
        requested: PackageToken,
        attempted: PackageToken,
    },
    /// No feature version applies; the requested version was installed
    Requested { requested: PackageToken },
    /// Neither version could be installed
    Failed {
        requested: PackageToken,
        reason: String,
    },
}

impl PackageOutcome {
    pub fn requested(&self) -> &PackageToken {
        match self {
            Self::Feature { requested, .. }
            | Self::Fallback { requested, .. }
            | Self::Requested { requested }
            | Self::Failed { requested, .. } => requested,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for PackageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Feature { installed, .. } => write!(f, "{} (feature build)", installed),
            Self::Fallback {
                requested,
                attempted,
            } => write!(f, "{} ({} unavailable)", requested, attempted),
            Self::Requested { requested } => write!(f, "{}", requested),
            Self::Failed { requested, reason } => write!(f, "{} FAILED: {}", requested, reason),
        }
    }
}

/// Per-package outcomes of a run, in argument order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub outcomes: Vec<PackageOutcome>,
}

impl InstallReport {
    pub fn installed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_failure()).count()
    }

    pub fn fallbacks(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, PackageOutcome::Fallback { .. }))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &PackageOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }
}

/// Terminal state of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The build type excludes snapshot installs; nothing was done
    Skipped { build_type: BuildType },
    Completed(InstallReport),
}

/// Installs packages for one CI build.
pub struct Installer<P: PackageManager> {
    context: BuildContext,
    settings: Settings,
    pm: P,
}

impl<P: PackageManager> Installer<P> {
    pub fn new(context: BuildContext, settings: Settings, pm: P) -> Self {
        Self {
            context,
            settings,
            pm,
        }
    }

    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    pub fn package_manager(&self) -> &P {
        &self.pm
    }

    pub fn into_package_manager(self) -> P {
        self.pm
    }

    /// Install `packages` from the snapshot registry.
    ///
    /// Returns the first unrecoverable install failure under
    /// `FailurePolicy::Abort`, or the last one under `FailurePolicy::KeepGoing`.
    /// The registry is restored before returning in every case.
    pub fn run(&mut self, packages: &[PackageToken]) -> Result<RunOutcome> {
        if !self.context.should_install() {
            // should_install() only rejects a set, non-continuous build type
            let build_type = self
                .context
                .build_type
                .clone()
                .unwrap_or(BuildType::Continuous);
            info!("Build type is {}, skipping snapshot installs", build_type);
            return Ok(RunOutcome::Skipped { build_type });
        }

        info!(
            "Installing {} package(s) from {} ({})",
            packages.len(),
            self.settings.registry,
            self.context
        );

        let mut scope = SnapshotRegistry::acquire(&mut self.pm, &self.settings.registry)?;
        let result = install_all(
            scope.package_manager(),
            packages,
            self.context.version(),
            self.settings.failure_policy,
        );
        let restored = scope.restore();

        let report = match (result, restored) {
            (Ok(report), Ok(())) => report,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), restored) => {
                if let Err(restore_err) = restored {
                    error!("Failed to restore npm registry: {}", restore_err);
                }
                return Err(e);
            }
        };

        info!(
            "Installed {} package(s), {} via fallback",
            report.installed(),
            report.fallbacks()
        );
        Ok(RunOutcome::Completed(report))
    }
}

/// The install loop proper. Runs inside the registry scope.
fn install_all<P: PackageManager + ?Sized>(
    pm: &mut P,
    packages: &[PackageToken],
    version: Option<&str>,
    policy: FailurePolicy,
) -> Result<InstallReport> {
    let mut report = InstallReport::default();
    let mut last_error = None;

    for package in packages {
        match install_one(pm, package, version) {
            Ok(outcome) => report.outcomes.push(outcome),
            Err(e) if policy == FailurePolicy::KeepGoing => {
                error!("Could not install {}: {}", package, e);
                report.outcomes.push(PackageOutcome::Failed {
                    requested: package.clone(),
                    reason: e.to_string(),
                });
                last_error = Some(e);
            }
            Err(e) => {
                error!("Could not install {}, aborting: {}", package, e);
                return Err(e);
            }
        }
    }

    match last_error {
        Some(e) => {
            let failed: Vec<String> = report.failures().map(|o| o.requested().to_string()).collect();
            error!(
                "{} of {} package(s) failed: {}",
                failed.len(),
                packages.len(),
                failed.join(", ")
            );
            Err(e)
        }
        None => Ok(report),
    }
}

/// Install one package: feature version first, then the requested version.
///
/// The fallback runs once after any failed first attempt, including when no
/// affix applies and both attempts use the same token.
fn install_one<P: PackageManager + ?Sized>(
    pm: &mut P,
    requested: &PackageToken,
    version: Option<&str>,
) -> Result<PackageOutcome> {
    let feature = PackageToken::new(resolve_feature_token(requested.as_str(), version));
    let same = feature == *requested;

    match pm.install(&feature) {
        Ok(()) if same => Ok(PackageOutcome::Requested {
            requested: requested.clone(),
        }),
        Ok(()) => Ok(PackageOutcome::Feature {
            requested: requested.clone(),
            installed: feature,
        }),
        Err(e) => {
            if same {
                warn!(
                    "Install of {} failed ({}), retrying once",
                    requested,
                    short_reason(&e)
                );
            } else {
                warn!(
                    "Feature package {} not installed ({}), falling back to {}",
                    feature,
                    short_reason(&e),
                    requested
                );
            }
            pm.install(requested)?;
            Ok(if same {
                PackageOutcome::Requested {
                    requested: requested.clone(),
                }
            } else {
                PackageOutcome::Fallback {
                    requested: requested.clone(),
                    attempted: feature,
                }
            })
        }
    }
}

fn short_reason(e: &InstallCiError) -> String {
    match e {
        InstallCiError::Install { code, .. } => match code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        },
        other => other.to_string(),
    }
}
