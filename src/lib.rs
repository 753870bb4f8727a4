//! install-ci library
//!
//! Installs npm packages from a snapshot registry during CI, preferring the
//! version built on the same feature branch as the current build.

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod npm;
pub mod orchestrator;
pub mod packages;
pub mod process_guard;
pub mod registry;
pub mod resolver;

// Re-export main types for convenience
pub use config::{FailurePolicy, Settings, SettingsOverrides, DEFAULT_SNAPSHOT_REGISTRY};
pub use context::{BuildContext, BuildType};
pub use error::{InstallCiError, Result};
pub use npm::{NpmCli, PackageManager};
pub use orchestrator::{InstallReport, Installer, PackageOutcome, RunOutcome};
pub use packages::{parse_package_args, BuildProps, Coordinate, PackageToken, PropsSource};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use registry::SnapshotRegistry;
pub use resolver::{feature_affix, resolve_feature_token};
