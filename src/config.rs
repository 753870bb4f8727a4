//! Settings for an install-ci run.
//!
//! Layering, lowest precedence first: built-in defaults, an optional JSON
//! settings file, then command line flags (which clap also fills from
//! `INSTALL_CI_*` environment variables).

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{InstallCiError, Result};

/// Snapshot registry hosting feature-build packages.
pub const DEFAULT_SNAPSHOT_REGISTRY: &str =
    "https://svsartifactory.swinfra.net/artifactory/api/npm/saas-npm-dev-local";

/// Properties file mapping Maven coordinates to versions.
pub const DEFAULT_BUILD_PROPS: &str = "official-build.props";

/// What to do once a package fails both its feature and fallback install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop at the first package that cannot be installed
    #[default]
    Abort,
    /// Install every package, then report all failures
    KeepGoing,
}

/// Resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Registry used for the duration of the install loop
    pub registry: String,
    /// npm executable
    pub npm: String,
    /// Extra arguments for every `npm install`
    pub install_args: Vec<String>,
    /// Build props file used to resolve coordinates
    pub build_props: PathBuf,
    pub failure_policy: FailurePolicy,
    pub dry_run: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            registry: DEFAULT_SNAPSHOT_REGISTRY.to_string(),
            npm: "npm".to_string(),
            install_args: Vec::new(),
            build_props: PathBuf::from(DEFAULT_BUILD_PROPS),
            failure_policy: FailurePolicy::Abort,
            dry_run: false,
        }
    }
}

/// Command line values that override the settings file when present.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub registry: Option<String>,
    pub npm: Option<String>,
    pub install_args: Vec<String>,
    pub build_props: Option<PathBuf>,
    pub keep_going: bool,
    pub dry_run: bool,
}

impl Settings {
    /// Load settings from a JSON file. Missing keys take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            InstallCiError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let settings: Self = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Apply command line overrides on top of these settings.
    pub fn with_overrides(mut self, overrides: SettingsOverrides) -> Self {
        if let Some(registry) = overrides.registry {
            self.registry = registry;
        }
        if let Some(npm) = overrides.npm {
            self.npm = npm;
        }
        if !overrides.install_args.is_empty() {
            self.install_args = overrides.install_args;
        }
        if let Some(build_props) = overrides.build_props {
            self.build_props = build_props;
        }
        if overrides.keep_going {
            self.failure_policy = FailurePolicy::KeepGoing;
        }
        // Flags can only switch dry-run on
        self.dry_run |= overrides.dry_run;
        self
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        let registry = self.registry.trim();
        if registry.is_empty() {
            return Err(InstallCiError::config("Registry URL must not be empty"));
        }
        if !(registry.starts_with("https://") || registry.starts_with("http://")) {
            return Err(InstallCiError::config(format!(
                "Registry URL must be http(s): {}",
                registry
            )));
        }
        if self.npm.trim().is_empty() {
            return Err(InstallCiError::config("npm program must not be empty"));
        }
        Ok(())
    }
}
