//! Build context sourced from the CI environment.
//!
//! `RE_BUILD_TYPE` and `VERSION` are read exactly once at the process boundary
//! and then passed around as a plain value.

use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;

use strum::EnumString;

/// Environment variable carrying the build type classifier.
pub const BUILD_TYPE_VAR: &str = "RE_BUILD_TYPE";

/// Environment variable carrying this build's version.
pub const VERSION_VAR: &str = "VERSION";

/// Build type classifier.
#[derive(Debug, Clone, PartialEq, Eq, EnumString)]
pub enum BuildType {
    /// Continuous (feature/branch) build, the only kind that installs snapshots
    #[strum(serialize = "continuous")]
    Continuous,
    /// Any other build type (release, nightly, ...)
    #[strum(default)]
    Other(String),
}

/// The values describing the current CI run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildContext {
    pub build_type: Option<BuildType>,
    pub version: Option<String>,
}

impl BuildContext {
    pub fn new(build_type: Option<BuildType>, version: Option<String>) -> Self {
        Self {
            build_type,
            version,
        }
    }

    /// Read the context from the process environment.
    ///
    /// Values that are not valid UTF-8 are converted lossily, so an odd
    /// `RE_BUILD_TYPE` still closes the gate.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env_lossy(std::env::var_os(key)))
    }

    /// Read the context through an arbitrary lookup function.
    ///
    /// An empty `RE_BUILD_TYPE` counts as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let build_type = lookup(BUILD_TYPE_VAR)
            .filter(|value| !value.is_empty())
            .map(|value| match BuildType::from_str(&value) {
                Ok(build_type) => build_type,
                Err(_) => BuildType::Other(value),
            });

        Self {
            build_type,
            version: lookup(VERSION_VAR),
        }
    }

    /// Whether snapshot installs should happen for this build.
    pub fn should_install(&self) -> bool {
        matches!(self.build_type, None | Some(BuildType::Continuous))
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

fn env_lossy(value: Option<OsString>) -> Option<String> {
    value.map(|value| value.to_string_lossy().into_owned())
}

impl BuildType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Continuous => "continuous",
            Self::Other(value) => value,
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let build_type = self
            .build_type
            .as_ref()
            .map_or_else(|| "<unset>".to_string(), ToString::to_string);
        write!(
            f,
            "{}={} {}={}",
            BUILD_TYPE_VAR,
            build_type,
            VERSION_VAR,
            self.version.as_deref().unwrap_or("<unset>")
        )
    }
}
