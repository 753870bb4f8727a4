//! Error handling module for install-ci
//!
//! Provides centralized error handling with proper error types using thiserror.
//! A token that does not match the feature pattern is not an error: the
//! resolver degrades to the identity instead, so there is no variant for it.

use thiserror::Error;

/// Main error type for install-ci
#[derive(Error, Debug)]
pub enum InstallCiError {
    /// IO errors (reading settings or build props)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Build props lookup errors (unknown coordinate, missing props file)
    #[error("Build props error: {0}")]
    Props(String),

    /// Registry configuration could not be read or changed
    #[error("Registry error: {0}")]
    Registry(String),

    /// The package manager could not be started at all
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The package manager ran and reported a failed install. Its own
    /// diagnostics already went to stderr.
    #[error(
        "Install of {token} failed (exit code {exit})",
        exit = .code.map_or_else(|| "none".to_string(), |c| c.to_string())
    )]
    Install { token: String, code: Option<i32> },

    /// A signal arrived; no further package manager commands are started
    #[error("Interrupted, not starting {program}")]
    Interrupted { program: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for install-ci operations
pub type Result<T> = std::result::Result<T, InstallCiError>;

// Convenient error constructors
impl InstallCiError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a build props error
    pub fn props(msg: impl Into<String>) -> Self {
        Self::Props(msg.into())
    }

    /// Create a registry error
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    /// Create an install error
    pub fn install(token: impl Into<String>, code: Option<i32>) -> Self {
        Self::Install {
            token: token.into(),
            code,
        }
    }

    /// Process exit code for this error.
    ///
    /// An install failure exits with npm's own code; a signal-killed npm (no
    /// code) or any other failure maps to 1, configuration problems to 2.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Install { code: Some(code), .. } if *code != 0 => *code,
            Self::Config(_) | Self::Json(_) => 2,
            _ => 1,
        }
    }
}
