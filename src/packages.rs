//! Package token parsing.
//!
//! Command line arguments are either npm package tokens (`name@version`,
//! passed through as-is) or Maven-style coordinates
//! (`groupId:artifactId:npmPackageName`) whose version comes from the
//! build's `official-build.props` file.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{InstallCiError, Result};

/// A package name and version as handed to the package manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageToken(String);

impl PackageToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PackageToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A `groupId:artifactId:npmPackageName` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coordinate {
    pub group_id: String,
    pub artifact_id: String,
    pub npm_name: String,
}

impl Coordinate {
    /// Parse a coordinate. The npm name may be scoped (`@scope/name`) but must
    /// not carry a version; a versioned argument is a package token instead.
    pub fn parse(arg: &str) -> Option<Self> {
        let mut parts = arg.split(':');
        let (group_id, artifact_id, npm_name) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        let plain = |part: &str| !part.is_empty() && !part.contains(['@', '/']);
        let unversioned = npm_name
            .strip_prefix('@')
            .unwrap_or(npm_name)
            .chars()
            .all(|c| c != '@');
        if !plain(group_id) || !plain(artifact_id) || npm_name.is_empty() || !unversioned {
            return None;
        }
        Some(Self {
            group_id: group_id.to_string(),
            artifact_id: artifact_id.to_string(),
            npm_name: npm_name.to_string(),
        })
    }

    /// Props keys that may hold this coordinate's version, most specific first.
    fn lookup_keys(&self) -> [String; 3] {
        [
            format!("{}:{}", self.group_id, self.artifact_id),
            format!("{}.{}.version", self.group_id, self.artifact_id),
            format!("{}.version", self.artifact_id),
        ]
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.npm_name)
    }
}

/// Key/value pairs from a properties file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildProps {
    entries: HashMap<String, String>,
}

impl BuildProps {
    /// Parse properties text: `key=value` or `key: value` per line,
    /// `#` and `!` start comments.
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
            .filter_map(|line| {
                // The first '=' wins; ':' only separates when no '=' is present
                // because group:artifact keys contain colons.
                let (key, value) = line.split_once('=').or_else(|| line.split_once(": "))?;
                Some((key.trim().to_string(), value.trim().to_string()))
            })
            .collect();
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            InstallCiError::props(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Ok(Self::parse(&content))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a coordinate to `npmPackageName@version`.
    pub fn resolve(&self, coordinate: &Coordinate) -> Result<PackageToken> {
        coordinate
            .lookup_keys()
            .iter()
            .find_map(|key| self.get(key).filter(|v| !v.is_empty()))
            .map(|version| PackageToken::new(format!("{}@{}", coordinate.npm_name, version)))
            .ok_or_else(|| {
                InstallCiError::props(format!("No version found for {}", coordinate))
            })
    }
}

/// Lazily loaded build props, read only if a coordinate needs them.
#[derive(Debug)]
pub struct PropsSource {
    path: PathBuf,
    loaded: Option<BuildProps>,
}

impl PropsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loaded: None,
        }
    }

    fn get(&mut self) -> Result<&BuildProps> {
        if self.loaded.is_none() {
            let props = BuildProps::load(&self.path)?;
            debug!("Loaded {} build props from {}", props.len(), self.path.display());
            self.loaded = Some(props);
        }
        self.loaded
            .as_ref()
            .ok_or_else(|| InstallCiError::props("build props unavailable"))
    }
}

impl From<BuildProps> for PropsSource {
    fn from(props: BuildProps) -> Self {
        Self {
            path: PathBuf::new(),
            loaded: Some(props),
        }
    }
}

/// Turn command line arguments into package tokens, in argument order.
///
/// Each argument may hold several whitespace-separated packages.
pub fn parse_package_args<I, S>(args: I, props: &mut PropsSource) -> Result<Vec<PackageToken>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tokens = Vec::new();
    for arg in args {
        for piece in arg.as_ref().split_whitespace() {
            let token = match Coordinate::parse(piece) {
                Some(coordinate) => {
                    let token = props.get()?.resolve(&coordinate)?;
                    debug!("Resolved {} to {}", coordinate, token);
                    token
                }
                None => PackageToken::new(piece),
            };
            tokens.push(token);
        }
    }
    Ok(tokens)
}
