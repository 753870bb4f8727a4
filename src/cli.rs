use clap::Parser;
use std::path::PathBuf;

use crate::config::SettingsOverrides;

/// install-ci - install feature-build npm packages from the snapshot registry
///
/// Each package is first installed with this build's feature affix
/// (taken from $VERSION, e.g. 3.1.4-new-feature-SNAPSHOT) and, if that
/// version does not exist, with the version given on the command line.
/// Nothing happens unless $RE_BUILD_TYPE is unset or "continuous".
#[derive(Parser, Debug)]
#[command(name = "install-ci")]
#[command(about = "Install npm packages from the snapshot registry for the current CI build")]
#[command(version)]
pub struct Cli {
    /// Packages as name@version, or groupId:artifactId:npmPackageName to take
    /// the version from the build props file
    #[arg(value_name = "PACKAGE")]
    pub packages: Vec<String>,

    /// Registry to use while installing
    #[arg(long, env = "INSTALL_CI_REGISTRY")]
    pub registry: Option<String>,

    /// npm executable
    #[arg(long, env = "INSTALL_CI_NPM")]
    pub npm: Option<String>,

    /// Properties file used to resolve groupId:artifactId:npmPackageName packages
    #[arg(long, env = "INSTALL_CI_BUILD_PROPS")]
    pub build_props: Option<PathBuf>,

    /// JSON settings file
    #[arg(long, env = "INSTALL_CI_CONFIG")]
    pub config: Option<PathBuf>,

    /// Extra argument passed to every `npm install` (repeatable)
    #[arg(long = "install-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub install_args: Vec<String>,

    /// Keep installing the remaining packages after one fails
    #[arg(long)]
    pub keep_going: bool,

    /// Dry-run mode: show which npm commands would run without changing anything.
    ///
    /// The current registry is still read so the preview is realistic.
    #[arg(long)]
    pub dry_run: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Settings values given on the command line.
    pub fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            registry: self.registry.clone(),
            npm: self.npm.clone(),
            install_args: self.install_args.clone(),
            build_props: self.build_props.clone(),
            keep_going: self.keep_going,
            dry_run: self.dry_run,
        }
    }

    /// Default log filter for the requested verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "install_ci=info",
            1 => "install_ci=debug",
            _ => "install_ci=trace",
        }
    }
}
