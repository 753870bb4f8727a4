//! install-ci - main entry point

use anyhow::Context;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use install_ci::cli::Cli;
use install_ci::process_guard::{self, ProcessGuard};
use install_ci::{
    parse_package_args, BuildContext, InstallCiError, Installer, NpmCli, PropsSource, RunOutcome,
    Settings,
};

/// Initialize logging; `RUST_LOG` overrides the verbosity flags.
fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.log_filter());

    // npm children are terminated and the registry restored on SIGINT/SIGTERM
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    let guard = ProcessGuard::new();
    let code = match run(&cli) {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            e.downcast_ref::<InstallCiError>()
                .map_or(1, InstallCiError::exit_code)
        }
    };

    // The signal thread restores the registry and exits with 128+signal
    process_guard::await_signal_exit();

    // process::exit skips destructors
    drop(guard);
    std::process::exit(code);
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let context = BuildContext::from_env();
    debug!("Build context: {}", context);

    let settings = match &cli.config {
        Some(path) => Settings::load_from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    }
    .with_overrides(cli.overrides());
    settings.validate()?;

    // Coordinates are only resolved when something will be installed
    let packages = if context.should_install() {
        let mut props = PropsSource::new(&settings.build_props);
        parse_package_args(&cli.packages, &mut props)?
    } else {
        Vec::new()
    };

    let npm = NpmCli::from_settings(&settings);
    let mut installer = Installer::new(context, settings, npm);

    match installer.run(&packages)? {
        RunOutcome::Skipped { build_type } => {
            info!("Nothing to do for {} builds", build_type);
        }
        RunOutcome::Completed(report) => {
            for outcome in &report.outcomes {
                info!("  {}", outcome);
            }
        }
    }

    Ok(())
}
