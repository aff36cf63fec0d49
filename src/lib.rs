pub mod check;
pub mod cli;
pub mod control;
pub mod decompress;
pub mod download;
pub mod driver;
pub mod error;
pub mod exec;
pub mod extract;
pub mod foreign;
pub mod frontend;
pub mod gpg;
pub mod install;
pub mod isolation;
pub mod mirror;
pub mod packages;
pub mod release;
pub mod suite;
pub mod target;

pub use error::DebstrapError;

use anyhow::{Context, Result};
use tracing_subscriber::{FmtSubscriber, filter::LevelFilter};

use crate::frontend::Verbosity;

/// Initializes the diagnostic subscriber.
///
/// Diagnostics go to stderr so user-facing frontend messages keep stdout
/// to themselves.
pub fn init_logging(verbosity: Verbosity) -> Result<()> {
    let filter = match verbosity {
        Verbosity::Quiet => LevelFilter::ERROR,
        Verbosity::Normal => LevelFilter::WARN,
        Verbosity::Verbose => LevelFilter::INFO,
        Verbosity::Debug => LevelFilter::DEBUG,
    };

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(filter)
            .with_writer(std::io::stderr)
            .finish(),
    )
    .context("failed to set global default tracing subscriber")
}

/// Builds driver options from parsed command-line arguments.
pub fn options_from_cli(cli: &cli::Cli) -> driver::Options {
    let (origin, codename) = cli.origin_codename();
    driver::Options {
        origin,
        codename,
        target: cli.target.clone(),
        mirror: cli.mirror.clone(),
        arch: cli.arch.clone(),
        flavour: cli.effective_flavour().to_string(),
        configdir: cli.configdir.clone(),
        helperdir: cli.helperdir.clone(),
        keyring: cli.keyring.clone(),
        include: cli.include.clone(),
        exclude: cli.exclude.clone(),
        suite_config: cli.suite_config.clone(),
        authenticated: !cli.allow_unauthenticated,
        download_only: cli.download_only,
        foreign: cli.foreign,
    }
}
