//! Command-line interface definitions for debstrap.
//!
//! This module defines the CLI structure using the `clap` crate. It
//! provides a type-safe representation of the user's command-line input
//! that the bootstrap driver consumes: the suite to install, the target
//! directory, an optional mirror override, and the switches controlling
//! authentication, architecture, flavour, and verbosity.

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum, ValueHint};

use crate::frontend::Verbosity;

/// Default config and helper directory baked into the package.
pub const DEFAULT_CONFIGDIR: &str = "/usr/share/debstrap";

/// Maps the build architecture to its dpkg name.
pub fn default_arch() -> String {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "i386",
        "aarch64" => "arm64",
        "arm" => "armhf",
        "powerpc64" => "ppc64el",
        other => other,
    }
    .to_string()
}

/// Compatibility aliases for the flavour selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Variant {
    /// Alias for the `build` flavour.
    Buildd,
    /// Alias for the `standard` flavour.
    Fakechroot,
}

/// Bootstrap a minimal Debian-style system into a target directory.
#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    /// Ignore if packages can't be authenticated.
    #[arg(long)]
    pub allow_unauthenticated: bool,

    /// Set the target architecture.
    #[arg(short, long, default_value_t = default_arch())]
    pub arch: String,

    /// Set the config directory.
    #[arg(short, long, default_value = DEFAULT_CONFIGDIR, value_hint = ValueHint::DirPath)]
    pub configdir: Utf8PathBuf,

    /// Enable debug output.
    #[arg(long)]
    pub debug: bool,

    /// Download packages, but don't perform installation.
    #[arg(short = 'd', long)]
    pub download_only: bool,

    /// Drop packages from the installation list.
    #[arg(long, value_delimiter = ',', value_name = "A,B,C")]
    pub exclude: Vec<String>,

    /// Select the flavour to use.
    #[arg(short, long, default_value = "standard")]
    pub flavour: String,

    /// Enable support for a non-native arch (needs qemu-user-static).
    #[arg(long)]
    pub foreign: bool,

    /// Set the helper directory (defaults to the config directory).
    #[arg(short = 'H', long, value_hint = ValueHint::DirPath)]
    pub helperdir: Option<Utf8PathBuf>,

    /// Install extra packages.
    #[arg(long, value_delimiter = ',', value_name = "A,B,C")]
    pub include: Vec<String>,

    /// Use the given keyring (a path or a name in the keyring
    /// directories).
    #[arg(short, long)]
    pub keyring: Option<String>,

    /// Be quiet.
    #[arg(short, long, conflicts_with_all = ["verbose", "debug"])]
    pub quiet: bool,

    /// Override the suite config name.
    #[arg(long)]
    pub suite_config: Option<String>,

    /// Compatibility alias for the flavour (buildd, fakechroot).
    #[arg(long, value_enum, conflicts_with = "flavour")]
    pub variant: Option<Variant>,

    /// Be verbose.
    #[arg(short, long)]
    pub verbose: bool,

    /// Suite to install, as [ORIGIN/]CODENAME.
    #[arg(value_name = "[ORIGIN/]CODENAME")]
    pub suite: String,

    /// Target directory.
    #[arg(value_name = "TARGET", value_hint = ValueHint::DirPath)]
    pub target: Utf8PathBuf,

    /// Mirror URL, overriding the suites config.
    #[arg(value_name = "MIRROR")]
    pub mirror: Option<String>,
}

impl Cli {
    /// Verbosity selected by the `--quiet`/`--verbose`/`--debug` flags.
    pub fn verbosity(&self) -> Verbosity {
        if self.debug {
            Verbosity::Debug
        } else if self.verbose {
            Verbosity::Verbose
        } else if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        }
    }

    /// Flavour after applying the `--variant` aliases.
    pub fn effective_flavour(&self) -> &str {
        match self.variant {
            Some(Variant::Buildd) => "build",
            Some(Variant::Fakechroot) => "standard",
            None => &self.flavour,
        }
    }

    /// Splits the suite argument into origin and codename.
    pub fn origin_codename(&self) -> (String, String) {
        match self.suite.split_once('/') {
            Some((origin, codename)) => (origin.to_string(), codename.to_string()),
            None => ("Undefined".to_string(), self.suite.clone()),
        }
    }
}
