//! Suite handling: configuration, rule matching, package-set selection,
//! and the action interpreter.
//!
//! The `suites` rule file is consulted twice. At startup the rules rewrite
//! the user-supplied origin/codename and provide the default keyring and
//! mirror; after the Release file has been fetched and verified, the rules
//! are matched again against the archive's own origin/codename to pick the
//! config directory that drives the rest of the bootstrap.

pub mod action;
pub mod config;
pub mod select;

pub use config::{SuiteConfig, SuitesConfig};

use camino::Utf8Path;
use tracing::debug;

use crate::error::DebstrapError;

/// Outcome of the startup rule scan.
#[derive(Debug, Clone)]
pub struct InitialSelection {
    pub origin: String,
    pub codename: String,
    pub keyring: Option<String>,
    pub mirror: Option<String>,
}

/// Scans the rules in order against the user-supplied origin/codename.
///
/// Every matching rule may rewrite the origin and codename, and later
/// rules match against the rewritten pair. The keyring and mirror come
/// from the last matching rule.
pub fn initial_selection(
    suites: &SuitesConfig,
    origin: &str,
    codename: &str,
) -> InitialSelection {
    let mut origin = origin.to_string();
    let mut codename = codename.to_string();
    let mut last_match: Option<&config::SuitesEntry> = None;

    debug!(origin, codename, "searching initial suites rule");

    for entry in &suites.entries {
        if !entry.matches(&origin, &codename) {
            continue;
        }
        last_match = Some(entry);

        if let Some(set) = &entry.origin_set {
            debug!(from = origin, to = set, "overriding origin");
            origin = set.clone();
        }
        if let Some(set) = &entry.codename_set {
            debug!(from = codename, to = set, "overriding codename");
            codename = set.clone();
        }
    }

    match last_match {
        Some(entry) => {
            debug!(
                keyring = entry.keyring.as_deref(),
                mirror = entry.mirror.as_deref(),
                "found initial suites rule"
            );
            InitialSelection {
                origin,
                codename,
                keyring: entry.keyring.clone(),
                mirror: entry.mirror.clone(),
            }
        }
        None => {
            debug!("no matching suites rule");
            InitialSelection {
                origin,
                codename,
                keyring: None,
                mirror: None,
            }
        }
    }
}

/// Picks and loads the suite config after the Release fetch.
///
/// An explicit override name wins outright; otherwise the last rule
/// matching the archive's origin/codename provides the config name, and
/// `generic` is the fallback.
pub fn select_config(
    suites: &SuitesConfig,
    configdir: &Utf8Path,
    origin: &str,
    codename: &str,
    override_name: Option<&str>,
) -> Result<SuiteConfig, DebstrapError> {
    if let Some(name) = override_name {
        debug!(name, "suite config overridden");
        return SuiteConfig::read(configdir, name);
    }

    let selected = suites
        .entries
        .iter()
        .filter(|entry| entry.matches(origin, codename))
        .last();

    let name = match selected.and_then(|entry| entry.config.as_deref()) {
        Some(name) => {
            debug!(name, "suites rule specifies config");
            name
        }
        None => {
            debug!("no config from suites rules, using generic");
            "generic"
        }
    };

    SuiteConfig::read(configdir, name)
}
