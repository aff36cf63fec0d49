//! The action interpreter.
//!
//! Actions run in the order the suite config declares them; entries not
//! activated for the requested flavour are skipped, unknown names get a
//! warning, and the first failing handler aborts the whole sequence.
//!
//! For the essential stages, the `What:` field narrows the package list:
//! a priority name sets a floor, `essential` restricts to
//! essential-flagged packages (including ones already installed), and any
//! other name selects that package, alone with the `only` flag or with
//! its dependency closure without it.

use camino::Utf8Path;
use tracing::debug;

use crate::error::DebstrapError;
use crate::install::{self, InstallCtx};
use crate::packages::{PackageId, PackageIndex, Priority};
use crate::suite::config::{Action, SuiteConfig};
use crate::suite::select::SuitePackages;

/// Resolves the package list for an essential unpack/install stage.
fn essential_selection(
    index: &PackageIndex,
    essential_include: &[PackageId],
    what: Option<&str>,
    only: bool,
) -> Vec<PackageId> {
    match what.filter(|w| !w.is_empty()) {
        None => install::list_priority(index, essential_include, Some(Priority::Extra), false),
        Some(what) => {
            if let Ok(priority) = what.parse::<Priority>() {
                install::list_priority(index, essential_include, Some(priority), false)
            } else if what == "essential" {
                install::list_priority(index, essential_include, None, true)
            } else if only {
                install::list_package_only(index, what)
            } else {
                install::list_package(index, what)
            }
        }
    }
}

fn what_of(action: &Action) -> Result<&str, DebstrapError> {
    action
        .what
        .as_deref()
        .filter(|w| !w.is_empty())
        .ok_or_else(|| {
            DebstrapError::Config(format!("action {} requires a What field", action.action))
        })
}

fn dispatch(
    action: &Action,
    sets: &SuitePackages,
    ctx: &mut InstallCtx,
    helperdir: &Utf8Path,
) -> Result<(), DebstrapError> {
    let what = action.what.as_deref();
    let force = action.flags.force;
    let only = action.flags.only;

    match action.action.to_ascii_lowercase().as_str() {
        "essential-extract" => {
            let list = install::list_priority(ctx.index, &sets.essential_include, None, false);
            install::extract_packages(ctx.index, &list, ctx.target, ctx.frontend)
        }
        "essential-unpack" => {
            let list = essential_selection(ctx.index, &sets.essential_include, what, only);
            install::dpkg_unpack(ctx, &list)
        }
        "essential-install" => {
            let list = essential_selection(ctx.index, &sets.essential_include, what, only);
            install::dpkg_install(ctx, &list, force)
        }
        "essential-configure" => install::dpkg_configure(ctx, force),
        "install" => install::apt_install(ctx, &sets.edge_include, &sets.edge_exclude),
        "helper-install" => install::helper_install(ctx, helperdir, what_of(action)?),
        "helper-remove" => install::helper_remove(ctx, what_of(action)?),
        "mount" => {
            ctx.frontend
                .warning(&format!("mount action is not supported: {:?}", what));
            Ok(())
        }
        other => {
            ctx.frontend.warning(&format!("Unknown action: {}", other));
            Ok(())
        }
    }
}

/// Runs the activated actions of the suite in declared order.
pub fn run_actions(
    suite: &SuiteConfig,
    sets: &SuitePackages,
    ctx: &mut InstallCtx,
    helperdir: &Utf8Path,
) -> Result<(), DebstrapError> {
    for action in &suite.actions {
        if !action.activated {
            continue;
        }
        debug!(
            action = action.action,
            what = ?action.what,
            force = action.flags.force,
            only = action.flags.only,
            "call action"
        );
        dispatch(action, sets, ctx, helperdir)?;
    }
    Ok(())
}
