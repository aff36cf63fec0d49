//! Package-set selection.
//!
//! Two independent passes over the active suite produce the working sets
//! for installation:
//!
//! * the **essential** set: packages named by essential-flagged groups
//!   plus every package the index marks essential, closed under
//!   depends/pre-depends;
//! * the **edge** set: the outer boundary of what gets installed via apt,
//!   built from section and user include/exclude lists plus priority
//!   promotion, minus everything already reachable as a dependency of
//!   another candidate.
//!
//! The intermediate sets are ordered by package id, so repeated runs over
//! the same index return identical lists.

use std::collections::BTreeSet;

use tracing::debug;

use crate::frontend::Frontend;
use crate::packages::{PackageId, PackageIndex, Priority};
use crate::suite::config::SuiteConfig;

/// The working sets produced by selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuitePackages {
    pub essential_include: Vec<PackageId>,
    pub edge_include: Vec<PackageId>,
    pub edge_exclude: Vec<PackageId>,
}

/// Runs both selection passes over the active suite.
pub fn select(
    index: &PackageIndex,
    suite: &SuiteConfig,
    user_include: &[String],
    user_exclude: &[String],
    frontend: &Frontend,
) -> SuitePackages {
    let essential_include = select_essential(index, suite, frontend);
    let (edge_include, edge_exclude) =
        select_edge(index, suite, user_include, user_exclude, frontend);

    SuitePackages {
        essential_include,
        edge_include,
        edge_exclude,
    }
}

fn add_named(
    index: &PackageIndex,
    tree: &mut BTreeSet<PackageId>,
    name: &str,
    frontend: &Frontend,
) {
    match index.get(name) {
        Some(id) => {
            tree.insert(id);
        }
        None => frontend.progress_message(&format!("Can't find package {}", name)),
    }
}

fn select_essential(
    index: &PackageIndex,
    suite: &SuiteConfig,
    frontend: &Frontend,
) -> Vec<PackageId> {
    let mut seed = BTreeSet::new();

    for section in suite.sections.iter().filter(|s| s.activated) {
        for group in section.groups.iter().filter(|g| g.activated && g.essential) {
            for name in &group.packages {
                if name == "priority-required"
                    || name == "priority-important"
                    || name.starts_with('-')
                {
                    frontend.progress_message(&format!(
                        "Using special package {} in essential section is unsupported",
                        name
                    ));
                } else {
                    add_named(index, &mut seed, name, frontend);
                }
            }
        }
    }

    // Essential-flagged packages are installed no matter what the config
    // names.
    for id in index.ids() {
        if index.package(id).essential {
            seed.insert(id);
        }
    }

    let seeds: Vec<PackageId> = seed.into_iter().collect();
    index.resolve_dependencies(&seeds)
}

struct EdgeSelection {
    select_priority_required: bool,
    select_priority_important: bool,
    include: BTreeSet<PackageId>,
    exclude: BTreeSet<PackageId>,
}

impl EdgeSelection {
    /// A package belongs at the edge if it is outside the `libs` section
    /// and either essential-flagged or promoted by one of the priority
    /// tokens. The essential term widens the dependency shadow below.
    fn is_candidate(&self, index: &PackageIndex, id: PackageId) -> bool {
        let p = index.package(id);
        if p.section == "libs" {
            return false;
        }
        if p.essential {
            return true;
        }
        if self.select_priority_required && p.priority == Priority::Required {
            return true;
        }
        if self.select_priority_important && p.priority == Priority::Important {
            return true;
        }
        false
    }
}

fn select_edge(
    index: &PackageIndex,
    suite: &SuiteConfig,
    user_include: &[String],
    user_exclude: &[String],
    frontend: &Frontend,
) -> (Vec<PackageId>, Vec<PackageId>) {
    let mut sel = EdgeSelection {
        select_priority_required: false,
        select_priority_important: false,
        include: BTreeSet::new(),
        exclude: BTreeSet::new(),
    };

    for section in suite.sections.iter().filter(|s| s.activated) {
        for group in section.groups.iter().filter(|g| g.activated) {
            for name in &group.packages {
                if name == "priority-required" {
                    sel.select_priority_required = true;
                } else if name == "priority-important" {
                    sel.select_priority_important = true;
                } else if let Some(excluded) = name.strip_prefix('-') {
                    add_named(index, &mut sel.exclude, excluded, frontend);
                } else {
                    add_named(index, &mut sel.include, name, frontend);
                }
            }
        }
    }

    for name in user_include {
        add_named(index, &mut sel.include, name, frontend);
    }
    for name in user_exclude {
        add_named(index, &mut sel.exclude, name, frontend);
    }

    // Direct depends/pre-depends targets of every candidate: anything in
    // here will be pulled in by its reverse dependency and need not
    // appear at the edge.
    let mut dep = BTreeSet::new();
    for id in index.ids() {
        if sel.is_candidate(index, id) {
            for d in &index.package(id).depends {
                if d.dep_type.is_hard() {
                    dep.insert(d.target);
                }
            }
        }
    }

    for id in index.ids() {
        if sel.is_candidate(index, id) && !dep.contains(&id) && !sel.exclude.contains(&id) {
            debug!(package = %index.package(id).name, "include non-base edge package");
            sel.include.insert(id);
        }
    }

    // A package named in both lists ends up excluded, not included.
    let edge_include = sel.include.difference(&sel.exclude).copied().collect();
    let edge_exclude = sel.exclude.into_iter().collect();
    (edge_include, edge_exclude)
}
