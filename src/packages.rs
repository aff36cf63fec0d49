//! Package index model.
//!
//! The index is a flat table of package records plus a name lookup map;
//! dependency references are `PackageId`s into the same table, resolved in
//! a second pass after all records are known. Installation status is a
//! monotone counter that only ever moves forward, driven by the dpkg
//! status stream while subprocesses run.

use std::collections::{HashMap, HashSet};

use camino::Utf8Path;
use strum::{Display, EnumString};

use crate::control;
use crate::error::DebstrapError;

/// Index of a package within its [`PackageIndex`].
pub type PackageId = u32;

/// Package priority, ordered from least to most important.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    Extra,
    Optional,
    Standard,
    Important,
    Required,
}

/// Installation status, ordered by how far along a package is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumString,
)]
pub enum Status {
    #[strum(serialize = "not-installed")]
    NotInstalled,
    #[strum(serialize = "unpacked")]
    Unpacked,
    #[strum(serialize = "installed")]
    Installed,
}

/// Dependency relationship kind. Only depends and pre-depends take part
/// in closure resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepType {
    PreDepends,
    Depends,
    Recommends,
}

impl DepType {
    /// Whether this relation is followed by the dependency resolver.
    pub fn is_hard(self) -> bool {
        matches!(self, DepType::PreDepends | DepType::Depends)
    }
}

/// A resolved dependency edge within the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub dep_type: DepType,
    pub target: PackageId,
}

/// One binary package record from the Packages index.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub architecture: String,
    pub size: u64,
    /// Path relative to the mirror base.
    pub filename: String,
    pub sha256: String,
    pub priority: Priority,
    pub essential: bool,
    pub section: String,
    pub depends: Vec<Dependency>,
    pub status: Status,
}

impl Package {
    /// Basename of [`Package::filename`], used as the cache file name.
    pub fn local_filename(&self) -> &str {
        self.filename
            .rsplit_once('/')
            .map_or(self.filename.as_str(), |(_, base)| base)
    }
}

/// Flat package table with name lookup.
#[derive(Debug)]
pub struct PackageIndex {
    packages: Vec<Package>,
    by_name: HashMap<String, PackageId>,
}

impl PackageIndex {
    pub fn read_file(path: &Utf8Path) -> Result<Self, DebstrapError> {
        let text =
            std::fs::read_to_string(path).map_err(|e| DebstrapError::io(path.to_string(), e))?;
        Self::parse(&text)
    }

    /// Parses a Packages index. An index without a single package record
    /// is a parse error, never a silently empty set.
    pub fn parse(text: &str) -> Result<Self, DebstrapError> {
        let paragraphs = control::parse_str("Packages", text)?;
        if paragraphs.is_empty() {
            return Err(DebstrapError::parse("Packages", "empty index"));
        }

        let mut packages = Vec::with_capacity(paragraphs.len());
        let mut by_name = HashMap::with_capacity(paragraphs.len());
        let mut raw_depends = Vec::with_capacity(paragraphs.len());

        for paragraph in &paragraphs {
            let Some(name) = paragraph.field("Package") else {
                return Err(DebstrapError::parse(
                    "Packages",
                    "package record without a Package field",
                ));
            };

            let priority = paragraph
                .field("Priority")
                .map(|p| {
                    p.parse::<Priority>().map_err(|_| {
                        DebstrapError::parse("Packages", format!("unknown priority {:?}", p))
                    })
                })
                .transpose()?
                .unwrap_or(Priority::Optional);

            let size = paragraph
                .field("Size")
                .unwrap_or("0")
                .parse::<u64>()
                .map_err(|_| DebstrapError::parse("Packages", format!("bad Size for {}", name)))?;

            let id = packages.len() as PackageId;
            by_name.insert(name.to_string(), id);
            raw_depends.push([
                (DepType::PreDepends, paragraph.field("Pre-Depends").map(str::to_string)),
                (DepType::Depends, paragraph.field("Depends").map(str::to_string)),
                (DepType::Recommends, paragraph.field("Recommends").map(str::to_string)),
            ]);
            packages.push(Package {
                name: name.to_string(),
                version: paragraph.field("Version").unwrap_or_default().to_string(),
                architecture: paragraph
                    .field("Architecture")
                    .unwrap_or_default()
                    .to_string(),
                size,
                filename: paragraph.field("Filename").unwrap_or_default().to_string(),
                sha256: paragraph.field("SHA256").unwrap_or_default().to_string(),
                priority,
                essential: paragraph
                    .field("Essential")
                    .is_some_and(|v| v.eq_ignore_ascii_case("yes")),
                section: paragraph.field("Section").unwrap_or_default().to_string(),
                depends: Vec::new(),
                status: Status::NotInstalled,
            });
        }

        // Second pass: rewrite dependency names to ids over the now
        // complete table. The first resolvable alternative of each entry
        // wins; entries naming nothing in the index are dropped.
        for (id, fields) in raw_depends.into_iter().enumerate() {
            let mut resolved = Vec::new();
            for (dep_type, value) in fields {
                let Some(value) = value else { continue };
                for entry in value.split(',') {
                    if let Some(target) = resolve_alternatives(entry, &by_name) {
                        resolved.push(Dependency { dep_type, target });
                    }
                }
            }
            packages[id].depends = resolved;
        }

        Ok(Self { packages, by_name })
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<PackageId> {
        self.by_name.get(name).copied()
    }

    pub fn package(&self, id: PackageId) -> &Package {
        &self.packages[id as usize]
    }

    pub fn ids(&self) -> impl Iterator<Item = PackageId> + '_ {
        0..self.packages.len() as PackageId
    }

    /// Raises the status of a package. Transitions only ever increase;
    /// a regression is ignored. Returns true if the status changed.
    pub fn advance_status(&mut self, id: PackageId, status: Status) -> bool {
        let package = &mut self.packages[id as usize];
        if package.status < status {
            tracing::debug!(package = %package.name, %status, "status advance");
            package.status = status;
            true
        } else {
            false
        }
    }

    /// Computes the closure of `seeds` under depends/pre-depends.
    ///
    /// Output order is the seed order followed by discovery order, with
    /// every package appearing at most once.
    pub fn resolve_dependencies(&self, seeds: &[PackageId]) -> Vec<PackageId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for &seed in seeds {
            if seen.insert(seed) {
                out.push(seed);
            }
        }

        let mut i = 0;
        while i < out.len() {
            for dep in &self.package(out[i]).depends {
                if dep.dep_type.is_hard() && seen.insert(dep.target) {
                    out.push(dep.target);
                }
            }
            i += 1;
        }
        out
    }
}

/// Picks the first alternative of a dependency entry that names a package
/// in the index, stripping version constraints and arch qualifiers.
fn resolve_alternatives(entry: &str, by_name: &HashMap<String, PackageId>) -> Option<PackageId> {
    entry
        .split('|')
        .filter_map(|alt| dependency_name(alt))
        .find_map(|name| by_name.get(name).copied())
}

/// Extracts the bare package name from one dependency alternative, e.g.
/// `libc6:any (>= 2.36)` becomes `libc6`.
fn dependency_name(alt: &str) -> Option<&str> {
    let name = alt
        .trim()
        .split([' ', '\t', '('])
        .next()?
        .split(':')
        .next()?;
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = "\
Package: base-files
Version: 12.4
Architecture: amd64
Essential: yes
Priority: required
Section: admin
Depends: libc6 (>= 2.36)
Size: 70048
Filename: pool/main/b/base-files/base-files_12.4_amd64.deb
SHA256: aaaa

Package: libc6
Version: 2.36-9
Architecture: amd64
Priority: required
Section: libs
Size: 2700000
Filename: pool/main/g/glibc/libc6_2.36-9_amd64.deb
SHA256: bbbb

Package: coreutils
Version: 9.1-1
Architecture: amd64
Essential: yes
Priority: required
Section: utils
Pre-Depends: libc6 (>= 2.36) | libc6.1
Size: 2800000
Filename: pool/main/c/coreutils/coreutils_9.1-1_amd64.deb
SHA256: cccc
";

    #[test]
    fn test_parse_index() {
        let index = PackageIndex::parse(INDEX).unwrap();
        assert_eq!(index.len(), 3);

        let base = index.package(index.get("base-files").unwrap());
        assert!(base.essential);
        assert_eq!(base.priority, Priority::Required);
        assert_eq!(base.section, "admin");
        assert_eq!(base.local_filename(), "base-files_12.4_amd64.deb");

        let libc = index.get("libc6").unwrap();
        assert_eq!(base.depends, vec![Dependency { dep_type: DepType::Depends, target: libc }]);

        let coreutils = index.package(index.get("coreutils").unwrap());
        assert_eq!(
            coreutils.depends,
            vec![Dependency { dep_type: DepType::PreDepends, target: libc }]
        );
    }

    #[test]
    fn test_empty_index_is_error() {
        assert!(PackageIndex::parse("").is_err());
        assert!(PackageIndex::parse("\n\n").is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Extra < Priority::Optional);
        assert!(Priority::Important < Priority::Required);
        assert_eq!("required".parse::<Priority>().unwrap(), Priority::Required);
        assert!("unknown".parse::<Priority>().is_err());
    }

    #[test]
    fn test_status_is_monotone() {
        let mut index = PackageIndex::parse(INDEX).unwrap();
        let id = index.get("libc6").unwrap();

        assert!(index.advance_status(id, Status::Unpacked));
        assert!(index.advance_status(id, Status::Installed));
        // Regression attempts are ignored.
        assert!(!index.advance_status(id, Status::Unpacked));
        assert_eq!(index.package(id).status, Status::Installed);
    }

    #[test]
    fn test_status_parse_from_dpkg_text() {
        assert_eq!("unpacked".parse::<Status>().unwrap(), Status::Unpacked);
        assert_eq!("installed".parse::<Status>().unwrap(), Status::Installed);
        assert!("half-configured".parse::<Status>().is_err());
    }

    #[test]
    fn test_resolve_dependencies_closure_order() {
        let index = PackageIndex::parse(INDEX).unwrap();
        let base = index.get("base-files").unwrap();
        let libc = index.get("libc6").unwrap();

        // Seeds first, discovered dependencies after, no duplicates.
        assert_eq!(index.resolve_dependencies(&[base]), vec![base, libc]);
        assert_eq!(index.resolve_dependencies(&[base, libc]), vec![base, libc]);
    }

    #[test]
    fn test_dependency_name_stripping() {
        assert_eq!(dependency_name(" libc6 (>= 2.36) "), Some("libc6"));
        assert_eq!(dependency_name("libc6:any"), Some("libc6"));
        assert_eq!(dependency_name(""), None);
    }
}
