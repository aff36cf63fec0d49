//! Suite configuration files.
//!
//! A config directory holds one `suites` rule file plus one directory per
//! named config containing `action`, `sections`, and `packages` files,
//! all in RFC-822 paragraph syntax. The rule file maps an origin/codename
//! pair to a config name, keyring, and mirror; the per-config files
//! define the ordered action list and the per-section package groups.

use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::control::{self, Paragraph, split_list};
use crate::error::DebstrapError;

/// One rule from the `suites` file.
#[derive(Debug, Clone, Default)]
pub struct SuitesEntry {
    pub codename_match: Option<String>,
    pub origin_match: Option<String>,
    pub codename_set: Option<String>,
    pub origin_set: Option<String>,
    pub config: Option<String>,
    pub keyring: Option<String>,
    pub mirror: Option<String>,
}

impl SuitesEntry {
    /// Case-insensitive rule match; an absent match field matches
    /// anything.
    pub fn matches(&self, origin: &str, codename: &str) -> bool {
        self.origin_match
            .as_deref()
            .is_none_or(|m| m.eq_ignore_ascii_case(origin))
            && self
                .codename_match
                .as_deref()
                .is_none_or(|m| m.eq_ignore_ascii_case(codename))
    }
}

/// The ordered rule list from `<configdir>/suites`.
#[derive(Debug, Clone, Default)]
pub struct SuitesConfig {
    pub entries: Vec<SuitesEntry>,
}

impl SuitesConfig {
    pub fn read(configdir: &Utf8Path) -> Result<Self, DebstrapError> {
        let path = configdir.join("suites");
        debug!(%path, "reading suites config");
        let paragraphs = control::read_file("suites", &path)?;

        let entries = paragraphs
            .iter()
            .map(|p| SuitesEntry {
                codename_match: p.field("Match-Codename").map(str::to_string),
                origin_match: p.field("Match-Origin").map(str::to_string),
                codename_set: p.field("Set-Codename").map(str::to_string),
                origin_set: p.field("Set-Origin").map(str::to_string),
                config: p.field("Config").map(str::to_string),
                keyring: p.field("Keyring").map(str::to_string),
                mirror: p.field("Mirror").map(str::to_string),
            })
            .collect();

        Ok(Self { entries })
    }
}

/// `force`/`only` modifiers of an action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionFlags {
    pub force: bool,
    pub only: bool,
}

/// One entry of the ordered action list.
#[derive(Debug, Clone)]
pub struct Action {
    pub action: String,
    pub what: Option<String>,
    pub flags: ActionFlags,
    /// Flavours this action applies to; empty means all.
    pub flavours: Vec<String>,
    /// Set during activation.
    pub activated: bool,
}

/// A package group inside a section.
#[derive(Debug, Clone)]
pub struct PackageGroup {
    /// Architectures this group applies to; empty means all, `any`
    /// matches everything.
    pub arch: Vec<String>,
    pub essential: bool,
    pub packages: Vec<String>,
    /// Set during activation.
    pub activated: bool,
}

/// A named section with its flavour filter and package groups.
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    /// Flavours this section applies to; empty means all.
    pub flavours: Vec<String>,
    pub groups: Vec<PackageGroup>,
    /// Set during activation.
    pub activated: bool,
}

/// A fully parsed per-suite configuration.
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    pub name: String,
    pub actions: Vec<Action>,
    pub sections: Vec<Section>,
    section_index: HashMap<String, usize>,
    /// True iff at least one section claims the requested flavour.
    /// Derived during [`SuiteConfig::activate`].
    pub flavour_valid: bool,
}

impl SuiteConfig {
    /// Reads `<dir>/action`, `<dir>/sections`, and `<dir>/packages`.
    ///
    /// A `name` containing `/` is used as a literal directory; otherwise
    /// it names a subdirectory of `configdir`.
    pub fn read(configdir: &Utf8Path, name: &str) -> Result<Self, DebstrapError> {
        let dir = if name.contains('/') {
            Utf8PathBuf::from(name)
        } else {
            configdir.join(name)
        };
        debug!(%dir, "reading suite config");

        let mut config = Self {
            name: name.to_string(),
            actions: Vec::new(),
            sections: Vec::new(),
            section_index: HashMap::new(),
            flavour_valid: false,
        };

        for paragraph in control::read_file("action", &dir.join("action"))? {
            config.add_action(&paragraph);
        }
        for paragraph in control::read_file("sections", &dir.join("sections"))? {
            config.add_section(&paragraph);
        }
        for paragraph in control::read_file("packages", &dir.join("packages"))? {
            config.add_package_group(&paragraph);
        }

        Ok(config)
    }

    fn add_action(&mut self, paragraph: &Paragraph) {
        // A paragraph without an Action field (e.g. a lone Comment) is
        // skipped.
        let Some(action) = paragraph.field("Action") else {
            return;
        };

        let mut flags = ActionFlags::default();
        for flag in split_list(paragraph.field("Flags").unwrap_or_default()) {
            if flag.eq_ignore_ascii_case("force") {
                flags.force = true;
            } else if flag.eq_ignore_ascii_case("only") {
                flags.only = true;
            }
        }

        self.actions.push(Action {
            action: action.to_string(),
            what: paragraph.field("What").map(str::to_string),
            flags,
            flavours: split_list(paragraph.field("Flavour").unwrap_or_default()),
            activated: false,
        });
    }

    fn add_section(&mut self, paragraph: &Paragraph) {
        let Some(name) = paragraph.field("Section") else {
            return;
        };
        self.section_index
            .insert(name.to_string(), self.sections.len());
        self.sections.push(Section {
            name: name.to_string(),
            flavours: split_list(paragraph.field("Flavour").unwrap_or_default()),
            groups: Vec::new(),
            activated: false,
        });
    }

    fn add_package_group(&mut self, paragraph: &Paragraph) {
        let mut essential = false;
        for flag in split_list(paragraph.field("Flags").unwrap_or_default()) {
            if flag.eq_ignore_ascii_case("essential") {
                essential = true;
            }
        }

        let group = PackageGroup {
            arch: split_list(paragraph.field("Arch").unwrap_or_default()),
            essential,
            packages: split_list(paragraph.field("Packages").unwrap_or_default()),
            activated: false,
        };

        let section = paragraph.field("Section").unwrap_or_default();
        match self.section_index.get(section) {
            Some(&i) => self.sections[i].groups.push(group),
            None => warn!(section, "package group references unknown config section"),
        }
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.section_index.get(name).map(|&i| &self.sections[i])
    }

    /// Marks actions, sections, and package groups as activated for the
    /// requested flavour and architecture, and derives `flavour_valid`.
    pub fn activate(&mut self, flavour: &str, arch: &str) {
        for action in &mut self.actions {
            action.activated = action.flavours.is_empty()
                || action
                    .flavours
                    .iter()
                    .any(|f| f.eq_ignore_ascii_case(flavour));
        }

        for section in &mut self.sections {
            if section.flavours.is_empty() {
                section.activated = true;
            } else if section
                .flavours
                .iter()
                .any(|f| f.eq_ignore_ascii_case(flavour))
            {
                section.activated = true;
                self.flavour_valid = true;
            }

            if !section.activated {
                continue;
            }
            for group in &mut section.groups {
                group.activated = group.arch.is_empty()
                    || group.arch.iter().any(|a| {
                        a.eq_ignore_ascii_case("any") || a.eq_ignore_ascii_case(arch)
                    });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(dir: &Utf8Path, name: &str, action: &str, sections: &str, packages: &str) {
        let config_dir = dir.join(name);
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("action"), action).unwrap();
        fs::write(config_dir.join("sections"), sections).unwrap();
        fs::write(config_dir.join("packages"), packages).unwrap();
    }

    fn tempdir_path(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_read_suites_rules() {
        let dir = tempfile::tempdir().unwrap();
        let root = tempdir_path(&dir);
        fs::write(
            root.join("suites"),
            "\
Match-Origin: Debian
Keyring: debian-archive-keyring.gpg
Mirror: http://deb.debian.org/debian

Match-Codename: sid
Set-Codename: unstable
Config: debian
",
        )
        .unwrap();

        let suites = SuitesConfig::read(&root).unwrap();
        assert_eq!(suites.entries.len(), 2);
        assert!(suites.entries[0].matches("debian", "bookworm"));
        assert!(!suites.entries[1].matches("Debian", "bookworm"));
        assert!(suites.entries[1].matches("Debian", "SID"));
        assert_eq!(suites.entries[1].codename_set.as_deref(), Some("unstable"));
    }

    #[test]
    fn test_read_suite_config() {
        let dir = tempfile::tempdir().unwrap();
        let root = tempdir_path(&dir);
        write_config(
            &root,
            "debian",
            "\
Action: essential-extract
Comment: first wave, no dpkg yet

Action: essential-install
What: essential
Flags: force, only
Flavour: standard build
",
            "\
Section: base
Flavour: standard

Section: edge
Flavour: standard build
",
            "\
Section: base
Flags: essential
Packages: base-files base-passwd

Section: edge
Arch: amd64, any
Packages: priority-required

Section: nonexistent
Packages: dropped
",
        );

        let mut config = SuiteConfig::read(&root, "debian").unwrap();
        assert_eq!(config.actions.len(), 2);
        assert_eq!(config.actions[0].action, "essential-extract");
        assert!(config.actions[0].flavours.is_empty());
        assert_eq!(config.actions[1].what.as_deref(), Some("essential"));
        assert_eq!(
            config.actions[1].flags,
            ActionFlags { force: true, only: true }
        );

        assert_eq!(config.sections.len(), 2);
        let base = config.section("base").unwrap();
        assert_eq!(base.groups.len(), 1);
        assert!(base.groups[0].essential);
        assert_eq!(base.groups[0].packages, ["base-files", "base-passwd"]);

        config.activate("standard", "amd64");
        assert!(config.flavour_valid);
        assert!(config.actions.iter().all(|a| a.activated));
        assert!(config.sections.iter().all(|s| s.activated));
        assert!(config.section("edge").unwrap().groups[0].activated);
    }

    #[test]
    fn test_activation_filters_flavour_and_arch() {
        let dir = tempfile::tempdir().unwrap();
        let root = tempdir_path(&dir);
        write_config(
            &root,
            "debian",
            "Action: install\nFlavour: build\n",
            "Section: base\nFlavour: build\n",
            "Section: base\nArch: riscv64\nPackages: gcc\n",
        );

        let mut config = SuiteConfig::read(&root, "debian").unwrap();
        config.activate("standard", "amd64");
        assert!(!config.flavour_valid);
        assert!(!config.actions[0].activated);
        assert!(!config.sections[0].activated);

        let mut config = SuiteConfig::read(&root, "debian").unwrap();
        config.activate("build", "amd64");
        assert!(config.flavour_valid);
        assert!(config.sections[0].activated);
        // Section active, group filtered out by architecture.
        assert!(!config.sections[0].groups[0].activated);
    }

    #[test]
    fn test_sections_without_flavour_do_not_validate() {
        let dir = tempfile::tempdir().unwrap();
        let root = tempdir_path(&dir);
        write_config(
            &root,
            "generic",
            "Action: install\n",
            "Section: base\n",
            "Section: base\nPackages: base-files\n",
        );

        let mut config = SuiteConfig::read(&root, "generic").unwrap();
        config.activate("standard", "amd64");
        // The section activates, but claims no flavour at all.
        assert!(config.sections[0].activated);
        assert!(!config.flavour_valid);
    }
}
