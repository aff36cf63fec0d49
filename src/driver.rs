//! The bootstrap driver.
//!
//! Orchestrates the whole pipeline: target checks, suites-rule matching,
//! keyring and mirror setup, Release fetch and verification, suite
//! selection, Packages fetch, package-set selection, `.deb` downloads,
//! and finally the chrooted action sequence followed by the `/etc`
//! finish files. Any fatal condition propagates as an error to `main`,
//! which reports it and exits non-zero.

use std::fs;
use std::io::Write;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use nix::sys::statvfs::{FsFlags, statvfs};
use tracing::debug;

use crate::download::Download;
use crate::error::DebstrapError;
use crate::foreign::ForeignQemu;
use crate::frontend::Frontend;
use crate::gpg;
use crate::install::InstallCtx;
use crate::isolation;
use crate::mirror::Mirror;
use crate::suite::{self, SuitesConfig, select};
use crate::target::{CACHE_DIR, TargetRoot};

/// Everything the driver needs, assembled from the CLI.
#[derive(Debug, Clone)]
pub struct Options {
    pub origin: String,
    pub codename: String,
    pub target: Utf8PathBuf,
    pub mirror: Option<String>,
    pub arch: String,
    pub flavour: String,
    pub configdir: Utf8PathBuf,
    pub helperdir: Option<Utf8PathBuf>,
    pub keyring: Option<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub suite_config: Option<String>,
    pub authenticated: bool,
    pub download_only: bool,
    pub foreign: bool,
}

fn check_permission(download_only: bool) -> Result<(), DebstrapError> {
    if !download_only && !nix::unistd::getuid().is_root() {
        return Err(DebstrapError::Config("Need root privileges".to_string()));
    }
    Ok(())
}

/// Validates the target directory, creating it when missing, and returns
/// its canonical root.
fn check_target(target: &Utf8Path, download_only: bool) -> Result<TargetRoot, DebstrapError> {
    match fs::metadata(target) {
        Ok(meta) if !meta.is_dir() => {
            return Err(DebstrapError::Config(
                "Target exists but is no directory".to_string(),
            ));
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::create_dir(target)
                .map_err(|e| DebstrapError::io("Failed to create target", e))?;
        }
        Err(e) => return Err(DebstrapError::io("Target check failed", e)),
    }

    let flags = statvfs(target.as_std_path())
        .map_err(|e| DebstrapError::Config(format!("Target check failed: {}", e)))?
        .flags();
    if flags.contains(FsFlags::ST_RDONLY) {
        return Err(DebstrapError::Config("Target is readonly".to_string()));
    }
    if !download_only {
        if flags.contains(FsFlags::ST_NODEV) {
            return Err(DebstrapError::Config(
                "Target disallows device special files".to_string(),
            ));
        }
        if flags.contains(FsFlags::ST_NOEXEC) {
            return Err(DebstrapError::Config(
                "Target disallows program execution".to_string(),
            ));
        }
    }

    let canonical = fs::canonicalize(target)
        .map_err(|e| DebstrapError::io("Target check failed", e))?;
    let canonical = Utf8PathBuf::from_path_buf(canonical)
        .map_err(|p| DebstrapError::Config(format!("target path is not UTF-8: {:?}", p)))?;
    Ok(TargetRoot::new(canonical))
}

/// Resolves the keyring path or fails closed in authenticated mode.
fn setup_keyring(
    opts: &Options,
    suites_keyring: Option<&str>,
    frontend: &Frontend,
) -> Result<Option<Utf8PathBuf>, DebstrapError> {
    let Some(name) = opts.keyring.as_deref().or(suites_keyring) else {
        if opts.authenticated {
            return Err(DebstrapError::Config(
                "No keyring specified and no default available".to_string(),
            ));
        }
        return Ok(None);
    };

    match gpg::resolve_keyring(name, &opts.configdir) {
        Some(path) => {
            debug!(keyring = %path, "using keyring");
            Ok(Some(path))
        }
        None if opts.authenticated => Err(DebstrapError::Config(format!(
            "Can't find keyring {}",
            name
        ))),
        None => {
            frontend.info(&format!("Can't find keyring {}", name));
            Ok(None)
        }
    }
}

fn write_sources_list(
    target: &TargetRoot,
    mirror: &str,
    codename: &str,
    frontend: &Frontend,
) -> Result<(), DebstrapError> {
    frontend.progress_message("Writing apt sources.list");
    let path = target.create_file("etc/apt/sources.list")?;
    let mut file =
        fs::File::create(&path).map_err(|e| DebstrapError::io(path.to_string(), e))?;
    writeln!(file, "deb {} {} main", mirror, codename)
        .map_err(|e| DebstrapError::io(path.to_string(), e))
}

fn write_hosts(target: &TargetRoot, frontend: &Frontend) -> Result<(), DebstrapError> {
    frontend.progress_message("Writing hosts");
    let path = target.create_file("etc/hosts")?;
    fs::write(&path, "127.0.0.1 localhost\n")
        .map_err(|e| DebstrapError::io(path.to_string(), e))
}

fn write_resolv_conf(target: &TargetRoot, frontend: &Frontend) -> Result<(), DebstrapError> {
    let host_conf = Utf8Path::new("/etc/resolv.conf");
    if !host_conf.exists() {
        return Ok(());
    }
    frontend.progress_message("Writing resolv.conf");
    let path = target.create_file("etc/resolv.conf")?;
    fs::copy(host_conf, &path)
        .map_err(|e| DebstrapError::io(path.to_string(), e))?;
    Ok(())
}

fn finish_etc(
    target: &TargetRoot,
    mirror: &str,
    codename: &str,
    frontend: &Frontend,
) -> Result<(), DebstrapError> {
    write_sources_list(target, mirror, codename, frontend)?;
    write_hosts(target, frontend)?;
    write_resolv_conf(target, frontend)
}

/// Runs the whole bootstrap pipeline.
pub fn run(opts: &Options, frontend: &Frontend) -> Result<()> {
    check_permission(opts.download_only)?;
    let target = check_target(&opts.target, opts.download_only)?;

    let suites = SuitesConfig::read(&opts.configdir).with_context(|| {
        format!("Error reading suites config from {}", opts.configdir)
    })?;
    let initial = suite::initial_selection(&suites, &opts.origin, &opts.codename);

    let mirror_base = opts
        .mirror
        .as_deref()
        .or(initial.mirror.as_deref())
        .ok_or_else(|| {
            DebstrapError::Config("No mirror specified and no default available".to_string())
        })?;
    debug!(mirror = mirror_base, "using mirror");
    let mut mirror = Mirror::new(mirror_base)?;

    let keyring = setup_keyring(opts, initial.keyring.as_deref(), frontend)?;

    target.create_dir(CACHE_DIR)?;
    let mut download = Download {
        mirror: &mut mirror,
        target: &target,
        frontend,
        codename: &initial.codename,
        arch: &opts.arch,
    };

    let release = download
        .fetch_release(keyring.as_deref(), opts.authenticated)
        .context("failed to obtain a trusted Release file")?;
    frontend.progress(100);

    let mut suite_config = suite::select_config(
        &suites,
        &opts.configdir,
        &release.origin,
        &release.codename,
        opts.suite_config.as_deref(),
    )?;
    suite_config.activate(&opts.flavour, &opts.arch);
    if !suite_config.flavour_valid {
        return Err(
            DebstrapError::Config(format!("Unknown flavour {}", opts.flavour)).into(),
        );
    }

    let mut index = download
        .fetch_packages(&release)
        .context("failed to obtain a valid Packages index")?;
    frontend.progress(500);

    let sets = select::select(&index, &suite_config, &opts.include, &opts.exclude, frontend);
    debug!(
        essential = sets.essential_include.len(),
        edge_include = sets.edge_include.len(),
        edge_exclude = sets.edge_exclude.len(),
        "package sets selected"
    );

    download
        .fetch_debs(&index, &sets.essential_include)
        .context("failed to download packages")?;

    if opts.download_only {
        frontend.info("Download-only mode, not installing anything");
        return Ok(());
    }

    // Install init: dpkg database stubs, mount isolation, target log.
    target.create_file("var/lib/dpkg/available")?;
    target.create_file("var/lib/dpkg/diversions")?;
    target.create_file("var/lib/dpkg/status")?;
    isolation::isolate_mount_namespace()?;
    target.create_dir("var/log")?;
    frontend.open_log(&target.path("var/log/bootstrap.log"))?;

    let mut foreign = if opts.foreign {
        Some(ForeignQemu::setup(&target)?)
    } else {
        None
    };

    let helperdir = opts.helperdir.clone().unwrap_or_else(|| opts.configdir.clone());
    let mut ctx = InstallCtx {
        index: &mut index,
        mirror: &mut mirror,
        target: &target,
        frontend,
    };
    suite::action::run_actions(&suite_config, &sets, &mut ctx, &helperdir)
        .context("installation failed")?;

    finish_etc(&target, mirror.base(), &release.codename, frontend)?;

    if let Some(foreign) = foreign.as_mut() {
        foreign.cleanup()?;
    }

    frontend.progress(1000);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::Verbosity;

    #[test]
    fn test_check_target_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("rootfs")).unwrap();

        let target = check_target(&path, true).unwrap();
        assert!(target.root().is_dir());
    }

    #[test]
    fn test_check_target_rejects_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("file")).unwrap();
        std::fs::write(&path, b"").unwrap();

        assert!(matches!(
            check_target(&path, true),
            Err(DebstrapError::Config(_))
        ));
    }

    #[test]
    fn test_finish_etc_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let target =
            TargetRoot::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());
        let frontend = Frontend::new(Verbosity::Quiet);

        finish_etc(
            &target,
            "http://deb.debian.org/debian",
            "bookworm",
            &frontend,
        )
        .unwrap();

        assert_eq!(
            std::fs::read_to_string(target.path("etc/apt/sources.list")).unwrap(),
            "deb http://deb.debian.org/debian bookworm main\n"
        );
        assert_eq!(
            std::fs::read_to_string(target.path("etc/hosts")).unwrap(),
            "127.0.0.1 localhost\n"
        );
    }
}
