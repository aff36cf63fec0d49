//! Package installation through apt and dpkg inside the target.
//!
//! Every invocation runs chrooted into the target with three extra wires
//! besides stdout/stderr: fd 3 carries dpkg's machine-readable status
//! lines (which advance the in-memory package status and drive the
//! user-visible unpack/configure messages), and fd 4 is apt's download
//! request channel, serviced by the mirror client with an `ok`/`nok`
//! reply per request.

use std::io::Write;
use std::os::unix::net::UnixStream;

use camino::Utf8Path;
use regex::Regex;
use tracing::debug;

use crate::error::DebstrapError;
use crate::exec::{self, ExecSpec, FdHandler, Flow, Interest, IoSpec, LineBuffer};
use crate::extract;
use crate::frontend::Frontend;
use crate::mirror::Mirror;
use crate::packages::{PackageId, PackageIndex, Priority, Status};
use crate::target::{self, TargetRoot};

/// Everything an installation step may touch.
///
/// The index and the mirror are mutated from inside fd handlers while a
/// subprocess runs; the single-threaded poll loop means they are never
/// touched concurrently.
pub struct InstallCtx<'a> {
    pub index: &'a mut PackageIndex,
    pub mirror: &'a mut Mirror,
    pub target: &'a TargetRoot,
    pub frontend: &'a Frontend,
}

/// Parses `status: <package>: <state>` lines from dpkg.
struct DpkgStatusHandler<'a> {
    index: &'a mut PackageIndex,
    frontend: &'a Frontend,
    pattern: Regex,
    lines: LineBuffer,
}

impl<'a> DpkgStatusHandler<'a> {
    fn new(index: &'a mut PackageIndex, frontend: &'a Frontend) -> Self {
        Self {
            index,
            frontend,
            pattern: Regex::new(r"^status:\s+([a-z0-9.+-]+):\s+([a-z-]+)")
                .expect("dpkg status pattern"),
            lines: LineBuffer::default(),
        }
    }

    fn consume(&mut self, line: &str) {
        debug!(line, "dpkg status");
        let Some(captures) = self.pattern.captures(line) else {
            return;
        };
        let Some(id) = self.index.get(&captures[1]) else {
            return;
        };
        let Ok(status) = captures[2].parse::<Status>() else {
            return;
        };

        if self.index.package(id).status < status {
            let name = &self.index.package(id).name;
            match status {
                Status::Unpacked => self
                    .frontend
                    .progress_message(&format!("Unpacking package {}", name)),
                Status::Installed => self
                    .frontend
                    .progress_message(&format!("Configuring package {}", name)),
                Status::NotInstalled => return,
            }
            self.index.advance_status(id, status);
        }
    }
}

impl FdHandler for DpkgStatusHandler<'_> {
    fn ready(&mut self, stream: &mut UnixStream) -> Result<Flow, DebstrapError> {
        let mut seen = Vec::new();
        let flow = self
            .lines
            .read_lines(stream, |line| seen.push(line.to_string()))
            .map_err(|e| DebstrapError::io("dpkg status stream", e))?;
        for line in seen {
            self.consume(&line);
        }
        Ok(flow)
    }
}

/// Services `download: <package>: <uri> <filename>` requests from apt.
struct AptDownloadHandler<'a> {
    mirror: &'a mut Mirror,
    target: &'a TargetRoot,
    frontend: &'a Frontend,
    pattern: Regex,
    lines: LineBuffer,
}

impl<'a> AptDownloadHandler<'a> {
    fn new(mirror: &'a mut Mirror, target: &'a TargetRoot, frontend: &'a Frontend) -> Self {
        Self {
            mirror,
            target,
            frontend,
            pattern: Regex::new(r"^download:\s+([a-z0-9.+-]+):\s+(\S+)\s+(\S+)")
                .expect("apt download pattern"),
            lines: LineBuffer::default(),
        }
    }

    fn service(&mut self, line: &str) -> bool {
        debug!(line, "apt download");
        let Some(captures) = self.pattern.captures(line) else {
            return false;
        };
        let (package, uri, filename) = (&captures[1], &captures[2], &captures[3]);

        self.frontend.progress_message(&format!("Retrieving {}", package));
        let dest = self.target.path(filename);
        match self.mirror.fetch(uri, &dest) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "apt download failed");
                false
            }
        }
    }
}

impl FdHandler for AptDownloadHandler<'_> {
    fn ready(&mut self, stream: &mut UnixStream) -> Result<Flow, DebstrapError> {
        let mut requests = Vec::new();
        let flow = self
            .lines
            .read_lines(stream, |line| requests.push(line.to_string()))
            .map_err(|e| DebstrapError::io("apt download stream", e))?;
        for request in requests {
            let reply: &[u8] = if self.service(&request) { b"ok\n" } else { b"nok\n" };
            stream
                .write_all(reply)
                .and_then(|()| stream.flush())
                .map_err(|e| DebstrapError::io("apt download reply", e))?;
        }
        Ok(flow)
    }
}

/// Runs a chrooted command with the full three-handler wiring.
fn run_target_with_progress(ctx: &mut InstallCtx, argv: Vec<String>) -> Result<(), DebstrapError> {
    let spec = ExecSpec::chrooted(argv, ctx.target.root().to_path_buf());

    let mut status_handler = DpkgStatusHandler::new(ctx.index, ctx.frontend);
    let mut download_handler = AptDownloadHandler::new(ctx.mirror, ctx.target, ctx.frontend);
    let (mut out_log, mut err_log) = exec::log_handlers(ctx.frontend);
    let mut io = [
        IoSpec::new(1, Interest::Read, &mut out_log),
        IoSpec::new(2, Interest::Read, &mut err_log),
        IoSpec::new(3, Interest::Read, &mut status_handler),
        IoSpec::new(4, Interest::Read, &mut download_handler),
    ];
    exec::execute(&spec, &mut io)
}

/// Argv for the edge-set `apt-get install` run.
fn apt_install_argv(
    index: &PackageIndex,
    include: &[PackageId],
    exclude: &[PackageId],
) -> Vec<String> {
    let mut argv: Vec<String> = [
        "apt-get",
        "install",
        "--yes",
        "-o=APT::Get::allow-remove-essential=true",
        "-o=APT::Get::AllowUnauthenticated=true",
        "-o=APT::Install-Recommends=false",
        "-o=APT::Keep-Fds::=4",
        "-o=APT::Keep-Fds::=3",
        "-o=DPkg::options::=--status-fd=3",
    ]
    .map(str::to_string)
    .into();

    argv.extend(include.iter().map(|&id| index.package(id).name.clone()));
    // A trailing dash marks a package for removal.
    argv.extend(exclude.iter().map(|&id| format!("{}-", index.package(id).name)));
    argv
}

/// Installs the edge set, removing the excluded packages.
pub fn apt_install(
    ctx: &mut InstallCtx,
    include: &[PackageId],
    exclude: &[PackageId],
) -> Result<(), DebstrapError> {
    let argv = apt_install_argv(ctx.index, include, exclude);
    run_target_with_progress(ctx, argv)
}

fn dpkg_argv(
    index: &PackageIndex,
    operation: &[&str],
    force: bool,
    packages: &[PackageId],
) -> Vec<String> {
    let mut argv: Vec<String> = std::iter::once("dpkg")
        .chain(operation.iter().copied())
        .map(str::to_string)
        .collect();
    argv.push("--status-fd=3".to_string());
    if force {
        argv.push("--force-depends".to_string());
    }
    argv.extend(
        packages
            .iter()
            .map(|&id| target::cache_chroot_path(index.package(id).local_filename())),
    );
    argv
}

pub fn dpkg_install(
    ctx: &mut InstallCtx,
    packages: &[PackageId],
    force: bool,
) -> Result<(), DebstrapError> {
    let argv = dpkg_argv(ctx.index, &["--install"], force, packages);
    run_target_with_progress(ctx, argv)
}

pub fn dpkg_unpack(ctx: &mut InstallCtx, packages: &[PackageId]) -> Result<(), DebstrapError> {
    // Unpacking the essential wave always overrides dependency ordering.
    let argv = dpkg_argv(ctx.index, &["--unpack"], true, packages);
    run_target_with_progress(ctx, argv)
}

pub fn dpkg_configure(ctx: &mut InstallCtx, force: bool) -> Result<(), DebstrapError> {
    let argv = dpkg_argv(ctx.index, &["--configure", "-a"], force, &[]);
    run_target_with_progress(ctx, argv)
}

/// Extracts packages straight into the target, without dpkg.
pub fn extract_packages(
    index: &PackageIndex,
    packages: &[PackageId],
    target: &TargetRoot,
    frontend: &Frontend,
) -> Result<(), DebstrapError> {
    for &id in packages {
        let package = index.package(id);
        frontend.progress_message(&format!("Extracting {}", package.name));
        extract::extract_deb(&target.cache_path(package.local_filename()), target, frontend)?;
    }
    Ok(())
}

/// Copies a helper package from the helper directory into the target
/// cache and installs it with dpkg.
pub fn helper_install(
    ctx: &mut InstallCtx,
    helperdir: &Utf8Path,
    name: &str,
) -> Result<(), DebstrapError> {
    let source = helperdir.join(format!("{}.deb", name));
    if !source.is_file() {
        return Err(DebstrapError::Config(format!(
            "helper package {} not found",
            name
        )));
    }

    let cache_name = format!("{}.deb", name);
    let dest = ctx.target.cache_path(&cache_name);
    std::fs::copy(&source, &dest)
        .map_err(|e| DebstrapError::io(format!("failed to copy {} to {}", source, dest), e))?;

    ctx.frontend
        .progress_message(&format!("Configuring helper {}", name));

    let spec = ExecSpec::chrooted(
        vec![
            "dpkg".to_string(),
            "--install".to_string(),
            target::cache_chroot_path(&cache_name),
        ],
        ctx.target.root().to_path_buf(),
    );
    let (mut out_log, mut err_log) = exec::log_handlers(ctx.frontend);
    let mut io = [
        IoSpec::new(1, Interest::Read, &mut out_log),
        IoSpec::new(2, Interest::Read, &mut err_log),
    ];
    exec::execute(&spec, &mut io)
}

/// Purges a helper package from the target.
pub fn helper_remove(ctx: &mut InstallCtx, name: &str) -> Result<(), DebstrapError> {
    ctx.frontend
        .progress_message(&format!("Deconfiguring helper {}", name));

    let spec = ExecSpec::chrooted(
        vec!["dpkg".to_string(), "--purge".to_string(), name.to_string()],
        ctx.target.root().to_path_buf(),
    );
    let (mut out_log, mut err_log) = exec::log_handlers(ctx.frontend);
    let mut io = [
        IoSpec::new(1, Interest::Read, &mut out_log),
        IoSpec::new(2, Interest::Read, &mut err_log),
    ];
    exec::execute(&spec, &mut io)
}

fn status_within(status: Status, include_installed: bool) -> bool {
    if include_installed {
        status <= Status::Installed
    } else {
        status < Status::Installed
    }
}

/// Selects from `seeds` by priority floor (essential packages always
/// pass; `None` restricts to essential-flagged only), closes over
/// dependencies, and keeps the status filter on the closure too.
pub fn list_priority(
    index: &PackageIndex,
    seeds: &[PackageId],
    min_priority: Option<Priority>,
    include_installed: bool,
) -> Vec<PackageId> {
    let selected: Vec<PackageId> = seeds
        .iter()
        .copied()
        .filter(|&id| {
            let p = index.package(id);
            (p.essential || min_priority.is_some_and(|min| p.priority >= min))
                && status_within(p.status, include_installed)
        })
        .collect();

    index
        .resolve_dependencies(&selected)
        .into_iter()
        .filter(|&id| status_within(index.package(id).status, include_installed))
        .collect()
}

/// One named package plus its dependency closure, status-filtered.
pub fn list_package(index: &PackageIndex, name: &str) -> Vec<PackageId> {
    let Some(id) = index.get(name) else {
        return Vec::new();
    };
    if index.package(id).status >= Status::Installed {
        return Vec::new();
    }

    index
        .resolve_dependencies(&[id])
        .into_iter()
        .filter(|&id| index.package(id).status < Status::Installed)
        .collect()
}

/// One named package alone, without its dependency closure.
pub fn list_package_only(index: &PackageIndex, name: &str) -> Vec<PackageId> {
    match index.get(name) {
        Some(id) if index.package(id).status < Status::Installed => vec![id],
        _ => Vec::new(),
    }
}
