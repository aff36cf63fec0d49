//! Foreign-architecture support.
//!
//! Bootstrapping a non-native architecture needs the static qemu user
//! emulators visible inside the target so the kernel's binfmt handlers
//! can run the chrooted binaries. Every `/usr/bin/qemu-*-static` on the
//! host is bind-mounted read-only into the same path under the target;
//! teardown detaches the mounts and removes the mount-point files.

use camino::{Utf8Path, Utf8PathBuf};
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use tracing::{debug, error};

use crate::error::DebstrapError;
use crate::target::TargetRoot;

const QEMU_DIR: &str = "/usr/bin";

fn is_qemu_static(name: &str) -> bool {
    name.starts_with("qemu-") && name.ends_with("-static")
}

fn find_qemu_binaries(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, DebstrapError> {
    let entries =
        dir.read_dir_utf8().map_err(|e| DebstrapError::io(dir.to_string(), e))?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DebstrapError::io(dir.to_string(), e))?;
        if is_qemu_static(entry.file_name()) {
            found.push(entry.path().to_path_buf());
        }
    }
    found.sort();
    Ok(found)
}

/// Bind mounts of the static qemu emulators inside the target.
///
/// Mounts are detached and their mount-point files removed on
/// [`cleanup`](ForeignQemu::cleanup); dropping the guard without cleanup
/// makes a last attempt and reports failures.
pub struct ForeignQemu {
    target: TargetRoot,
    mounted: Vec<Utf8PathBuf>,
    torn_down: bool,
}

impl ForeignQemu {
    /// Mounts every host qemu-user-static binary into the target.
    pub fn setup(target: &TargetRoot) -> Result<Self, DebstrapError> {
        let binaries = find_qemu_binaries(Utf8Path::new(QEMU_DIR))?;
        if binaries.is_empty() {
            return Err(DebstrapError::Config(
                "Unable to find static qemu binaries, please install qemu-user-static"
                    .to_string(),
            ));
        }

        let mut guard = Self {
            target: target.clone(),
            mounted: Vec::new(),
            torn_down: false,
        };

        for host_path in binaries {
            let target_path = target.create_file(host_path.as_str())?;
            debug!(%host_path, %target_path, "setup foreign arch qemu binary");

            mount(
                Some(host_path.as_std_path()),
                target_path.as_std_path(),
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_RDONLY,
                None::<&str>,
            )
            .map_err(|e| {
                DebstrapError::Config(format!("Unable to bind mount qemu: {}", e))
            })?;
            guard.mounted.push(target_path.clone());

            mount(
                None::<&str>,
                target_path.as_std_path(),
                None::<&str>,
                MsFlags::MS_REMOUNT | MsFlags::MS_BIND | MsFlags::MS_RDONLY,
                None::<&str>,
            )
            .map_err(|e| {
                DebstrapError::Config(format!("Unable to bind mount qemu: {}", e))
            })?;
        }

        Ok(guard)
    }

    /// Detaches every mount and unlinks the mount-point files.
    pub fn cleanup(&mut self) -> Result<(), DebstrapError> {
        if self.torn_down {
            return Ok(());
        }

        let mut failures = Vec::new();
        for path in self.mounted.drain(..).rev() {
            debug!(%path, "cleanup foreign arch qemu binary");
            if let Err(e) = umount2(path.as_std_path(), MntFlags::MNT_DETACH) {
                failures.push(format!("umount {}: {}", path, e));
                continue;
            }
            if let Err(e) = std::fs::remove_file(&path) {
                failures.push(format!("unlink {}: {}", path, e));
            }
        }
        self.torn_down = true;

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DebstrapError::Config(format!(
                "foreign qemu cleanup failed: {}",
                failures.join("; ")
            )))
        }
    }
}

impl Drop for ForeignQemu {
    fn drop(&mut self) {
        if !self.torn_down
            && let Err(e) = self.cleanup()
        {
            error!(target_root = %self.target.root(), "{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qemu_name_matching() {
        assert!(is_qemu_static("qemu-aarch64-static"));
        assert!(is_qemu_static("qemu-riscv64-static"));
        assert!(!is_qemu_static("qemu-aarch64"));
        assert!(!is_qemu_static("qemu-static"));
        assert!(!is_qemu_static("static-qemu-aarch64"));
    }

    #[test]
    fn test_find_qemu_binaries_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::fs::write(root.join("qemu-riscv64-static"), b"").unwrap();
        std::fs::write(root.join("qemu-aarch64-static"), b"").unwrap();
        std::fs::write(root.join("qemu-aarch64"), b"").unwrap();
        std::fs::write(root.join("ls"), b"").unwrap();

        let found = find_qemu_binaries(&root).unwrap();
        let names: Vec<_> = found.iter().map(|p| p.file_name().unwrap()).collect();
        assert_eq!(names, ["qemu-aarch64-static", "qemu-riscv64-static"]);
    }
}
