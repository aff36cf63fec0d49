//! Mount-namespace isolation.
//!
//! Before anything runs chrooted into the target, the process moves into
//! its own mount namespace and remarks `/` as recursively private, so
//! bind mounts made for foreign-architecture emulators never leak into
//! the host's namespace.

use nix::mount::{MsFlags, mount};
use nix::sched::{CloneFlags, unshare};
use tracing::debug;

use crate::error::DebstrapError;

pub fn isolate_mount_namespace() -> Result<(), DebstrapError> {
    debug!("unsharing mount namespace");
    unshare(CloneFlags::CLONE_NEWNS)
        .map_err(|e| DebstrapError::Config(format!("failed to unshare mount namespace: {}", e)))?;

    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| DebstrapError::Config(format!("failed to remount / as private: {}", e)))
}
