//! Target-rooted path construction and creation helpers.
//!
//! Every file the pipeline writes below the bootstrap target goes through
//! [`TargetRoot`], which joins paths relative to the canonicalized target
//! directory and creates missing directories along the way.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::DebstrapError;

/// Cache directory for downloaded indices and packages, relative to the
/// target root.
pub const CACHE_DIR: &str = "var/cache/bootstrap";

/// The canonicalized bootstrap target directory.
#[derive(Debug, Clone)]
pub struct TargetRoot {
    root: Utf8PathBuf,
}

impl TargetRoot {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Joins a path relative to the target root. A leading `/` on `rel`
    /// is treated as relative to the target, never the host.
    pub fn path(&self, rel: &str) -> Utf8PathBuf {
        self.root.join(rel.trim_start_matches('/'))
    }

    /// Creates a directory (and all missing parents) under the target.
    pub fn create_dir(&self, rel: &str) -> Result<Utf8PathBuf, DebstrapError> {
        let path = self.path(rel);
        fs::create_dir_all(&path).map_err(|e| {
            DebstrapError::io(format!("failed to create directory: {}", path), e)
        })?;
        Ok(path)
    }

    /// Creates an empty file (truncating an existing one) under the
    /// target, with all missing parent directories.
    pub fn create_file(&self, rel: &str) -> Result<Utf8PathBuf, DebstrapError> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                DebstrapError::io(format!("failed to create directory: {}", parent), e)
            })?;
        }
        fs::File::create(&path)
            .map_err(|e| DebstrapError::io(format!("failed to create file: {}", path), e))?;
        Ok(path)
    }

    /// Host-side path of a cached `.deb` or index artifact.
    pub fn cache_path(&self, name: &str) -> Utf8PathBuf {
        self.path(CACHE_DIR).join(name)
    }
}

/// Chroot-relative path of a cached `.deb`, as seen by dpkg running
/// inside the target.
pub fn cache_chroot_path(name: &str) -> String {
    format!("/{}/{}", CACHE_DIR, name)
}
