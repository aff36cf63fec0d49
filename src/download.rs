//! Retrieval of archive indices and packages.
//!
//! Everything lands in `var/cache/bootstrap/` under the target. Cached
//! artifacts whose checksum still matches the Release metadata are reused
//! without touching the network; invalid files are unlinked and fetched
//! again. The Packages index is tried uncompressed from cache first, then
//! as `.xz`, then as `.gz` from the mirror.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::check;
use crate::decompress::{self, Codec};
use crate::error::DebstrapError;
use crate::frontend::Frontend;
use crate::gpg;
use crate::mirror::Mirror;
use crate::packages::{PackageId, PackageIndex};
use crate::release::Release;
use crate::target::TargetRoot;

/// Download driver for one suite/architecture pair.
pub struct Download<'a> {
    pub mirror: &'a mut Mirror,
    pub target: &'a TargetRoot,
    pub frontend: &'a Frontend,
    pub codename: &'a str,
    pub arch: &'a str,
}

impl Download<'_> {
    fn index_source(&self, file: &str) -> String {
        format!("dists/{}/{}", self.codename, file)
    }

    fn index_source_arch(&self, file: &str) -> String {
        format!("dists/{}/main/binary-{}/{}", self.codename, self.arch, file)
    }

    fn index_cache(&self, file: &str) -> Utf8PathBuf {
        self.target.cache_path(&format!("_dists_._{}", file))
    }

    fn index_cache_arch(&self, file: &str) -> Utf8PathBuf {
        self.target
            .cache_path(&format!("_dists_._main_binary-{}_{}", self.arch, file))
    }

    fn fetch(&mut self, source: &str, dest: &Utf8Path, message: &str) -> Result<(), DebstrapError> {
        self.frontend.progress_message(&format!("Retrieving {}", message));
        self.mirror.fetch(source, dest)
    }

    /// Fetches and authenticates the Release file.
    ///
    /// The Release itself is always required. The detached signature and
    /// its verification are fatal only in authenticated mode; without
    /// authentication every failure on that path degrades to a warning.
    pub fn fetch_release(
        &mut self,
        keyring: Option<&Utf8Path>,
        authenticated: bool,
    ) -> Result<Release, DebstrapError> {
        let release_path = self.index_cache("Release");
        let sig_path = self.index_cache("Release.gpg");

        self.fetch(&self.index_source("Release"), &release_path, "Release")
            .map_err(|e| {
                self.frontend.error("Couldn't download Release!");
                e
            })?;

        let signature =
            match self.fetch(&self.index_source("Release.gpg"), &sig_path, "Release.gpg") {
                Ok(()) => Some(sig_path),
                Err(e) if authenticated => return Err(e),
                Err(_) => {
                    self.frontend.warning("Couldn't download Release.gpg!");
                    None
                }
            };

        match (signature, keyring) {
            (Some(signature), Some(keyring)) => {
                self.frontend.progress_message("Validating Release");
                match gpg::verify_release(keyring, &release_path, &signature, self.frontend) {
                    Ok(()) => {}
                    Err(e) if authenticated => {
                        self.frontend.error("Couldn't validate Release!");
                        return Err(e);
                    }
                    Err(_) => self.frontend.warning("Couldn't validate Release!"),
                }
            }
            _ if authenticated => {
                // gpg setup fails closed earlier in authenticated mode;
                // reaching this without keyring or signature is a bug.
                return Err(DebstrapError::Validation(
                    "Release cannot be authenticated".to_string(),
                ));
            }
            _ => self.frontend.warning("Couldn't validate Release!"),
        }

        self.frontend.progress_message("Parsing Release");
        Release::read_file(&release_path)
    }

    /// Returns true when `path` exists and matches the Release digest for
    /// `index_file`; an invalid file is unlinked.
    fn cached_index_valid(
        &self,
        path: &Utf8Path,
        index_file: &str,
        release: &Release,
    ) -> Result<bool, DebstrapError> {
        if !path.is_file() {
            return Ok(false);
        }
        let Some(entry) = release.file(index_file) else {
            return Err(DebstrapError::Validation(
                "Can't find checksum for Packages file".to_string(),
            ));
        };
        match check::verify_sha256(path, &entry.sha256) {
            Ok(()) => Ok(true),
            Err(DebstrapError::Validation(reason)) => {
                debug!(%path, reason, "unlinking invalid index");
                std::fs::remove_file(path)
                    .map_err(|e| DebstrapError::io(path.to_string(), e))?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Downloads one compressed Packages variant and decompresses it to
    /// the canonical plain path. Returns false when the download or its
    /// checksum failed and the next variant should be tried.
    fn fetch_packages_compressed(
        &mut self,
        suffix: &str,
        plain_path: &Utf8Path,
        release: &Release,
    ) -> Result<bool, DebstrapError> {
        let file = format!("Packages{}", suffix);
        let source = self.index_source_arch(&file);
        let path = self.index_cache_arch(&file);

        if let Err(e) = self.fetch(&source, &path, &file) {
            debug!(source, error = %e, "download failed");
            return Ok(false);
        }
        if !self.cached_index_valid(&path, &format!("main/binary-{}/{}", self.arch, file), release)?
        {
            return Ok(false);
        }

        decompress::decompress_file(&path, plain_path, Codec::for_suffix(&file))?;
        Ok(true)
    }

    /// Obtains a checksum-valid uncompressed Packages index and parses it.
    pub fn fetch_packages(&mut self, release: &Release) -> Result<PackageIndex, DebstrapError> {
        let plain_path = self.index_cache_arch("Packages");
        let plain_file = format!("main/binary-{}/Packages", self.arch);

        let have_index = self.cached_index_valid(&plain_path, &plain_file, release)?
            || self.fetch_packages_compressed(".xz", &plain_path, release)?
            || self.fetch_packages_compressed(".gz", &plain_path, release)?;
        if !have_index {
            self.frontend.error("Couldn't download Packages!");
            return Err(DebstrapError::Network {
                source_path: self.index_source_arch("Packages"),
                reason: "no index variant could be retrieved and validated".to_string(),
            });
        }

        self.frontend.progress_message("Parsing Packages");
        PackageIndex::read_file(&plain_path)
    }

    /// Downloads the `.deb` files for the essential closure, reusing
    /// checksum-valid cached copies, and interpolates overall progress
    /// between 500 and 850 permille.
    pub fn fetch_debs(
        &mut self,
        index: &PackageIndex,
        install: &[PackageId],
    ) -> Result<(), DebstrapError> {
        let total: u64 = install.iter().map(|&id| index.package(id).size).sum();
        let mut done: u64 = 0;

        for &id in install {
            let package = index.package(id);
            done += package.size;
            let permille = if total > 0 {
                500 + (done * 350 / total) as u32
            } else {
                850
            };

            let dest = self.target.cache_path(package.local_filename());
            if dest.is_file() && check::verify_sha256(&dest, &package.sha256).is_ok() {
                debug!(package = %package.name, "using cached package");
                self.frontend.progress(permille);
                continue;
            }

            let filename = package.filename.clone();
            self.fetch(&filename, &dest, &package.name).map_err(|e| {
                self.frontend.error(&format!("Couldn't download {}!", filename));
                e
            })?;
            if let Err(e) = check::verify_sha256(&dest, &package.sha256) {
                let _ = std::fs::remove_file(&dest);
                self.frontend.error(&format!("Couldn't validate {}!", filename));
                return Err(e);
            }

            self.frontend.progress(permille);
        }
        Ok(())
    }
}
