//! Checksum validation of downloaded artifacts.
//!
//! Every index file and `.deb` is compared against the SHA-256 digest the
//! archive metadata records for it before it is consumed.

use std::fs::File;
use std::io::{self, Read};

use camino::Utf8Path;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::DebstrapError;

/// Computes the lowercase hex SHA-256 of a file.
pub fn sha256_hex(path: &Utf8Path) -> Result<String, DebstrapError> {
    let mut file = File::open(path).map_err(|e| DebstrapError::io(path.to_string(), e))?;
    let mut hasher = Sha256::new();

    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DebstrapError::io(path.to_string(), e)),
        };
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Verifies that a file's SHA-256 matches the expected hex digest.
pub fn verify_sha256(path: &Utf8Path, expected: &str) -> Result<(), DebstrapError> {
    let actual = sha256_hex(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        debug!(%path, "checksum ok");
        Ok(())
    } else {
        Err(DebstrapError::Validation(format!(
            "checksum mismatch for {}: expected {}, got {}",
            path, expected, actual
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    // printf 'hello\n' | sha256sum
    const HELLO_SHA256: &str =
        "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    fn temp_file_with(bytes: &[u8]) -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("file")).unwrap();
        std::fs::write(&path, bytes).unwrap();
        (dir, path)
    }

    #[test]
    fn test_sha256_hex() {
        let (_dir, path) = temp_file_with(b"hello\n");
        assert_eq!(sha256_hex(&path).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn test_verify_match_case_insensitive() {
        let (_dir, path) = temp_file_with(b"hello\n");
        verify_sha256(&path, HELLO_SHA256).unwrap();
        verify_sha256(&path, &HELLO_SHA256.to_uppercase()).unwrap();
    }

    #[test]
    fn test_verify_mismatch() {
        let (_dir, path) = temp_file_with(b"tampered\n");
        let err = verify_sha256(&path, HELLO_SHA256).unwrap_err();
        assert!(matches!(err, DebstrapError::Validation(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("absent")).unwrap();
        assert!(matches!(
            sha256_hex(&path),
            Err(DebstrapError::Io { .. })
        ));
    }
}
