//! Archive `Release` file model.
//!
//! The Release file carries the suite's origin and codename plus a table
//! of SHA-256 digests for the per-architecture index files; the digests
//! gate every Packages download.

use std::collections::HashMap;

use camino::Utf8Path;

use crate::control;
use crate::error::DebstrapError;

/// Digest and size of one index file listed in the Release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFile {
    pub size: u64,
    pub sha256: String,
}

/// Parsed per-suite archive metadata.
#[derive(Debug, Clone)]
pub struct Release {
    pub origin: String,
    pub codename: String,
    files: HashMap<String, ReleaseFile>,
}

impl Release {
    pub fn read_file(path: &Utf8Path) -> Result<Self, DebstrapError> {
        let paragraphs = control::read_file("Release", path)?;
        Self::from_paragraphs(paragraphs)
    }

    pub fn parse(text: &str) -> Result<Self, DebstrapError> {
        Self::from_paragraphs(control::parse_str("Release", text)?)
    }

    fn from_paragraphs(paragraphs: Vec<control::Paragraph>) -> Result<Self, DebstrapError> {
        let Some(paragraph) = paragraphs.into_iter().next() else {
            return Err(DebstrapError::parse("Release", "empty file"));
        };

        let origin = paragraph
            .field("Origin")
            .ok_or_else(|| DebstrapError::parse("Release", "missing Origin field"))?
            .to_string();
        let codename = paragraph
            .field("Codename")
            .ok_or_else(|| DebstrapError::parse("Release", "missing Codename field"))?
            .to_string();

        let mut files = HashMap::new();
        if let Some(sha256) = paragraph.field("SHA256") {
            for line in sha256.lines() {
                let mut parts = line.split_whitespace();
                let (Some(digest), Some(size), Some(path)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    return Err(DebstrapError::parse(
                        "Release",
                        format!("malformed SHA256 entry: {:?}", line),
                    ));
                };
                let size = size.parse::<u64>().map_err(|_| {
                    DebstrapError::parse("Release", format!("bad size in SHA256 entry: {:?}", line))
                })?;
                files.insert(
                    path.to_string(),
                    ReleaseFile {
                        size,
                        sha256: digest.to_string(),
                    },
                );
            }
        }

        Ok(Self {
            origin,
            codename,
            files,
        })
    }

    /// Looks up the digest entry for an index file path relative to the
    /// suite directory (e.g. `main/binary-amd64/Packages.xz`).
    pub fn file(&self, path: &str) -> Option<&ReleaseFile> {
        self.files.get(path)
    }
}
