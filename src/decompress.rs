//! Streaming pull-based decompression.
//!
//! A [`Decompressor`] wraps an input reader (optionally capped at a byte
//! length, for `.deb` archive members) with the decoder matching its
//! [`Codec`]. Each [`step`](Decompressor::step) emits at most one decoded
//! chunk to the output, so the caller can interleave decompression with a
//! subprocess poll loop; `Ok(0)` marks the end of the stream. A short
//! write on the output is an error.

use std::fs::File;
use std::io::{self, Read, Write};

use bzip2::read::BzDecoder;
use camino::Utf8Path;
use flate2::read::GzDecoder;
use xz2::read::XzDecoder;

use crate::error::DebstrapError;

/// Decoded bytes emitted per step.
const STEP_CHUNK: usize = 16 * 1024;

/// Supported compression formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Gzip,
    Bzip2,
    Xz,
    /// Identity: bytes are forwarded unchanged.
    Plain,
}

impl Codec {
    /// Infers the codec from a file-name suffix; anything unrecognized is
    /// treated as uncompressed.
    pub fn for_suffix(name: &str) -> Codec {
        if name.ends_with(".gz") {
            Codec::Gzip
        } else if name.ends_with(".bz2") {
            Codec::Bzip2
        } else if name.ends_with(".xz") {
            Codec::Xz
        } else {
            Codec::Plain
        }
    }
}

/// A stateful streaming decoder over an input reader.
pub struct Decompressor {
    reader: Box<dyn Read + Send>,
}

impl Decompressor {
    /// Builds a decompressor over `input`, reading at most `limit` input
    /// bytes when given.
    pub fn new(input: File, codec: Codec, limit: Option<u64>) -> Self {
        let capped: Box<dyn Read + Send> = match limit {
            Some(n) => Box::new(input.take(n)),
            None => Box::new(input),
        };
        let reader: Box<dyn Read + Send> = match codec {
            Codec::Gzip => Box::new(GzDecoder::new(capped)),
            Codec::Bzip2 => Box::new(BzDecoder::new(capped)),
            Codec::Xz => Box::new(XzDecoder::new(capped)),
            Codec::Plain => capped,
        };
        Self { reader }
    }

    /// Decodes and writes one chunk of at most 16 KiB.
    ///
    /// Returns the number of bytes written, `Ok(0)` at end of stream, and
    /// an error on decoder failure or a short write.
    pub fn step(&mut self, out: &mut dyn Write) -> io::Result<usize> {
        let mut buf = [0u8; STEP_CHUNK];
        let n = self.reader.read(&mut buf)?;
        if n > 0 {
            out.write_all(&buf[..n])?;
        }
        Ok(n)
    }
}

/// Decompresses a whole file to `dst`.
pub fn decompress_file(src: &Utf8Path, dst: &Utf8Path, codec: Codec) -> Result<(), DebstrapError> {
    let input = File::open(src).map_err(|e| DebstrapError::io(src.to_string(), e))?;
    let mut output = File::create(dst).map_err(|e| DebstrapError::io(dst.to_string(), e))?;

    let mut decompressor = Decompressor::new(input, codec, None);
    loop {
        match decompressor.step(&mut output) {
            Ok(0) => return Ok(()),
            Ok(_) => continue,
            Err(e) => {
                return Err(DebstrapError::Extract(format!(
                    "failed to decompress {}: {}",
                    src, e
                )));
            }
        }
    }
}
