//! Self-extraction of `.deb` packages.
//!
//! A `.deb` is an `ar` archive: `debian-binary` (format version),
//! `control.tar.*`, and `data.tar.*`. The first wave of essential
//! packages has to land on disk before the target has a working dpkg, so
//! the data member is located by walking the ar headers and streamed
//! through the matching decompressor into `tar -x` running against the
//! target root.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::net::UnixStream;

use camino::Utf8Path;
use tracing::debug;

use crate::decompress::{Codec, Decompressor};
use crate::error::DebstrapError;
use crate::exec::{self, ExecSpec, FdHandler, Flow, Interest, IoSpec};
use crate::frontend::Frontend;
use crate::target::TargetRoot;

const AR_MAGIC: &[u8; 8] = b"!<arch>\n";
const AR_HEADER_LEN: usize = 60;
const AR_FMAG: &[u8; 2] = b"`\n";

/// Name and size of one ar member header.
struct MemberHeader {
    name: String,
    size: u64,
}

fn read_member_header(file: &mut File) -> Result<Option<MemberHeader>, DebstrapError> {
    let mut raw = [0u8; AR_HEADER_LEN];
    match file.read_exact(&mut raw) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(DebstrapError::io("ar header", e)),
    }

    if &raw[58..60] != AR_FMAG {
        return Err(DebstrapError::Extract(
            "malformed ar member header".to_string(),
        ));
    }

    // 16-byte space-padded name, optional trailing slash.
    let name = String::from_utf8_lossy(&raw[0..16])
        .trim_end()
        .trim_end_matches('/')
        .to_string();

    // ASCII decimal size.
    let size = String::from_utf8_lossy(&raw[48..58])
        .trim_end()
        .parse::<u64>()
        .map_err(|_| DebstrapError::Extract(format!("bad ar member size for {:?}", name)))?;

    Ok(Some(MemberHeader { name, size }))
}

/// Walks the archive to its data member.
///
/// Verifies the ar magic and the `2.0\n` format version, skips unrelated
/// members (with odd-size padding), and leaves the file positioned at the
/// first byte of `data.tar.*`. Returns the member's codec and size.
fn find_data_member(file: &mut File) -> Result<(Codec, u64), DebstrapError> {
    let mut magic = [0u8; AR_MAGIC.len()];
    file.read_exact(&mut magic)
        .map_err(|e| DebstrapError::io("ar magic", e))?;
    if &magic != AR_MAGIC {
        return Err(DebstrapError::Extract("not an ar archive".to_string()));
    }

    while let Some(header) = read_member_header(file)? {
        match header.name.as_str() {
            "debian-binary" => {
                if header.size != 4 {
                    return Err(DebstrapError::Extract(
                        "unexpected debian-binary size".to_string(),
                    ));
                }
                let mut version = [0u8; 4];
                file.read_exact(&mut version)
                    .map_err(|e| DebstrapError::io("debian-binary", e))?;
                if &version != b"2.0\n" {
                    return Err(DebstrapError::Extract(format!(
                        "unsupported package format version {:?}",
                        String::from_utf8_lossy(&version)
                    )));
                }
            }
            "data.tar" => return Ok((Codec::Plain, header.size)),
            "data.tar.gz" => return Ok((Codec::Gzip, header.size)),
            "data.tar.bz2" => return Ok((Codec::Bzip2, header.size)),
            "data.tar.xz" => return Ok((Codec::Xz, header.size)),
            _ => {
                // Members are 2-byte aligned.
                file.seek(SeekFrom::Current((header.size + (header.size & 1)) as i64))
                    .map_err(|e| DebstrapError::io("ar seek", e))?;
            }
        }
    }

    Err(DebstrapError::Extract(
        "archive has no data member".to_string(),
    ))
}

/// Feeds decoded data-member bytes into the tar child's stdin.
struct DecompressFeeder {
    decompressor: Decompressor,
}

impl FdHandler for DecompressFeeder {
    fn ready(&mut self, stream: &mut UnixStream) -> Result<Flow, DebstrapError> {
        match self.decompressor.step(stream) {
            Ok(0) => Ok(Flow::Close),
            Ok(_) => Ok(Flow::Continue),
            Err(e) => Err(DebstrapError::Extract(format!(
                "data member decode failed: {}",
                e
            ))),
        }
    }
}

/// Extracts the data member of a `.deb` into the target root.
pub fn extract_deb(
    deb: &Utf8Path,
    target: &TargetRoot,
    frontend: &Frontend,
) -> Result<(), DebstrapError> {
    debug!(%deb, "decompressing package");

    let mut file = File::open(deb).map_err(|e| DebstrapError::io(deb.to_string(), e))?;
    let (codec, size) = find_data_member(&mut file)?;
    debug!(?codec, size, "found data member");

    let mut feeder = DecompressFeeder {
        decompressor: Decompressor::new(file, codec, Some(size)),
    };
    let (mut out_log, mut err_log) = exec::log_handlers(frontend);

    let spec = ExecSpec::new(vec![
        "tar".to_string(),
        "-x".to_string(),
        "-C".to_string(),
        target.root().to_string(),
        "-f".to_string(),
        "-".to_string(),
    ]);
    let mut io = [
        IoSpec::new(0, Interest::Write, &mut feeder),
        IoSpec::new(1, Interest::Read, &mut out_log),
        IoSpec::new(2, Interest::Read, &mut err_log),
    ];
    exec::execute(&spec, &mut io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::Verbosity;
    use camino::Utf8PathBuf;
    use std::io::Write;

    fn ar_header(name: &str, size: u64) -> Vec<u8> {
        let mut header = Vec::with_capacity(AR_HEADER_LEN);
        header.extend_from_slice(format!("{:<16}", name).as_bytes());
        header.extend_from_slice(format!("{:<12}", 0).as_bytes());
        header.extend_from_slice(format!("{:<6}", 0).as_bytes());
        header.extend_from_slice(format!("{:<6}", 0).as_bytes());
        header.extend_from_slice(format!("{:<8}", "100644").as_bytes());
        header.extend_from_slice(format!("{:<10}", size).as_bytes());
        header.extend_from_slice(AR_FMAG);
        header
    }

    fn deb_with_members(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut deb = AR_MAGIC.to_vec();
        for (name, data) in members {
            deb.extend_from_slice(&ar_header(name, data.len() as u64));
            deb.extend_from_slice(data);
            if data.len() % 2 == 1 {
                deb.push(b'\n');
            }
        }
        deb
    }

    fn write_temp(bytes: &[u8]) -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("pkg.deb")).unwrap();
        std::fs::write(&path, bytes).unwrap();
        (dir, path)
    }

    #[test]
    fn test_find_data_member_skips_control() {
        let deb = deb_with_members(&[
            ("debian-binary", b"2.0\n"),
            ("control.tar.gz", b"odd"),
            ("data.tar.xz", b"payload"),
        ]);
        let (_dir, path) = write_temp(&deb);

        let mut file = File::open(&path).unwrap();
        let (codec, size) = find_data_member(&mut file).unwrap();
        assert_eq!(codec, Codec::Xz);
        assert_eq!(size, 7);

        // Positioned at the member payload, after the odd-size padding of
        // the skipped control member.
        let mut payload = vec![0u8; size as usize];
        file.read_exact(&mut payload).unwrap();
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn test_find_data_member_name_with_slash() {
        let deb = deb_with_members(&[("debian-binary/", b"2.0\n"), ("data.tar/", b"x")]);
        let (_dir, path) = write_temp(&deb);
        let mut file = File::open(&path).unwrap();
        let (codec, _) = find_data_member(&mut file).unwrap();
        assert_eq!(codec, Codec::Plain);
    }

    #[test]
    fn test_bad_magic_is_error() {
        let (_dir, path) = write_temp(b"definitely not ar");
        let mut file = File::open(&path).unwrap();
        assert!(find_data_member(&mut file).is_err());
    }

    #[test]
    fn test_bad_format_version_is_error() {
        let deb = deb_with_members(&[("debian-binary", b"3.0\n"), ("data.tar", b"x")]);
        let (_dir, path) = write_temp(&deb);
        let mut file = File::open(&path).unwrap();
        assert!(find_data_member(&mut file).is_err());
    }

    #[test]
    fn test_missing_data_member_is_error() {
        let deb = deb_with_members(&[("debian-binary", b"2.0\n"), ("control.tar.gz", b"c")]);
        let (_dir, path) = write_temp(&deb);
        let mut file = File::open(&path).unwrap();
        let err = find_data_member(&mut file).unwrap_err();
        assert!(err.to_string().contains("no data member"));
    }

    #[test]
    fn test_extract_deb_into_target() {
        // Assemble a real data.tar with the system tar, wrap it in ar
        // framing, and extract it into a fresh target root.
        let workdir = tempfile::tempdir().unwrap();
        let tree = workdir.path().join("tree");
        std::fs::create_dir_all(tree.join("etc")).unwrap();
        std::fs::write(tree.join("etc/issue"), "Debian\n").unwrap();

        let status = std::process::Command::new("tar")
            .args(["-cf", "../data.tar", "."])
            .current_dir(&tree)
            .status()
            .unwrap();
        assert!(status.success());
        let data = std::fs::read(workdir.path().join("data.tar")).unwrap();

        let deb = deb_with_members(&[
            ("debian-binary", b"2.0\n"),
            ("control.tar.gz", b"ignored"),
            ("data.tar", &data),
        ]);
        let deb_path = Utf8PathBuf::from_path_buf(workdir.path().join("pkg.deb")).unwrap();
        let mut f = File::create(&deb_path).unwrap();
        f.write_all(&deb).unwrap();
        drop(f);

        let target_dir = tempfile::tempdir().unwrap();
        let target =
            TargetRoot::new(Utf8PathBuf::from_path_buf(target_dir.path().to_path_buf()).unwrap());
        let frontend = Frontend::new(Verbosity::Quiet);

        extract_deb(&deb_path, &target, &frontend).unwrap();
        assert_eq!(
            std::fs::read_to_string(target.path("etc/issue")).unwrap(),
            "Debian\n"
        );
    }
}
