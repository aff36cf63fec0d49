//! Release signature verification through `gpgv`.
//!
//! `gpgv` runs with its machine-readable status stream on fd 3; the
//! verdict counts `GOODSIG`/`BADSIG` lines and passes only when at least
//! one good signature and no bad signature was seen. The keyring is
//! either an explicit path or a name searched in the standard keyring
//! directories plus the config directory.

use std::os::unix::net::UnixStream;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::error::DebstrapError;
use crate::exec::{self, ExecSpec, FdHandler, Flow, Interest, IoSpec, LineBuffer};
use crate::frontend::Frontend;

const KEYRING_DIRS: [&str; 2] = ["/usr/local/share/keyrings", "/usr/share/keyrings"];

const GOODSIG: &str = "[GNUPG:] GOODSIG ";
const BADSIG: &str = "[GNUPG:] BADSIG ";

/// Resolves a keyring argument to an existing file.
///
/// A name containing `/` is used as a literal path; a bare name is looked
/// up in the keyring directories and finally the config directory.
pub fn resolve_keyring(name: &str, configdir: &Utf8Path) -> Option<Utf8PathBuf> {
    if name.contains('/') {
        let path = Utf8PathBuf::from(name);
        return path.is_file().then_some(path);
    }

    KEYRING_DIRS
        .iter()
        .map(|dir| Utf8Path::new(dir).join(name))
        .chain(std::iter::once(configdir.join(name)))
        .find(|path| path.is_file())
}

/// Counts signature verdicts on the gpgv status stream.
struct GpgStatusHandler<'a> {
    frontend: &'a Frontend,
    good: u32,
    bad: u32,
    lines: LineBuffer,
}

impl GpgStatusHandler<'_> {
    fn consume(&mut self, line: &str) -> (bool, bool) {
        debug!(line, "gnupg status");
        if let Some(rest) = line.strip_prefix(GOODSIG) {
            let uid = rest.split_once(' ').map_or(rest, |(_, uid)| uid);
            self.frontend
                .info(&format!("Good signature from \"{}\"", uid));
            return (true, false);
        }
        if let Some(rest) = line.strip_prefix(BADSIG) {
            let uid = rest.split_once(' ').map_or(rest, |(_, uid)| uid);
            self.frontend
                .warning(&format!("BAD signature from \"{}\"", uid));
            return (false, true);
        }
        (false, false)
    }
}

impl FdHandler for GpgStatusHandler<'_> {
    fn ready(&mut self, stream: &mut UnixStream) -> Result<Flow, DebstrapError> {
        let mut verdicts = Vec::new();
        let flow = self
            .lines
            .read_lines(stream, |line| verdicts.push(line.to_string()))
            .map_err(|e| DebstrapError::io("gpgv status stream", e))?;
        for line in verdicts {
            let (good, bad) = self.consume(&line);
            self.good += good as u32;
            self.bad += bad as u32;
        }
        Ok(flow)
    }
}

/// Verifies a Release file against its detached signature.
///
/// Returns a validation error unless gpgv reported at least one good and
/// zero bad signatures.
pub fn verify_release(
    keyring: &Utf8Path,
    file: &Utf8Path,
    signature: &Utf8Path,
    frontend: &Frontend,
) -> Result<(), DebstrapError> {
    let spec = ExecSpec::new(vec![
        "gpgv".to_string(),
        "--logger-fd".to_string(),
        "1".to_string(),
        "--status-fd".to_string(),
        "3".to_string(),
        "--keyring".to_string(),
        keyring.to_string(),
        signature.to_string(),
        file.to_string(),
    ]);

    let mut status = GpgStatusHandler {
        frontend,
        good: 0,
        bad: 0,
        lines: LineBuffer::default(),
    };
    let (mut out_log, mut err_log) = exec::log_handlers(frontend);
    let mut io = [
        IoSpec::new(1, Interest::Read, &mut out_log),
        IoSpec::new(2, Interest::Read, &mut err_log),
        IoSpec::new(3, Interest::Read, &mut status),
    ];

    // gpgv exits non-zero on a failed verification; the verdict comes
    // from the status stream, not the exit code.
    exec::execute_status(&spec, &mut io)?;

    debug!(good = status.good, bad = status.bad, "gpgv verdict");
    if status.good > 0 && status.bad == 0 {
        Ok(())
    } else {
        Err(DebstrapError::Validation(format!(
            "signature verification failed for {} ({} good, {} bad)",
            file, status.good, status.bad
        )))
    }
}
