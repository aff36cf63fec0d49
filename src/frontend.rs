//! User-facing message and progress reporting.
//!
//! Diagnostics for developers go through `tracing`; everything the person
//! running the bootstrap is meant to see goes through [`Frontend`], which
//! prefixes each message with a level glyph (`E:`, `W:`, `I:`, `P:`,
//! `D:`), filters by the requested verbosity, and mirrors all non-debug
//! messages into the cumulative `var/log/bootstrap.log` inside the target
//! once that file has been opened.

use std::fs::File;
use std::io::Write;
use std::sync::Mutex;

use camino::Utf8Path;

use crate::error::DebstrapError;

/// How much output the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Errors and warnings only (`--quiet`).
    Quiet,
    /// Progress and info messages (default).
    Normal,
    /// Subprocess output too (`--verbose`).
    Verbose,
    /// Everything (`--debug`).
    Debug,
}

/// Severity of a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserLevel {
    Error,
    Warning,
    Info,
    Progress,
    /// Raw subprocess stdout, no prefix.
    Output,
    /// Raw subprocess stderr, no prefix, always shown.
    OutputStderr,
    Debug,
}

impl UserLevel {
    fn glyph(self) -> &'static str {
        match self {
            UserLevel::Error => "E: ",
            UserLevel::Warning => "W: ",
            UserLevel::Info => "I: ",
            UserLevel::Progress => "P: ",
            UserLevel::Output | UserLevel::OutputStderr => "",
            UserLevel::Debug => "D: ",
        }
    }

    fn to_stderr(self) -> bool {
        matches!(
            self,
            UserLevel::Error | UserLevel::Warning | UserLevel::OutputStderr
        )
    }
}

/// Message router shared by the whole pipeline.
///
/// Methods take `&self`; the log file handle sits behind a mutex so fd
/// handlers running during a subprocess can report without exclusive
/// access to the frontend.
pub struct Frontend {
    verbosity: Verbosity,
    logfile: Mutex<Option<File>>,
}

impl Frontend {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            logfile: Mutex::new(None),
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Opens the cumulative log file. Messages before this point only go
    /// to the terminal.
    pub fn open_log(&self, path: &Utf8Path) -> Result<(), DebstrapError> {
        let file = File::create(path).map_err(|e| DebstrapError::io(path.to_string(), e))?;
        *self.logfile.lock().expect("log file mutex poisoned") = Some(file);
        Ok(())
    }

    /// Emits a message at the given level, honoring the verbosity filter
    /// and mirroring non-debug messages to the log file.
    pub fn message(&self, level: UserLevel, text: &str) {
        if level != UserLevel::Debug
            && let Some(file) = self.logfile.lock().expect("log file mutex poisoned").as_mut()
        {
            let _ = writeln!(file, "{}{}", level.glyph(), text);
            let _ = file.flush();
        }

        let shown = match level {
            UserLevel::Error | UserLevel::Warning | UserLevel::OutputStderr => true,
            UserLevel::Info | UserLevel::Progress => self.verbosity >= Verbosity::Normal,
            UserLevel::Output => self.verbosity >= Verbosity::Verbose,
            UserLevel::Debug => self.verbosity >= Verbosity::Debug,
        };
        if !shown {
            return;
        }

        if level.to_stderr() {
            eprintln!("{}{}", level.glyph(), text);
        } else {
            println!("{}{}", level.glyph(), text);
        }
    }

    pub fn error(&self, text: &str) {
        self.message(UserLevel::Error, text);
    }

    pub fn warning(&self, text: &str) {
        self.message(UserLevel::Warning, text);
    }

    pub fn info(&self, text: &str) {
        self.message(UserLevel::Info, text);
    }

    pub fn progress_message(&self, text: &str) {
        self.message(UserLevel::Progress, text);
    }

    /// Reports overall pipeline progress in permille. No-op when quiet.
    pub fn progress(&self, permille: u32) {
        if self.verbosity >= Verbosity::Normal {
            tracing::debug!(permille, "progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_ordering() {
        assert!(Verbosity::Quiet < Verbosity::Normal);
        assert!(Verbosity::Normal < Verbosity::Verbose);
        assert!(Verbosity::Verbose < Verbosity::Debug);
    }

    #[test]
    fn test_glyphs() {
        assert_eq!(UserLevel::Error.glyph(), "E: ");
        assert_eq!(UserLevel::Warning.glyph(), "W: ");
        assert_eq!(UserLevel::Info.glyph(), "I: ");
        assert_eq!(UserLevel::Progress.glyph(), "P: ");
        assert_eq!(UserLevel::Debug.glyph(), "D: ");
        assert_eq!(UserLevel::Output.glyph(), "");
    }

    #[test]
    fn test_log_file_receives_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bootstrap.log");
        let frontend = Frontend::new(Verbosity::Quiet);
        frontend
            .open_log(camino::Utf8Path::from_path(&path).unwrap())
            .unwrap();

        frontend.message(UserLevel::Progress, "Retrieving Release");
        frontend.message(UserLevel::Debug, "not logged");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "P: Retrieving Release\n");
    }
}
