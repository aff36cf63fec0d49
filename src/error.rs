//! Domain-specific error types for debstrap.
//!
//! This module defines `DebstrapError`, a `thiserror`-based enum that
//! provides typed error variants for the failure modes of the bootstrap
//! pipeline. Public API functions return `Result<T, DebstrapError>` for
//! programmatic error handling, while orchestration boundaries use
//! `anyhow::Result`.
//!
//! `DebstrapError` implements `Into<anyhow::Error>`, so the `?` operator
//! converts it automatically at boundaries that return `anyhow::Result`.

use std::io;

/// Formats an IO error kind into a human-readable message.
///
/// Provides consistent messages for common IO error kinds instead of the
/// OS-level ones (e.g., "No such file or directory (os error 2)"). For
/// unrecognized kinds, falls back to the OS-level error message.
pub(crate) fn io_error_kind_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "I/O error: not found".to_string(),
        io::ErrorKind::PermissionDenied => "I/O error: permission denied".to_string(),
        io::ErrorKind::IsADirectory => "I/O error: is a directory".to_string(),
        _ => format!("I/O error: {}", err),
    }
}

/// Domain-specific error type for debstrap.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DebstrapError {
    /// A configuration file could not be loaded, or a field is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// An HTTP download failed (non-2xx status, connection failure,
    /// refused redirect).
    #[error("download failed: {source_path}: {reason}")]
    Network {
        /// Mirror-relative path that was requested.
        source_path: String,
        /// Human-readable reason for the failure.
        reason: String,
    },

    /// A downloaded or cached artifact failed validation (checksum
    /// mismatch, bad or missing signature).
    #[error("validation error: {0}")]
    Validation(String),

    /// A Release, Packages, or suite config file is malformed.
    #[error("parse error: {what}: {reason}")]
    Parse {
        /// Which artifact was being parsed.
        what: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A `.deb` archive could not be extracted (bad ar framing, missing
    /// data member, decoder failure).
    #[error("extraction error: {0}")]
    Extract(String),

    /// A subprocess failed (spawn failure, non-zero exit, signal).
    #[error("command execution failed: {command}: {status}")]
    Execution {
        /// The command that was executed.
        command: String,
        /// Exit code, signal information, or a description of the
        /// internal error.
        status: String,
    },

    /// An I/O operation failed with contextual information.
    #[error("{context}: {message}")]
    Io {
        /// A file path or an operation description with a path.
        context: String,
        /// Human-readable description derived from
        /// [`io_error_kind_message`].
        message: String,
        /// The underlying I/O error, preserved for programmatic
        /// inspection.
        #[source]
        source: std::io::Error,
    },
}

impl DebstrapError {
    /// Creates an `Io` variant with the `message` field automatically
    /// derived from the `source` via [`io_error_kind_message`].
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }

    /// Creates an `Execution` variant from a command line and a status
    /// description.
    pub(crate) fn execution(command: impl Into<String>, status: impl Into<String>) -> Self {
        Self::Execution {
            command: command.into(),
            status: status.into(),
        }
    }

    /// Creates a `Parse` variant.
    pub(crate) fn parse(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_display() {
        let err = DebstrapError::Config("missing suites file".to_string());
        assert_eq!(err.to_string(), "configuration error: missing suites file");
    }

    #[test]
    fn test_network_display() {
        let err = DebstrapError::Network {
            source_path: "dists/stable/Release".to_string(),
            reason: "HTTP status 404".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "download failed: dists/stable/Release: HTTP status 404"
        );
    }

    #[test]
    fn test_execution_display() {
        let err = DebstrapError::execution("dpkg", "exit status: 2");
        assert_eq!(
            err.to_string(),
            "command execution failed: dpkg: exit status: 2"
        );
    }

    #[test]
    fn test_parse_display() {
        let err = DebstrapError::parse("Packages", "empty index");
        assert_eq!(err.to_string(), "parse error: Packages: empty index");
    }

    #[test]
    fn test_io_display() {
        let source = io::Error::new(io::ErrorKind::NotFound, "entity not found");
        let err = DebstrapError::io("/target/var/cache/bootstrap", source);
        assert_eq!(
            err.to_string(),
            "/target/var/cache/bootstrap: I/O error: not found"
        );
    }

    #[test]
    fn test_io_source_preserved() {
        let source = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = DebstrapError::io("/target", source);
        match &err {
            DebstrapError::Io { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_into_anyhow_error() {
        let err = DebstrapError::Validation("checksum mismatch".to_string());
        let anyhow_err: anyhow::Error = err.into();
        let downcast = anyhow_err.downcast_ref::<DebstrapError>();
        assert!(matches!(downcast, Some(DebstrapError::Validation(_))));
    }
}
