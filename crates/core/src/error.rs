//! Error types for the Shelf store and server.
//!
//! One unified enum, built with `thiserror`. The propagation policy is
//! flat: an operation reports a status to its immediate caller and emits
//! at most one diagnostic line; errors never unwind through multiple
//! layers. Only `Error::is_fatal` errors terminate the process (exit 1),
//! everything else is survivable.

use crate::key::KeyError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Shelf operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for store, job, and session operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, pipe reads/writes)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A file or pipe could not be opened
    #[error("failed to open {}: {source}", path.display())]
    ResourceOpen {
        /// Path that failed to open
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Unparseable command, record, or opcode
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Key or value rejected by validation
    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    /// A write to a client pipe failed (client likely gone)
    #[error("pipe write failed: {0}")]
    PipeWrite(io::Error),

    /// Could not fork a snapshot child process
    #[error("failed to fork snapshot child: {0}")]
    SnapshotFork(String),

    /// Fatal startup failure: invalid arguments, store init, thread spawn
    #[error("startup error: {0}")]
    Startup(String),
}

impl Error {
    /// Create a `ResourceOpen` error.
    pub fn resource_open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::ResourceOpen {
            path: path.into(),
            source,
        }
    }

    /// Create a `MalformedInput` error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedInput(message.into())
    }

    /// Create a `Startup` error.
    pub fn startup(message: impl Into<String>) -> Self {
        Error::Startup(message.into())
    }

    /// Whether this error should terminate the process with exit code 1.
    ///
    /// Everything except startup failures is survivable: the operation is
    /// abandoned, a diagnostic is logged, and the server keeps running.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Startup(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_io() {
        let err = Error::Io(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_display_resource_open() {
        let err = Error::resource_open(
            "/tmp/missing.job",
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        );
        let msg = err.to_string();
        assert!(msg.contains("failed to open"));
        assert!(msg.contains("/tmp/missing.job"));
    }

    #[test]
    fn test_display_malformed() {
        let err = Error::malformed("unknown opcode 9");
        assert!(err.to_string().contains("unknown opcode 9"));
    }

    #[test]
    fn test_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_key_error() {
        let err: Error = KeyError::Empty.into();
        assert!(matches!(err, Error::InvalidKey(KeyError::Empty)));
    }

    #[test]
    fn test_only_startup_is_fatal() {
        assert!(Error::startup("bad args").is_fatal());
        assert!(!Error::malformed("junk").is_fatal());
        assert!(!Error::PipeWrite(io::Error::new(io::ErrorKind::BrokenPipe, "gone")).is_fatal());
        assert!(!Error::SnapshotFork("EAGAIN".to_string()).is_fatal());
    }

    #[test]
    fn test_result_alias() {
        fn ok() -> Result<u32> {
            Ok(7)
        }
        assert_eq!(ok().unwrap(), 7);
    }
}
