//! Status/error type shared across the mirrored storage core.
//!
//! Four variants cover the failure modes this crate surfaces:
//! `IoError`, `Corruption`, `InvalidArgument`, `NotFound`. There is no
//! explicit `Ok` variant — success is represented by `Result::Ok`
//! throughout the crate.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// The error type returned by every fallible operation in this crate.
#[derive(Debug)]
pub enum Status {
    /// A syscall failed. Carries the path it was operating on (when
    /// known) and the underlying I/O error.
    IoError {
        /// Path the failing syscall was operating on, if known.
        path: Option<PathBuf>,
        /// Underlying OS error.
        source: io::Error,
    },
    /// The on-disk table format was malformed.
    Corruption(String),
    /// A caller passed a range or argument outside of what the target
    /// supports (e.g. a read past EOF).
    InvalidArgument(String),
    /// A lookup (table cache, filename) found nothing.
    NotFound(String),
}

impl Status {
    /// Build an `IoError` tagged with the path that failed.
    pub fn io_error(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Status::IoError {
            path: Some(path.into()),
            source,
        }
    }

    /// True if this is an `IoError` wrapping the given OS errno.
    pub fn is_errno(&self, errno: i32) -> bool {
        matches!(self, Status::IoError { source, .. } if source.raw_os_error() == Some(errno))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::IoError { path: Some(p), source } => {
                write!(f, "I/O error on {}: {}", p.display(), source)
            }
            Status::IoError { path: None, source } => write!(f, "I/O error: {}", source),
            Status::Corruption(msg) => write!(f, "corruption: {}", msg),
            Status::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Status::NotFound(msg) => write!(f, "not found: {}", msg),
        }
    }
}

impl std::error::Error for Status {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Status::IoError { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for Status {
    fn from(source: io::Error) -> Self {
        Status::IoError { path: None, source }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Status>;
