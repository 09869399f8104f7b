//! Transfer Error Types
//!
//! Error taxonomy for the file-content transfer engine. Only
//! [`CopyError::InvalidParameter`] and [`CopyError::TransportFault`] are
//! call-scoped; everything else is confined to the record that raised it.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, CopyError>;

/// Transfer engine error types
#[derive(Error, Debug)]
pub enum CopyError {
    /// Missing or malformed call parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A URI could not be resolved to a real path
    #[error("Path resolution failed: {0}")]
    PathResolution(String),

    /// Destination already exists and the conflict policy says skip
    #[error("Destination already exists: {}", .0.display())]
    FileConflict(PathBuf),

    /// Cross-device transfer of something that is not a regular file
    #[error("Remote transfer of directories is not supported: {}", .0.display())]
    UnsupportedRemoteDirectory(PathBuf),

    /// Local copy failed
    #[error("Local copy failed at {}: {source}", path.display())]
    LocalCopy {
        /// Path being read or written when the failure happened
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Filesystem watch setup or teardown failed
    #[error("Watch error: {0}")]
    Watch(String),

    /// Remote session rejected or failed
    #[error("Remote session failed (code {code}): {message}")]
    RemoteSession {
        /// Code reported by the remote transfer service
        code: i32,
        /// Human readable context
        message: String,
    },

    /// The remote transfer service itself is unreachable
    #[error("Transport fault: {0}")]
    TransportFault(String),

    /// Transfer cancelled
    #[error("Transfer cancelled")]
    Cancelled,

    /// IO error outside a specific copy step
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CopyError {
    /// Shorthand for a [`CopyError::LocalCopy`] at `path`
    pub fn local(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LocalCopy {
            path: path.into(),
            source,
        }
    }

    /// Whether this error only affects the record that raised it
    pub fn is_record_scoped(&self) -> bool {
        !matches!(self, Self::InvalidParameter(_) | Self::TransportFault(_))
    }

    /// Numeric code carried in a record's copy info
    ///
    /// Remote codes are passed through unchanged; engine-side failures use
    /// small negative values so they never collide with service codes.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidParameter(_) => -1,
            Self::PathResolution(_) => -2,
            Self::FileConflict(_) => -3,
            Self::UnsupportedRemoteDirectory(_) => -4,
            Self::LocalCopy { source, .. } => source.raw_os_error().unwrap_or(-5),
            Self::Watch(_) => -6,
            Self::RemoteSession { code, .. } => *code,
            Self::TransportFault(_) => -7,
            Self::Cancelled => -8,
            Self::Io(e) => e.raw_os_error().unwrap_or(-9),
        }
    }
}

impl From<nix::errno::Errno> for CopyError {
    fn from(errno: nix::errno::Errno) -> Self {
        CopyError::Io(std::io::Error::from(errno))
    }
}

/// Error classification for per-record reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Bad call parameters, aborts before any work
    Parameter,
    /// Path or URI resolution
    Path,
    /// Conflict-policy skip (not a failure)
    Conflict,
    /// Local copy, watch or filesystem errors
    Local,
    /// Remote session errors
    Remote,
    /// Remote service unreachable
    Transport,
    /// User cancellation
    Cancelled,
}

/// Classify error for reporting
pub fn classify_error(error: &CopyError) -> ErrorType {
    match error {
        CopyError::InvalidParameter(_) => ErrorType::Parameter,

        CopyError::PathResolution(_) => ErrorType::Path,

        CopyError::FileConflict(_) => ErrorType::Conflict,

        CopyError::LocalCopy { .. } | CopyError::Watch(_) | CopyError::Io(_) => ErrorType::Local,

        CopyError::UnsupportedRemoteDirectory(_) | CopyError::RemoteSession { .. } => {
            ErrorType::Remote
        }

        CopyError::TransportFault(_) => ErrorType::Transport,

        CopyError::Cancelled => ErrorType::Cancelled,
    }
}
