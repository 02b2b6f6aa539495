//! CORE error type.
//!
//! Every failure the library surfaces is one of these kinds, each mapped to
//! one of the process exit codes described for the CLI (`0` success is not
//! represented here since it isn't an error).

use std::path::PathBuf;

/// The CORE's error kinds.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("I/O error on {path}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive is corrupt: {0}")]
    ArchiveCorrupt(String),

    #[error("failed to write archive: {0}")]
    ArchiveWriteFailure(String),

    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("interrupted")]
    Interrupted,
}

impl Error {
    /// The process exit code this error kind maps to.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgs(_) => 2,
            Self::FileNotFound(_) | Self::PermissionDenied(_) | Self::IoFailure { .. } => 3,
            Self::ArchiveCorrupt(_) | Self::ArchiveWriteFailure(_) => 4,
            Self::SecurityViolation(_) | Self::ResourceExhausted(_) => 3,
            Self::Interrupted => 1,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound(path),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            _ => Self::IoFailure { path, source },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
