//! Error types for archive-fs

use std::path::PathBuf;

/// Result type for archive-fs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in archive-fs operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {format} config at {path}: {message}")]
    ConfigParse {
        path: PathBuf,
        format: String,
        message: String,
    },

    #[error("Failed to serialize {format} config for {path}: {message}")]
    ConfigSerialize {
        path: PathBuf,
        format: String,
        message: String,
    },

    #[error("Unsupported config format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Lock at {path} is held by {holder}")]
    LockHeld { path: PathBuf, holder: String },

    #[error("Stale lock at {path} left by {holder}; clear it once the previous run is confirmed dead")]
    StaleLock { path: PathBuf, holder: String },

    #[error("Lock acquisition failed for {path}")]
    LockFailed { path: PathBuf },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
