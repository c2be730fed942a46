//! Error types for archive-core

use std::path::PathBuf;

use crate::lifecycle::{CycleStage, StageEvent};

/// Result type for archive-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a download attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownloadFailure {
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("size mismatch: declared {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("staging write failed: {0}")]
    Storage(String),
}

impl DownloadFailure {
    /// Whether another attempt within the same cycle could succeed.
    ///
    /// Checksum mismatches signal corruption and are surfaced instead.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::SizeMismatch { .. } => true,
            Self::Status(code) => *code >= 500 || *code == 408 || *code == 429,
            Self::ChecksumMismatch { .. } | Self::Storage(_) => false,
        }
    }
}

/// Errors that can occur while running a lifecycle cycle
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Remote listing unreachable or nothing matched the pattern
    #[error("Resolution failed for source '{source_name}': {message}")]
    Resolution {
        source_name: String,
        message: String,
    },

    /// Fetching artifact bytes failed
    #[error("Download of {url} failed: {failure}")]
    Download {
        url: String,
        failure: DownloadFailure,
    },

    /// A staged artifact was rejected
    #[error("Verification rejected {path}: {reason}")]
    Verification { path: PathBuf, reason: String },

    /// Preserving or rotating backups failed
    #[error("Backup failed for {path}: {message}")]
    Backup { path: PathBuf, message: String },

    /// Persisted version history could not be parsed
    #[error("Corrupt metadata at {path}: {message}")]
    CorruptMetadata { path: PathBuf, message: String },

    /// Invalid configuration or source descriptor
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Stop requested; the cycle halted at a stage boundary
    #[error("Cycle cancelled at {stage}")]
    Cancelled { stage: CycleStage },

    /// The state machine was driven with an event its stage does not accept
    #[error("Invalid lifecycle transition from {from} on {event:?}")]
    InvalidTransition { from: CycleStage, event: StageEvent },

    // Transparent wrappers for underlying errors
    /// Filesystem error from archive-fs, including lock contention
    #[error(transparent)]
    Fs(#[from] archive_fs::Error),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn backup(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Backup {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the download layer may retry this error in-cycle.
    pub fn is_transient_download(&self) -> bool {
        matches!(self, Self::Download { failure, .. } if failure.is_transient())
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolution { .. } => "resolution",
            Self::Download { .. } => "download",
            Self::Verification { .. } => "verification",
            Self::Backup { .. } => "backup",
            Self::CorruptMetadata { .. } => "corrupt_metadata",
            Self::Config { .. } => "config",
            Self::Cancelled { .. } => "cancelled",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Fs(archive_fs::Error::LockHeld { .. }) => "lock_held",
            Self::Fs(archive_fs::Error::StaleLock { .. }) => "stale_lock",
            Self::Fs(_) | Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DownloadFailure::Network("reset".into()), true)]
    #[case(DownloadFailure::Timeout("read".into()), true)]
    #[case(DownloadFailure::Status(503), true)]
    #[case(DownloadFailure::Status(429), true)]
    #[case(DownloadFailure::Status(404), false)]
    #[case(DownloadFailure::SizeMismatch { expected: 10, actual: 5 }, true)]
    #[case(DownloadFailure::ChecksumMismatch { expected: "a".into(), actual: "b".into() }, false)]
    #[case(DownloadFailure::Storage("disk full".into()), false)]
    fn transient_classification(#[case] failure: DownloadFailure, #[case] transient: bool) {
        assert_eq!(failure.is_transient(), transient);
    }

    #[test]
    fn download_error_display_includes_url_and_cause() {
        let error = Error::Download {
            url: "https://mirror/wikipedia_en_2025-01.zim".into(),
            failure: DownloadFailure::Status(404),
        };
        let display = error.to_string();
        assert!(display.contains("wikipedia_en_2025-01.zim"));
        assert!(display.contains("404"));
        assert!(!error.is_transient_download());
    }

    #[test]
    fn lock_errors_have_distinct_kinds() {
        let held = Error::Fs(archive_fs::Error::LockHeld {
            path: "a.lock".into(),
            holder: "x".into(),
        });
        let stale = Error::Fs(archive_fs::Error::StaleLock {
            path: "a.lock".into(),
            holder: "x".into(),
        });
        assert_eq!(held.kind(), "lock_held");
        assert_eq!(stale.kind(), "stale_lock");
    }
}
