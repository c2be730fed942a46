//! Pending-commit journal
//!
//! Written before the outgoing artifact is moved to backups and removed
//! once the history append has persisted. A journal found at the start of
//! a cycle marks a commit that was interrupted somewhere in between.

use std::path::{Path, PathBuf};

use archive_fs::io;
use serde::{Deserialize, Serialize};

use super::VersionRecord;
use crate::Result;

/// A commit in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommit {
    /// Record to append once the new artifact sits at `record.path`
    pub record: VersionRecord,
    /// Where the outgoing artifact is being moved, if there is one
    pub preserved: Option<PreservedArtifact>,
}

/// An outgoing artifact and the backup path it moves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreservedArtifact {
    pub original: PathBuf,
    pub backup: PathBuf,
}

/// `<metadata file>.pending`, beside the history it belongs to.
pub fn pending_path(metadata_path: &Path) -> PathBuf {
    let mut name = metadata_path.as_os_str().to_os_string();
    name.push(".pending");
    PathBuf::from(name)
}

pub fn write_pending(metadata_path: &Path, pending: &PendingCommit) -> Result<()> {
    let content = serde_json::to_string_pretty(pending)?;
    io::write_atomic(&pending_path(metadata_path), content.as_bytes())?;
    Ok(())
}

/// Read the pending commit, if any.
///
/// An unreadable journal is discarded with a warning.
pub fn read_pending(metadata_path: &Path) -> Result<Option<PendingCommit>> {
    let path = pending_path(metadata_path);
    let Some(content) = io::read_text_if_exists(&path)? else {
        return Ok(None);
    };
    match serde_json::from_str(&content) {
        Ok(pending) => Ok(Some(pending)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "discarding unreadable commit journal");
            io::remove_if_exists(&path)?;
            Ok(None)
        }
    }
}

pub fn clear_pending(metadata_path: &Path) -> Result<()> {
    io::remove_if_exists(&pending_path(metadata_path))?;
    Ok(())
}
