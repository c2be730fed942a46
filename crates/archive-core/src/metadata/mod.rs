//! Persistent version history for one source
//!
//! The history is a JSON array of [`VersionRecord`]s in commit order. The
//! last element is the current version. The file is only ever replaced by
//! write-to-temp-then-rename, so a reader sees either the previous history
//! or the new one.

mod journal;

pub use journal::{
    PendingCommit, PreservedArtifact, clear_pending, pending_path, read_pending, write_pending,
};

use std::path::{Path, PathBuf};

use archive_fs::io;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One committed artifact. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Version token extracted from the file name
    pub version: String,
    pub file_name: String,
    pub size_bytes: u64,
    /// `sha256:<hex>` of the artifact content
    pub checksum: String,
    pub downloaded_at: DateTime<Utc>,
    /// Canonical location of the artifact when it was committed
    pub path: PathBuf,
}

/// Ordered version history backed by a JSON file.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
    records: Vec<VersionRecord>,
}

impl MetadataStore {
    /// Load the history at `path`. A missing file is an empty history.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptMetadata`] if the file exists but does not
    /// parse, and an I/O error if it cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        let records = match io::read_text_if_exists(path)? {
            None => Vec::new(),
            Some(content) if content.trim().is_empty() => Vec::new(),
            Some(content) => {
                serde_json::from_str(&content).map_err(|e| Error::CorruptMetadata {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?
            }
        };
        tracing::debug!(path = %path.display(), records = records.len(), "metadata loaded");
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    /// Load, or when `recover` is set, move an unparsable file aside and
    /// start with an empty history.
    pub fn load_or_recover(path: &Path, recover: bool) -> Result<Self> {
        match Self::load(path) {
            Err(Error::CorruptMetadata { message, .. }) if recover => {
                let aside = corrupt_path(path, Utc::now());
                io::move_file(path, &aside)?;
                tracing::warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %message,
                    "corrupt metadata set aside, starting with empty history"
                );
                Ok(Self {
                    path: path.to_path_buf(),
                    records: Vec::new(),
                })
            }
            other => other,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records, oldest first.
    pub fn records(&self) -> &[VersionRecord] {
        &self.records
    }

    /// The most recently committed record.
    pub fn current(&self) -> Option<&VersionRecord> {
        self.records.last()
    }

    pub fn current_version(&self) -> Option<&str> {
        self.current().map(|r| r.version.as_str())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a verified record and persist the whole history.
    ///
    /// On a failed write the in-memory history is rolled back too, so the
    /// store keeps matching what is on disk.
    pub fn append(&mut self, record: VersionRecord) -> Result<()> {
        self.records.push(record);
        if let Err(e) = self.persist() {
            self.records.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Write the history atomically.
    ///
    /// Serialization is deterministic: persisting an unchanged store
    /// reproduces the file byte for byte.
    pub fn persist(&self) -> Result<()> {
        let mut content = serde_json::to_string_pretty(&self.records)?;
        content.push('\n');
        io::write_atomic(&self.path, content.as_bytes())?;
        tracing::debug!(path = %self.path.display(), records = self.records.len(), "metadata persisted");
        Ok(())
    }
}

fn corrupt_path(path: &Path, at: DateTime<Utc>) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}.corrupt-{}", name, at.format("%Y%m%d%H%M%S")))
}
