//! Bounded backup set for one source
//!
//! Outgoing artifacts are moved (never copied) into the backup directory
//! under `<stem>_backup_<UTC timestamp>.<ext>`. The timestamp orders the
//! set, so eviction always removes the oldest entries first.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use archive_fs::io;
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::{Error, Result};

const STAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";

static BACKUP_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<stem>.+)_backup_(?P<stamp>\d{14,})(?:\.[^.]+)?$")
        .expect("backup name pattern is valid")
});

/// One file in the backup set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub file_name: String,
    /// Sortable timestamp from the file name
    pub stamp: String,
}

/// Preserves outgoing artifacts and enforces the backup bound.
#[derive(Debug, Clone)]
pub struct BackupRotator {
    dir: PathBuf,
}

impl BackupRotator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Backup file name for `original` preserved at `at`.
    pub fn backup_name(original: &Path, at: DateTime<Utc>) -> String {
        let stem = original
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stamp = at.format(STAMP_FORMAT);
        match original.extension() {
            Some(ext) => format!("{}_backup_{}.{}", stem, stamp, ext.to_string_lossy()),
            None => format!("{}_backup_{}", stem, stamp),
        }
    }

    /// Unused backup path for `current`, named after the present time.
    pub fn destination_for(&self, current: &Path) -> PathBuf {
        let mut at = Utc::now();
        let mut dest = self.dir.join(Self::backup_name(current, at));
        while dest.exists() {
            at += chrono::Duration::milliseconds(1);
            dest = self.dir.join(Self::backup_name(current, at));
        }
        dest
    }

    /// Move `current` into the backup directory.
    ///
    /// Returns `None` when there is nothing to preserve.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backup`] if the move fails. `current` is left in
    /// place in that case.
    pub fn preserve(&self, current: &Path) -> Result<Option<PathBuf>> {
        if !current.is_file() {
            tracing::debug!(path = %current.display(), "no current artifact to preserve");
            return Ok(None);
        }
        let dest = self.destination_for(current);
        self.preserve_to(current, &dest)?;
        Ok(Some(dest))
    }

    /// Move `current` to a destination picked with
    /// [`destination_for`](Self::destination_for).
    pub fn preserve_to(&self, current: &Path, dest: &Path) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::backup(&self.dir, e.to_string()))?;
        io::move_file(current, dest).map_err(|e| Error::backup(current, e.to_string()))?;
        tracing::info!(from = %current.display(), to = %dest.display(), "artifact preserved");
        Ok(())
    }

    /// Put a preserved artifact back, used when promotion fails after
    /// preservation.
    pub fn restore(&self, backup: &Path, original: &Path) -> Result<()> {
        io::move_file(backup, original).map_err(|e| Error::backup(backup, e.to_string()))?;
        tracing::warn!(from = %backup.display(), to = %original.display(), "preserved artifact restored");
        Ok(())
    }

    /// Backups oldest first. Files that do not follow the naming scheme
    /// are not part of the set.
    pub fn list(&self) -> Result<Vec<BackupEntry>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::backup(&self.dir, e.to_string())),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::backup(&self.dir, e.to_string()))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            // Hidden names are in-flight copies, never finished backups
            if file_name.starts_with('.') {
                continue;
            }
            let Some(caps) = BACKUP_NAME.captures(&file_name) else {
                continue;
            };
            if !entry.path().is_file() {
                continue;
            }
            backups.push(BackupEntry {
                path: entry.path(),
                stamp: caps["stamp"].to_string(),
                file_name,
            });
        }
        backups.sort_by(|a, b| {
            (a.stamp.len(), &a.stamp, &a.file_name).cmp(&(b.stamp.len(), &b.stamp, &b.file_name))
        });
        Ok(backups)
    }

    /// Delete the oldest backups until at most `max_backups` remain.
    ///
    /// Paths in `protected` are never deleted, even if that leaves the set
    /// above the bound. Returns the deleted paths.
    pub fn enforce_limit(&self, max_backups: usize, protected: &[&Path]) -> Result<Vec<PathBuf>> {
        let backups = self.list()?;
        let mut excess = backups.len().saturating_sub(max_backups);
        let mut removed = Vec::new();

        for entry in backups {
            if excess == 0 {
                break;
            }
            if protected.iter().any(|p| *p == entry.path) {
                continue;
            }
            io::remove_if_exists(&entry.path).map_err(|e| Error::backup(&entry.path, e.to_string()))?;
            tracing::info!(path = %entry.path.display(), "evicted old backup");
            removed.push(entry.path);
            excess -= 1;
        }

        if excess > 0 {
            tracing::warn!(
                dir = %self.dir.display(),
                max_backups,
                over_by = excess,
                "backup set exceeds its bound because remaining entries are protected"
            );
        }
        Ok(removed)
    }
}
