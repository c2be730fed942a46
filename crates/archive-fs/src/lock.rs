//! Advisory per-source lock
//!
//! A cycle holds the lock from recovery through commit. The lock file
//! carries a small JSON record of its holder, written after the advisory
//! lock is taken and erased on release. That record is what makes a crashed
//! run detectable: the kernel drops the advisory lock when a process dies,
//! but the record stays behind.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Who holds (or last held) a source lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    /// Label of the locked resource, usually the source name
    pub label: String,
    /// Process id of the holder
    pub pid: u32,
    /// When the lock was taken
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    fn current(label: &str) -> Self {
        Self {
            label: label.to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for LockHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (pid {}, since {})",
            self.label,
            self.pid,
            self.acquired_at.to_rfc3339()
        )
    }
}

/// Scoped exclusive lock over one source.
///
/// Released on drop, so every exit path of the owning scope gives it back.
#[derive(Debug)]
pub struct SourceLock {
    file: File,
    path: PathBuf,
    holder: LockHolder,
    released: bool,
}

impl SourceLock {
    /// Acquire the lock without blocking.
    ///
    /// # Errors
    ///
    /// - [`Error::LockHeld`] when another live holder owns the lock.
    /// - [`Error::StaleLock`] when a previous holder died without releasing.
    ///   The stale record is left in place for an operator to inspect.
    pub fn acquire(path: &Path, label: &str) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let Some(mut file) = lock_linked(path, true)? else {
            return Err(Error::LockFailed {
                path: path.to_path_buf(),
            });
        };

        let mut existing = String::new();
        file.read_to_string(&mut existing)
            .map_err(|e| Error::io(path, e))?;
        if !existing.trim().is_empty() {
            let _ = file.unlock();
            return Err(Error::StaleLock {
                path: path.to_path_buf(),
                holder: describe_holder(&existing),
            });
        }

        let holder = LockHolder::current(label);
        let record = serde_json::to_string(&holder).map_err(|e| Error::ConfigSerialize {
            path: path.to_path_buf(),
            format: "JSON".into(),
            message: e.to_string(),
        })?;
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.write_all(record.as_bytes()))
            .and_then(|()| file.sync_all())
            .map_err(|e| Error::io(path, e))?;

        tracing::debug!(path = %path.display(), %holder, "lock acquired");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            holder,
            released: false,
        })
    }

    /// The record written for this holder.
    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly, surfacing any cleanup error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.cleanup()
    }

    /// Remove a stale lock left by a dead process.
    ///
    /// Returns `true` if a lock file was removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockHeld`] if the lock is currently held by a live
    /// process; a live lock is never overridden.
    pub fn clear_stale(path: &Path) -> Result<bool> {
        let Some(file) = lock_linked(path, false)? else {
            return Ok(false);
        };

        fs::remove_file(path).map_err(|e| Error::io(path, e))?;
        let _ = file.unlock();
        tracing::warn!(path = %path.display(), "stale lock cleared");
        Ok(true)
    }

    fn cleanup(&mut self) -> Result<()> {
        // Erase the record before unlinking so a reader racing the unlink
        // never mistakes a clean release for a crash
        self.file
            .set_len(0)
            .map_err(|e| Error::io(&self.path, e))?;
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(&self.path, e)),
        }
        self.file.unlock().map_err(|_| Error::LockFailed {
            path: self.path.clone(),
        })?;
        tracing::debug!(path = %self.path.display(), "lock released");
        Ok(())
    }
}

impl Drop for SourceLock {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = self.cleanup() {
                tracing::error!(error = %e, "failed to release lock");
            }
        }
    }
}

/// Attempts before giving up on a lock file that keeps being replaced.
const RELINK_ATTEMPTS: usize = 8;

/// Open `path` and take the advisory lock on the inode still linked there.
///
/// A releasing holder unlinks the file after erasing it, so a handle
/// opened just before that unlink locks an orphan. Such a handle is
/// dropped and the path reopened. Returns `None` when `create` is false
/// and no lock file exists.
fn lock_linked(path: &Path, create: bool) -> Result<Option<File>> {
    for _ in 0..RELINK_ATTEMPTS {
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if !create && e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(path, e)),
        };

        if let Err(e) = file.try_lock_exclusive() {
            if is_contended(&e) {
                return Err(Error::LockHeld {
                    path: path.to_path_buf(),
                    holder: describe_holder(&fs::read_to_string(path).unwrap_or_default()),
                });
            }
            return Err(Error::LockFailed {
                path: path.to_path_buf(),
            });
        }

        if is_linked(&file, path).map_err(|e| Error::io(path, e))? {
            return Ok(Some(file));
        }
        tracing::debug!(path = %path.display(), "lock file replaced while locking, retrying");
        let _ = file.unlock();
        if !create && !path.exists() {
            return Ok(None);
        }
    }
    Ok(None)
}

/// Whether `file` is still the file found at `path`.
#[cfg(unix)]
fn is_linked(file: &File, path: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Windows refuses to delete an open file, so the path cannot be relinked
/// under a held handle.
#[cfg(not(unix))]
fn is_linked(_file: &File, path: &Path) -> std::io::Result<bool> {
    Ok(path.exists())
}

fn is_contended(error: &std::io::Error) -> bool {
    error.kind() == ErrorKind::WouldBlock
        || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn describe_holder(record: &str) -> String {
    match serde_json::from_str::<LockHolder>(record) {
        Ok(holder) => holder.to_string(),
        Err(_) if record.trim().is_empty() => "unknown holder".to_string(),
        Err(_) => format!("unreadable record {:?}", record.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn holder_display_mentions_label_and_pid() {
        let holder = LockHolder::current("wikipedia");
        let shown = holder.to_string();
        assert!(shown.contains("wikipedia"));
        assert!(shown.contains(&std::process::id().to_string()));
    }

    #[test]
    fn describe_holder_handles_garbage() {
        assert_eq!(describe_holder(""), "unknown holder");
        assert!(describe_holder("not json").contains("unreadable"));
    }

    #[test]
    fn handle_opened_before_release_is_not_linked() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("source.lock");

        let first = SourceLock::acquire(&path, "wikipedia").unwrap();
        let early = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        first.release().unwrap();

        // The early handle can lock the orphaned inode, which must not count
        early.try_lock_exclusive().unwrap();
        assert!(!is_linked(&early, &path).unwrap());

        let second = SourceLock::acquire(&path, "wikipedia").unwrap();
        assert!(is_linked(&second.file, &path).unwrap());
        assert!(!is_linked(&early, &path).unwrap());
    }

    #[test]
    fn clear_stale_without_lock_file_is_a_no_op() {
        let temp = TempDir::new().unwrap();
        assert!(!SourceLock::clear_stale(&temp.path().join("absent.lock")).unwrap());
    }

    #[test]
    fn release_removes_lock_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("source.lock");

        let lock = SourceLock::acquire(&path, "wikipedia").unwrap();
        assert!(path.exists());
        lock.release().unwrap();
        assert!(!path.exists());
    }
}
