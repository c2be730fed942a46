//! Atomic I/O operations with file locking

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use fs2::FileExt;

use crate::{Error, Result};

/// Distinguishes temp files of concurrent writers within one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write content atomically to a file with locking.
///
/// Uses write-to-temp-then-rename strategy to prevent partial writes.
/// Acquires an advisory lock on the temp file while it is being filled.
/// A crash at any point leaves either the previous content or the new
/// content at `path`, never a mix.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    // Same directory keeps the rename on one filesystem
    let temp_name = format!(
        ".{}.{}.{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default(),
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let temp_path = path.with_file_name(&temp_name);

    let result = write_temp(&temp_path, path, content)
        .and_then(|()| fs::rename(&temp_path, path).map_err(|e| Error::io(path, e)));

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
        return result;
    }

    if let Some(parent) = path.parent() {
        sync_dir(parent);
    }
    Ok(())
}

fn write_temp(temp_path: &Path, target: &Path, content: &[u8]) -> Result<()> {
    let mut temp_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(temp_path)
        .map_err(|e| Error::io(temp_path, e))?;

    temp_file.lock_exclusive().map_err(|_| Error::LockFailed {
        path: target.to_path_buf(),
    })?;

    temp_file
        .write_all(content)
        .map_err(|e| Error::io(temp_path, e))?;

    temp_file.sync_all().map_err(|e| Error::io(temp_path, e))?;

    temp_file.unlock().map_err(|_| Error::LockFailed {
        path: target.to_path_buf(),
    })?;

    Ok(())
}

/// Read text content from a file.
pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Read text content, treating a missing file as `None`.
pub fn read_text_if_exists(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Remove a file, ignoring a file that is already gone.
///
/// Returns whether a file was actually removed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Move a file, falling back to copy + delete across filesystems.
///
/// The rename path never duplicates data on disk. The fallback is only
/// taken when `from` and `to` live on different devices: the copy goes to
/// a hidden temp file beside `to` and is renamed into place once flushed,
/// so `to` never exists half-written. The source is removed last.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            tracing::warn!(
                from = %from.display(),
                to = %to.display(),
                "rename crosses devices, falling back to copy"
            );
            copy_into_place(from, to)?;
            fs::remove_file(from).map_err(|e| Error::io(from, e))
        }
        Err(e) => Err(Error::io(from, e)),
    }
}

/// Copy `from` to `to` through a temp file in the destination directory.
///
/// On any failure the temp file is removed and `to` is untouched.
fn copy_into_place(from: &Path, to: &Path) -> Result<()> {
    let temp_path = to.with_file_name(format!(
        ".{}.{}.{}.partial",
        to.file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default(),
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let result = fs::copy(from, &temp_path)
        .and_then(|_| File::open(&temp_path)?.sync_all())
        .map_err(|e| Error::io(&temp_path, e))
        .and_then(|()| fs::rename(&temp_path, to).map_err(|e| Error::io(to, e)));

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
        return result;
    }
    if let Some(parent) = to.parent() {
        sync_dir(parent);
    }
    Ok(())
}

/// Flush directory entries so a completed rename survives power loss.
///
/// Best effort: not every platform allows opening a directory.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_atomic_leaves_no_temp_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");

        write_atomic(&path, b"[]").unwrap();

        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp file should be renamed away");
    }

    #[test]
    fn read_text_if_exists_missing_is_none() {
        let temp = TempDir::new().unwrap();
        let result = read_text_if_exists(&temp.path().join("absent.json")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn failed_copy_leaves_no_partial_file() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("wiki_2025-01.zim");
        fs::write(&from, b"artifact").unwrap();
        let backups = temp.path().join("backup");
        // A non-empty directory at the target makes the final rename fail
        let to = backups.join("wiki_2025-01_backup_20250101000000000.zim");
        fs::create_dir_all(to.join("occupied")).unwrap();

        assert!(copy_into_place(&from, &to).is_err());

        let names: Vec<_> = fs::read_dir(&backups)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["wiki_2025-01_backup_20250101000000000.zim"]);
        assert!(to.is_dir());
        assert_eq!(fs::read(&from).unwrap(), b"artifact");
    }

    #[test]
    fn copy_into_place_replaces_nothing_until_complete() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("a.zim");
        let to = temp.path().join("b.zim");
        fs::write(&from, b"artifact").unwrap();

        copy_into_place(&from, &to).unwrap();

        assert_eq!(fs::read(&to).unwrap(), b"artifact");
        let partials = fs::read_dir(temp.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".partial")
            })
            .count();
        assert_eq!(partials, 0);
    }

    #[test]
    fn remove_if_exists_reports_removal() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.bin");
        fs::write(&path, b"x").unwrap();

        assert!(remove_if_exists(&path).unwrap());
        assert!(!remove_if_exists(&path).unwrap());
    }
}
