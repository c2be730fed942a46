//! Temp directory layout for one archived source.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Storage and backup directories under a private temp root.
///
/// The temp root is removed when the layout is dropped.
pub struct SourceLayout {
    temp: TempDir,
    storage: PathBuf,
    backups: PathBuf,
}

impl SourceLayout {
    /// Create `storage/` and `backup/` under a fresh temp directory.
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let storage = temp.path().join("storage");
        let backups = temp.path().join("backup");
        fs::create_dir_all(&storage).expect("Failed to create storage dir");
        fs::create_dir_all(&backups).expect("Failed to create backup dir");
        Self {
            temp,
            storage,
            backups,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn storage(&self) -> &Path {
        &self.storage
    }

    pub fn backups(&self) -> &Path {
        &self.backups
    }

    /// Place a file directly in the storage directory.
    pub fn put_storage_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.storage.join(name);
        fs::write(&path, content).expect("Failed to write storage file");
        path
    }

    /// Place a file directly in the backup directory.
    pub fn put_backup_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.backups.join(name);
        fs::write(&path, content).expect("Failed to write backup file");
        path
    }

    /// Sorted names of regular files in the storage directory.
    pub fn storage_files(&self) -> Vec<String> {
        list_files(&self.storage)
    }

    /// Sorted names of regular files in the backup directory.
    pub fn backup_files(&self) -> Vec<String> {
        list_files(&self.backups)
    }
}

impl Default for SourceLayout {
    fn default() -> Self {
        Self::new()
    }
}

fn list_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_creates_both_directories() {
        let layout = SourceLayout::new();
        assert!(layout.storage().is_dir());
        assert!(layout.backups().is_dir());
        assert!(layout.storage_files().is_empty());
    }

    #[test]
    fn put_files_are_listed() {
        let layout = SourceLayout::new();
        layout.put_storage_file("b.zim", b"b");
        layout.put_storage_file("a.zim", b"a");
        assert_eq!(layout.storage_files(), vec!["a.zim", "b.zim"]);
    }
}
