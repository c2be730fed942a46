//! Source descriptors and version-token extraction

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Name of the capture group that holds the version token.
const VERSION_GROUP: &str = "version";

fn default_file_pattern() -> String {
    r".*_(?P<version>[0-9]{4}-[0-9]{2})\.zim".to_string()
}

fn default_max_backups() -> usize {
    3
}

fn default_check_interval_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_metadata_file() -> String {
    "downloads_metadata.json".to_string()
}

/// Immutable configuration for one archivable source.
///
/// Read-only to the lifecycle; loaded once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Unique source name, used in logs, metrics and lock names
    pub name: String,
    /// Remote directory listing, e.g. `https://download.kiwix.org/zim/wikipedia/`
    pub source_url: String,
    /// Regex matched against whole listing entries; captures the version token
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    /// Directory holding the canonical artifact and metadata file
    pub storage_path: PathBuf,
    /// Directory holding rotated backups
    pub backup_path: PathBuf,
    /// Upper bound on retained backups, at least 1
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    /// Informational for the scheduler; not enforced by a cycle
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Metadata file name inside `storage_path`
    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,
    /// Fetch `<artifact>.sha256` and require the download to match it
    #[serde(default)]
    pub verify_sidecar: bool,
}

impl SourceDescriptor {
    /// Create a descriptor with default pattern, limits and file names.
    pub fn new(
        name: impl Into<String>,
        source_url: impl Into<String>,
        storage_path: impl Into<PathBuf>,
        backup_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            source_url: source_url.into(),
            file_pattern: default_file_pattern(),
            storage_path: storage_path.into(),
            backup_path: backup_path.into(),
            max_backups: default_max_backups(),
            check_interval_secs: default_check_interval_secs(),
            metadata_file: default_metadata_file(),
            verify_sidecar: false,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.file_pattern = pattern.into();
        self
    }

    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }

    pub fn with_sidecar_verification(mut self, enabled: bool) -> Self {
        self.verify_sidecar = enabled;
        self
    }

    /// Check the descriptor is usable before any cycle touches disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("source name must not be empty"));
        }
        if self
            .name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(Error::config(format!(
                "source name '{}' may only contain ASCII letters, digits, '-' and '_'",
                self.name
            )));
        }
        if self.max_backups < 1 {
            return Err(Error::config(format!(
                "source '{}': max_backups must be at least 1",
                self.name
            )));
        }
        if self.storage_path == self.backup_path {
            return Err(Error::config(format!(
                "source '{}': storage_path and backup_path must differ",
                self.name
            )));
        }
        if self.metadata_file.contains('/') || self.metadata_file.contains('\\') {
            return Err(Error::config(format!(
                "source '{}': metadata_file must be a bare file name",
                self.name
            )));
        }
        reqwest::Url::parse(&self.source_url).map_err(|e| {
            Error::config(format!(
                "source '{}': invalid source_url '{}': {}",
                self.name, self.source_url, e
            ))
        })?;
        self.version_pattern().map(|_| ())
    }

    /// Compile the file pattern.
    pub fn version_pattern(&self) -> Result<VersionPattern> {
        VersionPattern::new(&self.file_pattern).map_err(|e| match e {
            Error::Config { message } => {
                Error::config(format!("source '{}': {}", self.name, message))
            }
            other => other,
        })
    }

    /// Path of the JSON version history.
    pub fn metadata_path(&self) -> PathBuf {
        self.storage_path.join(&self.metadata_file)
    }

    /// Path of the advisory lock guarding this source's cycles.
    pub fn lock_path(&self) -> PathBuf {
        self.storage_path.join(format!(".{}.lock", self.name))
    }

    /// Where an artifact with `file_name` lives once committed.
    pub fn canonical_path(&self, file_name: &str) -> PathBuf {
        self.storage_path.join(file_name)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

/// Compiled, anchored file pattern.
///
/// The version token is the named group `version` when present, otherwise
/// the first capture group.
#[derive(Debug, Clone)]
pub struct VersionPattern {
    regex: Regex,
    named: bool,
}

impl VersionPattern {
    /// Compile `pattern`, anchoring it to match whole entry names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the pattern does not compile or has no
    /// capture group to take the token from.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))
            .map_err(|e| Error::config(format!("invalid file_pattern '{}': {}", pattern, e)))?;
        let named = regex.capture_names().flatten().any(|n| n == VERSION_GROUP);
        // Group 0 is the whole match
        if regex.captures_len() < 2 {
            return Err(Error::config(format!(
                "file_pattern '{}' needs a capture group for the version token",
                pattern
            )));
        }
        Ok(Self { regex, named })
    }

    /// Extract the version token from an entry name, if it matches.
    pub fn extract(&self, name: &str) -> Option<String> {
        let captures = self.regex.captures(name)?;
        let token = if self.named {
            captures.name(VERSION_GROUP)
        } else {
            captures.get(1)
        }?;
        Some(token.as_str().to_string())
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn descriptor() -> SourceDescriptor {
        SourceDescriptor::new(
            "wikipedia",
            "https://download.kiwix.org/zim/wikipedia/",
            "/data/wikipedia",
            "/backup/wikipedia",
        )
    }

    #[test]
    fn default_descriptor_is_valid() {
        descriptor().validate().unwrap();
    }

    #[rstest]
    #[case("wikipedia_en_all_maxi_2025-01.zim", Some("2025-01"))]
    #[case("wikipedia_en_all_maxi_2025-01.zim.md5", None)]
    #[case("wikipedia_en_all_maxi.zim", None)]
    #[case("../", None)]
    fn default_pattern_extracts_year_month(#[case] name: &str, #[case] expected: Option<&str>) {
        let pattern = descriptor().version_pattern().unwrap();
        assert_eq!(pattern.extract(name).as_deref(), expected);
    }

    #[test]
    fn unnamed_group_falls_back_to_first_capture() {
        let pattern = VersionPattern::new(r"gutenberg_(\d{4}-\d{2}-\d{2})\.zim").unwrap();
        assert_eq!(
            pattern.extract("gutenberg_2025-03-14.zim").as_deref(),
            Some("2025-03-14")
        );
    }

    #[test]
    fn pattern_without_group_is_rejected() {
        let result = VersionPattern::new(r".*_[0-9]{4}-[0-9]{2}\.zim");
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn zero_max_backups_is_rejected() {
        let result = descriptor().with_max_backups(0).validate();
        assert!(matches!(result, Err(Error::Config { message }) if message.contains("max_backups")));
    }

    #[test]
    fn shared_storage_and_backup_is_rejected() {
        let mut source = descriptor();
        source.backup_path = source.storage_path.clone();
        assert!(source.validate().is_err());
    }

    #[test]
    fn bad_url_is_rejected() {
        let mut source = descriptor();
        source.source_url = "not a url".into();
        assert!(source.validate().is_err());
    }

    #[test]
    fn derived_paths_live_in_storage() {
        let source = descriptor();
        assert_eq!(
            source.metadata_path(),
            PathBuf::from("/data/wikipedia/downloads_metadata.json")
        );
        assert_eq!(
            source.lock_path(),
            PathBuf::from("/data/wikipedia/.wikipedia.lock")
        );
    }
}
