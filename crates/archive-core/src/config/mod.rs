//! Archiver configuration
//!
//! One file (TOML, JSON or YAML) describes every source plus the shared
//! download, verification and metadata settings. `${VAR}` placeholders are
//! expanded from the environment before parsing.

mod env;

pub use env::substitute_env;

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use archive_fs::{ConfigStore, io};
use serde::{Deserialize, Serialize};

use crate::download::RetryPolicy;
use crate::source::SourceDescriptor;
use crate::verify::VerificationPolicy;
use crate::{Error, Result};

/// Network and retry settings shared by all sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Attempts per download, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub connect_timeout_secs: u64,
    /// Whole-request timeout for listing and sidecar fetches
    pub listing_timeout_secs: u64,
    /// Whole-request timeout for artifact bodies
    pub download_timeout_secs: u64,
    /// Log progress every this many bytes
    pub progress_interval_bytes: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            connect_timeout_secs: 30,
            listing_timeout_secs: 30,
            download_timeout_secs: 12 * 60 * 60,
            progress_interval_bytes: 100 * 1024 * 1024,
        }
    }
}

impl DownloadSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn listing_timeout(&self) -> Duration {
        Duration::from_secs(self.listing_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// How version history files are treated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataSettings {
    /// Set aside an unparsable history file and start empty instead of
    /// failing the cycle
    pub recover_corrupt: bool,
}

/// Top-level archiver configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub download: DownloadSettings,
    pub verification: VerificationPolicy,
    pub metadata: MetadataSettings,
    pub sources: Vec<SourceDescriptor>,
}

impl ArchiveConfig {
    /// Load, expand placeholders from the process environment, and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn load(path: &Path) -> Result<Self> {
        let content = io::read_text(path)?;
        Self::parse_with(path, &content, |name| std::env::var(name).ok())
    }

    /// Parse `content` as if read from `path`, resolving placeholders
    /// through `lookup`.
    pub fn parse_with(
        path: &Path,
        content: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let expanded = substitute_env(content, lookup);
        let config: ArchiveConfig = ConfigStore::new().parse(path, &expanded)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            sources = config.sources.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Validate every source and the shared settings.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !names.insert(source.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
        }
        self.check_disjoint_paths()?;
        if self.download.max_attempts < 1 {
            return Err(Error::config("download.max_attempts must be at least 1"));
        }
        self.verification.validate()
    }

    /// Every storage and backup directory belongs to exactly one role of
    /// one source: no two are equal and none is nested in another.
    fn check_disjoint_paths(&self) -> Result<()> {
        let dirs: Vec<(&str, &str, &Path)> = self
            .sources
            .iter()
            .flat_map(|s| {
                [
                    (s.name.as_str(), "storage_path", s.storage_path.as_path()),
                    (s.name.as_str(), "backup_path", s.backup_path.as_path()),
                ]
            })
            .collect();

        for (i, (name_a, role_a, a)) in dirs.iter().enumerate() {
            for (name_b, role_b, b) in &dirs[i + 1..] {
                if a.starts_with(b) || b.starts_with(a) {
                    return Err(Error::config(format!(
                        "source '{}' {} '{}' overlaps source '{}' {} '{}'",
                        name_a,
                        role_a,
                        a.display(),
                        name_b,
                        role_b,
                        b.display()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up a source by name.
    pub fn source(&self, name: &str) -> Option<&SourceDescriptor> {
        self.sources.iter().find(|s| s.name == name)
    }
}
