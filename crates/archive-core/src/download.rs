//! Streaming downloads into private staging files
//!
//! Bytes go to `.<file>.<uuid>.staging` beside the canonical artifact,
//! never to the final name. The checksum is computed while streaming, and
//! the staging file is deleted on every path that does not promote it.

use std::fmt;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use archive_fs::{StreamingChecksum, io};
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};

use crate::cancel::CancellationToken;
use crate::error::DownloadFailure;
use crate::lifecycle::CycleStage;
use crate::metadata::VersionRecord;
use crate::resolver::RemoteArtifact;
use crate::transport::{self, TransportError};
use crate::{Error, Result};

const CHUNK_SIZE: usize = 1024 * 1024;
const STAGING_SUFFIX: &str = ".staging";
const MIB: f64 = 1024.0 * 1024.0;

/// An open response body.
pub struct FetchedBody {
    /// Declared `Content-Length`, when the server sent one
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

impl fmt::Debug for FetchedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Opens artifact bodies for streaming.
pub trait ArtifactFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> std::result::Result<FetchedBody, TransportError>;
}

/// Bounded exponential backoff for transient download failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    fn backoff(&self) -> backoff::ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_multiplier(self.multiplier)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Fetches artifacts into staging files with in-cycle retries.
#[derive(Clone)]
pub struct DownloadManager {
    fetcher: Arc<dyn ArtifactFetcher>,
    retry: RetryPolicy,
    progress_interval: u64,
}

impl fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadManager")
            .field("retry", &self.retry)
            .field("progress_interval", &self.progress_interval)
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>, retry: RetryPolicy) -> Self {
        Self {
            fetcher,
            retry,
            progress_interval: 100 * 1024 * 1024,
        }
    }

    pub fn with_progress_interval(mut self, bytes: u64) -> Self {
        self.progress_interval = bytes.max(1);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Stream `artifact` into a fresh staging file under `staging_dir`.
    ///
    /// Transient failures are retried with backoff up to the policy's
    /// attempt budget, each attempt in a new staging file. Checksum
    /// mismatches, client errors and cancellation end the download at once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Download`] once attempts are exhausted or on a
    /// permanent failure, and [`Error::Cancelled`] if `cancel` fires.
    pub fn stage(
        &self,
        artifact: &RemoteArtifact,
        staging_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<StagedArtifact> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        let operation = || {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(backoff::Error::permanent(Error::Cancelled {
                    stage: CycleStage::Downloading,
                }));
            }
            tracing::info!(url = %artifact.url, attempt, max_attempts, "downloading artifact");
            match self.attempt(artifact, staging_dir, cancel) {
                Ok(staged) => Ok(staged),
                Err(e) if e.is_transient_download() && attempt < max_attempts => {
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        };

        let notify = |err: Error, wait: Duration| {
            tracing::warn!(
                url = %artifact.url,
                error = %err,
                retry_in_ms = wait.as_millis() as u64,
                "download attempt failed, retrying"
            );
        };

        backoff::retry_notify(self.retry.backoff(), operation, notify).map_err(|e| match e {
            backoff::Error::Permanent(err) => err,
            backoff::Error::Transient { err, .. } => err,
        })
    }

    fn attempt(
        &self,
        artifact: &RemoteArtifact,
        staging_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<StagedArtifact> {
        let failed = |failure: DownloadFailure| Error::Download {
            url: artifact.url.clone(),
            failure,
        };
        let storage = |e: std::io::Error| failed(DownloadFailure::Storage(e.to_string()));

        let body = self
            .fetcher
            .fetch(&artifact.url)
            .map_err(|e| failed(e.into()))?;

        fs::create_dir_all(staging_dir).map_err(storage)?;
        let path = staging_path(staging_dir, &artifact.file_name);
        let mut file = File::create(&path).map_err(storage)?;
        let mut staged = StagedArtifact::new(path, artifact);

        let mut reader = body.reader;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut hasher = StreamingChecksum::new();
        let started = Instant::now();
        let mut next_report = self.progress_interval;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled {
                    stage: CycleStage::Downloading,
                });
            }
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(failed(read_failure(e))),
            };
            file.write_all(&buffer[..read]).map_err(storage)?;
            hasher.update(&buffer[..read]);

            if hasher.bytes() >= next_report {
                log_progress(&artifact.file_name, hasher.bytes(), body.content_length, started);
                next_report = hasher.bytes() + self.progress_interval;
            }
        }
        file.sync_all().map_err(storage)?;
        drop(file);

        let size = hasher.bytes();
        if let Some(expected) = body.content_length
            && expected != size
        {
            return Err(failed(DownloadFailure::SizeMismatch {
                expected,
                actual: size,
            }));
        }

        let checksum = hasher.finalize();
        if let Some(expected) = &artifact.expected_checksum
            && *expected != checksum
        {
            return Err(failed(DownloadFailure::ChecksumMismatch {
                expected: expected.clone(),
                actual: checksum,
            }));
        }

        tracing::info!(
            file = %artifact.file_name,
            bytes = size,
            checksum = %checksum,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "download staged"
        );
        staged.size_bytes = size;
        staged.checksum = checksum;
        Ok(staged)
    }
}

fn read_failure(err: std::io::Error) -> DownloadFailure {
    if transport::is_timeout(&err) {
        DownloadFailure::Timeout(err.to_string())
    } else {
        DownloadFailure::Network(err.to_string())
    }
}

fn log_progress(file_name: &str, bytes: u64, total: Option<u64>, started: Instant) {
    let elapsed = started.elapsed().as_secs_f64();
    let speed = if elapsed > 0.0 { bytes as f64 / elapsed } else { 0.0 };
    match total {
        Some(total) if total > 0 => {
            let remaining = total.saturating_sub(bytes) as f64;
            let eta_secs = if speed > 0.0 { remaining / speed } else { 0.0 };
            tracing::info!(
                file = %file_name,
                downloaded_mib = (bytes as f64 / MIB) as u64,
                total_mib = (total as f64 / MIB) as u64,
                percent = format!("{:.1}", bytes as f64 * 100.0 / total as f64),
                speed_mib_s = format!("{:.2}", speed / MIB),
                eta_secs = eta_secs as u64,
                "download progress"
            );
        }
        _ => tracing::info!(
            file = %file_name,
            downloaded_mib = (bytes as f64 / MIB) as u64,
            speed_mib_s = format!("{:.2}", speed / MIB),
            "download progress"
        ),
    }
}

fn staging_path(dir: &Path, file_name: &str) -> PathBuf {
    dir.join(format!(
        ".{}.{}{}",
        file_name,
        uuid::Uuid::new_v4().simple(),
        STAGING_SUFFIX
    ))
}

/// Delete staging files left behind by interrupted runs.
///
/// Only call while holding the source lock: a live cycle's staging file
/// looks the same.
pub fn sweep_staging(dir: &Path) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.')
            && name.ends_with(STAGING_SUFFIX)
            && entry.file_type()?.is_file()
            && io::remove_if_exists(&entry.path())?
        {
            tracing::warn!(path = %entry.path().display(), "removed leftover staging file");
            removed += 1;
        }
    }
    Ok(removed)
}

/// A downloaded, not yet trusted artifact.
///
/// Owns its staging file: dropping it without [`promote`](Self::promote)
/// deletes the file.
#[derive(Debug)]
pub struct StagedArtifact {
    path: PathBuf,
    file_name: String,
    version: String,
    size_bytes: u64,
    checksum: String,
    armed: bool,
}

impl StagedArtifact {
    fn new(path: PathBuf, artifact: &RemoteArtifact) -> Self {
        Self {
            path,
            file_name: artifact.file_name.clone(),
            version: artifact.version.clone(),
            size_bytes: 0,
            checksum: String::new(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final file name the artifact will be promoted to.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Bytes observed while streaming.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// The history entry this artifact becomes once committed at `path`.
    pub fn record(&self, path: PathBuf, downloaded_at: DateTime<Utc>) -> VersionRecord {
        VersionRecord {
            version: self.version.clone(),
            file_name: self.file_name.clone(),
            size_bytes: self.size_bytes,
            checksum: self.checksum.clone(),
            downloaded_at,
            path,
        }
    }

    /// Move the staging file to `dest`. On failure the staging file is
    /// still removed when `self` drops.
    pub fn promote(mut self, dest: &Path) -> Result<()> {
        io::move_file(&self.path, dest)?;
        self.armed = false;
        tracing::debug!(from = %self.path.display(), to = %dest.display(), "staged artifact promoted");
        Ok(())
    }

    /// Delete the staging file now, reporting any error.
    pub fn discard(mut self) -> Result<()> {
        self.armed = false;
        io::remove_if_exists(&self.path)?;
        Ok(())
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if self.armed {
            match io::remove_if_exists(&self.path) {
                Ok(_) => tracing::debug!(path = %self.path.display(), "staging file removed"),
                Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "failed to remove staging file"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    struct OneShot(Vec<u8>);

    impl ArtifactFetcher for OneShot {
        fn fetch(&self, _url: &str) -> std::result::Result<FetchedBody, TransportError> {
            Ok(FetchedBody {
                content_length: Some(self.0.len() as u64),
                reader: Box::new(Cursor::new(self.0.clone())),
            })
        }
    }

    /// Body that stalls after a few bytes the way a blocking HTTP reader does.
    struct StallingBody;

    impl ArtifactFetcher for StallingBody {
        fn fetch(&self, _url: &str) -> std::result::Result<FetchedBody, TransportError> {
            let stalled = std::io::Error::other(std::io::Error::new(
                ErrorKind::TimedOut,
                "operation timed out",
            ));
            Ok(FetchedBody {
                content_length: Some(1024),
                reader: Box::new(Cursor::new(b"ZIM".to_vec()).chain(FailingReader(Some(stalled)))),
            })
        }
    }

    struct FailingReader(Option<std::io::Error>);

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(self.0.take().unwrap_or_else(|| std::io::Error::other("already failed")))
        }
    }

    fn artifact() -> RemoteArtifact {
        RemoteArtifact {
            file_name: "wikipedia_en_2025-01.zim".into(),
            version: "2025-01".into(),
            url: "https://mirror.test/wikipedia_en_2025-01.zim".into(),
            expected_checksum: None,
        }
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn staged_file_is_hidden_and_hashed() {
        let temp = TempDir::new().unwrap();
        let manager = DownloadManager::new(Arc::new(OneShot(b"hello world".to_vec())), RetryPolicy::immediate(1));

        let staged = manager
            .stage(&artifact(), temp.path(), &CancellationToken::new())
            .unwrap();

        let name = staged.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".wikipedia_en_2025-01.zim."));
        assert!(name.ends_with(".staging"));
        assert_eq!(staged.size_bytes(), 11);
        assert_eq!(
            staged.checksum(),
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn dropping_staged_artifact_deletes_file() {
        let temp = TempDir::new().unwrap();
        let manager = DownloadManager::new(Arc::new(OneShot(b"abc".to_vec())), RetryPolicy::immediate(1));

        let staged = manager
            .stage(&artifact(), temp.path(), &CancellationToken::new())
            .unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());
        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn promote_moves_to_destination() {
        let temp = TempDir::new().unwrap();
        let manager = DownloadManager::new(Arc::new(OneShot(b"abc".to_vec())), RetryPolicy::immediate(1));
        let staged = manager
            .stage(&artifact(), temp.path(), &CancellationToken::new())
            .unwrap();

        let dest = temp.path().join("wikipedia_en_2025-01.zim");
        staged.promote(&dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"abc");
        assert_eq!(files_in(temp.path()), vec!["wikipedia_en_2025-01.zim"]);
    }

    #[test]
    fn checksum_mismatch_is_permanent_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let manager = DownloadManager::new(Arc::new(OneShot(b"abc".to_vec())), RetryPolicy::immediate(3));
        let mut remote = artifact();
        remote.expected_checksum = Some(format!("sha256:{}", "0".repeat(64)));

        let result = manager.stage(&remote, temp.path(), &CancellationToken::new());
        assert!(matches!(
            result,
            Err(Error::Download {
                failure: DownloadFailure::ChecksumMismatch { .. },
                ..
            })
        ));
        assert!(files_in(temp.path()).is_empty());
    }

    #[test]
    fn stalled_body_is_reported_as_timeout() {
        let temp = TempDir::new().unwrap();
        let manager = DownloadManager::new(Arc::new(StallingBody), RetryPolicy::immediate(1));

        let result = manager.stage(&artifact(), temp.path(), &CancellationToken::new());
        assert!(matches!(
            result,
            Err(Error::Download {
                failure: DownloadFailure::Timeout(_),
                ..
            })
        ));
        assert!(files_in(temp.path()).is_empty());
    }

    #[test]
    fn cancelled_before_start_downloads_nothing() {
        let temp = TempDir::new().unwrap();
        let manager = DownloadManager::new(Arc::new(OneShot(b"abc".to_vec())), RetryPolicy::immediate(1));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = manager.stage(&artifact(), temp.path(), &cancel);
        assert!(matches!(
            result,
            Err(Error::Cancelled {
                stage: CycleStage::Downloading
            })
        ));
        assert!(files_in(temp.path()).is_empty());
    }

    #[test]
    fn sweep_removes_only_staging_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".a.zim.0123.staging"), b"x").unwrap();
        fs::write(temp.path().join("a.zim"), b"x").unwrap();
        fs::write(temp.path().join("downloads_metadata.json"), b"[]").unwrap();

        assert_eq!(sweep_staging(temp.path()).unwrap(), 1);
        assert_eq!(files_in(temp.path()), vec!["a.zim", "downloads_metadata.json"]);
        assert_eq!(sweep_staging(&temp.path().join("missing")).unwrap(), 0);
    }
}
