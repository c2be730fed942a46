//! SourceConnector: drives one source through a lifecycle cycle
//!
//! The connector performs the side effects of each stage and feeds the
//! result into [`transition`]. It holds the source lock for the whole
//! cycle, so two cycles for the same source never interleave.
//!
//! Every abort point leaves the canonical artifact and the history in
//! their last committed state, or leaves a commit journal that the next
//! cycle completes or rolls back.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use archive_fs::SourceLock;
use archive_fs::checksum::compute_file_checksum;
use chrono::Utc;

use crate::backup::{BackupEntry, BackupRotator};
use crate::cancel::CancellationToken;
use crate::config::ArchiveConfig;
use crate::download::{self, ArtifactFetcher, DownloadManager, RetryPolicy};
use crate::lifecycle::{CycleStage, StageEvent, needs_update, transition};
use crate::metadata::{self, MetadataStore, PendingCommit, PreservedArtifact, VersionRecord};
use crate::metrics::{self as metric, MetricSink, MetricsFacade};
use crate::resolver::{ListingResolver, VersionResolver};
use crate::source::SourceDescriptor;
use crate::transport::HttpTransport;
use crate::verify::{ArtifactVerifier, ZimVerifier};
use crate::{Error, Result};

/// What a cycle achieved.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Remote version is not newer and no download was forced
    NoUpdate,
    /// A new artifact was committed
    Updated(VersionRecord),
    /// The cycle stopped without committing; previous state is intact
    Failed(Error),
}

impl CycleOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Summary of one cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub source: String,
    pub outcome: CycleOutcome,
    /// `Done` or `Failed`
    pub final_stage: CycleStage,
    /// Every stage the cycle passed through, in order
    pub stages: Vec<CycleStage>,
    pub duration: Duration,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        !self.outcome.is_failure()
    }
}

/// On-disk state of a source, read without taking the lock.
#[derive(Debug, Clone)]
pub struct SourceStatus {
    pub source: String,
    pub current: Option<VersionRecord>,
    pub history_len: usize,
    /// Oldest first
    pub backups: Vec<BackupEntry>,
    /// A commit journal is waiting to be completed or rolled back
    pub pending_commit: bool,
    /// A lock file exists: a cycle is running or a previous one crashed
    pub lock_present: bool,
}

/// Stage path of a running cycle.
struct CycleTrace<'a> {
    source: &'a str,
    stage: CycleStage,
    stages: Vec<CycleStage>,
}

impl<'a> CycleTrace<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            stage: CycleStage::Recovering,
            stages: vec![CycleStage::Recovering],
        }
    }

    fn advance(&mut self, event: StageEvent) -> Result<()> {
        let next = transition(self.stage, event)?;
        tracing::debug!(source = %self.source, from = %self.stage, to = %next, ?event, "stage transition");
        self.stage = next;
        self.stages.push(next);
        Ok(())
    }

    fn abort(&mut self) {
        if self.advance(StageEvent::Aborted).is_err() {
            tracing::debug!(source = %self.source, stage = %self.stage, "abort after terminal stage");
        }
    }
}

/// Lifecycle driver for one source.
pub struct SourceConnector {
    descriptor: SourceDescriptor,
    resolver: Arc<dyn VersionResolver>,
    downloader: DownloadManager,
    verifier: Arc<dyn ArtifactVerifier>,
    rotator: BackupRotator,
    metrics: Arc<dyn MetricSink>,
    recover_corrupt: bool,
    cancel: CancellationToken,
}

impl fmt::Debug for SourceConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConnector")
            .field("source", &self.descriptor.name)
            .field("downloader", &self.downloader)
            .field("recover_corrupt", &self.recover_corrupt)
            .finish_non_exhaustive()
    }
}

impl SourceConnector {
    pub fn builder(descriptor: SourceDescriptor) -> ConnectorBuilder {
        ConnectorBuilder::new(descriptor)
    }

    /// Build connectors for every configured source over one shared HTTP
    /// transport.
    pub fn all_from_config(config: &ArchiveConfig) -> Result<Vec<Self>> {
        let transport = Arc::new(HttpTransport::new(&config.download)?);
        config
            .sources
            .iter()
            .map(|source| Self::with_transport(config, source.clone(), transport.clone()))
            .collect()
    }

    /// Build the connector for the source called `name`.
    pub fn from_config(config: &ArchiveConfig, name: &str) -> Result<Self> {
        let source = config
            .source(name)
            .ok_or_else(|| Error::config(format!("unknown source '{}'", name)))?;
        let transport = Arc::new(HttpTransport::new(&config.download)?);
        Self::with_transport(config, source.clone(), transport)
    }

    fn with_transport(
        config: &ArchiveConfig,
        source: SourceDescriptor,
        transport: Arc<HttpTransport>,
    ) -> Result<Self> {
        ConnectorBuilder::new(source)
            .resolver(Arc::new(ListingResolver::new(transport.clone())))
            .fetcher(transport)
            .retry(config.download.retry_policy())
            .progress_interval(config.download.progress_interval_bytes)
            .verifier(Arc::new(ZimVerifier::new(config.verification.clone())))
            .recover_corrupt(config.metadata.recover_corrupt)
            .build()
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Token that stops this connector's cycles at the next stage boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one cycle. Never panics on cycle failure; the error is in the
    /// report's outcome.
    pub fn run_cycle(&self, force: bool) -> CycleReport {
        let started = Instant::now();
        let name = self.descriptor.name.as_str();
        let span = tracing::info_span!("cycle", source = %name, force);
        let _entered = span.enter();

        self.metrics.increment_counter(metric::CHECKS_TOTAL, name);
        let mut trace = CycleTrace::new(name);

        let outcome = match self.drive(&mut trace, force) {
            Ok(outcome) => outcome,
            Err(e) => {
                let failed_at = trace.stage;
                trace.abort();
                tracing::error!(error = %e, kind = e.kind(), stage = %failed_at, "cycle failed");
                CycleOutcome::Failed(e)
            }
        };

        let duration = started.elapsed();
        self.metrics
            .set_gauge(metric::LAST_CYCLE_DURATION_SECONDS, name, duration.as_secs_f64());

        match &outcome {
            CycleOutcome::NoUpdate => tracing::info!("no update needed"),
            CycleOutcome::Updated(record) => {
                tracing::info!(version = %record.version, file = %record.file_name, "source updated")
            }
            CycleOutcome::Failed(e) if trace.stage == CycleStage::Done => {
                tracing::warn!(error = %e, "cycle finished without committing")
            }
            CycleOutcome::Failed(_) => {}
        }

        CycleReport {
            source: name.to_string(),
            outcome,
            final_stage: trace.stage,
            stages: trace.stages,
            duration,
        }
    }

    fn drive(&self, trace: &mut CycleTrace<'_>, force: bool) -> Result<CycleOutcome> {
        let source = &self.descriptor;
        self.checkpoint(CycleStage::Recovering)?;

        fs::create_dir_all(&source.storage_path)?;
        let _lock = SourceLock::acquire(&source.lock_path(), &source.name)?;
        download::sweep_staging(&source.storage_path)?;

        let mut store =
            MetadataStore::load_or_recover(&source.metadata_path(), self.recover_corrupt)?;

        // RECOVERING
        if let Some(pending) = self.recover_pending(&store)? {
            trace.advance(StageEvent::PendingCommitFound)?;
            let record = self.commit(&mut store, &pending)?;
            trace.advance(StageEvent::Committed)?;
            return Ok(CycleOutcome::Updated(record));
        }
        trace.advance(StageEvent::NoPendingCommit)?;

        // CHECKING
        self.checkpoint(CycleStage::Checking)?;
        let remote = self.resolver.resolve_latest(source)?;
        if !needs_update(store.current_version(), &remote.version, force) {
            tracing::debug!(
                current = store.current_version().unwrap_or("-"),
                remote = %remote.version,
                "remote is not newer"
            );
            trace.advance(StageEvent::UpToDate)?;
            return Ok(CycleOutcome::NoUpdate);
        }
        tracing::info!(
            current = store.current_version().unwrap_or("-"),
            remote = %remote.version,
            force,
            "update available"
        );
        trace.advance(StageEvent::UpdateAvailable)?;

        // DOWNLOADING
        self.checkpoint(CycleStage::Downloading)?;
        let staged = self
            .downloader
            .stage(&remote, &source.storage_path, &self.cancel)
            .inspect_err(|e| {
                if !matches!(e, Error::Cancelled { .. }) {
                    self.metrics
                        .increment_counter(metric::DOWNLOAD_FAILURES_TOTAL, &source.name);
                }
            })?;
        trace.advance(StageEvent::Staged)?;

        // VERIFYING
        self.checkpoint(CycleStage::Verifying)?;
        match self.verifier.verify(&staged, store.records()) {
            Ok(()) => trace.advance(StageEvent::Accepted)?,
            Err(e @ Error::Verification { .. }) => {
                if let Err(discard) = staged.discard() {
                    tracing::warn!(error = %discard, "failed to remove rejected artifact");
                }
                self.metrics
                    .increment_counter(metric::DOWNLOAD_FAILURES_TOTAL, &source.name);
                trace.advance(StageEvent::Rejected)?;
                return Ok(CycleOutcome::Failed(e));
            }
            Err(e) => return Err(e),
        }

        // BACKING_UP
        self.checkpoint(CycleStage::BackingUp)?;
        let canonical = source.canonical_path(staged.file_name());
        let outgoing = store
            .current()
            .map(|r| r.path.clone())
            .filter(|p| p.is_file())
            .or_else(|| canonical.is_file().then(|| canonical.clone()));
        let pending = PendingCommit {
            record: staged.record(canonical.clone(), Utc::now()),
            preserved: outgoing.map(|original| PreservedArtifact {
                backup: self.rotator.destination_for(&original),
                original,
            }),
        };
        metadata::write_pending(store.path(), &pending)?;

        if let Some(preserved) = &pending.preserved
            && let Err(e) = self
                .rotator
                .preserve_to(&preserved.original, &preserved.backup)
        {
            self.clear_journal(&store);
            return Err(e);
        }

        if let Err(e) = staged.promote(&canonical) {
            if let Some(preserved) = &pending.preserved
                && let Err(restore) = self.rotator.restore(&preserved.backup, &preserved.original)
            {
                // Journal stays so the next cycle can retry the rollback
                tracing::error!(error = %restore, "failed to restore preserved artifact");
                return Err(e);
            }
            self.clear_journal(&store);
            return Err(e);
        }
        trace.advance(StageEvent::Preserved)?;

        // COMMITTING: no cancellation checkpoint once the artifact is promoted
        let record = self.commit(&mut store, &pending)?;
        trace.advance(StageEvent::Committed)?;
        Ok(CycleOutcome::Updated(record))
    }

    /// Rotate backups to the bound, append the record and drop the journal.
    fn commit(&self, store: &mut MetadataStore, pending: &PendingCommit) -> Result<VersionRecord> {
        let source = &self.descriptor;
        let mut protected: Vec<&Path> = Vec::new();
        if let Some(preserved) = &pending.preserved {
            protected.push(&preserved.backup);
        }
        if let Some(current) = store.current() {
            protected.push(&current.path);
        }
        self.rotator.enforce_limit(source.max_backups, &protected)?;

        store.append(pending.record.clone())?;
        metadata::clear_pending(store.path())?;

        self.metrics
            .increment_counter(metric::DOWNLOAD_SUCCESS_TOTAL, &source.name);
        self.metrics.set_gauge(
            metric::LAST_ARTIFACT_SIZE_BYTES,
            &source.name,
            pending.record.size_bytes as f64,
        );
        Ok(pending.record.clone())
    }

    /// Decide what to do with a journal left by an interrupted commit.
    ///
    /// Returns the pending commit when its artifact is intact at the
    /// canonical path. Otherwise the preserved artifact, if moved, is put
    /// back and the journal is dropped.
    fn recover_pending(&self, store: &MetadataStore) -> Result<Option<PendingCommit>> {
        let Some(pending) = metadata::read_pending(store.path())? else {
            return Ok(None);
        };
        let record = &pending.record;

        if store.current() == Some(record) {
            tracing::info!(version = %record.version, "commit journal already applied");
            metadata::clear_pending(store.path())?;
            return Ok(None);
        }

        let intact = record.path.is_file()
            && compute_file_checksum(&record.path)
                .map(|checksum| checksum == record.checksum)
                .unwrap_or(false);
        if intact {
            tracing::info!(
                version = %record.version,
                path = %record.path.display(),
                "resuming interrupted commit"
            );
            return Ok(Some(pending));
        }

        if let Some(preserved) = &pending.preserved
            && preserved.backup.is_file()
            && !preserved.original.exists()
        {
            self.rotator.restore(&preserved.backup, &preserved.original)?;
        }
        tracing::warn!(
            version = %record.version,
            "discarding interrupted commit; artifact missing or altered"
        );
        metadata::clear_pending(store.path())?;
        Ok(None)
    }

    fn clear_journal(&self, store: &MetadataStore) {
        if let Err(e) = metadata::clear_pending(store.path()) {
            tracing::warn!(error = %e, "failed to remove commit journal");
        }
    }

    fn checkpoint(&self, stage: CycleStage) -> Result<()> {
        if self.cancel.is_cancelled() {
            tracing::info!(stage = %stage, "cancellation requested");
            return Err(Error::Cancelled { stage });
        }
        Ok(())
    }

    /// Current on-disk state of the source.
    pub fn status(&self) -> Result<SourceStatus> {
        let source = &self.descriptor;
        let store = MetadataStore::load(&source.metadata_path())?;
        Ok(SourceStatus {
            source: source.name.clone(),
            current: store.current().cloned(),
            history_len: store.len(),
            backups: self.rotator.list()?,
            pending_commit: metadata::pending_path(store.path()).is_file(),
            lock_present: source.lock_path().is_file(),
        })
    }

    /// Remove a stale lock left by a crashed cycle. Returns whether a lock
    /// file was removed.
    pub fn unlock(&self) -> Result<bool> {
        Ok(SourceLock::clear_stale(&self.descriptor.lock_path())?)
    }
}

/// Assembles a [`SourceConnector`] from its collaborators.
pub struct ConnectorBuilder {
    descriptor: SourceDescriptor,
    resolver: Option<Arc<dyn VersionResolver>>,
    fetcher: Option<Arc<dyn ArtifactFetcher>>,
    verifier: Arc<dyn ArtifactVerifier>,
    metrics: Arc<dyn MetricSink>,
    retry: RetryPolicy,
    progress_interval: Option<u64>,
    recover_corrupt: bool,
    cancel: CancellationToken,
}

impl ConnectorBuilder {
    pub fn new(descriptor: SourceDescriptor) -> Self {
        Self {
            descriptor,
            resolver: None,
            fetcher: None,
            verifier: Arc::new(ZimVerifier::default()),
            metrics: Arc::new(MetricsFacade),
            retry: RetryPolicy::default(),
            progress_interval: None,
            recover_corrupt: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn resolver(mut self, resolver: Arc<dyn VersionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn ArtifactVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn progress_interval(mut self, bytes: u64) -> Self {
        self.progress_interval = Some(bytes);
        self
    }

    pub fn recover_corrupt(mut self, recover: bool) -> Self {
        self.recover_corrupt = recover;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] if the descriptor is invalid or no
    /// resolver or fetcher was supplied.
    pub fn build(self) -> Result<SourceConnector> {
        self.descriptor.validate()?;
        let resolver = self.resolver.ok_or_else(|| {
            Error::config(format!("source '{}': no resolver configured", self.descriptor.name))
        })?;
        let fetcher = self.fetcher.ok_or_else(|| {
            Error::config(format!("source '{}': no fetcher configured", self.descriptor.name))
        })?;

        let mut downloader = DownloadManager::new(fetcher, self.retry);
        if let Some(bytes) = self.progress_interval {
            downloader = downloader.with_progress_interval(bytes);
        }

        Ok(SourceConnector {
            rotator: BackupRotator::new(self.descriptor.backup_path.clone()),
            descriptor: self.descriptor,
            resolver,
            downloader,
            verifier: self.verifier,
            metrics: self.metrics,
            recover_corrupt: self.recover_corrupt,
            cancel: self.cancel,
        })
    }
}

/// Run one cycle per connector.
///
/// Sources share no mutable state, so `parallel` runs each on its own
/// scoped thread. Reports come back in connector order either way.
pub fn run_sources(connectors: &[SourceConnector], force: bool, parallel: bool) -> Vec<CycleReport> {
    if !parallel || connectors.len() < 2 {
        return connectors.iter().map(|c| c.run_cycle(force)).collect();
    }

    std::thread::scope(|scope| {
        let handles: Vec<_> = connectors
            .iter()
            .map(|connector| scope.spawn(move || connector.run_cycle(force)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    })
}
