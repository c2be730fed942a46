//! Source-artifact lifecycle for the ZIM archiver
//!
//! This crate owns the one part of the archiver with real invariants: the
//! cycle that brings a single source up to date without ever exposing a
//! partial or unverified artifact.
//!
//! - **Resolution**: find the newest upstream artifact by version token
//! - **Staging**: stream it to a private file, hashing as it arrives
//! - **Verification**: reject empty, truncated or malformed artifacts
//! - **Rotation**: move the outgoing artifact into a bounded backup set
//! - **Commit**: promote the artifact and append its record atomically
//!
//! # Architecture
//!
//! ```text
//!                 archive-cli
//!                      |
//!               SourceConnector  (lifecycle FSM)
//!                      |
//!   +--------+---------+---------+---------+----------+
//!   |        |         |         |         |          |
//! resolver download  verify   backup   metadata   metrics
//!                      |
//!                 archive-fs  (atomic io, checksums, locks)
//! ```
//!
//! Every role the connector drives sits behind a narrow trait
//! ([`VersionResolver`], [`ArtifactFetcher`], [`ArtifactVerifier`],
//! [`MetricSink`]) so new source types plug in without touching the
//! state machine.

pub mod backup;
pub mod cancel;
pub mod config;
pub mod connector;
pub mod download;
pub mod error;
pub mod lifecycle;
pub mod metadata;
pub mod metrics;
pub mod resolver;
pub mod source;
pub mod transport;
pub mod verify;

pub use backup::{BackupEntry, BackupRotator};
pub use cancel::CancellationToken;
pub use config::{ArchiveConfig, DownloadSettings, MetadataSettings};
pub use connector::{
    ConnectorBuilder, CycleOutcome, CycleReport, SourceConnector, SourceStatus, run_sources,
};
pub use download::{ArtifactFetcher, DownloadManager, FetchedBody, RetryPolicy, StagedArtifact};
pub use error::{DownloadFailure, Error, Result};
pub use lifecycle::{CycleStage, StageEvent, needs_update, transition};
pub use metadata::{MetadataStore, VersionRecord};
pub use metrics::{MetricSink, MetricsFacade};
pub use resolver::{ListingClient, ListingResolver, RemoteArtifact, VersionResolver};
pub use source::{SourceDescriptor, VersionPattern};
pub use transport::{HttpTransport, TransportError};
pub use verify::{ArtifactVerifier, VerificationPolicy, ZimVerifier};
