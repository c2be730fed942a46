//! Filesystem primitives for the ZIM archiver
//!
//! Provides the crash-safe building blocks the lifecycle relies on:
//! atomic write-then-rename persistence, streaming SHA-256 checksums,
//! advisory per-source locks, and format-agnostic config parsing.

pub mod checksum;
pub mod config;
pub mod error;
pub mod io;
pub mod lock;

pub use checksum::StreamingChecksum;
pub use config::{ConfigFormat, ConfigStore};
pub use error::{Error, Result};
pub use lock::{LockHolder, SourceLock};
