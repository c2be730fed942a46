//! SHA-256 checksum utilities
//!
//! Provides a single canonical checksum format (`sha256:<hex>`) used for
//! artifact integrity in metadata records, commit journals and sidecar
//! comparison.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Prefix for all checksums produced by this module
const PREFIX: &str = "sha256:";

/// Read buffer used when hashing files from disk.
const READ_CHUNK: usize = 1024 * 1024;

/// Incremental hasher fed while bytes stream past.
///
/// Lets a download compute its checksum without a second full read of
/// the staged file.
#[derive(Clone, Default)]
pub struct StreamingChecksum {
    hasher: Sha256,
    bytes: u64,
}

impl std::fmt::Debug for StreamingChecksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingChecksum")
            .field("bytes", &self.bytes)
            .finish_non_exhaustive()
    }
}

impl StreamingChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of content.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Number of bytes hashed so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Consume the hasher, returning the canonical `sha256:<hex>` string.
    pub fn finalize(self) -> String {
        format!("{}{:x}", PREFIX, self.hasher.finalize())
    }
}

/// Compute the SHA-256 checksum of in-memory content.
///
/// Returns a string in the canonical format `"sha256:<hex>"`.
pub fn compute_content_checksum(content: &[u8]) -> String {
    let mut hasher = StreamingChecksum::new();
    hasher.update(content);
    hasher.finalize()
}

/// Compute the SHA-256 checksum of a file's contents.
///
/// Reads in fixed-size chunks so multi-gigabyte artifacts are never
/// loaded into memory.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn compute_file_checksum(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = StreamingChecksum::new();
    let mut buffer = vec![0u8; READ_CHUNK];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize())
}

/// Parse a `sha256sum`-style sidecar (`<hex>  <file name>`).
///
/// Returns the checksum in canonical form, or `None` when the first token
/// is not a 64 character hex digest.
pub fn parse_sidecar(content: &str) -> Option<String> {
    let digest = content.split_whitespace().next()?;
    if digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(format!("{}{}", PREFIX, digest.to_ascii_lowercase()))
    } else {
        None
    }
}
