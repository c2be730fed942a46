//! Acceptance checks for staged artifacts

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::download::StagedArtifact;
use crate::metadata::VersionRecord;
use crate::{Error, Result};

/// ZIM magic number, stored little endian in the first four bytes.
pub const ZIM_MAGIC: u32 = 0x044D_495A;

/// Major format versions this archiver accepts.
const ZIM_MAJOR_VERSIONS: [u16; 2] = [5, 6];

/// Decides whether a staged artifact may be committed.
pub trait ArtifactVerifier: Send + Sync {
    /// `history` is the source's committed records, oldest first.
    fn verify(&self, staged: &StagedArtifact, history: &[VersionRecord]) -> Result<()>;
}

/// Thresholds applied by [`ZimVerifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationPolicy {
    /// Absolute lower bound, at least 1
    pub min_size_bytes: u64,
    /// Smallest accepted size as a fraction of the current artifact's size
    pub min_size_ratio: f64,
    /// Largest accepted size as a multiple of the current artifact's size
    pub max_size_ratio: Option<f64>,
    pub require_zim_header: bool,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            min_size_bytes: 1,
            min_size_ratio: 0.5,
            max_size_ratio: None,
            require_zim_header: true,
        }
    }
}

impl VerificationPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.min_size_bytes < 1 {
            return Err(Error::config("verification.min_size_bytes must be at least 1"));
        }
        if self.min_size_ratio.is_nan() || self.min_size_ratio < 0.0 {
            return Err(Error::config("verification.min_size_ratio must not be negative"));
        }
        if let Some(max) = self.max_size_ratio
            && (max.is_nan() || max < self.min_size_ratio)
        {
            return Err(Error::config(
                "verification.max_size_ratio must be at least min_size_ratio",
            ));
        }
        Ok(())
    }
}

/// Size, bound and header checks for ZIM archives.
#[derive(Debug, Clone, Default)]
pub struct ZimVerifier {
    policy: VerificationPolicy,
}

impl ZimVerifier {
    pub fn new(policy: VerificationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &VerificationPolicy {
        &self.policy
    }

    fn check_bounds(&self, size: u64, history: &[VersionRecord]) -> std::result::Result<(), String> {
        if size < self.policy.min_size_bytes.max(1) {
            return Err(format!(
                "size {} is below the minimum of {} bytes",
                size, self.policy.min_size_bytes
            ));
        }
        let Some(previous) = history.last() else {
            return Ok(());
        };
        let previous_size = previous.size_bytes as f64;
        let lower = previous_size * self.policy.min_size_ratio;
        if (size as f64) < lower {
            return Err(format!(
                "size {} is below {:.0}% of the current artifact ({} bytes, {})",
                size,
                self.policy.min_size_ratio * 100.0,
                previous.size_bytes,
                previous.version
            ));
        }
        if let Some(max_ratio) = self.policy.max_size_ratio
            && (size as f64) > previous_size * max_ratio
        {
            return Err(format!(
                "size {} exceeds {}x the current artifact ({} bytes, {})",
                size, max_ratio, previous.size_bytes, previous.version
            ));
        }
        Ok(())
    }
}

impl ArtifactVerifier for ZimVerifier {
    fn verify(&self, staged: &StagedArtifact, history: &[VersionRecord]) -> Result<()> {
        let reject = |reason: String| {
            tracing::warn!(path = %staged.path().display(), reason = %reason, "artifact rejected");
            Error::Verification {
                path: staged.path().to_path_buf(),
                reason,
            }
        };

        self.check_bounds(staged.size_bytes(), history)
            .map_err(reject)?;

        let on_disk = std::fs::metadata(staged.path())?.len();
        if on_disk != staged.size_bytes() {
            return Err(reject(format!(
                "{} bytes on disk but {} were streamed",
                on_disk,
                staged.size_bytes()
            )));
        }

        if self.policy.require_zim_header {
            check_zim_header(staged.path()).map_err(reject)?;
        }

        tracing::debug!(path = %staged.path().display(), bytes = on_disk, "artifact accepted");
        Ok(())
    }
}

/// Validate magic number and major version of a ZIM file.
pub fn check_zim_header(path: &Path) -> std::result::Result<(), String> {
    let mut header = [0u8; 6];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut header))
        .map_err(|e| format!("cannot read ZIM header: {}", e))?;

    let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if magic != ZIM_MAGIC {
        return Err(format!(
            "bad magic number {:#010x}, expected {:#010x}",
            magic, ZIM_MAGIC
        ));
    }
    let major = u16::from_le_bytes([header[4], header[5]]);
    if !ZIM_MAJOR_VERSIONS.contains(&major) {
        return Err(format!("unsupported ZIM major version {}", major));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_test_utils::zim;
    use chrono::Utc;
    use rstest::rstest;
    use std::fs;
    use tempfile::TempDir;

    fn previous(size_bytes: u64) -> VersionRecord {
        VersionRecord {
            version: "2025-01".into(),
            file_name: "wikipedia_en_2025-01.zim".into(),
            size_bytes,
            checksum: "sha256:00".into(),
            downloaded_at: Utc::now(),
            path: "/data/wikipedia_en_2025-01.zim".into(),
        }
    }

    #[rstest]
    #[case(1000, None, true)]
    #[case(0, None, false)]
    #[case(1000, Some(1000), true)]
    #[case(499, Some(1000), false)]
    #[case(500, Some(1000), true)]
    #[case(50_000, Some(1000), true)]
    fn size_bounds(#[case] size: u64, #[case] prior: Option<u64>, #[case] accepted: bool) {
        let verifier = ZimVerifier::default();
        let history: Vec<_> = prior.into_iter().map(previous).collect();
        assert_eq!(verifier.check_bounds(size, &history).is_ok(), accepted);
    }

    #[test]
    fn max_ratio_caps_growth() {
        let verifier = ZimVerifier::new(VerificationPolicy {
            max_size_ratio: Some(2.0),
            ..VerificationPolicy::default()
        });
        assert!(verifier.check_bounds(2000, &[previous(1000)]).is_ok());
        assert!(verifier.check_bounds(2001, &[previous(1000)]).is_err());
    }

    #[rstest]
    #[case(zim::zim_bytes(b"payload"), true)]
    #[case(zim::zim_bytes_with_version(6, b"payload"), true)]
    #[case(zim::zim_bytes_with_version(4, b"payload"), false)]
    #[case(zim::html_placeholder(), false)]
    #[case(b"ZIM".to_vec(), false)]
    fn header_check(#[case] content: Vec<u8>, #[case] valid: bool) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.zim");
        fs::write(&path, content).unwrap();
        assert_eq!(check_zim_header(&path).is_ok(), valid);
    }

    #[test]
    fn inverted_ratios_fail_validation() {
        let policy = VerificationPolicy {
            min_size_ratio: 0.9,
            max_size_ratio: Some(0.5),
            ..VerificationPolicy::default()
        };
        assert!(policy.validate().is_err());
        assert!(VerificationPolicy::default().validate().is_ok());
    }
}
