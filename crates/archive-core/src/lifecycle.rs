//! Lifecycle state machine
//!
//! Pure transition rules for one cycle. The connector performs the side
//! effects of each stage and reports the outcome as a [`StageEvent`]; this
//! module only decides where that leads.
//!
//! ```text
//! RECOVERING --no pending--> CHECKING --up to date--> DONE
//!     |                          |
//!     | pending commit           | update available
//!     v                          v
//! COMMITTING <--preserved-- BACKING_UP <--accepted-- VERIFYING <--staged-- DOWNLOADING
//!     |                                                  |
//!     +--committed--> DONE                rejected--> DONE (failed cycle)
//!
//! any non-terminal stage --aborted--> FAILED
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    /// Finishing a commit interrupted by a previous run
    Recovering,
    Checking,
    Downloading,
    Verifying,
    BackingUp,
    Committing,
    Done,
    Failed,
}

impl CycleStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recovering => "RECOVERING",
            Self::Checking => "CHECKING",
            Self::Downloading => "DOWNLOADING",
            Self::Verifying => "VERIFYING",
            Self::BackingUp => "BACKING_UP",
            Self::Committing => "COMMITTING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the work done in a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageEvent {
    NoPendingCommit,
    PendingCommitFound,
    UpToDate,
    UpdateAvailable,
    Staged,
    Accepted,
    Rejected,
    Preserved,
    Committed,
    /// An unrecovered error or a cancellation
    Aborted,
}

/// Next stage after `event` in `from`.
///
/// # Errors
///
/// Returns [`Error::InvalidTransition`] for events a stage does not accept,
/// including every event in a terminal stage.
pub fn transition(from: CycleStage, event: StageEvent) -> Result<CycleStage> {
    use CycleStage::*;
    use StageEvent::*;

    let next = match (from, event) {
        (Done | Failed, _) => None,
        (_, Aborted) => Some(Failed),
        (Recovering, NoPendingCommit) => Some(Checking),
        (Recovering, PendingCommitFound) => Some(Committing),
        (Checking, UpToDate) => Some(Done),
        (Checking, UpdateAvailable) => Some(Downloading),
        (Downloading, Staged) => Some(Verifying),
        (Verifying, Accepted) => Some(BackingUp),
        (Verifying, Rejected) => Some(Done),
        (BackingUp, Preserved) => Some(Committing),
        (Committing, Committed) => Some(Done),
        _ => None,
    };
    next.ok_or(Error::InvalidTransition { from, event })
}

/// Whether a remote version warrants a download.
///
/// Tokens compare lexicographically, so `2025-02` follows `2025-01`.
pub fn needs_update(current: Option<&str>, remote: &str, force: bool) -> bool {
    force || current.is_none_or(|current| remote > current)
}
