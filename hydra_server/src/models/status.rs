//! Observable state machine of a pipeline run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Every status a submission can be in.
///
/// Pipeline order: `Submitted`/`Resubmitted` → `Cloning` → `Building` →
/// `Running`/`Serving`, with `Error` on any failed step. Operators move a
/// submission to `Killed`; the startup sweep moves stale ones to `Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionStatus {
    Submitted,
    Resubmitted,
    Cloning,
    Building,
    /// Output published for an externally managed web server.
    Running,
    /// Output served by a listener this process owns.
    Serving,
    Error,
    Killed,
    Dead,
}

impl SubmissionStatus {
    pub const ALL: [SubmissionStatus; 9] = [
        SubmissionStatus::Submitted,
        SubmissionStatus::Resubmitted,
        SubmissionStatus::Cloning,
        SubmissionStatus::Building,
        SubmissionStatus::Running,
        SubmissionStatus::Serving,
        SubmissionStatus::Error,
        SubmissionStatus::Killed,
        SubmissionStatus::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Submitted => "Submitted",
            SubmissionStatus::Resubmitted => "Resubmitted",
            SubmissionStatus::Cloning => "Cloning",
            SubmissionStatus::Building => "Building",
            SubmissionStatus::Running => "Running",
            SubmissionStatus::Serving => "Serving",
            SubmissionStatus::Error => "Error",
            SubmissionStatus::Killed => "Killed",
            SubmissionStatus::Dead => "Dead",
        }
    }

    /// A port is expected to be held (and bound) under these statuses.
    pub fn implies_listener(&self) -> bool {
        matches!(self, SubmissionStatus::Running | SubmissionStatus::Serving)
    }

    /// A pipeline worker is expected to be executing under these statuses.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SubmissionStatus::Cloning | SubmissionStatus::Building)
    }

    /// Waiting in the work queue.
    pub fn is_queued(&self) -> bool {
        matches!(self, SubmissionStatus::Submitted | SubmissionStatus::Resubmitted)
    }

    /// Records in these statuses cannot survive a process restart.
    pub fn is_stale_after_restart(&self) -> bool {
        self.is_in_flight() || self.implies_listener()
    }

    /// Kill is a no-op from these.
    pub fn is_released(&self) -> bool {
        matches!(self, SubmissionStatus::Killed | SubmissionStatus::Dead)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown submission status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for SubmissionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubmissionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}
