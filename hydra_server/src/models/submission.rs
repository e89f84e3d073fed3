//! hydra.submission — one request to build and serve a repository branch.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::models::status::SubmissionStatus;
use crate::schema::hydra_submissions;

/// A submission as seen by the rest of the service.
///
/// `generation` advances whenever an operator supersedes the current run
/// (kill or rebuild). A pipeline remembers the generation it started with
/// and its writes are rejected once the record has moved on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub repository: String,
    pub branch: String,
    pub status: SubmissionStatus,
    pub port: Option<u16>,
    pub generation: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    /// Public URL of the site while a port is held.
    pub fn link(&self, host: &str) -> Option<String> {
        self.port.map(|port| format!("http://{host}:{port}/"))
    }
}

impl std::fmt::Display for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.repository, self.branch)
    }
}

/// Fields supplied at creation.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSubmission {
    pub repository: String,
    pub branch: String,
}

/// Width of `hydra_submissions.repository`.
pub const MAX_REPOSITORY_LEN: usize = 256;
/// Width of `hydra_submissions.branch`.
pub const MAX_BRANCH_LEN: usize = 64;

impl NewSubmission {
    /// Trimmed copy. Fails with a user-facing message when a field is
    /// blank or does not fit its column.
    pub fn normalized(&self) -> Result<NewSubmission, String> {
        let repository = self.repository.trim();
        let branch = self.branch.trim();
        if repository.is_empty() || branch.is_empty() {
            return Err("repository and branch are required".to_string());
        }
        if repository.chars().count() > MAX_REPOSITORY_LEN {
            return Err(format!("repository is longer than {MAX_REPOSITORY_LEN} characters"));
        }
        if branch.chars().count() > MAX_BRANCH_LEN {
            return Err(format!("branch is longer than {MAX_BRANCH_LEN} characters"));
        }
        Ok(NewSubmission {
            repository: repository.to_string(),
            branch: branch.to_string(),
        })
    }
}

/// Partial update. `port: Some(None)` clears the port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmissionUpdate {
    pub status: Option<SubmissionStatus>,
    pub port: Option<Option<u16>>,
}

impl SubmissionUpdate {
    pub fn status(status: SubmissionStatus) -> Self {
        Self {
            status: Some(status),
            port: None,
        }
    }

    /// Status change that also drops any port assignment.
    pub fn release(status: SubmissionStatus) -> Self {
        Self {
            status: Some(status),
            port: Some(None),
        }
    }

    pub fn serve(status: SubmissionStatus, port: u16) -> Self {
        Self {
            status: Some(status),
            port: Some(Some(port)),
        }
    }

    pub fn apply_to(&self, submission: &mut Submission) {
        if let Some(status) = self.status {
            submission.status = status;
        }
        if let Some(port) = self.port {
            submission.port = port;
        }
    }
}

// ── Diesel rows ──

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = hydra_submissions)]
pub struct SubmissionRow {
    pub id: i64,
    pub repository: String,
    pub branch: String,
    pub status: String,
    pub port: Option<i32>,
    pub generation: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = RegistryError;

    fn try_from(row: SubmissionRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<SubmissionStatus>()
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let port = row
            .port
            .map(u16::try_from)
            .transpose()
            .map_err(|_| RegistryError::Storage(format!("port out of range on row {}", row.id)))?;
        Ok(Submission {
            id: row.id,
            repository: row.repository,
            branch: row.branch,
            status,
            port,
            generation: row.generation,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = hydra_submissions)]
pub struct NewSubmissionRow {
    pub repository: String,
    pub branch: String,
    pub status: String,
    pub generation: i64,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = hydra_submissions)]
pub struct SubmissionChangeset {
    pub status: Option<String>,
    pub port: Option<Option<i32>>,
    pub updated_at: DateTime<Utc>,
}

impl From<SubmissionUpdate> for SubmissionChangeset {
    fn from(update: SubmissionUpdate) -> Self {
        Self {
            status: update.status.map(|s| s.as_str().to_string()),
            port: update.port.map(|p| p.map(i32::from)),
            updated_at: Utc::now(),
        }
    }
}
