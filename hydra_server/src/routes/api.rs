//! JSON shapes for the operator API.

use serde::{Deserialize, Serialize};

use crate::models::{Submission, SubmissionStatus};

/// Request body for creating a submission.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub repository: String,
    pub branch: String,
}

/// Response for a created submission.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: i64,
    pub status: SubmissionStatus,
}

/// JSON response for a submission.
#[derive(Debug, Serialize)]
pub struct SubmissionJson {
    pub id: i64,
    pub repository: String,
    pub branch: String,
    pub status: SubmissionStatus,
    pub port: Option<u16>,
    pub link: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl SubmissionJson {
    pub fn from_submission(submission: Submission, host: &str) -> Self {
        let link = if submission.status.implies_listener() {
            submission.link(host)
        } else {
            None
        };
        Self {
            id: submission.id,
            repository: submission.repository,
            branch: submission.branch,
            status: submission.status,
            port: submission.port,
            link,
            created_at: submission.created_at,
            updated_at: submission.updated_at,
        }
    }
}

/// Entry on the public list of live sites.
#[derive(Debug, Serialize)]
pub struct SiteJson {
    pub id: i64,
    pub title: String,
    pub port: u16,
    pub link: String,
}

impl SiteJson {
    pub fn from_submission(submission: &Submission, host: &str) -> Option<Self> {
        let port = submission.port?;
        Some(Self {
            id: submission.id,
            title: submission.to_string(),
            port,
            link: submission.link(host)?,
        })
    }
}
