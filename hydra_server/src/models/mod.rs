//! Hydra data models.

pub mod status;
pub mod submission;

pub use status::SubmissionStatus;
pub use submission::{NewSubmission, Submission, SubmissionUpdate};
