//! Submission registry, the authoritative store for submission state.
//!
//! All mutations are single atomic read-modify-writes keyed by id. The
//! pipeline writes through [`SubmissionRegistry::update_if_current`] so that
//! a kill or rebuild (which advance `generation`) wins over a late write.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::RegistryError;
use crate::models::{NewSubmission, Submission, SubmissionStatus, SubmissionUpdate};

#[async_trait]
pub trait SubmissionRegistry: Send + Sync {
    /// Insert a new record in `Submitted` at generation 0.
    async fn create(&self, new: NewSubmission) -> Result<Submission, RegistryError>;

    async fn get(&self, id: i64) -> Result<Option<Submission>, RegistryError>;

    /// All records, ordered by id.
    async fn list(&self) -> Result<Vec<Submission>, RegistryError>;

    /// Unconditional update.
    async fn update(&self, id: i64, update: SubmissionUpdate) -> Result<Submission, RegistryError>;

    /// Update only if the record is still at `generation`.
    async fn update_if_current(
        &self,
        id: i64,
        generation: i64,
        update: SubmissionUpdate,
    ) -> Result<Submission, RegistryError>;

    /// Advance the generation and apply `update` in one step. Any pipeline
    /// run started before this call can no longer write.
    async fn supersede(&self, id: i64, update: SubmissionUpdate) -> Result<Submission, RegistryError>;

    async fn clear_port(&self, id: i64) -> Result<Submission, RegistryError> {
        self.update(
            id,
            SubmissionUpdate {
                status: None,
                port: Some(None),
            },
        )
        .await
    }

    /// Ports held by submissions in a listener-implying status.
    async fn assigned_ports(&self) -> Result<Vec<u16>, RegistryError>;

    /// Move every record that implies a build process or listener to
    /// `Dead`, clearing its port and advancing its generation. Returns the
    /// records as they are after the update.
    async fn mark_stale_dead(&self) -> Result<Vec<Submission>, RegistryError>;
}

/// In-process registry.
#[derive(Default)]
pub struct MemoryRegistry {
    inner: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    rows: BTreeMap<i64, Submission>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryState {
    fn row_mut(&mut self, id: i64) -> Result<&mut Submission, RegistryError> {
        self.rows.get_mut(&id).ok_or(RegistryError::NotFound(id))
    }
}

#[async_trait]
impl SubmissionRegistry for MemoryRegistry {
    async fn create(&self, new: NewSubmission) -> Result<Submission, RegistryError> {
        let mut state = self.inner.write().await;
        state.next_id += 1;
        let now = Utc::now();
        let submission = Submission {
            id: state.next_id,
            repository: new.repository,
            branch: new.branch,
            status: SubmissionStatus::Submitted,
            port: None,
            generation: 0,
            created_at: now,
            updated_at: now,
        };
        state.rows.insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn get(&self, id: i64) -> Result<Option<Submission>, RegistryError> {
        Ok(self.inner.read().await.rows.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Submission>, RegistryError> {
        Ok(self.inner.read().await.rows.values().cloned().collect())
    }

    async fn update(&self, id: i64, update: SubmissionUpdate) -> Result<Submission, RegistryError> {
        let mut state = self.inner.write().await;
        let row = state.row_mut(id)?;
        update.apply_to(row);
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn update_if_current(
        &self,
        id: i64,
        generation: i64,
        update: SubmissionUpdate,
    ) -> Result<Submission, RegistryError> {
        let mut state = self.inner.write().await;
        let row = state.row_mut(id)?;
        if row.generation != generation {
            return Err(RegistryError::ConcurrentModification {
                id,
                expected: generation,
                actual: row.generation,
            });
        }
        update.apply_to(row);
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn supersede(&self, id: i64, update: SubmissionUpdate) -> Result<Submission, RegistryError> {
        let mut state = self.inner.write().await;
        let row = state.row_mut(id)?;
        row.generation += 1;
        update.apply_to(row);
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn assigned_ports(&self) -> Result<Vec<u16>, RegistryError> {
        let state = self.inner.read().await;
        Ok(state
            .rows
            .values()
            .filter(|s| s.status.implies_listener())
            .filter_map(|s| s.port)
            .collect())
    }

    async fn mark_stale_dead(&self) -> Result<Vec<Submission>, RegistryError> {
        let mut state = self.inner.write().await;
        let now = Utc::now();
        let mut swept = Vec::new();
        for row in state.rows.values_mut() {
            if row.status.is_stale_after_restart() {
                row.status = SubmissionStatus::Dead;
                row.port = None;
                row.generation += 1;
                row.updated_at = now;
                swept.push(row.clone());
            }
        }
        Ok(swept)
    }
}
