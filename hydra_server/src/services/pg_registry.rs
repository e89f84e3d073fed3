//! Postgres-backed [`SubmissionRegistry`].
//!
//! Each operation is one statement, so Postgres row locking gives the
//! per-id atomicity the pipeline and operator actions rely on.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::error::RegistryError;
use crate::models::submission::{NewSubmissionRow, SubmissionChangeset, SubmissionRow};
use crate::models::{NewSubmission, Submission, SubmissionStatus, SubmissionUpdate};
use crate::schema::hydra_submissions;
use crate::services::registry::SubmissionRegistry;

pub type PgPool = Pool<AsyncPgConnection>;

/// Build a connection pool for `database_url`.
pub fn connect(database_url: &str, max_size: usize) -> anyhow::Result<PgPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    Pool::builder(manager)
        .max_size(max_size)
        .build()
        .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))
}

pub struct PgRegistry {
    pool: PgPool,
}

fn storage(e: impl std::fmt::Display) -> RegistryError {
    RegistryError::Storage(e.to_string())
}

fn statuses(filter: impl Fn(&SubmissionStatus) -> bool) -> Vec<&'static str> {
    SubmissionStatus::ALL
        .into_iter()
        .filter(|s| filter(s))
        .map(|s| s.as_str())
        .collect()
}

impl PgRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<Object<AsyncPgConnection>, RegistryError> {
        self.pool.get().await.map_err(storage)
    }
}

#[async_trait]
impl SubmissionRegistry for PgRegistry {
    async fn create(&self, new: NewSubmission) -> Result<Submission, RegistryError> {
        let mut conn = self.conn().await?;
        let row = NewSubmissionRow {
            repository: new.repository,
            branch: new.branch,
            status: SubmissionStatus::Submitted.as_str().to_string(),
            generation: 0,
        };
        let created = diesel::insert_into(hydra_submissions::table)
            .values(&row)
            .returning(SubmissionRow::as_returning())
            .get_result::<SubmissionRow>(&mut *conn)
            .await
            .map_err(storage)?;
        Submission::try_from(created)
    }

    async fn get(&self, id: i64) -> Result<Option<Submission>, RegistryError> {
        let mut conn = self.conn().await?;
        hydra_submissions::table
            .find(id)
            .select(SubmissionRow::as_select())
            .first::<SubmissionRow>(&mut *conn)
            .await
            .optional()
            .map_err(storage)?
            .map(Submission::try_from)
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Submission>, RegistryError> {
        let mut conn = self.conn().await?;
        hydra_submissions::table
            .order(hydra_submissions::id.asc())
            .select(SubmissionRow::as_select())
            .load::<SubmissionRow>(&mut *conn)
            .await
            .map_err(storage)?
            .into_iter()
            .map(Submission::try_from)
            .collect()
    }

    async fn update(&self, id: i64, update: SubmissionUpdate) -> Result<Submission, RegistryError> {
        let mut conn = self.conn().await?;
        let changes = SubmissionChangeset::from(update);
        diesel::update(hydra_submissions::table.find(id))
            .set(&changes)
            .returning(SubmissionRow::as_returning())
            .get_result::<SubmissionRow>(&mut *conn)
            .await
            .optional()
            .map_err(storage)?
            .ok_or(RegistryError::NotFound(id))
            .and_then(Submission::try_from)
    }

    async fn update_if_current(
        &self,
        id: i64,
        generation: i64,
        update: SubmissionUpdate,
    ) -> Result<Submission, RegistryError> {
        let mut conn = self.conn().await?;
        let changes = SubmissionChangeset::from(update);
        let updated = diesel::update(
            hydra_submissions::table
                .filter(hydra_submissions::id.eq(id))
                .filter(hydra_submissions::generation.eq(generation)),
        )
        .set(&changes)
        .returning(SubmissionRow::as_returning())
        .get_result::<SubmissionRow>(&mut *conn)
        .await
        .optional()
        .map_err(storage)?;

        if let Some(row) = updated {
            return Submission::try_from(row);
        }

        let actual: Option<i64> = hydra_submissions::table
            .find(id)
            .select(hydra_submissions::generation)
            .first(&mut *conn)
            .await
            .optional()
            .map_err(storage)?;
        match actual {
            Some(actual) => Err(RegistryError::ConcurrentModification {
                id,
                expected: generation,
                actual,
            }),
            None => Err(RegistryError::NotFound(id)),
        }
    }

    async fn supersede(&self, id: i64, update: SubmissionUpdate) -> Result<Submission, RegistryError> {
        let mut conn = self.conn().await?;
        let changes = SubmissionChangeset::from(update);
        diesel::update(hydra_submissions::table.find(id))
            .set((
                &changes,
                hydra_submissions::generation.eq(hydra_submissions::generation + 1),
            ))
            .returning(SubmissionRow::as_returning())
            .get_result::<SubmissionRow>(&mut *conn)
            .await
            .optional()
            .map_err(storage)?
            .ok_or(RegistryError::NotFound(id))
            .and_then(Submission::try_from)
    }

    async fn assigned_ports(&self) -> Result<Vec<u16>, RegistryError> {
        let mut conn = self.conn().await?;
        let ports: Vec<Option<i32>> = hydra_submissions::table
            .filter(hydra_submissions::status.eq_any(statuses(SubmissionStatus::implies_listener)))
            .filter(hydra_submissions::port.is_not_null())
            .select(hydra_submissions::port)
            .load(&mut *conn)
            .await
            .map_err(storage)?;
        Ok(ports
            .into_iter()
            .flatten()
            .filter_map(|p| u16::try_from(p).ok())
            .collect())
    }

    async fn mark_stale_dead(&self) -> Result<Vec<Submission>, RegistryError> {
        let mut conn = self.conn().await?;
        diesel::update(
            hydra_submissions::table.filter(
                hydra_submissions::status.eq_any(statuses(SubmissionStatus::is_stale_after_restart)),
            ),
        )
        .set((
            hydra_submissions::status.eq(SubmissionStatus::Dead.as_str()),
            hydra_submissions::port.eq(None::<i32>),
            hydra_submissions::generation.eq(hydra_submissions::generation + 1),
            hydra_submissions::updated_at.eq(Utc::now()),
        ))
        .returning(SubmissionRow::as_returning())
        .get_results::<SubmissionRow>(&mut *conn)
        .await
        .map_err(storage)?
        .into_iter()
        .map(Submission::try_from)
        .collect()
    }
}
