//! Clone, checkout, build, allocate and serve one submission.
//!
//! One run per [`PipelineJob`]. Every status write is guarded by the job's
//! generation; once a kill or rebuild advances the record, the run's
//! remaining writes are rejected and it unwinds without touching state.
//! Scratch space is a fresh temporary directory removed on every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;

use crate::config::{HydraConfig, ServeMode};
use crate::error::{HydraError, HydraResult, RegistryError};
use crate::models::{Submission, SubmissionStatus, SubmissionUpdate};
use crate::services::port_allocator::{PortAllocator, PortLease};
use crate::services::registry::SubmissionRegistry;
use crate::services::serving::{self, SiteListeners};
use crate::services::site_builder::SiteBuilder;
use crate::services::source_control::GitClient;
use crate::services::worker::PipelineJob;

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Output published (and served, in direct mode) on `port`.
    Live { port: u16 },
    /// A step failed; the submission is in `Error`.
    Failed,
    /// A kill or rebuild overtook this run; nothing was written.
    Superseded,
}

pub struct BuildPipeline {
    config: Arc<HydraConfig>,
    registry: Arc<dyn SubmissionRegistry>,
    git: GitClient,
    builder: SiteBuilder,
    allocator: PortAllocator,
    sites: Arc<SiteListeners>,
    build_slots: Semaphore,
}

impl BuildPipeline {
    pub fn new(
        config: Arc<HydraConfig>,
        registry: Arc<dyn SubmissionRegistry>,
        git: GitClient,
        builder: SiteBuilder,
        allocator: PortAllocator,
        sites: Arc<SiteListeners>,
    ) -> Self {
        let build_slots = Semaphore::new(config.max_concurrent_builds.max(1));
        Self {
            config,
            registry,
            git,
            builder,
            allocator,
            sites,
            build_slots,
        }
    }

    /// Execute one run. Never fails: errors end up as an `Error` status.
    pub async fn run(&self, job: PipelineJob) -> RunOutcome {
        let start = Instant::now();
        let outcome = match self.execute(job).await {
            Ok(port) => RunOutcome::Live { port },
            Err(e) if is_superseded(&e) => {
                tracing::info!(
                    submission_id = job.submission_id,
                    generation = job.generation,
                    "Pipeline run superseded, discarding"
                );
                RunOutcome::Superseded
            }
            Err(e) => self.fail(job, e).await,
        };
        tracing::info!(
            submission_id = job.submission_id,
            generation = job.generation,
            outcome = ?outcome,
            duration_ms = start.elapsed().as_millis() as u64,
            "Pipeline finished"
        );
        outcome
    }

    async fn execute(&self, job: PipelineJob) -> HydraResult<u16> {
        let submission = self
            .registry
            .get(job.submission_id)
            .await?
            .ok_or(RegistryError::NotFound(job.submission_id))?;
        if submission.generation != job.generation {
            return Err(RegistryError::ConcurrentModification {
                id: job.submission_id,
                expected: job.generation,
                actual: submission.generation,
            }
            .into());
        }

        let output_dir = {
            let _slot = self
                .build_slots
                .acquire()
                .await
                .map_err(|_| HydraError::QueueClosed)?;
            self.build(job, &submission).await?
        };

        self.go_live(job, output_dir).await
    }

    /// Clone, checkout and build into a staging directory under the output
    /// base. The staging directory is removed on drop unless published.
    async fn build(&self, job: PipelineJob, submission: &Submission) -> HydraResult<tempfile::TempDir> {
        let scratch = tempfile::Builder::new()
            .prefix("hydra-")
            .tempdir_in(&self.config.workspace_dir)
            .map_err(|e| HydraError::io("creating scratch directory", &self.config.workspace_dir, e))?;
        tracing::info!(
            submission_id = job.submission_id,
            scratch = %scratch.path().display(),
            "Created scratch directory"
        );
        let repo_dir = scratch.path().join("repo");

        self.transition(job, SubmissionStatus::Cloning).await?;
        self.git
            .clone_repo(&submission.repository, &repo_dir, scratch.path())
            .await?;
        self.git.checkout(&submission.branch, &repo_dir).await?;

        self.transition(job, SubmissionStatus::Building).await?;
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| HydraError::io("creating output directory", &self.config.output_dir, e))?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.config.output_dir)
            .map_err(|e| HydraError::io("creating staging directory", &self.config.output_dir, e))?;
        self.builder.build(&repo_dir, staging.path()).await?;

        tracing::info!(
            submission_id = job.submission_id,
            staging = %staging.path().display(),
            "Site built"
        );
        Ok(staging)
    }

    async fn go_live(&self, job: PipelineJob, staging: tempfile::TempDir) -> HydraResult<u16> {
        let lease = self.allocator.allocate(self.registry.as_ref()).await?;
        let port = lease.port();
        let site_dir = publish(staging, &self.config.site_dir(port)).await?;
        tracing::info!(submission_id = job.submission_id, port, site_dir = %site_dir.display(), "Site output published");

        let result = match self.config.serve_mode {
            ServeMode::External => {
                self.commit_live(job, &lease, SubmissionStatus::Running).await
            }
            ServeMode::Direct => self.serve(job, &lease, &site_dir).await,
        };

        if result.is_err() {
            remove_site_dir(&site_dir).await;
        }
        result.map(|_| port)
    }

    async fn serve(&self, job: PipelineJob, lease: &PortLease, site_dir: &Path) -> HydraResult<()> {
        let listener = serving::bind(&self.config.bind_addr, lease.port()).await?;
        self.sites
            .start(job.submission_id, listener, site_dir.to_path_buf())
            .await?;
        let committed = self.commit_live(job, lease, SubmissionStatus::Serving).await;
        if committed.is_err() {
            self.sites.stop(job.submission_id).await;
        }
        committed
    }

    async fn commit_live(&self, job: PipelineJob, lease: &PortLease, status: SubmissionStatus) -> HydraResult<()> {
        self.registry
            .update_if_current(
                job.submission_id,
                job.generation,
                SubmissionUpdate::serve(status, lease.port()),
            )
            .await?;
        crate::metrics::status_changed(status.as_str());
        tracing::info!(
            submission_id = job.submission_id,
            port = lease.port(),
            status = %status,
            "Site live"
        );
        Ok(())
    }

    async fn transition(&self, job: PipelineJob, status: SubmissionStatus) -> HydraResult<()> {
        self.registry
            .update_if_current(job.submission_id, job.generation, SubmissionUpdate::status(status))
            .await?;
        crate::metrics::status_changed(status.as_str());
        tracing::info!(submission_id = job.submission_id, status = %status, "Status changed");
        Ok(())
    }

    async fn fail(&self, job: PipelineJob, error: HydraError) -> RunOutcome {
        tracing::error!(
            submission_id = job.submission_id,
            generation = job.generation,
            "Pipeline failed: {error}"
        );
        match self
            .registry
            .update_if_current(
                job.submission_id,
                job.generation,
                SubmissionUpdate::release(SubmissionStatus::Error),
            )
            .await
        {
            Ok(_) => {
                crate::metrics::status_changed(SubmissionStatus::Error.as_str());
                RunOutcome::Failed
            }
            Err(RegistryError::ConcurrentModification { .. }) => RunOutcome::Superseded,
            Err(e) => {
                tracing::error!(submission_id = job.submission_id, "Failed to record pipeline error: {e}");
                RunOutcome::Failed
            }
        }
    }
}

pub(crate) const STAGING_PREFIX: &str = ".staging-";

fn is_superseded(error: &HydraError) -> bool {
    matches!(
        error,
        HydraError::Registry(RegistryError::ConcurrentModification { .. })
    )
}

/// Move a staged build to its per-port directory, replacing anything left
/// there by a previous process lifetime.
async fn publish(staging: tempfile::TempDir, site_dir: &Path) -> HydraResult<PathBuf> {
    match tokio::fs::remove_dir_all(site_dir).await {
        Ok(()) => tracing::warn!(site_dir = %site_dir.display(), "Removed stale site output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(HydraError::io("removing stale site output", site_dir, e)),
    }
    tokio::fs::rename(staging.path(), site_dir)
        .await
        .map_err(|e| HydraError::io("publishing site output", site_dir, e))?;
    // Renamed away; dropping the guard finds nothing to clean.
    drop(staging);
    Ok(site_dir.to_path_buf())
}

/// Remove a published site directory. Missing is fine.
pub(crate) async fn remove_site_dir(site_dir: &Path) {
    match tokio::fs::remove_dir_all(site_dir).await {
        Ok(()) => tracing::info!(site_dir = %site_dir.display(), "Removed site output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(site_dir = %site_dir.display(), "Failed to remove site output: {e}"),
    }
}
