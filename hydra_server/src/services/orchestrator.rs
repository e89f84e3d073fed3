//! Operations exposed to the web layer: submit, kill, rebuild, listing and recovery.
//!
//! `submit` and `rebuild` enqueue pipeline work and return immediately.
//! `kill` and `rebuild` first advance the submission's generation, which
//! fences off any run still in flight, then release the endpoint (listener
//! and published output) before the port is cleared in the registry.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::HydraConfig;
use crate::error::{HydraError, HydraResult, RegistryError};
use crate::models::{NewSubmission, Submission, SubmissionStatus, SubmissionUpdate};
use crate::services::pipeline::{remove_site_dir, BuildPipeline};
use crate::services::port_allocator::{PortAllocator, PortProbe};
use crate::services::process_runner::CommandRunner;
use crate::services::recovery;
use crate::services::registry::SubmissionRegistry;
use crate::services::serving::SiteListeners;
use crate::services::site_builder::SiteBuilder;
use crate::services::source_control::GitClient;
use crate::services::worker::{PipelineJob, WorkQueue};

/// What the startup reconciliation did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub marked_dead: Vec<i64>,
    pub requeued: Vec<i64>,
    pub pruned_outputs: usize,
}

pub struct Hydra {
    config: Arc<HydraConfig>,
    registry: Arc<dyn SubmissionRegistry>,
    queue: Arc<dyn WorkQueue>,
    sites: Arc<SiteListeners>,
    pipeline: Arc<BuildPipeline>,
}

impl Hydra {
    pub fn new(
        config: HydraConfig,
        registry: Arc<dyn SubmissionRegistry>,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn PortProbe>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        let config = Arc::new(config);
        let sites = Arc::new(SiteListeners::new());
        let pipeline = Arc::new(BuildPipeline::new(
            config.clone(),
            registry.clone(),
            GitClient::new(config.git_program.clone(), runner.clone()),
            SiteBuilder::new(config.build_command.clone(), runner),
            PortAllocator::new(config.base_port, config.port_window, probe),
            sites.clone(),
        ));
        Self {
            config,
            registry,
            queue,
            sites,
            pipeline,
        }
    }

    pub fn config(&self) -> &HydraConfig {
        &self.config
    }

    /// The pipeline the worker executes jobs on.
    pub fn pipeline(&self) -> Arc<BuildPipeline> {
        self.pipeline.clone()
    }

    /// Create a submission and enqueue its first pipeline run.
    pub async fn submit(&self, new: NewSubmission) -> HydraResult<Submission> {
        let new = new.normalized().map_err(HydraError::InvalidInput)?;
        let submission = self.registry.create(new).await?;
        crate::metrics::status_changed(submission.status.as_str());
        tracing::info!(
            submission_id = submission.id,
            repository = %submission.repository,
            branch = %submission.branch,
            "Submission created"
        );
        self.queue.enqueue(PipelineJob {
            submission_id: submission.id,
            generation: submission.generation,
        })?;
        Ok(submission)
    }

    /// Stop serving a submission and release its port. Killing a submission
    /// that is already `Killed` or `Dead` changes nothing.
    pub async fn kill(&self, id: i64) -> HydraResult<Submission> {
        let current = self.require(id).await?;
        if current.status.is_released() {
            tracing::info!(submission_id = id, status = %current.status, "Kill ignored, already released");
            return Ok(current);
        }

        tracing::info!(submission_id = id, status = %current.status, port = ?current.port, "Killing submission");
        let fenced = self.fence_and_release(id).await?;
        self.finish_operator_write(&fenced, SubmissionUpdate::release(SubmissionStatus::Killed))
            .await
    }

    /// Re-run the whole pipeline from a fresh clone. A submission that is
    /// still building or serving is torn down first.
    pub async fn rebuild(&self, id: i64) -> HydraResult<Submission> {
        let current = self.require(id).await?;
        tracing::info!(submission_id = id, status = %current.status, "Rebuilding submission");

        let fenced = self.fence_and_release(id).await?;
        let resubmitted = self
            .finish_operator_write(&fenced, SubmissionUpdate::release(SubmissionStatus::Resubmitted))
            .await?;
        if resubmitted.status == SubmissionStatus::Resubmitted && resubmitted.generation == fenced.generation {
            self.queue.enqueue(PipelineJob {
                submission_id: id,
                generation: resubmitted.generation,
            })?;
        }
        Ok(resubmitted)
    }

    pub async fn get(&self, id: i64) -> HydraResult<Submission> {
        self.require(id).await
    }

    pub async fn list(&self) -> HydraResult<Vec<Submission>> {
        Ok(self.registry.list().await?)
    }

    /// Live sites, lowest port first.
    pub async fn sites(&self) -> HydraResult<Vec<Submission>> {
        let mut sites: Vec<Submission> = self
            .registry
            .list()
            .await?
            .into_iter()
            .filter(|s| s.status.implies_listener() && s.port.is_some())
            .collect();
        sites.sort_by_key(|s| s.port);
        Ok(sites)
    }

    /// Reconcile the registry with a fresh process. Must run before the API
    /// accepts requests.
    pub async fn recover(&self) -> HydraResult<RecoveryReport> {
        let swept = recovery::sweep(self.registry.as_ref()).await?;
        let held: HashSet<u16> = self.registry.assigned_ports().await?.into_iter().collect();
        let pruned_outputs = recovery::prune_output(&self.config.output_dir, &held).await?;

        let mut requeued = Vec::new();
        for submission in self.registry.list().await? {
            if submission.status.is_queued() {
                self.queue.enqueue(PipelineJob {
                    submission_id: submission.id,
                    generation: submission.generation,
                })?;
                requeued.push(submission.id);
            }
        }
        if !requeued.is_empty() {
            tracing::info!(count = requeued.len(), "Re-enqueued queued submissions");
        }

        Ok(RecoveryReport {
            marked_dead: swept.into_iter().map(|s| s.id).collect(),
            requeued,
            pruned_outputs,
        })
    }

    /// Close every site listener this process owns.
    pub async fn shutdown(&self) {
        tracing::info!("Stopping site listeners...");
        self.sites.shutdown().await;
    }

    async fn require(&self, id: i64) -> HydraResult<Submission> {
        Ok(self
            .registry
            .get(id)
            .await?
            .ok_or(RegistryError::NotFound(id))?)
    }

    /// Advance the generation so in-flight runs can no longer write, then
    /// stop the listener and remove published output. The port stays
    /// recorded until the caller's final write, so the allocator cannot
    /// hand it out while the directory still exists.
    async fn fence_and_release(&self, id: i64) -> HydraResult<Submission> {
        let fenced = self.registry.supersede(id, SubmissionUpdate::default()).await?;

        if let Some(port) = self.sites.stop(id).await {
            tracing::info!(submission_id = id, port, "Site listener stopped");
        }
        if let Some(port) = fenced.port {
            remove_site_dir(&self.config.site_dir(port)).await;
        }
        Ok(fenced)
    }

    /// Apply an operator's final write. If another operator action fenced
    /// the record in the meantime, that action wins and its state is
    /// returned.
    async fn finish_operator_write(&self, fenced: &Submission, update: SubmissionUpdate) -> HydraResult<Submission> {
        match self
            .registry
            .update_if_current(fenced.id, fenced.generation, update)
            .await
        {
            Ok(updated) => {
                crate::metrics::status_changed(updated.status.as_str());
                tracing::info!(submission_id = updated.id, status = %updated.status, "Status changed");
                Ok(updated)
            }
            Err(RegistryError::ConcurrentModification { .. }) => {
                tracing::info!(submission_id = fenced.id, "Operator write overtaken by a later action");
                self.require(fenced.id).await
            }
            Err(e) => Err(e.into()),
        }
    }
}
