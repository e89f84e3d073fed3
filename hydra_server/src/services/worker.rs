//! Background execution of pipeline runs.
//!
//! Request handlers only enqueue a [`PipelineJob`]; the worker loop picks
//! jobs up and runs each on its own task so a slow clone or build never
//! blocks the caller or other submissions.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{HydraError, HydraResult};
use crate::services::pipeline::BuildPipeline;

/// One requested pipeline run: the submission and the generation that was
/// current when the run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineJob {
    pub submission_id: i64,
    pub generation: i64,
}

/// Anything that can accept pipeline work.
pub trait WorkQueue: Send + Sync {
    fn enqueue(&self, job: PipelineJob) -> HydraResult<()>;
}

/// In-process queue backed by an unbounded channel.
pub struct ChannelQueue {
    tx: mpsc::UnboundedSender<PipelineJob>,
}

impl ChannelQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl WorkQueue for ChannelQueue {
    fn enqueue(&self, job: PipelineJob) -> HydraResult<()> {
        self.tx.send(job).map_err(|_| HydraError::QueueClosed)?;
        tracing::debug!(
            submission_id = job.submission_id,
            generation = job.generation,
            "Pipeline job enqueued"
        );
        Ok(())
    }
}

/// Run the worker loop until `shutdown` fires or every sender is gone.
/// Spawned as a background tokio task.
pub async fn run_worker(
    pipeline: Arc<BuildPipeline>,
    mut jobs: mpsc::UnboundedReceiver<PipelineJob>,
    shutdown: CancellationToken,
) {
    tracing::info!("Pipeline worker started");

    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            pipeline.run(job).await;
        });
    }

    tracing::info!("Pipeline worker stopped");
}

/// Wait for the worker task after shutdown. Returns `false` when it
/// panicked or was aborted.
pub async fn join_worker(worker: JoinHandle<()>) -> bool {
    match worker.await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Pipeline worker ended abnormally: {e}");
            false
        }
    }
}
