//! Startup reconciliation.
//!
//! No subprocess, thread or socket survives a restart, so any record that
//! says a build is running or a site is listening is stale. Those records
//! become `Dead` (port cleared) and stay that way until rebuilt. Site output
//! left on disk for ports nobody holds any more is pruned.

use std::collections::HashSet;
use std::path::Path;

use crate::error::{HydraError, HydraResult};
use crate::models::Submission;
use crate::services::pipeline::{remove_site_dir, STAGING_PREFIX};
use crate::services::registry::SubmissionRegistry;

/// Mark every stale record `Dead`. Returns the swept records.
pub async fn sweep(registry: &dyn SubmissionRegistry) -> HydraResult<Vec<Submission>> {
    let swept = registry.mark_stale_dead().await?;
    for submission in &swept {
        tracing::warn!(
            submission_id = submission.id,
            repository = %submission.repository,
            branch = %submission.branch,
            "Marked stale submission Dead"
        );
    }
    crate::metrics::recovered(swept.len());
    tracing::info!(count = swept.len(), "Recovery sweep complete");
    Ok(swept)
}

/// Remove per-port directories and staging leftovers under `output_dir`
/// that no live submission owns. Returns how many entries were removed.
pub async fn prune_output(output_dir: &Path, held: &HashSet<u16>) -> HydraResult<usize> {
    let mut entries = match tokio::fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(HydraError::io("reading output directory", output_dir, e)),
    };

    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| HydraError::io("reading output directory", output_dir, e))?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let orphaned = match name.parse::<u16>() {
            Ok(port) => !held.contains(&port),
            Err(_) => name.starts_with(STAGING_PREFIX),
        };
        if orphaned && entry.path().is_dir() {
            remove_site_dir(&entry.path()).await;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewSubmission, SubmissionStatus, SubmissionUpdate};
    use crate::services::registry::MemoryRegistry;

    async fn seed(registry: &MemoryRegistry, status: SubmissionStatus, port: Option<u16>) -> i64 {
        let s = registry
            .create(NewSubmission {
                repository: "https://example/repo.git".to_string(),
                branch: status.as_str().to_lowercase(),
            })
            .await
            .unwrap();
        registry
            .update(
                s.id,
                SubmissionUpdate {
                    status: Some(status),
                    port: Some(port),
                },
            )
            .await
            .unwrap();
        s.id
    }

    #[tokio::test]
    async fn stale_records_become_dead_and_others_are_untouched() {
        let registry = MemoryRegistry::new();
        let cloning = seed(&registry, SubmissionStatus::Cloning, None).await;
        let building = seed(&registry, SubmissionStatus::Building, None).await;
        let running = seed(&registry, SubmissionStatus::Running, Some(4000)).await;
        let serving = seed(&registry, SubmissionStatus::Serving, Some(4001)).await;
        let errored = seed(&registry, SubmissionStatus::Error, None).await;
        let killed = seed(&registry, SubmissionStatus::Killed, None).await;
        let dead = seed(&registry, SubmissionStatus::Dead, None).await;
        let before_untouched: Vec<_> = {
            let all = registry.list().await.unwrap();
            all.into_iter()
                .filter(|s| [errored, killed, dead].contains(&s.id))
                .collect()
        };

        let swept = sweep(&registry).await.unwrap();
        let mut swept_ids: Vec<i64> = swept.iter().map(|s| s.id).collect();
        swept_ids.sort();
        assert_eq!(swept_ids, vec![cloning, building, running, serving]);

        for id in [cloning, building, running, serving] {
            let s = registry.get(id).await.unwrap().unwrap();
            assert_eq!(s.status, SubmissionStatus::Dead);
            assert_eq!(s.port, None);
            assert_eq!(s.generation, 1);
        }
        let after_untouched: Vec<_> = registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|s| [errored, killed, dead].contains(&s.id))
            .collect();
        assert_eq!(before_untouched, after_untouched);
        assert!(registry.assigned_ports().await.unwrap().is_empty());
    }

    #[test]
    fn sweep_reports_recovered_records_to_the_installed_recorder() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let registry = MemoryRegistry::new();
                seed(&registry, SubmissionStatus::Building, None).await;
                seed(&registry, SubmissionStatus::Serving, Some(4000)).await;
                seed(&registry, SubmissionStatus::Error, None).await;
                assert_eq!(sweep(&registry).await.unwrap().len(), 2);
            })
        });

        assert!(
            handle.render().contains("hydra_recovered_total 2"),
            "{}",
            handle.render()
        );
    }

    #[tokio::test]
    async fn prune_removes_unheld_port_dirs_and_staging() {
        let out = tempfile::tempdir().unwrap();
        for name in ["4000", "4001", ".staging-abc", "notes"] {
            std::fs::create_dir(out.path().join(name)).unwrap();
        }
        let held: HashSet<u16> = [4001].into_iter().collect();

        let removed = prune_output(out.path(), &held).await.unwrap();
        assert_eq!(removed, 2);
        assert!(!out.path().join("4000").exists());
        assert!(out.path().join("4001").exists());
        assert!(!out.path().join(".staging-abc").exists());
        assert!(out.path().join("notes").exists());
    }

    #[tokio::test]
    async fn prune_tolerates_missing_output_dir() {
        let out = tempfile::tempdir().unwrap();
        let missing = out.path().join("nope");
        assert_eq!(prune_output(&missing, &HashSet::new()).await.unwrap(), 0);
    }
}
