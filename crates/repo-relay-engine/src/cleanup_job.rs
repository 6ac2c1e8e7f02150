use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use repo_relay_core::current_unix_timestamp_ms;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{DEFAULT_HISTORY_MAX_AGE_DAYS, DEFAULT_LINK_MAX_AGE_DAYS};
use crate::spam_prevention::RelayHistoryGuard;
use crate::thread_links::ThreadLinkStore;

pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub links_removed: usize,
    pub history_removed: usize,
}

/// Age-based sweep of thread links and relay history as of `now_unix_ms`.
pub async fn run_cleanup(
    links: &ThreadLinkStore,
    history: &RelayHistoryGuard,
    link_max_age_days: u64,
    history_max_age_days: u64,
    now_unix_ms: u64,
) -> Result<CleanupReport> {
    let links_removed = links
        .cleanup_old_links_at(link_max_age_days, now_unix_ms)
        .await
        .context("thread link cleanup failed")?;
    let history_removed = history
        .cleanup_older_than(history_max_age_days, now_unix_ms)
        .context("relay history cleanup failed")?;
    Ok(CleanupReport {
        links_removed,
        history_removed,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupJobConfig {
    pub interval: Duration,
    pub link_max_age_days: u64,
    pub history_max_age_days: u64,
}

impl Default for CleanupJobConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CLEANUP_INTERVAL,
            link_max_age_days: DEFAULT_LINK_MAX_AGE_DAYS,
            history_max_age_days: DEFAULT_HISTORY_MAX_AGE_DAYS,
        }
    }
}

/// Periodic cleanup owned by the process supervisor.
pub struct CleanupJob {
    config: CleanupJobConfig,
    links: Arc<ThreadLinkStore>,
    history: Arc<RelayHistoryGuard>,
}

impl CleanupJob {
    pub fn new(
        config: CleanupJobConfig,
        links: Arc<ThreadLinkStore>,
        history: Arc<RelayHistoryGuard>,
    ) -> Self {
        Self {
            config,
            links,
            history,
        }
    }

    pub async fn run_once(&self, now_unix_ms: u64) -> Result<CleanupReport> {
        let report = run_cleanup(
            &self.links,
            &self.history,
            self.config.link_max_age_days,
            self.config.history_max_age_days,
            now_unix_ms,
        )
        .await?;
        tracing::info!(
            links_removed = report.links_removed,
            history_removed = report.history_removed,
            "scheduled cleanup completed"
        );
        Ok(report)
    }

    /// Runs a sweep every interval until the returned handle is shut down.
    pub fn spawn(self) -> CleanupJobHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        tracing::info!("cleanup job shutdown requested");
                        return;
                    }
                    _ = tokio::time::sleep(self.config.interval) => {}
                }
                if let Err(error) = self.run_once(current_unix_timestamp_ms()).await {
                    tracing::error!(error = %format!("{error:#}"), "scheduled cleanup failed");
                }
            }
        });
        CleanupJobHandle { shutdown_tx, task }
    }
}

pub struct CleanupJobHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CleanupJobHandle {
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.task.await.context("cleanup job task failed")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use repo_relay_core::MILLIS_PER_DAY;
    use tempfile::tempdir;

    use super::{run_cleanup, CleanupJob, CleanupJobConfig};
    use crate::spam_prevention::{RelayHistoryEntry, RelayHistoryGuard};
    use crate::thread_links::{ThreadLinkMetadata, ThreadLinkStore};

    fn history_entry(signature: &str, processed_at_unix_ms: u64) -> RelayHistoryEntry {
        RelayHistoryEntry {
            origin_repo: "joeeddy/ops".to_string(),
            origin_issue: 1,
            target_repo: "joeeddy/api".to_string(),
            target_issue: 2,
            timestamp_unix_ms: processed_at_unix_ms,
            sender: "joeeddy".to_string(),
            signature: signature.to_string(),
            processed_at_unix_ms,
        }
    }

    #[tokio::test]
    async fn functional_run_cleanup_sweeps_links_and_history() {
        let temp = tempdir().expect("tempdir");
        let now = 100 * MILLIS_PER_DAY;
        let links = ThreadLinkStore::from_path(temp.path().join("threadLinks.json"));
        let history = RelayHistoryGuard::new(10);
        links
            .link_thread_at(
                "a/b",
                1,
                "c/d",
                1,
                ThreadLinkMetadata::default(),
                now - 31 * MILLIS_PER_DAY,
            )
            .await
            .expect("old link");
        links
            .link_thread_at("a/b", 2, "c/d", 2, ThreadLinkMetadata::default(), now - MILLIS_PER_DAY)
            .await
            .expect("fresh link");
        history
            .record(history_entry("old", now - 8 * MILLIS_PER_DAY))
            .expect("record");
        history
            .record(history_entry("fresh", now - MILLIS_PER_DAY))
            .expect("record");

        let report = run_cleanup(&links, &history, 30, 7, now)
            .await
            .expect("cleanup");
        assert_eq!(report.links_removed, 1);
        assert_eq!(report.history_removed, 1);
        assert!(history.contains("fresh").expect("contains"));
    }

    #[tokio::test]
    async fn functional_run_once_is_deterministic() {
        let temp = tempdir().expect("tempdir");
        let links = Arc::new(ThreadLinkStore::from_path(temp.path().join("links.json")));
        let history = Arc::new(RelayHistoryGuard::new(10));
        history.record(history_entry("sig", 1_000)).expect("record");
        let job = CleanupJob::new(CleanupJobConfig::default(), links, history.clone());

        let report = job.run_once(1_000 + 7 * MILLIS_PER_DAY).await.expect("run");
        assert_eq!(report.history_removed, 0);
        let report = job.run_once(1_001 + 7 * MILLIS_PER_DAY).await.expect("run");
        assert_eq!(report.history_removed, 1);
    }

    #[tokio::test]
    async fn integration_spawned_job_stops_on_shutdown() {
        let temp = tempdir().expect("tempdir");
        let job = CleanupJob::new(
            CleanupJobConfig {
                interval: Duration::from_secs(3_600),
                ..CleanupJobConfig::default()
            },
            Arc::new(ThreadLinkStore::from_path(temp.path().join("links.json"))),
            Arc::new(RelayHistoryGuard::new(10)),
        );
        let handle = job.spawn();
        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("shutdown in time")
            .expect("shutdown");
    }
}
