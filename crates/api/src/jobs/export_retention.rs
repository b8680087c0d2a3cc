//! Retention sweep for finished export jobs and old performance rows.

use chrono::{Duration, Utc};
use domain::services::{ExportJobStore, StoreMode};
use std::sync::Arc;
use tracing::info;

use super::scheduler::{Job, JobFrequency};
use crate::config::RetentionConfig;

/// Deletes terminal jobs past their TTL and performance rows past theirs.
///
/// The job TTL depends on the backing store: in-memory jobs hold payloads in
/// process memory and are dropped much sooner than persisted ones.
pub struct ExportRetentionJob {
    store: Arc<dyn ExportJobStore>,
    config: RetentionConfig,
}

impl ExportRetentionJob {
    pub fn new(store: Arc<dyn ExportJobStore>, config: RetentionConfig) -> Self {
        Self { store, config }
    }

    fn job_ttl(&self) -> Duration {
        match self.store.mode() {
            StoreMode::Memory => Duration::seconds(self.config.memory_job_ttl_secs),
            StoreMode::Postgres => Duration::seconds(self.config.persistent_job_ttl_secs),
        }
    }

    /// One sweep. Returns the number of jobs and performance rows removed.
    pub async fn sweep(&self) -> Result<(u64, u64), String> {
        let now = Utc::now();

        let jobs = self
            .store
            .purge_jobs_completed_before(now - self.job_ttl())
            .await
            .map_err(|e| format!("Failed to purge export jobs: {}", e))?;

        let rows = self
            .store
            .purge_performance_before(now - Duration::days(self.config.performance_ttl_days))
            .await
            .map_err(|e| format!("Failed to purge export performance rows: {}", e))?;

        if jobs > 0 || rows > 0 {
            info!(
                store = %self.store.mode(),
                jobs_removed = jobs,
                performance_rows_removed = rows,
                "Export retention sweep"
            );
        }

        Ok((jobs, rows))
    }
}

#[async_trait::async_trait]
impl Job for ExportRetentionJob {
    fn name(&self) -> &'static str {
        "export_retention"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.config.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        self.sweep().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::{
        CompletedExport, ExportFormat, ExportJob, ExportJobPerformance, ExportParameters,
        GoalExportParams,
    };
    use persistence::memory::InMemoryExportJobStore;
    use uuid::Uuid;

    fn finished_job(finished_ago_secs: i64) -> ExportJob {
        let at = Utc::now() - Duration::seconds(finished_ago_secs);
        let mut job = ExportJob::queued(
            Uuid::new_v4(),
            ExportFormat::Csv,
            ExportParameters::Goals(GoalExportParams::default()),
            at + Duration::seconds(600),
            at,
        );
        job.start(at);
        job.complete(
            CompletedExport {
                filename: "goals.csv".into(),
                content_type: "text/csv; charset=utf-8".into(),
                payload: b"id\n".to_vec(),
            },
            at,
        );
        job
    }

    fn perf_row(age_days: i64) -> ExportJobPerformance {
        ExportJobPerformance {
            job_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            wait_ms: 1,
            dur_ms: 2,
            size_bytes: 3,
            streamed: false,
            streamed_chunks: 0,
            streamed_bytes: 0,
            avg_chunk_ms: 0.0,
            avg_chunk_bytes: 0.0,
            attempt: 1,
            created_at: Utc::now() - Duration::days(age_days),
        }
    }

    #[tokio::test]
    async fn test_sweep_uses_memory_ttl() {
        let store = Arc::new(InMemoryExportJobStore::new());
        let old = finished_job(1_000);
        let fresh = finished_job(10);
        store.create(&old).await.unwrap();
        store.create(&fresh).await.unwrap();

        let job = ExportRetentionJob::new(store.clone(), RetentionConfig::default());
        let (jobs, _) = job.sweep().await.unwrap();

        assert_eq!(jobs, 1);
        assert!(store.get(old.id).await.unwrap().is_none());
        assert!(store.get(fresh.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_keeps_active_jobs() {
        let store = Arc::new(InMemoryExportJobStore::new());
        let queued = ExportJob::queued(
            Uuid::new_v4(),
            ExportFormat::Json,
            ExportParameters::Goals(GoalExportParams::default()),
            Utc::now(),
            Utc::now() - Duration::days(3),
        );
        store.create(&queued).await.unwrap();

        let job = ExportRetentionJob::new(store.clone(), RetentionConfig::default());
        job.execute().await.unwrap();

        assert!(store.get(queued.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_purges_old_performance_rows() {
        let store = Arc::new(InMemoryExportJobStore::new());
        let owner = Uuid::new_v4();
        let mut old = perf_row(45);
        old.owner_id = owner;
        let mut recent = perf_row(1);
        recent.owner_id = owner;
        store.record_performance(&old).await.unwrap();
        store.record_performance(&recent).await.unwrap();

        let job = ExportRetentionJob::new(store.clone(), RetentionConfig::default());
        let (_, rows) = job.sweep().await.unwrap();

        assert_eq!(rows, 1);
        let left = store.list_performance(owner, 50).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].job_id, recent.job_id);
    }

    #[test]
    fn test_frequency_follows_config() {
        let config = RetentionConfig {
            interval_secs: 30,
            ..RetentionConfig::default()
        };
        let job = ExportRetentionJob::new(Arc::new(InMemoryExportJobStore::new()), config);
        assert_eq!(job.name(), "export_retention");
        assert_eq!(job.frequency(), JobFrequency::Seconds(30));
    }
}
