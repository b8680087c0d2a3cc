//! In-process job store and journal reader.
//!
//! The job store is the default backend: jobs live only as long as the
//! process, so the retention sweeper runs with a short TTL. The journal reader
//! is seedable and backs tests and local demos.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::{
    CompletedExport, ExportJob, ExportJobPerformance, Goal, GoalFilter, Trade, TradeFilter,
};
use domain::services::{DownloadCheck, ExportJobStore, JournalReader, StoreMode};
use domain::ExportError;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

// ============================================================================
// Job store
// ============================================================================

/// Job store backed by a map behind an async `RwLock`.
///
/// Every mutation takes the write lock, so check-then-set sequences are atomic.
#[derive(Default)]
pub struct InMemoryExportJobStore {
    jobs: RwLock<HashMap<Uuid, ExportJob>>,
    performance: RwLock<Vec<ExportJobPerformance>>,
}

impl InMemoryExportJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl ExportJobStore for InMemoryExportJobStore {
    fn mode(&self) -> StoreMode {
        StoreMode::Memory
    }

    async fn create(&self, job: &ExportJob) -> Result<(), ExportError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(ExportError::Store(format!("duplicate export job id {}", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExportJob>, ExportError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn get_for_owner(
        &self,
        id: Uuid,
        owner_id: Uuid,
    ) -> Result<Option<ExportJob>, ExportError> {
        Ok(self
            .jobs
            .read()
            .await
            .get(&id)
            .filter(|job| job.owner_id == owner_id)
            .cloned())
    }

    async fn count_active(&self, owner_id: Uuid) -> Result<u64, ExportError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.owner_id == owner_id && job.status.is_active())
            .count() as u64)
    }

    async fn mark_running(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, ExportError> {
        Ok(self
            .jobs
            .write()
            .await
            .get_mut(&id)
            .is_some_and(|job| job.start(at)))
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        output: CompletedExport,
        at: DateTime<Utc>,
    ) -> Result<bool, ExportError> {
        Ok(self
            .jobs
            .write()
            .await
            .get_mut(&id)
            .is_some_and(|job| job.complete(output, at)))
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, ExportError> {
        Ok(self
            .jobs
            .write()
            .await
            .get_mut(&id)
            .is_some_and(|job| job.fail(message, at)))
    }

    async fn set_token_expiry(
        &self,
        id: Uuid,
        owner_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<ExportJob, ExportError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .filter(|job| job.owner_id == owner_id)
            .ok_or(ExportError::NotFound)?;

        if !job.reissue_token(expires_at) {
            return Err(ExportError::NotReady(format!(
                "export job is {}",
                job.status
            )));
        }
        Ok(job.clone())
    }

    async fn consume_download(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        check: DownloadCheck<'_>,
    ) -> Result<ExportJob, ExportError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(ExportError::NotFound)?;

        check(job)?;
        job.download_token_consumed_at = Some(now);
        Ok(job.clone())
    }

    async fn record_performance(&self, row: &ExportJobPerformance) -> Result<(), ExportError> {
        self.performance.write().await.push(row.clone());
        Ok(())
    }

    async fn list_performance(
        &self,
        owner_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ExportJobPerformance>, ExportError> {
        let rows = self.performance.read().await;
        // Newest insert first among rows sharing a timestamp
        let mut owned: Vec<ExportJobPerformance> = rows
            .iter()
            .rev()
            .filter(|row| row.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        owned.truncate(limit.max(0) as usize);
        Ok(owned)
    }

    async fn purge_jobs_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, ExportError> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - jobs.len()) as u64)
    }

    async fn purge_performance_before(&self, cutoff: DateTime<Utc>) -> Result<u64, ExportError> {
        let mut rows = self.performance.write().await;
        let before = rows.len();
        rows.retain(|row| row.created_at >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}

// ============================================================================
// Journal reader
// ============================================================================

/// Journal reader over records held in memory.
#[derive(Default)]
pub struct MemoryJournalReader {
    trades: RwLock<Vec<Trade>>,
    goals: RwLock<Vec<Goal>>,
}

impl MemoryJournalReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(trades: Vec<Trade>, goals: Vec<Goal>) -> Self {
        Self {
            trades: RwLock::new(trades),
            goals: RwLock::new(goals),
        }
    }
}

#[async_trait]
impl JournalReader for MemoryJournalReader {
    async fn list_trades(
        &self,
        owner_id: Uuid,
        filter: &TradeFilter,
    ) -> Result<Vec<Trade>, ExportError> {
        let mut trades: Vec<Trade> = self
            .trades
            .read()
            .await
            .iter()
            .filter(|t| t.owner_id == owner_id && filter.matches(t))
            .cloned()
            .collect();
        trades.sort_by(|a, b| b.entry_at.cmp(&a.entry_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            trades.truncate(limit as usize);
        }
        Ok(trades)
    }

    async fn list_goals(
        &self,
        owner_id: Uuid,
        filter: &GoalFilter,
    ) -> Result<Vec<Goal>, ExportError> {
        let mut goals: Vec<Goal> = self
            .goals
            .read()
            .await
            .iter()
            .filter(|g| g.owner_id == owner_id && filter.matches(g))
            .cloned()
            .collect();
        goals.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(goals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use domain::models::{
        ExportFormat, ExportParameters, ExportStatus, GoalExportParams, TradeDirection,
        TradeStatus,
    };
    use std::sync::Arc;

    fn queued_job(owner_id: Uuid) -> ExportJob {
        let now = Utc::now();
        ExportJob::queued(
            owner_id,
            ExportFormat::Csv,
            ExportParameters::Goals(GoalExportParams::default()),
            now + Duration::minutes(10),
            now,
        )
    }

    fn output() -> CompletedExport {
        CompletedExport {
            filename: "goals_20240301120000.csv".to_string(),
            content_type: "text/csv; charset=utf-8".to_string(),
            payload: b"id,title\n".to_vec(),
        }
    }

    fn perf(owner_id: Uuid, created_at: DateTime<Utc>) -> ExportJobPerformance {
        ExportJobPerformance {
            job_id: Uuid::new_v4(),
            owner_id,
            wait_ms: 1,
            dur_ms: 2,
            size_bytes: 3,
            streamed: false,
            streamed_chunks: 0,
            streamed_bytes: 0,
            avg_chunk_ms: 0.0,
            avg_chunk_bytes: 0.0,
            attempt: 1,
            created_at,
        }
    }

    fn accept_completed(job: &ExportJob) -> Result<(), ExportError> {
        if job.download_token_consumed_at.is_some() {
            return Err(ExportError::TokenGone);
        }
        if job.status != ExportStatus::Completed {
            return Err(ExportError::NotReady(job.status.to_string()));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_transitions_are_enforced() {
        let store = InMemoryExportJobStore::new();
        let job = queued_job(Uuid::new_v4());
        store.create(&job).await.unwrap();

        assert!(!store.mark_completed(job.id, output(), Utc::now()).await.unwrap());
        assert!(store.mark_running(job.id, Utc::now()).await.unwrap());
        assert!(store.mark_completed(job.id, output(), Utc::now()).await.unwrap());
        assert!(!store.mark_failed(job.id, "late", Utc::now()).await.unwrap());

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExportStatus::Completed);
        assert_eq!(stored.attempt_count, 1);
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn test_missing_job_transitions_are_noops() {
        let store = InMemoryExportJobStore::new();
        assert!(!store.mark_running(Uuid::new_v4(), Utc::now()).await.unwrap());
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_count_active_per_owner() {
        let store = InMemoryExportJobStore::new();
        let owner = Uuid::new_v4();
        let a = queued_job(owner);
        let b = queued_job(owner);
        store.create(&a).await.unwrap();
        store.create(&b).await.unwrap();
        store.create(&queued_job(Uuid::new_v4())).await.unwrap();

        assert_eq!(store.count_active(owner).await.unwrap(), 2);
        store.mark_running(a.id, Utc::now()).await.unwrap();
        assert_eq!(store.count_active(owner).await.unwrap(), 2);
        store.mark_failed(a.id, "BUILD_FAILURE: x", Utc::now()).await.unwrap();
        assert_eq!(store.count_active(owner).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_for_owner_hides_other_users() {
        let store = InMemoryExportJobStore::new();
        let job = queued_job(Uuid::new_v4());
        store.create(&job).await.unwrap();

        assert!(store.get_for_owner(job.id, job.owner_id).await.unwrap().is_some());
        assert!(store
            .get_for_owner(job.id, Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_consume_is_single_use_under_contention() {
        let store = Arc::new(InMemoryExportJobStore::new());
        let job = queued_job(Uuid::new_v4());
        store.create(&job).await.unwrap();
        store.mark_running(job.id, Utc::now()).await.unwrap();
        store.mark_completed(job.id, output(), Utc::now()).await.unwrap();

        let id = job.id;
        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.consume_download(id, Utc::now(), &accept_completed).await
            }));
        }

        let mut ok = 0;
        let mut gone = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(ExportError::TokenGone) => gone += 1,
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(gone, 9);
    }

    #[tokio::test]
    async fn test_failed_check_does_not_consume() {
        let store = InMemoryExportJobStore::new();
        let job = queued_job(Uuid::new_v4());
        store.create(&job).await.unwrap();

        let result = store
            .consume_download(job.id, Utc::now(), &accept_completed)
            .await;
        assert!(matches!(result, Err(ExportError::NotReady(_))));
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert!(stored.download_token_consumed_at.is_none());
    }

    #[tokio::test]
    async fn test_set_token_expiry() {
        let store = InMemoryExportJobStore::new();
        let job = queued_job(Uuid::new_v4());
        store.create(&job).await.unwrap();
        let expiry = Utc::now() + Duration::minutes(10);

        let not_ready = store.set_token_expiry(job.id, job.owner_id, expiry).await;
        assert!(matches!(not_ready, Err(ExportError::NotReady(_))));

        store.mark_running(job.id, Utc::now()).await.unwrap();
        store.mark_completed(job.id, output(), Utc::now()).await.unwrap();
        store
            .consume_download(job.id, Utc::now(), &accept_completed)
            .await
            .unwrap();

        let other_owner = store.set_token_expiry(job.id, Uuid::new_v4(), expiry).await;
        assert!(matches!(other_owner, Err(ExportError::NotFound)));

        let refreshed = store
            .set_token_expiry(job.id, job.owner_id, expiry)
            .await
            .unwrap();
        assert_eq!(refreshed.download_token_expires_at, Some(expiry));
        assert!(refreshed.download_token_consumed_at.is_none());
    }

    #[tokio::test]
    async fn test_purge_only_removes_old_terminal_jobs() {
        let store = InMemoryExportJobStore::new();
        let old_done = queued_job(Uuid::new_v4());
        let recent_done = queued_job(Uuid::new_v4());
        let still_queued = queued_job(Uuid::new_v4());
        for job in [&old_done, &recent_done, &still_queued] {
            store.create(job).await.unwrap();
        }

        let long_ago = Utc::now() - Duration::hours(2);
        store.mark_running(old_done.id, long_ago).await.unwrap();
        store.mark_completed(old_done.id, output(), long_ago).await.unwrap();
        store.mark_running(recent_done.id, Utc::now()).await.unwrap();
        store.mark_failed(recent_done.id, "BUILD_FAILURE: x", Utc::now()).await.unwrap();

        let removed = store
            .purge_jobs_completed_before(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len().await, 2);
        assert!(store.get(old_done.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_performance_listing_and_purge() {
        let store = InMemoryExportJobStore::new();
        let owner = Uuid::new_v4();
        let now = Utc::now();
        store.record_performance(&perf(owner, now - Duration::days(40))).await.unwrap();
        store.record_performance(&perf(owner, now - Duration::minutes(1))).await.unwrap();
        store.record_performance(&perf(owner, now)).await.unwrap();
        store.record_performance(&perf(Uuid::new_v4(), now)).await.unwrap();

        let rows = store.list_performance(owner, 2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].created_at, now);

        let removed = store
            .purge_performance_before(now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.list_performance(owner, 200).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_memory_reader_scopes_filters_and_limits() {
        let owner = Uuid::new_v4();
        let base = Utc::now();
        let trade = |minutes: i64, owner_id: Uuid| Trade {
            id: Uuid::new_v4(),
            owner_id,
            instrument_id: "ES".to_string(),
            direction: TradeDirection::Long,
            entry_price: 1.0,
            exit_price: None,
            quantity: 1.0,
            contract_multiplier: 1.0,
            fees: 0.0,
            status: TradeStatus::Open,
            entry_at: base + Duration::minutes(minutes),
            exit_at: None,
            tags: vec![],
        };
        let reader = MemoryJournalReader::with_records(
            vec![trade(1, owner), trade(3, owner), trade(2, owner), trade(9, Uuid::new_v4())],
            vec![],
        );

        let filter = TradeFilter {
            limit: Some(2),
            ..Default::default()
        };
        let trades = reader.list_trades(owner, &filter).await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].entry_at, base + Duration::minutes(3));
        assert_eq!(trades[1].entry_at, base + Duration::minutes(2));

        assert!(reader
            .list_goals(owner, &GoalFilter::default())
            .await
            .unwrap()
            .is_empty());
    }
}
