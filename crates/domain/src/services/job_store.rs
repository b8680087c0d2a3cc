//! Storage seam for export jobs and their performance rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

use crate::error::ExportError;
use crate::models::{CompletedExport, ExportJob, ExportJobPerformance};

/// Which backing store is serving jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Memory,
    Postgres,
}

impl StoreMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreMode::Memory => "memory",
            StoreMode::Postgres => "postgres",
        }
    }
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Check run against a job while the store holds it exclusively.
pub type DownloadCheck<'a> = &'a (dyn Fn(&ExportJob) -> Result<(), ExportError> + Send + Sync);

/// Job records shared by submission, workers, downloads and retention.
///
/// Every mutation is atomic per job id. Transitions that the job's current
/// status does not allow are ignored and reported as `Ok(false)`.
#[async_trait]
pub trait ExportJobStore: Send + Sync {
    fn mode(&self) -> StoreMode;

    async fn create(&self, job: &ExportJob) -> Result<(), ExportError>;

    async fn get(&self, id: Uuid) -> Result<Option<ExportJob>, ExportError>;

    /// Like [`get`](Self::get) but hides other users' jobs.
    async fn get_for_owner(&self, id: Uuid, owner_id: Uuid)
        -> Result<Option<ExportJob>, ExportError>;

    /// Queued plus running jobs of one user.
    async fn count_active(&self, owner_id: Uuid) -> Result<u64, ExportError>;

    async fn mark_running(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, ExportError>;

    async fn mark_completed(
        &self,
        id: Uuid,
        output: CompletedExport,
        at: DateTime<Utc>,
    ) -> Result<bool, ExportError>;

    async fn mark_failed(
        &self,
        id: Uuid,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, ExportError>;

    /// Install a new token expiry on a completed job and clear its consumption.
    async fn set_token_expiry(
        &self,
        id: Uuid,
        owner_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<ExportJob, ExportError>;

    /// Run `check` and mark the token consumed in one step.
    ///
    /// Returns the job as it was read, with `download_token_consumed_at` set to `now`.
    async fn consume_download(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        check: DownloadCheck<'_>,
    ) -> Result<ExportJob, ExportError>;

    async fn record_performance(&self, row: &ExportJobPerformance) -> Result<(), ExportError>;

    /// Newest rows first.
    async fn list_performance(
        &self,
        owner_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ExportJobPerformance>, ExportError>;

    /// Delete terminal jobs that finished before `cutoff`. Returns the number removed.
    async fn purge_jobs_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, ExportError>;

    async fn purge_performance_before(&self, cutoff: DateTime<Utc>) -> Result<u64, ExportError>;
}
