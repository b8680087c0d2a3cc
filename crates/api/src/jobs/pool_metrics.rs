//! Samples worker pool and database pool gauges.

use sqlx::PgPool;

use super::export_worker::WorkerPool;
use super::scheduler::{Job, JobFrequency};
use crate::middleware::metrics::record_export_queue;

/// Publishes export queue depth, busy workers and, when Postgres is in use,
/// connection pool usage.
pub struct PoolMetricsJob {
    workers: WorkerPool,
    db: Option<PgPool>,
}

impl PoolMetricsJob {
    pub fn new(workers: WorkerPool, db: Option<PgPool>) -> Self {
        Self { workers, db }
    }
}

#[async_trait::async_trait]
impl Job for PoolMetricsJob {
    fn name(&self) -> &'static str {
        "pool_metrics"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(10)
    }

    async fn execute(&self) -> Result<(), String> {
        record_export_queue(self.workers.pending_len(), self.workers.running());
        if let Some(pool) = &self.db {
            persistence::metrics::record_pool_metrics(pool);
        }
        Ok(())
    }
}
