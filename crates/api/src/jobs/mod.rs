//! Export worker pool and periodic background jobs.

pub mod export_worker;
mod export_retention;
mod pool_metrics;
mod scheduler;

pub use export_retention::ExportRetentionJob;
pub use export_worker::{ExportExecutor, WorkerPool};
pub use pool_metrics::PoolMetricsJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
