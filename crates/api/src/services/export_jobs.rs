//! Export submission, execution and delivery.
//!
//! [`ExportService`] is what the HTTP handlers talk to. It owns the worker
//! pool, which drives an [`ExportRunner`] for every queued job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::{
    CanonicalTable, CompletedExport, ExportFormat, ExportJob, ExportJobPerformance,
    ExportParameters, ExportStatus, ExportType, PerformanceSummary, MAX_PERFORMANCE_ROWS,
};
use domain::services::{ExportJobStore, JournalReader, StoreMode};
use domain::ExportError;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::download_token::DownloadTokenManager;
use super::export_builder::ExportBuilder;
use super::export_serializer::{export_filename, serialize};
use super::export_streaming::{
    check_memory_guard, collect_csv_chunks, deliver_csv, CsvDelivery, StreamStats,
    StreamingConfig,
};
use crate::config::ExportsConfig;
use crate::jobs::{ExportExecutor, WorkerPool};
use crate::middleware::metrics::{
    record_export_download, record_export_finished, record_export_queue, record_export_submitted,
};

/// Returned by a successful submission.
#[derive(Debug, Clone)]
pub struct SubmittedExport {
    pub job: ExportJob,
    pub download_token: String,
    pub token_expires_at: DateTime<Utc>,
}

/// A freshly issued download token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub job_id: Uuid,
    pub download_token: String,
    pub token_expires_at: DateTime<Utc>,
}

/// Payload handed to the client on download.
#[derive(Debug, Clone)]
pub struct DownloadedExport {
    pub filename: String,
    pub content_type: String,
    pub payload: Vec<u8>,
}

pub struct ExportService {
    store: Arc<dyn ExportJobStore>,
    builder: ExportBuilder,
    tokens: DownloadTokenManager,
    workers: WorkerPool,
    streaming: StreamingConfig,
    max_active_per_user: u64,
    /// Serializes count-then-create so concurrent submissions cannot overshoot the cap.
    submit_lock: Mutex<()>,
}

impl ExportService {
    pub fn new(
        store: Arc<dyn ExportJobStore>,
        reader: Arc<dyn JournalReader>,
        config: &ExportsConfig,
    ) -> Self {
        let builder = ExportBuilder::new(reader);
        let streaming = StreamingConfig::from(config);
        let runner = Arc::new(ExportRunner {
            store: Arc::clone(&store),
            builder: builder.clone(),
            streaming,
            stream_queued_csv: config.stream_queued_csv,
        });

        Self {
            store,
            builder,
            tokens: DownloadTokenManager::from_config(&config.token_secret, config.token_ttl_secs),
            workers: WorkerPool::new(runner, config.max_concurrency),
            streaming,
            max_active_per_user: config.max_active_per_user.max(1),
            submit_lock: Mutex::new(()),
        }
    }

    pub fn store_mode(&self) -> StoreMode {
        self.store.mode()
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Queue an export for `owner_id` and return it with a download token.
    ///
    /// Fails with [`ExportError::RateLimited`] when the owner already has the
    /// maximum number of queued or running jobs. Never waits for execution.
    pub async fn submit(
        &self,
        owner_id: Uuid,
        export_type: ExportType,
        format: ExportFormat,
        parameters: Option<JsonValue>,
    ) -> Result<SubmittedExport, ExportError> {
        let parameters = ExportParameters::parse(export_type, parameters)?;
        let now = Utc::now();
        let token_expires_at = self.tokens.expiry_from(now);
        let job = ExportJob::queued(owner_id, format, parameters, token_expires_at, now);
        let download_token = self.tokens.sign(job.id, token_expires_at)?;

        {
            let _guard = self.submit_lock.lock().await;
            let active = self.store.count_active(owner_id).await?;
            if active >= self.max_active_per_user {
                warn!(
                    owner_id = %owner_id,
                    active = active,
                    limit = self.max_active_per_user,
                    "Export submission rejected"
                );
                return Err(ExportError::RateLimited {
                    active,
                    limit: self.max_active_per_user,
                });
            }
            self.store.create(&job).await?;
        }

        record_export_submitted(export_type);
        info!(
            job_id = %job.id,
            owner_id = %owner_id,
            export_type = %export_type,
            format = %format,
            "Export job queued"
        );

        self.workers.enqueue(job.id);
        record_export_queue(self.workers.pending_len(), self.workers.running());

        Ok(SubmittedExport {
            job,
            download_token,
            token_expires_at,
        })
    }

    /// Owner-scoped job lookup.
    pub async fn job(&self, owner_id: Uuid, job_id: Uuid) -> Result<ExportJob, ExportError> {
        self.store
            .get_for_owner(job_id, owner_id)
            .await?
            .ok_or(ExportError::NotFound)
    }

    /// Issue a new token for a completed job, revoking earlier ones.
    pub async fn refresh_token(
        &self,
        owner_id: Uuid,
        job_id: Uuid,
    ) -> Result<IssuedToken, ExportError> {
        let current = self.job(owner_id, job_id).await?;
        let mut expires_at = self.tokens.expiry_from(Utc::now());
        // Same-millisecond refreshes would otherwise reproduce the old token.
        if let Some(previous) = current.download_token_expires_at {
            if expires_at <= previous {
                expires_at = previous + chrono::Duration::milliseconds(1);
            }
        }
        let job = self
            .store
            .set_token_expiry(job_id, owner_id, expires_at)
            .await?;
        let download_token = self.tokens.sign(job.id, expires_at)?;

        info!(job_id = %job.id, "Download token reissued");
        Ok(IssuedToken {
            job_id: job.id,
            download_token,
            token_expires_at: expires_at,
        })
    }

    /// Consume `token` and return the job's payload.
    pub async fn download(&self, job_id: Uuid, token: &str) -> Result<DownloadedExport, ExportError> {
        let tokens = &self.tokens;
        let check = move |job: &ExportJob| tokens.check_download(job, token, Utc::now());

        let result = self.store.consume_download(job_id, Utc::now(), &check).await;
        match result {
            Ok(job) => {
                record_export_download("ok");
                info!(job_id = %job_id, "Export downloaded");
                match (job.filename, job.content_type, job.payload) {
                    (Some(filename), Some(content_type), Some(payload)) => Ok(DownloadedExport {
                        filename,
                        content_type,
                        payload,
                    }),
                    _ => Err(ExportError::NotReady("Export has no payload".into())),
                }
            }
            Err(e) => {
                record_export_download(e.code());
                Err(e)
            }
        }
    }

    /// Build a CSV table for the caller without queueing a job.
    pub async fn stream_direct(
        &self,
        owner_id: Uuid,
        parameters: &ExportParameters,
        force_stream: bool,
    ) -> Result<CsvDelivery, ExportError> {
        let table = self.builder.build_table(owner_id, parameters).await?;
        Ok(deliver_csv(table, self.streaming, force_stream))
    }

    /// Newest performance rows of the owner's jobs.
    pub async fn performance(
        &self,
        owner_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ExportJobPerformance>, ExportError> {
        self.store
            .list_performance(owner_id, limit.clamp(1, MAX_PERFORMANCE_ROWS))
            .await
    }

    pub async fn performance_summary(
        &self,
        owner_id: Uuid,
        limit: i64,
    ) -> Result<PerformanceSummary, ExportError> {
        let rows = self.performance(owner_id, limit).await?;
        Ok(PerformanceSummary::from_rows(&rows))
    }
}

// ============================================================================
// Execution
// ============================================================================

/// Runs queued jobs for the worker pool.
pub struct ExportRunner {
    store: Arc<dyn ExportJobStore>,
    builder: ExportBuilder,
    streaming: StreamingConfig,
    stream_queued_csv: bool,
}

struct Produced {
    output: CompletedExport,
    stream: Option<StreamStats>,
}

impl ExportRunner {
    async fn produce(&self, job: &ExportJob) -> Result<Produced, ExportError> {
        let table = self.builder.build_table(job.owner_id, &job.parameters).await?;
        check_memory_guard(&table, job.format, self.streaming.memory_soft_limit_bytes)?;

        let filename = export_filename(&table.filename_base, job.format, Utc::now());
        let (payload, stream) = if self.streams(job.format, &table) {
            let (payload, stats) = collect_csv_chunks(Arc::new(table), self.streaming).await?;
            (payload, Some(stats))
        } else {
            (serialize(&table, job.format, job.export_type())?, None)
        };

        Ok(Produced {
            output: CompletedExport {
                filename,
                content_type: job.format.content_type().to_string(),
                payload,
            },
            stream,
        })
    }

    fn streams(&self, format: ExportFormat, table: &CanonicalTable) -> bool {
        self.stream_queued_csv
            && format == ExportFormat::Csv
            && self.streaming.should_stream(table.len(), false)
    }

    async fn record(
        &self,
        job: &ExportJob,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        size_bytes: usize,
        stream: Option<StreamStats>,
    ) {
        let stream = stream.unwrap_or_default();
        let row = ExportJobPerformance {
            job_id: job.id,
            owner_id: job.owner_id,
            wait_ms: (started_at - job.created_at).num_milliseconds().max(0),
            dur_ms: (finished_at - started_at).num_milliseconds().max(0),
            size_bytes: size_bytes as i64,
            streamed: stream.chunks > 0,
            streamed_chunks: stream.chunks as i64,
            streamed_bytes: stream.bytes as i64,
            avg_chunk_ms: stream.avg_chunk_ms,
            avg_chunk_bytes: stream.avg_chunk_bytes,
            attempt: job.attempt_count.max(1),
            created_at: finished_at,
        };
        if let Err(e) = self.store.record_performance(&row).await {
            error!(job_id = %job.id, "Failed to record export performance: {}", e);
        }
    }

    /// Moves the job to failed. Returns whether the transition happened.
    async fn fail(&self, job_id: Uuid, message: &str) -> bool {
        match self.store.mark_failed(job_id, message, Utc::now()).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(job_id = %job_id, "Export job already terminal, failure not recorded");
                false
            }
            Err(e) => {
                error!(job_id = %job_id, "Failed to record export failure: {}", e);
                false
            }
        }
    }

    async fn finish_failed(
        &self,
        job: &ExportJob,
        message: &str,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        elapsed: f64,
    ) {
        if self.fail(job.id, message).await {
            record_export_finished(ExportStatus::Failed, elapsed, 0);
            self.record(job, started_at, finished_at, 0, None).await;
        }
    }
}

/// Message stored on a failed job. Anything that is not already a build or
/// memory failure is reported as a build failure.
fn failure_message(error: ExportError) -> String {
    match error {
        ExportError::Build(_) | ExportError::MemoryLimitExceeded { .. } => error.to_string(),
        other => ExportError::Build(other.to_string()).to_string(),
    }
}

#[async_trait]
impl ExportExecutor for ExportRunner {
    async fn run(&self, job_id: Uuid) {
        let started_at = Utc::now();
        match self.store.mark_running(job_id, started_at).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(job_id = %job_id, "Export job is not queued, skipping");
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, "Failed to start export job: {}", e);
                self.fail(job_id, &failure_message(e)).await;
                return;
            }
        }

        let job = match self.store.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %job_id, "Export job vanished before execution");
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, "Failed to load export job: {}", e);
                self.fail(job_id, &failure_message(e)).await;
                return;
            }
        };

        let timer = Instant::now();
        let outcome = self.produce(&job).await;
        let finished_at = Utc::now();
        let elapsed = timer.elapsed().as_secs_f64();

        match outcome {
            Ok(produced) => {
                let size = produced.output.payload.len();
                let filename = produced.output.filename.clone();
                match self.store.mark_completed(job_id, produced.output, finished_at).await {
                    Ok(true) => {
                        info!(
                            job_id = %job_id,
                            filename = %filename,
                            size_bytes = size,
                            elapsed_ms = (elapsed * 1000.0) as u64,
                            "Export job completed"
                        );
                        record_export_finished(ExportStatus::Completed, elapsed, size);
                        self.record(&job, started_at, finished_at, size, produced.stream)
                            .await;
                    }
                    Ok(false) => {
                        warn!(job_id = %job_id, "Export job left running state, result discarded");
                    }
                    Err(e) => {
                        error!(job_id = %job_id, "Failed to store export payload: {}", e);
                        self.finish_failed(&job, &failure_message(e), started_at, finished_at, elapsed)
                            .await;
                    }
                }
            }
            Err(e) => {
                let message = failure_message(e);
                warn!(job_id = %job_id, error = %message, "Export job failed");
                self.finish_failed(&job, &message, started_at, finished_at, elapsed)
                    .await;
            }
        }
    }

    async fn abort(&self, job_id: Uuid, reason: String) {
        let now = Utc::now();
        if !self.fail(job_id, &reason).await {
            return;
        }
        record_export_finished(ExportStatus::Failed, 0.0, 0);

        if let Ok(Some(job)) = self.store.get(job_id).await {
            let started_at = job.started_at.unwrap_or(now);
            self.record(&job, started_at, now, 0, None).await;
        }
    }
}
