//! Postgres-backed export job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::{
    CompletedExport, ExportFormat, ExportJob, ExportJobPerformance, ExportParameters,
    ExportStatus, ExportType,
};
use domain::services::{DownloadCheck, ExportJobStore, StoreMode};
use domain::ExportError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::{ExportJobEntity, ExportJobPerformanceEntity};
use crate::metrics::QueryTimer;

/// Export job store for database operations.
///
/// Row locks (`SELECT ... FOR UPDATE`) make token refresh and consumption
/// atomic per job.
#[derive(Clone)]
pub struct PgExportJobStore {
    pool: PgPool,
}

impl PgExportJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn store_error(e: sqlx::Error) -> ExportError {
    tracing::error!(error = %e, "Export store query failed");
    ExportError::Store(e.to_string())
}

#[async_trait]
impl ExportJobStore for PgExportJobStore {
    fn mode(&self) -> StoreMode {
        StoreMode::Postgres
    }

    async fn create(&self, job: &ExportJob) -> Result<(), ExportError> {
        let timer = QueryTimer::new("create_export_job");
        let result = sqlx::query(
            r#"
            INSERT INTO export_jobs (id, owner_id, export_type, format, parameters, status,
                                     created_at, attempt_count, download_token_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.id)
        .bind(job.owner_id)
        .bind(job.export_type().as_str())
        .bind(job.format.as_str())
        .bind(job.parameters.to_json())
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.attempt_count)
        .bind(job.download_token_expires_at)
        .execute(&self.pool)
        .await;
        timer.record();

        result.map(|_| ()).map_err(store_error)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExportJob>, ExportError> {
        let timer = QueryTimer::new("find_export_job");
        let entity = sqlx::query_as::<_, ExportJobEntity>(
            r#"
            SELECT id, owner_id, export_type, format, parameters, status, created_at, started_at,
                   completed_at, error_message, filename, content_type, payload, attempt_count,
                   download_token_expires_at, download_token_consumed_at
            FROM export_jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        entity.map_err(store_error)?.map(entity_to_domain).transpose()
    }

    async fn get_for_owner(
        &self,
        id: Uuid,
        owner_id: Uuid,
    ) -> Result<Option<ExportJob>, ExportError> {
        let timer = QueryTimer::new("find_export_job_for_owner");
        let entity = sqlx::query_as::<_, ExportJobEntity>(
            r#"
            SELECT id, owner_id, export_type, format, parameters, status, created_at, started_at,
                   completed_at, error_message, filename, content_type, payload, attempt_count,
                   download_token_expires_at, download_token_consumed_at
            FROM export_jobs
            WHERE id = $1 AND owner_id = $2
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        entity.map_err(store_error)?.map(entity_to_domain).transpose()
    }

    async fn count_active(&self, owner_id: Uuid) -> Result<u64, ExportError> {
        let timer = QueryTimer::new("count_active_export_jobs");
        let count: Result<i64, sqlx::Error> = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM export_jobs
            WHERE owner_id = $1 AND status IN ('queued', 'running')
            "#,
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await;
        timer.record();

        Ok(count.map_err(store_error)?.max(0) as u64)
    }

    async fn mark_running(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, ExportError> {
        let timer = QueryTimer::new("mark_export_job_running");
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = 'running', started_at = $2, attempt_count = attempt_count + 1
            WHERE id = $1 AND status = 'queued'
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result.map_err(store_error)?.rows_affected() > 0)
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        output: CompletedExport,
        at: DateTime<Utc>,
    ) -> Result<bool, ExportError> {
        let timer = QueryTimer::new("mark_export_job_completed");
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = 'completed', completed_at = $2, filename = $3, content_type = $4,
                payload = $5
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(&output.filename)
        .bind(&output.content_type)
        .bind(&output.payload)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result.map_err(store_error)?.rows_affected() > 0)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, ExportError> {
        let timer = QueryTimer::new("mark_export_job_failed");
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = 'failed', completed_at = $2, error_message = $3
            WHERE id = $1 AND status IN ('queued', 'running')
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(message)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result.map_err(store_error)?.rows_affected() > 0)
    }

    async fn set_token_expiry(
        &self,
        id: Uuid,
        owner_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<ExportJob, ExportError> {
        let timer = QueryTimer::new("refresh_export_download_token");
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        let entity = sqlx::query_as::<_, ExportJobEntity>(
            r#"
            SELECT id, owner_id, export_type, format, parameters, status, created_at, started_at,
                   completed_at, error_message, filename, content_type, payload, attempt_count,
                   download_token_expires_at, download_token_consumed_at
            FROM export_jobs
            WHERE id = $1 AND owner_id = $2
            FOR UPDATE
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error)?
        .ok_or(ExportError::NotFound)?;

        let mut job = entity_to_domain(entity)?;
        if !job.reissue_token(expires_at) {
            return Err(ExportError::NotReady(format!(
                "export job is {}",
                job.status
            )));
        }

        sqlx::query(
            r#"
            UPDATE export_jobs
            SET download_token_expires_at = $2, download_token_consumed_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(expires_at)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        tx.commit().await.map_err(store_error)?;
        timer.record();
        Ok(job)
    }

    async fn consume_download(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        check: DownloadCheck<'_>,
    ) -> Result<ExportJob, ExportError> {
        let timer = QueryTimer::new("consume_export_download");
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        let entity = sqlx::query_as::<_, ExportJobEntity>(
            r#"
            SELECT id, owner_id, export_type, format, parameters, status, created_at, started_at,
                   completed_at, error_message, filename, content_type, payload, attempt_count,
                   download_token_expires_at, download_token_consumed_at
            FROM export_jobs
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error)?
        .ok_or(ExportError::NotFound)?;

        let mut job = entity_to_domain(entity)?;
        // Dropping the transaction on a failed check releases the row lock
        check(&job)?;

        sqlx::query("UPDATE export_jobs SET download_token_consumed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

        tx.commit().await.map_err(store_error)?;
        timer.record();

        job.download_token_consumed_at = Some(now);
        Ok(job)
    }

    async fn record_performance(&self, row: &ExportJobPerformance) -> Result<(), ExportError> {
        let timer = QueryTimer::new("insert_export_job_performance");
        let result = sqlx::query(
            r#"
            INSERT INTO export_job_performance (job_id, owner_id, wait_ms, dur_ms, size_bytes,
                                                streamed, streamed_chunks, streamed_bytes,
                                                avg_chunk_ms, avg_chunk_bytes, attempt, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(row.job_id)
        .bind(row.owner_id)
        .bind(row.wait_ms)
        .bind(row.dur_ms)
        .bind(row.size_bytes)
        .bind(row.streamed)
        .bind(row.streamed_chunks)
        .bind(row.streamed_bytes)
        .bind(row.avg_chunk_ms)
        .bind(row.avg_chunk_bytes)
        .bind(row.attempt)
        .bind(row.created_at)
        .execute(&self.pool)
        .await;
        timer.record();

        result.map(|_| ()).map_err(store_error)
    }

    async fn list_performance(
        &self,
        owner_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ExportJobPerformance>, ExportError> {
        let timer = QueryTimer::new("list_export_job_performance");
        let entities = sqlx::query_as::<_, ExportJobPerformanceEntity>(
            r#"
            SELECT id, job_id, owner_id, wait_ms, dur_ms, size_bytes, streamed, streamed_chunks,
                   streamed_bytes, avg_chunk_ms, avg_chunk_bytes, attempt, created_at
            FROM export_job_performance
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        Ok(entities
            .map_err(store_error)?
            .into_iter()
            .map(ExportJobPerformance::from)
            .collect())
    }

    async fn purge_jobs_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, ExportError> {
        let timer = QueryTimer::new("purge_export_jobs");
        let result = sqlx::query(
            r#"
            DELETE FROM export_jobs
            WHERE status IN ('completed', 'failed') AND completed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result.map_err(store_error)?.rows_affected())
    }

    async fn purge_performance_before(&self, cutoff: DateTime<Utc>) -> Result<u64, ExportError> {
        let timer = QueryTimer::new("purge_export_job_performance");
        let result = sqlx::query("DELETE FROM export_job_performance WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await;
        timer.record();

        Ok(result.map_err(store_error)?.rows_affected())
    }
}

fn entity_to_domain(entity: ExportJobEntity) -> Result<ExportJob, ExportError> {
    let export_type = entity
        .export_type
        .parse::<ExportType>()
        .map_err(ExportError::Store)?;
    let format = entity
        .format
        .parse::<ExportFormat>()
        .map_err(ExportError::Store)?;
    let status = entity
        .status
        .parse::<ExportStatus>()
        .map_err(ExportError::Store)?;
    let parameters = ExportParameters::parse(export_type, Some(entity.parameters))
        .map_err(|e| ExportError::Store(format!("stored parameters are invalid: {}", e)))?;

    Ok(ExportJob {
        id: entity.id,
        owner_id: entity.owner_id,
        format,
        parameters,
        status,
        created_at: entity.created_at,
        started_at: entity.started_at,
        completed_at: entity.completed_at,
        error_message: entity.error_message,
        filename: entity.filename,
        content_type: entity.content_type,
        payload: entity.payload,
        attempt_count: entity.attempt_count,
        download_token_expires_at: entity.download_token_expires_at,
        download_token_consumed_at: entity.download_token_consumed_at,
    })
}
