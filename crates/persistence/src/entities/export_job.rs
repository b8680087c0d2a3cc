//! Export job entities.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row for `export_jobs`.
#[derive(Debug, Clone, FromRow)]
pub struct ExportJobEntity {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub export_type: String,
    pub format: String,
    pub parameters: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub attempt_count: i32,
    pub download_token_expires_at: Option<DateTime<Utc>>,
    pub download_token_consumed_at: Option<DateTime<Utc>>,
}

/// Database row for `export_job_performance`.
#[derive(Debug, Clone, FromRow)]
pub struct ExportJobPerformanceEntity {
    pub id: i64,
    pub job_id: Uuid,
    pub owner_id: Uuid,
    pub wait_ms: i64,
    pub dur_ms: i64,
    pub size_bytes: i64,
    pub streamed: bool,
    pub streamed_chunks: i64,
    pub streamed_bytes: i64,
    pub avg_chunk_ms: f64,
    pub avg_chunk_bytes: f64,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
}

impl From<ExportJobPerformanceEntity> for domain::models::ExportJobPerformance {
    fn from(entity: ExportJobPerformanceEntity) -> Self {
        Self {
            job_id: entity.job_id,
            owner_id: entity.owner_id,
            wait_ms: entity.wait_ms,
            dur_ms: entity.dur_ms,
            size_bytes: entity.size_bytes,
            streamed: entity.streamed,
            streamed_chunks: entity.streamed_chunks,
            streamed_bytes: entity.streamed_bytes,
            avg_chunk_ms: entity.avg_chunk_ms,
            avg_chunk_bytes: entity.avg_chunk_bytes,
            attempt: entity.attempt,
            created_at: entity.created_at,
        }
    }
}
