//! Export endpoint handlers.
//!
//! Everything under `/api/v1/exports`. All routes except the download require
//! a bearer JWT; the download is authorized by its single-use token.

use axum::{
    body::Body,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use domain::models::{
    ExportFormat, ExportJob, ExportJobPerformance, ExportParameters, ExportType,
    PerformanceSummary, DEFAULT_PERFORMANCE_ROWS,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use uuid::Uuid;

use super::DataResponse;
use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;
use crate::services::export_serializer::export_filename;
use crate::services::export_streaming::CsvDelivery;

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitExportRequest {
    pub export_type: String,
    pub format: String,
    #[serde(default)]
    pub parameters: Option<JsonValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitExportResponse {
    pub id: Uuid,
    pub status: String,
    pub download_token: String,
    pub token_expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub id: Uuid,
    pub download_token: String,
    pub token_expires_at: DateTime<Utc>,
}

/// Job detail as polled by the owner. The payload is base64 encoded.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJobResponse {
    pub id: Uuid,
    pub export_type: ExportType,
    pub format: ExportFormat,
    pub status: String,
    pub parameters: JsonValue,
    pub attempt_count: i32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl From<ExportJob> for ExportJobResponse {
    fn from(job: ExportJob) -> Self {
        Self {
            id: job.id,
            export_type: job.export_type(),
            format: job.format,
            status: job.status.to_string(),
            parameters: job.parameters.to_json(),
            attempt_count: job.attempt_count,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error_message,
            filename: job.filename,
            content_type: job.content_type,
            payload: job.payload.map(|bytes| BASE64.encode(bytes)),
            token_expires_at: job.download_token_expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

/// Query string of the direct CSV export. Filters that do not apply to the
/// chosen export type are rejected by parameter validation.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamExportQuery {
    pub export_type: Option<String>,
    pub format: Option<String>,
    pub force_stream: Option<bool>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub instrument_id: Option<String>,
    pub status: Option<String>,
    pub direction: Option<String>,
    pub limit: Option<u32>,
    pub columns: Option<String>,
    pub starting_balance: Option<f64>,
    pub account_size: Option<f64>,
    pub profit_target_pct: Option<f64>,
    pub max_drawdown_pct: Option<f64>,
}

impl StreamExportQuery {
    /// The parameter object accepted by [`ExportParameters::parse`].
    fn parameters(&self) -> JsonValue {
        let mut map = Map::new();
        let mut put = |key: &str, value: Option<JsonValue>| {
            if let Some(v) = value {
                map.insert(key.to_string(), v);
            }
        };

        put("from", self.from.clone().map(JsonValue::from));
        put("to", self.to.clone().map(JsonValue::from));
        put("instrumentId", self.instrument_id.clone().map(JsonValue::from));
        put("status", self.status.clone().map(JsonValue::from));
        put("direction", self.direction.clone().map(JsonValue::from));
        put("limit", self.limit.map(JsonValue::from));
        put("startingBalance", self.starting_balance.map(JsonValue::from));
        put("accountSize", self.account_size.map(JsonValue::from));
        put("profitTargetPct", self.profit_target_pct.map(JsonValue::from));
        put("maxDrawdownPct", self.max_drawdown_pct.map(JsonValue::from));
        put(
            "columns",
            self.columns.as_deref().map(|raw| {
                JsonValue::Array(
                    raw.split(',')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(JsonValue::from)
                        .collect(),
                )
            }),
        );

        JsonValue::Object(map)
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Answers 501 on every export route while exports are switched off.
pub async fn require_exports_enabled(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.exports.enabled {
        return ApiError::NotImplemented("Exports are disabled".into()).into_response();
    }
    next.run(req).await
}

/// Queue an export job.
///
/// POST /api/v1/exports
pub async fn submit_export(
    State(state): State<AppState>,
    auth: UserAuth,
    body: Result<Json<SubmitExportRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DataResponse<SubmitExportResponse>>), ApiError> {
    let Json(request) = body.map_err(|e| ApiError::Validation(e.body_text()))?;

    let export_type: ExportType = request.export_type.parse().map_err(ApiError::Validation)?;
    let format: ExportFormat = request.format.parse().map_err(ApiError::Validation)?;

    let submitted = state
        .exports
        .submit(auth.user_id, export_type, format, request.parameters)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse::new(SubmitExportResponse {
            id: submitted.job.id,
            status: submitted.job.status.to_string(),
            download_token: submitted.download_token,
            token_expires_at: submitted.token_expires_at,
        })),
    ))
}

/// Owner-scoped job status.
///
/// GET /api/v1/exports/:id
pub async fn get_export(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<ExportJobResponse>>, ApiError> {
    let job = state.exports.job(auth.user_id, parse_job_id(&id)?).await?;
    Ok(Json(DataResponse::new(job.into())))
}

/// Single-use download of a completed export.
///
/// GET /api/v1/exports/:id/download?token=
pub async fn download_export(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let job_id = parse_job_id(&id)?;
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Forbidden("Download token is required".into()))?;

    let export = state.exports.download(job_id, &token).await?;

    let mut response = (StatusCode::OK, export.payload).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&export.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(value) = attachment(&export.filename) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// Reissue the download token of a completed job.
///
/// POST /api/v1/exports/:id/token
pub async fn refresh_token(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<TokenResponse>>, ApiError> {
    let issued = state
        .exports
        .refresh_token(auth.user_id, parse_job_id(&id)?)
        .await?;

    Ok(Json(DataResponse::new(TokenResponse {
        id: issued.job_id,
        download_token: issued.download_token,
        token_expires_at: issued.token_expires_at,
    })))
}

/// CSV export that bypasses the queue. Large tables arrive in chunks ending
/// with a `# streamed_rows=<N>` line.
///
/// GET /api/v1/exports/stream
pub async fn stream_export(
    State(state): State<AppState>,
    auth: UserAuth,
    query: Result<Query<StreamExportQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::Validation(e.body_text()))?;

    let format = match query.format.as_deref() {
        None => ExportFormat::Csv,
        Some(raw) => raw.parse().map_err(ApiError::Validation)?,
    };
    if format != ExportFormat::Csv {
        return Err(ApiError::Validation(format!(
            "Direct streaming supports csv only, got {}",
            format
        )));
    }

    let export_type: ExportType = query
        .export_type
        .as_deref()
        .unwrap_or("trades")
        .parse()
        .map_err(ApiError::Validation)?;
    let parameters = ExportParameters::parse(export_type, Some(query.parameters()))?;
    let filename = export_filename(export_type.filename_base(), format, Utc::now());

    let delivery = state
        .exports
        .stream_direct(auth.user_id, &parameters, query.force_stream.unwrap_or(false))
        .await?;

    let (streamed, body) = match delivery {
        CsvDelivery::Inline(csv) => (false, Body::from(csv)),
        CsvDelivery::Chunked(rx) => (
            true,
            Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>)),
        ),
    };

    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/csv; charset=utf-8"),
    );
    if let Ok(value) = attachment(&filename) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers.insert(
        "x-export-streamed",
        HeaderValue::from_static(if streamed { "true" } else { "false" }),
    );
    Ok(response)
}

/// Performance rows of the caller's jobs, newest first.
///
/// GET /api/v1/exports/metrics?limit=
pub async fn list_performance(
    State(state): State<AppState>,
    auth: UserAuth,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<DataResponse<Vec<ExportJobPerformance>>>, ApiError> {
    let limit = limit_from(query)?;
    let rows = state.exports.performance(auth.user_id, limit).await?;
    Ok(Json(DataResponse::new(rows)))
}

/// p50/p95 timings and averages over the same rows.
///
/// GET /api/v1/exports/metrics/summary?limit=
pub async fn performance_summary(
    State(state): State<AppState>,
    auth: UserAuth,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<DataResponse<PerformanceSummary>>, ApiError> {
    let limit = limit_from(query)?;
    let summary = state
        .exports
        .performance_summary(auth.user_id, limit)
        .await?;
    Ok(Json(DataResponse::new(summary)))
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound("Export job not found".into()))
}

fn limit_from(query: Result<Query<LimitQuery>, QueryRejection>) -> Result<i64, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    Ok(query.limit.unwrap_or(DEFAULT_PERFORMANCE_ROWS))
}

fn attachment(filename: &str) -> Result<HeaderValue, header::InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        filename.replace('"', "")
    ))
}
