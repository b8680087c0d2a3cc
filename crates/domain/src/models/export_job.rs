//! Export job domain model and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::export_params::ExportParameters;

// ============================================================================
// Enums
// ============================================================================

/// Kind of data an export renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExportType {
    Trades,
    Goals,
    DailyPnl,
    TagPerformance,
    ChartEquity,
    PropEvaluation,
}

impl ExportType {
    /// Wire and storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportType::Trades => "trades",
            ExportType::Goals => "goals",
            ExportType::DailyPnl => "dailyPnl",
            ExportType::TagPerformance => "tagPerformance",
            ExportType::ChartEquity => "chartEquity",
            ExportType::PropEvaluation => "propEvaluation",
        }
    }

    /// Base used for generated filenames.
    pub fn filename_base(&self) -> &'static str {
        match self {
            ExportType::Trades => "trades",
            ExportType::Goals => "goals",
            ExportType::DailyPnl => "daily_pnl",
            ExportType::TagPerformance => "tag_performance",
            ExportType::ChartEquity => "chart_equity",
            ExportType::PropEvaluation => "prop_evaluation",
        }
    }
}

impl fmt::Display for ExportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trades" => Ok(ExportType::Trades),
            "goals" => Ok(ExportType::Goals),
            "dailypnl" => Ok(ExportType::DailyPnl),
            "tagperformance" => Ok(ExportType::TagPerformance),
            "chartequity" => Ok(ExportType::ChartEquity),
            "propevaluation" => Ok(ExportType::PropEvaluation),
            _ => Err(format!("Unknown export type: {}", s)),
        }
    }
}

/// Output encoding of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
    Xlsx,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "xlsx" => Ok(ExportFormat::Xlsx),
            _ => Err(format!("Unknown export format: {}", s)),
        }
    }
}

/// Export job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStatus::Queued => "queued",
            ExportStatus::Running => "running",
            ExportStatus::Completed => "completed",
            ExportStatus::Failed => "failed",
        }
    }

    /// Queued or running jobs count towards the per-user cap.
    pub fn is_active(&self) -> bool {
        matches!(self, ExportStatus::Queued | ExportStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportStatus::Completed | ExportStatus::Failed)
    }

    /// Check if transition to target status is valid.
    pub fn can_transition_to(&self, target: ExportStatus) -> bool {
        match (self, target) {
            (ExportStatus::Queued, ExportStatus::Running) => true,
            (ExportStatus::Running, ExportStatus::Completed) => true,
            (ExportStatus::Running, ExportStatus::Failed) => true,
            // A worker abort before the job could start
            (ExportStatus::Queued, ExportStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ExportStatus::Queued),
            "running" => Ok(ExportStatus::Running),
            "completed" => Ok(ExportStatus::Completed),
            "failed" => Ok(ExportStatus::Failed),
            _ => Err(format!("Unknown export status: {}", s)),
        }
    }
}

// ============================================================================
// Core Model
// ============================================================================

/// Materialized output of a successful export.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedExport {
    pub filename: String,
    pub content_type: String,
    pub payload: Vec<u8>,
}

/// An export job and its generated artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportJob {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub format: ExportFormat,
    pub parameters: ExportParameters,
    pub status: ExportStatus,
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

impl ExportJob {
    /// A freshly submitted job.
    pub fn queued(
        owner_id: Uuid,
        format: ExportFormat,
        parameters: ExportParameters,
        token_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            format,
            parameters,
            status: ExportStatus::Queued,
            created_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
            filename: None,
            content_type: None,
            payload: None,
            attempt_count: 0,
            download_token_expires_at: Some(token_expires_at),
            download_token_consumed_at: None,
        }
    }

    pub fn export_type(&self) -> ExportType {
        self.parameters.export_type()
    }

    /// Move a queued job to running. Returns false if the transition is not allowed.
    pub fn start(&mut self, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(ExportStatus::Running) {
            return false;
        }
        self.status = ExportStatus::Running;
        self.started_at = Some(at);
        self.attempt_count += 1;
        true
    }

    /// Record the artifact of a running job. Returns false if the job is not running.
    pub fn complete(&mut self, output: CompletedExport, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(ExportStatus::Completed) {
            return false;
        }
        self.status = ExportStatus::Completed;
        self.completed_at = Some(at);
        self.filename = Some(output.filename);
        self.content_type = Some(output.content_type);
        self.payload = Some(output.payload);
        true
    }

    /// Record a failure. Terminal jobs are left untouched.
    pub fn fail(&mut self, message: &str, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(ExportStatus::Failed) {
            return false;
        }
        self.status = ExportStatus::Failed;
        self.completed_at = Some(at);
        self.error_message = Some(message.to_string());
        true
    }

    /// Whether a new download token may be issued for this job.
    pub fn can_issue_token(&self) -> bool {
        self.status == ExportStatus::Completed && self.filename.is_some()
    }

    /// Install a new token expiry and forget any previous consumption.
    pub fn reissue_token(&mut self, expires_at: DateTime<Utc>) -> bool {
        if !self.can_issue_token() {
            return false;
        }
        self.download_token_expires_at = Some(expires_at);
        self.download_token_consumed_at = None;
        true
    }
}

/// Default lifetime of a download token (10 minutes).
pub const DOWNLOAD_TOKEN_TTL_SECS: i64 = 600;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::export_params::GoalExportParams;

    fn job() -> ExportJob {
        let now = Utc::now();
        ExportJob::queued(
            Uuid::new_v4(),
            ExportFormat::Json,
            ExportParameters::Goals(GoalExportParams::default()),
            now + chrono::Duration::seconds(DOWNLOAD_TOKEN_TTL_SECS),
            now,
        )
    }

    fn output() -> CompletedExport {
        CompletedExport {
            filename: "goals_20240301120000.json".to_string(),
            content_type: "application/json".to_string(),
            payload: b"{}".to_vec(),
        }
    }

    #[test]
    fn test_export_type_round_trip() {
        for t in [
            ExportType::Trades,
            ExportType::Goals,
            ExportType::DailyPnl,
            ExportType::TagPerformance,
            ExportType::ChartEquity,
            ExportType::PropEvaluation,
        ] {
            assert_eq!(t.as_str().parse::<ExportType>().unwrap(), t);
        }
        assert!("positions".parse::<ExportType>().is_err());
    }

    #[test]
    fn test_export_format_from_str() {
        assert_eq!(ExportFormat::from_str("CSV").unwrap(), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_str("xlsx").unwrap(), ExportFormat::Xlsx);
        assert!(ExportFormat::from_str("parquet").is_err());
    }

    #[test]
    fn test_status_transitions() {
        use ExportStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Running));
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let mut job = job();
        assert_eq!(job.attempt_count, 0);
        assert!(!job.complete(output(), Utc::now()));

        assert!(job.start(Utc::now()));
        assert_eq!(job.attempt_count, 1);
        assert!(!job.start(Utc::now()));

        assert!(job.complete(output(), Utc::now()));
        assert_eq!(job.status, ExportStatus::Completed);
        assert!(job.payload.is_some());
        assert!(job.error_message.is_none());
    }

    #[test]
    fn test_terminal_job_is_immutable() {
        let mut job = job();
        job.start(Utc::now());
        job.complete(output(), Utc::now());
        let snapshot = job.clone();

        assert!(!job.fail("late failure", Utc::now()));
        assert!(!job.complete(
            CompletedExport {
                filename: "other".into(),
                content_type: "text/csv".into(),
                payload: vec![1, 2, 3],
            },
            Utc::now()
        ));
        assert_eq!(job, snapshot);
    }

    #[test]
    fn test_failed_job_has_error_and_no_payload() {
        let mut job = job();
        job.start(Utc::now());
        assert!(job.fail("BUILD_FAILURE: boom", Utc::now()));
        assert_eq!(job.status, ExportStatus::Failed);
        assert!(job.payload.is_none());
        assert_eq!(job.error_message.as_deref(), Some("BUILD_FAILURE: boom"));
        assert!(!job.can_issue_token());
    }

    #[test]
    fn test_reissue_token_clears_consumption() {
        let mut job = job();
        let expiry = Utc::now() + chrono::Duration::minutes(10);
        assert!(!job.reissue_token(expiry));

        job.start(Utc::now());
        job.complete(output(), Utc::now());
        job.download_token_consumed_at = Some(Utc::now());
        assert!(job.reissue_token(expiry));
        assert_eq!(job.download_token_expires_at, Some(expiry));
        assert!(job.download_token_consumed_at.is_none());
    }
}
