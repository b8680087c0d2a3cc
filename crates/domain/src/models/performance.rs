//! Per-attempt export performance rows and their aggregate summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum rows returned by the performance listing.
pub const MAX_PERFORMANCE_ROWS: i64 = 200;

/// Default rows returned by the performance listing.
pub const DEFAULT_PERFORMANCE_ROWS: i64 = 50;

/// One execution attempt of an export job. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJobPerformance {
    pub job_id: Uuid,
    /// Kept on the row so owner scoping survives job retention.
    #[serde(skip)]
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

/// Aggregate view over a set of performance rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub count: usize,
    pub p50_dur_ms: i64,
    pub p95_dur_ms: i64,
    pub p50_wait_ms: i64,
    pub p95_wait_ms: i64,
    pub avg_size_bytes: f64,
    pub avg_throughput_bytes_per_ms: f64,
}

impl PerformanceSummary {
    pub fn from_rows(rows: &[ExportJobPerformance]) -> Self {
        if rows.is_empty() {
            return Self::default();
        }

        let mut durations: Vec<i64> = rows.iter().map(|r| r.dur_ms).collect();
        let mut waits: Vec<i64> = rows.iter().map(|r| r.wait_ms).collect();
        durations.sort_unstable();
        waits.sort_unstable();

        let count = rows.len();
        let total_size: f64 = rows.iter().map(|r| r.size_bytes as f64).sum();
        let total_throughput: f64 = rows
            .iter()
            .map(|r| r.size_bytes as f64 / r.dur_ms.max(1) as f64)
            .sum();

        Self {
            count,
            p50_dur_ms: percentile(&durations, 50.0),
            p95_dur_ms: percentile(&durations, 95.0),
            p50_wait_ms: percentile(&waits, 50.0),
            p95_wait_ms: percentile(&waits, 95.0),
            avg_size_bytes: total_size / count as f64,
            avg_throughput_bytes_per_ms: total_throughput / count as f64,
        }
    }
}

/// Sorted-array selection at `floor(pct / 100 * len)`, clamped to the last index.
pub fn percentile(sorted: &[i64], pct: f64) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((pct / 100.0) * sorted.len() as f64).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
