//! Chunked CSV delivery and the payload memory guard.
//!
//! Large CSV exports are produced in fixed-size row chunks and pushed through
//! a bounded channel, so a slow reader holds back the producer instead of the
//! whole document piling up in memory.

use domain::models::{CanonicalTable, ExportFormat};
use domain::ExportError;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use super::export_serializer::{csv_header, csv_line};
use crate::config::ExportsConfig;

/// Chunks buffered between producer and transport.
pub const STREAM_CHANNEL_CAPACITY: usize = 4;

/// Rows sampled when projecting payload size.
pub const ESTIMATE_SAMPLE_ROWS: usize = 200;

const JSON_SIZE_FACTOR: f64 = 1.6;
const XLSX_SIZE_FACTOR: f64 = 1.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingConfig {
    /// Row count above which delivery switches to chunks.
    pub threshold_rows: usize,
    pub chunk_rows: usize,
    /// The producer yields to the runtime after this many rows.
    pub yield_every_rows: usize,
    pub memory_soft_limit_bytes: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            threshold_rows: 10_000,
            chunk_rows: 500,
            yield_every_rows: 1_000,
            memory_soft_limit_bytes: 50 * 1024 * 1024,
        }
    }
}

impl From<&ExportsConfig> for StreamingConfig {
    fn from(config: &ExportsConfig) -> Self {
        Self {
            threshold_rows: config.stream_threshold_rows,
            chunk_rows: config.stream_chunk_rows.max(1),
            yield_every_rows: config.stream_yield_every_rows.max(1),
            memory_soft_limit_bytes: config.memory_soft_limit_bytes,
        }
    }
}

impl StreamingConfig {
    pub fn should_stream(&self, rows: usize, force: bool) -> bool {
        force || rows > self.threshold_rows
    }
}

/// Producer-side numbers for the performance row.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamStats {
    pub rows: u64,
    pub chunks: u64,
    pub bytes: u64,
    pub avg_chunk_ms: f64,
    pub avg_chunk_bytes: f64,
}

/// The receiving side went away before the last chunk.
#[derive(Debug, thiserror::Error)]
#[error("stream receiver closed after {chunks} chunks")]
pub struct StreamClosed {
    pub chunks: u64,
}

/// Trailing line telling the client how many rows were sent.
pub fn stream_marker(rows: u64) -> String {
    format!("# streamed_rows={}\n", rows)
}

/// Serialize `table` as CSV chunks of `chunk_rows` rows into `tx`.
///
/// The header opens the first chunk. With `with_marker` a final
/// [`stream_marker`] line is sent after the data.
pub async fn produce_csv_chunks(
    table: &CanonicalTable,
    config: &StreamingConfig,
    tx: &mpsc::Sender<String>,
    with_marker: bool,
) -> Result<StreamStats, StreamClosed> {
    let chunk_rows = config.chunk_rows.max(1);
    let yield_every = config.yield_every_rows.max(1);

    let mut stats = StreamStats::default();
    let mut total_chunk_ms = 0.0;
    let mut buffer = csv_header(table);
    let mut buffered_rows = 0usize;
    let mut chunk_started = Instant::now();

    for (idx, row) in table.rows.iter().enumerate() {
        buffer.push_str(&csv_line(table, row));
        buffered_rows += 1;
        stats.rows += 1;

        if buffered_rows >= chunk_rows {
            total_chunk_ms += chunk_started.elapsed().as_secs_f64() * 1000.0;
            send_chunk(tx, std::mem::take(&mut buffer), &mut stats).await?;
            buffered_rows = 0;
            chunk_started = Instant::now();
        }

        if (idx + 1) % yield_every == 0 {
            tokio::task::yield_now().await;
        }
    }

    if !buffer.is_empty() {
        total_chunk_ms += chunk_started.elapsed().as_secs_f64() * 1000.0;
        send_chunk(tx, buffer, &mut stats).await?;
    }

    if stats.chunks > 0 {
        stats.avg_chunk_ms = total_chunk_ms / stats.chunks as f64;
        stats.avg_chunk_bytes = stats.bytes as f64 / stats.chunks as f64;
    }

    if with_marker {
        tx.send(stream_marker(stats.rows))
            .await
            .map_err(|_| StreamClosed {
                chunks: stats.chunks,
            })?;
    }

    Ok(stats)
}

async fn send_chunk(
    tx: &mpsc::Sender<String>,
    chunk: String,
    stats: &mut StreamStats,
) -> Result<(), StreamClosed> {
    let len = chunk.len() as u64;
    tx.send(chunk).await.map_err(|_| StreamClosed {
        chunks: stats.chunks,
    })?;
    stats.chunks += 1;
    stats.bytes += len;
    Ok(())
}

/// How a direct CSV export reaches the client.
#[derive(Debug)]
pub enum CsvDelivery {
    Inline(String),
    /// Chunks followed by the row-count marker.
    Chunked(mpsc::Receiver<String>),
}

/// Pick inline or chunked delivery for `table` and start the producer if chunked.
pub fn deliver_csv(table: CanonicalTable, config: StreamingConfig, force: bool) -> CsvDelivery {
    if !config.should_stream(table.len(), force) {
        return CsvDelivery::Inline(super::export_serializer::to_csv(&table));
    }

    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let table = Arc::new(table);
    tokio::spawn(async move {
        match produce_csv_chunks(&table, &config, &tx, true).await {
            Ok(stats) => tracing::debug!(
                rows = stats.rows,
                chunks = stats.chunks,
                bytes = stats.bytes,
                "Streamed CSV export"
            ),
            Err(e) => tracing::debug!("CSV stream stopped early: {}", e),
        }
    });
    CsvDelivery::Chunked(rx)
}

/// Build a queued CSV payload through the chunk producer.
///
/// The stored payload is the concatenated chunks, without the marker line.
pub async fn collect_csv_chunks(
    table: Arc<CanonicalTable>,
    config: StreamingConfig,
) -> Result<(Vec<u8>, StreamStats), ExportError> {
    let (tx, mut rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let producer = tokio::spawn(async move { produce_csv_chunks(&table, &config, &tx, false).await });

    let mut payload = Vec::new();
    while let Some(chunk) = rx.recv().await {
        payload.extend_from_slice(chunk.as_bytes());
    }

    let stats = producer
        .await
        .map_err(|e| ExportError::Build(format!("CSV producer failed: {}", e)))?
        .map_err(|e| ExportError::Build(e.to_string()))?;
    Ok((payload, stats))
}

/// Projected size of the serialized payload, extrapolated from a row sample.
pub fn estimate_payload_bytes(table: &CanonicalTable, format: ExportFormat) -> u64 {
    let header = csv_header(table).len() as f64;
    let rows = table.len();
    let sample = rows.min(ESTIMATE_SAMPLE_ROWS);

    let body = if sample == 0 {
        0.0
    } else {
        let sample_bytes: usize = table.rows[..sample]
            .iter()
            .map(|row| csv_line(table, row).len())
            .sum();
        sample_bytes as f64 / sample as f64 * rows as f64
    };

    let factor = match format {
        ExportFormat::Csv => 1.0,
        ExportFormat::Json => JSON_SIZE_FACTOR,
        ExportFormat::Xlsx => XLSX_SIZE_FACTOR,
    };
    ((header + body) * factor).ceil() as u64
}

/// Fail with [`ExportError::MemoryLimitExceeded`] before materializing an oversized payload.
pub fn check_memory_guard(
    table: &CanonicalTable,
    format: ExportFormat,
    limit: u64,
) -> Result<u64, ExportError> {
    let projected = estimate_payload_bytes(table, format);
    if projected > limit {
        return Err(ExportError::MemoryLimitExceeded { projected, limit });
    }
    Ok(projected)
}
