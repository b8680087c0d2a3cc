//! Export building, rendering, delivery and job orchestration.

pub mod download_token;
pub mod export_builder;
pub mod export_jobs;
pub mod export_serializer;
pub mod export_streaming;

pub use download_token::DownloadTokenManager;
pub use export_builder::ExportBuilder;
pub use export_jobs::{DownloadedExport, ExportRunner, ExportService, IssuedToken, SubmittedExport};
pub use export_streaming::{CsvDelivery, StreamingConfig};
