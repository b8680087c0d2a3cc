//! Repository implementations for database operations.

pub mod export_job;
pub mod journal;

pub use export_job::PgExportJobStore;
pub use journal::PgJournalReader;
