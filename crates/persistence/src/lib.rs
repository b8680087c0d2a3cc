//! Persistence layer for the trade journal export service.
//!
//! This crate contains:
//! - Database connection management and migrations
//! - Entity definitions (database row mappings)
//! - Postgres implementations of the job store and journal reader
//! - In-memory implementations of the same seams

pub mod db;
pub mod entities;
pub mod memory;
pub mod metrics;
pub mod repositories;

pub use memory::{InMemoryExportJobStore, MemoryJournalReader};
pub use repositories::{PgExportJobStore, PgJournalReader};
