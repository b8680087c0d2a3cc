//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod export_job;
pub mod journal;

pub use export_job::{ExportJobEntity, ExportJobPerformanceEntity};
pub use journal::{GoalEntity, TradeEntity};
