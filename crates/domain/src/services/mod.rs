//! Domain services for the export service.
//!
//! Pure calculations plus the traits the outer crates implement.

pub mod aggregates;
pub mod job_store;
pub mod journal_reader;
pub mod pnl;

pub use aggregates::{
    daily_pnl, equity_curve, prop_evaluation, tag_performance, DailyPnl, EquityPoint,
    PropEvaluationDay, PropRules, TagPerformance,
};
pub use job_store::{DownloadCheck, ExportJobStore, StoreMode};
pub use journal_reader::JournalReader;
pub use pnl::{realized_pnl, round_money};
