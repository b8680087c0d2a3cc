//! Domain models for the export service.

pub mod export_job;
pub mod export_params;
pub mod journal;
pub mod performance;
pub mod table;

pub use export_job::{
    CompletedExport, ExportFormat, ExportJob, ExportStatus, ExportType, DOWNLOAD_TOKEN_TTL_SECS,
};
pub use export_params::{
    EquityExportParams, ExportParameters, GoalExportParams, PropEvaluationParams,
    RangeExportParams, TradeExportParams, DEFAULT_MAX_DRAWDOWN_PCT, DEFAULT_PROFIT_TARGET_PCT,
    MAX_TRADE_EXPORT_ROWS,
};
pub use journal::{
    Goal, GoalFilter, GoalStatus, Trade, TradeDirection, TradeFilter, TradeStatus,
};
pub use performance::{
    percentile, ExportJobPerformance, PerformanceSummary, DEFAULT_PERFORMANCE_ROWS,
    MAX_PERFORMANCE_ROWS,
};
pub use table::{resolve_columns, CanonicalTable, TableRow};
