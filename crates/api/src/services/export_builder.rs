//! Canonical table builder.
//!
//! Reads the caller's journal records and projects them onto the fixed
//! column set of each export type.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use domain::models::{
    CanonicalTable, ExportParameters, Goal, TableRow, Trade, TradeFilter,
    DEFAULT_MAX_DRAWDOWN_PCT, DEFAULT_PROFIT_TARGET_PCT,
};
use domain::services::{
    daily_pnl, equity_curve, prop_evaluation, realized_pnl, round_money, tag_performance,
    DailyPnl, JournalReader, PropRules,
};
use domain::ExportError;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub const TRADE_COLUMNS: &[&str] = &[
    "id",
    "instrumentId",
    "direction",
    "entryPrice",
    "exitPrice",
    "quantity",
    "status",
    "entryAt",
    "exitAt",
    "realizedPnl",
    "tags",
];

pub const GOAL_COLUMNS: &[&str] = &[
    "id",
    "title",
    "period",
    "status",
    "targetAmount",
    "currentAmount",
    "progressPct",
    "dueDate",
    "createdAt",
];

pub const DAILY_PNL_COLUMNS: &[&str] =
    &["date", "trades", "wins", "losses", "grossPnl", "fees", "netPnl"];

pub const TAG_PERFORMANCE_COLUMNS: &[&str] =
    &["tag", "trades", "wins", "losses", "winRate", "netPnl", "avgPnl"];

pub const CHART_EQUITY_COLUMNS: &[&str] = &["date", "netPnl", "equity"];

pub const PROP_EVALUATION_COLUMNS: &[&str] = &[
    "date",
    "netPnl",
    "equity",
    "peakEquity",
    "drawdown",
    "drawdownPct",
    "targetReached",
    "drawdownBreached",
];

/// Separator for the trade tag list inside a single cell.
pub const TAG_SEPARATOR: &str = "|";

/// Turns export parameters into a [`CanonicalTable`] for one owner.
#[derive(Clone)]
pub struct ExportBuilder {
    reader: Arc<dyn JournalReader>,
}

impl ExportBuilder {
    pub fn new(reader: Arc<dyn JournalReader>) -> Self {
        Self { reader }
    }

    /// Build the table for `params`, scoped to `owner_id`.
    ///
    /// Reader failures surface as [`ExportError::Build`].
    pub async fn build_table(
        &self,
        owner_id: Uuid,
        params: &ExportParameters,
    ) -> Result<CanonicalTable, ExportError> {
        let export_type = params.export_type();
        let selected = params.columns();
        let base = export_type.filename_base();

        let table = match params {
            ExportParameters::Trades(p) => {
                let trades = self.trades(owner_id, &p.to_filter()).await?;
                let mut table = CanonicalTable::new(TRADE_COLUMNS, selected, base);
                for trade in &trades {
                    table.push_row(trade_row(trade));
                }
                table
            }
            ExportParameters::Goals(p) => {
                let goals = self
                    .reader
                    .list_goals(owner_id, &p.to_filter())
                    .await
                    .map_err(build_failure)?;
                let mut table = CanonicalTable::new(GOAL_COLUMNS, selected, base);
                for goal in &goals {
                    table.push_row(goal_row(goal));
                }
                table
            }
            ExportParameters::DailyPnl(p) => {
                let days = self.closed_days(owner_id, p.from, p.to).await?;
                let mut table = CanonicalTable::new(DAILY_PNL_COLUMNS, selected, base);
                for day in &days {
                    table.push_row(daily_row(day));
                }
                table
            }
            ExportParameters::TagPerformance(p) => {
                let trades = self
                    .trades(owner_id, &TradeFilter::closed_between(p.from, p.to))
                    .await?;
                let mut table = CanonicalTable::new(TAG_PERFORMANCE_COLUMNS, selected, base);
                for tag in tag_performance(&trades) {
                    table.push_row(row([
                        ("tag", json!(tag.tag)),
                        ("trades", json!(tag.trades)),
                        ("wins", json!(tag.wins)),
                        ("losses", json!(tag.losses)),
                        ("winRate", json!(round_money(tag.win_rate()))),
                        ("netPnl", json!(round_money(tag.net_pnl))),
                        ("avgPnl", json!(round_money(tag.avg_pnl()))),
                    ]));
                }
                table
            }
            ExportParameters::ChartEquity(p) => {
                let days = self.closed_days(owner_id, p.from, p.to).await?;
                let mut table = CanonicalTable::new(CHART_EQUITY_COLUMNS, selected, base);
                for point in equity_curve(&days, p.starting_balance.unwrap_or(0.0)) {
                    table.push_row(row([
                        ("date", date_value(point.date)),
                        ("netPnl", json!(round_money(point.net_pnl))),
                        ("equity", json!(round_money(point.equity))),
                    ]));
                }
                table
            }
            ExportParameters::PropEvaluation(p) => {
                let days = self.closed_days(owner_id, p.from, p.to).await?;
                let rules = PropRules {
                    account_size: p.account_size,
                    profit_target_pct: p.profit_target_pct.unwrap_or(DEFAULT_PROFIT_TARGET_PCT),
                    max_drawdown_pct: p.max_drawdown_pct.unwrap_or(DEFAULT_MAX_DRAWDOWN_PCT),
                };
                let mut table = CanonicalTable::new(PROP_EVALUATION_COLUMNS, selected, base);
                for day in prop_evaluation(&days, rules) {
                    table.push_row(row([
                        ("date", date_value(day.date)),
                        ("netPnl", json!(round_money(day.net_pnl))),
                        ("equity", json!(round_money(day.equity))),
                        ("peakEquity", json!(round_money(day.peak_equity))),
                        ("drawdown", json!(round_money(day.drawdown))),
                        ("drawdownPct", json!(round_money(day.drawdown_pct))),
                        ("targetReached", json!(day.target_reached)),
                        ("drawdownBreached", json!(day.drawdown_breached)),
                    ]));
                }
                table
            }
        };

        tracing::debug!(
            owner_id = %owner_id,
            export_type = %export_type,
            rows = table.len(),
            columns = table.columns.len(),
            "Built export table"
        );
        Ok(table)
    }

    async fn trades(&self, owner_id: Uuid, filter: &TradeFilter) -> Result<Vec<Trade>, ExportError> {
        self.reader
            .list_trades(owner_id, filter)
            .await
            .map_err(build_failure)
    }

    async fn closed_days(
        &self,
        owner_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<DailyPnl>, ExportError> {
        let trades = self
            .trades(owner_id, &TradeFilter::closed_between(from, to))
            .await?;
        Ok(daily_pnl(&trades))
    }
}

fn build_failure(err: ExportError) -> ExportError {
    match err {
        ExportError::Build(_) => err,
        other => ExportError::Build(other.to_string()),
    }
}

fn row<const N: usize>(cells: [(&str, Value); N]) -> TableRow {
    cells
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

fn timestamp_value(at: Option<DateTime<Utc>>) -> Value {
    at.map_or(Value::Null, |at| {
        Value::String(at.to_rfc3339_opts(SecondsFormat::Secs, true))
    })
}

fn date_value(date: NaiveDate) -> Value {
    Value::String(date.format("%Y-%m-%d").to_string())
}

fn trade_row(trade: &Trade) -> TableRow {
    row([
        ("id", json!(trade.id.to_string())),
        ("instrumentId", json!(trade.instrument_id)),
        ("direction", json!(trade.direction.as_str())),
        ("entryPrice", json!(trade.entry_price)),
        ("exitPrice", json!(trade.exit_price)),
        ("quantity", json!(trade.quantity)),
        ("status", json!(trade.status.as_str())),
        ("entryAt", timestamp_value(Some(trade.entry_at))),
        ("exitAt", timestamp_value(trade.exit_at)),
        ("realizedPnl", json!(realized_pnl(trade).map(round_money))),
        ("tags", json!(trade.tags.join(TAG_SEPARATOR))),
    ])
}

fn goal_row(goal: &Goal) -> TableRow {
    row([
        ("id", json!(goal.id.to_string())),
        ("title", json!(goal.title)),
        ("period", json!(goal.period)),
        ("status", json!(goal.status.as_str())),
        ("targetAmount", json!(goal.target_amount)),
        ("currentAmount", json!(goal.current_amount)),
        ("progressPct", json!(goal.progress_pct().map(round_money))),
        ("dueDate", goal.due_date.map_or(Value::Null, date_value)),
        ("createdAt", timestamp_value(Some(goal.created_at))),
    ])
}

fn daily_row(day: &DailyPnl) -> TableRow {
    row([
        ("date", date_value(day.date)),
        ("trades", json!(day.trades)),
        ("wins", json!(day.wins)),
        ("losses", json!(day.losses)),
        ("grossPnl", json!(round_money(day.gross_pnl))),
        ("fees", json!(round_money(day.fees))),
        ("netPnl", json!(round_money(day.net_pnl))),
    ])
}
