//! Typed export parameters, one struct per export type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::Validate;

use super::export_job::ExportType;
use super::journal::{GoalFilter, GoalStatus, TradeDirection, TradeFilter, TradeStatus};
use crate::error::ExportError;

/// Hard cap on rows in a trades export.
pub const MAX_TRADE_EXPORT_ROWS: u32 = 20_000;

/// Default profit target for prop evaluations, in percent of account size.
pub const DEFAULT_PROFIT_TARGET_PCT: f64 = 10.0;

/// Default trailing drawdown limit for prop evaluations, in percent of account size.
pub const DEFAULT_MAX_DRAWDOWN_PCT: f64 = 10.0;

/// Filters for a trades export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TradeExportParams {
    #[validate(range(min = 1, max = 20000, message = "limit must be between 1 and 20000"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,

    #[validate(length(min = 1, max = 64, message = "instrumentId must be 1-64 characters"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TradeStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<TradeDirection>,

    #[validate(length(max = 64, message = "at most 64 columns may be selected"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

impl TradeExportParams {
    pub fn to_filter(&self) -> TradeFilter {
        TradeFilter {
            entered_from: self.from,
            entered_to: self.to,
            instrument_id: self.instrument_id.clone(),
            status: self.status,
            direction: self.direction,
            limit: Some(self.limit.unwrap_or(MAX_TRADE_EXPORT_ROWS)),
            ..Default::default()
        }
    }
}

/// Filters for a goals export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GoalExportParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<GoalStatus>,

    #[validate(length(max = 64, message = "at most 64 columns may be selected"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

impl GoalExportParams {
    pub fn to_filter(&self) -> GoalFilter {
        GoalFilter {
            status: self.status,
        }
    }
}

/// Date-range filters shared by daily P/L and tag performance exports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RangeExportParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,

    #[validate(length(max = 64, message = "at most 64 columns may be selected"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

/// Parameters for the equity curve export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EquityExportParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub starting_balance: Option<f64>,

    #[validate(length(max = 64, message = "at most 64 columns may be selected"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

/// Parameters for a prop-firm evaluation export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PropEvaluationParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,

    #[validate(range(exclusive_min = 0.0, message = "accountSize must be positive"))]
    pub account_size: f64,

    #[validate(range(
        exclusive_min = 0.0,
        max = 100.0,
        message = "profitTargetPct must be in (0, 100]"
    ))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_target_pct: Option<f64>,

    #[validate(range(
        exclusive_min = 0.0,
        max = 100.0,
        message = "maxDrawdownPct must be in (0, 100]"
    ))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_drawdown_pct: Option<f64>,

    #[validate(length(max = 64, message = "at most 64 columns may be selected"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

/// Parameters keyed by export type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "exportType", content = "parameters", rename_all = "camelCase")]
pub enum ExportParameters {
    Trades(TradeExportParams),
    Goals(GoalExportParams),
    DailyPnl(RangeExportParams),
    TagPerformance(RangeExportParams),
    ChartEquity(EquityExportParams),
    PropEvaluation(PropEvaluationParams),
}

impl ExportParameters {
    /// Parse and validate the raw `parameters` object for an export type.
    ///
    /// A missing or `null` object is treated as `{}`.
    pub fn parse(export_type: ExportType, raw: Option<JsonValue>) -> Result<Self, ExportError> {
        let raw = match raw {
            None | Some(JsonValue::Null) => JsonValue::Object(Default::default()),
            Some(value) => value,
        };

        let params = match export_type {
            ExportType::Trades => ExportParameters::Trades(decode(raw)?),
            ExportType::Goals => ExportParameters::Goals(decode(raw)?),
            ExportType::DailyPnl => ExportParameters::DailyPnl(decode(raw)?),
            ExportType::TagPerformance => ExportParameters::TagPerformance(decode(raw)?),
            ExportType::ChartEquity => ExportParameters::ChartEquity(decode(raw)?),
            ExportType::PropEvaluation => ExportParameters::PropEvaluation(decode(raw)?),
        };

        params.validate()?;
        Ok(params)
    }

    pub fn export_type(&self) -> ExportType {
        match self {
            ExportParameters::Trades(_) => ExportType::Trades,
            ExportParameters::Goals(_) => ExportType::Goals,
            ExportParameters::DailyPnl(_) => ExportType::DailyPnl,
            ExportParameters::TagPerformance(_) => ExportType::TagPerformance,
            ExportParameters::ChartEquity(_) => ExportType::ChartEquity,
            ExportParameters::PropEvaluation(_) => ExportType::PropEvaluation,
        }
    }

    /// The inner parameter object, as stored next to the export type.
    pub fn to_json(&self) -> JsonValue {
        let value = match self {
            ExportParameters::Trades(p) => serde_json::to_value(p),
            ExportParameters::Goals(p) => serde_json::to_value(p),
            ExportParameters::DailyPnl(p) | ExportParameters::TagPerformance(p) => {
                serde_json::to_value(p)
            }
            ExportParameters::ChartEquity(p) => serde_json::to_value(p),
            ExportParameters::PropEvaluation(p) => serde_json::to_value(p),
        };
        value.unwrap_or(JsonValue::Null)
    }

    /// Caller-selected columns, if any.
    pub fn columns(&self) -> Option<&[String]> {
        match self {
            ExportParameters::Trades(p) => p.columns.as_deref(),
            ExportParameters::Goals(p) => p.columns.as_deref(),
            ExportParameters::DailyPnl(p) | ExportParameters::TagPerformance(p) => {
                p.columns.as_deref()
            }
            ExportParameters::ChartEquity(p) => p.columns.as_deref(),
            ExportParameters::PropEvaluation(p) => p.columns.as_deref(),
        }
    }

    fn date_range(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        match self {
            ExportParameters::Trades(p) => (p.from, p.to),
            ExportParameters::Goals(_) => (None, None),
            ExportParameters::DailyPnl(p) | ExportParameters::TagPerformance(p) => (p.from, p.to),
            ExportParameters::ChartEquity(p) => (p.from, p.to),
            ExportParameters::PropEvaluation(p) => (p.from, p.to),
        }
    }

    fn validate(&self) -> Result<(), ExportError> {
        match self {
            ExportParameters::Trades(p) => p.validate()?,
            ExportParameters::Goals(p) => p.validate()?,
            ExportParameters::DailyPnl(p) | ExportParameters::TagPerformance(p) => p.validate()?,
            ExportParameters::ChartEquity(p) => p.validate()?,
            ExportParameters::PropEvaluation(p) => p.validate()?,
        }

        if let (Some(from), Some(to)) = self.date_range() {
            if from > to {
                return Err(ExportError::Validation(
                    "'from' must not be after 'to'".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn decode<T: for<'de> Deserialize<'de>>(raw: JsonValue) -> Result<T, ExportError> {
    serde_json::from_value(raw)
        .map_err(|e| ExportError::Validation(format!("Invalid parameters: {}", e)))
}
