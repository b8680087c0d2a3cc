//! Journal aggregates derived from closed trades.
//!
//! All sums stay unrounded; rounding happens when rows are presented.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

use super::pnl::realized_pnl;
use crate::models::Trade;

/// Realized results for one UTC calendar day.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyPnl {
    pub date: NaiveDate,
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub gross_pnl: f64,
    pub fees: f64,
    pub net_pnl: f64,
}

/// Realized results for one tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TagPerformance {
    pub tag: String,
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub net_pnl: f64,
}

impl TagPerformance {
    /// Wins as a percentage of trades.
    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64 * 100.0
        }
    }

    pub fn avg_pnl(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.net_pnl / self.trades as f64
        }
    }
}

/// One point of the equity curve.
#[derive(Debug, Clone, PartialEq)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub net_pnl: f64,
    pub equity: f64,
}

/// One day of a prop-firm evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct PropEvaluationDay {
    pub date: NaiveDate,
    pub net_pnl: f64,
    pub equity: f64,
    pub peak_equity: f64,
    pub drawdown: f64,
    pub drawdown_pct: f64,
    pub target_reached: bool,
    pub drawdown_breached: bool,
}

/// Evaluation rules for [`prop_evaluation`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropRules {
    pub account_size: f64,
    pub profit_target_pct: f64,
    pub max_drawdown_pct: f64,
}

/// Bucket closed trades by exit date, ascending.
pub fn daily_pnl(trades: &[Trade]) -> Vec<DailyPnl> {
    let mut days: BTreeMap<NaiveDate, DailyPnl> = BTreeMap::new();

    for trade in trades {
        let (Some(date), Some(pnl)) = (trade.exit_date(), realized_pnl(trade)) else {
            continue;
        };
        let day = days.entry(date).or_insert(DailyPnl {
            date,
            trades: 0,
            wins: 0,
            losses: 0,
            gross_pnl: 0.0,
            fees: 0.0,
            net_pnl: 0.0,
        });
        day.trades += 1;
        if pnl > 0.0 {
            day.wins += 1;
        } else if pnl < 0.0 {
            day.losses += 1;
        }
        day.gross_pnl += pnl + trade.fees;
        day.fees += trade.fees;
        day.net_pnl += pnl;
    }

    days.into_values().collect()
}

/// Per-tag results over closed trades, best tag first. Untagged trades are skipped.
pub fn tag_performance(trades: &[Trade]) -> Vec<TagPerformance> {
    let mut tags: HashMap<&str, TagPerformance> = HashMap::new();

    for trade in trades {
        let Some(pnl) = realized_pnl(trade) else {
            continue;
        };
        if trade.exit_at.is_none() {
            continue;
        }
        for tag in &trade.tags {
            let entry = tags.entry(tag.as_str()).or_insert_with(|| TagPerformance {
                tag: tag.clone(),
                trades: 0,
                wins: 0,
                losses: 0,
                net_pnl: 0.0,
            });
            entry.trades += 1;
            if pnl > 0.0 {
                entry.wins += 1;
            } else if pnl < 0.0 {
                entry.losses += 1;
            }
            entry.net_pnl += pnl;
        }
    }

    let mut result: Vec<TagPerformance> = tags.into_values().collect();
    result.sort_by(|a, b| {
        b.net_pnl
            .total_cmp(&a.net_pnl)
            .then_with(|| a.tag.cmp(&b.tag))
    });
    result
}

/// Cumulative equity from a starting balance.
pub fn equity_curve(days: &[DailyPnl], starting_balance: f64) -> Vec<EquityPoint> {
    let mut equity = starting_balance;
    days.iter()
        .map(|day| {
            equity += day.net_pnl;
            EquityPoint {
                date: day.date,
                net_pnl: day.net_pnl,
                equity,
            }
        })
        .collect()
}

/// Walk the equity curve against a profit target and a trailing drawdown limit.
pub fn prop_evaluation(days: &[DailyPnl], rules: PropRules) -> Vec<PropEvaluationDay> {
    let target_profit = rules.account_size * rules.profit_target_pct / 100.0;
    let max_drawdown = rules.account_size * rules.max_drawdown_pct / 100.0;

    let mut peak = rules.account_size;
    equity_curve(days, rules.account_size)
        .into_iter()
        .map(|point| {
            peak = peak.max(point.equity);
            let drawdown = peak - point.equity;
            PropEvaluationDay {
                date: point.date,
                net_pnl: point.net_pnl,
                equity: point.equity,
                peak_equity: peak,
                drawdown,
                drawdown_pct: if peak > 0.0 {
                    drawdown / peak * 100.0
                } else {
                    0.0
                },
                target_reached: point.equity - rules.account_size >= target_profit,
                drawdown_breached: drawdown >= max_drawdown,
            }
        })
        .collect()
}
