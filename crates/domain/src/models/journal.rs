//! Journal read model consumed by exports.
//!
//! Trades and goals are owned by the journal services; exports only read them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Long,
    Short,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Long => "long",
            TradeDirection::Short => "short",
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TradeDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "long" => Ok(TradeDirection::Long),
            "short" => Ok(TradeDirection::Short),
            _ => Err(format!("Unknown trade direction: {}", s)),
        }
    }
}

/// Whether a trade has been exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(TradeStatus::Open),
            "closed" => Ok(TradeStatus::Closed),
            _ => Err(format!("Unknown trade status: {}", s)),
        }
    }
}

/// Lifecycle of a trading goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Active,
    Achieved,
    Missed,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::Active => "active",
            GoalStatus::Achieved => "achieved",
            GoalStatus::Missed => "missed",
        }
    }
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GoalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(GoalStatus::Active),
            "achieved" => Ok(GoalStatus::Achieved),
            "missed" => Ok(GoalStatus::Missed),
            _ => Err(format!("Unknown goal status: {}", s)),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// A journaled trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub instrument_id: String,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub quantity: f64,
    pub contract_multiplier: f64,
    pub fees: f64,
    pub status: TradeStatus,
    pub entry_at: DateTime<Utc>,
    pub exit_at: Option<DateTime<Utc>>,
    /// Tag labels, in the order they were attached.
    pub tags: Vec<String>,
}

impl Trade {
    /// UTC calendar date the trade was closed on.
    pub fn exit_date(&self) -> Option<NaiveDate> {
        self.exit_at.map(|at| at.date_naive())
    }
}

/// A trading goal (e.g. monthly P/L target).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub period: String,
    pub status: GoalStatus,
    pub target_amount: f64,
    pub current_amount: f64,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl Goal {
    /// Progress towards the target as a percentage, unrounded.
    pub fn progress_pct(&self) -> Option<f64> {
        if self.target_amount == 0.0 {
            None
        } else {
            Some(self.current_amount / self.target_amount * 100.0)
        }
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Trade query handed to the journal reader.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeFilter {
    pub entered_from: Option<DateTime<Utc>>,
    pub entered_to: Option<DateTime<Utc>>,
    pub closed_from: Option<DateTime<Utc>>,
    pub closed_to: Option<DateTime<Utc>>,
    pub instrument_id: Option<String>,
    pub status: Option<TradeStatus>,
    pub direction: Option<TradeDirection>,
    pub limit: Option<u32>,
}

impl TradeFilter {
    /// Closed trades whose exit falls inside the optional range.
    pub fn closed_between(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self {
            closed_from: from,
            closed_to: to,
            status: Some(TradeStatus::Closed),
            ..Default::default()
        }
    }

    /// Whether a trade satisfies every predicate except `limit`.
    pub fn matches(&self, trade: &Trade) -> bool {
        if let Some(from) = self.entered_from {
            if trade.entry_at < from {
                return false;
            }
        }
        if let Some(to) = self.entered_to {
            if trade.entry_at > to {
                return false;
            }
        }
        if self.closed_from.is_some() || self.closed_to.is_some() {
            let Some(exit_at) = trade.exit_at else {
                return false;
            };
            if self.closed_from.is_some_and(|from| exit_at < from) {
                return false;
            }
            if self.closed_to.is_some_and(|to| exit_at > to) {
                return false;
            }
        }
        if let Some(ref instrument) = self.instrument_id {
            if &trade.instrument_id != instrument {
                return false;
            }
        }
        if self.status.is_some_and(|s| s != trade.status) {
            return false;
        }
        if self.direction.is_some_and(|d| d != trade.direction) {
            return false;
        }
        true
    }
}

/// Goal query handed to the journal reader.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoalFilter {
    pub status: Option<GoalStatus>,
}

impl GoalFilter {
    pub fn matches(&self, goal: &Goal) -> bool {
        self.status.map_or(true, |s| s == goal.status)
    }
}
