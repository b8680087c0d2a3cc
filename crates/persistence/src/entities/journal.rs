//! Journal entities (trades and goals).

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Trade row joined with its tag names.
#[derive(Debug, Clone, FromRow)]
pub struct TradeEntity {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub instrument_id: String,
    pub direction: String,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub quantity: f64,
    pub contract_multiplier: f64,
    pub fees: f64,
    pub status: String,
    pub entry_at: DateTime<Utc>,
    pub exit_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct GoalEntity {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub period: String,
    pub status: String,
    pub target_amount: f64,
    pub current_amount: f64,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}
