//! Read access to journal records.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ExportError;
use crate::models::{Goal, GoalFilter, Trade, TradeFilter};

/// Owner-scoped queries over trades and goals.
///
/// Trades come back newest entry first, goals newest first.
#[async_trait]
pub trait JournalReader: Send + Sync {
    async fn list_trades(
        &self,
        owner_id: Uuid,
        filter: &TradeFilter,
    ) -> Result<Vec<Trade>, ExportError>;

    async fn list_goals(&self, owner_id: Uuid, filter: &GoalFilter)
        -> Result<Vec<Goal>, ExportError>;
}
