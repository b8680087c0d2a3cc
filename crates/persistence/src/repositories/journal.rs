//! Postgres-backed journal reader.

use async_trait::async_trait;
use domain::models::{Goal, GoalFilter, GoalStatus, Trade, TradeDirection, TradeFilter, TradeStatus};
use domain::services::JournalReader;
use domain::ExportError;
use sqlx::PgPool;
use uuid::Uuid;

use super::export_job::store_error;
use crate::entities::{GoalEntity, TradeEntity};
use crate::metrics::QueryTimer;

/// Reads trades and goals written by the journal services.
#[derive(Clone)]
pub struct PgJournalReader {
    pool: PgPool,
}

impl PgJournalReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JournalReader for PgJournalReader {
    async fn list_trades(
        &self,
        owner_id: Uuid,
        filter: &TradeFilter,
    ) -> Result<Vec<Trade>, ExportError> {
        let timer = QueryTimer::new("list_trades");
        let entities = sqlx::query_as::<_, TradeEntity>(
            r#"
            SELECT tr.id, tr.owner_id, tr.instrument_id, tr.direction, tr.entry_price,
                   tr.exit_price, tr.quantity, tr.contract_multiplier, tr.fees, tr.status,
                   tr.entry_at, tr.exit_at,
                   ARRAY(
                       SELECT tg.name::TEXT
                       FROM trade_tags tt
                       JOIN tags tg ON tg.id = tt.tag_id
                       WHERE tt.trade_id = tr.id
                       ORDER BY tt.position, tg.name
                   ) AS tags
            FROM trades tr
            WHERE tr.owner_id = $1
              AND ($2::timestamptz IS NULL OR tr.entry_at >= $2)
              AND ($3::timestamptz IS NULL OR tr.entry_at <= $3)
              AND ($4::timestamptz IS NULL OR tr.exit_at >= $4)
              AND ($5::timestamptz IS NULL OR tr.exit_at <= $5)
              AND ($6::text IS NULL OR tr.instrument_id = $6)
              AND ($7::text IS NULL OR tr.status = $7)
              AND ($8::text IS NULL OR tr.direction = $8)
            ORDER BY tr.entry_at DESC, tr.id
            LIMIT $9
            "#,
        )
        .bind(owner_id)
        .bind(filter.entered_from)
        .bind(filter.entered_to)
        .bind(filter.closed_from)
        .bind(filter.closed_to)
        .bind(filter.instrument_id.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.direction.map(|d| d.as_str()))
        .bind(filter.limit.map(i64::from))
        .fetch_all(&self.pool)
        .await;
        timer.record();

        entities
            .map_err(store_error)?
            .into_iter()
            .map(trade_to_domain)
            .collect()
    }

    async fn list_goals(
        &self,
        owner_id: Uuid,
        filter: &GoalFilter,
    ) -> Result<Vec<Goal>, ExportError> {
        let timer = QueryTimer::new("list_goals");
        let entities = sqlx::query_as::<_, GoalEntity>(
            r#"
            SELECT id, owner_id, title, period, status, target_amount, current_amount,
                   due_date, created_at
            FROM goals
            WHERE owner_id = $1
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC, id
            "#,
        )
        .bind(owner_id)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await;
        timer.record();

        entities
            .map_err(store_error)?
            .into_iter()
            .map(goal_to_domain)
            .collect()
    }
}

fn trade_to_domain(entity: TradeEntity) -> Result<Trade, ExportError> {
    Ok(Trade {
        id: entity.id,
        owner_id: entity.owner_id,
        instrument_id: entity.instrument_id,
        direction: entity
            .direction
            .parse::<TradeDirection>()
            .map_err(ExportError::Store)?,
        entry_price: entity.entry_price,
        exit_price: entity.exit_price,
        quantity: entity.quantity,
        contract_multiplier: entity.contract_multiplier,
        fees: entity.fees,
        status: entity
            .status
            .parse::<TradeStatus>()
            .map_err(ExportError::Store)?,
        entry_at: entity.entry_at,
        exit_at: entity.exit_at,
        tags: entity.tags,
    })
}

fn goal_to_domain(entity: GoalEntity) -> Result<Goal, ExportError> {
    Ok(Goal {
        id: entity.id,
        owner_id: entity.owner_id,
        title: entity.title,
        period: entity.period,
        status: entity
            .status
            .parse::<GoalStatus>()
            .map_err(ExportError::Store)?,
        target_amount: entity.target_amount,
        current_amount: entity.current_amount,
        due_date: entity.due_date,
        created_at: entity.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_trade_to_domain_parses_enums() {
        let entity = TradeEntity {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            instrument_id: "NQ".to_string(),
            direction: "short".to_string(),
            entry_price: 18000.0,
            exit_price: None,
            quantity: 1.0,
            contract_multiplier: 20.0,
            fees: 4.5,
            status: "open".to_string(),
            entry_at: Utc::now(),
            exit_at: None,
            tags: vec!["news".to_string()],
        };
        let trade = trade_to_domain(entity).unwrap();
        assert_eq!(trade.direction, TradeDirection::Short);
        assert_eq!(trade.status, TradeStatus::Open);
        assert_eq!(trade.tags, vec!["news"]);
    }

    #[test]
    fn test_goal_with_unknown_status_is_rejected() {
        let entity = GoalEntity {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            title: "Q1".to_string(),
            period: "quarterly".to_string(),
            status: "abandoned".to_string(),
            target_amount: 1.0,
            current_amount: 0.0,
            due_date: None,
            created_at: Utc::now(),
        };
        assert!(matches!(goal_to_domain(entity), Err(ExportError::Store(_))));
    }
}
