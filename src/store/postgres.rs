use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    CopyExecution, CopyRelationship, PerformanceMetrics, Position, RiskMetrics, Trade,
};

use super::{CopyStore, StoreError};

/// Postgres-backed [`CopyStore`].
#[derive(Clone)]
pub struct PgCopyStore {
    pool: PgPool,
}

impl PgCopyStore {
    /// Connect, verify connectivity, and run pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Permanent(e.into()))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn relationships_where(
        &self,
        query: &str,
        arg: &str,
    ) -> Result<Vec<CopyRelationship>, StoreError> {
        let rows = sqlx::query_as::<_, CopyRelationship>(query)
            .bind(arg)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl CopyStore for PgCopyStore {
    async fn active_relationships(&self) -> Result<Vec<CopyRelationship>, StoreError> {
        let rows = sqlx::query_as::<_, CopyRelationship>(
            "SELECT * FROM copy_relationships WHERE is_active = true ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn relationship(&self, id: Uuid) -> Result<CopyRelationship, StoreError> {
        sqlx::query_as::<_, CopyRelationship>("SELECT * FROM copy_relationships WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("copy relationship {id}")))
    }

    async fn relationships_by_follower(
        &self,
        follower_id: &str,
    ) -> Result<Vec<CopyRelationship>, StoreError> {
        self.relationships_where(
            "SELECT * FROM copy_relationships
             WHERE follower_id = $1 AND is_active = true
             ORDER BY created_at DESC",
            follower_id,
        )
        .await
    }

    async fn relationships_by_trader(
        &self,
        trader_id: &str,
    ) -> Result<Vec<CopyRelationship>, StoreError> {
        self.relationships_where(
            "SELECT * FROM copy_relationships
             WHERE trader_id = $1 AND is_active = true
             ORDER BY created_at DESC",
            trader_id,
        )
        .await
    }

    async fn create_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trades (id, user_id, trader_id, position_id, token_symbol, side,
                                size, price, fee, realized_pnl, is_copy_trade,
                                copy_relationship_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(trade.id)
        .bind(&trade.user_id)
        .bind(&trade.trader_id)
        .bind(trade.position_id)
        .bind(&trade.token_symbol)
        .bind(trade.side)
        .bind(trade.size)
        .bind(trade.price)
        .bind(trade.fee)
        .bind(trade.realized_pnl)
        .bind(trade.is_copy_trade)
        .bind(trade.copy_relationship_id)
        .bind(trade.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_trades_by_trader(
        &self,
        trader_id: &str,
        limit: i64,
    ) -> Result<Vec<Trade>, StoreError> {
        let rows = sqlx::query_as::<_, Trade>(
            "SELECT * FROM trades WHERE trader_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(trader_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_position(&self, position: &Position) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO positions (id, user_id, trader_id, token_symbol, side, size,
                                   entry_price, current_price, unrealized_pnl, leverage,
                                   liquidation_price, is_copy_trade, copy_relationship_id,
                                   created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(position.id)
        .bind(&position.user_id)
        .bind(&position.trader_id)
        .bind(&position.token_symbol)
        .bind(position.side)
        .bind(position.size)
        .bind(position.entry_price)
        .bind(position.current_price)
        .bind(position.unrealized_pnl)
        .bind(position.leverage)
        .bind(position.liquidation_price)
        .bind(position.is_copy_trade)
        .bind(position.copy_relationship_id)
        .bind(position.created_at)
        .bind(position.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_position(&self, position: &Position) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE positions
            SET size = $2, current_price = $3, unrealized_pnl = $4,
                liquidation_price = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(position.id)
        .bind(position.size)
        .bind(position.current_price)
        .bind(position.unrealized_pnl)
        .bind(position.liquidation_price)
        .bind(position.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn follower_positions(&self, follower_id: &str) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query_as::<_, Position>(
            r#"
            SELECT * FROM positions
            WHERE user_id = $1 AND is_copy_trade = true AND size > 0
            ORDER BY created_at DESC
            "#,
        )
        .bind(follower_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_execution(&self, execution: &CopyExecution) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO copy_executions (id, signal_id, relationship_id, trade_id, status,
                                         error_message, parameters, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(execution.id)
        .bind(execution.signal_id)
        .bind(execution.relationship_id)
        .bind(execution.trade_id)
        .bind(execution.status)
        .bind(&execution.error_message)
        .bind(serde_json::Value::Object(execution.parameters.clone()))
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_execution(&self, execution: &CopyExecution) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE copy_executions
            SET status = $2, trade_id = $3, error_message = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(execution.id)
        .bind(execution.status)
        .bind(execution.trade_id)
        .bind(&execution.error_message)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_execution_with_trade(
        &self,
        execution: &CopyExecution,
        trade: &Trade,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO trades (id, user_id, trader_id, position_id, token_symbol, side,
                                size, price, fee, realized_pnl, is_copy_trade,
                                copy_relationship_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(trade.id)
        .bind(&trade.user_id)
        .bind(&trade.trader_id)
        .bind(trade.position_id)
        .bind(&trade.token_symbol)
        .bind(trade.side)
        .bind(trade.size)
        .bind(trade.price)
        .bind(trade.fee)
        .bind(trade.realized_pnl)
        .bind(trade.is_copy_trade)
        .bind(trade.copy_relationship_id)
        .bind(trade.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE copy_executions
            SET status = $2, trade_id = $3, error_message = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(execution.id)
        .bind(execution.status)
        .bind(execution.trade_id)
        .bind(&execution.error_message)
        .bind(execution.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_performance_metrics(
        &self,
        metrics: &PerformanceMetrics,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO performance_metrics (relationship_id, total_pnl, win_rate, total_trades,
                                             winning_trades, losing_trades, avg_win_size,
                                             avg_loss_size, max_drawdown, sharpe_ratio, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (relationship_id) DO UPDATE SET
                total_pnl = EXCLUDED.total_pnl,
                win_rate = EXCLUDED.win_rate,
                total_trades = EXCLUDED.total_trades,
                winning_trades = EXCLUDED.winning_trades,
                losing_trades = EXCLUDED.losing_trades,
                avg_win_size = EXCLUDED.avg_win_size,
                avg_loss_size = EXCLUDED.avg_loss_size,
                max_drawdown = EXCLUDED.max_drawdown,
                sharpe_ratio = EXCLUDED.sharpe_ratio,
                last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(metrics.relationship_id)
        .bind(metrics.total_pnl)
        .bind(metrics.win_rate)
        .bind(metrics.total_trades)
        .bind(metrics.winning_trades)
        .bind(metrics.losing_trades)
        .bind(metrics.avg_win_size)
        .bind(metrics.avg_loss_size)
        .bind(metrics.max_drawdown)
        .bind(metrics.sharpe_ratio)
        .bind(metrics.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn performance_metrics(
        &self,
        relationship_id: Uuid,
    ) -> Result<PerformanceMetrics, StoreError> {
        sqlx::query_as::<_, PerformanceMetrics>(
            "SELECT * FROM performance_metrics WHERE relationship_id = $1",
        )
        .bind(relationship_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            StoreError::NotFound(format!("performance metrics for relationship {relationship_id}"))
        })
    }

    async fn upsert_risk_metrics(&self, metrics: &RiskMetrics) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO risk_metrics (relationship_id, current_exposure, max_exposure,
                                      value_at_risk, leverage_ratio, concentration_risk,
                                      liquidity_risk, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (relationship_id) DO UPDATE SET
                current_exposure = EXCLUDED.current_exposure,
                max_exposure = EXCLUDED.max_exposure,
                value_at_risk = EXCLUDED.value_at_risk,
                leverage_ratio = EXCLUDED.leverage_ratio,
                concentration_risk = EXCLUDED.concentration_risk,
                liquidity_risk = EXCLUDED.liquidity_risk,
                last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(metrics.relationship_id)
        .bind(metrics.current_exposure)
        .bind(metrics.max_exposure)
        .bind(metrics.value_at_risk)
        .bind(metrics.leverage_ratio)
        .bind(metrics.concentration_risk)
        .bind(metrics.liquidity_risk)
        .bind(metrics.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn risk_metrics(&self, relationship_id: Uuid) -> Result<RiskMetrics, StoreError> {
        sqlx::query_as::<_, RiskMetrics>(
            "SELECT * FROM risk_metrics WHERE relationship_id = $1",
        )
        .bind(relationship_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            StoreError::NotFound(format!("risk metrics for relationship {relationship_id}"))
        })
    }
}
