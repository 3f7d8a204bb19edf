use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-relationship trading performance, recomputed by the metrics loop and
/// write-through cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PerformanceMetrics {
    pub relationship_id: Uuid,
    pub total_pnl: Decimal,
    pub win_rate: Decimal,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub avg_win_size: Decimal,
    pub avg_loss_size: Decimal,
    pub max_drawdown: Decimal,
    pub sharpe_ratio: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl PerformanceMetrics {
    /// All-zero record for a relationship with no trade history yet.
    pub fn empty(relationship_id: Uuid) -> Self {
        Self {
            relationship_id,
            total_pnl: Decimal::ZERO,
            win_rate: Decimal::ZERO,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            avg_win_size: Decimal::ZERO,
            avg_loss_size: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            sharpe_ratio: Decimal::ZERO,
            last_updated: Utc::now(),
        }
    }
}

/// Per-relationship risk snapshot derived from the follower's open positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RiskMetrics {
    pub relationship_id: Uuid,
    pub current_exposure: Decimal,
    pub max_exposure: Decimal,
    pub value_at_risk: Decimal,
    pub leverage_ratio: Decimal,
    pub concentration_risk: Decimal,
    pub liquidity_risk: Decimal,
    pub last_updated: DateTime<Utc>,
}
