use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Side;

/// A single order fill — either leader-origin or a derived copy.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trade {
    pub id: Uuid,
    /// Account the fill belongs to; the relationship's follower on copies.
    pub user_id: Option<String>,
    /// Leader identifier; always present on ingested leader trades.
    pub trader_id: Option<String>,
    pub position_id: Option<Uuid>,
    pub token_symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub realized_pnl: Decimal,
    pub is_copy_trade: bool,
    pub copy_relationship_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Trade {
    /// Check the invariants of an ingested leader trade.
    pub fn validate_leader(&self) -> Result<(), String> {
        if self.trader_id.as_deref().map_or(true, str::is_empty) {
            return Err("trade has no trader id".into());
        }
        if self.size <= Decimal::ZERO {
            return Err(format!("trade size {} must be positive", self.size));
        }
        if self.price <= Decimal::ZERO {
            return Err(format!("trade price {} must be positive", self.price));
        }
        if self.fee < Decimal::ZERO {
            return Err(format!("trade fee {} must be non-negative", self.fee));
        }
        Ok(())
    }

    pub fn notional(&self) -> Decimal {
        self.size * self.price
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
