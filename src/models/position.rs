use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "position_side", rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// Open exposure on a symbol. A position with `size == 0` is logically closed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub trader_id: Option<String>,
    pub token_symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub current_price: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub leverage: Decimal,
    pub liquidation_price: Option<Decimal>,
    pub is_copy_trade: bool,
    pub copy_relationship_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.size > Decimal::ZERO
    }

    /// Mark-to-market value; `None` when no current price is known.
    pub fn market_value(&self) -> Option<Decimal> {
        self.current_price.map(|p| self.size * p)
    }
}
