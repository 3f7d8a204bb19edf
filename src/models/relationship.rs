use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription from a follower to a leader trader, with sizing rules.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CopyRelationship {
    pub id: Uuid,
    pub follower_id: String,
    pub trader_id: String,
    /// Share of the leader's trade to copy, 0–100.
    pub allocation_percent: Decimal,
    /// Absolute lower bound on copy size.
    pub min_allocation: Decimal,
    /// Absolute upper bound on copy size; zero means unbounded.
    pub max_allocation: Decimal,
    pub is_active: bool,
    pub auto_rebalance: bool,
    pub stop_loss_percent: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CopyRelationship {
    /// Check the sizing-rule invariants: allocation percent within 0–100 and
    /// min ≤ max when a max is set.
    pub fn validate(&self) -> Result<(), String> {
        if self.allocation_percent < Decimal::ZERO
            || self.allocation_percent > Decimal::ONE_HUNDRED
        {
            return Err(format!(
                "allocation_percent {} outside 0-100",
                self.allocation_percent
            ));
        }
        if self.max_allocation > Decimal::ZERO && self.min_allocation > self.max_allocation {
            return Err(format!(
                "min_allocation {} exceeds max_allocation {}",
                self.min_allocation, self.max_allocation
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
