use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::{CopyRelationship, ExecutionStatus, Side, Trade};

// ---------------------------------------------------------------------------
// SignalType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    OpenPosition,
    ClosePosition,
    ModifySize,
    StopLoss,
    TakeProfit,
}

impl SignalType {
    /// Classify a leader trade: a trade attached to an existing position is a
    /// size modification, otherwise buys open and sells close.
    pub fn for_trade(trade: &Trade) -> Self {
        if trade.position_id.is_some() {
            return SignalType::ModifySize;
        }
        match trade.side {
            Side::Buy => SignalType::OpenPosition,
            Side::Sell => SignalType::ClosePosition,
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalType::OpenPosition => "open_position",
            SignalType::ClosePosition => "close_position",
            SignalType::ModifySize => "modify_size",
            SignalType::StopLoss => "stop_loss",
            SignalType::TakeProfit => "take_profit",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// CopySignal
// ---------------------------------------------------------------------------

/// Ephemeral intent to copy one leader trade for one relationship.
///
/// Carries a snapshot of the relationship's sizing rules (immutable after
/// creation) and references the originating trade by id. Sizing strategies
/// read additional context from `parameters`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopySignal {
    pub id: Uuid,
    pub relationship: CopyRelationship,
    pub original_trade_id: Uuid,
    pub signal_type: SignalType,
    pub parameters: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl CopySignal {
    pub fn new(relationship: CopyRelationship, original_trade_id: Uuid, signal_type: SignalType) -> Self {
        Self {
            id: Uuid::new_v4(),
            relationship,
            original_trade_id,
            signal_type,
            parameters: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn set_parameter(&mut self, key: &str, value: Value) {
        self.parameters.insert(key.to_string(), value);
    }

    /// Numeric parameter lookup; absent or non-numeric keys yield `None`.
    pub fn parameter_decimal(&self, key: &str) -> Option<Decimal> {
        self.parameters
            .get(key)?
            .as_f64()
            .and_then(Decimal::from_f64)
    }

    pub fn parameter_u32(&self, key: &str) -> Option<u32> {
        self.parameters.get(key)?.as_u64().map(|v| v as u32)
    }
}

// ---------------------------------------------------------------------------
// CopyExecution
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
#[error("invalid execution transition {from} -> {to}")]
pub struct TransitionError {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}

/// Durable record of a signal's realization into a derived trade.
///
/// Legal transitions: `pending → executing → {completed, failed}`;
/// `cancelled` is terminal and only enterable from `pending`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CopyExecution {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub relationship_id: Uuid,
    pub trade_id: Option<Uuid>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    #[sqlx(json)]
    pub parameters: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CopyExecution {
    pub fn new(signal_id: Uuid, relationship_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            signal_id,
            relationship_id,
            trade_id: None,
            status: ExecutionStatus::Pending,
            error_message: None,
            parameters: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, to: ExecutionStatus) -> Result<(), TransitionError> {
        let legal = matches!(
            (self.status, to),
            (ExecutionStatus::Pending, ExecutionStatus::Executing)
                | (ExecutionStatus::Pending, ExecutionStatus::Cancelled)
                | (ExecutionStatus::Executing, ExecutionStatus::Completed)
                | (ExecutionStatus::Executing, ExecutionStatus::Failed)
        );
        if !legal {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn begin(&mut self) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Executing)
    }

    /// Completion requires the derived trade; the invariant lives in the
    /// signature rather than a runtime check.
    pub fn complete(&mut self, trade_id: Uuid) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Completed)?;
        self.trade_id = Some(trade_id);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
