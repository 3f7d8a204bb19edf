pub mod hyperliquid;

pub use hyperliquid::HyperliquidClient;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{Position, Side};

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// Network/5xx trouble; safe to retry.
    #[error("transient exchange failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// 4xx or malformed request; retrying cannot help.
    #[error("permanent exchange failure: {0}")]
    Permanent(#[source] anyhow::Error),

    #[error("order rejected: {0}")]
    Rejected(String),
}

/// Order to place on the venue, in the symbol's contract units.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub user_id: String,
    pub token_symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
}

/// Confirmed fill returned by the venue.
#[derive(Debug, Clone)]
pub struct OrderFill {
    pub fill_price: Decimal,
    pub fill_size: Decimal,
    /// Venue order id; `None` for simulated fills.
    pub exchange_order_id: Option<String>,
}

/// Opaque order-placement capability consumed by the pipeline.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn current_positions(&self, user_id: &str) -> Result<Vec<Position>, ExchangeError>;
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderFill, ExchangeError>;
}

/// Simulated venue: fills every order at the requested price. Used in dry-run
/// mode and in tests.
pub struct PaperExchange;

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    async fn current_positions(&self, _user_id: &str) -> Result<Vec<Position>, ExchangeError> {
        Ok(Vec::new())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderFill, ExchangeError> {
        tracing::debug!(
            user = %request.user_id,
            symbol = %request.token_symbol,
            side = %request.side,
            size = %request.size,
            price = %request.price,
            "Paper fill"
        );
        Ok(OrderFill {
            fill_price: request.price,
            fill_size: request.size,
            exchange_order_id: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
