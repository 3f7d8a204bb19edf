use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

use crate::config::ExchangeConfig;
use crate::models::{Position, PositionSide, Side};

use super::{ExchangeAdapter, ExchangeError, OrderFill, OrderRequest};

const MAINNET_BASE: &str = "https://api.hyperliquid.xyz";
const TESTNET_BASE: &str = "https://api.hyperliquid-testnet.xyz";

/// REST adapter against the Hyperliquid perps API.
#[derive(Clone)]
pub struct HyperliquidClient {
    http: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ClearinghouseState {
    #[serde(default, rename = "assetPositions")]
    asset_positions: Vec<AssetPosition>,
}

#[derive(Debug, Deserialize)]
struct AssetPosition {
    position: RawPosition,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    coin: String,
    /// Signed size: positive long, negative short.
    szi: String,
    #[serde(default, rename = "entryPx")]
    entry_px: Option<String>,
    #[serde(default, rename = "positionValue")]
    position_value: Option<String>,
    #[serde(default, rename = "unrealizedPnl")]
    unrealized_pnl: Option<String>,
    #[serde(default)]
    leverage: Option<RawLeverage>,
    #[serde(default, rename = "liquidationPx")]
    liquidation_px: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLeverage {
    value: Decimal,
}

#[derive(Debug, Serialize)]
struct OrderPayload<'a> {
    coin: &'a str,
    is_buy: bool,
    sz: String,
    limit_px: String,
    reduce_only: bool,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    status: String,
    #[serde(default)]
    response: Option<OrderResponseBody>,
}

#[derive(Debug, Deserialize)]
struct OrderResponseBody {
    #[serde(default)]
    data: Option<OrderResponseData>,
}

#[derive(Debug, Deserialize)]
struct OrderResponseData {
    #[serde(default)]
    statuses: Vec<OrderStatus>,
}

#[derive(Debug, Deserialize)]
struct OrderStatus {
    #[serde(default)]
    filled: Option<FillDetail>,
    #[serde(default)]
    resting: Option<RestingDetail>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FillDetail {
    #[serde(rename = "totalSz")]
    total_sz: String,
    #[serde(rename = "avgPx")]
    avg_px: String,
    oid: u64,
}

#[derive(Debug, Deserialize)]
struct RestingDetail {
    oid: u64,
}

fn parse_decimal(raw: &str, what: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(raw)
        .map_err(|e| ExchangeError::Permanent(anyhow::anyhow!("bad {what} {raw:?}: {e}")))
}

impl HyperliquidClient {
    pub fn new(config: &ExchangeConfig) -> Self {
        let base_url = if !config.base_url.is_empty() {
            config.base_url.clone()
        } else if config.testnet {
            TESTNET_BASE.into()
        } else {
            MAINNET_BASE.into()
        };

        Self {
            http: Client::new(),
            base_url,
            api_key: config.api_key.clone(),
        }
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, ExchangeError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("X-API-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(e.into()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ExchangeError::Transient(anyhow::anyhow!(
                "exchange returned {status}"
            )));
        }
        if status.is_client_error() {
            return Err(ExchangeError::Permanent(anyhow::anyhow!(
                "exchange returned {status}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ExchangeAdapter for HyperliquidClient {
    async fn current_positions(&self, user_id: &str) -> Result<Vec<Position>, ExchangeError> {
        let body = json!({ "type": "clearinghouseState", "user": user_id });
        let state: ClearinghouseState = self
            .post("/info", body)
            .await?
            .json()
            .await
            .map_err(|e| ExchangeError::Permanent(e.into()))?;

        let now = Utc::now();
        let mut positions = Vec::with_capacity(state.asset_positions.len());
        for asset in state.asset_positions {
            let raw = asset.position;
            let signed_size = parse_decimal(&raw.szi, "position size")?;
            if signed_size.is_zero() {
                continue;
            }

            let size = signed_size.abs();
            let entry_price = match raw.entry_px.as_deref() {
                Some(px) => parse_decimal(px, "entry price")?,
                None => Decimal::ZERO,
            };
            let current_price = match raw.position_value.as_deref() {
                Some(v) => Some(parse_decimal(v, "position value")? / size),
                None => None,
            };
            let unrealized_pnl = match raw.unrealized_pnl.as_deref() {
                Some(v) => parse_decimal(v, "unrealized pnl")?,
                None => Decimal::ZERO,
            };
            let liquidation_price = match raw.liquidation_px.as_deref() {
                Some(v) => Some(parse_decimal(v, "liquidation price")?),
                None => None,
            };

            positions.push(Position {
                id: Uuid::new_v4(),
                user_id: Some(user_id.to_string()),
                trader_id: None,
                token_symbol: raw.coin,
                side: if signed_size > Decimal::ZERO {
                    PositionSide::Long
                } else {
                    PositionSide::Short
                },
                size,
                entry_price,
                current_price,
                unrealized_pnl,
                leverage: raw.leverage.map(|l| l.value).unwrap_or(Decimal::ONE),
                liquidation_price,
                is_copy_trade: false,
                copy_relationship_id: None,
                created_at: now,
                updated_at: now,
            });
        }

        Ok(positions)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderFill, ExchangeError> {
        let payload = OrderPayload {
            coin: &request.token_symbol,
            is_buy: request.side == Side::Buy,
            sz: request.size.to_string(),
            limit_px: request.price.to_string(),
            reduce_only: false,
        };
        let body = json!({ "action": { "type": "order", "orders": [payload] } });

        let response: OrderResponse = self
            .post("/exchange", body)
            .await?
            .json()
            .await
            .map_err(|e| ExchangeError::Permanent(e.into()))?;

        if response.status != "ok" {
            return Err(ExchangeError::Rejected(response.status));
        }

        let status = response
            .response
            .and_then(|r| r.data)
            .and_then(|d| d.statuses.into_iter().next())
            .ok_or_else(|| {
                ExchangeError::Permanent(anyhow::anyhow!("order response carried no status"))
            })?;

        if let Some(reason) = status.error {
            return Err(ExchangeError::Rejected(reason));
        }

        if let Some(fill) = status.filled {
            return Ok(OrderFill {
                fill_price: parse_decimal(&fill.avg_px, "fill price")?,
                fill_size: parse_decimal(&fill.total_sz, "fill size")?,
                exchange_order_id: Some(fill.oid.to_string()),
            });
        }

        // Resting limit order: report at the requested price, the venue will
        // fill it at or better.
        if let Some(resting) = status.resting {
            return Ok(OrderFill {
                fill_price: request.price,
                fill_size: request.size,
                exchange_order_id: Some(resting.oid.to_string()),
            });
        }

        Err(ExchangeError::Permanent(anyhow::anyhow!(
            "order response had neither fill nor resting status"
        )))
    }
}
