pub mod redis;

pub use self::redis::RedisCache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{CopySignal, ExecutionStatus, PerformanceMetrics, RiskMetrics, Trade};

/// Ephemeral signals live for an hour.
pub const SIGNAL_TTL: Duration = Duration::from_secs(3600);
/// Execution status mirrors are kept for a day.
pub const EXECUTION_STATUS_TTL: Duration = Duration::from_secs(24 * 3600);
/// Cached metrics go stale after five minutes.
pub const METRICS_TTL: Duration = Duration::from_secs(300);

/// Broadcast topic for derived-trade events.
pub const TRADE_EVENTS_TOPIC: &str = "trade_events";

/// Subscriber-side buffer; newest events are dropped when it is full so the
/// publisher never blocks.
pub const EVENT_BUFFER: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Key absent or expired; callers fall through to the persistent store.
    #[error("cache miss")]
    Miss,

    /// Connection/IO trouble; reads fall through, writes are best-effort.
    #[error("cache unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}

/// Event published on the `trade_events` topic after a copy completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub trader_id: String,
    pub trade: Trade,
    pub timestamp: DateTime<Utc>,
    pub data: Map<String, Value>,
}

/// Write-through cache with explicit TTLs, advisory distributed locks, and a
/// pub/sub broadcast of derived-trade events.
///
/// Lock keys name the unit being serialized (the caller supplies
/// `rel:<id>:trade:<id>`; implementations add the `lock:` prefix).
#[async_trait]
pub trait FastStore: Send + Sync {
    async fn set_copy_signal(&self, signal: &CopySignal) -> Result<(), CacheError>;
    async fn copy_signals(&self, relationship_id: Uuid) -> Result<Vec<CopySignal>, CacheError>;

    async fn set_execution_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
    ) -> Result<(), CacheError>;
    async fn execution_status(&self, execution_id: Uuid) -> Result<ExecutionStatus, CacheError>;

    async fn set_performance_metrics(
        &self,
        metrics: &PerformanceMetrics,
    ) -> Result<(), CacheError>;
    async fn performance_metrics(
        &self,
        relationship_id: Uuid,
    ) -> Result<PerformanceMetrics, CacheError>;

    async fn set_risk_metrics(&self, metrics: &RiskMetrics) -> Result<(), CacheError>;
    async fn risk_metrics(&self, relationship_id: Uuid) -> Result<RiskMetrics, CacheError>;

    async fn increment_trade_counter(&self, relationship_id: Uuid) -> Result<i64, CacheError>;
    async fn trade_counter(&self, relationship_id: Uuid) -> Result<i64, CacheError>;

    /// Set-if-absent with TTL. `true` means this caller owns the lock.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;
    async fn release_lock(&self, key: &str) -> Result<(), CacheError>;

    async fn publish_trade_event(&self, event: &TradeEvent) -> Result<(), CacheError>;
    async fn subscribe_trade_events(&self) -> Result<mpsc::Receiver<TradeEvent>, CacheError>;
}
