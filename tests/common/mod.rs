//! Hermetic fakes and builders shared by the integration suites.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use hypercopy::cache::{CacheError, FastStore, TradeEvent, EVENT_BUFFER};
use hypercopy::config::EngineConfig;
use hypercopy::exchange::{ExchangeAdapter, ExchangeError, OrderFill, OrderRequest};
use hypercopy::models::{
    CopyExecution, CopyRelationship, CopySignal, ExecutionStatus, PerformanceMetrics, Position,
    PositionSide, RiskMetrics, Side, Trade,
};
use hypercopy::store::{CopyStore, StoreError};
use hypercopy::CopyEngine;

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryStoreState {
    relationships: Vec<CopyRelationship>,
    trades: Vec<Trade>,
    positions: Vec<Position>,
    executions: Vec<CopyExecution>,
    performance: HashMap<Uuid, PerformanceMetrics>,
    risk: HashMap<Uuid, RiskMetrics>,
    /// Next N subscriber fetches fail with a transient error.
    transient_failures: u32,
    /// When set, subscriber fetches block on this gate first.
    fetch_gate: Option<Arc<Semaphore>>,
}

/// In-memory [`CopyStore`] with fault-injection hooks.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreState>,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_relationship(&self, relationship: CopyRelationship) {
        self.inner.lock().unwrap().relationships.push(relationship);
    }

    pub fn add_trade(&self, trade: Trade) {
        self.inner.lock().unwrap().trades.push(trade);
    }

    pub fn add_position(&self, position: Position) {
        self.inner.lock().unwrap().positions.push(position);
    }

    pub fn inject_transient_failures(&self, count: u32) {
        self.inner.lock().unwrap().transient_failures = count;
    }

    pub fn set_fetch_gate(&self, gate: Arc<Semaphore>) {
        self.inner.lock().unwrap().fetch_gate = Some(gate);
    }

    pub fn executions(&self) -> Vec<CopyExecution> {
        self.inner.lock().unwrap().executions.clone()
    }

    pub fn copy_trades(&self) -> Vec<Trade> {
        self.inner
            .lock()
            .unwrap()
            .trades
            .iter()
            .filter(|t| t.is_copy_trade)
            .cloned()
            .collect()
    }

    pub fn performance_of(&self, relationship_id: Uuid) -> Option<PerformanceMetrics> {
        self.inner
            .lock()
            .unwrap()
            .performance
            .get(&relationship_id)
            .cloned()
    }

    pub fn risk_of(&self, relationship_id: Uuid) -> Option<RiskMetrics> {
        self.inner.lock().unwrap().risk.get(&relationship_id).cloned()
    }
}

#[async_trait]
impl CopyStore for MemoryStore {
    async fn active_relationships(&self) -> Result<Vec<CopyRelationship>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .relationships
            .iter()
            .filter(|r| r.is_active)
            .cloned()
            .collect())
    }

    async fn relationship(&self, id: Uuid) -> Result<CopyRelationship, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .relationships
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("copy relationship {id}")))
    }

    async fn relationships_by_follower(
        &self,
        follower_id: &str,
    ) -> Result<Vec<CopyRelationship>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .relationships
            .iter()
            .filter(|r| r.follower_id == follower_id && r.is_active)
            .cloned()
            .collect())
    }

    async fn relationships_by_trader(
        &self,
        trader_id: &str,
    ) -> Result<Vec<CopyRelationship>, StoreError> {
        let gate = self.inner.lock().unwrap().fetch_gate.clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }

        let mut state = self.inner.lock().unwrap();
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(StoreError::Transient(anyhow::anyhow!(
                "injected connection failure"
            )));
        }

        Ok(state
            .relationships
            .iter()
            .filter(|r| r.trader_id == trader_id && r.is_active)
            .cloned()
            .collect())
    }

    async fn create_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        self.inner.lock().unwrap().trades.push(trade.clone());
        Ok(())
    }

    async fn recent_trades_by_trader(
        &self,
        trader_id: &str,
        limit: i64,
    ) -> Result<Vec<Trade>, StoreError> {
        let mut trades: Vec<Trade> = self
            .inner
            .lock()
            .unwrap()
            .trades
            .iter()
            .filter(|t| t.trader_id.as_deref() == Some(trader_id))
            .cloned()
            .collect();
        trades.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        trades.truncate(limit as usize);
        Ok(trades)
    }

    async fn create_position(&self, position: &Position) -> Result<(), StoreError> {
        self.inner.lock().unwrap().positions.push(position.clone());
        Ok(())
    }

    async fn update_position(&self, position: &Position) -> Result<(), StoreError> {
        let mut state = self.inner.lock().unwrap();
        match state.positions.iter_mut().find(|p| p.id == position.id) {
            Some(existing) => {
                *existing = position.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("position {}", position.id))),
        }
    }

    async fn follower_positions(&self, follower_id: &str) -> Result<Vec<Position>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .positions
            .iter()
            .filter(|p| {
                p.user_id.as_deref() == Some(follower_id) && p.is_copy_trade && p.is_open()
            })
            .cloned()
            .collect())
    }

    async fn create_execution(&self, execution: &CopyExecution) -> Result<(), StoreError> {
        self.inner.lock().unwrap().executions.push(execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &CopyExecution) -> Result<(), StoreError> {
        let mut state = self.inner.lock().unwrap();
        match state.executions.iter_mut().find(|e| e.id == execution.id) {
            Some(existing) => {
                *existing = execution.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("execution {}", execution.id))),
        }
    }

    async fn complete_execution_with_trade(
        &self,
        execution: &CopyExecution,
        trade: &Trade,
    ) -> Result<(), StoreError> {
        let mut state = self.inner.lock().unwrap();
        state.trades.push(trade.clone());
        match state.executions.iter_mut().find(|e| e.id == execution.id) {
            Some(existing) => {
                *existing = execution.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("execution {}", execution.id))),
        }
    }

    async fn upsert_performance_metrics(
        &self,
        metrics: &PerformanceMetrics,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .performance
            .insert(metrics.relationship_id, metrics.clone());
        Ok(())
    }

    async fn performance_metrics(
        &self,
        relationship_id: Uuid,
    ) -> Result<PerformanceMetrics, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .performance
            .get(&relationship_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!("performance metrics for {relationship_id}"))
            })
    }

    async fn upsert_risk_metrics(&self, metrics: &RiskMetrics) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .risk
            .insert(metrics.relationship_id, metrics.clone());
        Ok(())
    }

    async fn risk_metrics(&self, relationship_id: Uuid) -> Result<RiskMetrics, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .risk
            .get(&relationship_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("risk metrics for {relationship_id}")))
    }
}

// ---------------------------------------------------------------------------
// MemoryCache
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryCacheState {
    signals: HashMap<Uuid, Vec<CopySignal>>,
    execution_status: HashMap<Uuid, ExecutionStatus>,
    performance: HashMap<Uuid, PerformanceMetrics>,
    risk: HashMap<Uuid, RiskMetrics>,
    counters: HashMap<Uuid, i64>,
    locks: HashSet<String>,
    subscribers: Vec<mpsc::Sender<TradeEvent>>,
    published: Vec<TradeEvent>,
}

/// In-memory [`FastStore`]; TTLs are not modeled.
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<MemoryCacheState>,
}

#[allow(dead_code)]
impl MemoryCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn signals_for(&self, relationship_id: Uuid) -> Vec<CopySignal> {
        self.inner
            .lock()
            .unwrap()
            .signals
            .get(&relationship_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn lock_is_held(&self, key: &str) -> bool {
        self.inner.lock().unwrap().locks.contains(key)
    }

    pub fn published_events(&self) -> Vec<TradeEvent> {
        self.inner.lock().unwrap().published.clone()
    }

    /// Drop every cached metric, forcing getters back to the store.
    pub fn clear_metrics(&self) {
        let mut state = self.inner.lock().unwrap();
        state.performance.clear();
        state.risk.clear();
    }

    pub fn cached_performance(&self, relationship_id: Uuid) -> Option<PerformanceMetrics> {
        self.inner
            .lock()
            .unwrap()
            .performance
            .get(&relationship_id)
            .cloned()
    }
}

#[async_trait]
impl FastStore for MemoryCache {
    async fn set_copy_signal(&self, signal: &CopySignal) -> Result<(), CacheError> {
        self.inner
            .lock()
            .unwrap()
            .signals
            .entry(signal.relationship.id)
            .or_default()
            .push(signal.clone());
        Ok(())
    }

    async fn copy_signals(&self, relationship_id: Uuid) -> Result<Vec<CopySignal>, CacheError> {
        Ok(self.signals_for(relationship_id))
    }

    async fn set_execution_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
    ) -> Result<(), CacheError> {
        self.inner
            .lock()
            .unwrap()
            .execution_status
            .insert(execution_id, status);
        Ok(())
    }

    async fn execution_status(&self, execution_id: Uuid) -> Result<ExecutionStatus, CacheError> {
        self.inner
            .lock()
            .unwrap()
            .execution_status
            .get(&execution_id)
            .copied()
            .ok_or(CacheError::Miss)
    }

    async fn set_performance_metrics(
        &self,
        metrics: &PerformanceMetrics,
    ) -> Result<(), CacheError> {
        self.inner
            .lock()
            .unwrap()
            .performance
            .insert(metrics.relationship_id, metrics.clone());
        Ok(())
    }

    async fn performance_metrics(
        &self,
        relationship_id: Uuid,
    ) -> Result<PerformanceMetrics, CacheError> {
        self.inner
            .lock()
            .unwrap()
            .performance
            .get(&relationship_id)
            .cloned()
            .ok_or(CacheError::Miss)
    }

    async fn set_risk_metrics(&self, metrics: &RiskMetrics) -> Result<(), CacheError> {
        self.inner
            .lock()
            .unwrap()
            .risk
            .insert(metrics.relationship_id, metrics.clone());
        Ok(())
    }

    async fn risk_metrics(&self, relationship_id: Uuid) -> Result<RiskMetrics, CacheError> {
        self.inner
            .lock()
            .unwrap()
            .risk
            .get(&relationship_id)
            .cloned()
            .ok_or(CacheError::Miss)
    }

    async fn increment_trade_counter(&self, relationship_id: Uuid) -> Result<i64, CacheError> {
        let mut state = self.inner.lock().unwrap();
        let counter = state.counters.entry(relationship_id).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn trade_counter(&self, relationship_id: Uuid) -> Result<i64, CacheError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .counters
            .get(&relationship_id)
            .copied()
            .unwrap_or(0))
    }

    async fn acquire_lock(&self, key: &str, _ttl: Duration) -> Result<bool, CacheError> {
        Ok(self.inner.lock().unwrap().locks.insert(key.to_string()))
    }

    async fn release_lock(&self, key: &str) -> Result<(), CacheError> {
        self.inner.lock().unwrap().locks.remove(key);
        Ok(())
    }

    async fn publish_trade_event(&self, event: &TradeEvent) -> Result<(), CacheError> {
        let mut state = self.inner.lock().unwrap();
        state.published.push(event.clone());
        state.subscribers.retain(|tx| !tx.is_closed());
        for tx in &state.subscribers {
            // Full buffers drop the event, never block the publisher.
            let _ = tx.try_send(event.clone());
        }
        Ok(())
    }

    async fn subscribe_trade_events(&self) -> Result<mpsc::Receiver<TradeEvent>, CacheError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.inner.lock().unwrap().subscribers.push(tx);
        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// GatedExchange
// ---------------------------------------------------------------------------

/// Exchange fake whose fills block on a semaphore until the test releases it.
pub struct GatedExchange {
    pub gate: Arc<Semaphore>,
}

#[allow(dead_code)]
impl GatedExchange {
    pub fn new() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Arc::new(Self {
                gate: Arc::clone(&gate),
            }),
            gate,
        )
    }
}

#[async_trait]
impl ExchangeAdapter for GatedExchange {
    async fn current_positions(&self, _user_id: &str) -> Result<Vec<Position>, ExchangeError> {
        Ok(Vec::new())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderFill, ExchangeError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ExchangeError::Transient(e.into()))?;
        Ok(OrderFill {
            fill_price: request.price,
            fill_size: request.size,
            exchange_order_id: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

#[allow(dead_code)]
pub fn relationship(trader_id: &str, follower_id: &str, percent: i64) -> CopyRelationship {
    relationship_with_bounds(trader_id, follower_id, percent, Decimal::ZERO, Decimal::ZERO)
}

#[allow(dead_code)]
pub fn relationship_with_bounds(
    trader_id: &str,
    follower_id: &str,
    percent: i64,
    min_allocation: Decimal,
    max_allocation: Decimal,
) -> CopyRelationship {
    CopyRelationship {
        id: Uuid::new_v4(),
        follower_id: follower_id.into(),
        trader_id: trader_id.into(),
        allocation_percent: Decimal::from(percent),
        min_allocation,
        max_allocation,
        is_active: true,
        auto_rebalance: false,
        stop_loss_percent: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[allow(dead_code)]
pub fn leader_trade(trader_id: &str, size: Decimal, fee: Decimal, side: Side) -> Trade {
    Trade {
        id: Uuid::new_v4(),
        user_id: None,
        trader_id: Some(trader_id.into()),
        position_id: None,
        token_symbol: "ETH".into(),
        side,
        size,
        price: Decimal::from(2500),
        fee,
        realized_pnl: Decimal::ZERO,
        is_copy_trade: false,
        copy_relationship_id: None,
        created_at: Utc::now(),
    }
}

/// Leader trade with realized PnL, timestamped `age_secs` in the past so
/// recency ordering is deterministic.
#[allow(dead_code)]
pub fn settled_trade(trader_id: &str, realized_pnl: i64, age_secs: i64) -> Trade {
    Trade {
        id: Uuid::new_v4(),
        user_id: None,
        trader_id: Some(trader_id.into()),
        position_id: None,
        token_symbol: "ETH".into(),
        side: Side::Buy,
        size: Decimal::ONE,
        price: Decimal::from(2500),
        fee: Decimal::ZERO,
        realized_pnl: Decimal::from(realized_pnl),
        is_copy_trade: false,
        copy_relationship_id: None,
        created_at: Utc::now() - ChronoDuration::seconds(age_secs),
    }
}

#[allow(dead_code)]
pub fn open_position(follower_id: &str, symbol: &str, size: i64, price: i64) -> Position {
    Position {
        id: Uuid::new_v4(),
        user_id: Some(follower_id.into()),
        trader_id: None,
        token_symbol: symbol.into(),
        side: PositionSide::Long,
        size: Decimal::from(size),
        entry_price: Decimal::from(price),
        current_price: Some(Decimal::from(price)),
        unrealized_pnl: Decimal::ZERO,
        leverage: Decimal::ONE,
        liquidation_price: None,
        is_copy_trade: true,
        copy_relationship_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Engine config tuned for tests: no retry backoff sleeps, small queues.
#[allow(dead_code)]
pub fn test_config() -> EngineConfig {
    EngineConfig {
        max_concurrency: 8,
        ingress_capacity: 64,
        retry_backoff_base_secs: 0,
        ..EngineConfig::default()
    }
}

#[allow(dead_code)]
pub fn engine_with(store: Arc<MemoryStore>, cache: Arc<MemoryCache>) -> CopyEngine {
    CopyEngine::new(
        store,
        cache,
        Arc::new(hypercopy::exchange::PaperExchange),
        test_config(),
    )
}

#[allow(dead_code)]
pub fn engine_with_exchange(
    store: Arc<MemoryStore>,
    cache: Arc<MemoryCache>,
    exchange: Arc<dyn ExchangeAdapter>,
    config: EngineConfig,
) -> CopyEngine {
    CopyEngine::new(store, cache, exchange, config)
}

/// Poll `condition` every 10 ms until it holds or the deadline passes.
#[allow(dead_code)]
pub async fn wait_for(condition: impl Fn() -> bool, deadline: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
