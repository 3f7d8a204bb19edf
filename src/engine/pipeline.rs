use chrono::Utc;
use metrics::{counter, histogram};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::timeout;
use uuid::Uuid;

use crate::cache::{CacheError, FastStore, TradeEvent};
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::exchange::{ExchangeAdapter, OrderRequest};
use crate::models::{CopyExecution, CopyRelationship, CopySignal, RiskMetrics, SignalType, Trade};
use crate::store::{CopyStore, StoreError};
use crate::strategy::builtin::PARAM_WIN_RATE;
use crate::strategy::{CopyStrategy, StrategyRegistry, StrategyType};

use super::EngineStats;

/// Deadline for a single per-relationship copy task.
pub(crate) const TASK_DEADLINE: Duration = Duration::from_secs(30);
/// TTL of the single-flight lock; generous against the task deadline so a
/// crashed holder cannot wedge the pair forever.
const LOCK_TTL: Duration = Duration::from_secs(30);

/// State shared between the engine handle and its background tasks.
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn CopyStore>,
    pub(crate) cache: Arc<dyn FastStore>,
    pub(crate) exchange: Arc<dyn ExchangeAdapter>,
    pub(crate) strategies: StrategyRegistry,
    pub(crate) config: EngineConfig,
    pub(crate) stats: Mutex<EngineStats>,
}

impl Shared {
    pub(crate) fn record(&self, f: impl FnOnce(&mut EngineStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}

/// Ingress worker: dequeues leader trades in FIFO order and fans each one out
/// to its subscribers. A trade's fan-out completes before the next dequeues,
/// which preserves per-leader ordering.
pub(crate) async fn run_worker(
    shared: Arc<Shared>,
    mut ingress_rx: mpsc::Receiver<Trade>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(shared.config.max_concurrency));
    tracing::info!(
        max_concurrency = shared.config.max_concurrency,
        "Trade worker started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            maybe_trade = ingress_rx.recv() => {
                let Some(trade) = maybe_trade else { break };
                let trade_id = trade.id;

                match process_leader_trade(&shared, &semaphore, trade, &shutdown_rx).await {
                    Ok(()) => {}
                    Err(EngineError::InvalidInput(reason)) => {
                        counter!("leader_trades_invalid").increment(1);
                        tracing::warn!(trade = %trade_id, reason = %reason, "Rejected leader trade");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, trade = %trade_id, "Failed to process leader trade");
                    }
                }
            }
        }
    }

    tracing::info!("Trade worker stopped");
}

async fn process_leader_trade(
    shared: &Arc<Shared>,
    semaphore: &Arc<Semaphore>,
    trade: Trade,
    shutdown_rx: &watch::Receiver<bool>,
) -> Result<(), EngineError> {
    let start = Instant::now();

    trade.validate_leader().map_err(EngineError::InvalidInput)?;
    let trader_id = trade.trader_id.clone().unwrap_or_default();

    counter!("leader_trades_total").increment(1);
    shared.record(|s| s.leader_trades += 1);

    let relationships = fetch_relationships_with_retry(shared, &trader_id).await?;
    if relationships.is_empty() {
        tracing::debug!(trader = %trader_id, "No subscribers for leader trade");
        return Ok(());
    }

    tracing::info!(
        trader = %trader_id,
        trade = %trade.id,
        subscribers = relationships.len(),
        "Fanning out leader trade"
    );

    let trade = Arc::new(trade);
    let mut tasks = Vec::with_capacity(relationships.len());

    for relationship in relationships {
        let permit = match Arc::clone(semaphore).acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };

        let shared = Arc::clone(shared);
        let trade = Arc::clone(&trade);
        let shutdown_rx = shutdown_rx.clone();

        tasks.push(tokio::spawn(async move {
            let _permit = permit;
            run_relationship_task(shared, relationship, trade, shutdown_rx).await;
        }));
    }

    for task in tasks {
        let _ = task.await;
    }

    let elapsed = start.elapsed();
    histogram!("fanout_latency_seconds").record(elapsed.as_secs_f64());
    shared.record(|s| s.last_fanout_latency = Some(elapsed));

    Ok(())
}

async fn fetch_relationships_with_retry(
    shared: &Shared,
    trader_id: &str,
) -> Result<Vec<CopyRelationship>, EngineError> {
    let mut attempt = 0u32;
    loop {
        match shared.store.relationships_by_trader(trader_id).await {
            Ok(relationships) => return Ok(relationships),
            Err(StoreError::Transient(source)) if attempt < shared.config.retry_attempts => {
                attempt += 1;
                let backoff = Duration::from_secs(
                    shared
                        .config
                        .retry_backoff_base_secs
                        .saturating_mul(1u64 << (attempt - 1).min(16)),
                );
                tracing::warn!(
                    error = %source,
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    "Transient store failure fetching subscribers, backing off"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// One spawned task per relationship, bounded by the fan-out semaphore. A
/// failure here never aborts the parent fan-out or sibling tasks.
async fn run_relationship_task(
    shared: Arc<Shared>,
    relationship: CopyRelationship,
    trade: Arc<Trade>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    if *shutdown_rx.borrow() {
        return;
    }

    let relationship_id = relationship.id;
    let result = tokio::select! {
        res = timeout(TASK_DEADLINE, process_relationship(&shared, &relationship, &trade)) => {
            res.unwrap_or_else(|_| {
                Err(EngineError::Transient(anyhow::anyhow!(
                    "copy task exceeded its deadline"
                )))
            })
        }
        _ = shutdown_rx.changed() => {
            tracing::debug!(relationship = %relationship_id, "Copy task cancelled by shutdown");
            return;
        }
    };

    if let Err(e) = result {
        tracing::error!(
            error = %e,
            relationship = %relationship_id,
            trade = %trade.id,
            "Copy processing failed"
        );
    }
}

async fn process_relationship(
    shared: &Shared,
    relationship: &CopyRelationship,
    original: &Trade,
) -> Result<(), EngineError> {
    let risk = fetch_risk_snapshot(shared, relationship.id).await;
    if let Some(reason) = admission_denial(relationship, original, risk.as_ref()) {
        counter!("copy_admission_denied").increment(1);
        shared.record(|s| s.admission_denied += 1);
        tracing::debug!(relationship = %relationship.id, reason = %reason, "Copy admission denied");
        return Ok(());
    }

    // Single-flight across replicas: whoever wins the lock handles the pair.
    let lock_key = format!("rel:{}:trade:{}", relationship.id, original.id);
    match shared.cache.acquire_lock(&lock_key, LOCK_TTL).await {
        Ok(true) => {}
        Ok(false) => {
            counter!("lock_contention_skips").increment(1);
            shared.record(|s| s.lock_contention_skips += 1);
            tracing::debug!(key = %lock_key, "Another replica holds the copy lock, skipping");
            return Ok(());
        }
        Err(e) => return Err(EngineError::Transient(anyhow::Error::new(e))),
    }

    let result = execute_copy(shared, relationship, original).await;

    if let Err(e) = shared.cache.release_lock(&lock_key).await {
        tracing::warn!(error = %e, key = %lock_key, "Failed to release copy lock");
    }

    result
}

async fn execute_copy(
    shared: &Shared,
    relationship: &CopyRelationship,
    original: &Trade,
) -> Result<(), EngineError> {
    let mut signal = CopySignal::new(
        relationship.clone(),
        original.id,
        SignalType::for_trade(original),
    );
    attach_performance_context(shared, &mut signal).await;

    let strategy = select_strategy(shared, relationship)?;

    if !strategy.should_execute(&signal, original)? {
        counter!("copy_admission_denied").increment(1);
        shared.record(|s| s.admission_denied += 1);
        tracing::debug!(
            relationship = %relationship.id,
            strategy = %strategy.strategy_type(),
            "Strategy declined copy"
        );
        return Ok(());
    }

    let copy_size = strategy.calculate_position_size(&signal, original)?;
    if copy_size <= Decimal::ZERO {
        tracing::debug!(relationship = %relationship.id, "Calculated copy size is zero, skipping");
        return Ok(());
    }

    counter!("copy_signals_emitted").increment(1);
    shared.record(|s| s.signals_emitted += 1);

    let mut execution = CopyExecution::new(signal.id, relationship.id);
    execution.parameters.insert(
        "calculated_size".into(),
        serde_json::json!(copy_size.to_f64()),
    );
    execution.parameters.insert(
        "original_size".into(),
        serde_json::json!(original.size.to_f64()),
    );
    execution.parameters.insert(
        "allocation_percent".into(),
        serde_json::json!(relationship.allocation_percent.to_f64()),
    );

    shared.store.create_execution(&execution).await?;
    cache_execution_status(shared, &execution).await;

    // The signal is immutable from here on; best-effort mirror for monitoring.
    if let Err(e) = shared.cache.set_copy_signal(&signal).await {
        tracing::warn!(error = %e, signal = %signal.id, "Failed to store copy signal");
    }

    execution.begin().map_err(|e| anyhow::Error::new(e))?;
    shared.store.update_execution(&execution).await?;
    cache_execution_status(shared, &execution).await;

    match materialize_trade(shared, relationship, original, copy_size).await {
        Ok(derived) => {
            execution
                .complete(derived.id)
                .map_err(|e| anyhow::Error::new(e))?;
            shared
                .store
                .complete_execution_with_trade(&execution, &derived)
                .await?;
            cache_execution_status(shared, &execution).await;

            counter!("copy_executions_completed").increment(1);
            shared.record(|s| s.executions_completed += 1);

            if let Err(e) = shared.cache.increment_trade_counter(relationship.id).await {
                tracing::debug!(error = %e, "Failed to bump trade counter");
            }
            publish_trade_event(shared, original, &derived).await;

            tracing::info!(
                relationship = %relationship.id,
                execution = %execution.id,
                size = %derived.size,
                price = %derived.price,
                "Copy trade executed"
            );
            Ok(())
        }
        Err(e) => {
            execution
                .fail(e.to_string())
                .map_err(|te| anyhow::Error::new(te))?;
            if let Err(update_err) = shared.store.update_execution(&execution).await {
                tracing::error!(
                    error = %update_err,
                    execution = %execution.id,
                    "Failed to persist failed execution"
                );
            }
            cache_execution_status(shared, &execution).await;

            counter!("copy_executions_failed").increment(1);
            shared.record(|s| s.executions_failed += 1);
            Err(e)
        }
    }
}

/// Place the order and build the derived trade from the fill. The fee scales
/// with the filled size: `original.fee * fill_size / original.size`.
async fn materialize_trade(
    shared: &Shared,
    relationship: &CopyRelationship,
    original: &Trade,
    copy_size: Decimal,
) -> Result<Trade, EngineError> {
    let request = OrderRequest {
        user_id: relationship.follower_id.clone(),
        token_symbol: original.token_symbol.clone(),
        side: original.side,
        size: copy_size,
        price: original.price,
    };

    let fill = shared.exchange.place_order(&request).await?;

    Ok(Trade {
        id: Uuid::new_v4(),
        user_id: Some(relationship.follower_id.clone()),
        trader_id: original.trader_id.clone(),
        position_id: original.position_id,
        token_symbol: original.token_symbol.clone(),
        side: original.side,
        size: fill.fill_size,
        price: fill.fill_price,
        fee: original.fee * fill.fill_size / original.size,
        realized_pnl: Decimal::ZERO,
        is_copy_trade: true,
        copy_relationship_id: Some(relationship.id),
        created_at: Utc::now(),
    })
}

/// C4's own gate, checked before the strategy. Returns the denial reason, or
/// `None` when the copy may proceed.
fn admission_denial(
    relationship: &CopyRelationship,
    original: &Trade,
    risk: Option<&RiskMetrics>,
) -> Option<String> {
    if !relationship.is_active {
        return Some("relationship inactive".into());
    }
    if let Err(reason) = relationship.validate() {
        return Some(reason);
    }
    if original.size < relationship.min_allocation {
        return Some(format!(
            "trade size {} below min allocation {}",
            original.size, relationship.min_allocation
        ));
    }
    if relationship.max_allocation > Decimal::ZERO && original.size > relationship.max_allocation {
        return Some(format!(
            "trade size {} above max allocation {}",
            original.size, relationship.max_allocation
        ));
    }
    if let Some(risk) = risk {
        if risk.current_exposure > risk.max_exposure {
            return Some(format!(
                "exposure {} exceeds limit {}",
                risk.current_exposure, risk.max_exposure
            ));
        }
    }
    None
}

/// Cached risk snapshot with store fallthrough. A missing or unreadable
/// snapshot admits the trade rather than blocking the hot path.
async fn fetch_risk_snapshot(shared: &Shared, relationship_id: Uuid) -> Option<RiskMetrics> {
    match shared.cache.risk_metrics(relationship_id).await {
        Ok(metrics) => return Some(metrics),
        Err(CacheError::Miss) => {}
        Err(CacheError::Unavailable(e)) => {
            tracing::debug!(error = %e, "Risk cache unavailable, falling back to store");
        }
    }

    match shared.store.risk_metrics(relationship_id).await {
        Ok(metrics) => {
            if let Err(e) = shared.cache.set_risk_metrics(&metrics).await {
                tracing::debug!(error = %e, "Failed to repopulate risk metrics cache");
            }
            Some(metrics)
        }
        Err(StoreError::NotFound(_)) => None,
        Err(e) => {
            tracing::warn!(
                error = %e,
                relationship = %relationship_id,
                "Failed to load risk metrics, admitting without exposure check"
            );
            None
        }
    }
}

/// Feed the relationship's recent win rate into the signal for strategies
/// that scale on performance.
async fn attach_performance_context(shared: &Shared, signal: &mut CopySignal) {
    let relationship_id = signal.relationship.id;

    let metrics = match shared.cache.performance_metrics(relationship_id).await {
        Ok(m) => Some(m),
        Err(CacheError::Miss) | Err(CacheError::Unavailable(_)) => {
            match shared.store.performance_metrics(relationship_id).await {
                Ok(m) => {
                    if let Err(e) = shared.cache.set_performance_metrics(&m).await {
                        tracing::debug!(
                            error = %e,
                            "Failed to repopulate performance metrics cache"
                        );
                    }
                    Some(m)
                }
                Err(_) => None,
            }
        }
    };

    if let Some(metrics) = metrics {
        if let Some(win_rate) = metrics.win_rate.to_f64() {
            signal.set_parameter(PARAM_WIN_RATE, serde_json::json!(win_rate));
        }
    }
}

fn select_strategy(
    shared: &Shared,
    _relationship: &CopyRelationship,
) -> Result<Arc<dyn CopyStrategy>, EngineError> {
    // Every relationship currently runs the default sizer; the registry keyed
    // by tag is the seam for per-relationship selection.
    shared
        .strategies
        .get(StrategyType::Proportional)
        .ok_or_else(|| EngineError::Internal(anyhow::anyhow!("default strategy not registered")))
}

async fn cache_execution_status(shared: &Shared, execution: &CopyExecution) {
    if let Err(e) = shared
        .cache
        .set_execution_status(execution.id, execution.status)
        .await
    {
        tracing::debug!(error = %e, execution = %execution.id, "Failed to mirror execution status");
    }
}

async fn publish_trade_event(shared: &Shared, original: &Trade, derived: &Trade) {
    let event = TradeEvent {
        event_type: "copy_trade_executed".into(),
        trader_id: original.trader_id.clone().unwrap_or_default(),
        trade: derived.clone(),
        timestamp: Utc::now(),
        data: serde_json::Map::new(),
    };

    if let Err(e) = shared.cache.publish_trade_event(&event).await {
        tracing::debug!(error = %e, "Failed to publish trade event");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
