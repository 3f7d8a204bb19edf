pub mod metrics_loop;
pub(crate) mod pipeline;

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use crate::cache::{CacheError, FastStore};
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::exchange::ExchangeAdapter;
use crate::models::{CopyRelationship, PerformanceMetrics, RiskMetrics, Trade};
use crate::store::CopyStore;
use crate::strategy::StrategyRegistry;

use pipeline::Shared;

/// How long `submit` may wait on a full ingress queue.
const SUBMIT_WAIT: Duration = Duration::from_secs(5);
/// How long `stop` waits for workers to drain.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Process-wide execution counters, created at `start` and torn down with the
/// engine.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub leader_trades: u64,
    pub signals_emitted: u64,
    pub executions_completed: u64,
    pub executions_failed: u64,
    pub admission_denied: u64,
    pub lock_contention_skips: u64,
    pub last_fanout_latency: Option<Duration>,
}

struct RunningState {
    ingress_tx: mpsc::Sender<Trade>,
    shutdown_tx: watch::Sender<bool>,
    worker: JoinHandle<()>,
    metrics_loop: JoinHandle<()>,
}

/// The copy-trading engine: ingest a leader trade, fan it out to every active
/// subscriber, size each copy through the selected strategy, and record the
/// resulting execution. A metrics loop recomputes per-relationship
/// performance and risk alongside the hot path.
pub struct CopyEngine {
    shared: Arc<Shared>,
    state: Mutex<Option<RunningState>>,
}

impl CopyEngine {
    pub fn new(
        store: Arc<dyn CopyStore>,
        cache: Arc<dyn FastStore>,
        exchange: Arc<dyn ExchangeAdapter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                cache,
                exchange,
                strategies: StrategyRegistry::with_builtins(),
                config,
                stats: Mutex::new(EngineStats::default()),
            }),
            state: Mutex::new(None),
        }
    }

    /// Spawn the ingress worker and the metrics loop. A second `start` fails
    /// with [`EngineError::AlreadyRunning`].
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut guard = self.state.lock().expect("engine state poisoned");
        if guard.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let (ingress_tx, ingress_rx) = mpsc::channel(self.shared.config.ingress_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(pipeline::run_worker(
            Arc::clone(&self.shared),
            ingress_rx,
            shutdown_rx.clone(),
        ));
        let metrics_loop = tokio::spawn(metrics_loop::run(Arc::clone(&self.shared), shutdown_rx));

        *guard = Some(RunningState {
            ingress_tx,
            shutdown_tx,
            worker,
            metrics_loop,
        });

        tracing::info!("Copy engine started");
        Ok(())
    }

    /// Signal cancellation, close the ingress channel, and wait for the
    /// background tasks to drain.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let state = {
            let mut guard = self.state.lock().expect("engine state poisoned");
            guard.take()
        };
        let Some(state) = state else {
            return Err(EngineError::NotRunning);
        };

        let _ = state.shutdown_tx.send(true);
        drop(state.ingress_tx);

        let mut worker = state.worker;
        let mut metrics_loop = state.metrics_loop;
        let drained = timeout(SHUTDOWN_DEADLINE, async {
            let _ = (&mut worker).await;
            let _ = (&mut metrics_loop).await;
        })
        .await;

        match drained {
            Ok(()) => {
                tracing::info!("Copy engine stopped");
                Ok(())
            }
            Err(_) => {
                worker.abort();
                metrics_loop.abort();
                tracing::warn!("Copy engine stop timed out, aborting workers");
                Err(EngineError::ShutdownTimeout)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().expect("engine state poisoned").is_some()
    }

    /// Enqueue a leader trade for fan-out. Blocks up to five seconds when the
    /// ingress queue is full, then fails with [`EngineError::Backpressure`].
    pub async fn submit(&self, trade: Trade) -> Result<(), EngineError> {
        let tx = {
            let guard = self.state.lock().expect("engine state poisoned");
            match guard.as_ref() {
                Some(state) => state.ingress_tx.clone(),
                None => return Err(EngineError::NotRunning),
            }
        };

        match timeout(SUBMIT_WAIT, tx.send(trade)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(EngineError::NotRunning),
            Err(_) => Err(EngineError::Backpressure),
        }
    }

    pub async fn relationships_for_trader(
        &self,
        trader_id: &str,
    ) -> Result<Vec<CopyRelationship>, EngineError> {
        Ok(self.shared.store.relationships_by_trader(trader_id).await?)
    }

    pub async fn relationships_for_follower(
        &self,
        follower_id: &str,
    ) -> Result<Vec<CopyRelationship>, EngineError> {
        Ok(self
            .shared
            .store
            .relationships_by_follower(follower_id)
            .await?)
    }

    /// Cached performance metrics, falling back to the persistent store and
    /// repopulating the cache on a miss.
    pub async fn performance_metrics(
        &self,
        relationship_id: Uuid,
    ) -> Result<PerformanceMetrics, EngineError> {
        match self.shared.cache.performance_metrics(relationship_id).await {
            Ok(metrics) => return Ok(metrics),
            Err(CacheError::Miss) => {}
            Err(CacheError::Unavailable(e)) => {
                tracing::warn!(error = %e, "Performance cache unavailable, falling back to store");
            }
        }

        let metrics = self
            .shared
            .store
            .performance_metrics(relationship_id)
            .await?;
        if let Err(e) = self.shared.cache.set_performance_metrics(&metrics).await {
            tracing::warn!(error = %e, "Failed to repopulate performance metrics cache");
        }
        Ok(metrics)
    }

    /// Cached risk metrics with the same fallthrough policy.
    pub async fn risk_metrics(&self, relationship_id: Uuid) -> Result<RiskMetrics, EngineError> {
        match self.shared.cache.risk_metrics(relationship_id).await {
            Ok(metrics) => return Ok(metrics),
            Err(CacheError::Miss) => {}
            Err(CacheError::Unavailable(e)) => {
                tracing::warn!(error = %e, "Risk cache unavailable, falling back to store");
            }
        }

        let metrics = self.shared.store.risk_metrics(relationship_id).await?;
        if let Err(e) = self.shared.cache.set_risk_metrics(&metrics).await {
            tracing::warn!(error = %e, "Failed to repopulate risk metrics cache");
        }
        Ok(metrics)
    }

    /// Run one metrics recomputation pass immediately, outside the periodic
    /// schedule.
    pub async fn recompute_metrics(&self) {
        metrics_loop::tick(&self.shared).await;
    }

    /// Snapshot of the engine's aggregate counters.
    pub fn stats(&self) -> EngineStats {
        self.shared
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}
