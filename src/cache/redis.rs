use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{CopySignal, ExecutionStatus, PerformanceMetrics, RiskMetrics};

use super::{
    CacheError, FastStore, TradeEvent, EVENT_BUFFER, EXECUTION_STATUS_TTL, METRICS_TTL,
    SIGNAL_TTL, TRADE_EVENTS_TOPIC,
};

fn unavailable(e: impl Into<anyhow::Error>) -> CacheError {
    CacheError::Unavailable(e.into())
}

/// Redis-backed [`FastStore`].
///
/// The connection manager handles reconnects; pub/sub subscriptions run on
/// their own dedicated connections.
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(unavailable)?;
        Ok(Self { client, conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    async fn set_json<T: serde::Serialize>(
        &self,
        key: String,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(value).map_err(unavailable)?;
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(key, payload, ttl.as_secs())
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: String,
    ) -> Result<T, CacheError> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.get(key).await.map_err(unavailable)?;
        let raw = raw.ok_or(CacheError::Miss)?;
        serde_json::from_str(&raw).map_err(unavailable)
    }
}

#[async_trait]
impl FastStore for RedisCache {
    async fn set_copy_signal(&self, signal: &CopySignal) -> Result<(), CacheError> {
        let key = format!("copy_signals:{}", signal.relationship.id);
        let payload = serde_json::to_string(signal).map_err(unavailable)?;
        let mut conn = self.conn();
        // List append so concurrent fan-out tasks never overwrite each other.
        let _: i64 = conn.rpush(&key, payload).await.map_err(unavailable)?;
        let _: bool = conn
            .expire(&key, SIGNAL_TTL.as_secs() as i64)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn copy_signals(&self, relationship_id: Uuid) -> Result<Vec<CopySignal>, CacheError> {
        let key = format!("copy_signals:{relationship_id}");
        let mut conn = self.conn();
        let raw: Vec<String> = conn.lrange(&key, 0, -1).await.map_err(unavailable)?;
        raw.iter()
            .map(|s| serde_json::from_str(s).map_err(unavailable))
            .collect()
    }

    async fn set_execution_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(
                format!("execution_status:{execution_id}"),
                status.as_str(),
                EXECUTION_STATUS_TTL.as_secs(),
            )
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn execution_status(&self, execution_id: Uuid) -> Result<ExecutionStatus, CacheError> {
        let mut conn = self.conn();
        let raw: Option<String> = conn
            .get(format!("execution_status:{execution_id}"))
            .await
            .map_err(unavailable)?;
        let raw = raw.ok_or(CacheError::Miss)?;
        ExecutionStatus::parse_str(&raw)
            .ok_or_else(|| unavailable(anyhow::anyhow!("unknown execution status {raw:?}")))
    }

    async fn set_performance_metrics(
        &self,
        metrics: &PerformanceMetrics,
    ) -> Result<(), CacheError> {
        self.set_json(
            format!("performance_metrics:{}", metrics.relationship_id),
            metrics,
            METRICS_TTL,
        )
        .await
    }

    async fn performance_metrics(
        &self,
        relationship_id: Uuid,
    ) -> Result<PerformanceMetrics, CacheError> {
        self.get_json(format!("performance_metrics:{relationship_id}"))
            .await
    }

    async fn set_risk_metrics(&self, metrics: &RiskMetrics) -> Result<(), CacheError> {
        self.set_json(
            format!("risk_metrics:{}", metrics.relationship_id),
            metrics,
            METRICS_TTL,
        )
        .await
    }

    async fn risk_metrics(&self, relationship_id: Uuid) -> Result<RiskMetrics, CacheError> {
        self.get_json(format!("risk_metrics:{relationship_id}"))
            .await
    }

    async fn increment_trade_counter(&self, relationship_id: Uuid) -> Result<i64, CacheError> {
        let mut conn = self.conn();
        conn.incr(format!("trade_counter:{relationship_id}"), 1)
            .await
            .map_err(unavailable)
    }

    async fn trade_counter(&self, relationship_id: Uuid) -> Result<i64, CacheError> {
        let mut conn = self.conn();
        let count: Option<i64> = conn
            .get(format!("trade_counter:{relationship_id}"))
            .await
            .map_err(unavailable)?;
        Ok(count.unwrap_or(0))
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn();
        // SET NX EX is the atomic set-if-absent-with-TTL primitive.
        let resp: Option<String> = redis::cmd("SET")
            .arg(format!("lock:{key}"))
            .arg("locked")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(resp.is_some())
    }

    async fn release_lock(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let _: i64 = conn
            .del(format!("lock:{key}"))
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn publish_trade_event(&self, event: &TradeEvent) -> Result<(), CacheError> {
        let payload = serde_json::to_string(event).map_err(unavailable)?;
        let mut conn = self.conn();
        let _: i64 = conn
            .publish(TRADE_EVENTS_TOPIC, payload)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn subscribe_trade_events(&self) -> Result<mpsc::Receiver<TradeEvent>, CacheError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(unavailable)?;
        pubsub
            .subscribe(TRADE_EVENTS_TOPIC)
            .await
            .map_err(unavailable)?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "Unreadable trade event payload");
                        continue;
                    }
                };

                let event: TradeEvent = match serde_json::from_str(&payload) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to decode trade event");
                        continue;
                    }
                };

                match tx.try_send(event) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!("Trade event buffer full, dropping event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        });

        Ok(rx)
    }
}
