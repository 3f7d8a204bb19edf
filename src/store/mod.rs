pub mod postgres;

pub use postgres::PgCopyStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    CopyExecution, CopyRelationship, PerformanceMetrics, Position, RiskMetrics, Trade,
};

/// Store failures, classified by how callers should react.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Surfaced to the caller, never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Connection/IO trouble; safe to retry with backoff.
    #[error("transient store failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// Integrity violation or bad input; retrying cannot help.
    #[error("permanent store failure: {0}")]
    Permanent(#[source] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".into()),
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed => StoreError::Transient(e.into()),
            other => StoreError::Permanent(other.into()),
        }
    }
}

/// Authoritative storage contract for relationships, positions, trades,
/// executions, and metrics.
///
/// Operations are independently safe to call concurrently. Multi-row writes
/// that must be atomic go through [`CopyStore::complete_execution_with_trade`],
/// which runs in a single transaction. Metric upserts are last-writer-wins
/// keyed by `relationship_id`.
#[async_trait]
pub trait CopyStore: Send + Sync {
    async fn active_relationships(&self) -> Result<Vec<CopyRelationship>, StoreError>;
    async fn relationship(&self, id: Uuid) -> Result<CopyRelationship, StoreError>;
    async fn relationships_by_follower(
        &self,
        follower_id: &str,
    ) -> Result<Vec<CopyRelationship>, StoreError>;
    async fn relationships_by_trader(
        &self,
        trader_id: &str,
    ) -> Result<Vec<CopyRelationship>, StoreError>;

    async fn create_trade(&self, trade: &Trade) -> Result<(), StoreError>;
    async fn recent_trades_by_trader(
        &self,
        trader_id: &str,
        limit: i64,
    ) -> Result<Vec<Trade>, StoreError>;

    async fn create_position(&self, position: &Position) -> Result<(), StoreError>;
    async fn update_position(&self, position: &Position) -> Result<(), StoreError>;
    async fn follower_positions(&self, follower_id: &str) -> Result<Vec<Position>, StoreError>;

    async fn create_execution(&self, execution: &CopyExecution) -> Result<(), StoreError>;
    async fn update_execution(&self, execution: &CopyExecution) -> Result<(), StoreError>;
    /// Persist the derived trade and the execution's terminal state atomically.
    async fn complete_execution_with_trade(
        &self,
        execution: &CopyExecution,
        trade: &Trade,
    ) -> Result<(), StoreError>;

    async fn upsert_performance_metrics(
        &self,
        metrics: &PerformanceMetrics,
    ) -> Result<(), StoreError>;
    async fn performance_metrics(
        &self,
        relationship_id: Uuid,
    ) -> Result<PerformanceMetrics, StoreError>;
    async fn upsert_risk_metrics(&self, metrics: &RiskMetrics) -> Result<(), StoreError>;
    async fn risk_metrics(&self, relationship_id: Uuid) -> Result<RiskMetrics, StoreError>;
}
