use crate::exchange::ExchangeError;
use crate::store::StoreError;

/// Engine-level error taxonomy.
///
/// Admission denials and lock-contention skips are deliberately absent: they
/// are silent outcomes of the fan-out, observable only through debug logs and
/// counters, never surfaced as errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad unit of work (leader trade missing its trader, invalid config).
    /// Fatal to that unit; never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// I/O against store, cache, or exchange; retried with backoff before
    /// being surfaced.
    #[error("transient failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// Ingress channel stayed full past the admission wait budget.
    #[error("ingress queue full")]
    Backpressure,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("shutdown timed out waiting for workers")]
    ShutdownTimeout,

    /// Invariant violation; logged loudly, fails the execution.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => EngineError::NotFound(what),
            StoreError::Transient(source) => EngineError::Transient(source),
            StoreError::Permanent(source) => EngineError::Internal(source),
        }
    }
}

impl From<ExchangeError> for EngineError {
    fn from(e: ExchangeError) -> Self {
        match e {
            ExchangeError::Transient(source) => EngineError::Transient(source),
            ExchangeError::Permanent(source) => EngineError::Internal(source),
            ExchangeError::Rejected(reason) => {
                EngineError::InvalidInput(format!("order rejected: {reason}"))
            }
        }
    }
}
