pub mod builtin;

pub use builtin::{
    Adaptive, AntiMartingale, Fixed, Martingale, Proportional, RiskBased,
};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::errors::EngineError;
use crate::models::{CopySignal, Trade};

// ---------------------------------------------------------------------------
// StrategyType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    Proportional,
    Fixed,
    Adaptive,
    RiskBased,
    Martingale,
    AntiMartingale,
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyType::Proportional => "proportional",
            StrategyType::Fixed => "fixed",
            StrategyType::Adaptive => "adaptive",
            StrategyType::RiskBased => "risk_based",
            StrategyType::Martingale => "martingale",
            StrategyType::AntiMartingale => "anti_martingale",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// CopyStrategy
// ---------------------------------------------------------------------------

/// The sizing-policy seam: gate, sizer, and identity tag.
///
/// Strategies are pure over their inputs. Performance context (recent win
/// rate, win/loss streaks) arrives through the signal's `parameters`; a
/// missing key behaves as the neutral value.
pub trait CopyStrategy: Send + Sync {
    fn should_execute(&self, signal: &CopySignal, original: &Trade) -> Result<bool, EngineError>;

    /// Copy size in the symbol's contract units, clamped to the
    /// relationship's `[min_allocation, max_allocation]` window.
    fn calculate_position_size(
        &self,
        signal: &CopySignal,
        original: &Trade,
    ) -> Result<Decimal, EngineError>;

    fn strategy_type(&self) -> StrategyType;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Read-mostly registry of strategies keyed by tag. Built at engine start,
/// torn down with it.
pub struct StrategyRegistry {
    strategies: RwLock<HashMap<StrategyType, Arc<dyn CopyStrategy>>>,
}

impl StrategyRegistry {
    /// Registry pre-loaded with every built-in strategy.
    pub fn with_builtins() -> Self {
        let registry = Self {
            strategies: RwLock::new(HashMap::new()),
        };
        registry.register(Arc::new(Proportional));
        registry.register(Arc::new(Fixed));
        registry.register(Arc::new(Adaptive));
        registry.register(Arc::new(RiskBased));
        registry.register(Arc::new(Martingale));
        registry.register(Arc::new(AntiMartingale));
        registry
    }

    pub fn register(&self, strategy: Arc<dyn CopyStrategy>) {
        let mut map = self.strategies.write().expect("strategy registry poisoned");
        map.insert(strategy.strategy_type(), strategy);
    }

    pub fn get(&self, strategy_type: StrategyType) -> Option<Arc<dyn CopyStrategy>> {
        let map = self.strategies.read().expect("strategy registry poisoned");
        map.get(&strategy_type).cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
