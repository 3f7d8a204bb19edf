use rust_decimal::{Decimal, MathematicalOps};

use crate::errors::EngineError;
use crate::models::{CopyRelationship, CopySignal, Trade};

use super::{CopyStrategy, StrategyType};

/// Signal parameter carrying the relationship's recent win rate (0–1).
pub const PARAM_WIN_RATE: &str = "win_rate";
/// Signal parameter carrying the current losing streak length.
pub const PARAM_CONSECUTIVE_LOSSES: &str = "consecutive_losses";
/// Signal parameter carrying the current winning streak length.
pub const PARAM_CONSECUTIVE_WINS: &str = "consecutive_wins";

/// Raise to `min_allocation`, cap at `max_allocation` when one is set.
fn clamp_to_allocation(size: Decimal, relationship: &CopyRelationship) -> Decimal {
    let mut clamped = size.max(relationship.min_allocation);
    if relationship.max_allocation > Decimal::ZERO {
        clamped = clamped.min(relationship.max_allocation);
    }
    clamped
}

fn proportional_base(signal: &CopySignal, original: &Trade) -> Decimal {
    original.size * signal.relationship.allocation_percent / Decimal::ONE_HUNDRED
}

// ---------------------------------------------------------------------------
// Proportional
// ---------------------------------------------------------------------------

/// Mirror the leader at `allocation_percent` of the original size. The
/// engine's default.
pub struct Proportional;

impl CopyStrategy for Proportional {
    fn should_execute(&self, _signal: &CopySignal, _original: &Trade) -> Result<bool, EngineError> {
        Ok(true)
    }

    fn calculate_position_size(
        &self,
        signal: &CopySignal,
        original: &Trade,
    ) -> Result<Decimal, EngineError> {
        Ok(clamp_to_allocation(
            proportional_base(signal, original),
            &signal.relationship,
        ))
    }

    fn strategy_type(&self) -> StrategyType {
        StrategyType::Proportional
    }
}

// ---------------------------------------------------------------------------
// Fixed
// ---------------------------------------------------------------------------

/// Always trade `max_allocation`; falls back to the proportional size when no
/// max is configured.
pub struct Fixed;

impl CopyStrategy for Fixed {
    fn should_execute(&self, signal: &CopySignal, original: &Trade) -> Result<bool, EngineError> {
        Ok(original.size >= signal.relationship.min_allocation)
    }

    fn calculate_position_size(
        &self,
        signal: &CopySignal,
        original: &Trade,
    ) -> Result<Decimal, EngineError> {
        let relationship = &signal.relationship;
        let size = if relationship.max_allocation > Decimal::ZERO {
            relationship.max_allocation
        } else {
            proportional_base(signal, original)
        };
        Ok(clamp_to_allocation(size, relationship))
    }

    fn strategy_type(&self) -> StrategyType {
        StrategyType::Fixed
    }
}

// ---------------------------------------------------------------------------
// Adaptive
// ---------------------------------------------------------------------------

/// Proportional base scaled by recent win rate: hot streaks grow the copy by
/// 20%, cold streaks shrink it by 30%.
pub struct Adaptive;

impl Adaptive {
    fn multiplier(win_rate: Decimal) -> Decimal {
        if win_rate > Decimal::new(7, 1) {
            Decimal::new(12, 1) // 1.2
        } else if win_rate < Decimal::new(3, 1) {
            Decimal::new(7, 1) // 0.7
        } else {
            Decimal::ONE
        }
    }
}

impl CopyStrategy for Adaptive {
    fn should_execute(&self, signal: &CopySignal, original: &Trade) -> Result<bool, EngineError> {
        Ok(original.size >= signal.relationship.min_allocation)
    }

    fn calculate_position_size(
        &self,
        signal: &CopySignal,
        original: &Trade,
    ) -> Result<Decimal, EngineError> {
        // Unknown win rate is treated as the neutral band.
        let win_rate = signal
            .parameter_decimal(PARAM_WIN_RATE)
            .unwrap_or(Decimal::new(5, 1));
        let size = proportional_base(signal, original) * Self::multiplier(win_rate);
        Ok(clamp_to_allocation(size, &signal.relationship))
    }

    fn strategy_type(&self) -> StrategyType {
        StrategyType::Adaptive
    }
}

// ---------------------------------------------------------------------------
// Risk-based
// ---------------------------------------------------------------------------

/// Proportional base damped by volatility, concentration, and leverage
/// factors, further reduced when a tight stop-loss is configured.
pub struct RiskBased;

impl RiskBased {
    const VOLATILITY_FACTOR: Decimal = Decimal::from_parts(8, 0, 0, false, 1); // 0.8
    const CONCENTRATION_FACTOR: Decimal = Decimal::ONE;
    const LEVERAGE_FACTOR: Decimal = Decimal::ONE;
}

impl CopyStrategy for RiskBased {
    fn should_execute(&self, _signal: &CopySignal, _original: &Trade) -> Result<bool, EngineError> {
        Ok(true)
    }

    fn calculate_position_size(
        &self,
        signal: &CopySignal,
        original: &Trade,
    ) -> Result<Decimal, EngineError> {
        let relationship = &signal.relationship;
        let mut size = proportional_base(signal, original)
            * Self::VOLATILITY_FACTOR
            * Self::CONCENTRATION_FACTOR
            * Self::LEVERAGE_FACTOR;

        if let Some(stop_loss) = relationship.stop_loss_percent {
            let adjustment = (stop_loss / Decimal::TWO).min(Decimal::ONE);
            size *= adjustment;
        }

        Ok(clamp_to_allocation(size, relationship))
    }

    fn strategy_type(&self) -> StrategyType {
        StrategyType::RiskBased
    }
}

// ---------------------------------------------------------------------------
// Martingale / Anti-martingale
// ---------------------------------------------------------------------------

/// Double after each loss, capped at 4x; refuses to trade at five consecutive
/// losses.
pub struct Martingale;

impl Martingale {
    const MAX_MULTIPLIER: Decimal = Decimal::from_parts(4, 0, 0, false, 0);
    const MAX_CONSECUTIVE_LOSSES: u32 = 5;
}

impl CopyStrategy for Martingale {
    fn should_execute(&self, signal: &CopySignal, _original: &Trade) -> Result<bool, EngineError> {
        let losses = signal.parameter_u32(PARAM_CONSECUTIVE_LOSSES).unwrap_or(0);
        Ok(losses < Self::MAX_CONSECUTIVE_LOSSES)
    }

    fn calculate_position_size(
        &self,
        signal: &CopySignal,
        original: &Trade,
    ) -> Result<Decimal, EngineError> {
        let losses = signal.parameter_u32(PARAM_CONSECUTIVE_LOSSES).unwrap_or(0);
        let multiplier = Decimal::TWO
            .powi(i64::from(losses.min(2)))
            .min(Self::MAX_MULTIPLIER);
        let size = proportional_base(signal, original) * multiplier;
        Ok(clamp_to_allocation(size, &signal.relationship))
    }

    fn strategy_type(&self) -> StrategyType {
        StrategyType::Martingale
    }
}

/// Grow 1.5x per win, capped at 3x; shrink to 80% after a loss.
pub struct AntiMartingale;

impl AntiMartingale {
    const GROWTH: Decimal = Decimal::from_parts(15, 0, 0, false, 1); // 1.5
    const MAX_MULTIPLIER: Decimal = Decimal::from_parts(3, 0, 0, false, 0);
    const LOSS_SHRINK: Decimal = Decimal::from_parts(8, 0, 0, false, 1); // 0.8
}

impl CopyStrategy for AntiMartingale {
    fn should_execute(&self, _signal: &CopySignal, _original: &Trade) -> Result<bool, EngineError> {
        Ok(true)
    }

    fn calculate_position_size(
        &self,
        signal: &CopySignal,
        original: &Trade,
    ) -> Result<Decimal, EngineError> {
        let wins = signal.parameter_u32(PARAM_CONSECUTIVE_WINS).unwrap_or(0);
        let base = proportional_base(signal, original);

        let size = if wins == 0 {
            base * Self::LOSS_SHRINK
        } else {
            let multiplier = Self::GROWTH
                .powi(i64::from(wins.min(3)))
                .min(Self::MAX_MULTIPLIER);
            base * multiplier
        };

        Ok(clamp_to_allocation(size, &signal.relationship))
    }

    fn strategy_type(&self) -> StrategyType {
        StrategyType::AntiMartingale
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
