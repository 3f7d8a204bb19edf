use chrono::Utc;
use metrics::{counter, gauge, histogram};
use rust_decimal::{Decimal, MathematicalOps};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval_at, timeout};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::models::{CopyRelationship, PerformanceMetrics, Position, RiskMetrics, Trade};

use super::pipeline::Shared;

/// Recomputation cadence.
const TICK_INTERVAL: Duration = Duration::from_secs(60);
/// Budget for one full pass over the active relationships.
const TICK_DEADLINE: Duration = Duration::from_secs(300);
/// Window of leader trades feeding the performance pass.
const RECENT_TRADES_LIMIT: i64 = 100;

/// Periodic recomputation of per-relationship performance and risk metrics,
/// written through to both stores.
pub(crate) async fn run(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval_at(tokio::time::Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
    tracing::info!(interval_secs = TICK_INTERVAL.as_secs(), "Metrics loop started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let start = Instant::now();
                if timeout(TICK_DEADLINE, tick(&shared)).await.is_err() {
                    tracing::warn!("Metrics tick exceeded its deadline");
                }
                histogram!("metrics_tick_seconds").record(start.elapsed().as_secs_f64());
            }
        }
    }

    tracing::info!("Metrics loop stopped");
}

/// One pass over every active relationship. A failing relationship is logged
/// and skipped, never aborting the tick.
pub(crate) async fn tick(shared: &Shared) {
    let relationships = match shared.store.active_relationships().await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load active relationships for metrics");
            return;
        }
    };

    gauge!("active_relationships").set(relationships.len() as f64);

    for relationship in &relationships {
        if let Err(e) = refresh_relationship(shared, relationship).await {
            counter!("metrics_tick_failures").increment(1);
            tracing::error!(
                error = %e,
                relationship = %relationship.id,
                "Metrics refresh failed"
            );
        }
    }
}

async fn refresh_relationship(
    shared: &Shared,
    relationship: &CopyRelationship,
) -> Result<(), EngineError> {
    let trades = shared
        .store
        .recent_trades_by_trader(&relationship.trader_id, RECENT_TRADES_LIMIT)
        .await?;
    let performance = compute_performance(relationship.id, &trades);

    shared.store.upsert_performance_metrics(&performance).await?;
    if let Err(e) = shared.cache.set_performance_metrics(&performance).await {
        tracing::warn!(error = %e, "Failed to cache performance metrics");
    }

    let positions = shared
        .store
        .follower_positions(&relationship.follower_id)
        .await?;
    let risk = compute_risk(relationship, &positions);

    shared.store.upsert_risk_metrics(&risk).await?;
    if let Err(e) = shared.cache.set_risk_metrics(&risk).await {
        tracing::warn!(error = %e, "Failed to cache risk metrics");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Performance
// ---------------------------------------------------------------------------

/// Single pass over the trade window: PnL totals, win/loss tallies, max
/// drawdown of the running PnL, and Sharpe over per-trade returns.
pub fn compute_performance(relationship_id: Uuid, trades: &[Trade]) -> PerformanceMetrics {
    if trades.is_empty() {
        return PerformanceMetrics::empty(relationship_id);
    }

    let mut total_pnl = Decimal::ZERO;
    let mut winning = 0i64;
    let mut losing = 0i64;
    let mut win_sum = Decimal::ZERO;
    let mut loss_sum = Decimal::ZERO;
    let mut running = Decimal::ZERO;
    let mut peak = Decimal::ZERO;
    let mut max_drawdown = Decimal::ZERO;
    let mut returns = Vec::with_capacity(trades.len());

    for trade in trades {
        let pnl = trade.realized_pnl;
        total_pnl += pnl;

        if pnl > Decimal::ZERO {
            winning += 1;
            win_sum += pnl;
        } else if pnl < Decimal::ZERO {
            losing += 1;
            loss_sum += pnl.abs();
        }

        running += pnl;
        if running > peak {
            peak = running;
        }
        max_drawdown = max_drawdown.max(peak - running);

        if trade.size > Decimal::ZERO {
            returns.push(pnl / trade.size);
        }
    }

    let count = Decimal::from(trades.len() as i64);
    let avg_win_size = if winning > 0 {
        win_sum / Decimal::from(winning)
    } else {
        Decimal::ZERO
    };
    let avg_loss_size = if losing > 0 {
        loss_sum / Decimal::from(losing)
    } else {
        Decimal::ZERO
    };

    PerformanceMetrics {
        relationship_id,
        total_pnl,
        win_rate: Decimal::from(winning) / count,
        total_trades: trades.len() as i64,
        winning_trades: winning,
        losing_trades: losing,
        avg_win_size,
        avg_loss_size,
        max_drawdown,
        sharpe_ratio: sharpe_ratio(&returns),
        last_updated: Utc::now(),
    }
}

/// `mean(returns) / stddev(returns)`; zero with fewer than two returns or
/// zero variance.
pub fn sharpe_ratio(returns: &[Decimal]) -> Decimal {
    if returns.len() < 2 {
        return Decimal::ZERO;
    }

    let n = Decimal::from(returns.len() as i64);
    let mean = returns.iter().copied().sum::<Decimal>() / n;

    let variance = returns
        .iter()
        .map(|r| {
            let diff = *r - mean;
            diff * diff
        })
        .sum::<Decimal>()
        / n;

    if variance.is_zero() {
        return Decimal::ZERO;
    }

    match variance.sqrt() {
        Some(std_dev) if !std_dev.is_zero() => mean / std_dev,
        _ => Decimal::ZERO,
    }
}

// ---------------------------------------------------------------------------
// Risk
// ---------------------------------------------------------------------------

/// Risk snapshot from the follower's open positions. Positions without a
/// current price carry no mark-to-market value and are excluded.
pub fn compute_risk(relationship: &CopyRelationship, positions: &[Position]) -> RiskMetrics {
    let mut current_exposure = Decimal::ZERO;
    let mut total_value = Decimal::ZERO;

    for position in positions {
        if let Some(value) = position.market_value() {
            current_exposure += value;
            total_value += value;
        }
    }

    let max_exposure = if relationship.max_allocation > Decimal::ZERO {
        relationship.max_allocation
    } else {
        total_value * Decimal::new(1, 1) // default to 10% of total value
    };

    let leverage_ratio = if total_value > Decimal::ZERO {
        current_exposure / total_value
    } else {
        Decimal::ZERO
    };

    RiskMetrics {
        relationship_id: relationship.id,
        current_exposure,
        max_exposure,
        value_at_risk: value_at_risk(total_value),
        leverage_ratio,
        concentration_risk: concentration_risk(positions),
        liquidity_risk: Decimal::new(1, 1), // constant until a market-data feed exists
        last_updated: Utc::now(),
    }
}

/// Flat 2% of portfolio value. A historical or parametric model would slot in
/// here.
pub fn value_at_risk(total_value: Decimal) -> Decimal {
    total_value * Decimal::new(2, 2)
}

/// Herfindahl-Hirschman Index over symbol-value shares: 1 fully concentrated,
/// 1/N across N equal-value symbols.
pub fn concentration_risk(positions: &[Position]) -> Decimal {
    let mut total_value = Decimal::ZERO;
    let mut symbol_values: HashMap<&str, Decimal> = HashMap::new();

    for position in positions {
        if let Some(value) = position.market_value() {
            total_value += value;
            *symbol_values
                .entry(position.token_symbol.as_str())
                .or_insert(Decimal::ZERO) += value;
        }
    }

    if total_value.is_zero() {
        return Decimal::ZERO;
    }

    symbol_values
        .values()
        .map(|value| {
            let share = value / total_value;
            share * share
        })
        .sum()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PositionSide, Side};
    use chrono::Utc;

    fn trades_with_pnl(pnls: &[i64]) -> Vec<Trade> {
        pnls.iter()
            .map(|&pnl| Trade {
                id: Uuid::new_v4(),
                user_id: None,
                trader_id: Some("trader_1".into()),
                position_id: None,
                token_symbol: "ETH".into(),
                side: Side::Buy,
                size: Decimal::ONE,
                price: Decimal::from(2500),
                fee: Decimal::ZERO,
                realized_pnl: Decimal::from(pnl),
                is_copy_trade: false,
                copy_relationship_id: None,
                created_at: Utc::now(),
            })
            .collect()
    }

    fn position(symbol: &str, size: i64, price: i64) -> Position {
        Position {
            id: Uuid::new_v4(),
            user_id: Some("follower_1".into()),
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

    fn relationship(max_allocation: i64) -> CopyRelationship {
        CopyRelationship {
            id: Uuid::new_v4(),
            follower_id: "follower_1".into(),
            trader_id: "trader_1".into(),
            allocation_percent: Decimal::from(25),
            min_allocation: Decimal::ZERO,
            max_allocation: Decimal::from(max_allocation),
            is_active: true,
            auto_rebalance: false,
            stop_loss_percent: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_performance_empty_trades() {
        let metrics = compute_performance(Uuid::new_v4(), &[]);
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.total_pnl, Decimal::ZERO);
        assert_eq!(metrics.sharpe_ratio, Decimal::ZERO);
    }

    #[test]
    fn test_performance_tallies() {
        let trades = trades_with_pnl(&[10, -4, -3, 8, -6]);
        let metrics = compute_performance(Uuid::new_v4(), &trades);

        assert_eq!(metrics.total_trades, 5);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 3);
        assert_eq!(metrics.total_pnl, Decimal::from(5));
        assert_eq!(metrics.win_rate, Decimal::new(4, 1)); // 2/5
        assert_eq!(metrics.avg_win_size, Decimal::from(9)); // (10+8)/2
        // (4+3+6)/3
        assert_eq!(
            metrics.avg_loss_size,
            Decimal::from(13) / Decimal::from(3)
        );
    }

    #[test]
    fn test_max_drawdown_over_running_pnl() {
        // Running PnL: 10, 6, 3, 11, 5 — deepest trough is 3 against peak 10.
        let trades = trades_with_pnl(&[10, -4, -3, 8, -6]);
        let metrics = compute_performance(Uuid::new_v4(), &trades);
        assert_eq!(metrics.max_drawdown, Decimal::from(7));
    }

    #[test]
    fn test_max_drawdown_monotone_gains_is_zero() {
        let trades = trades_with_pnl(&[5, 10, 15]);
        let metrics = compute_performance(Uuid::new_v4(), &trades);
        assert_eq!(metrics.max_drawdown, Decimal::ZERO);
    }

    #[test]
    fn test_sharpe_ratio_matches_mean_over_stddev() {
        // Returns [10, -4, -3, 8, -6] with size 1: mean 1, variance 44.
        let trades = trades_with_pnl(&[10, -4, -3, 8, -6]);
        let metrics = compute_performance(Uuid::new_v4(), &trades);

        let expected = Decimal::ONE
            / (Decimal::from(44).sqrt().unwrap());
        let diff = (metrics.sharpe_ratio - expected).abs();
        assert!(diff < Decimal::new(1, 9), "sharpe {} != {}", metrics.sharpe_ratio, expected);
    }

    #[test]
    fn test_sharpe_ratio_degenerate_cases() {
        assert_eq!(sharpe_ratio(&[Decimal::ONE]), Decimal::ZERO);
        assert_eq!(
            sharpe_ratio(&[Decimal::ONE, Decimal::ONE, Decimal::ONE]),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_concentration_single_symbol() {
        let positions = vec![position("ETH", 10, 100), position("ETH", 5, 100)];
        assert_eq!(concentration_risk(&positions), Decimal::ONE);
    }

    #[test]
    fn test_concentration_equal_split() {
        let positions = vec![
            position("ETH", 10, 100),
            position("BTC", 10, 100),
            position("SOL", 10, 100),
            position("AVAX", 10, 100),
        ];
        assert_eq!(concentration_risk(&positions), Decimal::new(25, 2)); // 1/4
    }

    #[test]
    fn test_concentration_empty() {
        assert_eq!(concentration_risk(&[]), Decimal::ZERO);
    }

    #[test]
    fn test_risk_exposure_and_leverage() {
        let rel = relationship(0);
        let positions = vec![position("ETH", 10, 100), position("BTC", 5, 200)];
        let risk = compute_risk(&rel, &positions);

        assert_eq!(risk.current_exposure, Decimal::from(2000));
        // No max allocation → 10% of total value.
        assert_eq!(risk.max_exposure, Decimal::from(200));
        assert_eq!(risk.leverage_ratio, Decimal::ONE);
        assert_eq!(risk.value_at_risk, Decimal::from(40)); // 2% of 2000
        assert_eq!(risk.liquidity_risk, Decimal::new(1, 1));
    }

    #[test]
    fn test_risk_uses_max_allocation_when_set() {
        let rel = relationship(500);
        let positions = vec![position("ETH", 10, 100)];
        let risk = compute_risk(&rel, &positions);
        assert_eq!(risk.max_exposure, Decimal::from(500));
    }

    #[test]
    fn test_risk_empty_positions() {
        let rel = relationship(0);
        let risk = compute_risk(&rel, &[]);
        assert_eq!(risk.current_exposure, Decimal::ZERO);
        assert_eq!(risk.leverage_ratio, Decimal::ZERO);
        assert_eq!(risk.concentration_risk, Decimal::ZERO);
    }
}
