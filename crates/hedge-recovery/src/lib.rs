//! Counter-hedge loss recovery.
//!
//! When a session's stop-loss is imminent, an offsetting position is opened
//! in the opposite direction. From then on both legs are managed together:
//! [`planner::plan_leg_out`] recomputes the best unwind strategy every
//! monitoring tick until both legs are closed.

use broker_core::{Position, StrategyConfig, TradeDirection, PIP_SIZE, PIP_VALUE_PER_LOT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod planner;

pub use planner::{Leg, LegOutAction, LegOutPlan, LegOutStep, LegOutStrategy};

/// User risk scale is clamped to this range before sizing the hedge.
const RISK_SCALE_MIN: f64 = 0.1;
const RISK_SCALE_MAX: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HedgeStatus {
    Active,
    PartiallyClosed,
    FullyClosed,
    Stopped,
}

/// An active counter-hedge tied to a losing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterHedge {
    pub symbol: String,
    pub original_direction: TradeDirection,
    pub hedge_direction: TradeDirection,
    pub hedge_volume: f64,
    pub hedge_entry_price: f64,
    /// Price at which the hedge's profit alone recovers the original loss.
    pub hedge_target_price: f64,
    pub total_loss_to_recover: f64,
    pub status: HedgeStatus,
    pub activated_at: DateTime<Utc>,
}

/// Size and place a counter-hedge against a losing leg.
///
/// Returns None when there is nothing to recover (the leg is flat or
/// profitable) or when auto-hedging is disabled. The hedge volume is the
/// original volume scaled by the configured multiplier, the clamped user
/// risk scale, and a confidence adjustment from the prediction model.
pub fn trigger_counter_hedge(
    losing_leg: &Position,
    config: &StrategyConfig,
    ml_confidence: f64,
) -> Option<CounterHedge> {
    if losing_leg.profit_loss >= 0.0 {
        return None;
    }
    if !config.auto_hedge_enabled {
        tracing::debug!("Auto-hedge disabled, skipping {}", losing_leg.symbol);
        return None;
    }

    let risk_scale = config.risk_scale.clamp(RISK_SCALE_MIN, RISK_SCALE_MAX);
    let mut hedge_volume = losing_leg.volume * config.hedge_multiplier * risk_scale;

    if ml_confidence > 0.75 {
        hedge_volume *= 1.2;
    } else if ml_confidence < 0.55 {
        hedge_volume *= 0.8;
    }

    let loss = losing_leg.profit_loss.abs();
    let hedge_direction = losing_leg.direction.opposite();
    let hedge_entry_price = losing_leg.current_price;

    // Distance the hedge must travel so its profit equals the loss:
    // loss = distance / PIP_SIZE * PIP_VALUE_PER_LOT * volume
    let target_distance = loss / (hedge_volume * PIP_VALUE_PER_LOT) * PIP_SIZE;
    let hedge_target_price = hedge_entry_price + hedge_direction.sign() * target_distance;

    tracing::info!(
        "Counter-hedge {}: {} {:.2} lots @ {:.5}, target {:.5} to recover ${:.2}",
        losing_leg.symbol,
        hedge_direction,
        hedge_volume,
        hedge_entry_price,
        hedge_target_price,
        loss
    );

    Some(CounterHedge {
        symbol: losing_leg.symbol.clone(),
        original_direction: losing_leg.direction,
        hedge_direction,
        hedge_volume,
        hedge_entry_price,
        hedge_target_price,
        total_loss_to_recover: loss,
        status: HedgeStatus::Active,
        activated_at: Utc::now(),
    })
}
