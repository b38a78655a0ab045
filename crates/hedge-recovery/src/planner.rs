use broker_core::{pip_profit, Position};
use serde::{Deserialize, Serialize};

use crate::CounterHedge;

/// Combined P&L within a cent of zero counts as neither positive nor
/// negative; the break-even fallback handles it.
const PNL_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegOutStrategy {
    CloseBothImmediately,
    CloseWeakerRideStronger,
    PartialCloseAndTrail,
    HoldForReversal,
    BreakEvenExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    Original,
    Hedge,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegOutAction {
    CloseBoth,
    CloseLeg(Leg),
    PartialCloseBoth { fraction: f64 },
    TrailLeg { leg: Leg, distance: f64 },
    Hold,
    CloseAtBreakEven,
}

/// One step of the unwind plan, with a literal expected-profit figure so the
/// decision is auditable after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegOutStep {
    pub action: LegOutAction,
    pub reason: String,
    pub timing: String,
    pub expected_profit: f64,
}

/// Advisory unwind plan for a hedged pair. Recomputed every monitoring tick;
/// the controller decides whether and how to execute it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegOutPlan {
    pub strategy: LegOutStrategy,
    pub steps: Vec<LegOutStep>,
    pub confidence: f64,
}

/// Pick the best way to unwind the original position and its counter-hedge.
///
/// Strategies are tried in priority order: take a solid combined recovery
/// immediately; otherwise cut the weaker leg and ride the stronger one;
/// otherwise bank half of a small combined gain; otherwise sit on the pair
/// with a safety stop; otherwise exit both at break-even.
///
/// `ml_trend_probability` is the model's probability that price continues in
/// the original position's direction.
pub fn plan_leg_out(
    original: &Position,
    hedge: &CounterHedge,
    current_price: f64,
    ml_trend_probability: f64,
    volatility: f64,
) -> LegOutPlan {
    let original_pnl = pip_profit(
        original.direction,
        original.entry_price,
        current_price,
        original.volume,
    );
    let hedge_pnl = pip_profit(
        hedge.hedge_direction,
        hedge.hedge_entry_price,
        current_price,
        hedge.hedge_volume,
    );
    let combined = original_pnl + hedge_pnl;
    let loss = hedge.total_loss_to_recover;

    tracing::debug!(
        "Leg-out {}: original ${:.2}, hedge ${:.2}, combined ${:.2} vs loss ${:.2}",
        hedge.symbol,
        original_pnl,
        hedge_pnl,
        combined,
        loss
    );

    // 1. Combined recovery is already more than half the loss: take it.
    if combined > 0.5 * loss {
        return LegOutPlan {
            strategy: LegOutStrategy::CloseBothImmediately,
            steps: vec![LegOutStep {
                action: LegOutAction::CloseBoth,
                reason: format!(
                    "Combined P&L ${:.2} recovers over half of the ${:.2} loss",
                    combined, loss
                ),
                timing: "immediately".to_string(),
                expected_profit: combined,
            }],
            confidence: 0.9,
        };
    }

    // 2. One leg profitable and strictly ahead: cut the other, ride it.
    let trailing_distance = current_price * volatility.max(0.005);
    if original_pnl > 0.0 && original_pnl > hedge_pnl {
        return ride_leg(
            Leg::Original,
            original_pnl,
            hedge_pnl,
            trailing_distance,
            ml_trend_probability,
        );
    }
    if hedge_pnl > 0.0 && hedge_pnl > original_pnl {
        return ride_leg(
            Leg::Hedge,
            hedge_pnl,
            original_pnl,
            trailing_distance,
            1.0 - ml_trend_probability,
        );
    }

    // 3. Small combined gain: bank half, trail the rest.
    if combined > PNL_EPSILON {
        return LegOutPlan {
            strategy: LegOutStrategy::PartialCloseAndTrail,
            steps: vec![
                LegOutStep {
                    action: LegOutAction::PartialCloseBoth { fraction: 0.5 },
                    reason: format!(
                        "Combined P&L ${:.2} positive but under half the loss; bank half",
                        combined
                    ),
                    timing: "immediately".to_string(),
                    expected_profit: combined * 0.5,
                },
                LegOutStep {
                    action: LegOutAction::Hold,
                    reason: "Trail the remaining half of both legs".to_string(),
                    timing: "next tick".to_string(),
                    expected_profit: combined * 0.5,
                },
            ],
            confidence: 0.75,
        };
    }

    // 4. Still under water: hold for the reversal behind a safety stop.
    if combined < -PNL_EPSILON {
        let safety_stop = 1.5 * loss;
        return LegOutPlan {
            strategy: LegOutStrategy::HoldForReversal,
            steps: vec![LegOutStep {
                action: LegOutAction::Hold,
                reason: format!(
                    "Combined P&L ${:.2} negative; hold both, abandon if loss reaches ${:.2}",
                    combined, safety_stop
                ),
                timing: "next tick".to_string(),
                expected_profit: -safety_stop,
            }],
            confidence: 0.50,
        };
    }

    // 5. Flat: get out clean as soon as the pair covers its costs.
    LegOutPlan {
        strategy: LegOutStrategy::BreakEvenExit,
        steps: vec![LegOutStep {
            action: LegOutAction::CloseAtBreakEven,
            reason: "Neither leg clearly ahead; exit both flat".to_string(),
            timing: "when combined P&L >= 0".to_string(),
            expected_profit: 0.0,
        }],
        confidence: 0.60,
    }
}

fn ride_leg(
    winner: Leg,
    winner_pnl: f64,
    loser_pnl: f64,
    trailing_distance: f64,
    confidence: f64,
) -> LegOutPlan {
    let loser = match winner {
        Leg::Original => Leg::Hedge,
        Leg::Hedge => Leg::Original,
    };
    LegOutPlan {
        strategy: LegOutStrategy::CloseWeakerRideStronger,
        steps: vec![
            LegOutStep {
                action: LegOutAction::CloseLeg(loser),
                reason: format!("Weaker leg at ${:.2}; cut it now", loser_pnl),
                timing: "immediately".to_string(),
                expected_profit: loser_pnl,
            },
            LegOutStep {
                action: LegOutAction::TrailLeg {
                    leg: winner,
                    distance: trailing_distance,
                },
                reason: format!("Ride the stronger leg from ${:.2} with a trailing stop", winner_pnl),
                timing: "next tick".to_string(),
                expected_profit: winner_pnl,
            },
        ],
        confidence,
    }
}
