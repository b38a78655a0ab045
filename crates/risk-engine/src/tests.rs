use approx::assert_relative_eq;

use crate::{RiskConfig, RiskEngine, TradingMode};

fn engine() -> RiskEngine {
    RiskEngine::new(RiskConfig::default())
}

#[test]
fn kelly_worked_example() {
    // balance 10000, p=0.65, avg_win=150, avg_loss=100
    // b = 1.5, kelly = (0.65*1.5 - 0.35)/1.5 = 0.41667, half-Kelly = 0.20833
    // clamped to max_risk_per_trade 0.02 -> $200
    let amount = engine().position_size(10_000.0, 0.65, 150.0, 100.0);
    assert_relative_eq!(amount, 200.0, epsilon = 0.01);
}

#[test]
fn kelly_negative_edge_risks_nothing() {
    // 40% win rate at 1:1 odds has negative expectancy
    let amount = engine().position_size(10_000.0, 0.40, 100.0, 100.0);
    assert_relative_eq!(amount, 0.0, epsilon = 1e-9);
}

#[test]
fn kelly_zero_loss_history_falls_back_to_flat_risk() {
    let amount = engine().position_size(10_000.0, 0.65, 150.0, 0.0);
    assert_relative_eq!(amount, 200.0, epsilon = 1e-9);
}

#[test]
fn recommendation_never_exceeds_per_trade_cap() {
    let e = engine();
    // Stack every size-increasing adjustment on top of a capped Kelly amount.
    let rec = e.recommend_position(
        10_000.0,
        0.95,
        0.001,
        true,
        TradingMode::Aggressive,
        0.70,
        200.0,
        50.0,
    );
    assert!(rec.risk_amount <= 10_000.0 * e.config().max_risk_per_trade + 1e-9);
    assert!(rec
        .adjustments
        .iter()
        .any(|a| a.contains("Capped at max risk per trade")));
}

#[test]
fn recommendation_records_each_adjustment() {
    let rec = engine().recommend_position(
        10_000.0,
        0.85,
        0.03,
        true,
        TradingMode::Conservative,
        0.55,
        100.0,
        100.0,
    );
    assert!(rec.adjustments.iter().any(|a| a.contains("High confidence")));
    assert!(rec.adjustments.iter().any(|a| a.contains("High volatility")));
    assert!(rec.adjustments.iter().any(|a| a.contains("Trending")));
    assert!(rec.adjustments.iter().any(|a| a.contains("Conservative mode")));
}

#[test]
fn low_confidence_halves_size() {
    let e = engine();
    let base = e.recommend_position(
        10_000.0,
        0.70,
        0.01,
        false,
        TradingMode::Balanced,
        0.60,
        100.0,
        100.0,
    );
    let halved = e.recommend_position(
        10_000.0,
        0.55,
        0.01,
        false,
        TradingMode::Balanced,
        0.60,
        100.0,
        100.0,
    );
    assert!(base.risk_amount > 0.0);
    assert_relative_eq!(halved.risk_amount, base.risk_amount * 0.5, epsilon = 1e-9);
}

#[test]
fn adaptive_stops_aggressive_low_vol_example() {
    // entry 1.1000, atr 0.0020, aggressive, low volatility:
    // stop = 0.0020 * 1.5 * 0.9 = 0.0027
    // target floored to 1.5 * stop = 0.00405
    let stops = engine().adaptive_stops(1.1000, 0.0020, TradingMode::Aggressive, 0.001, true);
    assert_relative_eq!(stops.stop_loss, 0.0027, epsilon = 1e-9);
    assert!(stops.take_profit >= 0.00405 - 1e-9);
    assert_relative_eq!(stops.stop_price, 1.1000 - 0.0027, epsilon = 1e-9);
}

#[test]
fn adaptive_stops_always_meet_min_risk_reward() {
    let e = engine();
    for mode in [
        TradingMode::Conservative,
        TradingMode::Balanced,
        TradingMode::Aggressive,
    ] {
        for vol in [0.001, 0.01, 0.05] {
            for is_long in [true, false] {
                let stops = e.adaptive_stops(1.2345, 0.0015, mode, vol, is_long);
                assert!(
                    stops.risk_reward_ratio >= 1.5 - 1e-9,
                    "RR {} below floor for {:?}/vol {}",
                    stops.risk_reward_ratio,
                    mode,
                    vol
                );
            }
        }
    }
}

#[test]
fn adaptive_stops_short_direction_mirrors_prices() {
    let stops = engine().adaptive_stops(1.1000, 0.0020, TradingMode::Conservative, 0.01, false);
    assert!(stops.stop_price > 1.1000);
    assert!(stops.target_price < 1.1000);
}

#[test]
fn correlation_rejects_tight_pairs() {
    let e = engine();
    assert!(!e.correlation_ok("EURUSD", ["GBPUSD"]));
    assert!(!e.correlation_ok("EURUSD", ["USDCHF"])); // strongly inverse
    assert!(e.correlation_ok("EURUSD", ["NZDUSD"]));
    assert!(e.correlation_ok("USDJPY", []));
}

#[test]
fn approve_confidence_boundary() {
    let e = engine();
    let rejected = e.approve(0.599, 2.0, 0.01, true);
    assert!(!rejected.approved);
    assert!(rejected.reasons[0].contains("Confidence"));

    let eligible = e.approve(0.6, 2.0, 0.01, true);
    assert!(eligible.approved);
}

#[test]
fn approve_accumulates_all_reasons() {
    let verdict = engine().approve(0.5, 1.0, 0.10, false);
    assert!(!verdict.approved);
    assert_eq!(verdict.reasons.len(), 4);
}

#[test]
fn approve_portfolio_cap() {
    let e = engine();
    assert!(!e.approve(0.8, 2.0, 0.07, true).approved);
    assert!(e.approve(0.8, 2.0, 0.05, true).approved);
}
