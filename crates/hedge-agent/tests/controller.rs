use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use approx::assert_relative_eq;
use async_trait::async_trait;
use broker_core::{
    BrokerClient, MarketQuote, OrderRequest, PaperBroker, Position, Prediction, PredictionSource,
    TradeDirection,
};
use chrono::Utc;
use hedge_agent::{AgentConfig, EngineState, StateStore, TradingController};
use rust_decimal::Decimal;

/// Oracle stub that replays a fixed script of predictions.
struct ScriptedOracle {
    predictions: Mutex<Vec<Prediction>>,
}

impl ScriptedOracle {
    fn new(predictions: Vec<Prediction>) -> Self {
        Self {
            predictions: Mutex::new(predictions),
        }
    }
}

#[async_trait]
impl PredictionSource for ScriptedOracle {
    async fn predictions(
        &self,
        _snapshot: &HashMap<String, MarketQuote>,
    ) -> Result<Vec<Prediction>> {
        Ok(self.predictions.lock().unwrap().clone())
    }
}

fn long_prediction(symbol: &str, price: f64, confidence: f64, atr: f64) -> Prediction {
    Prediction {
        symbol: symbol.to_string(),
        direction: TradeDirection::Long,
        current_price: price,
        predicted_price: price * 1.01,
        confidence,
        horizon_minutes: 60,
        atr: Some(atr),
    }
}

async fn make_controller(
    predictions: Vec<Prediction>,
) -> (Arc<TradingController>, Arc<PaperBroker>) {
    let broker = Arc::new(PaperBroker::new(100_000.0));
    broker.set_quote("EURUSD", 1.1000, 0.0).await;
    broker.set_quote("GBPUSD", 1.2650, 0.0).await;
    let oracle = Arc::new(ScriptedOracle::new(predictions));
    let store = StateStore::connect("sqlite::memory:").await.unwrap();
    let controller = Arc::new(TradingController::new(
        broker.clone(),
        oracle,
        AgentConfig::default(),
        store,
    ));
    (controller, broker)
}

// With no trade history the Kelly sizer falls back to the 2% flat cap:
// $2,000 risked over a 50-pip sizing stop is 4.0 lots.
const EXPECTED_LOTS: f64 = 4.0;

#[tokio::test]
async fn decision_cycle_opens_one_session_and_rejects_low_confidence() {
    let (controller, broker) = make_controller(vec![
        long_prediction("EURUSD", 1.1000, 0.80, 0.0020),
        long_prediction("GBPUSD", 1.2650, 0.50, 0.0020),
    ])
    .await;

    controller.decision_tick().await;

    assert_eq!(controller.sessions().len().await, 1);
    assert!(controller.sessions().contains("EURUSD").await);

    let positions = broker.open_positions().await.unwrap();
    assert_eq!(positions.len(), 1);
    assert_relative_eq!(positions[0].volume, EXPECTED_LOTS, epsilon = 1e-9);

    let metrics = controller.metrics_snapshot().await;
    assert_eq!(metrics.sessions_opened, 1);
    assert_eq!(metrics.trades_rejected, 1);
}

#[tokio::test]
async fn correlated_symbol_is_rejected_while_first_is_open() {
    // EURUSD/GBPUSD correlate at 0.85, above the 0.7 limit.
    let (controller, broker) = make_controller(vec![
        long_prediction("EURUSD", 1.1000, 0.80, 0.0020),
        long_prediction("GBPUSD", 1.2650, 0.80, 0.0020),
    ])
    .await;

    controller.decision_tick().await;

    assert_eq!(controller.sessions().len().await, 1);
    assert_eq!(broker.open_positions().await.unwrap().len(), 1);
    assert_eq!(controller.metrics_snapshot().await.trades_rejected, 1);
}

#[tokio::test]
async fn repeated_decision_ticks_do_not_duplicate_sessions() {
    let (controller, broker) =
        make_controller(vec![long_prediction("EURUSD", 1.1000, 0.80, 0.0020)]).await;

    controller.decision_tick().await;
    controller.decision_tick().await;
    controller.decision_tick().await;

    assert_eq!(controller.sessions().len().await, 1);
    let positions = broker.open_positions().await.unwrap();
    assert_eq!(positions.len(), 1);
    assert_relative_eq!(positions[0].volume, EXPECTED_LOTS, epsilon = 1e-9);
}

#[tokio::test]
async fn take_profit_closes_the_session() {
    // ATR 0.0020 in the low-volatility regime, balanced mode: stop 36 pips,
    // target widened to 54 pips by the 1.5 reward:risk floor.
    let (controller, broker) =
        make_controller(vec![long_prediction("EURUSD", 1.1000, 0.80, 0.0020)]).await;
    controller.decision_tick().await;

    broker.set_quote("EURUSD", 1.1060, 0.0).await;
    controller.monitoring_tick().await;

    assert!(controller.sessions().is_empty().await);
    assert!(broker.open_positions().await.unwrap().is_empty());

    // 60 pips x $10 x 4 lots
    let balance = broker.account_balance().await.unwrap();
    assert_relative_eq!(balance, 102_400.0, epsilon = 1e-6);

    let metrics = controller.metrics_snapshot().await;
    assert_eq!(metrics.total_trades, 1);
    assert_eq!(metrics.winning_trades, 1);
}

#[tokio::test]
async fn ratchet_stop_closes_after_retracement() {
    // ATR 0.0040: stop 72 pips, target 108 pips. At 1.1080 the ratchet has
    // locked 1.1048; the pullback to 1.1040 crosses it.
    let (controller, broker) =
        make_controller(vec![long_prediction("EURUSD", 1.1000, 0.80, 0.0040)]).await;
    controller.decision_tick().await;

    broker.set_quote("EURUSD", 1.1080, 0.0).await;
    controller.monitoring_tick().await;
    assert_eq!(controller.sessions().len().await, 1);

    broker.set_quote("EURUSD", 1.1040, 0.0).await;
    controller.monitoring_tick().await;

    assert!(controller.sessions().is_empty().await);
    // Closed 40 pips in profit: $1,600 on 4 lots.
    let balance = broker.account_balance().await.unwrap();
    assert_relative_eq!(balance, 101_600.0, epsilon = 1e-6);
    assert_eq!(controller.metrics_snapshot().await.winning_trades, 1);
}

#[tokio::test]
async fn max_drawdown_force_closes() {
    let (controller, broker) =
        make_controller(vec![long_prediction("EURUSD", 1.1000, 0.80, 0.0020)]).await;
    controller.decision_tick().await;

    // 5.45% adverse move, past the 5% drawdown limit.
    broker.set_quote("EURUSD", 1.0400, 0.0).await;
    controller.monitoring_tick().await;

    assert!(controller.sessions().is_empty().await);
    assert_eq!(controller.metrics_snapshot().await.losing_trades, 1);
}

#[tokio::test]
async fn session_past_time_limit_is_closed() {
    let (controller, broker) =
        make_controller(vec![long_prediction("EURUSD", 1.1000, 0.80, 0.0020)]).await;
    controller.decision_tick().await;

    controller
        .sessions()
        .with_entry("EURUSD", |entry| {
            entry.session.started_at = Utc::now() - chrono::Duration::hours(9);
        })
        .await;
    controller.monitoring_tick().await;

    assert!(controller.sessions().is_empty().await);
    assert!(broker.open_positions().await.unwrap().is_empty());
}

#[tokio::test]
async fn stop_proximity_triggers_counter_hedge_then_recovery_closes_both() {
    // Stop at 1.0964 (36 pips). At 1.0970 the remaining 6 pips are inside
    // the 20% proximity band, so a hedge fires: 4 x 1.5 x 1.2 = 7.2 lots
    // short (confidence 0.80 > 0.75).
    let (controller, broker) =
        make_controller(vec![long_prediction("EURUSD", 1.1000, 0.80, 0.0020)]).await;
    controller.decision_tick().await;

    broker.set_quote("EURUSD", 1.0970, 0.0).await;
    controller.monitoring_tick().await;

    let metrics = controller.metrics_snapshot().await;
    assert_eq!(metrics.hedges_triggered, 1);
    let positions = broker.open_positions().await.unwrap();
    assert_eq!(positions.len(), 2);
    let hedge_leg = positions
        .iter()
        .find(|p| p.direction == TradeDirection::Short)
        .unwrap();
    assert_relative_eq!(hedge_leg.volume, 7.2, epsilon = 1e-9);

    let entry = controller.sessions().get("EURUSD").await.unwrap();
    assert!(entry.session.has_hedge);

    // Further drop: original -$4,000, hedge +$5,040. The combined $1,040
    // beats half the $1,200 loss, so the planner closes both legs.
    broker.set_quote("EURUSD", 1.0900, 0.0).await;
    controller.monitoring_tick().await;

    assert!(controller.sessions().is_empty().await);
    assert!(broker.open_positions().await.unwrap().is_empty());
    let balance = broker.account_balance().await.unwrap();
    assert_relative_eq!(balance, 101_040.0, epsilon = 1e-6);
}

#[tokio::test]
async fn time_limit_applies_to_hedged_sessions() {
    let (controller, broker) =
        make_controller(vec![long_prediction("EURUSD", 1.1000, 0.80, 0.0020)]).await;
    controller.decision_tick().await;

    broker.set_quote("EURUSD", 1.0970, 0.0).await;
    controller.monitoring_tick().await;
    assert!(controller.sessions().get("EURUSD").await.unwrap().session.has_hedge);

    // A hedged pair past the session age limit is force-closed, not held
    // waiting on the leg-out planner.
    controller
        .sessions()
        .with_entry("EURUSD", |entry| {
            entry.session.started_at = Utc::now() - chrono::Duration::hours(9);
        })
        .await;
    controller.monitoring_tick().await;

    assert!(controller.sessions().is_empty().await);
    assert!(broker.open_positions().await.unwrap().is_empty());
    assert_eq!(controller.metrics_snapshot().await.total_trades, 1);
}

#[tokio::test]
async fn hedged_session_hedges_only_once() {
    let (controller, broker) =
        make_controller(vec![long_prediction("EURUSD", 1.1000, 0.80, 0.0020)]).await;
    controller.decision_tick().await;

    broker.set_quote("EURUSD", 1.0970, 0.0).await;
    controller.monitoring_tick().await;
    controller.monitoring_tick().await;

    assert_eq!(controller.metrics_snapshot().await.hedges_triggered, 1);
    // Still one long and one short leg.
    assert_eq!(broker.open_positions().await.unwrap().len(), 2);
}

#[tokio::test]
async fn stop_drains_open_sessions() {
    let (controller, broker) =
        make_controller(vec![long_prediction("EURUSD", 1.1000, 0.80, 0.0020)]).await;
    controller.decision_tick().await;
    assert_eq!(controller.sessions().len().await, 1);

    controller.stop().await;

    assert!(controller.sessions().is_empty().await);
    assert!(broker.open_positions().await.unwrap().is_empty());
    assert_eq!(controller.state(), EngineState::Idle);
}

#[tokio::test]
async fn stop_waits_for_running_cycles_before_draining() {
    let (controller, broker) =
        make_controller(vec![long_prediction("EURUSD", 1.1000, 0.80, 0.0020)]).await;

    controller.clone().start().await.unwrap();
    // The first decision tick fires immediately and opens the session.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(controller.sessions().len().await, 1);

    controller.stop().await;

    assert!(controller.sessions().is_empty().await);
    assert!(broker.open_positions().await.unwrap().is_empty());
    assert_eq!(controller.state(), EngineState::Idle);
}

#[tokio::test]
async fn start_is_a_no_op_when_broker_is_disconnected() {
    let (controller, broker) = make_controller(vec![]).await;
    broker.set_connected(false);

    controller.clone().start().await.unwrap();

    assert_eq!(controller.state(), EngineState::Idle);
}

#[tokio::test]
async fn start_is_a_no_op_when_strategy_is_disabled() {
    let broker = Arc::new(PaperBroker::new(100_000.0));
    let oracle = Arc::new(ScriptedOracle::new(vec![]));
    let store = StateStore::connect("sqlite::memory:").await.unwrap();
    let config = AgentConfig {
        strategy_active: false,
        ..AgentConfig::default()
    };
    let controller = Arc::new(TradingController::new(broker, oracle, config, store));

    controller.clone().start().await.unwrap();

    assert_eq!(controller.state(), EngineState::Idle);
}

/// Paper broker wrapper whose close path can be made to fail on demand.
struct FlakyCloseBroker {
    inner: PaperBroker,
    fail_close: AtomicBool,
}

#[async_trait]
impl BrokerClient for FlakyCloseBroker {
    async fn account_balance(&self) -> Result<f64> {
        self.inner.account_balance().await
    }

    async fn market_snapshot(&self) -> Result<HashMap<String, MarketQuote>> {
        self.inner.market_snapshot().await
    }

    async fn open_positions(&self) -> Result<Vec<Position>> {
        self.inner.open_positions().await
    }

    async fn submit_order(&self, order: OrderRequest) -> Result<bool> {
        self.inner.submit_order(order).await
    }

    async fn close_position(&self, symbol: &str) -> Result<bool> {
        if self.fail_close.load(Ordering::SeqCst) {
            anyhow::bail!("simulated close failure");
        }
        self.inner.close_position(symbol).await
    }

    async fn close_leg(
        &self,
        symbol: &str,
        direction: TradeDirection,
        volume: Option<Decimal>,
    ) -> Result<bool> {
        self.inner.close_leg(symbol, direction, volume).await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn broker_name(&self) -> &str {
        "flaky-paper"
    }
}

#[tokio::test]
async fn close_failure_keeps_session_for_retry() {
    let broker = Arc::new(FlakyCloseBroker {
        inner: PaperBroker::new(100_000.0),
        fail_close: AtomicBool::new(false),
    });
    broker.inner.set_quote("EURUSD", 1.1000, 0.0).await;
    let oracle = Arc::new(ScriptedOracle::new(vec![long_prediction(
        "EURUSD", 1.1000, 0.80, 0.0020,
    )]));
    let store = StateStore::connect("sqlite::memory:").await.unwrap();
    let controller = Arc::new(TradingController::new(
        broker.clone(),
        oracle,
        AgentConfig::default(),
        store,
    ));

    controller.decision_tick().await;
    broker.inner.set_quote("EURUSD", 1.1060, 0.0).await;
    broker.fail_close.store(true, Ordering::SeqCst);

    for _ in 0..3 {
        controller.monitoring_tick().await;
    }
    let entry = controller.sessions().get("EURUSD").await.unwrap();
    assert_eq!(entry.consecutive_close_failures, 3);
    assert_eq!(controller.metrics_snapshot().await.total_trades, 0);

    broker.fail_close.store(false, Ordering::SeqCst);
    controller.monitoring_tick().await;

    assert!(controller.sessions().is_empty().await);
    assert_eq!(controller.metrics_snapshot().await.total_trades, 1);
}
