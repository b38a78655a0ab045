use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use broker_core::{
    pip_profit, BrokerClient, Module, OrderRequest, Position, PredictionSource, StrategyConfig,
    TradeDirection,
};
use cantilever_stop::{CantileverStop, RatchetState};
use chrono::Utc;
use hedge_recovery::planner::plan_leg_out;
use hedge_recovery::{
    trigger_counter_hedge, CounterHedge, HedgeStatus, Leg, LegOutAction, LegOutPlan, LegOutStep,
    LegOutStrategy,
};
use risk_engine::RiskEngine;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::config::AgentConfig;
use crate::metrics::EngineMetrics;
use crate::session::{CloseReason, SessionBook, SessionEntry, TradingSession};
use crate::state_store::{Counters, StateStore, TradeRecord};

const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const ORDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Consecutive close failures before a session is flagged as stuck. It keeps
/// retrying on every monitoring tick either way.
const STUCK_CLOSE_WARN: u32 = 3;

/// Multiple of the recovered loss at which a held hedged pair is abandoned.
const HEDGE_SAFETY_MULTIPLE: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Idle = 0,
    Analyzing = 1,
    Executing = 2,
    Monitoring = 3,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Analyzing,
            2 => EngineState::Executing,
            3 => EngineState::Monitoring,
            _ => EngineState::Idle,
        }
    }
}

/// What the monitoring cycle decided for one session. Computed under the
/// book lock, executed after it is released.
enum SessionAction {
    Keep,
    Close(CloseReason),
    TriggerHedge(CounterHedge),
    LegOut {
        plan: LegOutPlan,
        hedge: CounterHedge,
        combined: f64,
    },
}

/// The decision engine. Two periodic cycles run against the broker: a
/// decision cycle that opens new sessions from oracle predictions, and a
/// faster monitoring cycle that manages the sessions already open.
pub struct TradingController {
    broker: Arc<dyn BrokerClient>,
    oracle: Arc<dyn PredictionSource>,
    risk: RiskEngine,
    config: AgentConfig,
    strategy: StrategyConfig,
    sessions: SessionBook,
    store: StateStore,
    metrics: Mutex<EngineMetrics>,
    state: AtomicU8,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TradingController {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        oracle: Arc<dyn PredictionSource>,
        config: AgentConfig,
        store: StateStore,
    ) -> Self {
        let risk = RiskEngine::new(config.risk());
        let strategy = config.strategy();
        Self {
            broker,
            oracle,
            risk,
            config,
            strategy,
            sessions: SessionBook::new(),
            store,
            metrics: Mutex::new(EngineMetrics::default()),
            state: AtomicU8::new(EngineState::Idle as u8),
            shutdown: watch::channel(false).0,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn sessions(&self) -> &SessionBook {
        &self.sessions
    }

    pub async fn metrics_snapshot(&self) -> EngineMetrics {
        self.metrics.lock().await.clone()
    }

    /// Seed trade counters from a previous run so Kelly sizing starts from
    /// real history instead of the flat-cap fallback.
    pub async fn restore_counters(&self, counters: &Counters) {
        self.metrics.lock().await.restore(counters);
    }

    /// Spawn both periodic cycles. A disabled strategy or a disconnected
    /// broker makes this a logged no-op; nothing is spawned.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        if !self.strategy.is_active() {
            tracing::warn!("Strategy disabled; controller not started");
            return Ok(());
        }
        if !self.broker.is_connected() {
            tracing::warn!(
                "Broker {} not connected; controller not started",
                self.broker.broker_name()
            );
            return Ok(());
        }

        self.set_state(EngineState::Analyzing);
        tracing::info!(
            "Controller started: {:?} mode on {} broker, decision every {}s, monitoring every {}s",
            self.config.trading_mode,
            self.broker.broker_name(),
            self.config.decision_interval_seconds,
            self.config.monitoring_interval_seconds,
        );

        let controller = Arc::clone(&self);
        let mut shutdown = self.shutdown.subscribe();
        let decision = tokio::spawn(async move {
            let mut ticker =
                interval(Duration::from_secs(controller.config.decision_interval_seconds));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => controller.decision_tick().await,
                    _ = shutdown.changed() => break,
                }
            }
        });

        let controller = Arc::clone(&self);
        let mut shutdown = self.shutdown.subscribe();
        let monitoring = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(
                controller.config.monitoring_interval_seconds,
            ));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => controller.monitoring_tick().await,
                    _ = shutdown.changed() => break,
                }
            }
        });

        self.tasks.lock().await.extend([decision, monitoring]);
        Ok(())
    }

    /// Stop the cycles and drain every open session. An in-flight tick is
    /// allowed to finish before the drain so a just-filled order is never
    /// orphaned at the broker. Close failures are logged and skipped;
    /// shutdown never hangs on a stuck symbol.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.lock().await.drain(..) {
            if task.await.is_err() {
                tracing::warn!("Cycle task ended abnormally");
            }
        }

        let symbols = self.sessions.symbols().await;
        if !symbols.is_empty() {
            tracing::info!("Stopping: closing {} open session(s)", symbols.len());
        }
        for symbol in symbols {
            self.close_session(&symbol, CloseReason::Shutdown).await;
        }

        self.set_state(EngineState::Idle);
        self.metrics.lock().await.log_summary();
    }

    /// One decision cycle: snapshot the market, fetch predictions, and open
    /// a session for every candidate that clears the risk gates. Any broker
    /// or oracle failure skips the cycle; the next tick retries.
    pub async fn decision_tick(&self) {
        let started = Instant::now();

        let snapshot = match timeout(QUERY_TIMEOUT, self.broker.market_snapshot()).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                tracing::warn!("Market snapshot failed: {:#}", e);
                return;
            }
            Err(_) => {
                tracing::warn!("Market snapshot timed out");
                return;
            }
        };
        if snapshot.is_empty() {
            tracing::debug!("Empty market snapshot; skipping decision cycle");
            self.finish_decision(started).await;
            return;
        }

        let predictions = match timeout(QUERY_TIMEOUT, self.oracle.predictions(&snapshot)).await {
            Ok(Ok(predictions)) => predictions,
            Ok(Err(e)) => {
                tracing::warn!("Prediction fetch failed: {:#}", e);
                return;
            }
            Err(_) => {
                tracing::warn!("Prediction fetch timed out");
                return;
            }
        };

        let balance = match timeout(QUERY_TIMEOUT, self.broker.account_balance()).await {
            Ok(Ok(balance)) => balance,
            Ok(Err(e)) => {
                tracing::warn!("Balance query failed: {:#}", e);
                return;
            }
            Err(_) => {
                tracing::warn!("Balance query timed out");
                return;
            }
        };

        let (win_rate, avg_win, avg_loss) = {
            let metrics = self.metrics.lock().await;
            (metrics.win_rate(), metrics.avg_win(), metrics.avg_loss())
        };
        let mut open_symbols = self.sessions.symbols().await;
        let mut open_risk = self.sessions.total_risk().await;

        for prediction in predictions {
            if open_symbols.iter().any(|s| s == &prediction.symbol) {
                continue;
            }

            let threshold = self.config.confidence_threshold();
            if prediction.confidence < threshold {
                tracing::warn!(
                    "Rejected {}: confidence {:.2} below threshold {:.2}",
                    prediction.symbol,
                    prediction.confidence,
                    threshold
                );
                self.metrics.lock().await.trades_rejected += 1;
                continue;
            }

            let atr = prediction
                .atr
                .unwrap_or(prediction.current_price * 0.005);
            let volatility = atr / prediction.current_price;
            let is_long = prediction.direction == TradeDirection::Long;
            let stops = self.risk.adaptive_stops(
                prediction.current_price,
                atr,
                self.config.trading_mode,
                volatility,
                is_long,
            );

            let correlation_ok = self
                .risk
                .correlation_ok(&prediction.symbol, open_symbols.iter().map(String::as_str));
            let portfolio_risk = if balance > 0.0 { open_risk / balance } else { 1.0 };
            let verdict = self.risk.approve(
                prediction.confidence,
                stops.risk_reward_ratio,
                portfolio_risk,
                correlation_ok,
            );
            if !verdict.approved {
                tracing::warn!(
                    "Rejected {}: {}",
                    prediction.symbol,
                    verdict.reasons.join("; ")
                );
                self.metrics.lock().await.trades_rejected += 1;
                continue;
            }

            let trending = snapshot
                .get(&prediction.symbol)
                .map(|q| q.change_percent.abs() > 1.0)
                .unwrap_or(false);
            let recommendation = self.risk.recommend_position(
                balance,
                prediction.confidence,
                volatility,
                trending,
                self.config.trading_mode,
                win_rate,
                avg_win,
                avg_loss,
            );

            let lot_size = (recommendation.lot_size * 100.0).round() / 100.0;
            let Some(volume) = Decimal::from_f64(lot_size) else {
                continue;
            };
            if lot_size < 0.01 {
                tracing::warn!(
                    "Skipping {}: recommended {:.4} lots is below broker minimum",
                    prediction.symbol,
                    recommendation.lot_size
                );
                continue;
            }

            let order = match prediction.direction {
                TradeDirection::Long => OrderRequest::buy(prediction.symbol.clone(), volume),
                TradeDirection::Short => OrderRequest::sell(prediction.symbol.clone(), volume),
            }
            .with_stops(stops.stop_price, stops.target_price);

            self.set_state(EngineState::Executing);
            let submitted = timeout(ORDER_TIMEOUT, self.broker.submit_order(order)).await;
            self.set_state(EngineState::Analyzing);
            match submitted {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    tracing::warn!("Order for {} declined by broker", prediction.symbol);
                    continue;
                }
                Ok(Err(e)) => {
                    tracing::warn!("Order for {} failed: {:#}", prediction.symbol, e);
                    continue;
                }
                Err(_) => {
                    tracing::warn!("Order for {} timed out", prediction.symbol);
                    continue;
                }
            }

            let ratchet = self
                .strategy
                .modules
                .contains(Module::ProfitRatchet)
                .then(|| {
                    CantileverStop::arm(
                        prediction.symbol.clone(),
                        prediction.current_price,
                        prediction.direction,
                        self.strategy.cantilever_step_percent,
                        self.strategy.cantilever_lock_percent,
                    )
                });

            let session = TradingSession {
                symbol: prediction.symbol.clone(),
                direction: prediction.direction,
                entry_price: prediction.current_price,
                target_price: prediction.predicted_price,
                stop_loss: stops.stop_price,
                take_profit: stops.target_price,
                lot_size,
                risk_amount: recommendation.risk_amount,
                entry_confidence: prediction.confidence,
                started_at: Utc::now(),
                current_price: prediction.current_price,
                current_profit: 0.0,
                has_hedge: false,
                hedge_activated_at: None,
            };

            tracing::info!(
                "Opened {} {} {:.2} lots @ {:.5} (stop {:.5}, target {:.5}, risking ${:.2})",
                session.symbol,
                session.direction,
                session.lot_size,
                session.entry_price,
                session.stop_loss,
                session.take_profit,
                session.risk_amount,
            );
            for adjustment in &recommendation.adjustments {
                tracing::debug!("  sizing: {}", adjustment);
            }

            if self
                .sessions
                .insert_if_absent(SessionEntry::new(session, ratchet))
                .await
            {
                open_risk += recommendation.risk_amount;
                open_symbols.push(prediction.symbol.clone());
                self.metrics.lock().await.sessions_opened += 1;
            } else {
                // Lost a race with another cycle: unwind the duplicate fill.
                tracing::warn!(
                    "Session for {} appeared mid-cycle; closing duplicate order",
                    prediction.symbol
                );
                let _ = self
                    .broker
                    .close_leg(&prediction.symbol, prediction.direction, Some(volume))
                    .await;
            }
        }

        self.finish_decision(started).await;
    }

    /// One monitoring cycle: refresh every session from the broker's open
    /// positions, enforce exits, trigger hedges, and advance leg-out plans.
    pub async fn monitoring_tick(&self) {
        if self.sessions.is_empty().await {
            return;
        }
        let started = Instant::now();
        self.set_state(EngineState::Monitoring);

        let positions = match timeout(QUERY_TIMEOUT, self.broker.open_positions()).await {
            Ok(Ok(positions)) => positions,
            Ok(Err(e)) => {
                tracing::warn!("Open positions query failed: {:#}", e);
                self.set_state(EngineState::Analyzing);
                return;
            }
            Err(_) => {
                tracing::warn!("Open positions query timed out");
                self.set_state(EngineState::Analyzing);
                return;
            }
        };

        for position in &positions {
            let action = self
                .sessions
                .with_entry(&position.symbol, |entry| {
                    evaluate_session(entry, position, &self.strategy, &self.config)
                })
                .await;

            match action {
                None | Some(SessionAction::Keep) => {}
                Some(SessionAction::Close(reason)) => {
                    self.close_session(&position.symbol, reason).await;
                }
                Some(SessionAction::TriggerHedge(hedge)) => {
                    self.place_hedge(hedge).await;
                }
                Some(SessionAction::LegOut {
                    plan,
                    hedge,
                    combined,
                }) => {
                    self.execute_leg_out(&position.symbol, plan, hedge, combined)
                        .await;
                }
            }
        }

        self.set_state(EngineState::Analyzing);
        let mut metrics = self.metrics.lock().await;
        metrics.monitoring_cycles += 1;
        metrics.last_monitoring_ms = started.elapsed().as_millis() as u64;
    }

    async fn finish_decision(&self, started: Instant) {
        let mut metrics = self.metrics.lock().await;
        metrics.decision_cycles += 1;
        metrics.last_decision_ms = started.elapsed().as_millis() as u64;
        if metrics.decision_cycles % 10 == 0 {
            metrics.log_summary();
        }
    }

    async fn place_hedge(&self, hedge: CounterHedge) {
        let symbol = hedge.symbol.clone();
        let rounded = (hedge.hedge_volume * 100.0).round() / 100.0;
        let Some(volume) = Decimal::from_f64(rounded) else {
            return;
        };

        // No stops on the hedge leg; the leg-out planner manages the pair.
        let order = match hedge.hedge_direction {
            TradeDirection::Long => OrderRequest::buy(symbol.clone(), volume),
            TradeDirection::Short => OrderRequest::sell(symbol.clone(), volume),
        };

        self.set_state(EngineState::Executing);
        let result = timeout(ORDER_TIMEOUT, self.broker.submit_order(order)).await;
        self.set_state(EngineState::Monitoring);

        match result {
            Ok(Ok(true)) => {
                tracing::info!(
                    "Hedge placed on {}: {} {:.2} lots, recovering ${:.2}",
                    symbol,
                    hedge.hedge_direction,
                    hedge.hedge_volume,
                    hedge.total_loss_to_recover,
                );
                self.sessions
                    .with_entry(&symbol, |entry| {
                        entry.session.has_hedge = true;
                        entry.session.hedge_activated_at = Some(hedge.activated_at);
                        entry.hedge = Some(hedge);
                    })
                    .await;
                self.metrics.lock().await.hedges_triggered += 1;
            }
            Ok(Ok(false)) => {
                tracing::warn!("Hedge order on {} declined; session stays unhedged", symbol)
            }
            Ok(Err(e)) => tracing::warn!("Hedge order on {} failed: {:#}", symbol, e),
            Err(_) => tracing::warn!("Hedge order on {} timed out", symbol),
        }
    }

    async fn execute_leg_out(
        &self,
        symbol: &str,
        plan: LegOutPlan,
        hedge: CounterHedge,
        combined: f64,
    ) {
        tracing::debug!(
            "Leg-out {}: {:?} (confidence {:.2}, combined ${:.2})",
            symbol,
            plan.strategy,
            plan.confidence,
            combined,
        );

        match plan.strategy {
            LegOutStrategy::CloseBothImmediately => {
                self.close_session(symbol, CloseReason::HedgeRecovered).await;
            }
            LegOutStrategy::BreakEvenExit => {
                if combined >= 0.0 {
                    self.close_session(symbol, CloseReason::HedgeRecovered).await;
                }
            }
            LegOutStrategy::CloseWeakerRideStronger => {
                let Some(LegOutStep {
                    action: LegOutAction::CloseLeg(weaker),
                    ..
                }) = plan.steps.first()
                else {
                    return;
                };
                self.ride_stronger_leg(symbol, *weaker, &hedge).await;
            }
            LegOutStrategy::PartialCloseAndTrail => {
                if hedge.status == HedgeStatus::Active {
                    self.partial_close_pair(symbol, &hedge).await;
                }
            }
            LegOutStrategy::HoldForReversal => {
                if combined <= -HEDGE_SAFETY_MULTIPLE * hedge.total_loss_to_recover {
                    tracing::warn!(
                        "Hedged pair {} hit its safety stop (combined ${:.2})",
                        symbol,
                        combined
                    );
                    self.close_session(symbol, CloseReason::SafetyStop).await;
                }
            }
        }
    }

    /// Close the weaker leg and convert the session to ride the survivor.
    async fn ride_stronger_leg(&self, symbol: &str, weaker: Leg, hedge: &CounterHedge) {
        let (close_direction, keep_hedge_leg) = match weaker {
            Leg::Hedge => (hedge.hedge_direction, false),
            Leg::Original => (hedge.original_direction, true),
        };

        match timeout(ORDER_TIMEOUT, self.broker.close_leg(symbol, close_direction, None)).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                tracing::warn!("Weaker leg close on {} declined", symbol);
                return;
            }
            Ok(Err(e)) => {
                tracing::warn!("Weaker leg close on {} failed: {:#}", symbol, e);
                return;
            }
            Err(_) => {
                tracing::warn!("Weaker leg close on {} timed out", symbol);
                return;
            }
        }

        tracing::info!(
            "Legged out of {} {}; riding the {} leg",
            symbol,
            close_direction,
            if keep_hedge_leg { "hedge" } else { "original" },
        );

        let hedge_direction = hedge.hedge_direction;
        let hedge_entry = hedge.hedge_entry_price;
        let hedge_volume = hedge.hedge_volume;
        let hedge_target = hedge.hedge_target_price;
        self.sessions
            .with_entry(symbol, |entry| {
                entry.hedge = None;
                if keep_hedge_leg {
                    entry.session.direction = hedge_direction;
                    entry.session.entry_price = hedge_entry;
                    entry.session.lot_size = hedge_volume;
                    entry.session.take_profit = hedge_target;
                    entry.session.target_price = hedge_target;
                }
                if entry.ratchet.is_none() || keep_hedge_leg {
                    let ratchet = CantileverStop::arm(
                        entry.session.symbol.clone(),
                        entry.session.entry_price,
                        entry.session.direction,
                        self.strategy.cantilever_step_percent,
                        self.strategy.cantilever_lock_percent,
                    );
                    entry.session.stop_loss = ratchet.current_stop;
                    entry.ratchet = Some(ratchet);
                }
            })
            .await;
    }

    /// Bank half of both legs; the remainder keeps trailing.
    async fn partial_close_pair(&self, symbol: &str, hedge: &CounterHedge) {
        let Some(entry) = self.sessions.get(symbol).await else {
            return;
        };
        let original_half =
            Decimal::from_f64((entry.session.lot_size * 0.5 * 100.0).round() / 100.0);
        let hedge_half = Decimal::from_f64((hedge.hedge_volume * 0.5 * 100.0).round() / 100.0);
        let (Some(original_half), Some(hedge_half)) = (original_half, hedge_half) else {
            return;
        };

        let first = timeout(
            ORDER_TIMEOUT,
            self.broker
                .close_leg(symbol, entry.session.direction, Some(original_half)),
        )
        .await;
        let second = timeout(
            ORDER_TIMEOUT,
            self.broker
                .close_leg(symbol, hedge.hedge_direction, Some(hedge_half)),
        )
        .await;

        if !(matches!(first, Ok(Ok(true))) && matches!(second, Ok(Ok(true)))) {
            tracing::warn!(
                "Partial close on {} incomplete; retrying from live volumes next tick",
                symbol
            );
            return;
        }

        self.sessions
            .with_entry(symbol, |entry| {
                entry.session.lot_size *= 0.5;
                if let Some(h) = entry.hedge.as_mut() {
                    h.hedge_volume *= 0.5;
                    h.status = HedgeStatus::PartiallyClosed;
                }
            })
            .await;
        tracing::info!("Banked half of hedged pair {}", symbol);
    }

    /// Close every leg on the symbol and retire the session. On failure the
    /// session stays in the book and is retried next tick.
    pub async fn close_session(&self, symbol: &str, reason: CloseReason) {
        if !self.sessions.contains(symbol).await {
            return;
        }

        let closed = match timeout(ORDER_TIMEOUT, self.broker.close_position(symbol)).await {
            Ok(Ok(closed)) => closed,
            Ok(Err(e)) => {
                tracing::warn!("Close {} failed: {:#}", symbol, e);
                false
            }
            Err(_) => {
                tracing::warn!("Close {} timed out", symbol);
                false
            }
        };

        if !closed {
            let failures = self
                .sessions
                .with_entry(symbol, |entry| {
                    entry.consecutive_close_failures += 1;
                    entry.consecutive_close_failures
                })
                .await
                .unwrap_or(0);
            if failures >= STUCK_CLOSE_WARN {
                tracing::warn!(
                    "Session {} failed to close {} times in a row; still retrying every tick",
                    symbol,
                    failures
                );
            }
            return;
        }

        let Some(entry) = self.sessions.remove(symbol).await else {
            return;
        };
        let session = entry.session;

        let mut profit = session.current_profit;
        if let Some(h) = &entry.hedge {
            profit += pip_profit(
                h.hedge_direction,
                h.hedge_entry_price,
                session.current_price,
                h.hedge_volume,
            );
        }
        let duration = (Utc::now() - session.started_at).num_minutes();

        tracing::info!(
            "Closed {} ({}): {} {:.2} lots, P/L ${:.2} after {}m",
            symbol,
            reason,
            session.direction,
            session.lot_size,
            profit,
            duration,
        );

        let counters = {
            let mut metrics = self.metrics.lock().await;
            metrics.record_trade(profit);
            metrics.counters()
        };

        let record = TradeRecord {
            symbol: symbol.to_string(),
            direction: session.direction.to_string(),
            entry_price: session.entry_price,
            exit_price: session.current_price,
            profit,
            duration_minutes: duration,
            confidence: session.entry_confidence,
            close_reason: reason.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.store.record_trade(&record).await {
            tracing::warn!("Failed to persist trade for {}: {:#}", symbol, e);
        }
        if let Err(e) = self.store.save_counters(&counters).await {
            tracing::warn!("Failed to persist counters: {:#}", e);
        }
    }
}

/// Per-session decision, run under the book lock. Pure; no broker I/O.
fn evaluate_session(
    entry: &mut SessionEntry,
    position: &Position,
    strategy: &StrategyConfig,
    config: &AgentConfig,
) -> SessionAction {
    if position.direction != entry.session.direction {
        // The hedge leg; the pair is managed from the original leg's entry.
        return SessionAction::Keep;
    }

    let price = position.current_price;
    entry.session.current_price = price;
    entry.session.current_profit = position.profit_loss;

    // Hard exits apply to hedged and unhedged sessions alike.
    let sign = entry.session.direction.sign();
    let age = Utc::now() - entry.session.started_at;
    if age > chrono::Duration::hours(config.max_session_hours) {
        return SessionAction::Close(CloseReason::TimeLimit);
    }
    let adverse = (entry.session.entry_price - price) * sign / entry.session.entry_price;
    if adverse > config.max_drawdown_percent {
        return SessionAction::Close(CloseReason::MaxDrawdown);
    }

    // A hedged session is otherwise governed by the leg-out planner.
    if let Some(hedge) = entry.hedge.clone() {
        let volatility =
            ((price - entry.session.entry_price) / entry.session.entry_price).abs();
        let plan = plan_leg_out(
            position,
            &hedge,
            price,
            entry.session.entry_confidence,
            volatility,
        );
        let combined = position.profit_loss
            + pip_profit(
                hedge.hedge_direction,
                hedge.hedge_entry_price,
                price,
                hedge.hedge_volume,
            );
        return SessionAction::LegOut {
            plan,
            hedge,
            combined,
        };
    }

    if let Some(ratchet) = entry.ratchet.as_mut() {
        if let Some(stop) = ratchet.update(price) {
            entry.session.stop_loss = stop;
        }
        if ratchet.state == RatchetState::Stepping && ratchet.is_hit(price) {
            return SessionAction::Close(CloseReason::RatchetStop);
        }
    }

    if (price - entry.session.take_profit) * sign >= 0.0 {
        return SessionAction::Close(CloseReason::TargetReached);
    }

    // Hedge when a losing session is about to hit its stop.
    if strategy.modules.contains(Module::HedgeRecovery)
        && strategy.auto_hedge_enabled
        && !entry.session.has_hedge
        && position.profit_loss < 0.0
    {
        let initial = (entry.session.entry_price - entry.session.stop_loss).abs();
        let remaining = (price - entry.session.stop_loss) * sign;
        if initial > 0.0 && remaining < config.hedge_proximity_percent * initial {
            if let Some(hedge) =
                trigger_counter_hedge(position, strategy, entry.session.entry_confidence)
            {
                return SessionAction::TriggerHedge(hedge);
            }
        }
    }

    SessionAction::Keep
}
