use std::collections::HashMap;

use broker_core::TradeDirection;
use cantilever_stop::CantileverStop;
use chrono::{DateTime, Utc};
use hedge_recovery::CounterHedge;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Why a session was closed. Logged and written to trade history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TargetReached,
    TimeLimit,
    MaxDrawdown,
    RatchetStop,
    HedgeRecovered,
    SafetyStop,
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloseReason::TargetReached => "target reached",
            CloseReason::TimeLimit => "time limit",
            CloseReason::MaxDrawdown => "max drawdown",
            CloseReason::RatchetStop => "ratchet stop",
            CloseReason::HedgeRecovered => "hedge recovered",
            CloseReason::SafetyStop => "safety stop",
            CloseReason::Shutdown => "shutdown",
        };
        write!(f, "{}", s)
    }
}

/// One live trade from entry to close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSession {
    pub symbol: String,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub target_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub lot_size: f64,
    pub risk_amount: f64,
    pub entry_confidence: f64,
    pub started_at: DateTime<Utc>,
    pub current_price: f64,
    pub current_profit: f64,
    /// Set once a counter-hedge has been placed for this session; never
    /// cleared, so a session hedges at most once.
    pub has_hedge: bool,
    pub hedge_activated_at: Option<DateTime<Utc>>,
}

/// A session plus the decision state the monitoring cycle keeps alongside it.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub session: TradingSession,
    pub ratchet: Option<CantileverStop>,
    pub hedge: Option<CounterHedge>,
    pub consecutive_close_failures: u32,
}

impl SessionEntry {
    pub fn new(session: TradingSession, ratchet: Option<CantileverStop>) -> Self {
        Self {
            session,
            ratchet,
            hedge: None,
            consecutive_close_failures: 0,
        }
    }
}

/// All open sessions, keyed by symbol. At most one session per symbol; the
/// counter-hedge lives inside its session's entry rather than as a second
/// session.
#[derive(Default)]
pub struct SessionBook {
    inner: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, symbol: &str) -> bool {
        self.inner.lock().await.contains_key(symbol)
    }

    /// Insert unless the symbol already has a session. Returns false when the
    /// entry was rejected, so a racing duplicate can be detected and unwound.
    pub async fn insert_if_absent(&self, entry: SessionEntry) -> bool {
        let mut book = self.inner.lock().await;
        let symbol = entry.session.symbol.clone();
        if book.contains_key(&symbol) {
            return false;
        }
        book.insert(symbol, entry);
        true
    }

    pub async fn remove(&self, symbol: &str) -> Option<SessionEntry> {
        self.inner.lock().await.remove(symbol)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn symbols(&self) -> Vec<String> {
        self.inner.lock().await.keys().cloned().collect()
    }

    /// Dollars at risk across all open sessions.
    pub async fn total_risk(&self) -> f64 {
        self.inner
            .lock()
            .await
            .values()
            .map(|e| e.session.risk_amount)
            .sum()
    }

    /// Run `f` against the entry for `symbol` while holding the book lock.
    /// The closure must not block; all broker I/O happens outside it.
    pub async fn with_entry<F, R>(&self, symbol: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut SessionEntry) -> R,
    {
        self.inner.lock().await.get_mut(symbol).map(f)
    }

    pub async fn get(&self, symbol: &str) -> Option<SessionEntry> {
        self.inner.lock().await.get(symbol).cloned()
    }
}
