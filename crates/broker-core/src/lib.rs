use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod config;
pub mod paper;

pub use config::{Module, ModuleSet, StrategyConfig};
pub use paper::PaperBroker;

// ---------------------------------------------------------------------------
// Unified trading types (broker-agnostic)
// ---------------------------------------------------------------------------

/// Standard FX pip size used for P&L conversion.
pub const PIP_SIZE: f64 = 0.0001;

/// Dollar value of one pip per standard lot.
pub const PIP_VALUE_PER_LOT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Long,
    Short,
}

impl TradeDirection {
    pub fn opposite(self) -> Self {
        match self {
            TradeDirection::Long => TradeDirection::Short,
            TradeDirection::Short => TradeDirection::Long,
        }
    }

    /// +1.0 for long, -1.0 for short. Multiplied into price deltas so
    /// favorable moves are always positive.
    pub fn sign(self) -> f64 {
        match self {
            TradeDirection::Long => 1.0,
            TradeDirection::Short => -1.0,
        }
    }
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeDirection::Long => write!(f, "long"),
            TradeDirection::Short => write!(f, "short"),
        }
    }
}

/// Signed P&L in dollars for a position of `volume` lots between two prices.
pub fn pip_profit(direction: TradeDirection, entry: f64, current: f64, volume: f64) -> f64 {
    (current - entry) * direction.sign() / PIP_SIZE * PIP_VALUE_PER_LOT * volume
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketQuote {
    pub price: f64,
    pub change_percent: f64,
}

/// One open leg on the brokerage account. Hedged accounts may report two
/// entries for the same symbol (opposite directions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub current_price: f64,
    pub volume: f64,
    pub profit_loss: f64,
}

/// An upstream market prediction. How these are produced is opaque to the
/// engine; the oracle is just another collaborator behind a trait.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub symbol: String,
    pub direction: TradeDirection,
    pub current_price: f64,
    pub predicted_price: f64,
    pub confidence: f64,
    pub horizon_minutes: i64,
    /// Average true range at prediction time, when the oracle provides it.
    pub atr: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl From<TradeDirection> for OrderSide {
    fn from(direction: TradeDirection) -> Self {
        match direction {
            TradeDirection::Long => OrderSide::Buy,
            TradeDirection::Short => OrderSide::Sell,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub volume: Decimal,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl OrderRequest {
    pub fn buy(symbol: impl Into<String>, volume: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side: OrderSide::Buy,
            volume,
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn sell(symbol: impl Into<String>, volume: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side: OrderSide::Sell,
            volume,
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn with_stops(mut self, stop_loss: f64, take_profit: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self.take_profit = Some(take_profit);
        self
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Current account balance in dollars.
    async fn account_balance(&self) -> Result<f64>;

    /// Latest quote for every tracked symbol. May be empty outside trading
    /// hours; callers skip the cycle in that case.
    async fn market_snapshot(&self) -> Result<HashMap<String, MarketQuote>>;

    /// All open legs, one entry per (symbol, direction).
    async fn open_positions(&self) -> Result<Vec<Position>>;

    /// Submit a market order. `Ok(false)` means the broker declined it.
    async fn submit_order(&self, order: OrderRequest) -> Result<bool>;

    /// Close every leg on the symbol.
    async fn close_position(&self, symbol: &str) -> Result<bool>;

    /// Close one direction's exposure on the symbol, optionally only part
    /// of it. Needed to leg out of a hedged pair.
    async fn close_leg(
        &self,
        symbol: &str,
        direction: TradeDirection,
        volume: Option<Decimal>,
    ) -> Result<bool>;

    fn is_connected(&self) -> bool;

    /// Whether this is a paper/simulated account
    fn is_paper(&self) -> bool;

    /// Broker name for logging
    fn broker_name(&self) -> &str;
}

#[async_trait]
pub trait PredictionSource: Send + Sync {
    /// Predictions for the symbols in the snapshot. An empty vec is a valid
    /// answer (no tradable signal this cycle).
    async fn predictions(
        &self,
        snapshot: &HashMap<String, MarketQuote>,
    ) -> Result<Vec<Prediction>>;
}
