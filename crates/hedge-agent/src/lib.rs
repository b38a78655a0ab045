//! Semi-autonomous trading decision engine.
//!
//! The controller runs two periodic cycles against a broker: a decision
//! cycle that turns oracle predictions into risk-approved sessions, and a
//! monitoring cycle that ratchets stops, triggers counter-hedges, and
//! unwinds hedged pairs.

pub mod config;
pub mod controller;
pub mod metrics;
pub mod oracle;
pub mod session;
pub mod state_store;

pub use config::AgentConfig;
pub use controller::{EngineState, TradingController};
pub use metrics::EngineMetrics;
pub use oracle::PredictionClient;
pub use session::{CloseReason, SessionBook, SessionEntry, TradingSession};
pub use state_store::{Counters, StateStore, TradeRecord};
