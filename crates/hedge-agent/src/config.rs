use std::env;

use anyhow::{bail, Context, Result};
use broker_core::{Module, ModuleSet, StrategyConfig};
use risk_engine::{RiskConfig, TradingMode};
use serde::{Deserialize, Serialize};

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}='{}': {}", key, raw, e)),
        Err(_) => Ok(default),
    }
}

fn parse_mode(raw: &str) -> Result<TradingMode> {
    match raw.trim().to_lowercase().as_str() {
        "conservative" => Ok(TradingMode::Conservative),
        "balanced" => Ok(TradingMode::Balanced),
        "aggressive" => Ok(TradingMode::Aggressive),
        other => bail!("unknown trading mode '{}'", other),
    }
}

fn parse_modules(raw: &str) -> Result<ModuleSet> {
    let mut set = ModuleSet::none();
    for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let module: Module = part.parse()?;
        set = set.with(module);
    }
    Ok(set)
}

/// Symbols the paper broker is seeded with, as `SYMBOL:PRICE` pairs.
fn parse_watchlist(raw: &str) -> Result<Vec<(String, f64)>> {
    let mut out = Vec::new();
    for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (symbol, price) = part
            .trim()
            .split_once(':')
            .with_context(|| format!("watchlist entry '{}' is not SYMBOL:PRICE", part))?;
        let price: f64 = price
            .parse()
            .with_context(|| format!("bad reference price in '{}'", part))?;
        out.push((symbol.to_uppercase(), price));
    }
    Ok(out)
}

/// Full engine configuration, assembled from the environment at startup and
/// treated as read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub decision_interval_seconds: u64,
    pub monitoring_interval_seconds: u64,
    /// Sessions older than this are force-closed.
    pub max_session_hours: i64,
    /// Adverse move (fraction of entry) that force-closes a session.
    pub max_drawdown_percent: f64,
    /// Hedge trigger: remaining distance to the stop, as a fraction of the
    /// initial entry-to-stop distance.
    pub hedge_proximity_percent: f64,
    pub trading_mode: TradingMode,
    pub max_risk_per_trade: f64,
    pub kelly_fraction: f64,
    pub max_portfolio_risk: f64,
    pub strategy_active: bool,
    pub risk_scale: f64,
    pub cantilever_step_percent: f64,
    pub cantilever_lock_percent: f64,
    pub auto_hedge_enabled: bool,
    pub hedge_multiplier: f64,
    pub modules: ModuleSet,
    pub oracle_url: String,
    pub database_url: String,
    pub starting_balance: f64,
    pub watchlist: Vec<(String, f64)>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            decision_interval_seconds: 30,
            monitoring_interval_seconds: 10,
            max_session_hours: 8,
            max_drawdown_percent: 0.05,
            hedge_proximity_percent: 0.2,
            trading_mode: TradingMode::Balanced,
            max_risk_per_trade: 0.02,
            kelly_fraction: 0.5,
            max_portfolio_risk: 0.06,
            strategy_active: true,
            risk_scale: 1.0,
            cantilever_step_percent: 0.005,
            cantilever_lock_percent: 0.6,
            auto_hedge_enabled: true,
            hedge_multiplier: 1.5,
            modules: ModuleSet::all(),
            oracle_url: "http://localhost:8000".to_string(),
            database_url: "sqlite:hedgepilot.db?mode=rwc".to_string(),
            starting_balance: 100_000.0,
            watchlist: vec![
                ("EURUSD".to_string(), 1.1000),
                ("GBPUSD".to_string(), 1.2650),
                ("AUDUSD".to_string(), 0.6550),
            ],
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let trading_mode = match env::var("TRADING_MODE") {
            Ok(raw) => parse_mode(&raw)?,
            Err(_) => defaults.trading_mode,
        };
        let modules = match env::var("MODULES") {
            Ok(raw) => parse_modules(&raw)?,
            Err(_) => defaults.modules,
        };
        let watchlist = match env::var("WATCHLIST") {
            Ok(raw) => parse_watchlist(&raw)?,
            Err(_) => defaults.watchlist,
        };

        Ok(Self {
            decision_interval_seconds: parse_env(
                "DECISION_INTERVAL_SECS",
                defaults.decision_interval_seconds,
            )?,
            monitoring_interval_seconds: parse_env(
                "MONITORING_INTERVAL_SECS",
                defaults.monitoring_interval_seconds,
            )?,
            max_session_hours: parse_env("MAX_SESSION_HOURS", defaults.max_session_hours)?,
            max_drawdown_percent: parse_env("MAX_DRAWDOWN_PERCENT", defaults.max_drawdown_percent)?,
            hedge_proximity_percent: parse_env(
                "HEDGE_PROXIMITY_PERCENT",
                defaults.hedge_proximity_percent,
            )?,
            trading_mode,
            max_risk_per_trade: parse_env("MAX_RISK_PER_TRADE", defaults.max_risk_per_trade)?,
            kelly_fraction: parse_env("KELLY_FRACTION", defaults.kelly_fraction)?,
            max_portfolio_risk: parse_env("MAX_PORTFOLIO_RISK", defaults.max_portfolio_risk)?,
            strategy_active: parse_env("STRATEGY_ACTIVE", defaults.strategy_active)?,
            risk_scale: parse_env("RISK_SCALE", defaults.risk_scale)?,
            cantilever_step_percent: parse_env(
                "CANTILEVER_STEP_PERCENT",
                defaults.cantilever_step_percent,
            )?,
            cantilever_lock_percent: parse_env(
                "CANTILEVER_LOCK_PERCENT",
                defaults.cantilever_lock_percent,
            )?,
            auto_hedge_enabled: parse_env("AUTO_HEDGE_ENABLED", defaults.auto_hedge_enabled)?,
            hedge_multiplier: parse_env("HEDGE_MULTIPLIER", defaults.hedge_multiplier)?,
            modules,
            oracle_url: env::var("ORACLE_URL").unwrap_or(defaults.oracle_url),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            starting_balance: parse_env("STARTING_BALANCE", defaults.starting_balance)?,
            watchlist,
        })
    }

    pub fn strategy(&self) -> StrategyConfig {
        StrategyConfig {
            active: self.strategy_active,
            risk_scale: self.risk_scale,
            cantilever_step_percent: self.cantilever_step_percent,
            cantilever_lock_percent: self.cantilever_lock_percent,
            auto_hedge_enabled: self.auto_hedge_enabled,
            hedge_multiplier: self.hedge_multiplier,
            modules: self.modules,
        }
    }

    pub fn risk(&self) -> RiskConfig {
        RiskConfig {
            max_risk_per_trade: self.max_risk_per_trade,
            kelly_fraction: self.kelly_fraction,
            max_portfolio_risk: self.max_portfolio_risk,
            ..RiskConfig::default()
        }
    }

    /// Confidence floor for opening a new session. Tightens when the user
    /// runs with an outsized risk scale.
    pub fn confidence_threshold(&self) -> f64 {
        if self.risk_scale > 2.0 {
            0.85
        } else {
            0.75
        }
    }
}
