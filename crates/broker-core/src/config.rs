use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Optional engine capabilities. A fixed enum rather than a string-keyed map
/// so a typo cannot silently disable a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    ProfitRatchet,
    HedgeRecovery,
}

impl Module {
    fn bit(self) -> u8 {
        match self {
            Module::ProfitRatchet => 0b01,
            Module::HedgeRecovery => 0b10,
        }
    }
}

impl std::str::FromStr for Module {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "profit_ratchet" => Ok(Module::ProfitRatchet),
            "hedge_recovery" => Ok(Module::HedgeRecovery),
            other => bail!("unknown module '{}'", other),
        }
    }
}

/// Set of enabled modules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSet(u8);

impl ModuleSet {
    pub fn none() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Self::none()
            .with(Module::ProfitRatchet)
            .with(Module::HedgeRecovery)
    }

    pub fn with(self, module: Module) -> Self {
        Self(self.0 | module.bit())
    }

    pub fn contains(self, module: Module) -> bool {
        self.0 & module.bit() != 0
    }
}

/// Read-only strategy settings shared by the controller and the decision
/// components. Built once at startup and injected into every call; no
/// component reads ambient/global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Master switch: the controller refuses to start when false.
    pub active: bool,
    /// User risk appetite, clamped to 0.1–5.0 where consumed.
    pub risk_scale: f64,
    /// Profit fraction per cantilever ratchet step (e.g. 0.005 = 0.5%).
    pub cantilever_step_percent: f64,
    /// Fraction of each step's profit locked behind the stop.
    pub cantilever_lock_percent: f64,
    pub auto_hedge_enabled: bool,
    /// Hedge volume as a multiple of the losing leg's volume.
    pub hedge_multiplier: f64,
    pub modules: ModuleSet,
}

impl StrategyConfig {
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            active: true,
            risk_scale: 1.0,
            cantilever_step_percent: 0.005,
            cantilever_lock_percent: 0.6,
            auto_hedge_enabled: true,
            hedge_multiplier: 1.5,
            modules: ModuleSet::all(),
        }
    }
}
