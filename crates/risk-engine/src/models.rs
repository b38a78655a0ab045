use serde::{Deserialize, Serialize};

/// Risk appetite presets applied to sizing and stop placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Conservative,
    Balanced,
    Aggressive,
}

impl TradingMode {
    /// (stop multiplier, target multiplier) applied to ATR.
    pub(crate) fn atr_multipliers(self) -> (f64, f64) {
        match self {
            TradingMode::Conservative => (2.5, 2.0),
            TradingMode::Balanced => (2.0, 2.5),
            TradingMode::Aggressive => (1.5, 3.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Hard cap on capital risked per trade, as a fraction of balance.
    pub max_risk_per_trade: f64,
    /// Fractional Kelly multiplier (0.5 = half-Kelly).
    pub kelly_fraction: f64,
    /// Portfolio-wide open-risk cap as a fraction of balance.
    pub max_portfolio_risk: f64,
    /// Reject new symbols whose |correlation| with an open symbol exceeds this.
    pub correlation_limit: f64,
    pub min_confidence: f64,
    pub min_risk_reward: f64,
    /// Volatility (ATR / price) above which the regime counts as high.
    pub high_volatility_threshold: f64,
    /// Volatility below which the regime counts as low.
    pub low_volatility_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_risk_per_trade: 0.02,
            kelly_fraction: 0.5,
            max_portfolio_risk: 0.06,
            correlation_limit: 0.7,
            min_confidence: 0.6,
            min_risk_reward: 1.5,
            high_volatility_threshold: 0.02,
            low_volatility_threshold: 0.005,
        }
    }
}

/// Position sizing recommendation with the adjustment trail that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecommendation {
    /// Broker lot size after dollar-to-lot conversion.
    pub lot_size: f64,
    /// Dollars at risk if the stop is hit.
    pub risk_amount: f64,
    /// Risk as a fraction of account balance.
    pub risk_percent: f64,
    /// One human-readable entry per applied adjustment.
    pub adjustments: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdaptiveStops {
    /// Stop distance from entry, in price units.
    pub stop_loss: f64,
    /// Target distance from entry, in price units.
    pub take_profit: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub risk_reward_ratio: f64,
    pub trailing_distance: f64,
}

/// Final approval verdict. Reasons accumulate; no check short-circuits, so a
/// rejected trade reports everything wrong with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalVerdict {
    pub approved: bool,
    pub reasons: Vec<String>,
}

/// Assembled per-candidate assessment handed to the controller. Ephemeral;
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub approved: bool,
    /// Populated only on rejection.
    pub reason: Option<String>,
    pub recommended_lot_size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl RiskAssessment {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
            recommended_lot_size: 0.0,
            stop_loss: 0.0,
            take_profit: 0.0,
        }
    }
}
