use broker_core::PIP_VALUE_PER_LOT;

use crate::correlation::pair_correlation;
use crate::models::{AdaptiveStops, ApprovalVerdict, PositionRecommendation, RiskConfig, TradingMode};

/// Stop distance assumed for dollar-to-lot conversion, in pips.
const SIZING_STOP_PIPS: f64 = 50.0;

/// Stateless per-call risk engine. Construct once with a [`RiskConfig`] and
/// share freely; every method is a pure function of its arguments.
#[derive(Debug, Clone)]
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Kelly Criterion dollar amount to risk on the next trade.
    ///
    /// f* = (p*b - q) / b with b = avg_win / avg_loss. The raw fraction is
    /// scaled by the configured fractional-Kelly multiplier and clamped to
    /// [0, max_risk_per_trade] before being applied to the balance.
    pub fn position_size(
        &self,
        account_balance: f64,
        win_rate: f64,
        avg_win: f64,
        avg_loss: f64,
    ) -> f64 {
        if avg_loss <= 0.0 {
            // No loss history to compute odds from; fall back to the flat cap.
            return account_balance * self.config.max_risk_per_trade;
        }

        let p = win_rate;
        let q = 1.0 - p;
        let b = avg_win / avg_loss;
        let raw_kelly = (p * b - q) / b;

        let safe_fraction = (raw_kelly * self.config.kelly_fraction)
            .max(0.0)
            .min(self.config.max_risk_per_trade);

        account_balance * safe_fraction
    }

    /// Kelly size with multiplicative adjustments for signal quality, the
    /// volatility regime, trend, and trading mode. Each adjustment is logged
    /// into the recommendation so the final size is auditable.
    #[allow(clippy::too_many_arguments)]
    pub fn recommend_position(
        &self,
        account_balance: f64,
        confidence: f64,
        volatility: f64,
        trending: bool,
        mode: TradingMode,
        win_rate: f64,
        avg_win: f64,
        avg_loss: f64,
    ) -> PositionRecommendation {
        let mut amount = self.position_size(account_balance, win_rate, avg_win, avg_loss);
        let mut adjustments = Vec::new();

        if confidence > 0.8 {
            amount *= 1.2;
            adjustments.push(format!(
                "High confidence {:.0}%: size x1.2",
                confidence * 100.0
            ));
        } else if confidence < 0.6 {
            amount *= 0.5;
            adjustments.push(format!(
                "Low confidence {:.0}%: size x0.5",
                confidence * 100.0
            ));
        }

        if volatility > self.config.high_volatility_threshold {
            amount *= 0.7;
            adjustments.push(format!("High volatility {:.2}%: size x0.7", volatility * 100.0));
        } else if volatility < self.config.low_volatility_threshold {
            amount *= 1.1;
            adjustments.push(format!("Low volatility {:.2}%: size x1.1", volatility * 100.0));
        }

        if trending {
            amount *= 1.05;
            adjustments.push("Trending market: size x1.05".to_string());
        }

        match mode {
            TradingMode::Conservative => {
                amount *= 0.8;
                adjustments.push("Conservative mode: size x0.8".to_string());
            }
            TradingMode::Aggressive => {
                amount *= 1.1;
                adjustments.push("Aggressive mode: size x1.1".to_string());
            }
            TradingMode::Balanced => {}
        }

        let cap = account_balance * self.config.max_risk_per_trade;
        if amount > cap {
            adjustments.push(format!(
                "Capped at max risk per trade: ${:.2} -> ${:.2}",
                amount, cap
            ));
            amount = cap;
        }

        let lot_size = amount / (SIZING_STOP_PIPS * PIP_VALUE_PER_LOT);

        PositionRecommendation {
            lot_size,
            risk_amount: amount,
            risk_percent: if account_balance > 0.0 {
                amount / account_balance
            } else {
                0.0
            },
            adjustments,
        }
    }

    /// ATR-scaled stop and target distances plus the absolute price levels.
    /// A floor widens the target whenever reward:risk would fall below the
    /// configured minimum.
    pub fn adaptive_stops(
        &self,
        entry_price: f64,
        atr: f64,
        mode: TradingMode,
        volatility: f64,
        is_long: bool,
    ) -> AdaptiveStops {
        let (mut stop_mult, mut target_mult) = mode.atr_multipliers();

        if volatility > self.config.high_volatility_threshold {
            // Wider stops in choppy regimes, slightly more ambitious targets.
            stop_mult *= 1.3;
            target_mult *= 1.1;
        } else if volatility < self.config.low_volatility_threshold {
            stop_mult *= 0.9;
            target_mult *= 0.9;
        }

        let stop_loss = atr * stop_mult;
        let mut take_profit = atr * target_mult;
        if take_profit < stop_loss * self.config.min_risk_reward {
            take_profit = stop_loss * self.config.min_risk_reward;
        }

        let (stop_price, target_price) = if is_long {
            (entry_price - stop_loss, entry_price + take_profit)
        } else {
            (entry_price + stop_loss, entry_price - take_profit)
        };

        AdaptiveStops {
            stop_loss,
            take_profit,
            stop_price,
            target_price,
            risk_reward_ratio: take_profit / stop_loss,
            trailing_distance: stop_loss,
        }
    }

    /// False when the candidate symbol is too correlated (|corr| above the
    /// configured limit) with any currently open symbol.
    pub fn correlation_ok<'a>(
        &self,
        symbol: &str,
        open_symbols: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        for open in open_symbols {
            let corr = pair_correlation(symbol, open);
            if corr.abs() > self.config.correlation_limit {
                tracing::warn!(
                    "Correlation conflict: {} vs open {} ({:+.2})",
                    symbol,
                    open,
                    corr
                );
                return false;
            }
        }
        true
    }

    /// Final gate. All four checks always run so the verdict carries every
    /// applicable rejection reason.
    pub fn approve(
        &self,
        confidence: f64,
        risk_reward_ratio: f64,
        portfolio_risk_percent: f64,
        correlation_ok: bool,
    ) -> ApprovalVerdict {
        let mut reasons = Vec::new();

        if confidence < self.config.min_confidence {
            reasons.push(format!(
                "Confidence {:.1}% below minimum {:.1}%",
                confidence * 100.0,
                self.config.min_confidence * 100.0
            ));
        }
        if risk_reward_ratio < self.config.min_risk_reward {
            reasons.push(format!(
                "Risk:reward {:.2} below minimum {:.2}",
                risk_reward_ratio, self.config.min_risk_reward
            ));
        }
        if portfolio_risk_percent > self.config.max_portfolio_risk {
            reasons.push(format!(
                "Portfolio risk {:.1}% above cap {:.1}%",
                portfolio_risk_percent * 100.0,
                self.config.max_portfolio_risk * 100.0
            ));
        }
        if !correlation_ok {
            reasons.push("Correlated position already open".to_string());
        }

        ApprovalVerdict {
            approved: reasons.is_empty(),
            reasons,
        }
    }
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}
