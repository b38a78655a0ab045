//! Stateless risk sizing and trade approval.
//!
//! Every operation here is a pure function of its inputs plus an injected
//! [`RiskConfig`]; nothing reads ambient state. Rejections come back as
//! verdict values with human-readable reasons, not as errors.

mod correlation;
mod engine;
mod models;

#[cfg(test)]
mod tests;

pub use correlation::pair_correlation;
pub use engine::RiskEngine;
pub use models::{
    AdaptiveStops, ApprovalVerdict, PositionRecommendation, RiskAssessment, RiskConfig,
    TradingMode,
};
