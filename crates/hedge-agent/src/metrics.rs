use serde::{Deserialize, Serialize};

use crate::state_store::Counters;

/// Cumulative engine metrics. Trade counters survive restarts through the
/// state store; cycle counters reset with the process.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub decision_cycles: u64,
    pub monitoring_cycles: u64,
    pub sessions_opened: u64,
    pub trades_rejected: u64,
    pub hedges_triggered: u64,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    /// Sum of winning trades' profits, in dollars.
    pub total_profit: f64,
    /// Sum of losing trades' losses, as a positive number.
    pub total_loss: f64,
    pub last_decision_ms: u64,
    pub last_monitoring_ms: u64,
}

impl EngineMetrics {
    pub fn record_trade(&mut self, profit: f64) {
        self.total_trades += 1;
        if profit >= 0.0 {
            self.winning_trades += 1;
            self.total_profit += profit;
        } else {
            self.losing_trades += 1;
            self.total_loss += profit.abs();
        }
    }

    /// Historical win rate, 0.5 until there is any history.
    pub fn win_rate(&self) -> f64 {
        let total = self.winning_trades + self.losing_trades;
        if total == 0 {
            0.5
        } else {
            self.winning_trades as f64 / total as f64
        }
    }

    pub fn avg_win(&self) -> f64 {
        if self.winning_trades == 0 {
            0.0
        } else {
            self.total_profit / self.winning_trades as f64
        }
    }

    pub fn avg_loss(&self) -> f64 {
        if self.losing_trades == 0 {
            0.0
        } else {
            self.total_loss / self.losing_trades as f64
        }
    }

    pub fn counters(&self) -> Counters {
        Counters {
            total_trades: self.total_trades,
            winning_trades: self.winning_trades,
            losing_trades: self.losing_trades,
            total_profit: self.total_profit,
            total_loss: self.total_loss,
        }
    }

    pub fn restore(&mut self, counters: &Counters) {
        self.total_trades = counters.total_trades;
        self.winning_trades = counters.winning_trades;
        self.losing_trades = counters.losing_trades;
        self.total_profit = counters.total_profit;
        self.total_loss = counters.total_loss;
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "Metrics: {} trades ({} wins / {} losses, {:.0}% win rate), net ${:.2}, \
             {} sessions opened, {} rejected, {} hedges, cycles {}d/{}m",
            self.total_trades,
            self.winning_trades,
            self.losing_trades,
            self.win_rate() * 100.0,
            self.total_profit - self.total_loss,
            self.sessions_opened,
            self.trades_rejected,
            self.hedges_triggered,
            self.decision_cycles,
            self.monitoring_cycles,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win_rate_defaults_to_half_without_history() {
        let metrics = EngineMetrics::default();
        assert_eq!(metrics.win_rate(), 0.5);
        assert_eq!(metrics.avg_win(), 0.0);
        assert_eq!(metrics.avg_loss(), 0.0);
    }

    #[test]
    fn trades_split_into_wins_and_losses() {
        let mut metrics = EngineMetrics::default();
        metrics.record_trade(300.0);
        metrics.record_trade(100.0);
        metrics.record_trade(-100.0);

        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 1);
        assert!((metrics.win_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert!((metrics.avg_win() - 200.0).abs() < 1e-9);
        assert!((metrics.avg_loss() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn counters_round_trip() {
        let mut metrics = EngineMetrics::default();
        metrics.record_trade(50.0);
        metrics.record_trade(-20.0);

        let mut restored = EngineMetrics::default();
        restored.restore(&metrics.counters());
        assert_eq!(restored.total_trades, 2);
        assert!((restored.total_loss - 20.0).abs() < 1e-9);
    }
}
