//! Cantilever stop: a stepped profit ratchet.
//!
//! Each time price advances a full `step_percent` of profit, a fraction of
//! that profit is locked in behind the stop. The stop only ever moves in the
//! favorable direction; retracements change nothing.

use broker_core::TradeDirection;
use serde::{Deserialize, Serialize};

/// Initial stop offset against the position, as a fraction of entry price.
const INITIAL_STOP_OFFSET: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatchetState {
    /// Stop sits at the initial fixed offset; no profit step crossed yet.
    Armed,
    /// At least one step crossed; the stop is locking in profit. There is no
    /// transition back to Armed.
    Stepping,
}

/// Per-symbol ratchet state. Lifecycle matches the trading session it guards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CantileverStop {
    pub symbol: String,
    pub entry_price: f64,
    pub direction: TradeDirection,
    pub step_percent: f64,
    pub lock_percent: f64,
    pub current_stop: f64,
    pub profit_steps: u32,
    pub last_update_price: f64,
    pub state: RatchetState,
}

impl CantileverStop {
    /// Arm a new ratchet with the stop 2% against the direction of the trade.
    pub fn arm(
        symbol: impl Into<String>,
        entry_price: f64,
        direction: TradeDirection,
        step_percent: f64,
        lock_percent: f64,
    ) -> Self {
        let current_stop = entry_price * (1.0 - direction.sign() * INITIAL_STOP_OFFSET);
        Self {
            symbol: symbol.into(),
            entry_price,
            direction,
            step_percent,
            lock_percent,
            current_stop,
            profit_steps: 0,
            last_update_price: entry_price,
            state: RatchetState::Armed,
        }
    }

    /// Signed profit fraction at `price` (positive = in favor).
    pub fn profit_percent(&self, price: f64) -> f64 {
        (price - self.entry_price) / self.entry_price * self.direction.sign()
    }

    /// Feed a price update. Returns the newly committed stop when the ratchet
    /// tightened, None otherwise. The stop never loosens: a candidate that is
    /// not strictly more favorable than the current stop is discarded.
    pub fn update(&mut self, price: f64) -> Option<f64> {
        self.last_update_price = price;

        let profit = self.profit_percent(price);
        if profit <= self.step_percent {
            return None;
        }

        let steps = (profit / self.step_percent).floor() as u32;
        let locked_fraction = profit * self.lock_percent * steps as f64;
        let candidate = self.entry_price * (1.0 + self.direction.sign() * locked_fraction);

        let more_favorable = match self.direction {
            TradeDirection::Long => candidate > self.current_stop,
            TradeDirection::Short => candidate < self.current_stop,
        };
        if !more_favorable {
            return None;
        }

        tracing::debug!(
            "Cantilever {} step {} -> {}: stop {:.5} -> {:.5} (locked {:.2}%)",
            self.symbol,
            self.profit_steps,
            steps,
            self.current_stop,
            candidate,
            locked_fraction * 100.0
        );

        self.current_stop = candidate;
        self.profit_steps = steps;
        self.state = RatchetState::Stepping;
        Some(candidate)
    }

    /// True once price has crossed the ratcheted stop against the position.
    pub fn is_hit(&self, price: f64) -> bool {
        match self.direction {
            TradeDirection::Long => price <= self.current_stop,
            TradeDirection::Short => price >= self.current_stop,
        }
    }
}
