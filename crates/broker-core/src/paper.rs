use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::{
    pip_profit, BrokerClient, MarketQuote, OrderRequest, OrderSide, Position, TradeDirection,
};

#[derive(Debug, Clone)]
struct PaperTicket {
    direction: TradeDirection,
    entry_price: f64,
    volume: f64,
}

#[derive(Debug, Default)]
struct PaperState {
    balance: f64,
    quotes: HashMap<String, MarketQuote>,
    tickets: HashMap<String, Vec<PaperTicket>>,
}

/// In-memory hedging-style broker: every order opens its own ticket, so a
/// long and a short can coexist on one symbol. Fills happen instantly at the
/// current quote. Used in paper mode and by the integration tests.
pub struct PaperBroker {
    state: Mutex<PaperState>,
    connected: AtomicBool,
}

impl PaperBroker {
    pub fn new(starting_balance: f64) -> Self {
        Self {
            state: Mutex::new(PaperState {
                balance: starting_balance,
                ..Default::default()
            }),
            connected: AtomicBool::new(true),
        }
    }

    pub async fn set_quote(&self, symbol: &str, price: f64, change_percent: f64) {
        let mut state = self.state.lock().await;
        state.quotes.insert(
            symbol.to_string(),
            MarketQuote {
                price,
                change_percent,
            },
        );
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn realize(state: &mut PaperState, symbol: &str, ticket: &PaperTicket, price: f64) {
        let pnl = pip_profit(ticket.direction, ticket.entry_price, price, ticket.volume);
        state.balance += pnl;
        tracing::debug!(
            "Paper close {} {} {:.2} lots @ {:.5}: P/L ${:.2}",
            symbol,
            ticket.direction,
            ticket.volume,
            price,
            pnl
        );
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn account_balance(&self) -> Result<f64> {
        Ok(self.state.lock().await.balance)
    }

    async fn market_snapshot(&self) -> Result<HashMap<String, MarketQuote>> {
        Ok(self.state.lock().await.quotes.clone())
    }

    async fn open_positions(&self) -> Result<Vec<Position>> {
        let state = self.state.lock().await;
        let mut out = Vec::new();
        for (symbol, tickets) in &state.tickets {
            let price = match state.quotes.get(symbol) {
                Some(q) => q.price,
                None => continue,
            };
            // One aggregated entry per direction, volume-weighted entry price.
            for direction in [TradeDirection::Long, TradeDirection::Short] {
                let legs: Vec<_> = tickets.iter().filter(|t| t.direction == direction).collect();
                if legs.is_empty() {
                    continue;
                }
                let volume: f64 = legs.iter().map(|t| t.volume).sum();
                let entry_price =
                    legs.iter().map(|t| t.entry_price * t.volume).sum::<f64>() / volume;
                out.push(Position {
                    symbol: symbol.clone(),
                    direction,
                    entry_price,
                    current_price: price,
                    volume,
                    profit_loss: pip_profit(direction, entry_price, price, volume),
                });
            }
        }
        Ok(out)
    }

    async fn submit_order(&self, order: OrderRequest) -> Result<bool> {
        let mut state = self.state.lock().await;
        let price = match state.quotes.get(&order.symbol) {
            Some(q) => q.price,
            None => {
                tracing::warn!("Paper broker has no quote for {}, order declined", order.symbol);
                return Ok(false);
            }
        };
        let volume = order.volume.to_f64().unwrap_or(0.0);
        if volume <= 0.0 {
            return Ok(false);
        }
        let direction = match order.side {
            OrderSide::Buy => TradeDirection::Long,
            OrderSide::Sell => TradeDirection::Short,
        };
        state
            .tickets
            .entry(order.symbol.clone())
            .or_default()
            .push(PaperTicket {
                direction,
                entry_price: price,
                volume,
            });
        tracing::info!(
            "Paper fill: {} {:?} {:.2} lots @ {:.5}",
            order.symbol,
            order.side,
            volume,
            price
        );
        Ok(true)
    }

    async fn close_position(&self, symbol: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let price = match state.quotes.get(symbol) {
            Some(q) => q.price,
            None => return Ok(false),
        };
        match state.tickets.remove(symbol) {
            Some(tickets) => {
                for ticket in &tickets {
                    Self::realize(&mut state, symbol, ticket, price);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close_leg(
        &self,
        symbol: &str,
        direction: TradeDirection,
        volume: Option<Decimal>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let price = match state.quotes.get(symbol) {
            Some(q) => q.price,
            None => return Ok(false),
        };
        let Some(tickets) = state.tickets.remove(symbol) else {
            return Ok(false);
        };
        let mut remaining = volume.and_then(|v| v.to_f64()).unwrap_or(f64::INFINITY);
        let mut kept = Vec::new();
        let mut closed_any = false;
        for mut ticket in tickets {
            if ticket.direction != direction || remaining <= 0.0 {
                kept.push(ticket);
                continue;
            }
            if ticket.volume <= remaining {
                remaining -= ticket.volume;
                Self::realize(&mut state, symbol, &ticket, price);
                closed_any = true;
            } else {
                let closed = PaperTicket {
                    volume: remaining,
                    ..ticket.clone()
                };
                Self::realize(&mut state, symbol, &closed, price);
                ticket.volume -= remaining;
                remaining = 0.0;
                closed_any = true;
                kept.push(ticket);
            }
        }
        if !kept.is_empty() {
            state.tickets.insert(symbol.to_string(), kept);
        }
        Ok(closed_any)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn broker_name(&self) -> &str {
        "paper"
    }
}
