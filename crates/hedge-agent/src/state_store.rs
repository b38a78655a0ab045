use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

/// One closed trade, as written to `trade_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub direction: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub profit: f64,
    pub duration_minutes: i64,
    pub confidence: f64,
    pub close_reason: String,
    pub timestamp: String,
}

/// Trade counters persisted across restarts. These seed the Kelly sizing
/// inputs on the next boot.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Counters {
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub total_profit: f64,
    pub total_loss: f64,
}

/// SQLite-backed persistence for trade history and counters.
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        // In-memory databases exist per connection; keep the pool at one so
        // every query sees the same tables.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("failed to open database {}", database_url))?;
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                profit REAL NOT NULL,
                duration_minutes INTEGER NOT NULL,
                confidence REAL NOT NULL,
                close_reason TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_counters (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                total_trades INTEGER NOT NULL,
                winning_trades INTEGER NOT NULL,
                losing_trades INTEGER NOT NULL,
                total_profit REAL NOT NULL,
                total_loss REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record_trade(&self, record: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_history
                (symbol, direction, entry_price, exit_price, profit,
                 duration_minutes, confidence, close_reason, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.symbol)
        .bind(&record.direction)
        .bind(record.entry_price)
        .bind(record.exit_price)
        .bind(record.profit)
        .bind(record.duration_minutes)
        .bind(record.confidence)
        .bind(&record.close_reason)
        .bind(&record.timestamp)
        .execute(&self.pool)
        .await
        .context("failed to record trade")?;
        Ok(())
    }

    pub async fn load_counters(&self) -> Result<Counters> {
        let row = sqlx::query(
            "SELECT total_trades, winning_trades, losing_trades, total_profit, total_loss \
             FROM agent_counters WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => Counters {
                total_trades: row.try_get(0)?,
                winning_trades: row.try_get(1)?,
                losing_trades: row.try_get(2)?,
                total_profit: row.try_get(3)?,
                total_loss: row.try_get(4)?,
            },
            None => Counters::default(),
        })
    }

    pub async fn save_counters(&self, counters: &Counters) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_counters
                (id, total_trades, winning_trades, losing_trades, total_profit, total_loss)
            VALUES (1, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                total_trades = excluded.total_trades,
                winning_trades = excluded.winning_trades,
                losing_trades = excluded.losing_trades,
                total_profit = excluded.total_profit,
                total_loss = excluded.total_loss
            "#,
        )
        .bind(counters.total_trades)
        .bind(counters.winning_trades)
        .bind(counters.losing_trades)
        .bind(counters.total_profit)
        .bind(counters.total_loss)
        .execute(&self.pool)
        .await
        .context("failed to save counters")?;
        Ok(())
    }

    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            "SELECT symbol, direction, entry_price, exit_price, profit, \
                    duration_minutes, confidence, close_reason, timestamp \
             FROM trade_history ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(TradeRecord {
                    symbol: row.try_get(0)?,
                    direction: row.try_get(1)?,
                    entry_price: row.try_get(2)?,
                    exit_price: row.try_get(3)?,
                    profit: row.try_get(4)?,
                    duration_minutes: row.try_get(5)?,
                    confidence: row.try_get(6)?,
                    close_reason: row.try_get(7)?,
                    timestamp: row.try_get(8)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> StateStore {
        StateStore::connect("sqlite::memory:").await.unwrap()
    }

    fn record(symbol: &str, profit: f64) -> TradeRecord {
        TradeRecord {
            symbol: symbol.to_string(),
            direction: "long".to_string(),
            entry_price: 1.1000,
            exit_price: 1.1050,
            profit,
            duration_minutes: 42,
            confidence: 0.8,
            close_reason: "target reached".to_string(),
            timestamp: "2026-08-29T12:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn trades_are_recorded_and_listed_newest_first() {
        let store = memory_store().await;
        store.record_trade(&record("EURUSD", 500.0)).await.unwrap();
        store.record_trade(&record("GBPUSD", -120.0)).await.unwrap();

        let trades = store.recent_trades(10).await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].symbol, "GBPUSD");
        assert_eq!(trades[1].symbol, "EURUSD");
    }

    #[tokio::test]
    async fn counters_default_then_upsert() {
        let store = memory_store().await;
        let empty = store.load_counters().await.unwrap();
        assert_eq!(empty.total_trades, 0);

        let counters = Counters {
            total_trades: 5,
            winning_trades: 3,
            losing_trades: 2,
            total_profit: 900.0,
            total_loss: 250.0,
        };
        store.save_counters(&counters).await.unwrap();
        store.save_counters(&counters).await.unwrap(); // idempotent upsert

        let loaded = store.load_counters().await.unwrap();
        assert_eq!(loaded.total_trades, 5);
        assert!((loaded.total_profit - 900.0).abs() < 1e-9);
    }
}
