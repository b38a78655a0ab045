use std::sync::Arc;

use anyhow::Result;
use broker_core::PaperBroker;
use hedge_agent::{AgentConfig, PredictionClient, StateStore, TradingController};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_logs = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = AgentConfig::from_env()?;
    tracing::info!(
        "HedgePilot starting: {:?} mode, oracle {}, db {}",
        config.trading_mode,
        config.oracle_url,
        config.database_url,
    );

    let store = StateStore::connect(&config.database_url).await?;
    let counters = store.load_counters().await?;
    if counters.total_trades > 0 {
        tracing::info!(
            "Restored history: {} trades, {} wins",
            counters.total_trades,
            counters.winning_trades
        );
    }

    let broker = Arc::new(PaperBroker::new(config.starting_balance));
    for (symbol, price) in &config.watchlist {
        broker.set_quote(symbol, *price, 0.0).await;
    }
    tracing::info!(
        "Paper broker ready: {} symbols, ${:.2} balance",
        config.watchlist.len(),
        config.starting_balance
    );

    let oracle = Arc::new(PredictionClient::new(config.oracle_url.clone())?);

    let controller = Arc::new(TradingController::new(broker, oracle, config, store));
    controller.restore_counters(&counters).await;
    controller.clone().start().await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");
    controller.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
