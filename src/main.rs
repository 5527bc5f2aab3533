// =============================================================================
// BTC Feed — Demo Consumer Entry Point
// =============================================================================
//
// Connects the stream client and logs every observable update, standing in
// for a chart UI. Stop with Ctrl+C; the client closes both WebSocket
// connections with a normal-closure handshake on the way out.
// =============================================================================

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use btc_feed::{FeedConfig, StreamClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = FeedConfig::load("feed_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        FeedConfig::default()
    });

    // Override the symbol from env if available.
    if let Ok(symbol) = std::env::var("FEED_SYMBOL") {
        let symbol = symbol.trim().to_uppercase();
        if !symbol.is_empty() {
            config.symbol = symbol;
        }
    }

    info!(
        symbol = %config.symbol,
        interval = %config.interval,
        max_candles = config.max_candles,
        "starting market feed"
    );

    // ── 2. Build the client and subscribe the observers ──────────────────
    let client = StreamClient::new(config);

    let mut price_rx = client.price_watcher();
    tokio::spawn(async move {
        while price_rx.changed().await.is_ok() {
            let price = price_rx.borrow_and_update().clone();
            info!(price = %price, "price update");
        }
    });

    let mut series_rx = client.series_watcher();
    tokio::spawn(async move {
        while series_rx.changed().await.is_ok() {
            let snapshot = series_rx.borrow_and_update().clone();
            let last_close = snapshot.last().map(|c| c.close);
            info!(candles = snapshot.len(), last_close = ?last_close, "series update");
        }
    });

    let mut status_rx = client.status_watcher();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = *status_rx.borrow_and_update();
            info!(status = %status, "feed status");
        }
    });

    // ── 3. Connect and run until Ctrl+C ──────────────────────────────────
    client.connect().await;

    info!("feed running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — disconnecting");

    client.disconnect().await;

    info!("market feed shut down.");
    Ok(())
}
