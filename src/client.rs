// =============================================================================
// Stream Client — owns the feed lifecycle and the published state
// =============================================================================
//
// One explicit object per feed: it owns the candle series, the REST history
// client, and three watch channels (price, series snapshot, status). The
// caller constructs it, calls connect()/disconnect(), and subscribes to the
// watchers from wherever it likes — no globals, no assumed UI thread.
//
// Thread safety:
//   - parking_lot::RwLock around the candle series; written only by
//     connect() during bootstrap and by the kline task afterwards.
//   - tokio::sync::watch for published state — replay-latest on subscribe,
//     latest-value-wins, readable from any task.
// =============================================================================

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::binance::HistoryClient;
use crate::config::FeedConfig;
use crate::market_data::kline_stream::run_kline_stream;
use crate::market_data::trade_stream::run_trade_stream;
use crate::market_data::{Candle, CandleSeries};

/// Sentinel shown on the price observable until the first tick arrives.
const PRICE_CONNECTING: &str = "Connecting...";

// =============================================================================
// FeedStatus
// =============================================================================

/// Lifecycle stage of the feed, published on the status observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Idle,
    LoadingHistory,
    HistoryLoaded { candles: usize },
    HistoryFailed,
    Streaming,
    StreamFailed,
    Disconnected,
}

impl std::fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::LoadingHistory => write!(f, "Loading history..."),
            Self::HistoryLoaded { candles } => write!(f, "History loaded ({candles} candles)"),
            Self::HistoryFailed => write!(f, "History load failed"),
            Self::Streaming => write!(f, "Streaming"),
            Self::StreamFailed => write!(f, "Stream failed"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

// =============================================================================
// StreamClient
// =============================================================================

/// Handles for the two running stream tasks plus their shutdown signal.
struct StreamTasks {
    shutdown_tx: watch::Sender<bool>,
    trade: JoinHandle<()>,
    kline: JoinHandle<()>,
}

/// Market-data stream client for a single symbol.
///
/// `connect()` bootstraps history over REST and then runs the trade and
/// kline WebSocket streams as background tasks until `disconnect()` is
/// called or a transport error ends them. All outcomes — ticks, merged
/// candles, failures — surface through the watch channels; neither call
/// returns an error.
pub struct StreamClient {
    config: FeedConfig,
    history: HistoryClient,
    series: Arc<RwLock<CandleSeries>>,
    price_tx: Arc<watch::Sender<String>>,
    series_tx: Arc<watch::Sender<Arc<Vec<Candle>>>>,
    status_tx: Arc<watch::Sender<FeedStatus>>,
    tasks: Mutex<Option<StreamTasks>>,
}

impl StreamClient {
    /// Construct a client from `config`. Nothing connects until
    /// [`connect`](Self::connect) is called.
    pub fn new(config: FeedConfig) -> Self {
        let history = HistoryClient::new(
            config.rest_base_url.clone(),
            std::time::Duration::from_secs(config.request_timeout_secs),
        );

        let (price_tx, _) = watch::channel(PRICE_CONNECTING.to_string());
        let (series_tx, _) = watch::channel::<Arc<Vec<Candle>>>(Arc::new(Vec::new()));
        let (status_tx, _) = watch::channel(FeedStatus::Idle);

        Self {
            series: Arc::new(RwLock::new(CandleSeries::new(config.max_candles))),
            history,
            config,
            price_tx: Arc::new(price_tx),
            series_tx: Arc::new(series_tx),
            status_tx: Arc::new(status_tx),
            tasks: Mutex::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Observables
    // -------------------------------------------------------------------------

    /// Subscribe to the price observable. The receiver immediately holds the
    /// latest value (`"<price> USD"`, or a status placeholder before the
    /// first tick) and sees every subsequent update.
    pub fn price_watcher(&self) -> watch::Receiver<String> {
        self.price_tx.subscribe()
    }

    /// Subscribe to the series observable: an immutable snapshot of the
    /// candle series as of its last mutation, oldest candle first.
    pub fn series_watcher(&self) -> watch::Receiver<Arc<Vec<Candle>>> {
        self.series_tx.subscribe()
    }

    /// Subscribe to the lifecycle status observable.
    pub fn status_watcher(&self) -> watch::Receiver<FeedStatus> {
        self.status_tx.subscribe()
    }

    /// Whether the stream tasks are currently running.
    pub fn is_connected(&self) -> bool {
        self.tasks.lock().is_some()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Bootstrap history and start both streams.
    ///
    /// Sequencing: history is fetched and installed into the series first;
    /// the trade and kline streams start afterwards. A history failure is
    /// reported on the status observable but does not prevent the streams
    /// from starting.
    ///
    /// Calling `connect()` while already connected logs a warning and does
    /// nothing, so repeated calls cannot open duplicate sockets. Repeated
    /// calls are expected from a single control task; racing `connect()`
    /// from multiple tasks concurrently is not supported.
    pub async fn connect(&self) {
        if self.tasks.lock().is_some() {
            warn!("connect() called while already connected; ignoring");
            return;
        }

        // ── 1. History bootstrap ────────────────────────────────────────
        self.status_tx.send_replace(FeedStatus::LoadingHistory);

        match self
            .history
            .fetch_recent_klines(
                &self.config.symbol,
                &self.config.interval,
                self.config.lookback_minutes,
                self.config.history_limit,
            )
            .await
        {
            Ok(candles) => {
                let count = candles.len();
                let snapshot = {
                    let mut series = self.series.write();
                    series.replace_all(candles);
                    series.snapshot()
                };
                self.series_tx.send_replace(Arc::new(snapshot));
                self.status_tx
                    .send_replace(FeedStatus::HistoryLoaded { candles: count });
                info!(symbol = %self.config.symbol, candles = count, "history bootstrap complete");
            }
            Err(e) => {
                warn!(symbol = %self.config.symbol, error = %e, "history bootstrap failed; starting streams anyway");
                self.status_tx.send_replace(FeedStatus::HistoryFailed);
            }
        }

        // ── 2. Stream tasks ─────────────────────────────────────────────
        let (shutdown_tx, _) = watch::channel(false);

        let trade = {
            let ws_base = self.config.ws_base_url.clone();
            let symbol = self.config.symbol.clone();
            let price_tx = self.price_tx.clone();
            let status_tx = self.status_tx.clone();
            let mut shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                match run_trade_stream(&ws_base, &symbol, &price_tx, &mut shutdown).await {
                    Ok(()) => {
                        info!(symbol = %symbol, "trade stream closed");
                        price_tx.send_replace("Connection closed".to_string());
                    }
                    Err(e) => {
                        error!(symbol = %symbol, error = %e, "trade stream failed");
                        price_tx.send_replace(format!("Connection failed: {e}"));
                        status_tx.send_replace(FeedStatus::StreamFailed);
                    }
                }
            })
        };

        let kline = {
            let ws_base = self.config.ws_base_url.clone();
            let symbol = self.config.symbol.clone();
            let interval = self.config.interval.clone();
            let series = self.series.clone();
            let series_tx = self.series_tx.clone();
            let status_tx = self.status_tx.clone();
            let mut shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                match run_kline_stream(
                    &ws_base,
                    &symbol,
                    &interval,
                    &series,
                    &series_tx,
                    &mut shutdown,
                )
                .await
                {
                    Ok(()) => info!(symbol = %symbol, "kline stream closed"),
                    Err(e) => {
                        error!(symbol = %symbol, error = %e, "kline stream failed");
                        status_tx.send_replace(FeedStatus::StreamFailed);
                    }
                }
            })
        };

        self.status_tx.send_replace(FeedStatus::Streaming);
        *self.tasks.lock() = Some(StreamTasks {
            shutdown_tx,
            trade,
            kline,
        });
        info!(symbol = %self.config.symbol, "streams started");
    }

    /// Stop both streams with a normal-closure handshake and wait for the
    /// tasks to finish.
    ///
    /// Safe to call at any time: before `connect()`, twice in a row, or
    /// after the streams already died — all of those are no-ops.
    pub async fn disconnect(&self) {
        let tasks = self.tasks.lock().take();
        let Some(tasks) = tasks else {
            debug!("disconnect() called while not connected; nothing to do");
            return;
        };

        tasks.shutdown_tx.send_replace(true);
        let _ = tasks.trade.await;
        let _ = tasks.kline.await;

        self.status_tx.send_replace(FeedStatus::Disconnected);
        info!(symbol = %self.config.symbol, "streams disconnected");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_client_publishes_initial_state() {
        let client = StreamClient::new(FeedConfig::default());

        assert_eq!(*client.price_watcher().borrow(), PRICE_CONNECTING);
        assert!(client.series_watcher().borrow().is_empty());
        assert_eq!(*client.status_watcher().borrow(), FeedStatus::Idle);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn disconnect_before_connect_is_a_noop() {
        let client = StreamClient::new(FeedConfig::default());

        client.disconnect().await;

        // Observable state is untouched — no Disconnected status, no price
        // change.
        assert_eq!(*client.status_watcher().borrow(), FeedStatus::Idle);
        assert_eq!(*client.price_watcher().borrow(), PRICE_CONNECTING);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn repeated_disconnect_is_safe() {
        let client = StreamClient::new(FeedConfig::default());
        client.disconnect().await;
        client.disconnect().await;
        assert!(!client.is_connected());
    }

    #[test]
    fn watchers_replay_latest_on_subscribe() {
        let client = StreamClient::new(FeedConfig::default());
        client.price_tx.send_replace("67000.00 USD".to_string());

        // A receiver created after the update still sees it.
        assert_eq!(*client.price_watcher().borrow(), "67000.00 USD");
    }

    #[test]
    fn status_display_strings() {
        assert_eq!(FeedStatus::Idle.to_string(), "Idle");
        assert_eq!(FeedStatus::LoadingHistory.to_string(), "Loading history...");
        assert_eq!(
            FeedStatus::HistoryLoaded { candles: 30 }.to_string(),
            "History loaded (30 candles)"
        );
        assert_eq!(FeedStatus::Streaming.to_string(), "Streaming");
        assert_eq!(FeedStatus::Disconnected.to_string(), "Disconnected");
    }
}
