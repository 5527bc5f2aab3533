// =============================================================================
// Feed Configuration — tunable feed settings with atomic save
// =============================================================================
//
// Every knob of the feed lives here: symbol, interval, series cap, history
// window, endpoints, timeouts. All fields carry `#[serde(default)]` so that
// adding new fields never breaks loading an older config file.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_interval() -> String {
    "1m".to_string()
}

fn default_max_candles() -> usize {
    100
}

fn default_lookback_minutes() -> i64 {
    30
}

fn default_history_limit() -> u32 {
    100
}

fn default_rest_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_ws_base_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

// =============================================================================
// FeedConfig
// =============================================================================

/// Configuration for the market-data feed.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Trading pair the feed subscribes to, e.g. "BTCUSDT".
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Kline interval for both the history bootstrap and the live stream.
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Maximum number of candles retained in the series. Once at this cap,
    /// every new candle evicts the oldest one.
    #[serde(default = "default_max_candles")]
    pub max_candles: usize,

    /// How far back the history bootstrap reaches, in minutes.
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: i64,

    /// Row limit passed to the kline history endpoint.
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,

    /// Base URL for REST requests.
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    /// Base URL for WebSocket streams.
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,

    /// Connect/read timeout for REST requests, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            interval: default_interval(),
            max_candles: default_max_candles(),
            lookback_minutes: default_lookback_minutes(),
            history_limit: default_history_limit(),
            rest_base_url: default_rest_base_url(),
            ws_base_url: default_ws_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl FeedConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read feed config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse feed config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            interval = %config.interval,
            "feed config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise feed config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "feed config saved (atomic)");
        Ok(())
    }
}
