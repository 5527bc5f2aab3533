// =============================================================================
// Kline Stream — merges live candle updates into the shared series
// =============================================================================

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::FeedError;
use crate::market_data::series::{Candle, CandleSeries};

/// Connect to the Binance kline WebSocket stream for a single
/// (symbol, interval) pair, merge each update into `series`, and publish a
/// fresh snapshot on `series_tx` after every merge.
///
/// The series is written only from this task once the stream is running;
/// the history bootstrap finishes before the stream starts, so the two
/// writers never interleave.
///
/// Decode failures are logged and dropped (series unchanged); only
/// transport errors end the stream. Returns `Ok(())` when the peer closes
/// the connection or `shutdown` fires. There is no automatic reconnect.
pub async fn run_kline_stream(
    ws_base: &str,
    symbol: &str,
    interval: &str,
    series: &Arc<RwLock<CandleSeries>>,
    series_tx: &watch::Sender<Arc<Vec<Candle>>>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), FeedError> {
    let lower = symbol.to_lowercase();
    let url = format!("{ws_base}/ws/{lower}@kline_{interval}");
    info!(url = %url, symbol = %symbol, interval = %interval, "connecting to kline WebSocket");

    let (ws_stream, _response) = tokio::select! {
        res = connect_async(&url) => res?,
        _ = shutdown.changed() => {
            debug!(symbol = %symbol, "shutdown during kline WebSocket handshake");
            return Ok(());
        }
    };

    info!(symbol = %symbol, interval = %interval, "kline WebSocket connected");
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let close = Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client disconnect".into(),
                }));
                if let Err(e) = write.send(close).await {
                    debug!(symbol = %symbol, error = %e, "kline close frame not delivered");
                }
                return Ok(());
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match parse_kline_message(&text) {
                        Ok(candle) => {
                            let open_time = candle.open_time;
                            let close = candle.close;
                            let snapshot = {
                                let mut guard = series.write();
                                let outcome = guard.merge(candle);
                                debug!(open_time, close, ?outcome, "candle merged");
                                guard.snapshot()
                            };
                            series_tx.send_replace(Arc::new(snapshot));
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse kline message");
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(symbol = %symbol, error = %e, "kline WebSocket read error");
                    return Err(e.into());
                }
                None => {
                    warn!(symbol = %symbol, interval = %interval, "kline WebSocket stream ended");
                    return Ok(());
                }
            }
        }
    }
}

/// Parse a single-stream kline message into a [`Candle`].
///
/// Expected shape (extra fields at both levels are ignored):
/// ```json
/// { "e": "kline", "s": "BTCUSDT", "k": {
///     "t": 1700000000000, "T": 1700000059999,
///     "o": "37000.0", "h": "37050.0", "l": "36990.0", "c": "37020.0",
///     "v": "123.456", ...
/// } }
/// ```
fn parse_kline_message(text: &str) -> Result<Candle, FeedError> {
    let root: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| FeedError::Decode(format!("invalid kline JSON: {e}")))?;

    let k = root
        .get("k")
        .filter(|v| v.is_object())
        .ok_or_else(|| FeedError::Decode("missing candle object k".to_string()))?;

    let open_time = k["t"]
        .as_i64()
        .ok_or_else(|| FeedError::Decode("missing field k.t".to_string()))?;
    let close_time = k["T"]
        .as_i64()
        .ok_or_else(|| FeedError::Decode("missing field k.T".to_string()))?;

    let open = parse_decimal(&k["o"], "k.o")?;
    let high = parse_decimal(&k["h"], "k.h")?;
    let low = parse_decimal(&k["l"], "k.l")?;
    let close = parse_decimal(&k["c"], "k.c")?;
    let volume = parse_decimal(&k["v"], "k.v")?;

    Ok(Candle {
        open_time,
        close_time,
        open,
        high,
        low,
        close,
        volume,
    })
}

/// Binance sends numeric values as JSON strings inside kline objects.
fn parse_decimal(val: &serde_json::Value, name: &str) -> Result<f64, FeedError> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| FeedError::Decode(format!("failed to parse {name} as f64: {s}"))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| FeedError::Decode(format!("field {name} is not a valid f64"))),
        _ => Err(FeedError::Decode(format!(
            "field {name} has unexpected JSON type"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
