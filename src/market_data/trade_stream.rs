// =============================================================================
// Trade Stream — publishes the last traded price
// =============================================================================

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::FeedError;

/// Connect to the Binance trade WebSocket stream for a single symbol and
/// publish every tick on `price_tx` as `"<price> USD"`.
///
/// Publishes `"Connected"` once the handshake completes, before the first
/// tick arrives. Malformed messages are logged and dropped without closing
/// the connection; only transport errors end the stream.
///
/// Returns `Ok(())` when the peer closes the connection or `shutdown`
/// fires (a normal-closure frame is sent in that case). There is no
/// automatic reconnect; the caller decides whether to connect again.
pub async fn run_trade_stream(
    ws_base: &str,
    symbol: &str,
    price_tx: &watch::Sender<String>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), FeedError> {
    let lower = symbol.to_lowercase();
    let url = format!("{ws_base}/ws/{lower}@trade");
    info!(url = %url, symbol = %symbol, "connecting to trade WebSocket");

    let (ws_stream, _response) = tokio::select! {
        res = connect_async(&url) => res?,
        _ = shutdown.changed() => {
            debug!(symbol = %symbol, "shutdown during trade WebSocket handshake");
            return Ok(());
        }
    };

    info!(symbol = %symbol, "trade WebSocket connected");
    price_tx.send_replace("Connected".to_string());

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let close = Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client disconnect".into(),
                }));
                if let Err(e) = write.send(close).await {
                    debug!(symbol = %symbol, error = %e, "trade close frame not delivered");
                }
                return Ok(());
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match extract_trade_price(&text) {
                        Ok(price) => {
                            price_tx.send_replace(format!("{price} USD"));
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse trade message");
                        }
                    }
                }
                // Ping/Pong/Binary frames — tungstenite answers pings itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(symbol = %symbol, error = %e, "trade WebSocket read error");
                    return Err(e.into());
                }
                None => {
                    warn!(symbol = %symbol, "trade WebSocket stream ended");
                    return Ok(());
                }
            }
        }
    }
}

/// Extract the last-traded price from a trade message.
///
/// Expected shape (extra fields are ignored):
/// ```json
/// { "e": "trade", "s": "BTCUSDT", "p": "67123.45", "q": "0.012", ... }
/// ```
///
/// The price is returned verbatim as Binance sent it; it is only checked to
/// be a valid decimal.
fn extract_trade_price(text: &str) -> Result<String, FeedError> {
    let root: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| FeedError::Decode(format!("invalid trade JSON: {e}")))?;

    let price = root["p"]
        .as_str()
        .ok_or_else(|| FeedError::Decode("missing field p".to_string()))?;

    price
        .parse::<f64>()
        .map_err(|_| FeedError::Decode(format!("field p is not a decimal: {price}")))?;

    Ok(price.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_price_from_full_message() {
        let json = r#"{
            "e": "trade",
            "E": 1700000000123,
            "s": "BTCUSDT",
            "t": 3456789,
            "p": "67123.45",
            "q": "0.01200000",
            "T": 1700000000120,
            "m": true,
            "M": true
        }"#;
        assert_eq!(extract_trade_price(json).unwrap(), "67123.45");
    }

    #[test]
    fn extract_price_keeps_decimal_string_verbatim() {
        let json = r#"{ "p": "67000.10000000" }"#;
        assert_eq!(extract_trade_price(json).unwrap(), "67000.10000000");
    }

    #[test]
    fn missing_price_field_is_a_decode_error() {
        let json = r#"{ "e": "trade", "s": "BTCUSDT" }"#;
        assert!(matches!(
            extract_trade_price(json),
            Err(FeedError::Decode(_))
        ));
    }

    #[test]
    fn non_decimal_price_is_a_decode_error() {
        let json = r#"{ "p": "not-a-number" }"#;
        assert!(matches!(
            extract_trade_price(json),
            Err(FeedError::Decode(_))
        ));
    }

    #[test]
    fn invalid_json_is_a_decode_error() {
        assert!(matches!(
            extract_trade_price("{ truncated"),
            Err(FeedError::Decode(_))
        ));
    }
}
