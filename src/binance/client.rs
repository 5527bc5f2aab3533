// =============================================================================
// Binance REST Client — kline history bootstrap
// =============================================================================
//
// Only the public market-data surface is used: a single unsigned GET to
// /api/v3/klines seeds the candle series before the live streams start.
// =============================================================================

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, instrument};

use crate::error::FeedError;
use crate::market_data::Candle;

/// Binance REST client for the public kline history endpoint.
#[derive(Debug, Clone)]
pub struct HistoryClient {
    base_url: String,
    client: reqwest::Client,
}

impl HistoryClient {
    /// Create a new `HistoryClient` against `base_url` with the given
    /// connect/read timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// GET /api/v3/klines (public — no signature required).
    ///
    /// Fetches candles covering the last `lookback_minutes` up to now,
    /// capped at `limit` rows, and returns them oldest first.
    ///
    /// Array indices consumed:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
    ///   [6] closeTime
    ///
    /// Any row that fails numeric extraction aborts the whole batch with a
    /// decode error; the feed never installs a partial history.
    #[instrument(skip(self), name = "binance::fetch_recent_klines")]
    pub async fn fetch_recent_klines(
        &self,
        symbol: &str,
        interval: &str,
        lookback_minutes: i64,
        limit: u32,
    ) -> Result<Vec<Candle>, FeedError> {
        let end_time = Utc::now().timestamp_millis();
        let start_time = end_time - lookback_minutes * 60_000;

        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&startTime={}&endTime={}&limit={}",
            self.base_url, symbol, interval, start_time, end_time, limit
        );

        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Fetch {
                status: status.as_u16(),
            });
        }

        let body = resp.text().await?;
        let candles = parse_history_batch(&body)?;

        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }
}

/// Parse the kline history response — a JSON array of positional arrays —
/// into candles, preserving row order.
fn parse_history_batch(body: &str) -> Result<Vec<Candle>, FeedError> {
    let root: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| FeedError::Decode(format!("invalid klines JSON: {e}")))?;

    let rows = root
        .as_array()
        .ok_or_else(|| FeedError::Decode("klines response is not an array".to_string()))?;

    let mut candles = Vec::with_capacity(rows.len());

    for (i, row) in rows.iter().enumerate() {
        let arr = row
            .as_array()
            .ok_or_else(|| FeedError::Decode(format!("kline row {i} is not an array")))?;

        if arr.len() < 7 {
            return Err(FeedError::Decode(format!(
                "kline row {i} has {} fields, expected at least 7",
                arr.len()
            )));
        }

        let open_time = arr[0]
            .as_i64()
            .ok_or_else(|| FeedError::Decode(format!("row {i}: open time is not an integer")))?;
        let open = parse_decimal(&arr[1], "open")?;
        let high = parse_decimal(&arr[2], "high")?;
        let low = parse_decimal(&arr[3], "low")?;
        let close = parse_decimal(&arr[4], "close")?;
        let volume = parse_decimal(&arr[5], "volume")?;
        let close_time = arr[6]
            .as_i64()
            .ok_or_else(|| FeedError::Decode(format!("row {i}: close time is not an integer")))?;

        candles.push(Candle {
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    Ok(candles)
}

/// Binance sends prices and volumes as JSON strings inside kline rows.
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

#[cfg(test)]
mod tests {
    use super::*;

    // Two rows in the real response shape, including the trailing fields
    // ([7..]) that the parser ignores.
    const SAMPLE_BATCH: &str = r#"[
        [1700000000000, "37000.00", "37050.00", "36990.00", "37020.00", "123.456",
         1700000059999, "4567890.12", 1500, "60.123", "2224455.66", "0"],
        [1700000060000, "37020.00", "37080.00", "37010.00", "37075.50", "98.765",
         1700000119999, "3661234.56", 1321, "45.678", "1693344.21", "0"]
    ]"#;

    #[test]
    fn parse_batch_maps_positional_fields() {
        let candles = parse_history_batch(SAMPLE_BATCH).expect("should parse");
        assert_eq!(candles.len(), 2);

        let first = &candles[0];
        assert_eq!(first.open_time, 1_700_000_000_000);
        assert_eq!(first.close_time, 1_700_000_059_999);
        assert!((first.open - 37_000.0).abs() < f64::EPSILON);
        assert!((first.high - 37_050.0).abs() < f64::EPSILON);
        assert!((first.low - 36_990.0).abs() < f64::EPSILON);
        assert!((first.close - 37_020.0).abs() < f64::EPSILON);
        assert!((first.volume - 123.456).abs() < f64::EPSILON);

        // Input order is preserved.
        assert_eq!(candles[1].open_time, 1_700_000_060_000);
        assert!((candles[1].close - 37_075.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_batch_yields_empty_series() {
        let candles = parse_history_batch("[]").unwrap();
        assert!(candles.is_empty());
    }

    #[test]
    fn one_bad_row_aborts_the_whole_batch() {
        let body = r#"[
            [1700000000000, "37000.00", "37050.00", "36990.00", "37020.00", "123.456", 1700000059999],
            [1700000060000, "oops", "37080.00", "37010.00", "37075.50", "98.765", 1700000119999]
        ]"#;
        assert!(matches!(
            parse_history_batch(body),
            Err(FeedError::Decode(_))
        ));
    }

    #[test]
    fn short_row_aborts_the_whole_batch() {
        let body = r#"[ [1700000000000, "37000.00", "37050.00"] ]"#;
        assert!(matches!(
            parse_history_batch(body),
            Err(FeedError::Decode(_))
        ));
    }

    #[test]
    fn non_array_response_is_a_decode_error() {
        let body = r#"{ "code": -1121, "msg": "Invalid symbol." }"#;
        assert!(matches!(
            parse_history_batch(body),
            Err(FeedError::Decode(_))
        ));
    }
}
