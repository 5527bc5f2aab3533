// =============================================================================
// Feed error taxonomy
// =============================================================================
//
// Every failure mode of the feed maps onto one of these variants. None of
// them ever reach a consumer as a panic: the stream client converts them
// into status/price observable updates at the boundary where they occur.
// A peer-initiated close is not an error — stream loops return Ok(()) and
// the client publishes a closed status instead.
// =============================================================================

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors produced by the market-data feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The kline history endpoint answered with a non-success HTTP status.
    #[error("history request returned HTTP {status}")]
    Fetch { status: u16 },

    /// The kline history request failed at the transport level.
    #[error("history request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A payload did not have the expected shape — either a REST history
    /// batch or a single stream message.
    #[error("failed to decode payload: {0}")]
    Decode(String),

    /// A WebSocket connection failed to establish or dropped mid-read.
    #[error("websocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),
}
