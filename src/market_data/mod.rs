pub mod kline_stream;
pub mod series;
pub mod trade_stream;

// Re-export the core types for convenient access (e.g. `use btc_feed::market_data::Candle`).
pub use series::{Candle, CandleSeries, MergeOutcome};
