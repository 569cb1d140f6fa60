//! # Market Data Module
//!
//! Upstream adapters and market-calendar logic.
//!
//! ## Contained Modules:
//!
//! - **`sina`**: Batched realtime quote requests, the semicolon-delimited payload
//!   parser, and the daily K-line history endpoint used by the backfill pool.
//! - **`market_hours`**: The market-open oracle. A weekday/trading-window check in
//!   Asia/Shanghai followed by one live probe quote whose date must be today.

/// Sina Finance realtime and historical feeds.
pub mod sina;
/// Trading-window check and live-probe freshness oracle.
pub mod market_hours;

pub use market_hours::MarketOracle;
