//! # Market-Open Oracle
//!
//! Decides whether the Shanghai/Shenzhen market is trading right now.
//!
//! 1. Weekends and any time outside the morning (09:30-11:30) and afternoon
//!    (13:00-15:00) sessions, Asia/Shanghai, are closed. Both bounds are inclusive.
//!    No network call is made in that case.
//! 2. Otherwise a single probe quote is fetched. The market is open only when
//!    the probe succeeds, carries a nonzero price, and its date is today.
//!
//! There is no holiday calendar: a holiday is detected because the probe quote
//! still carries the last trading day's date. Freshness compares the date only,
//! so a stale quote from earlier the same day still reads as open.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use chrono_tz::Asia::Shanghai;
use chrono_tz::Tz;

use crate::markets::sina::quote_source::QuoteSource;
use crate::models::Quote;

/// Trading sessions as inclusive `[start, end]` seconds from local midnight.
const TRADING_WINDOWS: [(u32, u32); 2] = [
    (9 * 3600 + 30 * 60, 11 * 3600 + 30 * 60),
    (13 * 3600, 15 * 3600),
];

/// Weekday and time-of-day check only; `local` must already be Shanghai time.
pub fn within_trading_session(local: &DateTime<Tz>) -> bool {
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let secs = local.num_seconds_from_midnight();
    TRADING_WINDOWS
        .iter()
        .any(|&(start, end)| (start..=end).contains(&secs))
}

/// Date part of a quote's `YYYY-MM-DD HH:MM:SS` timestamp.
pub fn quote_date(quote: &Quote) -> Option<NaiveDate> {
    let date = quote.timestamp.split_whitespace().next()?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// A probe counts as live when it has a price and today's date.
pub fn quote_is_fresh(quote: &Quote, today: NaiveDate) -> bool {
    quote.price != 0.0 && quote_date(quote) == Some(today)
}

/// # Market Oracle
///
/// Stateless apart from its quote source; safe to share behind an `Arc`.
pub struct MarketOracle {
    source: Arc<QuoteSource>,
    default_probe: String,
}

impl MarketOracle {
    /// `default_probe` is used whenever the caller passes an empty symbol.
    pub fn new(source: Arc<QuoteSource>, default_probe: impl Into<String>) -> Self {
        Self {
            source,
            default_probe: default_probe.into(),
        }
    }

    pub async fn is_market_open(&self, symbol: &str) -> bool {
        self.is_market_open_at(symbol, Utc::now()).await
    }

    /// Same as [`is_market_open`](Self::is_market_open) for an explicit instant.
    pub async fn is_market_open_at(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&Shanghai);
        if !within_trading_session(&local) {
            return false;
        }

        let symbol = match symbol.trim() {
            "" => self.default_probe.as_str(),
            s => s,
        };

        match self.source.fetch_one(symbol).await {
            Ok(Some(quote)) => {
                let fresh = quote_is_fresh(&quote, local.date_naive());
                if !fresh {
                    log::debug!(
                        "Probe {} is stale (price {}, time '{}')",
                        symbol,
                        quote.price,
                        quote.timestamp
                    );
                }
                fresh
            }
            Ok(None) => {
                log::warn!("Market probe returned no record for {}", symbol);
                false
            }
            Err(e) => {
                log::warn!("Market probe for {} failed: {}", symbol, e);
                false
            }
        }
    }
}
