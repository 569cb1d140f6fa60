//! # Daily History Feed
//!
//! Full historical daily bars for one symbol, used by the backfill pool.
//! The endpoint answers with a JSON array of `{day, open, high, low, close, volume}`
//! where every numeric value is a string.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

use crate::markets::sina::quote_source::{http_client, QuoteError};
use crate::models::Candle;

/// Daily bars for the backfill pool. Implemented by the live endpoint and by
/// test fakes.
#[async_trait]
pub trait HistoryFeed: Send + Sync {
    async fn fetch_history(&self, symbol: &str, days: u32) -> Result<Vec<Candle>, QuoteError>;
}

pub struct SinaHistoryFeed {
    client: reqwest::Client,
    base_url: String,
}

impl SinaHistoryFeed {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, QuoteError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
        })
    }

    fn url(&self, symbol: &str, days: u32) -> String {
        format!(
            "{}?symbol={}&scale=240&ma=no&datalen={}",
            self.base_url, symbol, days
        )
    }
}

#[async_trait]
impl HistoryFeed for SinaHistoryFeed {
    async fn fetch_history(&self, symbol: &str, days: u32) -> Result<Vec<Candle>, QuoteError> {
        let url = self.url(symbol, days);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(QuoteError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        parse_history(&body)
    }
}

#[derive(Deserialize)]
struct RawCandle {
    #[serde(default)]
    day: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    open: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    high: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    low: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    close: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    volume: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<NumberOrText>::deserialize(deserializer)? {
        Some(NumberOrText::Number(n)) => n,
        Some(NumberOrText::Text(s)) => s.trim().parse().unwrap_or(0.0),
        None => 0.0,
    })
}

/// Decodes a history response. An empty body, `null`, or anything that is not
/// a JSON array of bars is a decode error so that the caller retries.
pub fn parse_history(body: &str) -> Result<Vec<Candle>, QuoteError> {
    let body = body.trim();
    if body.is_empty() || body == "null" {
        return Err(QuoteError::Decode("empty history response".to_string()));
    }

    let raw: Vec<RawCandle> =
        serde_json::from_str(body).map_err(|e| QuoteError::Decode(e.to_string()))?;

    Ok(raw
        .into_iter()
        .map(|r| Candle {
            day: r.day,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.volume,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_string_encoded_bars() {
        let body = r#"[
            {"day":"2024-06-13","open":"10.010","high":"10.100","low":"9.950","close":"10.050","volume":"31245600"},
            {"day":"2024-06-14","open":"10.050","high":"10.200","low":"10.000","close":"10.150","volume":"28877300"}
        ]"#;
        let candles = parse_history(body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].day, "2024-06-13");
        assert_eq!(candles[1].close, 10.15);
        assert_eq!(candles[1].volume, 28_877_300.0);
    }

    #[test]
    fn tolerates_numbers_and_garbage_values() {
        let body = r#"[{"day":"2024-06-14","open":10.5,"high":"n/a","low":null,"close":"11"}]"#;
        let candles = parse_history(body).unwrap();
        assert_eq!(candles[0].open, 10.5);
        assert_eq!(candles[0].high, 0.0);
        assert_eq!(candles[0].low, 0.0);
        assert_eq!(candles[0].close, 11.0);
        assert_eq!(candles[0].volume, 0.0);
    }

    #[test]
    fn empty_or_invalid_bodies_are_decode_errors() {
        for body in ["", "  ", "null", "<html>busy</html>", r#"{"error":"x"}"#] {
            let err = parse_history(body).unwrap_err();
            assert!(matches!(err, QuoteError::Decode(_)), "body {body:?}");
        }
    }

    #[test]
    fn request_url_carries_symbol_and_length() {
        let feed = SinaHistoryFeed::new("http://example.invalid/kline", Duration::from_secs(1)).unwrap();
        assert_eq!(
            feed.url("sh600000", 300),
            "http://example.invalid/kline?symbol=sh600000&scale=240&ma=no&datalen=300"
        );
    }
}
