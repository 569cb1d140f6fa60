//! # Quote Source Adapter
//!
//! Turns an ordered symbol list into [`Quote`]s. The upstream accepts at most
//! [`MAX_BATCH_SIZE`] symbols per request; larger lists are split into batches
//! before any network call is made.
//!
//! The network call itself sits behind the [`QuoteFeed`] trait so the poller and
//! the oracle can be driven by canned payloads in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::REFERER;
use thiserror::Error;

use crate::markets::sina::parser::parse_payload;
use crate::models::Quote;

/// Hard limit of the upstream realtime endpoint.
pub const MAX_BATCH_SIZE: usize = 60;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("cannot decode upstream payload: {0}")]
    Decode(String),
    #[error("batch of {0} symbols exceeds the upstream limit of 60")]
    BatchTooLarge(usize),
}

/// Raw transport for one realtime batch request.
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    /// Returns the undecoded payload for at most [`MAX_BATCH_SIZE`] symbols.
    async fn request_batch(&self, symbols: &[String]) -> Result<String, QuoteError>;
}

/// `GET {base_url}{sym1,sym2,...}` with the `Referer` header the upstream
/// insists on.
pub struct SinaQuoteFeed {
    client: reqwest::Client,
    base_url: String,
    referer: String,
}

impl SinaQuoteFeed {
    pub fn new(
        base_url: impl Into<String>,
        referer: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, QuoteError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
            referer: referer.into(),
        })
    }
}

/// Shared client settings for the Sina endpoints.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, QuoteError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}

#[async_trait]
impl QuoteFeed for SinaQuoteFeed {
    async fn request_batch(&self, symbols: &[String]) -> Result<String, QuoteError> {
        let url = format!("{}{}", self.base_url, symbols.join(","));
        let response = self
            .client
            .get(&url)
            .header(REFERER, self.referer.as_str())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(QuoteError::Status {
                status: status.as_u16(),
                url,
            });
        }

        // The feed is GBK encoded; only the name field is affected by a lossy decode.
        let bytes = response.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// # Quote Source
///
/// Batching and parsing on top of a [`QuoteFeed`].
#[derive(Clone)]
pub struct QuoteSource {
    feed: Arc<dyn QuoteFeed>,
}

impl QuoteSource {
    pub fn new(feed: Arc<dyn QuoteFeed>) -> Self {
        Self { feed }
    }

    /// Convenience constructor for the live Sina endpoint.
    pub fn sina(
        base_url: impl Into<String>,
        referer: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, QuoteError> {
        Ok(Self::new(Arc::new(SinaQuoteFeed::new(base_url, referer, timeout)?)))
    }

    /// Splits `symbols` into consecutive batches of at most [`MAX_BATCH_SIZE`].
    pub fn batches(symbols: &[String]) -> std::slice::Chunks<'_, String> {
        symbols.chunks(MAX_BATCH_SIZE)
    }

    /// One network request for one batch. No retry at this layer.
    pub async fn fetch_batch(&self, batch: &[String]) -> Result<Vec<Quote>, QuoteError> {
        if batch.len() > MAX_BATCH_SIZE {
            return Err(QuoteError::BatchTooLarge(batch.len()));
        }
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let raw = self.feed.request_batch(batch).await?;
        Ok(parse_payload(&raw))
    }

    /// # Fetch
    ///
    /// Fetches any number of symbols, batch by batch, and merges the results in
    /// batch order. A failed batch is logged and contributes nothing; an error is
    /// returned only when every batch failed, carrying the last batch's error.
    pub async fn fetch(&self, symbols: &[String]) -> Result<Vec<Quote>, QuoteError> {
        let mut quotes = Vec::with_capacity(symbols.len());
        let mut last_error = None;
        let mut succeeded = 0usize;

        for (index, batch) in Self::batches(symbols).enumerate() {
            match self.fetch_batch(batch).await {
                Ok(mut parsed) => {
                    succeeded += 1;
                    quotes.append(&mut parsed);
                }
                Err(e) => {
                    log::warn!("Quote batch {} ({} symbols) failed: {}", index, batch.len(), e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if succeeded == 0 => Err(e),
            _ => Ok(quotes),
        }
    }

    /// Single-symbol fetch; `None` when the upstream had no usable record.
    pub async fn fetch_one(&self, symbol: &str) -> Result<Option<Quote>, QuoteError> {
        let batch = [symbol.to_string()];
        let quotes = self.fetch_batch(&batch).await?;
        Ok(quotes.into_iter().find(|q| q.symbol == symbol))
    }
}
