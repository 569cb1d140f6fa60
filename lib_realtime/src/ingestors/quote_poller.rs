//! # Realtime Quote Poller
//!
//! Runs for the process lifetime on a fixed tick:
//! `idle -> fetch batch -> update cache and publish -> (next batch) -> wait for tick`.
//!
//! A batch that fails is logged and skipped; its symbols simply keep their
//! previous snapshot until the next tick. There is no backoff at this layer,
//! the polling cadence itself absorbs transient failures. A tick that runs long
//! delays the following ticks instead of bunching them up.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::hub::HubHandle;
use crate::core::snapshot::SnapshotCache;
use crate::markets::sina::quote_source::QuoteSource;

/// Outcome of one walk over the symbol universe.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub batches: usize,
    pub failed_batches: usize,
    pub quotes: usize,
}

pub struct QuotePoller {
    source: Arc<QuoteSource>,
    snapshot: Arc<SnapshotCache>,
    hub: HubHandle,
    symbols: Vec<String>,
    interval: Duration,
}

impl QuotePoller {
    pub fn new(
        source: Arc<QuoteSource>,
        snapshot: Arc<SnapshotCache>,
        hub: HubHandle,
        symbols: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            snapshot,
            hub,
            symbols,
            interval,
        }
    }

    /// # Main Execution Loop
    ///
    /// Polls once per tick until `shutdown` is cancelled or the hub stops. The
    /// first tick fires immediately.
    pub async fn run(self, shutdown: CancellationToken) {
        log::info!(
            "Quote poller started: {} symbols every {:?}",
            self.symbols.len(),
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let summary = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                summary = self.poll_once() => summary,
            };
            if summary.failed_batches > 0 {
                log::warn!(
                    "Poll finished with {}/{} failed batches, {} quotes",
                    summary.failed_batches,
                    summary.batches,
                    summary.quotes
                );
            } else {
                log::debug!("Poll finished: {} batches, {} quotes", summary.batches, summary.quotes);
            }

            if self.hub.is_closed() {
                log::warn!("Hub is gone, stopping quote poller");
                break;
            }
        }
        log::info!("Quote poller stopped");
    }

    /// One walk over the whole universe, batch by batch.
    pub async fn poll_once(&self) -> PollSummary {
        let mut summary = PollSummary::default();

        for batch in QuoteSource::batches(&self.symbols) {
            summary.batches += 1;

            // --- Phase 1: Fetch ---
            let quotes = match self.source.fetch_batch(batch).await {
                Ok(quotes) => quotes,
                Err(e) => {
                    summary.failed_batches += 1;
                    log::warn!("Realtime poll error for batch starting at {}: {}", batch[0], e);
                    continue;
                }
            };

            // --- Phase 2: Update Cache and Publish ---
            for quote in quotes {
                summary.quotes += 1;
                self.snapshot.set(quote.symbol.clone(), quote.clone());
                if self.hub.publish(quote).await.is_err() {
                    return summary;
                }
            }
        }
        summary
    }
}
