//! # Backfill Worker Pool
//!
//! Bulk historical fetch-and-persist, independent of live polling.
//!
//! ## Workflow:
//! 1.  Every symbol is enqueued up front on a bounded queue sized to the job
//!     count, then the queue is closed. No job appears mid-run.
//! 2.  `workers` tasks share the receiving end and pull jobs until the queue is
//!     drained. Each job is taken by exactly one worker.
//! 3.  Per job a worker makes up to `max_attempts` tries. A try is a full
//!     history fetch followed by a persist; the first success ends the job. After
//!     failed try `n` the worker sleeps `n * backoff` before the next one. When
//!     every try failed the symbol is abandoned and logged; it is never requeued.
//! 4.  After each job, whatever its outcome, the worker sleeps the politeness
//!     delay to throttle the aggregate request rate.
//! 5.  `run` returns once every worker has finished (a plain join barrier).
//!
//! Cancellation is observed before each fetch and during every sleep. A persist
//! that has started is allowed to finish.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::markets::sina::history::HistoryFeed;
use crate::markets::sina::quote_source::QuoteError;
use crate::models::BackfillJob;
use crate::storage::{StorageError, TimeSeriesStore};

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub workers: usize,
    pub max_attempts: u32,
    /// Base of the linear backoff between tries.
    pub backoff: Duration,
    pub politeness_delay: Duration,
    /// Number of daily bars requested per symbol.
    pub days: u32,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            backoff: Duration::from_secs(1),
            politeness_delay: Duration::from_millis(200),
            days: 300,
        }
    }
}

/// What a run did. Not retained anywhere after it is returned.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillSummary {
    pub persisted: usize,
    pub abandoned: Vec<String>,
    pub cancelled: bool,
}

impl BackfillSummary {
    fn merge(&mut self, other: BackfillSummary) {
        self.persisted += other.persisted;
        self.abandoned.extend(other.abandoned);
    }
}

/// Why a single try failed.
#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("history fetch failed: {0}")]
    Fetch(#[from] QuoteError),
    #[error("persist failed: {0}")]
    Persist(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Persisted,
    Abandoned,
    Cancelled,
}

/// # Backfill Pool
///
/// Cheap to clone; each worker runs on its own clone.
#[derive(Clone)]
pub struct BackfillPool {
    history: Arc<dyn HistoryFeed>,
    store: Arc<dyn TimeSeriesStore>,
    config: BackfillConfig,
}

impl BackfillPool {
    pub fn new(
        history: Arc<dyn HistoryFeed>,
        store: Arc<dyn TimeSeriesStore>,
        config: BackfillConfig,
    ) -> Self {
        Self {
            history,
            store,
            config,
        }
    }

    /// # Run
    ///
    /// Backfills every symbol in `symbols` and waits for all workers to finish.
    pub async fn run(&self, symbols: Vec<String>, shutdown: CancellationToken) -> BackfillSummary {
        if symbols.is_empty() {
            return BackfillSummary {
                cancelled: shutdown.is_cancelled(),
                ..BackfillSummary::default()
            };
        }

        // --- Phase 1: Pre-load and Close the Queue ---
        let total = symbols.len();
        let (tx, rx) = mpsc::channel(total);
        for symbol in symbols {
            let job = BackfillJob {
                symbol,
                days: self.config.days,
            };
            if tx.send(job).await.is_err() {
                break;
            }
        }
        drop(tx);

        // --- Phase 2: Fan Out ---
        let queue = Arc::new(Mutex::new(rx));
        let workers = self.config.workers.clamp(1, total);
        log::info!("Backfill started: {} symbols, {} workers", total, workers);

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            set.spawn(
                self.clone()
                    .worker(worker_id, Arc::clone(&queue), shutdown.clone()),
            );
        }

        // --- Phase 3: Join Barrier ---
        let mut summary = BackfillSummary::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => summary.merge(report),
                Err(e) => log::error!("Backfill worker aborted: {}", e),
            }
        }
        summary.cancelled = shutdown.is_cancelled();

        log::info!(
            "Backfill finished: {}/{} persisted, {} abandoned{}",
            summary.persisted,
            total,
            summary.abandoned.len(),
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        summary
    }

    async fn worker(
        self,
        worker_id: usize,
        queue: Arc<Mutex<mpsc::Receiver<BackfillJob>>>,
        shutdown: CancellationToken,
    ) -> BackfillSummary {
        let mut report = BackfillSummary::default();
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let job = queue.lock().await.recv().await;
            let Some(job) = job else {
                break;
            };

            match self.backfill_symbol(&job, &shutdown).await {
                JobOutcome::Persisted => report.persisted += 1,
                JobOutcome::Abandoned => report.abandoned.push(job.symbol),
                JobOutcome::Cancelled => break,
            }

            if !pause(self.config.politeness_delay, &shutdown).await {
                break;
            }
        }
        log::debug!("Backfill worker {} done", worker_id);
        report
    }

    async fn backfill_symbol(&self, job: &BackfillJob, shutdown: &CancellationToken) -> JobOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return JobOutcome::Cancelled,
                fetched = self.history.fetch_history(&job.symbol, job.days) => fetched,
            };
            let result = match result {
                Ok(series) => self
                    .store
                    .persist_time_series(&job.symbol, &series)
                    .await
                    .map(|_| series.len())
                    .map_err(BackfillError::from),
                Err(e) => Err(BackfillError::from(e)),
            };

            match result {
                Ok(bars) => {
                    log::debug!("Backfilled {} ({} bars, attempt {})", job.symbol, bars, attempt);
                    return JobOutcome::Persisted;
                }
                Err(e) if attempt >= max_attempts => {
                    log::error!(
                        "Backfill for {} abandoned after {} attempts: {}",
                        job.symbol,
                        attempt,
                        e
                    );
                    return JobOutcome::Abandoned;
                }
                Err(e) => {
                    let delay = self.config.backoff * attempt;
                    log::warn!(
                        "Backfill attempt {}/{} for {} failed: {}. Retrying in {:?}",
                        attempt,
                        max_attempts,
                        job.symbol,
                        e,
                        delay
                    );
                    if !pause(delay, shutdown).await {
                        return JobOutcome::Cancelled;
                    }
                }
            }
            attempt += 1;
        }
    }
}

/// Sleeps for `delay`; `false` when shutdown was signalled first.
async fn pause(delay: Duration, shutdown: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !shutdown.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
