//! # Data Ingestors Module
//!
//! The two independent pipelines that pull data from upstream.
//!
//! ## Contained Modules:
//! - **`quote_poller`**: Walks the symbol universe in batches on a fixed tick,
//!   feeding the snapshot cache and the hub.
//! - **`backfill`**: A fixed pool of workers draining a pre-loaded queue of
//!   symbols, fetching full daily history with bounded retries and persisting it.

/// Fixed-interval realtime quote poller.
pub mod quote_poller;
/// Historical backfill worker pool.
pub mod backfill;

// --- Public API Re-exports ---
pub use backfill::{BackfillConfig, BackfillPool, BackfillSummary};
pub use quote_poller::{PollSummary, QuotePoller};
