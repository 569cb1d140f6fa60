//! Sina Finance adapters.
//!
//! The realtime endpoint accepts up to [`quote_source::MAX_BATCH_SIZE`] symbols per
//! request and answers with `var hq_str_<symbol>="f0,f1,...";` records. The
//! history endpoint answers with a JSON array of daily bars.

pub mod history;
pub mod parser;
pub mod quote_source;

pub use history::{HistoryFeed, SinaHistoryFeed};
pub use parser::parse_payload;
pub use quote_source::{QuoteError, QuoteFeed, QuoteSource, SinaQuoteFeed, MAX_BATCH_SIZE};
