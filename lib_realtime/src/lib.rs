//! # lib_realtime
//!
//! Building blocks for a live quote feed and its historical backfill.
//!
//! Two independent pipelines live here:
//!
//! - **Live**: [`ingestors::quote_poller`] walks the symbol universe on a fixed
//!   cadence through [`markets::sina::quote_source`], writes every quote into the
//!   [`core::snapshot`](crate::core::snapshot) cache and publishes it to the [`core::hub`](crate::core::hub), which routes it
//!   to the [`core::session`](crate::core::session)s subscribed to that symbol.
//! - **Backfill**: [`ingestors::backfill`] drains a queue of symbols with a fixed
//!   set of workers, fetching full historical series and persisting them through
//!   the [`storage`] collaborator with bounded, linearly backed-off retries.
//!
//! Modules are feature gated the same way the rest of the workspace is; `full`
//! (the default) turns everything on.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod models;

#[cfg(feature = "core")]
pub mod core;
#[cfg(feature = "ingestors")]
pub mod ingestors;
#[cfg(feature = "markets")]
pub mod markets;
#[cfg(feature = "storage")]
pub mod storage;

pub use models::{Action, BackfillJob, Candle, ClientCommand, Quote};
