//! # Shared Data Model
//!
//! Plain value types exchanged between the feed adapters, the hub, the
//! backfill pool and the storage collaborator.

use serde::{Deserialize, Serialize};

/// # Quote
///
/// One point-in-time price/volume record for a symbol. Immutable once parsed;
/// the symbol is its identity. The serialized form is what subscribers receive,
/// one JSON object per update.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Quote {
    /// Exchange-prefixed symbol, e.g. `sh600000`.
    #[serde(rename = "code")]
    pub symbol: String,
    pub name: String,
    pub price: f64,
    #[serde(rename = "prev_close")]
    pub previous_close: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: i64,
    /// `YYYY-MM-DD HH:MM:SS` as reported upstream, empty when the record was
    /// too short to carry one.
    #[serde(rename = "time")]
    pub timestamp: String,
}

/// One daily bar of a historical series.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Candle {
    pub day: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A unit of backfill work, consumed exactly once by whichever worker pulls it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillJob {
    pub symbol: String,
    pub days: u32,
}

/// Subscription verb carried by an inbound client command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Subscribe,
    Unsubscribe,
}

/// Inbound client command: `{"action":"subscribe","symbols":["sh600000"]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCommand {
    pub action: Action,
    #[serde(default)]
    pub symbols: Vec<String>,
}
