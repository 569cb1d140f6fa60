//! # Snapshot Cache
//!
//! In-memory mapping from symbol to the most recently parsed [`Quote`].
//!
//! Readers take a shared lock and clone the quote out, so a reader observes
//! either the prior or the new value of an entry, never a partial write. The
//! poller is the only writer. No history is kept: `set` simply replaces.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::models::Quote;

/// # Snapshot Cache
///
/// Last-write-wins store with at most one entry per symbol. Lives for the whole
/// process and is shared behind an `Arc` between the poller and the API layer.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    quotes: RwLock<HashMap<String, Quote>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the latest quote for `symbol`, or `None` before the
    /// first successful poll of that symbol.
    pub fn get(&self, symbol: &str) -> Option<Quote> {
        // A poisoned lock still holds a fully written map; entries are swapped whole.
        let quotes = self.quotes.read().unwrap_or_else(PoisonError::into_inner);
        quotes.get(symbol).cloned()
    }

    /// Replaces the entry for `symbol`.
    pub fn set(&self, symbol: impl Into<String>, quote: Quote) {
        let mut quotes = self.quotes.write().unwrap_or_else(PoisonError::into_inner);
        quotes.insert(symbol.into(), quote);
    }

    pub fn len(&self) -> usize {
        self.quotes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
