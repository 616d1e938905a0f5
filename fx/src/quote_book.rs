//! In-process storage for issued quotes, enforcing single use and expiry.
//!
//! Quotes are deliberately ephemeral: they never reach the durable store,
//! and an uncommitted quote simply ages out of the book.

use cambio_common::{Quote, QuoteId};
use dashmap::DashMap;
use tracing::debug;

use crate::error::{FxError, FxResult};

#[derive(Debug, Clone)]
struct StoredQuote {
    quote: Quote,
    used: bool,
}

/// Holds issued quotes until they are committed or expire.
pub struct QuoteBook {
    quotes: DashMap<QuoteId, StoredQuote>,
}

impl QuoteBook {
    /// Create a new quote book.
    pub fn new() -> Self {
        Self {
            quotes: DashMap::new(),
        }
    }

    /// Store an issued quote.
    pub fn insert(&self, quote: Quote) {
        self.quotes.insert(
            quote.id,
            StoredQuote {
                quote,
                used: false,
            },
        );
    }

    /// Look up a quote without consuming it.
    pub fn get(&self, quote_id: QuoteId) -> Option<Quote> {
        self.quotes.get(&quote_id).map(|s| s.quote.clone())
    }

    /// Consume a quote for commitment. Fails fast on a quote that is
    /// missing, already used, or past its expiry; the check-and-mark is
    /// atomic under the entry lock.
    pub fn consume(&self, quote_id: QuoteId) -> FxResult<Quote> {
        let mut entry = self
            .quotes
            .get_mut(&quote_id)
            .ok_or(FxError::QuoteNotFound(quote_id))?;

        if entry.used {
            return Err(FxError::QuoteAlreadyUsed(quote_id));
        }
        if entry.quote.is_expired() {
            return Err(FxError::QuoteExpired(quote_id));
        }

        entry.used = true;
        debug!(quote_id = %quote_id, "quote consumed");
        Ok(entry.quote.clone())
    }

    /// Drop expired and consumed quotes.
    pub fn evict_stale(&self) {
        let before = self.quotes.len();
        self.quotes
            .retain(|_, stored| !stored.used && !stored.quote.is_expired());
        let evicted = before - self.quotes.len();
        if evicted > 0 {
            debug!(evicted, "evicted stale quotes");
        }
    }

    /// Get the number of quotes in the book.
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    /// Check if the book is empty.
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

impl Default for QuoteBook {
    fn default() -> Self {
        Self::new()
    }
}
