//! Exactly-once guard for inbound provider events.
//!
//! Thin wrapper over the store's atomic check-and-record. Check-then-insert
//! done as two operations is the classic race; the store keeps both halves
//! in one atomic step backed by a unique constraint on
//! `(conversion_id, event_key)`.

use std::sync::Arc;

use cambio_common::{ConversionId, EventKey, Result};
use tracing::debug;

use crate::store::ConversionStore;

/// Deduplicates inbound provider events by their stable event key.
pub struct EventIdempotencyStore {
    store: Arc<dyn ConversionStore>,
}

impl EventIdempotencyStore {
    /// Create a new idempotency store over the durable store.
    pub fn new(store: Arc<dyn ConversionStore>) -> Self {
        Self { store }
    }

    /// Atomically record the key. Returns `true` when this is the first
    /// time the key has been seen for this conversion.
    pub async fn try_consume(
        &self,
        conversion_id: ConversionId,
        event_key: &EventKey,
    ) -> Result<bool> {
        let fresh = self.store.try_consume_event(conversion_id, event_key).await?;
        if !fresh {
            debug!(
                conversion_id = %conversion_id,
                event_key = %event_key,
                "event key already consumed"
            );
        }
        Ok(fresh)
    }

    /// Read-only probe: has the key already been applied?
    pub async fn was_applied(
        &self,
        conversion_id: ConversionId,
        event_key: &EventKey,
    ) -> Result<bool> {
        self.store.event_applied(conversion_id, event_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_first_consume_wins() {
        let store = Arc::new(MemoryStore::new());
        let idempotency = EventIdempotencyStore::new(store);
        let conversion_id = ConversionId::new();
        let key = EventKey::new("wh_123");

        assert!(!idempotency.was_applied(conversion_id, &key).await.unwrap());
        assert!(idempotency.try_consume(conversion_id, &key).await.unwrap());
        assert!(!idempotency.try_consume(conversion_id, &key).await.unwrap());
        assert!(idempotency.was_applied(conversion_id, &key).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_consumers_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let idempotency = Arc::new(EventIdempotencyStore::new(store));
        let conversion_id = ConversionId::new();
        let key = EventKey::new("wh_123");

        let a = {
            let idempotency = idempotency.clone();
            let key = key.clone();
            tokio::spawn(async move { idempotency.try_consume(conversion_id, &key).await })
        };
        let b = {
            let idempotency = idempotency.clone();
            let key = key.clone();
            tokio::spawn(async move { idempotency.try_consume(conversion_id, &key).await })
        };

        let first = a.await.unwrap().unwrap();
        let second = b.await.unwrap().unwrap();
        assert!(first ^ second, "exactly one delivery must win");
    }
}
