//! Durable storage abstraction for pipeline state.
//!
//! Conversions, balance snapshots, ledger entries, commission entries, and
//! applied event keys must survive process restarts. Quotes deliberately do
//! not: they are ephemeral and live in the in-process quote book.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use cambio_common::{
    AffiliateId, CommissionId, Conversion, ConversionId, CustomerId, EventKey, Result, Timestamp,
};
use cambio_ledger::{BalanceSnapshot, CommissionEntry, CommissionStatus, EntryPair, LedgerEntry};

pub use memory::MemoryStore;
pub use pg::PgStore;

/// Filters for commission listings.
#[derive(Debug, Clone, Default)]
pub struct CommissionFilter {
    /// Only entries in this payout state.
    pub status: Option<CommissionStatus>,
    /// Only entries created at or after this instant.
    pub since: Option<Timestamp>,
    /// Only entries created before this instant.
    pub until: Option<Timestamp>,
}

impl CommissionFilter {
    /// Check whether an entry passes the filter.
    pub fn matches(&self, entry: &CommissionEntry) -> bool {
        if let Some(status) = self.status {
            if entry.status != status {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.created_at >= until {
                return false;
            }
        }
        true
    }
}

/// Durable store for the conversion pipeline.
#[async_trait]
pub trait ConversionStore: Send + Sync {
    /// Insert a freshly committed conversion.
    async fn insert_conversion(&self, conversion: &Conversion) -> Result<()>;

    /// Persist an updated conversion.
    async fn update_conversion(&self, conversion: &Conversion) -> Result<()>;

    /// Load a conversion by ID.
    async fn get_conversion(&self, id: ConversionId) -> Result<Option<Conversion>>;

    /// Load a conversion by its provider charge/order reference.
    async fn conversion_by_provider_ref(&self, provider_ref: &str)
        -> Result<Option<Conversion>>;

    /// Load a customer's balance snapshot.
    async fn get_balance(&self, customer_id: &CustomerId) -> Result<Option<BalanceSnapshot>>;

    /// Persist a customer's balance snapshot.
    async fn put_balance(&self, balance: &BalanceSnapshot) -> Result<()>;

    /// Ledger entries recorded for a conversion.
    async fn entries_for_conversion(&self, id: ConversionId) -> Result<Vec<LedgerEntry>>;

    /// Load a commission entry by ID.
    async fn get_commission(&self, id: CommissionId) -> Result<Option<CommissionEntry>>;

    /// The commission entry for a conversion, if one was created.
    async fn commission_for_conversion(
        &self,
        id: ConversionId,
    ) -> Result<Option<CommissionEntry>>;

    /// Commission entries owed to an affiliate, filtered.
    async fn commissions_for_affiliate(
        &self,
        affiliate_id: &AffiliateId,
        filter: &CommissionFilter,
    ) -> Result<Vec<CommissionEntry>>;

    /// Persist an updated commission entry (payout transition).
    async fn update_commission(&self, entry: &CommissionEntry) -> Result<()>;

    /// Atomically check-and-record an event key for a conversion. Returns
    /// `true` when this is the first time the key has been seen.
    ///
    /// This is the single source of truth for exactly-once semantics: the
    /// check and the record are one operation, backed by a unique
    /// constraint on `(conversion_id, event_key)`.
    async fn try_consume_event(
        &self,
        conversion_id: ConversionId,
        event_key: &EventKey,
    ) -> Result<bool>;

    /// Read-only probe: has this key already been applied to this
    /// conversion?
    async fn event_applied(
        &self,
        conversion_id: ConversionId,
        event_key: &EventKey,
    ) -> Result<bool>;

    /// Persist the full outcome of a settlement transition: the updated
    /// conversion, its entry pair, the mutated balance, and the commission
    /// entry if one was earned. Implementations apply this as one unit.
    async fn record_settlement(
        &self,
        conversion: &Conversion,
        entries: &EntryPair,
        balance: &BalanceSnapshot,
        commission: Option<&CommissionEntry>,
    ) -> Result<()>;

    /// Persist the outcome of a refund reversal as one unit.
    async fn record_reversal(
        &self,
        conversion: &Conversion,
        entries: &EntryPair,
        balance: &BalanceSnapshot,
    ) -> Result<()>;
}
