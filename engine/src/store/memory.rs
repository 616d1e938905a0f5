//! In-memory store for tests and the simulator.
//!
//! Not durable; the map mutations in the composite operations rely on the
//! state machine's per-conversion and per-customer serialization rather
//! than transactions.

use async_trait::async_trait;
use cambio_common::{
    AffiliateId, CambioError, CommissionId, Conversion, ConversionId, CustomerId, EventKey,
    Result,
};
use cambio_ledger::{BalanceSnapshot, CommissionEntry, EntryPair, LedgerEntry};
use dashmap::{DashMap, DashSet};

use super::{CommissionFilter, ConversionStore};

/// DashMap-backed store with the same surface as the Postgres one.
#[derive(Default)]
pub struct MemoryStore {
    conversions: DashMap<ConversionId, Conversion>,
    provider_refs: DashMap<String, ConversionId>,
    balances: DashMap<CustomerId, BalanceSnapshot>,
    entries: DashMap<ConversionId, Vec<LedgerEntry>>,
    commissions: DashMap<CommissionId, CommissionEntry>,
    commissions_by_conversion: DashMap<ConversionId, CommissionId>,
    applied_events: DashSet<(ConversionId, String)>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn index_provider_ref(&self, conversion: &Conversion) {
        if let Some(provider_ref) = &conversion.provider_ref {
            self.provider_refs
                .insert(provider_ref.clone(), conversion.id);
        }
    }

    fn insert_commission(&self, entry: &CommissionEntry) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        // Unique per conversion, enforced at the map entry.
        match self.commissions_by_conversion.entry(entry.conversion_id) {
            Entry::Occupied(_) => Err(CambioError::Storage(format!(
                "commission already exists for conversion {}",
                entry.conversion_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(entry.id);
                self.commissions.insert(entry.id, entry.clone());
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ConversionStore for MemoryStore {
    async fn insert_conversion(&self, conversion: &Conversion) -> Result<()> {
        self.conversions.insert(conversion.id, conversion.clone());
        self.index_provider_ref(conversion);
        Ok(())
    }

    async fn update_conversion(&self, conversion: &Conversion) -> Result<()> {
        self.conversions.insert(conversion.id, conversion.clone());
        self.index_provider_ref(conversion);
        Ok(())
    }

    async fn get_conversion(&self, id: ConversionId) -> Result<Option<Conversion>> {
        Ok(self.conversions.get(&id).map(|c| c.clone()))
    }

    async fn conversion_by_provider_ref(
        &self,
        provider_ref: &str,
    ) -> Result<Option<Conversion>> {
        match self.provider_refs.get(provider_ref) {
            Some(id) => self.get_conversion(*id).await,
            None => Ok(None),
        }
    }

    async fn get_balance(&self, customer_id: &CustomerId) -> Result<Option<BalanceSnapshot>> {
        Ok(self.balances.get(customer_id).map(|b| b.clone()))
    }

    async fn put_balance(&self, balance: &BalanceSnapshot) -> Result<()> {
        self.balances
            .insert(balance.customer_id.clone(), balance.clone());
        Ok(())
    }

    async fn entries_for_conversion(&self, id: ConversionId) -> Result<Vec<LedgerEntry>> {
        Ok(self.entries.get(&id).map(|e| e.clone()).unwrap_or_default())
    }

    async fn get_commission(&self, id: CommissionId) -> Result<Option<CommissionEntry>> {
        Ok(self.commissions.get(&id).map(|c| c.clone()))
    }

    async fn commission_for_conversion(
        &self,
        id: ConversionId,
    ) -> Result<Option<CommissionEntry>> {
        match self.commissions_by_conversion.get(&id) {
            Some(commission_id) => self.get_commission(*commission_id).await,
            None => Ok(None),
        }
    }

    async fn commissions_for_affiliate(
        &self,
        affiliate_id: &AffiliateId,
        filter: &CommissionFilter,
    ) -> Result<Vec<CommissionEntry>> {
        let mut entries: Vec<CommissionEntry> = self
            .commissions
            .iter()
            .filter(|entry| entry.affiliate_id == *affiliate_id && filter.matches(entry))
            .map(|entry| entry.clone())
            .collect();
        entries.sort_by_key(|entry| entry.created_at);
        Ok(entries)
    }

    async fn update_commission(&self, entry: &CommissionEntry) -> Result<()> {
        if !self.commissions.contains_key(&entry.id) {
            return Err(CambioError::CommissionNotFound(entry.id));
        }
        self.commissions.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn try_consume_event(
        &self,
        conversion_id: ConversionId,
        event_key: &EventKey,
    ) -> Result<bool> {
        // DashSet::insert is the atomic check-and-record.
        Ok(self
            .applied_events
            .insert((conversion_id, event_key.as_str().to_string())))
    }

    async fn event_applied(
        &self,
        conversion_id: ConversionId,
        event_key: &EventKey,
    ) -> Result<bool> {
        Ok(self
            .applied_events
            .contains(&(conversion_id, event_key.as_str().to_string())))
    }

    async fn record_settlement(
        &self,
        conversion: &Conversion,
        entries: &EntryPair,
        balance: &BalanceSnapshot,
        commission: Option<&CommissionEntry>,
    ) -> Result<()> {
        if let Some(entry) = commission {
            self.insert_commission(entry)?;
        }
        self.entries
            .entry(conversion.id)
            .or_default()
            .extend([entries.debit.clone(), entries.credit.clone()]);
        self.put_balance(balance).await?;
        self.update_conversion(conversion).await
    }

    async fn record_reversal(
        &self,
        conversion: &Conversion,
        entries: &EntryPair,
        balance: &BalanceSnapshot,
    ) -> Result<()> {
        self.entries
            .entry(conversion.id)
            .or_default()
            .extend([entries.debit.clone(), entries.credit.clone()]);
        self.put_balance(balance).await?;
        self.update_conversion(conversion).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cambio_common::{
        time, Currency, CurrencyPair, Direction, FeeBreakdown, Money, Quote, QuoteId,
    };
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn make_conversion() -> Conversion {
        let now = time::now();
        let quote = Quote {
            id: QuoteId::new(),
            customer_id: CustomerId::new("cus_1"),
            direction: Direction::Buy,
            pair: CurrencyPair::usdt_brl(),
            base_rate: dec!(6.00),
            spread_percent: dec!(1.0),
            effective_rate: dec!(6.06),
            gross_amount: Money::new(1_000_00, Currency::Brl),
            net_amount: Money::new(998_00, Currency::Brl),
            output_amount: Money::new(164_686_468, Currency::Usdt),
            fees: FeeBreakdown {
                gateway_fee: Money::new(2_00, Currency::Brl),
                exchange_fee: Money::zero(Currency::Brl),
                internal_fee: Money::new(9_89, Currency::Brl),
            },
            created_at: now,
            expires_at: now + Duration::seconds(90),
        };
        Conversion::from_quote(quote, None)
    }

    #[tokio::test]
    async fn test_conversion_round_trip() {
        let store = MemoryStore::new();
        let mut conversion = make_conversion();
        store.insert_conversion(&conversion).await.unwrap();

        let loaded = store.get_conversion(conversion.id).await.unwrap().unwrap();
        assert_eq!(loaded, conversion);

        conversion.set_provider_ref("pix_charge_42");
        store.update_conversion(&conversion).await.unwrap();

        let by_ref = store
            .conversion_by_provider_ref("pix_charge_42")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_ref.id, conversion.id);
    }

    #[tokio::test]
    async fn test_event_consume_is_scoped_per_conversion() {
        let store = MemoryStore::new();
        let a = ConversionId::new();
        let b = ConversionId::new();
        let key = EventKey::new("wh_123");

        assert!(store.try_consume_event(a, &key).await.unwrap());
        assert!(!store.try_consume_event(a, &key).await.unwrap());
        assert!(store.event_applied(a, &key).await.unwrap());

        // The same key on a different conversion is fresh.
        assert!(store.try_consume_event(b, &key).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_commission_rejected() {
        let store = MemoryStore::new();
        let conversion_id = ConversionId::new();
        let entry = CommissionEntry {
            id: CommissionId::new(),
            conversion_id,
            affiliate_id: AffiliateId::new("aff_1"),
            amount_brl: Money::new(5_00, Currency::Brl),
            amount_usdt: Money::new(825_082, Currency::Usdt),
            status: cambio_ledger::CommissionStatus::Pending,
            created_at: time::now(),
            paid_at: None,
        };

        store.insert_commission(&entry).unwrap();
        let mut second = entry.clone();
        second.id = CommissionId::new();
        assert!(store.insert_commission(&second).is_err());
    }
}
