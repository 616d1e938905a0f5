//! Ledger entry types for the conversion double-entry record.

use cambio_common::{ConversionId, CustomerId, EntryId, Money, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Type of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    /// Value leaving the customer (the source leg).
    Debit,
    /// Value reaching the customer (the target leg).
    Credit,
}

/// A single ledger entry referencing its conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID.
    pub id: EntryId,
    /// Conversion this entry belongs to.
    pub conversion_id: ConversionId,
    /// Customer whose balance the entry concerns.
    pub customer_id: CustomerId,
    /// Entry type (debit or credit).
    pub entry_type: EntryType,
    /// Amount, always non-negative; the sign lives in the entry type.
    pub amount: Money,
    /// When this entry was created.
    pub created_at: Timestamp,
}

impl LedgerEntry {
    /// Create a debit entry.
    pub fn debit(conversion_id: ConversionId, customer_id: CustomerId, amount: Money) -> Self {
        Self {
            id: EntryId::new(),
            conversion_id,
            customer_id,
            entry_type: EntryType::Debit,
            amount,
            created_at: Utc::now(),
        }
    }

    /// Create a credit entry.
    pub fn credit(conversion_id: ConversionId, customer_id: CustomerId, amount: Money) -> Self {
        Self {
            id: EntryId::new(),
            conversion_id,
            customer_id,
            entry_type: EntryType::Credit,
            amount,
            created_at: Utc::now(),
        }
    }
}

/// The linked debit/credit pair recorded for one conversion. Exactly one of
/// each, tied together by the conversion ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPair {
    /// The source leg (what the customer handed over).
    pub debit: LedgerEntry,
    /// The target leg (what the customer received).
    pub credit: LedgerEntry,
}

impl EntryPair {
    /// Create a linked pair for a conversion.
    pub fn for_conversion(
        conversion_id: ConversionId,
        customer_id: CustomerId,
        debit_amount: Money,
        credit_amount: Money,
    ) -> Self {
        Self {
            debit: LedgerEntry::debit(conversion_id, customer_id.clone(), debit_amount),
            credit: LedgerEntry::credit(conversion_id, customer_id, credit_amount),
        }
    }

    /// Check both entries reference the same conversion.
    pub fn is_linked(&self) -> bool {
        self.debit.conversion_id == self.credit.conversion_id
            && self.debit.entry_type == EntryType::Debit
            && self.credit.entry_type == EntryType::Credit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cambio_common::Currency;

    #[test]
    fn test_entry_pair_linked() {
        let conversion_id = ConversionId::new();
        let pair = EntryPair::for_conversion(
            conversion_id,
            CustomerId::new("cus_1"),
            Money::new(1_000_00, Currency::Brl),
            Money::new(164_686_468, Currency::Usdt),
        );

        assert!(pair.is_linked());
        assert_eq!(pair.debit.conversion_id, conversion_id);
        assert_eq!(pair.debit.entry_type, EntryType::Debit);
        assert_eq!(pair.credit.entry_type, EntryType::Credit);
        assert_ne!(pair.debit.id, pair.credit.id);
    }
}
