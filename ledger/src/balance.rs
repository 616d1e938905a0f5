//! Customer balance snapshots with reservation support.
//!
//! The locked bucket backs Sell reservations: committing a Sell conversion
//! reserves the gross USDT, settlement consumes the reservation, and
//! failure or cancellation releases it back to available. All amounts
//! passed to these operations are non-negative.

use cambio_common::{time, CambioError, Currency, CustomerId, Money, Result, Timestamp};
use serde::{Deserialize, Serialize};

/// Available and locked amounts in one currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAmounts {
    /// Balance usable for new reservations and debits.
    pub available: Money,
    /// Balance reserved for in-flight Sell conversions.
    pub locked: Money,
}

impl BalanceAmounts {
    /// Create a zero balance in the given currency.
    pub fn zero(currency: Currency) -> Self {
        Self {
            available: Money::zero(currency),
            locked: Money::zero(currency),
        }
    }

    /// Get the total balance (available + locked).
    pub fn total(&self) -> Result<Money> {
        Ok(self.available.checked_add(self.locked)?)
    }

    /// Check if an amount can be reserved.
    pub fn can_reserve(&self, amount: Money) -> bool {
        amount.currency == self.available.currency
            && self.available.minor_units >= amount.minor_units
    }

    /// Credit the available balance.
    pub fn credit(&mut self, amount: Money) -> Result<()> {
        self.available = self.available.checked_add(amount)?;
        Ok(())
    }

    /// Debit the available balance.
    pub fn debit(&mut self, amount: Money) -> Result<()> {
        self.ensure_covers(self.available, amount)?;
        self.available = self.available.checked_sub(amount)?;
        Ok(())
    }

    /// Move an amount from available to locked.
    pub fn reserve(&mut self, amount: Money) -> Result<()> {
        self.ensure_covers(self.available, amount)?;
        self.available = self.available.checked_sub(amount)?;
        self.locked = self.locked.checked_add(amount)?;
        Ok(())
    }

    /// Move an amount from locked back to available.
    pub fn release(&mut self, amount: Money) -> Result<()> {
        self.ensure_covers(self.locked, amount)?;
        self.locked = self.locked.checked_sub(amount)?;
        self.available = self.available.checked_add(amount)?;
        Ok(())
    }

    /// Consume a locked amount (reservation spent by settlement).
    pub fn consume(&mut self, amount: Money) -> Result<()> {
        self.ensure_covers(self.locked, amount)?;
        self.locked = self.locked.checked_sub(amount)?;
        Ok(())
    }

    fn ensure_covers(&self, held: Money, amount: Money) -> Result<()> {
        if held.currency != amount.currency {
            return Err(CambioError::CurrencyMismatch {
                expected: held.currency,
                actual: amount.currency,
            });
        }
        if held.minor_units < amount.minor_units {
            return Err(CambioError::InsufficientFunds {
                required: amount,
                available: held,
            });
        }
        Ok(())
    }
}

/// Per-customer balance snapshot, one bucket per currency.
///
/// Mutated only inside ledger application and reservation handling, under
/// the customer-level lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Customer this snapshot belongs to.
    pub customer_id: CustomerId,
    /// BRL bucket.
    pub brl: BalanceAmounts,
    /// USDT bucket.
    pub usdt: BalanceAmounts,
    /// When the snapshot last changed.
    pub updated_at: Timestamp,
}

impl BalanceSnapshot {
    /// Create an empty snapshot for a customer.
    pub fn new(customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            brl: BalanceAmounts::zero(Currency::Brl),
            usdt: BalanceAmounts::zero(Currency::Usdt),
            updated_at: time::now(),
        }
    }

    /// Get the bucket for a currency.
    pub fn bucket(&self, currency: Currency) -> &BalanceAmounts {
        match currency {
            Currency::Brl => &self.brl,
            Currency::Usdt => &self.usdt,
        }
    }

    /// Credit the available balance in the amount's currency.
    pub fn credit(&mut self, amount: Money) -> Result<()> {
        self.bucket_mut(amount.currency).credit(amount)?;
        self.touch();
        Ok(())
    }

    /// Debit the available balance in the amount's currency.
    pub fn debit(&mut self, amount: Money) -> Result<()> {
        self.bucket_mut(amount.currency).debit(amount)?;
        self.touch();
        Ok(())
    }

    /// Reserve an amount for an in-flight Sell conversion.
    pub fn reserve(&mut self, amount: Money) -> Result<()> {
        self.bucket_mut(amount.currency).reserve(amount)?;
        self.touch();
        Ok(())
    }

    /// Release a reservation back to available.
    pub fn release(&mut self, amount: Money) -> Result<()> {
        self.bucket_mut(amount.currency).release(amount)?;
        self.touch();
        Ok(())
    }

    /// Consume a reservation on settlement.
    pub fn consume_locked(&mut self, amount: Money) -> Result<()> {
        self.bucket_mut(amount.currency).consume(amount)?;
        self.touch();
        Ok(())
    }

    fn bucket_mut(&mut self, currency: Currency) -> &mut BalanceAmounts {
        match currency {
            Currency::Brl => &mut self.brl,
            Currency::Usdt => &mut self.usdt,
        }
    }

    fn touch(&mut self) {
        self.updated_at = time::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_debit() {
        let mut snapshot = BalanceSnapshot::new(CustomerId::new("cus_1"));
        let amount = Money::new(50_000_000, Currency::Usdt);

        snapshot.credit(amount).unwrap();
        assert_eq!(snapshot.usdt.available, amount);

        snapshot.debit(Money::new(20_000_000, Currency::Usdt)).unwrap();
        assert_eq!(
            snapshot.usdt.available,
            Money::new(30_000_000, Currency::Usdt)
        );
    }

    #[test]
    fn test_debit_insufficient() {
        let mut snapshot = BalanceSnapshot::new(CustomerId::new("cus_1"));
        let result = snapshot.debit(Money::new(1, Currency::Usdt));
        assert!(matches!(
            result,
            Err(CambioError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_reservation_lifecycle() {
        let mut snapshot = BalanceSnapshot::new(CustomerId::new("cus_1"));
        snapshot
            .credit(Money::new(100_000_000, Currency::Usdt))
            .unwrap();

        let reserved = Money::new(40_000_000, Currency::Usdt);
        snapshot.reserve(reserved).unwrap();
        assert_eq!(
            snapshot.usdt.available,
            Money::new(60_000_000, Currency::Usdt)
        );
        assert_eq!(snapshot.usdt.locked, reserved);

        // Release puts the funds back.
        snapshot.release(reserved).unwrap();
        assert_eq!(
            snapshot.usdt.available,
            Money::new(100_000_000, Currency::Usdt)
        );
        assert!(snapshot.usdt.locked.is_zero());

        // Consume spends the reservation outright.
        snapshot.reserve(reserved).unwrap();
        snapshot.consume_locked(reserved).unwrap();
        assert!(snapshot.usdt.locked.is_zero());
        assert_eq!(
            snapshot.usdt.total().unwrap(),
            Money::new(60_000_000, Currency::Usdt)
        );
    }

    #[test]
    fn test_cannot_reserve_more_than_available() {
        let mut snapshot = BalanceSnapshot::new(CustomerId::new("cus_1"));
        snapshot
            .credit(Money::new(10_000_000, Currency::Usdt))
            .unwrap();

        assert!(!snapshot
            .usdt
            .can_reserve(Money::new(20_000_000, Currency::Usdt)));
        assert!(matches!(
            snapshot.reserve(Money::new(20_000_000, Currency::Usdt)),
            Err(CambioError::InsufficientFunds { .. })
        ));
    }
}
