//! Locked quote types: the priced, fee-decomposed offer a customer commits to.

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::identifiers::{CustomerId, QuoteId};
use crate::money::{Currency, CurrencyPair, Money, MoneyError};
use crate::time::{self, Timestamp};

/// Direction of a conversion, from the customer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Customer pays BRL over PIX and receives USDT.
    Buy,
    /// Customer sells USDT and is paid BRL over PIX.
    Sell,
}

impl Direction {
    /// Currency the customer hands over.
    pub fn source_currency(&self) -> Currency {
        match self {
            Direction::Buy => Currency::Brl,
            Direction::Sell => Currency::Usdt,
        }
    }

    /// Currency the customer receives.
    pub fn target_currency(&self) -> Currency {
        match self {
            Direction::Buy => Currency::Usdt,
            Direction::Sell => Currency::Brl,
        }
    }
}

/// Decomposition of the fees charged on a conversion, all in BRL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Fixed fee for the PIX rail.
    pub gateway_fee: Money,
    /// Proportional trading fee on the exchange leg.
    pub exchange_fee: Money,
    /// Margin realized by the spread.
    pub internal_fee: Money,
}

impl FeeBreakdown {
    /// Total of all fee components.
    pub fn total(&self) -> Result<Money, MoneyError> {
        self.gateway_fee
            .checked_add(self.exchange_fee)?
            .checked_add(self.internal_fee)
    }
}

/// A short-lived, immutable quote the customer can commit exactly once.
///
/// `effective_rate` is the base market rate moved *against* the customer by
/// the spread: inflated for [`Direction::Buy`], deflated for
/// [`Direction::Sell`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Unique quote identifier.
    pub id: QuoteId,
    /// Customer the quote was priced for.
    pub customer_id: CustomerId,
    /// Conversion direction.
    pub direction: Direction,
    /// Currency pair the rate is expressed in (BRL per USDT).
    pub pair: CurrencyPair,
    /// Market rate the quote was derived from.
    pub base_rate: Decimal,
    /// Spread applied, as a percentage (never negative).
    pub spread_percent: Decimal,
    /// Rate actually charged to the customer.
    pub effective_rate: Decimal,
    /// Amount the customer hands over.
    pub gross_amount: Money,
    /// Gross minus gateway and exchange fees, in the source-side currency.
    pub net_amount: Money,
    /// Amount the customer receives.
    pub output_amount: Money,
    /// Fee decomposition.
    pub fees: FeeBreakdown,
    /// When the quote was issued.
    pub created_at: Timestamp,
    /// When the quote stops being committable.
    pub expires_at: Timestamp,
}

impl Quote {
    /// Check if the quote has passed its expiry.
    pub fn is_expired(&self) -> bool {
        time::is_expired(self.expires_at)
    }

    /// Remaining time until expiry.
    pub fn time_remaining(&self) -> Duration {
        let remaining = self.expires_at - time::now();
        if remaining < Duration::zero() {
            Duration::zero()
        } else {
            remaining
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::make_test_quote;
    use super::*;

    #[test]
    fn test_direction_currencies() {
        assert_eq!(Direction::Buy.source_currency(), Currency::Brl);
        assert_eq!(Direction::Buy.target_currency(), Currency::Usdt);
        assert_eq!(Direction::Sell.source_currency(), Currency::Usdt);
        assert_eq!(Direction::Sell.target_currency(), Currency::Brl);
    }

    #[test]
    fn test_fee_total() {
        let quote = make_test_quote(Direction::Buy);
        assert_eq!(
            quote.fees.total().unwrap(),
            Money::new(11_89, Currency::Brl)
        );
    }

    #[test]
    fn test_quote_expiry() {
        let mut quote = make_test_quote(Direction::Buy);
        assert!(!quote.is_expired());
        assert!(quote.time_remaining() > Duration::zero());

        quote.expires_at = time::now() - Duration::seconds(1);
        assert!(quote.is_expired());
        assert_eq!(quote.time_remaining(), Duration::zero());
    }
}
