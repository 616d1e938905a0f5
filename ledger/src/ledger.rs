//! Ledger application: balance mutation under the money-conservation
//! invariant.
//!
//! Before any balance moves, the ledger recomputes the conversion's amounts
//! from its locked quote and refuses to settle anything that does not
//! reconcile. A discrepancy means the conversion must end up `FAILED`,
//! never `SETTLED`.

use cambio_common::{
    CambioError, Conversion, ConversionStatus, Currency, Direction, Money, Result, Rounding,
};
use tracing::{info, instrument};

use crate::balance::BalanceSnapshot;
use crate::entry::EntryPair;

/// The outcome of a ledger application: the linked entry pair to persist
/// and the profit the platform realized.
#[derive(Debug, Clone)]
pub struct LedgerApplication {
    /// Debit and credit entries referencing the conversion.
    pub entries: EntryPair,
    /// Platform margin on this conversion (the internal fee, in BRL).
    /// Negative for reversals.
    pub realized_profit: Money,
}

/// Applies settled conversions against customer balances.
///
/// Pure compute-and-mutate over an in-memory snapshot; persistence and
/// customer-level locking are the caller's responsibility.
pub struct ConversionLedger;

impl ConversionLedger {
    /// Apply a settling conversion: verify conservation, mutate the balance
    /// snapshot, and produce the linked debit/credit pair.
    ///
    /// Only valid while the conversion is in `PAID`, i.e. inside the
    /// settlement transition.
    #[instrument(skip_all, fields(conversion_id = %conversion.id))]
    pub fn apply(
        conversion: &Conversion,
        balance: &mut BalanceSnapshot,
    ) -> Result<LedgerApplication> {
        if conversion.status != ConversionStatus::Paid {
            return Err(Self::violation(
                conversion,
                format!("ledger apply in status {:?}", conversion.status),
            ));
        }
        Self::verify(conversion)?;

        match conversion.direction {
            // The BRL leg rides the PIX rail and is not custodied; only the
            // USDT bucket of the snapshot moves.
            Direction::Buy => balance.credit(conversion.quote.output_amount)?,
            Direction::Sell => balance.consume_locked(conversion.gross_amount)?,
        }

        let entries = EntryPair::for_conversion(
            conversion.id,
            conversion.customer_id.clone(),
            conversion.gross_amount,
            conversion.quote.output_amount,
        );
        let realized_profit = conversion.quote.fees.internal_fee;

        info!(
            direction = ?conversion.direction,
            debit = %entries.debit.amount,
            credit = %entries.credit.amount,
            profit = %realized_profit,
            "ledger applied"
        );

        Ok(LedgerApplication {
            entries,
            realized_profit,
        })
    }

    /// Reverse a previously settled conversion for a refund: the symmetric
    /// inverse of [`ConversionLedger::apply`].
    #[instrument(skip_all, fields(conversion_id = %conversion.id))]
    pub fn reverse(
        conversion: &Conversion,
        balance: &mut BalanceSnapshot,
    ) -> Result<LedgerApplication> {
        if conversion.status != ConversionStatus::Settled {
            return Err(Self::violation(
                conversion,
                format!("ledger reverse in status {:?}", conversion.status),
            ));
        }
        Self::verify(conversion)?;

        match conversion.direction {
            Direction::Buy => balance.debit(conversion.quote.output_amount)?,
            Direction::Sell => balance.credit(conversion.gross_amount)?,
        }

        // Legs swap sides relative to the original application.
        let entries = EntryPair::for_conversion(
            conversion.id,
            conversion.customer_id.clone(),
            conversion.quote.output_amount,
            conversion.gross_amount,
        );
        let realized_profit = conversion.quote.fees.internal_fee.negated();

        info!(
            direction = ?conversion.direction,
            debit = %entries.debit.amount,
            credit = %entries.credit.amount,
            "ledger reversed"
        );

        Ok(LedgerApplication {
            entries,
            realized_profit,
        })
    }

    /// Recompute the conversion's amounts from its locked quote and check
    /// they reconcile. Money out of thin air is a fatal invariant violation.
    fn verify(conversion: &Conversion) -> Result<()> {
        let quote = &conversion.quote;
        let fees = &quote.fees;

        if conversion.gross_amount != quote.gross_amount
            || conversion.net_amount != quote.net_amount
        {
            return Err(Self::violation(
                conversion,
                "conversion amounts diverge from locked quote".to_string(),
            ));
        }
        if fees.internal_fee.is_negative() {
            return Err(Self::violation(
                conversion,
                "negative internal fee".to_string(),
            ));
        }

        match conversion.direction {
            Direction::Buy => {
                let reassembled = quote
                    .net_amount
                    .checked_add(fees.gateway_fee)?
                    .checked_add(fees.exchange_fee)?;
                if reassembled != quote.gross_amount {
                    return Err(Self::violation(
                        conversion,
                        "gross != net + gateway + exchange".to_string(),
                    ));
                }

                let expected_output = quote.net_amount.divide_by_rate(
                    quote.effective_rate,
                    Currency::Usdt,
                    Rounding::Down,
                )?;
                if quote.output_amount != expected_output {
                    return Err(Self::violation(
                        conversion,
                        "output != net / effective rate".to_string(),
                    ));
                }

                let cost_at_base = quote.output_amount.multiply_by_rate(
                    quote.base_rate,
                    Currency::Brl,
                    Rounding::Down,
                )?;
                let expected_internal = quote.net_amount.checked_sub(cost_at_base)?;
                if fees.internal_fee != expected_internal {
                    return Err(Self::violation(
                        conversion,
                        "internal fee does not match spread margin".to_string(),
                    ));
                }
            }
            Direction::Sell => {
                let brl_equiv = quote.gross_amount.multiply_by_rate(
                    quote.effective_rate,
                    Currency::Brl,
                    Rounding::Down,
                )?;
                let expected_net = brl_equiv
                    .checked_sub(fees.gateway_fee)?
                    .checked_sub(fees.exchange_fee)?;
                if quote.net_amount != expected_net {
                    return Err(Self::violation(
                        conversion,
                        "net != gross * effective rate - fees".to_string(),
                    ));
                }
                if quote.output_amount != quote.net_amount {
                    return Err(Self::violation(
                        conversion,
                        "sell output != net payout".to_string(),
                    ));
                }

                let market_value = quote.gross_amount.multiply_by_rate(
                    quote.base_rate,
                    Currency::Brl,
                    Rounding::Up,
                )?;
                let expected_internal = market_value.checked_sub(brl_equiv)?;
                if fees.internal_fee != expected_internal {
                    return Err(Self::violation(
                        conversion,
                        "internal fee does not match spread margin".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    fn violation(conversion: &Conversion, detail: String) -> CambioError {
        CambioError::LedgerInvariantViolation {
            conversion_id: conversion.id,
            detail,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use cambio_common::{
        time, AffiliateId, Conversion, CurrencyPair, CustomerId, Direction, EventKey,
        FeeBreakdown, Money, ProviderEvent, Quote, QuoteId,
    };
    use cambio_common::Currency;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    /// A Buy quote whose numbers reconcile exactly: 1000.00 BRL at base
    /// 6.00, spread 1%, gateway 2.00, no exchange fee.
    pub(crate) fn buy_quote() -> Quote {
        let now = time::now();
        Quote {
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
        }
    }

    /// A Sell quote whose numbers reconcile exactly: 100 USDT at base 6.00,
    /// spread 1%, gateway 2.00, no exchange fee.
    pub(crate) fn sell_quote() -> Quote {
        let now = time::now();
        Quote {
            id: QuoteId::new(),
            customer_id: CustomerId::new("cus_1"),
            direction: Direction::Sell,
            pair: CurrencyPair::usdt_brl(),
            base_rate: dec!(6.00),
            spread_percent: dec!(1.0),
            effective_rate: dec!(5.94),
            gross_amount: Money::new(100_000_000, Currency::Usdt),
            net_amount: Money::new(592_00, Currency::Brl),
            output_amount: Money::new(592_00, Currency::Brl),
            fees: FeeBreakdown {
                gateway_fee: Money::new(2_00, Currency::Brl),
                exchange_fee: Money::zero(Currency::Brl),
                internal_fee: Money::new(6_00, Currency::Brl),
            },
            created_at: now,
            expires_at: now + Duration::seconds(90),
        }
    }

    /// Drive a fresh conversion to PAID.
    pub(crate) fn paid_conversion(quote: Quote, affiliate_id: Option<AffiliateId>) -> Conversion {
        let mut conversion = Conversion::from_quote(quote, affiliate_id);
        conversion
            .apply_event(ProviderEvent::ChargeIssued, &EventKey::new("e1"))
            .unwrap();
        conversion
            .apply_event(ProviderEvent::ChargePaid, &EventKey::new("e2"))
            .unwrap();
        conversion
    }

    /// Drive a fresh conversion to SETTLED.
    pub(crate) fn settled_conversion(
        quote: Quote,
        affiliate_id: Option<AffiliateId>,
    ) -> Conversion {
        let mut conversion = paid_conversion(quote, affiliate_id);
        conversion
            .apply_event(ProviderEvent::SettlementConfirmed, &EventKey::new("e3"))
            .unwrap();
        conversion
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{buy_quote, paid_conversion, sell_quote, settled_conversion};
    use super::*;
    use crate::entry::EntryType;
    use cambio_common::CustomerId;

    #[test]
    fn test_apply_buy_credits_usdt() {
        let conversion = paid_conversion(buy_quote(), None);
        let mut balance = BalanceSnapshot::new(CustomerId::new("cus_1"));

        let application = ConversionLedger::apply(&conversion, &mut balance).unwrap();

        assert_eq!(balance.usdt.available, conversion.quote.output_amount);
        assert!(balance.brl.available.is_zero());
        assert_eq!(application.entries.debit.amount, conversion.gross_amount);
        assert_eq!(
            application.entries.credit.amount,
            conversion.quote.output_amount
        );
        assert!(application.entries.is_linked());
        assert_eq!(
            application.realized_profit,
            conversion.quote.fees.internal_fee
        );
    }

    #[test]
    fn test_apply_sell_consumes_reservation() {
        let conversion = paid_conversion(sell_quote(), None);
        let mut balance = BalanceSnapshot::new(CustomerId::new("cus_1"));
        balance.credit(conversion.gross_amount).unwrap();
        balance.reserve(conversion.gross_amount).unwrap();

        ConversionLedger::apply(&conversion, &mut balance).unwrap();

        assert!(balance.usdt.locked.is_zero());
        assert!(balance.usdt.available.is_zero());
    }

    #[test]
    fn test_tampered_conversion_rejected() {
        let mut conversion = paid_conversion(buy_quote(), None);
        // Inflate the output by one micro-USDT.
        conversion.quote.output_amount.minor_units += 1;

        let mut balance = BalanceSnapshot::new(CustomerId::new("cus_1"));
        let result = ConversionLedger::apply(&conversion, &mut balance);

        assert!(matches!(
            result,
            Err(CambioError::LedgerInvariantViolation { .. })
        ));
        // The balance must be untouched.
        assert!(balance.usdt.available.is_zero());
    }

    #[test]
    fn test_fee_hole_rejected() {
        let mut conversion = paid_conversion(buy_quote(), None);
        conversion.quote.fees.gateway_fee.minor_units += 50;

        let mut balance = BalanceSnapshot::new(CustomerId::new("cus_1"));
        assert!(matches!(
            ConversionLedger::apply(&conversion, &mut balance),
            Err(CambioError::LedgerInvariantViolation { .. })
        ));
    }

    #[test]
    fn test_apply_requires_paid_status() {
        let conversion = settled_conversion(buy_quote(), None);
        let mut balance = BalanceSnapshot::new(CustomerId::new("cus_1"));

        assert!(matches!(
            ConversionLedger::apply(&conversion, &mut balance),
            Err(CambioError::LedgerInvariantViolation { .. })
        ));
    }

    #[test]
    fn test_reverse_buy() {
        let settled = settled_conversion(buy_quote(), None);
        let mut balance = BalanceSnapshot::new(CustomerId::new("cus_1"));
        balance.credit(settled.quote.output_amount).unwrap();

        let application = ConversionLedger::reverse(&settled, &mut balance).unwrap();

        assert!(balance.usdt.available.is_zero());
        assert_eq!(application.entries.debit.entry_type, EntryType::Debit);
        assert_eq!(
            application.entries.debit.amount,
            settled.quote.output_amount
        );
        assert_eq!(application.entries.credit.amount, settled.gross_amount);
        assert_eq!(
            application.realized_profit,
            settled.quote.fees.internal_fee.negated()
        );
    }

    #[test]
    fn test_reverse_requires_settled_status() {
        let paid = paid_conversion(buy_quote(), None);
        let mut balance = BalanceSnapshot::new(CustomerId::new("cus_1"));

        assert!(matches!(
            ConversionLedger::reverse(&paid, &mut balance),
            Err(CambioError::LedgerInvariantViolation { .. })
        ));
    }

    #[test]
    fn test_reverse_buy_insufficient_funds() {
        // Customer already moved the USDT away; the refund cannot be applied.
        let settled = settled_conversion(buy_quote(), None);
        let mut balance = BalanceSnapshot::new(CustomerId::new("cus_1"));

        assert!(matches!(
            ConversionLedger::reverse(&settled, &mut balance),
            Err(CambioError::InsufficientFunds { .. })
        ));
    }
}
