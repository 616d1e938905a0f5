//! Affiliate commission computation and entries.
//!
//! Commission is always computed on the **net** settled amount, never gross,
//! so fee changes cannot retroactively inflate payouts. Rounding is always
//! down: the platform never pays a fractional unit more than owed.

use cambio_common::{
    time, AffiliateId, CambioError, CommissionId, Conversion, ConversionId, Currency, Money,
    Result, Rounding, Timestamp,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

/// Payout state of a commission entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommissionStatus {
    /// Earned, awaiting payout.
    Pending,
    /// Paid out to the affiliate.
    Paid,
}

impl CommissionStatus {
    /// Stable string form, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::Pending => "PENDING",
            CommissionStatus::Paid => "PAID",
        }
    }
}

impl FromStr for CommissionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(CommissionStatus::Pending),
            "PAID" => Ok(CommissionStatus::Paid),
            other => Err(format!("unknown commission status: {other}")),
        }
    }
}

/// A commission earned by an affiliate on one settled conversion.
/// At most one entry exists per conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionEntry {
    /// Unique commission identifier.
    pub id: CommissionId,
    /// Conversion the commission was earned on.
    pub conversion_id: ConversionId,
    /// Affiliate the commission is owed to.
    pub affiliate_id: AffiliateId,
    /// Commission in BRL, computed on the net settled amount.
    pub amount_brl: Money,
    /// USDT equivalent at the conversion's locked effective rate.
    pub amount_usdt: Money,
    /// Payout state.
    pub status: CommissionStatus,
    /// When the entry was created.
    pub created_at: Timestamp,
    /// When the entry was paid out.
    pub paid_at: Option<Timestamp>,
}

impl CommissionEntry {
    /// Mark the entry as paid out.
    pub fn mark_paid(&mut self) -> Result<()> {
        if self.status == CommissionStatus::Paid {
            return Err(CambioError::CommissionAlreadyPaid(self.id));
        }
        self.status = CommissionStatus::Paid;
        self.paid_at = Some(time::now());
        Ok(())
    }
}

/// Commission terms for a referring affiliate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffiliateProfile {
    /// Affiliate identifier.
    pub affiliate_id: AffiliateId,
    /// Commission rate as a decimal percentage (0.5 means 0.5%).
    pub commission_percent: Decimal,
}

impl AffiliateProfile {
    /// Create a new affiliate profile.
    pub fn new(affiliate_id: AffiliateId, commission_percent: Decimal) -> Self {
        Self {
            affiliate_id,
            commission_percent,
        }
    }
}

/// Computes commission entries for settled conversions.
pub struct CommissionEngine;

impl CommissionEngine {
    /// Compute the commission an affiliate earns on a conversion.
    ///
    /// Returns `None` when the conversion is not attributed to this
    /// affiliate or the rounded-down commission is zero. Uniqueness per
    /// conversion is enforced by the caller and the store.
    pub fn compute(
        conversion: &Conversion,
        affiliate: &AffiliateProfile,
    ) -> Result<Option<CommissionEntry>> {
        if conversion.affiliate_id.as_ref() != Some(&affiliate.affiliate_id) {
            return Ok(None);
        }

        let rate = affiliate.commission_percent.max(Decimal::ZERO);
        let amount_brl = conversion.net_amount.percent_of(rate, Rounding::Down)?;
        if amount_brl.is_zero() {
            debug!(
                conversion_id = %conversion.id,
                affiliate_id = %affiliate.affiliate_id,
                "commission rounds to zero, skipping entry"
            );
            return Ok(None);
        }

        let amount_usdt = amount_brl.divide_by_rate(
            conversion.quote.effective_rate,
            Currency::Usdt,
            Rounding::Down,
        )?;

        Ok(Some(CommissionEntry {
            id: CommissionId::new(),
            conversion_id: conversion.id,
            affiliate_id: affiliate.affiliate_id.clone(),
            amount_brl,
            amount_usdt,
            status: CommissionStatus::Pending,
            created_at: time::now(),
            paid_at: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::{buy_quote, settled_conversion};
    use rust_decimal_macros::dec;

    fn affiliate() -> AffiliateProfile {
        AffiliateProfile::new(AffiliateId::new("aff_1"), dec!(0.5))
    }

    #[test]
    fn test_commission_on_net() {
        // 0.5% of net 998.00 BRL, rounded down.
        let conversion = settled_conversion(buy_quote(), Some(AffiliateId::new("aff_1")));
        let entry = CommissionEngine::compute(&conversion, &affiliate())
            .unwrap()
            .unwrap();

        assert_eq!(entry.amount_brl, Money::new(4_99, Currency::Brl));
        assert_eq!(entry.status, CommissionStatus::Pending);
        assert!(entry.paid_at.is_none());
        // 4.99 / 6.06, floored at 10^-6.
        assert_eq!(entry.amount_usdt, Money::new(823_432, Currency::Usdt));
    }

    #[test]
    fn test_commission_ignores_gross_and_fees() {
        // Two conversions with the same net but different internal fees must
        // earn the same commission.
        let base = settled_conversion(buy_quote(), Some(AffiliateId::new("aff_1")));

        let mut shifted = base.clone();
        shifted.quote.fees.internal_fee.minor_units += 100;

        let a = CommissionEngine::compute(&base, &affiliate()).unwrap().unwrap();
        let b = CommissionEngine::compute(&shifted, &affiliate())
            .unwrap()
            .unwrap();
        assert_eq!(a.amount_brl, b.amount_brl);
    }

    #[test]
    fn test_unattributed_conversion_earns_nothing() {
        let no_affiliate = settled_conversion(buy_quote(), None);
        assert!(CommissionEngine::compute(&no_affiliate, &affiliate())
            .unwrap()
            .is_none());

        let other = settled_conversion(buy_quote(), Some(AffiliateId::new("aff_other")));
        assert!(CommissionEngine::compute(&other, &affiliate())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_zero_rate_creates_no_entry() {
        let conversion = settled_conversion(buy_quote(), Some(AffiliateId::new("aff_1")));
        let free = AffiliateProfile::new(AffiliateId::new("aff_1"), Decimal::ZERO);

        assert!(CommissionEngine::compute(&conversion, &free)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_mark_paid_once() {
        let conversion = settled_conversion(buy_quote(), Some(AffiliateId::new("aff_1")));
        let mut entry = CommissionEngine::compute(&conversion, &affiliate())
            .unwrap()
            .unwrap();

        entry.mark_paid().unwrap();
        assert_eq!(entry.status, CommissionStatus::Paid);
        assert!(entry.paid_at.is_some());

        assert!(matches!(
            entry.mark_paid(),
            Err(CambioError::CommissionAlreadyPaid(_))
        ));
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!(
            CommissionStatus::from_str(CommissionStatus::Pending.as_str()).unwrap(),
            CommissionStatus::Pending
        );
        assert!(CommissionStatus::from_str("UNKNOWN").is_err());
    }
}
