//! Error taxonomy for the Cambio pipeline.
//!
//! The core never produces user-facing strings; callers get structured error
//! kinds plus machine-readable context. Duplicate provider deliveries are
//! deliberately *not* an error: they surface as a successful no-op from the
//! state machine.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::conversion::{ConversionStatus, ProviderEvent};
use crate::identifiers::{AffiliateId, CommissionId, ConversionId, CustomerId, QuoteId};
use crate::money::{Currency, CurrencyPair, Money, MoneyError};

/// Main error type for Cambio operations.
#[derive(Error, Debug)]
pub enum CambioError {
    /// Arithmetic across two different currencies.
    #[error("currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: Currency, actual: Currency },

    /// Minor-unit arithmetic overflowed 64 bits.
    #[error("amount overflow")]
    AmountOverflow,

    /// Rate is unusable (negative, or zero where a divisor is required).
    #[error("invalid rate: {0}")]
    InvalidRate(Decimal),

    /// Requested amount outside the configured per-direction limits.
    #[error("amount {amount} out of range [{min}, {max}]")]
    AmountOutOfRange { amount: Money, min: Money, max: Money },

    /// No market rate available within the hard staleness ceiling.
    #[error("rate unavailable for {0}")]
    RateUnavailable(CurrencyPair),

    /// Quote past its expiry.
    #[error("quote expired: {0}")]
    QuoteExpired(QuoteId),

    /// Quote was already committed once.
    #[error("quote already used: {0}")]
    QuoteAlreadyUsed(QuoteId),

    /// Quote not found.
    #[error("quote not found: {0}")]
    QuoteNotFound(QuoteId),

    /// Event does not match a valid transition for the current state.
    #[error("invalid transition: no entry for event {event:?} in state {status:?}")]
    InvalidTransition {
        status: ConversionStatus,
        event: ProviderEvent,
    },

    /// Ledger application would not conserve money.
    #[error("ledger invariant violated for conversion {conversion_id}: {detail}")]
    LedgerInvariantViolation {
        conversion_id: ConversionId,
        detail: String,
    },

    /// Balance cannot cover the requested movement.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Money, available: Money },

    /// Conversion not found.
    #[error("conversion not found: {0}")]
    ConversionNotFound(ConversionId),

    /// Commission entry not found.
    #[error("commission not found: {0}")]
    CommissionNotFound(CommissionId),

    /// Commission entry was already paid out.
    #[error("commission already paid: {0}")]
    CommissionAlreadyPaid(CommissionId),

    /// Customer has no registered profile.
    #[error("unknown customer: {0}")]
    UnknownCustomer(CustomerId),

    /// Affiliate has no registered profile.
    #[error("unknown affiliate: {0}")]
    UnknownAffiliate(AffiliateId),

    /// Provider charge/order reference maps to no conversion.
    #[error("unknown provider reference: {0}")]
    UnknownProviderRef(String),

    /// Rate source failure.
    #[error("rate source error: {0}")]
    Provider(String),

    /// Durable store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CambioError {
    /// Check if the caller can recover by simply retrying or re-quoting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CambioError::RateUnavailable(_)
                | CambioError::QuoteExpired(_)
                | CambioError::Provider(_)
                | CambioError::Storage(_)
        )
    }

    /// Get a stable machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            CambioError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            CambioError::AmountOverflow => "AMOUNT_OVERFLOW",
            CambioError::InvalidRate(_) => "INVALID_RATE",
            CambioError::AmountOutOfRange { .. } => "AMOUNT_OUT_OF_RANGE",
            CambioError::RateUnavailable(_) => "RATE_UNAVAILABLE",
            CambioError::QuoteExpired(_) => "QUOTE_EXPIRED",
            CambioError::QuoteAlreadyUsed(_) => "QUOTE_ALREADY_USED",
            CambioError::QuoteNotFound(_) => "QUOTE_NOT_FOUND",
            CambioError::InvalidTransition { .. } => "INVALID_TRANSITION",
            CambioError::LedgerInvariantViolation { .. } => "LEDGER_INVARIANT_VIOLATION",
            CambioError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            CambioError::ConversionNotFound(_) => "CONVERSION_NOT_FOUND",
            CambioError::CommissionNotFound(_) => "COMMISSION_NOT_FOUND",
            CambioError::CommissionAlreadyPaid(_) => "COMMISSION_ALREADY_PAID",
            CambioError::UnknownCustomer(_) => "UNKNOWN_CUSTOMER",
            CambioError::UnknownAffiliate(_) => "UNKNOWN_AFFILIATE",
            CambioError::UnknownProviderRef(_) => "UNKNOWN_PROVIDER_REF",
            CambioError::Provider(_) => "PROVIDER_ERROR",
            CambioError::Storage(_) => "STORAGE_ERROR",
            CambioError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl From<MoneyError> for CambioError {
    fn from(err: MoneyError) -> Self {
        match err {
            MoneyError::CurrencyMismatch { expected, actual } => {
                CambioError::CurrencyMismatch { expected, actual }
            }
            MoneyError::AmountOverflow => CambioError::AmountOverflow,
            MoneyError::InvalidRate(rate) => CambioError::InvalidRate(rate),
        }
    }
}

/// Result type alias for Cambio operations.
pub type Result<T> = std::result::Result<T, CambioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CambioError::RateUnavailable(CurrencyPair::usdt_brl()).is_retryable());
        assert!(CambioError::QuoteExpired(QuoteId::new()).is_retryable());
        assert!(!CambioError::InvalidTransition {
            status: ConversionStatus::Settled,
            event: ProviderEvent::ChargePaid,
        }
        .is_retryable());
        assert!(!CambioError::LedgerInvariantViolation {
            conversion_id: ConversionId::new(),
            detail: "gross != net + fees".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CambioError::QuoteExpired(QuoteId::new()).error_code(),
            "QUOTE_EXPIRED"
        );
        assert_eq!(
            CambioError::from(MoneyError::AmountOverflow).error_code(),
            "AMOUNT_OVERFLOW"
        );
    }
}
