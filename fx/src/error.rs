//! FX layer error types.

use cambio_common::{CambioError, CurrencyPair, Money, MoneyError, QuoteId};
use thiserror::Error;

/// Errors that can occur while sourcing rates and pricing quotes.
#[derive(Debug, Error)]
pub enum FxError {
    /// No rate available within the hard staleness ceiling.
    #[error("rate unavailable for {0}")]
    RateUnavailable(CurrencyPair),

    /// Requested amount outside the configured per-direction limits.
    #[error("amount {amount} out of range [{min}, {max}]")]
    AmountOutOfRange { amount: Money, min: Money, max: Money },

    /// Quote past its expiry.
    #[error("quote expired: {0}")]
    QuoteExpired(QuoteId),

    /// Quote was already committed once.
    #[error("quote already used: {0}")]
    QuoteAlreadyUsed(QuoteId),

    /// Quote not found in the book.
    #[error("quote not found: {0}")]
    QuoteNotFound(QuoteId),

    /// Upstream source failed or returned an unusable price.
    #[error("rate source error: {0}")]
    SourceError(String),

    /// Monetary arithmetic failure.
    #[error(transparent)]
    Money(#[from] MoneyError),
}

impl From<FxError> for CambioError {
    fn from(err: FxError) -> Self {
        match err {
            FxError::RateUnavailable(pair) => CambioError::RateUnavailable(pair),
            FxError::AmountOutOfRange { amount, min, max } => {
                CambioError::AmountOutOfRange { amount, min, max }
            }
            FxError::QuoteExpired(id) => CambioError::QuoteExpired(id),
            FxError::QuoteAlreadyUsed(id) => CambioError::QuoteAlreadyUsed(id),
            FxError::QuoteNotFound(id) => CambioError::QuoteNotFound(id),
            FxError::SourceError(message) => CambioError::Provider(message),
            FxError::Money(err) => err.into(),
        }
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
