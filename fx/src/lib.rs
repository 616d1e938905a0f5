//! Cambio FX Engine
//!
//! Rate sourcing and quote pricing for the conversion pipeline.
//!
//! # Features
//!
//! - Passive cached rate provider with staleness tracking
//! - Spread application with customer-specific overrides
//! - Fee decomposition (gateway, exchange, internal margin)
//! - Single-use quote book with expiry
//!
//! # Example
//!
//! ```rust,ignore
//! use cambio_fx::{CachedRateProvider, CustomerProfile, QuoteConfig, QuoteEngine};
//! use cambio_common::{Currency, Direction, Money};
//!
//! let provider = Arc::new(CachedRateProvider::new(source, Default::default()));
//! let engine = QuoteEngine::new(provider, QuoteConfig::default());
//!
//! let profile = CustomerProfile::new("cus_1".into());
//! let quote = engine
//!     .quote(Direction::Buy, Money::new(1_000_00, Currency::Brl), &profile)
//!     .await?;
//! ```

pub mod error;
pub mod provider;
pub mod quote;
pub mod quote_book;

pub use error::{FxError, FxResult};
pub use provider::{CachedRateProvider, RateProviderConfig, RateSnapshot, RateSource};
pub use quote::{CustomerProfile, QuoteConfig, QuoteEngine};
pub use quote_book::QuoteBook;

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateSource;
