//! Market rate sourcing: the upstream source trait and the cached provider.
//!
//! The provider is passive. An external scheduler calls [`CachedRateProvider::refresh`]
//! on an interval; [`CachedRateProvider::latest`] only hits the network on a
//! cold cache and otherwise serves the cached value, annotated as stale once
//! it passes `stale_after` and refused outright past `hard_ceiling`.

use std::sync::Arc;

use async_trait::async_trait;
use cambio_common::{time, CurrencyPair, Timestamp};
use chrono::Duration;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::{debug, instrument, warn};

use crate::error::{FxError, FxResult};

/// Trait for upstream market rate sources.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Get the source name.
    fn name(&self) -> &str;

    /// Fetch the current price for a currency pair.
    async fn fetch_rate(&self, pair: &CurrencyPair) -> FxResult<Decimal>;
}

/// A market rate as served from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateSnapshot {
    /// The currency pair.
    pub pair: CurrencyPair,
    /// Price in quote-currency units per base-currency unit.
    pub rate: Decimal,
    /// When the rate was fetched from the source.
    pub as_of: Timestamp,
    /// Whether the rate is older than the staleness threshold.
    pub stale: bool,
    /// Source the rate came from.
    pub source: String,
}

/// Configuration for the cached rate provider.
#[derive(Debug, Clone)]
pub struct RateProviderConfig {
    /// Age after which a cached rate is served annotated as stale.
    pub stale_after: Duration,
    /// Age beyond which a cached rate is refused with `RateUnavailable`.
    pub hard_ceiling: Duration,
}

impl Default for RateProviderConfig {
    fn default() -> Self {
        Self {
            stale_after: time::defaults::rate_stale_after(),
            hard_ceiling: time::defaults::rate_hard_ceiling(),
        }
    }
}

impl RateProviderConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.stale_after <= Duration::zero() {
            return Err("stale_after must be positive".to_string());
        }
        if self.hard_ceiling <= self.stale_after {
            return Err("hard_ceiling must exceed stale_after".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CachedRate {
    rate: Decimal,
    as_of: Timestamp,
    source: String,
}

/// Caches the last successful fetch per pair and serves it without blocking
/// callers on network I/O.
pub struct CachedRateProvider {
    source: Arc<dyn RateSource>,
    cache: DashMap<CurrencyPair, CachedRate>,
    config: RateProviderConfig,
}

impl CachedRateProvider {
    /// Create a new provider over an upstream source.
    pub fn new(source: Arc<dyn RateSource>, config: RateProviderConfig) -> Self {
        Self {
            source,
            cache: DashMap::new(),
            config,
        }
    }

    /// Fetch a fresh rate from the source and cache it. Invoked by an
    /// external scheduler, never inline on the quote path.
    #[instrument(skip(self), fields(pair = %pair))]
    pub async fn refresh(&self, pair: &CurrencyPair) -> FxResult<RateSnapshot> {
        let rate = self.source.fetch_rate(pair).await?;
        if rate <= Decimal::ZERO {
            return Err(FxError::SourceError(format!(
                "source {} returned non-positive rate {} for {}",
                self.source.name(),
                rate,
                pair
            )));
        }

        let cached = CachedRate {
            rate,
            as_of: time::now(),
            source: self.source.name().to_string(),
        };
        debug!(rate = %rate, "cached fresh rate");
        self.cache.insert(*pair, cached.clone());

        Ok(self.snapshot(pair, cached, false))
    }

    /// Serve the latest cached rate. Performs a live fetch only on a cold
    /// cache; a cached value older than the hard ceiling is refused.
    pub async fn latest(&self, pair: &CurrencyPair) -> FxResult<RateSnapshot> {
        let cached = match self.cache.get(pair) {
            Some(entry) => entry.clone(),
            None => {
                debug!(pair = %pair, "cold cache, fetching from source");
                return self.refresh(pair).await;
            }
        };

        let age = time::age_of(cached.as_of);
        if age > self.config.hard_ceiling {
            warn!(
                pair = %pair,
                age_secs = age.num_seconds(),
                "cached rate past hard ceiling, refusing"
            );
            return Err(FxError::RateUnavailable(*pair));
        }

        let stale = age > self.config.stale_after;
        if stale {
            warn!(
                pair = %pair,
                age_secs = age.num_seconds(),
                "serving stale rate"
            );
        }

        Ok(self.snapshot(pair, cached, stale))
    }

    /// Drop any cached rate for a pair.
    pub fn invalidate(&self, pair: &CurrencyPair) {
        self.cache.remove(pair);
    }

    fn snapshot(&self, pair: &CurrencyPair, cached: CachedRate, stale: bool) -> RateSnapshot {
        RateSnapshot {
            pair: *pair,
            rate: cached.rate,
            as_of: cached.as_of,
            stale,
            source: cached.source,
        }
    }
}

/// Mock rate source for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateSource {
    name: String,
    rates: DashMap<CurrencyPair, Decimal>,
    failing: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateSource {
    /// Create a new mock source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rates: DashMap::new(),
            failing: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Set the rate returned for a pair.
    pub fn set_rate(&self, pair: CurrencyPair, rate: Decimal) {
        self.rates.insert(pair, rate);
    }

    /// Simulate an upstream outage.
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateSource for MockRateSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rate(&self, pair: &CurrencyPair) -> FxResult<Decimal> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(FxError::SourceError("simulated outage".to_string()));
        }
        self.rates
            .get(pair)
            .map(|r| *r)
            .ok_or(FxError::RateUnavailable(*pair))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::thread::sleep;
    use std::time::Duration as StdDuration;

    fn setup(config: RateProviderConfig) -> (Arc<MockRateSource>, CachedRateProvider) {
        let source = Arc::new(MockRateSource::new("mock"));
        source.set_rate(CurrencyPair::usdt_brl(), dec!(5.60));
        let provider = CachedRateProvider::new(source.clone(), config);
        (source, provider)
    }

    #[tokio::test]
    async fn test_cold_cache_fetches_once() {
        let (_, provider) = setup(RateProviderConfig::default());
        let pair = CurrencyPair::usdt_brl();

        let snapshot = provider.latest(&pair).await.unwrap();
        assert_eq!(snapshot.rate, dec!(5.60));
        assert!(!snapshot.stale);
        assert_eq!(snapshot.source, "mock");
    }

    #[tokio::test]
    async fn test_serves_cache_through_outage() {
        let (source, provider) = setup(RateProviderConfig::default());
        let pair = CurrencyPair::usdt_brl();

        provider.refresh(&pair).await.unwrap();
        source.set_failing(true);

        // The cached value keeps being served; only refresh hits the source.
        let snapshot = provider.latest(&pair).await.unwrap();
        assert_eq!(snapshot.rate, dec!(5.60));
        assert!(provider.refresh(&pair).await.is_err());
    }

    #[tokio::test]
    async fn test_stale_annotation() {
        let config = RateProviderConfig {
            stale_after: Duration::milliseconds(30),
            hard_ceiling: Duration::seconds(10),
        };
        let (_, provider) = setup(config);
        let pair = CurrencyPair::usdt_brl();

        provider.refresh(&pair).await.unwrap();
        sleep(StdDuration::from_millis(50));

        let snapshot = provider.latest(&pair).await.unwrap();
        assert!(snapshot.stale);
        assert_eq!(snapshot.rate, dec!(5.60));
    }

    #[tokio::test]
    async fn test_hard_ceiling_refuses() {
        let config = RateProviderConfig {
            stale_after: Duration::milliseconds(20),
            hard_ceiling: Duration::milliseconds(60),
        };
        let (source, provider) = setup(config);
        let pair = CurrencyPair::usdt_brl();

        provider.refresh(&pair).await.unwrap();
        sleep(StdDuration::from_millis(80));
        source.set_failing(true);

        assert!(matches!(
            provider.latest(&pair).await,
            Err(FxError::RateUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_non_positive_rate_rejected() {
        let (source, provider) = setup(RateProviderConfig::default());
        let pair = CurrencyPair::usdt_brl();
        source.set_rate(pair, Decimal::ZERO);

        assert!(matches!(
            provider.refresh(&pair).await,
            Err(FxError::SourceError(_))
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(RateProviderConfig::default().validate().is_ok());

        let bad = RateProviderConfig {
            stale_after: Duration::minutes(10),
            hard_ceiling: Duration::minutes(5),
        };
        assert!(bad.validate().is_err());
    }
}
