//! Engine configuration.
//!
//! Fee percentages, spread, TTLs, and limits are policy knobs, composed
//! from the per-concern configs and overridable from the environment.

use cambio_common::{Currency, Money};
use cambio_fx::{QuoteConfig, RateProviderConfig};
use chrono::Duration;
use rust_decimal::Decimal;

/// Main engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rate provider staleness thresholds.
    pub rates: RateProviderConfig,
    /// Quote pricing policy.
    pub quotes: QuoteConfig,
    /// Database URL for the Postgres store.
    pub database_url: String,
    /// Log level.
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rates: RateProviderConfig::default(),
            quotes: QuoteConfig::default(),
            database_url: "postgres://localhost/cambio".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Ok(spread) = std::env::var("CAMBIO_SPREAD_PERCENT") {
            if let Ok(spread) = spread.parse::<Decimal>() {
                config.quotes.default_spread_percent = spread;
            }
        }

        if let Ok(fee) = std::env::var("CAMBIO_GATEWAY_FEE_CENTS") {
            if let Ok(cents) = fee.parse::<i64>() {
                config.quotes.gateway_fee = Money::new(cents, Currency::Brl);
            }
        }

        if let Ok(fee) = std::env::var("CAMBIO_EXCHANGE_FEE_PERCENT") {
            if let Ok(fee) = fee.parse::<Decimal>() {
                config.quotes.exchange_fee_percent = fee;
            }
        }

        if let Ok(ttl) = std::env::var("CAMBIO_QUOTE_TTL_SECS") {
            if let Ok(secs) = ttl.parse::<i64>() {
                config.quotes.quote_ttl = Duration::seconds(secs);
            }
        }

        if let Ok(secs) = std::env::var("CAMBIO_RATE_STALE_AFTER_SECS") {
            if let Ok(secs) = secs.parse::<i64>() {
                config.rates.stale_after = Duration::seconds(secs);
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.rates.validate()?;
        self.quotes.validate()?;

        if self.database_url.is_empty() {
            return Err("database URL cannot be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = EngineConfig::default();
        config.database_url = String::new();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.quotes.default_spread_percent = Decimal::NEGATIVE_ONE;
        assert!(config.validate().is_err());
    }
}
