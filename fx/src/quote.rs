//! Quote engine: spread application and fee decomposition.
//!
//! The effective rate always moves against the customer: inflated on Buy,
//! deflated on Sell. Fees round up and customer output rounds down, so the
//! decomposition can never pay out more than the gross covers.

use std::sync::Arc;

use cambio_common::{
    time, AffiliateId, Currency, CurrencyPair, CustomerId, Direction, FeeBreakdown, Money, Quote,
    QuoteId, Rounding,
};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::{FxError, FxResult};
use crate::provider::CachedRateProvider;

/// Per-customer pricing profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerProfile {
    /// Customer this profile belongs to.
    pub customer_id: CustomerId,
    /// Customer-specific spread override, as a percentage. Falls back to the
    /// platform default when absent.
    pub spread_percent: Option<Decimal>,
    /// Affiliate that referred this customer, if any.
    pub referred_by: Option<AffiliateId>,
}

impl CustomerProfile {
    /// Create a profile with platform-default pricing.
    pub fn new(customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            spread_percent: None,
            referred_by: None,
        }
    }

    /// Set a customer-specific spread.
    pub fn with_spread(mut self, spread_percent: Decimal) -> Self {
        self.spread_percent = Some(spread_percent);
        self
    }

    /// Attribute the customer to a referring affiliate.
    pub fn with_referrer(mut self, affiliate_id: AffiliateId) -> Self {
        self.referred_by = Some(affiliate_id);
        self
    }
}

/// Configuration for the quote engine. Fee percentages and limits are
/// policy, not hard-coded behavior.
#[derive(Debug, Clone)]
pub struct QuoteConfig {
    /// Platform-default spread, as a percentage.
    pub default_spread_percent: Decimal,
    /// Fixed PIX rail fee, in BRL.
    pub gateway_fee: Money,
    /// Exchange trading fee, as a percentage of the gross BRL leg.
    pub exchange_fee_percent: Decimal,
    /// How long an issued quote stays committable.
    pub quote_ttl: Duration,
    /// Minimum Buy amount (BRL).
    pub min_buy: Money,
    /// Maximum Buy amount (BRL).
    pub max_buy: Money,
    /// Minimum Sell amount (USDT).
    pub min_sell: Money,
    /// Maximum Sell amount (USDT).
    pub max_sell: Money,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            default_spread_percent: Decimal::ONE,
            gateway_fee: Money::new(2_00, Currency::Brl),
            exchange_fee_percent: Decimal::new(20, 2), // 0.20%
            quote_ttl: time::defaults::quote_ttl(),
            min_buy: Money::new(10_00, Currency::Brl),
            max_buy: Money::new(50_000_00, Currency::Brl),
            min_sell: Money::new(1_000_000, Currency::Usdt),
            max_sell: Money::new(10_000_000_000, Currency::Usdt),
        }
    }
}

impl QuoteConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_spread_percent < Decimal::ZERO {
            return Err("default spread cannot be negative".to_string());
        }
        if self.exchange_fee_percent < Decimal::ZERO {
            return Err("exchange fee percent cannot be negative".to_string());
        }
        if self.gateway_fee.is_negative() || self.gateway_fee.currency != Currency::Brl {
            return Err("gateway fee must be a non-negative BRL amount".to_string());
        }
        if self.quote_ttl <= Duration::zero() {
            return Err("quote TTL must be positive".to_string());
        }
        if self.min_buy.minor_units <= 0 || self.min_sell.minor_units <= 0 {
            return Err("minimum amounts must be positive".to_string());
        }
        if self.min_buy.minor_units > self.max_buy.minor_units
            || self.min_sell.minor_units > self.max_sell.minor_units
        {
            return Err("minimum amounts cannot exceed maximums".to_string());
        }
        Ok(())
    }
}

/// Prices quotes from the current market rate and a customer's profile.
pub struct QuoteEngine {
    provider: Arc<CachedRateProvider>,
    config: QuoteConfig,
    pair: CurrencyPair,
}

impl QuoteEngine {
    /// Create a new quote engine.
    pub fn new(provider: Arc<CachedRateProvider>, config: QuoteConfig) -> Self {
        Self {
            provider,
            config,
            pair: CurrencyPair::usdt_brl(),
        }
    }

    /// Price a quote for a customer.
    #[instrument(skip(self, profile), fields(
        customer_id = %profile.customer_id,
        direction = ?direction,
        amount = %amount,
    ))]
    pub async fn quote(
        &self,
        direction: Direction,
        amount: Money,
        profile: &CustomerProfile,
    ) -> FxResult<Quote> {
        self.validate_amount(direction, amount)?;

        let snapshot = self.provider.latest(&self.pair).await?;
        // Spread is never negative, whatever the profile says.
        let spread = profile
            .spread_percent
            .unwrap_or(self.config.default_spread_percent)
            .max(Decimal::ZERO);
        let effective_rate = Self::effective_rate(snapshot.rate, spread, direction);

        let (net_amount, output_amount, fees) = match direction {
            Direction::Buy => self.price_buy(amount, snapshot.rate, effective_rate)?,
            Direction::Sell => self.price_sell(amount, snapshot.rate, effective_rate)?,
        };

        let now = time::now();
        let quote = Quote {
            id: QuoteId::new(),
            customer_id: profile.customer_id.clone(),
            direction,
            pair: self.pair,
            base_rate: snapshot.rate,
            spread_percent: spread,
            effective_rate,
            gross_amount: amount,
            net_amount,
            output_amount,
            fees,
            created_at: now,
            expires_at: now + self.config.quote_ttl,
        };

        info!(
            quote_id = %quote.id,
            effective_rate = %quote.effective_rate,
            output = %quote.output_amount,
            stale_rate = snapshot.stale,
            "issued quote"
        );

        Ok(quote)
    }

    /// The rate charged to the customer: base moved against them by the
    /// spread.
    fn effective_rate(base_rate: Decimal, spread_percent: Decimal, direction: Direction) -> Decimal {
        let factor = spread_percent / Decimal::ONE_HUNDRED;
        match direction {
            Direction::Buy => base_rate * (Decimal::ONE + factor),
            Direction::Sell => base_rate * (Decimal::ONE - factor),
        }
    }

    /// Buy: gross BRL in, fees off the top, remainder converted at the
    /// effective rate, USDT output floored.
    fn price_buy(
        &self,
        gross: Money,
        base_rate: Decimal,
        effective_rate: Decimal,
    ) -> FxResult<(Money, Money, FeeBreakdown)> {
        let gateway_fee = self.config.gateway_fee;
        let exchange_fee = gross.percent_of(self.config.exchange_fee_percent, Rounding::Up)?;

        let net = gross.checked_sub(gateway_fee)?.checked_sub(exchange_fee)?;
        if !net.is_positive() {
            return Err(self.out_of_range(Direction::Buy, gross));
        }

        let output = net.divide_by_rate(effective_rate, Currency::Usdt, Rounding::Down)?;
        // What the output would have cost at the market rate; the remainder
        // of net is the spread margin.
        let cost_at_base = output.multiply_by_rate(base_rate, Currency::Brl, Rounding::Down)?;
        let internal_fee = net.checked_sub(cost_at_base)?;

        Ok((
            net,
            output,
            FeeBreakdown {
                gateway_fee,
                exchange_fee,
                internal_fee,
            },
        ))
    }

    /// Sell: gross USDT converted at the effective rate, fees off the BRL
    /// proceeds, remainder paid out.
    fn price_sell(
        &self,
        gross: Money,
        base_rate: Decimal,
        effective_rate: Decimal,
    ) -> FxResult<(Money, Money, FeeBreakdown)> {
        let brl_equiv = gross.multiply_by_rate(effective_rate, Currency::Brl, Rounding::Down)?;
        let gateway_fee = self.config.gateway_fee;
        let exchange_fee = brl_equiv.percent_of(self.config.exchange_fee_percent, Rounding::Up)?;

        let net = brl_equiv
            .checked_sub(gateway_fee)?
            .checked_sub(exchange_fee)?;
        if !net.is_positive() {
            return Err(self.out_of_range(Direction::Sell, gross));
        }

        let market_value = gross.multiply_by_rate(base_rate, Currency::Brl, Rounding::Up)?;
        let internal_fee = market_value.checked_sub(brl_equiv)?;

        Ok((
            net,
            net,
            FeeBreakdown {
                gateway_fee,
                exchange_fee,
                internal_fee,
            },
        ))
    }

    fn validate_amount(&self, direction: Direction, amount: Money) -> FxResult<()> {
        let expected = direction.source_currency();
        if amount.currency != expected {
            return Err(FxError::Money(cambio_common::MoneyError::CurrencyMismatch {
                expected,
                actual: amount.currency,
            }));
        }

        let (min, max) = match direction {
            Direction::Buy => (self.config.min_buy, self.config.max_buy),
            Direction::Sell => (self.config.min_sell, self.config.max_sell),
        };
        if amount.minor_units < min.minor_units || amount.minor_units > max.minor_units {
            return Err(FxError::AmountOutOfRange { amount, min, max });
        }
        Ok(())
    }

    fn out_of_range(&self, direction: Direction, amount: Money) -> FxError {
        let (min, max) = match direction {
            Direction::Buy => (self.config.min_buy, self.config.max_buy),
            Direction::Sell => (self.config.min_sell, self.config.max_sell),
        };
        FxError::AmountOutOfRange { amount, min, max }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockRateSource, RateProviderConfig};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn setup_engine(config: QuoteConfig) -> (Arc<MockRateSource>, QuoteEngine) {
        let source = Arc::new(MockRateSource::new("mock"));
        source.set_rate(CurrencyPair::usdt_brl(), dec!(6.00));
        let provider = Arc::new(CachedRateProvider::new(
            source.clone(),
            RateProviderConfig::default(),
        ));
        (source, QuoteEngine::new(provider, config))
    }

    fn no_exchange_fee_config() -> QuoteConfig {
        QuoteConfig {
            exchange_fee_percent: Decimal::ZERO,
            ..QuoteConfig::default()
        }
    }

    #[tokio::test]
    async fn test_buy_quote_decomposition() {
        // 1000.00 BRL at base 6.00, spread 1%, gateway fee 2.00, no exchange
        // fee: effective 6.06, net 998.00, output 164.686468 USDT.
        let (_, engine) = setup_engine(no_exchange_fee_config());
        let profile = CustomerProfile::new(CustomerId::new("cus_1"));

        let quote = engine
            .quote(Direction::Buy, Money::new(1_000_00, Currency::Brl), &profile)
            .await
            .unwrap();

        assert_eq!(quote.effective_rate, dec!(6.0600));
        assert_eq!(quote.net_amount, Money::new(998_00, Currency::Brl));
        assert_eq!(quote.output_amount, Money::new(164_686_468, Currency::Usdt));
        assert_eq!(quote.fees.gateway_fee, Money::new(2_00, Currency::Brl));
        assert_eq!(quote.fees.exchange_fee, Money::zero(Currency::Brl));
        // 998.00 - floor(164.686468 * 6.00) = 998.00 - 988.11
        assert_eq!(quote.fees.internal_fee, Money::new(9_89, Currency::Brl));
    }

    #[tokio::test]
    async fn test_sell_quote_rate_deflated() {
        let (_, engine) = setup_engine(no_exchange_fee_config());
        let profile = CustomerProfile::new(CustomerId::new("cus_1"));

        let quote = engine
            .quote(
                Direction::Sell,
                Money::new(100_000_000, Currency::Usdt),
                &profile,
            )
            .await
            .unwrap();

        // 100 USDT at effective 5.94 = 594.00 BRL, minus 2.00 gateway.
        assert_eq!(quote.effective_rate, dec!(5.9400));
        assert!(quote.effective_rate <= quote.base_rate);
        assert_eq!(quote.net_amount, Money::new(592_00, Currency::Brl));
        assert_eq!(quote.output_amount, quote.net_amount);
        // 100 * 6.00 - 594.00
        assert_eq!(quote.fees.internal_fee, Money::new(6_00, Currency::Brl));
    }

    #[tokio::test]
    async fn test_spread_override() {
        let (_, engine) = setup_engine(no_exchange_fee_config());
        let profile = CustomerProfile::new(CustomerId::new("vip")).with_spread(dec!(0.5));

        let quote = engine
            .quote(Direction::Buy, Money::new(1_000_00, Currency::Brl), &profile)
            .await
            .unwrap();

        assert_eq!(quote.spread_percent, dec!(0.5));
        assert_eq!(quote.effective_rate, dec!(6.0300));
    }

    #[tokio::test]
    async fn test_negative_spread_clamped() {
        let (_, engine) = setup_engine(no_exchange_fee_config());
        let profile = CustomerProfile::new(CustomerId::new("cus_1")).with_spread(dec!(-3));

        let quote = engine
            .quote(Direction::Buy, Money::new(1_000_00, Currency::Brl), &profile)
            .await
            .unwrap();

        assert_eq!(quote.spread_percent, Decimal::ZERO);
        assert_eq!(quote.effective_rate, quote.base_rate);
    }

    #[tokio::test]
    async fn test_amount_out_of_range() {
        let (_, engine) = setup_engine(QuoteConfig::default());
        let profile = CustomerProfile::new(CustomerId::new("cus_1"));

        let too_small = engine
            .quote(Direction::Buy, Money::new(1_00, Currency::Brl), &profile)
            .await;
        assert!(matches!(too_small, Err(FxError::AmountOutOfRange { .. })));

        let too_large = engine
            .quote(
                Direction::Buy,
                Money::new(1_000_000_00, Currency::Brl),
                &profile,
            )
            .await;
        assert!(matches!(too_large, Err(FxError::AmountOutOfRange { .. })));
    }

    #[tokio::test]
    async fn test_wrong_currency_rejected() {
        let (_, engine) = setup_engine(QuoteConfig::default());
        let profile = CustomerProfile::new(CustomerId::new("cus_1"));

        let result = engine
            .quote(
                Direction::Buy,
                Money::new(100_000_000, Currency::Usdt),
                &profile,
            )
            .await;
        assert!(matches!(result, Err(FxError::Money(_))));
    }

    #[tokio::test]
    async fn test_exchange_fee_charged_on_gross() {
        let config = QuoteConfig {
            exchange_fee_percent: dec!(0.5),
            ..QuoteConfig::default()
        };
        let (_, engine) = setup_engine(config);
        let profile = CustomerProfile::new(CustomerId::new("cus_1"));

        let quote = engine
            .quote(Direction::Buy, Money::new(1_000_00, Currency::Brl), &profile)
            .await
            .unwrap();

        // 0.5% of 1000.00 BRL.
        assert_eq!(quote.fees.exchange_fee, Money::new(5_00, Currency::Brl));
        assert_eq!(quote.net_amount, Money::new(993_00, Currency::Brl));
    }

    #[tokio::test]
    async fn test_fees_plus_net_conserve_gross() {
        let config = QuoteConfig {
            exchange_fee_percent: dec!(0.37),
            ..QuoteConfig::default()
        };
        let (_, engine) = setup_engine(config);
        let profile = CustomerProfile::new(CustomerId::new("cus_1"));

        let quote = engine
            .quote(Direction::Buy, Money::new(1_234_56, Currency::Brl), &profile)
            .await
            .unwrap();

        let reassembled = quote
            .net_amount
            .checked_add(quote.fees.gateway_fee)
            .unwrap()
            .checked_add(quote.fees.exchange_fee)
            .unwrap();
        assert_eq!(reassembled, quote.gross_amount);
        assert!(!quote.fees.internal_fee.is_negative());
    }

    proptest! {
        #[test]
        fn prop_effective_rate_moves_against_customer(
            base_cents in 100i64..10_000_00,
            spread_bps in 0i64..1_000,
        ) {
            let base = Decimal::new(base_cents, 2);
            let spread = Decimal::new(spread_bps, 2);

            let buy = QuoteEngine::effective_rate(base, spread, Direction::Buy);
            let sell = QuoteEngine::effective_rate(base, spread, Direction::Sell);

            prop_assert!(buy >= base);
            prop_assert!(sell <= base);
        }
    }
}
