//! The conversion service facade, consumed by the platform's HTTP layer.
//!
//! Owns the quote path (engine + book), the payment state machine, and the
//! profile registry, over one durable store. The excluded UI/API layer
//! translates the structured errors into user-facing messages.

use std::sync::Arc;

use cambio_common::{
    AffiliateId, CambioError, CommissionId, Conversion, ConversionId, ConversionStatus,
    CurrencyPair, CustomerId, Direction, EventKey, Money, ProviderEvent, Quote, QuoteId, Result,
};
use cambio_fx::{
    CachedRateProvider, CustomerProfile, QuoteBook, QuoteEngine, RateSnapshot, RateSource,
};
use cambio_ledger::{AffiliateProfile, BalanceSnapshot, CommissionEntry};
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::events::{ExchangeFill, PixWebhook};
use crate::metrics::{EngineMetrics, MetricsSnapshot, SharedMetrics};
use crate::profiles::ProfileRegistry;
use crate::state_machine::PaymentStateMachine;
use crate::store::{CommissionFilter, ConversionStore};

/// The pipeline facade: quoting, commitment, event application, queries.
pub struct ConversionService {
    provider: Arc<CachedRateProvider>,
    quote_engine: QuoteEngine,
    quote_book: QuoteBook,
    profiles: Arc<ProfileRegistry>,
    state_machine: PaymentStateMachine,
    store: Arc<dyn ConversionStore>,
    metrics: SharedMetrics,
    pair: CurrencyPair,
}

impl ConversionService {
    /// Create a new service over a rate source and a durable store.
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn RateSource>,
        store: Arc<dyn ConversionStore>,
    ) -> Result<Self> {
        config.validate().map_err(CambioError::Configuration)?;

        let provider = Arc::new(CachedRateProvider::new(source, config.rates.clone()));
        let profiles = Arc::new(ProfileRegistry::new());
        let metrics: SharedMetrics = Arc::new(EngineMetrics::new());
        let state_machine =
            PaymentStateMachine::new(store.clone(), profiles.clone(), metrics.clone());

        Ok(Self {
            quote_engine: QuoteEngine::new(provider.clone(), config.quotes.clone()),
            provider,
            quote_book: QuoteBook::new(),
            profiles,
            state_machine,
            store,
            metrics,
            pair: CurrencyPair::usdt_brl(),
        })
    }

    /// Register or replace a customer profile.
    pub fn register_customer(&self, profile: CustomerProfile) -> Result<()> {
        self.profiles.register_customer(profile)
    }

    /// Register or replace an affiliate profile.
    pub fn register_affiliate(&self, profile: AffiliateProfile) -> Result<()> {
        self.profiles.register_affiliate(profile)
    }

    /// Refresh the market rate. Hooked up to an external scheduler.
    pub async fn refresh_rates(&self) -> Result<RateSnapshot> {
        Ok(self.provider.refresh(&self.pair).await?)
    }

    /// Price a quote for a registered customer.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn quote(
        &self,
        customer_id: &CustomerId,
        direction: Direction,
        amount: Money,
    ) -> Result<Quote> {
        let profile = self
            .profiles
            .customer(customer_id)
            .ok_or_else(|| CambioError::UnknownCustomer(customer_id.clone()))?;

        let quote = self.quote_engine.quote(direction, amount, &profile).await?;
        self.quote_book.insert(quote.clone());
        self.metrics.quote_issued();
        Ok(quote)
    }

    /// Commit a quote, creating a conversion in `CREATED`. Consumes the
    /// quote; Sell conversions reserve their gross USDT up front.
    #[instrument(skip(self), fields(quote_id = %quote_id))]
    pub async fn commit_conversion(&self, quote_id: QuoteId) -> Result<Conversion> {
        let quote = self.quote_book.consume(quote_id)?;
        let profile = self
            .profiles
            .customer(&quote.customer_id)
            .ok_or_else(|| CambioError::UnknownCustomer(quote.customer_id.clone()))?;

        let conversion = Conversion::from_quote(quote, profile.referred_by.clone());
        self.state_machine.reserve(&conversion).await?;
        self.store.insert_conversion(&conversion).await?;

        self.metrics.conversion_committed();
        info!(
            conversion_id = %conversion.id,
            direction = ?conversion.direction,
            gross = %conversion.gross_amount,
            "conversion committed"
        );
        Ok(conversion)
    }

    /// Attach the provider's charge/order reference to a conversion so
    /// inbound deliveries can be mapped back to it.
    pub async fn attach_provider_ref(
        &self,
        conversion_id: ConversionId,
        provider_ref: &str,
    ) -> Result<Conversion> {
        let mut conversion = self.load_conversion(conversion_id).await?;
        conversion.set_provider_ref(provider_ref);
        self.store.update_conversion(&conversion).await?;
        Ok(conversion)
    }

    /// Apply a provider event to a conversion.
    pub async fn apply_provider_event(
        &self,
        conversion_id: ConversionId,
        event_key: &EventKey,
        event: ProviderEvent,
    ) -> Result<ConversionStatus> {
        self.state_machine
            .apply_event(conversion_id, event_key, event)
            .await
    }

    /// Apply a PIX charge webhook, mapped to its conversion by charge ID.
    #[instrument(skip(self, webhook), fields(
        charge_id = %webhook.charge_id,
        event_key = %webhook.event_key,
    ))]
    pub async fn apply_pix_webhook(&self, webhook: &PixWebhook) -> Result<ConversionStatus> {
        let conversion = self
            .store
            .conversion_by_provider_ref(&webhook.charge_id)
            .await?
            .ok_or_else(|| CambioError::UnknownProviderRef(webhook.charge_id.clone()))?;

        // Amount authority is the locked quote; a divergent gateway amount
        // is surfaced for the operator, not blocking.
        if let Some(paid) = webhook.paid_amount() {
            let expected = match conversion.direction {
                Direction::Buy => conversion.gross_amount,
                Direction::Sell => conversion.net_amount,
            };
            if paid != expected {
                warn!(
                    conversion_id = %conversion.id,
                    paid = %paid,
                    expected = %expected,
                    "webhook amount diverges from locked quote"
                );
            }
        }

        self.apply_provider_event(conversion.id, &webhook.event_key, webhook.provider_event())
            .await
    }

    /// Apply an exchange order fill, mapped to its conversion by order ID.
    #[instrument(skip(self, fill), fields(
        order_id = %fill.order_id,
        event_key = %fill.event_key,
    ))]
    pub async fn apply_exchange_fill(&self, fill: &ExchangeFill) -> Result<ConversionStatus> {
        let conversion = self
            .store
            .conversion_by_provider_ref(&fill.order_id)
            .await?
            .ok_or_else(|| CambioError::UnknownProviderRef(fill.order_id.clone()))?;

        let expected = match conversion.direction {
            Direction::Buy => conversion.quote.output_amount,
            Direction::Sell => conversion.gross_amount,
        };
        if fill.filled_amount != expected {
            warn!(
                conversion_id = %conversion.id,
                filled = %fill.filled_amount,
                expected = %expected,
                "fill amount diverges from locked quote"
            );
        }

        self.apply_provider_event(conversion.id, &fill.event_key, fill.provider_event())
            .await
    }

    /// Load a conversion.
    pub async fn conversion(&self, conversion_id: ConversionId) -> Result<Conversion> {
        self.load_conversion(conversion_id).await
    }

    /// Current balance snapshot for a customer.
    pub async fn balance(&self, customer_id: &CustomerId) -> Result<BalanceSnapshot> {
        self.state_machine.balance(customer_id).await
    }

    /// Commission entries owed to an affiliate.
    pub async fn affiliate_commissions(
        &self,
        affiliate_id: &AffiliateId,
        filter: &CommissionFilter,
    ) -> Result<Vec<CommissionEntry>> {
        self.store
            .commissions_for_affiliate(affiliate_id, filter)
            .await
    }

    /// Pay out a pending commission entry.
    pub async fn mark_commission_paid(&self, commission_id: CommissionId) -> Result<CommissionEntry> {
        let mut entry = self
            .store
            .get_commission(commission_id)
            .await?
            .ok_or(CambioError::CommissionNotFound(commission_id))?;

        entry.mark_paid()?;
        self.store.update_commission(&entry).await?;

        info!(
            commission_id = %commission_id,
            affiliate_id = %entry.affiliate_id,
            amount = %entry.amount_brl,
            "commission paid out"
        );
        Ok(entry)
    }

    /// Drop expired and consumed quotes from the book. Hooked up to an
    /// external scheduler.
    pub fn evict_stale_quotes(&self) {
        self.quote_book.evict_stale();
    }

    /// Get current metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn load_conversion(&self, conversion_id: ConversionId) -> Result<Conversion> {
        self.store
            .get_conversion(conversion_id)
            .await?
            .ok_or(CambioError::ConversionNotFound(conversion_id))
    }
}
