//! Drives the conversion pipeline end-to-end with synthetic provider
//! traffic, including deliberate duplicate deliveries.

use std::sync::Arc;

use cambio_common::{
    time, CambioError, Currency, CurrencyPair, CustomerId, Direction, EventKey, Money,
    ProviderEvent,
};
use cambio_engine::{ConversionService, ExchangeFill, PixChargeStatus, PixWebhook};
use cambio_fx::MockRateSource;
use rand::rngs::StdRng;
use rand::Rng;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::metrics::SimulationMetrics;

const MIN_SELL_MINOR: i64 = 1_000_000; // 1 USDT

/// Drives quotes, commits, and synthetic provider deliveries against the
/// service.
pub struct SimulationDriver {
    service: Arc<ConversionService>,
    source: Arc<MockRateSource>,
    customers: Vec<CustomerId>,
    rng: StdRng,
    duplicate_percent: u8,
    metrics: SimulationMetrics,
    sequence: u64,
}

impl SimulationDriver {
    /// Create a new driver.
    pub fn new(
        service: Arc<ConversionService>,
        source: Arc<MockRateSource>,
        customers: Vec<CustomerId>,
        rng: StdRng,
        duplicate_percent: u8,
    ) -> Self {
        Self {
            service,
            source,
            customers,
            rng,
            duplicate_percent,
            metrics: SimulationMetrics::new(),
            sequence: 0,
        }
    }

    /// Drive the requested number of conversions.
    pub async fn run(&mut self, conversions: u64) -> anyhow::Result<()> {
        for i in 0..conversions {
            self.jitter_rate().await?;

            let customer_id =
                self.customers[self.rng.gen_range(0..self.customers.len())].clone();

            // One misbehaving conversion must not stop the run.
            if let Err(err) = self.drive_one(&customer_id).await {
                warn!(customer_id = %customer_id, error = %err, "conversion run aborted");
            }

            debug!(completed = i + 1, "conversion driven");
        }
        Ok(())
    }

    /// Get the collected metrics.
    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    /// Nudge the simulated market and refresh the provider, as the external
    /// rate scheduler would.
    async fn jitter_rate(&mut self) -> anyhow::Result<()> {
        let bps: i64 = self.rng.gen_range(-50..=50);
        let rate = Decimal::new(6_00, 2) * (Decimal::ONE + Decimal::new(bps, 4));
        self.source.set_rate(CurrencyPair::usdt_brl(), rate);
        self.service.refresh_rates().await?;
        Ok(())
    }

    async fn drive_one(&mut self, customer_id: &CustomerId) -> anyhow::Result<()> {
        let (direction, amount) = self.pick_order(customer_id).await?;

        self.metrics.quotes += 1;
        let quote = self.service.quote(customer_id, direction, amount).await?;

        let conversion = match self.service.commit_conversion(quote.id).await {
            Ok(conversion) => conversion,
            Err(
                CambioError::InsufficientFunds { .. }
                | CambioError::QuoteExpired(_)
                | CambioError::AmountOutOfRange { .. },
            ) => {
                self.metrics.commits_refused += 1;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        self.metrics.committed += 1;

        let provider_ref = format!("charge_{}", self.next_seq());
        self.service
            .attach_provider_ref(conversion.id, &provider_ref)
            .await?;

        self.deliver_webhook(&provider_ref, PixChargeStatus::Issued, None)
            .await?;

        // Unhappy paths: a slice of charges get cancelled or expire unpaid.
        let roll: f64 = self.rng.gen();
        if roll < 0.10 {
            let key = self.next_key();
            self.service
                .apply_provider_event(conversion.id, &key, ProviderEvent::UserCancelled)
                .await?;
            self.metrics.cancelled += 1;
            return Ok(());
        }
        if roll < 0.20 {
            self.deliver_webhook(&provider_ref, PixChargeStatus::Expired, None)
                .await?;
            self.metrics.failed += 1;
            return Ok(());
        }

        let paid_cents = match direction {
            Direction::Buy => conversion.gross_amount.minor_units,
            Direction::Sell => conversion.net_amount.minor_units,
        };
        self.deliver_webhook(&provider_ref, PixChargeStatus::Paid, Some(paid_cents))
            .await?;

        let filled = match direction {
            Direction::Buy => quote.output_amount,
            Direction::Sell => quote.gross_amount,
        };
        self.deliver_fill(&provider_ref, filled, quote.effective_rate)
            .await?;

        let settled = self.service.conversion(conversion.id).await?;
        let buy_volume = match direction {
            Direction::Buy => settled.gross_amount.minor_units,
            Direction::Sell => 0,
        };
        self.metrics
            .record_settled(buy_volume, settled.quote.fees.internal_fee.minor_units);

        // The occasional admin refund of a fresh settlement.
        if self.rng.gen_bool(0.05) {
            let key = self.next_key();
            self.service
                .apply_provider_event(conversion.id, &key, ProviderEvent::RefundRequested)
                .await?;
            self.metrics.refunded += 1;
            info!(conversion_id = %conversion.id, "settled conversion refunded");
        }

        Ok(())
    }

    /// Buy by default; sell a slice of the USDT once the customer holds
    /// enough from earlier settlements.
    async fn pick_order(&mut self, customer_id: &CustomerId) -> anyhow::Result<(Direction, Money)> {
        let balance = self.service.balance(customer_id).await?;
        let available = balance.usdt.available.minor_units;

        if available >= MIN_SELL_MINOR * 2 && self.rng.gen_bool(0.35) {
            let amount = self.rng.gen_range(MIN_SELL_MINOR..=available / 2);
            return Ok((Direction::Sell, Money::new(amount, Currency::Usdt)));
        }

        let amount = self.rng.gen_range(50_00..=5_000_00);
        Ok((Direction::Buy, Money::new(amount, Currency::Brl)))
    }

    async fn deliver_webhook(
        &mut self,
        charge_id: &str,
        status: PixChargeStatus,
        paid_amount_cents: Option<i64>,
    ) -> anyhow::Result<()> {
        let webhook = PixWebhook {
            event_key: self.next_key(),
            charge_id: charge_id.to_string(),
            status,
            paid_amount_cents,
            timestamp: time::now(),
        };

        self.service.apply_pix_webhook(&webhook).await?;

        // At-least-once delivery: sometimes the gateway sends it again.
        if self.should_duplicate() {
            self.metrics.duplicates_delivered += 1;
            self.service.apply_pix_webhook(&webhook).await?;
        }
        Ok(())
    }

    async fn deliver_fill(
        &mut self,
        order_id: &str,
        filled_amount: Money,
        avg_price: Decimal,
    ) -> anyhow::Result<()> {
        let fill = ExchangeFill {
            event_key: self.next_key(),
            order_id: order_id.to_string(),
            filled_amount,
            avg_price,
            timestamp: time::now(),
        };

        self.service.apply_exchange_fill(&fill).await?;

        if self.should_duplicate() {
            self.metrics.duplicates_delivered += 1;
            self.service.apply_exchange_fill(&fill).await?;
        }
        Ok(())
    }

    fn should_duplicate(&mut self) -> bool {
        self.rng.gen_range(0u8..100) < self.duplicate_percent
    }

    fn next_key(&mut self) -> EventKey {
        EventKey::new(format!("evt_{}", self.next_seq()))
    }

    fn next_seq(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}
