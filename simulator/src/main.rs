//! Cambio Simulator
//!
//! Drives the conversion pipeline end-to-end with synthetic PIX webhooks
//! and exchange fills, including duplicate deliveries, then prints the
//! settlement outcome.

use std::sync::Arc;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cambio_common::{AffiliateId, Currency, CurrencyPair, CustomerId, Money};
use cambio_engine::{CommissionFilter, ConversionService, EngineConfig, MemoryStore};
use cambio_fx::{CustomerProfile, MockRateSource};
use cambio_ledger::AffiliateProfile;

mod driver;
mod metrics;

use driver::SimulationDriver;

/// Cambio Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Cambio conversion pipeline simulation environment")]
struct Args {
    /// Number of simulated customers
    #[arg(short, long, default_value = "4")]
    customers: usize,

    /// Number of simulated affiliates
    #[arg(short, long, default_value = "2")]
    affiliates: usize,

    /// Number of conversions to drive
    #[arg(short = 'n', long, default_value = "25")]
    conversions: u64,

    /// Chance (percent) of redelivering each provider event
    #[arg(long, default_value = "25")]
    duplicate_percent: u8,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting Cambio simulator");
    info!("Customers: {}", args.customers);
    info!("Conversions: {}", args.conversions);
    info!("Duplicate delivery chance: {}%", args.duplicate_percent);

    let source = Arc::new(MockRateSource::new("simulated-market"));
    source.set_rate(CurrencyPair::usdt_brl(), Decimal::new(6_00, 2));

    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(ConversionService::new(
        EngineConfig::default(),
        source.clone(),
        store,
    )?);

    let affiliate_ids: Vec<AffiliateId> = (0..args.affiliates)
        .map(|i| AffiliateId::new(format!("aff_{i}")))
        .collect();
    for (i, affiliate_id) in affiliate_ids.iter().enumerate() {
        // Rates between 0.25% and 1.0%.
        let rate = Decimal::new(25 + (i as i64 % 4) * 25, 2);
        service.register_affiliate(AffiliateProfile::new(affiliate_id.clone(), rate))?;
    }

    let customer_ids: Vec<CustomerId> = (0..args.customers)
        .map(|i| CustomerId::new(format!("cus_{i}")))
        .collect();
    for (i, customer_id) in customer_ids.iter().enumerate() {
        let mut profile = CustomerProfile::new(customer_id.clone());
        // Every other customer was referred by an affiliate; every third
        // negotiated a tighter spread.
        if !affiliate_ids.is_empty() && i % 2 == 0 {
            profile = profile.with_referrer(affiliate_ids[i % affiliate_ids.len()].clone());
        }
        if i % 3 == 0 {
            profile = profile.with_spread(Decimal::new(5, 1));
        }
        service.register_customer(profile)?;
    }

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut driver = SimulationDriver::new(
        service.clone(),
        source,
        customer_ids,
        rng,
        args.duplicate_percent,
    );
    driver.run(args.conversions).await?;

    let sim = driver.metrics();
    let engine = service.metrics();

    info!("Simulation complete");
    info!("Quotes issued: {}", sim.quotes);
    info!(
        "Committed: {} (refused: {})",
        sim.committed, sim.commits_refused
    );
    info!(
        "Settled: {} ({:.0}%), cancelled: {}, failed: {}, refunded: {}",
        sim.settled,
        sim.settlement_rate() * 100.0,
        sim.cancelled,
        sim.failed,
        sim.refunded
    );
    info!(
        "Buy volume: {}, platform margin: {}",
        Money::new(sim.buy_volume_brl_minor, Currency::Brl),
        Money::new(sim.profit_brl_minor, Currency::Brl)
    );
    info!(
        "Duplicates injected: {}, suppressed by idempotency: {}",
        sim.duplicates_delivered, engine.events_duplicate
    );
    info!(
        "Events applied: {}, rejected: {}",
        engine.events_applied, engine.events_rejected
    );

    for affiliate_id in &affiliate_ids {
        let entries = service
            .affiliate_commissions(affiliate_id, &CommissionFilter::default())
            .await?;
        let total: i64 = entries.iter().map(|e| e.amount_brl.minor_units).sum();
        info!(
            "Affiliate {}: {} commission entries, {} pending payout",
            affiliate_id,
            entries.len(),
            Money::new(total, Currency::Brl)
        );
    }

    Ok(())
}
