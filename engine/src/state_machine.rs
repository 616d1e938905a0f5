//! The payment state machine: event-driven, exactly-once transitions.
//!
//! Ordering contract for one conversion, applied under its gate:
//!
//! 1. consult the idempotency store — a redelivered key is a no-op that
//!    returns the current status (at-least-once delivery is expected, so
//!    duplicates are not errors);
//! 2. validate the transition — an event with no table entry fails with
//!    `InvalidTransition`, is logged as a potential upstream-ordering bug,
//!    and does *not* consume its key;
//! 3. consume the key, apply side effects, persist the new state.
//!
//! The seen-check runs before transition validation so a redelivered event
//! no-ops instead of surfacing a spurious `InvalidTransition`. Events for
//! different conversions proceed fully in parallel; balance mutation
//! additionally holds the customer gate. Only the `Settled` and `Refunded`
//! transitions touch balances.

use std::sync::Arc;

use cambio_common::{
    CambioError, Conversion, ConversionId, ConversionStatus, CustomerId, Direction, EventKey,
    ProviderEvent, Result,
};
use cambio_ledger::{BalanceSnapshot, CommissionEngine, CommissionEntry, ConversionLedger};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::idempotency::EventIdempotencyStore;
use crate::metrics::SharedMetrics;
use crate::profiles::ProfileRegistry;
use crate::store::ConversionStore;

/// Drives conversions through their lifecycle with exactly-once side
/// effects under concurrent, redundant provider deliveries.
pub struct PaymentStateMachine {
    store: Arc<dyn ConversionStore>,
    idempotency: EventIdempotencyStore,
    profiles: Arc<ProfileRegistry>,
    metrics: SharedMetrics,
    conversion_gates: DashMap<ConversionId, Arc<Mutex<()>>>,
    customer_gates: DashMap<CustomerId, Arc<Mutex<()>>>,
}

impl PaymentStateMachine {
    /// Create a new state machine over the durable store.
    pub fn new(
        store: Arc<dyn ConversionStore>,
        profiles: Arc<ProfileRegistry>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            idempotency: EventIdempotencyStore::new(store.clone()),
            store,
            profiles,
            metrics,
            conversion_gates: DashMap::new(),
            customer_gates: DashMap::new(),
        }
    }

    /// Apply a provider event to a conversion.
    ///
    /// Returns the conversion's status after the call: the new status when
    /// the event applied, the unchanged status when the delivery was a
    /// duplicate.
    #[instrument(skip(self), fields(
        conversion_id = %conversion_id,
        event = ?event,
        event_key = %event_key,
    ))]
    pub async fn apply_event(
        &self,
        conversion_id: ConversionId,
        event_key: &EventKey,
        event: ProviderEvent,
    ) -> Result<ConversionStatus> {
        if !event_key.is_valid() {
            return Err(CambioError::Provider(format!(
                "malformed event key: {event_key:?}"
            )));
        }

        let gate = self.conversion_gate(conversion_id);
        let _guard = gate.lock().await;

        let mut conversion = self
            .store
            .get_conversion(conversion_id)
            .await?
            .ok_or(CambioError::ConversionNotFound(conversion_id))?;

        if self.idempotency.was_applied(conversion_id, event_key).await? {
            debug!(status = ?conversion.status, "duplicate delivery suppressed");
            self.metrics.event_duplicate();
            return Ok(conversion.status);
        }

        let Some(next) = conversion.status.next(event) else {
            warn!(
                status = ?conversion.status,
                "rejected event with no valid transition, possible upstream ordering bug"
            );
            self.metrics.event_rejected();
            return Err(CambioError::InvalidTransition {
                status: conversion.status,
                event,
            });
        };

        // First writer wins; a concurrent consumer (another process sharing
        // the store) makes this delivery a no-op.
        if !self.idempotency.try_consume(conversion_id, event_key).await? {
            self.metrics.event_duplicate();
            return Ok(conversion.status);
        }

        match next {
            ConversionStatus::Settled => {
                match self.settle(&mut conversion, event, event_key).await {
                    Ok(status) => Ok(status),
                    Err(err) => self.abort_settlement(conversion, event, event_key, err).await,
                }
            }
            ConversionStatus::Refunded => self.refund(&mut conversion, event, event_key).await,
            ConversionStatus::Failed | ConversionStatus::Cancelled => {
                self.release_reservation(&conversion).await?;
                self.finish_bookkeeping(&mut conversion, event, event_key).await
            }
            _ => self.finish_bookkeeping(&mut conversion, event, event_key).await,
        }
    }

    /// Reserve the gross USDT for a Sell conversion at commit time. The
    /// reservation is consumed on settlement and released on
    /// failure/cancellation.
    pub async fn reserve(&self, conversion: &Conversion) -> Result<()> {
        if conversion.direction != Direction::Sell {
            return Ok(());
        }

        let gate = self.customer_gate(&conversion.customer_id);
        let _guard = gate.lock().await;

        let mut balance = self.load_balance(&conversion.customer_id).await?;
        balance.reserve(conversion.gross_amount)?;
        self.store.put_balance(&balance).await?;

        debug!(
            conversion_id = %conversion.id,
            amount = %conversion.gross_amount,
            "reserved funds for sell conversion"
        );
        Ok(())
    }

    /// Current balance snapshot for a customer.
    pub async fn balance(&self, customer_id: &CustomerId) -> Result<BalanceSnapshot> {
        self.load_balance(customer_id).await
    }

    // --- Private methods ---

    /// A purely bookkeeping transition: no balance movement.
    async fn finish_bookkeeping(
        &self,
        conversion: &mut Conversion,
        event: ProviderEvent,
        event_key: &EventKey,
    ) -> Result<ConversionStatus> {
        let from = conversion.status;
        let status = conversion.apply_event(event, event_key)?;
        self.store.update_conversion(conversion).await?;

        self.metrics.event_applied();
        info!(from = ?from, to = ?status, "conversion transitioned");
        Ok(status)
    }

    /// The settlement transition: ledger application and commission under
    /// the customer gate, persisted as one unit.
    async fn settle(
        &self,
        conversion: &mut Conversion,
        event: ProviderEvent,
        event_key: &EventKey,
    ) -> Result<ConversionStatus> {
        let gate = self.customer_gate(&conversion.customer_id);
        let _guard = gate.lock().await;

        let mut balance = self.load_balance(&conversion.customer_id).await?;
        let application = ConversionLedger::apply(conversion, &mut balance)?;
        let commission = self.commission_for(conversion).await?;

        let status = conversion.apply_event(event, event_key)?;
        self.store
            .record_settlement(conversion, &application.entries, &balance, commission.as_ref())
            .await?;

        self.metrics.event_applied();
        self.metrics.settlement_recorded();
        info!(
            profit = %application.realized_profit,
            commission = commission.is_some(),
            "conversion settled"
        );
        Ok(status)
    }

    /// A settlement whose ledger application failed: the conversion is
    /// forced to FAILED rather than ever reaching SETTLED, loudly. Faults
    /// outside the ledger (storage) propagate without a state change.
    async fn abort_settlement(
        &self,
        mut conversion: Conversion,
        event: ProviderEvent,
        event_key: &EventKey,
        err: CambioError,
    ) -> Result<ConversionStatus> {
        match &err {
            CambioError::LedgerInvariantViolation { .. }
            | CambioError::InsufficientFunds { .. } => {
                error!(error = %err, "settlement aborted, forcing conversion to FAILED");
                if let Err(release_err) = self.release_reservation(&conversion).await {
                    warn!(
                        error = %release_err,
                        "could not release reservation of aborted settlement"
                    );
                }
                conversion.fail(event, event_key)?;
                self.store.update_conversion(&conversion).await?;
                self.metrics.settlement_failed();
                Err(err)
            }
            _ => Err(err),
        }
    }

    /// The refund transition: symmetric ledger reversal under the customer
    /// gate.
    async fn refund(
        &self,
        conversion: &mut Conversion,
        event: ProviderEvent,
        event_key: &EventKey,
    ) -> Result<ConversionStatus> {
        let gate = self.customer_gate(&conversion.customer_id);
        let _guard = gate.lock().await;

        let mut balance = self.load_balance(&conversion.customer_id).await?;
        let application = ConversionLedger::reverse(conversion, &mut balance)?;

        let status = conversion.apply_event(event, event_key)?;
        self.store
            .record_reversal(conversion, &application.entries, &balance)
            .await?;

        self.metrics.event_applied();
        self.metrics.refund_recorded();
        info!("conversion refunded");
        Ok(status)
    }

    /// Commission for a settling conversion, if one is owed.
    async fn commission_for(&self, conversion: &Conversion) -> Result<Option<CommissionEntry>> {
        let Some(affiliate_id) = &conversion.affiliate_id else {
            return Ok(None);
        };

        // Defense in depth: the settlement transition is already
        // deduplicated, but a pre-existing entry must still win over
        // recomputation.
        if let Some(existing) = self.store.commission_for_conversion(conversion.id).await? {
            debug!(commission_id = %existing.id, "commission already recorded");
            return Ok(None);
        }

        let Some(profile) = self.profiles.affiliate(affiliate_id) else {
            warn!(
                affiliate_id = %affiliate_id,
                "conversion references unknown affiliate, skipping commission"
            );
            return Ok(None);
        };

        CommissionEngine::compute(conversion, &profile)
    }

    /// Release a Sell conversion's reservation on failure or cancellation.
    async fn release_reservation(&self, conversion: &Conversion) -> Result<()> {
        if conversion.direction != Direction::Sell {
            return Ok(());
        }

        let gate = self.customer_gate(&conversion.customer_id);
        let _guard = gate.lock().await;

        let Some(mut balance) = self.store.get_balance(&conversion.customer_id).await? else {
            warn!(
                conversion_id = %conversion.id,
                "no balance snapshot for reserved sell conversion"
            );
            return Ok(());
        };

        balance.release(conversion.gross_amount)?;
        self.store.put_balance(&balance).await?;

        debug!(
            conversion_id = %conversion.id,
            amount = %conversion.gross_amount,
            "released reservation"
        );
        Ok(())
    }

    async fn load_balance(&self, customer_id: &CustomerId) -> Result<BalanceSnapshot> {
        Ok(self
            .store
            .get_balance(customer_id)
            .await?
            .unwrap_or_else(|| BalanceSnapshot::new(customer_id.clone())))
    }

    fn conversion_gate(&self, conversion_id: ConversionId) -> Arc<Mutex<()>> {
        self.conversion_gates
            .entry(conversion_id)
            .or_default()
            .clone()
    }

    fn customer_gate(&self, customer_id: &CustomerId) -> Arc<Mutex<()>> {
        self.customer_gates
            .entry(customer_id.clone())
            .or_default()
            .clone()
    }
}
