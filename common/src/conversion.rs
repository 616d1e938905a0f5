//! Conversion lifecycle types and the event-driven transition table.
//!
//! A [`Conversion`] is only ever moved between states by a [`ProviderEvent`]
//! carrying a unique [`EventKey`]; there is no direct status assignment. The
//! valid `(status, event) -> status` pairs live in
//! [`ConversionStatus::next`], and every applied transition is appended to
//! the conversion's history for audit.

use serde::{Deserialize, Serialize};

use crate::error::CambioError;
use crate::identifiers::{AffiliateId, ConversionId, CustomerId, EventKey};
use crate::money::Money;
use crate::quote::{Direction, Quote};
use crate::time::{self, Timestamp};

/// Lifecycle state of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversionStatus {
    /// Committed by the customer, no provider charge yet.
    Created,
    /// Provider issued the PIX charge, awaiting payment.
    Pending,
    /// Customer paid the charge, awaiting exchange settlement.
    Paid,
    /// Funds moved and balances updated.
    Settled,
    /// Charge expired or was rejected upstream.
    Failed,
    /// Cancelled by the customer before payment.
    Cancelled,
    /// Settled conversion reversed by an admin refund.
    Refunded,
}

impl ConversionStatus {
    /// Check if this is a terminal state. A settled conversion is terminal
    /// for the payment lifecycle but can still be refunded by an admin.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversionStatus::Settled
                | ConversionStatus::Failed
                | ConversionStatus::Cancelled
                | ConversionStatus::Refunded
        )
    }

    /// Check if the conversion is still moving through the happy path.
    pub fn is_in_progress(&self) -> bool {
        !self.is_terminal()
    }

    /// The transition table: the state this status moves to on `event`, or
    /// `None` when the event is not valid here.
    pub fn next(&self, event: ProviderEvent) -> Option<ConversionStatus> {
        use ConversionStatus::*;
        use ProviderEvent::*;

        match (self, event) {
            (Created, ChargeIssued) => Some(Pending),
            (Pending, ChargePaid) => Some(Paid),
            (Paid, SettlementConfirmed) => Some(Settled),
            (Pending | Paid, ChargeExpired | ChargeRejected) => Some(Failed),
            (Created | Pending, UserCancelled) => Some(Cancelled),
            (Settled, RefundRequested) => Some(Refunded),
            _ => None,
        }
    }
}

/// An external event that can drive a conversion transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderEvent {
    /// PIX charge created at the gateway.
    ChargeIssued,
    /// PIX charge paid by the customer.
    ChargePaid,
    /// Exchange leg filled; funds are final.
    SettlementConfirmed,
    /// PIX charge expired unpaid.
    ChargeExpired,
    /// Charge rejected by the gateway.
    ChargeRejected,
    /// Customer cancelled before paying.
    UserCancelled,
    /// Admin requested a refund of a settled conversion.
    RefundRequested,
}

/// One applied transition, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    /// State before the transition.
    pub from: ConversionStatus,
    /// State after the transition.
    pub to: ConversionStatus,
    /// Event that drove the transition.
    pub event: ProviderEvent,
    /// Idempotency key of the driving event.
    pub event_key: EventKey,
    /// When the transition was applied.
    pub at: Timestamp,
}

/// A committed conversion: a PIX-funded USDT purchase or a USDT sell order.
///
/// Owned exclusively by the settlement pipeline; customer balances and
/// affiliate commissions are derived from it, never stored on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    /// Unique conversion identifier.
    pub id: ConversionId,
    /// Customer who committed the quote.
    pub customer_id: CustomerId,
    /// Conversion direction.
    pub direction: Direction,
    /// The quote locked at commitment. Immutable from here on.
    pub quote: Quote,
    /// Amount the customer hands over.
    pub gross_amount: Money,
    /// Gross minus gateway and exchange fees.
    pub net_amount: Money,
    /// Current lifecycle state.
    pub status: ConversionStatus,
    /// Referring affiliate, if the customer was referred.
    pub affiliate_id: Option<AffiliateId>,
    /// Charge or order reference assigned by the upstream provider.
    pub provider_ref: Option<String>,
    /// Append-only transition history.
    pub history: Vec<StatusChange>,
    /// When the conversion was committed.
    pub created_at: Timestamp,
    /// When the conversion last transitioned.
    pub updated_at: Timestamp,
}

impl Conversion {
    /// Create a conversion in `Created` from a committed quote.
    pub fn from_quote(quote: Quote, affiliate_id: Option<AffiliateId>) -> Self {
        let now = time::now();
        Self {
            id: ConversionId::new(),
            customer_id: quote.customer_id.clone(),
            direction: quote.direction,
            gross_amount: quote.gross_amount,
            net_amount: quote.net_amount,
            status: ConversionStatus::Created,
            affiliate_id,
            provider_ref: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
            quote,
        }
    }

    /// Apply an event, validating it against the transition table and
    /// appending to history. Rejected events leave the conversion untouched.
    pub fn apply_event(
        &mut self,
        event: ProviderEvent,
        event_key: &EventKey,
    ) -> Result<ConversionStatus, CambioError> {
        let next = self
            .status
            .next(event)
            .ok_or(CambioError::InvalidTransition {
                status: self.status,
                event,
            })?;

        self.record_change(next, event, event_key);
        Ok(next)
    }

    /// Force the conversion to `Failed` after an aborted settlement. Only
    /// valid while the conversion is still in progress.
    pub fn fail(&mut self, event: ProviderEvent, event_key: &EventKey) -> Result<(), CambioError> {
        if self.status.is_terminal() {
            return Err(CambioError::InvalidTransition {
                status: self.status,
                event,
            });
        }
        self.record_change(ConversionStatus::Failed, event, event_key);
        Ok(())
    }

    /// Attach the provider's charge/order reference.
    pub fn set_provider_ref(&mut self, provider_ref: impl Into<String>) {
        self.provider_ref = Some(provider_ref.into());
        self.updated_at = time::now();
    }

    fn record_change(&mut self, to: ConversionStatus, event: ProviderEvent, event_key: &EventKey) {
        let now = time::now();
        self.history.push(StatusChange {
            from: self.status,
            to,
            event,
            event_key: event_key.clone(),
            at: now,
        });
        self.status = to;
        self.updated_at = now;
    }
}
