//! Inbound provider payloads and their mapping onto state machine events.
//!
//! The upstream wire protocols are out of scope; these are the shapes the
//! core consumes after the transport layer has authenticated and decoded a
//! delivery.

use cambio_common::{Currency, EventKey, Money, ProviderEvent, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Charge-lifecycle webhook from the PIX gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixWebhook {
    /// Gateway delivery ID, used as the idempotency key.
    pub event_key: EventKey,
    /// Gateway charge reference, mapped to a conversion.
    pub charge_id: String,
    /// Charge status reported by the gateway.
    pub status: PixChargeStatus,
    /// Amount the payer actually moved, in centavos.
    pub paid_amount_cents: Option<i64>,
    /// When the gateway observed the change.
    pub timestamp: Timestamp,
}

/// PIX charge status as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PixChargeStatus {
    /// Charge created, QR code issued.
    Issued,
    /// Charge paid by the customer.
    Paid,
    /// Charge expired unpaid.
    Expired,
    /// Charge rejected by the gateway.
    Rejected,
}

impl PixWebhook {
    /// The state machine event this webhook drives.
    pub fn provider_event(&self) -> ProviderEvent {
        match self.status {
            PixChargeStatus::Issued => ProviderEvent::ChargeIssued,
            PixChargeStatus::Paid => ProviderEvent::ChargePaid,
            PixChargeStatus::Expired => ProviderEvent::ChargeExpired,
            PixChargeStatus::Rejected => ProviderEvent::ChargeRejected,
        }
    }

    /// The paid amount as money, when the gateway reported one.
    pub fn paid_amount(&self) -> Option<Money> {
        self.paid_amount_cents
            .map(|cents| Money::new(cents, Currency::Brl))
    }
}

/// Order-fill event from the exchange rail. Confirms the crypto leg and
/// drives the settlement transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeFill {
    /// Exchange delivery ID, used as the idempotency key.
    pub event_key: EventKey,
    /// Exchange order reference, mapped to a conversion.
    pub order_id: String,
    /// Filled amount on the crypto leg.
    pub filled_amount: Money,
    /// Average fill price, in BRL per USDT.
    pub avg_price: Decimal,
    /// When the fill completed.
    pub timestamp: Timestamp,
}

impl ExchangeFill {
    /// The state machine event this fill drives.
    pub fn provider_event(&self) -> ProviderEvent {
        ProviderEvent::SettlementConfirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cambio_common::time;
    use rust_decimal_macros::dec;

    #[test]
    fn test_webhook_event_mapping() {
        let mut webhook = PixWebhook {
            event_key: EventKey::new("wh_1"),
            charge_id: "charge_1".to_string(),
            status: PixChargeStatus::Issued,
            paid_amount_cents: None,
            timestamp: time::now(),
        };

        assert_eq!(webhook.provider_event(), ProviderEvent::ChargeIssued);
        webhook.status = PixChargeStatus::Paid;
        assert_eq!(webhook.provider_event(), ProviderEvent::ChargePaid);
        webhook.status = PixChargeStatus::Expired;
        assert_eq!(webhook.provider_event(), ProviderEvent::ChargeExpired);
        webhook.status = PixChargeStatus::Rejected;
        assert_eq!(webhook.provider_event(), ProviderEvent::ChargeRejected);
    }

    #[test]
    fn test_paid_amount_in_minor_units() {
        let webhook = PixWebhook {
            event_key: EventKey::new("wh_1"),
            charge_id: "charge_1".to_string(),
            status: PixChargeStatus::Paid,
            paid_amount_cents: Some(1_000_00),
            timestamp: time::now(),
        };

        assert_eq!(
            webhook.paid_amount(),
            Some(Money::new(1_000_00, Currency::Brl))
        );
    }

    #[test]
    fn test_webhook_wire_shape() {
        let json = r#"{
            "event_key": "wh_123",
            "charge_id": "charge_42",
            "status": "PAID",
            "paid_amount_cents": 100000,
            "timestamp": "2026-08-01T12:00:00Z"
        }"#;

        let webhook: PixWebhook = serde_json::from_str(json).unwrap();
        assert_eq!(webhook.status, PixChargeStatus::Paid);
        assert_eq!(webhook.event_key.as_str(), "wh_123");
    }

    #[test]
    fn test_fill_drives_settlement() {
        let fill = ExchangeFill {
            event_key: EventKey::new("fill_1"),
            order_id: "order_1".to_string(),
            filled_amount: Money::new(164_686_468, Currency::Usdt),
            avg_price: dec!(6.05),
            timestamp: time::now(),
        };

        assert_eq!(fill.provider_event(), ProviderEvent::SettlementConfirmed);
    }
}
