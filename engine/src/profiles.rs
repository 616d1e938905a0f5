//! In-process registry of customer and affiliate profiles.
//!
//! Profiles are configuration, not pipeline state, so they do not go
//! through the durable store.

use std::collections::HashMap;

use cambio_common::{AffiliateId, CambioError, CustomerId, Result};
use cambio_fx::CustomerProfile;
use cambio_ledger::AffiliateProfile;
use parking_lot::RwLock;
use rust_decimal::Decimal;

/// Registry of pricing and commission profiles.
#[derive(Default)]
pub struct ProfileRegistry {
    customers: RwLock<HashMap<CustomerId, CustomerProfile>>,
    affiliates: RwLock<HashMap<AffiliateId, AffiliateProfile>>,
}

impl ProfileRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a customer profile.
    pub fn register_customer(&self, profile: CustomerProfile) -> Result<()> {
        if let Some(spread) = profile.spread_percent {
            if spread < Decimal::ZERO {
                return Err(CambioError::Configuration(format!(
                    "negative spread override {} for customer {}",
                    spread, profile.customer_id
                )));
            }
        }
        self.customers
            .write()
            .insert(profile.customer_id.clone(), profile);
        Ok(())
    }

    /// Register or replace an affiliate profile.
    pub fn register_affiliate(&self, profile: AffiliateProfile) -> Result<()> {
        if profile.commission_percent < Decimal::ZERO {
            return Err(CambioError::Configuration(format!(
                "negative commission rate {} for affiliate {}",
                profile.commission_percent, profile.affiliate_id
            )));
        }
        self.affiliates
            .write()
            .insert(profile.affiliate_id.clone(), profile);
        Ok(())
    }

    /// Look up a customer profile.
    pub fn customer(&self, customer_id: &CustomerId) -> Option<CustomerProfile> {
        self.customers.read().get(customer_id).cloned()
    }

    /// Look up an affiliate profile.
    pub fn affiliate(&self, affiliate_id: &AffiliateId) -> Option<AffiliateProfile> {
        self.affiliates.read().get(affiliate_id).cloned()
    }

    /// Number of registered customers.
    pub fn customer_count(&self) -> usize {
        self.customers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_register_and_lookup() {
        let registry = ProfileRegistry::new();
        let customer_id = CustomerId::new("cus_1");

        registry
            .register_customer(CustomerProfile::new(customer_id.clone()).with_spread(dec!(0.5)))
            .unwrap();
        registry
            .register_affiliate(AffiliateProfile::new(AffiliateId::new("aff_1"), dec!(0.5)))
            .unwrap();

        assert_eq!(
            registry.customer(&customer_id).unwrap().spread_percent,
            Some(dec!(0.5))
        );
        assert!(registry.affiliate(&AffiliateId::new("aff_1")).is_some());
        assert!(registry.customer(&CustomerId::new("nobody")).is_none());
    }

    #[test]
    fn test_negative_rates_rejected() {
        let registry = ProfileRegistry::new();

        assert!(registry
            .register_customer(
                CustomerProfile::new(CustomerId::new("cus_1")).with_spread(dec!(-1))
            )
            .is_err());
        assert!(registry
            .register_affiliate(AffiliateProfile::new(AffiliateId::new("aff_1"), dec!(-1)))
            .is_err());
    }
}
