//! Cambio Conversion Ledger
//!
//! Double-entry recording of settled conversions, customer balance
//! snapshots with reservation support, and affiliate commission
//! computation — all guarded by the money-conservation invariant.

pub mod balance;
pub mod commission;
pub mod entry;
pub mod ledger;

pub use balance::{BalanceAmounts, BalanceSnapshot};
pub use commission::{AffiliateProfile, CommissionEngine, CommissionEntry, CommissionStatus};
pub use entry::{EntryPair, EntryType, LedgerEntry};
pub use ledger::{ConversionLedger, LedgerApplication};
