//! Cambio Common Types
//!
//! Shared types for the Cambio conversion and settlement pipeline:
//! fixed-point money in integer minor units, identifiers, locked quotes,
//! the conversion lifecycle with its event-driven transition table, and the
//! pipeline error taxonomy.

pub mod conversion;
pub mod error;
pub mod identifiers;
pub mod money;
pub mod quote;
pub mod time;

pub use conversion::*;
pub use error::*;
pub use identifiers::*;
pub use money::*;
pub use quote::*;
pub use time::*;
