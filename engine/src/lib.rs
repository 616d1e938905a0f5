//! Cambio Conversion Engine
//!
//! The conversion and settlement pipeline: the payment state machine with
//! exactly-once event application, the durable store abstraction, and the
//! `ConversionService` facade the platform's API layer consumes.
//!
//! Concurrency model: transitions for one conversion are serialized by a
//! per-conversion async mutex; balance mutation additionally holds a
//! per-customer mutex. Events for different conversions proceed fully in
//! parallel — there is no global lock.

pub mod config;
pub mod events;
pub mod idempotency;
pub mod metrics;
pub mod profiles;
pub mod service;
pub mod state_machine;
pub mod store;

pub use config::EngineConfig;
pub use events::{ExchangeFill, PixChargeStatus, PixWebhook};
pub use idempotency::EventIdempotencyStore;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use profiles::ProfileRegistry;
pub use service::ConversionService;
pub use state_machine::PaymentStateMachine;
pub use store::{CommissionFilter, ConversionStore, MemoryStore, PgStore};
