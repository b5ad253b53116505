//! Order Fulfillment Engine
//!
//! This crate coordinates the complete lifecycle of an energy rental
//! order: payment confirmation, on-chain resource delegation, usage
//! monitoring, daily fee deduction and teardown at expiry.
//!
//! # Architecture
//!
//! - **Lifecycle coordinator**: the single writer of order status; every
//!   transition is validated and audited.
//! - **Delegation orchestrator**: turns paid orders into delegations and
//!   revokes them on settlement, serializing calls per pool address.
//! - **Usage monitor**: one shared polling loop over all active orders
//!   with bounded concurrency and idempotent usage bookkeeping.
//! - **Fee scheduler**: calendar-driven daily charges for package orders
//!   with per-day de-duplication.
//!
//! All services are constructed once at process start with explicit
//! dependencies (storage and chain client trait objects) and run as
//! background tasks with graceful shutdown.

pub mod config;
pub mod delegation;
pub mod error;
pub mod fees;
pub mod lifecycle;
pub mod monitor;

#[cfg(test)]
pub mod testing;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use delegation::{BatchOutcome, DelegationOrchestrator, ExpirySummary};
pub use error::{EngineError, Result};
pub use fees::{FeeOutcome, FeeRunSummary, FeeScheduler, FeeTriggerResult};
pub use lifecycle::{can_transition, LifecycleCoordinator};
pub use monitor::{MonitorStatus, TrackedSet, UsageMonitor};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::delegation::DelegationOrchestrator;
    pub use crate::error::{EngineError, Result};
    pub use crate::fees::FeeScheduler;
    pub use crate::lifecycle::LifecycleCoordinator;
    pub use crate::monitor::UsageMonitor;
}
