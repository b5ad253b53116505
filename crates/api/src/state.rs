//! Shared application state for the API server

use rental_engine::{DelegationOrchestrator, FeeScheduler, LifecycleCoordinator, UsageMonitor};
use rental_storage::OrderStore;
use rental_tron::ResourceClient;
use std::sync::Arc;

/// Shared application state passed to all handlers
#[derive(Clone)]
pub struct AppState {
    /// Persistence gateway for orders and records
    pub store: Arc<dyn OrderStore>,
    /// TRON client for account and resource queries
    pub chain: Arc<dyn ResourceClient>,
    /// Single writer of order status
    pub lifecycle: Arc<LifecycleCoordinator>,
    /// Delegation workflow and settlement
    pub orchestrator: Arc<DelegationOrchestrator>,
    /// Usage monitoring loop
    pub monitor: Arc<UsageMonitor>,
    /// Daily fee job
    pub fees: Arc<FeeScheduler>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn OrderStore>,
        chain: Arc<dyn ResourceClient>,
        lifecycle: Arc<LifecycleCoordinator>,
        orchestrator: Arc<DelegationOrchestrator>,
        monitor: Arc<UsageMonitor>,
        fees: Arc<FeeScheduler>,
    ) -> Self {
        Self {
            store,
            chain,
            lifecycle,
            orchestrator,
            monitor,
            fees,
        }
    }
}
