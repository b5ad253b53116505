//! Usage monitoring for active orders.
//!
//! One shared scheduler loop evaluates every tracked order per cycle;
//! per-order work runs under a bounded semaphore so thousands of active
//! orders never spawn thousands of blocking loops. Detection is
//! polling-based with idempotent bookkeeping: each usage event is keyed
//! by its on-chain transaction hash, so a re-scan after a crash cannot
//! double-count.

use crate::config::EngineConfig;
use crate::delegation::DelegationOrchestrator;
use crate::error::Result;
use chrono::Utc;
use rental_storage::OrderStore;
use rental_tron::ResourceClient;
use rental_types::{DelegationStatus, EnergyUsageLog, Order, OrderId, OrderStatus, TxId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Per-order monitoring state.
#[derive(Debug, Clone)]
struct Tracked {
    receiver_address: String,
    /// Millisecond timestamp of the newest transaction already scanned
    last_scan_ms: i64,
    delegation_confirmed: bool,
}

/// The set of orders the monitor is watching. Mutations take effect at
/// the next cycle boundary, never mid-cycle.
#[derive(Clone, Default)]
pub struct TrackedSet {
    inner: Arc<RwLock<HashMap<OrderId, Tracked>>>,
}

impl TrackedSet {
    pub async fn add(&self, order: &Order) {
        let start = order
            .activated_at
            .unwrap_or(order.created_at)
            .timestamp_millis();
        let mut inner = self.inner.write().await;
        inner.entry(order.id.clone()).or_insert(Tracked {
            receiver_address: order.receiver_address.clone(),
            last_scan_ms: start,
            delegation_confirmed: false,
        });
    }

    pub async fn remove(&self, id: &OrderId) {
        self.inner.write().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    async fn snapshot(&self) -> Vec<(OrderId, Tracked)> {
        self.inner
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    async fn record_scan(&self, id: &OrderId, last_scan_ms: i64, delegation_confirmed: bool) {
        let mut inner = self.inner.write().await;
        if let Some(tracked) = inner.get_mut(id) {
            tracked.last_scan_ms = tracked.last_scan_ms.max(last_scan_ms);
            tracked.delegation_confirmed |= delegation_confirmed;
        }
    }
}

/// Monitor status report for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub tracked_orders: usize,
}

/// Usage monitor service.
pub struct UsageMonitor {
    config: EngineConfig,
    store: Arc<dyn OrderStore>,
    chain: Arc<dyn ResourceClient>,
    orchestrator: Arc<DelegationOrchestrator>,
    tracked: TrackedSet,
    semaphore: Arc<Semaphore>,
    running: Arc<RwLock<bool>>,
    shutdown: Arc<RwLock<bool>>,
}

impl UsageMonitor {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn OrderStore>,
        chain: Arc<dyn ResourceClient>,
        orchestrator: Arc<DelegationOrchestrator>,
        tracked: TrackedSet,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_ops));
        Self {
            config,
            store,
            chain,
            orchestrator,
            tracked,
            semaphore,
            running: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Track an order; picked up on the next cycle.
    pub async fn add_order(&self, order: &Order) {
        self.tracked.add(order).await;
    }

    /// Stop tracking an order at the next cycle boundary.
    pub async fn remove_order(&self, id: &OrderId) {
        self.tracked.remove(id).await;
    }

    pub async fn get_status(&self) -> MonitorStatus {
        MonitorStatus {
            running: *self.running.read().await,
            tracked_orders: self.tracked.len().await,
        }
    }

    /// Start the monitor in the background.
    pub fn start(self: Arc<Self>) -> JoinHandle<Result<()>> {
        info!(
            "Starting usage monitor (interval: {:?})",
            self.config.monitor_interval
        );

        tokio::spawn(async move {
            *self.running.write().await = true;
            let result = self.run().await;
            *self.running.write().await = false;

            match result {
                Ok(()) => {
                    info!("Usage monitor stopped normally");
                    Ok(())
                }
                Err(e) => {
                    error!("Usage monitor error: {}", e);
                    Err(e)
                }
            }
        })
    }

    async fn run(&self) -> Result<()> {
        // Re-seed the tracked set from storage so a restart resumes
        // watching every active order.
        match self.store.find_active_orders(None).await {
            Ok(orders) => {
                for order in &orders {
                    self.tracked.add(order).await;
                }
                info!("Usage monitor tracking {} active orders", orders.len());
            }
            Err(e) => warn!("Failed to seed tracked orders: {}", e),
        }

        let mut interval = interval(self.config.monitor_interval);

        loop {
            if *self.shutdown.read().await {
                info!("Shutdown signal received, stopping usage monitor");
                return Ok(());
            }

            interval.tick().await;

            self.run_cycle().await;
        }
    }

    /// One evaluation pass over the tracked set. Per-order errors are
    /// logged and skipped; one bad order never stops the loop.
    async fn run_cycle(&self) {
        let snapshot = self.tracked.snapshot().await;
        if snapshot.is_empty() {
            debug!("No tracked orders, skipping usage cycle");
            return;
        }

        let evaluations: Vec<_> = snapshot
            .into_iter()
            .map(|(order_id, _)| {
                let semaphore = Arc::clone(&self.semaphore);
                async move {
                    let _permit = match semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };
                    if let Err(e) = self.evaluate_order(&order_id).await {
                        warn!("Usage evaluation for {} failed: {}", order_id, e);
                    }
                }
            })
            .collect();

        futures::future::join_all(evaluations).await;
    }

    /// Evaluate a single tracked order: scan for new consumption, update
    /// bookkeeping and decide whether to re-delegate or settle.
    pub async fn evaluate_order(&self, id: &OrderId) -> Result<()> {
        let tracked = {
            let inner = self.tracked.inner.read().await;
            match inner.get(id) {
                Some(t) => t.clone(),
                None => return Ok(()),
            }
        };

        let order = match self.store.get_order(id).await {
            Ok(order) => order,
            Err(rental_types::Error::OrderNotFound(_)) => {
                self.tracked.remove(id).await;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if order.status != OrderStatus::Active {
            // Terminal or regressed orders fall out of the tracked set
            self.tracked.remove(id).await;
            return Ok(());
        }

        // First successful observation of delegated resources confirms
        // the pending delegation record.
        let mut delegation_confirmed = tracked.delegation_confirmed;
        if !delegation_confirmed {
            if let Some(delegation_id) = &order.delegation_id {
                let resources = self
                    .chain
                    .get_account_resource(&order.receiver_address)
                    .await?;
                if resources.energy_limit > 0 || resources.net_limit > 0 {
                    self.store
                        .update_delegation_status(delegation_id, DelegationStatus::Confirmed)
                        .await?;
                    delegation_confirmed = true;
                }
            }
        }

        let transactions = self
            .chain
            .account_transactions(
                &order.receiver_address,
                tracked.last_scan_ms + 1,
                self.config.usage_scan_limit,
            )
            .await?;

        let mut last_seen_ms = tracked.last_scan_ms;
        let mut consumed_events = 0u32;

        for tx in &transactions {
            last_seen_ms = last_seen_ms.max(tx.timestamp_ms);

            if tx.energy_usage < self.config.usage_threshold {
                continue;
            }

            let appended = self
                .store
                .append_usage_log(&EnergyUsageLog {
                    order_id: id.clone(),
                    address: order.receiver_address.clone(),
                    amount: tx.energy_usage,
                    tx_hash: TxId::from(tx.tx_id.as_str()),
                    observed_at: Utc::now(),
                })
                .await?;

            if !appended {
                // Already counted in a previous scan
                continue;
            }
            consumed_events += 1;

            if order.is_package() {
                match self.store.increment_used_count(id).await {
                    Ok(used) => {
                        debug!("Order {} used {}/{}", id, used, order.transaction_count)
                    }
                    Err(rental_types::Error::QuotaExhausted(_)) => break,
                    Err(e) => return Err(e.into()),
                }
            }
        }

        self.tracked
            .record_scan(id, last_seen_ms, delegation_confirmed)
            .await;

        self.decide(&order, consumed_events).await
    }

    /// Post-scan decision: settle exhausted or lock-elapsed orders,
    /// re-delegate depleted package orders with quota left.
    async fn decide(&self, order: &Order, consumed_events: u32) -> Result<()> {
        let id = &order.id;
        let refreshed = self.store.get_order(id).await?;
        let now = Utc::now();

        if refreshed.is_package() && refreshed.remaining_quota() == 0 {
            info!("Order {} quota exhausted, settling", id);
            self.orchestrator
                .settle_order(id, OrderStatus::Completed, "usage-monitor", "quota exhausted")
                .await?;
            return Ok(());
        }

        if refreshed.lock_period_elapsed(now) {
            let used = self.store.last_usage_at(id).await?.is_some();
            let (target, why) = if used || !refreshed.is_package() {
                (OrderStatus::Completed, "lock period elapsed")
            } else {
                (OrderStatus::Expired, "lock period elapsed without usage")
            };
            info!("Order {} lock period elapsed, settling as {}", id, target);
            self.orchestrator
                .settle_order(id, target, "usage-monitor", why)
                .await?;
            return Ok(());
        }

        // Top up package orders whose delegated energy was consumed while
        // quota remains.
        if consumed_events > 0 && refreshed.is_package() && refreshed.remaining_quota() > 0 {
            let resources = self
                .chain
                .get_account_resource(&refreshed.receiver_address)
                .await?;
            if resources.energy_available() < self.config.usage_threshold {
                info!("Order {} energy depleted, re-delegating", id);
                if let Err(e) = self.orchestrator.delegate_order(id).await {
                    warn!("Re-delegation for {} failed: {}", id, e);
                }
            }
        }

        Ok(())
    }

    /// Initiate graceful shutdown; the in-flight cycle finishes first.
    pub async fn shutdown(&self) {
        info!("Initiating usage monitor shutdown");
        *self.shutdown.write().await = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{engine_fixture, sample_order, RECEIVER};
    use chrono::Duration as ChronoDuration;
    use rental_tron::AccountTransaction;
    use rental_types::OrderType;

    // Offsets keep fake transactions ahead of the scan cursor, which
    // starts at the order's activation time.
    fn usage_tx(id: &str, energy: i64, offset_ms: i64) -> AccountTransaction {
        AccountTransaction {
            tx_id: id.to_string(),
            energy_usage: energy,
            net_usage: 0,
            timestamp_ms: Utc::now().timestamp_millis() + 1_000 + offset_ms,
        }
    }

    #[tokio::test]
    async fn test_rescan_never_duplicates_usage_logs() {
        let fx = engine_fixture().await;
        let mut order = sample_order(OrderType::TransactionPackage, OrderStatus::Active);
        order.transaction_count = 10;
        order.activated_at = Some(Utc::now());
        fx.store.insert(order.clone()).await;
        fx.monitor.add_order(&order).await;

        fx.chain
            .set_transactions(RECEIVER, vec![usage_tx("txhash-1", 65_000, 1)])
            .await;

        fx.monitor.evaluate_order(&order.id).await.unwrap();
        // Reset the scan cursor to force a re-scan of the same window
        fx.monitor
            .tracked
            .inner
            .write()
            .await
            .get_mut(&order.id)
            .unwrap()
            .last_scan_ms = 0;
        fx.monitor.evaluate_order(&order.id).await.unwrap();

        assert_eq!(fx.store.usage_log_count().await, 1);
        assert_eq!(fx.store.get(&order.id).await.used_count, 1);
    }

    #[tokio::test]
    async fn test_used_count_never_exceeds_quota() {
        let fx = engine_fixture().await;
        let mut order = sample_order(OrderType::TransactionPackage, OrderStatus::Active);
        order.transaction_count = 2;
        order.activated_at = Some(Utc::now());
        order.delegation_id = Some("d-1".to_string());
        fx.store.insert(order.clone()).await;
        fx.monitor.add_order(&order).await;

        fx.chain
            .set_transactions(
                RECEIVER,
                vec![
                    usage_tx("txhash-a", 30_000, 1),
                    usage_tx("txhash-b", 30_000, 2),
                    usage_tx("txhash-c", 30_000, 3),
                    usage_tx("txhash-d", 30_000, 4),
                ],
            )
            .await;

        fx.monitor.evaluate_order(&order.id).await.unwrap();

        let stored = fx.store.get(&order.id).await;
        assert_eq!(stored.used_count, 2);
        assert!(stored.used_count <= stored.transaction_count);
        // Quota exhausted: settled and undelegated
        assert_eq!(stored.status, OrderStatus::Completed);
        assert_eq!(fx.chain.undelegate_calls().await, 1);
    }

    #[tokio::test]
    async fn test_flash_order_completes_after_lock_period() {
        let fx = engine_fixture().await;
        let mut order = sample_order(OrderType::EnergyFlash, OrderStatus::Active);
        order.resource_amount = 65_000;
        order.lock_period_days = 3;
        order.activated_at = Some(Utc::now() - ChronoDuration::days(4));
        order.delegation_id = Some("d-flash".to_string());
        fx.store.insert(order.clone()).await;
        fx.monitor.add_order(&order).await;

        fx.monitor.evaluate_order(&order.id).await.unwrap();

        let stored = fx.store.get(&order.id).await;
        assert_eq!(stored.status, OrderStatus::Completed);
        assert_eq!(fx.chain.undelegate_calls().await, 1);
        // Detached from the tracked set on settlement
        assert_eq!(fx.monitor.tracked.len().await, 0);
    }

    #[tokio::test]
    async fn test_terminal_order_falls_out_of_tracking() {
        let fx = engine_fixture().await;
        let order = sample_order(OrderType::EnergyFlash, OrderStatus::Cancelled);
        fx.store.insert(order.clone()).await;
        fx.monitor.tracked.add(&order).await;

        fx.monitor.evaluate_order(&order.id).await.unwrap();
        assert!(fx.monitor.tracked.is_empty().await);
    }
}
