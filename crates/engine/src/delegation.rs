//! Resource delegation orchestration.
//!
//! Converts a paid order into a confirmed on-chain delegation and tears
//! delegations down when orders complete or expire. Delegation calls
//! against the same pool owner address are serialized through an advisory
//! lock; the available delegable balance is checked before committing so
//! orders cannot race for the same funds. Transport failures are retried
//! with bounded exponential backoff; chain rejections are permanent and
//! fail the order with the reason recorded.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::lifecycle::LifecycleCoordinator;
use chrono::{Duration as ChronoDuration, Utc};
use rental_storage::OrderStore;
use rental_tron::{ResourceClient, TxResult};
use rental_types::{
    DelegateRecord, DelegationStatus, Order, OrderId, OrderStatus, OrderType, ResourceType,
    StakeRecord, StatusExtra, TxId, UnfreezeRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Advisory locks keyed by address or order id.
///
/// One delegation in flight per pool owner address at a time; concurrent
/// calls against the same source address risk conflicting resource
/// accounting on-chain.
#[derive(Default)]
pub(crate) struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Per-order outcome of a batch delegation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub order_id: OrderId,
    pub success: bool,
    pub delegation_id: Option<String>,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

/// Summary of an expiry sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpirySummary {
    pub completed: usize,
    pub expired: usize,
    pub failed: usize,
}

/// Chain write operations routed through the retry loop.
enum ChainOp<'a> {
    Delegate {
        receiver: &'a str,
        amount: i64,
        resource: ResourceType,
        lock_period_days: i64,
    },
    Undelegate {
        receiver: &'a str,
        amount: i64,
        resource: ResourceType,
    },
    Freeze {
        amount: i64,
        resource: ResourceType,
    },
    Unfreeze {
        amount: i64,
        resource: ResourceType,
    },
    WithdrawExpiredUnfreeze,
}

/// Delegation orchestrator.
///
/// Runs as a background task polling paid orders, and serves direct
/// triggers (payment confirmation, admin commands) through an mpsc
/// channel and public methods.
pub struct DelegationOrchestrator {
    config: EngineConfig,
    store: Arc<dyn OrderStore>,
    chain: Arc<dyn ResourceClient>,
    lifecycle: Arc<LifecycleCoordinator>,
    /// Pool address owning the delegable stake
    owner_address: String,
    owner_locks: KeyedLocks,
    trigger_rx: Mutex<Option<mpsc::Receiver<OrderId>>>,
    shutdown: Arc<RwLock<bool>>,
}

impl DelegationOrchestrator {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn OrderStore>,
        chain: Arc<dyn ResourceClient>,
        lifecycle: Arc<LifecycleCoordinator>,
        owner_address: String,
        trigger_rx: mpsc::Receiver<OrderId>,
    ) -> Self {
        Self {
            config,
            store,
            chain,
            lifecycle,
            owner_address,
            owner_locks: KeyedLocks::default(),
            trigger_rx: Mutex::new(Some(trigger_rx)),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the orchestrator in the background.
    pub fn start(self: Arc<Self>) -> JoinHandle<Result<()>> {
        info!("Starting delegation orchestrator");

        tokio::spawn(async move {
            match self.run().await {
                Ok(()) => {
                    info!("Delegation orchestrator stopped normally");
                    Ok(())
                }
                Err(e) => {
                    error!("Delegation orchestrator error: {}", e);
                    Err(e)
                }
            }
        })
    }

    /// Main loop: poll paid orders on an interval and drain the trigger
    /// channel for immediate processing.
    async fn run(&self) -> Result<()> {
        let mut trigger_rx = self
            .trigger_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| EngineError::Internal("orchestrator already started".to_string()))?;

        let mut interval = interval(self.config.poll_interval);

        loop {
            if *self.shutdown.read().await {
                info!("Delegation orchestrator shutting down gracefully");
                return Ok(());
            }

            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.process_paid_orders().await {
                        error!("Error processing paid orders: {}", e);
                    }
                }
                triggered = trigger_rx.recv() => {
                    match triggered {
                        Some(order_id) => {
                            if let Err(e) = self.delegate_order(&order_id).await {
                                warn!("Triggered delegation for {} failed: {}", order_id, e);
                            }
                        }
                        None => {
                            info!("Delegation trigger channel closed, stopping");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Pick up paid orders the trigger channel may have missed (restart,
    /// channel overflow). One bad order never aborts the sweep.
    async fn process_paid_orders(&self) -> Result<()> {
        let mut orders = self.store.find_orders_in_status(OrderStatus::Paid).await?;
        orders.extend(
            self.store
                .find_orders_in_status(OrderStatus::Processing)
                .await?,
        );

        for order in orders {
            debug!("Polling pass delegating order {}", order.id);
            if let Err(e) = self.delegate_order(&order.id).await {
                if e.is_conflict() {
                    debug!("Order {} skipped: {}", order.id, e);
                } else {
                    warn!("Delegation for order {} failed: {}", order.id, e);
                }
            }
        }

        Ok(())
    }

    /// Delegate resources for one order.
    ///
    /// Accepts orders in `paid`/`processing`/`pending_delegation` (first
    /// delegation) or `active` (renewal top-up). On success the delegation
    /// record is persisted and the order carries the delegation id and tx
    /// hash.
    pub async fn delegate_order(&self, id: &OrderId) -> Result<DelegateRecord> {
        let order = self.store.get_order(id).await?;

        match order.status {
            OrderStatus::Paid
            | OrderStatus::Processing
            | OrderStatus::PendingDelegation
            | OrderStatus::Active => {}
            other => {
                return Err(EngineError::InvalidState(
                    id.clone(),
                    format!("cannot delegate from status {}", other),
                ));
            }
        }

        // Pure format check before any RPC round-trip
        if !self.chain.is_valid_address(&order.receiver_address) {
            let reason = format!("invalid receiver address {}", order.receiver_address);
            if let Err(e) = self.lifecycle.fail(id, "orchestrator", &reason).await {
                warn!("Failed to mark order {} failed: {}", id, e);
            }
            return Err(rental_types::Error::InvalidAddress(order.receiver_address).into());
        }

        // A receiver double-submitting a flash payment gets a typed
        // conflict instead of a second delegation.
        if order.order_type == OrderType::EnergyFlash {
            if let Some(existing) = self
                .store
                .find_active_flash_order(&order.receiver_address, id)
                .await?
            {
                info!(
                    "Duplicate flash-rent order {} for receiver {} (existing {})",
                    id, order.receiver_address, existing
                );
                return Err(
                    rental_types::Error::DuplicateFlashRent(order.receiver_address).into(),
                );
            }
        }

        let _guard = self.owner_locks.acquire(&self.owner_address).await;

        let available = self
            .chain
            .delegable_balance(&self.owner_address, order.resource_type)
            .await?;
        if available < order.resource_amount {
            warn!(
                "Insufficient delegable balance for order {}: required {}, available {}",
                id, order.resource_amount, available
            );
            return Err(rental_types::Error::InsufficientBalance {
                required: order.resource_amount,
                available,
            }
            .into());
        }

        if order.status == OrderStatus::Paid {
            self.lifecycle
                .update_status(
                    id,
                    OrderStatus::Processing,
                    StatusExtra::default(),
                    "orchestrator",
                    "delegation started",
                )
                .await?;
        }

        let renewing = order.status == OrderStatus::Active;
        if !renewing {
            let current = self.store.get_order(id).await?;
            if current.status == OrderStatus::Processing {
                self.lifecycle
                    .update_status(
                        id,
                        OrderStatus::PendingDelegation,
                        StatusExtra::default(),
                        "orchestrator",
                        "delegation in flight",
                    )
                    .await?;
            }
        }

        let result = match self
            .submit_with_retry(
                ChainOp::Delegate {
                    receiver: &order.receiver_address,
                    amount: order.resource_amount,
                    resource: order.resource_type,
                    lock_period_days: order.lock_period_days,
                },
                "delegate",
            )
            .await
        {
            Ok(result) => result,
            Err(e) => {
                // Transport failure after bounded retries
                let reason = format!("processing_failed: {}", e);
                if let Err(fail_err) = self.lifecycle.fail(id, "orchestrator", &reason).await {
                    warn!("Failed to mark order {} failed: {}", id, fail_err);
                }
                return Err(e);
            }
        };

        if !result.success {
            let reason = result
                .error
                .unwrap_or_else(|| "chain rejected delegation".to_string());
            let record = self.build_record(&order, DelegationStatus::Failed, TxId::from(""));
            if let Err(e) = self.store.record_delegation(&record).await {
                warn!("Failed to persist rejected delegation for {}: {}", id, e);
            }
            if let Err(e) = self.lifecycle.fail(id, "orchestrator", &reason).await {
                warn!("Failed to mark order {} failed: {}", id, e);
            }
            return Err(rental_types::Error::ChainRejected(reason).into());
        }

        let txid = result.txid.ok_or_else(|| {
            EngineError::Internal("delegation succeeded without a transaction id".to_string())
        })?;

        let record = self.build_record(&order, DelegationStatus::Pending, TxId(txid));
        self.store.record_delegation(&record).await?;

        if !renewing {
            self.lifecycle
                .update_status(
                    id,
                    OrderStatus::Active,
                    StatusExtra {
                        delegation_id: Some(record.id.clone()),
                        ..Default::default()
                    },
                    "orchestrator",
                    "delegation broadcast",
                )
                .await?;
        }

        info!(
            "Delegated {} {} to {} for order {} (tx {})",
            record.amount, record.resource_type, record.receiver_address, id, record.tx_hash
        );

        Ok(record)
    }

    fn build_record(
        &self,
        order: &Order,
        status: DelegationStatus,
        tx_hash: TxId,
    ) -> DelegateRecord {
        DelegateRecord {
            id: Uuid::new_v4().to_string(),
            tx_hash,
            owner_address: self.owner_address.clone(),
            receiver_address: order.receiver_address.clone(),
            resource_type: order.resource_type,
            amount: order.resource_amount,
            lock: true,
            lock_period_days: order.lock_period_days,
            status,
            order_id: order.id.clone(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Delegate a bounded list of orders sequentially, collecting per-id
    /// outcomes. A single bad order does not abort the batch.
    pub async fn delegate_batch(&self, ids: &[OrderId]) -> Result<Vec<BatchOutcome>> {
        if ids.is_empty() || ids.len() > self.config.batch_max {
            return Err(EngineError::InvalidBatch(format!(
                "batch size must be 1..={}, got {}",
                self.config.batch_max,
                ids.len()
            )));
        }

        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            match self.delegate_order(id).await {
                Ok(record) => outcomes.push(BatchOutcome {
                    order_id: id.clone(),
                    success: true,
                    delegation_id: Some(record.id),
                    tx_hash: Some(record.tx_hash.0),
                    error: None,
                }),
                Err(e) => {
                    warn!("Batch delegation for {} failed: {}", id, e);
                    outcomes.push(BatchOutcome {
                        order_id: id.clone(),
                        success: false,
                        delegation_id: None,
                        tx_hash: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(outcomes)
    }

    /// Undelegate-and-settle step for completion, expiry and manual
    /// completion. The delegation is revoked first; the status transition
    /// only happens once the chain accepted the undelegation.
    pub async fn settle_order(
        &self,
        id: &OrderId,
        to: OrderStatus,
        actor: &str,
        reason: &str,
    ) -> Result<Order> {
        if !matches!(
            to,
            OrderStatus::Completed | OrderStatus::Expired | OrderStatus::ManuallyCompleted
        ) {
            return Err(EngineError::Internal(format!(
                "settle cannot target status {}",
                to
            )));
        }

        let order = self.store.get_order(id).await?;
        if order.status == to {
            return Ok(order);
        }

        if order.delegation_id.is_some() {
            let _guard = self.owner_locks.acquire(&self.owner_address).await;

            let result = self
                .submit_with_retry(
                    ChainOp::Undelegate {
                        receiver: &order.receiver_address,
                        amount: order.resource_amount,
                        resource: order.resource_type,
                    },
                    "undelegate",
                )
                .await?;

            if !result.success {
                // Lock period not elapsed or already undelegated upstream
                let reason = result
                    .error
                    .unwrap_or_else(|| "chain rejected undelegation".to_string());
                return Err(rental_types::Error::ChainRejected(reason).into());
            }

            if let Some(delegation_id) = &order.delegation_id {
                self.store
                    .update_delegation_status(delegation_id, DelegationStatus::Confirmed)
                    .await?;
            }
        }

        self.lifecycle
            .update_status(id, to, StatusExtra::default(), actor, reason)
            .await
    }

    /// Sweep active orders whose lock period has elapsed. Exhausted (or
    /// flash) orders complete; package orders with unused quota expire.
    pub async fn process_expired(&self) -> Result<ExpirySummary> {
        let now = Utc::now();
        let orders = self.store.find_active_orders(None).await?;
        let mut summary = ExpirySummary::default();

        for order in orders {
            if !order.lock_period_elapsed(now) {
                continue;
            }

            let unused_quota = order.is_package() && order.remaining_quota() > 0;
            let (target, why) = if unused_quota {
                (OrderStatus::Expired, "lock period elapsed with unused quota")
            } else {
                (OrderStatus::Completed, "lock period elapsed")
            };

            match self.settle_order(&order.id, target, "expiry-sweep", why).await {
                Ok(_) if target == OrderStatus::Expired => summary.expired += 1,
                Ok(_) => summary.completed += 1,
                Err(e) => {
                    warn!("Expiry settlement for {} failed: {}", order.id, e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Freeze pool funds to generate delegable resources.
    pub async fn freeze_stake(&self, amount: i64, resource: ResourceType) -> Result<StakeRecord> {
        if amount <= 0 {
            return Err(EngineError::Validation(
                "stake amount must be positive".to_string(),
            ));
        }

        let _guard = self.owner_locks.acquire(&self.owner_address).await;

        let result = self
            .submit_with_retry(ChainOp::Freeze { amount, resource }, "freeze")
            .await?;
        if !result.success {
            let reason = result
                .error
                .unwrap_or_else(|| "chain rejected freeze".to_string());
            return Err(rental_types::Error::ChainRejected(reason).into());
        }

        let record = StakeRecord {
            id: Uuid::new_v4().to_string(),
            tx_hash: TxId(result.txid.unwrap_or_default()),
            owner_address: self.owner_address.clone(),
            resource_type: resource,
            amount,
            created_at: Utc::now(),
        };
        self.store.record_stake(&record).await?;

        info!("Froze {} SUN for {}", amount, resource);
        Ok(record)
    }

    /// Begin unstaking pool funds; they become withdrawable after the
    /// network waiting period.
    pub async fn unfreeze_stake(
        &self,
        amount: i64,
        resource: ResourceType,
    ) -> Result<UnfreezeRecord> {
        if amount <= 0 {
            return Err(EngineError::Validation(
                "unfreeze amount must be positive".to_string(),
            ));
        }

        let _guard = self.owner_locks.acquire(&self.owner_address).await;

        let result = self
            .submit_with_retry(ChainOp::Unfreeze { amount, resource }, "unfreeze")
            .await?;
        if !result.success {
            let reason = result
                .error
                .unwrap_or_else(|| "chain rejected unfreeze".to_string());
            return Err(rental_types::Error::ChainRejected(reason).into());
        }

        let now = Utc::now();
        let record = UnfreezeRecord {
            id: Uuid::new_v4().to_string(),
            tx_hash: TxId(result.txid.unwrap_or_default()),
            owner_address: self.owner_address.clone(),
            resource_type: resource,
            amount,
            withdrawable_at: now + ChronoDuration::days(self.config.unfreeze_wait_days),
            withdrawn: false,
            created_at: now,
        };
        self.store.record_unfreeze(&record).await?;

        info!(
            "Unfroze {} SUN for {}, withdrawable at {}",
            amount, resource, record.withdrawable_at
        );
        Ok(record)
    }

    /// Withdraw matured unfreeze records for the pool owner. Returns the
    /// number of records settled.
    pub async fn withdraw_expired_unfreezes(&self) -> Result<u64> {
        let now = Utc::now();
        let pending = self
            .store
            .find_withdrawable_unfreezes(&self.owner_address, now)
            .await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let _guard = self.owner_locks.acquire(&self.owner_address).await;

        let result = self
            .submit_with_retry(ChainOp::WithdrawExpiredUnfreeze, "withdraw")
            .await?;
        if !result.success {
            let reason = result
                .error
                .unwrap_or_else(|| "chain rejected withdrawal".to_string());
            return Err(rental_types::Error::ChainRejected(reason).into());
        }

        let settled = self
            .store
            .mark_unfreezes_withdrawn(&self.owner_address, now)
            .await?;
        info!("Withdrew {} matured unfreeze records", settled);
        Ok(settled)
    }

    /// Submit a chain write, retrying transport failures with exponential
    /// backoff up to the configured attempt bound.
    async fn submit_with_retry(&self, op: ChainOp<'_>, label: &str) -> Result<TxResult> {
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let outcome = match &op {
                ChainOp::Delegate {
                    receiver,
                    amount,
                    resource,
                    lock_period_days,
                } => {
                    self.chain
                        .delegate(
                            &self.owner_address,
                            receiver,
                            *amount,
                            *resource,
                            true,
                            *lock_period_days,
                        )
                        .await
                }
                ChainOp::Undelegate {
                    receiver,
                    amount,
                    resource,
                } => {
                    self.chain
                        .undelegate(&self.owner_address, receiver, *amount, *resource)
                        .await
                }
                ChainOp::Freeze { amount, resource } => {
                    self.chain
                        .freeze(&self.owner_address, *amount, *resource)
                        .await
                }
                ChainOp::Unfreeze { amount, resource } => {
                    self.chain
                        .unfreeze(&self.owner_address, *amount, *resource)
                        .await
                }
                ChainOp::WithdrawExpiredUnfreeze => {
                    self.chain
                        .withdraw_expired_unfreeze(&self.owner_address)
                        .await
                }
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    warn!(
                        "{} attempt {}/{} failed ({}), retrying in {:?}",
                        label, attempt, self.config.max_retries, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Initiate graceful shutdown; in-flight calls finish first.
    pub async fn shutdown(&self) {
        info!("Initiating delegation orchestrator shutdown");
        *self.shutdown.write().await = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{engine_fixture, sample_order};
    use rental_tron::TronError;

    #[tokio::test]
    async fn test_paid_order_ends_active_with_delegation_record() {
        let fx = engine_fixture().await;
        let order = sample_order(OrderType::EnergyFlash, OrderStatus::Processing);
        fx.store.insert(order.clone()).await;

        let record = fx.orchestrator.delegate_order(&order.id).await.unwrap();

        let stored = fx.store.get(&order.id).await;
        assert_eq!(stored.status, OrderStatus::Active);
        assert_eq!(stored.delegation_id, Some(record.id.clone()));
        assert!(stored.activated_at.is_some());
        assert_eq!(record.amount, 65_000);
        assert_eq!(fx.store.delegation_count().await, 1);
        // Activation registers the order with the usage monitor
        assert_eq!(fx.tracked.len().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_flash_rent_yields_typed_conflict() {
        let fx = engine_fixture().await;
        let first = sample_order(OrderType::EnergyFlash, OrderStatus::Processing);
        let second = sample_order(OrderType::EnergyFlash, OrderStatus::Processing);
        fx.store.insert(first.clone()).await;
        fx.store.insert(second.clone()).await;

        fx.orchestrator.delegate_order(&first.id).await.unwrap();

        let result = fx.orchestrator.delegate_order(&second.id).await;
        match result {
            Err(e) => {
                assert!(e.is_conflict());
                assert!(matches!(
                    e,
                    EngineError::Domain(rental_types::Error::DuplicateFlashRent(_))
                ));
            }
            Ok(_) => panic!("expected duplicate conflict"),
        }

        // Exactly one delegation went to chain
        assert_eq!(fx.chain.delegate_calls().await, 1);
        assert_eq!(fx.store.delegation_count().await, 1);
    }

    #[tokio::test]
    async fn test_transport_timeouts_are_retried_to_success() {
        let fx = engine_fixture().await;
        let order = sample_order(OrderType::EnergyFlash, OrderStatus::Processing);
        fx.store.insert(order.clone()).await;

        fx.chain
            .script_delegate(vec![
                Err(TronError::Timeout("read timed out".to_string())),
                Err(TronError::Timeout("read timed out".to_string())),
                Ok(TxResult::ok("faketx-retry".to_string())),
            ])
            .await;

        let record = fx.orchestrator.delegate_order(&order.id).await.unwrap();
        assert_eq!(record.tx_hash.0, "faketx-retry");
        assert_eq!(fx.chain.delegate_calls().await, 3);
        assert_eq!(fx.store.get(&order.id).await.status, OrderStatus::Active);
    }

    #[tokio::test]
    async fn test_exhausted_transport_retries_fail_the_order() {
        let fx = engine_fixture().await;
        let order = sample_order(OrderType::EnergyFlash, OrderStatus::Processing);
        fx.store.insert(order.clone()).await;

        fx.chain
            .script_delegate(vec![
                Err(TronError::Timeout("t1".to_string())),
                Err(TronError::Timeout("t2".to_string())),
                Err(TronError::Timeout("t3".to_string())),
            ])
            .await;

        let result = fx.orchestrator.delegate_order(&order.id).await;
        assert!(matches!(result, Err(EngineError::Chain(_))));
        assert_eq!(fx.store.get(&order.id).await.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_chain_rejection_is_permanent() {
        let fx = engine_fixture().await;
        let order = sample_order(OrderType::EnergyFlash, OrderStatus::Processing);
        fx.store.insert(order.clone()).await;

        fx.chain
            .script_delegate(vec![Ok(TxResult::rejected(
                "CONTRACT_VALIDATE_ERROR: delegateBalance must be greater than 0".to_string(),
            ))])
            .await;

        let result = fx.orchestrator.delegate_order(&order.id).await;
        assert!(matches!(
            result,
            Err(EngineError::Domain(rental_types::Error::ChainRejected(_)))
        ));
        // No retry on permanent rejection
        assert_eq!(fx.chain.delegate_calls().await, 1);
        assert_eq!(fx.store.get(&order.id).await.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_insufficient_balance_fails_fast_without_failing_order() {
        let fx = engine_fixture().await;
        let order = sample_order(OrderType::EnergyFlash, OrderStatus::Processing);
        fx.store.insert(order.clone()).await;
        fx.chain.set_delegable(1_000).await;

        let result = fx.orchestrator.delegate_order(&order.id).await;
        assert!(matches!(
            result,
            Err(EngineError::Domain(
                rental_types::Error::InsufficientBalance { .. }
            ))
        ));
        assert_eq!(fx.chain.delegate_calls().await, 0);
        // Retryable condition: the order stays queued, not failed
        assert_eq!(
            fx.store.get(&order.id).await.status,
            OrderStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_invalid_receiver_address_fails_permanently() {
        let fx = engine_fixture().await;
        let mut order = sample_order(OrderType::EnergyFlash, OrderStatus::Processing);
        order.receiver_address = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e".to_string();
        fx.store.insert(order.clone()).await;

        let result = fx.orchestrator.delegate_order(&order.id).await;
        assert!(matches!(
            result,
            Err(EngineError::Domain(rental_types::Error::InvalidAddress(_)))
        ));
        assert_eq!(fx.chain.delegate_calls().await, 0);
        assert_eq!(fx.store.get(&order.id).await.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_batch_collects_per_order_outcomes() {
        let fx = engine_fixture().await;
        // Package orders: no flash duplicate guard in the way
        let orders: Vec<_> = (0..3)
            .map(|_| sample_order(OrderType::TransactionPackage, OrderStatus::Processing))
            .collect();
        for order in &orders {
            fx.store.insert(order.clone()).await;
        }

        // 2nd delegation fails chain validation, the others succeed
        fx.chain
            .script_delegate(vec![
                Ok(TxResult::ok("faketx-b0".to_string())),
                Ok(TxResult::rejected("CONTRACT_VALIDATE_ERROR".to_string())),
                Ok(TxResult::ok("faketx-b2".to_string())),
            ])
            .await;

        let ids: Vec<_> = orders.iter().map(|o| o.id.clone()).collect();
        let outcomes = fx.orchestrator.delegate_batch(&ids).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert!(outcomes[1].error.is_some());
        assert!(outcomes[2].success);
    }

    #[tokio::test]
    async fn test_batch_size_is_bounded() {
        let fx = engine_fixture().await;
        let result = fx.orchestrator.delegate_batch(&[]).await;
        assert!(matches!(result, Err(EngineError::InvalidBatch(_))));

        let too_many: Vec<_> = (0..51).map(|_| OrderId::generate()).collect();
        let result = fx.orchestrator.delegate_batch(&too_many).await;
        assert!(matches!(result, Err(EngineError::InvalidBatch(_))));
    }

    #[tokio::test]
    async fn test_expiry_sweep_settles_elapsed_orders() {
        let fx = engine_fixture().await;

        let mut done = sample_order(OrderType::EnergyFlash, OrderStatus::Active);
        done.activated_at = Some(Utc::now() - ChronoDuration::days(4));
        done.delegation_id = Some("d-done".to_string());
        fx.store.insert(done.clone()).await;

        let mut fresh = sample_order(OrderType::EnergyFlash, OrderStatus::Active);
        fresh.activated_at = Some(Utc::now());
        fresh.delegation_id = Some("d-fresh".to_string());
        fx.store.insert(fresh.clone()).await;

        let summary = fx.orchestrator.process_expired().await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.expired, 0);

        assert_eq!(fx.store.get(&done.id).await.status, OrderStatus::Completed);
        assert_eq!(fx.store.get(&fresh.id).await.status, OrderStatus::Active);
        assert_eq!(fx.chain.undelegate_calls().await, 1);
    }

    #[tokio::test]
    async fn test_unfreeze_then_withdraw_after_waiting_period() {
        let fx = engine_fixture().await;

        let record = fx
            .orchestrator
            .unfreeze_stake(500_000, ResourceType::Energy)
            .await
            .unwrap();
        assert!(!record.withdrawn);
        assert_eq!(fx.store.unfreeze_count().await, 1);

        // Nothing matured yet
        assert_eq!(fx.orchestrator.withdraw_expired_unfreezes().await.unwrap(), 0);
        assert_eq!(fx.chain.withdraw_calls().await, 0);
    }
}
