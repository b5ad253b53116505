//! In-memory fakes backing the engine test suites.
//!
//! `MemoryStore` and `FakeChain` implement the storage and chain seams
//! with the same contract semantics as the production implementations,
//! so the services can be exercised without Postgres or a network.

use crate::config::{EngineConfig, EngineConfigBuilder};
use crate::delegation::DelegationOrchestrator;
use crate::fees::FeeScheduler;
use crate::lifecycle::LifecycleCoordinator;
use crate::monitor::{TrackedSet, UsageMonitor};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rental_storage::OrderStore;
use rental_tron::{
    AccountInfo, AccountResource, AccountTransaction, ResourceClient, TronError, TxResult,
};
use rental_types::*;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// A known-valid receiver address.
pub const RECEIVER: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
/// A known-valid pool owner address.
pub const OWNER: &str = "TLa2f6VPqDgRE67v1736s7bJ8Ray5wYjU7";

pub fn sample_order(order_type: OrderType, status: OrderStatus) -> Order {
    let now = Utc::now();
    Order {
        id: OrderId::generate(),
        user_id: UserId::from("user-1"),
        order_type,
        status,
        resource_amount: 65_000,
        resource_type: ResourceType::Energy,
        transaction_count: if order_type == OrderType::TransactionPackage {
            10
        } else {
            0
        },
        used_count: 0,
        receiver_address: RECEIVER.to_string(),
        price: 8_000_000,
        currency: "TRX".to_string(),
        lock_period_days: DEFAULT_LOCK_PERIOD_DAYS,
        delegation_id: None,
        payment_tx_hash: None,
        no_daily_fee: false,
        created_at: now,
        updated_at: now,
        activated_at: None,
        completed_at: None,
    }
}

#[derive(Default)]
struct MemoryInner {
    orders: HashMap<String, Order>,
    delegations: HashMap<String, DelegateRecord>,
    usage_logs: HashMap<String, EnergyUsageLog>,
    fees: HashMap<(String, NaiveDate), FeeDeduction>,
    stakes: Vec<StakeRecord>,
    unfreezes: Vec<UnfreezeRecord>,
    audits: Vec<AuditEvent>,
}

/// In-memory `OrderStore` with the production contract semantics.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub async fn insert(&self, order: Order) {
        self.inner
            .lock()
            .await
            .orders
            .insert(order.id.0.clone(), order);
    }

    pub async fn get(&self, id: &OrderId) -> Order {
        self.inner.lock().await.orders[&id.0].clone()
    }

    pub async fn usage_log_count(&self) -> usize {
        self.inner.lock().await.usage_logs.len()
    }

    pub async fn fee_count(&self) -> usize {
        self.inner.lock().await.fees.len()
    }

    pub async fn delegation_count(&self) -> usize {
        self.inner.lock().await.delegations.len()
    }

    pub async fn audit_count(&self) -> usize {
        self.inner.lock().await.audits.len()
    }

    pub async fn unfreeze_count(&self) -> usize {
        self.inner.lock().await.unfreezes.len()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_order(&self, order: &Order) -> Result<()> {
        self.insert(order.clone()).await;
        Ok(())
    }

    async fn get_order(&self, id: &OrderId) -> Result<Order> {
        self.inner
            .lock()
            .await
            .orders
            .get(&id.0)
            .cloned()
            .ok_or_else(|| Error::OrderNotFound(id.clone()))
    }

    async fn search_orders(
        &self,
        filter: &OrderFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>> {
        let inner = self.inner.lock().await;
        let mut matched: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| {
                filter.user_id.as_ref().map_or(true, |u| &o.user_id == u)
                    && filter.order_type.map_or(true, |t| o.order_type == t)
                    && filter.status.map_or(true, |s| o.status == s)
                    && filter
                        .receiver_address
                        .as_ref()
                        .map_or(true, |r| &o.receiver_address == r)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn update_order_status(
        &self,
        id: &OrderId,
        from: OrderStatus,
        to: OrderStatus,
        extra: &StatusExtra,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let order = inner
            .orders
            .get_mut(&id.0)
            .ok_or_else(|| Error::OrderNotFound(id.clone()))?;
        if order.status != from {
            return Ok(false);
        }
        order.status = to;
        order.updated_at = Utc::now();
        if let Some(delegation_id) = &extra.delegation_id {
            order.delegation_id = Some(delegation_id.clone());
        }
        if let Some(tx_hash) = &extra.payment_tx_hash {
            order.payment_tx_hash = Some(tx_hash.clone());
        }
        if let Some(activated_at) = extra.activated_at {
            order.activated_at = Some(activated_at);
        }
        if let Some(completed_at) = extra.completed_at {
            order.completed_at = Some(completed_at);
        }
        Ok(true)
    }

    async fn find_orders_in_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .orders
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect())
    }

    async fn find_active_orders(&self, order_type: Option<OrderType>) -> Result<Vec<Order>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .orders
            .values()
            .filter(|o| {
                o.status == OrderStatus::Active && order_type.map_or(true, |t| o.order_type == t)
            })
            .cloned()
            .collect())
    }

    async fn find_due_for_fee_check(&self, day: NaiveDate) -> Result<Vec<Order>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .orders
            .values()
            .filter(|o| {
                o.order_type == OrderType::TransactionPackage
                    && o.status == OrderStatus::Active
                    && !inner.fees.contains_key(&(o.id.0.clone(), day))
            })
            .cloned()
            .collect())
    }

    async fn record_delegation(&self, record: &DelegateRecord) -> Result<()> {
        self.inner
            .lock()
            .await
            .delegations
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update_delegation_status(&self, id: &str, status: DelegationStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.delegations.get_mut(id) {
            record.status = status;
            record.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn find_active_flash_order(
        &self,
        receiver_address: &str,
        exclude: &OrderId,
    ) -> Result<Option<OrderId>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .orders
            .values()
            .find(|o| {
                o.receiver_address == receiver_address
                    && o.order_type == OrderType::EnergyFlash
                    && matches!(
                        o.status,
                        OrderStatus::Processing
                            | OrderStatus::PendingDelegation
                            | OrderStatus::Active
                    )
                    && o.id != *exclude
            })
            .map(|o| o.id.clone()))
    }

    async fn append_usage_log(&self, entry: &EnergyUsageLog) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.usage_logs.contains_key(&entry.tx_hash.0) {
            return Ok(false);
        }
        inner
            .usage_logs
            .insert(entry.tx_hash.0.clone(), entry.clone());
        Ok(true)
    }

    async fn increment_used_count(&self, id: &OrderId) -> Result<i32> {
        let mut inner = self.inner.lock().await;
        let order = inner
            .orders
            .get_mut(&id.0)
            .ok_or_else(|| Error::OrderNotFound(id.clone()))?;
        if order.used_count >= order.transaction_count {
            return Err(Error::QuotaExhausted(id.clone()));
        }
        order.used_count += 1;
        Ok(order.used_count)
    }

    async fn last_usage_at(&self, id: &OrderId) -> Result<Option<DateTime<Utc>>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .usage_logs
            .values()
            .filter(|l| l.order_id == *id)
            .map(|l| l.observed_at)
            .max())
    }

    async fn record_fee_deduction(&self, fee: &FeeDeduction) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let key = (fee.order_id.0.clone(), fee.fee_day);
        if inner.fees.contains_key(&key) {
            return Ok(false);
        }
        inner.fees.insert(key, fee.clone());
        Ok(true)
    }

    async fn fee_charged(&self, id: &OrderId, day: NaiveDate) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.fees.contains_key(&(id.0.clone(), day)))
    }

    async fn record_stake(&self, record: &StakeRecord) -> Result<()> {
        self.inner.lock().await.stakes.push(record.clone());
        Ok(())
    }

    async fn record_unfreeze(&self, record: &UnfreezeRecord) -> Result<()> {
        self.inner.lock().await.unfreezes.push(record.clone());
        Ok(())
    }

    async fn find_withdrawable_unfreezes(
        &self,
        owner_address: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<UnfreezeRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .unfreezes
            .iter()
            .filter(|u| u.owner_address == owner_address && u.withdrawable_at <= now && !u.withdrawn)
            .cloned()
            .collect())
    }

    async fn mark_unfreezes_withdrawn(
        &self,
        owner_address: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut count = 0;
        for unfreeze in inner.unfreezes.iter_mut() {
            if unfreeze.owner_address == owner_address
                && unfreeze.withdrawable_at <= now
                && !unfreeze.withdrawn
            {
                unfreeze.withdrawn = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn record_audit_event(&self, event: &AuditEvent) -> Result<()> {
        self.inner.lock().await.audits.push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
struct ChainCalls {
    delegate: u32,
    undelegate: u32,
    freeze: u32,
    unfreeze: u32,
    withdraw: u32,
}

/// Scriptable `ResourceClient` fake.
///
/// Delegate outcomes can be scripted per call; everything else succeeds
/// with generated transaction ids.
pub struct FakeChain {
    delegate_script: Mutex<VecDeque<std::result::Result<TxResult, TronError>>>,
    transactions: Mutex<HashMap<String, Vec<AccountTransaction>>>,
    resources: Mutex<HashMap<String, AccountResource>>,
    delegable: Mutex<i64>,
    calls: Mutex<ChainCalls>,
    tx_counter: AtomicU64,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self {
            delegate_script: Mutex::new(VecDeque::new()),
            transactions: Mutex::new(HashMap::new()),
            resources: Mutex::new(HashMap::new()),
            delegable: Mutex::new(10_000_000),
            calls: Mutex::new(ChainCalls::default()),
            tx_counter: AtomicU64::new(0),
        }
    }
}

impl FakeChain {
    fn next_txid(&self) -> String {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        format!("faketx-{}", n)
    }

    pub async fn script_delegate(
        &self,
        outcomes: Vec<std::result::Result<TxResult, TronError>>,
    ) {
        self.delegate_script.lock().await.extend(outcomes);
    }

    pub async fn set_delegable(&self, amount: i64) {
        *self.delegable.lock().await = amount;
    }

    pub async fn set_transactions(&self, address: &str, txs: Vec<AccountTransaction>) {
        self.transactions
            .lock()
            .await
            .insert(address.to_string(), txs);
    }

    pub async fn set_resources(&self, address: &str, resources: AccountResource) {
        self.resources
            .lock()
            .await
            .insert(address.to_string(), resources);
    }

    pub async fn delegate_calls(&self) -> u32 {
        self.calls.lock().await.delegate
    }

    pub async fn undelegate_calls(&self) -> u32 {
        self.calls.lock().await.undelegate
    }

    pub async fn withdraw_calls(&self) -> u32 {
        self.calls.lock().await.withdraw
    }
}

#[async_trait]
impl ResourceClient for FakeChain {
    async fn freeze(
        &self,
        _owner_address: &str,
        _amount: i64,
        _resource: ResourceType,
    ) -> std::result::Result<TxResult, TronError> {
        self.calls.lock().await.freeze += 1;
        Ok(TxResult::ok(self.next_txid()))
    }

    async fn unfreeze(
        &self,
        _owner_address: &str,
        _amount: i64,
        _resource: ResourceType,
    ) -> std::result::Result<TxResult, TronError> {
        self.calls.lock().await.unfreeze += 1;
        Ok(TxResult::ok(self.next_txid()))
    }

    async fn delegate(
        &self,
        _owner_address: &str,
        _receiver_address: &str,
        _amount: i64,
        _resource: ResourceType,
        _lock: bool,
        _lock_period_days: i64,
    ) -> std::result::Result<TxResult, TronError> {
        self.calls.lock().await.delegate += 1;
        if let Some(outcome) = self.delegate_script.lock().await.pop_front() {
            return outcome;
        }
        Ok(TxResult::ok(self.next_txid()))
    }

    async fn undelegate(
        &self,
        _owner_address: &str,
        _receiver_address: &str,
        _amount: i64,
        _resource: ResourceType,
    ) -> std::result::Result<TxResult, TronError> {
        self.calls.lock().await.undelegate += 1;
        Ok(TxResult::ok(self.next_txid()))
    }

    async fn withdraw_expired_unfreeze(
        &self,
        _owner_address: &str,
    ) -> std::result::Result<TxResult, TronError> {
        self.calls.lock().await.withdraw += 1;
        Ok(TxResult::ok(self.next_txid()))
    }

    async fn get_account(&self, address: &str) -> std::result::Result<AccountInfo, TronError> {
        Ok(AccountInfo {
            address: address.to_string(),
            balance: 1_000_000_000,
        })
    }

    async fn get_account_resource(
        &self,
        address: &str,
    ) -> std::result::Result<AccountResource, TronError> {
        Ok(self
            .resources
            .lock()
            .await
            .get(address)
            .cloned()
            .unwrap_or(AccountResource {
                energy_used: 0,
                energy_limit: 100_000,
                net_used: 0,
                net_limit: 5_000,
            }))
    }

    async fn delegable_balance(
        &self,
        _owner_address: &str,
        _resource: ResourceType,
    ) -> std::result::Result<i64, TronError> {
        Ok(*self.delegable.lock().await)
    }

    async fn account_transactions(
        &self,
        address: &str,
        min_timestamp_ms: i64,
        limit: usize,
    ) -> std::result::Result<Vec<AccountTransaction>, TronError> {
        Ok(self
            .transactions
            .lock()
            .await
            .get(address)
            .map(|txs| {
                txs.iter()
                    .filter(|t| t.timestamp_ms >= min_timestamp_ms)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn is_valid_address(&self, address: &str) -> bool {
        rental_tron::is_valid_address(address)
    }
}

/// Fully wired engine over in-memory fakes.
pub struct EngineFixture {
    pub config: EngineConfig,
    pub store: Arc<MemoryStore>,
    pub chain: Arc<FakeChain>,
    pub tracked: TrackedSet,
    pub lifecycle: Arc<LifecycleCoordinator>,
    pub orchestrator: Arc<DelegationOrchestrator>,
    pub monitor: Arc<UsageMonitor>,
    pub fees: Arc<FeeScheduler>,
}

pub async fn engine_fixture() -> EngineFixture {
    let config = EngineConfigBuilder::new()
        .initial_backoff(Duration::from_millis(1))
        .max_backoff(Duration::from_millis(2))
        .build();

    let store = Arc::new(MemoryStore::default());
    let chain = Arc::new(FakeChain::default());
    let tracked = TrackedSet::default();
    let (delegation_tx, delegation_rx) = mpsc::channel(64);

    let lifecycle = Arc::new(LifecycleCoordinator::new(
        store.clone() as Arc<dyn OrderStore>,
        tracked.clone(),
        delegation_tx,
    ));
    let orchestrator = Arc::new(DelegationOrchestrator::new(
        config.clone(),
        store.clone() as Arc<dyn OrderStore>,
        chain.clone() as Arc<dyn ResourceClient>,
        lifecycle.clone(),
        OWNER.to_string(),
        delegation_rx,
    ));
    let monitor = Arc::new(UsageMonitor::new(
        config.clone(),
        store.clone() as Arc<dyn OrderStore>,
        chain.clone() as Arc<dyn ResourceClient>,
        orchestrator.clone(),
        tracked.clone(),
    ));
    let fees = Arc::new(FeeScheduler::new(
        config.clone(),
        store.clone() as Arc<dyn OrderStore>,
        orchestrator.clone(),
    ));

    EngineFixture {
        config,
        store,
        chain,
        tracked,
        lifecycle,
        orchestrator,
        monitor,
        fees,
    }
}
