//! Persistence gateway for the rental engine.
//!
//! The `OrderStore` trait is the single ownership boundary for persisted
//! state: orders, delegation records, stake/unfreeze records, usage logs,
//! fee deductions and audit events. Components hold ids only and re-fetch
//! before mutating. `PostgresStorage` is the production implementation;
//! the schema lives in `schema.sql`.

pub mod postgres;

pub use postgres::PostgresStorage;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rental_types::{
    AuditEvent, DelegateRecord, DelegationStatus, EnergyUsageLog, FeeDeduction, Order, OrderFilter,
    OrderId, OrderStatus, OrderType, Result, StakeRecord, StatusExtra, UnfreezeRecord,
};

/// Storage contract for all persisted engine state.
///
/// All writes are single-row; status updates are optimistic check-and-set
/// so two components racing on the same order cannot both win.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create_order(&self, order: &Order) -> Result<()>;

    /// Fetch by id; `Error::OrderNotFound` if absent.
    async fn get_order(&self, id: &OrderId) -> Result<Order>;

    async fn search_orders(
        &self,
        filter: &OrderFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>>;

    /// Check-and-set status update. Returns `false` when the order was no
    /// longer in `from` (someone else won the race); the row is untouched.
    async fn update_order_status(
        &self,
        id: &OrderId,
        from: OrderStatus,
        to: OrderStatus,
        extra: &StatusExtra,
    ) -> Result<bool>;

    async fn find_orders_in_status(&self, status: OrderStatus) -> Result<Vec<Order>>;

    async fn find_active_orders(&self, order_type: Option<OrderType>) -> Result<Vec<Order>>;

    /// Active package orders not yet charged for `day`.
    async fn find_due_for_fee_check(&self, day: NaiveDate) -> Result<Vec<Order>>;

    async fn record_delegation(&self, record: &DelegateRecord) -> Result<()>;

    async fn update_delegation_status(&self, id: &str, status: DelegationStatus) -> Result<()>;

    /// An in-flight or active flash-rent order for this receiver, other
    /// than `exclude`. Feeds the duplicate-order guard.
    async fn find_active_flash_order(
        &self,
        receiver_address: &str,
        exclude: &OrderId,
    ) -> Result<Option<OrderId>>;

    /// Append a usage event. Returns `false` when the tx hash was already
    /// recorded (idempotent re-scan).
    async fn append_usage_log(&self, entry: &EnergyUsageLog) -> Result<bool>;

    /// Bump `used_count`, guarded by the quota. Returns the new count or
    /// `Error::QuotaExhausted` when the quota was already spent.
    async fn increment_used_count(&self, id: &OrderId) -> Result<i32>;

    async fn last_usage_at(&self, id: &OrderId) -> Result<Option<DateTime<Utc>>>;

    /// Record a daily fee charge. Returns `false` when the (order, day)
    /// pair was already charged.
    async fn record_fee_deduction(&self, fee: &FeeDeduction) -> Result<bool>;

    async fn fee_charged(&self, id: &OrderId, day: NaiveDate) -> Result<bool>;

    async fn record_stake(&self, record: &StakeRecord) -> Result<()>;

    async fn record_unfreeze(&self, record: &UnfreezeRecord) -> Result<()>;

    async fn find_withdrawable_unfreezes(
        &self,
        owner_address: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<UnfreezeRecord>>;

    async fn mark_unfreezes_withdrawn(
        &self,
        owner_address: &str,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    async fn record_audit_event(&self, event: &AuditEvent) -> Result<()>;
}
