//! Order lifecycle coordination.
//!
//! The coordinator is the single writer of order status. Every transition
//! is validated against the table below, applied with an optimistic
//! check-and-set in storage, and followed by its side effects:
//! activation anchors the fee/expiry clocks, terminal transitions detach
//! the order from the usage monitor and leave an audit trail.
//!
//! Happy path: pending -> paid -> processing -> active -> completed.
//! `pending_delegation` is a transient sub-state of processing while a
//! delegation is in flight. `failed`/`cancelled`/`expired` are reachable
//! from any non-terminal state and are idempotent once reached.

use crate::error::{EngineError, Result};
use crate::monitor::TrackedSet;
use chrono::Utc;
use rental_storage::OrderStore;
use rental_types::{AuditEvent, Order, OrderId, OrderStatus, StatusExtra, TxId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Whether `from -> to` is a legal order status transition.
pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;

    match (from, to) {
        (Pending, Paid)
        | (Paid, Processing)
        | (Processing, PendingDelegation)
        | (Processing, Active)
        | (PendingDelegation, Active)
        | (Active, Completed)
        | (Processing, ManuallyCompleted)
        | (PendingDelegation, ManuallyCompleted)
        | (Active, ManuallyCompleted) => true,
        (from, Failed | Cancelled | Expired) => !from.is_terminal(),
        _ => false,
    }
}

/// State machine gatekeeper and single writer of order status.
pub struct LifecycleCoordinator {
    store: Arc<dyn OrderStore>,
    tracked: TrackedSet,
    delegation_tx: mpsc::Sender<OrderId>,
}

impl LifecycleCoordinator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        tracked: TrackedSet,
        delegation_tx: mpsc::Sender<OrderId>,
    ) -> Self {
        Self {
            store,
            tracked,
            delegation_tx,
        }
    }

    /// Apply a validated status transition.
    ///
    /// Re-applying a terminal status is a no-op, not an error. An illegal
    /// transition is rejected and leaves the stored state unchanged.
    /// `actor`/`reason` feed the audit trail; manual completion requires
    /// both.
    pub async fn update_status(
        &self,
        id: &OrderId,
        to: OrderStatus,
        mut extra: StatusExtra,
        actor: &str,
        reason: &str,
    ) -> Result<Order> {
        let order = self.store.get_order(id).await?;
        let from = order.status;

        if from == to && from.is_terminal() {
            return Ok(order);
        }

        if !can_transition(from, to) {
            return Err(rental_types::Error::InvalidTransition { from, to }.into());
        }

        if to == OrderStatus::ManuallyCompleted && (actor.is_empty() || reason.is_empty()) {
            return Err(EngineError::Validation(
                "manual completion requires an operator identity and a reason".to_string(),
            ));
        }

        let now = Utc::now();
        if to == OrderStatus::Active && order.activated_at.is_none() {
            extra.activated_at = Some(now);
        }
        if matches!(
            to,
            OrderStatus::Completed | OrderStatus::ManuallyCompleted | OrderStatus::Expired
        ) && extra.completed_at.is_none()
        {
            extra.completed_at = Some(now);
        }

        let updated = self.store.update_order_status(id, from, to, &extra).await?;
        if !updated {
            // Someone else moved the order first; re-read and report
            let current = self.store.get_order(id).await?;
            if current.status == to && to.is_terminal() {
                return Ok(current);
            }
            return Err(rental_types::Error::InvalidTransition {
                from: current.status,
                to,
            }
            .into());
        }

        info!("Order {} transitioned {} -> {}", id, from, to);

        if to == OrderStatus::Active {
            self.tracked.add(&order).await;
        }

        if to.is_terminal() {
            self.tracked.remove(id).await;
            self.store
                .record_audit_event(&AuditEvent {
                    order_id: id.clone(),
                    actor: actor.to_string(),
                    action: format!("status:{}", to),
                    detail: reason.to_string(),
                    recorded_at: now,
                })
                .await?;
        }

        self.store.get_order(id).await.map_err(Into::into)
    }

    /// Payment-confirmation event from the payment layer.
    ///
    /// Moves the order to `paid`, then `processing`, and enqueues a
    /// delegation request for immediate pickup.
    pub async fn confirm_payment(&self, id: &OrderId, tx_hash: TxId) -> Result<Order> {
        self.update_status(
            id,
            OrderStatus::Paid,
            StatusExtra {
                payment_tx_hash: Some(tx_hash),
                ..Default::default()
            },
            "payment",
            "payment confirmed",
        )
        .await?;

        let order = self
            .update_status(
                id,
                OrderStatus::Processing,
                StatusExtra::default(),
                "payment",
                "queued for delegation",
            )
            .await?;

        if let Err(e) = self.delegation_tx.send(id.clone()).await {
            // The poll loop will still pick the order up from storage
            warn!("Failed to enqueue delegation trigger for {}: {}", id, e);
        }

        Ok(order)
    }

    /// Cancel a non-terminal order.
    pub async fn cancel(&self, id: &OrderId, actor: &str, reason: &str) -> Result<Order> {
        self.update_status(id, OrderStatus::Cancelled, StatusExtra::default(), actor, reason)
            .await
    }

    /// Mark an order failed with the failure reason recorded.
    pub async fn fail(&self, id: &OrderId, actor: &str, reason: &str) -> Result<Order> {
        self.update_status(id, OrderStatus::Failed, StatusExtra::default(), actor, reason)
            .await
    }
}
