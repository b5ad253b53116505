//! Daily fee deduction for package orders.
//!
//! A calendar-driven job charges every active `transaction_package` order
//! a flat daily fee, once per billing day. The `(order, day)` fee record
//! is the de-duplication guard, and a per-order advisory lock keeps the
//! scheduled run and the manual trigger from racing. Orders still inside
//! the post-activation grace period are left alone; orders inactive past
//! the configured threshold are auto-expired instead of charged.

use crate::config::EngineConfig;
use crate::delegation::{DelegationOrchestrator, KeyedLocks};
use crate::error::{EngineError, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, Timelike, Utc};
use rental_storage::OrderStore;
use rental_types::{FeeDeduction, OrderId, OrderStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Outcome of one order's fee evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FeeOutcome {
    /// Fee recorded (zero for no-daily-fee packages)
    Charged { amount: i64 },
    /// Inside the post-activation grace period; nothing happens
    GracePeriod,
    /// Inactive past the threshold; order auto-expired instead of charged
    Expired,
}

/// Summary of a daily fee run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeeRunSummary {
    pub day: Option<NaiveDate>,
    pub charged: usize,
    pub skipped: usize,
    pub expired: usize,
    pub failed: usize,
}

/// Result of a manual fee trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeeTriggerResult {
    Single(FeeOutcome),
    Run(FeeRunSummary),
}

/// Fee scheduler service.
pub struct FeeScheduler {
    config: EngineConfig,
    store: Arc<dyn OrderStore>,
    orchestrator: Arc<DelegationOrchestrator>,
    order_locks: KeyedLocks,
    last_run_day: RwLock<Option<NaiveDate>>,
    shutdown: Arc<RwLock<bool>>,
}

impl FeeScheduler {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn OrderStore>,
        orchestrator: Arc<DelegationOrchestrator>,
    ) -> Self {
        Self {
            config,
            store,
            orchestrator,
            order_locks: KeyedLocks::default(),
            last_run_day: RwLock::new(None),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the scheduler in the background.
    pub fn start(self: Arc<Self>) -> JoinHandle<Result<()>> {
        info!(
            "Starting fee scheduler (daily run after {:02}:00 UTC)",
            self.config.fee_check_hour
        );

        tokio::spawn(async move {
            match self.run().await {
                Ok(()) => {
                    info!("Fee scheduler stopped normally");
                    Ok(())
                }
                Err(e) => {
                    error!("Fee scheduler error: {}", e);
                    Err(e)
                }
            }
        })
    }

    /// Clock loop: fires the daily run once the configured hour passes.
    async fn run(&self) -> Result<()> {
        let mut interval = interval(self.config.fee_tick_interval);

        loop {
            if *self.shutdown.read().await {
                info!("Shutdown signal received, stopping fee scheduler");
                return Ok(());
            }

            interval.tick().await;

            let now = Utc::now();
            let today = now.date_naive();

            if now.hour() < self.config.fee_check_hour {
                continue;
            }
            if *self.last_run_day.read().await == Some(today) {
                continue;
            }

            match self.run_daily(today).await {
                Ok(summary) => {
                    info!(
                        "Fee run for {}: {} charged, {} skipped, {} expired, {} failed",
                        today, summary.charged, summary.skipped, summary.expired, summary.failed
                    );
                    *self.last_run_day.write().await = Some(today);
                }
                Err(e) => error!("Fee run for {} failed: {}", today, e),
            }
        }
    }

    /// Charge every active package order due for `day`. Per-order errors
    /// are collected, never fatal to the run.
    pub async fn run_daily(&self, day: NaiveDate) -> Result<FeeRunSummary> {
        let due = self.store.find_due_for_fee_check(day).await?;
        let mut summary = FeeRunSummary {
            day: Some(day),
            ..Default::default()
        };

        for order in due {
            match self.charge_order(&order.id, day).await {
                Ok(FeeOutcome::Charged { .. }) => summary.charged += 1,
                Ok(FeeOutcome::GracePeriod) => summary.skipped += 1,
                Ok(FeeOutcome::Expired) => summary.expired += 1,
                Err(e) if e.is_conflict() => {
                    // Charged concurrently; the guard did its job
                    debug!("Order {} already charged for {}", order.id, day);
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!("Fee deduction for {} failed: {}", order.id, e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Evaluate and charge a single order for `day`.
    ///
    /// Grace period is checked first (no charge, no expiry), then the
    /// inactivity threshold (auto-expire, no charge), then the fee is
    /// recorded. An already-charged day surfaces as the typed
    /// `FeeAlreadyCharged` conflict.
    pub async fn charge_order(&self, id: &OrderId, day: NaiveDate) -> Result<FeeOutcome> {
        let order = self.store.get_order(id).await?;

        if !order.is_package() || order.status != OrderStatus::Active {
            return Err(EngineError::InvalidState(
                id.clone(),
                "fee deduction applies to active package orders".to_string(),
            ));
        }

        let _guard = self.order_locks.acquire(&order.id.0).await;

        if self.store.fee_charged(id, day).await? {
            return Err(rental_types::Error::FeeAlreadyCharged {
                order_id: id.clone(),
                fee_day: day,
            }
            .into());
        }

        let now = Utc::now();

        if let Some(activated) = order.activated_at {
            if now - activated < ChronoDuration::days(self.config.grace_period_days) {
                debug!("Order {} inside grace period, skipping fee", id);
                return Ok(FeeOutcome::GracePeriod);
            }
        }

        let last_activity = self
            .store
            .last_usage_at(id)
            .await?
            .or(order.activated_at)
            .unwrap_or(order.created_at);
        if now - last_activity >= ChronoDuration::days(self.config.inactivity_threshold_days) {
            info!("Order {} inactive since {}, auto-expiring", id, last_activity);
            self.orchestrator
                .settle_order(id, OrderStatus::Expired, "fee-scheduler", "inactive beyond threshold")
                .await?;
            return Ok(FeeOutcome::Expired);
        }

        let amount = if order.no_daily_fee {
            0
        } else {
            self.config.daily_fee_sun
        };

        let recorded = self
            .store
            .record_fee_deduction(&FeeDeduction {
                order_id: id.clone(),
                fee_day: day,
                amount,
                charged_at: now,
            })
            .await?;
        if !recorded {
            return Err(rental_types::Error::FeeAlreadyCharged {
                order_id: id.clone(),
                fee_day: day,
            }
            .into());
        }

        info!("Charged {} SUN to order {} for {}", amount, id, day);
        Ok(FeeOutcome::Charged { amount })
    }

    /// Operator-initiated re-run. Honors the same (order, day) guard, so
    /// it can never double-charge.
    pub async fn trigger_fee_check(&self, order_id: Option<&OrderId>) -> Result<FeeTriggerResult> {
        let today = Utc::now().date_naive();
        match order_id {
            Some(id) => self
                .charge_order(id, today)
                .await
                .map(FeeTriggerResult::Single),
            None => self.run_daily(today).await.map(FeeTriggerResult::Run),
        }
    }

    /// Initiate graceful shutdown.
    pub async fn shutdown(&self) {
        info!("Initiating fee scheduler shutdown");
        *self.shutdown.write().await = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{engine_fixture, sample_order};
    use rental_types::OrderType;

    #[tokio::test]
    async fn test_fee_check_is_idempotent_per_day() {
        let fx = engine_fixture().await;
        let mut order = sample_order(OrderType::TransactionPackage, OrderStatus::Active);
        order.activated_at = Some(Utc::now() - ChronoDuration::days(3));
        fx.store.insert(order.clone()).await;

        let day = Utc::now().date_naive();
        let first = fx.fees.charge_order(&order.id, day).await.unwrap();
        assert_eq!(
            first,
            FeeOutcome::Charged {
                amount: fx.config.daily_fee_sun
            }
        );

        let second = fx.fees.charge_order(&order.id, day).await;
        assert!(matches!(
            second,
            Err(EngineError::Domain(
                rental_types::Error::FeeAlreadyCharged { .. }
            ))
        ));
        assert_eq!(fx.store.fee_count().await, 1);
    }

    #[tokio::test]
    async fn test_no_daily_fee_packages_record_zero() {
        let fx = engine_fixture().await;
        let mut order = sample_order(OrderType::TransactionPackage, OrderStatus::Active);
        order.activated_at = Some(Utc::now() - ChronoDuration::days(3));
        order.no_daily_fee = true;
        fx.store.insert(order.clone()).await;

        let outcome = fx
            .fees
            .charge_order(&order.id, Utc::now().date_naive())
            .await
            .unwrap();
        assert_eq!(outcome, FeeOutcome::Charged { amount: 0 });
        assert_eq!(fx.store.fee_count().await, 1);
    }

    #[tokio::test]
    async fn test_grace_period_skips_charge_and_expiry() {
        let fx = engine_fixture().await;
        let mut order = sample_order(OrderType::TransactionPackage, OrderStatus::Active);
        order.activated_at = Some(Utc::now());
        fx.store.insert(order.clone()).await;

        let outcome = fx
            .fees
            .charge_order(&order.id, Utc::now().date_naive())
            .await
            .unwrap();
        assert_eq!(outcome, FeeOutcome::GracePeriod);
        assert_eq!(fx.store.fee_count().await, 0);
        assert_eq!(fx.store.get(&order.id).await.status, OrderStatus::Active);
    }

    #[tokio::test]
    async fn test_inactive_order_expires_instead_of_charging() {
        let fx = engine_fixture().await;
        let mut order = sample_order(OrderType::TransactionPackage, OrderStatus::Active);
        order.activated_at = Some(Utc::now() - ChronoDuration::days(10));
        order.delegation_id = Some("d-stale".to_string());
        fx.store.insert(order.clone()).await;

        let outcome = fx
            .fees
            .charge_order(&order.id, Utc::now().date_naive())
            .await
            .unwrap();
        assert_eq!(outcome, FeeOutcome::Expired);
        assert_eq!(fx.store.fee_count().await, 0);
        assert_eq!(fx.store.get(&order.id).await.status, OrderStatus::Expired);
        assert_eq!(fx.chain.undelegate_calls().await, 1);
    }

    #[tokio::test]
    async fn test_daily_run_only_charges_orders_once() {
        let fx = engine_fixture().await;
        for _ in 0..2 {
            let mut order = sample_order(OrderType::TransactionPackage, OrderStatus::Active);
            order.activated_at = Some(Utc::now() - ChronoDuration::days(3));
            fx.store.insert(order).await;
        }

        let day = Utc::now().date_naive();
        let first = fx.fees.run_daily(day).await.unwrap();
        assert_eq!(first.charged, 2);

        // Charged orders are no longer due; re-running is a no-op
        let second = fx.fees.run_daily(day).await.unwrap();
        assert_eq!(second.charged, 0);
        assert_eq!(fx.store.fee_count().await, 2);
    }
}
