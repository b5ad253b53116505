use crate::OrderStore;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use rental_types::*;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};
use tracing::info;

const ORDER_COLUMNS: &str = "id, user_id, order_type, status, resource_amount, resource_type, \
     transaction_count, used_count, receiver_address, price, currency, lock_period_days, \
     delegation_id, payment_tx_hash, no_daily_fee, created_at, updated_at, activated_at, \
     completed_at";

const UNFREEZE_COLUMNS: &str =
    "id, tx_hash, owner_address, resource_type, amount, withdrawable_at, withdrawn, created_at";

pub struct PostgresStorage {
    pool: Pool,
}

impl PostgresStorage {
    pub async fn new(config: &PostgresConfig) -> Result<Self> {
        let pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e| Error::StorageError(format!("Invalid connection string: {}", e)))?;

        let mut cfg = Config::new();
        cfg.host = pg_config.get_hosts().first().and_then(|h| match h {
            tokio_postgres::config::Host::Tcp(s) => Some(s.clone()),
            #[allow(unreachable_patterns)]
            _ => None, // Unix sockets not supported for deadpool
        });
        cfg.port = pg_config.get_ports().first().copied();
        cfg.dbname = pg_config.get_dbname().map(|s| s.to_string());
        cfg.user = pg_config.get_user().map(|s| s.to_string());
        cfg.password = pg_config
            .get_password()
            .map(|p| String::from_utf8_lossy(p).to_string());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::StorageError(format!("Failed to create pool: {}", e)))?;

        let storage = Self { pool };

        info!("PostgreSQL storage initialized successfully");

        Ok(storage)
    }

    async fn client(&self) -> Result<deadpool_postgres::Client> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to get client: {}", e)))
    }
}

fn order_from_row(row: &Row) -> Result<Order> {
    let order_type: String = row.get("order_type");
    let status: String = row.get("status");
    let resource_type: String = row.get("resource_type");

    Ok(Order {
        id: OrderId(row.get("id")),
        user_id: UserId(row.get("user_id")),
        order_type: order_type.parse().map_err(Error::StorageError)?,
        status: status.parse().map_err(Error::StorageError)?,
        resource_amount: row.get("resource_amount"),
        resource_type: resource_type.parse().map_err(Error::StorageError)?,
        transaction_count: row.get("transaction_count"),
        used_count: row.get("used_count"),
        receiver_address: row.get("receiver_address"),
        price: row.get("price"),
        currency: row.get("currency"),
        lock_period_days: row.get("lock_period_days"),
        delegation_id: row.get("delegation_id"),
        payment_tx_hash: row
            .get::<_, Option<String>>("payment_tx_hash")
            .map(TxId::from),
        no_daily_fee: row.get("no_daily_fee"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        activated_at: row.get("activated_at"),
        completed_at: row.get("completed_at"),
    })
}

fn unfreeze_from_row(row: &Row) -> Result<UnfreezeRecord> {
    let resource_type: String = row.get("resource_type");
    Ok(UnfreezeRecord {
        id: row.get("id"),
        tx_hash: TxId(row.get("tx_hash")),
        owner_address: row.get("owner_address"),
        resource_type: resource_type.parse().map_err(Error::StorageError)?,
        amount: row.get("amount"),
        withdrawable_at: row.get("withdrawable_at"),
        withdrawn: row.get("withdrawn"),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl OrderStore for PostgresStorage {
    async fn create_order(&self, order: &Order) -> Result<()> {
        let client = self.client().await?;

        let sql = format!(
            "INSERT INTO orders ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
            ORDER_COLUMNS
        );
        client
            .execute(
                sql.as_str(),
                &[
                    &order.id.0,
                    &order.user_id.0,
                    &order.order_type.to_string(),
                    &order.status.to_string(),
                    &order.resource_amount,
                    &order.resource_type.to_string(),
                    &order.transaction_count,
                    &order.used_count,
                    &order.receiver_address,
                    &order.price,
                    &order.currency,
                    &order.lock_period_days,
                    &order.delegation_id,
                    &order.payment_tx_hash.as_ref().map(|t| t.0.clone()),
                    &order.no_daily_fee,
                    &order.created_at,
                    &order.updated_at,
                    &order.activated_at,
                    &order.completed_at,
                ],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to create order: {}", e)))?;

        Ok(())
    }

    async fn get_order(&self, id: &OrderId) -> Result<Order> {
        let client = self.client().await?;

        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        let row = client
            .query_opt(sql.as_str(), &[&id.0])
            .await
            .map_err(|e| Error::StorageError(format!("Failed to fetch order: {}", e)))?
            .ok_or_else(|| Error::OrderNotFound(id.clone()))?;

        order_from_row(&row)
    }

    async fn search_orders(
        &self,
        filter: &OrderFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>> {
        let client = self.client().await?;

        let user_id = filter.user_id.as_ref().map(|u| u.0.clone());
        let order_type = filter.order_type.map(|t| t.to_string());
        let status = filter.status.map(|s| s.to_string());
        let receiver = filter.receiver_address.clone();

        let mut sql = format!("SELECT {} FROM orders WHERE TRUE", ORDER_COLUMNS);
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();

        if let Some(user_id) = &user_id {
            params.push(user_id);
            sql.push_str(&format!(" AND user_id = ${}", params.len()));
        }
        if let Some(order_type) = &order_type {
            params.push(order_type);
            sql.push_str(&format!(" AND order_type = ${}", params.len()));
        }
        if let Some(status) = &status {
            params.push(status);
            sql.push_str(&format!(" AND status = ${}", params.len()));
        }
        if let Some(receiver) = &receiver {
            params.push(receiver);
            sql.push_str(&format!(" AND receiver_address = ${}", params.len()));
        }

        params.push(&limit);
        sql.push_str(&format!(" ORDER BY created_at DESC LIMIT ${}", params.len()));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ${}", params.len()));

        let rows = client
            .query(sql.as_str(), &params)
            .await
            .map_err(|e| Error::StorageError(format!("Failed to search orders: {}", e)))?;

        rows.iter().map(order_from_row).collect()
    }

    async fn update_order_status(
        &self,
        id: &OrderId,
        from: OrderStatus,
        to: OrderStatus,
        extra: &StatusExtra,
    ) -> Result<bool> {
        let client = self.client().await?;

        let payment_tx_hash = extra.payment_tx_hash.as_ref().map(|t| t.0.clone());

        let affected = client
            .execute(
                r#"
                UPDATE orders
                SET status = $3,
                    updated_at = NOW(),
                    delegation_id = COALESCE($4, delegation_id),
                    payment_tx_hash = COALESCE($5, payment_tx_hash),
                    activated_at = COALESCE($6, activated_at),
                    completed_at = COALESCE($7, completed_at)
                WHERE id = $1 AND status = $2
                "#,
                &[
                    &id.0,
                    &from.to_string(),
                    &to.to_string(),
                    &extra.delegation_id,
                    &payment_tx_hash,
                    &extra.activated_at,
                    &extra.completed_at,
                ],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to update order status: {}", e)))?;

        Ok(affected == 1)
    }

    async fn find_orders_in_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let client = self.client().await?;

        let sql = format!(
            "SELECT {} FROM orders WHERE status = $1 ORDER BY created_at",
            ORDER_COLUMNS
        );
        let rows = client
            .query(sql.as_str(), &[&status.to_string()])
            .await
            .map_err(|e| Error::StorageError(format!("Failed to list orders by status: {}", e)))?;

        rows.iter().map(order_from_row).collect()
    }

    async fn find_active_orders(&self, order_type: Option<OrderType>) -> Result<Vec<Order>> {
        let client = self.client().await?;

        let rows = match order_type {
            Some(t) => {
                let sql = format!(
                    "SELECT {} FROM orders WHERE status = 'active' AND order_type = $1 \
                     ORDER BY created_at",
                    ORDER_COLUMNS
                );
                client.query(sql.as_str(), &[&t.to_string()]).await
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM orders WHERE status = 'active' ORDER BY created_at",
                    ORDER_COLUMNS
                );
                client.query(sql.as_str(), &[]).await
            }
        }
        .map_err(|e| Error::StorageError(format!("Failed to list active orders: {}", e)))?;

        rows.iter().map(order_from_row).collect()
    }

    async fn find_due_for_fee_check(&self, day: NaiveDate) -> Result<Vec<Order>> {
        let client = self.client().await?;

        let sql = format!(
            "SELECT {} FROM orders o \
             WHERE o.order_type = 'transaction_package' AND o.status = 'active' \
             AND NOT EXISTS (SELECT 1 FROM fee_deductions f \
                             WHERE f.order_id = o.id AND f.fee_day = $1) \
             ORDER BY o.created_at",
            ORDER_COLUMNS
        );
        let rows = client
            .query(sql.as_str(), &[&day])
            .await
            .map_err(|e| Error::StorageError(format!("Failed to list orders due for fee: {}", e)))?;

        rows.iter().map(order_from_row).collect()
    }

    async fn record_delegation(&self, record: &DelegateRecord) -> Result<()> {
        let client = self.client().await?;

        client
            .execute(
                r#"
                INSERT INTO delegate_records
                    (id, tx_hash, owner_address, receiver_address, resource_type,
                     amount, lock, lock_period_days, status, order_id, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
                &[
                    &record.id,
                    &record.tx_hash.0,
                    &record.owner_address,
                    &record.receiver_address,
                    &record.resource_type.to_string(),
                    &record.amount,
                    &record.lock,
                    &record.lock_period_days,
                    &record.status.to_string(),
                    &record.order_id.0,
                    &record.created_at,
                    &record.updated_at,
                ],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to record delegation: {}", e)))?;

        Ok(())
    }

    async fn update_delegation_status(&self, id: &str, status: DelegationStatus) -> Result<()> {
        let client = self.client().await?;

        client
            .execute(
                "UPDATE delegate_records SET status = $2, updated_at = NOW() WHERE id = $1",
                &[&id, &status.to_string()],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to update delegation: {}", e)))?;

        Ok(())
    }

    async fn find_active_flash_order(
        &self,
        receiver_address: &str,
        exclude: &OrderId,
    ) -> Result<Option<OrderId>> {
        let client = self.client().await?;

        let row = client
            .query_opt(
                "SELECT id FROM orders \
                 WHERE receiver_address = $1 AND order_type = 'energy_flash' \
                 AND status IN ('processing', 'pending_delegation', 'active') \
                 AND id <> $2 \
                 LIMIT 1",
                &[&receiver_address, &exclude.0],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed flash-order lookup: {}", e)))?;

        Ok(row.map(|r| OrderId(r.get("id"))))
    }

    async fn append_usage_log(&self, entry: &EnergyUsageLog) -> Result<bool> {
        let client = self.client().await?;

        let affected = client
            .execute(
                r#"
                INSERT INTO energy_usage_logs (order_id, address, amount, tx_hash, observed_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (tx_hash) DO NOTHING
                "#,
                &[
                    &entry.order_id.0,
                    &entry.address,
                    &entry.amount,
                    &entry.tx_hash.0,
                    &entry.observed_at,
                ],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to append usage log: {}", e)))?;

        Ok(affected == 1)
    }

    async fn increment_used_count(&self, id: &OrderId) -> Result<i32> {
        let client = self.client().await?;

        let row = client
            .query_opt(
                "UPDATE orders SET used_count = used_count + 1, updated_at = NOW() \
                 WHERE id = $1 AND used_count < transaction_count \
                 RETURNING used_count",
                &[&id.0],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to increment used count: {}", e)))?;

        match row {
            Some(row) => Ok(row.get("used_count")),
            None => {
                // Distinguish a spent quota from a missing order
                self.get_order(id).await?;
                Err(Error::QuotaExhausted(id.clone()))
            }
        }
    }

    async fn last_usage_at(&self, id: &OrderId) -> Result<Option<DateTime<Utc>>> {
        let client = self.client().await?;

        let row = client
            .query_one(
                "SELECT MAX(observed_at) AS last_seen FROM energy_usage_logs WHERE order_id = $1",
                &[&id.0],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed usage lookup: {}", e)))?;

        Ok(row.get("last_seen"))
    }

    async fn record_fee_deduction(&self, fee: &FeeDeduction) -> Result<bool> {
        let client = self.client().await?;

        let affected = client
            .execute(
                r#"
                INSERT INTO fee_deductions (order_id, fee_day, amount, charged_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (order_id, fee_day) DO NOTHING
                "#,
                &[&fee.order_id.0, &fee.fee_day, &fee.amount, &fee.charged_at],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to record fee deduction: {}", e)))?;

        Ok(affected == 1)
    }

    async fn fee_charged(&self, id: &OrderId, day: NaiveDate) -> Result<bool> {
        let client = self.client().await?;

        let row = client
            .query_opt(
                "SELECT 1 FROM fee_deductions WHERE order_id = $1 AND fee_day = $2",
                &[&id.0, &day],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed fee lookup: {}", e)))?;

        Ok(row.is_some())
    }

    async fn record_stake(&self, record: &StakeRecord) -> Result<()> {
        let client = self.client().await?;

        client
            .execute(
                r#"
                INSERT INTO stake_records (id, tx_hash, owner_address, resource_type, amount, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
                &[
                    &record.id,
                    &record.tx_hash.0,
                    &record.owner_address,
                    &record.resource_type.to_string(),
                    &record.amount,
                    &record.created_at,
                ],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to record stake: {}", e)))?;

        Ok(())
    }

    async fn record_unfreeze(&self, record: &UnfreezeRecord) -> Result<()> {
        let client = self.client().await?;

        let sql = format!(
            "INSERT INTO unfreeze_records ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            UNFREEZE_COLUMNS
        );
        client
            .execute(
                sql.as_str(),
                &[
                    &record.id,
                    &record.tx_hash.0,
                    &record.owner_address,
                    &record.resource_type.to_string(),
                    &record.amount,
                    &record.withdrawable_at,
                    &record.withdrawn,
                    &record.created_at,
                ],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to record unfreeze: {}", e)))?;

        Ok(())
    }

    async fn find_withdrawable_unfreezes(
        &self,
        owner_address: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<UnfreezeRecord>> {
        let client = self.client().await?;

        let sql = format!(
            "SELECT {} FROM unfreeze_records \
             WHERE owner_address = $1 AND withdrawable_at <= $2 AND withdrawn = FALSE \
             ORDER BY withdrawable_at",
            UNFREEZE_COLUMNS
        );
        let rows = client
            .query(sql.as_str(), &[&owner_address, &now])
            .await
            .map_err(|e| Error::StorageError(format!("Failed unfreeze lookup: {}", e)))?;

        rows.iter().map(unfreeze_from_row).collect()
    }

    async fn mark_unfreezes_withdrawn(
        &self,
        owner_address: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let client = self.client().await?;

        let affected = client
            .execute(
                "UPDATE unfreeze_records SET withdrawn = TRUE \
                 WHERE owner_address = $1 AND withdrawable_at <= $2 AND withdrawn = FALSE",
                &[&owner_address, &now],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to mark unfreezes: {}", e)))?;

        Ok(affected)
    }

    async fn record_audit_event(&self, event: &AuditEvent) -> Result<()> {
        let client = self.client().await?;

        client
            .execute(
                r#"
                INSERT INTO audit_events (order_id, actor, action, detail, recorded_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
                &[
                    &event.order_id.0,
                    &event.actor,
                    &event.action,
                    &event.detail,
                    &event.recorded_at,
                ],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to record audit event: {}", e)))?;

        Ok(())
    }
}
