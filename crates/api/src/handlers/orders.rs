//! Order creation and lookup logic

use chrono::Utc;
use rental_types::{
    Order, OrderFilter, OrderId, OrderStatus, OrderType, ResourceType, UserId,
    DEFAULT_LOCK_PERIOD_DAYS,
};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

pub struct NewOrder {
    pub user_id: String,
    pub order_type: OrderType,
    pub resource_amount: i64,
    pub resource_type: ResourceType,
    pub transaction_count: i32,
    pub receiver_address: String,
    pub price: i64,
    pub currency: String,
    pub lock_period_days: Option<i64>,
    pub no_daily_fee: bool,
}

/// Create a new order in `pending` state.
pub async fn create_order(state: &AppState, new: NewOrder) -> Result<Order, ApiError> {
    if !state.chain.is_valid_address(&new.receiver_address) {
        return Err(rental_types::Error::InvalidAddress(new.receiver_address).into());
    }
    if new.resource_amount <= 0 {
        return Err(ApiError::bad_request("resource_amount must be positive"));
    }
    if new.order_type == OrderType::TransactionPackage && new.transaction_count <= 0 {
        return Err(ApiError::bad_request(
            "transaction_count must be positive for package orders",
        ));
    }

    let now = Utc::now();
    let order = Order {
        id: OrderId::generate(),
        user_id: UserId(new.user_id),
        order_type: new.order_type,
        status: OrderStatus::Pending,
        resource_amount: new.resource_amount,
        resource_type: new.resource_type,
        transaction_count: new.transaction_count,
        used_count: 0,
        receiver_address: new.receiver_address,
        price: new.price,
        currency: new.currency,
        lock_period_days: new.lock_period_days.unwrap_or(DEFAULT_LOCK_PERIOD_DAYS),
        delegation_id: None,
        payment_tx_hash: None,
        no_daily_fee: new.no_daily_fee,
        created_at: now,
        updated_at: now,
        activated_at: None,
        completed_at: None,
    };

    state.store.create_order(&order).await?;

    info!(
        "Created {} order {} for {} ({} {})",
        order.order_type, order.id, order.receiver_address, order.resource_amount,
        order.resource_type
    );

    Ok(order)
}

/// List orders by filter with pagination.
pub async fn list_orders(
    state: &AppState,
    filter: OrderFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<Order>, ApiError> {
    let limit = limit.clamp(1, 500);
    let offset = offset.max(0);
    state
        .store
        .search_orders(&filter, limit, offset)
        .await
        .map_err(Into::into)
}
