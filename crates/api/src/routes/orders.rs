//! Order management endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use rental_types::{
    Order, OrderFilter, OrderId, OrderStatus, OrderType, ResourceType, StatusExtra, TxId, UserId,
};

use crate::handlers::orders::{self, NewOrder};
use crate::{error::ApiError, state::AppState, ApiResult};

/// Query parameters for listing orders
#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub user_id: Option<String>,
    pub order_type: Option<OrderType>,
    pub status: Option<OrderStatus>,
    pub receiver_address: Option<String>,
    /// Maximum number of orders to return (default: 100)
    #[serde(default)]
    pub limit: Option<i64>,
    /// Number of orders to skip (default: 0)
    #[serde(default)]
    pub offset: Option<i64>,
}

/// Request to create a new order
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub order_type: OrderType,
    /// Resource amount requested (energy units / staked SUN)
    pub resource_amount: i64,
    #[serde(default = "default_resource_type")]
    pub resource_type: ResourceType,
    /// Transaction quota; required for package orders
    #[serde(default)]
    pub transaction_count: i32,
    pub receiver_address: String,
    /// Price in SUN
    pub price: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_period_days: Option<i64>,
    #[serde(default)]
    pub no_daily_fee: bool,
}

fn default_resource_type() -> ResourceType {
    ResourceType::Energy
}

fn default_currency() -> String {
    "TRX".to_string()
}

/// Payment-confirmation event from the payment layer
#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentConfirmedRequest {
    pub tx_hash: String,
}

/// Manual status change by an operator
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    pub operator: String,
    pub reason: String,
}

/// Cancel request with operator identity
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    pub operator: String,
    pub reason: String,
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> ApiResult<Json<Vec<Order>>> {
    let filter = OrderFilter {
        user_id: query.user_id.map(UserId::from),
        order_type: query.order_type,
        status: query.status,
        receiver_address: query.receiver_address,
    };
    let orders = orders::list_orders(
        &state,
        filter,
        query.limit.unwrap_or(100),
        query.offset.unwrap_or(0),
    )
    .await?;
    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Order>> {
    let order = state.store.get_order(&OrderId(id)).await?;
    Ok(Json(order))
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> ApiResult<Json<Order>> {
    let order = orders::create_order(
        &state,
        NewOrder {
            user_id: req.user_id,
            order_type: req.order_type,
            resource_amount: req.resource_amount,
            resource_type: req.resource_type,
            transaction_count: req.transaction_count,
            receiver_address: req.receiver_address,
            price: req.price,
            currency: req.currency,
            lock_period_days: req.lock_period_days,
            no_daily_fee: req.no_daily_fee,
        },
    )
    .await?;
    Ok(Json(order))
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PaymentConfirmedRequest>,
) -> ApiResult<Json<Order>> {
    if req.tx_hash.is_empty() {
        return Err(ApiError::bad_request("tx_hash must not be empty"));
    }
    let order = state
        .lifecycle
        .confirm_payment(&OrderId(id), TxId(req.tx_hash))
        .await?;
    Ok(Json(order))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<Json<Order>> {
    let id = OrderId(id);

    // Completion-like targets settle (undelegate) before transitioning
    let order = match req.status {
        OrderStatus::ManuallyCompleted | OrderStatus::Completed | OrderStatus::Expired => {
            state
                .orchestrator
                .settle_order(&id, req.status, &req.operator, &req.reason)
                .await?
        }
        other => {
            state
                .lifecycle
                .update_status(&id, other, StatusExtra::default(), &req.operator, &req.reason)
                .await?
        }
    };
    Ok(Json(order))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CancelOrderRequest>,
) -> ApiResult<Json<Order>> {
    let order = state
        .lifecycle
        .cancel(&OrderId(id), &req.operator, &req.reason)
        .await?;
    Ok(Json(order))
}
