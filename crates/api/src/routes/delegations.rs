//! Delegation and stake management endpoints

use axum::{extract::State, Json};
use rental_engine::BatchOutcome;
use rental_types::{OrderId, ResourceType, StakeRecord, UnfreezeRecord};
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, state::AppState, ApiResult};

/// Trigger delegation for one or more orders (bounded batch)
#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerDelegationRequest {
    pub order_ids: Vec<String>,
}

/// Stake management request
#[derive(Debug, Serialize, Deserialize)]
pub struct StakeRequest {
    /// Amount in SUN
    pub amount: i64,
    pub resource_type: ResourceType,
}

pub async fn trigger_delegation(
    State(state): State<AppState>,
    Json(req): Json<TriggerDelegationRequest>,
) -> ApiResult<Json<Vec<BatchOutcome>>> {
    if req.order_ids.is_empty() {
        return Err(ApiError::bad_request("order_ids must not be empty"));
    }
    let ids: Vec<OrderId> = req.order_ids.into_iter().map(OrderId).collect();

    // A single-order trigger surfaces its typed error directly so the
    // caller can branch on duplicate/conflict codes.
    if let [id] = ids.as_slice() {
        let record = state.orchestrator.delegate_order(id).await?;
        return Ok(Json(vec![BatchOutcome {
            order_id: id.clone(),
            success: true,
            delegation_id: Some(record.id),
            tx_hash: Some(record.tx_hash.0),
            error: None,
        }]));
    }

    let outcomes = state.orchestrator.delegate_batch(&ids).await?;
    Ok(Json(outcomes))
}

pub async fn freeze_stake(
    State(state): State<AppState>,
    Json(req): Json<StakeRequest>,
) -> ApiResult<Json<StakeRecord>> {
    let record = state
        .orchestrator
        .freeze_stake(req.amount, req.resource_type)
        .await?;
    Ok(Json(record))
}

pub async fn unfreeze_stake(
    State(state): State<AppState>,
    Json(req): Json<StakeRequest>,
) -> ApiResult<Json<UnfreezeRecord>> {
    let record = state
        .orchestrator
        .unfreeze_stake(req.amount, req.resource_type)
        .await?;
    Ok(Json(record))
}
