//! Maintenance and monitoring endpoints

use axum::{extract::State, Json};
use rental_engine::{ExpirySummary, FeeTriggerResult, MonitorStatus};
use rental_types::OrderId;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{state::AppState, ApiResult};

/// Manual fee check trigger; without an order id the whole daily run is
/// re-executed (idempotently).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TriggerFeeRequest {
    #[serde(default)]
    pub order_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WithdrawSummary {
    pub settled: u64,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn trigger_fee_check(
    State(state): State<AppState>,
    Json(req): Json<TriggerFeeRequest>,
) -> ApiResult<Json<FeeTriggerResult>> {
    let order_id = req.order_id.map(OrderId);
    let result = state.fees.trigger_fee_check(order_id.as_ref()).await?;
    Ok(Json(result))
}

pub async fn process_expired(State(state): State<AppState>) -> ApiResult<Json<ExpirySummary>> {
    let summary = state.orchestrator.process_expired().await?;
    Ok(Json(summary))
}

pub async fn withdraw_unfreezes(
    State(state): State<AppState>,
) -> ApiResult<Json<WithdrawSummary>> {
    let settled = state.orchestrator.withdraw_expired_unfreezes().await?;
    Ok(Json(WithdrawSummary { settled }))
}

pub async fn monitor_status(State(state): State<AppState>) -> Json<MonitorStatus> {
    Json(state.monitor.get_status().await)
}
