//! Admin and trigger HTTP surface for the energy rental engine.
//!
//! This crate exposes the narrow contracts the excluded collaborators
//! consume: order status reads, the payment-confirmation event, manual
//! admin commands (status change, delegation trigger, cancel, process
//! expired, fee re-run) and the monitor status report. Everything else
//! lives in the engine.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

use axum::routing::{get, post, put};
use axum::Router;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Result type for API handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::admin::health))
        .route(
            "/orders",
            get(routes::orders::list_orders).post(routes::orders::create_order),
        )
        .route("/orders/:id", get(routes::orders::get_order))
        .route("/orders/:id/paid", post(routes::orders::confirm_payment))
        .route("/orders/:id/status", put(routes::orders::update_status))
        .route("/orders/:id/cancel", post(routes::orders::cancel_order))
        .route(
            "/delegations/trigger",
            post(routes::delegations::trigger_delegation),
        )
        .route("/stake/freeze", post(routes::delegations::freeze_stake))
        .route("/stake/unfreeze", post(routes::delegations::unfreeze_stake))
        .route("/fees/trigger", post(routes::admin::trigger_fee_check))
        .route(
            "/maintenance/process-expired",
            post(routes::admin::process_expired),
        )
        .route(
            "/maintenance/withdraw-unfreezes",
            post(routes::admin::withdraw_unfreezes),
        )
        .route("/monitor/status", get(routes::admin::monitor_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until the shutdown future resolves.
pub async fn start_server(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
