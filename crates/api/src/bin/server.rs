//! Energy Rental API Server
//!
//! Production entry point for the energy rental engine. Wires storage,
//! the TRON client and the engine services together with explicit
//! dependency injection, starts the background loops and serves the
//! admin/trigger HTTP surface.

use anyhow::Result;
use rental_api::{start_server, AppState};
use rental_engine::{
    DelegationOrchestrator, EngineConfigBuilder, FeeScheduler, LifecycleCoordinator, TrackedSet,
    UsageMonitor,
};
use rental_storage::{OrderStore, PostgresStorage};
use rental_tron::{ResourceClient, TronClient};
use rental_types::{AppConfig, PostgresConfig, ServerConfig, TronConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

struct RuntimeConfig {
    app: AppConfig,
    daily_fee_sun: i64,
    fee_check_hour: u32,
    grace_period_days: i64,
    inactivity_threshold_days: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting energy rental API server");

    // Load configuration from environment
    let config = load_config()?;

    // Initialize PostgreSQL storage
    info!(
        "Connecting to PostgreSQL at {}",
        mask_password(&config.app.postgres.url)
    );
    let store: Arc<dyn OrderStore> = Arc::new(PostgresStorage::new(&config.app.postgres).await?);
    info!("PostgreSQL storage initialized");

    // Initialize TRON client
    info!("Initializing TRON client for {}", config.app.tron.network);
    let tron_client = TronClient::from_config(&config.app.tron)?;
    info!("TRON client initialized ({:?})", tron_client.network());
    let chain: Arc<dyn ResourceClient> = Arc::new(tron_client);

    let engine_config = EngineConfigBuilder::new()
        .daily_fee_sun(config.daily_fee_sun)
        .fee_check_hour(config.fee_check_hour)
        .grace_period_days(config.grace_period_days)
        .inactivity_threshold_days(config.inactivity_threshold_days)
        .build();

    // Wire the engine: one tracked set shared by coordinator and monitor,
    // one trigger channel from payment confirmation to the orchestrator.
    let tracked = TrackedSet::default();
    let (delegation_tx, delegation_rx) = tokio::sync::mpsc::channel(256);

    let lifecycle = Arc::new(LifecycleCoordinator::new(
        Arc::clone(&store),
        tracked.clone(),
        delegation_tx,
    ));
    let orchestrator = Arc::new(DelegationOrchestrator::new(
        engine_config.clone(),
        Arc::clone(&store),
        Arc::clone(&chain),
        Arc::clone(&lifecycle),
        config.app.tron.owner_address.clone(),
        delegation_rx,
    ));
    let monitor = Arc::new(UsageMonitor::new(
        engine_config.clone(),
        Arc::clone(&store),
        Arc::clone(&chain),
        Arc::clone(&orchestrator),
        tracked,
    ));
    let fees = Arc::new(FeeScheduler::new(
        engine_config,
        Arc::clone(&store),
        Arc::clone(&orchestrator),
    ));

    // Start the background services
    let orchestrator_handle = Arc::clone(&orchestrator).start();
    let monitor_handle = Arc::clone(&monitor).start();
    let fees_handle = Arc::clone(&fees).start();
    info!("Engine services started");

    let state = AppState::new(
        store,
        chain,
        Arc::clone(&lifecycle),
        Arc::clone(&orchestrator),
        Arc::clone(&monitor),
        Arc::clone(&fees),
    );

    let addr: SocketAddr = config.app.server.listen_addr.parse()?;

    // Serve until ctrl-c
    start_server(state, addr, shutdown_signal()).await?;

    // Graceful teardown: let in-flight chain calls finish or time out
    info!("Shutting down engine services");
    orchestrator.shutdown().await;
    monitor.shutdown().await;
    fees.shutdown().await;

    for (name, handle) in [
        ("orchestrator", orchestrator_handle),
        ("monitor", monitor_handle),
        ("fees", fees_handle),
    ] {
        match tokio::time::timeout(Duration::from_secs(30), handle).await {
            Ok(Ok(Ok(()))) => info!("{} stopped", name),
            Ok(Ok(Err(e))) => warn!("{} stopped with error: {}", name, e),
            Ok(Err(e)) => warn!("{} task panicked: {}", name, e),
            Err(_) => warn!("{} did not stop within 30s", name),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

fn load_config() -> Result<RuntimeConfig> {
    let env = |key: &str| std::env::var(key);

    let app = AppConfig {
        server: ServerConfig {
            listen_addr: env("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        },
        postgres: PostgresConfig {
            url: env("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            max_connections: env("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(16),
            connect_timeout_secs: 10,
        },
        tron: TronConfig {
            network: env("TRON_NETWORK").unwrap_or_else(|_| "shasta".to_string()),
            endpoint: env("TRON_ENDPOINT").ok(),
            api_key: env("TRON_API_KEY").ok(),
            owner_address: env("POOL_OWNER_ADDRESS")
                .map_err(|_| anyhow::anyhow!("POOL_OWNER_ADDRESS must be set"))?,
            request_timeout_secs: env("TRON_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        },
    };

    Ok(RuntimeConfig {
        app,
        daily_fee_sun: env("DAILY_FEE_SUN")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1_000_000),
        fee_check_hour: env("FEE_CHECK_HOUR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        grace_period_days: env("GRACE_PERIOD_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1),
        inactivity_threshold_days: env("INACTIVITY_THRESHOLD_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(7),
    })
}

/// Hide credentials when logging connection strings.
fn mask_password(url: &str) -> String {
    match url.find("://").zip(url.rfind('@')) {
        Some((scheme_end, at)) if at > scheme_end + 3 => {
            let auth_start = scheme_end + 3;
            match url[auth_start..at].find(':') {
                Some(colon) => {
                    format!("{}:****{}", &url[..auth_start + colon], &url[at..])
                }
                None => url.to_string(),
            }
        }
        _ => url.to_string(),
    }
}
