//! The Mission Store service binary (spec §4.3, §6): create/claim/
//! heartbeat/complete/fail HTTP surface plus the lease-reaper background
//! task that retries missions whose lease expired without a heartbeat.

use anyhow::Result;
use roast_missions::MissionStore;
use roast_schema::RetryPolicy;
use roast_server::{config::Config, kernel, routes};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const REAPER_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,roast_missions=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("starting mission service");

    let repo = kernel::build_mission_repo(&config).await?;
    let store = Arc::new(MissionStore::new(repo, RetryPolicy::default()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let reaper_store = store.clone();
    let reaper_handle = roast_server::spawn_periodic("mission-lease-reaper", REAPER_INTERVAL, shutdown_rx, move || {
        let store = reaper_store.clone();
        async move {
            match store.reap_expired_leases(chrono::Utc::now()).await {
                Ok(reaped) if !reaped.is_empty() => {
                    tracing::warn!(count = reaped.len(), "reaped expired mission leases");
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "lease reaper failed"),
            }
        }
    });

    let app = axum::Router::new()
        .merge(routes::missions::router(store))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let result = roast_server::serve_with_grace(app, config.mission_port, config.shutdown_grace_seconds).await;

    let _ = shutdown_tx.send(true);
    reaper_handle.abort();

    result
}
