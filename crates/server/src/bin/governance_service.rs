//! The Governance service binary (spec §4.4, §6): metrics/state/rule/event
//! HTTP surface plus the periodic Circuit Breaker loop (`checkIntervalMs`,
//! default 60s).

use anyhow::Result;
use roast_governance::GovernanceService;
use roast_server::{config::Config, kernel, routes};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const BREAKER_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,roast_governance=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("starting governance service");

    let repo = kernel::build_governance_repo(&config).await?;
    let service = Arc::new(GovernanceService::new(repo));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let breaker_service = service.clone();
    let breaker_handle = roast_server::spawn_periodic("circuit-breaker-loop", BREAKER_CHECK_INTERVAL, shutdown_rx, move || {
        let service = breaker_service.clone();
        async move {
            match service.run_cycle(chrono::Utc::now()).await {
                Ok(fired) if !fired.is_empty() => {
                    tracing::warn!(count = fired.len(), "circuit breaker rules fired");
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "circuit breaker cycle failed"),
            }
        }
    });

    let app = axum::Router::new()
        .merge(routes::governance::router(service))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let result = roast_server::serve_with_grace(app, config.governance_port, config.shutdown_grace_seconds).await;

    let _ = shutdown_tx.send(true);
    breaker_handle.abort();

    result
}
