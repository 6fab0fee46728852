//! The Command Service binary (spec §4.2, §6): propose/approve/reject HTTP
//! surface, wired to the default [`roast_governance::DefaultGovernor`] as
//! gate 1, plus the approval-timeout sweeper background task.

use anyhow::Result;
use roast_command::CommandService;
use roast_governance::DefaultGovernor;
use roast_server::{config::Config, kernel, routes};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,roast_command=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("starting command service");

    let proposal_repo = kernel::build_command_repo(&config).await?;
    let governance_repo = kernel::build_governance_repo(&config).await?;
    let governor: Arc<dyn roast_schema::Governor> = Arc::new(DefaultGovernor::new(governance_repo.clone()));
    let metrics: Arc<dyn roast_schema::MetricsRecorder> = Arc::new(kernel::GovernanceMetricsRecorder::new(governance_repo));

    let service = Arc::new(CommandService::with_metrics(proposal_repo, Some(governor), None, None, Some(metrics)));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweep_service = service.clone();
    let sweep_handle = roast_server::spawn_periodic("proposal-timeout-sweeper", TIMEOUT_SWEEP_INTERVAL, shutdown_rx, move || {
        let service = sweep_service.clone();
        async move {
            match service.sweep_timeouts(chrono::Utc::now()).await {
                Ok(timed_out) if !timed_out.is_empty() => {
                    tracing::warn!(count = timed_out.len(), "swept stale pending-approval proposals to TIMEOUT");
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "approval-timeout sweep failed"),
            }
        }
    });

    let app = axum::Router::new()
        .merge(routes::command::router(service))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let result = roast_server::serve_with_grace(app, config.command_port, config.shutdown_grace_seconds).await;

    let _ = shutdown_tx.send(true);
    sweep_handle.abort();

    result
}
