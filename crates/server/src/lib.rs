//! Per-binary wiring shared by the four service binaries (spec §6 HTTP
//! surface; SPEC_FULL §2 ambient stack): environment configuration,
//! dependency-injected repository construction, HTTP error mapping, message
//! bus glue, and the axum routers themselves. Each `src/bin/*.rs` binary
//! only calls into this crate — no binary reimplements wiring the others
//! already have.

pub mod bus;
pub mod config;
pub mod error;
pub mod kernel;
pub mod routes;

use anyhow::Result;
use std::time::Duration;
use tokio::signal;

/// Wait for SIGINT or SIGTERM, following the teacher's `JobRunner` shutdown
/// pattern generalized to a future instead of an `AtomicBool` poll loop
/// (spec §6 "Exit codes": SIGTERM/SIGINT drain in-flight work then exit 0).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

/// Run `app` on `port`, draining in-flight requests for up to
/// `grace_seconds` once a shutdown signal arrives, and return once the
/// server has stopped accepting connections or the grace period elapses,
/// whichever comes first (spec §6 "Exit codes": configurable grace,
/// default 10s).
pub async fn serve_with_grace(app: axum::Router, port: u16, grace_seconds: u64) -> Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    let (signaled_tx, signaled_rx) = tokio::sync::oneshot::channel();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = signaled_tx.send(());
    });

    tokio::pin!(serve);
    tokio::select! {
        result = &mut serve => return result.map_err(anyhow::Error::from),
        _ = signaled_rx => {}
    }

    match tokio::time::timeout(Duration::from_secs(grace_seconds), serve).await {
        Ok(result) => result.map_err(anyhow::Error::from),
        Err(_) => {
            tracing::warn!(grace_seconds, "shutdown grace period elapsed; exiting with requests still in flight");
            Ok(())
        }
    }
}

/// Spawn `body` on a fixed `tokio::time::interval`, stopping as soon as
/// `shutdown` resolves (spec §5: the tick/reaper/sweeper/breaker loops are
/// each "a single periodic task").
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
    mut body: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => body().await,
                _ = shutdown.changed() => {
                    tracing::info!(task = name, "periodic task stopping");
                    break;
                }
            }
        }
    })
}

/// Grace-period sleep shared by every binary's shutdown path, factored out
/// so the drain duration is configured once per spec §6.
pub async fn drain(grace_seconds: u64) {
    tokio::time::sleep(Duration::from_secs(grace_seconds)).await;
}
