//! The Event-Inference Engine service binary (spec §4.1, §6): HTTP config
//! surface, a 1Hz `tick` loop for the silence-based DROP detector, and, when
//! `MQTT_URL` is configured, a telemetry subscriber that republishes
//! inferred events to the bus.

use anyhow::Result;
use roast_inference::Engine;
use roast_server::{config::Config, kernel, routes};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,roast_inference=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("starting inference service");

    let config_repo = kernel::build_config_repo(&config).await?;
    let engine = Arc::new(Engine::new(Some(config_repo)));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let tick_engine = engine.clone();
    let tick_handle = roast_server::spawn_periodic("inference-tick", Duration::from_secs(1), shutdown_rx.clone(), move || {
        let engine = tick_engine.clone();
        async move {
            let fired = engine.tick(chrono::Utc::now());
            for (key, event) in fired {
                tracing::info!(machine = %key.machine_id, event = ?event.kind, "emitted roast event via tick");
            }
        }
    });

    let verifier = kernel::build_signing_key(&config)?
        .map(|key| Arc::new(roast_server::bus::EnvelopeVerifier::new(key.verifying_key(), config.signing_kid.clone())));
    if verifier.is_none() && config.signing_kid.is_some() {
        tracing::warn!("SIGNING_KID set but SIGNING_MODE is off; telemetry envelopes will not be verified");
    }

    let bus_handle = if let Some(mqtt_url) = config.mqtt_url.clone() {
        let client = async_nats::connect(&mqtt_url).await?;
        let publisher: Arc<dyn roast_server::bus::EventPublisher> = Arc::new(roast_server::bus::NatsEventPublisher::new(client.clone()));
        let (bus_shutdown_tx, bus_shutdown_rx) = tokio::sync::oneshot::channel();
        let bus_engine = engine.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = roast_server::bus::run_telemetry_subscriber(client, bus_engine, publisher, verifier, bus_shutdown_rx).await {
                tracing::error!(error = %err, "telemetry subscriber exited with error");
            }
        });
        Some((handle, bus_shutdown_tx))
    } else {
        tracing::warn!("MQTT_URL not set; telemetry subscriber disabled, HTTP config surface still live");
        None
    };

    let app = axum::Router::new()
        .merge(routes::inference::router(engine))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let result = roast_server::serve_with_grace(app, config.event_inference_port, config.shutdown_grace_seconds).await;

    let _ = shutdown_tx.send(true);
    tick_handle.abort();
    if let Some((handle, bus_shutdown_tx)) = bus_handle {
        let _ = bus_shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(config.shutdown_grace_seconds), handle).await;
    }

    result
}
