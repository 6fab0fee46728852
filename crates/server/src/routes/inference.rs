//! HTTP surface for the Event-Inference Engine (spec §6): config CRUD plus
//! a read-only session snapshot, all thin delegation to [`roast_inference::Engine`].

use crate::error::ApiError;
use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use roast_inference::{Engine, SessionSummary};
use roast_schema::{HeuristicsConfig, MachineKey, PartialHeuristicsConfig};
use serde::Serialize;
use std::sync::Arc;

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/config/defaults", get(get_defaults))
        .route("/config/:org_id/:site_id/:machine_id", post(upsert_config).get(get_config).delete(delete_config))
        .route("/status", get(status))
        .route("/health", get(health))
        .with_state(engine)
}

async fn get_defaults(State(engine): State<Arc<Engine>>) -> Json<HeuristicsConfig> {
    Json(engine.default_config())
}

#[derive(Serialize)]
struct ConfigResponse {
    #[serde(flatten)]
    config: HeuristicsConfig,
    is_default: bool,
}

async fn get_config(
    State(engine): State<Arc<Engine>>,
    Path((org_id, site_id, machine_id)): Path<(String, String, String)>,
) -> Result<Json<ConfigResponse>, ApiError> {
    let key = MachineKey::new(org_id, site_id, machine_id);
    let (config, is_default) = engine.get_config(&key).await?;
    Ok(Json(ConfigResponse { config, is_default }))
}

async fn upsert_config(
    State(engine): State<Arc<Engine>>,
    Path((org_id, site_id, machine_id)): Path<(String, String, String)>,
    Json(partial): Json<PartialHeuristicsConfig>,
) -> Result<Json<HeuristicsConfig>, ApiError> {
    let key = MachineKey::new(org_id, site_id, machine_id);
    let merged = engine.upsert_config(&key, &partial).await?;
    Ok(Json(merged))
}

async fn delete_config(
    State(engine): State<Arc<Engine>>,
    Path((org_id, site_id, machine_id)): Path<(String, String, String)>,
) -> Result<Json<bool>, ApiError> {
    let key = MachineKey::new(org_id, site_id, machine_id);
    let deleted = engine.delete_config(&key).await?;
    Ok(Json(deleted))
}

async fn status(State(engine): State<Arc<Engine>>) -> Json<Vec<SessionSummary>> {
    Json(engine.sessions_snapshot())
}

async fn health() -> &'static str {
    "ok"
}
