//! HTTP surface for the Autonomy Governor & Circuit Breaker (spec §6):
//! metrics queries, governance-state reads, rule CRUD, breaker-event
//! listing/resolution, and a manual `run-cycle` trigger.

use crate::error::ApiError;
use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use roast_governance::GovernanceService;
use roast_schema::{BreakerEventId, CircuitBreakerEvent, CircuitBreakerRule, GovernanceState, MetricsSnapshot};
use std::sync::Arc;

pub fn router(service: Arc<GovernanceService>) -> Router {
    Router::new()
        .route("/governance/state", get(state))
        .route("/governance/run-cycle", post(run_cycle))
        .route("/metrics/current", get(metrics_current))
        .route("/metrics/weekly", get(metrics_weekly))
        .route("/metrics/latest", get(metrics_latest))
        .route("/circuit-breaker/rules", get(list_rules))
        .route("/circuit-breaker/rules/:name", patch(upsert_rule))
        .route("/circuit-breaker/events", get(list_events))
        .route("/circuit-breaker/events/:id/resolve", post(resolve_event))
        .with_state(service)
}

async fn state(State(service): State<Arc<GovernanceService>>) -> Result<Json<GovernanceState>, ApiError> {
    Ok(Json(service.state().await?))
}

async fn metrics_current(State(service): State<Arc<GovernanceService>>) -> Result<Json<MetricsSnapshot>, ApiError> {
    Ok(Json(service.readiness_metrics(Utc::now()).await?))
}

async fn metrics_weekly(State(service): State<Arc<GovernanceService>>) -> Result<Json<MetricsSnapshot>, ApiError> {
    Ok(Json(service.weekly_metrics(Utc::now()).await?))
}

async fn metrics_latest(State(service): State<Arc<GovernanceService>>) -> Result<Json<MetricsSnapshot>, ApiError> {
    Ok(Json(service.latest_metrics(Utc::now()).await?))
}

async fn list_rules(State(service): State<Arc<GovernanceService>>) -> Result<Json<Vec<CircuitBreakerRule>>, ApiError> {
    Ok(Json(service.list_rules().await?))
}

async fn upsert_rule(
    State(service): State<Arc<GovernanceService>>,
    Path(name): Path<String>,
    Json(rule): Json<CircuitBreakerRule>,
) -> Result<Json<CircuitBreakerRule>, ApiError> {
    Ok(Json(service.upsert_rule(&name, rule).await?))
}

async fn list_events(State(service): State<Arc<GovernanceService>>) -> Result<Json<Vec<CircuitBreakerEvent>>, ApiError> {
    Ok(Json(service.list_events().await?))
}

async fn resolve_event(State(service): State<Arc<GovernanceService>>, Path(id): Path<BreakerEventId>) -> Result<Json<()>, ApiError> {
    service.resolve_event(id).await?;
    Ok(Json(()))
}

async fn run_cycle(State(service): State<Arc<GovernanceService>>) -> Result<Json<Vec<CircuitBreakerEvent>>, ApiError> {
    Ok(Json(service.run_cycle(Utc::now()).await?))
}
