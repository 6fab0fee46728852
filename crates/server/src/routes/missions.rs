//! HTTP surface for the Mission Store (spec §6): create/claim/heartbeat/
//! complete/fail, plus listing and the metrics rollup.

use crate::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use roast_missions::MissionStore;
use roast_schema::{CreateMissionRequest, LeaseId, Mission, MissionId, MissionStatus};
use roast_storage::{CreateMissionOutcome, MissionMetrics};
use serde::Deserialize;
use std::sync::Arc;

pub fn router(store: Arc<MissionStore>) -> Router {
    Router::new()
        .route("/missions", post(create).get(list))
        .route("/missions/claim", post(claim))
        .route("/missions/metrics", get(metrics))
        .route("/missions/:id", get(get_mission))
        .route("/missions/:id/heartbeat", post(heartbeat))
        .route("/missions/:id/complete", post(complete))
        .route("/missions/:id/fail", post(fail))
        .with_state(store)
}

async fn create(
    State(store): State<Arc<MissionStore>>,
    Json(request): Json<CreateMissionRequest>,
) -> Result<Json<CreateMissionOutcome>, ApiError> {
    let outcome = store.create(request, Utc::now()).await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct ClaimRequest {
    agent_name: String,
    goals: Vec<String>,
    #[serde(default = "default_lease_seconds")]
    lease_seconds: i64,
}

fn default_lease_seconds() -> i64 {
    60
}

async fn claim(
    State(store): State<Arc<MissionStore>>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<Option<Mission>>, ApiError> {
    let mission = store.claim(&request.agent_name, &request.goals, request.lease_seconds, Utc::now()).await?;
    Ok(Json(mission))
}

#[derive(Deserialize)]
struct LeaseRequest {
    lease_id: LeaseId,
    agent_name: String,
    #[serde(default = "default_lease_seconds")]
    lease_seconds: i64,
}

async fn heartbeat(
    State(store): State<Arc<MissionStore>>,
    Path(id): Path<MissionId>,
    Json(request): Json<LeaseRequest>,
) -> Result<Json<Mission>, ApiError> {
    let mission = store.heartbeat(id, request.lease_id, &request.agent_name, request.lease_seconds, Utc::now()).await?;
    Ok(Json(mission))
}

#[derive(Deserialize)]
struct CompleteRequest {
    lease_id: LeaseId,
}

async fn complete(
    State(store): State<Arc<MissionStore>>,
    Path(id): Path<MissionId>,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<Mission>, ApiError> {
    let mission = store.complete(id, request.lease_id).await?;
    Ok(Json(mission))
}

#[derive(Deserialize)]
struct FailRequest {
    lease_id: LeaseId,
    error: String,
    #[serde(default)]
    retryable: bool,
}

async fn fail(
    State(store): State<Arc<MissionStore>>,
    Path(id): Path<MissionId>,
    Json(request): Json<FailRequest>,
) -> Result<Json<Mission>, ApiError> {
    let mission = store.fail(id, request.lease_id, &request.error, request.retryable, Utc::now()).await?;
    Ok(Json(mission))
}

async fn get_mission(State(store): State<Arc<MissionStore>>, Path(id): Path<MissionId>) -> Result<Json<Mission>, ApiError> {
    let mission = store.get(id).await?;
    Ok(Json(mission))
}

#[derive(Deserialize)]
struct ListQuery {
    status: Option<MissionStatus>,
}

async fn list(State(store): State<Arc<MissionStore>>, Query(query): Query<ListQuery>) -> Result<Json<Vec<Mission>>, ApiError> {
    let missions = store.list(query.status).await?;
    Ok(Json(missions))
}

async fn metrics(State(store): State<Arc<MissionStore>>) -> Result<Json<MissionMetrics>, ApiError> {
    let metrics = store.metrics().await?;
    Ok(Json(metrics))
}
