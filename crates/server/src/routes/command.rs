//! HTTP surface for the Command Service (spec §6): propose/approve/reject
//! plus the read surfaces the approval UI and audit tooling need.

use crate::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use roast_command::CommandService;
use roast_schema::{CommandProposal, ProposalId, ProposeRequest, SessionId};
use serde::Deserialize;
use std::sync::Arc;

pub fn router(service: Arc<CommandService>) -> Router {
    Router::new()
        .route("/proposals", post(propose).get(list_by_machine))
        .route("/proposals/pending-approvals", get(list_pending_approvals))
        .route("/proposals/:id", get(get_proposal))
        .route("/proposals/:id/approve", post(approve))
        .route("/proposals/:id/reject", post(reject))
        .with_state(service)
}

async fn propose(
    State(service): State<Arc<CommandService>>,
    Json(request): Json<ProposeRequest>,
) -> Result<Json<CommandProposal>, ApiError> {
    let proposal = service.propose(request, Utc::now()).await?;
    Ok(Json(proposal))
}

#[derive(Deserialize)]
struct ApproveRequest {
    actor: String,
}

async fn approve(
    State(service): State<Arc<CommandService>>,
    Path(id): Path<ProposalId>,
    Json(request): Json<ApproveRequest>,
) -> Result<Json<CommandProposal>, ApiError> {
    let proposal = service.approve(id, &request.actor, Utc::now()).await?;
    Ok(Json(proposal))
}

#[derive(Deserialize)]
struct RejectRequest {
    actor: String,
    reason: String,
}

async fn reject(
    State(service): State<Arc<CommandService>>,
    Path(id): Path<ProposalId>,
    Json(request): Json<RejectRequest>,
) -> Result<Json<CommandProposal>, ApiError> {
    let proposal = service.reject(id, &request.actor, request.reason, Utc::now()).await?;
    Ok(Json(proposal))
}

async fn get_proposal(State(service): State<Arc<CommandService>>, Path(id): Path<ProposalId>) -> Result<Json<CommandProposal>, ApiError> {
    let proposal = service.get(id).await?;
    Ok(Json(proposal))
}

async fn list_pending_approvals(State(service): State<Arc<CommandService>>) -> Result<Json<Vec<CommandProposal>>, ApiError> {
    let proposals = service.list_pending_approvals().await?;
    Ok(Json(proposals))
}

#[derive(Deserialize)]
struct ListQuery {
    machine_id: Option<String>,
    session_id: Option<SessionId>,
}

async fn list_by_machine(
    State(service): State<Arc<CommandService>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<CommandProposal>>, ApiError> {
    let proposals = if let Some(session_id) = query.session_id {
        service.list_by_session(session_id).await?
    } else {
        let machine_id = query.machine_id.unwrap_or_default();
        service.list_by_machine(&machine_id).await?
    };
    Ok(Json(proposals))
}
