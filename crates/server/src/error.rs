//! HTTP error mapping (spec §7, SPEC_FULL §8): one place per binary where
//! each kernel crate's error taxonomy becomes a status code, following the
//! teacher's `AuthError` -> response convention.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<roast_inference::InferenceError> for ApiError {
    fn from(err: roast_inference::InferenceError) -> Self {
        match err {
            roast_inference::InferenceError::BadPayload(msg) => Self::new(StatusCode::BAD_REQUEST, msg),
            roast_inference::InferenceError::Storage(err) => {
                tracing::error!(error = %err, "storage error in inference service");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "storage error")
            }
        }
    }
}

impl From<roast_schema::MissionError> for ApiError {
    fn from(err: roast_schema::MissionError) -> Self {
        match err {
            roast_schema::MissionError::NotFound(id) => Self::new(StatusCode::NOT_FOUND, format!("mission {id} not found")),
            roast_schema::MissionError::BadLease(id) => Self::new(StatusCode::CONFLICT, format!("bad lease for mission {id}")),
            roast_schema::MissionError::IllegalTransition(id, reason) => {
                Self::new(StatusCode::CONFLICT, format!("illegal transition for mission {id}: {reason}"))
            }
            roast_schema::MissionError::Storage(err) => {
                tracing::error!(error = %err, "storage error in mission service");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "storage error")
            }
        }
    }
}

impl From<roast_schema::CommandError> for ApiError {
    fn from(err: roast_schema::CommandError) -> Self {
        match err {
            roast_schema::CommandError::NotFound(id) => Self::new(StatusCode::NOT_FOUND, format!("proposal {id} not found")),
            roast_schema::CommandError::IllegalTransition(id, status) => {
                Self::new(StatusCode::CONFLICT, format!("illegal transition for proposal {id}: expected PENDING_APPROVAL, found {status:?}"))
            }
            roast_schema::CommandError::Storage(err) => {
                tracing::error!(error = %err, "storage error in command service");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "storage error")
            }
        }
    }
}

impl From<roast_schema::GovernanceError> for ApiError {
    fn from(err: roast_schema::GovernanceError) -> Self {
        match err {
            roast_schema::GovernanceError::RuleNotFound(name) => Self::new(StatusCode::NOT_FOUND, format!("rule {name:?} not found")),
            roast_schema::GovernanceError::EventNotFound(id) => Self::new(StatusCode::NOT_FOUND, format!("breaker event {id} not found")),
            roast_schema::GovernanceError::InvalidRule(name, reason) => {
                Self::new(StatusCode::BAD_REQUEST, format!("rule {name:?} has a malformed condition: {reason}"))
            }
            roast_schema::GovernanceError::Storage(err) => {
                tracing::error!(error = %err, "storage error in governance service");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "storage error")
            }
        }
    }
}
