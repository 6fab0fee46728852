//! Inference Engine error taxonomy (spec §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("bad telemetry payload: {0}")]
    BadPayload(String),
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
