//! Mission records (spec §3 "Mission").

use crate::id::{LeaseId, MissionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MissionStatus {
    Pending,
    Leased,
    Succeeded,
    Failed,
    Retry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionGoal {
    pub title: String,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionLease {
    pub lease_id: LeaseId,
    pub holder_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub mission_id: MissionId,
    pub idempotency_key: Option<String>,
    pub goal: MissionGoal,
    pub priority: Priority,
    pub status: MissionStatus,
    pub attempts: u32,
    pub next_run_after: DateTime<Utc>,
    pub lease: Option<MissionLease>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mission {
    /// `true` iff this mission currently holds a non-expired lease.
    pub fn has_live_lease(&self, now: DateTime<Utc>) -> bool {
        self.lease.as_ref().is_some_and(|l| l.expires_at > now)
    }
}

/// Request body for `POST /missions` (spec §4.3 `create`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMissionRequest {
    pub goal: MissionGoal,
    pub priority: Priority,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Policy knobs for the mission store's retry scheduler (spec §4.3 `fail`).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 1_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MissionError {
    #[error("mission {0} not found")]
    NotFound(MissionId),
    #[error("lease mismatch or expired for mission {0}")]
    BadLease(MissionId),
    #[error("illegal transition for mission {0}: {1}")]
    IllegalTransition(MissionId, &'static str),
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
