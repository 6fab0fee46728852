//! Command and Command Proposal records (spec §3 "Command", "Command
//! Proposal") and the trait boundaries the Command Service gates against
//! (spec §9 redesign flag: "the governor is currently an optional
//! duck-typed callable" → a named `Governor` trait).

use crate::id::{CommandId, ProposalId, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandType {
    SetPower,
    SetFan,
    SetDrum,
    Abort,
    Preheat,
    Charge,
    Drop,
}

impl CommandType {
    /// `true` for commands that never carry a `target_value` (spec §3).
    pub fn is_value_free(self) -> bool {
        matches!(self, CommandType::Abort | CommandType::Preheat | CommandType::Charge | CommandType::Drop)
    }

    /// Type-specific hard caps (spec §4.2 gate 2).
    pub fn hard_cap(self) -> Option<(f64, f64)> {
        match self {
            CommandType::SetPower => Some((0.0, 100.0)),
            CommandType::SetFan => Some((1.0, 10.0)),
            CommandType::SetDrum => Some((0.0, 100.0)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandConstraints {
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub ramp_rate: Option<f64>,
    #[serde(default)]
    pub require_states: Vec<String>,
    #[serde(default)]
    pub forbidden_states: Vec<String>,
    pub min_interval_seconds: Option<f64>,
    pub max_daily_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub command_id: CommandId,
    pub command_type: CommandType,
    pub machine_id: String,
    pub target_value: Option<f64>,
    pub unit: Option<String>,
    #[serde(default)]
    pub constraints: CommandConstraints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Proposer {
    Agent,
    Human,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    Proposed,
    PendingApproval,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
    Aborted,
    Timeout,
}

impl ProposalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProposalStatus::Completed
                | ProposalStatus::Failed
                | ProposalStatus::Rejected
                | ProposalStatus::Aborted
                | ProposalStatus::Timeout
        )
    }
}

/// Closed vocabulary of rejection codes (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    ConstraintViolation,
    StateGuard,
    RateLimit,
    RampRate,
    OutOfScope,
    HighFailureRate,
    UserRejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionReason {
    pub code: RejectionCode,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub actor: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub actual_value: Option<f64>,
    #[serde(default)]
    pub telemetry_changes: serde_json::Value,
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandProposal {
    pub proposal_id: ProposalId,
    pub command: Command,
    pub proposer: Proposer,
    pub actor: String,
    pub reasoning: String,
    pub session_id: Option<SessionId>,
    pub mission_id: Option<String>,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub approval_required: bool,
    pub approval_timeout_seconds: i64,
    pub approver: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejecter: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<RejectionReason>,
    pub execution_started_at: Option<DateTime<Utc>>,
    pub execution_ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub outcome: Option<Outcome>,
    pub audit_log: Vec<AuditEntry>,
}

/// Request body for `propose` (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeRequest {
    pub command: Command,
    pub proposer: Proposer,
    pub actor: String,
    pub reasoning: String,
    pub session_id: Option<SessionId>,
    pub mission_id: Option<String>,
    #[serde(default = "default_approval_required")]
    pub approval_required: bool,
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_seconds: i64,
}

fn default_approval_required() -> bool {
    true
}

fn default_approval_timeout() -> i64 {
    300
}

// =============================================================================
// Governor trait boundary (spec §9 redesign flag)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GovernorAction {
    Allow,
    Block,
    Quarantine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorContext {
    pub recent_failure_rate: f64,
    pub commands_in_session: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorDecision {
    pub action: GovernorAction,
    pub confidence: f64,
    pub reasons: Vec<RejectionCode>,
    pub decided_at: DateTime<Utc>,
    pub decided_by: String,
}

#[derive(Debug, Clone)]
pub struct GovernorRequest {
    pub command_type: CommandType,
    pub target_value: Option<f64>,
    pub machine_id: String,
    pub session_id: Option<SessionId>,
    pub actor: String,
    pub proposer: Proposer,
}

/// A single named interface for the autonomy governor, consulted as gate 1
/// of the Command Service's pipeline (spec §4.2, §9).
#[async_trait]
pub trait Governor: Send + Sync {
    async fn evaluate(&self, request: &GovernorRequest, context: &GovernorContext) -> GovernorDecision;
}

/// Current machine state, queried by the Command Service's state gate
/// (spec §4.2 gate 3). Each key maps to a truthy/falsy flag, e.g.
/// `drum_rotating`, `roast_in_progress`.
#[async_trait]
pub trait CurrentStateProvider: Send + Sync {
    async fn current_state(&self, machine_id: &str) -> HashMap<String, bool>;
}

/// Recent command history, queried by the rate gate (spec §4.2 gate 4).
#[async_trait]
pub trait RecentCommandsProvider: Send + Sync {
    /// Commands of `command_type` on `machine_id`, most-recent first.
    async fn recent_commands(
        &self,
        machine_id: &str,
        command_type: CommandType,
        limit: usize,
    ) -> Vec<CommandProposal>;
}

// =============================================================================
// Metrics recorder trait boundary (spec §4.4 "Metrics aggregation": derived
// from Command Service audit log and outcome records)
// =============================================================================

/// One event-shaped sample fed to the governance metrics ledger as the
/// Command Service moves a proposal through its lifecycle. Mirrors
/// `roast_storage::OutcomeSample` field-for-field; kept as a separate type
/// so `roast-command` depends on a named interface (spec §9 redesign flag)
/// rather than reaching into `roast-storage`'s `GovernanceRepository`
/// directly.
#[derive(Debug, Clone)]
pub struct MetricsSample {
    pub at: DateTime<Utc>,
    pub command_type: CommandType,
    pub proposed: bool,
    pub approved: bool,
    pub rejected: bool,
    pub succeeded: bool,
    pub failed: bool,
    pub rolled_back: bool,
    pub constraint_violation: bool,
    pub emergency_abort: bool,
    pub incident_critical: bool,
}

impl MetricsSample {
    pub fn blank(at: DateTime<Utc>, command_type: CommandType) -> Self {
        Self {
            at,
            command_type,
            proposed: false,
            approved: false,
            rejected: false,
            succeeded: false,
            failed: false,
            rolled_back: false,
            constraint_violation: false,
            emergency_abort: false,
            incident_critical: false,
        }
    }
}

/// Sink the Command Service reports lifecycle events to, so the Governor &
/// Circuit Breaker's `metrics_snapshot` query can see command outcomes as
/// they happen (spec §4.4). Optional: a service run without one simply
/// never feeds the breaker, same as a `Governor`-less command service never
/// gets gate 1.
#[async_trait]
pub trait MetricsRecorder: Send + Sync {
    async fn record(&self, sample: MetricsSample);
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("proposal {0} not found")]
    NotFound(ProposalId),
    #[error("illegal transition for proposal {0}: expected PENDING_APPROVAL, found {1:?}")]
    IllegalTransition(ProposalId, ProposalStatus),
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
