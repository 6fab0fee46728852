//! Repository contracts — one per aggregate (spec §9 redesign flag:
//! "define one storage contract per entity... implemented once per
//! backend"). Kernel crates (`roast-inference`, `roast-missions`,
//! `roast-command`, `roast-governance`) depend only on these traits, never
//! on a concrete backend, so storage engine choice stays a non-goal of the
//! core (spec §1).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roast_schema::{
    CircuitBreakerEvent, CircuitBreakerRule, CommandProposal, CommandType, GovernanceState,
    HeuristicsConfig, MachineKey, MetricsSnapshot, Mission, MissionId, MissionStatus,
    PartialHeuristicsConfig, Priority, ProposalId, ProposalStatus, RejectionReason, SessionId,
};

#[async_trait]
pub trait MachineConfigRepository: Send + Sync {
    async fn get(&self, key: &MachineKey) -> anyhow::Result<Option<HeuristicsConfig>>;
    async fn upsert(
        &self,
        key: &MachineKey,
        partial: &PartialHeuristicsConfig,
        default: &HeuristicsConfig,
    ) -> anyhow::Result<HeuristicsConfig>;
    async fn delete(&self, key: &MachineKey) -> anyhow::Result<bool>;
}

/// Outcome of attempting to create a mission (spec §4.3 `create`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct CreateMissionOutcome {
    pub mission: Mission,
    pub created: bool,
}

#[async_trait]
pub trait MissionRepository: Send + Sync {
    async fn create(
        &self,
        goal: roast_schema::MissionGoal,
        priority: Priority,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<CreateMissionOutcome>;

    async fn get(&self, id: MissionId) -> anyhow::Result<Option<Mission>>;

    /// Atomically select and lease the highest-priority eligible mission
    /// whose goal title is in `goals` (spec §4.3 `claim`: priority desc,
    /// then `createdAt` asc, ties broken by `missionId`).
    async fn claim_next(
        &self,
        agent_name: &str,
        goals: &[String],
        lease_seconds: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Mission>>;

    async fn heartbeat(
        &self,
        id: MissionId,
        lease_id: roast_schema::LeaseId,
        agent_name: &str,
        lease_seconds: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Mission>>;

    async fn complete(
        &self,
        id: MissionId,
        lease_id: roast_schema::LeaseId,
    ) -> anyhow::Result<Option<Mission>>;

    async fn fail(
        &self,
        id: MissionId,
        lease_id: roast_schema::LeaseId,
        error: &str,
        retryable: bool,
        now: DateTime<Utc>,
        policy: roast_schema::RetryPolicy,
    ) -> anyhow::Result<Option<Mission>>;

    /// Reap every LEASED mission whose lease has expired, returning RETRY
    /// without incrementing `attempts` (spec §4.3 "Lease reaper").
    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Mission>>;

    async fn list(&self, status: Option<MissionStatus>) -> anyhow::Result<Vec<Mission>>;

    async fn metrics(&self) -> anyhow::Result<MissionMetrics>;
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MissionMetrics {
    pub pending: u64,
    pub leased: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retry: u64,
}

#[async_trait]
pub trait CommandProposalRepository: Send + Sync {
    /// Atomically insert a fully-formed proposal (already gate-evaluated by
    /// the caller) with its first `PROPOSED` audit entry.
    async fn create(&self, proposal: CommandProposal) -> anyhow::Result<CommandProposal>;

    async fn get(&self, id: ProposalId) -> anyhow::Result<Option<CommandProposal>>;

    /// Guarded status transition: succeeds only if the stored status equals
    /// `expected`. Appends `audit_entry`. Returns `None` if the proposal
    /// doesn't exist, `Some(Err(actual_status))` if `expected` didn't match.
    #[allow(clippy::type_complexity)]
    async fn transition(
        &self,
        id: ProposalId,
        expected: ProposalStatus,
        apply: ProposalTransition,
        audit_entry: roast_schema::AuditEntry,
    ) -> anyhow::Result<Option<Result<CommandProposal, ProposalStatus>>>;

    async fn list_pending_approvals(&self) -> anyhow::Result<Vec<CommandProposal>>;
    async fn list_by_machine(&self, machine_id: &str) -> anyhow::Result<Vec<CommandProposal>>;
    async fn list_by_session(&self, session_id: SessionId) -> anyhow::Result<Vec<CommandProposal>>;

    /// Transition every PENDING_APPROVAL proposal whose `approval_timeout_seconds`
    /// has elapsed since `created_at` to TIMEOUT (spec §5 "approval sweeper").
    async fn sweep_timeouts(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<CommandProposal>>;

    async fn recent_commands(
        &self,
        machine_id: &str,
        command_type: CommandType,
        limit: usize,
    ) -> anyhow::Result<Vec<CommandProposal>>;
}

/// The mutation to apply as part of a guarded proposal transition.
pub enum ProposalTransition {
    Approve { approver: String, at: DateTime<Utc> },
    Reject { rejecter: String, at: DateTime<Utc>, reason: RejectionReason },
    Execute { at: DateTime<Utc> },
    Complete { at: DateTime<Utc>, outcome: roast_schema::Outcome },
    Fail { at: DateTime<Utc>, outcome: roast_schema::Outcome },
    Abort { at: DateTime<Utc> },
}

/// Apply a [`ProposalTransition`] to an in-memory proposal value. Shared by
/// the in-memory backend and every `sqlx` backend (each reads the row,
/// applies the same mutation, then writes the whole row back) so the state
/// machine itself is never duplicated per backend.
pub fn apply_transition(proposal: &mut CommandProposal, apply: ProposalTransition) {
    match apply {
        ProposalTransition::Approve { approver, at } => {
            proposal.status = ProposalStatus::Approved;
            proposal.approver = Some(approver);
            proposal.approved_at = Some(at);
        }
        ProposalTransition::Reject { rejecter, at, reason } => {
            proposal.status = ProposalStatus::Rejected;
            proposal.rejecter = Some(rejecter);
            proposal.rejected_at = Some(at);
            proposal.rejection_reason = Some(reason);
        }
        ProposalTransition::Execute { at } => {
            proposal.status = ProposalStatus::Executing;
            proposal.execution_started_at = Some(at);
        }
        ProposalTransition::Complete { at, outcome } => {
            proposal.status = ProposalStatus::Completed;
            proposal.execution_ended_at = Some(at);
            if let Some(start) = proposal.execution_started_at {
                proposal.duration_ms = Some((at - start).num_milliseconds());
            }
            proposal.outcome = Some(outcome);
        }
        ProposalTransition::Fail { at, outcome } => {
            proposal.status = ProposalStatus::Failed;
            proposal.execution_ended_at = Some(at);
            if let Some(start) = proposal.execution_started_at {
                proposal.duration_ms = Some((at - start).num_milliseconds());
            }
            proposal.outcome = Some(outcome);
        }
        ProposalTransition::Abort { at } => {
            proposal.status = ProposalStatus::Aborted;
            proposal.execution_ended_at = Some(at);
        }
    }
}

#[async_trait]
pub trait GovernanceRepository: Send + Sync {
    async fn get_state(&self) -> anyhow::Result<GovernanceState>;
    async fn set_state(&self, state: GovernanceState) -> anyhow::Result<()>;

    async fn list_rules(&self) -> anyhow::Result<Vec<CircuitBreakerRule>>;
    async fn upsert_rule(&self, rule: CircuitBreakerRule) -> anyhow::Result<()>;

    async fn record_event(&self, event: CircuitBreakerEvent) -> anyhow::Result<()>;
    async fn list_events(&self) -> anyhow::Result<Vec<CircuitBreakerEvent>>;
    async fn resolve_event(&self, id: roast_schema::BreakerEventId) -> anyhow::Result<bool>;

    async fn metrics_snapshot(&self, window_seconds: i64, now: DateTime<Utc>) -> anyhow::Result<MetricsSnapshot>;
    /// Record a command-outcome sample so future `metrics_snapshot` calls
    /// over an overlapping window can see it (in-memory/sqlx backends keep
    /// their own windowed ledger fed by the Command Service).
    async fn record_outcome_sample(&self, sample: OutcomeSample) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OutcomeSample {
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
