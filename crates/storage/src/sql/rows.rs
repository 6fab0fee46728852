//! Row <-> domain type mapping shared by the postgres and sqlite backends.
//! Nested structures (goal, lease, audit log, constraints, outcome) are
//! stored as JSON columns, mirroring the teacher's `args: serde_json::Value`
//! column on its `jobs` table (`kernel/job_queue.rs`) rather than exploding
//! every nested field into its own column.

use chrono::{DateTime, Utc};
use roast_schema::{
    AuditEntry, Command, CommandProposal, LeaseId, Mission, MissionGoal, MissionId, MissionLease,
    MissionStatus, Outcome, Priority, ProposalId, ProposalStatus, Proposer, RejectionReason, SessionId,
};
use uuid::Uuid;

#[derive(sqlx::FromRow)]
pub struct MissionRow {
    pub mission_id: Uuid,
    pub idempotency_key: Option<String>,
    pub goal_json: serde_json::Value,
    pub priority: String,
    pub status: String,
    pub attempts: i32,
    pub next_run_after: DateTime<Utc>,
    pub lease_id: Option<Uuid>,
    pub holder_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MissionRow {
    pub fn into_domain(self) -> anyhow::Result<Mission> {
        let goal: MissionGoal = serde_json::from_value(self.goal_json)?;
        let priority = parse_priority(&self.priority)?;
        let status = parse_mission_status(&self.status)?;
        let lease = match (self.lease_id, self.holder_id, self.lease_expires_at) {
            (Some(lease_id), Some(holder_id), Some(expires_at)) => Some(MissionLease {
                lease_id: LeaseId::from_uuid(lease_id),
                holder_id,
                expires_at,
            }),
            _ => None,
        };
        Ok(Mission {
            mission_id: MissionId::from_uuid(self.mission_id),
            idempotency_key: self.idempotency_key,
            goal,
            priority,
            status,
            attempts: self.attempts.max(0) as u32,
            next_run_after: self.next_run_after,
            lease,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub fn priority_str(p: Priority) -> &'static str {
    match p {
        Priority::Low => "LOW",
        Priority::Medium => "MEDIUM",
        Priority::High => "HIGH",
    }
}

pub fn parse_priority(s: &str) -> anyhow::Result<Priority> {
    Ok(match s {
        "LOW" => Priority::Low,
        "MEDIUM" => Priority::Medium,
        "HIGH" => Priority::High,
        other => anyhow::bail!("unknown priority {other:?}"),
    })
}

pub fn mission_status_str(s: MissionStatus) -> &'static str {
    match s {
        MissionStatus::Pending => "PENDING",
        MissionStatus::Leased => "LEASED",
        MissionStatus::Succeeded => "SUCCEEDED",
        MissionStatus::Failed => "FAILED",
        MissionStatus::Retry => "RETRY",
    }
}

pub fn parse_mission_status(s: &str) -> anyhow::Result<MissionStatus> {
    Ok(match s {
        "PENDING" => MissionStatus::Pending,
        "LEASED" => MissionStatus::Leased,
        "SUCCEEDED" => MissionStatus::Succeeded,
        "FAILED" => MissionStatus::Failed,
        "RETRY" => MissionStatus::Retry,
        other => anyhow::bail!("unknown mission status {other:?}"),
    })
}

#[derive(sqlx::FromRow)]
pub struct ProposalRow {
    pub proposal_id: Uuid,
    pub command_json: serde_json::Value,
    pub proposer: String,
    pub actor: String,
    pub reasoning: String,
    pub session_id: Option<Uuid>,
    pub mission_id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub approval_required: bool,
    pub approval_timeout_seconds: i64,
    pub approver: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejecter: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason_json: Option<serde_json::Value>,
    pub execution_started_at: Option<DateTime<Utc>>,
    pub execution_ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub outcome_json: Option<serde_json::Value>,
    pub audit_log_json: serde_json::Value,
}

impl ProposalRow {
    pub fn into_domain(self) -> anyhow::Result<CommandProposal> {
        let command: Command = serde_json::from_value(self.command_json)?;
        let audit_log: Vec<AuditEntry> = serde_json::from_value(self.audit_log_json)?;
        let rejection_reason: Option<RejectionReason> = self
            .rejection_reason_json
            .map(serde_json::from_value)
            .transpose()?;
        let outcome: Option<Outcome> = self.outcome_json.map(serde_json::from_value).transpose()?;

        Ok(CommandProposal {
            proposal_id: ProposalId::from_uuid(self.proposal_id),
            command,
            proposer: parse_proposer(&self.proposer)?,
            actor: self.actor,
            reasoning: self.reasoning,
            session_id: self.session_id.map(SessionId::from_uuid),
            mission_id: self.mission_id,
            status: parse_proposal_status(&self.status)?,
            created_at: self.created_at,
            approval_required: self.approval_required,
            approval_timeout_seconds: self.approval_timeout_seconds,
            approver: self.approver,
            approved_at: self.approved_at,
            rejecter: self.rejecter,
            rejected_at: self.rejected_at,
            rejection_reason,
            execution_started_at: self.execution_started_at,
            execution_ended_at: self.execution_ended_at,
            duration_ms: self.duration_ms,
            outcome,
            audit_log,
        })
    }
}

pub fn proposer_str(p: Proposer) -> &'static str {
    match p {
        Proposer::Agent => "AGENT",
        Proposer::Human => "HUMAN",
    }
}

pub fn parse_proposer(s: &str) -> anyhow::Result<Proposer> {
    Ok(match s {
        "AGENT" => Proposer::Agent,
        "HUMAN" => Proposer::Human,
        other => anyhow::bail!("unknown proposer {other:?}"),
    })
}

pub fn proposal_status_str(s: ProposalStatus) -> &'static str {
    match s {
        ProposalStatus::Proposed => "PROPOSED",
        ProposalStatus::PendingApproval => "PENDING_APPROVAL",
        ProposalStatus::Approved => "APPROVED",
        ProposalStatus::Rejected => "REJECTED",
        ProposalStatus::Executing => "EXECUTING",
        ProposalStatus::Completed => "COMPLETED",
        ProposalStatus::Failed => "FAILED",
        ProposalStatus::Aborted => "ABORTED",
        ProposalStatus::Timeout => "TIMEOUT",
    }
}

pub fn parse_proposal_status(s: &str) -> anyhow::Result<ProposalStatus> {
    Ok(match s {
        "PROPOSED" => ProposalStatus::Proposed,
        "PENDING_APPROVAL" => ProposalStatus::PendingApproval,
        "APPROVED" => ProposalStatus::Approved,
        "REJECTED" => ProposalStatus::Rejected,
        "EXECUTING" => ProposalStatus::Executing,
        "COMPLETED" => ProposalStatus::Completed,
        "FAILED" => ProposalStatus::Failed,
        "ABORTED" => ProposalStatus::Aborted,
        "TIMEOUT" => ProposalStatus::Timeout,
        other => anyhow::bail!("unknown proposal status {other:?}"),
    })
}
