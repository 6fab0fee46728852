//! The Command Service (spec §4.2): propose -> gate pipeline -> persist,
//! then approve/reject/execute lifecycle transitions.

use crate::gates::{check_constraints, check_rate, check_state};
use chrono::{DateTime, Utc};
use roast_schema::{
    AuditEntry, Command, CommandError, CommandProposal, CommandType, CurrentStateProvider, Governor,
    GovernorContext, GovernorDecision, GovernorRequest, MetricsRecorder, MetricsSample, Outcome,
    ProposalId, ProposalStatus, Proposer, ProposeRequest, RecentCommandsProvider, RejectionCode,
    RejectionReason, SessionId,
};
use roast_storage::{CommandProposalRepository, ProposalTransition};
use std::collections::HashMap;
use std::sync::Arc;

/// Adapts the storage-layer `recent_commands` query to the
/// [`RecentCommandsProvider`] trait boundary, so the gate pipeline always
/// talks to the trait and a test can substitute a different source without
/// touching [`CommandService`]'s constructor shape (spec §9 redesign flag).
struct RepoRecentCommandsProvider {
    repo: Arc<dyn CommandProposalRepository>,
}

#[async_trait::async_trait]
impl RecentCommandsProvider for RepoRecentCommandsProvider {
    async fn recent_commands(&self, machine_id: &str, command_type: CommandType, limit: usize) -> Vec<CommandProposal> {
        self.repo.recent_commands(machine_id, command_type, limit).await.unwrap_or_default()
    }
}

pub struct CommandService {
    repo: Arc<dyn CommandProposalRepository>,
    governor: Option<Arc<dyn Governor>>,
    state_provider: Option<Arc<dyn CurrentStateProvider>>,
    recent_commands_provider: Arc<dyn RecentCommandsProvider>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
}

impl CommandService {
    pub fn new(
        repo: Arc<dyn CommandProposalRepository>,
        governor: Option<Arc<dyn Governor>>,
        state_provider: Option<Arc<dyn CurrentStateProvider>>,
        recent_commands_provider: Option<Arc<dyn RecentCommandsProvider>>,
    ) -> Self {
        Self::with_metrics(repo, governor, state_provider, recent_commands_provider, None)
    }

    /// Like [`Self::new`], additionally feeding every lifecycle transition
    /// to a [`MetricsRecorder`] so the Governor & Circuit Breaker's
    /// `metrics_snapshot` can see command outcomes as they happen (spec
    /// §4.4). `metrics` is optional for the same reason `governor` is: a
    /// service run without one simply never feeds the breaker.
    pub fn with_metrics(
        repo: Arc<dyn CommandProposalRepository>,
        governor: Option<Arc<dyn Governor>>,
        state_provider: Option<Arc<dyn CurrentStateProvider>>,
        recent_commands_provider: Option<Arc<dyn RecentCommandsProvider>>,
        metrics: Option<Arc<dyn MetricsRecorder>>,
    ) -> Self {
        let recent_commands_provider =
            recent_commands_provider.unwrap_or_else(|| Arc::new(RepoRecentCommandsProvider { repo: repo.clone() }));
        Self {
            repo,
            governor,
            state_provider,
            recent_commands_provider,
            metrics,
        }
    }

    async fn record_metrics(&self, command_type: CommandType, now: DateTime<Utc>, f: impl FnOnce(&mut MetricsSample)) {
        if let Some(metrics) = &self.metrics {
            let mut sample = MetricsSample::blank(now, command_type);
            f(&mut sample);
            metrics.record(sample).await;
        }
    }

    /// Always returns a fully-formed proposal, even on gate rejection (spec
    /// §4.2 `propose`: "never partial").
    pub async fn propose(&self, request: ProposeRequest, now: DateTime<Utc>) -> Result<CommandProposal, CommandError> {
        let proposed_entry = AuditEntry {
            timestamp: now,
            event: "PROPOSED".to_string(),
            actor: request.actor.clone(),
            details: serde_json::json!({ "reasoning": request.reasoning }),
        };

        let rejection = self.run_gates(&request, now).await;

        let proposal = match rejection {
            None => {
                let approval_required = request.approval_required;
                CommandProposal {
                    proposal_id: ProposalId::new(),
                    command: request.command,
                    proposer: request.proposer,
                    actor: request.actor,
                    reasoning: request.reasoning,
                    session_id: request.session_id,
                    mission_id: request.mission_id,
                    status: if approval_required { ProposalStatus::PendingApproval } else { ProposalStatus::Approved },
                    created_at: now,
                    approval_required,
                    approval_timeout_seconds: request.approval_timeout_seconds,
                    approver: None,
                    approved_at: None,
                    rejecter: None,
                    rejected_at: None,
                    rejection_reason: None,
                    execution_started_at: None,
                    execution_ended_at: None,
                    duration_ms: None,
                    outcome: None,
                    audit_log: vec![proposed_entry],
                }
            }
            Some(reason) => {
                let rejected_entry = AuditEntry {
                    timestamp: now,
                    event: "REJECTED".to_string(),
                    actor: "system".to_string(),
                    details: serde_json::json!({ "code": reason.code, "message": reason.message }),
                };
                CommandProposal {
                    proposal_id: ProposalId::new(),
                    command: request.command,
                    proposer: request.proposer,
                    actor: request.actor,
                    reasoning: request.reasoning,
                    session_id: request.session_id,
                    mission_id: request.mission_id,
                    status: ProposalStatus::Rejected,
                    created_at: now,
                    approval_required: request.approval_required,
                    approval_timeout_seconds: request.approval_timeout_seconds,
                    approver: None,
                    approved_at: None,
                    rejecter: Some("system".to_string()),
                    rejected_at: Some(now),
                    rejection_reason: Some(reason),
                    execution_started_at: None,
                    execution_ended_at: None,
                    duration_ms: None,
                    outcome: None,
                    audit_log: vec![proposed_entry, rejected_entry],
                }
            }
        };

        let command_type = proposal.command.command_type;
        let rejection_code = proposal.rejection_reason.as_ref().map(|r| r.code);
        self.record_metrics(command_type, now, |sample| {
            sample.proposed = true;
            sample.rejected = rejection_code.is_some();
            sample.constraint_violation =
                matches!(rejection_code, Some(RejectionCode::ConstraintViolation) | Some(RejectionCode::RampRate));
            sample.emergency_abort = command_type == CommandType::Abort && rejection_code.is_none();
        })
        .await;

        self.repo.create(proposal).await.map_err(CommandError::Storage)
    }

    async fn run_gates(&self, request: &ProposeRequest, now: DateTime<Utc>) -> Option<RejectionReason> {
        // Gate 1: governor.
        if let Some(governor) = &self.governor {
            let commands_in_session = match request.session_id {
                Some(session_id) => self.repo.list_by_session(session_id).await.unwrap_or_default().len() as u32,
                None => 0,
            };
            let recent_same_type = self
                .recent_commands_provider
                .recent_commands(&request.command.machine_id, request.command.command_type, 20)
                .await;
            let recent_failure_rate = failure_rate(&recent_same_type);

            let governor_request = GovernorRequest {
                command_type: request.command.command_type,
                target_value: request.command.target_value,
                machine_id: request.command.machine_id.clone(),
                session_id: request.session_id,
                actor: request.actor.clone(),
                proposer: request.proposer,
            };
            let context = GovernorContext {
                recent_failure_rate,
                commands_in_session,
            };
            let decision: GovernorDecision = governor.evaluate(&governor_request, &context).await;
            if decision.action == roast_schema::GovernorAction::Block {
                let code = decision.reasons.first().copied().unwrap_or(RejectionCode::OutOfScope);
                return Some(RejectionReason {
                    code,
                    message: format!("blocked by governor ({})", decision.decided_by),
                    details: serde_json::json!({ "confidence": decision.confidence }),
                });
            }
        }

        // Gate 2: constraints.
        if let Err(reason) = check_constraints(&request.command) {
            return Some(reason);
        }

        // Gate 3: current state, only if a provider is wired.
        if let Some(state_provider) = &self.state_provider {
            let state: HashMap<String, bool> = state_provider.current_state(&request.command.machine_id).await;
            if let Err(reason) = check_state(
                request.command.command_type,
                &state,
                &request.command.constraints.require_states,
                &request.command.constraints.forbidden_states,
            ) {
                return Some(reason);
            }
        }

        // Gate 4: rate limiting against recent same-type commands.
        let recent = self
            .recent_commands_provider
            .recent_commands(&request.command.machine_id, request.command.command_type, 20)
            .await;
        if let Err(reason) = check_rate(&request.command, &recent, now) {
            return Some(reason);
        }

        None
    }

    pub async fn approve(&self, id: ProposalId, actor: &str, now: DateTime<Utc>) -> Result<CommandProposal, CommandError> {
        let audit_entry = AuditEntry {
            timestamp: now,
            event: "APPROVED".to_string(),
            actor: actor.to_string(),
            details: serde_json::Value::Null,
        };
        let transition = ProposalTransition::Approve { approver: actor.to_string(), at: now };
        let proposal = self.apply_guarded(id, ProposalStatus::PendingApproval, transition, audit_entry).await?;
        self.record_metrics(proposal.command.command_type, now, |s| s.approved = true).await;
        Ok(proposal)
    }

    pub async fn reject(&self, id: ProposalId, actor: &str, reason: String, now: DateTime<Utc>) -> Result<CommandProposal, CommandError> {
        let rejection_reason = RejectionReason {
            code: RejectionCode::UserRejected,
            message: reason,
            details: serde_json::Value::Null,
        };
        let audit_entry = AuditEntry {
            timestamp: now,
            event: "REJECTED".to_string(),
            actor: actor.to_string(),
            details: serde_json::json!({ "message": rejection_reason.message }),
        };
        let transition = ProposalTransition::Reject { rejecter: actor.to_string(), at: now, reason: rejection_reason };
        self.apply_guarded(id, ProposalStatus::PendingApproval, transition, audit_entry).await
    }

    pub async fn begin_execution(&self, id: ProposalId, now: DateTime<Utc>) -> Result<CommandProposal, CommandError> {
        let audit_entry = AuditEntry {
            timestamp: now,
            event: "EXECUTING".to_string(),
            actor: "system".to_string(),
            details: serde_json::Value::Null,
        };
        self.apply_guarded(id, ProposalStatus::Approved, ProposalTransition::Execute { at: now }, audit_entry).await
    }

    pub async fn complete_execution(&self, id: ProposalId, outcome: Outcome, now: DateTime<Utc>) -> Result<CommandProposal, CommandError> {
        let audit_entry = AuditEntry {
            timestamp: now,
            event: "COMPLETED".to_string(),
            actor: "system".to_string(),
            details: serde_json::json!({ "outcome": outcome }),
        };
        let transition = ProposalTransition::Complete { at: now, outcome };
        let proposal = self.apply_guarded(id, ProposalStatus::Executing, transition, audit_entry).await?;
        self.record_metrics(proposal.command.command_type, now, |s| s.succeeded = true).await;
        Ok(proposal)
    }

    pub async fn fail_execution(&self, id: ProposalId, outcome: Outcome, now: DateTime<Utc>) -> Result<CommandProposal, CommandError> {
        let audit_entry = AuditEntry {
            timestamp: now,
            event: "FAILED".to_string(),
            actor: "system".to_string(),
            details: serde_json::json!({ "outcome": outcome }),
        };
        let transition = ProposalTransition::Fail { at: now, outcome };
        let proposal = self.apply_guarded(id, ProposalStatus::Executing, transition, audit_entry).await?;
        self.record_metrics(proposal.command.command_type, now, |s| s.failed = true).await;
        Ok(proposal)
    }

    pub async fn abort_execution(&self, id: ProposalId, now: DateTime<Utc>) -> Result<CommandProposal, CommandError> {
        let audit_entry = AuditEntry {
            timestamp: now,
            event: "ABORTED".to_string(),
            actor: "system".to_string(),
            details: serde_json::Value::Null,
        };
        let proposal = self.apply_guarded(id, ProposalStatus::Executing, ProposalTransition::Abort { at: now }, audit_entry).await?;
        let command_type = proposal.command.command_type;
        self.record_metrics(command_type, now, |s| {
            s.rolled_back = true;
            s.emergency_abort = command_type == CommandType::Abort;
        })
        .await;
        Ok(proposal)
    }

    async fn apply_guarded(
        &self,
        id: ProposalId,
        expected: ProposalStatus,
        transition: ProposalTransition,
        audit_entry: AuditEntry,
    ) -> Result<CommandProposal, CommandError> {
        match self.repo.transition(id, expected, transition, audit_entry).await.map_err(CommandError::Storage)? {
            None => Err(CommandError::NotFound(id)),
            Some(Err(actual)) => Err(CommandError::IllegalTransition(id, actual)),
            Some(Ok(proposal)) => Ok(proposal),
        }
    }

    pub async fn get(&self, id: ProposalId) -> Result<CommandProposal, CommandError> {
        self.repo.get(id).await.map_err(CommandError::Storage)?.ok_or(CommandError::NotFound(id))
    }

    pub async fn list_pending_approvals(&self) -> Result<Vec<CommandProposal>, CommandError> {
        self.repo.list_pending_approvals().await.map_err(CommandError::Storage)
    }

    pub async fn list_by_machine(&self, machine_id: &str) -> Result<Vec<CommandProposal>, CommandError> {
        self.repo.list_by_machine(machine_id).await.map_err(CommandError::Storage)
    }

    pub async fn list_by_session(&self, session_id: SessionId) -> Result<Vec<CommandProposal>, CommandError> {
        self.repo.list_by_session(session_id).await.map_err(CommandError::Storage)
    }

    /// Approval-timeout sweeper (spec §5): transitions stale
    /// PENDING_APPROVAL proposals to TIMEOUT. Run on a fixed interval by the
    /// hosting process.
    pub async fn sweep_timeouts(&self, now: DateTime<Utc>) -> Result<Vec<CommandProposal>, CommandError> {
        self.repo.sweep_timeouts(now).await.map_err(CommandError::Storage)
    }
}

/// Fraction of `recent` with an `Outcome::Error` status, used as the
/// governor context's `recent_failure_rate` (spec §4.4 governor decision).
fn failure_rate(recent: &[CommandProposal]) -> f64 {
    if recent.is_empty() {
        return 0.0;
    }
    let failures = recent
        .iter()
        .filter(|p| matches!(&p.outcome, Some(o) if o.status == roast_schema::OutcomeStatus::Error))
        .count();
    failures as f64 / recent.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use roast_schema::{Command, CommandConstraints, CommandId, Proposer};
    use roast_storage::memory::InMemoryCommandProposalRepository;

    fn base_request(command_type: CommandType, target_value: Option<f64>) -> ProposeRequest {
        ProposeRequest {
            command: Command {
                command_id: CommandId::new(),
                command_type,
                machine_id: "m1".into(),
                target_value,
                unit: None,
                constraints: CommandConstraints::default(),
            },
            proposer: Proposer::Human,
            actor: "operator-1".into(),
            reasoning: "scheduled adjustment".into(),
            session_id: None,
            mission_id: None,
            approval_required: true,
            approval_timeout_seconds: 300,
        }
    }

    fn service() -> CommandService {
        let repo: Arc<dyn CommandProposalRepository> = Arc::new(InMemoryCommandProposalRepository::new());
        CommandService::new(repo, None, None, None)
    }

    #[tokio::test]
    async fn propose_rejects_out_of_bounds_target() {
        let service = service();
        let request = base_request(CommandType::SetPower, Some(150.0));
        let proposal = service.propose(request, Utc::now()).await.unwrap();
        assert_eq!(proposal.status, ProposalStatus::Rejected);
        assert_eq!(proposal.audit_log.len(), 2);
        assert_eq!(proposal.audit_log[0].event, "PROPOSED");
        assert_eq!(proposal.audit_log[1].event, "REJECTED");
    }

    #[tokio::test]
    async fn propose_admits_valid_command_pending_approval() {
        let service = service();
        let request = base_request(CommandType::SetPower, Some(70.0));
        let proposal = service.propose(request, Utc::now()).await.unwrap();
        assert_eq!(proposal.status, ProposalStatus::PendingApproval);
    }

    #[tokio::test]
    async fn double_approve_fails_loudly() {
        let service = service();
        let request = base_request(CommandType::SetPower, Some(70.0));
        let proposal = service.propose(request, Utc::now()).await.unwrap();
        service.approve(proposal.proposal_id, "operator-1", Utc::now()).await.unwrap();
        let err = service.approve(proposal.proposal_id, "operator-1", Utc::now()).await.unwrap_err();
        assert!(matches!(err, CommandError::IllegalTransition(_, ProposalStatus::Approved)));
    }

    #[tokio::test]
    async fn rate_gate_rejects_rapid_repeat() {
        let service = service();
        let mut request = base_request(CommandType::SetPower, Some(70.0));
        request.command.constraints.min_interval_seconds = Some(10.0);
        let t0 = Utc::now();
        service.propose(request.clone(), t0).await.unwrap();

        let mut second = base_request(CommandType::SetPower, Some(75.0));
        second.command.constraints.min_interval_seconds = Some(10.0);
        let proposal = service.propose(second, t0 + chrono::Duration::seconds(3)).await.unwrap();
        assert_eq!(proposal.status, ProposalStatus::Rejected);
        assert_eq!(proposal.rejection_reason.unwrap().code, RejectionCode::RateLimit);
    }
}
