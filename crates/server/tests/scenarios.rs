//! End-to-end scenario tests (spec §8 "End-to-end scenarios"), each wiring
//! two or more kernel crates together the way a running deployment would
//! (Governor -> Command Service, Breaker -> Governance State) rather than
//! exercising a single crate in isolation, as the per-crate unit tests do.

use roast_command::CommandService;
use roast_governance::DefaultGovernor;
use roast_schema::{
    AutonomyPhase, Command, CommandConstraints, CommandId, CommandType, GovernanceState, Proposer, ProposeRequest,
    ProposalStatus, RejectionCode,
};
use roast_storage::memory::{InMemoryCommandProposalRepository, InMemoryGovernanceRepository};
use roast_storage::{CommandProposalRepository, GovernanceRepository};
use std::collections::HashSet;
use std::sync::Arc;

fn propose_request(command_type: CommandType, target_value: Option<f64>, proposer: Proposer) -> ProposeRequest {
    ProposeRequest {
        command: Command {
            command_id: CommandId::new(),
            command_type,
            machine_id: "roaster-7".to_string(),
            target_value,
            unit: None,
            constraints: CommandConstraints::default(),
        },
        proposer,
        actor: "agent-autopilot".to_string(),
        reasoning: "scheduled power adjustment".to_string(),
        session_id: None,
        mission_id: None,
        approval_required: true,
        approval_timeout_seconds: 300,
    }
}

/// Scenario 6: "Governor blocks out-of-scope agent command". L3 with an
/// empty whitelist; an AGENT-proposed SET_POWER must be rejected with
/// OUT_OF_SCOPE and an audit log of exactly two entries.
#[tokio::test]
async fn governor_blocks_out_of_scope_agent_command() {
    let governance_repo: Arc<dyn GovernanceRepository> = Arc::new(InMemoryGovernanceRepository::new());
    governance_repo
        .set_state(GovernanceState {
            current_phase: AutonomyPhase::L3,
            command_whitelist: HashSet::new(),
            ..Default::default()
        })
        .await
        .unwrap();

    let governor: Arc<dyn roast_schema::Governor> = Arc::new(DefaultGovernor::new(governance_repo));
    let proposal_repo: Arc<dyn CommandProposalRepository> = Arc::new(InMemoryCommandProposalRepository::new());
    let service = CommandService::new(proposal_repo, Some(governor), None, None);

    let request = propose_request(CommandType::SetPower, Some(60.0), Proposer::Agent);
    let proposal = service.propose(request, chrono::Utc::now()).await.unwrap();

    assert_eq!(proposal.status, ProposalStatus::Rejected);
    assert_eq!(proposal.rejection_reason.unwrap().code, RejectionCode::OutOfScope);
    assert_eq!(proposal.audit_log.len(), 2);
    assert_eq!(proposal.audit_log[0].event, "PROPOSED");
    assert_eq!(proposal.audit_log[1].event, "REJECTED");
}

/// Same governor/state wiring, but a HUMAN proposer bypasses the whitelist
/// gate entirely (spec §4.4 governor rules only fire "if proposer is
/// AGENT").
#[tokio::test]
async fn human_proposer_is_not_blocked_by_out_of_scope_whitelist() {
    let governance_repo: Arc<dyn GovernanceRepository> = Arc::new(InMemoryGovernanceRepository::new());
    governance_repo
        .set_state(GovernanceState {
            current_phase: AutonomyPhase::L3,
            command_whitelist: HashSet::new(),
            ..Default::default()
        })
        .await
        .unwrap();

    let governor: Arc<dyn roast_schema::Governor> = Arc::new(DefaultGovernor::new(governance_repo));
    let proposal_repo: Arc<dyn CommandProposalRepository> = Arc::new(InMemoryCommandProposalRepository::new());
    let service = CommandService::new(proposal_repo, Some(governor), None, None);

    let mut request = propose_request(CommandType::SetPower, Some(60.0), Proposer::Human);
    request.actor = "operator-1".to_string();
    let proposal = service.propose(request, chrono::Utc::now()).await.unwrap();

    assert_eq!(proposal.status, ProposalStatus::PendingApproval);
}

/// Scenario 5 variant exercised at the governance-crate boundary the
/// governance binary actually drives: a fired `revert_to_l3` rule must
/// subsequently cause the *same* governor instance to block agent commands
/// outside the now-empty whitelist, proving the breaker's state mutation is
/// visible to the gate pipeline on the next proposal.
#[tokio::test]
async fn breaker_revert_is_immediately_visible_to_the_governor_gate() {
    let governance_repo: Arc<dyn GovernanceRepository> = Arc::new(InMemoryGovernanceRepository::new());
    governance_repo
        .set_state(GovernanceState {
            current_phase: AutonomyPhase::L4,
            command_whitelist: HashSet::from([CommandType::SetPower]),
            ..Default::default()
        })
        .await
        .unwrap();
    governance_repo
        .upsert_rule(roast_schema::CircuitBreakerRule {
            name: "err-rate".to_string(),
            enabled: true,
            condition: "errorRate > 0.05".to_string(),
            window_seconds: 300,
            action: roast_schema::BreakerAction::RevertToL3,
            alert_severity: roast_schema::AlertSeverity::Critical,
            target_command_type: None,
        })
        .await
        .unwrap();

    let now = chrono::Utc::now();
    governance_repo
        .record_outcome_sample(roast_storage::OutcomeSample {
            at: now,
            command_type: CommandType::SetPower,
            proposed: true,
            approved: true,
            rejected: false,
            succeeded: false,
            failed: true,
            rolled_back: false,
            constraint_violation: false,
            emergency_abort: false,
            incident_critical: false,
        })
        .await
        .unwrap();

    let governor: Arc<dyn roast_schema::Governor> = Arc::new(DefaultGovernor::new(governance_repo.clone()));
    let proposal_repo: Arc<dyn CommandProposalRepository> = Arc::new(InMemoryCommandProposalRepository::new());
    let service = CommandService::new(proposal_repo, Some(governor), None, None);

    // Before the breaker runs, SET_POWER is whitelisted and allowed.
    let allowed = service.propose(propose_request(CommandType::SetPower, Some(60.0), Proposer::Agent), now).await.unwrap();
    assert_eq!(allowed.status, ProposalStatus::PendingApproval);

    let breaker = roast_governance::CircuitBreaker::new(governance_repo);
    let fired = breaker.run_cycle(now).await.unwrap();
    assert_eq!(fired.len(), 1);

    // After the revert, the same command type is now out of scope.
    let blocked = service.propose(propose_request(CommandType::SetPower, Some(60.0), Proposer::Agent), now).await.unwrap();
    assert_eq!(blocked.status, ProposalStatus::Rejected);
    assert_eq!(blocked.rejection_reason.unwrap().code, RejectionCode::OutOfScope);
}

/// Same revert-visibility scenario as above, but fed entirely through the
/// `CommandService` -> `MetricsRecorder` -> `GovernanceRepository` path a
/// running deployment actually uses, instead of a hand-assembled
/// `OutcomeSample` (spec §4.4: metrics are "derived from Command Service
/// audit log and outcome records").
#[tokio::test]
async fn command_failures_feed_the_breaker_through_the_metrics_recorder() {
    let governance_repo: Arc<dyn GovernanceRepository> = Arc::new(InMemoryGovernanceRepository::new());
    governance_repo
        .set_state(GovernanceState {
            current_phase: AutonomyPhase::L4,
            command_whitelist: HashSet::from([CommandType::SetFan]),
            ..Default::default()
        })
        .await
        .unwrap();
    governance_repo
        .upsert_rule(roast_schema::CircuitBreakerRule {
            name: "set-fan-errors".to_string(),
            enabled: true,
            condition: "errorRate > 0.05".to_string(),
            window_seconds: 300,
            action: roast_schema::BreakerAction::RevertToL3,
            alert_severity: roast_schema::AlertSeverity::Critical,
            target_command_type: None,
        })
        .await
        .unwrap();

    let governor: Arc<dyn roast_schema::Governor> = Arc::new(DefaultGovernor::new(governance_repo.clone()));
    let metrics: Arc<dyn roast_schema::MetricsRecorder> =
        Arc::new(roast_server::kernel::GovernanceMetricsRecorder::new(governance_repo.clone()));
    let proposal_repo: Arc<dyn CommandProposalRepository> = Arc::new(InMemoryCommandProposalRepository::new());
    let service = CommandService::with_metrics(proposal_repo, Some(governor), None, None, Some(metrics));

    let now = chrono::Utc::now();
    let mut request = propose_request(CommandType::SetFan, Some(5.0), Proposer::Human);
    request.approval_required = false;
    let proposal = service.propose(request, now).await.unwrap();
    assert_eq!(proposal.status, ProposalStatus::Approved);

    service.begin_execution(proposal.proposal_id, now).await.unwrap();
    service
        .fail_execution(
            proposal.proposal_id,
            roast_schema::Outcome { status: roast_schema::OutcomeStatus::Error, actual_value: None, telemetry_changes: serde_json::json!({}), error_code: Some("actuator-fault".to_string()) },
            now,
        )
        .await
        .unwrap();

    let breaker = roast_governance::CircuitBreaker::new(governance_repo.clone());
    let fired = breaker.run_cycle(now).await.unwrap();
    assert_eq!(fired.len(), 1);

    let state = governance_repo.get_state().await.unwrap();
    assert_eq!(state.current_phase, AutonomyPhase::L3);
}
