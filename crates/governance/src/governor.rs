//! The default [`Governor`] implementation (spec §4.4 "Governor decision"),
//! consulted as gate 1 of the Command Service's pipeline. Read-only and
//! lock-free on the hot path (spec §5): it only reads [`GovernanceState`],
//! never writes it — state transitions are the Breaker's job
//! ([`crate::breaker::CircuitBreaker`]).

use async_trait::async_trait;
use chrono::Utc;
use roast_schema::{GovernanceState, Governor, GovernorAction, GovernorContext, GovernorDecision, GovernorRequest, Proposer, RejectionCode};
use roast_storage::GovernanceRepository;
use std::sync::Arc;

const FAILURE_RATE_CEILING: f64 = 0.2;

pub struct DefaultGovernor {
    repo: Arc<dyn GovernanceRepository>,
}

impl DefaultGovernor {
    pub fn new(repo: Arc<dyn GovernanceRepository>) -> Self {
        Self { repo }
    }

    fn decide(&self, state: &GovernanceState, request: &GovernorRequest, context: &GovernorContext) -> GovernorDecision {
        let now = Utc::now();
        let allow = |reasons: Vec<RejectionCode>| GovernorDecision {
            action: GovernorAction::Allow,
            confidence: 1.0,
            reasons,
            decided_at: now,
            decided_by: "default-governor".to_string(),
        };
        let block = |reason: RejectionCode| GovernorDecision {
            action: GovernorAction::Block,
            confidence: 1.0,
            reasons: vec![reason],
            decided_at: now,
            decided_by: "default-governor".to_string(),
        };

        // Agent-proposed commands on a type the breaker has paused are
        // treated as currently out of the agent's scope (spec §4.4
        // `pause_command_type`; spec §9 redesign flag: per-type, not
        // global, pausing).
        if request.proposer == Proposer::Agent && state.paused_command_types.contains(&request.command_type) {
            return block(RejectionCode::OutOfScope);
        }

        if request.proposer == Proposer::Agent && !state.command_whitelist.contains(&request.command_type) {
            return block(RejectionCode::OutOfScope);
        }

        if request.proposer == Proposer::Agent && context.recent_failure_rate > FAILURE_RATE_CEILING {
            return block(RejectionCode::HighFailureRate);
        }

        allow(Vec::new())
    }
}

#[async_trait]
impl Governor for DefaultGovernor {
    async fn evaluate(&self, request: &GovernorRequest, context: &GovernorContext) -> GovernorDecision {
        // Storage errors fail closed to the default (empty-whitelist L3)
        // state rather than propagating — the `Governor` trait has no
        // `Result` in its signature (spec §9: a single `evaluate` method),
        // and a blocked agent command is always safe to retry once storage
        // recovers.
        let state = self.repo.get_state().await.unwrap_or_default();
        self.decide(&state, request, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roast_schema::{AutonomyPhase, CommandType, SessionId};
    use roast_storage::memory::InMemoryGovernanceRepository;
    use std::collections::HashSet;

    fn request(command_type: CommandType, proposer: Proposer) -> GovernorRequest {
        GovernorRequest {
            command_type,
            target_value: Some(50.0),
            machine_id: "m1".to_string(),
            session_id: Some(SessionId::new()),
            actor: "agent-1".to_string(),
            proposer,
        }
    }

    fn context(recent_failure_rate: f64) -> GovernorContext {
        GovernorContext { recent_failure_rate, commands_in_session: 1 }
    }

    #[tokio::test]
    async fn blocks_agent_command_outside_whitelist() {
        let repo: Arc<dyn GovernanceRepository> = Arc::new(InMemoryGovernanceRepository::new());
        let governor = DefaultGovernor::new(repo);
        let decision = governor.evaluate(&request(CommandType::SetPower, Proposer::Agent), &context(0.0)).await;
        assert_eq!(decision.action, GovernorAction::Block);
        assert_eq!(decision.reasons[0], RejectionCode::OutOfScope);
    }

    #[tokio::test]
    async fn allows_agent_command_within_whitelist() {
        let repo: Arc<dyn GovernanceRepository> = Arc::new(InMemoryGovernanceRepository::new());
        let mut state = GovernanceState { current_phase: AutonomyPhase::L4, ..Default::default() };
        state.command_whitelist = HashSet::from([CommandType::SetPower]);
        repo.set_state(state).await.unwrap();

        let governor = DefaultGovernor::new(repo);
        let decision = governor.evaluate(&request(CommandType::SetPower, Proposer::Agent), &context(0.0)).await;
        assert_eq!(decision.action, GovernorAction::Allow);
    }

    #[tokio::test]
    async fn blocks_on_high_failure_rate_even_if_whitelisted() {
        let repo: Arc<dyn GovernanceRepository> = Arc::new(InMemoryGovernanceRepository::new());
        let mut state = GovernanceState::default();
        state.command_whitelist = HashSet::from([CommandType::SetPower]);
        repo.set_state(state).await.unwrap();

        let governor = DefaultGovernor::new(repo);
        let decision = governor.evaluate(&request(CommandType::SetPower, Proposer::Agent), &context(0.5)).await;
        assert_eq!(decision.action, GovernorAction::Block);
        assert_eq!(decision.reasons[0], RejectionCode::HighFailureRate);
    }

    #[tokio::test]
    async fn human_proposer_bypasses_whitelist_and_failure_rate_gates() {
        let repo: Arc<dyn GovernanceRepository> = Arc::new(InMemoryGovernanceRepository::new());
        let governor = DefaultGovernor::new(repo);
        let decision = governor.evaluate(&request(CommandType::SetPower, Proposer::Human), &context(0.9)).await;
        assert_eq!(decision.action, GovernorAction::Allow);
    }
}
