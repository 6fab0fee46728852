//! The Circuit Breaker loop (spec §4.4 "Breaker loop"): evaluates enabled
//! rules against a windowed metrics snapshot and executes the rule's
//! action when its condition fires. Runs as a single periodic task
//! (spec §5); `run_cycle` is the CPU/storage-bound unit of work the hosting
//! process drives on a `tokio::time::interval`.

use crate::dsl::{evaluate, validate_rule};
use chrono::{DateTime, Utc};
use roast_schema::{AutonomyPhase, BreakerAction, BreakerEventId, CircuitBreakerEvent, CircuitBreakerRule, GovernanceState};
use roast_storage::GovernanceRepository;
use std::sync::Arc;

pub struct CircuitBreaker {
    repo: Arc<dyn GovernanceRepository>,
}

impl CircuitBreaker {
    pub fn new(repo: Arc<dyn GovernanceRepository>) -> Self {
        Self { repo }
    }

    /// Evaluate every enabled rule once, firing and persisting an event for
    /// each whose condition matches its own windowed snapshot (spec §4.4:
    /// each rule carries its own `window`). Malformed rules are skipped
    /// with a warning rather than aborting the whole cycle — they should
    /// have been rejected at `upsert_rule` time, so a malformed rule here
    /// indicates stored data predating validation.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<CircuitBreakerEvent>> {
        let rules = self.repo.list_rules().await?;
        let mut fired = Vec::new();

        for rule in rules.into_iter().filter(|r| r.enabled) {
            let parsed = match validate_rule(&rule) {
                Ok(parsed) => parsed,
                Err(err) => {
                    tracing::warn!(rule = %rule.name, error = %err, "skipping malformed circuit breaker rule");
                    continue;
                }
            };

            let snapshot = self.repo.metrics_snapshot(rule.window_seconds, now).await?;
            if !evaluate(&parsed, &snapshot) {
                continue;
            }

            let details = self.apply_action(&rule, now).await?;
            let event = CircuitBreakerEvent {
                id: BreakerEventId::new(),
                timestamp: now,
                rule: rule.clone(),
                metrics: snapshot,
                action: rule.action,
                details,
                resolved: false,
            };
            self.repo.record_event(event.clone()).await?;
            tracing::warn!(rule = %rule.name, action = ?rule.action, "circuit breaker rule fired");
            fired.push(event);
        }

        Ok(fired)
    }

    /// Execute `rule.action`, mutating [`GovernanceState`] where the action
    /// calls for it, and return a human-readable detail string for the
    /// resulting [`CircuitBreakerEvent`].
    async fn apply_action(&self, rule: &CircuitBreakerRule, _now: DateTime<Utc>) -> anyhow::Result<String> {
        match rule.action {
            BreakerAction::RevertToL3 => {
                let mut state = self.repo.get_state().await?;
                state.current_phase = AutonomyPhase::L3;
                state.command_whitelist.clear();
                self.repo.set_state(state).await?;
                tracing::error!(rule = %rule.name, severity = ?rule.alert_severity, "autonomy reverted to L3");
                Ok(format!("rule {:?} reverted autonomy phase to L3 and cleared the command whitelist", rule.name))
            }
            BreakerAction::PauseCommandType => match rule.target_command_type {
                Some(command_type) => {
                    let mut state = self.repo.get_state().await?;
                    state.paused_command_types.insert(command_type);
                    self.repo.set_state(state).await?;
                    Ok(format!("rule {:?} paused command type {command_type:?}", rule.name))
                }
                None => {
                    tracing::warn!(rule = %rule.name, "pause_command_type rule has no target_command_type configured; no types paused");
                    Ok(format!("rule {:?} matched but had no target_command_type configured", rule.name))
                }
            },
            BreakerAction::AlertOnly => {
                tracing::warn!(rule = %rule.name, severity = ?rule.alert_severity, "circuit breaker alert (no state change)");
                Ok(format!("rule {:?} alerted at {:?} severity", rule.name, rule.alert_severity))
            }
        }
    }
}

/// Resume command flow for a previously paused command type. Not driven by
/// any rule action (the DSL only ever sets pauses); exposed for operator
/// use via the governance HTTP surface.
pub async fn unpause_command_type(
    repo: &Arc<dyn GovernanceRepository>,
    command_type: roast_schema::CommandType,
) -> anyhow::Result<GovernanceState> {
    let mut state = repo.get_state().await?;
    state.paused_command_types.remove(&command_type);
    repo.set_state(state.clone()).await?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use roast_schema::AlertSeverity;
    use roast_storage::memory::InMemoryGovernanceRepository;
    use roast_storage::OutcomeSample as StorageOutcomeSample;

    fn rule(name: &str, condition: &str, window_seconds: i64, action: BreakerAction) -> CircuitBreakerRule {
        CircuitBreakerRule {
            name: name.to_string(),
            enabled: true,
            condition: condition.to_string(),
            window_seconds,
            action,
            alert_severity: AlertSeverity::Critical,
            target_command_type: None,
        }
    }

    #[tokio::test]
    async fn high_error_rate_reverts_to_l3() {
        let repo: Arc<dyn GovernanceRepository> = Arc::new(InMemoryGovernanceRepository::new());
        repo.upsert_rule(rule("err-rate", "errorRate > 0.05", 300, BreakerAction::RevertToL3)).await.unwrap();

        let now = Utc::now();
        for _ in 0..1 {
            repo.record_outcome_sample(StorageOutcomeSample {
                at: now,
                command_type: roast_schema::CommandType::SetPower,
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
        }

        let breaker = CircuitBreaker::new(repo.clone());
        let fired = breaker.run_cycle(now).await.unwrap();
        assert_eq!(fired.len(), 1);

        let state = repo.get_state().await.unwrap();
        assert_eq!(state.current_phase, AutonomyPhase::L3);
        assert!(state.command_whitelist.is_empty());
    }

    #[tokio::test]
    async fn clean_metrics_never_fire() {
        let repo: Arc<dyn GovernanceRepository> = Arc::new(InMemoryGovernanceRepository::new());
        repo.upsert_rule(rule("err-rate", "errorRate > 0.05", 300, BreakerAction::RevertToL3)).await.unwrap();

        let breaker = CircuitBreaker::new(repo);
        let fired = breaker.run_cycle(Utc::now()).await.unwrap();
        assert!(fired.is_empty());
    }

    #[tokio::test]
    async fn pause_command_type_only_pauses_target_type() {
        let repo: Arc<dyn GovernanceRepository> = Arc::new(InMemoryGovernanceRepository::new());
        let mut r = rule("set-fan-incidents", "commandType.failures > 2", 300, BreakerAction::PauseCommandType);
        r.target_command_type = Some(roast_schema::CommandType::SetFan);
        repo.upsert_rule(r).await.unwrap();

        let now = Utc::now();
        for _ in 0..3 {
            repo.record_outcome_sample(StorageOutcomeSample {
                at: now,
                command_type: roast_schema::CommandType::SetFan,
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
        }

        let breaker = CircuitBreaker::new(repo.clone());
        let fired = breaker.run_cycle(now).await.unwrap();
        assert_eq!(fired.len(), 1);

        let state = repo.get_state().await.unwrap();
        assert!(state.paused_command_types.contains(&roast_schema::CommandType::SetFan));
        assert!(!state.paused_command_types.contains(&roast_schema::CommandType::SetPower));
    }
}
