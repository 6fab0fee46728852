//! The governance HTTP-facing surface (spec §6 "Governance service"):
//! metrics queries, governance-state reads, rule CRUD, breaker-event
//! queries/resolution, and a manual `run_cycle` trigger. Thin wrapper over
//! [`GovernanceRepository`] plus [`CircuitBreaker`] — no business logic
//! beyond what `dsl`/`breaker`/`governor` already implement.

use crate::breaker::CircuitBreaker;
use crate::dsl::validate_rule;
use chrono::{DateTime, Utc};
use roast_schema::{
    BreakerEventId, CircuitBreakerEvent, CircuitBreakerRule, GovernanceError, GovernanceState, MetricsSnapshot,
};
use roast_storage::GovernanceRepository;
use std::sync::Arc;

/// Default window for the readiness-report metrics surface (spec §4.4:
/// "default 30 days for readiness").
pub const READINESS_WINDOW_SECONDS: i64 = 30 * 24 * 60 * 60;
/// Default window for a single weekly rollup.
pub const WEEKLY_WINDOW_SECONDS: i64 = 7 * 24 * 60 * 60;
/// Default window for the breaker's own latest snapshot (spec §4.4: "5
/// min-1h for breaker").
pub const LATEST_WINDOW_SECONDS: i64 = 5 * 60;

pub struct GovernanceService {
    repo: Arc<dyn GovernanceRepository>,
    breaker: CircuitBreaker,
}

impl GovernanceService {
    pub fn new(repo: Arc<dyn GovernanceRepository>) -> Self {
        let breaker = CircuitBreaker::new(repo.clone());
        Self { repo, breaker }
    }

    pub async fn state(&self) -> Result<GovernanceState, GovernanceError> {
        self.repo.get_state().await.map_err(GovernanceError::Storage)
    }

    pub async fn metrics(&self, window_seconds: i64, now: DateTime<Utc>) -> Result<MetricsSnapshot, GovernanceError> {
        self.repo.metrics_snapshot(window_seconds, now).await.map_err(GovernanceError::Storage)
    }

    pub async fn readiness_metrics(&self, now: DateTime<Utc>) -> Result<MetricsSnapshot, GovernanceError> {
        self.metrics(READINESS_WINDOW_SECONDS, now).await
    }

    pub async fn weekly_metrics(&self, now: DateTime<Utc>) -> Result<MetricsSnapshot, GovernanceError> {
        self.metrics(WEEKLY_WINDOW_SECONDS, now).await
    }

    /// Most recent breaker-scale snapshot (`GET /metrics/latest`), the same
    /// window shape the breaker loop itself evaluates rules against.
    pub async fn latest_metrics(&self, now: DateTime<Utc>) -> Result<MetricsSnapshot, GovernanceError> {
        self.metrics(LATEST_WINDOW_SECONDS, now).await
    }

    pub async fn list_rules(&self) -> Result<Vec<CircuitBreakerRule>, GovernanceError> {
        self.repo.list_rules().await.map_err(GovernanceError::Storage)
    }

    /// Patch a rule by name, rejecting it at load time if its condition
    /// doesn't parse (spec §9 redesign flag). The path segment is
    /// authoritative for the rule's identity: a body `name` that disagrees
    /// with the path is overwritten rather than creating a second rule.
    pub async fn upsert_rule(&self, name: &str, mut rule: CircuitBreakerRule) -> Result<CircuitBreakerRule, GovernanceError> {
        rule.name = name.to_string();
        validate_rule(&rule)?;
        self.repo.upsert_rule(rule.clone()).await.map_err(GovernanceError::Storage)?;
        Ok(rule)
    }

    pub async fn list_events(&self) -> Result<Vec<CircuitBreakerEvent>, GovernanceError> {
        self.repo.list_events().await.map_err(GovernanceError::Storage)
    }

    pub async fn resolve_event(&self, id: BreakerEventId) -> Result<(), GovernanceError> {
        if self.repo.resolve_event(id).await.map_err(GovernanceError::Storage)? {
            Ok(())
        } else {
            Err(GovernanceError::EventNotFound(id))
        }
    }

    /// Run one breaker evaluation cycle now (`POST /governance/run-cycle`),
    /// the same unit of work the periodic task drives (spec §4.4).
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<Vec<CircuitBreakerEvent>, GovernanceError> {
        self.breaker.run_cycle(now).await.map_err(GovernanceError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roast_schema::{AlertSeverity, BreakerAction};
    use roast_storage::memory::InMemoryGovernanceRepository;

    fn service() -> GovernanceService {
        let repo: Arc<dyn GovernanceRepository> = Arc::new(InMemoryGovernanceRepository::new());
        GovernanceService::new(repo)
    }

    #[tokio::test]
    async fn upsert_rejects_malformed_condition() {
        let service = service();
        let rule = CircuitBreakerRule {
            name: "bad".to_string(),
            enabled: true,
            condition: "not a valid condition".to_string(),
            window_seconds: 300,
            action: BreakerAction::AlertOnly,
            alert_severity: AlertSeverity::Warning,
            target_command_type: None,
        };
        let err = service.upsert_rule("bad", rule).await.unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidRule(_, _)));
    }

    #[tokio::test]
    async fn resolve_unknown_event_errors() {
        let service = service();
        let err = service.resolve_event(BreakerEventId::new()).await.unwrap_err();
        assert!(matches!(err, GovernanceError::EventNotFound(_)));
    }
}
