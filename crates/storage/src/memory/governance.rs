//! In-memory `GovernanceRepository`.

use crate::repo::{GovernanceRepository, OutcomeSample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roast_schema::{BreakerEventId, CircuitBreakerEvent, CircuitBreakerRule, GovernanceState, MetricsSnapshot};
use std::sync::Mutex;

struct State {
    governance: GovernanceState,
    rules: Vec<CircuitBreakerRule>,
    events: Vec<CircuitBreakerEvent>,
    samples: Vec<OutcomeSample>,
}

pub struct InMemoryGovernanceRepository {
    state: Mutex<State>,
}

impl Default for InMemoryGovernanceRepository {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                governance: GovernanceState::default(),
                rules: Vec::new(),
                events: Vec::new(),
                samples: Vec::new(),
            }),
        }
    }
}

impl InMemoryGovernanceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GovernanceRepository for InMemoryGovernanceRepository {
    async fn get_state(&self) -> anyhow::Result<GovernanceState> {
        Ok(self.state.lock().unwrap().governance.clone())
    }

    async fn set_state(&self, state: GovernanceState) -> anyhow::Result<()> {
        self.state.lock().unwrap().governance = state;
        Ok(())
    }

    async fn list_rules(&self) -> anyhow::Result<Vec<CircuitBreakerRule>> {
        Ok(self.state.lock().unwrap().rules.clone())
    }

    async fn upsert_rule(&self, rule: CircuitBreakerRule) -> anyhow::Result<()> {
        let mut guard = self.state.lock().unwrap();
        if let Some(existing) = guard.rules.iter_mut().find(|r| r.name == rule.name) {
            *existing = rule;
        } else {
            guard.rules.push(rule);
        }
        Ok(())
    }

    async fn record_event(&self, event: CircuitBreakerEvent) -> anyhow::Result<()> {
        self.state.lock().unwrap().events.push(event);
        Ok(())
    }

    async fn list_events(&self) -> anyhow::Result<Vec<CircuitBreakerEvent>> {
        let mut events = self.state.lock().unwrap().events.clone();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(events)
    }

    async fn resolve_event(&self, id: BreakerEventId) -> anyhow::Result<bool> {
        let mut guard = self.state.lock().unwrap();
        if let Some(event) = guard.events.iter_mut().find(|e| e.id == id) {
            event.resolved = true;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn metrics_snapshot(&self, window_seconds: i64, now: DateTime<Utc>) -> anyhow::Result<MetricsSnapshot> {
        let guard = self.state.lock().unwrap();
        let cutoff = now - chrono::Duration::seconds(window_seconds);
        let mut snapshot = MetricsSnapshot::default();
        for sample in guard.samples.iter().filter(|s| s.at >= cutoff) {
            if sample.proposed {
                snapshot.total += 1;
                snapshot.proposed += 1;
            }
            if sample.approved {
                snapshot.approved += 1;
            }
            if sample.rejected {
                snapshot.rejected += 1;
            }
            if sample.succeeded {
                snapshot.succeeded += 1;
            }
            if sample.failed {
                snapshot.failed += 1;
                *snapshot.command_type_failures.entry(sample.command_type).or_insert(0) += 1;
            }
            if sample.rolled_back {
                snapshot.rolled_back += 1;
            }
            if sample.constraint_violation {
                snapshot.constraint_violations += 1;
            }
            if sample.emergency_abort {
                snapshot.emergency_aborts += 1;
            }
            if sample.incident_critical {
                snapshot.incidents_critical += 1;
            }
        }
        Ok(snapshot)
    }

    async fn record_outcome_sample(&self, sample: OutcomeSample) -> anyhow::Result<()> {
        self.state.lock().unwrap().samples.push(sample);
        Ok(())
    }
}
