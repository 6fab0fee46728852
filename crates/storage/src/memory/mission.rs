//! In-memory `MissionRepository`, the default backend for `cargo run`
//! without a database and for the test suites that exercise spec §8's
//! mission scenarios. Concurrency safety is a single `std::sync::Mutex`
//! guarding the whole map — `claim_next` is already a single critical
//! section here, satisfying spec §5's linearizability requirement without
//! needing row-level locking (that discipline only matters once a real
//! transactional backend is involved).

use crate::repo::{CreateMissionOutcome, MissionMetrics, MissionRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use roast_schema::{LeaseId, Mission, MissionGoal, MissionId, MissionLease, MissionStatus, Priority, RetryPolicy};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryMissionRepository {
    missions: Mutex<HashMap<MissionId, Mission>>,
}

impl InMemoryMissionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MissionRepository for InMemoryMissionRepository {
    async fn create(
        &self,
        goal: MissionGoal,
        priority: Priority,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<CreateMissionOutcome> {
        let mut missions = self.missions.lock().unwrap();

        if let Some(key) = &idempotency_key {
            if let Some(existing) = missions.values().find(|m| m.idempotency_key.as_deref() == Some(key.as_str())) {
                return Ok(CreateMissionOutcome {
                    mission: existing.clone(),
                    created: false,
                });
            }
        }

        let mission = Mission {
            mission_id: MissionId::new(),
            idempotency_key,
            goal,
            priority,
            status: MissionStatus::Pending,
            attempts: 0,
            next_run_after: now,
            lease: None,
            created_at: now,
            updated_at: now,
        };
        missions.insert(mission.mission_id, mission.clone());
        Ok(CreateMissionOutcome { mission, created: true })
    }

    async fn get(&self, id: MissionId) -> anyhow::Result<Option<Mission>> {
        Ok(self.missions.lock().unwrap().get(&id).cloned())
    }

    async fn claim_next(
        &self,
        agent_name: &str,
        goals: &[String],
        lease_seconds: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Mission>> {
        let mut missions = self.missions.lock().unwrap();

        let eligible_id = missions
            .values()
            .filter(|m| {
                matches!(m.status, MissionStatus::Pending | MissionStatus::Retry)
                    && m.next_run_after <= now
                    && goals.iter().any(|g| g == &m.goal.title)
            })
            .min_by(|a, b| {
                // priority desc, then created_at asc, then mission_id asc
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.mission_id.cmp(&b.mission_id))
            })
            .map(|m| m.mission_id);

        let Some(id) = eligible_id else { return Ok(None) };
        let mission = missions.get_mut(&id).expect("id came from this map");

        mission.status = MissionStatus::Leased;
        mission.attempts += 1;
        mission.lease = Some(MissionLease {
            lease_id: LeaseId::new(),
            holder_id: agent_name.to_string(),
            expires_at: now + chrono::Duration::seconds(lease_seconds),
        });
        mission.updated_at = now;
        Ok(Some(mission.clone()))
    }

    async fn heartbeat(
        &self,
        id: MissionId,
        lease_id: LeaseId,
        agent_name: &str,
        lease_seconds: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Mission>> {
        let mut missions = self.missions.lock().unwrap();
        let Some(mission) = missions.get_mut(&id) else { return Ok(None) };

        let valid = mission
            .lease
            .as_ref()
            .is_some_and(|l| l.lease_id == lease_id && l.holder_id == agent_name && l.expires_at > now);
        if !valid {
            return Ok(None);
        }

        if let Some(lease) = mission.lease.as_mut() {
            lease.expires_at = now + chrono::Duration::seconds(lease_seconds);
        }
        mission.updated_at = now;
        Ok(Some(mission.clone()))
    }

    async fn complete(&self, id: MissionId, lease_id: LeaseId) -> anyhow::Result<Option<Mission>> {
        let mut missions = self.missions.lock().unwrap();
        let Some(mission) = missions.get_mut(&id) else { return Ok(None) };

        let valid = mission.lease.as_ref().is_some_and(|l| l.lease_id == lease_id);
        if !valid {
            return Ok(None);
        }

        mission.status = MissionStatus::Succeeded;
        mission.lease = None;
        mission.updated_at = Utc::now();
        Ok(Some(mission.clone()))
    }

    async fn fail(
        &self,
        id: MissionId,
        lease_id: LeaseId,
        _error: &str,
        retryable: bool,
        now: DateTime<Utc>,
        policy: RetryPolicy,
    ) -> anyhow::Result<Option<Mission>> {
        let mut missions = self.missions.lock().unwrap();
        let Some(mission) = missions.get_mut(&id) else { return Ok(None) };

        let valid = mission.lease.as_ref().is_some_and(|l| l.lease_id == lease_id);
        if !valid {
            return Ok(None);
        }

        if retryable && mission.attempts < policy.max_attempts {
            let backoff_ms = policy.base_backoff_ms * 2i64.pow(mission.attempts.saturating_sub(1));
            let jitter_frac = rand::thread_rng().gen_range(-0.25..=0.25);
            let jittered_ms = (backoff_ms as f64 * (1.0 + jitter_frac)).max(0.0) as i64;
            mission.status = MissionStatus::Retry;
            mission.next_run_after = now + chrono::Duration::milliseconds(jittered_ms);
        } else {
            mission.status = MissionStatus::Failed;
        }
        mission.lease = None;
        mission.updated_at = now;
        Ok(Some(mission.clone()))
    }

    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Mission>> {
        let mut missions = self.missions.lock().unwrap();
        let mut reaped = Vec::new();
        for mission in missions.values_mut() {
            if mission.status == MissionStatus::Leased {
                if let Some(lease) = &mission.lease {
                    if lease.expires_at <= now {
                        mission.status = MissionStatus::Retry;
                        mission.next_run_after = now;
                        mission.lease = None;
                        mission.updated_at = now;
                        reaped.push(mission.clone());
                    }
                }
            }
        }
        Ok(reaped)
    }

    async fn list(&self, status: Option<MissionStatus>) -> anyhow::Result<Vec<Mission>> {
        let missions = self.missions.lock().unwrap();
        Ok(missions
            .values()
            .filter(|m| status.map_or(true, |s| m.status == s))
            .cloned()
            .collect())
    }

    async fn metrics(&self) -> anyhow::Result<MissionMetrics> {
        let missions = self.missions.lock().unwrap();
        let mut metrics = MissionMetrics::default();
        for mission in missions.values() {
            match mission.status {
                MissionStatus::Pending => metrics.pending += 1,
                MissionStatus::Leased => metrics.leased += 1,
                MissionStatus::Succeeded => metrics.succeeded += 1,
                MissionStatus::Failed => metrics.failed += 1,
                MissionStatus::Retry => metrics.retry += 1,
            }
        }
        Ok(metrics)
    }
}
