//! The Mission Store (spec §4.3): a lease-based job queue with idempotent
//! creation, heartbeat leases, and retry with exponential backoff.

use chrono::{DateTime, Utc};
use roast_schema::{CreateMissionRequest, LeaseId, Mission, MissionError, MissionId, MissionStatus, RetryPolicy};
use roast_storage::{CreateMissionOutcome, MissionMetrics, MissionRepository};
use std::sync::Arc;

pub struct MissionStore {
    repo: Arc<dyn MissionRepository>,
    retry_policy: RetryPolicy,
}

impl MissionStore {
    pub fn new(repo: Arc<dyn MissionRepository>, retry_policy: RetryPolicy) -> Self {
        Self { repo, retry_policy }
    }

    /// `created=false` iff `idempotencyKey` matched an existing mission
    /// (spec §4.3 `create`: "201 first, 200 thereafter").
    pub async fn create(&self, request: CreateMissionRequest, now: DateTime<Utc>) -> Result<CreateMissionOutcome, MissionError> {
        self.repo
            .create(request.goal, request.priority, request.idempotency_key, now)
            .await
            .map_err(MissionError::Storage)
    }

    /// Highest-priority eligible mission among `goals`, or `None` if none is
    /// claimable right now (spec §4.3 `claim`).
    pub async fn claim(&self, agent_name: &str, goals: &[String], lease_seconds: i64, now: DateTime<Utc>) -> Result<Option<Mission>, MissionError> {
        self.repo.claim_next(agent_name, goals, lease_seconds, now).await.map_err(MissionError::Storage)
    }

    pub async fn heartbeat(&self, id: MissionId, lease_id: LeaseId, agent_name: &str, lease_seconds: i64, now: DateTime<Utc>) -> Result<Mission, MissionError> {
        self.repo
            .heartbeat(id, lease_id, agent_name, lease_seconds, now)
            .await
            .map_err(MissionError::Storage)?
            .ok_or(MissionError::BadLease(id))
    }

    pub async fn complete(&self, id: MissionId, lease_id: LeaseId) -> Result<Mission, MissionError> {
        self.repo.complete(id, lease_id).await.map_err(MissionError::Storage)?.ok_or(MissionError::BadLease(id))
    }

    /// `retryable && attempts < maxAttempts` -> RETRY with jittered
    /// exponential backoff; otherwise FAILED (spec §4.3 `fail`).
    pub async fn fail(&self, id: MissionId, lease_id: LeaseId, error: &str, retryable: bool, now: DateTime<Utc>) -> Result<Mission, MissionError> {
        self.repo
            .fail(id, lease_id, error, retryable, now, self.retry_policy)
            .await
            .map_err(MissionError::Storage)?
            .ok_or(MissionError::BadLease(id))
    }

    pub async fn get(&self, id: MissionId) -> Result<Mission, MissionError> {
        self.repo.get(id).await.map_err(MissionError::Storage)?.ok_or(MissionError::NotFound(id))
    }

    pub async fn list(&self, status: Option<MissionStatus>) -> Result<Vec<Mission>, MissionError> {
        self.repo.list(status).await.map_err(MissionError::Storage)
    }

    pub async fn metrics(&self) -> Result<MissionMetrics, MissionError> {
        self.repo.metrics().await.map_err(MissionError::Storage)
    }

    /// Lease reaper (spec §4.3, §5): every LEASED mission whose lease has
    /// expired is transitioned to RETRY without incrementing `attempts`.
    /// Run on a fixed interval by the hosting process.
    pub async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Mission>, MissionError> {
        self.repo.reap_expired_leases(now).await.map_err(MissionError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roast_schema::{MissionGoal, Priority};
    use roast_storage::memory::InMemoryMissionRepository;

    fn store() -> MissionStore {
        let repo: Arc<dyn MissionRepository> = Arc::new(InMemoryMissionRepository::new());
        MissionStore::new(repo, RetryPolicy::default())
    }

    fn request(title: &str, idempotency_key: Option<&str>) -> CreateMissionRequest {
        CreateMissionRequest {
            goal: MissionGoal { title: title.into(), params: serde_json::json!({}) },
            priority: Priority::Medium,
            idempotency_key: idempotency_key.map(String::from),
        }
    }

    #[tokio::test]
    async fn idempotent_create_returns_same_mission() {
        let store = store();
        let now = Utc::now();
        let first = store.create(request("generate-roast-report", Some("K")), now).await.unwrap();
        let second = store.create(request("generate-roast-report", Some("K")), now).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.mission.mission_id, second.mission.mission_id);
    }

    #[tokio::test]
    async fn lease_retry_scenario_increments_attempts_on_reclaim() {
        let store = store();
        let now = Utc::now();
        store.create(request("generate-roast-report", None), now).await.unwrap();

        let goals = vec!["generate-roast-report".to_string()];
        let claimed = store.claim("worker-1", &goals, 60, now).await.unwrap().expect("should claim");
        assert_eq!(claimed.attempts, 1);

        let lease = claimed.lease.clone().unwrap();
        store.fail(claimed.mission_id, lease.lease_id, "transient", true, now, ).await.unwrap();

        let later = now + chrono::Duration::seconds(2);
        let reclaimed = store.claim("worker-1", &goals, 60, later).await.unwrap().expect("should reclaim");
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn claim_respects_priority_order() {
        let store = store();
        let now = Utc::now();
        store
            .create(
                CreateMissionRequest {
                    goal: MissionGoal { title: "scan".into(), params: serde_json::json!({}) },
                    priority: Priority::Low,
                    idempotency_key: None,
                },
                now,
            )
            .await
            .unwrap();
        store
            .create(
                CreateMissionRequest {
                    goal: MissionGoal { title: "scan".into(), params: serde_json::json!({}) },
                    priority: Priority::High,
                    idempotency_key: None,
                },
                now + chrono::Duration::seconds(1),
            )
            .await
            .unwrap();

        let claimed = store.claim("worker-1", &["scan".to_string()], 60, now + chrono::Duration::seconds(2)).await.unwrap().unwrap();
        assert_eq!(claimed.priority, Priority::High);
    }

    #[tokio::test]
    async fn reaper_retries_expired_lease_without_incrementing_attempts() {
        let store = store();
        let now = Utc::now();
        store.create(request("scan", None), now).await.unwrap();
        let claimed = store.claim("worker-1", &["scan".to_string()], 5, now).await.unwrap().unwrap();
        assert_eq!(claimed.attempts, 1);

        let later = now + chrono::Duration::seconds(10);
        let reaped = store.reap_expired_leases(later).await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].status, MissionStatus::Retry);
        assert_eq!(reaped[0].attempts, 1);
    }
}
