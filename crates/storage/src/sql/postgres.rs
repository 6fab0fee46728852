//! Postgres-backed repositories, grounded on the teacher's
//! `kernel/job_queue.rs` (`sqlx::query_as::<_, Job>` runtime-checked
//! queries against a `PgPool`, never the compile-time `query_as!` macro,
//! so this crate never needs a live `DATABASE_URL` to build).

use crate::repo::{
    apply_transition, CommandProposalRepository, CreateMissionOutcome, GovernanceRepository,
    MachineConfigRepository, MissionMetrics, MissionRepository, OutcomeSample, ProposalTransition,
};
use crate::sql::rows::{
    mission_status_str, parse_mission_status, parse_priority, priority_str, proposal_status_str,
    proposer_str, MissionRow, ProposalRow,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roast_schema::{
    AuditEntry, CircuitBreakerEvent, CircuitBreakerRule, CommandProposal, CommandType, GovernanceState,
    HeuristicsConfig, LeaseId, MachineKey, MetricsSnapshot, Mission, MissionGoal, MissionId, MissionStatus,
    PartialHeuristicsConfig, Priority, ProposalId, ProposalStatus, SessionId,
};
use sqlx::PgPool;

pub struct PostgresMissionRepository {
    pool: PgPool,
}

impl PostgresMissionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MissionRepository for PostgresMissionRepository {
    async fn create(
        &self,
        goal: MissionGoal,
        priority: Priority,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<CreateMissionOutcome> {
        if let Some(key) = &idempotency_key {
            let existing = sqlx::query_as::<_, MissionRow>(
                "SELECT * FROM missions WHERE idempotency_key = $1",
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = existing {
                return Ok(CreateMissionOutcome { mission: row.into_domain()?, created: false });
            }
        }

        let mission_id = MissionId::new();
        let row = sqlx::query_as::<_, MissionRow>(
            r#"
            INSERT INTO missions (
                mission_id, idempotency_key, goal_json, priority, status,
                attempts, next_run_after, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, 'PENDING', 0, $5, $6, $6)
            RETURNING *
            "#,
        )
        .bind(mission_id.into_uuid())
        .bind(&idempotency_key)
        .bind(serde_json::to_value(&goal)?)
        .bind(priority_str(priority))
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(CreateMissionOutcome { mission: row.into_domain()?, created: true })
    }

    async fn get(&self, id: MissionId) -> anyhow::Result<Option<Mission>> {
        let row = sqlx::query_as::<_, MissionRow>("SELECT * FROM missions WHERE mission_id = $1")
            .bind(id.into_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(MissionRow::into_domain).transpose()
    }

    async fn claim_next(
        &self,
        agent_name: &str,
        goals: &[String],
        lease_seconds: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Mission>> {
        // Select-for-update-skip-locked then update, in one statement, so
        // two concurrent claims can never return the same mission
        // (spec §5's linearizability requirement for `claim`).
        let lease_id = LeaseId::new();
        let expires_at = now + chrono::Duration::seconds(lease_seconds);

        let row = sqlx::query_as::<_, MissionRow>(
            r#"
            UPDATE missions
            SET status = 'LEASED',
                attempts = attempts + 1,
                lease_id = $1,
                holder_id = $2,
                lease_expires_at = $3,
                updated_at = $4
            WHERE mission_id = (
                SELECT mission_id FROM missions
                WHERE status IN ('PENDING', 'RETRY')
                  AND next_run_after <= $4
                  AND (goal_json->>'title') = ANY($5)
                ORDER BY
                    CASE priority WHEN 'HIGH' THEN 0 WHEN 'MEDIUM' THEN 1 ELSE 2 END,
                    created_at ASC,
                    mission_id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(lease_id.into_uuid())
        .bind(agent_name)
        .bind(expires_at)
        .bind(now)
        .bind(goals)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MissionRow::into_domain).transpose()
    }

    async fn heartbeat(
        &self,
        id: MissionId,
        lease_id: LeaseId,
        agent_name: &str,
        lease_seconds: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Mission>> {
        let expires_at = now + chrono::Duration::seconds(lease_seconds);
        let row = sqlx::query_as::<_, MissionRow>(
            r#"
            UPDATE missions
            SET lease_expires_at = $1, updated_at = $2
            WHERE mission_id = $3 AND lease_id = $4 AND holder_id = $5 AND lease_expires_at > $2
            RETURNING *
            "#,
        )
        .bind(expires_at)
        .bind(now)
        .bind(id.into_uuid())
        .bind(lease_id.into_uuid())
        .bind(agent_name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(MissionRow::into_domain).transpose()
    }

    async fn complete(&self, id: MissionId, lease_id: LeaseId) -> anyhow::Result<Option<Mission>> {
        let row = sqlx::query_as::<_, MissionRow>(
            r#"
            UPDATE missions
            SET status = 'SUCCEEDED', lease_id = NULL, holder_id = NULL, lease_expires_at = NULL, updated_at = now()
            WHERE mission_id = $1 AND lease_id = $2
            RETURNING *
            "#,
        )
        .bind(id.into_uuid())
        .bind(lease_id.into_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(MissionRow::into_domain).transpose()
    }

    async fn fail(
        &self,
        id: MissionId,
        lease_id: LeaseId,
        _error: &str,
        retryable: bool,
        now: DateTime<Utc>,
        policy: roast_schema::RetryPolicy,
    ) -> anyhow::Result<Option<Mission>> {
        let current = sqlx::query_as::<_, MissionRow>(
            "SELECT * FROM missions WHERE mission_id = $1 AND lease_id = $2",
        )
        .bind(id.into_uuid())
        .bind(lease_id.into_uuid())
        .fetch_optional(&self.pool)
        .await?;
        let Some(current) = current else { return Ok(None) };
        let attempts = current.attempts.max(0) as u32;

        if retryable && attempts < policy.max_attempts {
            let backoff_ms = policy.base_backoff_ms * 2i64.pow(attempts.saturating_sub(1));
            let jitter_frac = rand::Rng::gen_range(&mut rand::thread_rng(), -0.25..=0.25);
            let jittered_ms = (backoff_ms as f64 * (1.0 + jitter_frac)).max(0.0) as i64;
            let next_run_after = now + chrono::Duration::milliseconds(jittered_ms);

            let row = sqlx::query_as::<_, MissionRow>(
                r#"
                UPDATE missions
                SET status = 'RETRY', next_run_after = $1, lease_id = NULL, holder_id = NULL,
                    lease_expires_at = NULL, updated_at = $2
                WHERE mission_id = $3
                RETURNING *
                "#,
            )
            .bind(next_run_after)
            .bind(now)
            .bind(id.into_uuid())
            .fetch_optional(&self.pool)
            .await?;
            row.map(MissionRow::into_domain).transpose()
        } else {
            let row = sqlx::query_as::<_, MissionRow>(
                r#"
                UPDATE missions
                SET status = 'FAILED', lease_id = NULL, holder_id = NULL, lease_expires_at = NULL, updated_at = $1
                WHERE mission_id = $2
                RETURNING *
                "#,
            )
            .bind(now)
            .bind(id.into_uuid())
            .fetch_optional(&self.pool)
            .await?;
            row.map(MissionRow::into_domain).transpose()
        }
    }

    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Mission>> {
        let rows = sqlx::query_as::<_, MissionRow>(
            r#"
            UPDATE missions
            SET status = 'RETRY', next_run_after = $1, lease_id = NULL, holder_id = NULL,
                lease_expires_at = NULL, updated_at = $1
            WHERE status = 'LEASED' AND lease_expires_at <= $1
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MissionRow::into_domain).collect()
    }

    async fn list(&self, status: Option<MissionStatus>) -> anyhow::Result<Vec<Mission>> {
        let rows = match status {
            Some(s) => {
                sqlx::query_as::<_, MissionRow>("SELECT * FROM missions WHERE status = $1")
                    .bind(mission_status_str(s))
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as::<_, MissionRow>("SELECT * FROM missions")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(MissionRow::into_domain).collect()
    }

    async fn metrics(&self) -> anyhow::Result<MissionMetrics> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM missions GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let mut metrics = MissionMetrics::default();
        for (status, count) in rows {
            match parse_mission_status(&status)? {
                MissionStatus::Pending => metrics.pending = count as u64,
                MissionStatus::Leased => metrics.leased = count as u64,
                MissionStatus::Succeeded => metrics.succeeded = count as u64,
                MissionStatus::Failed => metrics.failed = count as u64,
                MissionStatus::Retry => metrics.retry = count as u64,
            }
        }
        Ok(metrics)
    }
}

pub struct PostgresCommandProposalRepository {
    pool: PgPool,
}

impl PostgresCommandProposalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommandProposalRepository for PostgresCommandProposalRepository {
    async fn create(&self, proposal: CommandProposal) -> anyhow::Result<CommandProposal> {
        sqlx::query(
            r#"
            INSERT INTO command_proposals (
                proposal_id, command_json, proposer, actor, reasoning, session_id, mission_id,
                status, created_at, approval_required, approval_timeout_seconds, audit_log_json
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(proposal.proposal_id.into_uuid())
        .bind(serde_json::to_value(&proposal.command)?)
        .bind(proposer_str(proposal.proposer))
        .bind(&proposal.actor)
        .bind(&proposal.reasoning)
        .bind(proposal.session_id.map(|s| s.into_uuid()))
        .bind(&proposal.mission_id)
        .bind(proposal_status_str(proposal.status))
        .bind(proposal.created_at)
        .bind(proposal.approval_required)
        .bind(proposal.approval_timeout_seconds)
        .bind(serde_json::to_value(&proposal.audit_log)?)
        .execute(&self.pool)
        .await?;
        Ok(proposal)
    }

    async fn get(&self, id: ProposalId) -> anyhow::Result<Option<CommandProposal>> {
        let row = sqlx::query_as::<_, ProposalRow>(
            "SELECT * FROM command_proposals WHERE proposal_id = $1",
        )
        .bind(id.into_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(ProposalRow::into_domain).transpose()
    }

    async fn transition(
        &self,
        id: ProposalId,
        expected: ProposalStatus,
        apply: ProposalTransition,
        audit_entry: AuditEntry,
    ) -> anyhow::Result<Option<Result<CommandProposal, ProposalStatus>>> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, ProposalRow>(
            "SELECT * FROM command_proposals WHERE proposal_id = $1 FOR UPDATE",
        )
        .bind(id.into_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(current) = current else {
            tx.rollback().await?;
            return Ok(None);
        };
        let mut proposal = current.into_domain()?;

        if proposal.status != expected {
            tx.rollback().await?;
            return Ok(Some(Err(proposal.status)));
        }

        apply_transition(&mut proposal, apply);
        proposal.audit_log.push(audit_entry);

        sqlx::query(
            r#"
            UPDATE command_proposals SET
                status = $1, approver = $2, approved_at = $3, rejecter = $4, rejected_at = $5,
                rejection_reason_json = $6, execution_started_at = $7, execution_ended_at = $8,
                duration_ms = $9, outcome_json = $10, audit_log_json = $11
            WHERE proposal_id = $12
            "#,
        )
        .bind(proposal_status_str(proposal.status))
        .bind(&proposal.approver)
        .bind(proposal.approved_at)
        .bind(&proposal.rejecter)
        .bind(proposal.rejected_at)
        .bind(proposal.rejection_reason.as_ref().map(serde_json::to_value).transpose()?)
        .bind(proposal.execution_started_at)
        .bind(proposal.execution_ended_at)
        .bind(proposal.duration_ms)
        .bind(proposal.outcome.as_ref().map(serde_json::to_value).transpose()?)
        .bind(serde_json::to_value(&proposal.audit_log)?)
        .bind(id.into_uuid())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(Ok(proposal)))
    }

    async fn list_pending_approvals(&self) -> anyhow::Result<Vec<CommandProposal>> {
        let rows = sqlx::query_as::<_, ProposalRow>(
            "SELECT * FROM command_proposals WHERE status = 'PENDING_APPROVAL' ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ProposalRow::into_domain).collect()
    }

    async fn list_by_machine(&self, machine_id: &str) -> anyhow::Result<Vec<CommandProposal>> {
        let rows = sqlx::query_as::<_, ProposalRow>(
            "SELECT * FROM command_proposals WHERE command_json->>'machine_id' = $1 ORDER BY created_at DESC",
        )
        .bind(machine_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ProposalRow::into_domain).collect()
    }

    async fn list_by_session(&self, session_id: SessionId) -> anyhow::Result<Vec<CommandProposal>> {
        let rows = sqlx::query_as::<_, ProposalRow>(
            "SELECT * FROM command_proposals WHERE session_id = $1 ORDER BY created_at DESC",
        )
        .bind(session_id.into_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ProposalRow::into_domain).collect()
    }

    async fn sweep_timeouts(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<CommandProposal>> {
        let rows = sqlx::query_as::<_, ProposalRow>(
            r#"
            UPDATE command_proposals
            SET status = 'TIMEOUT',
                audit_log_json = audit_log_json || jsonb_build_array(
                    jsonb_build_object('timestamp', $1, 'event', 'TIMEOUT', 'actor', 'system', 'details', '{}'::jsonb)
                )
            WHERE status = 'PENDING_APPROVAL'
              AND created_at + (approval_timeout_seconds || ' seconds')::interval <= $1
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ProposalRow::into_domain).collect()
    }

    async fn recent_commands(
        &self,
        machine_id: &str,
        command_type: CommandType,
        limit: usize,
    ) -> anyhow::Result<Vec<CommandProposal>> {
        let rows = sqlx::query_as::<_, ProposalRow>(
            r#"
            SELECT * FROM command_proposals
            WHERE command_json->>'machine_id' = $1 AND command_json->>'command_type' = $2
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(machine_id)
        .bind(serde_json::to_value(command_type)?.as_str().unwrap_or_default())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ProposalRow::into_domain).collect()
    }
}

pub struct PostgresGovernanceRepository {
    pool: PgPool,
}

impl PostgresGovernanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GovernanceRepository for PostgresGovernanceRepository {
    async fn get_state(&self) -> anyhow::Result<GovernanceState> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT state_json FROM governance_state WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((json,)) => Ok(serde_json::from_value(json)?),
            None => Ok(GovernanceState::default()),
        }
    }

    async fn set_state(&self, state: GovernanceState) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO governance_state (id, state_json) VALUES (1, $1)
            ON CONFLICT (id) DO UPDATE SET state_json = EXCLUDED.state_json
            "#,
        )
        .bind(serde_json::to_value(&state)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_rules(&self) -> anyhow::Result<Vec<CircuitBreakerRule>> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT rule_json FROM circuit_breaker_rules ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(|(j,)| Ok(serde_json::from_value(j)?)).collect()
    }

    async fn upsert_rule(&self, rule: CircuitBreakerRule) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO circuit_breaker_rules (name, rule_json) VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET rule_json = EXCLUDED.rule_json
            "#,
        )
        .bind(&rule.name)
        .bind(serde_json::to_value(&rule)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_event(&self, event: CircuitBreakerEvent) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO circuit_breaker_events (id, event_json) VALUES ($1, $2)")
            .bind(event.id.into_uuid())
            .bind(serde_json::to_value(&event)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_events(&self) -> anyhow::Result<Vec<CircuitBreakerEvent>> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT event_json FROM circuit_breaker_events ORDER BY id DESC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(|(j,)| Ok(serde_json::from_value(j)?)).collect()
    }

    async fn resolve_event(&self, id: roast_schema::BreakerEventId) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE circuit_breaker_events SET event_json = jsonb_set(event_json, '{resolved}', 'true') WHERE id = $1",
        )
        .bind(id.into_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn metrics_snapshot(&self, window_seconds: i64, now: DateTime<Utc>) -> anyhow::Result<MetricsSnapshot> {
        let cutoff = now - chrono::Duration::seconds(window_seconds);
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT sample_json FROM metrics_snapshots WHERE sampled_at >= $1")
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?;

        let mut snapshot = MetricsSnapshot::default();
        for (json,) in rows {
            let sample: OutcomeSample = serde_json::from_value(json)?;
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
        sqlx::query("INSERT INTO metrics_snapshots (sampled_at, sample_json) VALUES ($1, $2)")
            .bind(sample.at)
            .bind(serde_json::to_value(&sample)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct PostgresMachineConfigRepository {
    pool: PgPool,
}

impl PostgresMachineConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MachineConfigRepository for PostgresMachineConfigRepository {
    async fn get(&self, key: &MachineKey) -> anyhow::Result<Option<HeuristicsConfig>> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as(
            "SELECT config_json FROM machine_configs WHERE org_id = $1 AND site_id = $2 AND machine_id = $3",
        )
        .bind(&key.org_id)
        .bind(&key.site_id)
        .bind(&key.machine_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(j,)| Ok(serde_json::from_value(j)?)).transpose()
    }

    async fn upsert(
        &self,
        key: &MachineKey,
        partial: &PartialHeuristicsConfig,
        default: &HeuristicsConfig,
    ) -> anyhow::Result<HeuristicsConfig> {
        let existing = self.get(key).await?.unwrap_or_else(|| default.clone());
        let merged = existing.merged_with(partial);
        sqlx::query(
            r#"
            INSERT INTO machine_configs (org_id, site_id, machine_id, config_json, created_at, updated_at)
            VALUES ($1, $2, $3, $4, now(), now())
            ON CONFLICT (org_id, site_id, machine_id)
            DO UPDATE SET config_json = EXCLUDED.config_json, updated_at = now()
            "#,
        )
        .bind(&key.org_id)
        .bind(&key.site_id)
        .bind(&key.machine_id)
        .bind(serde_json::to_value(&merged)?)
        .execute(&self.pool)
        .await?;
        Ok(merged)
    }

    async fn delete(&self, key: &MachineKey) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "DELETE FROM machine_configs WHERE org_id = $1 AND site_id = $2 AND machine_id = $3",
        )
        .bind(&key.org_id)
        .bind(&key.site_id)
        .bind(&key.machine_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
