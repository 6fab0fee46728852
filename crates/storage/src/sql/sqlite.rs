//! SQLite-backed repositories. Same contract as [`crate::sql::postgres`],
//! adapted to SQLite's lack of `SELECT ... FOR UPDATE SKIP LOCKED`: each
//! write path instead runs inside an immediate transaction, which SQLite
//! already serializes at the database-file level.

use crate::repo::{
    apply_transition, CommandProposalRepository, CreateMissionOutcome, GovernanceRepository,
    MachineConfigRepository, MissionMetrics, MissionRepository, OutcomeSample, ProposalTransition,
};
use crate::sql::rows::{
    mission_status_str, parse_mission_status, priority_str, proposal_status_str, proposer_str, MissionRow,
    ProposalRow,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roast_schema::{
    AuditEntry, CircuitBreakerEvent, CircuitBreakerRule, CommandProposal, CommandType, GovernanceState,
    HeuristicsConfig, LeaseId, MachineKey, MetricsSnapshot, Mission, MissionGoal, MissionId, MissionStatus,
    PartialHeuristicsConfig, Priority, ProposalId, ProposalStatus, SessionId,
};
use sqlx::SqlitePool;

pub struct SqliteMissionRepository {
    pool: SqlitePool,
}

impl SqliteMissionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MissionRepository for SqliteMissionRepository {
    async fn create(
        &self,
        goal: MissionGoal,
        priority: Priority,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<CreateMissionOutcome> {
        if let Some(key) = &idempotency_key {
            let existing = sqlx::query_as::<_, MissionRow>(
                "SELECT * FROM missions WHERE idempotency_key = ?",
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = existing {
                return Ok(CreateMissionOutcome { mission: row.into_domain()?, created: false });
            }
        }

        let mission_id = MissionId::new();
        sqlx::query(
            r#"
            INSERT INTO missions (
                mission_id, idempotency_key, goal_json, priority, status,
                attempts, next_run_after, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, 'PENDING', 0, ?, ?, ?)
            "#,
        )
        .bind(mission_id.to_string())
        .bind(&idempotency_key)
        .bind(serde_json::to_string(&goal)?)
        .bind(priority_str(priority))
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let mission = self.get(mission_id).await?.expect("row just inserted");
        Ok(CreateMissionOutcome { mission, created: true })
    }

    async fn get(&self, id: MissionId) -> anyhow::Result<Option<Mission>> {
        let row = sqlx::query_as::<_, MissionRow>("SELECT * FROM missions WHERE mission_id = ?")
            .bind(id.to_string())
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
        let mut tx = self.pool.begin().await?;
        let placeholders = goals.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            r#"
            SELECT * FROM missions
            WHERE status IN ('PENDING', 'RETRY')
              AND next_run_after <= ?
              AND json_extract(goal_json, '$.title') IN ({placeholders})
            ORDER BY
                CASE priority WHEN 'HIGH' THEN 0 WHEN 'MEDIUM' THEN 1 ELSE 2 END,
                created_at ASC,
                mission_id ASC
            LIMIT 1
            "#
        );
        let mut query = sqlx::query_as::<_, MissionRow>(&sql).bind(now);
        for goal in goals {
            query = query.bind(goal);
        }
        let Some(row) = query.fetch_optional(&mut *tx).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        let lease_id = LeaseId::new();
        let expires_at = now + chrono::Duration::seconds(lease_seconds);
        sqlx::query(
            r#"
            UPDATE missions
            SET status = 'LEASED', attempts = attempts + 1,
                lease_id = ?, holder_id = ?, lease_expires_at = ?, updated_at = ?
            WHERE mission_id = ?
            "#,
        )
        .bind(lease_id.to_string())
        .bind(agent_name)
        .bind(expires_at)
        .bind(now)
        .bind(row.mission_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get(MissionId::from_uuid(row.mission_id)).await
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
        let result = sqlx::query(
            r#"
            UPDATE missions
            SET lease_expires_at = ?, updated_at = ?
            WHERE mission_id = ? AND lease_id = ? AND holder_id = ? AND lease_expires_at > ?
            "#,
        )
        .bind(expires_at)
        .bind(now)
        .bind(id.to_string())
        .bind(lease_id.to_string())
        .bind(agent_name)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    async fn complete(&self, id: MissionId, lease_id: LeaseId) -> anyhow::Result<Option<Mission>> {
        let result = sqlx::query(
            r#"
            UPDATE missions
            SET status = 'SUCCEEDED', lease_id = NULL, holder_id = NULL, lease_expires_at = NULL, updated_at = ?
            WHERE mission_id = ? AND lease_id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(id.to_string())
        .bind(lease_id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
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
            "SELECT * FROM missions WHERE mission_id = ? AND lease_id = ?",
        )
        .bind(id.to_string())
        .bind(lease_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        let Some(current) = current else { return Ok(None) };
        let attempts = current.attempts.max(0) as u32;

        if retryable && attempts < policy.max_attempts {
            let backoff_ms = policy.base_backoff_ms * 2i64.pow(attempts.saturating_sub(1));
            let jitter_frac = rand::Rng::gen_range(&mut rand::thread_rng(), -0.25..=0.25);
            let jittered_ms = (backoff_ms as f64 * (1.0 + jitter_frac)).max(0.0) as i64;
            let next_run_after = now + chrono::Duration::milliseconds(jittered_ms);
            sqlx::query(
                r#"
                UPDATE missions
                SET status = 'RETRY', next_run_after = ?, lease_id = NULL, holder_id = NULL,
                    lease_expires_at = NULL, updated_at = ?
                WHERE mission_id = ?
                "#,
            )
            .bind(next_run_after)
            .bind(now)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE missions
                SET status = 'FAILED', lease_id = NULL, holder_id = NULL, lease_expires_at = NULL, updated_at = ?
                WHERE mission_id = ?
                "#,
            )
            .bind(now)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        }
        self.get(id).await
    }

    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Mission>> {
        let stale = sqlx::query_as::<_, MissionRow>(
            "SELECT * FROM missions WHERE status = 'LEASED' AND lease_expires_at <= ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        sqlx::query(
            r#"
            UPDATE missions
            SET status = 'RETRY', next_run_after = ?, lease_id = NULL, holder_id = NULL,
                lease_expires_at = NULL, updated_at = ?
            WHERE status = 'LEASED' AND lease_expires_at <= ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        stale.into_iter().map(MissionRow::into_domain).collect()
    }

    async fn list(&self, status: Option<MissionStatus>) -> anyhow::Result<Vec<Mission>> {
        let rows = match status {
            Some(s) => {
                sqlx::query_as::<_, MissionRow>("SELECT * FROM missions WHERE status = ?")
                    .bind(mission_status_str(s))
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query_as::<_, MissionRow>("SELECT * FROM missions").fetch_all(&self.pool).await?,
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

pub struct SqliteCommandProposalRepository {
    pool: SqlitePool,
}

impl SqliteCommandProposalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommandProposalRepository for SqliteCommandProposalRepository {
    async fn create(&self, proposal: CommandProposal) -> anyhow::Result<CommandProposal> {
        sqlx::query(
            r#"
            INSERT INTO command_proposals (
                proposal_id, command_json, proposer, actor, reasoning, session_id, mission_id,
                status, created_at, approval_required, approval_timeout_seconds, audit_log_json
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(proposal.proposal_id.to_string())
        .bind(serde_json::to_string(&proposal.command)?)
        .bind(proposer_str(proposal.proposer))
        .bind(&proposal.actor)
        .bind(&proposal.reasoning)
        .bind(proposal.session_id.map(|s| s.to_string()))
        .bind(&proposal.mission_id)
        .bind(proposal_status_str(proposal.status))
        .bind(proposal.created_at)
        .bind(proposal.approval_required)
        .bind(proposal.approval_timeout_seconds)
        .bind(serde_json::to_string(&proposal.audit_log)?)
        .execute(&self.pool)
        .await?;
        Ok(proposal)
    }

    async fn get(&self, id: ProposalId) -> anyhow::Result<Option<CommandProposal>> {
        let row = sqlx::query_as::<_, ProposalRow>("SELECT * FROM command_proposals WHERE proposal_id = ?")
            .bind(id.to_string())
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
        let current = sqlx::query_as::<_, ProposalRow>("SELECT * FROM command_proposals WHERE proposal_id = ?")
            .bind(id.to_string())
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
                status = ?, approver = ?, approved_at = ?, rejecter = ?, rejected_at = ?,
                rejection_reason_json = ?, execution_started_at = ?, execution_ended_at = ?,
                duration_ms = ?, outcome_json = ?, audit_log_json = ?
            WHERE proposal_id = ?
            "#,
        )
        .bind(proposal_status_str(proposal.status))
        .bind(&proposal.approver)
        .bind(proposal.approved_at)
        .bind(&proposal.rejecter)
        .bind(proposal.rejected_at)
        .bind(proposal.rejection_reason.as_ref().map(serde_json::to_string).transpose()?)
        .bind(proposal.execution_started_at)
        .bind(proposal.execution_ended_at)
        .bind(proposal.duration_ms)
        .bind(proposal.outcome.as_ref().map(serde_json::to_string).transpose()?)
        .bind(serde_json::to_string(&proposal.audit_log)?)
        .bind(id.to_string())
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
            "SELECT * FROM command_proposals WHERE json_extract(command_json, '$.machine_id') = ? ORDER BY created_at DESC",
        )
        .bind(machine_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ProposalRow::into_domain).collect()
    }

    async fn list_by_session(&self, session_id: SessionId) -> anyhow::Result<Vec<CommandProposal>> {
        let rows = sqlx::query_as::<_, ProposalRow>(
            "SELECT * FROM command_proposals WHERE session_id = ? ORDER BY created_at DESC",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ProposalRow::into_domain).collect()
    }

    async fn sweep_timeouts(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<CommandProposal>> {
        let candidates = sqlx::query_as::<_, ProposalRow>(
            "SELECT * FROM command_proposals WHERE status = 'PENDING_APPROVAL'",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut timed_out = Vec::new();
        for row in candidates {
            let mut proposal = row.into_domain()?;
            let deadline = proposal.created_at + chrono::Duration::seconds(proposal.approval_timeout_seconds);
            if now < deadline {
                continue;
            }
            proposal.status = ProposalStatus::Timeout;
            proposal.audit_log.push(AuditEntry {
                timestamp: now,
                event: "TIMEOUT".to_string(),
                actor: "system".to_string(),
                details: serde_json::json!({}),
            });
            sqlx::query(
                "UPDATE command_proposals SET status = 'TIMEOUT', audit_log_json = ? WHERE proposal_id = ?",
            )
            .bind(serde_json::to_string(&proposal.audit_log)?)
            .bind(proposal.proposal_id.to_string())
            .execute(&self.pool)
            .await?;
            timed_out.push(proposal);
        }
        Ok(timed_out)
    }

    async fn recent_commands(
        &self,
        machine_id: &str,
        command_type: CommandType,
        limit: usize,
    ) -> anyhow::Result<Vec<CommandProposal>> {
        let type_str = serde_json::to_value(command_type)?.as_str().unwrap_or_default().to_string();
        let rows = sqlx::query_as::<_, ProposalRow>(
            r#"
            SELECT * FROM command_proposals
            WHERE json_extract(command_json, '$.machine_id') = ?
              AND json_extract(command_json, '$.command_type') = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(machine_id)
        .bind(type_str)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ProposalRow::into_domain).collect()
    }
}

pub struct SqliteGovernanceRepository {
    pool: SqlitePool,
}

impl SqliteGovernanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GovernanceRepository for SqliteGovernanceRepository {
    async fn get_state(&self) -> anyhow::Result<GovernanceState> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state_json FROM governance_state WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((json,)) => Ok(serde_json::from_str(&json)?),
            None => Ok(GovernanceState::default()),
        }
    }

    async fn set_state(&self, state: GovernanceState) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO governance_state (id, state_json) VALUES (1, ?)
            ON CONFLICT(id) DO UPDATE SET state_json = excluded.state_json
            "#,
        )
        .bind(serde_json::to_string(&state)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_rules(&self) -> anyhow::Result<Vec<CircuitBreakerRule>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT rule_json FROM circuit_breaker_rules ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(|(j,)| Ok(serde_json::from_str(&j)?)).collect()
    }

    async fn upsert_rule(&self, rule: CircuitBreakerRule) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO circuit_breaker_rules (name, rule_json) VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET rule_json = excluded.rule_json
            "#,
        )
        .bind(&rule.name)
        .bind(serde_json::to_string(&rule)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_event(&self, event: CircuitBreakerEvent) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO circuit_breaker_events (id, event_json) VALUES (?, ?)")
            .bind(event.id.to_string())
            .bind(serde_json::to_string(&event)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_events(&self) -> anyhow::Result<Vec<CircuitBreakerEvent>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT event_json FROM circuit_breaker_events ORDER BY id DESC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(|(j,)| Ok(serde_json::from_str(&j)?)).collect()
    }

    async fn resolve_event(&self, id: roast_schema::BreakerEventId) -> anyhow::Result<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT event_json FROM circuit_breaker_events WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        let Some((json,)) = row else { return Ok(false) };
        let mut event: CircuitBreakerEvent = serde_json::from_str(&json)?;
        event.resolved = true;
        sqlx::query("UPDATE circuit_breaker_events SET event_json = ? WHERE id = ?")
            .bind(serde_json::to_string(&event)?)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(true)
    }

    async fn metrics_snapshot(&self, window_seconds: i64, now: DateTime<Utc>) -> anyhow::Result<MetricsSnapshot> {
        let cutoff = now - chrono::Duration::seconds(window_seconds);
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT sample_json FROM metrics_snapshots WHERE sampled_at >= ?")
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?;

        let mut snapshot = MetricsSnapshot::default();
        for (json,) in rows {
            let sample: OutcomeSample = serde_json::from_str(&json)?;
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
        sqlx::query("INSERT INTO metrics_snapshots (sampled_at, sample_json) VALUES (?, ?)")
            .bind(sample.at)
            .bind(serde_json::to_string(&sample)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct SqliteMachineConfigRepository {
    pool: SqlitePool,
}

impl SqliteMachineConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MachineConfigRepository for SqliteMachineConfigRepository {
    async fn get(&self, key: &MachineKey) -> anyhow::Result<Option<HeuristicsConfig>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT config_json FROM machine_configs WHERE org_id = ? AND site_id = ? AND machine_id = ?",
        )
        .bind(&key.org_id)
        .bind(&key.site_id)
        .bind(&key.machine_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(j,)| Ok(serde_json::from_str(&j)?)).transpose()
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
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(org_id, site_id, machine_id)
            DO UPDATE SET config_json = excluded.config_json, updated_at = excluded.updated_at
            "#,
        )
        .bind(&key.org_id)
        .bind(&key.site_id)
        .bind(&key.machine_id)
        .bind(serde_json::to_string(&merged)?)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(merged)
    }

    async fn delete(&self, key: &MachineKey) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "DELETE FROM machine_configs WHERE org_id = ? AND site_id = ? AND machine_id = ?",
        )
        .bind(&key.org_id)
        .bind(&key.site_id)
        .bind(&key.machine_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
