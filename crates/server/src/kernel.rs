//! Per-binary dependency containers (spec §6, SPEC_FULL §2 "Dependency
//! injection"), following the teacher's `kernel/deps.rs` `ServerDeps`
//! pattern: one explicit struct per binary built at startup from `Config`,
//! never a global singleton.

use crate::config::{Config, DatabaseType};
use anyhow::{Context, Result};
use roast_storage::{CommandProposalRepository, GovernanceRepository, MachineConfigRepository, MissionRepository};
use std::sync::Arc;

/// Adapts a [`GovernanceRepository`] to the [`roast_schema::MetricsRecorder`]
/// boundary the Command Service depends on (spec §4.4: the breaker's metrics
/// snapshot is derived from command-service outcome records). Lets the two
/// services share one governance backend without `roast-command` depending
/// on `roast-storage`'s `GovernanceRepository` trait directly.
pub struct GovernanceMetricsRecorder {
    repo: Arc<dyn GovernanceRepository>,
}

impl GovernanceMetricsRecorder {
    pub fn new(repo: Arc<dyn GovernanceRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait::async_trait]
impl roast_schema::MetricsRecorder for GovernanceMetricsRecorder {
    async fn record(&self, sample: roast_schema::MetricsSample) {
        let outcome_sample = roast_storage::OutcomeSample {
            at: sample.at,
            command_type: sample.command_type,
            proposed: sample.proposed,
            approved: sample.approved,
            rejected: sample.rejected,
            succeeded: sample.succeeded,
            failed: sample.failed,
            rolled_back: sample.rolled_back,
            constraint_violation: sample.constraint_violation,
            emergency_abort: sample.emergency_abort,
            incident_critical: sample.incident_critical,
        };
        if let Err(err) = self.repo.record_outcome_sample(outcome_sample).await {
            tracing::warn!(error = %err, "failed to record command outcome sample for governance metrics");
        }
    }
}

/// Build the machine-config repository selected by `config.database_type`.
pub async fn build_config_repo(config: &Config) -> Result<Arc<dyn MachineConfigRepository>> {
    match config.database_type {
        DatabaseType::Memory => Ok(Arc::new(roast_storage::memory::InMemoryMachineConfigRepository::new())),
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            let pool = connect_postgres(config).await?;
            Ok(Arc::new(roast_storage::sql::postgres::PostgresMachineConfigRepository::new(pool)))
        }
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => {
            let pool = connect_sqlite(config).await?;
            Ok(Arc::new(roast_storage::sql::sqlite::SqliteMachineConfigRepository::new(pool)))
        }
        #[cfg(not(feature = "postgres"))]
        DatabaseType::Postgres => anyhow::bail!("DATABASE_TYPE=postgres but this binary was built without the \"postgres\" feature"),
        #[cfg(not(feature = "sqlite"))]
        DatabaseType::Sqlite => anyhow::bail!("DATABASE_TYPE=sqlite but this binary was built without the \"sqlite\" feature"),
    }
}

pub async fn build_mission_repo(config: &Config) -> Result<Arc<dyn MissionRepository>> {
    match config.database_type {
        DatabaseType::Memory => Ok(Arc::new(roast_storage::memory::InMemoryMissionRepository::new())),
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            let pool = connect_postgres(config).await?;
            Ok(Arc::new(roast_storage::sql::postgres::PostgresMissionRepository::new(pool)))
        }
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => {
            let pool = connect_sqlite(config).await?;
            Ok(Arc::new(roast_storage::sql::sqlite::SqliteMissionRepository::new(pool)))
        }
        #[cfg(not(feature = "postgres"))]
        DatabaseType::Postgres => anyhow::bail!("DATABASE_TYPE=postgres but this binary was built without the \"postgres\" feature"),
        #[cfg(not(feature = "sqlite"))]
        DatabaseType::Sqlite => anyhow::bail!("DATABASE_TYPE=sqlite but this binary was built without the \"sqlite\" feature"),
    }
}

pub async fn build_command_repo(config: &Config) -> Result<Arc<dyn CommandProposalRepository>> {
    match config.database_type {
        DatabaseType::Memory => Ok(Arc::new(roast_storage::memory::InMemoryCommandProposalRepository::new())),
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            let pool = connect_postgres(config).await?;
            Ok(Arc::new(roast_storage::sql::postgres::PostgresCommandProposalRepository::new(pool)))
        }
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => {
            let pool = connect_sqlite(config).await?;
            Ok(Arc::new(roast_storage::sql::sqlite::SqliteCommandProposalRepository::new(pool)))
        }
        #[cfg(not(feature = "postgres"))]
        DatabaseType::Postgres => anyhow::bail!("DATABASE_TYPE=postgres but this binary was built without the \"postgres\" feature"),
        #[cfg(not(feature = "sqlite"))]
        DatabaseType::Sqlite => anyhow::bail!("DATABASE_TYPE=sqlite but this binary was built without the \"sqlite\" feature"),
    }
}

pub async fn build_governance_repo(config: &Config) -> Result<Arc<dyn GovernanceRepository>> {
    match config.database_type {
        DatabaseType::Memory => Ok(Arc::new(roast_storage::memory::InMemoryGovernanceRepository::new())),
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            let pool = connect_postgres(config).await?;
            Ok(Arc::new(roast_storage::sql::postgres::PostgresGovernanceRepository::new(pool)))
        }
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => {
            let pool = connect_sqlite(config).await?;
            Ok(Arc::new(roast_storage::sql::sqlite::SqliteGovernanceRepository::new(pool)))
        }
        #[cfg(not(feature = "postgres"))]
        DatabaseType::Postgres => anyhow::bail!("DATABASE_TYPE=postgres but this binary was built without the \"postgres\" feature"),
        #[cfg(not(feature = "sqlite"))]
        DatabaseType::Sqlite => anyhow::bail!("DATABASE_TYPE=sqlite but this binary was built without the \"sqlite\" feature"),
    }
}

#[cfg(feature = "postgres")]
async fn connect_postgres(config: &Config) -> Result<sqlx::PgPool> {
    let url = config.database_url.as_deref().context("DATABASE_URL must be set for DATABASE_TYPE=postgres")?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to postgres")?;
    sqlx::migrate!("../storage/migrations/postgres").run(&pool).await.context("failed to run postgres migrations")?;
    Ok(pool)
}

#[cfg(feature = "sqlite")]
async fn connect_sqlite(config: &Config) -> Result<sqlx::SqlitePool> {
    let url = config.database_url.as_deref().context("DATABASE_URL must be set for DATABASE_TYPE=sqlite")?;
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to sqlite")?;
    sqlx::migrate!("../storage/migrations/sqlite").run(&pool).await.context("failed to run sqlite migrations")?;
    Ok(pool)
}

/// Build the Ed25519 signing key from `Config`, if signing is enabled.
pub fn build_signing_key(config: &Config) -> Result<Option<ed25519_dalek::SigningKey>> {
    if config.signing_mode != crate::config::SigningMode::Ed25519 {
        return Ok(None);
    }
    let b64 = config.signing_private_key_b64.as_deref().context("SIGNING_PRIVATE_KEY_B64 must be set when SIGNING_MODE=ed25519")?;
    let key = roast_schema::signing::signing_key_from_b64(b64).context("failed to parse SIGNING_PRIVATE_KEY_B64")?;
    Ok(Some(key))
}
