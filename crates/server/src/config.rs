//! Process configuration loaded from the environment (spec §6 "Environment
//! variables"), following the teacher's `config.rs`: `dotenvy::dotenv()`
//! first, required vars fail loudly via `.context(...)`, optional vars use
//! `.ok()`/`unwrap_or_else`.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningMode {
    Off,
    Ed25519,
}

impl SigningMode {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "off" => Ok(SigningMode::Off),
            "ed25519" => Ok(SigningMode::Ed25519),
            other => anyhow::bail!("SIGNING_MODE must be \"off\" or \"ed25519\", got {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    Memory,
    Sqlite,
    Postgres,
}

impl DatabaseType {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "memory" => Ok(DatabaseType::Memory),
            "sqlite" => Ok(DatabaseType::Sqlite),
            "postgres" => Ok(DatabaseType::Postgres),
            other => anyhow::bail!("DATABASE_TYPE must be \"memory\", \"sqlite\" or \"postgres\", got {other:?}"),
        }
    }
}

/// Configuration shared by every binary in this crate. Each binary only
/// reads the fields it needs; unused fields still validate so a
/// misconfigured deployment fails at startup rather than at first use.
#[derive(Debug, Clone)]
pub struct Config {
    /// Message-bus URL (spec §6 `MQTT_URL`). Despite the env var's name
    /// (inherited from the distilled spec), the wire protocol is NATS —
    /// see `DESIGN.md` for why `async-nats` was chosen over an MQTT client.
    pub mqtt_url: Option<String>,
    /// Base URL of the external control-plane API gateway, if one fronts
    /// these services; unused internally, kept for parity with spec §6.
    pub kernel_url: Option<String>,
    pub signing_mode: SigningMode,
    pub signing_kid: Option<String>,
    pub signing_private_key_b64: Option<String>,

    pub event_inference_port: u16,
    pub mission_port: u16,
    pub command_port: u16,
    pub governance_port: u16,

    pub database_type: DatabaseType,
    pub database_url: Option<String>,

    /// Grace period for in-flight work to drain after SIGTERM/SIGINT
    /// before exiting (spec §6 "Exit codes", default 10s).
    pub shutdown_grace_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        let signing_mode = env::var("SIGNING_MODE")
            .unwrap_or_else(|_| "off".to_string())
            .parse_signing_mode()?;

        if signing_mode == SigningMode::Ed25519 {
            env::var("SIGNING_PRIVATE_KEY_B64").context("SIGNING_PRIVATE_KEY_B64 must be set when SIGNING_MODE=ed25519")?;
        }

        let database_type = env::var("DATABASE_TYPE")
            .unwrap_or_else(|_| "memory".to_string())
            .parse_database_type()?;

        if database_type != DatabaseType::Memory {
            env::var("DATABASE_URL").context("DATABASE_URL must be set when DATABASE_TYPE is not \"memory\"")?;
        }

        Ok(Self {
            mqtt_url: env::var("MQTT_URL").ok(),
            kernel_url: env::var("KERNEL_URL").ok(),
            signing_mode,
            signing_kid: env::var("SIGNING_KID").ok(),
            signing_private_key_b64: env::var("SIGNING_PRIVATE_KEY_B64").ok(),

            event_inference_port: env::var("EVENT_INFERENCE_PORT")
                .unwrap_or_else(|_| "8081".to_string())
                .parse()
                .context("EVENT_INFERENCE_PORT must be a valid port number")?,
            mission_port: env::var("MISSION_PORT")
                .unwrap_or_else(|_| "8082".to_string())
                .parse()
                .context("MISSION_PORT must be a valid port number")?,
            command_port: env::var("COMMAND_PORT")
                .unwrap_or_else(|_| "8083".to_string())
                .parse()
                .context("COMMAND_PORT must be a valid port number")?,
            governance_port: env::var("GOVERNANCE_PORT")
                .unwrap_or_else(|_| "8084".to_string())
                .parse()
                .context("GOVERNANCE_PORT must be a valid port number")?,

            database_type,
            database_url: env::var("DATABASE_URL").ok(),

            shutdown_grace_seconds: env::var("SHUTDOWN_GRACE_SECONDS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("SHUTDOWN_GRACE_SECONDS must be a valid number")?,
        })
    }
}

trait ParseEnvExt {
    fn parse_signing_mode(&self) -> Result<SigningMode>;
    fn parse_database_type(&self) -> Result<DatabaseType>;
}

impl ParseEnvExt for String {
    fn parse_signing_mode(&self) -> Result<SigningMode> {
        SigningMode::parse(self)
    }

    fn parse_database_type(&self) -> Result<DatabaseType> {
        DatabaseType::parse(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_mode_rejects_unknown_value() {
        assert!(SigningMode::parse("rot13").is_err());
    }

    #[test]
    fn database_type_defaults_accepted() {
        assert_eq!(DatabaseType::parse("memory").unwrap(), DatabaseType::Memory);
        assert_eq!(DatabaseType::parse("sqlite").unwrap(), DatabaseType::Sqlite);
        assert_eq!(DatabaseType::parse("postgres").unwrap(), DatabaseType::Postgres);
    }
}
