//! Governance state and circuit-breaker records (spec §3, §4.4).

use crate::command::CommandType;
use crate::id::BreakerEventId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AutonomyPhase {
    L3,
    L3Plus,
    L4,
    L4Plus,
    L5,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceState {
    pub current_phase: AutonomyPhase,
    pub phase_start_date: NaiveDate,
    pub command_whitelist: HashSet<CommandType>,
    pub paused_command_types: HashSet<CommandType>,
    pub last_report_date: Option<NaiveDate>,
}

impl Default for GovernanceState {
    fn default() -> Self {
        Self {
            current_phase: AutonomyPhase::L3,
            phase_start_date: Utc::now().date_naive(),
            command_whitelist: HashSet::new(),
            paused_command_types: HashSet::new(),
            last_report_date: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerAction {
    RevertToL3,
    PauseCommandType,
    AlertOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerRule {
    pub name: String,
    pub enabled: bool,
    pub condition: String,
    pub window_seconds: i64,
    pub action: BreakerAction,
    pub alert_severity: AlertSeverity,
    /// Only meaningful when `action == PauseCommandType` (spec §9 redesign
    /// flag: the source paused *all* commands; this field lets the
    /// implementation honor the intended per-type semantics).
    pub target_command_type: Option<CommandType>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Distinct commands proposed in the window (spec §4.4 `errorRate`'s
    /// denominator) — one per command, not one per lifecycle transition.
    pub total: u64,
    pub proposed: u64,
    pub approved: u64,
    pub rejected: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rolled_back: u64,
    pub incidents_critical: u64,
    pub constraint_violations: u64,
    pub emergency_aborts: u64,
    pub command_type_failures: std::collections::HashMap<CommandType, u64>,
}

impl MetricsSnapshot {
    pub fn success_rate(&self) -> f64 {
        self.succeeded as f64 / (self.succeeded + self.failed).max(1) as f64
    }

    pub fn approval_rate(&self) -> f64 {
        self.approved as f64 / self.proposed.max(1) as f64
    }

    pub fn rollback_rate(&self) -> f64 {
        self.rolled_back as f64 / self.succeeded.max(1) as f64
    }

    pub fn error_rate(&self) -> f64 {
        self.failed as f64 / self.total.max(1) as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerEvent {
    pub id: BreakerEventId,
    pub timestamp: DateTime<Utc>,
    pub rule: CircuitBreakerRule,
    pub metrics: MetricsSnapshot,
    pub action: BreakerAction,
    pub details: String,
    pub resolved: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    #[error("rule {0:?} not found")]
    RuleNotFound(String),
    #[error("malformed circuit breaker rule condition {0:?}: {1}")]
    InvalidRule(String, String),
    #[error("breaker event {0} not found")]
    EventNotFound(BreakerEventId),
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
