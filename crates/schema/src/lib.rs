//! Shared domain types, ids, canonicalization and signing for the roaster
//! control plane kernel. Every other kernel crate (`roast-storage`,
//! `roast-inference`, `roast-missions`, `roast-command`,
//! `roast-governance`) depends on this crate for its vocabulary so that the
//! trait boundaries between subsystems (e.g. the Command Service's
//! dependency on a `Governor`) are defined once, centrally, rather than
//! duplicated or defined in whichever crate happens to need them first.

pub mod canonical;
pub mod command;
pub mod config;
pub mod governance;
pub mod id;
pub mod machine;
pub mod mission;
pub mod signing;

pub use canonical::canonical_bytes;
pub use command::{
    AuditEntry, Command, CommandConstraints, CommandError, CommandProposal, CommandType,
    CurrentStateProvider, Governor, GovernorAction, GovernorContext, GovernorDecision,
    GovernorRequest, MetricsRecorder, MetricsSample, Outcome, OutcomeStatus, ProposalStatus,
    Proposer, ProposeRequest, RecentCommandsProvider, RejectionCode, RejectionReason,
};
pub use config::{HeuristicsConfig, PartialHeuristicsConfig};
pub use governance::{
    AlertSeverity, AutonomyPhase, BreakerAction, CircuitBreakerEvent, CircuitBreakerRule,
    GovernanceError, GovernanceState, MetricsSnapshot,
};
pub use id::{BreakerEventId, CommandId, Id, LeaseId, MissionId, ProposalId, SessionId};
pub use machine::{Envelope, MachineKey, RoastEvent, RoastEventKind, TelemetryPoint};
pub use mission::{
    CreateMissionRequest, Mission, MissionError, MissionGoal, MissionLease, MissionStatus,
    Priority, RetryPolicy,
};
