//! Storage-agnostic repository contracts plus an in-memory backend and
//! optional `sqlx` backends for Postgres and SQLite (spec §1 non-goal:
//! persistence engine choice; spec §6 "Persisted state layout").

pub mod memory;
pub mod repo;
pub mod sql;

pub use repo::{
    apply_transition, CommandProposalRepository, CreateMissionOutcome, GovernanceRepository,
    MachineConfigRepository, MissionMetrics, MissionRepository, OutcomeSample, ProposalTransition,
};
