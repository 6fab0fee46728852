//! In-memory backend: the default repository set for `cargo run` without a
//! configured database, and the backend every kernel-crate unit test and
//! spec §8 scenario test runs against.

mod command;
mod config;
mod governance;
mod mission;

pub use command::InMemoryCommandProposalRepository;
pub use config::InMemoryMachineConfigRepository;
pub use governance::InMemoryGovernanceRepository;
pub use mission::InMemoryMissionRepository;
