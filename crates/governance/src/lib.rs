//! The Autonomy Governor & Circuit Breaker (spec §4.4): the default
//! `Governor` gate consulted by the Command Service, plus the periodic
//! rule-evaluation loop that can auto-revert the system to a safer
//! autonomy phase.

pub mod breaker;
pub mod dsl;
pub mod governor;
pub mod service;

pub use breaker::{unpause_command_type, CircuitBreaker};
pub use dsl::{parse_condition, validate_rule, Literal, Metric, Operator, ParsedCondition};
pub use governor::DefaultGovernor;
pub use roast_schema::GovernanceError;
pub use service::{GovernanceService, READINESS_WINDOW_SECONDS, WEEKLY_WINDOW_SECONDS};
