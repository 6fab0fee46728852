//! The Mission Store (spec §4.3): a lease-based job queue with idempotent
//! creation, heartbeat leases, and retry with exponential backoff.

pub mod service;

pub use roast_schema::MissionError;
pub use service::MissionStore;
