//! The Event-Inference Engine (spec §4.1): stateless-at-rest telemetry
//! ingestion that emits CHARGE/TP/FC/DROP roast-lifecycle events.

pub mod detectors;
pub mod engine;
pub mod error;
pub mod session;

pub use engine::{Engine, SessionSummary};
pub use error::InferenceError;
pub use session::{RingBuffer, SessionState};
