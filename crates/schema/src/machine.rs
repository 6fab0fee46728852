//! Machine identity and telemetry/event records (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Partition key used throughout the kernel: `(orgId, siteId, machineId)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineKey {
    pub org_id: String,
    pub site_id: String,
    pub machine_id: String,
}

impl MachineKey {
    pub fn new(org_id: impl Into<String>, site_id: impl Into<String>, machine_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            site_id: site_id.into(),
            machine_id: machine_id.into(),
        }
    }

    /// The NATS subject prefix this machine publishes/subscribes under,
    /// e.g. `roaster.acme.denver.rstr-07`. NATS subjects are dot-delimited,
    /// not slash-delimited like the HTTP topic pattern in spec §6.
    pub fn subject_prefix(&self) -> String {
        format!("roaster.{}.{}.{}", self.org_id, self.site_id, self.machine_id)
    }
}

/// A single telemetry sample (spec §3 "Telemetry Point").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPoint {
    pub ts: DateTime<Utc>,
    pub machine_id: String,
    #[serde(default)]
    pub elapsed_seconds: f64,
    pub bt_c: Option<f64>,
    pub et_c: Option<f64>,
    pub ror_c_per_min: Option<f64>,
    pub gas_pct: Option<f64>,
}

impl TelemetryPoint {
    /// Validates the bounded fields ([0,100] percentages); temperatures and
    /// RoR are unbounded (physically extreme but not a shape error).
    pub fn validate(&self) -> Result<(), String> {
        if let Some(gas) = self.gas_pct {
            if !(0.0..=100.0).contains(&gas) {
                return Err(format!("gas_pct {gas} out of bounds [0,100]"));
            }
        }
        if self.elapsed_seconds < 0.0 {
            return Err("elapsed_seconds must be non-negative".into());
        }
        Ok(())
    }
}

/// One of the four lifecycle milestones of a roast (spec §3 "Roast Event").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoastEventKind {
    Charge,
    Tp,
    Fc,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoastEvent {
    pub kind: RoastEventKind,
    pub machine_id: String,
    pub ts: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub bt_c: Option<f64>,
}

/// The envelope wrapping telemetry or events on the message bus (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<P> {
    pub ts: DateTime<Utc>,
    pub origin: MachineKey,
    pub topic: String,
    pub payload: P,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl<P> Envelope<P> {
    pub fn new_telemetry(origin: MachineKey, payload: P, session_id: Option<String>) -> Self {
        Self {
            ts: Utc::now(),
            origin,
            topic: "telemetry".to_string(),
            payload,
            session_id,
            sig: None,
            kid: None,
        }
    }

    pub fn new_event(origin: MachineKey, payload: P, session_id: Option<String>) -> Self {
        Self {
            ts: Utc::now(),
            origin,
            topic: "event".to_string(),
            payload,
            session_id,
            sig: None,
            kid: None,
        }
    }
}
