//! Message-bus wiring for the inference service (spec §6 "Inbound/Outbound
//! message bus"). Grounded on the teacher's `kernel/nats.rs`: a small
//! trait (`EventPublisher`) wraps the bus so production code depends on
//! the trait, not `async_nats::Client` directly, and tests substitute an
//! in-memory recorder instead of a real broker connection.
//!
//! NATS subjects are dot-delimited, so the slash-delimited topic pattern in
//! spec §6 (`roaster/{orgId}/{siteId}/{machineId}/telemetry`) is translated
//! to `roaster.{orgId}.{siteId}.{machineId}.telemetry` without changing its
//! semantics (`MachineKey::subject_prefix`, `roast-schema`).

use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use futures::StreamExt;
use roast_inference::Engine;
use roast_schema::signing::{self, SigningError};
use roast_schema::{Envelope, MachineKey};
use std::sync::{Arc, Mutex};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, subject: String, payload: Vec<u8>) -> anyhow::Result<()>;
}

pub struct NatsEventPublisher {
    client: async_nats::Client,
}

impl NatsEventPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventPublisher for NatsEventPublisher {
    async fn publish(&self, subject: String, payload: Vec<u8>) -> anyhow::Result<()> {
        self.client.publish(subject, payload.into()).await?;
        Ok(())
    }
}

/// In-memory recorder used by tests in place of a live broker connection,
/// mirroring the teacher's `TestNats`.
#[derive(Default)]
pub struct TestEventPublisher {
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl TestEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for TestEventPublisher {
    async fn publish(&self, subject: String, payload: Vec<u8>) -> anyhow::Result<()> {
        self.published.lock().unwrap().push((subject, payload));
        Ok(())
    }
}

/// Verifies inbound telemetry envelopes against the deployment's configured
/// Ed25519 key (spec §6: "Verification rejects envelopes whose recomputed
/// canonical bytes differ"). Built from `kernel::build_signing_key` only
/// when `SIGNING_MODE=ed25519`; the subscriber runs unverified otherwise.
pub struct EnvelopeVerifier {
    key: VerifyingKey,
    kid: Option<String>,
}

impl EnvelopeVerifier {
    pub fn new(key: VerifyingKey, kid: Option<String>) -> Self {
        Self { key, kid }
    }

    fn verify<P: serde::Serialize>(&self, envelope: &Envelope<P>) -> Result<(), SigningError> {
        let sig = envelope.sig.as_deref().ok_or(SigningError::VerificationFailed)?;
        if let (Some(expected), Some(actual)) = (&self.kid, &envelope.kid) {
            if expected != actual {
                return Err(SigningError::VerificationFailed);
            }
        }
        signing::verify(&self.key, envelope, sig)
    }
}

pub fn telemetry_subject(key: &MachineKey) -> String {
    format!("{}.telemetry", key.subject_prefix())
}

pub fn events_subject(key: &MachineKey) -> String {
    format!("{}.events", key.subject_prefix())
}

pub fn telemetry_wildcard_subject() -> &'static str {
    "roaster.*.*.*.telemetry"
}

/// Drive one subscription loop: pull telemetry envelopes off the bus, hand
/// them to the engine, and republish whatever events come out. Runs until
/// the subscription ends (broker disconnect) or `shutdown` resolves.
pub async fn run_telemetry_subscriber(
    client: async_nats::Client,
    engine: Arc<Engine>,
    publisher: Arc<dyn EventPublisher>,
    verifier: Option<Arc<EnvelopeVerifier>>,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let mut subscriber = client.subscribe(telemetry_wildcard_subject()).await?;
    tracing::info!(subject = telemetry_wildcard_subject(), "subscribed to telemetry");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("telemetry subscriber draining on shutdown signal");
                break;
            }
            message = subscriber.next() => {
                let Some(message) = message else {
                    tracing::warn!("telemetry subscription ended");
                    break;
                };
                handle_message(&engine, &publisher, verifier.as_deref(), &message.payload).await;
            }
        }
    }
    Ok(())
}

async fn handle_message(engine: &Arc<Engine>, publisher: &Arc<dyn EventPublisher>, verifier: Option<&EnvelopeVerifier>, payload: &[u8]) {
    let envelope: Envelope<serde_json::Value> = match serde_json::from_slice(payload) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(error = %err, "dropping malformed telemetry envelope");
            return;
        }
    };

    if let Some(verifier) = verifier {
        if let Err(err) = verifier.verify(&envelope) {
            tracing::warn!(error = %err, machine = %envelope.origin.machine_id, "dropping telemetry envelope that failed signature verification");
            return;
        }
    }

    let origin = envelope.origin.clone();
    let events = match engine.handle_telemetry(&envelope).await {
        Ok(events) => events,
        Err(err) => {
            tracing::warn!(error = %err, machine = %origin.machine_id, "dropping invalid telemetry envelope");
            return;
        }
    };

    for event in events {
        let out = Envelope::new_event(origin.clone(), event, envelope.session_id.clone());
        let bytes = match serde_json::to_vec(&out) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize outbound roast event");
                continue;
            }
        };
        if let Err(err) = publisher.publish(events_subject(&origin), bytes).await {
            tracing::error!(error = %err, "failed to publish roast event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use serde_json::json;

    fn unsigned_envelope(key: &MachineKey, ts: chrono::DateTime<Utc>) -> Envelope<serde_json::Value> {
        Envelope {
            ts,
            origin: key.clone(),
            topic: "telemetry".to_string(),
            payload: json!({"ts": ts, "machineId": "r1", "elapsedSeconds": 0.0, "btC": 180.0}),
            session_id: None,
            sig: None,
            kid: None,
        }
    }

    #[tokio::test]
    async fn handle_message_publishes_charge_event() {
        let engine = Arc::new(Engine::new(None));
        let recorder = Arc::new(TestEventPublisher::new());
        let publisher: Arc<dyn EventPublisher> = recorder.clone();
        let key = MachineKey::new("acme", "denver", "r1");
        let envelope = unsigned_envelope(&key, Utc::now());
        let bytes = serde_json::to_vec(&envelope).unwrap();

        handle_message(&engine, &publisher, None, &bytes).await;

        let published = recorder.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, events_subject(&key));
    }

    #[tokio::test]
    async fn handle_message_drops_unsigned_envelope_when_verification_enabled() {
        let engine = Arc::new(Engine::new(None));
        let recorder = Arc::new(TestEventPublisher::new());
        let publisher: Arc<dyn EventPublisher> = recorder.clone();
        let key = MachineKey::new("acme", "denver", "r1");
        let envelope = unsigned_envelope(&key, Utc::now());
        let bytes = serde_json::to_vec(&envelope).unwrap();

        let signing_key = SigningKey::generate(&mut OsRng);
        let verifier = EnvelopeVerifier::new(signing_key.verifying_key(), None);

        handle_message(&engine, &publisher, Some(&verifier), &bytes).await;

        assert!(recorder.published().is_empty());
    }

    #[tokio::test]
    async fn handle_message_accepts_validly_signed_envelope() {
        let engine = Arc::new(Engine::new(None));
        let recorder = Arc::new(TestEventPublisher::new());
        let publisher: Arc<dyn EventPublisher> = recorder.clone();
        let key = MachineKey::new("acme", "denver", "r1");
        let mut envelope = unsigned_envelope(&key, Utc::now());

        let signing_key = SigningKey::generate(&mut OsRng);
        envelope.kid = Some("fleet-key-1".to_string());
        let sig = signing::sign(&signing_key, &envelope).unwrap();
        envelope.sig = Some(sig);
        let bytes = serde_json::to_vec(&envelope).unwrap();

        let verifier = EnvelopeVerifier::new(signing_key.verifying_key(), Some("fleet-key-1".to_string()));
        handle_message(&engine, &publisher, Some(&verifier), &bytes).await;

        assert_eq!(recorder.published().len(), 1);
    }

    #[tokio::test]
    async fn handle_message_drops_envelope_with_mismatched_kid() {
        let engine = Arc::new(Engine::new(None));
        let recorder = Arc::new(TestEventPublisher::new());
        let publisher: Arc<dyn EventPublisher> = recorder.clone();
        let key = MachineKey::new("acme", "denver", "r1");
        let mut envelope = unsigned_envelope(&key, Utc::now());

        let signing_key = SigningKey::generate(&mut OsRng);
        envelope.kid = Some("old-key".to_string());
        let sig = signing::sign(&signing_key, &envelope).unwrap();
        envelope.sig = Some(sig);
        let bytes = serde_json::to_vec(&envelope).unwrap();

        let verifier = EnvelopeVerifier::new(signing_key.verifying_key(), Some("fleet-key-1".to_string()));
        handle_message(&engine, &publisher, Some(&verifier), &bytes).await;

        assert!(recorder.published().is_empty());
    }
}
