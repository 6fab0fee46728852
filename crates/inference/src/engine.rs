//! The Event-Inference Engine (spec §4.1): per-machine session state plus
//! the CHARGE -> TP -> FC detector pipeline driven by `handle_telemetry`,
//! and the silence-based DROP detector driven by `tick`.

use crate::detectors::{detect_charge, detect_drop, detect_fc, detect_tp};
use crate::error::InferenceError;
use crate::session::SessionState;
use chrono::{DateTime, Utc};
use roast_schema::{
    Envelope, HeuristicsConfig, MachineKey, PartialHeuristicsConfig, RoastEvent, RoastEventKind,
    SessionId, TelemetryPoint,
};
use roast_storage::MachineConfigRepository;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Read-only snapshot of a live session, for the `GET /status` surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub machine_key: MachineKey,
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub buffer_len: usize,
    pub emitted: Vec<RoastEventKind>,
}

/// The engine's in-process state: one session per [`MachineKey`], sharded so
/// operations on distinct machines proceed in parallel while operations on
/// the same machine serialize through its own mutex (spec §5).
pub struct Engine {
    sessions: Mutex<HashMap<MachineKey, Arc<Mutex<SessionState>>>>,
    config_cache: Mutex<HashMap<MachineKey, HeuristicsConfig>>,
    config_repo: Option<Arc<dyn MachineConfigRepository>>,
    default_config: HeuristicsConfig,
}

impl Engine {
    pub fn new(config_repo: Option<Arc<dyn MachineConfigRepository>>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            config_cache: Mutex::new(HashMap::new()),
            config_repo,
            default_config: HeuristicsConfig::default(),
        }
    }

    /// Ingest one telemetry envelope, returning the freshly emitted events
    /// in detection order (possibly empty). Invalid payloads are rejected
    /// with [`InferenceError::BadPayload`] — the caller is expected to log
    /// and drop rather than propagate, per spec §4.1.
    pub async fn handle_telemetry(
        &self,
        envelope: &Envelope<serde_json::Value>,
    ) -> Result<Vec<RoastEvent>, InferenceError> {
        if envelope.topic != "telemetry" {
            return Err(InferenceError::BadPayload(format!(
                "expected topic \"telemetry\", got {:?}",
                envelope.topic
            )));
        }
        let point: TelemetryPoint = serde_json::from_value(envelope.payload.clone())
            .map_err(|e| InferenceError::BadPayload(e.to_string()))?;
        point.validate().map_err(InferenceError::BadPayload)?;

        let key = envelope.origin.clone();
        let config = self.resolve_config(&key).await?;
        let session_arc = self.session_for(&key, point.ts, config.max_buffer_points);

        let mut events = Vec::new();
        let mut session = session_arc.lock().expect("session mutex poisoned");

        let gap_seconds = (point.ts - session.last_seen_at).num_milliseconds() as f64 / 1000.0;
        if !session.buffer.is_empty() && gap_seconds > config.session_gap_seconds {
            session.reset_for_new_session(SessionId::new(), point.ts);
        }

        session.buffer.push(point);
        session.last_seen_at = envelope.ts;

        if !session.has_emitted(RoastEventKind::Charge) {
            let latest = session.buffer.latest().expect("just pushed");
            let event = detect_charge(latest);
            session.mark_emitted(RoastEventKind::Charge);
            events.push(event);
        }
        if !session.has_emitted(RoastEventKind::Tp) {
            if let Some(event) = detect_tp(&session.buffer, &config) {
                session.mark_emitted(RoastEventKind::Tp);
                events.push(event);
            }
        }
        if !session.has_emitted(RoastEventKind::Fc) {
            let latest = session.buffer.latest().expect("just pushed");
            if let Some(event) = detect_fc(latest, &config) {
                session.mark_emitted(RoastEventKind::Fc);
                events.push(event);
            }
        }

        Ok(events)
    }

    /// Silence-based DROP sweep, called on a fixed interval (spec §4.1
    /// `tick`, ~1 Hz). CPU-only: reads the config cache, never storage.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<(MachineKey, RoastEvent)> {
        let keys: Vec<MachineKey> = self.sessions.lock().expect("sessions mutex poisoned").keys().cloned().collect();

        let mut fired = Vec::new();
        for key in keys {
            let session_arc = {
                let sessions = self.sessions.lock().expect("sessions mutex poisoned");
                match sessions.get(&key) {
                    Some(s) => s.clone(),
                    None => continue,
                }
            };
            let mut session = session_arc.lock().expect("session mutex poisoned");
            if session.has_emitted(RoastEventKind::Drop) {
                continue;
            }
            let Some(last) = session.buffer.latest().cloned() else { continue };
            let config = self.config_for_key(&key);
            let silence_seconds = (now - session.last_seen_at).num_milliseconds() as f64 / 1000.0;
            if let Some(event) = detect_drop(&last, silence_seconds, &config) {
                session.mark_emitted(RoastEventKind::Drop);
                fired.push((key, event));
            }
        }
        fired
    }

    /// Deep-merge `partial` over the current (or default) config and
    /// persist if a repository is configured (spec §4.1 `upsertConfig`).
    pub async fn upsert_config(
        &self,
        key: &MachineKey,
        partial: &PartialHeuristicsConfig,
    ) -> Result<HeuristicsConfig, InferenceError> {
        let merged = if let Some(repo) = &self.config_repo {
            repo.upsert(key, partial, &self.default_config).await?
        } else {
            let base = self
                .config_cache
                .lock()
                .expect("config cache mutex poisoned")
                .get(key)
                .cloned()
                .unwrap_or_else(|| self.default_config.clone());
            base.merged_with(partial)
        };
        self.config_cache
            .lock()
            .expect("config cache mutex poisoned")
            .insert(key.clone(), merged.clone());
        Ok(merged)
    }

    /// `(config, is_default)` — `is_default` is true iff no override exists
    /// anywhere (cache or repository), per `GET /config`'s response shape.
    pub async fn get_config(&self, key: &MachineKey) -> Result<(HeuristicsConfig, bool), InferenceError> {
        if let Some(cfg) = self.config_cache.lock().expect("config cache mutex poisoned").get(key).cloned() {
            return Ok((cfg, false));
        }
        if let Some(repo) = &self.config_repo {
            if let Some(cfg) = repo.get(key).await? {
                self.config_cache
                    .lock()
                    .expect("config cache mutex poisoned")
                    .insert(key.clone(), cfg.clone());
                return Ok((cfg, false));
            }
        }
        Ok((self.default_config.clone(), true))
    }

    pub fn default_config(&self) -> HeuristicsConfig {
        self.default_config.clone()
    }

    pub async fn delete_config(&self, key: &MachineKey) -> Result<bool, InferenceError> {
        self.config_cache.lock().expect("config cache mutex poisoned").remove(key);
        match &self.config_repo {
            Some(repo) => Ok(repo.delete(key).await?),
            None => Ok(false),
        }
    }

    pub fn sessions_snapshot(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.lock().expect("sessions mutex poisoned");
        sessions
            .iter()
            .map(|(key, session)| {
                let session = session.lock().expect("session mutex poisoned");
                SessionSummary {
                    machine_key: key.clone(),
                    session_id: session.session_id,
                    started_at: session.started_at,
                    last_seen_at: session.last_seen_at,
                    buffer_len: session.buffer.len(),
                    emitted: session.emitted.iter().copied().collect(),
                }
            })
            .collect()
    }

    async fn resolve_config(&self, key: &MachineKey) -> Result<HeuristicsConfig, InferenceError> {
        if let Some(cfg) = self.config_cache.lock().expect("config cache mutex poisoned").get(key).cloned() {
            return Ok(cfg);
        }
        let cfg = match &self.config_repo {
            Some(repo) => repo.get(key).await?.unwrap_or_else(|| self.default_config.clone()),
            None => self.default_config.clone(),
        };
        self.config_cache
            .lock()
            .expect("config cache mutex poisoned")
            .insert(key.clone(), cfg.clone());
        Ok(cfg)
    }

    fn config_for_key(&self, key: &MachineKey) -> HeuristicsConfig {
        self.config_cache
            .lock()
            .expect("config cache mutex poisoned")
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    fn session_for(&self, key: &MachineKey, now: DateTime<Utc>, buffer_capacity: usize) -> Arc<Mutex<SessionState>> {
        let mut sessions = self.sessions.lock().expect("sessions mutex poisoned");
        sessions
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SessionState::new(SessionId::new(), now, buffer_capacity))))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn telemetry_envelope(machine: &str, elapsed: f64, bt: Option<f64>, ts: DateTime<Utc>) -> Envelope<serde_json::Value> {
        Envelope {
            ts,
            origin: MachineKey::new("acme", "denver", machine),
            topic: "telemetry".to_string(),
            payload: json!({
                "ts": ts,
                "machineId": machine,
                "elapsedSeconds": elapsed,
                "btC": bt,
            }),
            session_id: None,
            sig: None,
            kid: None,
        }
    }

    #[tokio::test]
    async fn first_point_emits_charge_only() {
        let engine = Engine::new(None);
        let t0 = Utc::now();
        let envelope = telemetry_envelope("r1", 0.0, Some(180.0), t0);
        let events = engine.handle_telemetry(&envelope).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, RoastEventKind::Charge);
    }

    #[tokio::test]
    async fn charge_emitted_at_most_once_per_session() {
        let engine = Engine::new(None);
        let t0 = Utc::now();
        engine.handle_telemetry(&telemetry_envelope("r1", 0.0, Some(180.0), t0)).await.unwrap();
        let events = engine
            .handle_telemetry(&telemetry_envelope("r1", 2.0, Some(179.0), t0 + chrono::Duration::seconds(2)))
            .await
            .unwrap();
        assert!(!events.iter().any(|e| e.kind == RoastEventKind::Charge));
    }

    #[tokio::test]
    async fn bad_topic_is_rejected() {
        let engine = Engine::new(None);
        let mut envelope = telemetry_envelope("r1", 0.0, Some(180.0), Utc::now());
        envelope.topic = "event".to_string();
        assert!(engine.handle_telemetry(&envelope).await.is_err());
    }

    #[tokio::test]
    async fn charge_fc_drop_scenario() {
        let engine = Engine::new(None);
        let t0 = Utc::now();
        engine.handle_telemetry(&telemetry_envelope("r1", 0.0, Some(180.0), t0)).await.unwrap();
        let t1 = t0 + chrono::Duration::seconds(350);
        let events = engine
            .handle_telemetry(&telemetry_envelope("r1", 350.0, Some(198.0), t1))
            .await
            .unwrap();
        assert!(events.iter().any(|e| e.kind == RoastEventKind::Fc));

        let fired = engine.tick(t1 + chrono::Duration::seconds(20));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].1.kind, RoastEventKind::Drop);
    }

    #[tokio::test]
    async fn session_gap_resets_emitted_flags_but_not_buffer() {
        let engine = Engine::new(None);
        let t0 = Utc::now();
        engine.handle_telemetry(&telemetry_envelope("r1", 0.0, Some(180.0), t0)).await.unwrap();

        let t_gap = t0 + chrono::Duration::seconds(60);
        let events = engine.handle_telemetry(&telemetry_envelope("r1", 0.0, Some(170.0), t_gap)).await.unwrap();
        assert!(events.iter().any(|e| e.kind == RoastEventKind::Charge));
    }

    #[tokio::test]
    async fn upsert_config_merges_over_default() {
        let engine = Engine::new(None);
        let key = MachineKey::new("acme", "denver", "r1");
        let partial = PartialHeuristicsConfig {
            fc_bt_threshold_c: Some(205.0),
            ..Default::default()
        };
        let merged = engine.upsert_config(&key, &partial).await.unwrap();
        assert_eq!(merged.fc_bt_threshold_c, 205.0);
        let (fetched, is_default) = engine.get_config(&key).await.unwrap();
        assert!(!is_default);
        assert_eq!(fetched.fc_bt_threshold_c, 205.0);
    }
}
