//! Per-machine session state (spec §3 "Session State").

use chrono::{DateTime, Utc};
use roast_schema::{RoastEventKind, SessionId, TelemetryPoint};
use std::collections::{HashSet, VecDeque};

/// A size-bounded FIFO of telemetry points, oldest evicted first (spec §5
/// "Telemetry ring buffer").
#[derive(Debug, Clone)]
pub struct RingBuffer {
    capacity: usize,
    points: VecDeque<TelemetryPoint>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            points: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, point: TelemetryPoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The `n` most recent points, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<&TelemetryPoint> {
        let skip = self.points.len().saturating_sub(n);
        self.points.iter().skip(skip).collect()
    }

    pub fn first(&self) -> Option<&TelemetryPoint> {
        self.points.front()
    }

    pub fn latest(&self) -> Option<&TelemetryPoint> {
        self.points.back()
    }
}

/// In-memory state for one roast session (spec §3 "Session State"). Owned
/// exclusively by the Inference Engine — never persisted (spec §4.1 failure
/// semantics: "session state is in-memory — loss on restart is acceptable").
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub buffer: RingBuffer,
    pub emitted: HashSet<RoastEventKind>,
}

impl SessionState {
    pub fn new(session_id: SessionId, now: DateTime<Utc>, buffer_capacity: usize) -> Self {
        Self {
            session_id,
            started_at: now,
            last_seen_at: now,
            buffer: RingBuffer::new(buffer_capacity),
            emitted: HashSet::new(),
        }
    }

    pub fn has_emitted(&self, kind: RoastEventKind) -> bool {
        self.emitted.contains(&kind)
    }

    pub fn mark_emitted(&mut self, kind: RoastEventKind) {
        self.emitted.insert(kind);
    }

    /// Start a fresh logical session in place: clears the emitted-flag set
    /// (spec §4.1 `handleTelemetry`: "resets the emitted-flag set... while
    /// keeping telemetry buffer behavior under the new configuration") but
    /// keeps the buffer's accumulated points — the buffer itself is resized
    /// by the caller if `maxBufferPoints` changed.
    pub fn reset_for_new_session(&mut self, session_id: SessionId, now: DateTime<Utc>) {
        self.session_id = session_id;
        self.started_at = now;
        self.emitted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(elapsed: f64) -> TelemetryPoint {
        TelemetryPoint {
            ts: Utc::now(),
            machine_id: "m1".into(),
            elapsed_seconds: elapsed,
            bt_c: None,
            et_c: None,
            ror_c_per_min: None,
            gas_pct: None,
        }
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let mut buf = RingBuffer::new(2);
        buf.push(point(0.0));
        buf.push(point(1.0));
        buf.push(point(2.0));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.first().unwrap().elapsed_seconds, 1.0);
        assert_eq!(buf.latest().unwrap().elapsed_seconds, 2.0);
    }

    #[test]
    fn last_n_returns_oldest_first() {
        let mut buf = RingBuffer::new(5);
        for i in 0..3 {
            buf.push(point(i as f64));
        }
        let last_two: Vec<f64> = buf.last_n(2).iter().map(|p| p.elapsed_seconds).collect();
        assert_eq!(last_two, vec![1.0, 2.0]);
    }
}
