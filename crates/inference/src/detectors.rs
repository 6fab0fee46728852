//! Roast-lifecycle event detectors (spec §4.1 "Detectors"). Each detector is
//! a total, pure function over a session's buffer and config — no detector
//! ever mutates session state itself; the caller (`Engine::handle_telemetry`)
//! decides whether to mark an event emitted.

use crate::session::RingBuffer;
use roast_schema::{HeuristicsConfig, RoastEvent, RoastEventKind, TelemetryPoint};

/// The first telemetry point of a session always synthesizes CHARGE at its
/// `elapsed_seconds` (spec §4.1 "CHARGE").
pub fn detect_charge(point: &TelemetryPoint) -> RoastEvent {
    RoastEvent {
        kind: RoastEventKind::Charge,
        machine_id: point.machine_id.clone(),
        ts: point.ts,
        elapsed_seconds: point.elapsed_seconds,
        bt_c: point.bt_c,
    }
}

/// Turning point: requires >=3 points and the latest within the search
/// window; fires on a local minimum of the last three bean-temperatures, or
/// a slope-sign transition, both emitted at the middle of the three points
/// (spec §4.1 "TP").
pub fn detect_tp(buffer: &RingBuffer, config: &HeuristicsConfig) -> Option<RoastEvent> {
    if buffer.len() < 3 {
        return None;
    }
    let latest = buffer.latest()?;
    if latest.elapsed_seconds > config.tp_search_window_seconds {
        return None;
    }

    let last_three = buffer.last_n(3);
    let [p0, p1, p2] = [last_three[0], last_three[1], last_three[2]];
    let bt0 = p0.bt_c.unwrap_or(f64::INFINITY);
    let bt1 = p1.bt_c.unwrap_or(f64::INFINITY);
    let bt2 = p2.bt_c.unwrap_or(f64::INFINITY);

    let local_minimum = bt1 <= bt0 && bt1 <= bt2;
    let slope_transition = (bt1 - bt0) < 0.0 && (bt2 - bt1) >= 0.0;

    if local_minimum || slope_transition {
        Some(RoastEvent {
            kind: RoastEventKind::Tp,
            machine_id: p1.machine_id.clone(),
            ts: p1.ts,
            elapsed_seconds: p1.elapsed_seconds,
            bt_c: p1.bt_c,
        })
    } else {
        None
    }
}

/// First crack: bean-temperature and elapsed-time thresholds, with an
/// optional rate-of-rise ceiling (spec §4.1 "FC").
pub fn detect_fc(latest: &TelemetryPoint, config: &HeuristicsConfig) -> Option<RoastEvent> {
    if latest.elapsed_seconds < config.min_first_crack_seconds {
        return None;
    }
    let bt = latest.bt_c?;
    if bt < config.fc_bt_threshold_c {
        return None;
    }
    if let Some(max_ror) = config.fc_ror_max_threshold {
        if let Some(ror) = latest.ror_c_per_min {
            if ror > max_ror {
                return None;
            }
        }
    }
    Some(RoastEvent {
        kind: RoastEventKind::Fc,
        machine_id: latest.machine_id.clone(),
        ts: latest.ts,
        elapsed_seconds: latest.elapsed_seconds,
        bt_c: latest.bt_c,
    })
}

/// Silence-based drop: evaluated from `tick`, not `handle_telemetry` (spec
/// §4.1 "DROP (silence-based)").
pub fn detect_drop(
    last_point: &TelemetryPoint,
    seconds_since_last_seen: f64,
    config: &HeuristicsConfig,
) -> Option<RoastEvent> {
    if seconds_since_last_seen < config.drop_silence_seconds {
        return None;
    }
    Some(RoastEvent {
        kind: RoastEventKind::Drop,
        machine_id: last_point.machine_id.clone(),
        ts: last_point.ts,
        elapsed_seconds: last_point.elapsed_seconds,
        bt_c: last_point.bt_c,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn point(elapsed: f64, bt: Option<f64>) -> TelemetryPoint {
        TelemetryPoint {
            ts: Utc::now(),
            machine_id: "m1".into(),
            elapsed_seconds: elapsed,
            bt_c: bt,
            et_c: None,
            ror_c_per_min: None,
            gas_pct: None,
        }
    }

    #[test]
    fn tp_fires_on_local_minimum() {
        let mut buf = RingBuffer::new(10);
        buf.push(point(0.0, Some(180.0)));
        buf.push(point(2.0, Some(175.0)));
        buf.push(point(4.0, Some(176.0)));
        let config = HeuristicsConfig::default();
        let event = detect_tp(&buf, &config).expect("tp should fire");
        assert_eq!(event.elapsed_seconds, 2.0);
        assert_eq!(event.kind, RoastEventKind::Tp);
    }

    #[test]
    fn tp_requires_three_points() {
        let mut buf = RingBuffer::new(10);
        buf.push(point(0.0, Some(180.0)));
        buf.push(point(2.0, Some(175.0)));
        let config = HeuristicsConfig::default();
        assert!(detect_tp(&buf, &config).is_none());
    }

    #[test]
    fn tp_respects_search_window() {
        let mut buf = RingBuffer::new(10);
        buf.push(point(0.0, Some(180.0)));
        buf.push(point(200.0, Some(175.0)));
        buf.push(point(400.0, Some(176.0)));
        let config = HeuristicsConfig::default();
        assert!(detect_tp(&buf, &config).is_none());
    }

    #[test]
    fn fc_requires_minimum_elapsed_time() {
        let config = HeuristicsConfig::default();
        let p = point(100.0, Some(210.0));
        assert!(detect_fc(&p, &config).is_none());
    }

    #[test]
    fn fc_fires_past_threshold_with_ror_within_bound() {
        let config = HeuristicsConfig {
            fc_ror_max_threshold: Some(15.0),
            ..Default::default()
        };
        let mut p = point(350.0, Some(197.0));
        p.ror_c_per_min = Some(10.0);
        let event = detect_fc(&p, &config).expect("fc should fire");
        assert_eq!(event.kind, RoastEventKind::Fc);
    }

    #[test]
    fn fc_suppressed_by_ror_ceiling() {
        let config = HeuristicsConfig {
            fc_ror_max_threshold: Some(5.0),
            ..Default::default()
        };
        let mut p = point(350.0, Some(197.0));
        p.ror_c_per_min = Some(10.0);
        assert!(detect_fc(&p, &config).is_none());
    }

    #[test]
    fn drop_fires_when_silence_exceeds_threshold() {
        let config = HeuristicsConfig {
            drop_silence_seconds: 5.0,
            ..Default::default()
        };
        let last = point(0.0, Some(180.0));
        assert!(detect_drop(&last, 7.0, &config).is_some());
        assert!(detect_drop(&last, 3.0, &config).is_none());
    }
}
