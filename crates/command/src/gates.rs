//! The fixed gate pipeline (spec §4.2): pure decision functions over
//! already-fetched state. `service::CommandService::propose` runs these in
//! order and short-circuits to REJECTED on the first failure; none of them
//! ever mutate or touch storage themselves.

use chrono::{DateTime, Datelike, Utc};
use roast_schema::{Command, CommandProposal, CommandType, RejectionCode, RejectionReason};
use std::collections::HashMap;

fn reject(code: RejectionCode, message: impl Into<String>) -> RejectionReason {
    RejectionReason {
        code,
        message: message.into(),
        details: serde_json::Value::Null,
    }
}

/// Gate 2: value bounds and per-type hard caps (spec §4.2 gate 2).
pub fn check_constraints(command: &Command) -> Result<(), RejectionReason> {
    let Some(target) = command.target_value else {
        return Ok(());
    };

    if let Some(min) = command.constraints.min_value {
        if target < min {
            return Err(reject(
                RejectionCode::ConstraintViolation,
                format!("target_value {target} below configured minimum {min}"),
            ));
        }
    }
    if let Some(max) = command.constraints.max_value {
        if target > max {
            return Err(reject(
                RejectionCode::ConstraintViolation,
                format!("target_value {target} above configured maximum {max}"),
            ));
        }
    }
    if let Some((lo, hi)) = command.command_type.hard_cap() {
        if target < lo || target > hi {
            return Err(reject(
                RejectionCode::ConstraintViolation,
                format!("target_value {target} outside hard cap [{lo}, {hi}] for {:?}", command.command_type),
            ));
        }
    }
    Ok(())
}

/// Gate 3: current-state guard, only evaluated when a state provider is
/// configured (spec §4.2 gate 3).
pub fn check_state(command_type: CommandType, state: &HashMap<String, bool>, require_states: &[String], forbidden_states: &[String]) -> Result<(), RejectionReason> {
    let (implicit_require, implicit_forbid): (Option<&str>, Option<&str>) = match command_type {
        CommandType::Charge => (Some("drum_rotating"), None),
        CommandType::Drop => (Some("roast_in_progress"), None),
        CommandType::Preheat => (None, Some("roast_in_progress")),
        _ => (None, None),
    };

    let truthy = |key: &str| state.get(key).copied().unwrap_or(false);

    if let Some(key) = implicit_require {
        if !truthy(key) {
            return Err(reject(RejectionCode::StateGuard, format!("{key} is required but false")));
        }
    }
    if let Some(key) = implicit_forbid {
        if truthy(key) {
            return Err(reject(RejectionCode::StateGuard, format!("{key} is forbidden but true")));
        }
    }
    for key in require_states {
        if !truthy(key) {
            return Err(reject(RejectionCode::StateGuard, format!("{key} is required but false")));
        }
    }
    for key in forbidden_states {
        if truthy(key) {
            return Err(reject(RejectionCode::StateGuard, format!("{key} is forbidden but true")));
        }
    }
    Ok(())
}

/// Gate 4: rate limiting against recent same-type commands on the same
/// machine, only evaluated when a recent-commands provider is configured
/// (spec §4.2 gate 4). `recent` must be sorted most-recent-first.
pub fn check_rate(command: &Command, recent: &[CommandProposal], now: DateTime<Utc>) -> Result<(), RejectionReason> {
    let constraints = &command.constraints;

    if let Some(min_interval) = constraints.min_interval_seconds {
        if let Some(last) = recent.first() {
            let elapsed = (now - last.created_at).num_milliseconds() as f64 / 1000.0;
            if elapsed < min_interval {
                return Err(reject(
                    RejectionCode::RateLimit,
                    format!("only {elapsed:.1}s since last {:?} command, minimum is {min_interval}s", command.command_type),
                ));
            }
        }
    }

    if let Some(max_daily) = constraints.max_daily_count {
        let today = now.date_naive();
        let count = recent.iter().filter(|p| p.created_at.date_naive() == today).count() as u32;
        if count >= max_daily {
            return Err(reject(
                RejectionCode::RateLimit,
                format!("{count} {:?} commands already issued today, daily cap is {max_daily}", command.command_type),
            ));
        }
    }

    if let Some(ramp_rate) = constraints.ramp_rate {
        if let (Some(target), Some(last)) = (command.target_value, recent.first()) {
            if let Some(last_value) = last.command.target_value {
                let dt_seconds = (now - last.created_at).num_milliseconds() as f64 / 1000.0;
                if dt_seconds > 0.0 {
                    let observed_rate = (target - last_value).abs() / dt_seconds;
                    if observed_rate > ramp_rate {
                        return Err(reject(
                            RejectionCode::RampRate,
                            format!("value delta {:.2} over {dt_seconds:.1}s exceeds ramp rate {ramp_rate}/s", target - last_value),
                        ));
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use roast_schema::{CommandConstraints, CommandId, CommandType};

    fn command(command_type: CommandType, target_value: Option<f64>, constraints: CommandConstraints) -> Command {
        Command {
            command_id: CommandId::new(),
            command_type,
            machine_id: "m1".into(),
            target_value,
            unit: None,
            constraints,
        }
    }

    #[test]
    fn set_power_above_hard_cap_is_rejected() {
        let command = command(CommandType::SetPower, Some(150.0), CommandConstraints::default());
        let err = check_constraints(&command).unwrap_err();
        assert_eq!(err.code, RejectionCode::ConstraintViolation);
    }

    #[test]
    fn set_power_within_bounds_passes() {
        let command = command(CommandType::SetPower, Some(70.0), CommandConstraints::default());
        assert!(check_constraints(&command).is_ok());
    }

    #[test]
    fn preheat_forbids_roast_in_progress() {
        let mut state = HashMap::new();
        state.insert("roast_in_progress".to_string(), true);
        let err = check_state(CommandType::Preheat, &state, &[], &[]).unwrap_err();
        assert_eq!(err.code, RejectionCode::StateGuard);
    }

    #[test]
    fn charge_requires_drum_rotating() {
        let state = HashMap::new();
        let err = check_state(CommandType::Charge, &state, &[], &[]).unwrap_err();
        assert_eq!(err.code, RejectionCode::StateGuard);
    }
}
