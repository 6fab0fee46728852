//! The circuit-breaker condition DSL (spec §4.4): a restricted grammar —
//! `<metric> <operator> <literal>`, exactly one operator, parsed at
//! rule-load time into a closed enum rather than evaluated with `eval`
//! (spec §9 redesign flag: "specify it... parsed at rule-load time into a
//! closed enum + operator + numeric (or string) literal. Reject malformed
//! rules at load.").

use roast_schema::{CircuitBreakerRule, GovernanceError, MetricsSnapshot};

/// Closed vocabulary of metric names a condition may reference (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    ErrorRate,
    SuccessRate,
    RollbackRate,
    ApprovalRate,
    IncidentsCritical,
    IncidentSeverity,
    CommandTypeFailures,
    ConstraintViolations,
    EmergencyAborts,
}

impl Metric {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "errorRate" => Metric::ErrorRate,
            "successRate" => Metric::SuccessRate,
            "rollbackRate" => Metric::RollbackRate,
            "approvalRate" => Metric::ApprovalRate,
            "incidents.critical" => Metric::IncidentsCritical,
            "incident.severity" => Metric::IncidentSeverity,
            "commandType.failures" => Metric::CommandTypeFailures,
            "constraintViolations" => Metric::ConstraintViolations,
            "emergencyAborts" => Metric::EmergencyAborts,
            _ => return None,
        })
    }

    /// `true` for metrics compared with a string literal via `===`
    /// (currently only `incident.severity`); every other metric is numeric.
    fn is_string_valued(self) -> bool {
        matches!(self, Metric::IncidentSeverity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl Operator {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            "===" => Operator::Eq,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Str(String),
}

/// A condition string parsed once, at rule-load time.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCondition {
    pub metric: Metric,
    pub operator: Operator,
    pub literal: Literal,
}

/// Parse a condition string (spec §4.4 grammar). Rejects anything that
/// isn't exactly `<metric> <operator> <literal>` with a literal shape
/// matching the metric and operator: numeric metrics take a number
/// literal with any comparison operator; `incident.severity` takes a
/// quoted string literal and only the `===` operator.
pub fn parse_condition(condition: &str) -> Result<ParsedCondition, String> {
    let tokens: Vec<&str> = condition.split_whitespace().collect();
    let (metric_tok, op_tok, literal_tok) = match tokens.as_slice() {
        [metric_tok, op_tok, literal_tok] => (*metric_tok, *op_tok, *literal_tok),
        _ => return Err(format!("expected exactly 3 tokens `<metric> <op> <literal>`, got {:?}", condition)),
    };

    let metric = Metric::parse(metric_tok).ok_or_else(|| format!("unknown metric {metric_tok:?}"))?;
    let operator = Operator::parse(op_tok).ok_or_else(|| format!("unknown operator {op_tok:?}"))?;

    let literal = if metric.is_string_valued() {
        if operator != Operator::Eq {
            return Err(format!("metric {metric_tok:?} only supports ===, got {op_tok:?}"));
        }
        let stripped = literal_tok
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .ok_or_else(|| format!("expected a quoted string literal for {metric_tok:?}, got {literal_tok:?}"))?;
        Literal::Str(stripped.to_string())
    } else {
        let value: f64 = literal_tok
            .parse()
            .map_err(|_| format!("expected a number literal for {metric_tok:?}, got {literal_tok:?}"))?;
        Literal::Number(value)
    };

    Ok(ParsedCondition { metric, operator, literal })
}

/// Validate `rule.condition` at load time, returning a
/// [`GovernanceError::InvalidRule`] rather than panicking or deferring the
/// failure to evaluation time (spec §9 redesign flag).
pub fn validate_rule(rule: &CircuitBreakerRule) -> Result<ParsedCondition, GovernanceError> {
    parse_condition(&rule.condition).map_err(|reason| GovernanceError::InvalidRule(rule.name.clone(), reason))
}

/// Resolve a metric's current numeric/string value from a snapshot.
/// `incident.severity` is derived: `"critical"` when the window contains
/// any critical incident, `"none"` otherwise — the snapshot carries only a
/// count, not a full incident log (documented in DESIGN.md).
fn metric_value(metric: Metric, snapshot: &MetricsSnapshot) -> Literal {
    match metric {
        Metric::ErrorRate => Literal::Number(snapshot.error_rate()),
        Metric::SuccessRate => Literal::Number(snapshot.success_rate()),
        Metric::RollbackRate => Literal::Number(snapshot.rollback_rate()),
        Metric::ApprovalRate => Literal::Number(snapshot.approval_rate()),
        Metric::IncidentsCritical => Literal::Number(snapshot.incidents_critical as f64),
        Metric::IncidentSeverity => {
            let severity = if snapshot.incidents_critical > 0 { "critical" } else { "none" };
            Literal::Str(severity.to_string())
        }
        Metric::CommandTypeFailures => {
            let max = snapshot.command_type_failures.values().copied().max().unwrap_or(0);
            Literal::Number(max as f64)
        }
        Metric::ConstraintViolations => Literal::Number(snapshot.constraint_violations as f64),
        Metric::EmergencyAborts => Literal::Number(snapshot.emergency_aborts as f64),
    }
}

/// Evaluate a parsed condition against a metrics snapshot.
pub fn evaluate(condition: &ParsedCondition, snapshot: &MetricsSnapshot) -> bool {
    let observed = metric_value(condition.metric, snapshot);
    match (&observed, &condition.literal, condition.operator) {
        (Literal::Number(a), Literal::Number(b), op) => match op {
            Operator::Gt => a > b,
            Operator::Gte => a >= b,
            Operator::Lt => a < b,
            Operator::Lte => a <= b,
            Operator::Eq => (a - b).abs() < f64::EPSILON,
        },
        (Literal::Str(a), Literal::Str(b), Operator::Eq) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_condition() {
        let parsed = parse_condition("errorRate > 0.05").unwrap();
        assert_eq!(parsed.metric, Metric::ErrorRate);
        assert_eq!(parsed.operator, Operator::Gt);
        assert_eq!(parsed.literal, Literal::Number(0.05));
    }

    #[test]
    fn parses_string_condition() {
        let parsed = parse_condition(r#"incident.severity === "critical""#).unwrap();
        assert_eq!(parsed.metric, Metric::IncidentSeverity);
        assert_eq!(parsed.literal, Literal::Str("critical".to_string()));
    }

    #[test]
    fn rejects_unknown_metric() {
        assert!(parse_condition("bogusMetric > 1").is_err());
    }

    #[test]
    fn rejects_malformed_token_count() {
        assert!(parse_condition("errorRate > 0.05 window=5m").is_err());
    }

    #[test]
    fn rejects_non_eq_operator_for_string_metric() {
        assert!(parse_condition(r#"incident.severity > "critical""#).is_err());
    }

    #[test]
    fn evaluates_error_rate_breach() {
        let parsed = parse_condition("errorRate > 0.05").unwrap();
        let mut snapshot = MetricsSnapshot::default();
        snapshot.total = 10;
        snapshot.failed = 1;
        assert!(evaluate(&parsed, &snapshot));
    }

    #[test]
    fn evaluates_error_rate_within_bound() {
        let parsed = parse_condition("errorRate > 0.5").unwrap();
        let mut snapshot = MetricsSnapshot::default();
        snapshot.total = 10;
        snapshot.failed = 1;
        assert!(!evaluate(&parsed, &snapshot));
    }
}
