//! Per-machine heuristics configuration (spec §3 "Heuristics Config").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeuristicsConfig {
    pub session_gap_seconds: f64,
    pub tp_search_window_seconds: f64,
    pub min_first_crack_seconds: f64,
    pub fc_bt_threshold_c: f64,
    pub fc_ror_max_threshold: Option<f64>,
    pub drop_silence_seconds: f64,
    pub max_buffer_points: usize,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            session_gap_seconds: 30.0,
            tp_search_window_seconds: 180.0,
            min_first_crack_seconds: 300.0,
            fc_bt_threshold_c: 196.0,
            fc_ror_max_threshold: None,
            drop_silence_seconds: 10.0,
            max_buffer_points: 2000,
        }
    }
}

/// A partial override of [`HeuristicsConfig`], every field optional, as
/// accepted by `POST /config` (spec §6) and [`HeuristicsConfig::merge`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialHeuristicsConfig {
    pub session_gap_seconds: Option<f64>,
    pub tp_search_window_seconds: Option<f64>,
    pub min_first_crack_seconds: Option<f64>,
    pub fc_bt_threshold_c: Option<f64>,
    pub fc_ror_max_threshold: Option<Option<f64>>,
    pub drop_silence_seconds: Option<f64>,
    pub max_buffer_points: Option<usize>,
}

impl HeuristicsConfig {
    /// Deep-merge `partial` over `self`, returning the merged config. Only
    /// fields explicitly set in `partial` override `self`.
    pub fn merged_with(&self, partial: &PartialHeuristicsConfig) -> Self {
        Self {
            session_gap_seconds: partial.session_gap_seconds.unwrap_or(self.session_gap_seconds),
            tp_search_window_seconds: partial
                .tp_search_window_seconds
                .unwrap_or(self.tp_search_window_seconds),
            min_first_crack_seconds: partial
                .min_first_crack_seconds
                .unwrap_or(self.min_first_crack_seconds),
            fc_bt_threshold_c: partial.fc_bt_threshold_c.unwrap_or(self.fc_bt_threshold_c),
            fc_ror_max_threshold: partial
                .fc_ror_max_threshold
                .clone()
                .unwrap_or(self.fc_ror_max_threshold),
            drop_silence_seconds: partial
                .drop_silence_seconds
                .unwrap_or(self.drop_silence_seconds),
            max_buffer_points: partial.max_buffer_points.unwrap_or(self.max_buffer_points),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overrides_only_set_fields() {
        let base = HeuristicsConfig::default();
        let partial = PartialHeuristicsConfig {
            fc_bt_threshold_c: Some(200.0),
            ..Default::default()
        };
        let merged = base.merged_with(&partial);
        assert_eq!(merged.fc_bt_threshold_c, 200.0);
        assert_eq!(merged.session_gap_seconds, base.session_gap_seconds);
    }

    #[test]
    fn merge_can_clear_optional_threshold() {
        let base = HeuristicsConfig {
            fc_ror_max_threshold: Some(5.0),
            ..Default::default()
        };
        let partial = PartialHeuristicsConfig {
            fc_ror_max_threshold: Some(None),
            ..Default::default()
        };
        let merged = base.merged_with(&partial);
        assert_eq!(merged.fc_ror_max_threshold, None);
    }
}
