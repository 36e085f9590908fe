//! Per-transaction telemetry record (§3.6).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::outcome::Outcome;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionMetrics {
    pub tx_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub wall_duration_ms: f64,
    /// Per-thread CPU time, sampled from the OS thread clock (§4.8).
    pub cpu_time_ms: f64,
    pub memory_delta_kb: i64,
    pub z3_duration_ms: f64,
    /// Pass/fail per pipeline layer, e.g. "sanitizer" -> true.
    pub layer_results: BTreeMap<String, bool>,
    pub anomaly_score: f64,
    pub outcome: Outcome,
    pub cpu_violation: bool,
}

impl TransactionMetrics {
    pub fn new(tx_id: Uuid, start_time: DateTime<Utc>) -> Self {
        Self {
            tx_id,
            start_time,
            end_time: start_time,
            wall_duration_ms: 0.0,
            cpu_time_ms: 0.0,
            memory_delta_kb: 0,
            z3_duration_ms: 0.0,
            layer_results: BTreeMap::new(),
            anomaly_score: 0.0,
            outcome: Outcome::Rejected,
            cpu_violation: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_metrics_start_with_zeroed_fields() {
        let m = TransactionMetrics::new(Uuid::nil(), Utc::now());
        assert_eq!(m.wall_duration_ms, 0.0);
        assert!(m.layer_results.is_empty());
        assert!(!m.cpu_violation);
    }
}
