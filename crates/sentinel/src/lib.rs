//! Sentinel Monitor (§4.8): per-transaction CPU/memory accounting, the
//! rolling anomaly window, crisis detection, Adaptive Rigor, and durable
//! telemetry persistence, composed behind one `Sentinel` handle so the
//! judge/defense layers only need `start_transaction`/`end_transaction`.

pub mod cpu;
pub mod crisis;
pub mod db;
pub mod rigor;
pub mod rolling;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;
use veritas_core::limits::DefenseLimits;
use veritas_core::metrics::TransactionMetrics;
use veritas_core::outcome::Outcome;

pub use cpu::{resident_memory_kb, ThreadCpuBaseline};
pub use crisis::{anomaly_score_floor, CrisisDetector, CrisisListener};
pub use db::TelemetryStore;
pub use rigor::{RigorConfig, RigorController, RigorLevel};
pub use rolling::RollingWindow;

/// State captured at `start_transaction`, handed back to `end_transaction`.
pub struct TransactionHandle {
    tx_id: Uuid,
    start_time: chrono::DateTime<Utc>,
    cpu_baseline: ThreadCpuBaseline,
    memory_start_kb: i64,
}

/// Ties the rolling window, crisis detector, rigor controller, and optional
/// telemetry store into one per-process monitor. `telemetry` is `None` in
/// configurations that don't want durable persistence (e.g. most unit
/// tests); every other piece of Sentinel still runs.
pub struct Sentinel {
    window: Mutex<RollingWindow>,
    crisis: Arc<CrisisDetector>,
    rigor: Arc<RigorController>,
    telemetry: Option<TelemetryStore>,
    limits: DefenseLimits,
}

impl Sentinel {
    pub fn new(limits: DefenseLimits) -> Self {
        let rigor = Arc::new(RigorController::new());
        let crisis = Arc::new(CrisisDetector::new());
        crisis.register_listener(rigor.as_listener());
        Self { window: Mutex::new(RollingWindow::new()), crisis, rigor, telemetry: None, limits }
    }

    pub fn with_telemetry(mut self, store: TelemetryStore) -> Self {
        self.telemetry = Some(store);
        self
    }

    pub fn rigor_snapshot(&self) -> RigorConfig {
        self.rigor.snapshot()
    }

    pub fn crisis_active(&self) -> bool {
        self.crisis.is_active()
    }

    /// Called at the top of a verification call, before any defense layer
    /// runs, so the CPU/memory baseline excludes pipeline-entry overhead
    /// the embedder doesn't control.
    pub fn start_transaction(&self, tx_id: Uuid) -> TransactionHandle {
        TransactionHandle {
            tx_id,
            start_time: Utc::now(),
            cpu_baseline: ThreadCpuBaseline::capture(),
            memory_start_kb: resident_memory_kb().unwrap_or(0),
        }
    }

    /// Called once the full pipeline has produced an outcome. Computes the
    /// CPU/memory deltas, scores the transaction against the rolling
    /// window, updates crisis detection, persists the metrics (if a
    /// telemetry store is configured), and returns the finished record.
    pub fn end_transaction(
        &self,
        handle: TransactionHandle,
        layer_results: BTreeMap<String, bool>,
        outcome: Outcome,
        z3_duration_ms: f64,
    ) -> TransactionMetrics {
        let end_time = Utc::now();
        let wall_duration_ms = (end_time - handle.start_time).num_milliseconds().max(0) as f64;
        let cpu_time_ms = handle.cpu_baseline.elapsed_ms();
        let memory_delta_kb = resident_memory_kb().unwrap_or(handle.memory_start_kb) - handle.memory_start_kb;
        let cpu_violation = cpu_time_ms > self.limits.cpu_violation_ceiling_ms as f64;

        let anomaly_score = {
            let mut window = self.window.lock();
            window.record_and_score(cpu_time_ms, memory_delta_kb, wall_duration_ms)
        };

        let (anomaly_fraction, window_count) = {
            let mut window = self.window.lock();
            (window.fraction_above(anomaly_score_floor()), window.window_count())
        };
        self.crisis.observe(anomaly_fraction, window_count);

        if cpu_violation {
            if let Some(store) = &self.telemetry {
                store.record_cpu_violation(handle.tx_id.to_string(), cpu_time_ms, self.limits.cpu_violation_ceiling_ms as f64);
            }
            tracing::warn!(tx_id = %handle.tx_id, cpu_time_ms, ceiling_ms = self.limits.cpu_violation_ceiling_ms, "cpu violation");
        }

        let mut metrics = TransactionMetrics::new(handle.tx_id, handle.start_time);
        metrics.end_time = end_time;
        metrics.wall_duration_ms = wall_duration_ms;
        metrics.cpu_time_ms = cpu_time_ms;
        metrics.memory_delta_kb = memory_delta_kb;
        metrics.z3_duration_ms = z3_duration_ms;
        metrics.layer_results = layer_results;
        metrics.anomaly_score = anomaly_score;
        metrics.outcome = outcome;
        metrics.cpu_violation = cpu_violation;

        if let Some(store) = &self.telemetry {
            store.record_transaction(metrics.clone());
        }

        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_and_end_transaction_produce_populated_metrics() {
        let sentinel = Sentinel::new(DefenseLimits::default());
        let handle = sentinel.start_transaction(Uuid::new_v4());
        let mut layer_results = BTreeMap::new();
        layer_results.insert("sanitizer".to_string(), true);
        let metrics = sentinel.end_transaction(handle, layer_results, Outcome::Proved, 5.0);

        assert_eq!(metrics.outcome, Outcome::Proved);
        assert!(metrics.cpu_time_ms >= 0.0);
        assert!(metrics.layer_results.contains_key("sanitizer"));
    }

    #[test]
    fn rigor_starts_normal_and_reflects_crisis_via_shared_detector() {
        let sentinel = Sentinel::new(DefenseLimits::default());
        assert_eq!(sentinel.rigor_snapshot().level, RigorLevel::Normal);
        assert!(!sentinel.crisis_active());
    }

    #[test]
    fn with_telemetry_persists_transaction_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let store = TelemetryStore::open(dir.path().join("telemetry.db")).unwrap();
        let sentinel = Sentinel::new(DefenseLimits::default()).with_telemetry(store);

        let handle = sentinel.start_transaction(Uuid::new_v4());
        let metrics = sentinel.end_transaction(handle, BTreeMap::new(), Outcome::Rejected, 0.0);
        assert_eq!(metrics.outcome, Outcome::Rejected);
    }
}
