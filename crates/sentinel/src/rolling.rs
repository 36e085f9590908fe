//! Rolling 60-second window of per-transaction samples, used both to derive
//! the anomaly score (§4.8) and to drive crisis detection (§4.8, §5: "the
//! rolling anomaly window is a ring buffer protected by a mutex; all updates
//! occur only on `end_transaction`").

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    cpu_ms: f64,
    memory_delta_kb: i64,
    wall_ms: f64,
    anomaly_score: f64,
}

/// A mean/variance accumulator over the samples currently in the window,
/// recomputed lazily rather than kept as a running sum — the window holds at
/// most a few thousand entries on any realistic transaction rate, so an O(n)
/// pass on `record` is cheap and avoids floating-point drift from repeated
/// incremental updates.
pub struct RollingWindow {
    samples: VecDeque<Sample>,
}

impl RollingWindow {
    pub fn new() -> Self {
        Self { samples: VecDeque::new() }
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Computes the anomaly score for a new sample against the current
    /// window's mean, then records the sample (with its own score) into the
    /// window for subsequent observations and crisis-fraction tracking.
    ///
    /// Score: weighted average of each metric's deviation from the rolling
    /// mean, each deviation expressed as a fraction of the mean (so the three
    /// metrics, which live on very different scales, contribute
    /// comparably), clipped to [0,1]. Weights are the implementer's choice
    /// per §4.8; cpu/memory weigh more than wall time because a single
    /// expensive-but-fast call is less suspicious than the same deviation
    /// sustained on repeated calls.
    pub fn record_and_score(&mut self, cpu_ms: f64, memory_delta_kb: i64, wall_ms: f64) -> f64 {
        let now = Instant::now();
        self.evict_expired(now);

        let score = if self.samples.is_empty() {
            0.0
        } else {
            let mean_cpu = self.mean(|s| s.cpu_ms);
            let mean_mem = self.mean(|s| s.memory_delta_kb.unsigned_abs() as f64);
            let mean_wall = self.mean(|s| s.wall_ms);

            let dev_cpu = relative_deviation(cpu_ms, mean_cpu);
            let dev_mem = relative_deviation(memory_delta_kb.unsigned_abs() as f64, mean_mem);
            let dev_wall = relative_deviation(wall_ms, mean_wall);

            (0.4 * dev_cpu + 0.35 * dev_mem + 0.25 * dev_wall).clamp(0.0, 1.0)
        };

        self.samples.push_back(Sample { at: now, cpu_ms, memory_delta_kb, wall_ms, anomaly_score: score });
        score
    }

    fn mean<F: Fn(&Sample) -> f64>(&self, f: F) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(f).sum::<f64>() / self.samples.len() as f64
    }

    /// Fraction of in-window samples with `anomaly_score >= threshold`
    /// (§4.8 crisis detection: "fraction of transactions with anomaly_score
    /// >= 0.7 over the 60s window exceeds 10%").
    pub fn fraction_above(&mut self, threshold: f64) -> f64 {
        self.evict_expired(Instant::now());
        if self.samples.is_empty() {
            return 0.0;
        }
        let above = self.samples.iter().filter(|s| s.anomaly_score >= threshold).count();
        above as f64 / self.samples.len() as f64
    }

    /// Transactions observed in the current 60s window (for the sustained
    /// request-rate leg of crisis detection).
    pub fn window_count(&mut self) -> usize {
        self.evict_expired(Instant::now());
        self.samples.len()
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new()
    }
}

fn relative_deviation(value: f64, mean: f64) -> f64 {
    if mean <= f64::EPSILON {
        // No baseline yet: a non-zero value with zero history is treated as
        // fully deviant rather than division-by-zero noise.
        return if value > 0.0 { 1.0 } else { 0.0 };
    }
    ((value - mean).abs() / mean).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_scores_zero_with_no_baseline() {
        let mut window = RollingWindow::new();
        let score = window.record_and_score(10.0, 1000, 5.0);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn large_deviation_from_established_baseline_scores_high() {
        let mut window = RollingWindow::new();
        for _ in 0..20 {
            window.record_and_score(10.0, 1000, 5.0);
        }
        let score = window.record_and_score(1000.0, 1_000_000, 500.0);
        assert!(score > 0.5, "expected high anomaly score, got {score}");
    }

    #[test]
    fn fraction_above_counts_only_flagged_samples() {
        let mut window = RollingWindow::new();
        for _ in 0..9 {
            window.record_and_score(10.0, 1000, 5.0);
        }
        window.record_and_score(10_000.0, 10_000_000, 50_000.0);
        let fraction = window.fraction_above(0.7);
        assert!(fraction > 0.0 && fraction <= 0.1 + 1e-9);
    }
}
