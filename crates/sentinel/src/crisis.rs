//! Crisis-mode detection and listener broadcast (§4.8, §5).
//!
//! Entry and exit are deliberately asymmetric: entry reacts within a single
//! 60s window so a live attack is caught quickly, while exit requires a
//! much longer clean period (120s under a strict threshold) so Adaptive
//! Rigor doesn't flap back to NORMAL mid-attack just because one window
//! happened to look quiet.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

const ANOMALY_FRACTION_THRESHOLD: f64 = 0.10;
const ANOMALY_SCORE_FLOOR: f64 = 0.7;
const SUSTAINED_RATE_THRESHOLD: usize = 1000;

const DEACTIVATION_QUIET_PERIOD: Duration = Duration::from_secs(120);
const DEACTIVATION_FRACTION_CEILING: f64 = 0.02;

pub type CrisisListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Tracks whether the system is currently in crisis mode and notifies
/// registered listeners synchronously on any transition (§5: "the Adaptive
/// Rigor config swap happens synchronously with the crisis transition, never
/// as a follow-up tick").
pub struct CrisisDetector {
    active: RwLock<bool>,
    quiet_since: RwLock<Option<Instant>>,
    listeners: RwLock<Vec<CrisisListener>>,
}

impl CrisisDetector {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(false),
            quiet_since: RwLock::new(None),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn is_active(&self) -> bool {
        *self.active.read()
    }

    pub fn register_listener(&self, listener: CrisisListener) {
        self.listeners.write().push(listener);
    }

    /// Call after every transaction completes, with the fraction of the
    /// current 60s window scoring at or above [`ANOMALY_SCORE_FLOOR`] and the
    /// count of transactions observed in that window.
    pub fn observe(&self, anomaly_fraction: f64, window_count: usize) {
        let was_active = self.is_active();

        if !was_active {
            let sustained_rate = window_count >= SUSTAINED_RATE_THRESHOLD;
            let anomaly_spike = anomaly_fraction > ANOMALY_FRACTION_THRESHOLD;
            if sustained_rate || anomaly_spike {
                self.transition(true);
                return;
            }
            return;
        }

        // Already in crisis: track how long the window has stayed under the
        // deactivation ceiling; reset the clock the moment it isn't.
        if anomaly_fraction < DEACTIVATION_FRACTION_CEILING {
            let mut quiet_since = self.quiet_since.write();
            let started = *quiet_since.get_or_insert_with(Instant::now);
            if started.elapsed() >= DEACTIVATION_QUIET_PERIOD {
                drop(quiet_since);
                self.transition(false);
            }
        } else {
            *self.quiet_since.write() = None;
        }
    }

    fn transition(&self, active: bool) {
        *self.active.write() = active;
        *self.quiet_since.write() = None;
        tracing::warn!(active, "crisis mode transition");
        for listener in self.listeners.read().iter() {
            listener(active);
        }
    }
}

impl Default for CrisisDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// The anomaly-score floor counted toward the crisis fraction, exposed so
/// callers computing `anomaly_fraction` from a [`crate::rolling::RollingWindow`]
/// use the same threshold this module checks against.
pub fn anomaly_score_floor() -> f64 {
    ANOMALY_SCORE_FLOOR
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn starts_inactive() {
        let detector = CrisisDetector::new();
        assert!(!detector.is_active());
    }

    #[test]
    fn anomaly_spike_activates_crisis_and_notifies_listeners() {
        let detector = CrisisDetector::new();
        let notifications = Arc::new(AtomicUsize::new(0));
        let counter = notifications.clone();
        detector.register_listener(Arc::new(move |active| {
            if active {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        detector.observe(0.5, 50);
        assert!(detector.is_active());
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sustained_rate_activates_crisis_even_with_low_anomaly_fraction() {
        let detector = CrisisDetector::new();
        detector.observe(0.0, 1500);
        assert!(detector.is_active());
    }

    #[test]
    fn brief_quiet_window_does_not_deactivate_crisis() {
        let detector = CrisisDetector::new();
        detector.observe(0.5, 50);
        assert!(detector.is_active());
        detector.observe(0.0, 10);
        assert!(detector.is_active(), "single quiet window is not enough to deactivate");
    }
}
