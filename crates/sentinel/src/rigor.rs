//! Adaptive Rigor (§4.8, §5): the bundle of verification knobs that tighten
//! under crisis and loosen back once the crisis detector clears. Config is
//! swapped as a whole snapshot, never field-by-field, so a verification
//! call that reads it mid-transition never observes a torn mix of
//! crisis and normal values.

use std::sync::Arc;

use parking_lot::RwLock;

/// One coherent rigor configuration. `RECOVERY` reuses `NORMAL`'s numeric
/// bounds but is tracked as a distinct, sticky state (§5: "RECOVERY does not
/// fall back to CRISIS on a single anomalous transaction; only a fresh
/// crisis detection does").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigorLevel {
    Normal,
    Crisis,
    Recovery,
}

#[derive(Debug, Clone)]
pub struct RigorConfig {
    pub level: RigorLevel,
    pub z3_timeout_ms: u64,
    pub proof_of_work_required: bool,
    pub entropy_flag_threshold: f64,
    pub oracle_max_staleness_ms: u64,
}

impl RigorConfig {
    pub fn normal() -> Self {
        Self {
            level: RigorLevel::Normal,
            z3_timeout_ms: 30_000,
            proof_of_work_required: false,
            entropy_flag_threshold: 0.8,
            oracle_max_staleness_ms: 30_000,
        }
    }

    pub fn crisis() -> Self {
        Self {
            level: RigorLevel::Crisis,
            z3_timeout_ms: 5_000,
            proof_of_work_required: true,
            entropy_flag_threshold: 0.6,
            oracle_max_staleness_ms: 10_000,
        }
    }

    pub fn recovery() -> Self {
        Self { level: RigorLevel::Recovery, ..Self::normal() }
    }
}

/// Holds the currently active [`RigorConfig`] behind a lock, swapped whole
/// on crisis transitions. Register this with a
/// [`crate::crisis::CrisisDetector`] via [`RigorController::as_listener`] so
/// the swap happens synchronously with crisis entry/exit.
pub struct RigorController {
    current: RwLock<RigorConfig>,
}

impl RigorController {
    pub fn new() -> Self {
        Self { current: RwLock::new(RigorConfig::normal()) }
    }

    /// Snapshot taken at verification entry; callers must not hold this
    /// across the verification call in a way that could observe a
    /// subsequent swap (§5 copy-on-read policy).
    pub fn snapshot(&self) -> RigorConfig {
        self.current.read().clone()
    }

    pub fn enter_crisis(&self) {
        *self.current.write() = RigorConfig::crisis();
    }

    /// Crisis cleared: enters RECOVERY rather than jumping straight back to
    /// NORMAL bounds-wise they're identical, but RECOVERY is tracked so a
    /// future policy (e.g. a longer probation window) has somewhere to hang
    /// without another state needing to be invented.
    pub fn exit_crisis(&self) {
        *self.current.write() = RigorConfig::recovery();
    }

    /// Listener closure suitable for [`crate::crisis::CrisisDetector::register_listener`].
    pub fn as_listener(self: &Arc<Self>) -> crate::crisis::CrisisListener {
        let this = self.clone();
        Arc::new(move |active: bool| {
            if active {
                this.enter_crisis();
            } else {
                this.exit_crisis();
            }
        })
    }
}

impl Default for RigorController {
    fn default() -> Self {
        Self::new()
    }
}
