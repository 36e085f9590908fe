//! Embedder-facing configuration for one [`crate::Kernel`] instance: where
//! durable state lives and which defense limits govern it.

use std::path::{Path, PathBuf};

use veritas_core::limits::DefenseLimits;

/// Everything a [`crate::Kernel::open`] call needs to find its durable
/// state. `state_dir` holds `state.json`, `merkle_root.txt`, per-commit
/// `state.<tx_id>.tmp` files, and `recovery_audit.log`; the WAL, rule
/// table, and telemetry database are configurable independently since
/// deployments commonly put the WAL on its own volume.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub state_dir: PathBuf,
    pub wal_path: PathBuf,
    pub rules_path: PathBuf,
    pub telemetry_db_path: Option<PathBuf>,
    pub limits: DefenseLimits,
}

impl KernelConfig {
    /// A single-directory layout: `root/state.json`, `root/wal.log`,
    /// `root/rules.json`, `root/telemetry.db`. Fine for embedding and tests;
    /// production deployments will usually override `wal_path` at least.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            wal_path: root.join("wal.log"),
            rules_path: root.join("rules.json"),
            telemetry_db_path: Some(root.join("telemetry.db")),
            state_dir: root,
            limits: DefenseLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: DefenseLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_wal_path(mut self, path: impl AsRef<Path>) -> Self {
        self.wal_path = path.as_ref().to_path_buf();
        self
    }

    pub fn with_rules_path(mut self, path: impl AsRef<Path>) -> Self {
        self.rules_path = path.as_ref().to_path_buf();
        self
    }

    /// Disables the SQLite telemetry writer thread entirely; the rest of
    /// Sentinel (rolling window, crisis detection, Adaptive Rigor) still runs.
    pub fn without_telemetry(mut self) -> Self {
        self.telemetry_db_path = None;
        self
    }
}
