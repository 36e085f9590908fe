//! Capability interfaces for the duck-typed collaborators of the original
//! system (oracle simulator, Merkle tree, self-healing engine, audit sink).
//! Each interface exposes only the methods its consumer actually calls (§9
//! design note), rather than one fat collaborator trait.

use serde::{Deserialize, Serialize};

use crate::error::KernelError;
use crate::panic::IntegrityPanic;
use crate::rule::HealingRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OracleStatus {
    Verified,
    Stale,
    SignatureInvalid,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleVerification {
    pub status: OracleStatus,
    pub age_ms: u64,
    pub value: String,
}

/// Verifies an external oracle proof backing an oracle-influenced balance
/// change (§4.4 `check_oracle_conservation`).
pub trait OracleVerifier: Send + Sync {
    fn verify_oracle_proof(&self, oracle_variable: &str, claimed_value: &str) -> Result<OracleVerification, KernelError>;
}

/// The content-addressed digest collaborator (§3.4, §4.9, §4.10).
pub trait MerkleTree: Send + Sync {
    /// The digest currently on record (e.g. the last committed root).
    fn root_hash(&self) -> String;
    /// Recomputes the digest of a given canonical state, without mutating
    /// the stored root.
    fn recompute(&self, state: &serde_json::Value) -> String;
    /// Replaces the stored root, e.g. after a successful commit.
    fn set_root_hash(&self, root: String);
}

/// The dynamic L-1 pattern table, shared across the learner and adversarial
/// loops and the analyzer itself (§4.3, §4.11).
pub trait RuleStore: Send + Sync {
    fn active_rules(&self) -> Vec<HealingRule>;
    /// Atomic pointer-swap injection; see §5 shared-resource policy.
    fn inject_rule(&self, rule: HealingRule) -> Result<(), KernelError>;
    fn record_match(&self, rule_id: uuid::Uuid, true_positive: bool);
    /// Flips `is_active` to `false` for the given rule (§3.7 deactivation
    /// sweep); a no-op if the rule is unknown or already inactive.
    fn deactivate_rule(&self, rule_id: uuid::Uuid);
}

/// Durable sink for fatal integrity panics (§7: "appended to an audit
/// database table `integrity_panics`").
pub trait IntegrityAuditSink: Send + Sync {
    fn record_panic(&self, panic: &IntegrityPanic);
}
