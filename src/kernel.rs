//! The `Kernel`: the wiring function that composes the parser, the L0-L3
//! defense gauntlet, the atomic commit/recovery layer, Sentinel, and the
//! self-healing loops behind the two embedder-facing operations (§6.2).

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use veritas_core::error::{KernelError, KernelResult, RejectionCategory};
use veritas_core::ir::Intent;
use veritas_core::limits::DefenseLimits;
use veritas_core::outcome::{Outcome, VerificationReport};
use veritas_core::traits::{IntegrityAuditSink, MerkleTree, OracleVerifier};

use veritas_defense::{check_conservation, check_overflow, conservation::extract_balance_changes, sanitize, RuleTable, SemanticAnalyzer};
use veritas_durability::{recover_from_crash, AtomicCommitLayer, ChangeSet, Sha256MerkleTree};
use veritas_healing::{load_rules, AttackTrace, BlockingLayer, Learner, PipelineProbe, ProbeResult};
use veritas_judge::{prove, ProofReport};
use veritas_sentinel::{rigor::RigorConfig, Sentinel, TelemetryStore};

use crate::config::KernelConfig;

/// One `(BlockingLayer, KernelError)` pair: which layer stopped the intent
/// and why, carried through to telemetry and the self-healing feedback loop.
type PipelineOutcome = Result<ProofReport, (BlockingLayer, KernelError)>;

pub struct Kernel {
    limits: DefenseLimits,
    rule_store: Arc<RuleTable>,
    sentinel: Sentinel,
    commit_layer: AtomicCommitLayer,
    merkle_tree: Arc<dyn MerkleTree>,
    merkle_root_path: PathBuf,
    oracle: Option<Arc<dyn OracleVerifier>>,
    learner: Arc<Learner>,
}

impl Kernel {
    /// Opens (or initializes) durable state at `config`'s paths. A brand new
    /// `state_dir` (no canonical state file, no WAL) is treated as genesis
    /// rather than a crash: an empty state and its digest are written
    /// directly, bypassing `recover_from_crash`, since there is nothing to
    /// roll forward or back. Any other layout runs the full fail-closed
    /// recovery protocol (§4.10) before the kernel is usable.
    pub fn open(config: KernelConfig) -> KernelResult<Self> {
        fs::create_dir_all(&config.state_dir)?;
        let state_file = config.state_dir.join("state.json");
        let merkle_root_path = config.state_dir.join("merkle_root.txt");
        let is_genesis = !state_file.exists() && !config.wal_path.exists();

        let telemetry = match &config.telemetry_db_path {
            Some(path) => Some(TelemetryStore::open(path)?),
            None => None,
        };

        let merkle_tree: Arc<dyn MerkleTree> = if is_genesis {
            let empty = serde_json::json!({});
            fs::write(&state_file, serde_json::to_string_pretty(&empty)?)?;
            let tree = Arc::new(Sha256MerkleTree::for_state(&empty));
            fs::write(&merkle_root_path, tree.root_hash())?;
            tree
        } else {
            let stored_root = fs::read_to_string(&merkle_root_path).unwrap_or_default();
            let tree: Arc<dyn MerkleTree> = Arc::new(Sha256MerkleTree::new(stored_root));
            let audit_sink: Option<&dyn IntegrityAuditSink> = telemetry.as_ref().map(|t| t as &dyn IntegrityAuditSink);
            recover_from_crash(&config.state_dir, &config.wal_path, Some(tree.clone()), audit_sink);
            tree
        };

        let commit_layer = AtomicCommitLayer::open(&config.state_dir, &config.wal_path)?.with_merkle_tree(merkle_tree.clone());

        let rule_store = Arc::new(load_rules(&config.rules_path)?);
        let learner = Arc::new(Learner::new(rule_store.clone(), &config.limits));

        let mut sentinel = Sentinel::new(config.limits);
        if let Some(store) = telemetry {
            sentinel = sentinel.with_telemetry(store);
        }

        Ok(Self {
            limits: config.limits,
            rule_store,
            sentinel,
            commit_layer,
            merkle_tree,
            merkle_root_path,
            oracle: None,
            learner,
        })
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn OracleVerifier>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn rule_store(&self) -> Arc<RuleTable> {
        self.rule_store.clone()
    }

    pub fn learner(&self) -> Arc<Learner> {
        self.learner.clone()
    }

    pub fn merkle_root(&self) -> String {
        self.merkle_tree.root_hash()
    }

    /// §6.2: parses, runs the full L0-L3 gauntlet, instruments the result
    /// through Sentinel, and feeds the self-healing learner.
    pub fn verify_logic(&self, source: &str) -> VerificationReport {
        let rigor = self.sentinel.rigor_snapshot();
        let tx_id = Uuid::new_v4();
        let handle = self.sentinel.start_transaction(tx_id);
        let mut layer_results = BTreeMap::new();

        let intent = match veritas_parser::parse_intent(source) {
            Ok(intent) => intent,
            Err(err) => {
                layer_results.insert("parser".to_string(), false);
                let metrics = self.sentinel.end_transaction(handle, layer_results, Outcome::Rejected, 0.0);
                return VerificationReport {
                    status: Outcome::Rejected,
                    message: err.to_string(),
                    model: None,
                    telemetry: metrics,
                    constraint_violation: None,
                };
            }
        };
        layer_results.insert("parser".to_string(), true);

        let l0 = sanitize(source, &intent, &self.limits);
        layer_results.insert("sanitizer".to_string(), l0.is_ok());

        let pipeline_result = match l0 {
            Ok(_) => self.run_core_pipeline(&intent, &rigor, &mut layer_results),
            Err(err) => Err((BlockingLayer::Sanitizer, err)),
        };

        self.finish(intent, handle, layer_results, pipeline_result)
    }

    /// L-1 through L3 only (§4.3-§4.6) — shared between `verify_logic` and
    /// the adversarial trainer's [`PipelineProbe`], neither of which needs
    /// L0's raw-text checks: `verify_logic` already ran them against the
    /// original source, and generated scenarios have no source text to run
    /// them against in the first place.
    fn run_core_pipeline(&self, intent: &Intent, rigor: &RigorConfig, layer_results: &mut BTreeMap<String, bool>) -> PipelineOutcome {
        let analyzer = SemanticAnalyzer::new(self.rule_store.clone());
        match analyzer.analyze(intent, &self.limits) {
            Ok(_) => {
                layer_results.insert("semantic".to_string(), true);
            }
            Err(err) => {
                layer_results.insert("semantic".to_string(), false);
                return Err((BlockingLayer::SemanticL1, err));
            }
        }

        let changes = extract_balance_changes(intent);
        match check_conservation(&changes, self.oracle.as_deref(), None, &self.limits) {
            Ok(_) => {
                layer_results.insert("conservation".to_string(), true);
            }
            Err(err) => {
                layer_results.insert("conservation".to_string(), false);
                return Err((BlockingLayer::Conservation, err));
            }
        }

        match check_overflow(intent, &changes) {
            Ok(_) => {
                layer_results.insert("overflow".to_string(), true);
            }
            Err(err) => {
                layer_results.insert("overflow".to_string(), false);
                return Err((BlockingLayer::Overflow, err));
            }
        }

        match prove(intent, rigor.z3_timeout_ms, &self.limits) {
            Ok(report) => {
                layer_results.insert("judge".to_string(), true);
                Ok(report)
            }
            Err(err) => {
                layer_results.insert("judge".to_string(), false);
                Err((BlockingLayer::Judge, err))
            }
        }
    }

    fn finish(
        &self,
        intent: Intent,
        handle: veritas_sentinel::TransactionHandle,
        layer_results: BTreeMap<String, bool>,
        result: PipelineOutcome,
    ) -> VerificationReport {
        let (status, message, model, constraint_violation, z3_duration_ms) = classify(&result);
        let metrics = self.sentinel.end_transaction(handle, layer_results, status, z3_duration_ms);

        match &result {
            Ok(_) => self.learner.record_legitimate(intent),
            Err((layer, err)) => {
                let attack_type = err.rejection_category().map(|c| c.to_string()).unwrap_or_else(|| layer_name(*layer));
                let trace = AttackTrace::capture(attack_type, &intent);
                self.learner.learn_from_rejection(*layer, &trace);
            }
        }

        VerificationReport { status, message, model, telemetry: metrics, constraint_violation }
    }

    /// §6.2: stages `changes` and runs them through the seven-step atomic
    /// commit protocol. `merkle_root_before` is validated against the live
    /// root before anything is staged (a stale read never gets applied);
    /// `merkle_root_after` is the caller's expectation of the resulting
    /// root, checked once the commit has gone through — a mismatch there
    /// cannot be rolled back (the WAL COMMIT has already been fsynced) so it
    /// surfaces as a `BatchResult` error the caller must alert on, not a
    /// process-halting integrity panic (those are reserved for recovery-time
    /// checks, §4.10).
    pub fn commit(&self, changes: ChangeSet, merkle_root_before: String, merkle_root_after: String) -> veritas_durability::BatchResult {
        let start = std::time::Instant::now();
        let current_root = self.merkle_tree.root_hash();
        if merkle_root_before != current_root {
            tracing::warn!(expected = %merkle_root_before, actual = %current_root, "commit rejected: stale merkle_root_before");
            return veritas_durability::BatchResult {
                success: false,
                error_type: Some("MERKLE_ROOT_BEFORE_MISMATCH".to_string()),
                execution_time_ms: ms_since(start),
                merkle_root_after: None,
            };
        }

        let mut tx = self.commit_layer.begin_transaction(AtomicCommitLayer::new_tx_id());
        for (key, value) in changes {
            tx.stage(key, value);
        }
        let timestamp = Utc::now().timestamp_millis() as f64;
        let mut result = self.commit_layer.commit_transaction(tx, timestamp);

        if result.success {
            if let Some(actual_after) = result.merkle_root_after.clone() {
                if let Err(err) = fs::write(&self.merkle_root_path, &actual_after) {
                    tracing::warn!(%err, "failed to persist merkle root after commit");
                }
                if actual_after != merkle_root_after {
                    tracing::warn!(expected = %merkle_root_after, actual = %actual_after, "commit applied but resulting root diverged from caller's expectation");
                    result.error_type = Some("MERKLE_ROOT_AFTER_MISMATCH".to_string());
                }
            }
        }
        result
    }

    /// WAL compaction (§3.5): drops committed records older than the
    /// oldest still-uncommitted PREPARE, keeping the log from growing
    /// unboundedly across a long-running process.
    pub fn compact_wal(&self, wal_path: impl AsRef<std::path::Path>) -> KernelResult<usize> {
        veritas_durability::compact_wal(wal_path)
    }

    pub fn self_check(&self) -> crate::self_check::SelfCheckReport {
        crate::self_check::run(self)
    }

    pub(crate) fn limits(&self) -> &DefenseLimits {
        &self.limits
    }
}

impl PipelineProbe for Kernel {
    fn probe(&self, intent: &Intent) -> ProbeResult {
        let rigor = self.sentinel.rigor_snapshot();
        let mut layer_results = BTreeMap::new();
        match self.run_core_pipeline(intent, &rigor, &mut layer_results) {
            Ok(_) => ProbeResult { blocking_layer: None, reached_l3: true },
            Err((layer, _err)) => ProbeResult { blocking_layer: Some(layer_name(layer)), reached_l3: false },
        }
    }
}

fn layer_name(layer: BlockingLayer) -> String {
    match layer {
        BlockingLayer::Sanitizer => "sanitizer",
        BlockingLayer::SemanticL1 => "semantic",
        BlockingLayer::Conservation => "conservation",
        BlockingLayer::Overflow => "overflow",
        BlockingLayer::Judge => "judge",
    }
    .to_string()
}

/// Maps a pipeline result onto the four-way outcome, its message, an SMT
/// model when one exists, and the constraint-violation detail that's
/// populated only for conservation/overflow rejections (§6.2, §7).
fn classify(result: &PipelineOutcome) -> (Outcome, String, Option<String>, Option<String>, f64) {
    match result {
        Ok(report) => (Outcome::Proved, "constraints are satisfiable".to_string(), report.model.clone(), None, report.z3_duration_ms),
        Err((_, KernelError::Rejected { category, message, .. })) => {
            let violation = matches!(category, RejectionCategory::Conservation | RejectionCategory::Overflow).then(|| message.clone());
            (Outcome::Rejected, message.clone(), None, violation, 0.0)
        }
        Err((_, KernelError::UnsupportedConstraint { node_type, recovery_hint })) => {
            (Outcome::Rejected, format!("unsupported constraint node: {node_type} ({recovery_hint})"), None, None, 0.0)
        }
        Err((_, KernelError::Failed { message, counterexample })) => {
            (Outcome::Failed, message.clone(), None, counterexample.clone(), 0.0)
        }
        Err((_, KernelError::Timeout { elapsed_ms })) => {
            (Outcome::Timeout, format!("SMT solver exceeded its {elapsed_ms}ms budget"), None, None, *elapsed_ms as f64)
        }
        Err((_, other)) => (Outcome::Rejected, other.to_string(), None, None, 0.0),
    }
}

fn ms_since(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use tempfile::tempdir;

    fn open_kernel(dir: &std::path::Path) -> Kernel {
        Kernel::open(KernelConfig::new(dir).without_telemetry()).unwrap()
    }

    #[test]
    fn genesis_open_creates_empty_state_and_root() {
        let dir = tempdir().unwrap();
        let kernel = open_kernel(dir.path());
        assert!(dir.path().join("state.json").exists());
        assert!(!kernel.merkle_root().is_empty());
    }

    #[test]
    fn simple_transfer_is_proved() {
        let dir = tempdir().unwrap();
        let kernel = open_kernel(dir.path());
        let src = r#"
            intent transfer(sender: address, receiver: address, amount: uint) {
                guard {
                    old_sender_balance >= amount;
                    amount > 0;
                }
                verify {
                    sender_balance == old_sender_balance - amount;
                    receiver_balance == old_receiver_balance + amount;
                }
            }
        "#;
        let report = kernel.verify_logic(src);
        assert_eq!(report.status, Outcome::Proved);
        assert!(report.model.is_some());
    }

    #[test]
    fn money_printer_is_rejected_with_conservation_detail() {
        let dir = tempdir().unwrap();
        let kernel = open_kernel(dir.path());
        let src = r#"
            intent transfer(sender: address, receiver: address, amount: uint) {
                guard { old_sender_balance >= amount; }
                verify {
                    receiver_balance == old_receiver_balance + amount;
                }
            }
        "#;
        let report = kernel.verify_logic(src);
        assert_eq!(report.status, Outcome::Rejected);
    }

    #[test]
    fn bitwise_constraint_is_rejected_at_parse_time() {
        let dir = tempdir().unwrap();
        let kernel = open_kernel(dir.path());
        let src = r#"
            intent x(a: uint, b: uint) {
                guard { (a | b) > 0; }
                verify { a == a; }
            }
        "#;
        let report = kernel.verify_logic(src);
        assert_eq!(report.status, Outcome::Rejected);
        assert!(report.message.contains("BitOr"));
    }

    #[test]
    fn commit_rejects_stale_merkle_root_before() {
        let dir = tempdir().unwrap();
        let kernel = open_kernel(dir.path());
        let mut changes: Map<String, serde_json::Value> = Map::new();
        changes.insert("balance".to_string(), serde_json::json!(100));
        let result = kernel.commit(changes, "not-the-real-root".to_string(), "whatever".to_string());
        assert!(!result.success);
        assert_eq!(result.error_type.as_deref(), Some("MERKLE_ROOT_BEFORE_MISMATCH"));
    }

    #[test]
    fn commit_applies_changes_and_advances_merkle_root() {
        let dir = tempdir().unwrap();
        let kernel = open_kernel(dir.path());
        let root_before = kernel.merkle_root();
        let mut changes: Map<String, serde_json::Value> = Map::new();
        changes.insert("balance".to_string(), serde_json::json!(100));
        let result = kernel.commit(changes, root_before.clone(), "ignored".to_string());
        assert!(result.success);
        assert_ne!(kernel.merkle_root(), root_before);
    }

    #[test]
    fn reopening_after_clean_shutdown_recovers_without_panicking() {
        let dir = tempdir().unwrap();
        {
            let kernel = open_kernel(dir.path());
            let mut changes: Map<String, serde_json::Value> = Map::new();
            changes.insert("balance".to_string(), serde_json::json!(1));
            let root_before = kernel.merkle_root();
            assert!(kernel.commit(changes, root_before, "ignored".to_string()).success);
        }
        let _reopened = open_kernel(dir.path());
    }
}
