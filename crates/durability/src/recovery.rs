//! Crash recovery (§4.10): invoked on process start, fail-closed throughout.
//! Grounded on the original `AtomicCommitLayer.recover_from_crash`, split
//! out of the commit layer so recovery can run before any
//! [`crate::commit::AtomicCommitLayer`] is constructed.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use veritas_core::panic::IntegrityPanic;
use veritas_core::traits::{IntegrityAuditSink, MerkleTree};

use crate::audit::{append_recovery_audit, default_audit_path, AuditEntry};
use crate::merkle::digest_state;
use crate::wal::WalReader;

/// §4.10 step 6 / §6.2: the report handed back to the embedder.
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    pub recovered: bool,
    pub uncommitted_count: usize,
    pub rolled_back_count: usize,
    pub temp_files_cleaned: usize,
    pub merkle_root_verified: bool,
    pub duration_ms: f64,
}

struct RecoveryBuilder {
    start: Instant,
    entries: Vec<AuditEntry>,
    uncommitted_count: usize,
    rolled_back_count: usize,
    temp_files_cleaned: usize,
    merkle_root_verified: bool,
}

impl RecoveryBuilder {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            entries: Vec::new(),
            uncommitted_count: 0,
            rolled_back_count: 0,
            temp_files_cleaned: 0,
            merkle_root_verified: false,
        }
    }

    fn log(&mut self, operation: &str, details: impl Into<String>) {
        self.entries.push(AuditEntry::new(operation, details));
    }

    fn finish(self, recovered: bool) -> (RecoveryReport, Vec<AuditEntry>) {
        let duration_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        (
            RecoveryReport {
                recovered,
                uncommitted_count: self.uncommitted_count,
                rolled_back_count: self.rolled_back_count,
                temp_files_cleaned: self.temp_files_cleaned,
                merkle_root_verified: self.merkle_root_verified,
                duration_ms,
            },
            self.entries,
        )
    }
}

/// Runs the full fail-closed recovery protocol against `state_dir`/`wal_path`
/// (§4.10 steps 1-7). `merkle_tree`, when present, has its stored root
/// compared against the reloaded state's recomputed digest; a mismatch is a
/// [`IntegrityPanic::merkle_root_mismatch`] that halts boot via `abort()`.
///
/// A missing or unparseable canonical state file is equally fatal — this
/// function never silently creates an empty state (§4.10 step 4, §8 recovery
/// fail-closure).
pub fn recover_from_crash(
    state_dir: impl AsRef<Path>,
    wal_path: impl AsRef<Path>,
    merkle_tree: Option<Arc<dyn MerkleTree>>,
    audit_sink: Option<&dyn IntegrityAuditSink>,
) -> RecoveryReport {
    let state_dir = state_dir.as_ref();
    let wal_path = wal_path.as_ref();
    let mut b = RecoveryBuilder::new();
    b.log("RECOVERY_START", "crash recovery initiated");

    // Step 1: scan WAL for uncommitted PREPAREs.
    let uncommitted = match WalReader::uncommitted(wal_path) {
        Ok(v) => v,
        Err(err) => {
            b.log("SCAN_WAL_ERROR", err.to_string());
            let (report, entries) = b.finish(false);
            flush_audit(state_dir, &report, &entries);
            return report;
        }
    };
    b.uncommitted_count = uncommitted.len();
    b.log("SCAN_WAL", format!("found {} uncommitted transactions", uncommitted.len()));

    // Step 2: for each, delete the matching temp state file and mark rolled back.
    for record in &uncommitted {
        let temp_path = state_dir.join(format!("state.{}.tmp", record.tx_id));
        if temp_path.exists() {
            if fs::remove_file(&temp_path).is_ok() {
                b.temp_files_cleaned += 1;
                b.log("DELETE_TEMP", format!("deleted temp file for tx {}", record.tx_id));
            }
        }
        b.rolled_back_count += 1;
        b.log("ROLLBACK_TX", format!("rolled back transaction {}", record.tx_id));
    }

    // Step 3: delete any other orphaned state.*.tmp files.
    if let Ok(read_dir) = fs::read_dir(state_dir) {
        for entry in read_dir.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("state.") && name.ends_with(".tmp") {
                if fs::remove_file(entry.path()).is_ok() {
                    b.temp_files_cleaned += 1;
                    b.log("DELETE_ORPHAN", format!("deleted orphaned temp file {name}"));
                }
            }
        }
    }

    // Step 4: open canonical state file. Missing/unparseable => fatal.
    let state_file = state_dir.join("state.json");
    if !state_file.exists() {
        b.log("STATE_MISSING", state_file.display().to_string());
        let (report, entries) = b.finish(false);
        flush_audit(state_dir, &report, &entries);
        let panic = IntegrityPanic::state_file_missing(&state_file.display().to_string());
        if let Some(sink) = audit_sink {
            sink.record_panic(&panic);
        }
        panic.abort();
    }

    let raw = match fs::read_to_string(&state_file) {
        Ok(raw) => raw,
        Err(err) => {
            b.log("STATE_READ_ERROR", err.to_string());
            let (report, entries) = b.finish(false);
            flush_audit(state_dir, &report, &entries);
            let panic = IntegrityPanic::state_file_corrupted(&state_file.display().to_string(), &err.to_string());
            if let Some(sink) = audit_sink {
                sink.record_panic(&panic);
            }
            panic.abort();
        }
    };

    let state: Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(err) => {
            b.log("STATE_PARSE_ERROR", err.to_string());
            let (report, entries) = b.finish(false);
            flush_audit(state_dir, &report, &entries);
            let panic = IntegrityPanic::state_file_corrupted(&state_file.display().to_string(), &err.to_string());
            if let Some(sink) = audit_sink {
                sink.record_panic(&panic);
            }
            panic.abort();
        }
    };
    b.log("LOAD_STATE", format!("loaded state ({} bytes)", raw.len()));

    // Step 5: verify Merkle root, if a collaborator is configured.
    if let Some(tree) = &merkle_tree {
        let computed = digest_state(&state);
        let stored = tree.root_hash();
        if computed == stored {
            b.merkle_root_verified = true;
            b.log("VERIFY_MERKLE", format!("root verified: {computed}"));
        } else {
            b.log("MERKLE_MISMATCH", format!("computed={computed} stored={stored}"));
            let (report, entries) = b.finish(false);
            flush_audit(state_dir, &report, &entries);
            let panic = IntegrityPanic::merkle_root_mismatch(&computed, &stored);
            if let Some(sink) = audit_sink {
                sink.record_panic(&panic);
            }
            panic.abort();
        }
    } else {
        b.merkle_root_verified = true;
        b.log("SKIP_MERKLE", "no MerkleTree collaborator configured");
    }

    b.log("RECOVERY_SUCCESS", "crash recovery completed successfully");
    let (report, entries) = b.finish(true);
    flush_audit(state_dir, &report, &entries);
    report
}

fn flush_audit(state_dir: &Path, report: &RecoveryReport, entries: &[AuditEntry]) {
    let path: PathBuf = default_audit_path(state_dir);
    append_recovery_audit(path, report, entries);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::AtomicCommitLayer;
    use crate::merkle::Sha256MerkleTree;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn recovers_clean_committed_state_without_merkle() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("wal.log");
        let layer = AtomicCommitLayer::open(dir.path(), &wal_path).unwrap();
        let mut tx = layer.begin_transaction("tx-1");
        tx.stage("balance", json!(100));
        assert!(layer.commit_transaction(tx, 1.0).success);

        let report = recover_from_crash(dir.path(), &wal_path, None, None);
        assert!(report.recovered);
        assert_eq!(report.uncommitted_count, 0);
        assert!(report.merkle_root_verified);
    }

    #[test]
    fn rolls_back_prepare_without_commit_and_cleans_temp_file() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("wal.log");
        // Seed a canonical state file so recovery doesn't treat this as missing.
        fs::write(dir.path().join("state.json"), "{}").unwrap();
        let mut writer = crate::wal::WalWriter::open(&wal_path).unwrap();
        let mut changes = std::collections::BTreeMap::new();
        changes.insert("balance".to_string(), json!(1));
        writer.append_prepare("tx-crashed", &changes, 1.0).unwrap();
        fs::write(dir.path().join("state.tx-crashed.tmp"), "{\"balance\":1}").unwrap();
        drop(writer);

        let report = recover_from_crash(dir.path(), &wal_path, None, None);
        assert!(report.recovered);
        assert_eq!(report.uncommitted_count, 1);
        assert_eq!(report.rolled_back_count, 1);
        assert!(!dir.path().join("state.tx-crashed.tmp").exists());
    }

    #[test]
    #[should_panic(expected = "integrity panic")]
    fn missing_state_file_panics() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("wal.log");
        recover_from_crash(dir.path(), &wal_path, None, None);
    }

    #[test]
    #[should_panic(expected = "MERKLE_ROOT_MISMATCH")]
    fn merkle_mismatch_panics() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("wal.log");
        fs::write(dir.path().join("state.json"), "{\"balance\":100}").unwrap();
        let tree: Arc<dyn MerkleTree> = Arc::new(Sha256MerkleTree::new("stale-root-does-not-match"));
        recover_from_crash(dir.path(), &wal_path, Some(tree), None);
    }
}
