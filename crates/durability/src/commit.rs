//! Atomic commit layer: the seven ordered steps of §4.9, plus the explicit
//! `begin_transaction -> stage -> commit_transaction` lifecycle and rollback.
//!
//! Grounded on the original `AtomicCommitLayer.commit_transaction`, with the
//! WAL/state split into the dedicated collaborators in [`crate::wal`] and
//! [`crate::merkle`] rather than one class owning both.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;
use veritas_core::error::{KernelError, KernelResult};
use veritas_core::traits::MerkleTree;

use crate::wal::{ChangeSet, WalWriter};

/// Result of `commit()` (§6.2: "BatchResult carries success flag, error_type
/// on failure, and execution_time").
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub success: bool,
    pub error_type: Option<String>,
    pub execution_time_ms: f64,
    pub merkle_root_after: Option<String>,
}

/// An in-flight transaction: staged changes not yet committed.
pub struct StagedTransaction {
    pub tx_id: String,
    pub changes: ChangeSet,
}

impl StagedTransaction {
    pub fn stage(&mut self, key: impl Into<String>, value: Value) {
        self.changes.insert(key.into(), value);
    }
}

/// Owns the canonical state file and WAL for one state directory. The WAL
/// has a single writer (`Mutex<WalWriter>`, §5); the Merkle tree collaborator
/// is optional, matching the original's `merkle_tree=None` default.
pub struct AtomicCommitLayer {
    state_dir: PathBuf,
    state_file: PathBuf,
    wal: Mutex<WalWriter>,
    merkle_tree: Option<Arc<dyn MerkleTree>>,
}

impl AtomicCommitLayer {
    pub fn open(state_dir: impl Into<PathBuf>, wal_path: impl AsRef<Path>) -> KernelResult<Self> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir)?;
        let wal = WalWriter::open(wal_path)?;
        Ok(Self { state_file: state_dir.join("state.json"), state_dir, wal: Mutex::new(wal), merkle_tree: None })
    }

    pub fn with_merkle_tree(mut self, tree: Arc<dyn MerkleTree>) -> Self {
        self.merkle_tree = Some(tree);
        self
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    pub fn begin_transaction(&self, tx_id: impl Into<String>) -> StagedTransaction {
        StagedTransaction { tx_id: tx_id.into(), changes: BTreeMap::new() }
    }

    fn load_state(&self) -> KernelResult<BTreeMap<String, Value>> {
        if !self.state_file.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.state_file)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// The seven-step protocol (§4.9). Any I/O error at or after step 1
    /// aborts, cleans the temp file, and leaves a PREPARE-only WAL record
    /// for crash recovery to roll back.
    pub fn commit_transaction(&self, tx: StagedTransaction, timestamp: f64) -> BatchResult {
        let start = std::time::Instant::now();
        match self.try_commit(&tx, timestamp) {
            Ok(merkle_root_after) => BatchResult {
                success: true,
                error_type: None,
                execution_time_ms: ms_since(start),
                merkle_root_after,
            },
            Err(err) => {
                tracing::warn!(tx_id = %tx.tx_id, error = %err, "commit failed");
                BatchResult {
                    success: false,
                    error_type: Some(error_type_tag(&err)),
                    execution_time_ms: ms_since(start),
                    merkle_root_after: None,
                }
            }
        }
    }

    fn try_commit(&self, tx: &StagedTransaction, timestamp: f64) -> KernelResult<Option<String>> {
        let temp_path = self.state_dir.join(format!("state.{}.tmp", tx.tx_id));

        // Step 1: append PREPARE, fsync.
        self.wal.lock().append_prepare(&tx.tx_id, &tx.changes, timestamp)?;

        // Step 2-3: load current state, apply staged overrides in memory.
        let mut state = self.load_state()?;
        for (k, v) in &tx.changes {
            state.insert(k.clone(), v.clone());
        }
        let state_value = Value::Object(state.into_iter().collect());

        // Step 4: write temp file, fsync. Clean up on any failure.
        if let Err(err) = write_temp_state(&temp_path, &state_value) {
            let _ = fs::remove_file(&temp_path);
            return Err(err);
        }

        // Step 5: atomic rename temp -> canonical.
        if let Err(err) = fs::rename(&temp_path, &self.state_file) {
            let _ = fs::remove_file(&temp_path);
            return Err(KernelError::Io(err));
        }

        // Step 6: append COMMIT, fsync.
        self.wal.lock().append_commit(&tx.tx_id, timestamp)?;

        // Step 7: mark committed (no separate bookkeeping needed: WAL
        // COMMIT presence *is* the committed marker, per §3.5).
        let root_after = self.merkle_tree.as_ref().map(|tree| {
            let root = tree.recompute(&state_value);
            tree.set_root_hash(root.clone());
            root
        });

        Ok(root_after)
    }

    /// Explicit rollback (§4.9): restore nothing (the commit never touched
    /// canonical state before step 5), just remove any staged temp file.
    pub fn rollback_transaction(&self, tx: &StagedTransaction) -> KernelResult<()> {
        let temp_path = self.state_dir.join(format!("state.{}.tmp", tx.tx_id));
        if temp_path.exists() {
            fs::remove_file(&temp_path)?;
        }
        Ok(())
    }

    pub fn new_tx_id() -> String {
        Uuid::new_v4().to_string()
    }
}

fn write_temp_state(path: &Path, state: &Value) -> KernelResult<()> {
    let mut file = File::create(path).map_err(|e| disk_aware(e, path))?;
    let body = serde_json::to_string_pretty(state)?;
    file.write_all(body.as_bytes()).map_err(|e| disk_aware(e, path))?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

fn disk_aware(err: std::io::Error, path: &Path) -> KernelError {
    if err.raw_os_error() == Some(28) {
        KernelError::DiskFull { path: path.to_path_buf() }
    } else {
        KernelError::Io(err)
    }
}

fn error_type_tag(err: &KernelError) -> String {
    match err {
        KernelError::DiskFull { .. } => "DISK_FULL".to_string(),
        KernelError::Io(_) => "IO_ERROR".to_string(),
        KernelError::Serialization(_) => "SERIALIZATION_ERROR".to_string(),
        other => format!("{other:?}").split_whitespace().next().unwrap_or("UNKNOWN").to_string(),
    }
}

fn ms_since(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::Sha256MerkleTree;
    use crate::wal::WalReader;
    use tempfile::tempdir;

    #[test]
    fn commit_applies_changes_and_commits_wal() {
        let dir = tempdir().unwrap();
        let layer = AtomicCommitLayer::open(dir.path(), dir.path().join("wal.log")).unwrap();
        let mut tx = layer.begin_transaction("tx-1");
        tx.stage("sender_balance", Value::from(900));
        tx.stage("receiver_balance", Value::from(100));

        let result = layer.commit_transaction(tx, 1.0);
        assert!(result.success);

        let state: Value = serde_json::from_str(&fs::read_to_string(layer.state_file()).unwrap()).unwrap();
        assert_eq!(state["sender_balance"], 900);
        assert_eq!(state["receiver_balance"], 100);

        let wal_records = WalReader::read_all(dir.path().join("wal.log")).unwrap();
        assert_eq!(wal_records.len(), 1);
        assert!(wal_records[0].committed);
    }

    #[test]
    fn second_commit_sees_first_commits_state() {
        let dir = tempdir().unwrap();
        let layer = AtomicCommitLayer::open(dir.path(), dir.path().join("wal.log")).unwrap();
        let mut tx1 = layer.begin_transaction("tx-1");
        tx1.stage("balance", Value::from(100));
        layer.commit_transaction(tx1, 1.0);

        let mut tx2 = layer.begin_transaction("tx-2");
        tx2.stage("other", Value::from(5));
        layer.commit_transaction(tx2, 2.0);

        let state: Value = serde_json::from_str(&fs::read_to_string(layer.state_file()).unwrap()).unwrap();
        assert_eq!(state["balance"], 100);
        assert_eq!(state["other"], 5);
    }

    #[test]
    fn commit_updates_merkle_root() {
        let dir = tempdir().unwrap();
        let tree = Arc::new(Sha256MerkleTree::new("empty"));
        let layer = AtomicCommitLayer::open(dir.path(), dir.path().join("wal.log"))
            .unwrap()
            .with_merkle_tree(tree.clone());
        let mut tx = layer.begin_transaction("tx-1");
        tx.stage("balance", Value::from(100));
        let result = layer.commit_transaction(tx, 1.0);
        assert!(result.success);
        assert_eq!(result.merkle_root_after.unwrap(), tree.root_hash());
        assert_ne!(tree.root_hash(), "empty");
    }

    #[test]
    fn rollback_removes_temp_file_without_touching_canonical_state() {
        let dir = tempdir().unwrap();
        let layer = AtomicCommitLayer::open(dir.path(), dir.path().join("wal.log")).unwrap();
        let mut tx = layer.begin_transaction("tx-abort");
        tx.stage("balance", Value::from(1));
        fs::write(dir.path().join("state.tx-abort.tmp"), "{}").unwrap();
        layer.rollback_transaction(&tx).unwrap();
        assert!(!dir.path().join("state.tx-abort.tmp").exists());
        assert!(!layer.state_file().exists());
    }
}
