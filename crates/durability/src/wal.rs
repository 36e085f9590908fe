//! Write-ahead log (§3.5, §6.3).
//!
//! The WAL is an append-only sequence of JSON lines. Two record shapes are
//! accepted on read, mirroring the original system's migration history:
//!
//! - legacy: `{tx_id, changes, timestamp, committed}` — a single record that
//!   carries its own commit flag.
//! - current: `{op: "PREPARE", tx_id, changes, timestamp}` followed later by
//!   `{op: "COMMIT", tx_id, timestamp}` — marking committed is then an O(1)
//!   append rather than a rewrite of the PREPARE line.
//!
//! `WalWriter` only ever emits the current format; `WalReader::parse_line`
//! accepts both so an old WAL directory keeps working unmodified.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use veritas_core::error::{KernelError, KernelResult};

/// One transaction's staged changes as seen by the WAL and commit layer.
pub type ChangeSet = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
enum WireRecord {
    #[serde(rename = "PREPARE")]
    Prepare { tx_id: String, changes: ChangeSet, timestamp: f64 },
    #[serde(rename = "COMMIT")]
    Commit { tx_id: String, timestamp: f64 },
}

/// Legacy single-record form: no `op` tag, a `committed` flag instead.
#[derive(Debug, Clone, Deserialize)]
struct LegacyRecord {
    tx_id: String,
    changes: ChangeSet,
    timestamp: f64,
    #[serde(default)]
    committed: bool,
}

/// A decoded WAL entry after replaying PREPARE/COMMIT pairs or a legacy
/// record, with `committed` folded in (§3.5 invariant: committed iff a
/// COMMIT record exists for the tx_id).
#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
    pub tx_id: String,
    pub changes: ChangeSet,
    pub timestamp: f64,
    pub committed: bool,
}

impl WalRecord {
    /// Parses one line, accepting both the legacy and current wire forms.
    /// Returns `None` for a `COMMIT` line, which carries no PREPARE payload
    /// of its own and is folded into the matching PREPARE by the reader.
    fn parse_prepare_line(line: &str) -> KernelResult<Option<(String, ChangeSet, f64)>> {
        let value: Value = serde_json::from_str(line)?;
        if value.get("op").is_some() {
            match serde_json::from_value::<WireRecord>(value)? {
                WireRecord::Prepare { tx_id, changes, timestamp } => Ok(Some((tx_id, changes, timestamp))),
                WireRecord::Commit { .. } => Ok(None),
            }
        } else {
            let legacy: LegacyRecord = serde_json::from_value(value)?;
            Ok(Some((legacy.tx_id, legacy.changes, legacy.timestamp)))
        }
    }

    fn parse_commit_tx_id(line: &str) -> KernelResult<Option<String>> {
        let value: Value = serde_json::from_str(line)?;
        if value.get("op").map(|op| op == "COMMIT").unwrap_or(false) {
            match serde_json::from_value::<WireRecord>(value)? {
                WireRecord::Commit { tx_id, .. } => Ok(Some(tx_id)),
                WireRecord::Prepare { .. } => Ok(None),
            }
        } else {
            let legacy: LegacyRecord = serde_json::from_value(value)?;
            Ok(if legacy.committed { Some(legacy.tx_id) } else { None })
        }
    }
}

/// Single-writer append-only WAL file (§5: "the WAL file has a single
/// writer"). Every append fsyncs before returning, per the commit protocol.
pub struct WalWriter {
    path: PathBuf,
    file: File,
}

impl WalWriter {
    pub fn open(path: impl AsRef<Path>) -> KernelResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a PREPARE record and fsyncs (§4.9 step 1).
    pub fn append_prepare(&mut self, tx_id: &str, changes: &ChangeSet, timestamp: f64) -> KernelResult<()> {
        let record = WireRecord::Prepare { tx_id: tx_id.to_string(), changes: changes.clone(), timestamp };
        self.write_line(&record)
    }

    /// Appends a COMMIT record and fsyncs — an O(1) append, never a rewrite
    /// of the PREPARE line (§3.5, §8 WAL compaction monotonicity).
    pub fn append_commit(&mut self, tx_id: &str, timestamp: f64) -> KernelResult<()> {
        let record = WireRecord::Commit { tx_id: tx_id.to_string(), timestamp };
        self.write_line(&record)
    }

    fn write_line(&mut self, record: &WireRecord) -> KernelResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes()).map_err(|e| disk_aware(e, &self.path))?;
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

fn disk_aware(err: std::io::Error, path: &Path) -> KernelError {
    if err.raw_os_error() == Some(libc_enospc()) {
        KernelError::DiskFull { path: path.to_path_buf() }
    } else {
        KernelError::Io(err)
    }
}

/// ENOSPC's value is platform-stable across the Unix targets this crate
/// ships on; kept as a tiny indirection so it reads as a named constant
/// rather than a magic number at the call site.
fn libc_enospc() -> i32 {
    28
}

/// Read-only scanner over a WAL file, reconciling PREPARE/COMMIT pairs and
/// legacy single-records into one committed/uncommitted view (§4.10 step 1).
pub struct WalReader;

impl WalReader {
    /// Replays the whole WAL, returning every transaction's most recent
    /// PREPARE payload annotated with whether a COMMIT was ever observed.
    /// Corrupted lines are skipped, mirroring the original's
    /// `_read_all_entries` tolerance for partially-written trailing lines.
    pub fn read_all(path: impl AsRef<Path>) -> KernelResult<Vec<WalRecord>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let mut order: Vec<String> = Vec::new();
        let mut prepares: BTreeMap<String, (ChangeSet, f64)> = BTreeMap::new();
        let mut committed: BTreeMap<String, bool> = BTreeMap::new();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Ok(Some((tx_id, changes, timestamp))) = WalRecord::parse_prepare_line(line) {
                if !prepares.contains_key(&tx_id) {
                    order.push(tx_id.clone());
                }
                prepares.insert(tx_id, (changes, timestamp));
            }
            // Not an `else`: a legacy record is both a PREPARE payload and,
            // when its own `committed` flag is set, its own COMMIT — unlike
            // the current wire format where PREPARE and COMMIT are disjoint
            // lines.
            if let Ok(Some(tx_id)) = WalRecord::parse_commit_tx_id(line) {
                committed.insert(tx_id, true);
            }
            // Lines matching neither shape (corrupted JSON, unknown op) are
            // skipped rather than aborting the scan — recovery must still
            // see every well-formed record either side of one bad line.
        }

        Ok(order
            .into_iter()
            .filter_map(|tx_id| {
                let (changes, timestamp) = prepares.remove(&tx_id)?;
                let committed = committed.contains_key(&tx_id);
                Some(WalRecord { tx_id, changes, timestamp, committed })
            })
            .collect())
    }

    pub fn uncommitted(path: impl AsRef<Path>) -> KernelResult<Vec<WalRecord>> {
        Ok(Self::read_all(path)?.into_iter().filter(|r| !r.committed).collect())
    }
}

/// Off-the-critical-path maintenance operation: rewrites the WAL keeping one
/// PREPARE (+ COMMIT, if applicable) per transaction, dropping redundant
/// intermediate lines. O(n) in the number of transactions; never called from
/// the commit path itself (§4.9, §8 WAL compaction monotonicity).
pub fn compact_wal(path: impl AsRef<Path>) -> KernelResult<usize> {
    let path = path.as_ref();
    let before = count_lines(path)?;
    let records = WalReader::read_all(path)?;

    let tmp_path = path.with_extension("log.compact.tmp");
    {
        let mut tmp = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
        for record in &records {
            let prepare = WireRecord::Prepare {
                tx_id: record.tx_id.clone(),
                changes: record.changes.clone(),
                timestamp: record.timestamp,
            };
            writeln!(tmp, "{}", serde_json::to_string(&prepare)?)?;
            if record.committed {
                let commit = WireRecord::Commit { tx_id: record.tx_id.clone(), timestamp: record.timestamp };
                writeln!(tmp, "{}", serde_json::to_string(&commit)?)?;
            }
        }
        tmp.flush()?;
        tmp.sync_data()?;
    }
    std::fs::rename(&tmp_path, path)?;

    let after = count_lines(path)?;
    Ok(before.saturating_sub(after))
}

fn count_lines(path: &Path) -> KernelResult<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let file = File::open(path)?;
    Ok(BufReader::new(file).lines().filter(|l| l.as_ref().map(|s| !s.trim().is_empty()).unwrap_or(true)).count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn changes(pairs: &[(&str, i64)]) -> ChangeSet {
        pairs.iter().map(|(k, v)| (k.to_string(), Value::from(*v))).collect()
    }

    #[test]
    fn prepare_then_commit_round_trips_as_committed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let mut writer = WalWriter::open(&path).unwrap();
        writer.append_prepare("tx-1", &changes(&[("a", 1)]), 1.0).unwrap();
        writer.append_commit("tx-1", 2.0).unwrap();

        let all = WalReader::read_all(&path).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].committed);
        assert!(WalReader::uncommitted(&path).unwrap().is_empty());
    }

    #[test]
    fn prepare_without_commit_is_uncommitted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let mut writer = WalWriter::open(&path).unwrap();
        writer.append_prepare("tx-2", &changes(&[("b", 2)]), 1.0).unwrap();

        let uncommitted = WalReader::uncommitted(&path).unwrap();
        assert_eq!(uncommitted.len(), 1);
        assert_eq!(uncommitted[0].tx_id, "tx-2");
    }

    #[test]
    fn legacy_single_record_format_is_accepted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        std::fs::write(&path, r#"{"tx_id":"tx-legacy","changes":{"x":1},"timestamp":1.0,"committed":true}"#.to_string() + "\n").unwrap();

        let all = WalReader::read_all(&path).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].committed);
    }

    #[test]
    fn corrupted_trailing_line_does_not_lose_earlier_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let mut writer = WalWriter::open(&path).unwrap();
        writer.append_prepare("tx-3", &changes(&[("c", 3)]), 1.0).unwrap();
        writer.append_commit("tx-3", 2.0).unwrap();
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "{{not valid json").unwrap();

        let all = WalReader::read_all(&path).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].committed);
    }

    #[test]
    fn compaction_drops_redundant_lines_but_keeps_committed_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let mut writer = WalWriter::open(&path).unwrap();
        for i in 0..5 {
            let tx = format!("tx-{i}");
            writer.append_prepare(&tx, &changes(&[("k", i)]), i as f64).unwrap();
            writer.append_commit(&tx, i as f64 + 0.5).unwrap();
        }
        let removed = compact_wal(&path).unwrap();
        assert_eq!(removed, 0, "five PREPARE+COMMIT pairs compact to the same ten lines");

        let all = WalReader::read_all(&path).unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.iter().all(|r| r.committed));
    }
}
