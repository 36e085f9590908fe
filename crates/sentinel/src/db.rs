//! SQLite-backed telemetry persistence (§3.6, §6.4, §7).
//!
//! Writes never happen on the verification hot path: every call here
//! enqueues onto an unbounded channel drained by one dedicated writer
//! thread, mirroring the original system's observation that "telemetry
//! persistence competing with the verification path for the state lock
//! was itself an incident" (see `original_source/` sentinel notes). The
//! writer batches whatever is queued at wakeup time into a single
//! transaction rather than one `INSERT` per message.

use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use rusqlite::Connection;
use veritas_core::error::{KernelError, KernelResult};
use veritas_core::metrics::TransactionMetrics;
use veritas_core::panic::IntegrityPanic;
use veritas_core::traits::IntegrityAuditSink;

const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

enum WriterMessage {
    Transaction(Box<TransactionMetrics>),
    CpuViolation { tx_id: String, cpu_time_ms: f64, ceiling_ms: f64 },
    IntegrityPanic(Box<IntegrityPanic>),
    Shutdown,
}

/// Handle to the background writer thread. Dropping this flushes any queued
/// messages (`Shutdown` is sent and the thread joined) before the handle is
/// released, so tests and short-lived embedders never lose the tail of a
/// write batch.
pub struct TelemetryStore {
    sender: Sender<WriterMessage>,
    worker: Option<JoinHandle<()>>,
}

impl TelemetryStore {
    pub fn open(db_path: impl AsRef<Path>) -> KernelResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let conn = Connection::open(&db_path).map_err(to_kernel_error)?;
        initialize_schema(&conn).map_err(to_kernel_error)?;

        let (sender, receiver) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("veritas-sentinel-writer".into())
            .spawn(move || writer_loop(conn, receiver))
            .map_err(|err| KernelError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string())))?;

        Ok(Self { sender, worker: Some(worker) })
    }

    pub fn record_transaction(&self, metrics: TransactionMetrics) {
        self.send(WriterMessage::Transaction(Box::new(metrics)));
    }

    pub fn record_cpu_violation(&self, tx_id: impl Into<String>, cpu_time_ms: f64, ceiling_ms: f64) {
        self.send(WriterMessage::CpuViolation { tx_id: tx_id.into(), cpu_time_ms, ceiling_ms });
    }

    fn send(&self, message: WriterMessage) {
        if self.sender.send(message).is_err() {
            tracing::error!("sentinel writer thread is gone; telemetry dropped");
        }
    }
}

impl IntegrityAuditSink for TelemetryStore {
    fn record_panic(&self, panic: &IntegrityPanic) {
        self.send(WriterMessage::IntegrityPanic(Box::new(panic.clone())));
    }
}

impl Drop for TelemetryStore {
    fn drop(&mut self) {
        let _ = self.sender.send(WriterMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS transaction_metrics (
            tx_id TEXT PRIMARY KEY,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            wall_duration_ms REAL NOT NULL,
            cpu_time_ms REAL NOT NULL,
            memory_delta_kb INTEGER NOT NULL,
            z3_duration_ms REAL NOT NULL,
            layer_results TEXT NOT NULL,
            anomaly_score REAL NOT NULL,
            outcome TEXT NOT NULL,
            cpu_violation INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS cpu_violations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tx_id TEXT NOT NULL,
            cpu_time_ms REAL NOT NULL,
            ceiling_ms REAL NOT NULL,
            recorded_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS integrity_panics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            violation_type TEXT NOT NULL,
            exception_class TEXT NOT NULL,
            payload TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_integrity_panics_recorded_at ON integrity_panics(recorded_at);
        CREATE INDEX IF NOT EXISTS idx_integrity_panics_violation_type ON integrity_panics(violation_type);
        CREATE INDEX IF NOT EXISTS idx_integrity_panics_exception_class ON integrity_panics(exception_class);",
    )
}

fn writer_loop(mut conn: Connection, receiver: Receiver<WriterMessage>) {
    loop {
        let mut batch = Vec::new();
        match receiver.recv_timeout(DRAIN_INTERVAL) {
            Ok(message) => batch.push(message),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
        // Drain whatever else has queued up since the blocking recv woke us,
        // so a burst of `end_transaction` calls becomes one transaction.
        while let Ok(message) = receiver.try_recv() {
            batch.push(message);
        }

        let mut shutdown_requested = false;
        let tx = match conn.transaction() {
            Ok(tx) => tx,
            Err(err) => {
                tracing::error!(%err, "sentinel writer failed to open a transaction; batch dropped");
                continue;
            }
        };
        for message in batch {
            match message {
                WriterMessage::Transaction(metrics) => {
                    if let Err(err) = insert_transaction(&tx, &metrics) {
                        tracing::warn!(%err, tx_id = %metrics.tx_id, "failed to persist transaction metrics");
                    }
                }
                WriterMessage::CpuViolation { tx_id, cpu_time_ms, ceiling_ms } => {
                    if let Err(err) = insert_cpu_violation(&tx, &tx_id, cpu_time_ms, ceiling_ms) {
                        tracing::warn!(%err, %tx_id, "failed to persist cpu violation");
                    }
                }
                WriterMessage::IntegrityPanic(panic) => {
                    if let Err(err) = insert_integrity_panic(&tx, &panic) {
                        tracing::error!(%err, "failed to persist integrity panic audit record");
                    }
                }
                WriterMessage::Shutdown => shutdown_requested = true,
            }
        }
        if let Err(err) = tx.commit() {
            tracing::error!(%err, "sentinel writer batch commit failed");
        }
        if shutdown_requested {
            return;
        }
    }
}

fn insert_transaction(conn: &Connection, metrics: &TransactionMetrics) -> rusqlite::Result<()> {
    let layer_results = serde_json::to_string(&metrics.layer_results).unwrap_or_default();
    let outcome = serde_json::to_string(&metrics.outcome).unwrap_or_default();
    conn.execute(
        "INSERT OR REPLACE INTO transaction_metrics
            (tx_id, start_time, end_time, wall_duration_ms, cpu_time_ms, memory_delta_kb,
             z3_duration_ms, layer_results, anomaly_score, outcome, cpu_violation)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            metrics.tx_id.to_string(),
            metrics.start_time.to_rfc3339(),
            metrics.end_time.to_rfc3339(),
            metrics.wall_duration_ms,
            metrics.cpu_time_ms,
            metrics.memory_delta_kb,
            metrics.z3_duration_ms,
            layer_results,
            metrics.anomaly_score,
            outcome,
            metrics.cpu_violation as i64,
        ],
    )?;
    Ok(())
}

fn insert_cpu_violation(conn: &Connection, tx_id: &str, cpu_time_ms: f64, ceiling_ms: f64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO cpu_violations (tx_id, cpu_time_ms, ceiling_ms, recorded_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![tx_id, cpu_time_ms, ceiling_ms, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn insert_integrity_panic(conn: &Connection, panic: &IntegrityPanic) -> rusqlite::Result<()> {
    let payload = serde_json::to_string(panic).unwrap_or_default();
    conn.execute(
        "INSERT INTO integrity_panics (violation_type, exception_class, payload, recorded_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![panic.violation_type.as_str(), panic.exception_class(), payload, panic.timestamp.to_rfc3339()],
    )?;
    Ok(())
}

fn to_kernel_error(err: rusqlite::Error) -> KernelError {
    KernelError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::tempdir;
    use uuid::Uuid;

    #[test]
    fn records_transaction_and_drains_on_drop() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("telemetry.db");
        let metrics = TransactionMetrics::new(Uuid::new_v4(), chrono::Utc::now());
        let tx_id = metrics.tx_id;

        {
            let store = TelemetryStore::open(&db_path).unwrap();
            store.record_transaction(metrics);
        }
        // TelemetryStore is dropped at end of the block above, which blocks
        // until the writer thread has drained and exited.

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM transaction_metrics WHERE tx_id = ?1",
                rusqlite::params![tx_id.to_string()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn records_integrity_panic_via_audit_sink_trait() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("telemetry.db");
        let store = TelemetryStore::open(&db_path).unwrap();
        let panic = IntegrityPanic::merkle_root_mismatch("aaa", "bbb");
        store.record_panic(&panic);
        drop(store);

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM integrity_panics", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 1);
        let exception_class: String = conn
            .query_row("SELECT exception_class FROM integrity_panics WHERE violation_type = ?1", rusqlite::params!["MERKLE_ROOT_MISMATCH"], |row| row.get(0))
            .unwrap();
        assert_eq!(exception_class, "MerkleRootMismatchPanic");
    }

    #[test]
    fn integrity_panics_table_is_indexed_by_timestamp_violation_type_and_exception_class() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("telemetry.db");
        let store = TelemetryStore::open(&db_path).unwrap();
        drop(store);

        let conn = Connection::open(&db_path).unwrap();
        let indexed_columns: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'integrity_panics'")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert!(indexed_columns.iter().any(|n| n.contains("recorded_at")));
        assert!(indexed_columns.iter().any(|n| n.contains("violation_type")));
        assert!(indexed_columns.iter().any(|n| n.contains("exception_class")));
    }

    #[test]
    fn handles_a_burst_of_writes_in_one_batch() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("telemetry.db");
        let store = TelemetryStore::open(&db_path).unwrap();
        for _ in 0..50 {
            store.record_transaction(TransactionMetrics::new(Uuid::new_v4(), chrono::Utc::now()));
        }
        drop(store);

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM transaction_metrics", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 50);
        thread::yield_now();
    }
}
