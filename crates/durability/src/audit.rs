//! Recovery audit trail (§4.10 step 7, §6.3): `state/recovery_audit.log`, an
//! append-only human+JSON record of every recovery invocation, independent
//! of the structured [`crate::recovery::RecoveryReport`] returned to the
//! caller. Grounded on the original `_write_audit_log`/`_log_audit`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::recovery::RecoveryReport;

/// One timestamped line in the in-memory trail a recovery run builds up as
/// it goes, before being flushed to the audit file in one write (§4.10:
/// "log all recovery operations to audit trail").
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub details: String,
}

impl AuditEntry {
    pub fn new(operation: impl Into<String>, details: impl Into<String>) -> Self {
        Self { timestamp: Utc::now(), operation: operation.into(), details: details.into() }
    }

    pub fn as_line(&self) -> String {
        format!("[{}] {}: {}", self.timestamp.to_rfc3339(), self.operation, self.details)
    }
}

/// Appends a human-readable block plus the entries accumulated for one
/// recovery run to `path`. Per the original: a failure to write the audit
/// log must never fail recovery itself — the caller logs a
/// `KernelError::AuditLogWrite` via `tracing::warn!` and moves on.
pub fn append_recovery_audit(path: impl AsRef<Path>, report: &RecoveryReport, entries: &[AuditEntry]) {
    if let Err(err) = try_append(path.as_ref(), report, entries) {
        tracing::warn!(error = %err, "failed to write recovery audit log");
    }
}

fn try_append(path: &Path, report: &RecoveryReport, entries: &[AuditEntry]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    writeln!(file, "{}", "=".repeat(80))?;
    writeln!(file, "Recovery Report - {}", Utc::now().to_rfc3339())?;
    writeln!(file, "{}", "=".repeat(80))?;
    writeln!(file, "Recovered: {}", report.recovered)?;
    writeln!(file, "Uncommitted Transactions: {}", report.uncommitted_count)?;
    writeln!(file, "Rolled Back Transactions: {}", report.rolled_back_count)?;
    writeln!(file, "Temp Files Cleaned: {}", report.temp_files_cleaned)?;
    writeln!(file, "Merkle Root Verified: {}", report.merkle_root_verified)?;
    writeln!(file, "Recovery Duration: {:.2}ms", report.duration_ms)?;
    writeln!(file, "\nAudit Log:")?;
    for entry in entries {
        writeln!(file, "  {}", entry.as_line())?;
    }
    writeln!(file, "{}\n", "=".repeat(80))?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

/// Default location for the recovery audit trail under a state directory
/// (§6.3: `state/recovery_audit.log`).
pub fn default_audit_path(state_dir: impl AsRef<Path>) -> PathBuf {
    state_dir.as_ref().join("recovery_audit.log")
}
