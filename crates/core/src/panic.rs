//! Typed fatal errors (§7, third error class). These are never returned as
//! `KernelError` values and never caught for control flow (§9 design note:
//! "callers must not catch integrity panics") — a component that detects one
//! serializes it, hands it to the configured [`crate::traits::IntegrityAuditSink`],
//! and then aborts via [`IntegrityPanic::abort`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateCorruptionKind {
    StateFileMissing,
    StateFileCorrupted,
    StatePartialCorruption,
}

impl StateCorruptionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StateCorruptionKind::StateFileMissing => "STATE_FILE_MISSING",
            StateCorruptionKind::StateFileCorrupted => "STATE_FILE_CORRUPTED",
            StateCorruptionKind::StatePartialCorruption => "STATE_PARTIAL_CORRUPTION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationType {
    StateCorruption(StateCorruptionKind),
    MerkleRootMismatch,
    WalCorruption,
    InvalidSignature,
    NodeIdentityMismatch,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::StateCorruption(kind) => kind.as_str(),
            ViolationType::MerkleRootMismatch => "MERKLE_ROOT_MISMATCH",
            ViolationType::WalCorruption => "WAL_CORRUPTION",
            ViolationType::InvalidSignature => "INVALID_SIGNATURE",
            ViolationType::NodeIdentityMismatch => "NODE_IDENTITY_MISMATCH",
        }
    }

    /// The typed panic class named in §7 (`StateCorruptionPanic`,
    /// `MerkleRootMismatchPanic`, ...) — distinct from `as_str`'s more
    /// granular reason code, kept as its own column in the audit database
    /// so `integrity_panics` can be indexed and queried by either axis.
    pub fn exception_class(&self) -> &'static str {
        match self {
            ViolationType::StateCorruption(_) => "StateCorruptionPanic",
            ViolationType::MerkleRootMismatch => "MerkleRootMismatchPanic",
            ViolationType::WalCorruption => "WALCorruptionPanic",
            ViolationType::InvalidSignature => "InvalidSignaturePanic",
            ViolationType::NodeIdentityMismatch => "NodeIdentityMismatchPanic",
        }
    }
}

/// System/process context captured at panic time, for forensic replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForensicMetadata {
    pub system: String,
    pub process_id: u32,
    pub stack_trace: String,
    pub environment: BTreeMap<String, String>,
}

/// Key substrings that mark an environment variable as likely to carry a
/// secret. An integrity panic is already a forensic record destined for an
/// audit database and the process log — it must never become a vector for
/// exfiltrating credentials that happen to be sitting in the environment.
const SENSITIVE_KEY_MARKERS: &[&str] = &["KEY", "SECRET", "TOKEN", "PASSWORD", "CREDENTIAL", "AUTH", "PRIVATE"];

fn is_sensitive_env_key(key: &str) -> bool {
    let upper = key.to_uppercase();
    SENSITIVE_KEY_MARKERS.iter().any(|marker| upper.contains(marker))
}

impl ForensicMetadata {
    pub fn capture(stack_trace: impl Into<String>) -> Self {
        Self {
            system: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            process_id: std::process::id(),
            stack_trace: stack_trace.into(),
            environment: std::env::vars()
                .map(|(k, v)| if is_sensitive_env_key(&k) { (k, "<redacted>".to_string()) } else { (k, v) })
                .collect(),
        }
    }
}

/// A fatal, serializable integrity violation (§7).
///
/// Every field here is mandatory: `recovery_hint` must name a concrete
/// command, file, or alternative, never a generic "contact support".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityPanic {
    pub violation_type: ViolationType,
    pub details: BTreeMap<String, String>,
    pub recovery_hint: String,
    pub timestamp: DateTime<Utc>,
    pub forensic_metadata: ForensicMetadata,
}

impl IntegrityPanic {
    pub fn new(violation_type: ViolationType, recovery_hint: impl Into<String>) -> Self {
        Self {
            violation_type,
            details: BTreeMap::new(),
            recovery_hint: recovery_hint.into(),
            timestamp: Utc::now(),
            forensic_metadata: ForensicMetadata::capture(std::backtrace::Backtrace::force_capture().to_string()),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// The typed panic class (§7) this record belongs to, e.g.
    /// `"MerkleRootMismatchPanic"` — see [`ViolationType::exception_class`].
    pub fn exception_class(&self) -> &'static str {
        self.violation_type.exception_class()
    }

    pub fn state_file_missing(path: &str) -> Self {
        Self::new(
            ViolationType::StateCorruption(StateCorruptionKind::StateFileMissing),
            format!("restore {path} from the last known-good backup before restarting"),
        )
        .with_detail("path", path)
    }

    pub fn state_file_corrupted(path: &str, parse_error: &str) -> Self {
        Self::new(
            ViolationType::StateCorruption(StateCorruptionKind::StateFileCorrupted),
            format!("restore {path} from the last known-good backup; do not hand-edit the file"),
        )
        .with_detail("path", path)
        .with_detail("parse_error", parse_error)
    }

    pub fn merkle_root_mismatch(computed: &str, stored: &str) -> Self {
        Self::new(
            ViolationType::MerkleRootMismatch,
            "restore state.json from the last backup whose digest matches the stored root, then re-run recovery",
        )
        .with_detail("computed_root", computed)
        .with_detail("stored_root", stored)
    }

    pub fn wal_corruption(segment_path: &str, reason: &str) -> Self {
        Self::new(
            ViolationType::WalCorruption,
            format!("quarantine {segment_path} and restore the WAL directory from backup"),
        )
        .with_detail("segment_path", segment_path)
        .with_detail("reason", reason)
    }

    pub fn invalid_signature(message_id: &str) -> Self {
        Self::new(
            ViolationType::InvalidSignature,
            format!("reject message {message_id} and rotate the signing key if forgery is suspected"),
        )
        .with_detail("message_id", message_id)
    }

    pub fn node_identity_mismatch(expected: &str, actual: &str) -> Self {
        Self::new(
            ViolationType::NodeIdentityMismatch,
            format!("verify node identity configuration; expected {expected} but observed {actual}"),
        )
        .with_detail("expected", expected)
        .with_detail("actual", actual)
    }

    /// Fatal: logs, then aborts the process. Never returns.
    ///
    /// Callers are expected to have already routed `self` to an
    /// [`crate::traits::IntegrityAuditSink`] before calling this — the panic
    /// message itself still carries the full JSON so the fact is not lost
    /// even if the audit sink write fails.
    pub fn abort(&self) -> ! {
        let payload = serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self));
        tracing::error!(violation_type = self.violation_type.as_str(), %payload, "integrity panic: aborting process");
        panic!("integrity panic [{}]: {}", self.violation_type.as_str(), self.recovery_hint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merkle_mismatch_carries_both_digests() {
        let panic = IntegrityPanic::merkle_root_mismatch("aaa", "bbb");
        assert_eq!(panic.details.get("computed_root").unwrap(), "aaa");
        assert_eq!(panic.details.get("stored_root").unwrap(), "bbb");
        assert_eq!(panic.violation_type.as_str(), "MERKLE_ROOT_MISMATCH");
    }

    #[test]
    fn state_file_missing_names_the_path_in_the_hint() {
        let panic = IntegrityPanic::state_file_missing("state/state.json");
        assert!(panic.recovery_hint.contains("state/state.json"));
        assert_eq!(
            panic.violation_type,
            ViolationType::StateCorruption(StateCorruptionKind::StateFileMissing)
        );
    }

    #[test]
    fn forensic_capture_redacts_sensitive_env_keys() {
        std::env::set_var("VERITAS_TEST_API_KEY", "do-not-leak-this");
        let meta = ForensicMetadata::capture("trace");
        assert_eq!(meta.environment.get("VERITAS_TEST_API_KEY").map(String::as_str), Some("<redacted>"));
        std::env::remove_var("VERITAS_TEST_API_KEY");
    }

    #[test]
    fn exception_class_names_the_typed_panic_from_section_7() {
        assert_eq!(IntegrityPanic::merkle_root_mismatch("a", "b").exception_class(), "MerkleRootMismatchPanic");
        assert_eq!(IntegrityPanic::state_file_missing("state/state.json").exception_class(), "StateCorruptionPanic");
        assert_eq!(IntegrityPanic::wal_corruption("wal/wal.log", "bad checksum").exception_class(), "WALCorruptionPanic");
        assert_eq!(IntegrityPanic::invalid_signature("msg-1").exception_class(), "InvalidSignaturePanic");
        assert_eq!(IntegrityPanic::node_identity_mismatch("a", "b").exception_class(), "NodeIdentityMismatchPanic");
    }

    #[test]
    fn serializes_round_trip() {
        let panic = IntegrityPanic::wal_corruption("wal/wal.log", "bad checksum");
        let json = serde_json::to_string(&panic).unwrap();
        let back: IntegrityPanic = serde_json::from_str(&json).unwrap();
        assert_eq!(back.violation_type, panic.violation_type);
        assert_eq!(back.details, panic.details);
    }
}
