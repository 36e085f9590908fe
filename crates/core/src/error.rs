//! Recoverable error taxonomy.
//!
//! `KernelError` covers the first two of the three error classes in §7:
//! transaction outcomes (REJECTED/FAILED/TIMEOUT) and operation failures
//! (disk errors, ENOSPC, audit-log write failures). Integrity panics are a
//! deliberately separate, non-`std::error::Error` type — see [`crate::panic`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Subcategory of a REJECTED outcome (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionCategory {
    Sanitizer,
    Semantic,
    Conservation,
    Overflow,
    UnsupportedConstraint,
    FailClosed,
}

impl RejectionCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectionCategory::Sanitizer => "SANITIZER",
            RejectionCategory::Semantic => "SEMANTIC",
            RejectionCategory::Conservation => "CONSERVATION",
            RejectionCategory::Overflow => "OVERFLOW",
            RejectionCategory::UnsupportedConstraint => "UNSUPPORTED_CONSTRAINT",
            RejectionCategory::FailClosed => "FAIL_CLOSED",
        }
    }
}

impl std::fmt::Display for RejectionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every recoverable failure mode a kernel operation can return.
///
/// This is intentionally *not* the same type as [`crate::panic::IntegrityPanic`]:
/// a `KernelError` means the caller can retry, fix the input, or inspect the
/// hint and move on. An `IntegrityPanic` means the process must stop.
#[derive(Debug, Error)]
pub enum KernelError {
    /// §4.1: a syntactic error in the intent source, with position.
    #[error("parse error at {line}:{column}: {message}")]
    ParseError { line: usize, column: usize, message: String },

    /// A defense-pipeline layer refused the intent (§7 transaction outcomes).
    #[error("rejected [{category}]: {message}")]
    Rejected {
        category: RejectionCategory,
        message: String,
        recovery_hint: Option<String>,
        details: serde_json::Value,
    },

    /// L3 judge proved UNSAT: the constraints are contradictory.
    #[error("failed (unsat): {message}")]
    Failed { message: String, counterexample: Option<String> },

    /// L3 judge exhausted its configured timeout.
    #[error("timeout after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// §4.6: an expression node outside SUPPORTED_NODES was encountered at
    /// lowering time. Distinguished from `Rejected` only for callers that
    /// want to pattern-match the whitelist violation specifically; it still
    /// surfaces to the pipeline as a REJECTED/UNSUPPORTED_CONSTRAINT outcome.
    #[error("unsupported constraint node: {node_type}")]
    UnsupportedConstraint { node_type: String, recovery_hint: String },

    /// Operation failure: I/O error during commit/recovery/audit write.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation failure: disk exhausted during a durable write (§4.9).
    #[error("disk full while writing {path}")]
    DiskFull { path: PathBuf },

    /// Operation failure: the forensic audit log could not be written.
    /// Per the original's `_write_audit_log`, this never blocks the
    /// caller-visible result — it is surfaced so the embedder can alert.
    #[error("audit log write failed: {message}")]
    AuditLogWrite { message: String },

    /// Operation failure: state/WAL serialization round-trip broke.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    pub fn rejected(
        category: RejectionCategory,
        message: impl Into<String>,
        recovery_hint: Option<String>,
    ) -> Self {
        KernelError::Rejected {
            category,
            message: message.into(),
            recovery_hint,
            details: serde_json::Value::Null,
        }
    }

    pub fn rejected_with_details(
        category: RejectionCategory,
        message: impl Into<String>,
        recovery_hint: Option<String>,
        details: serde_json::Value,
    ) -> Self {
        KernelError::Rejected { category, message: message.into(), recovery_hint, details }
    }

    pub fn unsupported_constraint(node_type: impl Into<String>, recovery_hint: impl Into<String>) -> Self {
        KernelError::UnsupportedConstraint { node_type: node_type.into(), recovery_hint: recovery_hint.into() }
    }

    /// Category string for the REJECTED outcome surface, `None` otherwise.
    pub fn rejection_category(&self) -> Option<RejectionCategory> {
        match self {
            KernelError::Rejected { category, .. } => Some(*category),
            KernelError::UnsupportedConstraint { .. } => Some(RejectionCategory::UnsupportedConstraint),
            _ => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, KernelError::Rejected { .. } | KernelError::UnsupportedConstraint { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, KernelError::Failed { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, KernelError::Timeout { .. })
    }

    /// Operation failures the caller may retry or escalate to an operator,
    /// as opposed to transaction outcomes driven by the input itself.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            KernelError::Io(_) | KernelError::DiskFull { .. } | KernelError::AuditLogWrite { .. } | KernelError::Serialization(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_carries_category_and_hint() {
        let err = KernelError::rejected(RejectionCategory::Conservation, "residual 100", None);
        assert!(err.is_rejected());
        assert_eq!(err.rejection_category(), Some(RejectionCategory::Conservation));
    }

    #[test]
    fn unsupported_constraint_classifies_as_rejected() {
        let err = KernelError::unsupported_constraint("BitOr", "use +,-,*,/,%");
        assert!(err.is_rejected());
        assert_eq!(err.rejection_category(), Some(RejectionCategory::UnsupportedConstraint));
    }

    #[test]
    fn failed_and_timeout_are_distinct_from_rejected() {
        let failed = KernelError::Failed { message: "unsat".into(), counterexample: None };
        let timeout = KernelError::Timeout { elapsed_ms: 1000 };
        assert!(failed.is_failed() && !failed.is_rejected());
        assert!(timeout.is_timeout() && !timeout.is_rejected());
    }

    #[test]
    fn operational_errors_are_not_transaction_outcomes() {
        let err = KernelError::DiskFull { path: PathBuf::from("state/state.json") };
        assert!(err.is_operational());
        assert!(!err.is_rejected() && !err.is_failed() && !err.is_timeout());
    }

    #[test]
    fn category_display_matches_spec_tokens() {
        assert_eq!(RejectionCategory::FailClosed.to_string(), "FAIL_CLOSED");
        assert_eq!(RejectionCategory::UnsupportedConstraint.to_string(), "UNSUPPORTED_CONSTRAINT");
    }
}
