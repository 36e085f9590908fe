//! The four-way transaction outcome and the verification report that wraps
//! it (§6.2, §7).

use serde::{Deserialize, Serialize};

use crate::metrics::TransactionMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Proved,
    Rejected,
    Failed,
    Timeout,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Proved => "PROVED",
            Outcome::Rejected => "REJECTED",
            Outcome::Failed => "FAILED",
            Outcome::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `verify_logic` (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub status: Outcome,
    pub message: String,
    /// SMT model witnessing a PROVED result, when the judge produced one.
    pub model: Option<String>,
    pub telemetry: TransactionMetrics,
    /// Populated when a conservation/overflow violation drove the outcome.
    pub constraint_violation: Option<String>,
}
