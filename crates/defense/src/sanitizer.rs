//! L0: static textual/structural checks, no SMT (§4.2).

use serde::{Deserialize, Serialize};
use veritas_core::error::{KernelError, KernelResult, RejectionCategory};
use veritas_core::limits::DefenseLimits;
use veritas_core::ir::Intent;

const OUT_OF_BAND_MARKERS: &[&str] = &["IGNORE PREVIOUS", "SYSTEM:", "<<INJECT>>", "### OVERRIDE"];
const SHELL_PRIMITIVES: &[&str] = &["eval", "exec", "shell", "system", "subprocess", "popen"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Risk {
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizerViolation {
    pub kind: String,
    pub risk: Risk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizerReport {
    pub is_safe: bool,
    pub violations: Vec<SanitizerViolation>,
}

/// Runs L0 over the raw source and the already-parsed IR. Any violation
/// rejects the whole pipeline with category SANITIZER (§4.2).
pub fn sanitize(source: &str, intent: &Intent, limits: &DefenseLimits) -> KernelResult<SanitizerReport> {
    let mut violations = Vec::new();

    if source.len() > limits.source_size_ceiling_bytes {
        violations.push(SanitizerViolation { kind: "SOURCE_SIZE_CEILING_EXCEEDED".into(), risk: Risk::High });
    }

    let upper = source.to_uppercase();
    for marker in OUT_OF_BAND_MARKERS {
        if upper.contains(&marker.to_uppercase()) {
            violations.push(SanitizerViolation { kind: format!("OUT_OF_BAND_MARKER:{marker}"), risk: Risk::High });
        }
    }

    let param_names = intent.params.iter().map(|p| p.name.clone());
    for ident in intent.distinct_identifiers().into_iter().chain(param_names) {
        let lowered = ident.to_lowercase();
        if SHELL_PRIMITIVES.iter().any(|p| lowered == *p) {
            violations.push(SanitizerViolation { kind: format!("SHELL_PRIMITIVE_IDENTIFIER:{ident}"), risk: Risk::High });
        }
    }

    let distinct_vars = intent.distinct_identifiers().len();
    if distinct_vars > limits.max_variables {
        violations.push(SanitizerViolation {
            kind: format!("TOO_MANY_VARIABLES:{distinct_vars}>{}", limits.max_variables),
            risk: Risk::High,
        });
    }

    let total_conditions = intent.total_condition_count();
    if total_conditions > limits.max_constraints {
        violations.push(SanitizerViolation {
            kind: format!("TOO_MANY_CONSTRAINTS:{total_conditions}>{}", limits.max_constraints),
            risk: Risk::High,
        });
    }

    let is_safe = violations.is_empty();
    if !is_safe {
        let details = serde_json::json!({ "violations": violations });
        return Err(KernelError::rejected_with_details(
            RejectionCategory::Sanitizer,
            format!("{} violation(s) detected at L0", violations.len()),
            Some("reduce intent size or rename identifiers colliding with host-shell primitives".into()),
            details,
        ));
    }

    Ok(SanitizerReport { is_safe, violations })
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_core::ir::{Param, TypeTag};

    #[test]
    fn rejects_shell_primitive_identifier() {
        let mut intent = Intent::new("x");
        intent.params.push(Param::new("eval", TypeTag::UInt));
        let err = sanitize("intent x(eval: uint) {}", &intent, &DefenseLimits::default()).unwrap_err();
        assert!(err.is_rejected());
    }

    #[test]
    fn accepts_clean_intent() {
        let mut intent = Intent::new("transfer");
        intent.params.push(Param::new("amount", TypeTag::UInt));
        let report = sanitize("intent transfer(amount: uint) {}", &intent, &DefenseLimits::default()).unwrap();
        assert!(report.is_safe);
    }

    #[test]
    fn rejects_too_many_variables() {
        let mut intent = Intent::new("x");
        for i in 0..5 {
            intent.params.push(Param::new(format!("v{i}"), TypeTag::UInt));
        }
        use veritas_core::ir::Expr;
        for i in 0..5 {
            intent.constraints.push(Expr::Identifier(format!("v{i}")));
        }
        let limits = DefenseLimits::default().with_max_variables(3);
        let err = sanitize("intent x() {}", &intent, &limits).unwrap_err();
        assert!(err.is_rejected());
    }
}
