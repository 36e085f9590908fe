//! L3: whitelisted IR-to-SMT lowering and the fail-closed solve protocol
//! (§4.6). A fresh `z3::Context`/`Solver` is built for every call — "the
//! solver is single-use per verification: a fresh context per call
//! guarantees no state leaks between transactions."

mod lowering;

use std::time::{Duration, Instant};

use veritas_core::error::{KernelError, KernelResult, RejectionCategory};
use veritas_core::ir::Intent;
use veritas_core::limits::DefenseLimits;
use z3::ast::Bool;
use z3::{Config, Context, SatResult, Solver};

pub use lowering::lower_bool;

#[derive(Debug, Clone)]
pub struct ProofReport {
    pub model: Option<String>,
    pub z3_duration_ms: f64,
}

/// Configure-solve-interpret, never mapping UNKNOWN or an error to PROVED
/// (§4.6 solve protocol, §8 fail-closed-solver invariant).
pub fn prove(intent: &Intent, timeout_ms: u64, limits: &DefenseLimits) -> KernelResult<ProofReport> {
    let distinct_vars = intent.distinct_identifiers().len();
    if distinct_vars > limits.max_variables {
        return Err(KernelError::rejected(
            RejectionCategory::FailClosed,
            format!("intent references {distinct_vars} variables, exceeding MAX_VARIABLES {}", limits.max_variables),
            Some("reduce the number of distinct identifiers referenced by the intent".into()),
        ));
    }
    if intent.total_condition_count() > limits.max_constraints {
        return Err(KernelError::rejected(
            RejectionCategory::FailClosed,
            format!(
                "intent has {} conditions, exceeding MAX_CONSTRAINTS {}",
                intent.total_condition_count(),
                limits.max_constraints
            ),
            Some("split the intent into smaller sub-intents".into()),
        ));
    }

    let mut cfg = Config::new();
    cfg.set_timeout_msec(timeout_ms);
    let ctx = Context::new(&cfg);
    let solver = Solver::new(&ctx);

    let mut clauses: Vec<Bool> = Vec::with_capacity(intent.total_condition_count());
    for expr in intent.constraints.iter().chain(intent.post_conditions.iter()) {
        clauses.push(lower_bool(&ctx, expr)?);
    }
    for clause in &clauses {
        solver.assert(clause);
    }

    let start = Instant::now();
    let result = solver.check();
    let elapsed = start.elapsed();

    match result {
        SatResult::Sat => {
            let model = solver.get_model().map(|m| m.to_string());
            Ok(ProofReport { model, z3_duration_ms: to_ms(elapsed) })
        }
        SatResult::Unsat => {
            let core = solver.get_unsat_core();
            let counterexample = if core.is_empty() { None } else { Some(format!("{core:?}")) };
            Err(KernelError::Failed { message: "SMT solver reported UNSAT".into(), counterexample })
        }
        SatResult::Unknown => {
            if elapsed >= Duration::from_millis(timeout_ms) {
                Err(KernelError::Timeout { elapsed_ms: elapsed.as_millis() as u64 })
            } else {
                // UNKNOWN before the timeout elapsed: still fail-closed, never PROVED.
                Err(KernelError::rejected(
                    RejectionCategory::FailClosed,
                    "SMT solver returned UNKNOWN".to_string(),
                    Some("the constraint set may use unsupported arithmetic (e.g. non-linear division); simplify and retry".into()),
                ))
            }
        }
    }
}

fn to_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proves_simple_transfer() {
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
        let intent = veritas_parser::parse_intent(src).unwrap();
        let report = prove(&intent, 30_000, &DefenseLimits::default()).unwrap();
        assert!(report.model.is_some());
    }

    #[test]
    fn unsat_constraints_are_reported_failed_not_timeout() {
        let src = r#"
            intent impossible(amount: uint) {
                guard {
                    amount > 10;
                    amount < 5;
                }
                verify {
                    amount == amount;
                }
            }
        "#;
        let intent = veritas_parser::parse_intent(src).unwrap();
        let err = prove(&intent, 30_000, &DefenseLimits::default()).unwrap_err();
        assert!(err.is_failed());
    }

    #[test]
    fn rejects_before_solving_when_over_variable_limit() {
        let src = r#"
            intent x(a: uint, b: uint, c: uint) {
                guard { a > 0; b > 0; c > 0; }
                verify { a == a; }
            }
        "#;
        let intent = veritas_parser::parse_intent(src).unwrap();
        let limits = DefenseLimits::default().with_max_variables(2);
        let err = prove(&intent, 30_000, &limits).unwrap_err();
        assert!(err.is_rejected());
    }
}
