//! L2: bounds/overflow reasoning on declared numeric types, ahead of the
//! SMT solve (§4.5). This is a cheap syntactic check, not a full symbolic
//! range analysis — it catches the common case (an unsigned variable
//! decremented by a numeric literal with no matching lower-bound guard)
//! before paying for a solver call.

use veritas_core::error::{KernelError, KernelResult, RejectionCategory};
use veritas_core::ir::{BalanceChange, BinOp, CmpOp, Expr, Intent, Sign, TypeTag};

/// Does `intent.constraints` contain a guard of the shape
/// `old_<variable> >= <amount-or-larger>` that would prevent `variable`
/// from underflowing when decremented by `amount`?
fn has_lower_bound_guard(intent: &Intent, variable: &str, amount: &Expr) -> bool {
    let old_name = format!("old_{variable}");
    intent.constraints.iter().any(|c| match c {
        Expr::Compare { op: CmpOp::Ge, lhs, rhs } => {
            matches!(lhs.as_ref(), Expr::Identifier(name) if name == &old_name) && rhs.as_ref() == amount
        }
        _ => false,
    })
}

fn uint_param(intent: &Intent, variable: &str) -> bool {
    intent
        .params
        .iter()
        .any(|p| p.name == variable && matches!(p.type_tag, TypeTag::UInt))
}

/// Rejects intents whose arithmetic admits an overflow/underflow under the
/// declared numeric types (§4.5). Operates on the BalanceChanges already
/// extracted by the conservation checker.
pub fn check_overflow(intent: &Intent, changes: &[BalanceChange]) -> KernelResult<()> {
    for change in changes {
        if change.sign != Sign::Minus {
            continue;
        }
        let is_unsigned = uint_param(intent, &change.variable) || uint_param(intent, &format!("old_{}", change.variable));
        if !is_unsigned {
            continue;
        }
        if !has_lower_bound_guard(intent, &change.variable, &change.amount) {
            return Err(KernelError::rejected_with_details(
                RejectionCategory::Overflow,
                format!("'{}' is unsigned and decremented with no matching lower-bound guard", change.variable),
                Some(format!(
                    "add a guard constraint `old_{} >= <amount>` matching the post-condition's subtrahend",
                    change.variable
                )),
                serde_json::json!({ "variable": change.variable }),
            ));
        }
    }

    // Literal-only overflow: a numeric amount that would overflow i128 is
    // unreachable in practice given the parser's literal width, but an
    // explicit guard keeps the invariant auditable rather than implicit.
    for change in changes {
        if let Some(amount) = literal_value(&change.amount) {
            if amount.checked_mul(change.sign.multiplier()).is_none() {
                return Err(KernelError::rejected(
                    RejectionCategory::Overflow,
                    format!("amount for '{}' overflows the numeric representation", change.variable),
                    Some("use a smaller literal or a decimal type with explicit scale".into()),
                ));
            }
        }
    }

    Ok(())
}

fn literal_value(expr: &Expr) -> Option<i128> {
    match expr {
        Expr::IntLiteral(v) => Some(*v),
        Expr::DecimalLiteral { unscaled, .. } => Some(*unscaled),
        Expr::Binary { op: BinOp::Add, lhs, rhs } => Some(literal_value(lhs)? + literal_value(rhs)?),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_core::ir::Param;

    #[test]
    fn rejects_unguarded_unsigned_decrement() {
        let mut intent = Intent::new("transfer");
        intent.params.push(Param::new("sender_balance", TypeTag::UInt));
        let changes = vec![BalanceChange {
            variable: "sender_balance".into(),
            amount: Expr::IntLiteral(100),
            sign: Sign::Minus,
            line: 0,
            is_oracle_influenced: false,
            oracle_variable: None,
        }];
        let err = check_overflow(&intent, &changes).unwrap_err();
        assert!(err.is_rejected());
    }

    #[test]
    fn accepts_guarded_unsigned_decrement() {
        let mut intent = Intent::new("transfer");
        intent.params.push(Param::new("sender_balance", TypeTag::UInt));
        intent.constraints.push(Expr::Compare {
            op: CmpOp::Ge,
            lhs: Box::new(Expr::Identifier("old_sender_balance".into())),
            rhs: Box::new(Expr::IntLiteral(100)),
        });
        let changes = vec![BalanceChange {
            variable: "sender_balance".into(),
            amount: Expr::IntLiteral(100),
            sign: Sign::Minus,
            line: 0,
            is_oracle_influenced: false,
            oracle_variable: None,
        }];
        assert!(check_overflow(&intent, &changes).is_ok());
    }
}
