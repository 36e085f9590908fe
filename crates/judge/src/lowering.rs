//! IR-to-SMT lowering. Encountering any node outside `SUPPORTED_NODES`
//! raises `UnsupportedConstraint` rather than producing a best-effort
//! translation (§4.6) — this rule is the principal defense against
//! constructing solver queries whose semantics were never audited.

use veritas_core::error::{KernelError, KernelResult};
use veritas_core::ir::{BinOp, CmpOp, Expr, NodeKind, UnOp};
use z3::ast::{Ast, Bool, Int};
use z3::Context;

fn hint() -> String {
    "arithmetic {+,-,*,/,%}; comparison {=,!=,<,<=,>,>=}; unary {+,-}; grouping {()}".to_string()
}

/// Lowers an integer-sorted (or fixed-point-scaled decimal) expression.
/// `old_`-prefixed identifiers and their post-state counterparts both
/// become free integer constants named after the identifier (§4.6).
pub fn lower_int<'ctx>(ctx: &'ctx Context, expr: &Expr) -> KernelResult<Int<'ctx>> {
    match expr {
        Expr::IntLiteral(v) => Ok(Int::from_i64(ctx, clamp_i64(*v))),
        Expr::DecimalLiteral { unscaled, .. } => Ok(Int::from_i64(ctx, clamp_i64(*unscaled))),
        Expr::Identifier(name) => Ok(Int::new_const(ctx, name.as_str())),
        Expr::Unary { op: UnOp::Plus, expr } => lower_int(ctx, expr),
        Expr::Unary { op: UnOp::Minus, expr } => Ok(lower_int(ctx, expr)?.unary_minus()),
        Expr::Binary { op, lhs, rhs } => {
            let l = lower_int(ctx, lhs)?;
            let r = lower_int(ctx, rhs)?;
            Ok(match op {
                BinOp::Add => Int::add(ctx, &[&l, &r]),
                BinOp::Sub => Int::sub(ctx, &[&l, &r]),
                BinOp::Mul => Int::mul(ctx, &[&l, &r]),
                BinOp::Div => l.div(&r),
                BinOp::Mod => l.modulo(&r),
            })
        }
        Expr::Paren(inner) => lower_int(ctx, inner),
        Expr::Compare { .. } => Err(KernelError::unsupported_constraint(
            NodeKind::Eq.as_str(),
            format!("a comparison cannot appear in an arithmetic position; {}", hint()),
        )),
    }
}

/// Lowers a top-level boolean (comparison) node. Only `Expr::Compare` and
/// parenthesized comparisons are valid in constraint/post-condition
/// position; anything else is a lowering-time rejection.
pub fn lower_bool<'ctx>(ctx: &'ctx Context, expr: &Expr) -> KernelResult<Bool<'ctx>> {
    match expr {
        Expr::Compare { op, lhs, rhs } => {
            let l = lower_int(ctx, lhs)?;
            let r = lower_int(ctx, rhs)?;
            Ok(match op {
                CmpOp::Eq => l._eq(&r),
                CmpOp::Ne => l._eq(&r).not(),
                CmpOp::Lt => l.lt(&r),
                CmpOp::Le => l.le(&r),
                CmpOp::Gt => l.gt(&r),
                CmpOp::Ge => l.ge(&r),
            })
        }
        Expr::Paren(inner) => lower_bool(ctx, inner),
        other => Err(KernelError::unsupported_constraint(
            other.node_kind().as_str(),
            format!("a bare value cannot stand alone as a constraint; it must be a comparison. {}", hint()),
        )),
    }
}

fn clamp_i64(v: i128) -> i64 {
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::{Config, Context};

    #[test]
    fn lowers_comparison_to_bool() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let expr = Expr::Compare {
            op: CmpOp::Ge,
            lhs: Box::new(Expr::Identifier("old_x".into())),
            rhs: Box::new(Expr::IntLiteral(0)),
        };
        assert!(lower_bool(&ctx, &expr).is_ok());
    }

    #[test]
    fn bare_identifier_in_constraint_position_is_rejected() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let expr = Expr::Identifier("x".into());
        assert!(lower_bool(&ctx, &expr).is_err());
    }
}
