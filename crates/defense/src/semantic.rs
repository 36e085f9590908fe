//! L-1: AST walk, entropy scoring, and the static + dynamic pattern sets
//! (§4.3). Must complete within `limits.semantic_budget_ms` (Req 10.2) —
//! enforced here by bailing out at the NODE_LIMIT boundary rather than by
//! a wall-clock timer, since the walk itself is the only unbounded step and
//! it is already linear in node count.
//!
//! The built-in static patterns in the original system (unbounded loop,
//! unconditional recursion, resource-exhaustion nesting) presuppose a
//! control-flow-capable language. Our whitelisted IR (§3.2) has no loop,
//! call, or recursion node — those are rejected at parse time, before an
//! `Expr` is ever built — so those three detectors can never fire here and
//! are intentionally omitted rather than stubbed out. The hook for future
//! control-flow extensions is the dynamic pattern table, not these
//! detectors.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use veritas_core::error::{KernelError, KernelResult, RejectionCategory};
use veritas_core::ir::{Expr, Intent, NodeKind};
use veritas_core::limits::DefenseLimits;
use veritas_core::rule::HealingRule;
use veritas_core::traits::RuleStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticReport {
    pub is_safe: bool,
    pub entropy_score: f64,
    pub detected_patterns: Vec<String>,
}

fn walk_node_kinds(expr: &Expr, out: &mut Vec<NodeKind>) {
    out.push(expr.node_kind());
    match expr {
        Expr::Unary { expr, .. } | Expr::Paren(expr) => walk_node_kinds(expr, out),
        Expr::Binary { lhs, rhs, .. } | Expr::Compare { lhs, rhs, .. } => {
            walk_node_kinds(lhs, out);
            walk_node_kinds(rhs, out);
        }
        Expr::IntLiteral(_) | Expr::DecimalLiteral { .. } | Expr::Identifier(_) => {}
    }
}

/// Shannon entropy of the node-kind distribution, normalized to [0,1] by
/// the maximum possible entropy for the whitelist's cardinality.
pub fn entropy_score(intent: &Intent) -> f64 {
    let mut kinds = Vec::new();
    for e in intent.constraints.iter().chain(intent.post_conditions.iter()) {
        walk_node_kinds(e, &mut kinds);
    }
    if kinds.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<NodeKind, usize> = HashMap::new();
    for k in &kinds {
        *counts.entry(*k).or_insert(0) += 1;
    }
    let total = kinds.len() as f64;
    let entropy: f64 = counts
        .values()
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum();
    let max_entropy = (veritas_core::ir::SUPPORTED_NODES.len() as f64).log2();
    if max_entropy <= 0.0 {
        0.0
    } else {
        (entropy / max_entropy).clamp(0.0, 1.0)
    }
}

/// Naive dynamic-pattern match: a rule's descriptor is treated as a
/// substring to find in the canonical debug representation of the parsed
/// expressions. Intentionally simple — the learner (§4.11) controls what
/// descriptors get injected, and keeping the matcher dumb keeps injection
/// itself allocation-cheap and lock-hold-time short (§5).
fn matches_rule(intent: &Intent, rule: &HealingRule) -> bool {
    let repr = format!("{:?}", (&intent.constraints, &intent.post_conditions));
    repr.contains(&rule.pattern_descriptor)
}

pub struct SemanticAnalyzer {
    rule_store: Arc<dyn RuleStore>,
}

impl SemanticAnalyzer {
    pub fn new(rule_store: Arc<dyn RuleStore>) -> Self {
        Self { rule_store }
    }

    pub fn analyze(&self, intent: &Intent, limits: &DefenseLimits) -> KernelResult<SemanticReport> {
        analyze_with_rules(intent, limits, &self.rule_store.active_rules())
    }
}

/// Standalone entry point usable without a rule store (e.g. bootstrap,
/// tests).
pub fn analyze(intent: &Intent, limits: &DefenseLimits) -> KernelResult<SemanticReport> {
    analyze_with_rules(intent, limits, &[])
}

fn analyze_with_rules(intent: &Intent, limits: &DefenseLimits, rules: &[HealingRule]) -> KernelResult<SemanticReport> {
    let node_count = intent.total_node_count();
    if node_count > limits.node_limit {
        return Err(KernelError::rejected_with_details(
            RejectionCategory::Semantic,
            format!("AST node count {node_count} exceeds NODE_LIMIT {}", limits.node_limit),
            Some(format!("split the intent into smaller sub-intents (limit {})", limits.node_limit)),
            serde_json::json!({ "node_count": node_count, "node_limit": limits.node_limit }),
        ));
    }

    let entropy_score = entropy_score(intent);
    let entropy_flagged = entropy_score >= limits.entropy_flag_threshold;

    let mut detected_patterns = Vec::new();
    for rule in rules {
        if matches_rule(intent, rule) {
            detected_patterns.push(format!("{}:{}", rule.attack_type, rule.rule_id));
        }
    }

    let is_safe = !entropy_flagged && detected_patterns.is_empty();
    if !is_safe {
        return Err(KernelError::rejected_with_details(
            RejectionCategory::Semantic,
            "L-1 semantic analysis flagged this intent".to_string(),
            Some("review flagged patterns; entropy above threshold suggests obfuscated structure".into()),
            serde_json::json!({ "entropy_score": entropy_score, "detected_patterns": detected_patterns }),
        ));
    }

    Ok(SemanticReport { is_safe, entropy_score, detected_patterns })
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_core::ir::{BinOp, CmpOp};

    fn simple_intent() -> Intent {
        let mut intent = Intent::new("transfer");
        intent.constraints.push(Expr::Compare {
            op: CmpOp::Ge,
            lhs: Box::new(Expr::Identifier("old_sender_balance".into())),
            rhs: Box::new(Expr::Identifier("amount".into())),
        });
        intent.post_conditions.push(Expr::Compare {
            op: CmpOp::Eq,
            lhs: Box::new(Expr::Identifier("sender_balance".into())),
            rhs: Box::new(Expr::Binary {
                op: BinOp::Sub,
                lhs: Box::new(Expr::Identifier("old_sender_balance".into())),
                rhs: Box::new(Expr::Identifier("amount".into())),
            }),
        });
        intent
    }

    #[test]
    fn node_limit_rejects_before_entropy_is_even_computed() {
        let intent = simple_intent();
        let limits = DefenseLimits::default().with_node_limit(1);
        let err = analyze(&intent, &limits).unwrap_err();
        assert!(err.is_rejected());
    }

    #[test]
    fn clean_intent_passes_with_default_limits() {
        let intent = simple_intent();
        let report = analyze(&intent, &DefenseLimits::default()).unwrap();
        assert!(report.is_safe);
        assert!(report.entropy_score >= 0.0 && report.entropy_score <= 1.0);
    }

    #[test]
    fn matching_dynamic_rule_rejects() {
        let intent = simple_intent();
        let rule = HealingRule::new("probe", "Identifier(\"amount\")");
        let err = analyze_with_rules(&intent, &DefenseLimits::default(), &[rule]).unwrap_err();
        assert!(err.is_rejected());
    }
}
