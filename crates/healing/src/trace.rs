//! The attack trace captured at the moment L-1 rejects an intent (§4.11).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use veritas_core::ir::Intent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackTrace {
    pub attack_type: String,
    /// The minimal AST-pattern skeleton shared with the rejected intent —
    /// in practice the same debug-representation substring the L-1
    /// analyzer's `matches_rule` checks against, so a rule derived from it
    /// is guaranteed to be matchable by the layer it will be injected into.
    pub ast_pattern_skeleton: String,
    pub timestamp: DateTime<Utc>,
}

impl AttackTrace {
    pub fn capture(attack_type: impl Into<String>, intent: &Intent) -> Self {
        Self {
            attack_type: attack_type.into(),
            ast_pattern_skeleton: skeleton_of(intent),
            timestamp: Utc::now(),
        }
    }
}

/// Debug representation of an intent's constraints and post-conditions —
/// the same shape `veritas_defense::semantic`'s dynamic matcher searches
/// for as a substring, so a skeleton captured here is matchable once
/// promoted into a [`veritas_core::rule::HealingRule`].
pub fn skeleton_of(intent: &Intent) -> String {
    format!("{:?}", (&intent.constraints, &intent.post_conditions))
}
