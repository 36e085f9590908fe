//! A dynamically injected L-1 semantic-analyzer rule (§3.7, §4.11).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingRule {
    pub rule_id: Uuid,
    pub attack_type: String,
    /// Minimal AST-pattern skeleton shared across the traces that produced
    /// this rule, opaque to everything except the L-1 matcher.
    pub pattern_descriptor: String,
    pub true_positives: u64,
    pub false_positives: u64,
    pub observations: u64,
    pub is_active: bool,
}

impl HealingRule {
    pub fn new(attack_type: impl Into<String>, pattern_descriptor: impl Into<String>) -> Self {
        Self {
            rule_id: Uuid::new_v4(),
            attack_type: attack_type.into(),
            pattern_descriptor: pattern_descriptor.into(),
            true_positives: 0,
            false_positives: 0,
            observations: 0,
            is_active: true,
        }
    }

    /// TP / (TP + FP); `1.0` with zero observations (§3.7).
    pub fn effectiveness(&self) -> f64 {
        let total = self.true_positives + self.false_positives;
        if total == 0 {
            1.0
        } else {
            self.true_positives as f64 / total as f64
        }
    }

    pub fn record_match(&mut self, true_positive: bool) {
        self.observations += 1;
        if true_positive {
            self.true_positives += 1;
        } else {
            self.false_positives += 1;
        }
    }

    /// §3.7 invariant: active ⇒ effectiveness ≥ threshold once ≥10 observations.
    pub fn reevaluate_activation(&mut self, threshold: f64, min_observations: u64) {
        if self.observations >= min_observations && self.effectiveness() < threshold {
            self.is_active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effectiveness_is_one_with_no_observations() {
        let rule = HealingRule::new("reentrancy", "loop-call-self");
        assert_eq!(rule.effectiveness(), 1.0);
    }

    #[test]
    fn deactivates_below_threshold_after_minimum_observations() {
        let mut rule = HealingRule::new("dos", "nested-loop-unbounded");
        for _ in 0..6 {
            rule.record_match(true);
        }
        for _ in 0..5 {
            rule.record_match(false);
        }
        assert_eq!(rule.observations, 11);
        rule.reevaluate_activation(0.7, 10);
        assert!(!rule.is_active, "6/11 = 0.545 < 0.7 threshold");
    }

    #[test]
    fn stays_active_before_minimum_observations_even_if_low() {
        let mut rule = HealingRule::new("dos", "nested-loop-unbounded");
        rule.record_match(false);
        rule.reevaluate_activation(0.7, 10);
        assert!(rule.is_active);
    }
}
