//! Reactive learner loop (§4.11 paragraph 1): turns a REJECTED/L-1 trace
//! into a validated, injectable [`HealingRule`].

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use veritas_core::ir::Intent;
use veritas_core::limits::DefenseLimits;
use veritas_core::rule::HealingRule;
use veritas_core::traits::RuleStore;

use crate::trace::{skeleton_of, AttackTrace};

/// Blocking layer a rejection came from. Only `SemanticL1` traces feed the
/// learner — a sanitizer or conservation rejection isn't a pattern the L-1
/// dynamic table can match against (§4.11: "for every REJECTED transaction
/// whose blocking layer is L-1").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingLayer {
    Sanitizer,
    SemanticL1,
    Conservation,
    Overflow,
    Judge,
}

/// Rolling set of historical legitimate transactions the zero-false-positive
/// gate validates candidate rules against (§4.11, up to
/// `historical_legitimate_window` entries).
pub struct Learner {
    rule_store: Arc<dyn RuleStore>,
    historical_legitimate: Mutex<VecDeque<Intent>>,
    window_size: usize,
}

impl Learner {
    pub fn new(rule_store: Arc<dyn RuleStore>, limits: &DefenseLimits) -> Self {
        Self {
            rule_store,
            historical_legitimate: Mutex::new(VecDeque::with_capacity(limits.historical_legitimate_window)),
            window_size: limits.historical_legitimate_window,
        }
    }

    /// Records a transaction that passed the full pipeline, growing the
    /// historical-legitimate window (oldest entries evicted past the
    /// configured size).
    pub fn record_legitimate(&self, intent: Intent) {
        let mut window = self.historical_legitimate.lock();
        if window.len() >= self.window_size {
            window.pop_front();
        }
        window.push_back(intent);
    }

    /// §4.11: derive a candidate rule from `trace`, validate it against the
    /// historical-legitimate window (any match is a false positive and the
    /// candidate is discarded), and inject it if it passes. Returns the
    /// injected rule, or `None` if discarded or the rejection didn't
    /// originate at L-1.
    pub fn learn_from_rejection(&self, layer: BlockingLayer, trace: &AttackTrace) -> Option<HealingRule> {
        if layer != BlockingLayer::SemanticL1 {
            return None;
        }
        self.validate_and_inject(trace)
    }

    /// §4.11 paragraph 2: the adversarial loop re-runs the learner on any
    /// scenario that reached L3 unblocked, regardless of which layer (if
    /// any) eventually stopped it — the point is to close the gap the
    /// current rule set missed, not to re-litigate the reactive loop's
    /// L-1-only scoping.
    pub fn learn_from_adversarial_trace(&self, trace: &AttackTrace) -> Option<HealingRule> {
        self.validate_and_inject(trace)
    }

    fn validate_and_inject(&self, trace: &AttackTrace) -> Option<HealingRule> {
        let window = self.historical_legitimate.lock();
        let false_positives = window.iter().filter(|intent| skeleton_of(intent).contains(&trace.ast_pattern_skeleton)).count();
        drop(window);

        if false_positives > 0 {
            tracing::info!(attack_type = %trace.attack_type, false_positives, "candidate rule discarded: matched historical legitimate traffic");
            return None;
        }

        let rule = HealingRule::new(trace.attack_type.clone(), trace.ast_pattern_skeleton.clone());
        if let Err(err) = self.rule_store.inject_rule(rule.clone()) {
            tracing::warn!(%err, attack_type = %trace.attack_type, "failed to inject learned rule");
            return None;
        }
        tracing::info!(rule_id = %rule.rule_id, attack_type = %trace.attack_type, "injected learned rule");
        Some(rule)
    }

    /// Re-evaluates every active rule's effectiveness, deactivating any that
    /// fall below `limits.rule_effectiveness_threshold` once
    /// `limits.rule_min_observations` matches have been recorded (§3.7). The
    /// rule store's `record_match` only mutates TP/FP counters; this sweep
    /// is what actually flips `is_active` and persists it back via
    /// `deactivate_rule`.
    pub fn sweep_deactivations(&self, limits: &DefenseLimits) {
        for mut rule in self.rule_store.active_rules() {
            let rule_id = rule.rule_id;
            rule.reevaluate_activation(limits.rule_effectiveness_threshold, limits.rule_min_observations);
            if !rule.is_active {
                tracing::info!(rule_id = %rule_id, effectiveness = rule.effectiveness(), "rule deactivated below threshold");
                self.rule_store.deactivate_rule(rule_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_core::ir::Expr;
    use veritas_defense::RuleTable;

    fn intent_with_identifier(name: &str, ident: &str) -> Intent {
        let mut intent = Intent::new(name);
        intent.constraints.push(Expr::Identifier(ident.to_string()));
        intent
    }

    #[test]
    fn non_l1_rejection_is_ignored() {
        let store: Arc<dyn RuleStore> = Arc::new(RuleTable::new());
        let learner = Learner::new(store.clone(), &DefenseLimits::default());
        let trace = AttackTrace::capture("probe", &intent_with_identifier("x", "shady_var"));
        let rule = learner.learn_from_rejection(BlockingLayer::Conservation, &trace);
        assert!(rule.is_none());
        assert!(store.active_rules().is_empty());
    }

    #[test]
    fn candidate_matching_historical_legitimate_traffic_is_discarded() {
        let store: Arc<dyn RuleStore> = Arc::new(RuleTable::new());
        let learner = Learner::new(store.clone(), &DefenseLimits::default());
        learner.record_legitimate(intent_with_identifier("transfer", "shady_var"));

        let trace = AttackTrace::capture("probe", &intent_with_identifier("attack", "shady_var"));
        let rule = learner.learn_from_rejection(BlockingLayer::SemanticL1, &trace);
        assert!(rule.is_none(), "pattern present in legitimate history must not be injected");
    }

    #[test]
    fn clean_candidate_is_injected() {
        let store: Arc<dyn RuleStore> = Arc::new(RuleTable::new());
        let learner = Learner::new(store.clone(), &DefenseLimits::default());
        learner.record_legitimate(intent_with_identifier("transfer", "amount"));

        let trace = AttackTrace::capture("probe", &intent_with_identifier("attack", "unique_attack_marker"));
        let rule = learner.learn_from_rejection(BlockingLayer::SemanticL1, &trace);
        assert!(rule.is_some());
        assert_eq!(store.active_rules().len(), 1);
    }

    #[test]
    fn sweep_deactivates_ineffective_rules_after_minimum_observations() {
        let store: Arc<dyn RuleStore> = Arc::new(RuleTable::new());
        let learner = Learner::new(store.clone(), &DefenseLimits::default());
        let trace = AttackTrace::capture("probe", &intent_with_identifier("attack", "marker"));
        let rule = learner.learn_from_rejection(BlockingLayer::SemanticL1, &trace).unwrap();

        for _ in 0..2 {
            store.record_match(rule.rule_id, true);
        }
        for _ in 0..9 {
            store.record_match(rule.rule_id, false);
        }

        learner.sweep_deactivations(&DefenseLimits::default());
        assert!(store.active_rules().is_empty(), "2/11 effectiveness should fall below the 0.7 threshold");
    }
}
