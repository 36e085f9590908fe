//! The hot-swappable dynamic pattern table for the L-1 analyzer (§4.3, §5).
//!
//! Writes take the exclusive lock only long enough to swap in a new `Arc`
//! of the rule vector (copy-on-write); readers never observe a torn view
//! because they clone the `Arc`, not the vector, while holding the lock.

use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;
use veritas_core::error::KernelError;
use veritas_core::rule::HealingRule;
use veritas_core::traits::RuleStore;

pub struct RuleTable {
    rules: RwLock<Arc<Vec<HealingRule>>>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self { rules: RwLock::new(Arc::new(Vec::new())) }
    }

    pub fn from_rules(rules: Vec<HealingRule>) -> Self {
        Self { rules: RwLock::new(Arc::new(rules)) }
    }

    /// A consistent point-in-time snapshot; the caller's view never tears
    /// across a concurrent injection (§4.3).
    pub fn snapshot(&self) -> Arc<Vec<HealingRule>> {
        self.rules.read().clone()
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleStore for RuleTable {
    fn active_rules(&self) -> Vec<HealingRule> {
        self.snapshot().iter().filter(|r| r.is_active).cloned().collect()
    }

    fn inject_rule(&self, rule: HealingRule) -> Result<(), KernelError> {
        let mut guard = self.rules.write();
        let mut next = (**guard).clone();
        next.push(rule);
        *guard = Arc::new(next);
        Ok(())
    }

    fn record_match(&self, rule_id: Uuid, true_positive: bool) {
        let mut guard = self.rules.write();
        let mut next = (**guard).clone();
        if let Some(rule) = next.iter_mut().find(|r| r.rule_id == rule_id) {
            rule.record_match(true_positive);
        }
        *guard = Arc::new(next);
    }

    fn deactivate_rule(&self, rule_id: Uuid) {
        let mut guard = self.rules.write();
        let mut next = (**guard).clone();
        if let Some(rule) = next.iter_mut().find(|r| r.rule_id == rule_id) {
            rule.is_active = false;
        }
        *guard = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injection_is_visible_to_subsequent_reads() {
        let table = RuleTable::new();
        assert!(table.active_rules().is_empty());
        table.inject_rule(HealingRule::new("dos", "nested-loop")).unwrap();
        assert_eq!(table.active_rules().len(), 1);
    }
}
