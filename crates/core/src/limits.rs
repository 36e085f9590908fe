//! Size and timing limits shared by the sanitizer, semantic analyzer, and
//! judge (§4.2, §4.3, §4.6). A single struct so the three layers agree on
//! one configured ceiling rather than each hard-coding its own constant.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DefenseLimits {
    /// L0/L3: reject intents referencing more distinct identifiers than this.
    pub max_variables: usize,
    /// L0/L3: reject intents with more total constraints+post-conditions.
    pub max_constraints: usize,
    /// L-1: reject immediately if the parsed tree exceeds this many nodes.
    pub node_limit: usize,
    /// L0: hard ceiling on raw intent source size, in bytes.
    pub source_size_ceiling_bytes: usize,
    /// L-1: hard wall-clock budget for one semantic analysis (Req 10.2).
    pub semantic_budget_ms: u64,
    /// L1: entropy score at or above this is flagged.
    pub entropy_flag_threshold: f64,
    /// L1 oracle path: maximum age of an oracle proof before it is stale.
    pub oracle_max_staleness_ms: u64,
    /// L1 oracle path: default slippage tolerance against a reference value.
    pub slippage_tolerance: f64,
    /// §3.7: minimum observations before a rule's effectiveness is judged.
    pub rule_min_observations: u64,
    /// §3.7: effectiveness floor below which an active rule is deactivated.
    pub rule_effectiveness_threshold: f64,
    /// §4.11: size of the historical legitimate-transaction validation set.
    pub historical_legitimate_window: usize,
    /// §4.8: per-thread CPU ceiling in NORMAL mode before a cpu_violation.
    pub cpu_violation_ceiling_ms: u64,
}

impl Default for DefenseLimits {
    fn default() -> Self {
        Self {
            max_variables: 100,
            max_constraints: 500,
            node_limit: 1000,
            source_size_ceiling_bytes: 64 * 1024,
            semantic_budget_ms: 100,
            entropy_flag_threshold: 0.8,
            oracle_max_staleness_ms: 30_000,
            slippage_tolerance: 0.05,
            rule_min_observations: 10,
            rule_effectiveness_threshold: 0.7,
            historical_legitimate_window: 1000,
            cpu_violation_ceiling_ms: 50,
        }
    }
}

impl DefenseLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_variables(mut self, v: usize) -> Self {
        self.max_variables = v;
        self
    }

    pub fn with_max_constraints(mut self, v: usize) -> Self {
        self.max_constraints = v;
        self
    }

    pub fn with_node_limit(mut self, v: usize) -> Self {
        self.node_limit = v;
        self
    }

    pub fn with_semantic_budget_ms(mut self, v: u64) -> Self {
        self.semantic_budget_ms = v;
        self
    }

    pub fn with_slippage_tolerance(mut self, v: f64) -> Self {
        self.slippage_tolerance = v;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let limits = DefenseLimits::default();
        assert_eq!(limits.max_variables, 100);
        assert_eq!(limits.max_constraints, 500);
        assert_eq!(limits.node_limit, 1000);
        assert_eq!(limits.semantic_budget_ms, 100);
    }

    #[test]
    fn builder_overrides_fields() {
        let limits = DefenseLimits::new().with_max_variables(10).with_node_limit(50);
        assert_eq!(limits.max_variables, 10);
        assert_eq!(limits.node_limit, 50);
        assert_eq!(limits.max_constraints, 500);
    }
}
