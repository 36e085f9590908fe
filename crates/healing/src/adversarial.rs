//! Proactive adversarial trainer loop (§4.11 paragraph 2).
//!
//! The trainer never hardcodes the defense/judge pipeline itself — it is
//! handed a [`PipelineProbe`] capability by the embedder (the root `Kernel`
//! composes the real L0-L3 gauntlet; tests use a stub), matching the
//! duck-typed-collaborator pattern the rest of the kernel uses for the
//! oracle simulator and Merkle tree (§9).

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;

use crate::generator::{generate, Scenario};
use crate::learner::Learner;
use crate::trace::AttackTrace;

/// Which layer stopped a scenario, `None` if it reached and passed L3
/// (PROVED) — the genuinely concerning outcome for an adversarial probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub blocking_layer: Option<String>,
    pub reached_l3: bool,
}

/// The pipeline capability the adversarial trainer submits scenarios
/// through. Implemented by the root `Kernel` over the real L0-L-1-L1-L2-L3
/// gauntlet.
pub trait PipelineProbe: Send + Sync {
    fn probe(&self, intent: &veritas_core::ir::Intent) -> ProbeResult;
}

#[derive(Debug, Clone, Default)]
pub struct AdversarialReport {
    pub total_scenarios: usize,
    pub blocked_by_layer: BTreeMap<String, usize>,
    pub unblocked_to_l3: usize,
    pub rules_relearned: usize,
}

pub struct AdversarialTrainer {
    probe: Arc<dyn PipelineProbe>,
    learner: Arc<Learner>,
}

impl AdversarialTrainer {
    pub fn new(probe: Arc<dyn PipelineProbe>, learner: Arc<Learner>) -> Self {
        Self { probe, learner }
    }

    /// Generates `n` scenarios, submits each through the pipeline, and
    /// re-runs the learner on any that reached L3 unblocked (§4.11: "for any
    /// scenario that reaches L3 un-blocked, re-runs the learner on the
    /// traced pattern").
    pub fn run(&self, rng: &mut impl Rng, n: usize) -> AdversarialReport {
        let scenarios: Vec<Scenario> = generate(rng, n);
        let mut report = AdversarialReport { total_scenarios: scenarios.len(), ..Default::default() };

        for scenario in scenarios {
            let result = self.probe.probe(&scenario.intent);
            match &result.blocking_layer {
                Some(layer) => {
                    *report.blocked_by_layer.entry(layer.clone()).or_insert(0) += 1;
                }
                None if result.reached_l3 => {
                    report.unblocked_to_l3 += 1;
                    let trace = AttackTrace::capture(scenario.attack_type.clone(), &scenario.intent);
                    if self.learner.learn_from_adversarial_trace(&trace).is_some() {
                        report.rules_relearned += 1;
                    }
                }
                None => {}
            }
        }

        tracing::info!(
            total = report.total_scenarios,
            unblocked = report.unblocked_to_l3,
            relearned = report.rules_relearned,
            "adversarial training round complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use veritas_core::limits::DefenseLimits;
    use veritas_core::traits::RuleStore;
    use veritas_defense::RuleTable;

    /// Stub probe: always reports a scenario as reaching L3 unblocked, so
    /// every generated scenario flows into the learner.
    struct AlwaysReachesL3;
    impl PipelineProbe for AlwaysReachesL3 {
        fn probe(&self, _intent: &veritas_core::ir::Intent) -> ProbeResult {
            ProbeResult { blocking_layer: None, reached_l3: true }
        }
    }

    /// Stub probe: always blocked at a fixed layer.
    struct AlwaysBlockedAt(&'static str);
    impl PipelineProbe for AlwaysBlockedAt {
        fn probe(&self, _intent: &veritas_core::ir::Intent) -> ProbeResult {
            ProbeResult { blocking_layer: Some(self.0.to_string()), reached_l3: false }
        }
    }

    #[test]
    fn unblocked_scenarios_feed_the_learner() {
        let store: Arc<dyn RuleStore> = Arc::new(RuleTable::new());
        let learner = Arc::new(Learner::new(store.clone(), &DefenseLimits::default()));
        let trainer = AdversarialTrainer::new(Arc::new(AlwaysReachesL3), learner);

        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let report = trainer.run(&mut rng, 6);

        assert_eq!(report.total_scenarios, 6);
        assert_eq!(report.unblocked_to_l3, 6);
        assert!(report.rules_relearned > 0);
        assert!(!store.active_rules().is_empty());
    }

    #[test]
    fn blocked_scenarios_are_tallied_by_layer_not_relearned() {
        let store: Arc<dyn RuleStore> = Arc::new(RuleTable::new());
        let learner = Arc::new(Learner::new(store.clone(), &DefenseLimits::default()));
        let trainer = AdversarialTrainer::new(Arc::new(AlwaysBlockedAt("conservation")), learner);

        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let report = trainer.run(&mut rng, 4);

        assert_eq!(report.unblocked_to_l3, 0);
        assert_eq!(report.rules_relearned, 0);
        assert_eq!(report.blocked_by_layer.get("conservation"), Some(&4));
    }

    #[test]
    fn report_counts_reflect_total_generated() {
        let calls = Arc::new(AtomicUsize::new(0));
        struct CountingProbe(Arc<AtomicUsize>);
        impl PipelineProbe for CountingProbe {
            fn probe(&self, _intent: &veritas_core::ir::Intent) -> ProbeResult {
                self.0.fetch_add(1, Ordering::SeqCst);
                ProbeResult { blocking_layer: Some("sanitizer".to_string()), reached_l3: false }
            }
        }
        let store: Arc<dyn RuleStore> = Arc::new(RuleTable::new());
        let learner = Arc::new(Learner::new(store, &DefenseLimits::default()));
        let trainer = AdversarialTrainer::new(Arc::new(CountingProbe(calls.clone())), learner);

        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        trainer.run(&mut rng, 10);
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }
}
