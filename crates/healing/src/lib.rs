//! Self-healing & adversarial trainer (§4.11): the reactive learner loop
//! and the proactive adversarial loop, sharing one [`veritas_defense::RuleTable`]
//! rule store plus JSON persistence across restarts.

pub mod adversarial;
pub mod generator;
pub mod learner;
pub mod persistence;
pub mod trace;

pub use adversarial::{AdversarialReport, AdversarialTrainer, PipelineProbe, ProbeResult};
pub use generator::{generate, Scenario};
pub use learner::{BlockingLayer, Learner};
pub use persistence::{load_rules, save_rules};
pub use trace::{skeleton_of, AttackTrace};
