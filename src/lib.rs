//! Top-level wiring for the formal-verification transaction kernel.
//!
//! This crate has no algorithms of its own — it composes
//! `veritas-parser`, `veritas-defense`, `veritas-judge`,
//! `veritas-durability`, `veritas-sentinel`, and `veritas-healing` behind
//! one [`Kernel`], the single entry point an embedder constructs (§9: "a
//! top-level wiring function composes them; no module-level mutable
//! state").

pub mod config;
pub mod kernel;
pub mod self_check;

pub use config::KernelConfig;
pub use kernel::Kernel;
pub use self_check::{CheckedProperty, PropertyCheck, SelfCheckReport};

pub use veritas_core::error::{KernelError, KernelResult, RejectionCategory};
pub use veritas_core::ir::{BalanceChange, Expr, Intent, NodeKind, Param, TypeTag, SUPPORTED_NODES};
pub use veritas_core::limits::DefenseLimits;
pub use veritas_core::outcome::{Outcome, VerificationReport};
pub use veritas_core::panic::{IntegrityPanic, ViolationType};
pub use veritas_durability::{BatchResult, ChangeSet};
