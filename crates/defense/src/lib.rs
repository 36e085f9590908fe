//! The ordered defense gauntlet: L0 sanitizer, L-1 semantic analyzer, L1
//! conservation checker, L2 overflow checker (§4.2-§4.5). Each layer returns
//! `Ok(..)` to let the pipeline proceed or `Err(KernelError::Rejected{..})`
//! to short-circuit it (§2 data flow diagram).

pub mod conservation;
pub mod overflow;
pub mod rule_table;
pub mod sanitizer;
pub mod semantic;

pub use conservation::{check_conservation, ConservationOutcome};
pub use overflow::check_overflow;
pub use rule_table::RuleTable;
pub use sanitizer::{sanitize, SanitizerReport, SanitizerViolation};
pub use semantic::{analyze, SemanticAnalyzer, SemanticReport};
