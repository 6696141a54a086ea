pub mod dsl;
pub mod engine;

pub use engine::{build_eval_context, PolicyEngine, PolicySimulation, RuleMatch};
