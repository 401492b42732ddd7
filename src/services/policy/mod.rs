pub mod engine;
pub mod rules;

pub use engine::{PolicyDenial, PolicyEngine, PolicyOutcome};
pub use rules::{ClaimRequirement, HostPattern, PathPattern, PolicyRule, RuleAction, RuleError};
