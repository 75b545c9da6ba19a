//! Deterministic risk rules: ordered pattern → label classification.

pub mod builtin;
pub mod engine;

pub use engine::{Rule, RuleEngine, RuleSpec, RuleVerdict};
