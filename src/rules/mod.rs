//! Escalation rule configuration and lookup.

pub mod catalog;
pub mod types;

pub use catalog::{order_rules, RuleCatalog};
pub use types::{AppliesTo, EscalationRule, RuleContext};
