//! Restriction resolution: rule model, matching and the two cache tiers.

pub mod address;
pub mod backend;
pub mod decision_cache;
pub mod engine;
pub mod error;
pub mod geo;
pub mod rule_cache;
pub mod ruleset;
pub mod store;
pub mod types;
pub mod update;

pub use engine::RestrictionEngine;
pub use error::RestrictError;
pub use types::{Action, Category, Decision, MatchedRule, Rule, Scope};
