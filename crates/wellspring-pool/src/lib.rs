//! wellspring-pool
//!
//! Pools are thoughts defining named scopes with access rules and a
//! membership set. This crate resolves membership from `member_of`
//! connections confirmed by bilateral attestations, evaluates the sender-side
//! visibility predicate, enforces pool rules at ingest, and runs the
//! appetite rate limiter.

pub mod appetite;
pub mod engine;
pub mod rules;

pub use appetite::{AppetiteEngine, AppetiteLimits, RateDecision, SenderCategory};
pub use engine::{PoolEngine, Withheld};
pub use rules::{Pool, PoolRules, RuleCheck};
