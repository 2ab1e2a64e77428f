//! Group configuration: schema types, personality-to-prompt translation,
//! validation, structural diffing, and the wildcard/override merge.
//!
//! Everything here is pure — no I/O, no clocks. The gateway and sync crates
//! call into this one so both sides of the system agree on banding, wording,
//! and merge semantics.

pub mod diff;
pub mod merge;
pub mod personality;
pub mod schema;
pub mod validate;

pub use {
    diff::{ConfigChange, diff_configs},
    merge::merge_group_config,
    personality::personality_to_prompt,
    schema::{FeatureToggles, GroupConfig, Personality, RateLimitHints},
    validate::{Issue, Severity, ValidationReport, validate_group_config},
};
