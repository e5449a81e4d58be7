#![deny(unused)]
//! Governance for Devbox.
//!
//! This crate provides:
//! - The command policy gate applied before shell commands reach the container
//! - Tracing subscriber setup

pub mod command_policy;
pub mod tracing_layer;

pub use command_policy::{
    parse_segments, CommandPolicy, CommandSegment, PolicyDecision, PolicyRule, RuleKind,
    BLOCKED_EXIT_CODE,
};
pub use tracing_layer::configure_tracing;
