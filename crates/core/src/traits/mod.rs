//! Core traits for Devbox.
//!
//! - `skills`: the tool contract consumed by the agent's tool-calling layer
//!   (`Tool`, `ToolRegistry`).

pub mod skills;

pub use skills::*;
