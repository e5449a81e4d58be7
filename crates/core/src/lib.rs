#![deny(unused)]
//! Core types, traits, and error definitions for Devbox.
//!
//! This crate provides the foundational building blocks shared by the
//! sandbox, governance and skills crates: the error type, configuration,
//! the workspace context with its path resolver, and the tool contract
//! exposed to the agent.

pub mod config;
pub mod error;
pub mod fs_policy;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use fs_policy::{ActiveWorkspace, ResolvedPath, WorkspaceScope, PLANS_DIR};
pub use traits::*;
pub use types::*;
