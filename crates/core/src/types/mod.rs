//! Core type definitions for Devbox.

pub mod tool;

pub use tool::*;
