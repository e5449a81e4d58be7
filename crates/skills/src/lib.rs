#![deny(unused)]
//! Tool registry for Devbox.
//!
//! The sandbox crate implements the tools; this crate holds them by name and
//! dispatches calls from the agent's tool-calling layer.

pub mod registry;

pub use registry::DefaultToolRegistry;
