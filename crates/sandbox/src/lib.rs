#![deny(unused)]
//! The agent's sandbox: a bounded workspace it can read, write, patch,
//! search and run commands against without escaping it.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  Agent tool calls (tools.rs)           │
//! │    ↓ snapshot of the active workspace  │
//! ├──────────────┬─────────────┬───────────┤
//! │  FileOps     │ PatchEngine │ Search    │
//! │    ↓ WorkspaceScope::resolve (clamped) │
//! ├──────────────┴─────────────┴───────────┤
//! │  <home_dir>/<workspace>/...            │
//! └────────────────────────────────────────┘
//!
//! ┌────────────────────────────────────────┐
//! │  CommandGateway                        │
//! │    ↓ CommandPolicy (deny-list)         │
//! │    ↓ ContainerRuntime (bollard/mock)   │
//! │  pre-provisioned container             │
//! └────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use devbox_sandbox::{register_sandbox_tools, DockerRuntime, CommandGateway, SandboxManager};
//!
//! let runtime = Arc::new(DockerRuntime::new()?);
//! let gateway = Arc::new(CommandGateway::new(runtime, (&settings).into()));
//! let manager = Arc::new(SandboxManager::from_settings(&settings)?.with_gateway(gateway));
//!
//! register_sandbox_tools(&registry, manager).await?;
//! ```

pub mod engine;
pub mod errors;
pub mod files;
pub mod gateway;
pub mod patch;
pub mod plan;
pub mod search;
pub mod tools;

pub use engine::{ContainerRuntime, ContainerSummary, DockerRuntime, ExecOutput, ExecRequest, MockRuntime};
pub use files::{
    ContentEncoding, DirEntryInfo, ExistsResult, FileOpResult, FileOps, ListResult, ReadResult,
};
pub use gateway::{CommandGateway, CommandResult, GatewayConfig};
pub use patch::{render_diff, DiffApplyResult, FilePatchResult, PatchEngine, PatchResult};
pub use plan::{PlanResult, PlanStore};
pub use search::{GrepMatch, GrepOptions, GrepResult, SearchEngine};
pub use tools::{register_sandbox_tools, SandboxManager};
