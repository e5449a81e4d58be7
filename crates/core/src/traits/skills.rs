//! Tool traits.

use async_trait::async_trait;
use serde_json::Value;
use crate::error::Result;
use crate::types::{ToolDefinition, ToolOutput, ToolRiskLevel};

/// Tool interface for atomic operations.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the unique name of the tool.
    fn name(&self) -> &str;

    /// Get the human-readable description.
    fn description(&self) -> &str;

    /// Get the JSON Schema for parameters.
    fn parameters(&self) -> Value;

    /// Risk classification used by callers that gate tool calls.
    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::Low
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> Result<ToolOutput>;
}

/// Tool registry for managing available tools.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Register a new tool.
    async fn register(&self, tool: Box<dyn Tool>) -> Result<()>;

    /// Get a tool by name.
    async fn get(&self, name: &str) -> Result<Option<Box<dyn Tool>>>;

    /// List all available tools.
    async fn list(&self) -> Result<Vec<ToolDefinition>>;

    /// Execute a tool by name with arguments.
    async fn execute(&self, name: &str, args: Value) -> Result<ToolOutput>;
}
