//! Tool registry implementation.

use async_trait::async_trait;
use dashmap::DashMap;

use devbox_core::{Error, Result, Tool, ToolDefinition, ToolOutput, ToolRegistry, ToolRiskLevel};
use std::sync::Arc;

/// Default tool registry using DashMap.
pub struct DefaultToolRegistry {
    /// Registered tools, keyed by name.
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl DefaultToolRegistry {
    /// Create a new tool registry.
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
        }
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        // Clone out so no shard lock is held across an await.
        self.tools.get(name).map(|entry| entry.value().clone())
    }
}

impl Default for DefaultToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRegistry for DefaultToolRegistry {
    async fn register(&self, tool: Box<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        tracing::debug!(tool = %name, risk = ?tool.risk_level(), "Registering tool");

        if self.tools.contains_key(&name) {
            return Err(Error::invalid_request(format!(
                "Tool '{}' is already registered",
                name
            )));
        }

        self.tools.insert(name, Arc::from(tool));
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Box<dyn Tool>>> {
        Ok(self
            .lookup(name)
            .map(|tool| Box::new(SharedTool { tool }) as Box<dyn Tool>))
    }

    /// Definitions sorted by tool name.
    async fn list(&self) -> Result<Vec<ToolDefinition>> {
        let mut definitions: Vec<_> = self
            .tools
            .iter()
            .map(|entry| {
                let tool = entry.value();
                ToolDefinition {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters(),
                }
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(definitions)
    }

    async fn execute(&self, name: &str, args: serde_json::Value) -> Result<ToolOutput> {
        let tool = self.lookup(name).ok_or_else(|| Error::tool_not_found(name))?;

        tracing::debug!(tool = %name, "Executing tool");

        let output = tool.execute(args).await?;
        if !output.success {
            tracing::debug!(tool = %name, content = %output.content, "Tool reported failure");
        }
        Ok(output)
    }
}

/// Boxed handle onto a registered tool.
struct SharedTool {
    tool: Arc<dyn Tool>,
}

#[async_trait]
impl Tool for SharedTool {
    fn name(&self) -> &str {
        self.tool.name()
    }

    fn description(&self) -> &str {
        self.tool.description()
    }

    fn parameters(&self) -> serde_json::Value {
        self.tool.parameters()
    }

    fn risk_level(&self) -> ToolRiskLevel {
        self.tool.risk_level()
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput> {
        self.tool.execute(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the message back"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"message": {"type": "string"}}})
        }

        fn risk_level(&self) -> ToolRiskLevel {
            ToolRiskLevel::Medium
        }

        async fn execute(&self, args: Value) -> Result<ToolOutput> {
            let message = args
                .get("message")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::invalid_request("message is required"))?;
            Ok(ToolOutput::text(message))
        }
    }

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            ""
        }

        fn parameters(&self) -> Value {
            json!({})
        }

        async fn execute(&self, _args: Value) -> Result<ToolOutput> {
            Ok(ToolOutput::text(self.0))
        }
    }

    #[tokio::test]
    async fn test_register_and_list_sorted() {
        let registry = DefaultToolRegistry::new();
        registry.register(Box::new(NamedTool("zeta"))).await.unwrap();
        registry.register(Box::new(EchoTool)).await.unwrap();
        registry.register(Box::new(NamedTool("alpha"))).await.unwrap();

        let names: Vec<_> = registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["alpha", "echo", "zeta"]);
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let registry = DefaultToolRegistry::new();
        registry.register(Box::new(EchoTool)).await.unwrap();
        assert!(registry.register(Box::new(EchoTool)).await.is_err());
    }

    #[tokio::test]
    async fn test_execute() {
        let registry = DefaultToolRegistry::new();
        registry.register(Box::new(EchoTool)).await.unwrap();

        let result = registry
            .execute("echo", json!({"message": "Hello"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.content, "Hello");

        let err = registry.execute("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_get_preserves_risk_level() {
        let registry = DefaultToolRegistry::new();
        registry.register(Box::new(EchoTool)).await.unwrap();

        let tool = registry.get("echo").await.unwrap().unwrap();
        assert_eq!(tool.risk_level(), ToolRiskLevel::Medium);
        assert!(registry.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_execute_not_found() {
        let registry = DefaultToolRegistry::new();
        let result = registry.execute("nonexistent", json!({})).await;
        assert!(matches!(result, Err(Error::ToolNotFound(_))));
    }
}
