//! Tool System
//!
//! The two tool capabilities the resolution loop consumes, [`ToolCatalog`]
//! and [`ToolInvoker`], plus an in-process [`ToolRegistry`] that implements
//! both for tools defined in Rust.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AgentError, Result};

/// Tool definition offered to the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool identifier within one catalog
    pub name: String,

    /// Human-readable description (shown to LLM)
    #[serde(default)]
    pub description: String,

    /// JSON Schema for the tool input
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// One part of a tool's returned content
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSegment {
    pub text: String,
}

impl ResultSegment {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Source of the tool descriptors offered to the model
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    /// Snapshot of the currently available tools
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;
}

/// Executes a tool by name
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run `name` with `arguments` and return its content segments
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Vec<ResultSegment>>;
}

/// Tool trait - implement to add in-process capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Descriptor offered to the model
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute the tool with given arguments
    async fn execute(&self, arguments: Value) -> Result<Vec<ResultSegment>>;
}

type ToolFn = dyn Fn(Value) -> Result<Vec<ResultSegment>> + Send + Sync;

/// A tool backed by a synchronous closure
pub struct FnTool {
    descriptor: ToolDescriptor,
    handler: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(descriptor: ToolDescriptor, handler: F) -> Self
    where
        F: Fn(Value) -> Result<Vec<ResultSegment>> + Send + Sync + 'static,
    {
        Self {
            descriptor,
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    async fn execute(&self, arguments: Value) -> Result<Vec<ResultSegment>> {
        (self.handler)(arguments)
    }
}

/// Registry for in-process tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tool; names must be unique
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    /// Register a shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.descriptor().name;
        if self.tools.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }
}

#[async_trait]
impl ToolCatalog for ToolRegistry {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        Ok(self
            .order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.descriptor())
            .collect())
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Vec<ResultSegment>> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        tool.execute(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_tool() -> FnTool {
        FnTool::new(
            ToolDescriptor::new(
                "echo",
                "Echo the input text",
                json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            ),
            |args| {
                let text = args
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AgentError::ToolExecution("missing text".into()))?;
                Ok(vec![ResultSegment::text(text)])
            },
        )
    }

    #[tokio::test]
    async fn test_tool_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool()).unwrap();

        assert!(registry.get("echo").is_some());
        assert!(registry.get("unknown").is_none());

        let catalog = registry.list_tools().await.unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].name, "echo");

        let result = registry.call_tool("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(result, vec![ResultSegment::text("hi")]);
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool()).unwrap();
        let err = registry.register(echo_tool()).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateTool(name) if name == "echo"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.call_tool("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound(_)));
    }
}
