//! # agent-runtime
//!
//! Concrete adapters for the capability traits in `agent-core`.
//!
//! ## Adapters
//!
//! - **Anthropic** (default): `CompletionClient` over the Messages API
//! - **MCP** (default): `ToolCatalog` + `ToolInvoker` over a stdio tool server
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{AnthropicProvider, McpClient, McpServerConfig};
//!
//! let tools = Arc::new(McpClient::connect(McpServerConfig::from_script("server.py")?).await?);
//! let agent = ResolutionLoopBuilder::new()
//!     .completion(Arc::new(AnthropicProvider::from_env()?))
//!     .tools(tools)
//!     .build()?;
//! ```

#[cfg(feature = "anthropic")]
pub mod anthropic;

#[cfg(feature = "mcp")]
pub mod mcp;

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicConfig, AnthropicProvider};

#[cfg(feature = "mcp")]
pub use mcp::{McpClient, McpError, McpServerConfig};

// Re-export core types for convenience
pub use agent_core::{
    AgentError, ChatSession, CompletionClient, ResolutionLoop, ResolutionLoopBuilder, Result,
    ToolCatalog, ToolInvoker,
};
