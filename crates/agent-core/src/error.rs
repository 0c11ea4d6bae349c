//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Coarse classification of an [`AgentError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The completion capability failed
    Provider,
    /// The tool capability failed
    Tool,
    /// A turn contained a block the loop cannot act on
    ProtocolShape,
    /// Configuration, IO and everything else
    Other,
}

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Rate limited
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Tool not present in the catalog snapshot
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Catalog snapshot lists the same tool name twice
    #[error("Duplicate tool in catalog: {0}")]
    DuplicateTool(String),

    /// Tool returned no content segments
    #[error("Tool '{0}' returned no content")]
    EmptyToolResult(String),

    /// The tool server connection failed
    #[error("Tool transport error: {0}")]
    ToolTransport(String),

    /// Unrecognised or misplaced content block in a model turn
    #[error("Protocol shape error: {0}")]
    ProtocolShape(String),

    /// Configured turn cap reached in the resolution loop
    #[error("Maximum turns ({0}) reached")]
    MaxTurns(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Classify the error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider(_)
            | Self::ProviderUnavailable(_)
            | Self::RateLimited(_)
            | Self::Auth(_) => ErrorKind::Provider,
            Self::ToolNotFound(_)
            | Self::ToolExecution(_)
            | Self::DuplicateTool(_)
            | Self::EmptyToolResult(_)
            | Self::ToolTransport(_) => ErrorKind::Tool,
            Self::ProtocolShape(_) => ErrorKind::ProtocolShape,
            Self::MaxTurns(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(AgentError::RateLimited("slow down".into()).kind(), ErrorKind::Provider);
        assert_eq!(AgentError::ToolNotFound("echo".into()).kind(), ErrorKind::Tool);
        assert_eq!(AgentError::ProtocolShape("image".into()).kind(), ErrorKind::ProtocolShape);
        assert_eq!(AgentError::Config("no key".into()).kind(), ErrorKind::Other);
    }
}
