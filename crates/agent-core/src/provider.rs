//! Completion Provider Strategy Pattern
//!
//! Defines the interface the resolution loop uses to request one model turn.
//! Any backend that can take a message history plus a tool catalog and return
//! a list of content blocks can drive the loop.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{CompletionClient, GenerationOptions};
//!
//! let provider = AnthropicProvider::from_env()?;
//! let turn = provider.complete(&messages, &tools, &GenerationOptions::default()).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{ContentBlock, Message};
use crate::tool::ToolDescriptor;

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier
    pub model: String,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for sampling; provider default when unset
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,

    /// System prompt, sent separately from the message list
    #[serde(default)]
    pub system_prompt: Option<String>,
}

pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

const fn default_max_tokens() -> u32 {
    1000
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            max_tokens: default_max_tokens(),
            temperature: None,
            stop_sequences: Vec::new(),
            system_prompt: None,
        }
    }
}

/// Token usage statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Reason the model stopped generating
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    #[serde(other)]
    Other,
}

/// One response from the completion capability
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Turn {
    /// Ordered content blocks
    pub content: Vec<ContentBlock>,

    /// Why generation stopped (if reported)
    #[serde(default)]
    pub stop_reason: Option<StopReason>,

    /// Token usage (if reported)
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

impl Turn {
    pub const fn new(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            stop_reason: None,
            usage: None,
        }
    }

    /// Turn consisting of a single text block
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![ContentBlock::text(text)])
    }

    /// Whether any block requests a tool call
    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse { .. }))
    }
}

/// Strategy trait for completion providers
///
/// Implement this trait to add support for new LLM backends.
/// The resolution loop works exclusively through this interface.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Request one model turn for the given history and tool catalog.
    ///
    /// Transport, authentication and rate-limit failures surface as
    /// provider-class [`AgentError`](crate::AgentError)s.
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        options: &GenerationOptions,
    ) -> Result<Turn>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
