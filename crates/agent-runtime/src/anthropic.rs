//! Anthropic Completion Provider
//!
//! Implementation of `CompletionClient` for the Anthropic Messages API.
//! See: <https://docs.anthropic.com/en/api/messages>

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{ContentBlock, Message, Role},
    provider::{CompletionClient, GenerationOptions, StopReason, TokenUsage, Turn, DEFAULT_MODEL},
    tool::ToolDescriptor,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const API_VERSION: &str = "2023-06-01";

/// Anthropic provider configuration
#[derive(Clone)]
pub struct AnthropicConfig {
    /// API key sent as `x-api-key`
    pub api_key: String,

    /// API base URL
    pub base_url: String,

    /// Default model for generation options
    pub model: String,

    /// Default token budget for generation options
    pub max_tokens: u32,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".into(),
            model: DEFAULT_MODEL.into(),
            max_tokens: GenerationOptions::default().max_tokens,
            timeout_secs: 120,
        }
    }

    /// Read `ANTHROPIC_*` variables; the API key is required
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| AgentError::Config("ANTHROPIC_API_KEY is not set".into()))?;

        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("ANTHROPIC_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("ANTHROPIC_MODEL") {
            config.model = model;
        }
        if let Ok(raw) = std::env::var("ANTHROPIC_MAX_TOKENS") {
            config.max_tokens = parse_max_tokens(&raw)?;
        }
        Ok(config)
    }

    /// Generation options seeded from this configuration
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            ..GenerationOptions::default()
        }
    }
}

fn parse_max_tokens(raw: &str) -> Result<u32> {
    match raw.trim().parse::<u32>() {
        Ok(max_tokens) if max_tokens > 0 => Ok(max_tokens),
        _ => Err(AgentError::Config(format!(
            "ANTHROPIC_MAX_TOKENS must be a positive integer, got '{raw}'"
        ))),
    }
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a [ContentBlock],
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [ToolDescriptor],
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    stop_sequences: &'a [String],
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<Value>,
    #[serde(default)]
    stop_reason: Option<StopReason>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Anthropic Messages API provider
pub struct AnthropicProvider {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    /// Create from configuration
    pub fn from_config(config: AnthropicConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(AnthropicConfig::from_env()?)
    }

    pub const fn config(&self) -> &AnthropicConfig {
        &self.config
    }

    fn build_request<'a>(
        messages: &'a [Message],
        tools: &'a [ToolDescriptor],
        options: &'a GenerationOptions,
    ) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &options.model,
            max_tokens: options.max_tokens,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role,
                    content: &m.content,
                })
                .collect(),
            tools,
            system: options.system_prompt.as_deref(),
            temperature: options.temperature,
            stop_sequences: &options.stop_sequences,
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key)
                .map_err(|e| AgentError::Auth(format!("Invalid API key header: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    /// Convert a response body to a turn
    fn parse_response(body: &str) -> Result<Turn> {
        let response: MessagesResponse = serde_json::from_str(body)
            .map_err(|e| AgentError::Provider(format!("Malformed response: {e}")))?;

        let content = response
            .content
            .into_iter()
            .map(parse_block)
            .collect::<Result<Vec<_>>>()?;

        Ok(Turn {
            content,
            stop_reason: response.stop_reason,
            usage: response.usage,
        })
    }

    /// Map a non-success status to the provider error class
    fn status_error(status: u16, body: &str) -> AgentError {
        let message = serde_json::from_str::<ErrorEnvelope>(body)
            .map_or_else(|_| body.to_string(), |envelope| envelope.error.message);

        match status {
            401 | 403 => AgentError::Auth(message),
            429 => AgentError::RateLimited(message),
            500..=599 => AgentError::ProviderUnavailable(format!("{status}: {message}")),
            _ => AgentError::Provider(format!("{status}: {message}")),
        }
    }
}

fn parse_block(block: Value) -> Result<ContentBlock> {
    let kind = block
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("<missing>")
        .to_string();

    match kind.as_str() {
        "text" | "tool_use" => serde_json::from_value(block)
            .map_err(|e| AgentError::ProtocolShape(format!("invalid {kind} block: {e}"))),
        _ => Err(AgentError::ProtocolShape(format!(
            "unsupported content block type '{kind}'"
        ))),
    }
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CompletionClient for AnthropicProvider {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        options: &GenerationOptions,
    ) -> Result<Turn> {
        let url = format!("{}/v1/messages", self.config.base_url);
        let request = Self::build_request(messages, tools, options);

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Anthropic request failed");
            return Err(Self::status_error(status.as_u16(), &body));
        }

        let turn = Self::parse_response(&body)?;
        if let Some(usage) = turn.usage {
            tracing::debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Anthropic usage"
            );
        }
        Ok(turn)
    }

    fn name(&self) -> &str {
        "Anthropic"
    }
}
