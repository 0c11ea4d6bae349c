//! Command-line configuration
//!
//! Flags override the `ANTHROPIC_*` environment defaults.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use agent_core::{AnswerPolicy, LoopConfig, SessionConfig};
use agent_runtime::AnthropicConfig;
use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "mcp-chat",
    version,
    about = "Chat with a language model that can call tools on an MCP server"
)]
pub struct Cli {
    /// Path to the MCP server script (.py or .js)
    pub server: PathBuf,

    /// Model identifier (default: $ANTHROPIC_MODEL)
    #[arg(long)]
    pub model: Option<String>,

    /// Maximum tokens per completion (default: $ANTHROPIC_MAX_TOKENS or 1000)
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Stop a query after this many completion requests (at least 1)
    #[arg(long)]
    pub max_turns: Option<NonZeroUsize>,

    /// What to print as the final answer
    #[arg(long, value_enum, default_value_t = AnswerMode::LastTurn)]
    pub answer_policy: AnswerMode,

    /// Carry conversation history from one query to the next
    #[arg(long)]
    pub keep_history: bool,

    /// System prompt sent with every request
    #[arg(long)]
    pub system: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AnswerMode {
    Empty,
    LastTurn,
    Concatenated,
}

impl From<AnswerMode> for AnswerPolicy {
    fn from(mode: AnswerMode) -> Self {
        match mode {
            AnswerMode::Empty => Self::Empty,
            AnswerMode::LastTurn => Self::LastTurn,
            AnswerMode::Concatenated => Self::Concatenated,
        }
    }
}

impl Cli {
    /// Resolution loop settings from flags layered over the provider config
    pub fn loop_config(&self, anthropic: &AnthropicConfig) -> LoopConfig {
        let mut generation = anthropic.generation_options();
        if let Some(model) = &self.model {
            generation.model.clone_from(model);
        }
        if let Some(max_tokens) = self.max_tokens {
            generation.max_tokens = max_tokens;
        }
        generation.system_prompt.clone_from(&self.system);

        LoopConfig {
            answer_policy: self.answer_policy.into(),
            generation,
            max_turns: self.max_turns.map(NonZeroUsize::get),
            ..LoopConfig::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            keep_history: self.keep_history,
            ..SessionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["mcp-chat", "server.py"]).unwrap();
        let anthropic = AnthropicConfig::new("sk-test");
        let config = cli.loop_config(&anthropic);

        assert_eq!(config.answer_policy, AnswerPolicy::LastTurn);
        assert_eq!(config.generation.model, anthropic.model);
        assert_eq!(config.generation.max_tokens, 1000);
        assert!(config.max_turns.is_none());
        assert!(!cli.session_config().keep_history);
    }

    #[test]
    fn test_flags_override_environment() {
        let cli = Cli::try_parse_from([
            "mcp-chat",
            "server.js",
            "--model",
            "claude-test",
            "--max-tokens",
            "256",
            "--max-turns",
            "4",
            "--answer-policy",
            "concatenated",
            "--keep-history",
        ])
        .unwrap();
        let config = cli.loop_config(&AnthropicConfig::new("sk-test"));

        assert_eq!(config.generation.model, "claude-test");
        assert_eq!(config.generation.max_tokens, 256);
        assert_eq!(config.max_turns, Some(4));
        assert_eq!(config.answer_policy, AnswerPolicy::Concatenated);
        assert!(cli.session_config().keep_history);
    }

    #[test]
    fn test_zero_max_turns_rejected() {
        assert!(Cli::try_parse_from(["mcp-chat", "server.py", "--max-turns", "0"]).is_err());
    }

    #[test]
    fn test_server_is_required() {
        assert!(Cli::try_parse_from(["mcp-chat"]).is_err());
    }
}
