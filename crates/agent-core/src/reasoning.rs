//! Resolution Loop
//!
//! Drives repeated completion requests until the model produces a turn with
//! no tool calls. Each turn is scanned in order: text blocks are recorded
//! and appended as assistant messages, and the first `ToolUse` block is
//! executed and its result spliced back before the next request. Blocks
//! after that first tool call are not processed in the same round.
//!
//! Text from a turn that calls a tool is also pushed to an optional
//! [`ProgressSender`] before the tool runs, so callers can show the model's
//! plan even when the tool later fails.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{AgentError, Result};
use crate::message::{ContentBlock, Conversation, Message};
use crate::provider::{CompletionClient, GenerationOptions, Turn};
use crate::tool::{ToolCatalog, ToolDescriptor, ToolInvoker};

/// Instruction sent ahead of every fresh query
pub const PRIMING_PROMPT: &str = "Please respond with a full list of actions you plan to take \
based on what I ask. I would like to see the steps you intend to take, and any tools you plan to call.";

/// What [`FinalAnswer::text`] holds once the loop finishes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AnswerPolicy {
    /// Always empty; text is only visible through `progress`/`final_blocks`
    Empty,
    /// Text blocks of the final turn
    #[default]
    LastTurn,
    /// Every text block seen during the query, in order
    Concatenated,
}

impl AnswerPolicy {
    fn compose(self, progress: &[String], final_blocks: &[String]) -> String {
        match self {
            Self::Empty => String::new(),
            Self::LastTurn => final_blocks.join("\n"),
            Self::Concatenated => progress
                .iter()
                .chain(final_blocks)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Receives text blocks of tool-calling turns as soon as they are read
pub type ProgressSender = mpsc::UnboundedSender<String>;

/// Resolution loop configuration
#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Instruction appended before the user's query on a fresh conversation
    pub priming_prompt: String,

    /// How the returned answer text is assembled
    pub answer_policy: AnswerPolicy,

    /// Generation options passed to every completion request
    pub generation: GenerationOptions,

    /// Optional cap on completion requests per query. `None` runs until a
    /// turn carries no tool call.
    pub max_turns: Option<usize>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            priming_prompt: PRIMING_PROMPT.into(),
            answer_policy: AnswerPolicy::default(),
            generation: GenerationOptions::default(),
            max_turns: None,
        }
    }
}

/// Outcome of a completed query
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalAnswer {
    /// Answer text, assembled per [`AnswerPolicy`]
    pub text: String,

    /// Text blocks from turns that went on to call a tool
    pub progress: Vec<String>,

    /// Text blocks from the final turn
    pub final_blocks: Vec<String>,

    /// Completion requests issued
    pub completions: usize,

    /// Tool invocations performed
    pub tool_calls: usize,
}

enum LoopState {
    AwaitingCompletion,
    ProcessingTurn(Turn),
    Done(Vec<String>),
}

enum TurnOutcome {
    ToolCalled,
    Final,
}

/// Alternates completion requests and tool calls until the model stops
/// asking for tools
pub struct ResolutionLoop {
    completion: Arc<dyn CompletionClient>,
    catalog: Arc<dyn ToolCatalog>,
    invoker: Arc<dyn ToolInvoker>,
    config: LoopConfig,
    progress: Option<ProgressSender>,
}

impl ResolutionLoop {
    /// Create a new loop
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        catalog: Arc<dyn ToolCatalog>,
        invoker: Arc<dyn ToolInvoker>,
        config: LoopConfig,
    ) -> Self {
        Self {
            completion,
            catalog,
            invoker,
            config,
            progress: None,
        }
    }

    /// Report intermediate text to `sender` while queries run
    #[must_use]
    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Resolve a query on a fresh conversation that is discarded afterwards
    pub async fn run(&self, query: &str) -> Result<FinalAnswer> {
        let mut conversation = Conversation::new();
        self.resolve(query, &mut conversation).await
    }

    /// Resolve a query on top of a caller-owned history.
    ///
    /// Work happens on a scratch copy; `history` is only replaced when the
    /// query succeeds, so it never ends on an unanswered `ToolUse`.
    pub async fn run_with_history(
        &self,
        query: &str,
        history: &mut Conversation,
    ) -> Result<FinalAnswer> {
        let mut scratch = history.clone();
        let answer = self.resolve(query, &mut scratch).await?;
        *history = scratch;
        Ok(answer)
    }

    /// Resolve a query, appending every message to `conversation`.
    ///
    /// On error `conversation` holds exactly the messages appended before
    /// the failing call.
    pub async fn resolve(
        &self,
        query: &str,
        conversation: &mut Conversation,
    ) -> Result<FinalAnswer> {
        if conversation.is_empty() {
            conversation.push(Message::user(self.config.priming_prompt.clone()));
        }
        conversation.push(Message::user(query));

        let tools = self.fetch_catalog().await?;
        tracing::debug!(tools = tools.len(), "fetched tool catalog");

        let mut progress = Vec::new();
        let mut completions = 0;
        let mut tool_calls = 0;
        let mut state = LoopState::AwaitingCompletion;

        loop {
            state = match state {
                LoopState::AwaitingCompletion => {
                    if let Some(max) = self.config.max_turns {
                        if completions >= max {
                            return Err(AgentError::MaxTurns(max));
                        }
                    }
                    completions += 1;

                    let turn = self
                        .completion
                        .complete(conversation.messages(), &tools, &self.config.generation)
                        .await?;
                    tracing::debug!(
                        turn = completions,
                        blocks = turn.content.len(),
                        stop_reason = ?turn.stop_reason,
                        "received turn"
                    );
                    LoopState::ProcessingTurn(turn)
                }
                LoopState::ProcessingTurn(turn) => {
                    let mut texts = Vec::new();
                    match self.process_turn(turn, &tools, conversation, &mut texts).await? {
                        TurnOutcome::ToolCalled => {
                            tool_calls += 1;
                            progress.append(&mut texts);
                            LoopState::AwaitingCompletion
                        }
                        TurnOutcome::Final => LoopState::Done(texts),
                    }
                }
                LoopState::Done(final_blocks) => {
                    tracing::info!(
                        provider = self.completion.name(),
                        completions,
                        tool_calls,
                        "query resolved"
                    );
                    let text = self.config.answer_policy.compose(&progress, &final_blocks);
                    return Ok(FinalAnswer {
                        text,
                        progress,
                        final_blocks,
                        completions,
                        tool_calls,
                    });
                }
            };
        }
    }

    /// Fetch the catalog snapshot for this query and check name uniqueness
    async fn fetch_catalog(&self) -> Result<Vec<ToolDescriptor>> {
        let tools = self.catalog.list_tools().await?;

        let mut seen = HashSet::new();
        for tool in &tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(AgentError::DuplicateTool(tool.name.clone()));
            }
        }

        Ok(tools)
    }

    /// Scan one turn in order; stops at the first tool call
    async fn process_turn(
        &self,
        turn: Turn,
        tools: &[ToolDescriptor],
        conversation: &mut Conversation,
        texts: &mut Vec<String>,
    ) -> Result<TurnOutcome> {
        let calls_tool = turn.has_tool_use();
        for block in turn.content {
            match block {
                ContentBlock::Text { text } => {
                    tracing::debug!(chars = text.len(), "text block");
                    if calls_tool {
                        self.report(&text);
                    }
                    conversation.push(Message::assistant(text.clone()));
                    texts.push(text);
                }
                ContentBlock::ToolUse { id, name, arguments } => {
                    self.execute_tool(id, name, arguments, tools, conversation)
                        .await?;
                    return Ok(TurnOutcome::ToolCalled);
                }
                ContentBlock::ToolResult { tool_use_id, .. } => {
                    return Err(AgentError::ProtocolShape(format!(
                        "tool_result block for '{tool_use_id}' inside a model turn"
                    )));
                }
            }
        }

        Ok(TurnOutcome::Final)
    }

    fn report(&self, text: &str) {
        if let Some(sender) = &self.progress {
            if sender.send(text.to_owned()).is_err() {
                tracing::debug!("progress receiver dropped");
            }
        }
    }

    /// Append the call, invoke the tool and append its first result segment
    async fn execute_tool(
        &self,
        id: String,
        name: String,
        arguments: Value,
        tools: &[ToolDescriptor],
        conversation: &mut Conversation,
    ) -> Result<()> {
        if !tools.iter().any(|tool| tool.name == name) {
            return Err(AgentError::ToolNotFound(name));
        }

        conversation.push(Message::tool_use(id.clone(), name.clone(), arguments.clone()));

        tracing::info!(tool = %name, id = %id, "Executing tool");
        let segments = self.invoker.call_tool(&name, arguments).await?;

        if segments.len() > 1 {
            tracing::debug!(
                tool = %name,
                dropped = segments.len() - 1,
                "keeping only the first result segment"
            );
        }
        let first = segments
            .into_iter()
            .next()
            .ok_or(AgentError::EmptyToolResult(name))?;

        conversation.push(Message::tool_result(id, first.text));
        Ok(())
    }

    /// Get configuration
    pub const fn config(&self) -> &LoopConfig {
        &self.config
    }
}

/// Builder for [`ResolutionLoop`]
#[derive(Default)]
pub struct ResolutionLoopBuilder {
    completion: Option<Arc<dyn CompletionClient>>,
    catalog: Option<Arc<dyn ToolCatalog>>,
    invoker: Option<Arc<dyn ToolInvoker>>,
    config: LoopConfig,
    progress: Option<ProgressSender>,
}

impl ResolutionLoopBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completion(mut self, completion: Arc<dyn CompletionClient>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn ToolCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn invoker(mut self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Use one object as both catalog and invoker
    pub fn tools<T>(mut self, tools: Arc<T>) -> Self
    where
        T: ToolCatalog + ToolInvoker + 'static,
    {
        let catalog: Arc<dyn ToolCatalog> = tools.clone();
        let invoker: Arc<dyn ToolInvoker> = tools;
        self.catalog = Some(catalog);
        self.invoker = Some(invoker);
        self
    }

    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn priming_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.priming_prompt = prompt.into();
        self
    }

    pub const fn answer_policy(mut self, policy: AnswerPolicy) -> Self {
        self.config.answer_policy = policy;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.config.generation.max_tokens = max_tokens;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.generation.system_prompt = Some(prompt.into());
        self
    }

    pub const fn max_turns(mut self, max: usize) -> Self {
        self.config.max_turns = Some(max);
        self
    }

    pub fn progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn build(self) -> Result<ResolutionLoop> {
        let completion = self
            .completion
            .ok_or_else(|| AgentError::Config("Completion client is required".into()))?;
        let catalog = self
            .catalog
            .ok_or_else(|| AgentError::Config("Tool catalog is required".into()))?;
        let invoker = self
            .invoker
            .ok_or_else(|| AgentError::Config("Tool invoker is required".into()))?;

        let agent = ResolutionLoop::new(completion, catalog, invoker, self.config);
        Ok(match self.progress {
            Some(sender) => agent.with_progress(sender),
            None => agent,
        })
    }
}
