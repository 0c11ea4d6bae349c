//! Chat Session
//!
//! Reads queries line by line, runs one resolution loop per query and writes
//! the results back. A failing query is reported and the session moves on.
//! Text from tool-calling turns is printed while the query is still running.

use std::pin::pin;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use crate::message::Conversation;
use crate::reasoning::{FinalAnswer, ResolutionLoop};

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

const RULER: &str = "<------------------>";

/// Text and behaviour of the interactive session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Printed once before the first prompt
    pub banner: String,

    /// Printed before each query is read
    pub prompt: String,

    /// Input that ends the session (case-insensitive)
    pub quit_word: String,

    /// Thread one history through every query instead of starting fresh
    pub keep_history: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            banner: "Type your queries or 'quit' to exit.".into(),
            prompt: "\nQuery: ".into(),
            quit_word: "quit".into(),
            keep_history: false,
        }
    }
}

/// Counters reported when a session ends
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub answered: usize,
    pub failed: usize,
}

/// Interactive read-query / print-answer loop
pub struct ChatSession {
    id: SessionId,
    agent: ResolutionLoop,
    config: SessionConfig,
    history: Conversation,
    progress: mpsc::UnboundedReceiver<String>,
    started_at: DateTime<Utc>,
}

impl ChatSession {
    /// Create a new session
    pub fn new(agent: ResolutionLoop, config: SessionConfig) -> Self {
        let (sender, progress) = mpsc::unbounded_channel();
        Self {
            id: SessionId::new(),
            agent: agent.with_progress(sender),
            config,
            history: Conversation::new(),
            progress,
            started_at: Utc::now(),
        }
    }

    /// History carried between queries (empty unless `keep_history` is set)
    pub const fn history(&self) -> &Conversation {
        &self.history
    }

    /// Whether `line` ends the session
    fn is_quit(&self, line: &str) -> bool {
        line.eq_ignore_ascii_case(&self.config.quit_word)
    }

    /// Run until the quit word or end of input.
    ///
    /// Query failures are written to `output` and never end the session;
    /// only IO errors on `input`/`output` do.
    pub async fn run<R, W>(&mut self, mut input: R, mut output: W) -> std::io::Result<SessionSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut summary = SessionSummary::default();
        output
            .write_all(format!("{}\n", self.config.banner).as_bytes())
            .await?;

        loop {
            output.write_all(self.config.prompt.as_bytes()).await?;
            output.flush().await?;

            let mut line = String::new();
            if input.read_line(&mut line).await? == 0 {
                break;
            }
            let query = line.trim();
            if self.is_quit(query) {
                break;
            }
            if query.is_empty() {
                continue;
            }

            let query_id = Uuid::new_v4();
            let span = tracing::info_span!("query", session = %self.id, query_id = %query_id);
            let history = self.config.keep_history.then_some(&mut self.history);
            let mut query_fut = pin!(answer(&self.agent, history, query).instrument(span));
            let result = loop {
                tokio::select! {
                    biased;
                    Some(text) = self.progress.recv() => write_framed(&mut output, &text).await?,
                    result = &mut query_fut => break result,
                }
            };
            while let Ok(text) = self.progress.try_recv() {
                write_framed(&mut output, &text).await?;
            }

            match result {
                Ok(answer) => {
                    summary.answered += 1;
                    write_answer(&mut output, &answer).await?;
                }
                Err(err) => {
                    summary.failed += 1;
                    tracing::warn!(%query_id, error = %err, "query failed");
                    output.write_all(format!("\nError: {err}\n").as_bytes()).await?;
                }
            }
        }

        output.flush().await?;
        tracing::info!(
            session = %self.id,
            answered = summary.answered,
            failed = summary.failed,
            duration_secs = (Utc::now() - self.started_at).num_seconds(),
            "session ended"
        );
        Ok(summary)
    }
}

async fn answer(
    agent: &ResolutionLoop,
    history: Option<&mut Conversation>,
    query: &str,
) -> crate::Result<FinalAnswer> {
    match history {
        Some(history) => agent.run_with_history(query, history).await,
        None => agent.run(query).await,
    }
}

async fn write_framed<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> std::io::Result<()> {
    output
        .write_all(format!("{RULER}\n{text}\n{RULER}\n").as_bytes())
        .await?;
    output.flush().await
}

/// Progress was already framed while the query ran; the final turn's blocks
/// are only framed when the answer policy left `text` empty.
async fn write_answer<W: AsyncWrite + Unpin>(output: &mut W, answer: &FinalAnswer) -> std::io::Result<()> {
    if answer.text.is_empty() {
        for text in &answer.final_blocks {
            write_framed(output, text).await?;
        }
    }
    output.write_all(format!("\n{}\n", answer.text).as_bytes()).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::error::AgentError;
    use crate::message::ContentBlock;
    use crate::mock::{ScriptedCompletionClient, ScriptedReply};
    use crate::provider::Turn;
    use crate::reasoning::{AnswerPolicy, ResolutionLoopBuilder, PRIMING_PROMPT};
    use crate::tool::{FnTool, ToolDescriptor, ToolRegistry};

    fn session(client: &Arc<ScriptedCompletionClient>, config: SessionConfig) -> ChatSession {
        let mut tools = ToolRegistry::new();
        tools
            .register(FnTool::new(
                ToolDescriptor::new("flaky", "Always fails", json!({"type": "object"})),
                |_| Err(AgentError::ToolExecution("flaky tool failed".into())),
            ))
            .unwrap();
        let agent = ResolutionLoopBuilder::new()
            .completion(client.clone())
            .tools(Arc::new(tools))
            .answer_policy(AnswerPolicy::Empty)
            .build()
            .unwrap();
        ChatSession::new(agent, config)
    }

    async fn drive(session: &mut ChatSession, input: &str) -> (SessionSummary, String) {
        let mut output = Vec::new();
        let summary = session.run(input.as_bytes(), &mut output).await.unwrap();
        (summary, String::from_utf8(output).unwrap())
    }

    #[tokio::test]
    async fn test_quit_is_case_insensitive() {
        let client = Arc::new(ScriptedCompletionClient::default());
        let mut session = session(&client, SessionConfig::default());

        let (summary, output) = drive(&mut session, "QuIt\nnever asked\n").await;
        assert_eq!(summary, SessionSummary::default());
        assert!(output.starts_with("Type your queries or 'quit' to exit."));
        assert_eq!(client.request_count().await, 0);
    }

    #[tokio::test]
    async fn test_session_survives_failed_query() {
        let client = Arc::new(ScriptedCompletionClient::new([
            ScriptedReply::Turn(Turn::new(vec![ContentBlock::tool_use("a", "flaky", json!({}))])),
            ScriptedReply::Turn(Turn::text("second answer")),
        ]));
        let mut session = session(&client, SessionConfig::default());

        let (summary, output) = drive(&mut session, "first\nsecond\nquit\n").await;

        assert_eq!(summary, SessionSummary { answered: 1, failed: 1 });
        assert!(output.contains("Error: Tool execution error: flaky tool failed"));
        assert!(output.contains(&format!("{RULER}\nsecond answer\n{RULER}")));

        let requests = client.requests().await;
        assert_eq!(requests.len(), 2);
        let fresh = &requests[1].messages;
        assert_eq!(fresh.len(), 2);
        assert_eq!(fresh[0].text(), PRIMING_PROMPT);
        assert_eq!(fresh[1].text(), "second");
    }

    #[tokio::test]
    async fn test_plan_text_shown_when_tool_fails() {
        let client = Arc::new(ScriptedCompletionClient::from_turns([Turn::new(vec![
            ContentBlock::text("PLAN: call flaky"),
            ContentBlock::tool_use("a", "flaky", json!({})),
        ])]));
        let mut session = session(&client, SessionConfig::default());

        let (summary, output) = drive(&mut session, "try it\nquit\n").await;

        assert_eq!(summary.failed, 1);
        let plan = output
            .find(&format!("{RULER}\nPLAN: call flaky\n{RULER}\n"))
            .expect("plan text framed");
        let error = output
            .find("Error: Tool execution error: flaky tool failed")
            .expect("error reported");
        assert!(plan < error);
    }

    #[tokio::test]
    async fn test_end_of_input_ends_session() {
        let client = Arc::new(ScriptedCompletionClient::from_turns([Turn::text("ok")]));
        let mut session = session(&client, SessionConfig::default());

        let (summary, _) = drive(&mut session, "only query").await;
        assert_eq!(summary.answered, 1);
    }

    #[tokio::test]
    async fn test_keep_history_threads_conversation() {
        let client = Arc::new(ScriptedCompletionClient::from_turns([
            Turn::text("one"),
            Turn::text("two"),
        ]));
        let config = SessionConfig {
            keep_history: true,
            ..SessionConfig::default()
        };
        let mut session = session(&client, config);

        let (summary, _) = drive(&mut session, "a\nb\nquit\n").await;
        assert_eq!(summary.answered, 2);
        assert_eq!(session.history().len(), 5);
        assert_eq!(client.requests().await[1].messages.len(), 4);
    }
}
