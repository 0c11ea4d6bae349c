//! Scripted Completion Client
//!
//! For testing and demo purposes. Replays a fixed sequence of turns and
//! records every history it was asked to complete.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{CompletionClient, GenerationOptions, Turn};
use crate::tool::ToolDescriptor;

/// One scripted reply
#[derive(Clone, Debug)]
pub enum ScriptedReply {
    /// Return this turn
    Turn(Turn),
    /// Fail with a provider error carrying this message
    Fail(String),
}

/// Captured arguments of one `complete` call
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDescriptor>,
}

/// Completion client that replays scripted replies in order
#[derive(Default)]
pub struct ScriptedCompletionClient {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedCompletionClient {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Script made only of successful turns
    pub fn from_turns(turns: impl IntoIterator<Item = Turn>) -> Self {
        Self::new(turns.into_iter().map(ScriptedReply::Turn))
    }

    /// Every request received so far
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }

    /// Number of `complete` calls received
    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Replies not yet consumed
    pub async fn remaining(&self) -> usize {
        self.replies.lock().await.len()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        _options: &GenerationOptions,
    ) -> Result<Turn> {
        self.requests.lock().await.push(RecordedRequest {
            messages: messages.to_vec(),
            tools: tools.to_vec(),
        });

        match self.replies.lock().await.pop_front() {
            Some(ScriptedReply::Turn(turn)) => Ok(turn),
            Some(ScriptedReply::Fail(message)) => Err(AgentError::Provider(message)),
            None => Err(AgentError::ProviderUnavailable("script exhausted".into())),
        }
    }

    fn name(&self) -> &str {
        "Scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replies() {
        let client = ScriptedCompletionClient::new([
            ScriptedReply::Turn(Turn::text("one")),
            ScriptedReply::Fail("boom".into()),
        ]);
        let options = GenerationOptions::default();

        let turn = client.complete(&[Message::user("hi")], &[], &options).await.unwrap();
        assert_eq!(turn.content[0].as_text(), Some("one"));

        let err = client.complete(&[], &[], &options).await.unwrap_err();
        assert!(matches!(err, AgentError::Provider(msg) if msg == "boom"));

        assert!(client.complete(&[], &[], &options).await.is_err());
        assert_eq!(client.request_count().await, 3);
        assert_eq!(client.remaining().await, 0);
    }
}
