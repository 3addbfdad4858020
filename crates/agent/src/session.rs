//! One conversation bound to one agent loop.

use std::sync::Arc;

use futures::stream::BoxStream;
use toolrelay_core::error::Result;
use toolrelay_core::message::{Conversation, Message};

use crate::loop_runner::AgentLoop;

/// A session: the shared agent plus the history it extends.
///
/// Both entry points take `&mut self`, so only one turn can touch the
/// conversation at a time. Front ends that share a session across tasks wrap
/// it in a `tokio::sync::Mutex`.
pub struct AgentSession {
    agent: Arc<AgentLoop>,
    conversation: Conversation,
}

impl AgentSession {
    pub fn new(agent: Arc<AgentLoop>) -> Self {
        Self {
            agent,
            conversation: Conversation::new(),
        }
    }

    /// Run a buffered turn and return the final answer.
    pub async fn invoke(&mut self, user_text: &str) -> Result<String> {
        self.agent.invoke(&mut self.conversation, user_text).await
    }

    /// Run a streamed turn. The session stays borrowed until the stream is
    /// dropped.
    pub fn invoke_stream(&mut self, user_text: impl Into<String>) -> BoxStream<'_, Result<String>> {
        self.agent.invoke_stream(&mut self.conversation, user_text.into())
    }

    pub fn agent(&self) -> &Arc<AgentLoop> {
        &self.agent
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }
}
