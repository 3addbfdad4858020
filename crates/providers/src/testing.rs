//! Scripted providers for driving the agent loop without a network.
//!
//! Each call to `complete` or `stream` consumes the next [`ScriptedTurn`].
//! Requests are recorded so tests can assert on what the loop sent.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use toolrelay_core::error::ProviderError;
use toolrelay_core::message::{Message, ToolCallRequest};
use toolrelay_core::provider::{
    DeltaReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolCallFragment,
    Usage, replay_response,
};

/// One scripted model round-trip.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// A complete response. Streamed as a single final delta.
    Response(ProviderResponse),
    /// Raw deltas, delivered in order. Only valid for `stream`.
    Deltas(Vec<Result<StreamChunk, ProviderError>>),
    /// The request itself fails.
    Fail(ProviderError),
}

/// A provider that replays a fixed script of turns.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that answers once with plain text.
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![ScriptedTurn::Response(text_response(text))])
    }

    /// A provider that requests tools, then answers.
    pub fn tool_then_answer(tool_calls: Vec<ToolCallRequest>, answer: &str) -> Self {
        Self::new(vec![
            ScriptedTurn::Response(tool_call_response(tool_calls)),
            ScriptedTurn::Response(text_response(answer)),
        ])
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Turns not yet consumed.
    pub fn remaining(&self) -> usize {
        self.turns.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next_turn(&self, request: ProviderRequest) -> Result<ScriptedTurn, ProviderError> {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        requests.push(request);
        let call = requests.len();
        self.turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!("script exhausted at call #{call}"))
            })
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match self.next_turn(request)? {
            ScriptedTurn::Response(response) => Ok(response),
            ScriptedTurn::Fail(err) => Err(err),
            ScriptedTurn::Deltas(_) => Err(ProviderError::NotConfigured(
                "scripted deltas can only be streamed".into(),
            )),
        }
    }

    async fn stream(&self, request: ProviderRequest) -> Result<DeltaReceiver, ProviderError> {
        match self.next_turn(request)? {
            ScriptedTurn::Response(response) => Ok(replay_response(response)),
            ScriptedTurn::Fail(err) => Err(err),
            ScriptedTurn::Deltas(deltas) => {
                let (tx, rx) = mpsc::channel(deltas.len().max(1));
                for delta in deltas {
                    // The channel is sized to hold the whole script.
                    let _ = tx.try_send(delta);
                }
                Ok(rx)
            }
        }
    }
}

/// A plain text response (no tool calls).
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(mock_usage()),
        model: "mock-model".into(),
    }
}

/// A response requesting the given tool calls, with no text.
pub fn tool_call_response(tool_calls: Vec<ToolCallRequest>) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_tool_calls(None, tool_calls),
        usage: Some(mock_usage()),
        model: "mock-model".into(),
    }
}

/// A tool call with the given ID.
pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest::new(id, name, &args)
}

/// Text deltas followed by a final `done` delta.
pub fn text_deltas(pieces: &[&str]) -> Vec<Result<StreamChunk, ProviderError>> {
    let mut deltas: Vec<_> = pieces.iter().map(|p| Ok(StreamChunk::text(*p))).collect();
    deltas.push(Ok(done_delta()));
    deltas
}

/// One delta carrying a single tool call fragment.
pub fn fragment_delta(
    index: usize,
    id: Option<&str>,
    name: Option<&str>,
    arguments: Option<&str>,
) -> Result<StreamChunk, ProviderError> {
    Ok(StreamChunk::fragments(vec![ToolCallFragment {
        index,
        id: id.map(String::from),
        name: name.map(String::from),
        arguments: arguments.map(String::from),
    }]))
}

/// The terminating delta.
pub fn done_delta() -> StreamChunk {
    StreamChunk {
        done: true,
        usage: Some(mock_usage()),
        ..StreamChunk::default()
    }
}

fn mock_usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}
