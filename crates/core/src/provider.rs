//! Provider trait: the completion gateway.
//!
//! A Provider knows how to send a conversation plus tool schemas to an LLM and
//! get back either a complete message or a stream of incremental deltas.
//!
//! Streamed tool calls arrive as [`ToolCallFragment`]s addressed by a
//! positional index. Providers forward them as-is: assembling fragments into
//! [`ToolCallRequest`]s is the agent loop's job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::{Message, ToolCallRequest};

/// Receiving end of a streamed completion.
pub type DeltaReceiver = mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "anthropic/claude-sonnet-4", "gpt-4o")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message. Tool requests, if any, are in `message.tool_calls`.
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single delta in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial text
    #[serde(default)]
    pub content: Option<String>,

    /// Partial tool call data, each tagged with its positional index
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallFragment>,

    /// Whether this is the final delta
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final delta)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    /// A delta carrying only text.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// A delta carrying only tool call fragments.
    pub fn fragments(tool_calls: Vec<ToolCallFragment>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }
}

/// One piece of an in-progress tool call.
///
/// `index` is positional (0, 1, 2, …) and is not the call's final ID. Any of
/// the other fields may be absent on a given fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// A slice of the argument JSON text, appended in arrival order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ToolCallFragment {
    /// A fragment carrying a whole, already-formed tool call.
    pub fn complete(index: usize, call: &ToolCallRequest) -> Self {
        Self {
            index,
            id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            arguments: Some(call.arguments.clone()),
        }
    }
}

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The agent loop calls `complete()`
/// or `stream()` without knowing which provider is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response deltas.
    ///
    /// The stream ends when the channel closes or a delta has `done` set.
    /// Default implementation calls `complete()` and replays the result as a
    /// single delta whose tool calls are fully-formed fragments.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<DeltaReceiver, ProviderError> {
        let response = self.complete(request).await?;
        Ok(replay_response(response))
    }
}

/// Replay a complete response as a single final delta.
///
/// Tool calls become fully-formed fragments indexed by their position.
pub fn replay_response(response: ProviderResponse) -> DeltaReceiver {
    let (tx, rx) = mpsc::channel(1);
    let fragments = response
        .message
        .tool_calls
        .iter()
        .enumerate()
        .map(|(index, call)| ToolCallFragment::complete(index, call))
        .collect();
    // Capacity 1 and a fresh channel: this send cannot fail.
    let _ = tx.try_send(Ok(StreamChunk {
        content: response.message.content,
        tool_calls: fragments,
        done: true,
        usage: response.usage,
    }));
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider;

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant_tool_calls(
                    None,
                    vec![
                        ToolCallRequest::new("call_a", "calculate", &serde_json::json!({"num1": 1})),
                        ToolCallRequest::new("call_b", "get_current_weather", &serde_json::json!({})),
                    ],
                ),
                usage: None,
                model: "fixed-model".into(),
            })
        }
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "fixed-model".into(),
            messages: vec![],
            temperature: default_temperature(),
            max_tokens: None,
            tools: vec![],
            stream: true,
        }
    }

    #[tokio::test]
    async fn default_stream_replays_complete_response() {
        let mut rx = FixedProvider.stream(request()).await.unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert!(chunk.done);
        assert!(chunk.content.is_none());
        assert_eq!(chunk.tool_calls.len(), 2);
        assert_eq!(chunk.tool_calls[1].index, 1);
        assert_eq!(chunk.tool_calls[1].id.as_deref(), Some("call_b"));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "calculate".into(),
            description: "Basic arithmetic".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": { "type": "string" }
                },
                "required": ["operation"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("calculate"));
        assert!(json.contains("operation"));
    }

    #[test]
    fn fragment_omits_absent_fields() {
        let fragment = ToolCallFragment {
            index: 2,
            arguments: Some("{\"a\"".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&fragment).unwrap();
        assert!(!json.contains("\"id\""));
        assert!(json.contains("\"index\":2"));
    }
}
