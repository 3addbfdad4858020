//! Completion gateway for any endpoint speaking the OpenAI chat protocol.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any other
//! endpoint exposing `/v1/chat/completions`.
//!
//! Streaming tool calls are forwarded as raw indexed fragments. They are not
//! assembled here.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use toolrelay_core::error::ProviderError;
use toolrelay_core::message::{Message, Role, ToolCallRequest};
use toolrelay_core::provider::*;
use tracing::{debug, warn};

/// Talks to `<base_url>/chat/completions`, buffered or as SSE.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// `name` is only used for routing and logs.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Local Ollama ignores the key, but the header must still be present.
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama",
        )
    }

    /// Wire messages. Assistant tool-call messages keep `content: null`.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: m.content.clone(),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    /// POST a chat completion and map HTTP failures to provider errors.
    async fn send(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl toolrelay_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::request_body(&request, false);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.send(&body, false).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let tool_calls: Vec<ToolCallRequest> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallRequest {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let message = Message::assistant_tool_calls(choice.message.content, tool_calls);

        let usage = api_response.usage.map(Usage::from);

        Ok(ProviderResponse {
            message,
            usage,
            model: api_response.model,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<DeltaReceiver, ProviderError> {
        let body = Self::request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.send(&body, true).await?;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump_sse(response.bytes_stream(), tx, self.name.clone()));

        Ok(rx)
    }
}

/// Read an SSE body and forward each delta as it arrives.
///
/// Bytes are buffered until a full line is available, so a multi-byte
/// character split across network chunks is decoded intact.
async fn pump_sse<S, B, E>(
    byte_stream: S,
    tx: mpsc::Sender<std::result::Result<StreamChunk, ProviderError>>,
    provider_name: String,
) where
    S: futures::Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut byte_stream = std::pin::pin!(byte_stream);
    let mut buffer: Vec<u8> = Vec::new();
    let mut usage = None;

    while let Some(chunk_result) = byte_stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
        };

        buffer.extend_from_slice(bytes.as_ref());

        while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = buffer.drain(..=line_end).collect();
            let line = match String::from_utf8(raw) {
                Ok(line) => line,
                Err(e) => {
                    warn!(provider = %provider_name, error = %e, "Dropping SSE line that is not UTF-8");
                    continue;
                }
            };

            match parse_sse_line(line.trim_end()) {
                SseEvent::Done => {
                    let _ = tx.send(Ok(final_chunk(usage))).await;
                    return;
                }
                SseEvent::Delta(delta) => {
                    if delta.usage.is_some() {
                        usage = delta.usage.clone();
                    }
                    if delta.content.as_ref().is_some_and(|c| !c.is_empty())
                        || !delta.tool_calls.is_empty()
                    {
                        let chunk = StreamChunk {
                            usage: None,
                            ..delta
                        };
                        if tx.send(Ok(chunk)).await.is_err() {
                            return; // receiver dropped
                        }
                    }
                }
                SseEvent::Failed(err) => {
                    warn!(provider = %provider_name, error = %err, "Provider failed mid-stream");
                    let _ = tx.send(Err(err)).await;
                    return;
                }
                SseEvent::Unparseable(data) => {
                    warn!(
                        provider = %provider_name,
                        data = %data,
                        "Ignoring unparseable SSE chunk"
                    );
                }
                SseEvent::Skip => {}
            }
        }
    }

    // Stream ended without [DONE]
    let _ = tx.send(Ok(final_chunk(usage))).await;
}

fn final_chunk(usage: Option<Usage>) -> StreamChunk {
    StreamChunk {
        done: true,
        usage,
        ..StreamChunk::default()
    }
}

/// What one line of an SSE body means for the delta stream.
#[derive(Debug)]
enum SseEvent {
    /// `data: [DONE]`
    Done,
    /// A parsed `data: {...}` payload
    Delta(StreamChunk),
    /// An error payload sent in place of a chunk
    Failed(ProviderError),
    /// A `data:` payload that was not a chunk we understand
    Unparseable(String),
    /// Blank lines, comments, and non-data fields
    Skip,
}

fn parse_sse_line(line: &str) -> SseEvent {
    if line.is_empty() || line.starts_with(':') {
        return SseEvent::Skip;
    }

    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return SseEvent::Done;
    }

    match serde_json::from_str::<StreamResponse>(data) {
        Ok(resp) => match resp.into_chunk() {
            Ok(chunk) => SseEvent::Delta(chunk),
            Err(err) => SseEvent::Failed(err),
        },
        Err(_) => SseEvent::Unparseable(data.to_string()),
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    /// Sent as `null` for assistant turns that only request tools
    #[serde(default)]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    /// Upstream failure reported inside an otherwise healthy 200 stream
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl StreamResponse {
    fn into_chunk(self) -> std::result::Result<StreamChunk, ProviderError> {
        if let Some(error) = self.error {
            let message = error["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| error.to_string());
            return Err(ProviderError::StreamInterrupted(message));
        }
        if self
            .choices
            .iter()
            .any(|c| c.finish_reason.as_deref() == Some("error"))
        {
            return Err(ProviderError::StreamInterrupted(
                "provider finished the response with an error".into(),
            ));
        }

        let mut chunk = StreamChunk {
            usage: self.usage.map(Usage::from),
            ..StreamChunk::default()
        };

        if let Some(choice) = self.choices.into_iter().next() {
            chunk.content = choice.delta.content;
            chunk.tool_calls = choice
                .delta
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| {
                    let (name, arguments) = match tc.function {
                        Some(f) => (f.name, f.arguments),
                        None => (None, None),
                    };
                    ToolCallFragment {
                        index: tc.index,
                        id: tc.id,
                        name,
                        arguments,
                    }
                })
                .collect();
        }

        Ok(chunk)
    }
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta, arriving incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolrelay_core::Provider;

    fn delta(line: &str) -> StreamChunk {
        match parse_sse_line(line) {
            SseEvent::Delta(chunk) => chunk,
            other => panic!("Expected delta, got {other:?}"),
        }
    }

    #[test]
    fn openrouter_constructor() {
        let provider = OpenAiCompatProvider::openrouter("sk-test");
        assert_eq!(provider.name(), "openrouter");
        assert!(provider.base_url.contains("openrouter.ai"));
    }

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None);
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url.contains("localhost:11434"));
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn tool_call_message_sends_null_content() {
        let msg = Message::assistant_tool_calls(
            None,
            vec![ToolCallRequest::new(
                "call_1",
                "calculate",
                &serde_json::json!({"operation": "add", "num1": 2, "num2": 1}),
            )],
        );
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        let json = serde_json::to_value(&api_msgs[0]).unwrap();
        assert!(json["content"].is_null());
        assert_eq!(json["tool_calls"][0]["type"], "function");
        assert_eq!(json["tool_calls"][0]["function"]["name"], "calculate");
    }

    #[test]
    fn message_conversion_tool_response() {
        let msg = Message::tool_result("call_1", "result data");
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        assert_eq!(api_msgs[0].role, "tool");
        assert_eq!(api_msgs[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "calculate".into(),
            description: "Basic arithmetic".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let api_tools = OpenAiCompatProvider::to_api_tools(&tools);
        assert_eq!(api_tools.len(), 1);
        assert_eq!(api_tools[0].function.name, "calculate");
        assert_eq!(api_tools[0].r#type, "function");
    }

    #[test]
    fn request_body_includes_tools_only_when_present() {
        let mut request = ProviderRequest {
            model: "m".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.7,
            max_tokens: Some(64),
            tools: vec![],
            stream: true,
        };
        let body = OpenAiCompatProvider::request_body(&request, true);
        assert!(body.get("tools").is_none());
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stream_options"]["include_usage"], true);

        request.tools.push(ToolDefinition {
            name: "calculate".into(),
            description: String::new(),
            parameters: serde_json::json!({}),
        });
        let body = OpenAiCompatProvider::request_body(&request, false);
        assert_eq!(body["tools"][0]["function"]["name"], "calculate");
        assert!(body.get("stream_options").is_none());
    }

    // --- SSE parsing tests ---

    #[test]
    fn parse_stream_content_delta() {
        let chunk =
            delta(r#"data: {"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#);
        assert_eq!(chunk.content.as_deref(), Some("Hello"));
        assert!(chunk.tool_calls.is_empty());
        assert!(!chunk.done);
    }

    #[test]
    fn parse_stream_tool_call_delta() {
        let chunk = delta(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_abc","function":{"name":"calculate","arguments":""}}]},"finish_reason":null}]}"#,
        );
        let fragment = &chunk.tool_calls[0];
        assert_eq!(fragment.index, 0);
        assert_eq!(fragment.id.as_deref(), Some("call_abc"));
        assert_eq!(fragment.name.as_deref(), Some("calculate"));
    }

    #[test]
    fn argument_fragments_are_forwarded_raw() {
        let chunk = delta(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":"{\"num1\""}}]}}]}"#,
        );
        let fragment = &chunk.tool_calls[0];
        assert_eq!(fragment.index, 1);
        assert!(fragment.id.is_none());
        assert!(fragment.name.is_none());
        assert_eq!(fragment.arguments.as_deref(), Some("{\"num1\""));
    }

    #[test]
    fn parse_multiple_tool_calls_in_one_delta() {
        let chunk = delta(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"calculate","arguments":""}},{"index":1,"id":"call_b","function":{"name":"get_current_weather","arguments":""}}]},"finish_reason":null}]}"#,
        );
        assert_eq!(chunk.tool_calls.len(), 2);
        assert_eq!(chunk.tool_calls[1].index, 1);
        assert_eq!(chunk.tool_calls[1].name.as_deref(), Some("get_current_weather"));
    }

    #[test]
    fn parse_stream_usage() {
        let chunk = delta(
            r#"data: {"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
        );
        let usage = chunk.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn parse_done_and_noise() {
        assert!(matches!(parse_sse_line("data: [DONE]"), SseEvent::Done));
        assert!(matches!(parse_sse_line("data:[DONE]"), SseEvent::Done));
        assert!(matches!(parse_sse_line(""), SseEvent::Skip));
        assert!(matches!(parse_sse_line(": OPENROUTER PROCESSING"), SseEvent::Skip));
        assert!(matches!(parse_sse_line("event: ping"), SseEvent::Skip));
        assert!(matches!(
            parse_sse_line("data: not json"),
            SseEvent::Unparseable(_)
        ));
    }

    #[test]
    fn parse_empty_delta() {
        let chunk = delta(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        assert!(chunk.content.is_none());
        assert!(chunk.tool_calls.is_empty());
    }

    #[test]
    fn error_payload_fails_the_stream() {
        let line = r#"data: {"error":{"message":"upstream overloaded","code":502},"choices":[{"delta":{},"finish_reason":"error"}]}"#;
        match parse_sse_line(line) {
            SseEvent::Failed(ProviderError::StreamInterrupted(msg)) => {
                assert_eq!(msg, "upstream overloaded");
            }
            other => panic!("Expected failure, got {other:?}"),
        }
    }

    #[test]
    fn error_finish_reason_fails_the_stream() {
        let line = r#"data: {"choices":[{"delta":{},"finish_reason":"error"}]}"#;
        assert!(matches!(
            parse_sse_line(line),
            SseEvent::Failed(ProviderError::StreamInterrupted(_))
        ));
    }

    // --- Reader loop over raw bytes ---

    async fn pump<B: AsRef<[u8]>>(
        chunks: Vec<B>,
    ) -> Vec<std::result::Result<StreamChunk, ProviderError>> {
        let bytes = futures::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
        let (tx, mut rx) = mpsc::channel(16);
        pump_sse(bytes, tx, "test".into()).await;

        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn multibyte_char_split_across_chunks_survives() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"caf\u{e9} \u{1F600}\"}}]}\n\n";
        let bytes = line.as_bytes();
        // Split inside the two-byte 'é' and inside the four-byte emoji
        let e_acute = line.find('\u{e9}').unwrap() + 1;
        let emoji = line.find('\u{1F600}').unwrap() + 2;

        let out = pump(vec![
            &bytes[..e_acute],
            &bytes[e_acute..emoji],
            &bytes[emoji..],
            b"data: [DONE]\n".as_slice(),
        ])
        .await;

        assert_eq!(out.len(), 2);
        let first = out[0].as_ref().unwrap();
        assert_eq!(first.content.as_deref(), Some("caf\u{e9} \u{1F600}"));
        assert!(out[1].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn mid_stream_error_is_forwarded_and_ends_the_stream() {
        let out = pump::<&[u8]>(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n",
            b"data: {\"error\":{\"message\":\"provider crashed\"},\"choices\":[{\"delta\":{},\"finish_reason\":\"error\"}]}\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"never seen\"}}]}\n",
            b"data: [DONE]\n",
        ])
        .await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap().content.as_deref(), Some("par"));
        match &out[1] {
            Err(ProviderError::StreamInterrupted(msg)) => assert_eq!(msg, "provider crashed"),
            other => panic!("Expected interruption, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_without_done_still_finishes() {
        let out = pump::<&[u8]>(vec![
            b": keep-alive\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\ndata: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":1,\"total_tokens\":4}}\n",
        ])
        .await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap().content.as_deref(), Some("hi"));
        let last = out[1].as_ref().unwrap();
        assert!(last.done);
        assert_eq!(last.usage.as_ref().unwrap().total_tokens, 4);
    }

    #[tokio::test]
    async fn streams_from_a_live_http_endpoint() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Read headers, then the JSON body they announce
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            let header_end = loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
            let length: usize = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map(|v| v.trim().parse().unwrap())
                .unwrap_or(0);
            while request.len() < header_end + length {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
            }
            let body: serde_json::Value =
                serde_json::from_slice(&request[header_end..header_end + length]).unwrap();

            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
                )
                .await
                .unwrap();

            let payload = "data: {\"choices\":[{\"delta\":{\"content\":\"\u{4f60}\u{597d}\"}}]}\n\ndata: [DONE]\n\n";
            let bytes = payload.as_bytes();
            // Cut the first CJK character in half
            let cut = payload.find('\u{4f60}').unwrap() + 1;
            for part in [&bytes[..cut], &bytes[cut..]] {
                socket.write_all(part).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            socket.shutdown().await.unwrap();

            (head, body)
        });

        let provider = OpenAiCompatProvider::new("local", format!("http://{addr}"), "sk-local");
        let request = ProviderRequest {
            model: "test-model".into(),
            messages: vec![Message::user("say hello")],
            temperature: 0.2,
            max_tokens: None,
            tools: vec![],
            stream: true,
        };
        let mut rx = provider.stream(request).await.unwrap();

        let mut text = String::new();
        let mut finished = false;
        while let Some(item) = rx.recv().await {
            let chunk = item.unwrap();
            if let Some(c) = chunk.content {
                text.push_str(&c);
            }
            finished |= chunk.done;
        }
        assert_eq!(text, "\u{4f60}\u{597d}");
        assert!(finished);

        let (head, body) = server.await.unwrap();
        assert!(head.starts_with("post /chat/completions"));
        assert!(head.contains("authorization: bearer sk-local"));
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["stream"], true);
    }
}
