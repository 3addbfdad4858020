//! HTTP gateway for ToolRelay.
//!
//! - `POST /invocations`: run one agent turn, streamed as NDJSON or buffered
//! - `GET  /ping`: liveness check
//!
//! All requests share one process-wide session. Turns are serialised by the
//! session mutex and run on spawned tasks, so a second request waits until
//! the first turn has finished even if its client has already gone.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use toolrelay_agent::{AgentLoop, AgentSession};
use toolrelay_config::AppConfig;

pub const MISSING_PROMPT_ERROR: &str =
    "No prompt found in input. Please provide a 'prompt' key in the input.";

const NDJSON: &str = "application/x-ndjson";

type SharedState = Arc<Mutex<AgentSession>>;

/// Build the router around an existing session.
pub fn build_router(session: AgentSession) -> Router {
    let state: SharedState = Arc::new(Mutex::new(session));
    Router::new()
        .route("/invocations", post(invocations_handler))
        .route("/ping", get(ping_handler))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `config.gateway.host:port` and serve until the process exits.
pub async fn start(
    config: &AppConfig,
    agent: Arc<AgentLoop>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let app = build_router(AgentSession::new(agent));

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Payloads ---

#[derive(Debug, Default, Deserialize)]
struct InvocationRequest {
    #[serde(default)]
    input: InvocationInput,
}

#[derive(Debug, Deserialize)]
struct InvocationInput {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default = "default_stream")]
    stream: bool,
}

impl Default for InvocationInput {
    fn default() -> Self {
        Self {
            prompt: None,
            stream: default_stream(),
        }
    }
}

fn default_stream() -> bool {
    true
}

#[derive(Serialize)]
struct Output {
    message: String,
    timestamp: String,
}

#[derive(Serialize)]
struct OutputEnvelope {
    output: Output,
}

impl OutputEnvelope {
    fn now(message: String) -> Self {
        Self {
            output: Output {
                message,
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: error.into() })).into_response()
}

// --- Handlers ---

async fn ping_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn invocations_handler(
    State(state): State<SharedState>,
    Json(payload): Json<InvocationRequest>,
) -> Response {
    let Some(prompt) = payload.input.prompt.filter(|p| !p.trim().is_empty()) else {
        warn!("Invocation without a prompt");
        return error_response(StatusCode::BAD_REQUEST, MISSING_PROMPT_ERROR);
    };

    info!(
        prompt_len = prompt.len(),
        stream = payload.input.stream,
        "Invocation received"
    );

    if payload.input.stream {
        stream_invocation(state, prompt)
    } else {
        buffered_invocation(state, prompt).await
    }
}

/// Run the turn on its own task so a client that hangs up cannot cancel it
/// between the tool-call message and its results.
async fn buffered_invocation(state: SharedState, prompt: String) -> Response {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut session = state.lock_owned().await;
        let result = session.invoke(&prompt).await;
        if tx.send(result).is_err() {
            warn!("Client disconnected before the answer was ready");
        }
    });

    match rx.await {
        Ok(Ok(answer)) => Json(OutputEnvelope::now(answer)).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "Agent processing failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Agent processing failed: {e}"),
            )
        }
        Err(_) => {
            error!("Agent task ended without an answer");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Agent processing failed: turn aborted",
            )
        }
    }
}

/// Drive the turn on its own task and forward each fragment as one NDJSON
/// line. The task stops pulling from the agent as soon as the client goes
/// away, which drops the turn at its next suspension point.
fn stream_invocation(state: SharedState, prompt: String) -> Response {
    let (tx, rx) = mpsc::channel::<String>(32);

    tokio::spawn(async move {
        let mut session = state.lock_owned().await;
        let mut fragments = session.invoke_stream(prompt);

        while let Some(item) = fragments.next().await {
            let line = match item {
                Ok(fragment) => ndjson_line(&OutputEnvelope::now(fragment)),
                Err(e) => {
                    error!(error = %e, "Streaming turn failed");
                    let line = ndjson_line(&ErrorResponse {
                        error: e.to_string(),
                    });
                    let _ = tx.send(line).await;
                    break;
                }
            };
            if tx.send(line).await.is_err() {
                warn!("Client disconnected mid-stream");
                break;
            }
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    ([(header::CONTENT_TYPE, NDJSON)], body).into_response()
}

fn ndjson_line<T: Serialize>(value: &T) -> String {
    let mut line = serde_json::to_string(value)
        .unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string());
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use toolrelay_core::error::ProviderError;
    use toolrelay_core::message::Role;
    use toolrelay_core::event::EventBus;
    use toolrelay_core::provider::StreamChunk;
    use toolrelay_core::tool::ToolRegistry;
    use toolrelay_providers::testing::*;
    use tower::ServiceExt;

    fn app(provider: Arc<ScriptedProvider>) -> Router {
        let agent = AgentLoop::new(
            provider,
            "mock-model",
            0.7,
            Arc::new(ToolRegistry::new()),
            "You are a test assistant.",
            Arc::new(EventBus::default()),
        );
        build_router(AgentSession::new(Arc::new(agent)))
    }

    fn invocation(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/invocations")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn ndjson(text: &str) -> Vec<Value> {
        text.lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn ping_is_healthy() {
        let app = app(Arc::new(ScriptedProvider::new(vec![])));
        let req = Request::builder().uri("/ping").body(Body::empty()).unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body, json!({"status": "healthy"}));
    }

    #[tokio::test]
    async fn missing_prompt_is_rejected() {
        for body in [json!({}), json!({"input": {}}), json!({"input": {"prompt": "  "}})] {
            let app = app(Arc::new(ScriptedProvider::new(vec![])));
            let response = app.oneshot(invocation(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
            assert_eq!(body["error"], MISSING_PROMPT_ERROR);
        }
    }

    #[tokio::test]
    async fn buffered_invocation_returns_answer() {
        let provider = Arc::new(ScriptedProvider::single_text("The answer is 3."));
        let response = app(provider)
            .oneshot(invocation(json!({"input": {"prompt": "What is 2 + 1?", "stream": false}})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["output"]["message"], "The answer is 3.");
        let ts = body["output"]["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[tokio::test]
    async fn buffered_failure_is_500() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::Fail(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let response = app(provider)
            .oneshot(invocation(json!({"input": {"prompt": "hi", "stream": false}})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(
            body["error"]
                .as_str()
                .unwrap()
                .starts_with("Agent processing failed: ")
        );
    }

    #[tokio::test]
    async fn streaming_is_default_and_emits_one_line_per_fragment() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::Deltas(
            text_deltas(&["Hello", ", ", "world"]),
        )]));
        let response = app(provider)
            .oneshot(invocation(json!({"input": {"prompt": "greet me"}})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], NDJSON);

        let lines = ndjson(&body_text(response).await);
        let messages: Vec<&str> = lines
            .iter()
            .map(|l| l["output"]["message"].as_str().unwrap())
            .collect();
        assert_eq!(messages, vec!["Hello", ", ", "world"]);
    }

    #[tokio::test]
    async fn stream_failure_ends_with_error_line() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::Deltas(vec![
            Ok(StreamChunk::text("partial")),
            Err(ProviderError::StreamInterrupted("connection reset".into())),
        ])]));
        let response = app(provider)
            .oneshot(invocation(json!({"input": {"prompt": "hi", "stream": true}})))
            .await
            .unwrap();

        let lines = ndjson(&body_text(response).await);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["output"]["message"], "partial");
        assert!(
            lines[1]["error"]
                .as_str()
                .unwrap()
                .contains("connection reset")
        );
    }

    #[tokio::test]
    async fn requests_share_one_session() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::Response(text_response("first")),
            ScriptedTurn::Response(text_response("second")),
        ]));
        let app = app(provider.clone());

        for prompt in ["one", "two"] {
            let response = app
                .clone()
                .oneshot(invocation(json!({"input": {"prompt": prompt, "stream": false}})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        // system, user "one", assistant "first", user "two"
        let second = &provider.requests()[1];
        assert_eq!(second.messages.len(), 4);
        assert_eq!(second.messages[2].text(), "first");
    }

    #[tokio::test]
    async fn abandoned_buffered_turn_still_completes() {
        let mut tools = ToolRegistry::new();
        tools.register_fn(
            "slow_echo",
            "Echo the input after a pause",
            json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            |args| {
                std::thread::sleep(std::time::Duration::from_millis(200));
                Ok(json!({"echo": args["text"]}))
            },
        );

        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::Response(tool_call_response(vec![tool_call(
                "call_slow",
                "slow_echo",
                json!({"text": "hi"}),
            )])),
            ScriptedTurn::Response(text_response("echoed")),
            ScriptedTurn::Response(text_response("still here")),
        ]));
        let agent = AgentLoop::new(
            provider.clone(),
            "mock-model",
            0.7,
            Arc::new(tools),
            "You are a test assistant.",
            Arc::new(EventBus::default()),
        );
        let app = build_router(AgentSession::new(Arc::new(agent)));

        // Client gives up while the tool is still running
        let first = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            app.clone()
                .oneshot(invocation(json!({"input": {"prompt": "echo hi", "stream": false}}))),
        )
        .await;
        assert!(first.is_err());

        let response = app
            .oneshot(invocation(json!({"input": {"prompt": "again", "stream": false}})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["output"]["message"], "still here");

        // The tool call was answered before the next turn began
        let roles: Vec<Role> = provider.requests()[2]
            .messages
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::Tool,
                Role::Assistant,
                Role::User
            ]
        );
    }
}
