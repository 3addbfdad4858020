//! The agent reasoning loop implementation.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::BoxStream;
use toolrelay_core::error::{Error, Result};
use toolrelay_core::event::{DomainEvent, EventBus};
use toolrelay_core::message::{Conversation, Message};
use toolrelay_core::provider::{Provider, ProviderRequest, Usage};
use toolrelay_core::tool::{ToolCallResult, ToolRegistry};
use tracing::{debug, info, warn};

use crate::accumulator::StreamAccumulator;
use crate::dispatcher::ToolDispatcher;

/// The core agent loop that orchestrates LLM calls and tool execution.
///
/// The loop itself holds no conversation. Callers pass the history in by
/// `&mut`, which makes each turn the only writer for as long as it runs.
pub struct AgentLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// The model to use
    model: String,

    /// Temperature setting
    temperature: f32,

    /// Default max tokens per response
    max_tokens: Option<u32>,

    /// Inserted as the first message of an empty conversation
    system_prompt: String,

    dispatcher: ToolDispatcher,

    /// Maximum model round-trips per turn. `None` runs until the model stops
    /// asking for tools.
    max_iterations: Option<u32>,

    /// Event bus for domain events
    event_bus: Arc<EventBus>,
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        temperature: f32,
        tools: Arc<ToolRegistry>,
        system_prompt: impl Into<String>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
            max_tokens: None,
            system_prompt: system_prompt.into(),
            dispatcher: ToolDispatcher::new(tools, Arc::clone(&event_bus)),
            max_iterations: None,
            event_bus,
        }
    }

    /// Build the main assistant loop from configuration.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        config: &toolrelay_config::AppConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let agent = Self::new(
            provider,
            config.model(),
            config.default_temperature,
            tools,
            &config.agent.system_prompt,
            event_bus,
        )
        .with_max_tokens(config.default_max_tokens);

        match config.agent.max_iterations {
            Some(max) => agent.with_max_iterations(max),
            None => agent,
        }
    }

    /// Set the maximum number of model round-trips per turn.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.dispatcher.tools()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run one buffered turn and return the final answer.
    ///
    /// Gateway failures propagate as-is. Nothing is retried.
    pub async fn invoke(&self, conversation: &mut Conversation, user_text: &str) -> Result<String> {
        let mut turn = self.begin_turn(conversation, user_text);

        loop {
            let iteration = turn.next_iteration(self.max_iterations)?;
            debug!(conversation_id = %conversation.id, iteration, "Agent loop iteration");

            let response = self.provider.complete(self.request(conversation, false)).await?;

            if !response.message.has_tool_calls() {
                let answer = response.message.text().to_string();
                self.publish_response(conversation, &response.model, response.usage.as_ref());
                conversation.push(response.message);
                turn.succeed();
                return Ok(answer);
            }

            let calls = response.message.tool_calls.clone();
            conversation.push(response.message);

            let results = self.dispatcher.dispatch(&calls).await?;
            append_results(conversation, results);
        }
    }

    /// Run one streamed turn, yielding text fragments as they arrive.
    ///
    /// Nothing is produced until the consumer polls, and each poll resumes at
    /// most until the next text fragment. Tool dispatch starts only after a
    /// model response has fully ended. A gateway or tool failure is yielded
    /// as the final item.
    pub fn invoke_stream<'a>(
        &'a self,
        conversation: &'a mut Conversation,
        user_text: String,
    ) -> BoxStream<'a, Result<String>> {
        Box::pin(async_stream::try_stream! {
            let mut turn = self.begin_turn(conversation, &user_text);

            loop {
                let iteration = turn.next_iteration(self.max_iterations)?;
                debug!(conversation_id = %conversation.id, iteration, "Agent stream iteration");

                let mut deltas = self.provider.stream(self.request(conversation, true)).await?;
                let mut accumulator = StreamAccumulator::new();
                let mut text = String::new();
                let mut usage = None;

                while let Some(delta) = deltas.recv().await {
                    let delta = delta?;

                    for fragment in delta.tool_calls {
                        accumulator.push(fragment);
                    }
                    if delta.usage.is_some() {
                        usage = delta.usage;
                    }

                    if let Some(fragment) = delta.content.filter(|c| !c.is_empty()) {
                        text.push_str(&fragment);
                        yield fragment;
                    }

                    if delta.done {
                        break;
                    }
                }

                if accumulator.is_empty() {
                    self.publish_response(conversation, &self.model, usage.as_ref());
                    conversation.push(Message::assistant(text));
                    turn.succeed();
                    break;
                }

                let calls = accumulator.finalize()?;
                conversation.push(Message::assistant_tool_calls(Some(text), calls.clone()));

                let results = self.dispatcher.dispatch(&calls).await?;
                append_results(conversation, results);
            }
        })
    }

    fn begin_turn(&self, conversation: &mut Conversation, user_text: &str) -> TurnTracker {
        if conversation.ensure_system(&self.system_prompt) {
            debug!(conversation_id = %conversation.id, "Inserted system prompt");
        }
        conversation.push(Message::user(user_text));

        info!(
            conversation_id = %conversation.id,
            messages = conversation.len(),
            "Processing turn"
        );

        TurnTracker {
            event_bus: Arc::clone(&self.event_bus),
            conversation_id: conversation.id.to_string(),
            started: Instant::now(),
            iterations: 0,
            succeeded: false,
        }
    }

    fn request(&self, conversation: &Conversation, stream: bool) -> ProviderRequest {
        ProviderRequest {
            model: self.model.clone(),
            messages: conversation.messages().to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: self.tools().definitions(),
            stream,
        }
    }

    fn publish_response(&self, conversation: &Conversation, model: &str, usage: Option<&Usage>) {
        self.event_bus.publish(DomainEvent::ResponseGenerated {
            conversation_id: conversation.id.to_string(),
            model: model.to_string(),
            tokens_used: usage.map_or(0, |u| u.total_tokens),
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Append tool results in request order.
fn append_results(conversation: &mut Conversation, results: Vec<ToolCallResult>) {
    for result in results {
        let content = result.content();
        conversation.push(Message::tool_result(result.call_id, content));
    }
}

/// Iteration count and timing for one turn.
///
/// Publishes `TurnCompleted` when dropped, so a failed or abandoned turn is
/// reported too.
struct TurnTracker {
    event_bus: Arc<EventBus>,
    conversation_id: String,
    started: Instant,
    iterations: u32,
    succeeded: bool,
}

impl TurnTracker {
    fn next_iteration(&mut self, max_iterations: Option<u32>) -> Result<u32> {
        self.iterations += 1;
        match max_iterations {
            Some(max) if self.iterations > max => {
                warn!(
                    conversation_id = %self.conversation_id,
                    max_iterations = max,
                    "Max tool iterations reached without a final answer"
                );
                Err(Error::IterationLimit { max_iterations: max })
            }
            _ => Ok(self.iterations),
        }
    }

    fn succeed(&mut self) {
        self.succeeded = true;
    }
}

impl Drop for TurnTracker {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        if self.succeeded {
            info!(
                conversation_id = %self.conversation_id,
                iterations = self.iterations,
                elapsed_ms,
                "Turn completed"
            );
        } else {
            warn!(
                conversation_id = %self.conversation_id,
                iterations = self.iterations,
                elapsed_ms,
                "Turn ended without a final answer"
            );
        }
        self.event_bus.publish(DomainEvent::TurnCompleted {
            conversation_id: std::mem::take(&mut self.conversation_id),
            iterations: self.iterations,
            elapsed_ms,
            success: self.succeeded,
            timestamp: chrono::Utc::now(),
        });
    }
}
