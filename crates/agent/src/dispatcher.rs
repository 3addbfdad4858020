//! Concurrent tool execution for one batch of tool calls.

use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use toolrelay_core::error::{Error, ToolError};
use toolrelay_core::event::{DomainEvent, EventBus};
use toolrelay_core::message::ToolCallRequest;
use toolrelay_core::tool::{ToolCallResult, ToolHandler, ToolRegistry};
use tracing::{debug, info, warn};

/// Runs every requested tool at once and collects results in request order.
///
/// Async tools are awaited on the current runtime. Blocking tools each get a
/// worker from `spawn_blocking`, so wall-clock time for a batch is bounded by
/// its slowest member.
#[derive(Clone)]
pub struct ToolDispatcher {
    tools: Arc<ToolRegistry>,
    event_bus: Arc<EventBus>,
}

impl ToolDispatcher {
    pub fn new(tools: Arc<ToolRegistry>, event_bus: Arc<EventBus>) -> Self {
        Self { tools, event_bus }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Dispatch a batch. `result[i]` always answers `calls[i]`.
    ///
    /// Unknown tools and unparseable arguments become error results. A tool
    /// that returns `Err` (or a blocking tool that panics) fails the batch.
    pub async fn dispatch(&self, calls: &[ToolCallRequest]) -> Result<Vec<ToolCallResult>, Error> {
        for (index, call) in calls.iter().enumerate() {
            info!(
                index = index + 1,
                tool = %call.name,
                call_id = %call.id,
                arguments = %call.arguments,
                "Dispatching tool call"
            );
            self.event_bus.publish(DomainEvent::ToolDispatched {
                index,
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                timestamp: chrono::Utc::now(),
            });
        }

        let outcomes = try_join_all(calls.iter().map(|call| self.run_one(call))).await?;

        let mut results = Vec::with_capacity(outcomes.len());
        for (index, (result, duration_ms)) in outcomes.into_iter().enumerate() {
            debug!(
                index = index + 1,
                tool = %result.name,
                call_id = %result.call_id,
                duration_ms,
                is_error = result.is_error(),
                "Tool call completed"
            );
            self.event_bus.publish(DomainEvent::ToolCompleted {
                index,
                call_id: result.call_id.clone(),
                name: result.name.clone(),
                output: result.output.clone(),
                duration_ms,
                timestamp: chrono::Utc::now(),
            });
            results.push(result);
        }

        Ok(results)
    }

    async fn run_one(&self, call: &ToolCallRequest) -> Result<(ToolCallResult, u64), Error> {
        let start = Instant::now();

        let Some(handler) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "Requested tool is not registered");
            return Ok((ToolCallResult::not_found(call), elapsed_ms(start)));
        };

        let arguments = match call.parse_arguments() {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool arguments are not valid JSON");
                return Ok((ToolCallResult::invalid_arguments(call, e), elapsed_ms(start)));
            }
        };

        let output = match handler {
            ToolHandler::Async(tool) => tool.execute(arguments).await?,
            ToolHandler::Blocking(tool) => {
                let tool = Arc::clone(tool);
                tokio::task::spawn_blocking(move || tool.call(arguments))
                    .await
                    .map_err(|e| {
                        if e.is_panic() {
                            Error::Tool(ToolError::Panicked {
                                tool_name: call.name.clone(),
                                reason: e.to_string(),
                            })
                        } else {
                            Error::Internal(format!("tool worker for {} was cancelled", call.name))
                        }
                    })??
            }
        };

        Ok((ToolCallResult::new(call, output), elapsed_ms(start)))
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
