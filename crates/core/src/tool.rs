//! Tool traits and the registry the model calls into by name.
//!
//! A tool is either asynchronous by nature ([`Tool`]) or a plain blocking
//! call ([`BlockingTool`]). The registry records which one it is so the
//! dispatcher can await the former directly and move the latter onto a
//! blocking worker, keeping one slow tool from serializing its siblings.
//!
//! Tools are expected to catch their own domain failures and return them as a
//! structured `{"error": ...}` value. Returning `Err` means the failure was
//! *not* handled and aborts the whole dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::message::ToolCallRequest;
use crate::provider::ToolDefinition;

/// An asynchronous tool, awaited directly on the shared runtime.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "get_current_weather").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with already-parsed arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError>;
}

/// A synchronous tool. The dispatcher runs it on a blocking worker thread.
pub trait BlockingTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> serde_json::Value;

    fn call(&self, arguments: serde_json::Value) -> std::result::Result<serde_json::Value, ToolError>;
}

/// A registered tool, tagged with how it must be executed.
#[derive(Clone)]
pub enum ToolHandler {
    Async(Arc<dyn Tool>),
    Blocking(Arc<dyn BlockingTool>),
}

impl ToolHandler {
    pub fn name(&self) -> &str {
        match self {
            Self::Async(tool) => tool.name(),
            Self::Blocking(tool) => tool.name(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking(_))
    }

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    pub fn definition(&self) -> ToolDefinition {
        let (name, description, parameters) = match self {
            Self::Async(tool) => (tool.name(), tool.description(), tool.parameters_schema()),
            Self::Blocking(tool) => (tool.name(), tool.description(), tool.parameters_schema()),
        };
        ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

impl std::fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_blocking() { "Blocking" } else { "Async" };
        f.debug_tuple(kind).field(&self.name()).finish()
    }
}

/// A blocking tool backed by a plain closure.
pub struct FnTool<F> {
    name: String,
    description: String,
    parameters: serde_json::Value,
    func: F,
}

impl<F> FnTool<F>
where
    F: Fn(serde_json::Value) -> std::result::Result<serde_json::Value, ToolError> + Send + Sync,
{
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        func: F,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            func,
        }
    }
}

impl<F> BlockingTool for FnTool<F>
where
    F: Fn(serde_json::Value) -> std::result::Result<serde_json::Value, ToolError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.parameters.clone()
    }

    fn call(&self, arguments: serde_json::Value) -> std::result::Result<serde_json::Value, ToolError> {
        (self.func)(arguments)
    }
}

/// The outcome of one tool call, keyed by the request it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// The call ID this result is for
    pub call_id: String,

    /// The tool that was asked for
    pub name: String,

    /// Structured output, or an `{"error": ...}` payload
    pub output: serde_json::Value,
}

impl ToolCallResult {
    pub fn new(call: &ToolCallRequest, output: serde_json::Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output,
        }
    }

    /// The result for a request naming a tool that is not registered.
    pub fn not_found(call: &ToolCallRequest) -> Self {
        Self::new(
            call,
            serde_json::json!({ "error": format!("Function {} not found", call.name) }),
        )
    }

    /// The result for a request whose argument text is not valid JSON.
    pub fn invalid_arguments(call: &ToolCallRequest, reason: impl std::fmt::Display) -> Self {
        Self::new(
            call,
            serde_json::json!({
                "error": format!("Invalid arguments for {}: {}", call.name, reason),
                "arguments": call.arguments,
            }),
        )
    }

    /// Whether the output is an error payload.
    pub fn is_error(&self) -> bool {
        self.output.get("error").is_some()
    }

    /// The wire form placed in the tool-role message.
    pub fn content(&self) -> String {
        self.output.to_string()
    }
}

/// A registry of available tools.
///
/// The agent loop uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Look up tools by name when the LLM requests them
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolHandler>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.insert(ToolHandler::Async(Arc::new(tool)));
    }

    /// Register a blocking tool. Replaces any existing tool with the same name.
    pub fn register_blocking(&mut self, tool: impl BlockingTool + 'static) {
        self.insert(ToolHandler::Blocking(Arc::new(tool)));
    }

    /// Register a blocking closure as a tool.
    pub fn register_fn<F>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        func: F,
    ) where
        F: Fn(serde_json::Value) -> std::result::Result<serde_json::Value, ToolError>
            + Send
            + Sync
            + 'static,
    {
        self.register_blocking(FnTool::new(name, description, parameters, func));
    }

    fn insert(&mut self, handler: ToolHandler) {
        let name = handler.name().to_string();
        if self.tools.insert(name.clone(), handler).is_some() {
            tracing::debug!(tool = %name, "Replaced previously registered tool");
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolHandler> {
        self.tools.get(name)
    }

    /// All tool definitions, sorted by name so request payloads are stable.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(ToolHandler::definition).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
