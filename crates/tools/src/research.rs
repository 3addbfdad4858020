//! Research tool backed by a tool-less sub-agent.
//!
//! Each call starts a fresh conversation with the research system prompt, so
//! research questions never leak into each other or into the main session.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use toolrelay_agent::AgentLoop;
use toolrelay_config::AppConfig;
use toolrelay_core::error::ToolError;
use toolrelay_core::event::EventBus;
use toolrelay_core::message::Conversation;
use toolrelay_core::provider::Provider;
use toolrelay_core::tool::{Tool, ToolRegistry};
use tracing::{debug, warn};

pub struct ResearchTool {
    agent: Arc<AgentLoop>,
}

impl ResearchTool {
    pub fn new(agent: Arc<AgentLoop>) -> Self {
        Self { agent }
    }

    /// Build the sub-agent from the `[research]` config section.
    pub fn from_config(provider: Arc<dyn Provider>, config: &AppConfig) -> Self {
        let agent = AgentLoop::new(
            provider,
            config.research_model(),
            config.default_temperature,
            Arc::new(ToolRegistry::new()),
            &config.research.system_prompt,
            Arc::new(EventBus::default()),
        )
        .with_max_tokens(config.default_max_tokens);
        Self::new(Arc::new(agent))
    }
}

/// The text sent to the sub-agent.
pub fn research_prompt(query: &str, context: Option<&str>) -> String {
    match context {
        Some(context) => format!("Context: {context}\n\nQuestion: {query}"),
        None => query.to_string(),
    }
}

#[async_trait]
impl Tool for ResearchTool {
    fn name(&self) -> &str {
        "research_topic"
    }

    fn description(&self) -> &str {
        "Research a topic in depth using a specialized research assistant. Returns structured findings."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The research question or topic to investigate"
                },
                "context": {
                    "type": "string",
                    "description": "Optional background information to focus the research"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let Some(query) = arguments["query"].as_str().filter(|q| !q.trim().is_empty()) else {
            return Ok(json!({
                "query": Value::Null,
                "error": "Missing required argument 'query'",
                "status": "failed",
            }));
        };
        let context = arguments["context"].as_str().filter(|c| !c.is_empty());

        debug!(query, "Starting research sub-agent");

        let mut conversation = Conversation::new();
        match self
            .agent
            .invoke(&mut conversation, &research_prompt(query, context))
            .await
        {
            Ok(findings) => Ok(json!({
                "query": query,
                "context": context,
                "findings": findings,
                "status": "success",
            })),
            Err(e) => {
                warn!(query, error = %e, "Research sub-agent failed");
                Ok(json!({
                    "query": query,
                    "error": e.to_string(),
                    "status": "failed",
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolrelay_core::error::ProviderError;
    use toolrelay_core::message::Role;
    use toolrelay_providers::testing::{ScriptedProvider, ScriptedTurn};

    fn tool(provider: Arc<ScriptedProvider>) -> ResearchTool {
        ResearchTool::from_config(provider, &AppConfig::default())
    }

    #[test]
    fn prompt_includes_context_when_given() {
        assert_eq!(
            research_prompt("Why is the sky blue?", Some("physics class")),
            "Context: physics class\n\nQuestion: Why is the sky blue?"
        );
        assert_eq!(research_prompt("Why?", None), "Why?");
    }

    #[tokio::test]
    async fn success_wraps_findings() {
        let provider = Arc::new(ScriptedProvider::single_text("Rayleigh scattering."));
        let out = tool(provider.clone())
            .execute(json!({"query": "Why is the sky blue?", "context": "physics"}))
            .await
            .unwrap();

        assert_eq!(out["status"], "success");
        assert_eq!(out["findings"], "Rayleigh scattering.");
        assert_eq!(out["context"], "physics");

        let request = &provider.requests()[0];
        assert!(request.tools.is_empty());
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0].text().contains("research assistant"));
        assert!(request.messages[1].text().starts_with("Context: physics"));
    }

    #[tokio::test]
    async fn missing_context_is_null() {
        let provider = Arc::new(ScriptedProvider::single_text("ok"));
        let out = tool(provider).execute(json!({"query": "q"})).await.unwrap();
        assert!(out["context"].is_null());
    }

    #[tokio::test]
    async fn failure_is_encoded() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::Fail(
            ProviderError::Timeout("30s".into()),
        )]));
        let out = tool(provider).execute(json!({"query": "q"})).await.unwrap();
        assert_eq!(out["status"], "failed");
        assert_eq!(out["query"], "q");
        assert!(out["error"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn each_call_starts_fresh() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::Response(toolrelay_providers::testing::text_response("a")),
            ScriptedTurn::Response(toolrelay_providers::testing::text_response("b")),
        ]));
        let research = tool(provider.clone());
        research.execute(json!({"query": "one"})).await.unwrap();
        research.execute(json!({"query": "two"})).await.unwrap();
        assert_eq!(provider.requests()[1].messages.len(), 2);
    }
}
