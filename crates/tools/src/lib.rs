//! Built-in tool implementations for ToolRelay.
//!
//! - `calculate`: arithmetic on two numbers (blocking)
//! - `get_current_weather`: mock weather conditions (async)
//! - `research_topic`: a research sub-agent with no tools of its own (async)

pub mod calculator;
pub mod research;
pub mod weather;

use std::sync::Arc;

use toolrelay_config::AppConfig;
use toolrelay_core::provider::Provider;
use toolrelay_core::tool::ToolRegistry;

pub use calculator::CalculatorTool;
pub use research::ResearchTool;
pub use weather::WeatherTool;

/// Create a tool registry with all built-in tools.
///
/// The research tool talks to the same provider as the main agent.
pub fn default_registry(provider: Arc<dyn Provider>, config: &AppConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register_blocking(CalculatorTool);
    registry.register(WeatherTool::new());
    registry.register(ResearchTool::from_config(provider, config));
    registry
}
