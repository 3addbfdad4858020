//! Subcommand implementations and the wiring they share.

pub mod chat;
pub mod serve;
pub mod tools;

use std::sync::Arc;

use toolrelay_agent::AgentLoop;
use toolrelay_config::AppConfig;
use toolrelay_core::event::EventBus;
use toolrelay_core::tool::ToolRegistry;

/// Everything a front end needs to run turns.
pub struct App {
    pub config: AppConfig,
    pub agent: Arc<AgentLoop>,
    pub event_bus: Arc<EventBus>,
}

impl App {
    /// Build provider, tools and agent loop from configuration.
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let router = toolrelay_providers::build_from_config(&config)?;
        let provider = router.default()?;

        let tools = Arc::new(toolrelay_tools::default_registry(provider.clone(), &config));
        let event_bus = Arc::new(EventBus::default());
        let agent = Arc::new(AgentLoop::from_config(
            provider,
            tools,
            &config,
            event_bus.clone(),
        ));

        Ok(Self {
            config,
            agent,
            event_bus,
        })
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.agent.tools()
    }
}

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Fail early with setup instructions when a hosted provider has no key.
pub fn require_api_key(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.has_api_key() || config.default_provider == "ollama" {
        return Ok(());
    }

    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    TOOLRELAY_API_KEY    (generic)");
    eprintln!("    OPENROUTER_API_KEY   (recommended)");
    eprintln!("    OPENAI_API_KEY       (for OpenAI direct)");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
    Err("No API key found. See above for setup instructions.".into())
}
