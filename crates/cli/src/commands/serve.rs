//! `toolrelay serve`: start the HTTP gateway.

use super::{App, load_config, require_api_key};

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config()?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    config.validate()?;
    require_api_key(&config)?;

    let app = App::build(config)?;

    println!("ToolRelay Gateway");
    println!("   Listening: {}:{}", app.config.gateway.host, app.config.gateway.port);
    println!("   Model:     {}", app.agent.model());
    println!("   Tools:     {}", app.tools().names().join(", "));

    toolrelay_gateway::start(&app.config, app.agent.clone()).await
}
