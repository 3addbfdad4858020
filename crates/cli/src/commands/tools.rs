//! `toolrelay tools`: print the tool schemas sent to the model.

use toolrelay_core::tool::ToolRegistry;

use super::{App, load_config};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let app = App::build(load_config()?)?;
    println!("{}", render(app.tools())?);
    Ok(())
}

fn render(registry: &ToolRegistry) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&registry.definitions())
}
