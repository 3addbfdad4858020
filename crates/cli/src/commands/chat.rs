//! `toolrelay chat`: interactive or single-message conversation.

use std::io::Write;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use toolrelay_agent::AgentSession;
use toolrelay_core::event::DomainEvent;

use super::{App, load_config, require_api_key};

const EXIT_WORDS: [&str; 3] = ["quit", "exit", "bye"];
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn run(
    message: Option<String>,
    no_stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    require_api_key(&config)?;

    let app = App::build(config)?;
    let stream = app.config.agent.stream && !no_stream;
    let mut session = AgentSession::new(app.agent.clone());

    if let Some(msg) = message {
        let diagnostics = tokio::spawn(print_diagnostics(app.event_bus.subscribe(), true));
        let result = run_turn(&mut session, &msg, stream).await;
        // Every turn ends with TurnCompleted, so the printer stops on its own
        if tokio::time::timeout(DRAIN_TIMEOUT, diagnostics).await.is_err() {
            tracing::warn!("Diagnostics did not finish draining");
        }
        return result;
    }

    let diagnostics = tokio::spawn(print_diagnostics(app.event_bus.subscribe(), false));

    println!();
    println!("AI Assistant - Type 'quit' or 'exit' to end the conversation");
    println!("Mode: {}", if stream { "Streaming" } else { "Non-streaming" });
    println!("Model: {}", app.agent.model());
    println!("Tools: {}", app.tools().names().join(", "));
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if is_exit(input) {
            break;
        }

        if let Err(e) = run_turn(&mut session, input, stream).await {
            eprintln!("\nError: {e}\n");
        }
    }

    diagnostics.abort();
    println!("\nGoodbye!");
    Ok(())
}

async fn run_turn(
    session: &mut AgentSession,
    input: &str,
    stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    print!("\nAssistant: ");
    std::io::stdout().flush()?;

    if stream {
        let mut fragments = session.invoke_stream(input);
        while let Some(fragment) = fragments.next().await {
            print!("{}", fragment?);
            std::io::stdout().flush()?;
        }
        println!("\n");
    } else {
        let answer = session.invoke(input).await?;
        println!("{answer}\n");
    }
    Ok(())
}

fn is_exit(input: &str) -> bool {
    EXIT_WORDS.iter().any(|w| input.eq_ignore_ascii_case(w))
}

/// Print tool activity to stderr as the loop publishes it.
///
/// With `single_turn` set, returns once the first turn has completed.
async fn print_diagnostics(
    mut rx: broadcast::Receiver<std::sync::Arc<DomainEvent>>,
    single_turn: bool,
) -> usize {
    let mut printed = 0;
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(line) = render_event(&event) {
                    eprintln!("{line}");
                    printed += 1;
                }
                if single_turn && matches!(event.as_ref(), DomainEvent::TurnCompleted { .. }) {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Diagnostics fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    printed
}

fn render_event(event: &DomainEvent) -> Option<String> {
    match event {
        DomainEvent::ToolDispatched {
            index,
            name,
            arguments,
            ..
        } => Some(format!("\nTool {}: {name}({arguments})", index + 1)),
        DomainEvent::ToolCompleted { index, output, .. } => {
            Some(format!("Response {}: {output}", index + 1))
        }
        DomainEvent::TurnCompleted { elapsed_ms, .. } => Some(format!(
            "Total Time: {:.2}s",
            *elapsed_ms as f64 / 1000.0
        )),
        DomainEvent::ResponseGenerated { .. } => None,
    }
}
