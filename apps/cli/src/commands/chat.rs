//! Interactive question answering.

use std::io::Write;

use colored::Colorize;
use compass_orchestrator::{CompassConfig, Orchestrator};
use tokio::io::{AsyncBufReadExt, BufReader};

use super::build_orchestrator;
use super::event_renderer::EventRenderer;

/// Reads questions from stdin until `exit`, `quit` or end of input.
///
/// Ctrl-C while an answer streams cancels that request only; at the prompt
/// it ends the session.
pub async fn execute(config: &CompassConfig) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", "Compass - ask about PCI DSS requirements".cyan().bold());
    println!("{}", "Type 'exit' or 'quit' to leave.".dimmed());

    loop {
        print!("\n{} ", ">".green().bold());
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            _ => answer(&orchestrator, input).await?,
        }
    }

    println!("{}", "Goodbye.".dimmed());
    Ok(())
}

async fn answer(orchestrator: &Orchestrator, message: &str) -> anyhow::Result<()> {
    let mut events = orchestrator.run(message);
    let mut renderer = EventRenderer::stdout(false);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => renderer.render(&event)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                events.cancel();
                renderer.finish()?;
                println!("{}", "Cancelled.".yellow());
                return Ok(());
            }
        }
    }

    renderer.finish()?;
    Ok(())
}
