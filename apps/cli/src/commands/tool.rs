//! Direct tool invocation.

use anyhow::{Context, bail};
use compass_orchestrator::CompassConfig;
use serde_json::Value;

use super::build_dispatcher;

/// Runs `name` with the JSON object in `input` and prints the envelope.
pub async fn execute(config: &CompassConfig, name: &str, input: &str) -> anyhow::Result<()> {
    let input: Value = serde_json::from_str(input).context("--input is not valid JSON")?;
    let dispatcher = build_dispatcher(config)?;

    let envelope = dispatcher.dispatch_value(name, input).await;
    println!("{}", serde_json::to_string_pretty(&envelope)?);

    if envelope.is_error() {
        bail!("{} failed: {}", name, envelope.message.as_deref().unwrap_or("unknown error"));
    }
    Ok(())
}
