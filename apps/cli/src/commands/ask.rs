//! One-shot question answering.

use anyhow::bail;
use compass_orchestrator::CompassConfig;
use futures::StreamExt;

use super::build_orchestrator;
use super::event_renderer::EventRenderer;

/// Answers `message`, rendering events as they stream.
///
/// Fails after rendering when the request ended in a terminal error, so the
/// exit status reflects the outcome.
pub async fn execute(config: &CompassConfig, message: &str, json: bool) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let mut events = orchestrator.run(message);
    let mut renderer = EventRenderer::stdout(json);

    while let Some(event) = events.next().await {
        renderer.render(&event)?;
    }

    let transcript = renderer.finish()?;
    if transcript.failed() {
        bail!("the request did not complete");
    }
    Ok(())
}
