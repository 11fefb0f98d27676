//! Planner-output debugging.

use anyhow::bail;
use colored::Colorize;
use compass_orchestrator::{ActionNormalizer, CompassConfig, ParsedPlan, PlanGrammar, PlanStep};
use serde_json::json;

/// Parses `text` as planner output and prints the plan, plus the calls it
/// would dispatch when it names actions.
pub fn execute(config: &CompassConfig, text: &str) -> anyhow::Result<()> {
    let grammar = PlanGrammar::new(config.pipeline.max_ids);
    let plan = match grammar.parse(text) {
        Ok(plan) => plan,
        Err(e) => bail!("Could not parse plan: {}", e),
    };
    println!("{}", serde_json::to_string_pretty(&plan)?);

    if let ParsedPlan::Actions(actions) = plan {
        let normalized = ActionNormalizer::new(config.pipeline.max_actions).normalize(actions);
        if let Some(notice) = normalized.truncation_notice() {
            println!("{} {}", "ℹ".cyan(), notice.yellow());
        }
        for (idx, step) in normalized.steps.iter().enumerate() {
            let line = match step {
                PlanStep::Call(call) => json!({"step": idx + 1, "call": call}),
                PlanStep::Rejected { reason, .. } => json!({"step": idx + 1, "rejected": reason}),
            };
            println!("{}", line);
        }
        if let Some(reason) = normalized.emptiness_reason() {
            bail!("{}", reason);
        }
    }
    Ok(())
}
