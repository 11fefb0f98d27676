//! Tools introspection command for listing available tools.

use colored::Colorize;
use compass_orchestrator::CompassConfig;

use super::build_dispatcher;

/// Prints the tool catalog.
pub fn execute(config: &CompassConfig, json: bool) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(config)?;
    let registry = dispatcher.registry();

    if json {
        println!("{}", serde_json::to_string_pretty(&registry.describe())?);
        return Ok(());
    }

    println!("{}", "Available Tools".bold().cyan());
    println!("{}", "─".repeat(60).dimmed());
    for descriptor in registry.describe() {
        println!("\n  {}  {}", descriptor.name.green().bold(), descriptor.description);
        for (name, schema) in &descriptor.parameters.properties {
            let required = if descriptor.parameters.required.contains(name) { " (required)" } else { "" };
            println!(
                "    {} {}{}  {}",
                name.cyan(),
                schema.property_type.dimmed(),
                required.yellow(),
                schema.description
            );
        }
    }
    println!();
    Ok(())
}
