//! Tool registry.
//!
//! Built once at start-up and read-only afterwards, so dispatch needs no locking.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::tool::{BlockingTool, Tool, ToolParameters};

/// A registered capability.
#[derive(Clone)]
pub enum Capability {
    /// Runs on the async executor
    Async(Arc<dyn Tool>),
    /// Runs on the blocking pool
    Blocking(Arc<dyn BlockingTool>),
}

impl Capability {
    /// Tool name
    pub fn name(&self) -> &str {
        match self {
            Self::Async(tool) => tool.name(),
            Self::Blocking(tool) => tool.name(),
        }
    }

    /// Tool description
    pub fn description(&self) -> &str {
        match self {
            Self::Async(tool) => tool.description(),
            Self::Blocking(tool) => tool.description(),
        }
    }

    /// Input schema
    pub fn parameters(&self) -> ToolParameters {
        match self {
            Self::Async(tool) => tool.parameters(),
            Self::Blocking(tool) => tool.parameters(),
        }
    }
}

// Implement Debug manually since trait objects don't implement Debug
impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Async(_) => "async",
            Self::Blocking(_) => "blocking",
        };
        f.debug_struct("Capability").field("name", &self.name()).field("kind", &kind).finish()
    }
}

/// Catalog entry for one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// Input schema
    pub parameters: ToolParameters,
}

/// Name-to-capability map.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Capability>,
}

impl ToolRegistry {
    /// Starts building a registry
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Looks up a tool by name
    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.tools.get(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Catalog entries, sorted by name
    pub fn describe(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Human-readable catalog for the planning prompt.
    pub fn overview(&self) -> String {
        let mut out = String::new();
        for descriptor in self.describe() {
            let _ = writeln!(out, "- {}: {}", descriptor.name, descriptor.description);
            for (field, schema) in &descriptor.parameters.properties {
                let required = if descriptor.parameters.required.contains(field) { ", required" } else { "" };
                let _ = writeln!(
                    out,
                    "    - `{}` ({}{}): {}",
                    field, schema.property_type, required, schema.description
                );
            }
        }
        out
    }
}

/// Builder for [`ToolRegistry`].
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: BTreeMap<String, Capability>,
}

impl ToolRegistryBuilder {
    /// Registers an async tool
    #[must_use]
    pub fn register(self, tool: Arc<dyn Tool>) -> Self {
        self.insert(Capability::Async(tool))
    }

    /// Registers a blocking tool
    #[must_use]
    pub fn register_blocking(self, tool: Arc<dyn BlockingTool>) -> Self {
        self.insert(Capability::Blocking(tool))
    }

    fn insert(mut self, capability: Capability) -> Self {
        let name = capability.name().to_string();
        debug!(tool_name = %name, "Registering tool");
        if self.tools.insert(name.clone(), capability).is_some() {
            warn!(tool_name = %name, "Tool registered twice; keeping the later one");
        }
        self
    }

    /// Finishes the registry
    pub fn build(self) -> ToolRegistry {
        ToolRegistry { tools: self.tools }
    }
}
