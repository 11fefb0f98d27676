//! Tool dispatch.
//!
//! [`ToolDispatcher::dispatch`] resolves a tool by name, runs it, and turns
//! every outcome into a [`ToolResultEnvelope`]. It never returns an error and
//! never lets a tool panic escape.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::envelope::{ErrorStage, ToolResultEnvelope};
use crate::error::{OrchestrationError, Result};
use crate::registry::{Capability, ToolRegistry};
use crate::tool::{ToolError, ToolInput};

/// Runs registered tools and normalizes their results.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
}

impl ToolDispatcher {
    /// Creates a dispatcher over a finished registry
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this dispatcher resolves names against
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Invokes `tool_name` with `input`.
    pub async fn dispatch(&self, tool_name: &str, input: &ToolInput) -> ToolResultEnvelope {
        let Some(capability) = self.registry.get(tool_name) else {
            warn!(tool_name = %tool_name, "Dispatch to unknown tool");
            return ToolResultEnvelope::error(
                tool_name,
                ErrorStage::Import,
                format!("Unknown tool '{}'", tool_name),
            );
        };

        let started = Instant::now();
        let outcome = match capability {
            Capability::Async(tool) => {
                match AssertUnwindSafe(tool.run(input)).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => Err(ToolError::Execution(format!("tool panicked: {}", panic_message(&*panic)))),
                }
            }
            Capability::Blocking(tool) => {
                let tool = Arc::clone(tool);
                let input = input.clone();
                match tokio::task::spawn_blocking(move || tool.run(&input)).await {
                    Ok(outcome) => outcome,
                    Err(join) if join.is_panic() => {
                        Err(ToolError::Execution(format!("tool panicked: {}", panic_message(&*join.into_panic()))))
                    }
                    Err(join) => Err(ToolError::Execution(format!("tool task failed: {}", join))),
                }
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(output) => {
                let envelope = ToolResultEnvelope::from_output(tool_name, output);
                debug!(tool_name = %tool_name, status = envelope.status.as_str(), elapsed_ms, "Tool finished");
                envelope
            }
            Err(ToolError::InvalidInput { message, details }) => {
                warn!(tool_name = %tool_name, error = %message, "Tool rejected its input");
                ToolResultEnvelope::validation_error(tool_name, message, &details)
            }
            Err(ToolError::Execution(message)) => {
                error!(tool_name = %tool_name, error = %message, elapsed_ms, "Tool failed");
                ToolResultEnvelope::error(tool_name, ErrorStage::Runtime, message)
            }
        }
    }

    /// Invokes a tool from synchronous code.
    ///
    /// # Errors
    /// Returns [`OrchestrationError::BlockingContext`] when called from inside
    /// an async runtime, where [`ToolDispatcher::dispatch`] should be awaited instead.
    pub fn dispatch_blocking(&self, tool_name: &str, input: &ToolInput) -> Result<ToolResultEnvelope> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(OrchestrationError::BlockingContext);
        }
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        Ok(runtime.block_on(self.dispatch(tool_name, input)))
    }

    /// Invokes a tool with arbitrary JSON input, as a request/response
    /// endpoint would. Non-object input is a validation error.
    pub async fn dispatch_value(&self, tool_name: &str, input: Value) -> ToolResultEnvelope {
        match input {
            Value::Object(map) => self.dispatch(tool_name, &map).await,
            Value::Null => self.dispatch(tool_name, &ToolInput::new()).await,
            other => ToolResultEnvelope::validation_error(
                tool_name,
                format!("tool input must be a JSON object, got {}", json_kind(&other)),
                &[],
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
