// Tool abstractions
//
// A tool is a named capability the planner can invoke. Tools come in two
// flavours, async and blocking; the dispatcher runs both the same way.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Arguments passed to a tool.
pub type ToolInput = Map<String, Value>;

/// A validated tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the tool to invoke
    pub tool_name: String,
    /// Arguments for the tool
    pub tool_input: ToolInput,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(tool_name: impl Into<String>, tool_input: ToolInput) -> Self {
        Self { tool_name: tool_name.into(), tool_input }
    }
}

/// Tool parameters schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameters {
    /// Type (always "object")
    #[serde(rename = "type")]
    pub param_type: String,
    /// Property definitions, ordered by name
    pub properties: BTreeMap<String, ToolPropertySchema>,
    /// Required property names
    pub required: Vec<String>,
}

impl ToolParameters {
    /// Create a new tool parameters schema
    pub fn new() -> Self {
        Self { param_type: "object".to_string(), properties: BTreeMap::new(), required: Vec::new() }
    }

    /// Add a property to the schema
    #[must_use]
    pub fn add_property(
        mut self,
        name: impl Into<String>,
        property_type: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(
            name.clone(),
            ToolPropertySchema {
                property_type: property_type.into(),
                description: description.into(),
            },
        );
        if required {
            self.required.push(name);
        }
        self
    }
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self::new()
    }
}

/// Tool property schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPropertySchema {
    /// Property type
    #[serde(rename = "type")]
    pub property_type: String,
    /// Property description
    pub description: String,
}

/// One field-level validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    /// Path to the offending field
    pub loc: Vec<String>,
    /// What is wrong with it
    pub msg: String,
}

impl FieldIssue {
    /// Issue on a top-level field
    pub fn new(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self { loc: vec![field.into()], msg: msg.into() }
    }
}

/// Failure raised by a tool.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    /// The input did not satisfy the tool's schema
    #[error("{message}")]
    InvalidInput {
        /// Summary
        message: String,
        /// Field-level details
        details: Vec<FieldIssue>,
    },

    /// The tool failed while running
    #[error("{0}")]
    Execution(String),
}

impl ToolError {
    /// Validation failure on a single field
    pub fn invalid(field: impl Into<String>, msg: impl Into<String>) -> Self {
        let issue = FieldIssue::new(field, msg);
        Self::InvalidInput { message: format!("Invalid input: {}", issue.msg), details: vec![issue] }
    }
}

/// An asynchronous capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the planner uses
    fn name(&self) -> &str;

    /// One-line description for the catalog
    fn description(&self) -> &str;

    /// Input schema
    fn parameters(&self) -> ToolParameters {
        ToolParameters::new()
    }

    /// Runs the tool.
    ///
    /// The result is either a bare value or an already-enveloped mapping
    /// (`{"status": ..., "result": ..., "meta": ...}`).
    async fn run(&self, input: &ToolInput) -> Result<Value, ToolError>;
}

/// A synchronous capability, run on the blocking pool.
pub trait BlockingTool: Send + Sync {
    /// Name the planner uses
    fn name(&self) -> &str;

    /// One-line description for the catalog
    fn description(&self) -> &str;

    /// Input schema
    fn parameters(&self) -> ToolParameters {
        ToolParameters::new()
    }

    /// Runs the tool. See [`Tool::run`] for the result shape.
    fn run(&self, input: &ToolInput) -> Result<Value, ToolError>;
}

/// Reads a string field, trimming it; blank strings count as absent.
pub fn get_str<'a>(input: &'a ToolInput, key: &str) -> Option<&'a str> {
    input.get(key)?.as_str().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_parameters_builder() {
        let params = ToolParameters::new()
            .add_property("query", "string", "Free-text query", true)
            .add_property("k", "integer", "Result count", false);

        assert_eq!(params.properties.len(), 2);
        assert_eq!(params.required, vec!["query"]);
        assert_eq!(params.properties.keys().next().map(String::as_str), Some("k"));
    }

    #[test]
    fn test_invalid_helper() {
        let err = ToolError::invalid("ids", "at most 20 identifiers per call");
        let ToolError::InvalidInput { message, details } = err else { panic!("expected InvalidInput") };
        assert_eq!(message, "Invalid input: at most 20 identifiers per call");
        assert_eq!(details, vec![FieldIssue::new("ids", "at most 20 identifiers per call")]);
    }

    #[test]
    fn test_get_str() {
        let input = json!({"q": "  key  ", "blank": "   ", "n": 3});
        let input = input.as_object().unwrap();
        assert_eq!(get_str(input, "q"), Some("key"));
        assert_eq!(get_str(input, "blank"), None);
        assert_eq!(get_str(input, "n"), None);
    }
}
