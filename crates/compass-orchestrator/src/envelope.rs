//! The uniform result shape for every tool invocation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tool::FieldIssue;

/// Outcome of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Everything requested was produced
    Success,
    /// Some of what was requested was produced
    PartialSuccess,
    /// Nothing matched
    NotFound,
    /// The invocation failed
    Error,
}

impl ToolStatus {
    /// Parses the wire name of a status.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "success" => Some(Self::Success),
            "partial_success" => Some(Self::PartialSuccess),
            "not_found" => Some(Self::NotFound),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Wire name of the status
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::NotFound => "not_found",
            Self::Error => "error",
        }
    }
}

/// Where an errored invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStage {
    /// No tool is registered under the name
    Import,
    /// The tool rejected its input
    Validation,
    /// The tool failed, panicked, or timed out while running
    Runtime,
}

/// Normalized result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultEnvelope {
    /// Outcome
    pub status: ToolStatus,
    /// Tool that was invoked
    pub tool_name: String,
    /// Payload, `null` when there is none
    #[serde(default)]
    pub result: Value,
    /// Extra information (requested ids, validation details, sources)
    #[serde(default)]
    pub meta: Option<Map<String, Value>>,
    /// Failure stage, for `status = error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<ErrorStage>,
    /// Human-readable failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ToolResultEnvelope {
    /// A non-error result with the given status.
    pub fn with_status(tool_name: impl Into<String>, status: ToolStatus, result: Value) -> Self {
        Self { status, tool_name: tool_name.into(), result, meta: None, stage: None, message: None }
    }

    /// A successful result.
    pub fn success(tool_name: impl Into<String>, result: Value) -> Self {
        Self::with_status(tool_name, ToolStatus::Success, result)
    }

    /// A failed invocation.
    pub fn error(tool_name: impl Into<String>, stage: ErrorStage, message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            tool_name: tool_name.into(),
            result: Value::Null,
            meta: None,
            stage: Some(stage),
            message: Some(message.into()),
        }
    }

    /// A validation failure with field-level details kept in `meta.details`.
    pub fn validation_error(
        tool_name: impl Into<String>,
        message: impl Into<String>,
        details: &[FieldIssue],
    ) -> Self {
        let details = serde_json::to_value(details).unwrap_or(Value::Null);
        Self::error(tool_name, ErrorStage::Validation, message).with_meta("details", details)
    }

    /// Adds one `meta` entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.get_or_insert_with(Map::new).insert(key.into(), value);
        self
    }

    /// Normalizes whatever a tool returned.
    ///
    /// A mapping with a recognized `status` is taken as an envelope and passed
    /// through; any other value is wrapped as a success.
    pub fn from_output(tool_name: &str, output: Value) -> Self {
        let Value::Object(mut object) = output else {
            return Self::success(tool_name, output);
        };

        let Some(status) = object.get("status").and_then(Value::as_str).and_then(ToolStatus::from_name)
        else {
            return Self::success(tool_name, Value::Object(object));
        };

        let name = match object.remove("tool_name") {
            Some(Value::String(name)) if !name.is_empty() => name,
            _ => tool_name.to_string(),
        };
        let meta = match object.remove("meta") {
            Some(Value::Object(meta)) => Some(meta),
            _ => None,
        };
        let stage = object.remove("stage").and_then(|stage| serde_json::from_value(stage).ok());
        let message = match object.remove("message") {
            Some(Value::String(message)) => Some(message),
            _ => None,
        };

        Self {
            status,
            tool_name: name,
            result: object.remove("result").unwrap_or(Value::Null),
            meta,
            stage: if status == ToolStatus::Error { stage.or(Some(ErrorStage::Runtime)) } else { stage },
            message,
        }
    }

    /// Whether the invocation failed.
    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }

    /// The serialized form, as a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
