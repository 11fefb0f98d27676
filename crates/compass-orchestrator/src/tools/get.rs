// `get`: requirement text by identifier

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::warn;

use crate::envelope::{ToolResultEnvelope, ToolStatus};
use crate::store::RequirementStore;
use crate::tool::{BlockingTool, ToolError, ToolInput, ToolParameters, get_str};

/// Fetches requirements from the store by id.
///
/// One requested id yields a single entry as `result`; several yield a list
/// in request order. Missing ids are listed in `meta.not_found`.
pub struct GetRequirementTool {
    store: Arc<dyn RequirementStore>,
    max_batch: usize,
}

impl GetRequirementTool {
    /// Tool reading from `store`, accepting at most `max_batch` ids per call
    pub fn new(store: Arc<dyn RequirementStore>, max_batch: usize) -> Self {
        Self { store, max_batch }
    }

    fn requested_ids(input: &ToolInput) -> Result<Vec<String>, ToolError> {
        let mut ids = Vec::new();
        match input.get("ids") {
            None | Some(Value::Null) => {}
            Some(Value::String(id)) => ids.push(id.trim().to_string()),
            Some(Value::Array(items)) => {
                for item in items {
                    let Some(id) = item.as_str() else {
                        return Err(ToolError::invalid("ids", "expected a list of strings"));
                    };
                    ids.push(id.trim().to_string());
                }
            }
            Some(_) => return Err(ToolError::invalid("ids", "expected a list of strings")),
        }
        if let Some(id) = get_str(input, "id").or_else(|| get_str(input, "q")) {
            ids.push(id.to_string());
        }
        ids.retain(|id| !id.is_empty());
        Ok(crate::identifier::dedup(ids))
    }
}

impl BlockingTool for GetRequirementTool {
    fn name(&self) -> &str {
        "get"
    }

    fn description(&self) -> &str {
        "Fetch the text of PCI DSS requirements by identifier."
    }

    fn parameters(&self) -> ToolParameters {
        ToolParameters::new()
            .add_property("id", "string", "One requirement identifier, e.g. 8.3.6", false)
            .add_property("ids", "array", "Several identifiers, at most 20", false)
    }

    fn run(&self, input: &ToolInput) -> Result<Value, ToolError> {
        let ids = Self::requested_ids(input)?;
        let source = self.store.describe();

        if ids.is_empty() {
            let envelope = ToolResultEnvelope::with_status("get", ToolStatus::NotFound, Value::Null)
                .with_meta("requested", json!([]))
                .with_meta("source", json!(source));
            return Ok(envelope.to_value());
        }
        if ids.len() > self.max_batch {
            return Err(ToolError::invalid(
                "ids",
                format!("Too many IDs requested ({}). Max allowed is {}.", ids.len(), self.max_batch),
            ));
        }

        let mut found = match self.store.fetch_many(&ids) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Requirement lookup failed");
                let envelope = ToolResultEnvelope::with_status("get", ToolStatus::NotFound, Value::Null)
                    .with_meta("requested", json!(ids))
                    .with_meta("source", json!(source))
                    .with_meta("error", json!(e.to_string()));
                return Ok(envelope.to_value());
            }
        };

        let mut entries = Vec::new();
        let mut missing = Vec::new();
        for id in &ids {
            match found.remove(id) {
                Some(entry) => entries.push(entry),
                None => missing.push(id.clone()),
            }
        }

        let status = match (entries.is_empty(), missing.is_empty()) {
            (true, _) => ToolStatus::NotFound,
            (false, true) => ToolStatus::Success,
            (false, false) => ToolStatus::PartialSuccess,
        };
        let result = match (status, ids.len()) {
            (ToolStatus::NotFound, _) => Value::Null,
            (_, 1) => json!(entries[0]),
            _ => json!(entries),
        };

        let mut envelope = ToolResultEnvelope::with_status("get", status, result)
            .with_meta("requested", json!(ids))
            .with_meta("source", json!(source));
        if !missing.is_empty() {
            envelope = envelope.with_meta("not_found", json!(missing));
        }
        Ok(envelope.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, RequirementEntry, SqliteRequirementStore};

    fn tool() -> GetRequirementTool {
        let store = InMemoryStore::new([
            RequirementEntry::new("3.5.1", "PAN is rendered unreadable."),
            RequirementEntry::new("8.3.6", "Passwords are at least 12 characters."),
        ]);
        GetRequirementTool::new(Arc::new(store), 20)
    }

    fn input(value: Value) -> ToolInput {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_single_id_returns_entry() {
        let out = tool().run(&input(json!({"id": " 8.3.6 "}))).unwrap();
        assert_eq!(out["status"], "success");
        assert_eq!(out["tool_name"], "get");
        assert_eq!(out["result"]["id"], "8.3.6");
        assert_eq!(out["meta"]["requested"], json!(["8.3.6"]));
        assert_eq!(out["meta"]["source"], "memory");
    }

    #[test]
    fn test_q_alias() {
        let out = tool().run(&input(json!({"q": "3.5.1"}))).unwrap();
        assert_eq!(out["result"]["id"], "3.5.1");
    }

    #[test]
    fn test_partial_success_keeps_request_order() {
        let out = tool().run(&input(json!({"ids": ["8.3.6", "9.9", "3.5.1"], "id": "8.3.6"}))).unwrap();
        assert_eq!(out["status"], "partial_success");
        assert_eq!(out["result"][0]["id"], "8.3.6");
        assert_eq!(out["result"][1]["id"], "3.5.1");
        assert_eq!(out["meta"]["not_found"], json!(["9.9"]));
        assert_eq!(out["meta"]["requested"], json!(["8.3.6", "9.9", "3.5.1"]));
    }

    #[test]
    fn test_nothing_found() {
        let out = tool().run(&input(json!({"ids": ["9.9"]}))).unwrap();
        assert_eq!(out["status"], "not_found");
        assert_eq!(out["result"], Value::Null);

        let empty = tool().run(&ToolInput::new()).unwrap();
        assert_eq!(empty["status"], "not_found");
        assert_eq!(empty["meta"]["requested"], json!([]));
    }

    #[test]
    fn test_batch_limit() {
        let ids: Vec<String> = (1..=21).map(|n| format!("1.{n}")).collect();
        let err = tool().run(&input(json!({"ids": ids}))).unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { ref message, .. } if message.contains("Max allowed is 20")));
    }

    #[test]
    fn test_rejects_non_string_ids() {
        let err = tool().run(&input(json!({"ids": [1, 2]}))).unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }

    #[test]
    fn test_store_failure_is_not_found_with_error() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let store = SqliteRequirementStore::from_connection(conn, ":memory:");
        let tool = GetRequirementTool::new(Arc::new(store), 20);

        let out = tool.run(&input(json!({"id": "1.1"}))).unwrap();
        assert_eq!(out["status"], "not_found");
        assert!(out["meta"]["error"].as_str().unwrap().contains("database error"));
    }
}
