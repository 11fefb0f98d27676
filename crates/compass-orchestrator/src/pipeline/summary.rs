// Human-readable narration of tool results for the materials channel.

use std::fmt::Write as _;

use serde_json::Value;

use crate::envelope::{ToolResultEnvelope, ToolStatus};
use crate::tool::ToolInput;

const SEARCH_ITEMS: usize = 10;
const SEARCH_TEXT_CHARS: usize = 220;
const GET_TEXT_CHARS: usize = 300;

/// One short paragraph describing a tool result. Never raw JSON.
pub fn summarize(tool_name: &str, envelope: &ToolResultEnvelope, input: &ToolInput) -> String {
    if envelope.status == ToolStatus::Error {
        let message = envelope.message.as_deref().unwrap_or("An error occurred.");
        return format!("Tool error: {}\n", message);
    }

    match tool_name {
        "search" => summarize_search(&envelope.result),
        "get" => summarize_get(envelope, input),
        _ if envelope.status == ToolStatus::Success => "Operation completed successfully.\n".to_string(),
        _ => "Tool completed.\n".to_string(),
    }
}

fn summarize_search(result: &Value) -> String {
    let lines = match result {
        Value::Array(items) => item_lines(items.iter().take(SEARCH_ITEMS), SEARCH_TEXT_CHARS),
        _ => Vec::new(),
    };
    if lines.is_empty() {
        return "No relevant PCI DSS requirements were found.\n".to_string();
    }
    format!("Retrieved materials\n\n\n{}\n", lines.join("\n"))
}

fn summarize_get(envelope: &ToolResultEnvelope, input: &ToolInput) -> String {
    if envelope.status == ToolStatus::NotFound {
        let requested = match input.get("id").or_else(|| input.get("ids")) {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Array(ids)) => ids.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(", "),
            _ => String::new(),
        };
        if requested.is_empty() {
            return "No requirement was found.\n".to_string();
        }
        return format!("No requirement was found for ID(s) {}.\n", requested);
    }

    let lines = match &envelope.result {
        Value::Array(items) => item_lines(items.iter(), GET_TEXT_CHARS),
        other => item_lines(std::iter::once(other), GET_TEXT_CHARS),
    };
    let mut out = String::from("\n");
    if lines.is_empty() {
        out.push_str("Retrieved requirement(s).\n");
    } else {
        let _ = writeln!(out, "{}", lines.join("\n"));
    }
    out
}

fn item_lines<'a>(items: impl Iterator<Item = &'a Value>, max_chars: usize) -> Vec<String> {
    items
        .filter_map(|item| {
            let id = item.get("id").and_then(Value::as_str).map_or("", str::trim);
            let text = item.get("text").and_then(Value::as_str).map_or("", str::trim);
            let text = clip(text, max_chars);
            match (id.is_empty(), text.is_empty()) {
                (false, false) => Some(format!("- {}: {}", id, text)),
                (false, true) => Some(format!("- {}", id)),
                (true, false) => Some(format!("- {}", text)),
                (true, true) => None,
            }
        })
        .collect()
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max_chars).collect();
    clipped.truncate(clipped.trim_end().len());
    clipped.push('…');
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ErrorStage;
    use serde_json::json;

    fn input(value: Value) -> ToolInput {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_search_lists_hits() {
        let envelope = ToolResultEnvelope::success(
            "search",
            json!([{"id": "3.5.1", "text": "PAN is rendered unreadable."}, {"id": "3.6"}, {"text": "orphan"}, {}]),
        );
        assert_eq!(
            summarize("search", &envelope, &ToolInput::new()),
            "Retrieved materials\n\n\n- 3.5.1: PAN is rendered unreadable.\n- 3.6\n- orphan\n"
        );
    }

    #[test]
    fn test_search_caps_items_and_text() {
        let hits: Vec<Value> =
            (1..=12).map(|n| json!({"id": format!("1.{n}"), "text": "x".repeat(300)})).collect();
        let envelope = ToolResultEnvelope::success("search", Value::Array(hits));
        let summary = summarize("search", &envelope, &ToolInput::new());

        assert_eq!(summary.lines().filter(|l| l.starts_with("- ")).count(), 10);
        assert!(summary.contains(&format!("- 1.1: {}…", "x".repeat(220))));
    }

    #[test]
    fn test_search_without_hits() {
        let envelope = ToolResultEnvelope::success("search", json!([]));
        assert_eq!(
            summarize("search", &envelope, &ToolInput::new()),
            "No relevant PCI DSS requirements were found.\n"
        );
    }

    #[test]
    fn test_get_not_found_names_ids() {
        let mut envelope = ToolResultEnvelope::success("get", Value::Null);
        envelope.status = ToolStatus::NotFound;
        assert_eq!(
            summarize("get", &envelope, &input(json!({"ids": ["9.9", "9.8"]}))),
            "No requirement was found for ID(s) 9.9, 9.8.\n"
        );
        assert_eq!(summarize("get", &envelope, &ToolInput::new()), "No requirement was found.\n");
    }

    #[test]
    fn test_get_single_and_many() {
        let single = ToolResultEnvelope::success("get", json!({"id": "8.3.6", "text": "Passwords are at least 12 characters."}));
        assert_eq!(
            summarize("get", &single, &input(json!({"id": "8.3.6"}))),
            "\n- 8.3.6: Passwords are at least 12 characters.\n"
        );

        let opaque = ToolResultEnvelope::success("get", json!("raw"));
        assert_eq!(summarize("get", &opaque, &ToolInput::new()), "\nRetrieved requirement(s).\n");
    }

    #[test]
    fn test_other_tools_and_errors() {
        let ok = ToolResultEnvelope::success("clock", json!("12:00"));
        assert_eq!(summarize("clock", &ok, &ToolInput::new()), "Operation completed successfully.\n");

        let failed = ToolResultEnvelope::error("get", ErrorStage::Runtime, "database is locked");
        assert_eq!(summarize("get", &failed, &ToolInput::new()), "Tool error: database is locked\n");
    }
}
