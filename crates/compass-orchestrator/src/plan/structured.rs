// JSON fallback: the first balanced `{...}` / `[...]` group in the text.

use serde_json::{Map, Value};

use super::{Action, ParsedPlan, unrecognized};
use crate::error::{PlanError, fragment};

pub(super) fn parse(text: &str) -> Result<ParsedPlan, PlanError> {
    let candidate = first_balanced_group(text)?;
    let value: Value = serde_json::from_str(candidate).map_err(|e| PlanError::MalformedJson {
        fragment: fragment(candidate),
        reason: e.to_string(),
    })?;
    interpret(&value)
}

/// Finds the first bracketed group, tracking nesting and skipping over
/// string literals so brackets inside strings do not count.
fn first_balanced_group(text: &str) -> Result<&str, PlanError> {
    let Some(start) = text.find(['{', '[']) else {
        return Err(PlanError::NotAPlan { fragment: fragment(text) });
    };

    let mut expected: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => expected.push('}'),
            '[' => expected.push(']'),
            '}' | ']' => {
                if expected.pop() != Some(ch) {
                    return Err(PlanError::UnbalancedStructure { fragment: fragment(&text[start..]) });
                }
                if expected.is_empty() {
                    let end = start + offset + ch.len_utf8();
                    return Ok(&text[start..end]);
                }
            }
            _ => {}
        }
    }

    Err(PlanError::UnbalancedStructure { fragment: fragment(&text[start..]) })
}

fn interpret(value: &Value) -> Result<ParsedPlan, PlanError> {
    match value {
        Value::Array(items) => action_list(items, value),
        Value::Object(object) => interpret_object(object, value),
        other => Err(unrecognized(other)),
    }
}

/// A list is a plan only when it is empty or holds at least one object;
/// bracketed prose such as `[3.4]` is not.
fn action_list(items: &[Value], value: &Value) -> Result<ParsedPlan, PlanError> {
    if !items.is_empty() && !items.iter().any(Value::is_object) {
        return Err(unrecognized(value));
    }
    Ok(ParsedPlan::Actions(items.iter().map(to_action).collect()))
}

fn interpret_object(object: &Map<String, Value>, value: &Value) -> Result<ParsedPlan, PlanError> {
    if object.contains_key("tool_name") {
        return Ok(ParsedPlan::Actions(vec![to_action(value)]));
    }
    if let Some(actions) = object.get("actions") {
        return match actions {
            Value::Array(items) => action_list(items, actions),
            other => Err(unrecognized(other)),
        };
    }
    if let Some(Value::String(answer)) = object.get("answer") {
        return Ok(ParsedPlan::FinalAnswer(answer.clone()));
    }
    if object.get("skip") == Some(&Value::Bool(true)) {
        return Ok(ParsedPlan::Skip);
    }
    Err(unrecognized(value))
}

/// Reads one list element as an action.
///
/// Elements that are not objects, or whose `tool_name` is not a string, are
/// kept with an empty name so normalization reports them against their step.
fn to_action(value: &Value) -> Action {
    let Some(object) = value.as_object() else {
        return Action::new("", value.clone());
    };
    let tool_name = object.get("tool_name").and_then(Value::as_str).unwrap_or_default();
    let tool_input = object.get("tool_input").cloned().unwrap_or(Value::Null);
    Action::new(tool_name, tool_input)
}
