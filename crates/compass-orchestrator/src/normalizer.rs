//! Action normalization.
//!
//! Turns a parsed action list into the bounded, validated list of tool calls
//! the orchestrator executes: the list is cut to `max_actions`, `get` inputs
//! are rewritten into canonical `{"id"}` / `{"ids"}` form, and malformed
//! actions are marked as rejected in place so they are reported against their
//! step rather than failing the plan.

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::dispatcher::json_kind;
use crate::identifier;
use crate::plan::Action;
use crate::tool::{ToolCall, ToolInput};

/// One step of a normalized plan.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanStep {
    /// Ready to dispatch
    Call(ToolCall),
    /// Failed shape validation
    Rejected {
        /// The action as the planner wrote it
        action: Action,
        /// Why it was rejected
        reason: String,
    },
}

/// The executable form of a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPlan {
    /// Steps in planner order
    pub steps: Vec<PlanStep>,
    /// Actions cut by the cap
    pub dropped: usize,
    /// The cap that was applied
    pub max_actions: usize,
}

impl NormalizedPlan {
    /// Dispatchable calls, in order
    pub fn calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.steps.iter().filter_map(|step| match step {
            PlanStep::Call(call) => Some(call),
            PlanStep::Rejected { .. } => None,
        })
    }

    /// Number of dispatchable calls
    pub fn call_count(&self) -> usize {
        self.calls().count()
    }

    /// Notice for the client when actions were dropped.
    pub fn truncation_notice(&self) -> Option<String> {
        (self.dropped > 0)
            .then(|| format!("Action list truncated to {} steps for safety.", self.max_actions))
    }

    /// Why the plan cannot run, when it has no dispatchable call.
    pub fn emptiness_reason(&self) -> Option<String> {
        if self.call_count() > 0 {
            return None;
        }
        if self.steps.is_empty() {
            return Some("Plan contained no actions.".to_string());
        }
        let reasons: Vec<String> = self
            .steps
            .iter()
            .enumerate()
            .filter_map(|(idx, step)| match step {
                PlanStep::Rejected { reason, .. } => Some(format!("step {}: {}", idx + 1, reason)),
                PlanStep::Call(_) => None,
            })
            .collect();
        Some(format!("Plan contained no valid actions ({}).", reasons.join("; ")))
    }
}

/// Cleans and bounds action lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionNormalizer {
    max_actions: usize,
}

impl Default for ActionNormalizer {
    fn default() -> Self {
        Self::new(6)
    }
}

impl ActionNormalizer {
    /// Creates a normalizer keeping at most `max_actions` actions
    pub fn new(max_actions: usize) -> Self {
        Self { max_actions }
    }

    /// Normalizes a plan. Never fails; problems are recorded per step.
    pub fn normalize(&self, mut actions: Vec<Action>) -> NormalizedPlan {
        let dropped = actions.len().saturating_sub(self.max_actions);
        if dropped > 0 {
            debug!(total = actions.len(), kept = self.max_actions, "Truncating action list");
            actions.truncate(self.max_actions);
        }

        let steps = actions.into_iter().map(|action| Self::validate(normalize_get(action))).collect();
        NormalizedPlan { steps, dropped, max_actions: self.max_actions }
    }

    fn validate(action: Action) -> PlanStep {
        let tool_name = action.tool_name.trim();
        if tool_name.is_empty() {
            let reason = match &action.tool_input {
                Value::Null | Value::Object(_) => "missing tool_name".to_string(),
                other => format!("expected an action object, got {}", json_kind(other)),
            };
            return PlanStep::Rejected { action, reason };
        }

        let tool_input: ToolInput = match &action.tool_input {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let reason = format!("tool_input for '{}' must be a mapping, got {}", tool_name, json_kind(other));
                return PlanStep::Rejected { action, reason };
            }
        };

        if tool_name == "get" && !has_identifiers(&tool_input) {
            let reason = format!("get: no valid requirement identifiers in {}", Value::Object(tool_input));
            return PlanStep::Rejected { action, reason };
        }

        PlanStep::Call(ToolCall::new(tool_name, tool_input))
    }
}

// Canonical `get` input, as written by `normalize_get`.
fn has_identifiers(input: &ToolInput) -> bool {
    match (input.get("id"), input.get("ids")) {
        (Some(Value::String(id)), _) => identifier::is_valid(id),
        (None, Some(Value::Array(ids))) => {
            !ids.is_empty() && ids.iter().all(|id| id.as_str().is_some_and(identifier::is_valid))
        }
        _ => false,
    }
}

/// Rewrites a `get` action's `id`/`ids` fields into canonical form.
///
/// Every identifier found in either field (strings or lists of strings) is
/// collected, de-duplicated in order, and written back as `{"id": x}` for one
/// or `{"ids": [...]}` for several. The `q` alias is read too. Actions with no
/// recoverable identifier, and actions for other tools, are returned
/// unchanged; validation rejects the former.
pub fn normalize_get(mut action: Action) -> Action {
    if action.tool_name.trim() != "get" {
        return action;
    }
    let Value::Object(input) = &action.tool_input else {
        return action;
    };

    let mut found = Vec::new();
    for key in ["ids", "id", "q"] {
        match input.get(key) {
            Some(Value::String(text)) => found.extend(identifier::extract(text)),
            Some(Value::Array(items)) => {
                for item in items.iter().filter_map(Value::as_str) {
                    found.extend(identifier::extract(item));
                }
            }
            _ => {}
        }
    }

    let mut ids = identifier::dedup(found);
    if ids.is_empty() {
        return action;
    }
    action.tool_input =
        if ids.len() == 1 { json!({ "id": ids.remove(0) }) } else { json!({ "ids": ids }) };
    action
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(step: &PlanStep) -> &ToolCall {
        match step {
            PlanStep::Call(call) => call,
            PlanStep::Rejected { reason, .. } => panic!("unexpected rejection: {reason}"),
        }
    }

    #[test]
    fn test_scattered_ids_become_ids_list() {
        let action = Action::new("get", json!({"id": "10.5 and also 10.6"}));
        assert_eq!(normalize_get(action), Action::new("get", json!({"ids": ["10.5", "10.6"]})));
    }

    #[test]
    fn test_id_and_ids_are_merged() {
        let action = Action::new("get", json!({"ids": ["1.1", "see 1.2"], "id": "1.1"}));
        assert_eq!(normalize_get(action), Action::new("get", json!({"ids": ["1.1", "1.2"]})));
    }

    #[test]
    fn test_single_id_list_becomes_id() {
        let action = Action::new("get", json!({"ids": ["6.5"]}));
        assert_eq!(normalize_get(action), Action::new("get", json!({"id": "6.5"})));
    }

    #[test]
    fn test_unrecoverable_get_is_left_alone() {
        let action = Action::new("get", json!({"id": "the firewall one"}));
        assert_eq!(normalize_get(action.clone()), action);
    }

    #[test]
    fn test_get_without_identifiers_is_rejected() {
        let plan = ActionNormalizer::default().normalize(vec![
            Action::new("get", json!({"id": "the firewall one"})),
            Action::new("get", json!({"id": "13.1"})),
            Action::new("get", json!({})),
            Action::new("get", json!({"q": "8.3.6"})),
        ]);

        assert!(matches!(
            &plan.steps[0],
            PlanStep::Rejected { reason, .. }
                if reason == r#"get: no valid requirement identifiers in {"id":"the firewall one"}"#
        ));
        assert!(matches!(&plan.steps[1], PlanStep::Rejected { reason, .. } if reason.contains("13.1")));
        assert!(matches!(&plan.steps[2], PlanStep::Rejected { reason, .. } if reason.ends_with("in {}")));
        assert_eq!(call(&plan.steps[3]).tool_input, json!({"id": "8.3.6"}).as_object().cloned().unwrap());
        assert_eq!(plan.call_count(), 1);
    }

    #[test]
    fn test_other_tools_pass_through() {
        let action = Action::new("search", json!({"query": "10.5 and 10.6"}));
        let plan = ActionNormalizer::default().normalize(vec![action]);
        assert_eq!(call(&plan.steps[0]).tool_input["query"], "10.5 and 10.6");
    }

    #[test]
    fn test_truncation() {
        let actions: Vec<Action> = (1..=9).map(|n| Action::new("get", json!({"id": format!("{n}.1")}))).collect();
        let plan = ActionNormalizer::new(6).normalize(actions);

        assert_eq!(plan.steps.len(), 6);
        assert_eq!(plan.dropped, 3);
        assert_eq!(
            plan.truncation_notice().as_deref(),
            Some("Action list truncated to 6 steps for safety.")
        );
        assert_eq!(call(&plan.steps[5]).tool_input["id"], "6.1");
    }

    #[test]
    fn test_no_notice_under_cap() {
        let plan = ActionNormalizer::new(6).normalize(vec![Action::new("get", json!({"id": "1.1"}))]);
        assert!(plan.truncation_notice().is_none());
        assert!(plan.emptiness_reason().is_none());
    }

    #[test]
    fn test_shape_validation_is_per_step() {
        let plan = ActionNormalizer::default().normalize(vec![
            Action::new("", json!({"id": "1.1"})),
            Action::new("search", json!("key rotation")),
            Action::new("search", Value::Null),
            Action::new("", json!(42)),
        ]);

        assert!(matches!(&plan.steps[0], PlanStep::Rejected { reason, .. } if reason == "missing tool_name"));
        assert!(matches!(&plan.steps[1], PlanStep::Rejected { reason, .. } if reason.contains("must be a mapping")));
        assert_eq!(call(&plan.steps[2]).tool_input, ToolInput::new());
        assert!(matches!(&plan.steps[3], PlanStep::Rejected { reason, .. } if reason.contains("a number")));
        assert_eq!(plan.call_count(), 1);
    }

    #[test]
    fn test_emptiness_reasons() {
        let empty = ActionNormalizer::default().normalize(Vec::new());
        assert_eq!(empty.emptiness_reason().as_deref(), Some("Plan contained no actions."));

        let invalid = ActionNormalizer::default().normalize(vec![Action::new("", Value::Null)]);
        assert_eq!(
            invalid.emptiness_reason().as_deref(),
            Some("Plan contained no valid actions (step 1: missing tool_name).")
        );
    }

    #[test]
    fn test_tool_name_is_trimmed() {
        let plan = ActionNormalizer::default().normalize(vec![Action::new(" get ", json!({"id": "2.2"}))]);
        assert_eq!(call(&plan.steps[0]).tool_name, "get");
    }
}
