//! Planner output grammar.
//!
//! The planner answers in one of these forms, tried in this order:
//!
//! 1. `skip` (any case, surrounding whitespace ignored).
//! 2. A compact statement, `get:[...]`, `get:"id"`, `get: free text with ids`
//!    or `search:"query"`. Several statements may be given one per line.
//! 3. The first balanced `{...}` or `[...]` group, parsed as JSON: a
//!    `{tool_name, tool_input}` object, a list of them, `{"actions": [...]}`,
//!    `{"answer": "..."}` or `{"skip": true}`.
//!
//! Parsing is pure. Anything else is a [`PlanError`].

mod compact;
mod structured;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PlanError, fragment};

/// Default cap on identifiers in one `get` statement.
pub const DEFAULT_MAX_IDS: usize = 50;

// `verb:` at the start of a statement.
static VERB_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^([A-Za-z_][A-Za-z0-9_]*)\s*:(.*)$").expect("verb regex should be valid")
});

/// One requested tool invocation, as written by the planner.
///
/// `tool_input` is whatever the planner supplied; it is checked to be a
/// mapping during normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Tool to invoke
    #[serde(default)]
    pub tool_name: String,
    /// Arguments for the tool
    #[serde(default)]
    pub tool_input: Value,
}

impl Action {
    /// Creates an action.
    pub fn new(tool_name: impl Into<String>, tool_input: Value) -> Self {
        Self { tool_name: tool_name.into(), tool_input }
    }
}

/// The planner's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ParsedPlan {
    /// No tool needed; answer conversationally.
    Skip,
    /// Tools to run, in order.
    Actions(Vec<Action>),
    /// The planner answered directly.
    FinalAnswer(String),
}

/// Parser for planner output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanGrammar {
    max_ids: usize,
}

impl Default for PlanGrammar {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDS)
    }
}

impl PlanGrammar {
    /// Creates a grammar accepting at most `max_ids` identifiers per `get`.
    pub fn new(max_ids: usize) -> Self {
        Self { max_ids }
    }

    /// Identifier cap for one `get` statement.
    pub fn max_ids(&self) -> usize {
        self.max_ids
    }

    /// Parses planner text into a plan.
    pub fn parse(&self, text: &str) -> Result<ParsedPlan, PlanError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PlanError::EmptyPlan);
        }
        if text.eq_ignore_ascii_case("skip") {
            return Ok(ParsedPlan::Skip);
        }

        if let Some((verb, payload)) = split_verb(text) {
            if compact::is_known_verb(&verb) {
                return self.parse_compact(text, &verb, payload);
            }
            // An unknown prefix may still sit in front of a structured plan,
            // e.g. `Plan: {"tool_name": ...}`.
            return match structured::parse(text) {
                Err(PlanError::NotAPlan { .. }) => Err(PlanError::UnknownVerb { verb }),
                other => other,
            };
        }

        structured::parse(text)
    }

    fn parse_compact(&self, text: &str, verb: &str, payload: &str) -> Result<ParsedPlan, PlanError> {
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let multi_statement = lines.len() > 1
            && lines.iter().all(|line| split_verb(line).is_some_and(|(v, _)| compact::is_known_verb(&v)));

        if !multi_statement {
            return Ok(ParsedPlan::Actions(vec![compact::parse_statement(verb, payload, self.max_ids)?]));
        }

        let mut actions = Vec::with_capacity(lines.len());
        for line in lines {
            if let Some((verb, payload)) = split_verb(line) {
                actions.push(compact::parse_statement(&verb, payload, self.max_ids)?);
            }
        }
        Ok(ParsedPlan::Actions(actions))
    }
}

/// Parses planner text with the default identifier cap.
pub fn parse_plan(text: &str) -> Result<ParsedPlan, PlanError> {
    PlanGrammar::default().parse(text)
}

/// Splits `verb:payload`, lower-casing the verb.
fn split_verb(text: &str) -> Option<(String, &str)> {
    let captures = VERB_PREFIX.captures(text)?;
    let verb = captures.get(1)?.as_str().to_ascii_lowercase();
    let payload = captures.get(2)?.as_str();
    Some((verb, payload))
}

pub(crate) fn unrecognized(value: &Value) -> PlanError {
    PlanError::UnrecognizedShape { fragment: fragment(&value.to_string()) }
}
