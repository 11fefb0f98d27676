// Tool observations collected for the follow-up prompt.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::envelope::{ToolResultEnvelope, ToolStatus};
use crate::tool::ToolInput;

/// Result text used once the total budget is spent.
pub const OMITTED: &str = "[omitted due to total size limit]";

const TRUNCATION_MARK: &str = "... [truncated]";

/// The recorded result of one executed action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    /// Tool that ran
    pub tool: String,
    /// Input it ran with
    pub input: ToolInput,
    /// Envelope status
    pub status: ToolStatus,
    /// Envelope meta
    pub meta: Option<Map<String, Value>>,
    /// Requirement identifiers present in the result
    pub ids: Vec<String>,
    /// Serialized envelope, size-limited
    pub result: String,
    /// The full envelope; kept in memory, never sent to the model
    #[serde(skip)]
    pub raw_result: ToolResultEnvelope,
}

/// Whether another observation fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Keep going
    Available,
    /// The total cap was crossed by the observation just recorded
    Exhausted,
}

/// Ordered, size-bounded observation list.
#[derive(Debug, Clone)]
pub struct ObservationLog {
    observations: Vec<Observation>,
    total_chars: usize,
    per_limit: usize,
    total_limit: usize,
}

impl ObservationLog {
    /// Creates an empty log with the given caps
    pub fn new(per_limit: usize, total_limit: usize) -> Self {
        Self { observations: Vec::new(), total_chars: 0, per_limit, total_limit }
    }

    /// Records one result.
    ///
    /// The serialized envelope is cut to the per-observation cap. The
    /// observation that crosses the total cap is still recorded, with its
    /// result replaced by [`OMITTED`], and [`Budget::Exhausted`] is returned.
    pub fn record(&mut self, tool: &str, input: &ToolInput, envelope: ToolResultEnvelope) -> Budget {
        let serialized = serde_json::to_string(&envelope).unwrap_or_else(|_| format!("{:?}", envelope));
        let mut result = truncate_for_prompt(&serialized, self.per_limit);

        self.total_chars += result.chars().count();
        let budget = if self.total_chars > self.total_limit {
            result = OMITTED.to_string();
            Budget::Exhausted
        } else {
            Budget::Available
        };

        self.observations.push(Observation {
            tool: tool.to_string(),
            input: input.clone(),
            status: envelope.status,
            meta: envelope.meta.clone(),
            ids: result_ids(&envelope.result),
            result,
            raw_result: envelope,
        });
        budget
    }

    /// Recorded observations, in execution order
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Characters counted against the total cap so far
    pub fn total_chars(&self) -> usize {
        self.total_chars
    }

    /// Number of observations
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// JSON array for the follow-up prompt. Raw results are not included.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string(&self.observations).unwrap_or_else(|_| "[]".to_string())
    }

    /// Consumes the log
    pub fn into_observations(self) -> Vec<Observation> {
        self.observations
    }
}

/// Cuts `text` to `limit` characters, marking the cut.
pub fn truncate_for_prompt(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(TRUNCATION_MARK.len() + 5);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARK);
    out
}

/// Identifiers of the entries in a tool result.
fn result_ids(result: &Value) -> Vec<String> {
    let id_of = |item: &Value| item.get("id").and_then(Value::as_str).map(|id| id.trim().to_string());
    match result {
        Value::Array(items) => items.iter().filter_map(id_of).filter(|id| !id.is_empty()).collect(),
        Value::Object(_) => id_of(result).filter(|id| !id.is_empty()).into_iter().collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, text_len: usize) -> ToolResultEnvelope {
        ToolResultEnvelope::success("get", json!({"id": id, "text": "y".repeat(text_len)}))
    }

    #[test]
    fn test_truncate_for_prompt() {
        assert_eq!(truncate_for_prompt("short", 100), "short");

        let cut = truncate_for_prompt(&"a".repeat(200), 100);
        assert_eq!(cut.chars().count(), 95);
        assert!(cut.ends_with("... [truncated]"));
        assert!(cut.starts_with(&"a".repeat(80)));
    }

    #[test]
    fn test_record_extracts_ids_and_meta() {
        let mut log = ObservationLog::new(6000, 24000);
        let envelope = ToolResultEnvelope::success("search", json!([{"id": "1.1"}, {"id": " 1.2 "}, {"text": "x"}]))
            .with_meta("source", json!("sqlite"));

        assert_eq!(log.record("search", &ToolInput::new(), envelope), Budget::Available);

        let observation = &log.observations()[0];
        assert_eq!(observation.ids, vec!["1.1", "1.2"]);
        assert_eq!(observation.meta.as_ref().unwrap()["source"], "sqlite");
        assert_eq!(observation.status, ToolStatus::Success);
    }

    #[test]
    fn test_per_observation_cap() {
        let mut log = ObservationLog::new(100, 24000);
        log.record("get", &ToolInput::new(), entry("1.1", 500));
        let observation = &log.observations()[0];
        assert_eq!(observation.result.chars().count(), 95);
        assert_eq!(observation.raw_result.result["text"].as_str().unwrap().len(), 500);
    }

    #[test]
    fn test_total_cap_marks_crossing_observation() {
        let mut log = ObservationLog::new(100, 250);
        assert_eq!(log.record("get", &ToolInput::new(), entry("1.1", 500)), Budget::Available);
        assert_eq!(log.record("get", &ToolInput::new(), entry("1.2", 500)), Budget::Available);
        assert_eq!(log.record("get", &ToolInput::new(), entry("1.3", 500)), Budget::Exhausted);

        assert_eq!(log.len(), 3);
        assert_eq!(log.observations()[2].result, OMITTED);
        assert_eq!(log.observations()[2].ids, vec!["1.3"]);
    }

    #[test]
    fn test_prompt_json_excludes_raw_result() {
        let mut log = ObservationLog::new(6000, 24000);
        log.record("get", &ToolInput::new(), entry("1.1", 10));
        let json: Value = serde_json::from_str(&log.to_prompt_json()).unwrap();
        let first = &json[0];
        assert!(first.get("raw_result").is_none());
        assert_eq!(first["tool"], "get");
        assert_eq!(first["status"], "success");
        assert!(first["result"].as_str().unwrap().contains("\"id\":\"1.1\""));
    }
}
