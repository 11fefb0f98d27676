//! Event model for streaming pipeline progress to clients.
//!
//! This is the contract between the orchestrator and any transport. Events are
//! delivered in causal order; a transport serializes each one as it arrives
//! (see [`StreamEvent::to_ndjson_line`]) and the end of the sequence is the end
//! of the request.

use serde::{Deserialize, Serialize};

/// Phase marker for progress displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageLabel {
    /// The plan is being shown
    Routing,
    /// Tools are running
    Tools,
    /// The answer is being written
    Answer,
}

impl std::fmt::Display for StageLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Routing => "Routing",
            Self::Tools => "Tools",
            Self::Answer => "Answer",
        })
    }
}

/// Text channel a token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    /// Narration of the plan and tool activity
    Materials,
    /// The composed answer
    Answer,
}

/// Pipeline step an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Requesting the plan
    LlmPlan,
    /// Parsing planner output
    ParsePlan,
    /// The plan named no usable action
    ValidatePlan,
    /// One action was malformed or rejected by its tool
    ToolValidation,
    /// One action failed to execute
    ToolExecution,
    /// Streaming the conversational answer
    LlmSmalltalk,
    /// Streaming the composed answer
    LlmFollowup,
}

impl PipelineStage {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LlmPlan => "llm_plan",
            Self::ParsePlan => "parse_plan",
            Self::ValidatePlan => "validate_plan",
            Self::ToolValidation => "tool_validation",
            Self::ToolExecution => "tool_execution",
            Self::LlmSmalltalk => "llm_smalltalk",
            Self::LlmFollowup => "llm_followup",
        }
    }

    /// Whether an error at this stage ends the request
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::ToolValidation | Self::ToolExecution)
    }
}

/// One event of the pipeline's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A phase transition
    Stage {
        /// Phase entered
        label: StageLabel,
    },

    /// An incremental fragment of text
    Token {
        /// Channel
        segment: Segment,
        /// Fragment
        text: String,
    },

    /// A non-fatal notice
    Info {
        /// Notice text
        message: String,
    },

    /// A failure, per-action or terminal depending on the stage
    Error {
        /// Where it happened
        stage: PipelineStage,
        /// What happened
        message: String,
    },
}

impl StreamEvent {
    /// Stage marker
    pub fn stage(label: StageLabel) -> Self {
        Self::Stage { label }
    }

    /// Materials-channel token
    pub fn materials(text: impl Into<String>) -> Self {
        Self::Token { segment: Segment::Materials, text: text.into() }
    }

    /// Answer-channel token
    pub fn answer(text: impl Into<String>) -> Self {
        Self::Token { segment: Segment::Answer, text: text.into() }
    }

    /// Notice
    pub fn info(message: impl Into<String>) -> Self {
        Self::Info { message: message.into() }
    }

    /// Error
    pub fn error(stage: PipelineStage, message: impl Into<String>) -> Self {
        Self::Error { stage, message: message.into() }
    }

    /// One line of newline-delimited JSON, including the trailing newline.
    pub fn to_ndjson_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({"type": "error", "stage": "llm_followup", "message": e.to_string()}).to_string()
        });
        line.push('\n');
        line
    }
}

/// Reassembles a request's text from its events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    /// Concatenated materials tokens
    pub materials: String,
    /// Concatenated answer tokens
    pub answer: String,
    /// Stages in the order they were entered
    pub stages: Vec<StageLabel>,
    /// Info messages
    pub notices: Vec<String>,
    /// Errors with their stage
    pub errors: Vec<(PipelineStage, String)>,
}

impl Transcript {
    /// Folds one event in
    pub fn push(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Stage { label } => self.stages.push(*label),
            StreamEvent::Token { segment: Segment::Materials, text } => self.materials.push_str(text),
            StreamEvent::Token { segment: Segment::Answer, text } => self.answer.push_str(text),
            StreamEvent::Info { message } => self.notices.push(message.clone()),
            StreamEvent::Error { stage, message } => self.errors.push((*stage, message.clone())),
        }
    }

    /// Whether the request ended in a terminal error
    pub fn failed(&self) -> bool {
        self.errors.iter().any(|(stage, _)| stage.is_terminal())
    }
}

impl<'a> FromIterator<&'a StreamEvent> for Transcript {
    fn from_iter<I: IntoIterator<Item = &'a StreamEvent>>(iter: I) -> Self {
        let mut transcript = Self::default();
        for event in iter {
            transcript.push(event);
        }
        transcript
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        assert_eq!(
            serde_json::to_value(StreamEvent::stage(StageLabel::Tools)).unwrap(),
            json!({"type": "stage", "label": "Tools"})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::materials("plan\n")).unwrap(),
            json!({"type": "token", "segment": "materials", "text": "plan\n"})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::error(PipelineStage::ParsePlan, "bad")).unwrap(),
            json!({"type": "error", "stage": "parse_plan", "message": "bad"})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::info("note")).unwrap(),
            json!({"type": "info", "message": "note"})
        );
    }

    #[test]
    fn test_ndjson_line_round_trip() {
        let event = StreamEvent::answer("Hi");
        let line = event.to_ndjson_line();
        assert!(line.ends_with('\n'));
        let back: StreamEvent = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_transcript_concatenates_by_segment() {
        let events = vec![
            StreamEvent::stage(StageLabel::Routing),
            StreamEvent::materials("get:\"1.1\"\n"),
            StreamEvent::stage(StageLabel::Answer),
            StreamEvent::answer("Req "),
            StreamEvent::materials("- 1.1: text\n"),
            StreamEvent::answer("1.1."),
            StreamEvent::error(PipelineStage::ToolValidation, "step 2"),
        ];
        let transcript: Transcript = events.iter().collect();

        assert_eq!(transcript.answer, "Req 1.1.");
        assert_eq!(transcript.materials, "get:\"1.1\"\n- 1.1: text\n");
        assert_eq!(transcript.stages, vec![StageLabel::Routing, StageLabel::Answer]);
        assert!(!transcript.failed());
    }

    #[test]
    fn test_terminal_stages() {
        assert!(PipelineStage::LlmPlan.is_terminal());
        assert!(PipelineStage::ValidatePlan.is_terminal());
        assert!(!PipelineStage::ToolExecution.is_terminal());
        assert_eq!(PipelineStage::LlmFollowup.as_str(), "llm_followup");
    }
}
