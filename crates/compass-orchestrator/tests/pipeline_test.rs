//! End-to-end tests for request orchestration
//!
//! These drive `Orchestrator::run` with a scripted model and check the event
//! sequences a transport would see.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use compass_abstraction::ModelError;
use compass_models::{MockModel, MockReply};
use compass_orchestrator::pipeline::SIZE_LIMIT_NOTICE;
use compass_orchestrator::{
    InMemoryStore, Orchestrator, PipelineStage, RequirementEntry, Segment, StageLabel,
    StoreConfig, StreamEvent, Tool, ToolDispatcher, ToolError, ToolInput, ToolRegistry, Transcript,
    builtin_registry,
};
use futures::StreamExt;
use serde_json::{Value, json};

// Counts its calls and returns `size` characters of text
struct Counter {
    name: &'static str,
    calls: Arc<AtomicUsize>,
    size: usize,
    delay: Duration,
}

#[async_trait]
impl Tool for Counter {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Counts calls."
    }

    async fn run(&self, _input: &ToolInput) -> Result<Value, ToolError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(json!({"id": format!("1.{call}"), "text": "z".repeat(self.size)}))
    }
}

struct Panicky;

#[async_trait]
impl Tool for Panicky {
    fn name(&self) -> &str {
        "panicky"
    }

    fn description(&self) -> &str {
        "Panics."
    }

    async fn run(&self, _input: &ToolInput) -> Result<Value, ToolError> {
        panic!("vector index corrupted")
    }
}

fn counter(name: &'static str, size: usize, delay: Duration) -> (Arc<dyn Tool>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let tool = Counter { name, calls: Arc::clone(&calls), size, delay };
    (Arc::new(tool), calls)
}

fn model(replies: &[&str]) -> Arc<MockModel> {
    Arc::new(MockModel::with_replies(
        "mock".to_string(),
        replies.iter().map(|reply| MockReply::Text((*reply).to_string())),
    ))
}

fn orchestrator(model: Arc<MockModel>, registry: ToolRegistry) -> Orchestrator {
    Orchestrator::new(model, ToolDispatcher::new(Arc::new(registry)))
}

fn plan_of(tool: &str, count: usize) -> String {
    let actions: Vec<Value> = (0..count).map(|_| json!({"tool_name": tool, "tool_input": {}})).collect();
    Value::Array(actions).to_string()
}

fn requirements() -> InMemoryStore {
    InMemoryStore::new([
        RequirementEntry::new("3.5.1", "PAN is rendered unreadable anywhere it is stored."),
        RequirementEntry::new("8.3.6", "Passwords are at least 12 characters long."),
    ])
}

#[tokio::test]
async fn test_skip_streams_smalltalk_only() {
    let model = model(&["  Skip ", "Hello! Ask me about PCI DSS."]);
    let registry = builtin_registry(Arc::new(requirements()), None, &StoreConfig::default());

    let events = orchestrator(model.clone(), registry).run("hi there").collect_events().await;

    assert_eq!(events[0], StreamEvent::stage(StageLabel::Answer));
    assert!(events[1..].iter().all(|e| matches!(e, StreamEvent::Token { segment: Segment::Answer, .. })));
    let transcript: Transcript = events.iter().collect();
    assert_eq!(transcript.answer, "Hello! Ask me about PCI DSS.");
    assert!(transcript.materials.is_empty());
    assert!(!transcript.stages.contains(&StageLabel::Tools));

    let prompts = model.prompts();
    assert!(prompts[1].contains("User message: hi there"));
    assert!(!prompts[1].contains("- get:"));
}

#[tokio::test]
async fn test_get_flow_end_to_end() {
    let model = model(&["get:[\"3.5.1\", \"8.3.6\"]", "See 3.5.1 and 8.3.6."]);
    let registry = builtin_registry(Arc::new(requirements()), None, &StoreConfig::default());

    let events = orchestrator(model.clone(), registry).run("What do 3.5.1 and 8.3.6 say?").collect_events().await;

    assert_eq!(events[0], StreamEvent::stage(StageLabel::Routing));
    assert_eq!(events[1], StreamEvent::materials("get:[\"3.5.1\", \"8.3.6\"]\n"));
    assert_eq!(events[2], StreamEvent::stage(StageLabel::Tools));
    assert_eq!(
        events[3],
        StreamEvent::materials(
            "\n- 3.5.1: PAN is rendered unreadable anywhere it is stored.\n- 8.3.6: Passwords are at least 12 characters long.\n"
        )
    );
    assert_eq!(events[4], StreamEvent::stage(StageLabel::Answer));

    let transcript: Transcript = events.iter().collect();
    assert_eq!(transcript.answer, "See 3.5.1 and 8.3.6.");
    assert!(transcript.errors.is_empty());

    let followup = &model.prompts()[1];
    assert!(followup.contains("User question: What do 3.5.1 and 8.3.6 say?"));
    assert!(followup.contains("\"ids\":[\"3.5.1\",\"8.3.6\"]"));
    assert!(!followup.contains("raw_result"));
}

#[tokio::test]
async fn test_plan_is_truncated_to_six_actions() {
    let (tool, calls) = counter("count", 10, Duration::ZERO);
    let registry = ToolRegistry::builder().register(tool).build();
    let model = model(&[&plan_of("count", 9), "ok"]);

    let events = orchestrator(model, registry).run("lots").collect_events().await;
    let transcript: Transcript = events.iter().collect();

    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert_eq!(transcript.notices, vec!["Action list truncated to 6 steps for safety.".to_string()]);
    assert_eq!(transcript.answer, "ok");
}

#[tokio::test]
async fn test_panicking_tool_does_not_stop_the_loop() {
    let (tool, calls) = counter("count", 10, Duration::ZERO);
    let registry = ToolRegistry::builder().register(Arc::new(Panicky)).register(tool).build();
    let plan = json!([
        {"tool_name": "panicky", "tool_input": {}},
        {"tool_name": "count", "tool_input": {}}
    ]);
    let model = model(&[&plan.to_string(), "partial answer"]);

    let events = orchestrator(model, registry).run("go").collect_events().await;
    let transcript: Transcript = events.iter().collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(transcript.materials.contains("Tool error: tool panicked: vector index corrupted"));
    assert!(!transcript.failed());
    assert_eq!(transcript.answer, "partial answer");
}

#[tokio::test]
async fn test_total_observation_budget_stops_execution() {
    let (tool, calls) = counter("big", 7000, Duration::ZERO);
    let registry = ToolRegistry::builder().register(tool).build();
    let model = model(&[&plan_of("big", 6), "summary"]);

    let events = orchestrator(model.clone(), registry).run("everything").collect_events().await;

    // four truncated results fit in 24000 characters; the fifth crosses the cap
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    let notice = events.iter().position(|e| *e == StreamEvent::info(SIZE_LIMIT_NOTICE)).unwrap();
    let answer = events.iter().position(|e| *e == StreamEvent::stage(StageLabel::Answer)).unwrap();
    assert!(notice < answer);
    assert!(model.prompts()[1].contains("[omitted due to total size limit]"));
}

#[tokio::test]
async fn test_unparseable_plan_is_one_terminal_error() {
    for plan in ["I think you should look at the firewall rules.", "get:[\"13\"]", "fetch:\"3.5.1\""] {
        let model = model(&[plan]);
        let events = orchestrator(model.clone(), ToolRegistry::default()).run("q").collect_events().await;

        assert_eq!(events.len(), 1, "plan {plan:?} gave {events:?}");
        assert!(matches!(&events[0], StreamEvent::Error { stage: PipelineStage::ParsePlan, .. }));
        assert_eq!(model.prompts().len(), 1);
    }
}

#[tokio::test]
async fn test_planner_unreachable() {
    let model = Arc::new(MockModel::with_replies(
        "mock".to_string(),
        [MockReply::Fail(ModelError::RequestError("connection refused".to_string()))],
    ));
    let events = orchestrator(model, ToolRegistry::default()).run("q").collect_events().await;

    assert_eq!(events.len(), 1);
    let StreamEvent::Error { stage, message } = &events[0] else { panic!("expected an error, got {events:?}") };
    assert_eq!(*stage, PipelineStage::LlmPlan);
    assert!(message.contains("connection refused"));
}

#[tokio::test]
async fn test_plan_without_valid_actions() {
    let model = model(&["[{\"tool_input\": {\"id\": \"1.1\"}}]"]);
    let events = orchestrator(model, ToolRegistry::default()).run("q").collect_events().await;

    assert_eq!(
        events,
        vec![StreamEvent::error(
            PipelineStage::ValidatePlan,
            "Plan contained no valid actions (step 1: missing tool_name)."
        )]
    );

    let empty = orchestrator(self::model(&["[]"]), ToolRegistry::default()).run("q").collect_events().await;
    assert_eq!(empty, vec![StreamEvent::error(PipelineStage::ValidatePlan, "Plan contained no actions.")]);
}

#[tokio::test]
async fn test_get_without_valid_identifiers_is_not_dispatched() {
    let registry = || builtin_registry(Arc::new(requirements()), None, &StoreConfig::default());

    let only_bad = model(&[r#"{"tool_name": "get", "tool_input": {"id": "13.1"}}"#]);
    let events = orchestrator(only_bad, registry()).run("q").collect_events().await;
    assert_eq!(
        events,
        vec![StreamEvent::error(
            PipelineStage::ValidatePlan,
            r#"Plan contained no valid actions (step 1: get: no valid requirement identifiers in {"id":"13.1"})."#
        )]
    );

    let plan = json!([
        {"tool_name": "get", "tool_input": {"id": "the firewall one"}},
        {"tool_name": "get", "tool_input": {"id": "8.3.6"}}
    ]);
    let mixed = model(&[&plan.to_string(), "Twelve characters."]);
    let events = orchestrator(mixed, registry()).run("q").collect_events().await;
    let transcript: Transcript = events.iter().collect();

    assert_eq!(
        transcript.errors,
        vec![(
            PipelineStage::ToolValidation,
            r#"Invalid action at step 1: get: no valid requirement identifiers in {"id":"the firewall one"}"#
                .to_string()
        )]
    );
    assert!(transcript.materials.contains("Passwords are at least 12 characters long."));
    assert_eq!(transcript.answer, "Twelve characters.");
}

#[tokio::test]
async fn test_per_action_errors_do_not_end_the_request() {
    let (tool, calls) = counter("count", 10, Duration::ZERO);
    let registry = ToolRegistry::builder().register(tool).build();
    let plan = json!([
        {"tool_input": {}},
        {"tool_name": "nope", "tool_input": {}},
        {"tool_name": "count", "tool_input": {}}
    ]);
    let model = model(&[&plan.to_string(), "done"]);

    let events = orchestrator(model, registry).run("q").collect_events().await;
    let transcript: Transcript = events.iter().collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        transcript.errors,
        vec![
            (PipelineStage::ToolValidation, "Invalid action at step 1: missing tool_name".to_string()),
            (PipelineStage::ToolValidation, "nope: Unknown tool 'nope'".to_string()),
        ]
    );
    assert!(!transcript.failed());
    assert_eq!(transcript.answer, "done");
}

#[tokio::test]
async fn test_followup_failure_mid_stream() {
    let model = Arc::new(MockModel::with_replies(
        "mock".to_string(),
        [
            MockReply::Text("search:\"password length\"".to_string()),
            MockReply::FailMidStream {
                text: "Passwords must ".to_string(),
                error: ModelError::Timeout("no data for 10s".to_string()),
            },
        ],
    ));
    let registry = builtin_registry(Arc::new(requirements()), None, &StoreConfig::default());

    let events = orchestrator(model, registry).run("How long must passwords be?").collect_events().await;
    let transcript: Transcript = events.iter().collect();

    assert!(transcript.materials.contains("Retrieved materials"));
    assert_eq!(transcript.answer, "Passwords must ");
    assert!(matches!(events.last(), Some(StreamEvent::Error { stage: PipelineStage::LlmFollowup, .. })));
    assert!(transcript.failed());
}

#[tokio::test]
async fn test_cancel_stops_before_next_tool() {
    let (tool, calls) = counter("slow", 10, Duration::from_millis(200));
    let registry = ToolRegistry::builder().register(tool).build();
    let model = model(&[&plan_of("slow", 3), "never"]);

    let mut stream = orchestrator(model, registry).run("q");
    while let Some(event) = stream.next().await {
        if event == StreamEvent::stage(StageLabel::Tools) {
            stream.cancel();
            break;
        }
    }
    let rest: Vec<StreamEvent> = stream.collect().await;

    assert!(calls.load(Ordering::SeqCst) <= 1);
    assert!(!rest.contains(&StreamEvent::stage(StageLabel::Answer)));
}

#[tokio::test]
async fn test_dropping_the_stream_cancels() {
    let (tool, calls) = counter("slow", 10, Duration::from_millis(100));
    let registry = ToolRegistry::builder().register(tool).build();
    let model = model(&[&plan_of("slow", 6), "never"]);

    let mut stream = orchestrator(model, registry).run("q");
    assert_eq!(stream.next().await, Some(StreamEvent::stage(StageLabel::Routing)));
    drop(stream);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(calls.load(Ordering::SeqCst) <= 1);
}

#[tokio::test]
async fn test_events_serialize_as_ndjson() {
    let model = model(&["skip", "Hi"]);
    let events = orchestrator(model, ToolRegistry::default()).run("hello").collect_events().await;

    let wire: String = events.iter().map(StreamEvent::to_ndjson_line).collect();
    assert_eq!(
        wire,
        "{\"type\":\"stage\",\"label\":\"Answer\"}\n{\"type\":\"token\",\"segment\":\"answer\",\"text\":\"Hi\"}\n"
    );
}
