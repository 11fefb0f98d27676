//! Request orchestration.
//!
//! An [`Orchestrator`] turns one user message into a stream of
//! [`StreamEvent`]s: it asks the model for a plan, parses and normalizes it,
//! runs the tools one after another, and streams a composed answer. Each
//! request runs on its own task and reports through a bounded channel; the
//! returned [`EventStream`] cancels the request when dropped.
//!
//! ```text
//! Start -> Planning -> Smalltalk -> Done
//!                   -> Routing -> Executing -> Composing -> Answering -> Done
//! (any step) -> Errored
//! ```

pub mod observation;
pub mod summary;

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use compass_abstraction::{ModelError, ModelParameters, StreamingModel, TokenStream};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::PipelineConfig;
use crate::dispatcher::ToolDispatcher;
use crate::envelope::{ErrorStage, ToolResultEnvelope};
use crate::events::{PipelineStage, StageLabel, StreamEvent};
use crate::normalizer::{ActionNormalizer, NormalizedPlan, PlanStep};
use crate::plan::{Action, ParsedPlan, PlanGrammar};
use crate::prompts::{PromptRenderer, PromptTemplate, PromptVars, TemplateRenderer};
use crate::tool::ToolCall;

pub use observation::{Budget, Observation, ObservationLog, truncate_for_prompt};
pub use summary::summarize;

/// Notice emitted when the observation budget stops execution.
pub const SIZE_LIMIT_NOTICE: &str = "Further observations omitted due to size limits.";

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Not started
    Start,
    /// Waiting for the plan
    Planning,
    /// Answering without tools
    Smalltalk,
    /// Showing the plan
    Routing,
    /// Running tools
    Executing,
    /// Building the follow-up prompt
    Composing,
    /// Streaming the answer
    Answering,
    /// Finished normally
    Done,
    /// Finished with a terminal error
    Errored,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Planning => "planning",
            Self::Smalltalk => "smalltalk",
            Self::Routing => "routing",
            Self::Executing => "executing",
            Self::Composing => "composing",
            Self::Answering => "answering",
            Self::Done => "done",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Plans, runs tools and composes answers for user messages.
///
/// Cheap to clone; every request gets its own copy of the handles.
#[derive(Clone)]
pub struct Orchestrator {
    model: Arc<dyn StreamingModel>,
    dispatcher: ToolDispatcher,
    prompts: Arc<dyn PromptRenderer>,
    config: PipelineConfig,
    parameters: ModelParameters,
    grammar: PlanGrammar,
    normalizer: ActionNormalizer,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("model", &self.model.model_id())
            .field("tools", &self.dispatcher.registry().names())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with built-in prompts and default limits.
    pub fn new(model: Arc<dyn StreamingModel>, dispatcher: ToolDispatcher) -> Self {
        let config = PipelineConfig::default();
        Self {
            model,
            dispatcher,
            prompts: Arc::new(TemplateRenderer::new()),
            grammar: PlanGrammar::new(config.max_ids),
            normalizer: ActionNormalizer::new(config.max_actions),
            parameters: ModelParameters::default(),
            config,
        }
    }

    /// Uses `config` for the request limits.
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.grammar = PlanGrammar::new(config.max_ids);
        self.normalizer = ActionNormalizer::new(config.max_actions);
        self.config = config;
        self
    }

    /// Uses `prompts` to render prompts.
    #[must_use]
    pub fn with_prompts(mut self, prompts: Arc<dyn PromptRenderer>) -> Self {
        self.prompts = prompts;
        self
    }

    /// Sampling parameters sent with every model request.
    #[must_use]
    pub fn with_parameters(mut self, parameters: ModelParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// The dispatcher, for direct tool calls outside a request
    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// The active limits
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Starts handling `message` and returns its events.
    ///
    /// Must be called from within a Tokio runtime. The request runs on a
    /// spawned task; it stops at its next suspension point once the returned
    /// stream is cancelled or dropped.
    pub fn run(&self, message: impl Into<String>) -> EventStream {
        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let cancel = CancellationToken::new();
        let message = message.into();

        let span = info_span!("request", model = %self.model.model_id(), message_chars = message.chars().count());
        let request = Request {
            orchestrator: self.clone(),
            emitter: Emitter { tx, cancel: cancel.clone() },
            message,
        };
        tokio::spawn(request.drive().instrument(span));

        EventStream { rx, cancel }
    }
}

/// Events of one request, in order.
///
/// The sequence ends when the request finishes. Dropping the stream cancels
/// the request.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
}

impl EventStream {
    /// Asks the request to stop. A tool already running finishes first.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the request was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A token that cancels this request, e.g. for a transport's disconnect handler
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Receives the next event, or `None` once the request is over
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Drains the stream.
    pub async fn collect_events(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The consumer went away or cancelled.
#[derive(Debug)]
struct Cancelled;

enum Interrupt {
    Cancelled,
    Model(ModelError),
}

impl From<Cancelled> for Interrupt {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

struct Emitter {
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl Emitter {
    async fn send(&self, event: StreamEvent) -> Result<(), Cancelled> {
        self.check()?;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Cancelled),
            sent = self.tx.send(event) => sent.map_err(|_| Cancelled),
        }
    }

    fn check(&self) -> Result<(), Cancelled> {
        if self.cancel.is_cancelled() || self.tx.is_closed() {
            return Err(Cancelled);
        }
        Ok(())
    }
}

struct Request {
    orchestrator: Orchestrator,
    emitter: Emitter,
    message: String,
}

impl Request {
    async fn drive(self) {
        self.enter(PipelineState::Start);
        match self.execute().await {
            Ok(state) => info!(state = %state, "Request finished"),
            Err(Cancelled) => info!("Request cancelled"),
        }
    }

    async fn execute(&self) -> Result<PipelineState, Cancelled> {
        self.enter(PipelineState::Planning);
        let plan_text = match self.plan().await {
            Ok(text) => text,
            Err(Interrupt::Cancelled) => return Err(Cancelled),
            Err(Interrupt::Model(e)) => {
                return self.fail(PipelineStage::LlmPlan, format!("Planning failed: {}", e)).await;
            }
        };
        debug!(plan = %plan_text, "Received plan");

        let parsed = match self.orchestrator.grammar.parse(&plan_text) {
            Ok(parsed) => parsed,
            Err(e) => return self.fail(PipelineStage::ParsePlan, format!("Could not parse plan: {}", e)).await,
        };

        match parsed {
            ParsedPlan::Skip => self.smalltalk().await,
            ParsedPlan::FinalAnswer(answer) => {
                self.enter(PipelineState::Answering);
                self.emitter.send(StreamEvent::stage(StageLabel::Answer)).await?;
                self.emitter.send(StreamEvent::answer(answer)).await?;
                Ok(PipelineState::Done)
            }
            ParsedPlan::Actions(actions) => self.route(&plan_text, actions).await,
        }
    }

    async fn plan(&self) -> Result<String, Interrupt> {
        let tool_help = self.orchestrator.dispatcher.registry().overview();
        let prompt = self.orchestrator.prompts.render(
            PromptTemplate::Main,
            &PromptVars { user_input: &self.message, tool_help: &tool_help, ..PromptVars::default() },
        );

        let mut stream = self.open(&prompt).await?;
        let mut text = String::new();
        while let Some(fragment) = self.next_fragment(&mut stream).await? {
            text.push_str(&fragment);
        }
        Ok(text)
    }

    async fn smalltalk(&self) -> Result<PipelineState, Cancelled> {
        self.enter(PipelineState::Smalltalk);
        let prompt = self
            .orchestrator
            .prompts
            .render(PromptTemplate::Smalltalk, &PromptVars { user_input: &self.message, ..PromptVars::default() });

        self.emitter.send(StreamEvent::stage(StageLabel::Answer)).await?;
        self.stream_answer(&prompt, PipelineStage::LlmSmalltalk).await
    }

    async fn route(&self, plan_text: &str, actions: Vec<Action>) -> Result<PipelineState, Cancelled> {
        self.enter(PipelineState::Routing);
        let plan = self.orchestrator.normalizer.normalize(actions);
        if let Some(notice) = plan.truncation_notice() {
            warn!(dropped = plan.dropped, "Plan exceeded the action cap");
            self.emitter.send(StreamEvent::info(notice)).await?;
        }
        if let Some(reason) = plan.emptiness_reason() {
            return self.fail(PipelineStage::ValidatePlan, reason).await;
        }

        self.emitter.send(StreamEvent::stage(StageLabel::Routing)).await?;
        self.emitter.send(StreamEvent::materials(format!("{}\n", plan_text.trim()))).await?;
        self.emitter.send(StreamEvent::stage(StageLabel::Tools)).await?;

        self.enter(PipelineState::Executing);
        let log = self.execute_plan(&plan).await?;
        self.compose(&log).await
    }

    async fn execute_plan(&self, plan: &NormalizedPlan) -> Result<ObservationLog, Cancelled> {
        let config = &self.orchestrator.config;
        let mut log = ObservationLog::new(config.max_per_obs_chars, config.max_total_obs_chars);

        for (idx, step) in plan.steps.iter().enumerate() {
            self.emitter.check()?;
            let call = match step {
                PlanStep::Call(call) => call,
                PlanStep::Rejected { reason, .. } => {
                    warn!(step = idx + 1, reason = %reason, "Skipping invalid action");
                    let message = format!("Invalid action at step {}: {}", idx + 1, reason);
                    self.emitter.send(StreamEvent::error(PipelineStage::ToolValidation, message)).await?;
                    continue;
                }
            };

            let envelope = self.dispatch(call).await?;
            if envelope.is_error() && matches!(envelope.stage, Some(ErrorStage::Import | ErrorStage::Validation)) {
                let message = format!(
                    "{}: {}",
                    call.tool_name,
                    envelope.message.as_deref().unwrap_or("invalid input")
                );
                self.emitter.send(StreamEvent::error(PipelineStage::ToolValidation, message)).await?;
            }

            let narration = summarize(&call.tool_name, &envelope, &call.tool_input);
            self.emitter.send(StreamEvent::materials(narration)).await?;

            if log.record(&call.tool_name, &call.tool_input, envelope) == Budget::Exhausted {
                warn!(total_chars = log.total_chars(), "Observation budget exhausted");
                self.emitter.send(StreamEvent::info(SIZE_LIMIT_NOTICE)).await?;
                break;
            }
        }
        Ok(log)
    }

    async fn dispatch(&self, call: &ToolCall) -> Result<ToolResultEnvelope, Cancelled> {
        debug!(tool_name = %call.tool_name, "Dispatching tool");
        let dispatch = self.orchestrator.dispatcher.dispatch(&call.tool_name, &call.tool_input);
        let timeout_secs = self.orchestrator.config.tool_timeout_secs;
        if timeout_secs == 0 {
            return Ok(dispatch.await);
        }

        match tokio::time::timeout(Duration::from_secs(timeout_secs), dispatch).await {
            Ok(envelope) => Ok(envelope),
            Err(_) => {
                let message = format!("{} failed: timed out after {}s", call.tool_name, timeout_secs);
                error!(tool_name = %call.tool_name, timeout_secs, "Tool timed out");
                self.emitter.send(StreamEvent::error(PipelineStage::ToolExecution, message.clone())).await?;
                Ok(ToolResultEnvelope::error(&call.tool_name, ErrorStage::Runtime, message))
            }
        }
    }

    async fn compose(&self, log: &ObservationLog) -> Result<PipelineState, Cancelled> {
        self.enter(PipelineState::Composing);
        let tool_result = log.to_prompt_json();
        let prompt = self.orchestrator.prompts.render(
            PromptTemplate::Followup,
            &PromptVars { user_input: &self.message, tool_result: &tool_result, ..PromptVars::default() },
        );

        self.emitter.send(StreamEvent::stage(StageLabel::Answer)).await?;
        self.enter(PipelineState::Answering);
        self.stream_answer(&prompt, PipelineStage::LlmFollowup).await
    }

    async fn stream_answer(&self, prompt: &str, stage: PipelineStage) -> Result<PipelineState, Cancelled> {
        let streamed: Result<(), Interrupt> = async {
            let mut stream = self.open(prompt).await?;
            while let Some(fragment) = self.next_fragment(&mut stream).await? {
                if !fragment.is_empty() {
                    self.emitter.send(StreamEvent::answer(fragment)).await?;
                }
            }
            Ok(())
        }
        .await;

        match streamed {
            Ok(()) => Ok(PipelineState::Done),
            Err(Interrupt::Cancelled) => Err(Cancelled),
            Err(Interrupt::Model(e)) => self.fail(stage, format!("Answer generation failed: {}", e)).await,
        }
    }

    async fn open(&self, prompt: &str) -> Result<TokenStream, Interrupt> {
        let parameters = self.orchestrator.parameters.clone();
        tokio::select! {
            biased;
            () = self.emitter.cancel.cancelled() => Err(Interrupt::Cancelled),
            opened = self.orchestrator.model.generate_stream(prompt, Some(parameters)) => opened.map_err(Interrupt::Model),
        }
    }

    async fn next_fragment(&self, stream: &mut TokenStream) -> Result<Option<String>, Interrupt> {
        tokio::select! {
            biased;
            () = self.emitter.cancel.cancelled() => Err(Interrupt::Cancelled),
            item = stream.next() => match item {
                None => Ok(None),
                Some(Ok(fragment)) => Ok(Some(fragment)),
                Some(Err(e)) => Err(Interrupt::Model(e)),
            },
        }
    }

    async fn fail(&self, stage: PipelineStage, message: String) -> Result<PipelineState, Cancelled> {
        error!(stage = stage.as_str(), error = %message, "Request failed");
        self.emitter.send(StreamEvent::error(stage, message)).await?;
        Ok(PipelineState::Errored)
    }

    fn enter(&self, state: PipelineState) {
        debug!(state = %state, "Pipeline state");
    }
}
