//! Planning and tool orchestration for the Compass PCI DSS assistant.
//!
//! A request flows through a fixed set of parts:
//!
//! - [`plan`] parses planner output into a [`ParsedPlan`].
//! - [`normalizer`] bounds and validates the action list.
//! - [`dispatcher`] runs tools from the [`registry`] and normalizes every
//!   outcome into a [`ToolResultEnvelope`].
//! - [`pipeline`] drives the whole request and reports through [`events`].

pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod events;
pub mod identifier;
pub mod normalizer;
pub mod pipeline;
pub mod plan;
pub mod prompts;
pub mod registry;
pub mod store;
pub mod tool;
pub mod tools;

pub use config::{CompassConfig, PipelineConfig, PromptConfig, StoreConfig};
pub use dispatcher::ToolDispatcher;
pub use envelope::{ErrorStage, ToolResultEnvelope, ToolStatus};
pub use error::{OrchestrationError, PlanError, Result};
pub use events::{PipelineStage, Segment, StageLabel, StreamEvent, Transcript};
pub use normalizer::{ActionNormalizer, NormalizedPlan, PlanStep};
pub use pipeline::{EventStream, Observation, ObservationLog, Orchestrator, PipelineState};
pub use plan::{Action, ParsedPlan, PlanGrammar, parse_plan};
pub use prompts::{PromptRenderer, PromptTemplate, PromptVars, TemplateRenderer};
pub use registry::{Capability, ToolDescriptor, ToolRegistry, ToolRegistryBuilder};
pub use store::{
    InMemoryStore, RequirementEntry, RequirementStore, RetrievedDoc, Retriever, SqliteRequirementStore,
    StoreError, open_store,
};
pub use tool::{BlockingTool, FieldIssue, Tool, ToolCall, ToolError, ToolInput, ToolParameters};
pub use tools::{GetRequirementTool, SearchOptions, SearchTool, builtin_registry};
