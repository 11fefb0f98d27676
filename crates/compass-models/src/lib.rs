//! Model implementations for Compass.
//!
//! This crate provides concrete implementations of the `Model` and
//! `StreamingModel` traits.
//!
//! # Supported Providers
//!
//! - **Mock**: Scripted replies for tests and offline runs
//! - **Ollama**: Local models via Ollama (no API key, local execution)

pub mod factory;
pub mod ollama;
pub mod retry;

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use compass_abstraction::{
    Model, ModelError, ModelParameters, ModelResponse, ModelUsage, StreamingModel, TokenStream,
};
use tracing::debug;

pub use factory::{ModelConfig, ModelFactory, ModelType};
pub use ollama::OllamaModel;
pub use retry::RetryPolicy;

/// A scripted reply for [`MockModel`].
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer with this text.
    Text(String),
    /// Fail before producing anything.
    Fail(ModelError),
    /// Stream `text`, then fail.
    FailMidStream {
        /// Text delivered before the failure.
        text: String,
        /// The error ending the stream.
        error: ModelError,
    },
}

/// A mock model that replays scripted replies in order.
///
/// Once the script is exhausted it echoes the prompt. Every prompt it receives
/// is recorded and can be inspected with [`MockModel::prompts`].
#[derive(Debug, Default)]
pub struct MockModel {
    id: String,
    script: Mutex<VecDeque<MockReply>>,
    prompts: Mutex<Vec<String>>,
}

impl MockModel {
    /// Creates a new `MockModel` with the given ID and no script.
    #[must_use]
    pub fn new(id: String) -> Self {
        Self { id, ..Self::default() }
    }

    /// Creates a `MockModel` that answers with `replies`, one per call.
    #[must_use]
    pub fn with_replies(id: String, replies: impl IntoIterator<Item = MockReply>) -> Self {
        Self { id, script: Mutex::new(replies.into_iter().collect()), prompts: Mutex::default() }
    }

    /// Appends a reply to the script.
    pub fn push_reply(&self, reply: MockReply) {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).push_back(reply);
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn next_reply(&self, prompt: &str) -> MockReply {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).push(prompt.to_string());
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| MockReply::Text(format!("Mock response for: {prompt}")))
    }
}

/// Splits text into word-sized fragments that concatenate back to the input.
fn fragments(text: &str) -> Vec<Result<String, ModelError>> {
    text.split_inclusive(' ').map(|piece| Ok(piece.to_string())).collect()
}

#[async_trait]
impl Model for MockModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.id,
            prompt_len = prompt.len(),
            parameters = ?parameters,
            "MockModel generating text"
        );

        let content = match self.next_reply(prompt) {
            MockReply::Text(text) => text,
            MockReply::Fail(error) | MockReply::FailMidStream { error, .. } => return Err(error),
        };

        let prompt_tokens = count_tokens(prompt);
        let completion_tokens = count_tokens(&content);

        Ok(ModelResponse {
            content,
            model_id: Some(self.id.clone()),
            usage: Some(ModelUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl StreamingModel for MockModel {
    async fn generate_stream(
        &self,
        prompt: &str,
        _parameters: Option<ModelParameters>,
    ) -> Result<TokenStream, ModelError> {
        debug!(model_id = %self.id, prompt_len = prompt.len(), "MockModel opening stream");

        let items = match self.next_reply(prompt) {
            MockReply::Text(text) => fragments(&text),
            MockReply::Fail(error) => return Err(error),
            MockReply::FailMidStream { text, error } => {
                let mut items = fragments(&text);
                items.push(Err(error));
                items
            }
        };
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

/// Count tokens in a string (simplified: word count).
fn count_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}
