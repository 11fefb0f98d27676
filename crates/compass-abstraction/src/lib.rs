//! Token-generation abstraction layer for Compass.
//!
//! This module defines the traits and types the orchestration core uses to talk
//! to a language model. Implementations live in `compass-models`.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error that can occur when interacting with a language model.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// An error occurred during the request (e.g., connection refused, bad status).
    #[error("Request Error: {0}")]
    RequestError(String),

    /// The model returned an error payload or an unusable response.
    #[error("Model Response Error: {0}")]
    ModelResponseError(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization Error: {0}")]
    SerializationError(String),

    /// The request did not complete within the configured timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The model provider is not supported or configured.
    #[error("Unsupported Model Provider: {0}")]
    UnsupportedModelProvider(String),

    /// Other unexpected errors.
    #[error("Other Model Error: {0}")]
    Other(String),
}

impl ModelError {
    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Connection and timeout failures are transient; a model that answered
    /// with an error or garbage will answer the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RequestError(_) | Self::Timeout(_))
    }
}

/// Parameters for controlling the model's generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParameters {
    /// Sampling temperature. Lower values give more deterministic output.
    pub temperature: Option<f32>,

    /// Nucleus sampling mass.
    pub top_p: Option<f32>,

    /// The maximum number of tokens to generate.
    pub max_tokens: Option<u32>,

    /// Sequences where generation stops.
    pub stop_sequences: Option<Vec<String>>,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self { temperature: Some(0.3), top_p: None, max_tokens: Some(400), stop_sequences: None }
    }
}

/// A buffered completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The generated content.
    pub content: String,

    /// Optional: The ID of the model used to generate the response.
    pub model_id: Option<String>,

    /// Optional: Usage statistics for the request.
    pub usage: Option<ModelUsage>,
}

/// Usage statistics for a model request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUsage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,

    /// Number of tokens in the completion.
    pub completion_tokens: u32,

    /// Total number of tokens used.
    pub total_tokens: u32,
}

/// An incremental sequence of text fragments.
///
/// An `Err` item ends the completion; consumers should stop polling after it.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ModelError>> + Send>>;

/// A trait for buffered text generation.
///
/// All models must be `Send + Sync` to allow concurrent use across requests.
#[async_trait]
pub trait Model: Send + Sync {
    /// Generates a complete text response for the given prompt.
    ///
    /// # Errors
    /// Returns a `ModelError` if generation fails.
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError>;

    /// Returns the ID of the model.
    fn model_id(&self) -> &str;
}

/// A model that can stream its completion fragment by fragment.
#[async_trait]
pub trait StreamingModel: Model {
    /// Opens a streamed completion.
    ///
    /// Failing to open the stream is reported here; failures after the first
    /// fragment arrive as an `Err` item on the returned stream.
    ///
    /// # Errors
    /// Returns a `ModelError` if the stream cannot be opened.
    async fn generate_stream(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<TokenStream, ModelError>;
}

/// Drains a token stream into one string, stopping at the first error.
///
/// # Errors
/// Returns the first `ModelError` yielded by the stream.
pub async fn collect_stream(mut stream: TokenStream) -> Result<String, ModelError> {
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        text.push_str(&fragment?);
    }
    Ok(text)
}
