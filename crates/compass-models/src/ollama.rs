//! Ollama model implementation.
//!
//! This module provides buffered and streamed completions against Ollama's
//! local `/api/generate` endpoint.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use compass_abstraction::{
    Model, ModelError, ModelParameters, ModelResponse, ModelUsage, StreamingModel, TokenStream,
};
use futures::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::retry::RetryPolicy;

/// Default Ollama server URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama model implementation.
#[derive(Debug, Clone)]
pub struct OllamaModel {
    /// The model ID (e.g., "mistral:7b-instruct-v0.3-q4_K_M").
    model_id: String,
    /// The base URL for the Ollama API.
    base_url: String,
    /// Budget for one buffered request.
    timeout: Duration,
    /// Retry policy for opening requests.
    retry: RetryPolicy,
    /// HTTP client for making requests.
    client: Client,
}

impl OllamaModel {
    /// Creates a new `OllamaModel` against the default local server.
    ///
    /// # Errors
    /// Returns a `ModelError` if the HTTP client cannot be created.
    pub fn new(model_id: String) -> Result<Self, ModelError> {
        Self::with_base_url(model_id, DEFAULT_BASE_URL.to_string())
    }

    /// Creates a new `OllamaModel` with a custom base URL.
    ///
    /// # Errors
    /// Returns a `ModelError` if the HTTP client cannot be created.
    pub fn with_base_url(model_id: String, base_url: String) -> Result<Self, ModelError> {
        Self::with_options(model_id, base_url, Duration::from_secs(10), RetryPolicy::default())
    }

    /// Creates a new `OllamaModel` with explicit timeout and retry settings.
    ///
    /// The timeout bounds buffered requests and connection establishment for
    /// streamed ones; an open stream may run longer.
    ///
    /// # Errors
    /// Returns a `ModelError` if the HTTP client cannot be created.
    pub fn with_options(
        model_id: String,
        base_url: String,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ModelError> {
        let client = Client::builder().connect_timeout(timeout).build().map_err(|e| {
            ModelError::RequestError(format!("Failed to build HTTP client: {}", e))
        })?;
        Ok(Self { model_id, base_url: base_url.trim_end_matches('/').to_string(), timeout, retry, client })
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

/// One line of a streamed `/api/generate` response.
#[derive(Deserialize)]
struct OllamaStreamChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaError {
    error: String,
}

impl OllamaModel {
    fn build_options(parameters: Option<ModelParameters>) -> Option<OllamaOptions> {
        parameters.map(|p| OllamaOptions {
            temperature: p.temperature,
            top_p: p.top_p,
            num_predict: p.max_tokens,
            stop: p.stop_sequences,
        })
    }

    fn map_send_error(&self, e: &reqwest::Error) -> ModelError {
        error!(error = %e, base_url = %self.base_url, "Failed to connect to Ollama");
        if e.is_timeout() {
            ModelError::Timeout(format!("Ollama did not respond within {}s", self.timeout.as_secs()))
        } else if e.is_connect() {
            ModelError::RequestError(format!(
                "Ollama server not reachable at {}. Start it with 'ollama serve'.",
                self.base_url
            ))
        } else {
            ModelError::RequestError(format!("Network error: {}", e))
        }
    }

    fn map_status_error(&self, status: reqwest::StatusCode, error_text: &str) -> ModelError {
        error!(status = %status, error = %error_text, "Ollama API returned error status");

        let not_found = || {
            ModelError::ModelResponseError(format!(
                "Model '{}' not found. Pull it with 'ollama pull {}'.",
                self.model_id, self.model_id
            ))
        };

        if let Ok(error_json) = serde_json::from_str::<OllamaError>(error_text) {
            if error_json.error.contains("model") && error_json.error.contains("not found") {
                return not_found();
            }
            if error_json.error.contains("out of memory") || error_json.error.contains("OOM") {
                return ModelError::ModelResponseError(
                    "Insufficient memory to load model. Try a smaller variant.".to_string(),
                );
            }
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            return not_found();
        }
        if status.is_server_error() {
            // 5xx is worth another attempt; the server may still be loading the model.
            return ModelError::RequestError(format!("API error ({}): {}", status, error_text));
        }
        ModelError::ModelResponseError(format!("API error ({}): {}", status, error_text))
    }

    /// Sends one request and returns the response once its status is known to be good.
    async fn send(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
        stream: bool,
    ) -> Result<reqwest::Response, ModelError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model_id,
            prompt,
            stream,
            options: Self::build_options(parameters),
        };

        let mut request = self.client.post(&url).json(&body);
        if !stream {
            request = request.timeout(self.timeout);
        }

        let response = request.send().await.map_err(|e| self.map_send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(self.map_status_error(status, &error_text));
        }
        Ok(response)
    }
}

#[async_trait]
impl Model for OllamaModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.model_id,
            prompt_len = prompt.len(),
            parameters = ?parameters,
            "OllamaModel generating text"
        );

        let ollama_response: OllamaResponse = self
            .retry
            .run("ollama generate", || {
                let parameters = parameters.clone();
                async move {
                    let response = self.send(prompt, parameters, false).await?;
                    response.json::<OllamaResponse>().await.map_err(|e| {
                        error!(error = %e, "Failed to parse Ollama API response");
                        ModelError::SerializationError(format!("Failed to parse response: {}", e))
                    })
                }
            })
            .await?;

        let prompt_tokens = ollama_response.prompt_eval_count.unwrap_or(0);
        let completion_tokens = ollama_response.eval_count.unwrap_or(0);

        Ok(ModelResponse {
            content: ollama_response.response,
            model_id: Some(self.model_id.clone()),
            usage: Some(ModelUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[async_trait]
impl StreamingModel for OllamaModel {
    async fn generate_stream(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<TokenStream, ModelError> {
        debug!(
            model_id = %self.model_id,
            prompt_len = prompt.len(),
            "OllamaModel opening stream"
        );

        let response = self
            .retry
            .run("ollama stream", || self.send(prompt, parameters.clone(), true))
            .await?;

        Ok(Box::pin(NdjsonStream::new(response)))
    }
}

/// Parses Ollama's newline-delimited JSON stream into text fragments.
struct NdjsonStream {
    stream: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    buffer: Vec<u8>,
    done: bool,
}

enum LineOutcome {
    Fragment { text: String, last: bool },
    Skip,
    Finished,
    Failed(ModelError),
}

impl NdjsonStream {
    fn new(response: reqwest::Response) -> Self {
        Self { stream: Box::pin(response.bytes_stream()), buffer: Vec::new(), done: false }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
        line.pop();
        Some(line)
    }

    fn decode_line(line: &[u8]) -> LineOutcome {
        let Ok(text) = std::str::from_utf8(line) else {
            return LineOutcome::Failed(ModelError::SerializationError(
                "Stream line is not valid UTF-8".to_string(),
            ));
        };
        let text = text.trim();
        if text.is_empty() {
            return LineOutcome::Skip;
        }

        match serde_json::from_str::<OllamaStreamChunk>(text) {
            Ok(chunk) => {
                if let Some(message) = chunk.error {
                    return LineOutcome::Failed(ModelError::ModelResponseError(message));
                }
                if chunk.response.is_empty() {
                    if chunk.done { LineOutcome::Finished } else { LineOutcome::Skip }
                } else {
                    LineOutcome::Fragment { text: chunk.response, last: chunk.done }
                }
            }
            Err(e) => LineOutcome::Failed(ModelError::SerializationError(format!(
                "Failed to parse stream chunk: {}",
                e
            ))),
        }
    }
}

impl Stream for NdjsonStream {
    type Item = Result<String, ModelError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.done {
                return Poll::Ready(None);
            }

            if let Some(line) = this.take_line() {
                match Self::decode_line(&line) {
                    LineOutcome::Fragment { text, last } => {
                        this.done = last;
                        return Poll::Ready(Some(Ok(text)));
                    }
                    LineOutcome::Skip => continue,
                    LineOutcome::Finished => {
                        this.done = true;
                        return Poll::Ready(None);
                    }
                    LineOutcome::Failed(err) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(err)));
                    }
                }
            }

            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(ModelError::RequestError(format!(
                        "Stream interrupted: {}",
                        e
                    )))));
                }
                Poll::Ready(None) => {
                    // A final line without a trailing newline still counts.
                    if this.buffer.iter().any(|b| !b.is_ascii_whitespace()) {
                        this.buffer.push(b'\n');
                        continue;
                    }
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_model_new() {
        let model = OllamaModel::new("mistral".to_string()).unwrap();
        assert_eq!(model.model_id(), "mistral");
        assert_eq!(model.base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let model =
            OllamaModel::with_base_url("mistral".to_string(), "http://10.0.0.2:11434/".to_string())
                .unwrap();
        assert_eq!(model.base_url(), "http://10.0.0.2:11434");
    }

    #[test]
    fn test_decode_line_variants() {
        assert!(matches!(
            NdjsonStream::decode_line(br#"{"response":"Hi","done":false}"#),
            LineOutcome::Fragment { ref text, last: false } if text == "Hi"
        ));
        assert!(matches!(
            NdjsonStream::decode_line(br#"{"response":"","done":true}"#),
            LineOutcome::Finished
        ));
        assert!(matches!(NdjsonStream::decode_line(b"   "), LineOutcome::Skip));
        assert!(matches!(
            NdjsonStream::decode_line(br#"{"error":"model crashed"}"#),
            LineOutcome::Failed(ModelError::ModelResponseError(_))
        ));
        assert!(matches!(
            NdjsonStream::decode_line(b"not json"),
            LineOutcome::Failed(ModelError::SerializationError(_))
        ));
    }
}
