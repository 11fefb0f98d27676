//! Model factory for creating model instances from configuration.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use compass_abstraction::{ModelError, ModelParameters, StreamingModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::ollama::DEFAULT_BASE_URL;
use crate::{MockModel, OllamaModel, RetryPolicy};

/// Model type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// Mock model for tests and offline runs.
    Mock,
    /// Ollama local model.
    #[default]
    Ollama,
}

impl FromStr for ModelType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "ollama" | "local" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

/// Model configuration, usually the `[model]` table of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// The type of model to create.
    #[serde(rename = "provider")]
    pub model_type: ModelType,
    /// The model ID.
    pub model_id: String,
    /// Server base URL.
    pub base_url: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion length cap.
    pub max_tokens: u32,
    /// Timeout for a buffered request, in seconds.
    pub timeout_secs: u64,
    /// Total attempts for opening a request.
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_type: ModelType::Ollama,
            model_id: "mistral:7b-instruct-v0.3-q4_K_M".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.3,
            max_tokens: 400,
            timeout_secs: 10,
            max_retries: 3,
        }
    }
}

impl ModelConfig {
    /// Creates a new `ModelConfig` with the given type and model ID.
    #[must_use]
    pub fn new(model_type: ModelType, model_id: String) -> Self {
        Self { model_type, model_id, ..Self::default() }
    }

    /// Sets the base URL for this configuration.
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Generation parameters derived from this configuration.
    pub fn parameters(&self) -> ModelParameters {
        ModelParameters {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..ModelParameters::default()
        }
    }

    /// Retry policy derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.max_retries)
    }
}

/// Factory for creating model instances.
pub struct ModelFactory;

impl ModelFactory {
    /// Creates a model instance from the given configuration.
    ///
    /// # Errors
    /// Returns a `ModelError` if model creation fails.
    pub fn create(config: &ModelConfig) -> Result<Arc<dyn StreamingModel>, ModelError> {
        debug!(
            model_type = ?config.model_type,
            model_id = %config.model_id,
            "Creating model instance"
        );

        match config.model_type {
            ModelType::Mock => Ok(Arc::new(MockModel::new(config.model_id.clone()))),
            ModelType::Ollama => {
                let model = OllamaModel::with_options(
                    config.model_id.clone(),
                    config.base_url.clone(),
                    Duration::from_secs(config.timeout_secs),
                    config.retry_policy(),
                )?;
                Ok(Arc::new(model))
            }
        }
    }

    /// Creates a model instance from a model type string and model ID.
    ///
    /// # Errors
    /// Returns a `ModelError` if the model type is unrecognized or creation fails.
    pub fn create_from_str(
        model_type_str: &str,
        model_id: String,
    ) -> Result<Arc<dyn StreamingModel>, ModelError> {
        let model_type = ModelType::from_str(model_type_str).map_err(|()| {
            error!(model_type = %model_type_str, "Unrecognized model type");
            ModelError::UnsupportedModelProvider(format!(
                "Unrecognized model type: {}",
                model_type_str
            ))
        })?;

        Self::create(&ModelConfig::new(model_type, model_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_type_from_str() {
        assert_eq!(ModelType::from_str("mock"), Ok(ModelType::Mock));
        assert_eq!(ModelType::from_str("OLLAMA"), Ok(ModelType::Ollama));
        assert!(ModelType::from_str("gpt").is_err());
    }

    #[test]
    fn test_config_from_toml_uses_defaults() {
        let config: ModelConfig = toml::from_str("provider = \"mock\"\nmodel_id = \"m\"").unwrap();
        assert_eq!(config.model_type, ModelType::Mock);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.parameters().max_tokens, Some(400));
    }

    #[test]
    fn test_factory_create() {
        let mock = ModelFactory::create_from_str("mock", "mock-model".to_string()).unwrap();
        assert_eq!(mock.model_id(), "mock-model");

        let ollama = ModelFactory::create(&ModelConfig::default()).unwrap();
        assert_eq!(ollama.model_id(), "mistral:7b-instruct-v0.3-q4_K_M");
    }

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let result = ModelFactory::create_from_str("gpt", "x".to_string());
        assert!(matches!(result, Err(ModelError::UnsupportedModelProvider(_))));
    }
}
