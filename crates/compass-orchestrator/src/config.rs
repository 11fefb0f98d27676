// Configuration for the planning pipeline, its tools, and prompts

use std::path::{Path, PathBuf};

use compass_models::{ModelConfig, ModelType};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestrationError, Result};
use crate::tools::search::MAX_K;

/// Safety limits for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Actions kept from one plan; extras are dropped with a notice
    pub max_actions: usize,
    /// Characters of one serialized tool result kept for the follow-up prompt
    pub max_per_obs_chars: usize,
    /// Characters of all tool results kept for the follow-up prompt
    pub max_total_obs_chars: usize,
    /// Identifiers accepted in one `get` statement
    pub max_ids: usize,
    /// Seconds one tool dispatch may take
    pub tool_timeout_secs: u64,
    /// Events buffered between the pipeline task and its consumer
    pub event_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_actions: 6,
            max_per_obs_chars: 6000,
            max_total_obs_chars: 24000,
            max_ids: 50,
            tool_timeout_secs: 30,
            event_buffer: 64,
        }
    }
}

impl PipelineConfig {
    /// Checks that the limits are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_actions == 0 {
            return Err(OrchestrationError::Config("max_actions must be at least 1".to_string()));
        }
        if self.max_ids == 0 {
            return Err(OrchestrationError::Config("max_ids must be at least 1".to_string()));
        }
        if self.max_per_obs_chars < 64 {
            return Err(OrchestrationError::Config("max_per_obs_chars must be at least 64".to_string()));
        }
        if self.max_total_obs_chars < self.max_per_obs_chars {
            return Err(OrchestrationError::Config(
                "max_total_obs_chars must not be smaller than max_per_obs_chars".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(OrchestrationError::Config("event_buffer must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Requirement store and lookup tool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database with a `requirements` table
    pub sqlite_path: Option<PathBuf>,
    /// JSON file with requirement entries, used when no database is set
    pub data_file: Option<PathBuf>,
    /// Default number of search hits
    pub search_top_k: usize,
    /// Whether search hits are enriched from the store
    pub enrich: bool,
    /// Hits enriched per search
    pub enrich_max: usize,
    /// Identifiers accepted by one `get` call
    pub get_max_batch: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            data_file: None,
            search_top_k: 8,
            enrich: true,
            enrich_max: 6,
            get_max_batch: 20,
        }
    }
}

impl StoreConfig {
    /// Checks that the lookup limits are usable.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_K).contains(&self.search_top_k) {
            return Err(OrchestrationError::Config(format!("search_top_k must be between 1 and {}", MAX_K)));
        }
        if !(1..=MAX_K).contains(&self.enrich_max) {
            return Err(OrchestrationError::Config(format!("enrich_max must be between 1 and {}", MAX_K)));
        }
        if self.get_max_batch == 0 {
            return Err(OrchestrationError::Config("get_max_batch must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Prompt template overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Directory holding `main.txt`, `smalltalk.txt` and/or `followup.txt`
    pub dir: Option<PathBuf>,
}

/// Everything a Compass process needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompassConfig {
    /// Request limits
    pub pipeline: PipelineConfig,
    /// Token-generation service
    pub model: ModelConfig,
    /// Requirement data
    pub store: StoreConfig,
    /// Prompt templates
    pub prompts: PromptConfig,
}

impl CompassConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_toml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            OrchestrationError::Config(format!("Failed to read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    ///
    /// Settings may sit at the top level or under a `[compass]` table.
    pub fn from_toml_str(toml_content: &str) -> Result<Self> {
        let toml: toml::Value = toml::from_str(toml_content)
            .map_err(|e| OrchestrationError::Config(format!("Failed to parse TOML: {}", e)))?;

        let config_value = toml.get("compass").cloned().unwrap_or(toml);
        let config = config_value
            .try_into::<Self>()
            .map_err(|e| OrchestrationError::Config(format!("Invalid configuration: {}", e)))?;

        config.pipeline.validate()?;
        config.store.validate()?;
        Ok(config)
    }

    /// Applies environment overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// Recognized: `COMPASS_MODEL_PROVIDER`, `COMPASS_MODEL`, `COMPASS_OLLAMA_URL`,
    /// `COMPASS_DATA_FILE`, `DB_LOCAL_PATH` / `SQLITE_DB_PATH`, `SEARCH_TOP_K`,
    /// `SEARCH_ENRICH_WITH_SQLITE`, `SEARCH_ENRICH_MAX`, `COMPASS_MAX_ACTIONS`,
    /// `COMPASS_PROMPT_DIR`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("COMPASS_MODEL_PROVIDER") {
            self.model.model_type = provider.parse::<ModelType>().map_err(|()| {
                OrchestrationError::Config(format!("COMPASS_MODEL_PROVIDER: unknown provider '{}'", provider))
            })?;
        }
        if let Some(model_id) = lookup("COMPASS_MODEL") {
            self.model.model_id = model_id;
        }
        if let Some(url) = lookup("COMPASS_OLLAMA_URL") {
            self.model.base_url = url;
        }
        if let Some(path) = lookup("COMPASS_DATA_FILE") {
            self.store.data_file = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("DB_LOCAL_PATH").or_else(|| lookup("SQLITE_DB_PATH")) {
            self.store.sqlite_path = Some(PathBuf::from(path));
        }
        if let Some(value) = lookup("SEARCH_TOP_K") {
            self.store.search_top_k = parse_number("SEARCH_TOP_K", &value)?;
        }
        if let Some(value) = lookup("SEARCH_ENRICH_WITH_SQLITE") {
            self.store.enrich = parse_flag(&value);
        }
        if let Some(value) = lookup("SEARCH_ENRICH_MAX") {
            self.store.enrich_max = parse_number("SEARCH_ENRICH_MAX", &value)?;
        }
        if let Some(value) = lookup("COMPASS_MAX_ACTIONS") {
            self.pipeline.max_actions = parse_number("COMPASS_MAX_ACTIONS", &value)?;
        }
        if let Some(dir) = lookup("COMPASS_PROMPT_DIR") {
            self.prompts.dir = Some(PathBuf::from(dir));
        }
        self.pipeline.validate()?;
        self.store.validate()
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| OrchestrationError::Config(format!("{}: expected a number, got '{}'", key, value)))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = CompassConfig::default();
        assert_eq!(config.pipeline.max_actions, 6);
        assert_eq!(config.pipeline.max_per_obs_chars, 6000);
        assert_eq!(config.pipeline.max_total_obs_chars, 24000);
        assert_eq!(config.pipeline.max_ids, 50);
        assert_eq!(config.store.get_max_batch, 20);
        assert_eq!(config.model.model_id, "mistral:7b-instruct-v0.3-q4_K_M");
    }

    #[test]
    fn test_from_toml_with_section() {
        let toml = r#"
[compass.pipeline]
max_actions = 3

[compass.model]
provider = "mock"
"#;
        let config = CompassConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.pipeline.max_actions, 3);
        assert_eq!(config.pipeline.max_ids, 50);
        assert_eq!(config.model.model_type, ModelType::Mock);
    }

    #[test]
    fn test_from_toml_top_level() {
        let config = CompassConfig::from_toml_str("[store]\nsearch_top_k = 4\n").unwrap();
        assert_eq!(config.store.search_top_k, 4);
        assert!(config.store.enrich);
    }

    #[test]
    fn test_invalid_limits_are_rejected() {
        let err = CompassConfig::from_toml_str("[pipeline]\nmax_actions = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_actions"));

        let err = CompassConfig::from_toml_str("[pipeline]\nmax_actions = \"six\"\n").unwrap_err();
        assert!(matches!(err, OrchestrationError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("COMPASS_MODEL_PROVIDER", "mock"),
            ("DB_LOCAL_PATH", "/data/pci.sqlite"),
            ("SEARCH_TOP_K", "5"),
            ("SEARCH_ENRICH_WITH_SQLITE", "0"),
        ]
        .into_iter()
        .collect();

        let mut config = CompassConfig::default();
        config.apply_env_with(|key| env.get(key).map(ToString::to_string)).unwrap();

        assert_eq!(config.model.model_type, ModelType::Mock);
        assert_eq!(config.store.sqlite_path, Some(PathBuf::from("/data/pci.sqlite")));
        assert_eq!(config.store.search_top_k, 5);
        assert!(!config.store.enrich);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = CompassConfig::default();
        let err = config
            .apply_env_with(|key| (key == "SEARCH_TOP_K").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("SEARCH_TOP_K"));
    }

    #[test]
    fn test_search_limits_are_checked() {
        for (key, value) in [("SEARCH_TOP_K", "0"), ("SEARCH_TOP_K", "51"), ("SEARCH_ENRICH_MAX", "0")] {
            let mut config = CompassConfig::default();
            let err = config.apply_env_with(|k| (k == key).then(|| value.to_string())).unwrap_err();
            assert!(matches!(err, OrchestrationError::Config(_)), "{key}={value} gave {err}");
        }

        let err = CompassConfig::from_toml_str("[store]\nsearch_top_k = 0\n").unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: search_top_k must be between 1 and 50");

        let err = CompassConfig::from_toml_str("[store]\nget_max_batch = 0\n").unwrap_err();
        assert!(err.to_string().contains("get_max_batch"));

        let config = CompassConfig::from_toml_str("[store]\nsearch_top_k = 50\n").unwrap();
        assert_eq!(config.store.search_top_k, 50);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compass.toml");
        std::fs::write(&path, "[pipeline]\nmax_total_obs_chars = 12000\n").unwrap();

        let config = CompassConfig::load_from_toml(&path).unwrap();
        assert_eq!(config.pipeline.max_total_obs_chars, 12000);

        assert!(CompassConfig::load_from_toml(dir.path().join("missing.toml")).is_err());
    }
}
