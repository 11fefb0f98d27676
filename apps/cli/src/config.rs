//! CLI configuration loading and merging.

use std::path::{Path, PathBuf};

use anyhow::Context;
use compass_orchestrator::CompassConfig;
use tracing::debug;

/// Config file picked up from the working directory when `--config` is absent.
pub const LOCAL_CONFIG: &str = "compass.toml";

/// Load and merge CLI configuration.
///
/// Configuration precedence:
/// 1. CLI arguments (`--data`)
/// 2. Environment variables
/// 3. The `--config` file, or `./compass.toml`
/// 4. Defaults
pub fn load_config(path: Option<&Path>, data: Option<&Path>) -> anyhow::Result<CompassConfig> {
    let mut config = match config_path(path) {
        Some(path) => {
            debug!(path = %path.display(), "Loading configuration");
            CompassConfig::load_from_toml(&path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?
        }
        None => CompassConfig::default(),
    };

    config.apply_env().context("Invalid environment override")?;

    if let Some(data) = data {
        config.store.data_file = Some(data.to_path_buf());
        config.store.sqlite_path = None;
    }
    Ok(config)
}

fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(LOCAL_CONFIG);
    local.is_file().then_some(local)
}

/// The configuration as a `[compass]` TOML document.
pub fn render(config: &CompassConfig) -> anyhow::Result<String> {
    let body = toml::to_string_pretty(config).context("Failed to serialize configuration")?;
    let mut document = String::new();
    for line in body.lines() {
        if let Some(table) = line.strip_prefix('[') {
            document.push_str("[compass.");
            document.push_str(table);
        } else {
            document.push_str(line);
        }
        document.push('\n');
    }
    Ok(document)
}
