//! Command implementations for the Compass CLI.

pub mod ask;
pub mod chat;
pub mod event_renderer;
pub mod parse;
pub mod tool;
pub mod tools;

use std::sync::Arc;

use anyhow::Context;
use compass_models::ModelFactory;
use compass_orchestrator::{
    CompassConfig, Orchestrator, PromptRenderer, TemplateRenderer, ToolDispatcher, builtin_registry, open_store,
};

/// Dispatcher over the built-in tools and the configured store.
pub fn build_dispatcher(config: &CompassConfig) -> anyhow::Result<ToolDispatcher> {
    let store = open_store(&config.store).context("Failed to open the requirement store")?;
    let registry = builtin_registry(store, None, &config.store);
    Ok(ToolDispatcher::new(Arc::new(registry)))
}

/// Orchestrator wired from `config`: model, tools, prompts and limits.
pub fn build_orchestrator(config: &CompassConfig) -> anyhow::Result<Orchestrator> {
    let model = ModelFactory::create(&config.model).context("Failed to create the model")?;
    let prompts: Arc<dyn PromptRenderer> = match &config.prompts.dir {
        Some(dir) => Arc::new(TemplateRenderer::from_dir(dir).context("Failed to load prompt templates")?),
        None => Arc::new(TemplateRenderer::new()),
    };

    Ok(Orchestrator::new(model, build_dispatcher(config)?)
        .with_config(config.pipeline.clone())
        .with_prompts(prompts)
        .with_parameters(config.model.parameters()))
}
