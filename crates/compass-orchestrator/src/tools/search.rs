//! `search`: requirements by topic.
//!
//! Semantic retrieval runs first when a [`Retriever`] is configured; its hits
//! are filled in from the store. When it finds nothing, or fails, the store's
//! keyword search answers instead.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::envelope::{ToolResultEnvelope, ToolStatus};
use crate::store::{RequirementEntry, RequirementStore, RetrievedDoc, Retriever, StoreError};
use crate::tool::{Tool, ToolError, ToolInput, ToolParameters, get_str};

/// Largest `k` a search accepts
pub const MAX_K: usize = 50;

/// Search settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    /// Hits returned when the caller gives no `k`
    pub top_k: usize,
    /// Fill retriever hits in from the store unless the caller says otherwise
    pub enrich: bool,
    /// Retriever hits filled in per call
    pub enrich_max: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { top_k: 8, enrich: true, enrich_max: 6 }
    }
}

/// Topic search over requirements.
pub struct SearchTool {
    store: Arc<dyn RequirementStore>,
    retriever: Option<Arc<dyn Retriever>>,
    options: SearchOptions,
}

impl SearchTool {
    /// Keyword-only search over `store`
    pub fn new(store: Arc<dyn RequirementStore>, options: SearchOptions) -> Self {
        Self { store, retriever: None, options }
    }

    /// Adds a semantic retriever, consulted before keyword search
    #[must_use]
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    fn top_k(&self, input: &ToolInput) -> Result<usize, ToolError> {
        match input.get("k") {
            None | Some(Value::Null) => Ok(self.options.top_k),
            Some(value) => match value.as_u64().and_then(|k| usize::try_from(k).ok()) {
                Some(k) if (1..=MAX_K).contains(&k) => Ok(k),
                _ => Err(ToolError::invalid("k", format!("must be an integer between 1 and {}", MAX_K))),
            },
        }
    }

    fn enrich(&self, input: &ToolInput) -> Result<bool, ToolError> {
        match input.get("enrich") {
            None | Some(Value::Null) => Ok(self.options.enrich),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(_) => Err(ToolError::invalid("enrich", "must be a boolean")),
        }
    }

    async fn blocking<T, F>(&self, operation: F) -> Result<T, ToolError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RequirementStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let outcome = tokio::task::spawn_blocking(move || operation(store.as_ref()))
            .await
            .map_err(|e| ToolError::Execution(format!("store task failed: {}", e)))?;
        outcome.map_err(|e| ToolError::Execution(e.to_string()))
    }

    async fn from_retriever(&self, docs: Vec<RetrievedDoc>, k: usize, enrich: bool) -> Vec<RequirementEntry> {
        let docs: Vec<RetrievedDoc> = docs
            .into_iter()
            .filter_map(|mut doc| {
                doc.id = doc.id.trim().trim_end_matches('.').to_string();
                (!doc.id.is_empty()).then_some(doc)
            })
            .take(k)
            .collect();

        let mut by_id = std::collections::HashMap::new();
        if enrich {
            let ids: Vec<String> = docs.iter().take(self.options.enrich_max).map(|doc| doc.id.clone()).collect();
            match self.blocking(move |store| store.fetch_many(&ids)).await {
                Ok(found) => by_id = found,
                Err(e) => warn!(error = %e, "Could not enrich search hits"),
            }
        }

        docs.into_iter()
            .map(|doc| match by_id.remove(&doc.id) {
                Some(entry) => entry,
                None => RequirementEntry::new(doc.id, doc.text.unwrap_or_default()),
            })
            .collect()
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Find PCI DSS requirements about a topic."
    }

    fn parameters(&self) -> ToolParameters {
        ToolParameters::new()
            .add_property("query", "string", "What to look for", true)
            .add_property("k", "integer", "Number of hits, 1 to 50", false)
    }

    async fn run(&self, input: &ToolInput) -> Result<Value, ToolError> {
        let query = get_str(input, "q").or_else(|| get_str(input, "query")).unwrap_or_default().to_string();
        let k = self.top_k(input)?;
        let enrich = self.enrich(input)?;

        if query.is_empty() {
            let envelope = ToolResultEnvelope::with_status("search", ToolStatus::NotFound, json!([]))
                .with_meta("reason", json!("empty_query"));
            return Ok(envelope.to_value());
        }

        let mut retriever_error = None;
        if let Some(retriever) = &self.retriever {
            match retriever.search(&query, k).await {
                Ok(docs) if !docs.is_empty() => {
                    debug!(hits = docs.len(), "Retriever answered search");
                    let entries = self.from_retriever(docs, k, enrich).await;
                    let envelope = ToolResultEnvelope::success("search", json!(entries))
                        .with_meta("query", json!(query))
                        .with_meta("k", json!(k))
                        .with_meta("source", json!("retriever"));
                    return Ok(envelope.to_value());
                }
                Ok(_) => debug!("Retriever found nothing, using keyword search"),
                Err(e) => {
                    warn!(error = %e, "Retriever failed, using keyword search");
                    retriever_error = Some(e.to_string());
                }
            }
        }

        let keyword_query = query.clone();
        let (status, entries, failure) =
            match self.blocking(move |store| store.keyword_search(&keyword_query, k)).await {
                Ok(entries) if !entries.is_empty() => (ToolStatus::Success, entries, None),
                Ok(_) => (ToolStatus::NotFound, Vec::new(), None),
                Err(e) => (ToolStatus::NotFound, Vec::new(), Some(e.to_string())),
            };

        let mut envelope = ToolResultEnvelope::with_status("search", status, json!(entries))
            .with_meta("query", json!(query))
            .with_meta("k", json!(k));
        if status == ToolStatus::Success {
            envelope = envelope.with_meta("source", json!(format!("keyword:{}", self.store.describe())));
        }
        if let Some(error) = failure {
            envelope = envelope.with_meta("error", json!(error));
        }
        if let Some(error) = retriever_error {
            envelope = envelope.with_meta("retriever_error", json!(error));
        }
        Ok(envelope.to_value())
    }
}
