//! Built-in lookup tools.

pub mod get;
pub mod search;

use std::sync::Arc;

pub use get::GetRequirementTool;
pub use search::{SearchOptions, SearchTool};

use crate::config::StoreConfig;
use crate::registry::ToolRegistry;
use crate::store::{RequirementStore, Retriever};

/// Registry with `get` and `search` over `store`.
pub fn builtin_registry(
    store: Arc<dyn RequirementStore>,
    retriever: Option<Arc<dyn Retriever>>,
    config: &StoreConfig,
) -> ToolRegistry {
    let options =
        SearchOptions { top_k: config.search_top_k, enrich: config.enrich, enrich_max: config.enrich_max };
    let mut search = SearchTool::new(Arc::clone(&store), options);
    if let Some(retriever) = retriever {
        search = search.with_retriever(retriever);
    }

    ToolRegistry::builder()
        .register_blocking(Arc::new(GetRequirementTool::new(store, config.get_max_batch)))
        .register(Arc::new(search))
        .build()
}
