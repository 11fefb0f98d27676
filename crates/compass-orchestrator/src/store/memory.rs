// Requirement store held in memory, for fixtures and tests

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{RequirementEntry, RequirementStore, StoreError, relaxed_queries};

/// Requirements kept in a sorted map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    entries: BTreeMap<String, RequirementEntry>,
    source: Option<PathBuf>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Fixture {
    List(Vec<RequirementEntry>),
    Wrapped { requirements: Vec<RequirementEntry> },
}

impl InMemoryStore {
    /// Store holding `entries`; later duplicates replace earlier ones.
    pub fn new(entries: impl IntoIterator<Item = RequirementEntry>) -> Self {
        let entries = entries.into_iter().map(|entry| (entry.id.clone(), entry)).collect();
        Self { entries, source: None }
    }

    /// Parses a JSON array of entries, or an object with a `requirements` array.
    pub fn from_json_str(json: &str) -> Result<Self, StoreError> {
        let fixture: Fixture = serde_json::from_str(json).map_err(|e| StoreError::Fixture(e.to_string()))?;
        let entries = match fixture {
            Fixture::List(entries) | Fixture::Wrapped { requirements: entries } => entries,
        };
        Ok(Self::new(entries))
    }

    /// Loads a fixture file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(StoreError::Missing(path.to_path_buf()));
        }
        let mut store = Self::from_json_str(&std::fs::read_to_string(path)?)?;
        store.source = Some(path.to_path_buf());
        Ok(store)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RequirementStore for InMemoryStore {
    fn fetch_many(&self, ids: &[String]) -> Result<HashMap<String, RequirementEntry>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.entries.get(id).map(|entry| (id.clone(), entry.clone())))
            .collect())
    }

    fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<RequirementEntry>, StoreError> {
        for keyword_query in relaxed_queries(query) {
            let hits: Vec<RequirementEntry> =
                self.entries.values().filter(|entry| keyword_query.matches(entry)).take(k).cloned().collect();
            if !hits.is_empty() {
                return Ok(hits);
            }
        }
        Ok(Vec::new())
    }

    fn describe(&self) -> String {
        match &self.source {
            Some(path) => format!("json:{}", path.display()),
            None => "memory".to_string(),
        }
    }
}
