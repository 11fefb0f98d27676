//! PCI DSS requirement data.
//!
//! The lookup tools read requirements through [`RequirementStore`]. Two
//! backends exist: [`SqliteRequirementStore`] over an existing database and
//! [`InMemoryStore`], loaded from a JSON fixture. Nearest-neighbour retrieval
//! is external and plugs in through [`Retriever`].

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::StoreConfig;

pub use memory::InMemoryStore;
pub use sqlite::SqliteRequirementStore;

/// One requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementEntry {
    /// Identifier, e.g. `8.3.6`
    pub id: String,
    /// Requirement text
    #[serde(default)]
    pub text: String,
    /// Section title, when the source has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Topic tags
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RequirementEntry {
    /// Entry with text and no title or tags
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into(), title: None, tags: Vec::new() }
    }

    /// Splits a comma-separated tag column.
    pub fn parse_tags(csv: &str) -> Vec<String> {
        csv.split(',').map(str::trim).filter(|tag| !tag.is_empty()).map(ToString::to_string).collect()
    }
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configured source does not exist
    #[error("requirement source not found: {0}")]
    Missing(PathBuf),

    /// The fixture could not be read
    #[error("invalid requirement fixture: {0}")]
    Fixture(String),

    /// The nearest-neighbour retriever failed
    #[error("retriever error: {0}")]
    Retriever(String),
}

/// Read access to requirements. Implementations block; callers on an async
/// runtime go through the blocking pool.
pub trait RequirementStore: Send + Sync {
    /// Entries for the given identifiers, keyed by id. Unknown ids are absent.
    fn fetch_many(&self, ids: &[String]) -> Result<HashMap<String, RequirementEntry>, StoreError>;

    /// Up to `k` entries matching `query`, relaxing the match as described
    /// in [`relaxed_queries`].
    fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<RequirementEntry>, StoreError>;

    /// Short label for result metadata, e.g. `sqlite:data/pci.db`
    fn describe(&self) -> String;
}

/// One hit from a nearest-neighbour index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDoc {
    /// Requirement identifier
    pub id: String,
    /// Text stored with the vector, if any
    #[serde(default)]
    pub text: Option<String>,
    /// Similarity score
    #[serde(default)]
    pub score: Option<f32>,
}

/// Semantic search over requirements.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `k` hits for `query`, best first
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDoc>, StoreError>;
}

/// Whether all or any of the terms must appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Every term
    All,
    /// At least one term
    Any,
}

/// One keyword query. Terms match as case-insensitive substrings of the
/// text or title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordQuery {
    /// Terms to look for
    pub terms: Vec<String>,
    /// How terms combine
    pub mode: MatchMode,
}

impl KeywordQuery {
    /// Whether `entry` matches.
    pub fn matches(&self, entry: &RequirementEntry) -> bool {
        let text = entry.text.to_lowercase();
        let title = entry.title.as_deref().unwrap_or_default().to_lowercase();
        let hit = |term: &String| text.contains(term.as_str()) || title.contains(term.as_str());
        match self.mode {
            MatchMode::All => self.terms.iter().all(hit),
            MatchMode::Any => self.terms.iter().any(hit),
        }
    }
}

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "to", "for", "in", "on", "with", "by", "as", "is", "are", "be", "that",
    "this", "these", "those", "from", "at", "into", "it", "its", "their", "your", "my", "our", "about", "over",
    "under", "between", "across", "than", "then",
];

/// Search keywords: lower-cased alphanumeric tokens without stop-words,
/// lightly stemmed and de-duplicated in order.
pub fn keywords(query: &str) -> Vec<String> {
    let tokens: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty() && !STOPWORDS.contains(token))
        .map(stem)
        .collect();
    crate::identifier::dedup(tokens)
}

fn stem(token: &str) -> String {
    let mut token = token.to_string();
    if token.ends_with("ions") {
        token.pop();
    }
    if token.ends_with("ing") && token.len() > 5 {
        token.truncate(token.len() - 3);
    }
    if token.ends_with("ed") && token.len() > 4 {
        token.truncate(token.len() - 2);
    }
    if token.ends_with('s') && token.len() > 4 {
        token.pop();
    }
    token
}

/// Queries to try in order, stopping at the first that finds anything:
/// all keywords, then every pair of keywords, then any keyword. A query with
/// no keywords is matched as one literal phrase.
pub fn relaxed_queries(query: &str) -> Vec<KeywordQuery> {
    let terms = keywords(query);
    if terms.is_empty() {
        let phrase = query.replace('%', "").trim().to_lowercase();
        if phrase.is_empty() {
            return Vec::new();
        }
        return vec![KeywordQuery { terms: vec![phrase], mode: MatchMode::All }];
    }

    let mut queries = vec![KeywordQuery { terms: terms.clone(), mode: MatchMode::All }];
    if terms.len() > 2 {
        for (i, first) in terms.iter().enumerate() {
            for second in &terms[i + 1..] {
                queries.push(KeywordQuery { terms: vec![first.clone(), second.clone()], mode: MatchMode::All });
            }
        }
    }
    if terms.len() > 1 {
        queries.push(KeywordQuery { terms, mode: MatchMode::Any });
    }
    queries
}

/// Opens the store named by `config`: the SQLite database when set,
/// otherwise the JSON fixture, otherwise an empty in-memory store.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn RequirementStore>, StoreError> {
    if let Some(path) = &config.sqlite_path {
        info!(path = %path.display(), "Opening requirement database");
        return Ok(Arc::new(SqliteRequirementStore::open(path)?));
    }
    if let Some(path) = &config.data_file {
        info!(path = %path.display(), "Loading requirement fixture");
        return Ok(Arc::new(InMemoryStore::from_json_file(path)?));
    }
    warn!("No requirement source configured; lookups will find nothing");
    Ok(Arc::new(InMemoryStore::default()))
}
