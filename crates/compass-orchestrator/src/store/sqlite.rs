//! SQLite-backed requirement store.
//!
//! Reads an existing `requirements(id, text, title, tags)` table; `tags` is a
//! comma-separated column. The database is built elsewhere and opened
//! read-only here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use rusqlite::{Connection, OpenFlags, Row, params_from_iter};
use tracing::debug;

use super::{KeywordQuery, MatchMode, RequirementEntry, RequirementStore, StoreError, relaxed_queries};

const COLUMNS: &str = "id, COALESCE(text, ''), title, COALESCE(tags, '')";

/// Requirement store over a SQLite file.
#[derive(Debug)]
pub struct SqliteRequirementStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteRequirementStore {
    /// Opens `path` read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(StoreError::Missing(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)?;
        Ok(Self::from_connection(conn, path))
    }

    /// Wraps an open connection.
    pub fn from_connection(conn: Connection, path: impl Into<PathBuf>) -> Self {
        Self { conn: Mutex::new(conn), path: path.into() }
    }

    fn query(&self, sql: &str, params: Vec<String>) -> Result<Vec<RequirementEntry>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(params), row_to_entry)?;
        let entries = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn run_keyword_query(&self, keyword_query: &KeywordQuery, k: usize) -> Result<Vec<RequirementEntry>, StoreError> {
        let joiner = match keyword_query.mode {
            MatchMode::All => " AND ",
            MatchMode::Any => " OR ",
        };
        let clauses = vec!["(text LIKE ? OR title LIKE ?)"; keyword_query.terms.len()];
        let sql = format!(
            "SELECT {} FROM requirements WHERE {} ORDER BY id LIMIT {}",
            COLUMNS,
            clauses.join(joiner),
            k
        );
        let params = keyword_query
            .terms
            .iter()
            .flat_map(|term| {
                let like = format!("%{}%", term);
                [like.clone(), like]
            })
            .collect();
        self.query(&sql, params)
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<RequirementEntry> {
    let tags: String = row.get(3)?;
    Ok(RequirementEntry {
        id: row.get(0)?,
        text: row.get(1)?,
        title: row.get(2)?,
        tags: RequirementEntry::parse_tags(&tags),
    })
}

impl RequirementStore for SqliteRequirementStore {
    fn fetch_many(&self, ids: &[String]) -> Result<HashMap<String, RequirementEntry>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("SELECT {} FROM requirements WHERE id IN ({})", COLUMNS, placeholders);
        let entries = self.query(&sql, ids.to_vec())?;
        debug!(requested = ids.len(), found = entries.len(), "Fetched requirements");
        Ok(entries.into_iter().map(|entry| (entry.id.clone(), entry)).collect())
    }

    fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<RequirementEntry>, StoreError> {
        for keyword_query in relaxed_queries(query) {
            let hits = self.run_keyword_query(&keyword_query, k)?;
            if !hits.is_empty() {
                debug!(terms = ?keyword_query.terms, mode = ?keyword_query.mode, hits = hits.len(), "Keyword search matched");
                return Ok(hits);
            }
        }
        Ok(Vec::new())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}
