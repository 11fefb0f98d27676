// Compact `verb:payload` statements.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};

use super::Action;
use crate::error::{PlanError, fragment};
use crate::identifier;

static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]*)""#).expect("quoted-string regex should be valid"));

pub(super) fn is_known_verb(verb: &str) -> bool {
    matches!(verb, "get" | "search")
}

pub(super) fn parse_statement(verb: &str, payload: &str, max_ids: usize) -> Result<Action, PlanError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(PlanError::EmptyPayload { verb: verb.to_string() });
    }

    match verb {
        "get" => parse_get(payload, max_ids),
        "search" => parse_search(payload),
        other => Err(PlanError::UnknownVerb { verb: other.to_string() }),
    }
}

fn parse_get(payload: &str, max_ids: usize) -> Result<Action, PlanError> {
    if payload.starts_with('[') {
        let ids = get_array(payload)?;
        let ids = capped(ids, max_ids)?;
        return Ok(Action::new("get", json!({ "ids": ids })));
    }

    let ids = if payload.starts_with('"') { get_quoted(payload)? } else { get_free_text(payload)? };
    let ids = capped(ids, max_ids)?;
    Ok(get_action(ids))
}

/// `get:[...]`: a JSON array of identifier strings. Every element must be valid.
fn get_array(payload: &str) -> Result<Vec<String>, PlanError> {
    let values: Vec<Value> = first_json_value(payload)?;

    let mut ids = Vec::with_capacity(values.len());
    for value in values {
        let Some(raw) = value.as_str() else {
            return Err(PlanError::InvalidIdentifier { value: value.to_string() });
        };
        let id = raw.trim();
        if !identifier::is_valid(id) {
            return Err(PlanError::InvalidIdentifier { value: id.to_string() });
        }
        ids.push(id.to_string());
    }

    if ids.is_empty() {
        return Err(PlanError::NoIdentifiers { fragment: fragment(payload) });
    }
    Ok(ids)
}

/// `get:"id"` and the tolerant `get:"a", "b"` / `get:"a and b"` variants.
fn get_quoted(payload: &str) -> Result<Vec<String>, PlanError> {
    let mut ids = Vec::new();
    for captures in QUOTED.captures_iter(payload) {
        let Some(inner) = captures.get(1) else { continue };
        let value = inner.as_str().trim();

        if identifier::is_valid(value) {
            ids.push(value.to_string());
        } else if identifier::looks_like_identifier(value) {
            return Err(PlanError::InvalidIdentifier { value: value.to_string() });
        } else {
            ids.extend(identifier::extract(value));
        }
    }

    if ids.is_empty() {
        // An unterminated quote or stray text: fall back to a plain scan.
        return get_free_text(payload);
    }
    Ok(ids)
}

/// `get: 3.4.1 and 6.5`: every valid identifier in the text.
fn get_free_text(payload: &str) -> Result<Vec<String>, PlanError> {
    let candidates = identifier::candidates(payload);
    let ids: Vec<String> =
        candidates.iter().filter(|c| identifier::is_valid(c)).map(|c| (*c).to_string()).collect();

    if ids.is_empty() {
        return Err(match candidates.first() {
            Some(invalid) => PlanError::InvalidIdentifier { value: (*invalid).to_string() },
            None => PlanError::NoIdentifiers { fragment: fragment(payload) },
        });
    }
    Ok(ids)
}

fn capped(ids: Vec<String>, max_ids: usize) -> Result<Vec<String>, PlanError> {
    let ids = identifier::dedup(ids);
    if ids.len() > max_ids {
        return Err(PlanError::TooManyIdentifiers { count: ids.len(), max: max_ids });
    }
    Ok(ids)
}

fn get_action(mut ids: Vec<String>) -> Action {
    if ids.len() == 1 {
        let id = ids.remove(0);
        Action::new("get", json!({ "id": id }))
    } else {
        Action::new("get", json!({ "ids": ids }))
    }
}

/// `search:"text"`: one JSON string literal, escapes allowed.
fn parse_search(payload: &str) -> Result<Action, PlanError> {
    if !payload.starts_with('"') {
        return Err(PlanError::UnquotedQuery { fragment: fragment(payload) });
    }

    let query: String = first_json_value(payload)?;
    if query.trim().is_empty() {
        return Err(PlanError::EmptyPayload { verb: "search".to_string() });
    }
    Ok(Action::new("search", json!({ "query": query })))
}

/// Decodes the first JSON value in `payload`, ignoring anything after it.
fn first_json_value<T: serde::de::DeserializeOwned>(payload: &str) -> Result<T, PlanError> {
    let mut stream = serde_json::Deserializer::from_str(payload).into_iter::<T>();
    match stream.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(PlanError::MalformedJson { fragment: fragment(payload), reason: e.to_string() }),
        None => Err(PlanError::MalformedJson {
            fragment: fragment(payload),
            reason: "no JSON value".to_string(),
        }),
    }
}
