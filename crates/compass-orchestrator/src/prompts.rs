//! Prompt rendering.
//!
//! Templates use `{user_input}`, `{context}`, `{tool_help}` and `{tool_result}`
//! placeholders. Unknown placeholders are left as written.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::{OrchestrationError, Result};

const MAIN_TEMPLATE: &str = r#"You are the router for a PCI DSS compliance assistant. Decide how to answer the user's message.

Available tools:
{tool_help}

Reply with exactly ONE of the following and nothing else:
- skip
    when the message is a greeting, small talk, or needs no PCI DSS material.
- get:["<id>", "<id>", ...]
    to fetch requirements by identifier, e.g. get:["8.3.6","12.10.1"]. Identifiers
    start with a number from 1 to 12 followed by up to three dot-separated parts.
- get:"<id>"
    to fetch a single requirement, e.g. get:"3.5.1".
- search:"<query>"
    to look up requirements by topic, e.g. search:"encryption of stored card data".

Several get/search lines may be given, one per line, when the question needs them.

{context}
User message: {user_input}
"#;

const SMALLTALK_TEMPLATE: &str = r#"You are a friendly assistant that helps people understand the PCI DSS standard.
Answer the message below briefly and conversationally. If it asks about a specific
requirement, suggest asking about it directly.

{context}
User message: {user_input}
"#;

const FOLLOWUP_TEMPLATE: &str = r#"You are a PCI DSS compliance assistant. Answer the user's question using only the
tool observations below. Cite requirement identifiers (e.g. 3.5.1) for every claim.
If the observations do not contain the answer, say so plainly.

Observations (JSON):
{tool_result}

{context}
User question: {user_input}
"#;

/// The prompts the pipeline renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptTemplate {
    /// Asks for a plan
    Main,
    /// Conversational answer without tools
    Smalltalk,
    /// Answer composed from tool observations
    Followup,
}

impl PromptTemplate {
    /// All templates
    pub const ALL: [Self; 3] = [Self::Main, Self::Smalltalk, Self::Followup];

    /// File name used for overrides
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Main => "main.txt",
            Self::Smalltalk => "smalltalk.txt",
            Self::Followup => "followup.txt",
        }
    }

    fn builtin(self) -> &'static str {
        match self {
            Self::Main => MAIN_TEMPLATE,
            Self::Smalltalk => SMALLTALK_TEMPLATE,
            Self::Followup => FOLLOWUP_TEMPLATE,
        }
    }
}

/// Values substituted into a template.
#[derive(Debug, Clone, Default)]
pub struct PromptVars<'a> {
    /// The user's message
    pub user_input: &'a str,
    /// Retrieved context, if any
    pub context: &'a str,
    /// Tool catalog
    pub tool_help: &'a str,
    /// Serialized tool observations
    pub tool_result: &'a str,
}

/// Turns a template and variables into a prompt. Must be pure.
pub trait PromptRenderer: Send + Sync {
    /// Renders `template`
    fn render(&self, template: PromptTemplate, vars: &PromptVars<'_>) -> String;
}

/// Renderer over built-in templates with optional overrides.
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer {
    overrides: HashMap<PromptTemplate, String>,
}

impl TemplateRenderer {
    /// Renderer using only the built-in templates
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces one template
    #[must_use]
    pub fn with_template(mut self, template: PromptTemplate, text: impl Into<String>) -> Self {
        self.overrides.insert(template, text.into());
        self
    }

    /// Loads overrides from `dir`. Missing files keep the built-in template.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(OrchestrationError::Config(format!(
                "prompt directory {} does not exist",
                dir.display()
            )));
        }

        let mut renderer = Self::new();
        for template in PromptTemplate::ALL {
            let path = dir.join(template.file_name());
            if path.is_file() {
                debug!(path = %path.display(), "Loading prompt override");
                renderer.overrides.insert(template, std::fs::read_to_string(&path)?);
            }
        }
        Ok(renderer)
    }

    fn source(&self, template: PromptTemplate) -> &str {
        self.overrides.get(&template).map_or_else(|| template.builtin(), String::as_str)
    }
}

impl PromptRenderer for TemplateRenderer {
    fn render(&self, template: PromptTemplate, vars: &PromptVars<'_>) -> String {
        substitute(self.source(template), vars)
    }
}

/// Single-pass substitution, so placeholder text inside values is not expanded again.
fn substitute(source: &str, vars: &PromptVars<'_>) -> String {
    let mut out = String::with_capacity(source.len() + vars.user_input.len() + vars.tool_result.len());
    let mut rest = source;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        let Some(close) = after.find('}') else {
            out.push_str(after);
            return out;
        };

        let value = match &after[1..close] {
            "user_input" => Some(vars.user_input),
            "context" => Some(vars.context),
            "tool_help" => Some(vars.tool_help),
            "tool_result" => Some(vars.tool_result),
            _ => None,
        };
        match value {
            Some(value) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
