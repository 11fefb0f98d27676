// Error types for planning and orchestration

use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Why planner text could not be turned into a plan.
///
/// Every rejection is its own variant; the grammar never answers with an
/// empty plan in place of an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Planner produced nothing but whitespace
    #[error("planner output was empty")]
    EmptyPlan,

    /// A compact verb with nothing after the colon
    #[error("'{verb}:' has an empty payload")]
    EmptyPayload {
        /// The verb that was used
        verb: String,
    },

    /// A `word:` prefix naming no known verb, with no structured plan behind it
    #[error("unknown verb '{verb}' (expected 'get' or 'search')")]
    UnknownVerb {
        /// The unrecognized verb
        verb: String,
    },

    /// A value that does not satisfy the identifier grammar
    #[error("invalid requirement identifier '{value}'")]
    InvalidIdentifier {
        /// The rejected value
        value: String,
    },

    /// A `get` payload with no recoverable identifiers
    #[error("no requirement identifiers found in '{fragment}'")]
    NoIdentifiers {
        /// The payload that was scanned
        fragment: String,
    },

    /// A `get` payload over the identifier cap
    #[error("too many identifiers: {count} (limit {max})")]
    TooManyIdentifiers {
        /// Distinct identifiers supplied
        count: usize,
        /// Configured cap
        max: usize,
    },

    /// A `search` payload that is not a quoted string
    #[error("search query must be a double-quoted string, got '{fragment}'")]
    UnquotedQuery {
        /// The offending payload
        fragment: String,
    },

    /// A bracketed group that is not valid JSON
    #[error("malformed JSON in '{fragment}': {reason}")]
    MalformedJson {
        /// The candidate text
        fragment: String,
        /// Parser message
        reason: String,
    },

    /// Brackets that never close, or close with the wrong kind
    #[error("unbalanced braces or brackets in '{fragment}'")]
    UnbalancedStructure {
        /// Text from the first opening bracket
        fragment: String,
    },

    /// Valid JSON in a shape that is not a plan
    #[error("unrecognized plan shape: {fragment}")]
    UnrecognizedShape {
        /// The JSON that was found
        fragment: String,
    },

    /// Free text with neither a verb nor a bracketed group
    #[error("could not interpret planner output '{fragment}'")]
    NotAPlan {
        /// The offending text
        fragment: String,
    },
}

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Planner output rejected by the grammar
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// Model error
    #[error("Model error: {0}")]
    Model(#[from] compass_abstraction::ModelError),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blocking entry point was called from inside an async runtime
    #[error("blocking dispatch called from within an async runtime; use the async dispatch instead")]
    BlockingContext,

    /// Other error
    #[error("Orchestration error: {0}")]
    Other(String),
}

/// Shortens `text` for use inside an error message.
pub(crate) fn fragment(text: &str) -> String {
    const MAX: usize = 80;
    let text = text.trim();
    if text.chars().count() <= MAX {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_error_messages_name_the_fragment() {
        let err = PlanError::InvalidIdentifier { value: "13".into() };
        assert_eq!(err.to_string(), "invalid requirement identifier '13'");

        let err = PlanError::TooManyIdentifiers { count: 51, max: 50 };
        assert_eq!(err.to_string(), "too many identifiers: 51 (limit 50)");
    }

    #[test]
    fn test_fragment_truncates_long_text() {
        let long = "x".repeat(200);
        let short = fragment(&long);
        assert_eq!(short.chars().count(), 81);
        assert!(short.ends_with('…'));
        assert_eq!(fragment("  hi  "), "hi");
    }
}
