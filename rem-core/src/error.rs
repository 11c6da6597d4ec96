//! Error taxonomy for REM operations
//!
//! Storage-level errors are normalized at the adapter boundary; agent-level
//! errors are caught at the orchestrator boundary. Each kind carries a stable
//! code for wire consumers.

use thiserror::Error;
use uuid::Uuid;

/// Malformed input: unknown table, unknown field, unknown query mode.
/// Recoverable by the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown table: {table}")]
    UnknownTable { table: String },

    #[error("Unknown query mode: {mode}")]
    UnknownQueryMode { mode: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Required parameter missing: {name}")]
    MissingParameter { name: String },

    #[error("Unknown parameter: {name}")]
    UnknownParameter { name: String },

    #[error("Malformed query: {reason}")]
    Malformed { reason: String },
}

/// Entity or row missing. Empty-result queries are NOT errors; these fire
/// only when a specific row was demanded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("No entity for key '{key}'")]
    Key { key: String },

    #[error("No row in {table} for id {id}")]
    Row { table: String, id: Uuid },
}

/// Agent construction and execution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("Agent schema not found: {name}")]
    SchemaNotFound { name: String },

    #[error("Tool not registered: {name}")]
    ToolNotFound { name: String },

    #[error("Iteration limit {limit} exceeded")]
    IterationLimitExceeded { limit: i32 },

    #[error("Output contract violation: {reason}")]
    OutputContract { reason: String },
}

/// Master error type for all REM errors.
#[derive(Debug, Clone, Error)]
pub enum RemError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    /// Unique-constraint violation on upsert; carries the conflicting
    /// natural key when the adapter could recover it.
    #[error("Conflict on key '{key}'")]
    Conflict { key: String },

    #[error("Field '{field}' does not exist on {table} (available: {available:?})")]
    FieldNotFound {
        table: String,
        field: String,
        available: Vec<String>,
    },

    #[error("Field '{field}' on {table} has no embeddings (embeddable: {embeddable:?})")]
    EmbeddingFieldNotFound {
        table: String,
        field: String,
        embeddable: Vec<String>,
    },

    #[error("Table {table} has no default content field (available: {available:?})")]
    ContentFieldNotFound {
        table: String,
        available: Vec<String>,
    },

    /// Unexpected storage failure, wrapping the underlying message.
    #[error("Query execution failed: {message}")]
    QueryExecution { message: String },

    /// LLM or embedding RPC failure after retries were exhausted.
    #[error("Provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    #[error("Authentication failed: {message}")]
    Auth {
        message: String,
        /// Login provider the caller should be pointed at.
        provider_hint: Option<String>,
    },

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl RemError {
    /// Stable code for wire consumers and log correlation.
    pub fn code(&self) -> &'static str {
        match self {
            RemError::Validation(_) => "validation_error",
            RemError::NotFound(_) => "not_found",
            RemError::Conflict { .. } => "conflict",
            RemError::FieldNotFound { .. } => "field_not_found",
            RemError::EmbeddingFieldNotFound { .. } => "embedding_field_not_found",
            RemError::ContentFieldNotFound { .. } => "content_field_not_found",
            RemError::QueryExecution { .. } => "query_execution_error",
            RemError::Provider { .. } => "provider_error",
            RemError::Auth { .. } => "auth_error",
            RemError::Agent(_) => "agent_error",
            RemError::Config { .. } => "config_error",
        }
    }

    /// Whether the caller can fix the request and retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RemError::Validation(_)
                | RemError::NotFound(_)
                | RemError::FieldNotFound { .. }
                | RemError::EmbeddingFieldNotFound { .. }
                | RemError::ContentFieldNotFound { .. }
        )
    }

    /// Shorthand for a storage failure with context.
    pub fn query_execution(message: impl Into<String>) -> Self {
        RemError::QueryExecution {
            message: message.into(),
        }
    }

    /// Shorthand for a provider failure.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        RemError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a configuration failure.
    pub fn config(message: impl Into<String>) -> Self {
        RemError::Config {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for RemError {
    fn from(err: serde_json::Error) -> Self {
        RemError::QueryExecution {
            message: format!("serialization failed: {err}"),
        }
    }
}

/// Result type alias for REM operations.
pub type RemResult<T> = Result<T, RemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_codes() {
        let err: RemError = ValidationError::UnknownTable {
            table: "widgets".to_string(),
        }
        .into();
        assert_eq!(err.code(), "validation_error");
        assert!(err.is_recoverable());

        let err = RemError::Conflict {
            key: "sarah-chen".to_string(),
        };
        assert_eq!(err.code(), "conflict");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_embedding_field_message_lists_alternatives() {
        let err = RemError::EmbeddingFieldNotFound {
            table: "resources".to_string(),
            field: "title".to_string(),
            embeddable: vec!["content".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("title"));
        assert!(message.contains("content"));
    }
}
