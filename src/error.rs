use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::llm::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// The engine rejected the statement (parse, bind, constraint, conversion)
    Syntax,
    Timeout,
    Connection,
    /// The caller went away before the execution finished
    Cancelled,
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionErrorKind::Syntax => "syntax",
            ExecutionErrorKind::Timeout => "timeout",
            ExecutionErrorKind::Connection => "connection",
            ExecutionErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Everything the query pipeline, the ledger and the registries can surface
/// to the transport layer.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("schema unavailable for connection '{0}'")]
    SchemaUnavailable(String),

    #[error("connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("SQL generation failed after {attempts} attempt(s): {reason}")]
    GenerationFailed { attempts: u32, reason: String },

    #[error("unsafe statement: {0}")]
    UnsafeStatement(String),

    #[error("execution error ({kind}): {message}")]
    Execution {
        kind: ExecutionErrorKind,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),
}

impl QueryError {
    pub fn execution(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        QueryError::Execution {
            kind,
            message: message.into(),
        }
    }

    /// Stable machine-readable name used in API error bodies.
    pub fn kind_name(&self) -> String {
        match self {
            QueryError::InvalidRequest(_) => "invalid_request".to_string(),
            QueryError::SchemaUnavailable(_) => "schema_unavailable".to_string(),
            QueryError::ConnectionUnavailable(_) => "connection_unavailable".to_string(),
            QueryError::Provider(e) => format!("provider_error.{}", e.kind),
            QueryError::GenerationFailed { .. } => "generation_failed".to_string(),
            QueryError::UnsafeStatement(_) => "unsafe_statement".to_string(),
            QueryError::Execution { kind, .. } => format!("execution_error.{}", kind),
            QueryError::NotFound(_) => "not_found".to_string(),
        }
    }
}
