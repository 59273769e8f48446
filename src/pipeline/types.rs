use crate::error::QueryError;
use crate::history::QueryRecord;
use crate::pipeline::visualize::VisualizationIntent;
use duckdb::arrow::datatypes::DataType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A natural-language question aimed at one connection.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    #[serde(rename = "query")]
    pub text: String,
    pub connection_id: String,
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            connection_id: connection_id.into(),
            context: None,
        }
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.text.trim().is_empty() {
            return Err(QueryError::InvalidRequest("query text must not be empty".to_string()));
        }
        if self.connection_id.trim().is_empty() {
            return Err(QueryError::InvalidRequest("connection_id must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Prompt-ready schema summary plus the snapshot it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaContext {
    pub text: String,
    /// Capture time of the source snapshot
    pub version: DateTime<Utc>,
    pub database_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSql {
    pub statement: String,
    pub schema_version: DateTime<Utc>,
    pub attempts: u32,
}

/// Coarse value class of a result column, taken from the engine's result schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Numeric,
    Temporal,
    Text,
    Boolean,
    Other,
}

impl From<&DataType> for ValueKind {
    fn from(data_type: &DataType) -> Self {
        match data_type {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float16
            | DataType::Float32
            | DataType::Float64
            | DataType::Decimal128(_, _)
            | DataType::Decimal256(_, _) => ValueKind::Numeric,
            DataType::Date32
            | DataType::Date64
            | DataType::Timestamp(_, _)
            | DataType::Time32(_)
            | DataType::Time64(_) => ValueKind::Temporal,
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => ValueKind::Text,
            DataType::Boolean => ValueKind::Boolean,
            DataType::Dictionary(_, value) => ValueKind::from(value.as_ref()),
            _ => ValueKind::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub column_kinds: Vec<ValueKind>,
    /// Engine row order, at most the configured row cap
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub execution_time_ms: f64,
    pub truncated: bool,
}

/// What the query endpoints send back: the ledger entry plus the data.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub query_id: String,
    pub connection_id: String,
    pub original_query: String,
    pub generated_sql: String,
    pub data: Vec<Map<String, Value>>,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub execution_time_ms: f64,
    pub visualization_type: VisualizationIntent,
    pub timestamp: DateTime<Utc>,
    pub truncated: bool,
}

impl QueryOutcome {
    pub fn new(record: QueryRecord, result: ExecutionResult) -> Self {
        Self {
            query_id: record.query_id,
            connection_id: record.connection_id,
            original_query: record.original_query,
            generated_sql: record.generated_sql,
            data: result.rows,
            columns: result.columns,
            row_count: result.row_count,
            execution_time_ms: result.execution_time_ms,
            visualization_type: record.visualization_type,
            timestamp: record.executed_at,
            truncated: result.truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckdb::arrow::datatypes::TimeUnit;

    #[test]
    fn blank_text_is_invalid() {
        let err = QueryRequest::new("   ", "sales").validate().unwrap_err();
        assert!(matches!(err, QueryError::InvalidRequest(_)));
        assert!(QueryRequest::new("top customers", "sales").validate().is_ok());
    }

    #[test]
    fn request_reads_the_query_field() {
        let request: QueryRequest = serde_json::from_str(
            r#"{"query": "revenue by month", "connection_id": "sales", "context": {"year": 2024}}"#,
        )
        .unwrap();
        assert_eq!(request.text, "revenue by month");
        assert_eq!(request.context.unwrap()["year"], 2024);
    }

    #[test]
    fn arrow_types_map_to_value_kinds() {
        assert_eq!(ValueKind::from(&DataType::Decimal128(18, 3)), ValueKind::Numeric);
        assert_eq!(
            ValueKind::from(&DataType::Timestamp(TimeUnit::Microsecond, None)),
            ValueKind::Temporal
        );
        assert_eq!(ValueKind::from(&DataType::Utf8), ValueKind::Text);
        assert_eq!(ValueKind::from(&DataType::Boolean), ValueKind::Boolean);
        assert_eq!(ValueKind::from(&DataType::Binary), ValueKind::Other);
    }
}
