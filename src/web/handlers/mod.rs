pub mod connections;
pub mod exports;
pub mod queries;
pub mod schema;

use crate::error::{ExecutionErrorKind, QueryError};
use crate::llm::ProviderErrorKind;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

/// Error body for every API route: `{"error": <kind>, "detail": <message>}`.
#[derive(Debug)]
pub enum ApiError {
    Query(QueryError),
    BadRequest(String),
    Internal(String),
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError::Query(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Query(QueryError::InvalidRequest(rejection.body_text()))
    }
}

fn status_for(err: &QueryError) -> StatusCode {
    match err {
        QueryError::InvalidRequest(_) | QueryError::UnsafeStatement(_) => StatusCode::BAD_REQUEST,
        QueryError::NotFound(_) | QueryError::ConnectionUnavailable(_) => StatusCode::NOT_FOUND,
        QueryError::SchemaUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        QueryError::GenerationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        QueryError::Provider(e) if e.kind == ProviderErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        QueryError::Provider(_) => StatusCode::BAD_GATEWAY,
        QueryError::Execution { kind, .. } => match kind {
            ExecutionErrorKind::Syntax => StatusCode::BAD_REQUEST,
            ExecutionErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ExecutionErrorKind::Connection | ExecutionErrorKind::Cancelled => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, detail) = match self {
            ApiError::Query(err) => (status_for(&err), err.kind_name(), err.to_string()),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "bad_request".to_string(), detail),
            ApiError::Internal(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error".to_string(),
                detail,
            ),
        };

        if status.is_server_error() {
            error!("{} ({}): {}", status, kind, detail);
        } else {
            warn!("{} ({}): {}", status, kind, detail);
        }

        (status, Json(json!({ "error": kind, "detail": detail }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
