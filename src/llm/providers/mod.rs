pub mod ollama;
pub mod openai;

use crate::llm::{ProviderError, ProviderErrorKind, ProviderKind};
use reqwest::StatusCode;

/// Maps a failed send (no HTTP status) onto the provider error taxonomy.
pub(crate) fn transport_error(provider: ProviderKind, err: reqwest::Error) -> ProviderError {
    let kind = if err.is_timeout() {
        ProviderErrorKind::Timeout
    } else if err.is_decode() || err.is_body() {
        ProviderErrorKind::BadResponse
    } else {
        ProviderErrorKind::Unreachable
    };
    ProviderError::new(kind, provider, err.to_string())
}

/// Maps a non-success HTTP status and its body onto the provider error taxonomy.
pub(crate) fn status_error(provider: ProviderKind, status: StatusCode, body: &str) -> ProviderError {
    let lowered = body.to_lowercase();
    let mentions_missing_model = lowered.contains("model")
        && (lowered.contains("not found")
            || lowered.contains("does not exist")
            || lowered.contains("model_not_found"));

    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderErrorKind::Unauthenticated,
        StatusCode::NOT_FOUND => ProviderErrorKind::ModelNotFound,
        _ if mentions_missing_model => ProviderErrorKind::ModelNotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderErrorKind::Timeout,
        _ => ProviderErrorKind::BadResponse,
    };

    let message = if body.is_empty() {
        format!("API responded with status code: {}", status)
    } else {
        format!("API responded with status code: {} - Response body: {}", status, body)
    };
    ProviderError::new(kind, provider, message)
}
