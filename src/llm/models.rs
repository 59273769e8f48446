use crate::config::LlmConfig;
use crate::llm::{LlmSetupError, ProviderError, ProviderErrorKind};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// Which backend family a provider talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "lmstudio")]
    LmStudio,
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
            ProviderKind::LmStudio => "lmstudio",
            ProviderKind::OpenAiCompatible => "openai-compatible",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = LlmSetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            "lmstudio" | "lm-studio" => Ok(ProviderKind::LmStudio),
            "openai-compatible" | "compatible" => Ok(ProviderKind::OpenAiCompatible),
            other => Err(LlmSetupError::UnsupportedBackend(other.to_string())),
        }
    }
}

// Parameters applied to every generation request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl GenerationParams {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature.clamp(0.0, 2.0),
            max_tokens: config.max_tokens,
            timeout: config.timeout(),
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityStatus {
    Success,
    Unreachable,
    Unauthenticated,
    ModelNotFound,
    Timeout,
    Error,
}

// Result of an AI status check, shaped for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: ConnectivityStatus,
    pub reachable: bool,
    pub provider: ProviderKind,
    pub model: String,
    pub base_url: String,
    pub sample_response: Option<String>,
    pub message: String,
}

impl StatusReport {
    pub fn from_outcome(
        provider: ProviderKind,
        model: &str,
        base_url: &str,
        outcome: Result<String, ProviderError>,
    ) -> Self {
        let (status, reachable, sample_response, message) = match outcome {
            Ok(text) => (
                ConnectivityStatus::Success,
                true,
                Some(text.trim().to_string()),
                format!("Successfully connected to {}", provider),
            ),
            Err(e) => match e.kind {
                ProviderErrorKind::Unreachable => (
                    ConnectivityStatus::Unreachable,
                    false,
                    None,
                    format!(
                        "Cannot connect to {} at {}. Make sure the server is running.",
                        provider, base_url
                    ),
                ),
                ProviderErrorKind::Timeout => (
                    ConnectivityStatus::Timeout,
                    false,
                    None,
                    format!("{} at {} did not answer in time", provider, base_url),
                ),
                ProviderErrorKind::Unauthenticated => (
                    ConnectivityStatus::Unauthenticated,
                    true,
                    None,
                    format!("API key issue with {}. Check your configuration.", provider),
                ),
                ProviderErrorKind::ModelNotFound => (
                    ConnectivityStatus::ModelNotFound,
                    true,
                    None,
                    format!("Model '{}' not found on {}", model, provider),
                ),
                ProviderErrorKind::BadResponse => (
                    ConnectivityStatus::Error,
                    true,
                    None,
                    format!("Failed to talk to {}: {}", provider, e.message),
                ),
            },
        };

        Self {
            status,
            reachable,
            provider,
            model: model.to_string(),
            base_url: base_url.to_string(),
            sample_response,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_report_separates_unreachable_from_rejected_credentials() {
        let unreachable = StatusReport::from_outcome(
            ProviderKind::LmStudio,
            "local-model",
            "http://localhost:1234/v1",
            Err(ProviderError::new(
                ProviderErrorKind::Unreachable,
                ProviderKind::LmStudio,
                "connection refused",
            )),
        );
        assert_eq!(unreachable.status, ConnectivityStatus::Unreachable);
        assert!(!unreachable.reachable);

        let rejected = StatusReport::from_outcome(
            ProviderKind::OpenAi,
            "gpt-3.5-turbo",
            "https://api.openai.com/v1",
            Err(ProviderError::new(
                ProviderErrorKind::Unauthenticated,
                ProviderKind::OpenAi,
                "401",
            )),
        );
        assert_eq!(rejected.status, ConnectivityStatus::Unauthenticated);
        assert!(rejected.reachable);
    }

    #[test]
    fn successful_status_check_keeps_sample_response() {
        let report = StatusReport::from_outcome(
            ProviderKind::Ollama,
            "llama3",
            "http://localhost:11434",
            Ok("  Hello \n".to_string()),
        );
        assert_eq!(report.status, ConnectivityStatus::Success);
        assert_eq!(report.sample_response.as_deref(), Some("Hello"));
    }

    #[test]
    fn temperature_is_clamped_into_range() {
        let config = LlmConfig {
            temperature: 3.5,
            ..LlmConfig::default()
        };
        assert_eq!(GenerationParams::from_config(&config).temperature, 2.0);
    }
}
