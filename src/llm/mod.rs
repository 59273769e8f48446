pub mod models;
pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub use models::{ConnectivityStatus, GenerationParams, ProviderKind, StatusReport};

const STATUS_PROMPT: &str = "Say 'Hello' if you can understand this.";
const STATUS_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Unreachable,
    Unauthenticated,
    ModelNotFound,
    Timeout,
    /// The backend answered, but with an error status or a body we could not decode
    BadResponse,
}

impl ProviderErrorKind {
    /// Failures worth another attempt from the SQL generator.
    pub fn is_transient(self) -> bool {
        matches!(self, ProviderErrorKind::Timeout | ProviderErrorKind::BadResponse)
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderErrorKind::Unreachable => "unreachable",
            ProviderErrorKind::Unauthenticated => "unauthenticated",
            ProviderErrorKind::ModelNotFound => "model_not_found",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::BadResponse => "bad_response",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{provider} provider error ({kind}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub provider: ProviderKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, provider: ProviderKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmSetupError {
    #[error("unsupported LLM backend: {0}")]
    UnsupportedBackend(String),

    #[error("{setting} is required for the {backend} backend")]
    MissingSetting { backend: ProviderKind, setting: &'static str },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// One text-generation backend. Implementations never retry.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    fn base_url(&self) -> &str;

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, ProviderError>;

    /// Connectivity check with a tiny prompt; failures are folded into the report.
    async fn check_status(&self) -> StatusReport {
        let params = GenerationParams {
            temperature: 0.1,
            max_tokens: 50,
            timeout: STATUS_TIMEOUT,
        };
        let outcome = self.generate(STATUS_PROMPT, &params).await;
        StatusReport::from_outcome(self.kind(), self.model(), self.base_url(), outcome)
    }
}

/// Holds the backend chosen at startup together with the generation
/// parameters every request uses.
pub struct LlmManager {
    provider: Arc<dyn LlmProvider>,
    params: GenerationParams,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmSetupError> {
        let kind: ProviderKind = config.backend.parse()?;
        let provider: Arc<dyn LlmProvider> = match kind {
            ProviderKind::Ollama => Arc::new(providers::ollama::OllamaProvider::new(config)?),
            ProviderKind::OpenAi | ProviderKind::LmStudio | ProviderKind::OpenAiCompatible => {
                Arc::new(providers::openai::OpenAiProvider::new(kind, config)?)
            }
        };

        info!(
            "Using {} provider with model {} at {}",
            kind,
            provider.model(),
            provider.base_url()
        );

        Ok(Self {
            provider,
            params: GenerationParams::from_config(config),
        })
    }

    pub fn with_provider(provider: Arc<dyn LlmProvider>, params: GenerationParams) -> Self {
        Self { provider, params }
    }

    pub fn provider(&self) -> Arc<dyn LlmProvider> {
        Arc::clone(&self.provider)
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    pub async fn check_status(&self) -> StatusReport {
        self.provider.check_status().await
    }
}
