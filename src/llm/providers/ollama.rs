use crate::config::LlmConfig;
use crate::llm::providers::{status_error, transport_error};
use crate::llm::{
    GenerationParams, LlmProvider, LlmSetupError, ProviderError, ProviderErrorKind, ProviderKind,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

const OLLAMA_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
}

#[derive(Serialize, Debug)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize, Debug)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    done: Option<bool>,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmSetupError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| OLLAMA_BASE_URL.to_string());

        let client = reqwest::Client::builder().build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.api_url)
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn base_url(&self) -> &str {
        &self.api_url
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, ProviderError> {
        info!("Sending request to Ollama with model: {}", self.model);
        debug!("API URL: {}", self.endpoint());

        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false, // Explicitly disable streaming
            options: OllamaOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .timeout(params.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(ProviderKind::Ollama, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Ollama API responded with status code: {} - {}", status, body);
            return Err(status_error(ProviderKind::Ollama, status, &body));
        }

        // Get the raw text response first for diagnostics
        let response_text = response
            .text()
            .await
            .map_err(|e| transport_error(ProviderKind::Ollama, e))?;

        debug!("Raw response from Ollama: {}", response_text);

        let ollama_response: OllamaResponse = serde_json::from_str(&response_text).map_err(|e| {
            error!("Failed to parse Ollama response: {} - Response was: {}", e, response_text);
            ProviderError::new(
                ProviderErrorKind::BadResponse,
                ProviderKind::Ollama,
                format!("Failed to parse Ollama response: {}", e),
            )
        })?;

        debug!(
            "Ollama model {:?} finished: {:?}",
            ollama_response.model, ollama_response.done
        );
        Ok(ollama_response.response)
    }
}
