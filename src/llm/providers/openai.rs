use crate::config::LlmConfig;
use crate::llm::providers::{status_error, transport_error};
use crate::llm::{
    GenerationParams, LlmProvider, LlmSetupError, ProviderError, ProviderErrorKind, ProviderKind,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const LM_STUDIO_BASE_URL: &str = "http://localhost:1234/v1";
const SYSTEM_PROMPT: &str = "You are an expert SQL query generator. Reply with a single SQL statement only.";

/// Chat-completions client shared by the OpenAI cloud API, LM Studio and any
/// other server speaking the same protocol.
pub struct OpenAiProvider {
    client: reqwest::Client,
    kind: ProviderKind,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct PromptRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct PromptResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(kind: ProviderKind, config: &LlmConfig) -> Result<Self, LlmSetupError> {
        let api_url = match (kind, &config.api_url) {
            (_, Some(url)) => url.clone(),
            (ProviderKind::OpenAi, None) => OPENAI_BASE_URL.to_string(),
            (ProviderKind::LmStudio, None) => LM_STUDIO_BASE_URL.to_string(),
            (_, None) => {
                return Err(LlmSetupError::MissingSetting {
                    backend: kind,
                    setting: "api_url",
                });
            }
        };

        // Only the cloud API insists on a key; local servers ignore it
        let api_key = config.api_key.clone().filter(|key| !key.trim().is_empty());
        if kind == ProviderKind::OpenAi && api_key.is_none() {
            return Err(LlmSetupError::MissingSetting {
                backend: kind,
                setting: "api_key",
            });
        }

        let client = reqwest::Client::builder().build()?;

        Ok(Self {
            client,
            kind,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_url)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn base_url(&self) -> &str {
        &self.api_url
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, ProviderError> {
        let request = PromptRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        debug!("Sending chat completion to {} with model {}", self.endpoint(), self.model);

        let mut builder = self
            .client
            .post(self.endpoint())
            .timeout(params.timeout)
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(self.kind, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("{} API responded with status code: {}", self.kind, status);
            return Err(status_error(self.kind, status, &body));
        }

        let prompt_response: PromptResponse = response
            .json()
            .await
            .map_err(|e| transport_error(self.kind, e))?;

        prompt_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                ProviderError::new(
                    ProviderErrorKind::BadResponse,
                    self.kind,
                    "No choices in response",
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(kind: ProviderKind, url: &str, key: Option<&str>) -> OpenAiProvider {
        let config = LlmConfig {
            backend: kind.to_string(),
            model: "test-model".to_string(),
            api_key: key.map(str::to_string),
            api_url: Some(url.to_string()),
            ..LlmConfig::default()
        };
        OpenAiProvider::new(kind, &config).unwrap()
    }

    fn params() -> GenerationParams {
        GenerationParams {
            temperature: 0.1,
            max_tokens: 100,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "SELECT 1"}}]
            })))
            .mount(&server)
            .await;

        let provider = provider_for(
            ProviderKind::OpenAi,
            &format!("{}/v1", server.uri()),
            Some("sk-test"),
        );
        let text = provider.generate("question", &params()).await.unwrap();
        assert_eq!(text, "SELECT 1");
    }

    #[tokio::test]
    async fn rejected_key_is_unauthenticated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let provider = provider_for(ProviderKind::OpenAi, &server.uri(), Some("sk-wrong"));
        let err = provider.generate("question", &params()).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn empty_choices_is_a_bad_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let provider = provider_for(ProviderKind::OpenAiCompatible, &server.uri(), None);
        let err = provider.generate("question", &params()).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::BadResponse);
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        // Nothing listens on port 9 on a test box
        let provider = provider_for(ProviderKind::LmStudio, "http://127.0.0.1:9/v1", None);
        let err = provider.generate("question", &params()).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Unreachable);
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let provider = provider_for(ProviderKind::OpenAiCompatible, &server.uri(), None);
        let quick = GenerationParams {
            timeout: Duration::from_millis(200),
            ..params()
        };
        let err = provider.generate("question", &quick).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Timeout);
    }
}
